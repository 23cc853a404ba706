// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

use std::collections::HashSet;
use std::fmt;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use crate::newtype_index;

/// Name of the root of the class hierarchy.
pub const ROOT_TYPE: &str = "Object";
/// Type of string constants.
pub const STRING_TYPE: &str = "String";
/// Type of metadata objects produced by class literals.
pub const CLASS_TYPE: &str = "Class";
/// Root of all throwable types.
pub const THROWABLE_TYPE: &str = "Throwable";

const ARRAY_SUFFIX: &str = "[]";

lazy_static! {
    static ref PRIMITIVE_TYPE_NAMES: HashSet<&'static str> = [
        "void", "boolean", "byte", "char", "short", "int", "long", "float", "double",
    ]
    .into_iter()
    .collect();
}

/// SSA value number. Parameters occupy `1..=n`, the receiver being `1`.
pub type ValueNumber = u32;
/// Program counter: the index of an instruction in its method body.
pub type Pc = u32;

newtype_index! {
    /// Dense id of a class (or array class) in a class hierarchy.
    pub struct ClassId;
}

newtype_index! {
    pub struct FieldId;
}

newtype_index! {
    pub struct MethodId;
}

/// A source-level type name. Array types carry one `[]` suffix per dimension.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeName(String);

impl TypeName {
    pub fn new(name: impl Into<String>) -> Self {
        TypeName(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn void() -> Self {
        TypeName::new("void")
    }

    pub fn is_primitive(&self) -> bool {
        PRIMITIVE_TYPE_NAMES.contains(self.0.as_str())
    }

    pub fn is_reference(&self) -> bool {
        !self.is_primitive()
    }

    pub fn is_array(&self) -> bool {
        self.0.ends_with(ARRAY_SUFFIX)
    }

    /// The element type of an array type.
    pub fn element_type(&self) -> Option<TypeName> {
        self.0
            .strip_suffix(ARRAY_SUFFIX)
            .map(|elem| TypeName::new(elem))
    }

    pub fn array_of(&self) -> TypeName {
        TypeName(format!("{}{}", self.0, ARRAY_SUFFIX))
    }

    pub fn dimensions(&self) -> usize {
        let mut dims = 0;
        let mut name = self.0.as_str();
        while let Some(elem) = name.strip_suffix(ARRAY_SUFFIX) {
            dims += 1;
            name = elem;
        }
        dims
    }

    /// The type left after stripping all array dimensions.
    pub fn innermost(&self) -> TypeName {
        TypeName::new(self.0.trim_end_matches(ARRAY_SUFFIX))
    }
}

impl fmt::Debug for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TypeName {
    fn from(name: &str) -> Self {
        TypeName::new(name)
    }
}

/// A symbolic field reference, resolved against the hierarchy on use.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldRef {
    pub class: TypeName,
    pub name: String,
}

impl FieldRef {
    pub fn new(class: impl Into<TypeName>, name: impl Into<String>) -> Self {
        FieldRef {
            class: class.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.class, self.name)
    }
}

/// A symbolic method reference: declared class plus selector.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MethodRef {
    pub class: TypeName,
    pub selector: String,
}

impl MethodRef {
    pub fn new(class: impl Into<TypeName>, selector: impl Into<String>) -> Self {
        MethodRef {
            class: class.into(),
            selector: selector.into(),
        }
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.class, self.selector)
    }
}
