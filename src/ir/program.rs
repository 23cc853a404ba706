// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! The serializable program model: class declarations with SSA method bodies,
//! plus the entrypoints to analyze. Programs are read from JSON or assembled
//! with the builder-style helpers below.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::hierarchy::SimpleHierarchy;
use super::instruction::{Instruction, MethodBody};
use super::types::{MethodRef, TypeName};
use crate::util::error::PtaResult;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Program {
    pub classes: Vec<ClassDecl>,
    #[serde(default)]
    pub entrypoints: Vec<MethodRef>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClassDecl {
    pub name: TypeName,
    #[serde(default)]
    pub superclass: Option<TypeName>,
    #[serde(default)]
    pub interfaces: Vec<TypeName>,
    #[serde(default)]
    pub is_interface: bool,
    #[serde(default)]
    pub is_abstract: bool,
    #[serde(default)]
    pub is_final: bool,
    #[serde(default)]
    pub fields: Vec<FieldDecl>,
    #[serde(default)]
    pub methods: Vec<MethodDecl>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    pub ty: TypeName,
    #[serde(default)]
    pub is_static: bool,
}

fn void() -> TypeName {
    TypeName::void()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MethodDecl {
    pub selector: String,
    /// Declared parameter types, excluding the receiver.
    #[serde(default)]
    pub params: Vec<TypeName>,
    #[serde(default = "void")]
    pub ret: TypeName,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub is_abstract: bool,
    #[serde(default)]
    pub is_final: bool,
    #[serde(default)]
    pub is_private: bool,
    /// Reflective factory: its result type is learned from downstream casts.
    #[serde(default)]
    pub is_factory: bool,
    #[serde(default)]
    pub body: Option<MethodBody>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(text: &str) -> PtaResult<Program> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> PtaResult<Program> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn class(mut self, class: ClassDecl) -> Self {
        self.classes.push(class);
        self
    }

    pub fn entrypoint(mut self, class: &str, selector: &str) -> Self {
        self.entrypoints.push(MethodRef::new(class, selector));
        self
    }

    /// Builds the class hierarchy, keeping the entrypoints aside.
    pub fn build_hierarchy(self) -> PtaResult<(SimpleHierarchy, Vec<MethodRef>)> {
        let Program { classes, entrypoints } = self;
        Ok((SimpleHierarchy::from_decls(classes)?, entrypoints))
    }
}

impl ClassDecl {
    pub fn new(name: &str) -> Self {
        ClassDecl {
            name: TypeName::new(name),
            superclass: None,
            interfaces: Vec::new(),
            is_interface: false,
            is_abstract: false,
            is_final: false,
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn extends(mut self, superclass: &str) -> Self {
        self.superclass = Some(TypeName::new(superclass));
        self
    }

    pub fn implements(mut self, interface: &str) -> Self {
        self.interfaces.push(TypeName::new(interface));
        self
    }

    pub fn interface(mut self) -> Self {
        self.is_interface = true;
        self.is_abstract = true;
        self
    }

    pub fn abstract_class(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    pub fn final_class(mut self) -> Self {
        self.is_final = true;
        self
    }

    pub fn field(mut self, name: &str, ty: &str) -> Self {
        self.fields.push(FieldDecl {
            name: name.to_string(),
            ty: TypeName::new(ty),
            is_static: false,
        });
        self
    }

    pub fn static_field(mut self, name: &str, ty: &str) -> Self {
        self.fields.push(FieldDecl {
            name: name.to_string(),
            ty: TypeName::new(ty),
            is_static: true,
        });
        self
    }

    pub fn method(mut self, method: MethodDecl) -> Self {
        self.methods.push(method);
        self
    }
}

impl MethodDecl {
    /// An instance method returning `void`, without a body.
    pub fn new(selector: &str) -> Self {
        MethodDecl {
            selector: selector.to_string(),
            params: Vec::new(),
            ret: TypeName::void(),
            is_static: false,
            is_abstract: false,
            is_final: false,
            is_private: false,
            is_factory: false,
            body: None,
        }
    }

    pub fn static_method(mut self) -> Self {
        self.is_static = true;
        self
    }

    pub fn abstract_method(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    pub fn final_method(mut self) -> Self {
        self.is_final = true;
        self
    }

    pub fn private_method(mut self) -> Self {
        self.is_private = true;
        self
    }

    pub fn factory(mut self) -> Self {
        self.is_factory = true;
        self
    }

    pub fn params(mut self, params: &[&str]) -> Self {
        self.params = params.iter().map(|p| TypeName::new(*p)).collect();
        self
    }

    pub fn returns(mut self, ty: &str) -> Self {
        self.ret = TypeName::new(ty);
        self
    }

    pub fn body(mut self, instructions: Vec<Instruction>) -> Self {
        self.body = Some(MethodBody::new(instructions));
        self
    }

    pub fn with_body(mut self, body: MethodBody) -> Self {
        self.body = Some(body);
        self
    }
}
