// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

use std::collections::{BTreeSet, HashMap};

use itertools::Itertools;
use log::*;

use super::instruction::{Instruction, MethodBody};
use super::program::ClassDecl;
use super::types::*;
use crate::util::bit_vec::Idx;
use crate::util::error::{PtaError, PtaResult};

#[derive(Clone, Debug)]
pub struct ClassInfo {
    pub name: TypeName,
    pub superclass: Option<ClassId>,
    pub interfaces: Vec<ClassId>,
    pub is_interface: bool,
    pub is_abstract: bool,
    pub is_final: bool,
    /// Element type of an array class.
    pub array_element: Option<TypeName>,
    pub fields: Vec<FieldId>,
    pub methods: Vec<MethodId>,
}

impl ClassInfo {
    pub fn is_array(&self) -> bool {
        self.array_element.is_some()
    }

    /// Whether instances of exactly this class can exist.
    pub fn is_concrete(&self) -> bool {
        !self.is_interface && !self.is_abstract
    }
}

#[derive(Clone, Debug)]
pub struct FieldInfo {
    pub declaring_class: ClassId,
    pub name: String,
    pub ty: TypeName,
    pub is_static: bool,
}

#[derive(Clone, Debug)]
pub struct MethodInfo {
    pub declaring_class: ClassId,
    pub selector: String,
    /// Parameter types; the receiver comes first for instance methods.
    pub params: Vec<TypeName>,
    pub ret: TypeName,
    pub is_static: bool,
    pub is_abstract: bool,
    pub is_final: bool,
    pub is_private: bool,
    pub is_factory: bool,
    pub body: Option<MethodBody>,
}

impl MethodInfo {
    pub fn num_params(&self) -> usize {
        self.params.len()
    }

    /// Value number of the `i`-th parameter.
    pub fn param_value(&self, i: usize) -> ValueNumber {
        i as ValueNumber + 1
    }

    pub fn is_reference_param(&self, i: usize) -> bool {
        self.params.get(i).map_or(false, TypeName::is_reference)
    }

    pub fn returns_reference(&self) -> bool {
        self.ret.is_reference()
    }
}

/// The class-hierarchy collaborator consumed by the analysis.
pub trait ClassHierarchy {
    fn lookup_class(&self, name: &TypeName) -> Option<ClassId>;

    fn class(&self, id: ClassId) -> &ClassInfo;

    fn num_classes(&self) -> usize;

    fn root_class(&self) -> ClassId;

    /// All types `class` is assignable to, itself included, sorted by id.
    fn supertypes(&self, class: ClassId) -> &[ClassId];

    /// Concrete classes assignable to `class`.
    fn concrete_subtypes(&self, class: ClassId) -> &[ClassId];

    fn field(&self, id: FieldId) -> &FieldInfo;

    fn resolve_field(&self, field: &FieldRef) -> Option<FieldId>;

    fn method(&self, id: MethodId) -> &MethodInfo;

    /// Virtual lookup of `selector` starting at `class`.
    fn resolve_method(&self, class: ClassId, selector: &str) -> Option<MethodId>;

    fn is_assignable(&self, from: ClassId, to: ClassId) -> bool {
        to == self.root_class() || self.supertypes(from).binary_search(&to).is_ok()
    }

    fn is_subclass_of(&self, sub: ClassId, sup: ClassId) -> bool {
        !self.class(sup).is_interface && self.is_assignable(sub, sup)
    }

    fn implements_interface(&self, class: ClassId, interface: ClassId) -> bool {
        self.class(interface).is_interface && self.is_assignable(class, interface)
    }

    fn lookup_method(&self, method: &MethodRef) -> Option<MethodId> {
        let class = self.lookup_class(&method.class)?;
        self.resolve_method(class, &method.selector)
    }

    fn throwable_class(&self) -> Option<ClassId> {
        self.lookup_class(&TypeName::new(THROWABLE_TYPE))
    }

    /// The class of the elements of an array class, if they are references.
    fn array_element_class(&self, class: ClassId) -> Option<ClassId> {
        let elem = self.class(class).array_element.as_ref()?;
        if elem.is_primitive() {
            None
        } else {
            self.lookup_class(elem)
        }
    }

    fn method_name(&self, id: MethodId) -> String {
        let method = self.method(id);
        format!("{}.{}", self.class(method.declaring_class).name, method.selector)
    }
}

/// An in-memory hierarchy built from class declarations. All closures are
/// precomputed, so every query is a lookup.
#[derive(Debug)]
pub struct SimpleHierarchy {
    classes: Vec<ClassInfo>,
    class_ids: HashMap<TypeName, ClassId>,
    fields: Vec<FieldInfo>,
    methods: Vec<MethodInfo>,
    declared_methods: Vec<HashMap<String, MethodId>>,
    supertypes: Vec<Vec<ClassId>>,
    concrete_subtypes: Vec<Vec<ClassId>>,
    root: ClassId,
}

fn invalid(msg: String) -> PtaError {
    PtaError::InvalidProgram(msg)
}

fn collect_array_types(ty: &TypeName, out: &mut BTreeSet<(usize, TypeName)>) {
    let mut ty = ty.clone();
    while let Some(elem) = ty.element_type() {
        out.insert((ty.dimensions(), ty.clone()));
        ty = elem;
    }
}

fn array_types_of(decl: &ClassDecl, out: &mut BTreeSet<(usize, TypeName)>) {
    for field in &decl.fields {
        collect_array_types(&field.ty, out);
    }
    for method in &decl.methods {
        method.params.iter().for_each(|p| collect_array_types(p, out));
        collect_array_types(&method.ret, out);
        let Some(body) = &method.body else { continue };
        for instr in &body.instructions {
            match instr {
                Instruction::New { ty, .. } | Instruction::CheckCast { ty, .. } => collect_array_types(ty, out),
                Instruction::Catch { types, .. } => types.iter().for_each(|t| collect_array_types(t, out)),
                _ => {}
            }
        }
        for exc in &body.implicit_exceptions {
            collect_array_types(&exc.ty, out);
        }
    }
}

impl SimpleHierarchy {
    pub fn from_decls(mut decls: Vec<ClassDecl>) -> PtaResult<Self> {
        let root_name = TypeName::new(ROOT_TYPE);
        if !decls.iter().any(|d| d.name == root_name) {
            decls.insert(0, ClassDecl::new(ROOT_TYPE));
        }

        let mut class_ids = HashMap::new();
        for (i, decl) in decls.iter().enumerate() {
            if decl.name.is_array() || decl.name.is_primitive() {
                return Err(invalid(format!("cannot declare class {}", decl.name)));
            }
            if class_ids.insert(decl.name.clone(), ClassId::new(i)).is_some() {
                return Err(invalid(format!("duplicate class {}", decl.name)));
            }
        }
        let root = class_ids[&root_name];

        let mut array_types = BTreeSet::new();
        decls.iter().for_each(|d| array_types_of(d, &mut array_types));

        let mut hierarchy = SimpleHierarchy {
            classes: Vec::new(),
            class_ids,
            fields: Vec::new(),
            methods: Vec::new(),
            declared_methods: Vec::new(),
            supertypes: Vec::new(),
            concrete_subtypes: Vec::new(),
            root,
        };

        for decl in decls {
            hierarchy.add_declared_class(decl)?;
        }
        for (_, ty) in array_types {
            let id = ClassId::new(hierarchy.classes.len());
            hierarchy.class_ids.insert(ty.clone(), id);
            hierarchy.classes.push(ClassInfo {
                array_element: ty.element_type(),
                name: ty,
                superclass: Some(root),
                interfaces: Vec::new(),
                is_interface: false,
                is_abstract: false,
                is_final: true,
                fields: Vec::new(),
                methods: Vec::new(),
            });
            hierarchy.declared_methods.push(HashMap::new());
        }

        hierarchy.check_acyclic()?;
        hierarchy.compute_closures();
        debug!(
            "Built class hierarchy: {} classes, {} methods, {} fields",
            hierarchy.classes.len(),
            hierarchy.methods.len(),
            hierarchy.fields.len()
        );
        Ok(hierarchy)
    }

    fn resolve_decl_type(&self, name: &TypeName, of: &TypeName) -> PtaResult<ClassId> {
        self.class_ids
            .get(name)
            .copied()
            .ok_or_else(|| invalid(format!("unknown supertype {} of {}", name, of)))
    }

    fn add_declared_class(&mut self, decl: ClassDecl) -> PtaResult<()> {
        let id = ClassId::new(self.classes.len());
        let superclass = match &decl.superclass {
            Some(sup) => Some(self.resolve_decl_type(sup, &decl.name)?),
            None if id == self.root => None,
            None => Some(self.root),
        };
        let mut interfaces = Vec::new();
        for name in &decl.interfaces {
            let iface = self.resolve_decl_type(name, &decl.name)?;
            interfaces.push(iface);
        }

        let mut fields = Vec::new();
        for field in decl.fields {
            fields.push(FieldId::new(self.fields.len()));
            self.fields.push(FieldInfo {
                declaring_class: id,
                name: field.name,
                ty: field.ty,
                is_static: field.is_static,
            });
        }

        let mut methods = Vec::new();
        let mut by_selector = HashMap::new();
        for method in decl.methods {
            let method_id = MethodId::new(self.methods.len());
            if by_selector.insert(method.selector.clone(), method_id).is_some() {
                return Err(invalid(format!("duplicate method {}.{}", decl.name, method.selector)));
            }
            let mut params = Vec::with_capacity(method.params.len() + 1);
            if !method.is_static {
                params.push(decl.name.clone());
            }
            params.extend(method.params);
            methods.push(method_id);
            self.methods.push(MethodInfo {
                declaring_class: id,
                selector: method.selector,
                params,
                ret: method.ret,
                is_static: method.is_static,
                is_abstract: method.is_abstract || decl.is_interface && method.body.is_none(),
                is_final: method.is_final,
                is_private: method.is_private,
                is_factory: method.is_factory,
                body: method.body,
            });
        }

        self.classes.push(ClassInfo {
            name: decl.name,
            superclass,
            interfaces,
            is_interface: decl.is_interface,
            is_abstract: decl.is_abstract || decl.is_interface,
            is_final: decl.is_final,
            array_element: None,
            fields,
            methods,
        });
        self.declared_methods.push(by_selector);
        Ok(())
    }

    fn check_acyclic(&self) -> PtaResult<()> {
        // 0 = unvisited, 1 = on stack, 2 = done
        let mut state = vec![0u8; self.classes.len()];
        fn visit(h: &SimpleHierarchy, c: usize, state: &mut [u8]) -> PtaResult<()> {
            match state[c] {
                1 => return Err(invalid(format!("cyclic inheritance through {}", h.classes[c].name))),
                2 => return Ok(()),
                _ => {}
            }
            state[c] = 1;
            let info = &h.classes[c];
            for sup in info.superclass.iter().chain(info.interfaces.iter()) {
                visit(h, sup.index(), state)?;
            }
            state[c] = 2;
            Ok(())
        }
        for c in 0..self.classes.len() {
            visit(self, c, &mut state)?;
        }
        Ok(())
    }

    fn compute_closures(&mut self) {
        let n = self.classes.len();
        let mut supertypes: Vec<Option<Vec<ClassId>>> = vec![None; n];

        fn closure(h: &SimpleHierarchy, c: usize, memo: &mut Vec<Option<Vec<ClassId>>>) -> Vec<ClassId> {
            if let Some(done) = &memo[c] {
                return done.clone();
            }
            let info = &h.classes[c];
            let mut result = vec![ClassId::new(c)];
            for sup in info.superclass.iter().chain(info.interfaces.iter()) {
                result.extend(closure(h, sup.index(), memo));
            }
            let result: Vec<ClassId> = result.into_iter().sorted().dedup().collect();
            memo[c] = Some(result.clone());
            result
        }

        for c in 0..n {
            if !self.classes[c].is_array() {
                closure(self, c, &mut supertypes);
            }
        }

        // Arrays are processed by increasing dimension, so the closure of an
        // array-typed element is always available.
        let mut arrays: Vec<ClassId> = (0..n)
            .map(ClassId::new)
            .filter(|c| self.classes[c.index()].is_array())
            .collect();
        arrays.sort_by_key(|c| self.classes[c.index()].name.dimensions());
        for &array in &arrays {
            let mut result = vec![array, self.root];
            if let Some(elem) = self.element_class_id(array) {
                let elem_supers = supertypes[elem.index()].clone().unwrap_or_default();
                for &other in &arrays {
                    if other == array {
                        continue;
                    }
                    if let Some(other_elem) = self.element_class_id(other) {
                        if elem_supers.binary_search(&other_elem).is_ok() {
                            result.push(other);
                        }
                    }
                }
            }
            supertypes[array.index()] = Some(result.into_iter().sorted().dedup().collect());
        }

        self.supertypes = supertypes.into_iter().map(Option::unwrap_or_default).collect();
        self.concrete_subtypes = vec![Vec::new(); n];
        for c in 0..n {
            if self.classes[c].is_concrete() {
                for sup in &self.supertypes[c] {
                    self.concrete_subtypes[sup.index()].push(ClassId::new(c));
                }
            }
        }
    }

    fn element_class_id(&self, array: ClassId) -> Option<ClassId> {
        let elem = self.classes[array.index()].array_element.as_ref()?;
        if elem.is_primitive() {
            return None;
        }
        self.class_ids.get(elem).copied()
    }

    pub fn classes(&self) -> impl Iterator<Item = (ClassId, &ClassInfo)> {
        self.classes.iter().enumerate().map(|(i, c)| (ClassId::new(i), c))
    }

    pub fn methods(&self) -> impl Iterator<Item = (MethodId, &MethodInfo)> {
        self.methods.iter().enumerate().map(|(i, m)| (MethodId::new(i), m))
    }
}

impl ClassHierarchy for SimpleHierarchy {
    fn lookup_class(&self, name: &TypeName) -> Option<ClassId> {
        self.class_ids.get(name).copied()
    }

    fn class(&self, id: ClassId) -> &ClassInfo {
        &self.classes[id.index()]
    }

    fn num_classes(&self) -> usize {
        self.classes.len()
    }

    fn root_class(&self) -> ClassId {
        self.root
    }

    fn supertypes(&self, class: ClassId) -> &[ClassId] {
        &self.supertypes[class.index()]
    }

    fn concrete_subtypes(&self, class: ClassId) -> &[ClassId] {
        &self.concrete_subtypes[class.index()]
    }

    fn field(&self, id: FieldId) -> &FieldInfo {
        &self.fields[id.index()]
    }

    fn resolve_field(&self, field: &FieldRef) -> Option<FieldId> {
        let mut current = self.lookup_class(&field.class);
        while let Some(class) = current {
            let info = self.class(class);
            if let Some(found) = info.fields.iter().find(|f| self.fields[f.index()].name == field.name) {
                return Some(*found);
            }
            current = info.superclass;
        }
        None
    }

    fn method(&self, id: MethodId) -> &MethodInfo {
        &self.methods[id.index()]
    }

    fn resolve_method(&self, class: ClassId, selector: &str) -> Option<MethodId> {
        let mut current = Some(class);
        while let Some(c) = current {
            if let Some(m) = self.declared_methods[c.index()].get(selector) {
                return Some(*m);
            }
            current = self.classes[c.index()].superclass;
        }
        // Interface methods, preferring ones with a body.
        self.supertypes(class)
            .iter()
            .filter(|s| self.classes[s.index()].is_interface)
            .filter_map(|s| self.declared_methods[s.index()].get(selector).copied())
            .min_by_key(|m| self.methods[m.index()].is_abstract)
    }
}
