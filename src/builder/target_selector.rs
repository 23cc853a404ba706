// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

use log::*;
use regex::Regex;

use crate::ir::{CallSiteRef, ClassHierarchy, ClassId, MethodId};

/// Picks the method a call site invokes.
pub trait MethodTargetSelector {
    /// The target of `site` for a receiver of concrete type `receiver`.
    /// Dispatched sites need a receiver type; other sites use the declared
    /// target.
    fn select_target(&self, h: &dyn ClassHierarchy, site: &CallSiteRef, receiver: Option<ClassId>) -> Option<MethodId>;
}

/// Resolves targets by virtual lookup in the class hierarchy.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClassHierarchyTargetSelector;

impl MethodTargetSelector for ClassHierarchyTargetSelector {
    fn select_target(&self, h: &dyn ClassHierarchy, site: &CallSiteRef, receiver: Option<ClassId>) -> Option<MethodId> {
        if site.is_dispatch() {
            h.resolve_method(receiver?, &site.target.selector)
        } else {
            h.lookup_method(&site.target)
        }
    }
}

/// Drops targets declared in classes matching any of the exclusion patterns.
pub struct ExclusionTargetSelector {
    inner: Box<dyn MethodTargetSelector>,
    exclusions: Vec<Regex>,
}

impl ExclusionTargetSelector {
    pub fn new(inner: Box<dyn MethodTargetSelector>, exclusions: Vec<Regex>) -> Self {
        ExclusionTargetSelector { inner, exclusions }
    }

    /// Compiles `patterns`. Each one must match a whole class name.
    pub fn from_patterns(inner: Box<dyn MethodTargetSelector>, patterns: &[String]) -> Result<Self, regex::Error> {
        let exclusions = patterns
            .iter()
            .map(|p| Regex::new(&format!("^(?:{})$", p)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(inner, exclusions))
    }

    pub fn is_excluded(&self, h: &dyn ClassHierarchy, class: ClassId) -> bool {
        let name = h.class(class).name.as_str();
        self.exclusions.iter().any(|re| re.is_match(name))
    }
}

impl MethodTargetSelector for ExclusionTargetSelector {
    fn select_target(&self, h: &dyn ClassHierarchy, site: &CallSiteRef, receiver: Option<ClassId>) -> Option<MethodId> {
        let target = self.inner.select_target(h, site, receiver)?;
        if self.is_excluded(h, h.method(target).declaring_class) {
            debug!("Excluded target {} of {}", h.method_name(target), site);
            None
        } else {
            Some(target)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::{ClassDecl, DispatchKind, MethodDecl, MethodRef, SimpleHierarchy, TypeName};

    fn hierarchy() -> SimpleHierarchy {
        SimpleHierarchy::from_decls(vec![
            ClassDecl::new("A").method(MethodDecl::new("m()")),
            ClassDecl::new("B").extends("A"),
            ClassDecl::new("lib.Util").method(MethodDecl::new("help()").static_method()),
        ])
        .unwrap()
    }

    #[test]
    fn dispatched_sites_need_a_receiver() {
        let h = hierarchy();
        let site = CallSiteRef::new(0, MethodRef::new("A", "m()"), DispatchKind::Virtual);
        let b = h.lookup_class(&TypeName::new("B")).unwrap();
        let target = ClassHierarchyTargetSelector.select_target(&h, &site, Some(b)).unwrap();
        assert_eq!(h.method_name(target), "A.m()");
        assert!(ClassHierarchyTargetSelector.select_target(&h, &site, None).is_none());
    }

    #[test]
    fn excluded_classes_have_no_targets() {
        let h = hierarchy();
        let selector =
            ExclusionTargetSelector::from_patterns(Box::new(ClassHierarchyTargetSelector), &["lib\\..*".to_string()])
                .unwrap();
        let site = CallSiteRef::new(0, MethodRef::new("lib.Util", "help()"), DispatchKind::Static);
        assert!(selector.select_target(&h, &site, None).is_none());
        let site = CallSiteRef::new(1, MethodRef::new("A", "m()"), DispatchKind::Special);
        assert!(selector.select_target(&h, &site, None).is_some());
    }
}
