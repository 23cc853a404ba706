// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

use std::collections::HashSet;
use std::fmt;

use log::*;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Severity {
    Mild,
    Moderate,
    Severe,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum WarningKind {
    UnresolvedType,
    UnresolvedField,
    UnresolvedCallTarget,
    UnresolvedEntrypoint,
    MissingBody,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Warning {
    pub severity: Severity,
    pub kind: WarningKind,
    pub message: String,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {:?}: {}", self.severity, self.kind, self.message)
    }
}

/// Side channel for unresolvable input. Each distinct warning is kept and
/// logged once.
#[derive(Debug, Default)]
pub struct Warnings {
    list: Vec<Warning>,
    seen: HashSet<Warning>,
}

impl Warnings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, severity: Severity, kind: WarningKind, message: impl Into<String>) {
        let warning = Warning {
            severity,
            kind,
            message: message.into(),
        };
        if self.seen.insert(warning.clone()) {
            warn!("{}", warning);
            self.list.push(warning);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Warning> {
        self.list.iter()
    }

    pub fn of_kind(&self, kind: WarningKind) -> impl Iterator<Item = &Warning> {
        self.list.iter().filter(move |w| w.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn duplicate_warnings_are_dropped() {
        let mut warnings = Warnings::new();
        warnings.add(Severity::Mild, WarningKind::UnresolvedType, "Foo");
        warnings.add(Severity::Mild, WarningKind::UnresolvedType, "Foo");
        warnings.add(Severity::Severe, WarningKind::UnresolvedEntrypoint, "main");
        assert_eq!(warnings.len(), 2);
        assert_eq!(warnings.of_kind(WarningKind::UnresolvedType).count(), 1);
    }
}
