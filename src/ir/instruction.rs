// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::call_site::{CallSiteRef, DispatchKind};
use super::types::{FieldRef, MethodRef, Pc, TypeName, ValueNumber};

fn one() -> u32 {
    1
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ConstantValue {
    Null,
    Int(i64),
    Str(String),
    /// A class literal; evaluates to the metadata object of the named type.
    Class(TypeName),
}

/// SSA instructions relevant to pointer analysis. Instructions without pointer
/// effects (arithmetic, branches) are simply absent from a body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Instruction {
    New {
        def: ValueNumber,
        ty: TypeName,
        #[serde(default = "one")]
        dims: u32,
    },
    Constant {
        def: ValueNumber,
        value: ConstantValue,
    },
    Phi {
        def: ValueNumber,
        uses: Vec<ValueNumber>,
    },
    Pi {
        def: ValueNumber,
        val: ValueNumber,
    },
    CheckCast {
        def: ValueNumber,
        val: ValueNumber,
        ty: TypeName,
    },
    /// Field read; a missing base denotes a static field.
    GetField {
        def: ValueNumber,
        #[serde(default)]
        base: Option<ValueNumber>,
        field: FieldRef,
    },
    PutField {
        #[serde(default)]
        base: Option<ValueNumber>,
        field: FieldRef,
        val: ValueNumber,
    },
    ArrayLoad {
        def: ValueNumber,
        array: ValueNumber,
    },
    ArrayStore {
        array: ValueNumber,
        val: ValueNumber,
    },
    Invoke {
        #[serde(default)]
        def: Option<ValueNumber>,
        exception: ValueNumber,
        target: MethodRef,
        kind: DispatchKind,
        #[serde(default)]
        args: Vec<ValueNumber>,
    },
    Return {
        #[serde(default)]
        val: Option<ValueNumber>,
    },
    Throw {
        exception: ValueNumber,
    },
    /// Entry of an exception handler catching `types` thrown at the `covers` pcs.
    Catch {
        def: ValueNumber,
        types: Vec<TypeName>,
        covers: Vec<Pc>,
    },
}

impl Instruction {
    /// The value number this instruction defines, excluding the exceptional
    /// value of an invocation.
    pub fn def(&self) -> Option<ValueNumber> {
        match self {
            Instruction::New { def, .. }
            | Instruction::Constant { def, .. }
            | Instruction::Phi { def, .. }
            | Instruction::Pi { def, .. }
            | Instruction::CheckCast { def, .. }
            | Instruction::GetField { def, .. }
            | Instruction::ArrayLoad { def, .. }
            | Instruction::Catch { def, .. } => Some(*def),
            Instruction::Invoke { def, .. } => *def,
            _ => None,
        }
    }

    /// Operand value numbers.
    pub fn uses(&self) -> Vec<ValueNumber> {
        match self {
            Instruction::Phi { uses, .. } => uses.clone(),
            Instruction::Pi { val, .. } | Instruction::CheckCast { val, .. } => vec![*val],
            Instruction::GetField { base, .. } => base.iter().copied().collect(),
            Instruction::PutField { base, val, .. } => base.iter().copied().chain([*val]).collect(),
            Instruction::ArrayLoad { array, .. } => vec![*array],
            Instruction::ArrayStore { array, val } => vec![*array, *val],
            Instruction::Invoke { args, .. } => args.clone(),
            Instruction::Return { val } => val.iter().copied().collect(),
            Instruction::Throw { exception } => vec![*exception],
            _ => Vec::new(),
        }
    }

    pub fn call_site(&self, pc: Pc) -> Option<CallSiteRef> {
        match self {
            Instruction::Invoke { target, kind, .. } => Some(CallSiteRef::new(pc, target.clone(), *kind)),
            _ => None,
        }
    }
}

/// An exception the runtime may raise at `pc` (null dereference, bad cast...).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImplicitException {
    pub pc: Pc,
    pub ty: TypeName,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MethodBody {
    pub instructions: Vec<Instruction>,
    #[serde(default)]
    pub implicit_exceptions: Vec<ImplicitException>,
}

impl MethodBody {
    pub fn new(instructions: Vec<Instruction>) -> Self {
        MethodBody {
            instructions,
            implicit_exceptions: Vec::new(),
        }
    }

    pub fn instruction(&self, pc: Pc) -> Option<&Instruction> {
        self.instructions.get(pc as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Pc, &Instruction)> {
        self.instructions.iter().enumerate().map(|(pc, i)| (pc as Pc, i))
    }

    pub fn def_use(&self) -> DefUse {
        DefUse::new(self)
    }
}

/// Definition and use facts of one method body.
#[derive(Debug, Default)]
pub struct DefUse {
    defs: HashMap<ValueNumber, Pc>,
    used: HashSet<ValueNumber>,
    handlers: HashMap<Pc, Vec<Pc>>,
}

impl DefUse {
    pub fn new(body: &MethodBody) -> Self {
        let mut def_use = DefUse::default();
        for (pc, instr) in body.iter() {
            if let Some(def) = instr.def() {
                def_use.defs.insert(def, pc);
            }
            if let Instruction::Invoke { exception, .. } = instr {
                def_use.defs.insert(*exception, pc);
            }
            def_use.used.extend(instr.uses());
            if let Instruction::Catch { covers, .. } = instr {
                for covered in covers {
                    def_use.handlers.entry(*covered).or_default().push(pc);
                }
            }
        }
        def_use
    }

    /// The pc of the instruction defining `vn`, if any.
    pub fn def_of(&self, vn: ValueNumber) -> Option<Pc> {
        self.defs.get(&vn).copied()
    }

    pub fn is_used(&self, vn: ValueNumber) -> bool {
        self.used.contains(&vn)
    }

    /// Pcs of the catch instructions covering `pc`, innermost first.
    pub fn handlers_of(&self, pc: Pc) -> &[Pc] {
        self.handlers.get(&pc).map(Vec::as_slice).unwrap_or(&[])
    }
}
