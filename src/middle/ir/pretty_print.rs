//! Human readable rendering of the IR, for debug dumps and the comments the
//! backend attaches to emitted assembly. Registers and immediates are
//! colored; strip the escapes before embedding the text anywhere else.

use core::fmt;

use colored::Colorize;
use itertools::Itertools;

use super::{AddressVar, Function, InstId, InstKind, Instruction, LocalVar, Value};

impl fmt::Display for InstId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format!("#{}", self.0).cyan())
    }
}

impl fmt::Display for LocalVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format!("$t{}", self.0).yellow())
    }
}

impl fmt::Display for AddressVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format!("$a{}", self.0).yellow())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Local(var) => write!(f, "{var}"),
            Value::Int(value) => write!(f, "{}", value.to_string().purple()),
            Value::Bool(value) => write!(f, "{}", value.to_string().purple()),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            InstKind::AddressAt {
                dst,
                base,
                offset: Some(offset),
            } => write!(f, "{dst} = addr {} + {offset} * 8", base.name()),
            InstKind::AddressAt {
                dst,
                base,
                offset: None,
            } => write!(f, "{dst} = addr {}", base.name()),
            InstKind::BinaryOp { op, dst, lhs, rhs } => {
                write!(f, "{dst} = {op} {lhs}, {rhs}")
            }
            InstKind::Compare {
                predicate,
                dst,
                lhs,
                rhs,
            } => write!(f, "{dst} = cmp {predicate} {lhs}, {rhs}"),
            InstKind::Copy { dst, src } => write!(f, "{dst} = {src}"),
            InstKind::Jump { predicate } => write!(f, "br {predicate}"),
            InstKind::Load { dst, src } => write!(f, "{dst} = load [{src}]"),
            InstKind::Store { dst, src } => write!(f, "store {src} -> [{dst}]"),
            InstKind::Nop => write!(f, "nop"),
            InstKind::Return { value: Some(value) } => write!(f, "ret {value}"),
            InstKind::Return { value: None } => write!(f, "ret"),
            InstKind::Call {
                callee,
                arguments,
                dst,
            } => {
                if let Some(dst) = dst {
                    write!(f, "{dst} = ")?;
                }
                write!(
                    f,
                    "call {}({})",
                    callee.name(),
                    arguments.iter().map(|a| a.to_string()).join(", ")
                )
            }
            InstKind::UnaryNot { dst, operand } => write!(f, "{dst} = not {operand}"),
        }
    }
}

/// Dumps one function's whole arena, one instruction per line with its
/// successor links
pub fn function_to_string(function: &Function) -> String {
    let mut out = format!(
        "func {}({}) entry {}\n",
        function.name.bold(),
        function.arguments.iter().map(|a| a.to_string()).join(", "),
        function
            .entry
            .map(|e| e.to_string())
            .unwrap_or_else(|| "-".into()),
    );

    for (id, instruction) in function.instructions() {
        let successors = instruction.successors().map(|s| s.to_string()).join(", ");
        if successors.is_empty() {
            out.push_str(&format!("  {id}: {instruction}\n"));
        } else {
            out.push_str(&format!("  {id}: {instruction} -> {successors}\n"));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::{
        ir::{BinaryOp, InstKind, Value},
        ty::Type,
    };

    #[test]
    fn instructions_render_with_register_names() {
        colored::control::set_override(false);

        let mut function = Function::new("f", Type::function(vec![], Type::Void));
        let a = function.new_temp();
        let b = function.new_temp();
        let c = function.new_temp();

        let copy = function.emit(InstKind::Copy {
            dst: a,
            src: Value::Int(7),
        });
        let sum = function.emit(InstKind::BinaryOp {
            op: BinaryOp::Add,
            dst: c,
            lhs: a,
            rhs: b,
        });

        assert_eq!(function.instruction(copy).to_string(), "$t0 = 7");
        assert_eq!(function.instruction(sum).to_string(), "$t2 = add $t0, $t1");
    }
}
