//! The type algebra.
//!
//! Every semantic operation of the language is a method on the left operand's
//! type. A legal pairing returns the concrete result type; anything else
//! returns [`Type::Error`] carrying a message. `Error` is never raised as a
//! fault: once an operand is `Error`, every operation consuming it yields
//! `Error` again, which lets the checker run to completion over malformed
//! input and report everything it finds.

use itertools::Itertools;

/// The closed set of types in the language. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    Void,
    Bool,
    Int,
    Array {
        base: Box<Type>,
        extent: u64,
    },
    Func {
        params: Vec<Type>,
        ret: Box<Type>,
    },
    /// The type that results from an illegal operation. If a node carries
    /// this, a diagnostic has already been recorded for it.
    Error(String),
}

impl Type {
    pub fn array(base: Type, extent: u64) -> Self {
        Type::Array {
            base: Box::new(base),
            extent,
        }
    }

    pub fn function(params: Vec<Type>, ret: Type) -> Self {
        Type::Func {
            params,
            ret: Box::new(ret),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Type::Error(_))
    }

    /// Type equivalence. `Array` types are equivalent when their bases are
    /// (the extent is not compared); `Func` types when their parameter lists
    /// and return types are pairwise equivalent. `Error` is never equivalent
    /// to anything, itself included.
    pub fn equivalent(&self, that: &Type) -> bool {
        match (self, that) {
            (Type::Void, Type::Void) | (Type::Bool, Type::Bool) | (Type::Int, Type::Int) => true,
            (Type::Array { base: a, .. }, Type::Array { base: b, .. }) => a.equivalent(b),
            (
                Type::Func { params: a, ret: ra },
                Type::Func {
                    params: b,
                    ret: rb,
                },
            ) => {
                a.len() == b.len()
                    && a.iter().zip(b).all(|(x, y)| x.equivalent(y))
                    && ra.equivalent(rb)
            }
            _ => false,
        }
    }

    pub fn add(&self, that: &Type) -> Type {
        self.arithmetic("add", that)
    }

    pub fn sub(&self, that: &Type) -> Type {
        self.arithmetic("subtract", that)
    }

    pub fn mul(&self, that: &Type) -> Type {
        self.arithmetic("multiply", that)
    }

    pub fn div(&self, that: &Type) -> Type {
        self.arithmetic("divide", that)
    }

    fn arithmetic(&self, verb: &str, that: &Type) -> Type {
        if let Some(error) = propagate(&[self, that]) {
            return error;
        }

        match (self, that) {
            (Type::Int, Type::Int) => Type::Int,
            _ => Type::Error(format!("cannot {verb} {self} and {that}")),
        }
    }

    /// Comparing any type with itself produces `Bool`
    pub fn compare(&self, that: &Type) -> Type {
        if let Some(error) = propagate(&[self, that]) {
            return error;
        }

        if self.equivalent(that) {
            Type::Bool
        } else {
            Type::Error(format!("cannot compare {self} with {that}"))
        }
    }

    pub fn and(&self, that: &Type) -> Type {
        self.logical("and", that)
    }

    pub fn or(&self, that: &Type) -> Type {
        self.logical("or", that)
    }

    fn logical(&self, verb: &str, that: &Type) -> Type {
        if let Some(error) = propagate(&[self, that]) {
            return error;
        }

        match (self, that) {
            (Type::Bool, Type::Bool) => Type::Bool,
            _ => Type::Error(format!("cannot {verb} {self} and {that}")),
        }
    }

    pub fn not(&self) -> Type {
        if let Some(error) = propagate(&[self]) {
            return error;
        }

        match self {
            Type::Bool => Type::Bool,
            _ => Type::Error(format!("cannot negate {self}")),
        }
    }

    /// Indexing an array with an `Int` produces the element type
    pub fn index(&self, that: &Type) -> Type {
        if let Some(error) = propagate(&[self, that]) {
            return error;
        }

        match (self, that) {
            (Type::Array { base, .. }, Type::Int) => (**base).clone(),
            _ => Type::Error(format!("cannot index {self} with {that}")),
        }
    }

    /// Calling a function whose parameter list is pairwise equivalent to the
    /// argument types produces the return type
    pub fn call(&self, args: &[Type]) -> Type {
        if let Some(error) = propagate(&[self]) {
            return error;
        }
        if let Some(error) = args.iter().find(|a| a.is_error()) {
            return error.clone();
        }

        match self {
            Type::Func { params, ret }
                if params.len() == args.len()
                    && params.iter().zip(args).all(|(p, a)| p.equivalent(a)) =>
            {
                (**ret).clone()
            }
            _ => Type::Error(format!(
                "cannot call {self} with ({})",
                args.iter().map(|a| a.to_string()).join(", ")
            )),
        }
    }

    /// Assigning a value of an equivalent type produces `Void`
    pub fn assign(&self, source: &Type) -> Type {
        if let Some(error) = propagate(&[self, source]) {
            return error;
        }

        if self.equivalent(source) {
            Type::Void
        } else {
            Type::Error(format!("cannot assign {source} to {self}"))
        }
    }
}

/// Returns the first `Error` operand, if any. Keeping the original message
/// means cascaded diagnostics all point back at the same root cause.
fn propagate(operands: &[&Type]) -> Option<Type> {
    operands.iter().find(|t| t.is_error()).map(|t| (*t).clone())
}

impl core::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Bool => write!(f, "bool"),
            Type::Int => write!(f, "int"),
            Type::Array { base, extent } => write!(f, "array[{extent},{base}]"),
            Type::Func { params, ret } => write!(
                f,
                "func({}):{ret}",
                params.iter().map(|p| p.to_string()).join(", ")
            ),
            Type::Error(_) => write!(f, "error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn concrete_types() -> Vec<Type> {
        vec![
            Type::Void,
            Type::Bool,
            Type::Int,
            Type::array(Type::Int, 5),
            Type::function(vec![Type::Int], Type::Void),
        ]
    }

    #[test]
    fn arithmetic_is_int_only() {
        assert_eq!(Type::Int.add(&Type::Int), Type::Int);
        assert_eq!(Type::Int.sub(&Type::Int), Type::Int);
        assert_eq!(Type::Int.mul(&Type::Int), Type::Int);
        assert_eq!(Type::Int.div(&Type::Int), Type::Int);

        for lhs in concrete_types() {
            for rhs in concrete_types() {
                if lhs == Type::Int && rhs == Type::Int {
                    continue;
                }
                assert!(lhs.add(&rhs).is_error(), "{lhs} + {rhs} should be an error");
            }
        }
    }

    #[test]
    fn comparison_requires_matching_types() {
        for ty in concrete_types() {
            assert_eq!(ty.compare(&ty.clone()), Type::Bool);
        }

        assert!(Type::Int.compare(&Type::Bool).is_error());
        assert!(Type::Bool.compare(&Type::Void).is_error());
    }

    #[test]
    fn logical_operations_are_bool_only() {
        assert_eq!(Type::Bool.and(&Type::Bool), Type::Bool);
        assert_eq!(Type::Bool.or(&Type::Bool), Type::Bool);
        assert_eq!(Type::Bool.not(), Type::Bool);

        assert!(Type::Int.and(&Type::Int).is_error());
        assert!(Type::Bool.or(&Type::Int).is_error());
        assert!(Type::Int.not().is_error());
        assert!(Type::Void.not().is_error());
    }

    #[test]
    fn indexing_an_array_with_an_int_yields_the_base() {
        let array = Type::array(Type::Int, 5);

        assert_eq!(array.index(&Type::Int), Type::Int);
        assert!(array.index(&Type::Bool).is_error());
        assert!(Type::Int.index(&Type::Int).is_error());
    }

    #[test]
    fn calls_check_arity_and_argument_types() {
        let func = Type::function(vec![Type::Int, Type::Bool], Type::Int);

        assert_eq!(func.call(&[Type::Int, Type::Bool]), Type::Int);
        assert!(func.call(&[Type::Int]).is_error());
        assert!(func.call(&[Type::Bool, Type::Bool]).is_error());
        assert!(func.call(&[Type::Int, Type::Bool, Type::Int]).is_error());
        assert!(Type::Int.call(&[]).is_error());
    }

    #[test]
    fn assignment_requires_equivalent_types() {
        assert_eq!(Type::Int.assign(&Type::Int), Type::Void);
        assert_eq!(Type::Bool.assign(&Type::Bool), Type::Void);
        assert!(Type::Int.assign(&Type::Bool).is_error());
        assert!(Type::Void.assign(&Type::Int).is_error());
    }

    #[test]
    fn array_equivalence_ignores_the_extent() {
        let five = Type::array(Type::Int, 5);
        let nine = Type::array(Type::Int, 9);
        let bools = Type::array(Type::Bool, 5);

        assert!(five.equivalent(&nine));
        assert!(!five.equivalent(&bools));
    }

    #[test]
    fn error_is_never_equivalent_and_always_propagates() {
        let error = Type::Error("root cause".into());

        assert!(!error.equivalent(&error));
        assert!(!error.equivalent(&Type::Int));

        assert_eq!(Type::Int.add(&error), error);
        assert_eq!(error.compare(&Type::Int), error);
        assert_eq!(error.not(), error);
        assert_eq!(
            Type::function(vec![Type::Int], Type::Void).call(std::slice::from_ref(&error)),
            error
        );
    }
}
