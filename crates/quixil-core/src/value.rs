//! The tagged runtime value and the handful of operations every instruction
//! and built-in is defined in terms of.

use std::fmt;

use crate::object::{Heap, ObjectRef};

/// A Quixil value. Cheap to copy; heap data (strings, functions, builtins)
/// lives behind the [`ObjectRef`] variant and is resolved through a [`Heap`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    /// IEEE-754 double. Equality is plain `f64` equality, so `NaN != NaN`.
    Number(f64),
    Object(ObjectRef),
}

impl Value {
    /// `Nil` and `Bool(false)` are falsey; everything else — including `0`
    /// and the empty string — is truthy.
    #[must_use]
    pub fn is_falsey(&self) -> bool {
        matches!(self, Value::Nil | Value::Bool(false))
    }

    #[must_use]
    pub fn is_number(&self) -> bool {
        matches!(self, Value::Number(_))
    }

    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str_ref(&self) -> Option<crate::object::StringRef> {
        match self {
            Value::Object(ObjectRef::Str(s)) => Some(*s),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_str(&self) -> bool {
        matches!(self, Value::Object(ObjectRef::Str(_)))
    }

    /// `"bool"`, `"nil"`, `"number"`, or the object kind's static name.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::Object(r) => r.type_name(),
        }
    }

    /// Wraps this value (and the heap needed to resolve object contents) in a
    /// [`fmt::Display`] adapter suitable for `OP_PRINT` and string coercion.
    #[must_use]
    pub fn display<'a>(&'a self, heap: &'a Heap) -> ValueDisplay<'a> {
        ValueDisplay { value: self, heap }
    }

    /// `Number + String`/`String + Number` coercion: the number is truncated
    /// to an integer before being stringified, matching the original cast-to-
    /// `int`-then-format behavior (see the design notes on arithmetic coercion).
    #[must_use]
    pub fn number_to_concat_string(n: f64) -> String {
        format!("{}", n as i64)
    }
}

/// Formats a value the way `OP_PRINT` does, mirroring `%g` for numbers.
pub struct ValueDisplay<'a> {
    value: &'a Value,
    heap: &'a Heap,
}

impl fmt::Display for ValueDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{}", format_g(*n)),
            Value::Object(ObjectRef::Str(s)) => write!(f, "{}", self.heap.string(*s).bytes),
            Value::Object(ObjectRef::Function(fr)) => {
                let func = self.heap.function(*fr);
                match func.name {
                    None => write!(f, "<script-main>"),
                    Some(name) => write!(
                        f,
                        "<function {} at {:#x}>",
                        self.heap.string(name).bytes,
                        fr.0
                    ),
                }
            }
            Value::Object(ObjectRef::Builtin(br)) => {
                let b = self.heap.builtin(*br);
                write!(f, "<built-in function {}>", self.heap.string(b.name).bytes)
            }
        }
    }
}

/// Approximates C's `%g`: shortest of fixed/scientific notation at 6
/// significant digits, trailing zeros (and a bare trailing `.`) stripped.
fn format_g(n: f64) -> String {
    if n.is_nan() {
        return "nan".to_string();
    }
    if n.is_infinite() {
        return if n < 0.0 { "-inf" } else { "inf" }.to_string();
    }
    if n == 0.0 {
        return if n.is_sign_negative() { "-0" } else { "0" }.to_string();
    }

    const PRECISION: i32 = 6;
    let sci = format!("{:.*e}", (PRECISION - 1) as usize, n);
    let (mantissa, exp_str) = sci.split_once('e').expect("scientific formatting always has an exponent");
    let exp: i32 = exp_str.parse().expect("exponent is always a plain integer");

    if exp < -4 || exp >= PRECISION {
        let trimmed = trim_trailing_zeros(mantissa);
        format!("{trimmed}e{}{:02}", if exp >= 0 { "+" } else { "-" }, exp.abs())
    } else {
        let decimals = (PRECISION - 1 - exp).max(0) as usize;
        let fixed = format!("{n:.decimals$}");
        trim_trailing_zeros(&fixed)
    }
}

fn trim_trailing_zeros(s: &str) -> String {
    if !s.contains('.') {
        return s.to_string();
    }
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Heap;

    #[test]
    fn falsey_values() {
        assert!(Value::Nil.is_falsey());
        assert!(Value::Bool(false).is_falsey());
        assert!(!Value::Bool(true).is_falsey());
        assert!(!Value::Number(0.0).is_falsey());
    }

    #[test]
    fn nan_is_not_equal_to_itself() {
        let nan = Value::Number(f64::NAN);
        assert_ne!(nan, nan);
    }

    #[test]
    fn type_names_for_scalars() {
        assert_eq!(Value::Nil.type_name(), "nil");
        assert_eq!(Value::Bool(true).type_name(), "bool");
        assert_eq!(Value::Number(1.0).type_name(), "number");
    }

    #[test]
    fn equal_is_false_across_differing_tags() {
        assert_ne!(Value::Nil, Value::Bool(false));
        assert_ne!(Value::Number(0.0), Value::Bool(false));
    }

    #[test]
    fn print_small_integers_has_no_decimal_point() {
        let heap = Heap::new();
        assert_eq!(Value::Number(7.0).display(&heap).to_string(), "7");
        assert_eq!(Value::Number(25.0).display(&heap).to_string(), "25");
        assert_eq!(Value::Number(0.0).display(&heap).to_string(), "0");
    }

    #[test]
    fn print_preserves_fractional_digits() {
        let heap = Heap::new();
        assert_eq!(Value::Number(1.5).display(&heap).to_string(), "1.5");
    }

    #[test]
    fn print_bool_and_nil() {
        let heap = Heap::new();
        assert_eq!(Value::Bool(true).display(&heap).to_string(), "true");
        assert_eq!(Value::Nil.display(&heap).to_string(), "nil");
    }

    #[test]
    fn number_to_concat_string_truncates() {
        assert_eq!(Value::number_to_concat_string(3.9), "3");
        assert_eq!(Value::number_to_concat_string(-3.9), "-3");
    }
}
