//! The dynamically-typed script value.
//!
//! Assignment copies: scalars, strings, and arrays are all value types at
//! the language level (strings share their backing storage, which is
//! indistinguishable because they are immutable). Object references are
//! weak handles that resolve through the object registry at use time, so a
//! value can outlive the object it pointed at without dangling.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::warn;

/// Shared immutable string storage.
pub type SharedStr = Arc<str>;

/// Weak reference to a game object, by stable registry id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectHandle(u64);

impl ObjectHandle {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "object#{}", self.0)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i32),
    Float(f64),
    String(SharedStr),
    Object(ObjectHandle),
    Array(Vec<Value>),
}

impl Value {
    pub fn string(text: impl AsRef<str>) -> Self {
        Value::String(Arc::from(text.as_ref()))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Object(_) => "object",
            Value::Array(_) => "array",
        }
    }

    /// Null, `0`, `0.0`, and `""` are false; everything else is true.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(value) => *value,
            Value::Int(value) => *value != 0,
            Value::Float(value) => *value != 0.0,
            Value::String(text) => !text.is_empty(),
            Value::Object(_) => true,
            Value::Array(_) => true,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_object(&self) -> Option<ObjectHandle> {
        match self {
            Value::Object(handle) => Some(*handle),
            _ => None,
        }
    }

    /// Numeric coercion to int. Strings parse a leading integer; objects
    /// and arrays coerce to zero.
    pub fn as_int(&self) -> i32 {
        match self {
            Value::Null => 0,
            Value::Bool(value) => i32::from(*value),
            Value::Int(value) => *value,
            Value::Float(value) => *value as i32,
            Value::String(text) => parse_int_prefix(text),
            Value::Object(_) | Value::Array(_) => 0,
        }
    }

    pub fn as_float(&self) -> f64 {
        match self {
            Value::Null => 0.0,
            Value::Bool(value) => f64::from(u8::from(*value)),
            Value::Int(value) => f64::from(*value),
            Value::Float(value) => *value,
            Value::String(text) => text.trim().parse::<f64>().unwrap_or(0.0),
            Value::Object(_) | Value::Array(_) => 0.0,
        }
    }

    /// Display form used by string concatenation and `Print`.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(value) => value.to_string(),
            Value::Int(value) => value.to_string(),
            Value::Float(value) => value.to_string(),
            Value::String(text) => text.to_string(),
            Value::Object(handle) => format!("[{handle}]"),
            Value::Array(items) => {
                let mut out = String::new();
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        out.push(',');
                    }
                    out.push_str(&item.to_display_string());
                }
                out
            }
        }
    }

    fn is_float_context(&self, other: &Value) -> bool {
        matches!(self, Value::Float(_)) || matches!(other, Value::Float(_))
    }

    /// `+` concatenates when either side is a string, otherwise adds
    /// numerically with int→float promotion.
    pub fn add(&self, other: &Value) -> Value {
        if matches!(self, Value::String(_)) || matches!(other, Value::String(_)) {
            let mut text = self.to_display_string();
            text.push_str(&other.to_display_string());
            return Value::string(text);
        }
        if self.is_float_context(other) {
            Value::Float(self.as_float() + other.as_float())
        } else {
            Value::Int(self.as_int().wrapping_add(other.as_int()))
        }
    }

    pub fn sub(&self, other: &Value) -> Value {
        if self.is_float_context(other) {
            Value::Float(self.as_float() - other.as_float())
        } else {
            Value::Int(self.as_int().wrapping_sub(other.as_int()))
        }
    }

    pub fn mul(&self, other: &Value) -> Value {
        if self.is_float_context(other) {
            Value::Float(self.as_float() * other.as_float())
        } else {
            Value::Int(self.as_int().wrapping_mul(other.as_int()))
        }
    }

    /// Division by zero folds to 0 with a warning rather than an error.
    pub fn div(&self, other: &Value) -> Value {
        if self.is_float_context(other) {
            let denominator = other.as_float();
            if denominator == 0.0 {
                warn!("division by zero folded to 0");
                return Value::Float(0.0);
            }
            Value::Float(self.as_float() / denominator)
        } else {
            let denominator = other.as_int();
            if denominator == 0 {
                warn!("division by zero folded to 0");
                return Value::Int(0);
            }
            Value::Int(self.as_int().wrapping_div(denominator))
        }
    }

    /// `%` is integer modulo; a zero modulus folds to 0 with a warning.
    pub fn modulo(&self, other: &Value) -> Value {
        let modulus = other.as_int();
        if modulus == 0 {
            warn!("modulo by zero folded to 0");
            return Value::Int(0);
        }
        Value::Int(self.as_int().wrapping_rem(modulus))
    }

    pub fn neg(&self) -> Value {
        match self {
            Value::Float(value) => Value::Float(-value),
            other => Value::Int(other.as_int().wrapping_neg()),
        }
    }

    /// Coercing equality. Object references compare by identity against
    /// each other and are never equal to non-objects; the VM normalizes
    /// dead handles to null before calling this.
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Null, _) | (_, Value::Null) => false,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Object(_), _) | (_, Value::Object(_)) => false,
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.equals(y))
            }
            (Value::Array(_), _) | (_, Value::Array(_)) => false,
            (Value::String(a), Value::String(b)) => a == b,
            _ => self.as_float() == other.as_float(),
        }
    }

    /// Identity equality for object references; for every other pairing it
    /// additionally requires matching variants.
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Object(a), Value::Object(b)) => a == b,
            _ => {
                std::mem::discriminant(self) == std::mem::discriminant(other)
                    && self.equals(other)
            }
        }
    }

    /// Coercing ordering: strings compare lexicographically, null sorts
    /// below everything except null, the rest compares numerically.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            (Value::String(a), Value::String(b)) => a.cmp(b),
            _ => self
                .as_float()
                .partial_cmp(&other.as_float())
                .unwrap_or(Ordering::Equal),
        }
    }
}

fn parse_int_prefix(text: &str) -> i32 {
    let trimmed = text.trim();
    let end = trimmed
        .char_indices()
        .take_while(|(index, ch)| ch.is_ascii_digit() || (*index == 0 && (*ch == '-' || *ch == '+')))
        .map(|(index, ch)| index + ch.len_utf8())
        .last()
        .unwrap_or(0);
    trimmed[..end].parse().unwrap_or(0)
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::string(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::string(value)
    }
}

impl From<ObjectHandle> for Value {
    fn from(handle: ObjectHandle) -> Self {
        Value::Object(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_promotion_wins_over_numeric_add() {
        let sum = Value::Int(1).add(&Value::string("2"));
        assert!(matches!(&sum, Value::String(text) if &**text == "12"));
        let sum = Value::string("x=").add(&Value::Int(7));
        assert!(matches!(&sum, Value::String(text) if &**text == "x=7"));
    }

    #[test]
    fn numeric_promotion_and_wraparound() {
        assert!(matches!(Value::Int(2).add(&Value::Int(3)), Value::Int(5)));
        assert!(matches!(Value::Int(2).add(&Value::Float(0.5)), Value::Float(v) if v == 2.5));
        assert!(matches!(
            Value::Int(i32::MAX).add(&Value::Int(1)),
            Value::Int(i32::MIN)
        ));
    }

    #[test]
    fn division_by_zero_folds_to_zero() {
        assert!(matches!(Value::Int(7).div(&Value::Int(0)), Value::Int(0)));
        assert!(matches!(
            Value::Float(7.0).div(&Value::Int(0)),
            Value::Float(v) if v == 0.0
        ));
        assert!(matches!(Value::Int(7).modulo(&Value::Int(0)), Value::Int(0)));
        assert!(matches!(Value::Int(7).modulo(&Value::Int(4)), Value::Int(3)));
    }

    #[test]
    fn truthiness_table() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::string("").is_truthy());
        assert!(!Value::Float(0.0).is_truthy());
        assert!(Value::Int(-1).is_truthy());
        assert!(Value::string("0").is_truthy());
        assert!(Value::Object(ObjectHandle::new(1)).is_truthy());
    }

    #[test]
    fn coercing_equality_and_identity() {
        assert!(Value::Int(1).equals(&Value::Float(1.0)));
        assert!(Value::Int(1).equals(&Value::Bool(true)));
        assert!(Value::string("5").equals(&Value::Int(5)));
        assert!(!Value::Null.equals(&Value::Int(0)));

        let a = ObjectHandle::new(3);
        let b = ObjectHandle::new(4);
        assert!(Value::Object(a).strict_equals(&Value::Object(a)));
        assert!(!Value::Object(a).strict_equals(&Value::Object(b)));
        assert!(!Value::Object(a).equals(&Value::Int(3)));

        assert!(Value::Int(1).equals(&Value::string("1")));
        assert!(!Value::Int(1).strict_equals(&Value::string("1")));
    }

    #[test]
    fn ordering_rules() {
        assert_eq!(Value::Null.compare(&Value::Int(-5)), Ordering::Less);
        assert_eq!(Value::Null.compare(&Value::Null), Ordering::Equal);
        assert_eq!(
            Value::string("apple").compare(&Value::string("banana")),
            Ordering::Less
        );
        assert_eq!(Value::Int(2).compare(&Value::Float(1.5)), Ordering::Greater);
        assert_eq!(Value::Bool(true).compare(&Value::Int(1)), Ordering::Equal);
    }

    #[test]
    fn arrays_copy_on_assign() {
        let original = Value::Array(vec![Value::Int(1), Value::Int(2)]);
        let mut copy = original.clone();
        if let Value::Array(items) = &mut copy {
            items.push(Value::Int(3));
        }
        if let Value::Array(items) = &original {
            assert_eq!(items.len(), 2);
        }
        assert!(original.equals(&Value::Array(vec![Value::Int(1), Value::Int(2)])));
    }

    #[test]
    fn int_prefix_parsing() {
        assert_eq!(Value::string("42abc").as_int(), 42);
        assert_eq!(Value::string("-8").as_int(), -8);
        assert_eq!(Value::string("abc").as_int(), 0);
        assert_eq!(Value::string(" 3.5 ").as_float(), 3.5);
    }
}
