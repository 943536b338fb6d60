//! Runtime values.
//!
//! A [`Value`] is the tagged union every formula evaluates to. Containers
//! are `Arc`-shared and immutable: list/map construction always allocates
//! a fresh container, and "mutation" in formula land means building a new
//! value (side effects go through command values instead).
//!
//! Equality promotes `Int` to `Decimal` when the two meet, and `Hash`
//! agrees with that, so `1` and `1.0` are the same map key. Ordering is
//! total: values of different kinds order by kind rank, which keeps
//! `sort` and map-key ordering deterministic.

use indexmap::IndexMap;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::foundation::callable::{Callable, CommandSeq};
use crate::foundation::decimal::Decimal;
use crate::function::FunctionValue;

/// Ordered map of formula values. Insertion order is preserved.
pub type ValueMap = IndexMap<Value, Value>;

/// A formula runtime value.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Decimal(Decimal),
    Str(Arc<str>),
    List(Arc<Vec<Value>>),
    Map(Arc<ValueMap>),
    /// A host object exposed through the callable protocol.
    Object(Arc<dyn Callable>),
    /// A user-defined function (`def` lambda).
    Function(Arc<FunctionValue>),
    /// A deferred side-effect sequence produced by `;` or action builtins.
    Command(Arc<CommandSeq>),
}

impl Value {
    pub fn string(s: impl AsRef<str>) -> Value {
        Value::Str(Arc::from(s.as_ref()))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Arc::new(items))
    }

    pub fn map(entries: ValueMap) -> Value {
        Value::Map(Arc::new(entries))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Decimal(_) => "decimal",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
            Value::Command(_) => "commands",
        }
    }

    /// Truthiness: null, false, zero, and empty containers are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Decimal(d) => !d.is_zero(),
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.is_empty(),
            Value::Map(m) => !m.is_empty(),
            Value::Object(_) | Value::Function(_) | Value::Command(_) => true,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Decimal(_))
    }

    /// Integer view: ints as-is, decimals truncated, bools as 0/1,
    /// null as 0. `None` for everything else.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Decimal(d) => Some(d.as_int()),
            Value::Bool(b) => Some(*b as i64),
            Value::Null => Some(0),
            _ => None,
        }
    }

    /// Decimal view with the same coercions as [`Value::as_int`].
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Decimal(d) => Some(*d),
            Value::Int(i) => Some(Decimal::from_int(*i)),
            Value::Bool(b) => Some(Decimal::from_int(*b as i64)),
            Value::Null => Some(Decimal::from_raw(0)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&ValueMap> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Element count for containers and strings (characters).
    pub fn num_elements(&self) -> Option<usize> {
        match self {
            Value::Str(s) => Some(s.chars().count()),
            Value::List(l) => Some(l.len()),
            Value::Map(m) => Some(m.len()),
            _ => None,
        }
    }

    /// Render as formula source so the result can be re-parsed.
    pub fn write_source(&self, out: &mut String) {
        use std::fmt::Write;
        match self {
            Value::Null => out.push_str("null"),
            Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Value::Int(i) => {
                let _ = write!(out, "{i}");
            }
            Value::Decimal(d) => {
                let _ = write!(out, "{d}");
            }
            Value::Str(s) => {
                if s.contains('\'') {
                    let _ = write!(out, "q({s})");
                } else {
                    let _ = write!(out, "'{s}'");
                }
            }
            Value::List(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    item.write_source(out);
                }
                out.push(']');
            }
            Value::Map(entries) => {
                out.push('{');
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    k.write_source(out);
                    out.push_str(": ");
                    v.write_source(out);
                }
                out.push('}');
            }
            Value::Object(_) => out.push_str("<object>"),
            Value::Function(f) => {
                let _ = write!(out, "<function {}>", f.display_name());
            }
            Value::Command(_) => out.push_str("<commands>"),
        }
    }

    pub fn to_source(&self) -> String {
        let mut out = String::new();
        self.write_source(&mut out);
        out
    }

    fn kind_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Decimal(_) => 2,
            Value::Str(_) => 3,
            Value::List(_) => 4,
            Value::Map(_) => 5,
            Value::Object(_) => 6,
            Value::Function(_) => 7,
            Value::Command(_) => 8,
        }
    }

    /// Raw millionths for numeric comparison and hashing; widened so the
    /// full i64 integer range survives the scaling.
    fn numeric_raw(&self) -> Option<i128> {
        match self {
            Value::Int(i) => Some(*i as i128 * crate::foundation::decimal::SCALE as i128),
            Value::Decimal(d) => Some(d.raw() as i128),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a.as_ref() == b.as_ref(),
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::Command(a), Value::Command(b)) => Arc::ptr_eq(a, b),
            _ => match (self.numeric_raw(), other.numeric_raw()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Null => state.write_u8(0),
            Value::Bool(b) => {
                state.write_u8(1);
                b.hash(state);
            }
            // int and decimal hash identically so 1 == 1.0 as map keys
            Value::Int(_) | Value::Decimal(_) => {
                state.write_u8(2);
                state.write_i128(self.numeric_raw().expect("numeric"));
            }
            Value::Str(s) => {
                state.write_u8(3);
                s.hash(state);
            }
            Value::List(items) => {
                state.write_u8(4);
                for item in items.iter() {
                    item.hash(state);
                }
            }
            Value::Map(entries) => {
                state.write_u8(5);
                // order-independent: map equality ignores insertion order
                let mut combined: u64 = 0;
                for (k, v) in entries.iter() {
                    let mut entry_hasher = std::collections::hash_map::DefaultHasher::new();
                    k.hash(&mut entry_hasher);
                    v.hash(&mut entry_hasher);
                    combined ^= entry_hasher.finish();
                }
                state.write_u64(combined);
            }
            Value::Object(o) => {
                state.write_u8(6);
                state.write_usize(Arc::as_ptr(o) as *const () as usize);
            }
            Value::Function(f) => {
                state.write_u8(7);
                state.write_usize(Arc::as_ptr(f) as usize);
            }
            Value::Command(c) => {
                state.write_u8(8);
                state.write_usize(Arc::as_ptr(c) as usize);
            }
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        if let (Some(a), Some(b)) = (self.numeric_raw(), other.numeric_raw()) {
            return a.cmp(&b);
        }
        let rank = self.kind_rank().cmp(&other.kind_rank());
        if rank != Ordering::Equal {
            return rank;
        }
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) => a.iter().cmp(b.iter()),
            (Value::Map(a), Value::Map(b)) => {
                let mut left: Vec<_> = a.iter().collect();
                let mut right: Vec<_> = b.iter().collect();
                left.sort_by(|x, y| x.0.cmp(y.0));
                right.sort_by(|x, y| x.0.cmp(y.0));
                left.cmp(&right)
            }
            (Value::Object(a), Value::Object(b)) => {
                (Arc::as_ptr(a) as *const () as usize).cmp(&(Arc::as_ptr(b) as *const () as usize))
            }
            (Value::Function(a), Value::Function(b)) => {
                (Arc::as_ptr(a) as usize).cmp(&(Arc::as_ptr(b) as usize))
            }
            (Value::Command(a), Value::Command(b)) => {
                (Arc::as_ptr(a) as usize).cmp(&(Arc::as_ptr(b) as usize))
            }
            _ => Ordering::Equal,
        }
    }
}

impl fmt::Display for Value {
    /// Human-readable rendering: strings print bare, everything else as
    /// formula source.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{s}"),
            other => write!(f, "{}", other.to_source()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Value {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Value {
        Value::Int(i)
    }
}

impl From<Decimal> for Value {
    fn from(d: Decimal) -> Value {
        Value::Decimal(d)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Value {
        Value::string(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_promotion_in_equality() {
        assert_eq!(Value::Int(1), Value::Decimal(Decimal::from_int(1)));
        assert_ne!(Value::Int(1), Value::Decimal(Decimal::parse("1.5").unwrap()));
        assert_ne!(Value::Bool(true), Value::Int(1));
    }

    #[test]
    fn promoted_numbers_share_a_map_slot() {
        let mut map = ValueMap::new();
        map.insert(Value::Int(1), Value::string("a"));
        map.insert(Value::Decimal(Decimal::from_int(1)), Value::string("b"));
        assert_eq!(map.len(), 1);
        assert_eq!(map[&Value::Int(1)], Value::string("b"));
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::string("").is_truthy());
        assert!(!Value::list(vec![]).is_truthy());
        assert!(Value::Int(-1).is_truthy());
        assert!(Value::string("x").is_truthy());
    }

    #[test]
    fn source_round_trip_text() {
        let v = Value::list(vec![
            Value::Int(3),
            Value::Decimal(Decimal::parse("0.5").unwrap()),
            Value::string("hi"),
        ]);
        assert_eq!(v.to_source(), "[3,0.5,'hi']");
    }

    #[test]
    fn cross_kind_ordering_is_total() {
        let mut values = vec![
            Value::string("a"),
            Value::Int(2),
            Value::Null,
            Value::Bool(true),
            Value::Decimal(Decimal::parse("1.5").unwrap()),
        ];
        values.sort();
        assert_eq!(values[0], Value::Null);
        assert_eq!(values[1], Value::Bool(true));
        assert_eq!(values[2], Value::Decimal(Decimal::parse("1.5").unwrap()));
        assert_eq!(values[3], Value::Int(2));
        assert_eq!(values[4], Value::string("a"));
    }
}
