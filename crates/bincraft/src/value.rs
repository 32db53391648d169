//! Values produced by parsing and consumed by building.
//!
//! A [`Container`] is an ordered attribute map: iteration follows parse/build order, and
//! keys starting with `_` are private bookkeeping that equality ignores.

use std::fmt;

use indexmap::IndexMap;

use crate::errors::{ErrorKind, Result};
use crate::lazy::{LazyContainer, LazyList};

/// A parsed (or to-be-built) value.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// Absence: an `If` whose condition was false, `Pass`, a failed `Peek`.
    #[default]
    None,
    Bool(bool),
    Int(i128),
    Float(f64),
    Bytes(Vec<u8>),
    Str(String),
    /// List container.
    List(Vec<Value>),
    Container(Container),
    /// Flags container: one boolean per declared flag.
    Flags(Container),
    LazyContainer(LazyContainer),
    LazyList(LazyList),
}

impl Value {
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn as_int(&self) -> Option<i128> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Bool(b) => Some(i128::from(*b)),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
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
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// The container behind a `Container` or `Flags` value.
    pub fn as_container(&self) -> Option<&Container> {
        match self {
            Value::Container(c) | Value::Flags(c) => Some(c),
            _ => None,
        }
    }

    /// Truthiness: absence, zero, false and empty values are false.
    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(v) => *v != 0,
            Value::Float(v) => *v != 0.0,
            Value::Bytes(b) => !b.is_empty(),
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Container(c) | Value::Flags(c) => !c.is_empty(),
            Value::LazyContainer(c) => !c.is_empty(),
            Value::LazyList(l) => !l.is_empty(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bytes(_) => "bytes",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Container(_) => "container",
            Value::Flags(_) => "flags",
            Value::LazyContainer(_) => "lazy container",
            Value::LazyList(_) => "lazy list",
        }
    }

    /// Looks up a member by name, resolving lazy members on demand.
    pub fn attr(&self, name: &str) -> std::result::Result<Value, ErrorKind> {
        let found = match self {
            Value::Container(c) | Value::Flags(c) => c.get(name).cloned(),
            Value::LazyContainer(lazy) => lazy.get(name).map_err(|e| e.kind)?,
            _ => {
                return Err(ErrorKind::Expression(format!(
                    "cannot read field `{name}` of a {}",
                    self.type_name()
                )));
            }
        };

        found.ok_or_else(|| ErrorKind::Expression(format!("no field `{name}`")))
    }

    /// Looks up a list element; negative indices count from the end.
    pub fn item(&self, index: i128) -> std::result::Result<Value, ErrorKind> {
        let len = match self {
            Value::List(items) => items.len(),
            Value::LazyList(lazy) => lazy.len(),
            Value::Bytes(b) => b.len(),
            _ => {
                return Err(ErrorKind::Expression(format!(
                    "cannot index into a {}",
                    self.type_name()
                )));
            }
        };

        let resolved = if index < 0 { len as i128 + index } else { index };
        if resolved < 0 || resolved >= len as i128 {
            return Err(ErrorKind::Expression(format!(
                "index {index} out of range for length {len}"
            )));
        }
        let i = resolved as usize;

        match self {
            Value::List(items) => Ok(items[i].clone()),
            Value::LazyList(lazy) => lazy.get(i).map_err(|e| e.kind),
            Value::Bytes(b) => Ok(Value::Int(i128::from(b[i]))),
            _ => Err(ErrorKind::Expression(format!(
                "cannot index into a {}",
                self.type_name()
            ))),
        }
    }

    /// Number of elements, bytes or characters.
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::Bytes(b) => Some(b.len()),
            Value::Str(s) => Some(s.chars().count()),
            Value::List(items) => Some(items.len()),
            Value::Container(c) | Value::Flags(c) => Some(c.len()),
            Value::LazyContainer(c) => Some(c.len()),
            Value::LazyList(l) => Some(l.len()),
            _ => None,
        }
    }

    /// Replaces every lazy value with its fully parsed eager equivalent.
    pub fn force(&self) -> Result<Value> {
        Ok(match self {
            Value::LazyContainer(lazy) => Value::Container(lazy.force()?),
            Value::LazyList(lazy) => Value::List(lazy.force()?),
            Value::List(items) => {
                Value::List(items.iter().map(Value::force).collect::<Result<_>>()?)
            }
            Value::Container(c) => Value::Container(c.force()?),
            Value::Flags(c) => Value::Flags(c.force()?),
            other => other.clone(),
        })
    }

    fn is_lazy(&self) -> bool {
        matches!(self, Value::LazyContainer(_) | Value::LazyList(_))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        if self.is_lazy() || other.is_lazy() {
            return match (self.force(), other.force()) {
                (Ok(a), Ok(b)) => a == b,
                _ => false,
            };
        }

        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                *a as f64 == *b
            }
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (
                Value::Container(a) | Value::Flags(a),
                Value::Container(b) | Value::Flags(b),
            ) => a == b,
            _ => false,
        }
    }
}

macro_rules! value_from_int {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::Int(v as i128)
                }
            }
        )*
    };
}

value_from_int!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, usize);

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for Value {
    fn from(v: &[u8; N]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<Container> for Value {
    fn from(v: Container) -> Self {
        Value::Container(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::None, Into::into)
    }
}

/// Whether a key is private bookkeeping (`_io`, `_index`, `_`, ...).
pub fn is_private(key: &str) -> bool {
    key.starts_with('_')
}

/// Ordered attribute map; the parsed value of a structure.
#[derive(Clone, Default)]
pub struct Container {
    entries: IndexMap<String, Value>,
}

impl Container {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces `key`. A replaced key keeps its original position.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.entries.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.entries.get_mut(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Removes `key`, preserving the order of the remaining entries.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.shift_remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.values()
    }

    /// Entries whose key is not private.
    pub fn public(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.iter().filter(|(k, _)| !is_private(k))
    }

    /// Copies every entry of `other` into `self`, in order.
    pub fn extend_from(&mut self, other: &Container) {
        for (k, v) in other.iter() {
            self.entries.insert(k.to_string(), v.clone());
        }
    }

    /// A copy with private entries dropped.
    pub fn without_private(&self) -> Container {
        self.public().map(|(k, v)| (k, v.clone())).collect()
    }

    pub fn force(&self) -> Result<Container> {
        self.iter()
            .map(|(k, v)| Ok((k.to_string(), v.force()?)))
            .collect()
    }
}

impl PartialEq for Container {
    fn eq(&self, other: &Self) -> bool {
        let mine = self.public().count();
        let theirs = other.public().count();
        mine == theirs
            && self
                .public()
                .all(|(k, v)| other.get(k).is_some_and(|o| o == v))
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter()).finish()
    }
}

impl std::ops::Index<&str> for Container {
    type Output = Value;

    fn index(&self, key: &str) -> &Value {
        &self.entries[key]
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Container {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl<K: Into<String>, V: Into<Value>, const N: usize> From<[(K, V); N]> for Container {
    fn from(entries: [(K, V); N]) -> Self {
        entries.into_iter().collect()
    }
}

impl IntoIterator for Container {
    type Item = (String, Value);
    type IntoIter = indexmap::map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Builds a [`Value::Container`] from `key => value` pairs.
///
/// ```
/// use bincraft::{container, Value};
///
/// let v = container! { "n" => 3, "items" => vec![Value::from(10)] };
/// assert_eq!(v.attr("n").unwrap(), Value::Int(3));
/// ```
#[macro_export]
macro_rules! container {
    () => {
        $crate::Value::Container($crate::Container::new())
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut c = $crate::Container::new();
        $(c.insert($key, $value);)+
        $crate::Value::Container(c)
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insertion_order_preserved() {
        let mut c = Container::new();
        c.insert("b", 1);
        c.insert("a", 2);
        c.insert("b", 3);
        assert_eq!(c.keys().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(c["b"], Value::Int(3));
    }

    #[test]
    fn test_equality_ignores_order_and_private() {
        let a = Container::from([("x", 1), ("y", 2)]);
        let mut b = Container::from([("y", 2), ("x", 1)]);
        b.insert("_index", 7);
        assert_eq!(a, b);

        b.insert("z", 0);
        assert_ne!(a, b);
    }

    #[test]
    fn test_remove_keeps_order() {
        let mut c = Container::from([("a", 1), ("b", 2), ("c", 3)]);
        c.remove("b");
        assert_eq!(c.keys().collect::<Vec<_>>(), vec!["a", "c"]);
    }

    #[test]
    fn test_int_float_equality() {
        assert_eq!(Value::Int(2), Value::Float(2.0));
        assert_ne!(Value::Int(2), Value::Bool(true));
    }

    #[test]
    fn test_flags_compare_as_containers() {
        let c = Container::from([("a", true)]);
        assert_eq!(Value::Flags(c.clone()), Value::Container(c));
    }

    #[test]
    fn test_attr_and_item() {
        let v = container! { "items" => vec![Value::from(1), Value::from(2)] };
        let items = v.attr("items").unwrap();
        assert_eq!(items.item(-1).unwrap(), Value::Int(2));
        assert!(items.item(2).is_err());
        assert!(v.attr("missing").is_err());
    }

    #[test]
    fn test_truthy() {
        assert!(!Value::None.truthy());
        assert!(!Value::Int(0).truthy());
        assert!(Value::Bytes(vec![0]).truthy());
        assert!(!Value::Str(String::new()).truthy());
    }
}
