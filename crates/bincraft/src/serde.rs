//! `Serialize` for parsed values, so results can be dumped as JSON and the like.
//!
//! Containers serialize as maps without their `_`-prefixed members, lists as
//! sequences, absence as unit. Integers that fit an `i64` or `u64` serialize as such;
//! wider ones fall back to `i128`. Lazy values are resolved first.

use serde::ser::{Error as _, SerializeMap, SerializeSeq, Serializer};
use serde::Serialize;

use crate::value::{Container, Value};

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::None => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(n) => {
                if let Ok(n) = i64::try_from(*n) {
                    serializer.serialize_i64(n)
                } else if let Ok(n) = u64::try_from(*n) {
                    serializer.serialize_u64(n)
                } else {
                    serializer.serialize_i128(*n)
                }
            }
            Value::Float(x) => serializer.serialize_f64(*x),
            Value::Bytes(b) => serializer.serialize_bytes(b),
            Value::Str(s) => serializer.serialize_str(s),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Container(c) | Value::Flags(c) => c.serialize(serializer),
            Value::LazyContainer(_) | Value::LazyList(_) => self
                .force()
                .map_err(S::Error::custom)?
                .serialize(serializer),
        }
    }
}

impl Serialize for Container {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        for (key, value) in self.public() {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use crate::container;
    use crate::value::Value;

    #[test]
    fn test_json() {
        let value = container! {
            "n" => 3,
            "_io" => 0,
            "name" => "abc",
            "items" => vec![Value::Bool(true), Value::None],
        };
        assert_eq!(
            serde_json::to_string(&value).unwrap(),
            r#"{"n":3,"name":"abc","items":[true,null]}"#
        );
    }
}
