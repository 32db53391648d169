//! # bincraft
//!
//! Declarative, bidirectional descriptions of binary formats.
//!
//! A format is a tree of [`Construct`] nodes: integers, strings, structures,
//! repeaters, conditionals, envelopes and derived fields. The same tree parses bytes
//! into a [`Value`], builds a value back into bytes, and reports its size when that
//! does not depend on the data. Fields refer to each other through [`Expr`]
//! expressions evaluated against the [`Context`] stack.
//!
//! ## Example
//!
//! ```
//! use bincraft::{container, field, this, u8, u16_be, Value};
//! use bincraft::primitives::Bytes;
//! use bincraft::structs::Struct;
//!
//! let format = Struct::new([
//!     field("tag", u8()),
//!     field("length", u16_be()),
//!     field("payload", Bytes::new(this("length"))),
//! ]);
//!
//! let parsed = bincraft::parse(&format, &[7, 0, 2, b'h', b'i']).unwrap();
//! assert_eq!(
//!     parsed,
//!     container! { "tag" => 7, "length" => 2, "payload" => b"hi" }
//! );
//! assert_eq!(bincraft::build(&format, &parsed).unwrap(), vec![7, 0, 2, b'h', b'i']);
//! assert!(bincraft::sizeof(&format).is_err());
//! ```

pub mod adapters;
pub mod bits;
pub mod bitstream;
pub mod conditional;
pub mod construct;
pub mod context;
pub mod derived;
pub mod envelopes;
pub mod errors;
pub mod expr;
pub mod inspect;
pub mod lazy;
pub mod positional;
pub mod primitives;
pub mod repeaters;
#[cfg(feature = "serde")]
mod serde;
pub mod stream;
pub mod strings;
pub mod structs;
pub mod value;

pub use construct::{Construct, ConstructExt, ConstructRef};
pub use context::Context;
pub use errors::{Error, ErrorKind, Result};
pub use expr::{Expr, obj, this};
pub use inspect::{PrintConfig, format_value, search, search_all};
pub use primitives::{
    bits, bytes, f32_be, f32_le, f64_be, f64_le, flag, i8, i16_be, i16_le, i32_be, i32_le,
    i64_be, i64_le, nibble, octet, u8, u16_be, u16_le, u16_ne, u24_be, u24_le, u32_be, u32_le,
    u32_ne, u64_be, u64_le, u64_ne,
};
pub use stream::Stream;
pub use structs::field;
pub use value::{Container, Value};

use construct::{ROOT_PATH, build_child, parse_child};

/// Parses `data` from its first byte.
pub fn parse(construct: &dyn Construct, data: &[u8]) -> Result<Value> {
    parse_with(construct, data, Container::new())
}

/// Parses `data` with `params` reachable as `_params` from every expression.
pub fn parse_with(construct: &dyn Construct, data: &[u8], params: Container) -> Result<Value> {
    let mut stream = stream::memory(data);
    parse_stream(construct, &mut stream, params)
}

/// Parses from the current position of `stream`.
pub fn parse_stream(
    construct: &dyn Construct,
    stream: &mut dyn Stream,
    params: Container,
) -> Result<Value> {
    let offset = stream::tell(stream, ROOT_PATH)?;
    tracing::debug!(construct = ?construct.name(), offset, "parse");
    let mut ctx = Context::new(params);
    parse_child(construct, stream, &mut ctx, ROOT_PATH)
}

/// Builds `value` into a fresh buffer.
pub fn build(construct: &dyn Construct, value: &Value) -> Result<Vec<u8>> {
    build_with(construct, value, Container::new())
}

/// Builds `value` into a fresh buffer with `params` reachable as `_params`.
pub fn build_with(construct: &dyn Construct, value: &Value, params: Container) -> Result<Vec<u8>> {
    let mut stream = stream::memory(Vec::new());
    build_stream(construct, value, &mut stream, params)?;
    Ok(stream.into_inner())
}

/// Builds `value` at the current position of `stream` and returns the value as built.
///
/// Every back-patch registered during the build must be resolved by the time it
/// returns; one that still cannot be computed is reported as an error.
pub fn build_stream(
    construct: &dyn Construct,
    value: &Value,
    stream: &mut dyn Stream,
    params: Container,
) -> Result<Value> {
    let offset = stream::tell(stream, ROOT_PATH)?;
    tracing::debug!(construct = ?construct.name(), offset, "build");
    let mut ctx = Context::new(params);
    let built = build_child(construct, value, stream, &mut ctx, ROOT_PATH)?;
    ctx.resolve_deferred(stream, true)?;
    Ok(built)
}

/// Size in bytes, when it does not depend on parsed data.
pub fn sizeof(construct: &dyn Construct) -> Result<usize> {
    sizeof_with(construct, Container::new())
}

/// Size in bytes, with `params` available to count and length expressions.
pub fn sizeof_with(construct: &dyn Construct, params: Container) -> Result<usize> {
    let mut ctx = Context::new(params);
    construct.sizeof(&mut ctx, ROOT_PATH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container;
    use crate::derived::{Checksum, HashFn};
    use crate::primitives::Bytes;
    use crate::structs::Struct;

    #[test]
    fn test_params_reach_expressions() {
        let format = Bytes::new(this("_params.n"));
        let params = Container::from([("n", 2)]);
        assert_eq!(
            parse_with(&format, b"abc", params.clone()).unwrap(),
            Value::from(b"ab")
        );
        assert_eq!(sizeof_with(&format, params.clone()).unwrap(), 2);
        assert_eq!(build_with(&format, &Value::from(b"ab"), params).unwrap(), b"ab".to_vec());
        assert!(sizeof(&format).is_err());
    }

    #[test]
    fn test_parse_stream_starts_at_position() {
        let mut stream = stream::memory(vec![9, 1, 2]);
        stream.set_position(1);
        assert_eq!(
            parse_stream(&u16_be(), &mut stream, Container::new()).unwrap(),
            Value::from(0x0102)
        );
    }

    #[test]
    fn test_build_stream_patches_forward_checksum() {
        let sum = HashFn::int(|data: &[u8]| data.iter().map(|&b| u64::from(b)).sum());
        let format = Struct::new([
            field("sum", Checksum::new(u8(), sum, this("data"))),
            field("data", Bytes::new(2)),
        ]);
        let value = container! { "data" => b"\x01\x02" };
        assert_eq!(build(&format, &value).unwrap(), vec![3, 1, 2]);
    }

    #[test]
    fn test_build_reports_offset_and_path() {
        let format = Struct::new([field("a", u8()), field("b", u8())]);
        let err = build(&format, &container! { "a" => 1, "b" => 300 }).unwrap_err();
        assert_eq!(err.path, "this.b");
        assert_eq!(err.offset, Some(1));
    }
}
