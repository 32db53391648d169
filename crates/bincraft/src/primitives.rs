//! Leaf constructs: raw bytes, integers, floats and the no-op markers.

use crate::bits::{bits_to_uint, sign_extend, uint_to_bits};
use crate::construct::{ConstructRef, impl_into_ref};
use crate::context::Context;
use crate::errors::{ErrorKind, Result};
use crate::expr::Expr;
use crate::stream::{self, Stream};
use crate::value::Value;
use crate::{Construct, construct};

/// Byte order of a multi-byte number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endian {
    #[default]
    Big,
    Little,
    Native,
}

impl Endian {
    fn is_little(self) -> bool {
        match self {
            Endian::Big => false,
            Endian::Little => true,
            Endian::Native => cfg!(target_endian = "little"),
        }
    }
}

fn hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn int_input(value: &Value, path: &str) -> Result<i128> {
    value.as_int().ok_or_else(|| {
        ErrorKind::FieldSize(format!("expected an integer, found a {}", value.type_name())).at(path)
    })
}

/// Exactly `length` bytes; the length may depend on the context.
#[derive(Debug, Clone)]
pub struct Bytes {
    length: Expr,
}

impl Bytes {
    pub fn new(length: impl Into<Expr>) -> Self {
        Self {
            length: length.into(),
        }
    }
}

impl Construct for Bytes {
    fn parse(&self, stream: &mut dyn Stream, ctx: &mut Context, path: &str) -> Result<Value> {
        let n = self.length.evaluate_usize(ctx, path)?;
        Ok(Value::Bytes(stream::read_exact(stream, n, path)?))
    }

    fn build(
        &self,
        value: &Value,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        let n = self.length.evaluate_usize(ctx, path)?;
        let data = match value {
            Value::Bytes(b) => b.clone(),
            other => {
                return Err(ErrorKind::TypeMismatch(format!(
                    "expected bytes, found a {}",
                    other.type_name()
                ))
                .at(path));
            }
        };
        if data.len() != n {
            return Err(ErrorKind::FieldSize(format!(
                "expected {n} bytes, found {} ({})",
                data.len(),
                hex(&data)
            ))
            .at(path));
        }
        stream::write_all(stream, &data, path)?;
        Ok(Value::Bytes(data))
    }

    fn sizeof(&self, ctx: &mut Context, path: &str) -> Result<usize> {
        construct::static_count(&self.length, ctx, path)
    }
}

/// Everything up to the end of the stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct GreedyBytes;

impl Construct for GreedyBytes {
    fn parse(&self, stream: &mut dyn Stream, _ctx: &mut Context, path: &str) -> Result<Value> {
        Ok(Value::Bytes(stream::read_to_end(stream, path)?))
    }

    fn build(
        &self,
        value: &Value,
        stream: &mut dyn Stream,
        _ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        let data = value.as_bytes().ok_or_else(|| {
            ErrorKind::TypeMismatch(format!("expected bytes, found a {}", value.type_name())).at(path)
        })?;
        stream::write_all(stream, data, path)?;
        Ok(value.clone())
    }

    fn sizeof(&self, _ctx: &mut Context, path: &str) -> Result<usize> {
        Err(ErrorKind::SizeofUnknown("greedy bytes run to end of stream".into()).at(path))
    }
}

/// Two's-complement integer of `length` bytes.
#[derive(Debug, Clone)]
pub struct BytesInteger {
    length: Expr,
    signed: bool,
    endian: Endian,
}

impl BytesInteger {
    pub fn new(length: impl Into<Expr>, signed: bool, endian: Endian) -> Self {
        Self {
            length: length.into(),
            signed,
            endian,
        }
    }
}

fn check_width(width: usize, limit: usize, unit: &str, path: &str) -> Result<()> {
    if width == 0 || width > limit {
        return Err(ErrorKind::FieldSize(format!(
            "integer width must be 1..={limit} {unit}, got {width}"
        ))
        .at(path));
    }
    Ok(())
}

/// Range check for a `bits`-wide integer; returns the value as its unsigned pattern.
fn to_pattern(value: i128, bits: usize, signed: bool, path: &str) -> Result<u128> {
    let fits = if signed {
        let half = 1i128 << (bits - 1).min(126);
        bits >= 128 || (-half..half).contains(&value)
    } else {
        value >= 0 && (bits >= 127 || value < (1i128 << bits))
    };
    if !fits {
        let kind = if signed { "signed" } else { "unsigned" };
        return Err(ErrorKind::FieldSize(format!(
            "{value} does not fit a {bits}-bit {kind} integer"
        ))
        .at(path));
    }
    let mask = if bits >= 128 {
        u128::MAX
    } else {
        (1u128 << bits) - 1
    };
    Ok(value as u128 & mask)
}

fn from_pattern(pattern: u128, bits: usize, signed: bool) -> i128 {
    if signed {
        sign_extend(pattern, bits)
    } else {
        pattern as i128
    }
}

impl Construct for BytesInteger {
    fn parse(&self, stream: &mut dyn Stream, ctx: &mut Context, path: &str) -> Result<Value> {
        let width = self.length.evaluate_usize(ctx, path)?;
        check_width(width, 16, "bytes", path)?;

        let mut data = stream::read_exact(stream, width, path)?;
        if self.endian.is_little() {
            data.reverse();
        }
        let pattern = data.iter().fold(0u128, |acc, &b| (acc << 8) | u128::from(b));
        if !self.signed && width == 16 && pattern > i128::MAX as u128 {
            return Err(ErrorKind::FieldSize(format!(
                "{pattern} exceeds the integer value range"
            ))
            .at(path));
        }
        Ok(Value::Int(from_pattern(pattern, width * 8, self.signed)))
    }

    fn build(
        &self,
        value: &Value,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        let width = self.length.evaluate_usize(ctx, path)?;
        check_width(width, 16, "bytes", path)?;

        let v = int_input(value, path)?;
        let pattern = to_pattern(v, width * 8, self.signed, path)?;
        let mut data = pattern.to_be_bytes()[16 - width..].to_vec();
        if self.endian.is_little() {
            data.reverse();
        }
        stream::write_all(stream, &data, path)?;
        Ok(Value::Int(v))
    }

    fn sizeof(&self, ctx: &mut Context, path: &str) -> Result<usize> {
        construct::static_count(&self.length, ctx, path)
    }
}

/// Integer of `length` bits, read from a bit stream (one unit byte per bit).
#[derive(Debug, Clone)]
pub struct BitsInteger {
    length: Expr,
    signed: bool,
    /// Reverses whole bytes of the bit pattern; the length must be a multiple of 8.
    swapped: bool,
}

impl BitsInteger {
    pub fn new(length: impl Into<Expr>, signed: bool) -> Self {
        Self {
            length: length.into(),
            signed,
            swapped: false,
        }
    }

    /// Little-endian byte order over the bit pattern.
    pub fn swapped(mut self) -> Self {
        self.swapped = true;
        self
    }

    fn swap(&self, bits: &mut Vec<u8>, path: &str) -> Result<()> {
        if !self.swapped {
            return Ok(());
        }
        if bits.len() % 8 != 0 {
            return Err(ErrorKind::FieldSize(format!(
                "cannot byte-swap {} bits",
                bits.len()
            ))
            .at(path));
        }
        *bits = bits.chunks(8).rev().flatten().copied().collect();
        Ok(())
    }
}

impl Construct for BitsInteger {
    fn parse(&self, stream: &mut dyn Stream, ctx: &mut Context, path: &str) -> Result<Value> {
        let width = self.length.evaluate_usize(ctx, path)?;
        check_width(width, 128, "bits", path)?;

        let mut bits = stream::read_exact(stream, width, path)?;
        self.swap(&mut bits, path)?;
        let pattern = bits_to_uint(&bits);
        if !self.signed && width == 128 && pattern > i128::MAX as u128 {
            return Err(ErrorKind::FieldSize(format!(
                "{pattern} exceeds the integer value range"
            ))
            .at(path));
        }
        Ok(Value::Int(from_pattern(pattern, width, self.signed)))
    }

    fn build(
        &self,
        value: &Value,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        let width = self.length.evaluate_usize(ctx, path)?;
        check_width(width, 128, "bits", path)?;

        let v = int_input(value, path)?;
        let mut bits = uint_to_bits(to_pattern(v, width, self.signed, path)?, width);
        self.swap(&mut bits, path)?;
        stream::write_all(stream, &bits, path)?;
        Ok(Value::Int(v))
    }

    fn sizeof(&self, ctx: &mut Context, path: &str) -> Result<usize> {
        construct::static_count(&self.length, ctx, path)
    }
}

/// One bit as a boolean.
#[derive(Debug, Clone, Copy, Default)]
pub struct Flag;

impl Construct for Flag {
    fn parse(&self, stream: &mut dyn Stream, _ctx: &mut Context, path: &str) -> Result<Value> {
        let unit = stream::read_exact(stream, 1, path)?;
        Ok(Value::Bool(unit[0] != 0))
    }

    fn build(
        &self,
        value: &Value,
        stream: &mut dyn Stream,
        _ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        let bit = match value {
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            other => {
                return Err(ErrorKind::TypeMismatch(format!(
                    "expected a bool, found a {}",
                    other.type_name()
                ))
                .at(path));
            }
        };
        stream::write_all(stream, &[u8::from(bit)], path)?;
        Ok(Value::Bool(bit))
    }

    fn sizeof(&self, _ctx: &mut Context, _path: &str) -> Result<usize> {
        Ok(1)
    }
}

fn read_varint(stream: &mut dyn Stream, max_bits: u32, path: &str) -> Result<u128> {
    let mut acc = 0u128;
    let mut shift = 0u32;
    let mut raw = Vec::new();

    loop {
        let byte = stream::read_exact(stream, 1, path)?[0];
        raw.push(byte);
        let payload = u128::from(byte & 0x7f);

        if payload != 0 && (shift >= max_bits || payload >> (max_bits - shift).min(7) != 0) {
            return Err(ErrorKind::IntegerOverflow(format!(
                "varint {} exceeds {max_bits} bits",
                hex(&raw)
            ))
            .at(path));
        }
        if shift < 128 {
            acc |= payload << shift;
        }
        if byte & 0x80 == 0 {
            return Ok(acc);
        }
        shift += 7;
    }
}

fn write_varint(stream: &mut dyn Stream, mut value: u128, path: &str) -> Result<()> {
    let mut out = Vec::new();
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
    stream::write_all(stream, &out, path)
}

fn check_bits(value: u128, max_bits: u32, path: &str) -> Result<()> {
    if max_bits < 128 && value >> max_bits != 0 {
        return Err(ErrorKind::IntegerOverflow(format!("{value} exceeds {max_bits} bits")).at(path));
    }
    Ok(())
}

/// Unsigned base-128 integer: seven payload bits per byte, low group first, high bit
/// set on every byte but the last.
#[derive(Debug, Clone, Copy)]
pub struct VarInt {
    max_bits: u32,
}

impl Default for VarInt {
    fn default() -> Self {
        Self { max_bits: 127 }
    }
}

impl VarInt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps the decoded value at `bits` bits (at most 127).
    pub fn with_max_bits(bits: u32) -> Self {
        Self {
            max_bits: bits.clamp(1, 127),
        }
    }
}

impl Construct for VarInt {
    fn parse(&self, stream: &mut dyn Stream, _ctx: &mut Context, path: &str) -> Result<Value> {
        let v = read_varint(stream, self.max_bits, path)?;
        Ok(Value::Int(v as i128))
    }

    fn build(
        &self,
        value: &Value,
        stream: &mut dyn Stream,
        _ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        let v = int_input(value, path)?;
        if v < 0 {
            return Err(ErrorKind::IntegerOverflow(format!(
                "varint cannot encode negative value {v}"
            ))
            .at(path));
        }
        check_bits(v as u128, self.max_bits, path)?;
        write_varint(stream, v as u128, path)?;
        Ok(Value::Int(v))
    }

    fn sizeof(&self, _ctx: &mut Context, path: &str) -> Result<usize> {
        Err(ErrorKind::SizeofUnknown("varint length depends on the value".into()).at(path))
    }
}

/// Signed varint using zig-zag encoding: 0, -1, 1, -2, ... map to 0, 1, 2, 3, ...
#[derive(Debug, Clone, Copy, Default)]
pub struct ZigZag;

impl Construct for ZigZag {
    fn parse(&self, stream: &mut dyn Stream, _ctx: &mut Context, path: &str) -> Result<Value> {
        let u = read_varint(stream, 128, path)?;
        Ok(Value::Int((u >> 1) as i128 ^ -((u & 1) as i128)))
    }

    fn build(
        &self,
        value: &Value,
        stream: &mut dyn Stream,
        _ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        let v = int_input(value, path)?;
        let u = ((v << 1) ^ (v >> 127)) as u128;
        write_varint(stream, u, path)?;
        Ok(Value::Int(v))
    }

    fn sizeof(&self, _ctx: &mut Context, path: &str) -> Result<usize> {
        Err(ErrorKind::SizeofUnknown("varint length depends on the value".into()).at(path))
    }
}

/// IEEE 754 binary32 or binary64.
#[derive(Debug, Clone, Copy)]
pub struct Float {
    width: usize,
    endian: Endian,
}

impl Float {
    pub fn f32(endian: Endian) -> Self {
        Self { width: 4, endian }
    }

    pub fn f64(endian: Endian) -> Self {
        Self { width: 8, endian }
    }
}

impl Construct for Float {
    fn parse(&self, stream: &mut dyn Stream, _ctx: &mut Context, path: &str) -> Result<Value> {
        let mut data = stream::read_exact(stream, self.width, path)?;
        if self.endian.is_little() {
            data.reverse();
        }
        let v = match data.as_slice() {
            [a, b, c, d] => f64::from(f32::from_be_bytes([*a, *b, *c, *d])),
            _ => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&data);
                f64::from_be_bytes(buf)
            }
        };
        Ok(Value::Float(v))
    }

    fn build(
        &self,
        value: &Value,
        stream: &mut dyn Stream,
        _ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        let v = value.as_float().ok_or_else(|| {
            ErrorKind::FieldSize(format!("expected a number, found a {}", value.type_name())).at(path)
        })?;
        let mut data = if self.width == 4 {
            let narrow = v as f32;
            if v.is_finite() && narrow.is_infinite() {
                return Err(ErrorKind::FieldSize(format!("{v} does not fit in a 32-bit float")).at(path));
            }
            narrow.to_be_bytes().to_vec()
        } else {
            v.to_be_bytes().to_vec()
        };
        if self.endian.is_little() {
            data.reverse();
        }
        stream::write_all(stream, &data, path)?;
        Ok(Value::Float(v))
    }

    fn sizeof(&self, _ctx: &mut Context, _path: &str) -> Result<usize> {
        Ok(self.width)
    }
}

/// Does nothing and produces absence.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pass;

impl Construct for Pass {
    fn parse(&self, _stream: &mut dyn Stream, _ctx: &mut Context, _path: &str) -> Result<Value> {
        Ok(Value::None)
    }

    fn build(
        &self,
        _value: &Value,
        _stream: &mut dyn Stream,
        _ctx: &mut Context,
        _path: &str,
    ) -> Result<Value> {
        Ok(Value::None)
    }

    fn sizeof(&self, _ctx: &mut Context, _path: &str) -> Result<usize> {
        Ok(0)
    }

    fn is_self_supplying(&self) -> bool {
        true
    }
}

/// Asserts that the stream is exhausted.
#[derive(Debug, Clone, Copy, Default)]
pub struct Terminated;

impl Construct for Terminated {
    fn parse(&self, stream: &mut dyn Stream, _ctx: &mut Context, path: &str) -> Result<Value> {
        let pos = stream::tell(stream, path)?;
        let end = stream::size(stream, path)?;
        if pos < end {
            return Err(ErrorKind::UnconsumedBytes(format!(
                "expected end of stream, {} bytes remain",
                end - pos
            ))
            .at(path));
        }
        Ok(Value::None)
    }

    fn build(
        &self,
        _value: &Value,
        _stream: &mut dyn Stream,
        _ctx: &mut Context,
        _path: &str,
    ) -> Result<Value> {
        Ok(Value::None)
    }

    fn sizeof(&self, _ctx: &mut Context, _path: &str) -> Result<usize> {
        Ok(0)
    }

    fn is_self_supplying(&self) -> bool {
        true
    }
}

impl_into_ref!(
    Bytes,
    GreedyBytes,
    BytesInteger,
    BitsInteger,
    Flag,
    VarInt,
    ZigZag,
    Float,
    Pass,
    Terminated
);

macro_rules! int_shorthands {
    ($($name:ident => ($width:expr, $signed:expr, $endian:expr)),* $(,)?) => {
        $(
            pub fn $name() -> ConstructRef {
                BytesInteger::new($width, $signed, $endian).into()
            }
        )*
    };
}

int_shorthands! {
    u8 => (1, false, Endian::Big),
    i8 => (1, true, Endian::Big),
    u16_be => (2, false, Endian::Big),
    u16_le => (2, false, Endian::Little),
    u16_ne => (2, false, Endian::Native),
    i16_be => (2, true, Endian::Big),
    i16_le => (2, true, Endian::Little),
    u24_be => (3, false, Endian::Big),
    u24_le => (3, false, Endian::Little),
    u32_be => (4, false, Endian::Big),
    u32_le => (4, false, Endian::Little),
    u32_ne => (4, false, Endian::Native),
    i32_be => (4, true, Endian::Big),
    i32_le => (4, true, Endian::Little),
    u64_be => (8, false, Endian::Big),
    u64_le => (8, false, Endian::Little),
    u64_ne => (8, false, Endian::Native),
    i64_be => (8, true, Endian::Big),
    i64_le => (8, true, Endian::Little),
}

pub fn f32_be() -> ConstructRef {
    Float::f32(Endian::Big).into()
}

pub fn f32_le() -> ConstructRef {
    Float::f32(Endian::Little).into()
}

pub fn f64_be() -> ConstructRef {
    Float::f64(Endian::Big).into()
}

pub fn f64_le() -> ConstructRef {
    Float::f64(Endian::Little).into()
}

/// Unsigned integer of `n` bits; only meaningful inside a bit stream.
pub fn bits(n: impl Into<Expr>) -> ConstructRef {
    BitsInteger::new(n, false).into()
}

pub fn nibble() -> ConstructRef {
    bits(4)
}

pub fn octet() -> ConstructRef {
    bits(8)
}

pub fn flag() -> ConstructRef {
    Flag.into()
}

pub fn bytes(n: impl Into<Expr>) -> ConstructRef {
    Bytes::new(n).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConstructExt;
    use crate::expr::this;

    #[test]
    fn test_fixed_integers() {
        assert_eq!(u32_le().parse_bytes(&[1, 2, 3, 4]).unwrap(), Value::Int(0x04030201));
        assert_eq!(u32_be().build_bytes(&Value::Int(0x01020304)).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(i16_le().parse_bytes(&[0xfe, 0xff]).unwrap(), Value::Int(-2));
        assert_eq!(u24_be().build_bytes(&Value::Int(0x010203)).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_integer_out_of_range() {
        let err = u8().build_bytes(&Value::Int(256)).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::FieldSize(_)));
        assert!(u8().build_bytes(&Value::Int(-1)).is_err());
        assert!(i8().build_bytes(&Value::Int(-128)).is_ok());
        assert!(i8().build_bytes(&Value::Int(128)).is_err());
    }

    #[test]
    fn test_short_read_is_underflow() {
        let err = u32_le().parse_bytes(&[1, 2]).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::StreamUnderflow(_)));
        assert_eq!(err.path, "this");
    }

    #[test]
    fn test_varint() {
        let v = VarInt::new();
        assert_eq!(v.parse_bytes(&[0x85, 0x05]).unwrap(), Value::Int(645));
        assert_eq!(v.build_bytes(&Value::Int(5)).unwrap(), vec![0x05]);
        assert_eq!(v.build_bytes(&Value::Int(645)).unwrap(), vec![0x85, 0x05]);
        let err = v.build_bytes(&Value::Int(-1)).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::IntegerOverflow(_)));
    }

    #[test]
    fn test_varint_cap() {
        let v = VarInt::with_max_bits(8);
        assert_eq!(v.parse_bytes(&[0xff, 0x01]).unwrap(), Value::Int(255));
        assert!(matches!(
            v.parse_bytes(&[0x80, 0x02]).unwrap_err().kind,
            ErrorKind::IntegerOverflow(_)
        ));
        assert!(v.build_bytes(&Value::Int(256)).is_err());
    }

    #[test]
    fn test_zigzag() {
        assert_eq!(ZigZag.build_bytes(&Value::Int(-1)).unwrap(), vec![0x01]);
        assert_eq!(ZigZag.build_bytes(&Value::Int(1)).unwrap(), vec![0x02]);
        assert_eq!(ZigZag.parse_bytes(&[0x03]).unwrap(), Value::Int(-2));
    }

    #[test]
    fn test_float() {
        let data = f32_le().build_bytes(&Value::Float(1.5)).unwrap();
        assert_eq!(data, 1.5f32.to_le_bytes().to_vec());
        assert_eq!(f64_be().parse_bytes(&2.25f64.to_be_bytes()).unwrap(), Value::Float(2.25));
    }

    #[test]
    fn test_f32_out_of_range() {
        let err = f32_be().build_bytes(&Value::Float(1e300)).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::FieldSize(_)));
        let inf = f32_be().build_bytes(&Value::Float(f64::INFINITY)).unwrap();
        assert_eq!(inf, f32::INFINITY.to_be_bytes().to_vec());
    }

    #[test]
    fn test_bytes_length_checked() {
        let b = bytes(3);
        assert_eq!(b.parse_bytes(&[1, 2, 3]).unwrap(), Value::Bytes(vec![1, 2, 3]));
        assert!(matches!(
            b.build_bytes(&Value::Bytes(vec![1])).unwrap_err().kind,
            ErrorKind::FieldSize(_)
        ));
    }

    #[test]
    fn test_bytes_length_from_params() {
        let b = bytes(this("_params.n"));
        let mut ctx = Context::new(crate::Container::from([("n", 2)]));
        let mut stream = stream::memory(vec![7, 8, 9]);
        assert_eq!(b.parse(&mut stream, &mut ctx, "this").unwrap(), Value::Bytes(vec![7, 8]));
        assert!(b.static_size().is_err());
    }

    #[test]
    fn test_bits_integer_over_units() {
        let b = BitsInteger::new(4, true);
        assert_eq!(b.parse_bytes(&[1, 1, 1, 1]).unwrap(), Value::Int(-1));
        assert_eq!(bits(3).build_bytes(&Value::Int(5)).unwrap(), vec![1, 0, 1]);
    }

    #[test]
    fn test_bits_integer_swapped() {
        let b = BitsInteger::new(16, false).swapped();
        let mut units = vec![0; 16];
        units[7] = 1;
        assert_eq!(b.parse_bytes(&units).unwrap(), Value::Int(0x0001));
        assert_eq!(BitsInteger::new(16, false).parse_bytes(&units).unwrap(), Value::Int(0x0100));
    }

    #[test]
    fn test_terminated() {
        assert!(Terminated.parse_bytes(&[]).is_ok());
        assert!(matches!(
            Terminated.parse_bytes(&[0]).unwrap_err().kind,
            ErrorKind::UnconsumedBytes(_)
        ));
    }
}
