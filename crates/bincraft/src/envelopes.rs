//! Envelopes: constructs that hand their child a carved-out or re-encoded stream.
//!
//! On parse the child sees a sub-stream holding only its payload, so offsets it
//! observes are relative to the envelope. On build the child is written to a scratch
//! buffer first and the result is framed (length prefix, fixed size, transform) before
//! it reaches the outer stream.

use std::fmt;
use std::io::SeekFrom;
use std::sync::Arc;

use crate::bits::{BitOrder, bits_to_bytes, bytes_to_bits, reverse_bits_per_byte};
use crate::bitstream::{BitsRecode, BytesRecode, Recode, Restream};
use crate::conditional::{build_scratch, splice_scratch};
use crate::construct::{ConstructRef, build_child, container_input, impl_into_ref, parse_child};
use crate::context::Context;
use crate::errors::{ErrorKind, Result};
use crate::expr::Expr;
use crate::stream::{self, Stream};
use crate::value::{Container, Value};
use crate::Construct;

/// Parses `child` from `data`, returning the value and the number of bytes it consumed.
fn parse_slice(
    child: &dyn Construct,
    data: Vec<u8>,
    ctx: &mut Context,
    path: &str,
) -> Result<(Value, u64)> {
    let mut sub = stream::memory(data);
    let value = child.parse(&mut sub, ctx, path)?;
    let consumed = stream::tell(&mut sub, path)?;
    Ok((value, consumed))
}

/// A length field followed by exactly that many bytes of `child`.
#[derive(Debug, Clone)]
pub struct Prefixed {
    length: ConstructRef,
    child: ConstructRef,
    include_length: bool,
    allow_unconsumed: bool,
}

impl Prefixed {
    pub fn new(length: impl Into<ConstructRef>, child: impl Into<ConstructRef>) -> Self {
        Self {
            length: length.into(),
            child: child.into(),
            include_length: false,
            allow_unconsumed: false,
        }
    }

    /// The stored length counts the length field itself.
    pub fn include_length(mut self) -> Self {
        self.include_length = true;
        self
    }

    /// Accept a payload that the child does not read to the end.
    pub fn allow_unconsumed(mut self) -> Self {
        self.allow_unconsumed = true;
        self
    }

    fn length_overhead(&self, ctx: &mut Context, path: &str) -> Result<usize> {
        if self.include_length {
            self.length.sizeof(ctx, path)
        } else {
            Ok(0)
        }
    }
}

impl Construct for Prefixed {
    fn parse(&self, stream: &mut dyn Stream, ctx: &mut Context, path: &str) -> Result<Value> {
        let stored = parse_child(&*self.length, stream, ctx, path)?;
        let stored = stored.as_int().ok_or_else(|| {
            ErrorKind::TypeMismatch(format!("length field yielded a {}", stored.type_name())).at(path)
        })?;
        let overhead = self.length_overhead(ctx, path)? as i128;
        let n = usize::try_from(stored - overhead).map_err(|_| {
            ErrorKind::FieldSize(format!("stored length {stored} is smaller than its own field")).at(path)
        })?;

        let data = stream::read_exact(stream, n, path)?;
        let (value, consumed) = parse_slice(&*self.child, data, ctx, path)?;
        if !self.allow_unconsumed && consumed < n as u64 {
            return Err(ErrorKind::UnconsumedBytes(format!(
                "child read {consumed} of {n} prefixed bytes"
            ))
            .at(path));
        }
        Ok(value)
    }

    fn build(
        &self,
        value: &Value,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        let mark = ctx.deferred_mark();
        let (built, data) = build_scratch(&*self.child, value, ctx, path)?;
        let stored = data.len() + self.length_overhead(ctx, path)?;
        build_child(&*self.length, &Value::from(stored), stream, ctx, path)?;
        splice_scratch(&data, mark, stream, ctx, path)?;
        Ok(built)
    }

    fn sizeof(&self, ctx: &mut Context, path: &str) -> Result<usize> {
        Ok(self.length.sizeof(ctx, path)? + self.child.sizeof(ctx, path)?)
    }

    fn is_self_supplying(&self) -> bool {
        self.child.is_self_supplying()
    }
}

/// Exactly `n` bytes, of which `child` uses a prefix; the rest is zero filled on build.
#[derive(Debug, Clone)]
pub struct FixedSized {
    length: Expr,
    child: ConstructRef,
}

impl FixedSized {
    pub fn new(length: impl Into<Expr>, child: impl Into<ConstructRef>) -> Self {
        Self {
            length: length.into(),
            child: child.into(),
        }
    }
}

impl Construct for FixedSized {
    fn parse(&self, stream: &mut dyn Stream, ctx: &mut Context, path: &str) -> Result<Value> {
        let n = self.length.evaluate_usize(ctx, path)?;
        let data = stream::read_exact(stream, n, path)?;
        let (value, _) = parse_slice(&*self.child, data, ctx, path)?;
        Ok(value)
    }

    fn build(
        &self,
        value: &Value,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        let n = self.length.evaluate_usize(ctx, path)?;
        let mark = ctx.deferred_mark();
        let (built, mut data) = build_scratch(&*self.child, value, ctx, path)?;
        if data.len() > n {
            ctx.discard_deferred_since(mark);
            return Err(ErrorKind::FieldSize(format!(
                "child built {} bytes into a {n}-byte block",
                data.len()
            ))
            .at(path));
        }
        data.resize(n, 0);
        splice_scratch(&data, mark, stream, ctx, path)?;
        Ok(built)
    }

    fn sizeof(&self, ctx: &mut Context, path: &str) -> Result<usize> {
        crate::construct::static_count(&self.length, ctx, path)
    }

    fn is_self_supplying(&self) -> bool {
        self.child.is_self_supplying()
    }
}

/// The bytes up to a terminator, parsed by `child`.
///
/// The terminator is scanned in units of its own length. By default it is consumed from
/// the stream but not handed to the child.
#[derive(Debug, Clone)]
pub struct NullTerminated {
    child: ConstructRef,
    term: Vec<u8>,
    include: bool,
    consume: bool,
    require: bool,
}

impl NullTerminated {
    pub fn new(child: impl Into<ConstructRef>) -> Self {
        Self {
            child: child.into(),
            term: vec![0],
            include: false,
            consume: true,
            require: true,
        }
    }

    pub fn term(mut self, term: impl Into<Vec<u8>>) -> Self {
        self.term = term.into();
        self
    }

    /// Hand the terminator to the child as part of its payload.
    pub fn include(mut self) -> Self {
        self.include = true;
        self
    }

    /// Leave the terminator in the stream.
    pub fn keep(mut self) -> Self {
        self.consume = false;
        self
    }

    /// Accept end of stream in place of the terminator.
    pub fn optional_term(mut self) -> Self {
        self.require = false;
        self
    }
}

impl Construct for NullTerminated {
    fn parse(&self, stream: &mut dyn Stream, ctx: &mut Context, path: &str) -> Result<Value> {
        if self.term.is_empty() {
            return Err(ErrorKind::TypeMismatch("terminator must not be empty".into()).at(path));
        }

        let unit = self.term.len();
        let mut data = Vec::new();
        loop {
            let remaining = stream::size(stream, path)?.saturating_sub(stream::tell(stream, path)?);
            if remaining < unit as u64 && !self.require {
                data.extend(stream::read_to_end(stream, path)?);
                break;
            }
            let chunk = stream::read_exact(stream, unit, path).map_err(|e| match e.kind {
                ErrorKind::StreamUnderflow(_) => ErrorKind::TerminatorNotFound(format!(
                    "end of stream after {} bytes",
                    data.len()
                ))
                .at(path),
                _ => e,
            })?;
            if chunk == self.term {
                if self.include {
                    data.extend_from_slice(&chunk);
                }
                if !self.consume {
                    stream::seek(stream, SeekFrom::Current(-(unit as i64)), path)?;
                }
                break;
            }
            data.extend(chunk);
        }

        let (value, _) = parse_slice(&*self.child, data, ctx, path)?;
        Ok(value)
    }

    fn build(
        &self,
        value: &Value,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        let built = self.child.build(value, stream, ctx, path)?;
        stream::write_all(stream, &self.term, path)?;
        Ok(built)
    }

    fn sizeof(&self, _ctx: &mut Context, path: &str) -> Result<usize> {
        Err(ErrorKind::SizeofUnknown("terminated data has no fixed size".into()).at(path))
    }

    fn is_self_supplying(&self) -> bool {
        self.child.is_self_supplying()
    }
}

/// The rest of the stream with trailing pad units stripped, parsed by `child`.
#[derive(Debug, Clone)]
pub struct NullStripped {
    child: ConstructRef,
    pad: Vec<u8>,
}

impl NullStripped {
    pub fn new(child: impl Into<ConstructRef>) -> Self {
        Self {
            child: child.into(),
            pad: vec![0],
        }
    }

    pub fn pad(mut self, pad: impl Into<Vec<u8>>) -> Self {
        self.pad = pad.into();
        self
    }

    fn strip(&self, mut data: Vec<u8>) -> Vec<u8> {
        let unit = self.pad.len();
        if unit == 0 {
            return data;
        }
        // Only whole units aligned to the start are stripped.
        let mut end = data.len() - data.len() % unit;
        if end == data.len() {
            while end >= unit && data[end - unit..end] == self.pad[..] {
                end -= unit;
            }
            data.truncate(end);
        }
        data
    }
}

impl Construct for NullStripped {
    fn parse(&self, stream: &mut dyn Stream, ctx: &mut Context, path: &str) -> Result<Value> {
        let data = self.strip(stream::read_to_end(stream, path)?);
        let (value, _) = parse_slice(&*self.child, data, ctx, path)?;
        Ok(value)
    }

    fn build(
        &self,
        value: &Value,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        self.child.build(value, stream, ctx, path)
    }

    fn sizeof(&self, _ctx: &mut Context, path: &str) -> Result<usize> {
        Err(ErrorKind::SizeofUnknown("stripped data extends to the end of the stream".into()).at(path))
    }

    fn is_self_supplying(&self) -> bool {
        self.child.is_self_supplying()
    }
}

/// `child` together with the exact bytes it occupies.
///
/// The value is a container `{data, value, offset1, offset2, length}`. Build accepts
/// either `value` (built by the child) or `data` (written verbatim and parsed back).
#[derive(Debug, Clone)]
pub struct RawCopy {
    child: ConstructRef,
}

impl RawCopy {
    pub fn new(child: impl Into<ConstructRef>) -> Self {
        Self {
            child: child.into(),
        }
    }
}

fn raw_record(data: Vec<u8>, value: Value, offset1: u64, offset2: u64) -> Value {
    let mut c = Container::new();
    c.insert("length", Value::from(data.len()));
    c.insert("data", Value::Bytes(data));
    c.insert("value", value);
    c.insert("offset1", Value::from(offset1));
    c.insert("offset2", Value::from(offset2));
    Value::Container(c)
}

impl Construct for RawCopy {
    fn parse(&self, stream: &mut dyn Stream, ctx: &mut Context, path: &str) -> Result<Value> {
        let offset1 = stream::tell(stream, path)?;
        let value = parse_child(&*self.child, stream, ctx, path)?;
        let offset2 = stream::tell(stream, path)?;
        stream::seek(stream, SeekFrom::Start(offset1), path)?;
        let data = stream::read_exact(stream, (offset2 - offset1) as usize, path)?;
        Ok(raw_record(data, value, offset1, offset2))
    }

    fn build(
        &self,
        value: &Value,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        let input = container_input(value, path)?;
        let offset1 = stream::tell(stream, path)?;

        if let Some(inner) = input.get("value").filter(|v| !v.is_none()) {
            let built = build_child(&*self.child, inner, stream, ctx, path)?;
            let offset2 = stream::tell(stream, path)?;
            stream::seek(stream, SeekFrom::Start(offset1), path)?;
            let data = stream::read_exact(stream, (offset2 - offset1) as usize, path)?;
            return Ok(raw_record(data, built, offset1, offset2));
        }

        match input.get("data").and_then(Value::as_bytes) {
            Some(data) => {
                stream::write_all(stream, data, path)?;
                let offset2 = stream::tell(stream, path)?;
                let (parsed, _) = parse_slice(&*self.child, data.to_vec(), ctx, path)?;
                Ok(raw_record(data.to_vec(), parsed, offset1, offset2))
            }
            None => Err(ErrorKind::MissingField("value or data".into()).at(path)),
        }
    }

    fn sizeof(&self, ctx: &mut Context, path: &str) -> Result<usize> {
        self.child.sizeof(ctx, path)
    }
}

/// An invertible byte-to-byte transform applied by [`Transformed`].
pub trait ByteTransform: Send + Sync + fmt::Debug {
    fn decode(&self, data: &[u8], ctx: &Context, path: &str) -> Result<Vec<u8>>;
    fn encode(&self, data: &[u8], ctx: &Context, path: &str) -> Result<Vec<u8>>;
}

/// Reverses the byte order of the whole payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteSwapped;

impl ByteTransform for ByteSwapped {
    fn decode(&self, data: &[u8], _ctx: &Context, _path: &str) -> Result<Vec<u8>> {
        Ok(data.iter().rev().copied().collect())
    }

    fn encode(&self, data: &[u8], ctx: &Context, path: &str) -> Result<Vec<u8>> {
        self.decode(data, ctx, path)
    }
}

/// Reverses the bit order of the whole payload: last bit first.
#[derive(Debug, Clone, Copy, Default)]
pub struct BitsSwapped;

impl ByteTransform for BitsSwapped {
    fn decode(&self, data: &[u8], _ctx: &Context, _path: &str) -> Result<Vec<u8>> {
        let reversed: Vec<u8> = data.iter().rev().copied().collect();
        Ok(reverse_bits_per_byte(&reversed))
    }

    fn encode(&self, data: &[u8], ctx: &Context, path: &str) -> Result<Vec<u8>> {
        self.decode(data, ctx, path)
    }
}

/// XOR with a repeating key: an integer (one byte) or a byte string.
#[derive(Debug, Clone)]
pub struct ProcessXor {
    key: Expr,
}

impl ProcessXor {
    pub fn new(key: impl Into<Expr>) -> Self {
        Self { key: key.into() }
    }

    fn key(&self, ctx: &Context, path: &str) -> Result<Vec<u8>> {
        let key = match self.key.evaluate(ctx, path)? {
            Value::Int(k) => {
                let k = u8::try_from(k).map_err(|_| {
                    ErrorKind::FieldSize(format!("xor key {k} does not fit a byte")).at(path)
                })?;
                vec![k]
            }
            Value::Bytes(k) => k,
            other => {
                return Err(ErrorKind::TypeMismatch(format!(
                    "xor key must be an integer or bytes, found a {}",
                    other.type_name()
                ))
                .at(path));
            }
        };
        if key.is_empty() {
            return Err(ErrorKind::TypeMismatch("xor key is empty".into()).at(path));
        }
        Ok(key)
    }
}

impl ByteTransform for ProcessXor {
    fn decode(&self, data: &[u8], ctx: &Context, path: &str) -> Result<Vec<u8>> {
        let key = self.key(ctx, path)?;
        Ok(data
            .iter()
            .zip(key.iter().cycle())
            .map(|(b, k)| b ^ k)
            .collect())
    }

    fn encode(&self, data: &[u8], ctx: &Context, path: &str) -> Result<Vec<u8>> {
        self.decode(data, ctx, path)
    }
}

/// Rotates the bits of every `group`-byte block left by `amount` when decoding.
#[derive(Debug, Clone)]
pub struct ProcessRotateLeft {
    amount: Expr,
    group: usize,
}

impl ProcessRotateLeft {
    pub fn new(amount: impl Into<Expr>, group: usize) -> Self {
        Self {
            amount: amount.into(),
            group,
        }
    }

    fn rotate(&self, data: &[u8], ctx: &Context, path: &str, left: bool) -> Result<Vec<u8>> {
        if self.group == 0 || data.len() % self.group != 0 {
            return Err(ErrorKind::FieldSize(format!(
                "{} bytes do not divide into groups of {}",
                data.len(),
                self.group
            ))
            .at(path));
        }

        let width = self.group * 8;
        let amount = self.amount.evaluate_usize(ctx, path)? % width;
        let mut out = Vec::with_capacity(data.len());
        for chunk in data.chunks(self.group) {
            let mut bits = bytes_to_bits(chunk, BitOrder::MsbFirst);
            if left {
                bits.rotate_left(amount);
            } else {
                bits.rotate_right(amount);
            }
            out.extend(bits_to_bytes(&bits, BitOrder::MsbFirst));
        }
        Ok(out)
    }
}

impl ByteTransform for ProcessRotateLeft {
    fn decode(&self, data: &[u8], ctx: &Context, path: &str) -> Result<Vec<u8>> {
        self.rotate(data, ctx, path, true)
    }

    fn encode(&self, data: &[u8], ctx: &Context, path: &str) -> Result<Vec<u8>> {
        self.rotate(data, ctx, path, false)
    }
}

/// How much of the outer stream a [`Transformed`] takes.
#[derive(Debug, Clone)]
pub enum TransformSize {
    /// The child's static size.
    Child,
    /// Everything up to the end of the stream.
    Greedy,
    /// A size computed from the context.
    Fixed(Expr),
}

/// `child` parsed from bytes run through a [`ByteTransform`].
#[derive(Debug, Clone)]
pub struct Transformed {
    child: ConstructRef,
    transform: Arc<dyn ByteTransform>,
    size: TransformSize,
}

impl Transformed {
    pub fn new(
        child: impl Into<ConstructRef>,
        transform: impl ByteTransform + 'static,
        size: TransformSize,
    ) -> Self {
        Self {
            child: child.into(),
            transform: Arc::new(transform),
            size,
        }
    }

    fn fixed_size(&self, ctx: &mut Context, path: &str) -> Result<Option<usize>> {
        match &self.size {
            TransformSize::Child => self.child.sizeof(ctx, path).map(Some),
            TransformSize::Greedy => Ok(None),
            TransformSize::Fixed(n) => n.evaluate_usize(ctx, path).map(Some),
        }
    }
}

impl Construct for Transformed {
    fn parse(&self, stream: &mut dyn Stream, ctx: &mut Context, path: &str) -> Result<Value> {
        let data = match self.fixed_size(ctx, path)? {
            Some(n) => stream::read_exact(stream, n, path)?,
            None => stream::read_to_end(stream, path)?,
        };
        let decoded = self.transform.decode(&data, ctx, path)?;
        let (value, _) = parse_slice(&*self.child, decoded, ctx, path)?;
        Ok(value)
    }

    fn build(
        &self,
        value: &Value,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        let mark = ctx.deferred_mark();
        let mut scratch = stream::memory(Vec::new());
        let built = self.child.build(value, &mut scratch, ctx, path)?;
        // The transform scrambles offsets, so patches must land before encoding.
        ctx.resolve_deferred_since(mark, &mut scratch, true)?;

        let encoded = self.transform.encode(&scratch.into_inner(), ctx, path)?;
        if let Some(n) = self.fixed_size(ctx, path)? {
            if encoded.len() != n {
                return Err(ErrorKind::FieldSize(format!(
                    "transformed payload is {} bytes, expected {n}",
                    encoded.len()
                ))
                .at(path));
            }
        }
        stream::write_all(stream, &encoded, path)?;
        Ok(built)
    }

    fn sizeof(&self, ctx: &mut Context, path: &str) -> Result<usize> {
        match &self.size {
            TransformSize::Child => self.child.sizeof(ctx, path),
            TransformSize::Greedy => Err(ErrorKind::SizeofUnknown(
                "transformed payload extends to the end of the stream".into(),
            )
            .at(path)),
            TransformSize::Fixed(n) => crate::construct::static_count(n, ctx, path),
        }
    }

    fn is_self_supplying(&self) -> bool {
        self.child.is_self_supplying()
    }
}

/// `child` driven over a re-encoded view of the stream.
#[derive(Debug, Clone)]
pub struct Restreamed {
    child: ConstructRef,
    recode: Arc<dyn Recode>,
    check_entry: bool,
}

impl Restreamed {
    pub fn new(child: impl Into<ConstructRef>, recode: impl Recode + 'static) -> Self {
        Self {
            child: child.into(),
            recode: Arc::new(recode),
            check_entry: false,
        }
    }

    fn check_aligned(&self, stream: &mut dyn Stream, path: &str) -> Result<()> {
        let (outer, _) = self.recode.units();
        if !self.check_entry || outer <= 1 {
            return Ok(());
        }
        let pos = stream::tell(stream, path)?;
        if pos % outer as u64 != 0 {
            return Err(ErrorKind::StreamUnaligned(format!(
                "entered at unit {pos}, not a multiple of {outer}"
            ))
            .at(path));
        }
        Ok(())
    }
}

impl Construct for Restreamed {
    fn parse(&self, stream: &mut dyn Stream, ctx: &mut Context, path: &str) -> Result<Value> {
        self.check_aligned(stream, path)?;
        let start = stream::tell(stream, path)?;
        let result = {
            let mut view = Restream::new(stream, &*self.recode);
            self.child
                .parse(&mut view, ctx, path)
                .and_then(|value| view.finish(path).map(|()| value))
        };
        if result.is_err() {
            stream::seek(stream, SeekFrom::Start(start), path)?;
        }
        result
    }

    fn build(
        &self,
        value: &Value,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        self.check_aligned(stream, path)?;
        let start = stream::tell(stream, path)?;
        let mark = ctx.deferred_mark();
        let result = {
            let mut view = Restream::new(stream, &*self.recode);
            self.child
                .build(value, &mut view, ctx, path)
                .and_then(|built| {
                    ctx.resolve_deferred_since(mark, &mut view, true)?;
                    view.finish(path).map(|()| built)
                })
        };
        if result.is_err() {
            stream::seek(stream, SeekFrom::Start(start), path)?;
        }
        result
    }

    fn sizeof(&self, ctx: &mut Context, path: &str) -> Result<usize> {
        let (outer, inner) = self.recode.units();
        let units = self.child.sizeof(ctx, path)?;
        if units % inner != 0 {
            return Err(ErrorKind::StreamUnaligned(format!(
                "child size {units} is not a multiple of {inner}"
            ))
            .at(path));
        }
        Ok(units / inner * outer)
    }

    fn is_self_supplying(&self) -> bool {
        self.child.is_self_supplying()
    }
}

/// `child` over a bit stream: every byte of the outer stream becomes eight bit units.
pub fn bitwise(child: impl Into<ConstructRef>) -> ConstructRef {
    Restreamed::new(child, BitsRecode(BitOrder::MsbFirst)).into()
}

/// `child` over whole bytes regained from an enclosing bit stream. Entering at a bit
/// offset that is not a multiple of eight fails with a stream-unaligned error.
pub fn bytewise(child: impl Into<ConstructRef>) -> ConstructRef {
    let mut restreamed = Restreamed::new(child, BytesRecode(BitOrder::MsbFirst));
    restreamed.check_entry = true;
    restreamed.into()
}

impl_into_ref!(
    Prefixed,
    FixedSized,
    NullTerminated,
    NullStripped,
    RawCopy,
    Transformed,
    Restreamed
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::{BitsInteger, GreedyBytes, bits, bytes, flag, nibble, u16_be, u32_be, u8};
    use crate::repeaters::GreedyRange;
    use crate::structs::{Struct, field};
    use crate::{ConstructExt, container};

    #[test]
    fn test_prefixed() {
        let p = Prefixed::new(u8(), GreedyRange::new(u16_be()));
        assert_eq!(
            p.parse_bytes(&[4, 0, 1, 0, 2, 0xFF]).unwrap(),
            Value::from(vec![Value::from(1), Value::from(2)])
        );
        let built = p.build_bytes(&Value::from(vec![Value::from(1), Value::from(2)])).unwrap();
        assert_eq!(built, vec![4, 0, 1, 0, 2]);
    }

    #[test]
    fn test_prefixed_include_length() {
        let p = Prefixed::new(u16_be(), GreedyBytes).include_length();
        assert_eq!(p.build_bytes(&Value::Bytes(vec![9])).unwrap(), vec![0, 3, 9]);
        assert_eq!(p.parse_bytes(&[0, 3, 9]).unwrap(), Value::Bytes(vec![9]));
    }

    #[test]
    fn test_prefixed_unconsumed() {
        let strict = Prefixed::new(u8(), u8());
        assert!(matches!(
            strict.parse_bytes(&[2, 1, 2]).unwrap_err().kind,
            ErrorKind::UnconsumedBytes(_)
        ));
        let lenient = Prefixed::new(u8(), u8()).allow_unconsumed();
        assert_eq!(lenient.parse_bytes(&[2, 1, 2]).unwrap(), Value::Int(1));
    }

    #[test]
    fn test_fixed_sized() {
        let f = FixedSized::new(4, GreedyBytes);
        assert_eq!(f.parse_bytes(&[1, 2, 3, 4, 5]).unwrap(), Value::Bytes(vec![1, 2, 3, 4]));
        assert_eq!(f.build_bytes(&Value::Bytes(vec![1, 2])).unwrap(), vec![1, 2, 0, 0]);
        assert!(matches!(
            f.build_bytes(&Value::Bytes(vec![0; 5])).unwrap_err().kind,
            ErrorKind::FieldSize(_)
        ));
    }

    #[test]
    fn test_null_terminated() {
        let s = Struct::new([field("a", NullTerminated::new(GreedyBytes)), field("b", u8())]);
        assert_eq!(
            s.parse_bytes(b"hi\x00\x07").unwrap(),
            container! { "a" => b"hi", "b" => 7 }
        );
        assert_eq!(
            s.build_bytes(&container! { "a" => b"hi", "b" => 7 }).unwrap(),
            b"hi\x00\x07".to_vec()
        );

        let kept = NullTerminated::new(GreedyBytes).include().keep();
        let mut stream = stream::memory(b"ab\x00".to_vec());
        let mut ctx = Context::default();
        assert_eq!(kept.parse(&mut stream, &mut ctx, "this").unwrap(), Value::from(b"ab\x00"));
        assert_eq!(stream::tell(&mut stream, "this").unwrap(), 2);
    }

    #[test]
    fn test_null_terminated_eof() {
        let nt = NullTerminated::new(GreedyBytes);
        assert!(matches!(
            nt.parse_bytes(b"abc").unwrap_err().kind,
            ErrorKind::TerminatorNotFound(_)
        ));
        let lenient = NullTerminated::new(GreedyBytes).optional_term();
        assert_eq!(lenient.parse_bytes(b"abc").unwrap(), Value::from(b"abc"));
    }

    #[test]
    fn test_null_stripped() {
        let ns = NullStripped::new(GreedyBytes);
        assert_eq!(ns.parse_bytes(&[1, 2, 0, 0]).unwrap(), Value::Bytes(vec![1, 2]));
        let wide = NullStripped::new(GreedyBytes).pad(vec![0, 0]);
        assert_eq!(wide.parse_bytes(&[1, 0, 0, 0]).unwrap(), Value::Bytes(vec![1, 0]));
    }

    #[test]
    fn test_raw_copy() {
        let s = Struct::new([field("pre", u8()), field("raw", RawCopy::new(u16_be()))]);
        let parsed = s.parse_bytes(&[9, 1, 2]).unwrap();
        assert_eq!(
            parsed.attr("raw").unwrap(),
            container! {
                "length" => 2,
                "data" => vec![1u8, 2],
                "value" => 0x0102,
                "offset1" => 1,
                "offset2" => 3,
            }
        );

        let from_value = container! { "pre" => 9, "raw" => container! { "value" => 0x0102 } };
        assert_eq!(s.build_bytes(&from_value).unwrap(), vec![9, 1, 2]);
        let from_data = container! { "pre" => 9, "raw" => container! { "data" => vec![1u8, 2] } };
        assert_eq!(s.build_bytes(&from_data).unwrap(), vec![9, 1, 2]);
    }

    #[test]
    fn test_transforms() {
        let swapped = Transformed::new(u32_be(), ByteSwapped, TransformSize::Child);
        assert_eq!(swapped.parse_bytes(&[1, 0, 0, 0]).unwrap(), Value::Int(1));
        assert_eq!(swapped.build_bytes(&Value::Int(1)).unwrap(), vec![1, 0, 0, 0]);

        let xor = Transformed::new(bytes(3), ProcessXor::new(vec![0xFFu8, 0x00]), TransformSize::Child);
        assert_eq!(xor.parse_bytes(&[0x0F, 0x0F, 0x0F]).unwrap(), Value::from(vec![0xF0u8, 0x0F, 0xF0]));

        let rotated = Transformed::new(u8(), ProcessRotateLeft::new(4, 1), TransformSize::Fixed(1.into()));
        assert_eq!(rotated.parse_bytes(&[0x12]).unwrap(), Value::Int(0x21));
        assert_eq!(rotated.build_bytes(&Value::Int(0x21)).unwrap(), vec![0x12]);

        let bits_swapped = Transformed::new(u16_be(), BitsSwapped, TransformSize::Child);
        assert_eq!(bits_swapped.parse_bytes(&[0x00, 0x01]).unwrap(), Value::Int(0x8000));
    }

    #[test]
    fn test_bitwise() {
        let s = bitwise(Struct::new([
            field("hi", nibble()),
            field("flag", flag()),
            field("rest", bits(11)),
        ]));
        let parsed = s.parse_bytes(&[0xA8, 0x05]).unwrap();
        assert_eq!(parsed, container! { "hi" => 0xA, "flag" => true, "rest" => 5 });
        assert_eq!(s.build_bytes(&parsed).unwrap(), vec![0xA8, 0x05]);
        assert_eq!(s.static_size().unwrap(), 2);
    }

    #[test]
    fn test_bitwise_failure_restores_position() {
        let format = bitwise(bits(16));
        let mut input = stream::memory(vec![0xAB]);
        let err = format
            .parse(&mut input, &mut Context::default(), "this")
            .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::StreamUnderflow(_)));
        assert_eq!(stream::tell(&mut input, "this").unwrap(), 0);
    }

    #[test]
    fn test_bitwise_unaligned_size() {
        let s = bitwise(BitsInteger::new(3, false));
        assert!(matches!(s.static_size().unwrap_err().kind, ErrorKind::StreamUnaligned(_)));
    }

    #[test]
    fn test_bytewise_inside_bitwise() {
        let s = bitwise(Struct::new([field("hi", nibble()), field("lo", nibble()), field("b", bytewise(u8()))]));
        assert_eq!(
            s.parse_bytes(&[0x12, 0x34]).unwrap(),
            container! { "hi" => 1, "lo" => 2, "b" => 0x34 }
        );

        let unaligned = bitwise(Struct::new([field("hi", nibble()), field("b", bytewise(u8()))]));
        assert!(matches!(
            unaligned.parse_bytes(&[0x12, 0x34]).unwrap_err().kind,
            ErrorKind::StreamUnaligned(_)
        ));
    }
}
