//! Position control: out-of-band access, look-ahead, explicit seeks, padding and alignment.

use std::io::SeekFrom;

use crate::construct::{ConstructRef, impl_into_ref, parse_child, static_count};
use crate::context::Context;
use crate::errors::{ErrorKind, Result};
use crate::expr::Expr;
use crate::stream::{self, Stream};
use crate::value::Value;
use crate::Construct;

fn seek_target(offset: i128, whence: Whence, path: &str) -> Result<SeekFrom> {
    let out_of_range = || ErrorKind::FieldSize(format!("offset {offset} is out of range")).at(path);
    let signed = || i64::try_from(offset).map_err(|_| out_of_range());
    Ok(match whence {
        Whence::Start if offset < 0 => SeekFrom::End(signed()?),
        Whence::Start => SeekFrom::Start(u64::try_from(offset).map_err(|_| out_of_range())?),
        Whence::Current => SeekFrom::Current(signed()?),
        Whence::End => SeekFrom::End(signed()?),
    })
}

/// Parses or builds `child` at an absolute offset, then returns to where it was.
///
/// A negative offset counts back from the end of the stream. The position is restored
/// even when the child fails.
#[derive(Debug, Clone)]
pub struct Pointer {
    offset: Expr,
    child: ConstructRef,
}

impl Pointer {
    pub fn new(offset: impl Into<Expr>, child: impl Into<ConstructRef>) -> Self {
        Self {
            offset: offset.into(),
            child: child.into(),
        }
    }

    fn at_offset<T>(
        &self,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
        f: impl FnOnce(&mut dyn Stream, &mut Context) -> Result<T>,
    ) -> Result<T> {
        let offset = self.offset.evaluate_int(ctx, path)?;
        let back = stream::tell(stream, path)?;
        stream::seek(stream, seek_target(offset, Whence::Start, path)?, path)?;
        let result = f(stream, ctx);
        stream::seek(stream, SeekFrom::Start(back), path)?;
        result
    }
}

impl Construct for Pointer {
    fn parse(&self, stream: &mut dyn Stream, ctx: &mut Context, path: &str) -> Result<Value> {
        self.at_offset(stream, ctx, path, |stream, ctx| {
            parse_child(&*self.child, stream, ctx, path)
        })
    }

    fn build(
        &self,
        value: &Value,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        self.at_offset(stream, ctx, path, |stream, ctx| {
            crate::construct::build_child(&*self.child, value, stream, ctx, path)
        })
    }

    fn sizeof(&self, _ctx: &mut Context, _path: &str) -> Result<usize> {
        Ok(0)
    }

    fn is_self_supplying(&self) -> bool {
        self.child.is_self_supplying()
    }
}

/// Parses `child` without consuming it. Builds write nothing.
#[derive(Debug, Clone)]
pub struct Peek {
    child: ConstructRef,
}

impl Peek {
    pub fn new(child: impl Into<ConstructRef>) -> Self {
        Self {
            child: child.into(),
        }
    }
}

impl Construct for Peek {
    fn parse(&self, stream: &mut dyn Stream, ctx: &mut Context, path: &str) -> Result<Value> {
        let start = stream::tell(stream, path)?;
        let result = parse_child(&*self.child, stream, ctx, path);
        stream::seek(stream, SeekFrom::Start(start), path)?;

        match result {
            Ok(value) => Ok(value),
            Err(e) if e.is_explicit() => Err(e),
            Err(e) => {
                tracing::trace!(path = path, error = %e, "peek failed, yielding nothing");
                Ok(Value::None)
            }
        }
    }

    fn build(
        &self,
        value: &Value,
        _stream: &mut dyn Stream,
        _ctx: &mut Context,
        _path: &str,
    ) -> Result<Value> {
        Ok(value.clone())
    }

    fn sizeof(&self, _ctx: &mut Context, _path: &str) -> Result<usize> {
        Ok(0)
    }

    fn is_self_supplying(&self) -> bool {
        true
    }
}

/// Reference point of a [`Seek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Whence {
    #[default]
    Start,
    Current,
    End,
}

/// Moves the stream position; the value is the new absolute position.
#[derive(Debug, Clone)]
pub struct Seek {
    offset: Expr,
    whence: Whence,
}

impl Seek {
    pub fn new(offset: impl Into<Expr>, whence: Whence) -> Self {
        Self {
            offset: offset.into(),
            whence,
        }
    }

    fn apply(&self, stream: &mut dyn Stream, ctx: &Context, path: &str) -> Result<Value> {
        let offset = self.offset.evaluate_int(ctx, path)?;
        let pos = stream::seek(stream, seek_target(offset, self.whence, path)?, path)?;
        Ok(Value::from(pos))
    }
}

impl Construct for Seek {
    fn parse(&self, stream: &mut dyn Stream, ctx: &mut Context, path: &str) -> Result<Value> {
        self.apply(stream, ctx, path)
    }

    fn build(
        &self,
        _value: &Value,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        self.apply(stream, ctx, path)
    }

    fn sizeof(&self, _ctx: &mut Context, path: &str) -> Result<usize> {
        Err(ErrorKind::SizeofUnknown("seek moves the stream arbitrarily".into()).at(path))
    }

    fn is_self_supplying(&self) -> bool {
        true
    }
}

/// The current stream position, stored under the field's name.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tell;

impl Construct for Tell {
    fn parse(&self, stream: &mut dyn Stream, _ctx: &mut Context, path: &str) -> Result<Value> {
        Ok(Value::from(stream::tell(stream, path)?))
    }

    fn build(
        &self,
        _value: &Value,
        stream: &mut dyn Stream,
        _ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        Ok(Value::from(stream::tell(stream, path)?))
    }

    fn sizeof(&self, _ctx: &mut Context, _path: &str) -> Result<usize> {
        Ok(0)
    }

    fn is_self_supplying(&self) -> bool {
        true
    }
}

/// Fill bytes: a repeated pattern, checked on parse only in strict mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Fill {
    pub pattern: u8,
    pub strict: bool,
}

impl Fill {
    fn skip(&self, stream: &mut dyn Stream, n: usize, path: &str) -> Result<()> {
        let data = stream::read_exact(stream, n, path)?;
        if self.strict {
            if let Some(i) = data.iter().position(|b| *b != self.pattern) {
                return Err(ErrorKind::Padding(format!(
                    "expected {:#04x} padding, found {:#04x} at byte {i}",
                    self.pattern, data[i]
                ))
                .at(path));
            }
        }
        Ok(())
    }

    fn emit(&self, stream: &mut dyn Stream, n: usize, path: &str) -> Result<()> {
        stream::write_all(stream, &vec![self.pattern; n], path)
    }
}

/// `n` bytes of padding; the value is absence.
#[derive(Debug, Clone)]
pub struct Padding {
    length: Expr,
    fill: Fill,
}

impl Padding {
    pub fn new(length: impl Into<Expr>) -> Self {
        Self {
            length: length.into(),
            fill: Fill::default(),
        }
    }

    pub fn pattern(mut self, pattern: u8) -> Self {
        self.fill.pattern = pattern;
        self
    }

    /// Verify the pattern when parsing.
    pub fn strict(mut self) -> Self {
        self.fill.strict = true;
        self
    }
}

impl Construct for Padding {
    fn parse(&self, stream: &mut dyn Stream, ctx: &mut Context, path: &str) -> Result<Value> {
        let n = self.length.evaluate_usize(ctx, path)?;
        self.fill.skip(stream, n, path)?;
        Ok(Value::None)
    }

    fn build(
        &self,
        _value: &Value,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        let n = self.length.evaluate_usize(ctx, path)?;
        self.fill.emit(stream, n, path)?;
        Ok(Value::None)
    }

    fn sizeof(&self, ctx: &mut Context, path: &str) -> Result<usize> {
        static_count(&self.length, ctx, path)
    }

    fn is_self_supplying(&self) -> bool {
        true
    }
}

fn remainder(total: usize, used: u64, path: &str) -> Result<usize> {
    (total as u64)
        .checked_sub(used)
        .map(|r| r as usize)
        .ok_or_else(|| {
            ErrorKind::Padding(format!("child used {used} bytes of a {total}-byte block")).at(path)
        })
}

/// `child` followed by padding up to a total of `n` bytes.
#[derive(Debug, Clone)]
pub struct Padded {
    length: Expr,
    child: ConstructRef,
    fill: Fill,
}

impl Padded {
    pub fn new(length: impl Into<Expr>, child: impl Into<ConstructRef>) -> Self {
        Self {
            length: length.into(),
            child: child.into(),
            fill: Fill::default(),
        }
    }

    pub fn pattern(mut self, pattern: u8) -> Self {
        self.fill.pattern = pattern;
        self
    }

    pub fn strict(mut self) -> Self {
        self.fill.strict = true;
        self
    }
}

impl Construct for Padded {
    fn parse(&self, stream: &mut dyn Stream, ctx: &mut Context, path: &str) -> Result<Value> {
        let n = self.length.evaluate_usize(ctx, path)?;
        let start = stream::tell(stream, path)?;
        let value = self.child.parse(stream, ctx, path)?;
        let used = stream::tell(stream, path)? - start;
        self.fill.skip(stream, remainder(n, used, path)?, path)?;
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
        let start = stream::tell(stream, path)?;
        let built = self.child.build(value, stream, ctx, path)?;
        let used = stream::tell(stream, path)? - start;
        self.fill.emit(stream, remainder(n, used, path)?, path)?;
        Ok(built)
    }

    fn sizeof(&self, ctx: &mut Context, path: &str) -> Result<usize> {
        static_count(&self.length, ctx, path)
    }

    fn is_self_supplying(&self) -> bool {
        self.child.is_self_supplying()
    }
}

/// `child` followed by padding to the next multiple of `modulus`, counted from the
/// start of the block.
#[derive(Debug, Clone)]
pub struct Aligned {
    modulus: Expr,
    child: ConstructRef,
    fill: Fill,
}

impl Aligned {
    pub fn new(modulus: impl Into<Expr>, child: impl Into<ConstructRef>) -> Self {
        Self {
            modulus: modulus.into(),
            child: child.into(),
            fill: Fill::default(),
        }
    }

    pub fn pattern(mut self, pattern: u8) -> Self {
        self.fill.pattern = pattern;
        self
    }

    fn modulus(&self, ctx: &Context, path: &str) -> Result<usize> {
        match self.modulus.evaluate_usize(ctx, path)? {
            0 => Err(ErrorKind::Padding("alignment modulus must be positive".into()).at(path)),
            m => Ok(m),
        }
    }
}

fn pad_to(used: usize, modulus: usize) -> usize {
    (modulus - used % modulus) % modulus
}

impl Construct for Aligned {
    fn parse(&self, stream: &mut dyn Stream, ctx: &mut Context, path: &str) -> Result<Value> {
        let modulus = self.modulus(ctx, path)?;
        let start = stream::tell(stream, path)?;
        let value = self.child.parse(stream, ctx, path)?;
        let used = (stream::tell(stream, path)? - start) as usize;
        self.fill.skip(stream, pad_to(used, modulus), path)?;
        Ok(value)
    }

    fn build(
        &self,
        value: &Value,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        let modulus = self.modulus(ctx, path)?;
        let start = stream::tell(stream, path)?;
        let built = self.child.build(value, stream, ctx, path)?;
        let used = (stream::tell(stream, path)? - start) as usize;
        self.fill.emit(stream, pad_to(used, modulus), path)?;
        Ok(built)
    }

    fn sizeof(&self, ctx: &mut Context, path: &str) -> Result<usize> {
        let modulus = static_count(&self.modulus, ctx, path)?.max(1);
        let used = self.child.sizeof(ctx, path)?;
        Ok(used + pad_to(used, modulus))
    }

    fn is_self_supplying(&self) -> bool {
        self.child.is_self_supplying()
    }
}

impl_into_ref!(Pointer, Peek, Seek, Tell, Padding, Padded, Aligned);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::this;
    use crate::envelopes::bitwise;
    use crate::primitives::{bits, bytes, u16_be, u8};
    use crate::structs::{Struct, field};
    use crate::{ConstructExt, container};

    #[test]
    fn test_pointer_restores_position() {
        let s = Struct::new([
            field("at", u8()),
            field("far", Pointer::new(this("at"), u16_be())),
            field("next", u8()),
        ]);
        let parsed = s.parse_bytes(&[3, 9, 0, 0, 7]).unwrap();
        assert_eq!(parsed, container! { "at" => 3, "far" => 7, "next" => 9 });
        assert_eq!(s.static_size().unwrap(), 2);
    }

    #[test]
    fn test_pointer_restores_position_on_failure() {
        let p = Pointer::new(100, u8());
        let mut stream = stream::memory(vec![1, 2]);
        let mut ctx = Context::default();
        stream::seek(&mut stream, SeekFrom::Start(1), "this").unwrap();
        assert!(p.parse(&mut stream, &mut ctx, "this").is_err());
        assert_eq!(stream::tell(&mut stream, "this").unwrap(), 1);
    }

    #[test]
    fn test_offset_out_of_range() {
        let err = Pointer::new(i128::MAX, u8()).parse_bytes(&[1]).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::FieldSize(_)));
        let err = Seek::new(i128::MIN, Whence::Current).parse_bytes(&[1]).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::FieldSize(_)));
    }

    #[test]
    fn test_pointer_past_end_of_bit_stream() {
        let format = bitwise(Pointer::new(64, bits(8)));
        let err = format.parse_bytes(&[0xAB]).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::StreamUnderflow(_)));
    }

    #[test]
    fn test_pointer_build_writes_out_of_band() {
        let s = Struct::new([field("a", u8()), field("b", Pointer::new(4, u8()))]);
        let out = s.build_bytes(&container! { "a" => 1, "b" => 2 }).unwrap();
        assert_eq!(out, vec![1, 0, 0, 0, 2]);
    }

    #[test]
    fn test_peek() {
        let s = Struct::new([field("ahead", Peek::new(u16_be())), field("a", u8()), field("b", u8())]);
        assert_eq!(
            s.parse_bytes(&[1, 2]).unwrap(),
            container! { "ahead" => 0x0102, "a" => 1, "b" => 2 }
        );
        assert_eq!(s.build_bytes(&container! { "a" => 1, "b" => 2 }).unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_seek_and_tell() {
        let s = Struct::new([
            field("skip", Seek::new(2, Whence::Current)),
            field("here", Tell),
            field("v", u8()),
        ]);
        assert_eq!(
            s.parse_bytes(&[0, 0, 5]).unwrap(),
            container! { "skip" => 2, "here" => 2, "v" => 5 }
        );
    }

    #[test]
    fn test_padding_strict() {
        let lenient = Padding::new(2).pattern(0xAA);
        assert_eq!(lenient.parse_bytes(&[1, 2]).unwrap(), Value::None);
        assert_eq!(lenient.build_bytes(&Value::None).unwrap(), vec![0xAA, 0xAA]);

        let strict = Padding::new(2).strict();
        assert!(matches!(
            strict.parse_bytes(&[0, 1]).unwrap_err().kind,
            ErrorKind::Padding(_)
        ));
    }

    #[test]
    fn test_padded() {
        let p = Padded::new(4, u16_be());
        assert_eq!(p.parse_bytes(&[0, 5, 0, 0]).unwrap(), Value::Int(5));
        assert_eq!(p.build_bytes(&Value::Int(5)).unwrap(), vec![0, 5, 0, 0]);
        assert_eq!(p.static_size().unwrap(), 4);

        let too_small = Padded::new(1, u16_be());
        assert!(matches!(
            too_small.build_bytes(&Value::Int(5)).unwrap_err().kind,
            ErrorKind::Padding(_)
        ));
    }

    #[test]
    fn test_aligned_from_block_start() {
        let s = Struct::new([field("a", u8()), field("b", Aligned::new(4, bytes(5))), field("c", u8())]);
        let data = [1, 2, 2, 2, 2, 2, 0, 0, 0, 3];
        let parsed = s.parse_bytes(&data).unwrap();
        assert_eq!(parsed.attr("c").unwrap(), Value::Int(3));
        assert_eq!(s.static_size().unwrap(), 10);
        assert_eq!(s.build_bytes(&parsed).unwrap(), data.to_vec());
    }
}
