//! Text fields and their encodings.

use crate::construct::{self, ConstructRef, build_child, impl_into_ref, parse_child};
use crate::context::Context;
use crate::errors::{ErrorKind, Result};
use crate::expr::Expr;
use crate::stream::{self, Stream};
use crate::value::Value;
use crate::Construct;

/// Character encoding of a string field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Encoding {
    #[default]
    Utf8,
    Utf16Le,
    Utf16Be,
    Utf32Le,
    Utf32Be,
    /// Every byte must be in `0..=0x7F`.
    Ascii,
    /// ISO 8859-1: bytes map one-to-one onto U+0000..=U+00FF.
    Latin1,
}

impl Encoding {
    /// Width in bytes of one code unit.
    pub fn unit(self) -> usize {
        match self {
            Encoding::Utf16Le | Encoding::Utf16Be => 2,
            Encoding::Utf32Le | Encoding::Utf32Be => 4,
            _ => 1,
        }
    }

    /// The all-zero code unit that terminates C strings.
    pub fn null(self) -> Vec<u8> {
        vec![0; self.unit()]
    }

    pub fn decode(self, data: &[u8]) -> std::result::Result<String, String> {
        let misaligned = || format!("{} bytes is not a whole number of {}-byte units", data.len(), self.unit());

        match self {
            Encoding::Utf8 => String::from_utf8(data.to_vec())
                .map_err(|e| format!("invalid utf-8 at byte {}", e.utf8_error().valid_up_to())),
            Encoding::Ascii => match data.iter().position(|b| !b.is_ascii()) {
                Some(i) => Err(format!("non-ascii byte {:#04x} at {i}", data[i])),
                None => Ok(data.iter().map(|&b| char::from(b)).collect()),
            },
            Encoding::Latin1 => Ok(data.iter().map(|&b| char::from(b)).collect()),
            Encoding::Utf16Le | Encoding::Utf16Be => {
                if data.len() % 2 != 0 {
                    return Err(misaligned());
                }
                let units = data.chunks_exact(2).map(|c| {
                    if self == Encoding::Utf16Le {
                        u16::from_le_bytes([c[0], c[1]])
                    } else {
                        u16::from_be_bytes([c[0], c[1]])
                    }
                });
                char::decode_utf16(units)
                    .collect::<std::result::Result<String, _>>()
                    .map_err(|e| format!("unpaired surrogate {:#06x}", e.unpaired_surrogate()))
            }
            Encoding::Utf32Le | Encoding::Utf32Be => {
                if data.len() % 4 != 0 {
                    return Err(misaligned());
                }
                data.chunks_exact(4)
                    .map(|c| {
                        let b = [c[0], c[1], c[2], c[3]];
                        let cp = if self == Encoding::Utf32Le {
                            u32::from_le_bytes(b)
                        } else {
                            u32::from_be_bytes(b)
                        };
                        char::from_u32(cp).ok_or_else(|| format!("invalid code point {cp:#x}"))
                    })
                    .collect()
            }
        }
    }

    pub fn encode(self, text: &str) -> std::result::Result<Vec<u8>, String> {
        match self {
            Encoding::Utf8 => Ok(text.as_bytes().to_vec()),
            Encoding::Ascii | Encoding::Latin1 => {
                let limit = if self == Encoding::Ascii { 0x7f } else { 0xff };
                text.chars()
                    .map(|c| {
                        u8::try_from(u32::from(c))
                            .ok()
                            .filter(|&b| u32::from(b) <= limit)
                            .ok_or_else(|| format!("{c:?} cannot be encoded as {self:?}"))
                    })
                    .collect()
            }
            Encoding::Utf16Le => Ok(text.encode_utf16().flat_map(u16::to_le_bytes).collect()),
            Encoding::Utf16Be => Ok(text.encode_utf16().flat_map(u16::to_be_bytes).collect()),
            Encoding::Utf32Le => Ok(text.chars().flat_map(|c| u32::from(c).to_le_bytes()).collect()),
            Encoding::Utf32Be => Ok(text.chars().flat_map(|c| u32::from(c).to_be_bytes()).collect()),
        }
    }
}

fn decode(encoding: Encoding, data: &[u8], path: &str) -> Result<Value> {
    encoding
        .decode(data)
        .map(Value::Str)
        .map_err(|e| ErrorKind::StringEncoding(e).at(path))
}

fn encode(encoding: Encoding, value: &Value, path: &str) -> Result<Vec<u8>> {
    let text = value.as_str().ok_or_else(|| {
        ErrorKind::TypeMismatch(format!("expected a str, found a {}", value.type_name())).at(path)
    })?;
    encoding
        .encode(text)
        .map_err(|e| ErrorKind::StringEncoding(e).at(path))
}

/// Where padding goes when a string is shorter than its field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PadDir {
    Left,
    #[default]
    Right,
    Center,
}

/// Which end is cut when a string is longer than its field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrimDir {
    Left,
    #[default]
    Right,
}

/// A string stored in exactly `length` bytes, padded with a fill character.
#[derive(Debug, Clone)]
pub struct FixedString {
    length: Expr,
    encoding: Encoding,
    pad: char,
    pad_dir: PadDir,
    trim_dir: Option<TrimDir>,
}

impl FixedString {
    /// Null-padded on the right; oversized input fails.
    pub fn new(length: impl Into<Expr>, encoding: Encoding) -> Self {
        Self {
            length: length.into(),
            encoding,
            pad: '\0',
            pad_dir: PadDir::Right,
            trim_dir: None,
        }
    }

    pub fn pad(mut self, pad: char, dir: PadDir) -> Self {
        self.pad = pad;
        self.pad_dir = dir;
        self
    }

    /// Truncates oversized input instead of failing.
    pub fn trim(mut self, dir: TrimDir) -> Self {
        self.trim_dir = Some(dir);
        self
    }

    fn pad_unit(&self, path: &str) -> Result<Vec<u8>> {
        let unit = self
            .encoding
            .encode(self.pad.encode_utf8(&mut [0; 4]))
            .map_err(|e| ErrorKind::StringEncoding(e).at(path))?;
        if unit.len() != self.encoding.unit() {
            return Err(ErrorKind::StringEncoding(format!(
                "pad character {:?} is not a single code unit",
                self.pad
            ))
            .at(path));
        }
        Ok(unit)
    }
}

fn strip_units<'a>(mut data: &'a [u8], unit: &[u8], dir: PadDir) -> &'a [u8] {
    if matches!(dir, PadDir::Right | PadDir::Center) {
        while data.len() >= unit.len() && data.ends_with(unit) {
            data = &data[..data.len() - unit.len()];
        }
    }
    if matches!(dir, PadDir::Left | PadDir::Center) {
        while data.len() >= unit.len() && data.starts_with(unit) {
            data = &data[unit.len()..];
        }
    }
    data
}

impl Construct for FixedString {
    fn parse(&self, stream: &mut dyn Stream, ctx: &mut Context, path: &str) -> Result<Value> {
        let n = self.length.evaluate_usize(ctx, path)?;
        let data = stream::read_exact(stream, n, path)?;
        let unit = self.pad_unit(path)?;
        decode(self.encoding, strip_units(&data, &unit, self.pad_dir), path)
    }

    fn build(
        &self,
        value: &Value,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        let n = self.length.evaluate_usize(ctx, path)?;
        let unit = self.pad_unit(path)?;
        let mut data = encode(self.encoding, value, path)?;

        if data.len() > n {
            let keep = n - n % unit.len();
            match self.trim_dir {
                Some(TrimDir::Right) => data.truncate(keep),
                Some(TrimDir::Left) => data = data.split_off(data.len() - keep),
                None => {
                    return Err(ErrorKind::StringEncoding(format!(
                        "encoded string is {} bytes, field holds {n}",
                        data.len()
                    ))
                    .at(path));
                }
            }
        }

        let missing = (n - data.len()) / unit.len();
        let (left, right) = match self.pad_dir {
            PadDir::Left => (missing, 0),
            PadDir::Right => (0, missing),
            PadDir::Center => (missing / 2, missing - missing / 2),
        };
        let mut out = unit.repeat(left);
        out.extend(&data);
        out.extend(unit.repeat(right));
        out.resize(n, 0);

        stream::write_all(stream, &out, path)?;
        Ok(value.clone())
    }

    fn sizeof(&self, ctx: &mut Context, path: &str) -> Result<usize> {
        construct::static_count(&self.length, ctx, path)
    }
}

/// A byte-count prefix followed by the encoded string.
#[derive(Debug, Clone)]
pub struct PrefixedString {
    length: ConstructRef,
    encoding: Encoding,
}

impl PrefixedString {
    pub fn new(length: impl Into<ConstructRef>, encoding: Encoding) -> Self {
        Self {
            length: length.into(),
            encoding,
        }
    }
}

impl Construct for PrefixedString {
    fn parse(&self, stream: &mut dyn Stream, ctx: &mut Context, path: &str) -> Result<Value> {
        let n = parse_child(&*self.length, stream, ctx, path)?;
        let n = n
            .as_int()
            .filter(|n| *n >= 0)
            .ok_or_else(|| ErrorKind::FieldSize(format!("invalid string length {n:?}")).at(path))?;
        let data = stream::read_exact(stream, n as usize, path)?;
        decode(self.encoding, &data, path)
    }

    fn build(
        &self,
        value: &Value,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        let data = encode(self.encoding, value, path)?;
        build_child(&*self.length, &Value::from(data.len()), stream, ctx, path)?;
        stream::write_all(stream, &data, path)?;
        Ok(value.clone())
    }

    fn sizeof(&self, _ctx: &mut Context, path: &str) -> Result<usize> {
        Err(ErrorKind::SizeofUnknown("prefixed string length depends on the value".into()).at(path))
    }
}

/// A string ending at the first code unit found in a terminator set.
#[derive(Debug, Clone)]
pub struct TerminatedString {
    terminators: Vec<Vec<u8>>,
    encoding: Encoding,
}

impl TerminatedString {
    /// Each terminator must be exactly one code unit wide.
    pub fn new<I, T>(terminators: I, encoding: Encoding) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Vec<u8>>,
    {
        Self {
            terminators: terminators.into_iter().map(Into::into).collect(),
            encoding,
        }
    }
}

impl Construct for TerminatedString {
    fn parse(&self, stream: &mut dyn Stream, _ctx: &mut Context, path: &str) -> Result<Value> {
        let unit = self.encoding.unit();
        let mut data = Vec::new();

        loop {
            let chunk = stream::read_exact(stream, unit, path).map_err(|e| match e.kind {
                ErrorKind::StreamUnderflow(_) => ErrorKind::TerminatorNotFound(format!(
                    "end of stream after {} bytes",
                    data.len()
                ))
                .at(path),
                _ => e,
            })?;
            if self.terminators.iter().any(|t| *t == chunk) {
                break;
            }
            data.extend(chunk);
        }

        decode(self.encoding, &data, path)
    }

    fn build(
        &self,
        value: &Value,
        stream: &mut dyn Stream,
        _ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        let unit = self.encoding.unit();
        let mut data = encode(self.encoding, value, path)?;
        if data
            .chunks(unit)
            .any(|chunk| self.terminators.iter().any(|t| t == chunk))
        {
            return Err(ErrorKind::StringEncoding(format!(
                "{value:?} contains a terminator"
            ))
            .at(path));
        }
        let terminator = self.terminators.first().ok_or_else(|| {
            ErrorKind::TypeMismatch("terminated string without terminators".into()).at(path)
        })?;
        data.extend(terminator);
        stream::write_all(stream, &data, path)?;
        Ok(value.clone())
    }

    fn sizeof(&self, _ctx: &mut Context, path: &str) -> Result<usize> {
        Err(ErrorKind::SizeofUnknown("terminated string length depends on the value".into()).at(path))
    }
}

/// The rest of the stream, decoded.
#[derive(Debug, Clone, Copy, Default)]
pub struct GreedyString {
    encoding: Encoding,
}

impl GreedyString {
    pub fn new(encoding: Encoding) -> Self {
        Self { encoding }
    }
}

impl Construct for GreedyString {
    fn parse(&self, stream: &mut dyn Stream, _ctx: &mut Context, path: &str) -> Result<Value> {
        let data = stream::read_to_end(stream, path)?;
        decode(self.encoding, &data, path)
    }

    fn build(
        &self,
        value: &Value,
        stream: &mut dyn Stream,
        _ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        let data = encode(self.encoding, value, path)?;
        stream::write_all(stream, &data, path)?;
        Ok(value.clone())
    }

    fn sizeof(&self, _ctx: &mut Context, path: &str) -> Result<usize> {
        Err(ErrorKind::SizeofUnknown("greedy string runs to end of stream".into()).at(path))
    }
}

impl_into_ref!(FixedString, PrefixedString, TerminatedString, GreedyString);

/// Null-terminated string; the terminator is one zero code unit.
pub fn cstring(encoding: Encoding) -> ConstructRef {
    TerminatedString::new([encoding.null()], encoding).into()
}
