//! Derived fields: constants, computed values, checks and checksums.
//!
//! Rebuild and Checksum can run before the values they depend on are built. In that
//! case they reserve their child's fixed size and register a back-patch on the current
//! frame; see [`Context`].

use std::fmt;
use std::sync::Arc;

use crate::construct::{ConstructRef, impl_into_ref};
use crate::context::{Context, Deferred, Patch};
use crate::errors::{ErrorKind, Result};
use crate::expr::Expr;
use crate::primitives::Bytes;
use crate::stream::{self, Stream};
use crate::value::Value;
use crate::Construct;

/// A fixed value: verified on parse, written verbatim on build whatever the input.
#[derive(Debug, Clone)]
pub struct Const {
    child: ConstructRef,
    value: Value,
}

impl Const {
    /// A literal byte string.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        let data = data.into();
        Self {
            child: Bytes::new(data.len()).into(),
            value: Value::Bytes(data),
        }
    }

    /// A fixed value of any construct, e.g. a magic number.
    pub fn with(child: impl Into<ConstructRef>, value: impl Into<Value>) -> Self {
        Self {
            child: child.into(),
            value: value.into(),
        }
    }
}

impl Construct for Const {
    fn parse(&self, stream: &mut dyn Stream, ctx: &mut Context, path: &str) -> Result<Value> {
        let found = self.child.parse(stream, ctx, path)?;
        if found != self.value {
            return Err(ErrorKind::ConstMismatch(format!(
                "expected {:?}, found {found:?}",
                self.value
            ))
            .at(path));
        }
        Ok(found)
    }

    fn build(
        &self,
        _value: &Value,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        self.child.build(&self.value, stream, ctx, path)
    }

    fn sizeof(&self, ctx: &mut Context, path: &str) -> Result<usize> {
        self.child.sizeof(ctx, path)
    }

    fn is_self_supplying(&self) -> bool {
        true
    }
}

/// A value computed from the context; occupies no bytes.
#[derive(Debug, Clone)]
pub struct Computed {
    expr: Expr,
}

impl Computed {
    pub fn new(expr: impl Into<Expr>) -> Self {
        Self { expr: expr.into() }
    }
}

impl Construct for Computed {
    fn parse(&self, _stream: &mut dyn Stream, ctx: &mut Context, path: &str) -> Result<Value> {
        self.expr.evaluate(ctx, path)
    }

    fn build(
        &self,
        _value: &Value,
        _stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        self.expr.evaluate(ctx, path)
    }

    fn sizeof(&self, _ctx: &mut Context, _path: &str) -> Result<usize> {
        Ok(0)
    }

    fn is_self_supplying(&self) -> bool {
        true
    }
}

/// Reserves the child's fixed size at the current position and queues a back-patch.
fn reserve(
    child: &ConstructRef,
    patch: Patch,
    stream: &mut dyn Stream,
    ctx: &mut Context,
    path: &str,
) -> Result<Value> {
    let size = child.sizeof(ctx, path)?;
    let offset = stream::tell(stream, path)?;
    stream::write_all(stream, &vec![0; size], path)?;
    ctx.defer(Deferred {
        offset,
        size,
        field: child.clone(),
        patch,
        path: path.to_string(),
        depth: 0,
        scopes: Vec::new(),
    });
    Ok(Value::None)
}

/// `child`, whose value on build is always recomputed from the context.
#[derive(Debug, Clone)]
pub struct Rebuild {
    child: ConstructRef,
    expr: Expr,
}

impl Rebuild {
    pub fn new(child: impl Into<ConstructRef>, expr: impl Into<Expr>) -> Self {
        Self {
            child: child.into(),
            expr: expr.into(),
        }
    }
}

impl Construct for Rebuild {
    fn parse(&self, stream: &mut dyn Stream, ctx: &mut Context, path: &str) -> Result<Value> {
        self.child.parse(stream, ctx, path)
    }

    fn build(
        &self,
        _value: &Value,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        match self.expr.evaluate(ctx, path) {
            Ok(value) => self.child.build(&value, stream, ctx, path),
            Err(e) if e.is_unresolved() && self.child.sizeof(ctx, path).is_ok() => {
                reserve(&self.child, Patch::Value(self.expr.clone()), stream, ctx, path)
            }
            Err(e) => Err(e),
        }
    }

    fn sizeof(&self, ctx: &mut Context, path: &str) -> Result<usize> {
        self.child.sizeof(ctx, path)
    }

    fn is_self_supplying(&self) -> bool {
        true
    }
}

/// `child` with a value substituted on build when the input leaves it out.
#[derive(Debug, Clone)]
pub struct Default {
    child: ConstructRef,
    value: Value,
}

impl Default {
    pub fn new(child: impl Into<ConstructRef>, value: impl Into<Value>) -> Self {
        Self {
            child: child.into(),
            value: value.into(),
        }
    }
}

impl Construct for Default {
    fn parse(&self, stream: &mut dyn Stream, ctx: &mut Context, path: &str) -> Result<Value> {
        self.child.parse(stream, ctx, path)
    }

    fn build(
        &self,
        value: &Value,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        let value = if value.is_none() { &self.value } else { value };
        self.child.build(value, stream, ctx, path)
    }

    fn sizeof(&self, ctx: &mut Context, path: &str) -> Result<usize> {
        self.child.sizeof(ctx, path)
    }

    fn is_self_supplying(&self) -> bool {
        true
    }
}

/// Fails with a validation error unless the condition holds. No I/O.
#[derive(Debug, Clone)]
pub struct Check {
    condition: Expr,
}

impl Check {
    pub fn new(condition: impl Into<Expr>) -> Self {
        Self {
            condition: condition.into(),
        }
    }

    fn check(&self, ctx: &Context, path: &str) -> Result<Value> {
        if self.condition.evaluate(ctx, path)?.truthy() {
            Ok(Value::None)
        } else {
            Err(ErrorKind::Validation(format!("check {} failed", self.condition)).at(path))
        }
    }
}

impl Construct for Check {
    fn parse(&self, _stream: &mut dyn Stream, ctx: &mut Context, path: &str) -> Result<Value> {
        self.check(ctx, path)
    }

    fn build(
        &self,
        _value: &Value,
        _stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        self.check(ctx, path)
    }

    fn sizeof(&self, _ctx: &mut Context, _path: &str) -> Result<usize> {
        Ok(0)
    }

    fn is_self_supplying(&self) -> bool {
        true
    }
}

/// Always fails with an explicit error, which speculative combinators never swallow.
#[derive(Debug, Clone)]
pub struct Fail {
    message: String,
}

impl Fail {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Construct for Fail {
    fn parse(&self, _stream: &mut dyn Stream, _ctx: &mut Context, path: &str) -> Result<Value> {
        Err(ErrorKind::ExplicitError(self.message.clone()).at(path))
    }

    fn build(
        &self,
        _value: &Value,
        _stream: &mut dyn Stream,
        _ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        Err(ErrorKind::ExplicitError(self.message.clone()).at(path))
    }

    fn sizeof(&self, _ctx: &mut Context, path: &str) -> Result<usize> {
        Err(ErrorKind::SizeofUnknown(format!("fails unconditionally: {}", self.message)).at(path))
    }

    fn is_self_supplying(&self) -> bool {
        true
    }
}

/// A pure hash function producing the value stored in a [`Checksum`] field.
#[derive(Clone)]
pub struct HashFn(Arc<dyn Fn(&[u8]) -> Value + Send + Sync>);

impl HashFn {
    /// A digest stored as raw bytes.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static,
    {
        HashFn(Arc::new(move |data| Value::Bytes(f(data))))
    }

    /// A digest stored in an integer field, such as a CRC.
    pub fn int<F>(f: F) -> Self
    where
        F: Fn(&[u8]) -> u64 + Send + Sync + 'static,
    {
        HashFn(Arc::new(move |data| Value::from(f(data))))
    }

    pub fn digest(&self, data: &[u8]) -> Value {
        (self.0)(data)
    }
}

impl fmt::Debug for HashFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HashFn")
    }
}

/// The bytes a checksum covers: raw bytes, a string, a list of byte values, or the
/// `data` member of a raw copy.
pub(crate) fn checksum_input(value: &Value, path: &str) -> Result<Vec<u8>> {
    match value {
        Value::Bytes(b) => Ok(b.clone()),
        Value::Str(s) => Ok(s.as_bytes().to_vec()),
        Value::List(items) => items
            .iter()
            .map(|v| v.as_int().and_then(|i| u8::try_from(i).ok()))
            .collect::<Option<Vec<u8>>>()
            .ok_or_else(|| ErrorKind::TypeMismatch("checksum over a list of non-bytes".into()).at(path)),
        Value::Container(c) if c.contains_key("data") => checksum_input(&c["data"], path),
        other => Err(ErrorKind::TypeMismatch(format!(
            "cannot checksum a {}",
            other.type_name()
        ))
        .at(path)),
    }
}

/// Parsed and computed digests agree; an integer field compares against the
/// big-endian reading of a byte digest.
fn digests_match(stored: &Value, computed: &Value) -> bool {
    match (stored, computed) {
        (Value::Int(i), Value::Bytes(b)) | (Value::Bytes(b), Value::Int(i)) => {
            b.len() <= 16 && b.iter().fold(0i128, |acc, x| (acc << 8) | i128::from(*x)) == *i
        }
        _ => stored == computed,
    }
}

/// A hash of another region, verified on parse and recomputed on build.
#[derive(Debug, Clone)]
pub struct Checksum {
    field: ConstructRef,
    hash: HashFn,
    data: Expr,
}

impl Checksum {
    pub fn new(field: impl Into<ConstructRef>, hash: HashFn, data: impl Into<Expr>) -> Self {
        Self {
            field: field.into(),
            hash,
            data: data.into(),
        }
    }

    fn compute(&self, ctx: &Context, path: &str) -> Result<Value> {
        let data = checksum_input(&self.data.evaluate(ctx, path)?, path)?;
        Ok(self.hash.digest(&data))
    }
}

impl Construct for Checksum {
    fn parse(&self, stream: &mut dyn Stream, ctx: &mut Context, path: &str) -> Result<Value> {
        let stored = self.field.parse(stream, ctx, path)?;
        let computed = self.compute(ctx, path)?;
        if !digests_match(&stored, &computed) {
            return Err(ErrorKind::Validation(format!(
                "checksum mismatch: stored {stored:?}, computed {computed:?}"
            ))
            .at(path));
        }
        Ok(stored)
    }

    fn build(
        &self,
        _value: &Value,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        match self.compute(ctx, path) {
            Ok(digest) => self.field.build(&digest, stream, ctx, path),
            Err(e) if e.is_unresolved() => {
                let patch = Patch::Checksum {
                    data: self.data.clone(),
                    hash: self.hash.clone(),
                };
                reserve(&self.field, patch, stream, ctx, path)
            }
            Err(e) => Err(e),
        }
    }

    fn sizeof(&self, ctx: &mut Context, path: &str) -> Result<usize> {
        self.field.sizeof(ctx, path)
    }

    fn is_self_supplying(&self) -> bool {
        true
    }
}

impl_into_ref!(Const, Computed, Rebuild, Default, Check, Fail, Checksum);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelopes::RawCopy;
    use crate::expr::{len, this};
    use crate::primitives::{GreedyBytes, bytes, u16_be, u32_be, u8};
    use crate::repeaters::Array;
    use crate::structs::{Struct, field};
    use crate::{ConstructExt, container};

    fn sum_hash() -> HashFn {
        HashFn::int(|data| data.iter().map(|b| u64::from(*b)).sum())
    }

    #[test]
    fn test_const() {
        let magic = Const::new(b"BC".to_vec());
        assert_eq!(magic.parse_bytes(b"BC").unwrap(), Value::from(b"BC"));
        assert!(matches!(
            magic.parse_bytes(b"XX").unwrap_err().kind,
            ErrorKind::ConstMismatch(_)
        ));
        assert_eq!(magic.build_bytes(&Value::None).unwrap(), b"BC".to_vec());
        assert_eq!(magic.build_bytes(&Value::from(b"ZZ")).unwrap(), b"BC".to_vec());

        let version = Const::with(u16_be(), 2);
        assert_eq!(version.parse_bytes(&[0, 2]).unwrap(), Value::Int(2));
    }

    #[test]
    fn test_computed() {
        let s = Struct::new([field("w", u8()), field("double", Computed::new(this("w") * 2))]);
        assert_eq!(s.parse_bytes(&[4]).unwrap(), container! { "w" => 4, "double" => 8 });
        assert_eq!(
            s.build_bytes(&container! { "w" => 4 }).unwrap(),
            vec![4]
        );
        assert_eq!(s.static_size().unwrap(), 1);
    }

    #[test]
    fn test_rebuild_overrides_input() {
        let s = Struct::new([
            field("count", Rebuild::new(u8(), len(this("items")))),
            field("items", Array::new(this("count"), u8())),
        ]);
        let value = container! { "count" => 9, "items" => vec![Value::from(1), Value::from(2)] };
        assert_eq!(s.build_bytes(&value).unwrap(), vec![2, 1, 2]);
    }

    #[test]
    fn test_rebuild_back_patch() {
        let s = Struct::new([
            field("size", Rebuild::new(u16_be(), this("body.length"))),
            field("body", RawCopy::new(GreedyBytes)),
        ]);
        let value = container! { "body" => container! { "value" => vec![7u8, 7, 7] } };
        assert_eq!(s.build_bytes(&value).unwrap(), vec![0, 3, 7, 7, 7]);
    }

    #[test]
    fn test_default() {
        let s = Struct::new([field("a", Default::new(u8(), 7)), field("b", u8())]);
        assert_eq!(s.build_bytes(&container! { "b" => 1 }).unwrap(), vec![7, 1]);
        assert_eq!(s.build_bytes(&container! { "a" => 3, "b" => 1 }).unwrap(), vec![3, 1]);
    }

    #[test]
    fn test_check() {
        let s = Struct::new([field("n", u8()), Check::new(this("n").lt(4)).into()]);
        assert!(s.parse_bytes(&[3]).is_ok());
        let err = s.parse_bytes(&[5]).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Validation(_)));
        assert!(matches!(
            s.build_bytes(&container! { "n" => 5 }).unwrap_err().kind,
            ErrorKind::Validation(_)
        ));
    }

    #[test]
    fn test_fail_is_explicit() {
        let err = Fail::new("unsupported").parse_bytes(&[]).unwrap_err();
        assert!(err.is_explicit());
        assert_eq!(err.path, "this");
    }

    #[test]
    fn test_checksum_after_data() {
        let s = Struct::new([
            field("body", RawCopy::new(bytes(3))),
            field("sum", Checksum::new(u32_be(), sum_hash(), this("body.data"))),
        ]);
        let built = s
            .build_bytes(&container! { "body" => container! { "value" => vec![1u8, 2, 3] } })
            .unwrap();
        assert_eq!(built, vec![1, 2, 3, 0, 0, 0, 6]);
        assert!(s.parse_bytes(&built).is_ok());

        let mut corrupt = built.clone();
        corrupt[0] = 9;
        assert!(matches!(
            s.parse_bytes(&corrupt).unwrap_err().kind,
            ErrorKind::Validation(_)
        ));
    }

    #[test]
    fn test_checksum_before_data_is_back_patched() {
        let s = Struct::new([
            field("sum", Checksum::new(u16_be(), sum_hash(), this("body.data"))),
            field("body", RawCopy::new(bytes(2))),
        ]);
        let built = s
            .build_bytes(&container! { "body" => container! { "value" => vec![5u8, 6] } })
            .unwrap();
        assert_eq!(built, vec![0, 11, 5, 6]);
    }

    #[test]
    fn test_nested_back_patch_keeps_its_frame() {
        let s = Struct::new([
            field(
                "header",
                Struct::new([
                    field("tag", u8()),
                    field("sum", Checksum::new(u8(), sum_hash(), this("_.body.data"))),
                ]),
            ),
            field("body", RawCopy::new(bytes(2))),
        ]);
        let built = s
            .build_bytes(&container! {
                "header" => container! { "tag" => 7 },
                "body" => container! { "value" => vec![1u8, 2] },
            })
            .unwrap();
        assert_eq!(built, vec![7, 3, 1, 2]);
    }

    #[test]
    fn test_unresolvable_back_patch_fails_the_build() {
        let s = Struct::new([field("sum", Checksum::new(u8(), sum_hash(), this("missing")))]);
        assert!(matches!(
            s.build_bytes(&container! {}).unwrap_err().kind,
            ErrorKind::Expression(_) | ErrorKind::MissingField(_)
        ));
    }
}
