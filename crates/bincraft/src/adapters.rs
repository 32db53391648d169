//! Adapters: value transformations and validations layered over a child construct.
//!
//! On parse the child's value is decoded; on build the value is encoded and handed to
//! the child. Build returns the caller's (decoded) value so the context keeps the
//! adapted form.

use std::fmt;
use std::sync::Arc;

use crate::construct::{ConstructRef, impl_into_ref};
use crate::context::Context;
use crate::errors::{ErrorKind, Result};
use crate::expr::{Expr, Scope};
use crate::stream::Stream;
use crate::value::{Container, Value};
use crate::Construct;

type AdaptFn = Arc<dyn Fn(&Value) -> std::result::Result<Value, ErrorKind> + Send + Sync>;

/// A pair of closures mapping between the child's value and the caller's value.
#[derive(Clone)]
pub struct Adapter {
    child: ConstructRef,
    decode: AdaptFn,
    encode: AdaptFn,
}

impl Adapter {
    pub fn new<D, E>(child: impl Into<ConstructRef>, decode: D, encode: E) -> Self
    where
        D: Fn(&Value) -> std::result::Result<Value, ErrorKind> + Send + Sync + 'static,
        E: Fn(&Value) -> std::result::Result<Value, ErrorKind> + Send + Sync + 'static,
    {
        Self {
            child: child.into(),
            decode: Arc::new(decode),
            encode: Arc::new(encode),
        }
    }
}

impl fmt::Debug for Adapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Adapter").field("child", &self.child).finish_non_exhaustive()
    }
}

impl Construct for Adapter {
    fn parse(&self, stream: &mut dyn Stream, ctx: &mut Context, path: &str) -> Result<Value> {
        let raw = self.child.parse(stream, ctx, path)?;
        (self.decode)(&raw).map_err(|kind| kind.at(path))
    }

    fn build(
        &self,
        value: &Value,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        let raw = (self.encode)(value).map_err(|kind| kind.at(path))?;
        self.child.build(&raw, stream, ctx, path)?;
        Ok(value.clone())
    }

    fn sizeof(&self, ctx: &mut Context, path: &str) -> Result<usize> {
        self.child.sizeof(ctx, path)
    }

    fn is_self_supplying(&self) -> bool {
        self.child.is_self_supplying()
    }
}

/// A reusable value mapping, for adapters that carry configuration or need the context.
pub trait Adapt: fmt::Debug + Send + Sync {
    fn decode(&self, value: Value, ctx: &Context, path: &str) -> Result<Value>;
    fn encode(&self, value: &Value, ctx: &Context, path: &str) -> Result<Value>;
}

/// `child` seen through an [`Adapt`] implementation.
#[derive(Debug, Clone)]
pub struct Adapted<A> {
    child: ConstructRef,
    adapter: A,
}

impl<A: Adapt> Adapted<A> {
    pub fn new(child: impl Into<ConstructRef>, adapter: A) -> Self {
        Self {
            child: child.into(),
            adapter,
        }
    }
}

impl<A: Adapt> Construct for Adapted<A> {
    fn parse(&self, stream: &mut dyn Stream, ctx: &mut Context, path: &str) -> Result<Value> {
        let raw = self.child.parse(stream, ctx, path)?;
        self.adapter.decode(raw, ctx, path)
    }

    fn build(
        &self,
        value: &Value,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        let raw = self.adapter.encode(value, ctx, path)?;
        self.child.build(&raw, stream, ctx, path)?;
        Ok(value.clone())
    }

    fn sizeof(&self, ctx: &mut Context, path: &str) -> Result<usize> {
        self.child.sizeof(ctx, path)
    }

    fn is_self_supplying(&self) -> bool {
        self.child.is_self_supplying()
    }
}

impl<A: Adapt + 'static> From<Adapted<A>> for ConstructRef {
    fn from(c: Adapted<A>) -> Self {
        Arc::new(c)
    }
}

/// Decoding and encoding written as expressions over `obj()`.
#[derive(Debug, Clone)]
pub struct ExprAdapter {
    child: ConstructRef,
    decode: Expr,
    encode: Expr,
}

impl ExprAdapter {
    pub fn new(child: impl Into<ConstructRef>, decode: impl Into<Expr>, encode: impl Into<Expr>) -> Self {
        Self {
            child: child.into(),
            decode: decode.into(),
            encode: encode.into(),
        }
    }
}

impl Construct for ExprAdapter {
    fn parse(&self, stream: &mut dyn Stream, ctx: &mut Context, path: &str) -> Result<Value> {
        let raw = self.child.parse(stream, ctx, path)?;
        self.decode.evaluate_in(&Scope::with_obj(ctx, &raw), path)
    }

    fn build(
        &self,
        value: &Value,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        let raw = self.encode.evaluate_in(&Scope::with_obj(ctx, value), path)?;
        self.child.build(&raw, stream, ctx, path)?;
        Ok(value.clone())
    }

    fn sizeof(&self, ctx: &mut Context, path: &str) -> Result<usize> {
        self.child.sizeof(ctx, path)
    }
}

/// How a [`Validator`] decides.
#[derive(Debug, Clone)]
enum Rule {
    Predicate(Expr),
    OneOf(Vec<Value>),
    NoneOf(Vec<Value>),
}

/// `child` whose value must satisfy a rule on parse and on build.
#[derive(Debug, Clone)]
pub struct Validator {
    child: ConstructRef,
    rule: Rule,
}

impl Validator {
    /// A predicate over `obj()`, the value being validated.
    pub fn new(child: impl Into<ConstructRef>, predicate: impl Into<Expr>) -> Self {
        Self {
            child: child.into(),
            rule: Rule::Predicate(predicate.into()),
        }
    }

    fn validate(&self, value: &Value, ctx: &Context, path: &str) -> Result<()> {
        let ok = match &self.rule {
            Rule::Predicate(p) => p.evaluate_bool(&Scope::with_obj(ctx, value), path)?,
            Rule::OneOf(allowed) => allowed.contains(value),
            Rule::NoneOf(denied) => !denied.contains(value),
        };
        if ok {
            return Ok(());
        }
        let reason = match &self.rule {
            Rule::Predicate(p) => format!("{value:?} does not satisfy {p}"),
            Rule::OneOf(allowed) => format!("{value:?} is not one of {allowed:?}"),
            Rule::NoneOf(denied) => format!("{value:?} is one of {denied:?}"),
        };
        Err(ErrorKind::Validation(reason).at(path))
    }
}

impl Construct for Validator {
    fn parse(&self, stream: &mut dyn Stream, ctx: &mut Context, path: &str) -> Result<Value> {
        let value = self.child.parse(stream, ctx, path)?;
        self.validate(&value, ctx, path)?;
        Ok(value)
    }

    fn build(
        &self,
        value: &Value,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        self.validate(value, ctx, path)?;
        self.child.build(value, stream, ctx, path)
    }

    fn sizeof(&self, ctx: &mut Context, path: &str) -> Result<usize> {
        self.child.sizeof(ctx, path)
    }

    fn is_self_supplying(&self) -> bool {
        self.child.is_self_supplying()
    }
}

/// Only the listed values are accepted.
pub fn one_of<V: Into<Value>>(
    child: impl Into<ConstructRef>,
    values: impl IntoIterator<Item = V>,
) -> ConstructRef {
    Validator {
        child: child.into(),
        rule: Rule::OneOf(values.into_iter().map(Into::into).collect()),
    }
    .into()
}

/// The listed values are rejected.
pub fn none_of<V: Into<Value>>(
    child: impl Into<ConstructRef>,
    values: impl IntoIterator<Item = V>,
) -> ConstructRef {
    Validator {
        child: child.into(),
        rule: Rule::NoneOf(values.into_iter().map(Into::into).collect()),
    }
    .into()
}

/// What an [`Enum`] yields for an integer with no label.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EnumUnknown {
    /// The integer itself.
    #[default]
    Raw,
    /// A fallback label.
    Default(String),
    /// A mapping-unknown error.
    Fail,
}

/// Integers decoded into string labels.
///
/// Build accepts a label or a plain integer.
#[derive(Debug, Clone)]
pub struct Enum {
    child: ConstructRef,
    labels: Vec<(String, i128)>,
    unknown: EnumUnknown,
}

impl Enum {
    pub fn new<S: Into<String>>(
        child: impl Into<ConstructRef>,
        labels: impl IntoIterator<Item = (S, i128)>,
    ) -> Self {
        Self {
            child: child.into(),
            labels: labels.into_iter().map(|(l, v)| (l.into(), v)).collect(),
            unknown: EnumUnknown::default(),
        }
    }

    pub fn unknown(mut self, unknown: EnumUnknown) -> Self {
        self.unknown = unknown;
        self
    }

    fn label_of(&self, raw: i128) -> Option<&str> {
        self.labels
            .iter()
            .find(|(_, v)| *v == raw)
            .map(|(l, _)| l.as_str())
    }

    fn value_of(&self, label: &str) -> Option<i128> {
        self.labels.iter().find(|(l, _)| l == label).map(|(_, v)| *v)
    }
}

impl Construct for Enum {
    fn parse(&self, stream: &mut dyn Stream, ctx: &mut Context, path: &str) -> Result<Value> {
        let raw = self.child.parse(stream, ctx, path)?;
        let Some(n) = raw.as_int() else {
            return Err(ErrorKind::TypeMismatch(format!("enum over a {}", raw.type_name())).at(path));
        };
        if let Some(label) = self.label_of(n) {
            return Ok(Value::from(label));
        }
        match &self.unknown {
            EnumUnknown::Raw => Ok(raw),
            EnumUnknown::Default(label) => Ok(Value::from(label.as_str())),
            EnumUnknown::Fail => {
                Err(ErrorKind::MappingUnknown(format!("no label for {n}")).at(path))
            }
        }
    }

    fn build(
        &self,
        value: &Value,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        let raw = match value {
            Value::Str(label) => self.value_of(label).ok_or_else(|| {
                ErrorKind::MappingUnknown(format!("no value for label `{label}`")).at(path)
            })?,
            Value::Int(n) => *n,
            other => {
                return Err(ErrorKind::TypeMismatch(format!(
                    "enum expects a label or an integer, found a {}",
                    other.type_name()
                ))
                .at(path));
            }
        };
        self.child.build(&Value::Int(raw), stream, ctx, path)?;
        Ok(value.clone())
    }

    fn sizeof(&self, ctx: &mut Context, path: &str) -> Result<usize> {
        self.child.sizeof(ctx, path)
    }
}

/// A two-way lookup table between decoded values and the child's raw values.
#[derive(Debug, Clone)]
pub struct Mapping {
    child: ConstructRef,
    table: Vec<(Value, Value)>,
}

impl Mapping {
    /// `table` pairs each decoded value with the raw value stored in the stream.
    pub fn new<K: Into<Value>, V: Into<Value>>(
        child: impl Into<ConstructRef>,
        table: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        Self {
            child: child.into(),
            table: table.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

impl Construct for Mapping {
    fn parse(&self, stream: &mut dyn Stream, ctx: &mut Context, path: &str) -> Result<Value> {
        let raw = self.child.parse(stream, ctx, path)?;
        self.table
            .iter()
            .find(|(_, r)| *r == raw)
            .map(|(decoded, _)| decoded.clone())
            .ok_or_else(|| ErrorKind::MappingUnknown(format!("no entry for raw {raw:?}")).at(path))
    }

    fn build(
        &self,
        value: &Value,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        let raw = self
            .table
            .iter()
            .find(|(decoded, _)| decoded == value)
            .map(|(_, raw)| raw.clone())
            .ok_or_else(|| ErrorKind::MappingUnknown(format!("no entry for {value:?}")).at(path))?;
        self.child.build(&raw, stream, ctx, path)?;
        Ok(value.clone())
    }

    fn sizeof(&self, ctx: &mut Context, path: &str) -> Result<usize> {
        self.child.sizeof(ctx, path)
    }
}

/// Name of the member holding bits no flag claims.
pub const UNKNOWN_FLAGS: &str = "unknown";

/// An integer decoded into named boolean flags.
///
/// Bits not covered by any flag are kept under [`UNKNOWN_FLAGS`], or rejected in
/// strict mode.
#[derive(Debug, Clone)]
pub struct FlagsEnum {
    child: ConstructRef,
    flags: Vec<(String, u128)>,
    strict: bool,
}

impl FlagsEnum {
    pub fn new<S: Into<String>>(
        child: impl Into<ConstructRef>,
        flags: impl IntoIterator<Item = (S, u128)>,
    ) -> Self {
        Self {
            child: child.into(),
            flags: flags.into_iter().map(|(n, m)| (n.into(), m)).collect(),
            strict: false,
        }
    }

    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    fn mask_of(&self, name: &str, path: &str) -> Result<u128> {
        self.flags
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, m)| *m)
            .ok_or_else(|| ErrorKind::MappingUnknown(format!("no flag `{name}`")).at(path))
    }

    fn encode(&self, value: &Value, path: &str) -> Result<u128> {
        match value {
            Value::Int(n) => u128::try_from(*n)
                .map_err(|_| ErrorKind::FieldSize(format!("negative flags {n}")).at(path)),
            Value::Str(names) => names
                .split('|')
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .try_fold(0, |acc, n| Ok(acc | self.mask_of(n, path)?)),
            Value::Container(c) | Value::Flags(c) => self.encode_container(c, path),
            other => Err(ErrorKind::TypeMismatch(format!(
                "flags expect a container, a name list or an integer, found a {}",
                other.type_name()
            ))
            .at(path)),
        }
    }

    fn encode_container(&self, c: &Container, path: &str) -> Result<u128> {
        let mut raw = 0;
        for (name, set) in c.public() {
            if name == UNKNOWN_FLAGS {
                raw |= set.as_int().and_then(|n| u128::try_from(n).ok()).unwrap_or(0);
            } else if set.truthy() {
                raw |= self.mask_of(name, path)?;
            }
        }
        Ok(raw)
    }
}

impl Construct for FlagsEnum {
    fn parse(&self, stream: &mut dyn Stream, ctx: &mut Context, path: &str) -> Result<Value> {
        let raw = self.child.parse(stream, ctx, path)?;
        let raw = raw.as_int().and_then(|n| u128::try_from(n).ok()).ok_or_else(|| {
            ErrorKind::TypeMismatch(format!("flags over a {}", raw.type_name())).at(path)
        })?;

        let mut flags = Container::new();
        let mut claimed = 0;
        for (name, mask) in &self.flags {
            flags.insert(name.as_str(), raw & mask == *mask);
            claimed |= mask;
        }

        let unknown = raw & !claimed;
        if unknown != 0 {
            if self.strict {
                return Err(ErrorKind::MappingUnknown(format!("undeclared flag bits {unknown:#x}")).at(path));
            }
            flags.insert(UNKNOWN_FLAGS, Value::Int(unknown as i128));
        }
        Ok(Value::Flags(flags))
    }

    fn build(
        &self,
        value: &Value,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        let raw = self.encode(value, path)?;
        let raw = i128::try_from(raw)
            .map_err(|_| ErrorKind::FieldSize(format!("flag bits {raw:#x} are out of range")).at(path))?;
        self.child.build(&Value::Int(raw), stream, ctx, path)?;
        Ok(value.clone())
    }

    fn sizeof(&self, ctx: &mut Context, path: &str) -> Result<usize> {
        self.child.sizeof(ctx, path)
    }
}

impl_into_ref!(Adapter, ExprAdapter, Validator, Enum, Mapping, FlagsEnum);
