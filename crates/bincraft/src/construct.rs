//! The [`Construct`] trait: one node of a format description.
//!
//! Every node can parse a value out of a stream, build a value into a stream, and report
//! its size when that does not depend on data. Nodes are immutable once constructed and
//! are shared as [`ConstructRef`] (`Arc<dyn Construct>`), so a format can be reused from
//! several threads at once; each call owns its stream and [`Context`].
//!
//! Paths start at `this`; structures append `.name`, repeaters append `[i]`.

use std::fmt;
use std::sync::Arc;

use crate::context::Context;
use crate::errors::{ErrorKind, Result};
use crate::expr::Expr;
use crate::stream::{self, Stream};
use crate::value::{Container, Value};

/// Path of the outermost construct of a call.
pub const ROOT_PATH: &str = "this";

/// A node of a format description.
pub trait Construct: fmt::Debug + Send + Sync {
    /// Reads a value from the current stream position.
    fn parse(&self, stream: &mut dyn Stream, ctx: &mut Context, path: &str) -> Result<Value>;

    /// Writes `value` at the current stream position and returns the value as built,
    /// which may differ from the input for derived constructs.
    fn build(
        &self,
        value: &Value,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
    ) -> Result<Value>;

    /// Size in bytes (in bits inside a bit stream), or `SizeofUnknown`.
    fn sizeof(&self, ctx: &mut Context, path: &str) -> Result<usize>;

    /// Field name used for context insertion and error paths.
    fn name(&self) -> Option<&str> {
        None
    }

    fn docs(&self) -> Option<&str> {
        None
    }

    /// Whether build can run without a value supplied by the caller.
    fn is_self_supplying(&self) -> bool {
        false
    }

    /// Whether the parent structure should inline this node's fields.
    fn is_embedded(&self) -> bool {
        false
    }

    /// Parses this node's fields into the innermost frame.
    fn parse_inline(
        &self,
        _stream: &mut dyn Stream,
        _ctx: &mut Context,
        path: &str,
        _allow_overwrite: bool,
    ) -> Result<()> {
        Err(ErrorKind::TypeMismatch(format!("{self:?} cannot be embedded")).at(path))
    }

    /// Builds this node's fields from `value`, recording them in the innermost frame.
    fn build_inline(
        &self,
        _value: &Container,
        _stream: &mut dyn Stream,
        _ctx: &mut Context,
        path: &str,
        _allow_overwrite: bool,
    ) -> Result<()> {
        Err(ErrorKind::TypeMismatch(format!("{self:?} cannot be embedded")).at(path))
    }
}

/// Shared handle to a construct.
pub type ConstructRef = Arc<dyn Construct>;

impl Construct for ConstructRef {
    fn parse(&self, stream: &mut dyn Stream, ctx: &mut Context, path: &str) -> Result<Value> {
        (**self).parse(stream, ctx, path)
    }

    fn build(
        &self,
        value: &Value,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        (**self).build(value, stream, ctx, path)
    }

    fn sizeof(&self, ctx: &mut Context, path: &str) -> Result<usize> {
        (**self).sizeof(ctx, path)
    }

    fn name(&self) -> Option<&str> {
        (**self).name()
    }

    fn docs(&self) -> Option<&str> {
        (**self).docs()
    }

    fn is_self_supplying(&self) -> bool {
        (**self).is_self_supplying()
    }

    fn is_embedded(&self) -> bool {
        (**self).is_embedded()
    }

    fn parse_inline(
        &self,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
        allow_overwrite: bool,
    ) -> Result<()> {
        (**self).parse_inline(stream, ctx, path, allow_overwrite)
    }

    fn build_inline(
        &self,
        value: &Container,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
        allow_overwrite: bool,
    ) -> Result<()> {
        (**self).build_inline(value, stream, ctx, path, allow_overwrite)
    }
}

/// Implements `From<T> for ConstructRef` for concrete construct types.
macro_rules! impl_into_ref {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for $crate::construct::ConstructRef {
                fn from(c: $ty) -> Self {
                    std::sync::Arc::new(c)
                }
            }
        )*
    };
}

pub(crate) use impl_into_ref;

/// Parses `child`, tagging a failure with the offset at which the child started.
pub(crate) fn parse_child(
    child: &dyn Construct,
    stream: &mut dyn Stream,
    ctx: &mut Context,
    path: &str,
) -> Result<Value> {
    let offset = stream::tell(stream, path)?;
    child
        .parse(stream, ctx, path)
        .map_err(|e| e.with_offset(offset))
}

/// Builds `child`, tagging a failure with the offset at which the child started.
pub(crate) fn build_child(
    child: &dyn Construct,
    value: &Value,
    stream: &mut dyn Stream,
    ctx: &mut Context,
    path: &str,
) -> Result<Value> {
    let offset = stream::tell(stream, path)?;
    child
        .build(value, stream, ctx, path)
        .map_err(|e| e.with_offset(offset))
}

/// Path of a named member.
pub(crate) fn member_path(path: &str, name: &str) -> String {
    format!("{path}.{name}")
}

/// Path of a list element.
pub(crate) fn element_path(path: &str, index: usize) -> String {
    format!("{path}[{index}]")
}

/// Evaluates a size or count for `sizeof`, reporting failures as `SizeofUnknown`.
pub(crate) fn static_count(expr: &Expr, ctx: &Context, path: &str) -> Result<usize> {
    expr.evaluate_usize(ctx, path)
        .map_err(|e| ErrorKind::SizeofUnknown(format!("{expr} is not known: {}", e.kind)).at(path))
}

/// The mapping handed to a structure on build; lazy input is forced, absence is empty.
pub(crate) fn container_input(value: &Value, path: &str) -> Result<Container> {
    match value {
        Value::Container(c) | Value::Flags(c) => Ok(c.clone()),
        Value::LazyContainer(lazy) => lazy.force(),
        Value::None => Ok(Container::new()),
        other => Err(ErrorKind::TypeMismatch(format!(
            "expected a container, found a {}",
            other.type_name()
        ))
        .at(path)),
    }
}

/// The elements handed to a repeater on build; bytes count as a list of integers.
pub(crate) fn list_input(value: &Value, path: &str) -> Result<Vec<Value>> {
    match value {
        Value::List(items) => Ok(items.clone()),
        Value::LazyList(lazy) => lazy.force(),
        Value::Bytes(b) => Ok(b.iter().copied().map(Value::from).collect()),
        other => Err(ErrorKind::TypeMismatch(format!(
            "expected a list, found a {}",
            other.type_name()
        ))
        .at(path)),
    }
}

/// Inserts an inlined member into the innermost frame, refusing silent overwrites.
pub(crate) fn insert_inline(
    ctx: &mut Context,
    name: &str,
    value: Value,
    allow_overwrite: bool,
    path: &str,
) -> Result<()> {
    if !allow_overwrite && ctx.this().contains_key(name) {
        return Err(ErrorKind::TypeMismatch(format!(
            "embedded field `{name}` collides with an existing field"
        ))
        .at(path));
    }
    ctx.insert(name, value);
    Ok(())
}

/// Combinator helpers available on every construct.
///
/// ```
/// use bincraft::{ConstructExt, u8, Value};
///
/// let pair = u8().array(2);
/// assert_eq!(pair.static_size().unwrap(), 2);
/// assert_eq!(pair.parse_bytes(&[1, 2]).unwrap(), Value::from(vec![Value::from(1), Value::from(2)]));
/// ```
pub trait ConstructExt: Construct + Into<ConstructRef> + Sized {
    /// Attaches a field name.
    fn named(self, name: impl Into<String>) -> ConstructRef {
        crate::structs::Renamed::new(name, self).into()
    }

    /// Attaches documentation without changing the name.
    fn doc(self, docs: impl Into<String>) -> ConstructRef {
        crate::structs::Renamed::document(self, docs).into()
    }

    /// `count` repetitions of this construct.
    fn array(self, count: impl Into<Expr>) -> ConstructRef {
        crate::repeaters::Array::new(count, self).into()
    }

    /// This construct followed by `next`, as a two-element sequence.
    fn then(self, next: impl Into<ConstructRef>) -> ConstructRef {
        crate::structs::Sequence::new([self.into(), next.into()]).into()
    }

    fn parse_bytes(&self, data: &[u8]) -> Result<Value> {
        crate::parse(self, data)
    }

    fn build_bytes(&self, value: &Value) -> Result<Vec<u8>> {
        crate::build(self, value)
    }

    /// Size without any parameters.
    fn static_size(&self) -> Result<usize> {
        crate::sizeof(self)
    }
}

impl<T: Construct + Into<ConstructRef>> ConstructExt for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        assert_eq!(member_path(ROOT_PATH, "header"), "this.header");
        assert_eq!(element_path("this.items", 3), "this.items[3]");
    }

    #[test]
    fn test_list_input_accepts_bytes() {
        let items = list_input(&Value::Bytes(vec![1, 2]), "this").unwrap();
        assert_eq!(items, vec![Value::Int(1), Value::Int(2)]);
        assert!(list_input(&Value::Int(1), "this").is_err());
    }

    #[test]
    fn test_container_input_absence_is_empty() {
        assert!(container_input(&Value::None, "this").unwrap().is_empty());
        assert!(matches!(
            container_input(&Value::Int(1), "this").unwrap_err().kind,
            ErrorKind::TypeMismatch(_)
        ));
    }

    #[test]
    fn test_insert_inline_collision() {
        let mut ctx = Context::default();
        ctx.push(Container::new());
        insert_inline(&mut ctx, "a", Value::Int(1), false, "this").unwrap();
        assert!(insert_inline(&mut ctx, "a", Value::Int(2), false, "this").is_err());
        insert_inline(&mut ctx, "a", Value::Int(2), true, "this").unwrap();
        assert_eq!(ctx.get("a"), Some(&Value::Int(2)));
    }
}
