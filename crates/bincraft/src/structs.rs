//! Structures: named and positional field lists, renaming and embedding.

use crate::construct::{
    self, ConstructRef, build_child, container_input, impl_into_ref, insert_inline, list_input,
    member_path, parse_child,
};
use crate::context::Context;
use crate::errors::{ErrorKind, Result};
use crate::stream::Stream;
use crate::value::{Container, Value};
use crate::Construct;

/// Attaches a name (and optionally documentation) to a child.
#[derive(Debug, Clone)]
pub struct Renamed {
    name: Option<String>,
    docs: Option<String>,
    child: ConstructRef,
}

impl Renamed {
    pub fn new(name: impl Into<String>, child: impl Into<ConstructRef>) -> Self {
        let child = child.into();
        Self {
            name: Some(name.into()),
            docs: child.docs().map(str::to_string),
            child,
        }
    }

    /// Documentation only; the child's name is kept.
    pub fn document(child: impl Into<ConstructRef>, docs: impl Into<String>) -> Self {
        let child = child.into();
        Self {
            name: child.name().map(str::to_string),
            docs: Some(docs.into()),
            child,
        }
    }
}

impl Construct for Renamed {
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
        self.child.build(value, stream, ctx, path)
    }

    fn sizeof(&self, ctx: &mut Context, path: &str) -> Result<usize> {
        self.child.sizeof(ctx, path)
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn docs(&self) -> Option<&str> {
        self.docs.as_deref()
    }

    fn is_self_supplying(&self) -> bool {
        self.child.is_self_supplying()
    }

    fn is_embedded(&self) -> bool {
        self.child.is_embedded()
    }

    fn parse_inline(
        &self,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
        allow_overwrite: bool,
    ) -> Result<()> {
        self.child.parse_inline(stream, ctx, path, allow_overwrite)
    }

    fn build_inline(
        &self,
        value: &Container,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
        allow_overwrite: bool,
    ) -> Result<()> {
        self.child
            .build_inline(value, stream, ctx, path, allow_overwrite)
    }
}

/// `name / child`: a named structure field.
pub fn field(name: impl Into<String>, child: impl Into<ConstructRef>) -> ConstructRef {
    Renamed::new(name, child).into()
}

/// Sequence of named fields; parses into a [`Container`].
///
/// Each field sees the fields parsed before it through `this`, and the enclosing
/// structure through `this._`. On build, fields that can produce their own value
/// (`Const`, `Computed`, `Rebuild`, `Default`, ...) may be left out of the input.
#[derive(Debug, Clone)]
pub struct Struct {
    fields: Vec<ConstructRef>,
    allow_overwrite: bool,
}

impl Struct {
    pub fn new(fields: impl IntoIterator<Item = ConstructRef>) -> Self {
        Self {
            fields: fields.into_iter().collect(),
            allow_overwrite: false,
        }
    }

    /// Lets embedded fields replace fields of the same name.
    pub fn allow_overwrite(mut self) -> Self {
        self.allow_overwrite = true;
        self
    }

    pub fn fields(&self) -> &[ConstructRef] {
        &self.fields
    }

    /// Parses into the innermost frame. `embedded` carries the overwrite policy of the
    /// structure this one is inlined into.
    fn parse_fields(
        &self,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
        embedded: Option<bool>,
    ) -> Result<()> {
        let allow_overwrite = embedded.unwrap_or(self.allow_overwrite);

        for field in &self.fields {
            if field.is_embedded() {
                field.parse_inline(stream, ctx, path, allow_overwrite)?;
                continue;
            }

            match field.name() {
                Some(name) => {
                    let sub = member_path(path, name);
                    let value = parse_child(&**field, stream, ctx, &sub)?;
                    if embedded.is_some() {
                        insert_inline(ctx, name, value, allow_overwrite, &sub)?;
                    } else {
                        ctx.insert(name, value);
                    }
                }
                None => {
                    parse_child(&**field, stream, ctx, path)?;
                }
            }
        }
        Ok(())
    }

    fn build_fields(
        &self,
        input: &Container,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
    ) -> Result<()> {
        for field in &self.fields {
            if field.is_embedded() {
                field.build_inline(input, stream, ctx, path, self.allow_overwrite)?;
                continue;
            }

            match field.name() {
                Some(name) => {
                    let sub = member_path(path, name);
                    let value = match input.get(name) {
                        Some(v) => v.clone(),
                        None if field.is_self_supplying() => Value::None,
                        None => return Err(ErrorKind::MissingField(name.to_string()).at(&sub)),
                    };
                    let built = build_child(&**field, &value, stream, ctx, &sub)?;
                    ctx.insert(name, built);
                }
                None => {
                    build_child(&**field, &Value::None, stream, ctx, path)?;
                }
            }
        }
        Ok(())
    }
}

impl Construct for Struct {
    fn parse(&self, stream: &mut dyn Stream, ctx: &mut Context, path: &str) -> Result<Value> {
        ctx.push(Container::new());
        let result = self.parse_fields(stream, ctx, path, None);
        let frame = ctx.pop();
        result.map(|()| Value::Container(frame))
    }

    fn build(
        &self,
        value: &Value,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        let input = container_input(value, path)?;
        ctx.push(input.clone());
        let result = self
            .build_fields(&input, stream, ctx, path)
            .and_then(|()| ctx.resolve_deferred(stream, false));
        let frame = ctx.pop();
        result.map(|()| Value::Container(frame))
    }

    fn sizeof(&self, ctx: &mut Context, path: &str) -> Result<usize> {
        ctx.push(Container::new());
        let result = self.fields.iter().try_fold(0usize, |total, field| {
            let sub = field.name().map_or_else(|| path.to_string(), |n| member_path(path, n));
            Ok(total + field.sizeof(ctx, &sub)?)
        });
        ctx.pop();
        result
    }

    fn parse_inline(
        &self,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
        allow_overwrite: bool,
    ) -> Result<()> {
        self.parse_fields(stream, ctx, path, Some(allow_overwrite))
    }

    /// The enclosing frame already holds the caller's input, so no collision check here.
    fn build_inline(
        &self,
        value: &Container,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
        _allow_overwrite: bool,
    ) -> Result<()> {
        self.build_fields(value, stream, ctx, path)
    }
}

/// Positional fields; parses into a list. Named elements are also visible in the context.
#[derive(Debug, Clone)]
pub struct Sequence {
    items: Vec<ConstructRef>,
}

impl Sequence {
    pub fn new(items: impl IntoIterator<Item = ConstructRef>) -> Self {
        Self {
            items: items.into_iter().collect(),
        }
    }

    fn item_path(path: &str, index: usize, item: &ConstructRef) -> String {
        item.name()
            .map_or_else(|| construct::element_path(path, index), |n| member_path(path, n))
    }
}

impl Construct for Sequence {
    fn parse(&self, stream: &mut dyn Stream, ctx: &mut Context, path: &str) -> Result<Value> {
        ctx.push(Container::new());
        let mut out = Vec::with_capacity(self.items.len());
        let result = self.items.iter().enumerate().try_for_each(|(i, item)| {
            let value = parse_child(&**item, stream, ctx, &Self::item_path(path, i, item))?;
            if let Some(name) = item.name() {
                ctx.insert(name, value.clone());
            }
            out.push(value);
            Ok(())
        });
        ctx.pop();
        result.map(|()| Value::List(out))
    }

    fn build(
        &self,
        value: &Value,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        let input = list_input(value, path)?;
        if input.len() != self.items.len() {
            return Err(ErrorKind::RangeCount(format!(
                "sequence has {} items, got {}",
                self.items.len(),
                input.len()
            ))
            .at(path));
        }

        let preload = self
            .items
            .iter()
            .zip(&input)
            .filter_map(|(item, v)| item.name().map(|n| (n, v.clone())))
            .collect();
        ctx.push(preload);

        let mut out = Vec::with_capacity(input.len());
        let result = self
            .items
            .iter()
            .zip(&input)
            .enumerate()
            .try_for_each(|(i, (item, v))| {
                let built = build_child(&**item, v, stream, ctx, &Self::item_path(path, i, item))?;
                if let Some(name) = item.name() {
                    ctx.insert(name, built.clone());
                }
                out.push(built);
                Ok(())
            })
            .and_then(|()| ctx.resolve_deferred(stream, false));
        ctx.pop();
        result.map(|()| Value::List(out))
    }

    fn sizeof(&self, ctx: &mut Context, path: &str) -> Result<usize> {
        ctx.push(Container::new());
        let result = self.items.iter().enumerate().try_fold(0usize, |total, (i, item)| {
            Ok(total + item.sizeof(ctx, &Self::item_path(path, i, item))?)
        });
        ctx.pop();
        result
    }
}

/// Inlines a structure's fields into the enclosing one.
#[derive(Debug, Clone)]
pub struct Embedded {
    child: ConstructRef,
}

impl Embedded {
    pub fn new(child: impl Into<ConstructRef>) -> Self {
        Self {
            child: child.into(),
        }
    }
}

impl Construct for Embedded {
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
        self.child.build(value, stream, ctx, path)
    }

    fn sizeof(&self, ctx: &mut Context, path: &str) -> Result<usize> {
        self.child.sizeof(ctx, path)
    }

    fn is_embedded(&self) -> bool {
        true
    }

    fn parse_inline(
        &self,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
        allow_overwrite: bool,
    ) -> Result<()> {
        self.child.parse_inline(stream, ctx, path, allow_overwrite)
    }

    fn build_inline(
        &self,
        value: &Container,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
        allow_overwrite: bool,
    ) -> Result<()> {
        self.child
            .build_inline(value, stream, ctx, path, allow_overwrite)
    }
}

/// Which child of a [`FocusedSeq`] provides the value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Focus {
    Index(usize),
    Name(String),
}

impl From<usize> for Focus {
    fn from(index: usize) -> Self {
        Focus::Index(index)
    }
}

impl From<&str> for Focus {
    fn from(name: &str) -> Self {
        Focus::Name(name.to_string())
    }
}

/// Parses every child but yields only the focused one.
#[derive(Debug, Clone)]
pub struct FocusedSeq {
    focus: Focus,
    items: Vec<ConstructRef>,
}

impl FocusedSeq {
    pub fn new(focus: impl Into<Focus>, items: impl IntoIterator<Item = ConstructRef>) -> Self {
        Self {
            focus: focus.into(),
            items: items.into_iter().collect(),
        }
    }

    fn focus_index(&self, path: &str) -> Result<usize> {
        let found = match &self.focus {
            Focus::Index(i) => Some(*i).filter(|i| *i < self.items.len()),
            Focus::Name(name) => self
                .items
                .iter()
                .position(|item| item.name() == Some(name.as_str())),
        };
        found.ok_or_else(|| {
            ErrorKind::TypeMismatch(format!("focus {:?} names no child", self.focus)).at(path)
        })
    }
}

impl Construct for FocusedSeq {
    fn parse(&self, stream: &mut dyn Stream, ctx: &mut Context, path: &str) -> Result<Value> {
        let focus = self.focus_index(path)?;
        ctx.push(Container::new());
        let mut focused = Value::None;
        let result = self.items.iter().enumerate().try_for_each(|(i, item)| {
            let sub = Sequence::item_path(path, i, item);
            let value = parse_child(&**item, stream, ctx, &sub)?;
            if let Some(name) = item.name() {
                ctx.insert(name, value.clone());
            }
            if i == focus {
                focused = value;
            }
            Ok(())
        });
        ctx.pop();
        result.map(|()| focused)
    }

    fn build(
        &self,
        value: &Value,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        let focus = self.focus_index(path)?;
        let mut preload = Container::new();
        if let Some(name) = self.items[focus].name() {
            preload.insert(name, value.clone());
        }
        ctx.push(preload);

        let none = Value::None;
        let mut focused = Value::None;
        let result = self
            .items
            .iter()
            .enumerate()
            .try_for_each(|(i, item)| {
                let sub = Sequence::item_path(path, i, item);
                let input = if i == focus { value } else { &none };
                let built = build_child(&**item, input, stream, ctx, &sub)?;
                if let Some(name) = item.name() {
                    ctx.insert(name, built.clone());
                }
                if i == focus {
                    focused = built;
                }
                Ok(())
            })
            .and_then(|()| ctx.resolve_deferred(stream, false));
        ctx.pop();
        result.map(|()| focused)
    }

    fn sizeof(&self, ctx: &mut Context, path: &str) -> Result<usize> {
        ctx.push(Container::new());
        let result = self.items.iter().enumerate().try_fold(0usize, |total, (i, item)| {
            Ok(total + item.sizeof(ctx, &Sequence::item_path(path, i, item))?)
        });
        ctx.pop();
        result
    }
}

impl_into_ref!(Renamed, Struct, Sequence, Embedded, FocusedSeq);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derived::{Computed, Const};
    use crate::expr::this;
    use crate::primitives::{Bytes, u16_be, u8};
    use crate::repeaters::Array;
    use crate::{ConstructExt, container, sizeof_with};

    fn header() -> Struct {
        Struct::new([
            field("n", u8()),
            field("items", Array::new(this("n"), u8())),
        ])
    }

    #[test]
    fn test_struct_with_counted_tail() {
        let s = header();
        let parsed = s.parse_bytes(&[3, 10, 11, 12]).unwrap();
        assert_eq!(
            parsed,
            container! { "n" => 3, "items" => vec![Value::from(10), Value::from(11), Value::from(12)] }
        );
        assert_eq!(s.build_bytes(&parsed).unwrap(), vec![3, 10, 11, 12]);
    }

    #[test]
    fn test_parent_visible_through_underscore() {
        let s = Struct::new([
            field("n", u8()),
            field("inner", Struct::new([field("m", Array::new(this("_.n"), u8()))])),
        ]);
        let parsed = s.parse_bytes(&[2, 7, 8]).unwrap();
        assert_eq!(
            parsed.attr("inner").unwrap(),
            container! { "m" => vec![Value::from(7), Value::from(8)] }
        );
    }

    #[test]
    fn test_missing_field_on_build() {
        let err = header().build_bytes(&container! { "n" => 1 }).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MissingField("items".to_string()));
        assert_eq!(err.path, "this.items");
    }

    #[test]
    fn test_self_supplying_fields_may_be_omitted() {
        let s = Struct::new([
            field("magic", Const::new(b"BC".to_vec())),
            field("a", u8()),
            field("double", Computed::new(this("a") * 2)),
        ]);
        let data = s.build_bytes(&container! { "a" => 4 }).unwrap();
        assert_eq!(data, b"BC\x04");
        assert_eq!(
            s.parse_bytes(&data).unwrap(),
            container! { "magic" => b"BC".to_vec(), "a" => 4, "double" => 8 }
        );
    }

    #[test]
    fn test_error_path_and_offset() {
        let s = Struct::new([field("a", u8()), field("b", u16_be())]);
        let err = s.parse_bytes(&[1, 2]).unwrap_err();
        assert_eq!(err.path, "this.b");
        assert_eq!(err.offset, Some(1));
    }

    #[test]
    fn test_sizeof_sums_fields() {
        let s = Struct::new([field("a", u8()), field("b", u16_be())]);
        assert_eq!(s.static_size().unwrap(), 3);
        assert!(matches!(
            header().static_size().unwrap_err().kind,
            ErrorKind::SizeofUnknown(_)
        ));
    }

    #[test]
    fn test_sequence() {
        let s = Sequence::new([u8(), field("b", u8()), Array::new(this("b"), u8()).into()]);
        let parsed = s.parse_bytes(&[1, 2, 5, 6]).unwrap();
        assert_eq!(
            parsed,
            Value::List(vec![
                Value::from(1),
                Value::from(2),
                Value::List(vec![Value::from(5), Value::from(6)])
            ])
        );
        assert_eq!(s.build_bytes(&parsed).unwrap(), vec![1, 2, 5, 6]);
    }

    #[test]
    fn test_sequence_sizeof_uses_its_own_frame() {
        let params = Container::from([("n", 2)]);
        let parent = Sequence::new([u8(), Bytes::new(this("_.n")).into()]);
        assert_eq!(sizeof_with(&parent, params.clone()).unwrap(), 3);
        let parsed = crate::parse_with(&parent, &[1, 2, 3], params.clone()).unwrap();
        assert_eq!(parsed.item(1).unwrap(), Value::from(b"\x02\x03"));

        let item: ConstructRef = Bytes::new(this("n")).into();
        let own = Sequence::new([item]);
        assert!(sizeof_with(&own, params.clone()).is_err());

        let item: ConstructRef = Bytes::new(this("_.n")).into();
        let focused = FocusedSeq::new(0usize, [item]);
        assert_eq!(sizeof_with(&focused, params).unwrap(), 2);
    }

    #[test]
    fn test_embedded_fields_are_inlined() {
        let s = Struct::new([
            field("a", u8()),
            Embedded::new(Struct::new([field("b", u8()), field("c", u8())])).into(),
        ]);
        let parsed = s.parse_bytes(&[1, 2, 3]).unwrap();
        assert_eq!(parsed, container! { "a" => 1, "b" => 2, "c" => 3 });
        assert_eq!(s.build_bytes(&parsed).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_embedded_collision() {
        let inner = || Embedded::new(Struct::new([field("a", u8())]));
        let s = Struct::new([field("a", u8()), inner().into()]);
        assert!(matches!(
            s.parse_bytes(&[1, 2]).unwrap_err().kind,
            ErrorKind::TypeMismatch(_)
        ));

        let s = Struct::new([field("a", u8()), inner().into()]).allow_overwrite();
        assert_eq!(s.parse_bytes(&[1, 2]).unwrap(), container! { "a" => 2 });
    }

    #[test]
    fn test_renamed_docs() {
        let c = u8().named("x").doc("the x coordinate");
        assert_eq!(c.name(), Some("x"));
        assert_eq!(c.docs(), Some("the x coordinate"));
    }

    #[test]
    fn test_focused_seq() {
        let s = FocusedSeq::new(
            "value",
            [field("magic", Const::new(vec![0xAA])), field("value", u16_be())],
        );
        assert_eq!(s.parse_bytes(&[0xAA, 0, 5]).unwrap(), Value::Int(5));
        assert_eq!(s.build_bytes(&Value::Int(5)).unwrap(), vec![0xAA, 0, 5]);
        assert_eq!(s.static_size().unwrap(), 3);
    }
}
