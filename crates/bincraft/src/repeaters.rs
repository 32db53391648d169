//! Repetition: counted arrays, greedy and bounded ranges, predicate-terminated lists.

use crate::construct::{
    self, ConstructRef, build_child, element_path, impl_into_ref, list_input, parse_child,
};
use crate::context::Context;
use crate::errors::{ErrorKind, Result};
use crate::expr::{Expr, Scope};
use crate::stream::{self, Stream};
use crate::value::Value;
use crate::Construct;

fn count_mismatch(expected: usize, found: usize, path: &str) -> crate::Error {
    ErrorKind::RangeCount(format!("expected {expected} elements, found {found}")).at(path)
}

fn build_elements(
    child: &dyn Construct,
    items: &[Value],
    stream: &mut dyn Stream,
    ctx: &mut Context,
    path: &str,
) -> Result<Vec<Value>> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            ctx.insert("_index", i);
            build_child(child, item, stream, ctx, &element_path(path, i))
        })
        .collect()
}

/// Exactly `count` repetitions of `child`.
#[derive(Debug, Clone)]
pub struct Array {
    count: Expr,
    child: ConstructRef,
    discard: bool,
}

impl Array {
    pub fn new(count: impl Into<Expr>, child: impl Into<ConstructRef>) -> Self {
        Self {
            count: count.into(),
            child: child.into(),
            discard: false,
        }
    }

    /// Parses the elements but returns an empty list.
    pub fn discard(mut self) -> Self {
        self.discard = true;
        self
    }
}

impl Construct for Array {
    fn parse(&self, stream: &mut dyn Stream, ctx: &mut Context, path: &str) -> Result<Value> {
        let count = self.count.evaluate_usize(ctx, path)?;
        let mut items = Vec::with_capacity(if self.discard { 0 } else { count.min(4096) });

        for i in 0..count {
            ctx.insert("_index", i);
            let item = parse_child(&*self.child, stream, ctx, &element_path(path, i))?;
            if !self.discard {
                items.push(item);
            }
        }

        Ok(Value::List(items))
    }

    fn build(
        &self,
        value: &Value,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        let count = self.count.evaluate_usize(ctx, path)?;
        let items = list_input(value, path)?;
        if items.len() != count {
            return Err(count_mismatch(count, items.len(), path));
        }
        Ok(Value::List(build_elements(&*self.child, &items, stream, ctx, path)?))
    }

    fn sizeof(&self, ctx: &mut Context, path: &str) -> Result<usize> {
        let count = construct::static_count(&self.count, ctx, path)?;
        let size = self.child.sizeof(ctx, &element_path(path, 0))?;
        count.checked_mul(size).ok_or_else(|| {
            ErrorKind::SizeofUnknown(format!("{count} elements of {size} bytes overflow")).at(path)
        })
    }
}

/// Between `min` and `max` repetitions; parsing stops at the first failing element.
#[derive(Debug, Clone)]
pub struct BoundedRange {
    min: Expr,
    max: Option<Expr>,
    child: ConstructRef,
    discard: bool,
}

impl BoundedRange {
    pub fn new(min: impl Into<Expr>, max: impl Into<Expr>, child: impl Into<ConstructRef>) -> Self {
        Self {
            min: min.into(),
            max: Some(max.into()),
            child: child.into(),
            discard: false,
        }
    }

    pub fn discard(mut self) -> Self {
        self.discard = true;
        self
    }

    fn bounds(&self, ctx: &Context, path: &str) -> Result<(usize, usize)> {
        let min = self.min.evaluate_usize(ctx, path)?;
        let max = match &self.max {
            Some(max) => max.evaluate_usize(ctx, path)?,
            None => usize::MAX,
        };
        if min > max {
            return Err(ErrorKind::RangeCount(format!("min {min} exceeds max {max}")).at(path));
        }
        Ok((min, max))
    }
}

impl Construct for BoundedRange {
    fn parse(&self, stream: &mut dyn Stream, ctx: &mut Context, path: &str) -> Result<Value> {
        let (min, max) = self.bounds(ctx, path)?;
        let mut items = Vec::new();
        let mut parsed = 0usize;

        while parsed < max {
            let start = stream::tell(stream, path)?;
            ctx.insert("_index", parsed);
            let sub = element_path(path, parsed);

            match parse_child(&*self.child, stream, ctx, &sub) {
                Ok(item) => {
                    if stream::tell(stream, path)? == start {
                        tracing::trace!(path = %sub, "range element consumed nothing, stopping");
                        break;
                    }
                    parsed += 1;
                    if !self.discard {
                        items.push(item);
                    }
                }
                Err(e) if e.is_explicit() => return Err(e),
                Err(e) => {
                    tracing::trace!(path = %sub, error = %e, "range element failed, rewinding");
                    stream::seek(stream, std::io::SeekFrom::Start(start), path)?;
                    break;
                }
            }
        }

        if parsed < min {
            return Err(ErrorKind::RangeCount(format!(
                "expected at least {min} elements, found {parsed}"
            ))
            .at(path));
        }
        Ok(Value::List(items))
    }

    fn build(
        &self,
        value: &Value,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        let (min, max) = self.bounds(ctx, path)?;
        let items = list_input(value, path)?;
        if items.len() < min || items.len() > max {
            return Err(ErrorKind::RangeCount(format!(
                "expected {min}..={max} elements, found {}",
                items.len()
            ))
            .at(path));
        }
        Ok(Value::List(build_elements(&*self.child, &items, stream, ctx, path)?))
    }

    fn sizeof(&self, ctx: &mut Context, path: &str) -> Result<usize> {
        let min = construct::static_count(&self.min, ctx, path)?;
        let max = match &self.max {
            Some(max) => construct::static_count(max, ctx, path)?,
            None => usize::MAX,
        };
        if min != max {
            return Err(ErrorKind::SizeofUnknown(format!(
                "element count varies between {min} and {max}"
            ))
            .at(path));
        }
        Ok(min * self.child.sizeof(ctx, &element_path(path, 0))?)
    }
}

/// Zero or more repetitions, until the child fails or the stream ends.
#[derive(Debug, Clone)]
pub struct GreedyRange(BoundedRange);

impl GreedyRange {
    pub fn new(child: impl Into<ConstructRef>) -> Self {
        Self(BoundedRange {
            min: Expr::from(0),
            max: None,
            child: child.into(),
            discard: false,
        })
    }

    pub fn discard(self) -> Self {
        Self(self.0.discard())
    }
}

impl Construct for GreedyRange {
    fn parse(&self, stream: &mut dyn Stream, ctx: &mut Context, path: &str) -> Result<Value> {
        self.0.parse(stream, ctx, path)
    }

    fn build(
        &self,
        value: &Value,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        self.0.build(value, stream, ctx, path)
    }

    fn sizeof(&self, _ctx: &mut Context, path: &str) -> Result<usize> {
        Err(ErrorKind::SizeofUnknown("greedy range length depends on the data".into()).at(path))
    }
}

/// Repeats until `predicate` holds for the last element; that element is included.
///
/// The predicate sees the element as `obj()` and the elements so far as `list()`.
#[derive(Debug, Clone)]
pub struct RepeatUntil {
    predicate: Expr,
    child: ConstructRef,
    discard: bool,
}

impl RepeatUntil {
    pub fn new(predicate: impl Into<Expr>, child: impl Into<ConstructRef>) -> Self {
        Self {
            predicate: predicate.into(),
            child: child.into(),
            discard: false,
        }
    }

    pub fn discard(mut self) -> Self {
        self.discard = true;
        self
    }

    fn done(&self, item: &Value, items: &[Value], ctx: &Context, path: &str) -> Result<bool> {
        let scope = Scope {
            ctx,
            obj: Some(item),
            list: Some(items),
        };
        self.predicate.evaluate_bool(&scope, path)
    }
}

impl Construct for RepeatUntil {
    fn parse(&self, stream: &mut dyn Stream, ctx: &mut Context, path: &str) -> Result<Value> {
        let mut items = Vec::new();

        for i in 0.. {
            ctx.insert("_index", i);
            let item = parse_child(&*self.child, stream, ctx, &element_path(path, i))?;
            items.push(item);
            let last = &items[items.len() - 1];
            if self.done(last, &items, ctx, path)? {
                break;
            }
        }

        if self.discard {
            items.clear();
        }
        Ok(Value::List(items))
    }

    fn build(
        &self,
        value: &Value,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        let input = list_input(value, path)?;
        let mut built = Vec::with_capacity(input.len());

        for (i, item) in input.iter().enumerate() {
            ctx.insert("_index", i);
            built.push(build_child(&*self.child, item, stream, ctx, &element_path(path, i))?);
            if self.done(&built[i], &built, ctx, path)? {
                return Ok(Value::List(built));
            }
        }

        Err(ErrorKind::RangeCount(
            "no element satisfies the terminating predicate".to_string(),
        )
        .at(path))
    }

    fn sizeof(&self, _ctx: &mut Context, path: &str) -> Result<usize> {
        Err(ErrorKind::SizeofUnknown("repeat-until length depends on the data".into()).at(path))
    }
}

/// A count field followed by that many elements.
#[derive(Debug, Clone)]
pub struct PrefixedArray {
    count: ConstructRef,
    child: ConstructRef,
}

impl PrefixedArray {
    pub fn new(count: impl Into<ConstructRef>, child: impl Into<ConstructRef>) -> Self {
        Self {
            count: count.into(),
            child: child.into(),
        }
    }
}

impl Construct for PrefixedArray {
    fn parse(&self, stream: &mut dyn Stream, ctx: &mut Context, path: &str) -> Result<Value> {
        let count = parse_child(&*self.count, stream, ctx, path)?;
        let count = count
            .as_int()
            .filter(|n| *n >= 0)
            .ok_or_else(|| ErrorKind::RangeCount(format!("invalid element count {count:?}")).at(path))?;

        let mut items = Vec::with_capacity((count as usize).min(4096));
        for i in 0..count as usize {
            ctx.insert("_index", i);
            items.push(parse_child(&*self.child, stream, ctx, &element_path(path, i))?);
        }
        Ok(Value::List(items))
    }

    fn build(
        &self,
        value: &Value,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        let items = list_input(value, path)?;
        build_child(&*self.count, &Value::from(items.len()), stream, ctx, path)?;
        Ok(Value::List(build_elements(&*self.child, &items, stream, ctx, path)?))
    }

    fn sizeof(&self, _ctx: &mut Context, path: &str) -> Result<usize> {
        Err(ErrorKind::SizeofUnknown("prefixed array length depends on the data".into()).at(path))
    }
}

impl_into_ref!(Array, BoundedRange, GreedyRange, RepeatUntil, PrefixedArray);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{obj, this};
    use crate::primitives::{u16_be, u8};
    use crate::structs::{Struct, field};
    use crate::{ConstructExt, container};

    fn ints(values: &[i128]) -> Value {
        Value::List(values.iter().copied().map(Value::Int).collect())
    }

    #[test]
    fn test_array_count_checked_on_build() {
        let a = Array::new(3, u8());
        assert_eq!(a.build_bytes(&ints(&[1, 2, 3])).unwrap(), vec![1, 2, 3]);
        let err = a.build_bytes(&ints(&[1, 2])).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::RangeCount(_)));
        assert_eq!(a.static_size().unwrap(), 3);
    }

    #[test]
    fn test_array_size_overflow() {
        let err = Array::new(usize::MAX, u16_be()).static_size().unwrap_err();
        assert!(matches!(err.kind, ErrorKind::SizeofUnknown(_)));
    }

    #[test]
    fn test_array_underflow() {
        let err = Array::new(3, u16_be()).parse_bytes(&[0, 1, 0, 2, 0]).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::StreamUnderflow(_)));
        assert_eq!(err.path, "this[2]");
        assert_eq!(err.offset, Some(4));
    }

    #[test]
    fn test_array_discard() {
        let a = Array::new(2, u8()).discard();
        assert_eq!(a.parse_bytes(&[1, 2]).unwrap(), ints(&[]));
    }

    #[test]
    fn test_index_visible_to_elements() {
        let s = Array::new(2, Struct::new([field("i", crate::derived::Computed::new(this("_._index")))]));
        assert_eq!(
            s.parse_bytes(&[]).unwrap(),
            Value::List(vec![container! { "i" => 0 }, container! { "i" => 1 }])
        );
    }

    #[test]
    fn test_greedy_range_restores_last_boundary() {
        let r = GreedyRange::new(u16_be());
        let mut stream = stream::memory(vec![0, 1, 0, 2, 9]);
        let mut ctx = Context::default();
        let parsed = r.parse(&mut stream, &mut ctx, "this").unwrap();
        assert_eq!(parsed, ints(&[1, 2]));
        assert_eq!(stream::tell(&mut stream, "this").unwrap(), 4);
        assert_eq!(r.build_bytes(&parsed).unwrap(), vec![0, 1, 0, 2]);
    }

    #[test]
    fn test_bounded_range() {
        let r = BoundedRange::new(2, 3, u8());
        assert_eq!(r.parse_bytes(&[1, 2, 3, 4]).unwrap(), ints(&[1, 2, 3]));
        assert!(matches!(
            r.parse_bytes(&[1]).unwrap_err().kind,
            ErrorKind::RangeCount(_)
        ));
        assert!(r.build_bytes(&ints(&[1, 2, 3, 4])).is_err());
    }

    #[test]
    fn test_repeat_until() {
        let r = RepeatUntil::new(obj().eq(0), u8());
        assert_eq!(r.parse_bytes(&[5, 6, 0, 7]).unwrap(), ints(&[5, 6, 0]));
        assert_eq!(r.build_bytes(&ints(&[5, 0, 9])).unwrap(), vec![5, 0]);
        assert!(matches!(
            r.build_bytes(&ints(&[5, 6])).unwrap_err().kind,
            ErrorKind::RangeCount(_)
        ));
    }

    #[test]
    fn test_prefixed_array() {
        let p = PrefixedArray::new(u8(), u16_be());
        assert_eq!(p.build_bytes(&ints(&[1, 2])).unwrap(), vec![2, 0, 1, 0, 2]);
        assert_eq!(p.parse_bytes(&[1, 0, 9]).unwrap(), ints(&[9]));
    }
}
