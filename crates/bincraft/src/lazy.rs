//! Lazy variants: parse records where each member lives and defers the work until the
//! member is read.
//!
//! A lazy value keeps a shared snapshot of the bytes it spans and of the context as it
//! was when parsing finished. Members with a non-zero static size are skipped over; the
//! others are parsed on the spot, since the position of whatever follows them depends
//! on it. A deferred member resolves against the snapshot alone, so it cannot reach
//! bytes outside the record.
//! Each member caches its value once resolved. Equality, forcing and pretty-printing
//! resolve every member.

use std::fmt;
use std::io::{self, Read, SeekFrom, Write};
use std::sync::{Arc, OnceLock};

use crate::construct::{
    ConstructRef, element_path, impl_into_ref, member_path, parse_child, static_count,
};
use crate::context::Context;
use crate::errors::{ErrorKind, Result};
use crate::expr::Expr;
use crate::repeaters::{Array, BoundedRange};
use crate::stream::{self, Stream};
use crate::structs::{Sequence, Struct};
use crate::value::{Container, Value};
use crate::Construct;

/// Read-only stream over a shared snapshot taken at offset `base` of the input.
///
/// Positions stay those of the input stream.
struct SharedBytes {
    data: Arc<[u8]>,
    base: u64,
    pos: u64,
}

impl Read for SharedBytes {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let Some(rel) = self.pos.checked_sub(self.base) else {
            return Ok(0);
        };
        let start = usize::try_from(rel).map_or(self.data.len(), |r| r.min(self.data.len()));
        let n = out.len().min(self.data.len() - start);
        out[..n].copy_from_slice(&self.data[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Write for SharedBytes {
    fn write(&mut self, _data: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "lazy snapshots are read-only",
        ))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Seek for SharedBytes {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => n as i128,
            SeekFrom::Current(d) => self.pos as i128 + d as i128,
            SeekFrom::End(d) => self.base as i128 + self.data.len() as i128 + d as i128,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of snapshot",
            ));
        }
        self.pos = target as u64;
        Ok(self.pos)
    }
}

struct Slot {
    name: Option<String>,
    offset: u64,
    construct: ConstructRef,
    path: String,
    /// Value of the `_index` key, for repeater elements.
    index: Option<usize>,
    cache: OnceLock<Value>,
}

impl Slot {
    fn new(name: Option<&str>, offset: u64, construct: &ConstructRef, path: String) -> Self {
        Self {
            name: name.map(str::to_string),
            offset,
            construct: construct.clone(),
            path,
            index: None,
            cache: OnceLock::new(),
        }
    }

    fn parsed(mut self, value: Value) -> Self {
        self.cache = OnceLock::from(value);
        self
    }
}

/// The shared state behind a lazy container or list.
struct Members {
    data: Arc<[u8]>,
    /// Input offset of `data[0]`.
    base: u64,
    ctx: Context,
    slots: Vec<Slot>,
    /// Whether a member sees the members before it, as structure fields do.
    chained: bool,
}

impl Members {
    fn resolve(&self, i: usize) -> Result<Value> {
        let slot = &self.slots[i];
        if let Some(value) = slot.cache.get() {
            return Ok(value.clone());
        }

        let mut ctx = self.ctx.clone();
        if self.chained {
            for (j, earlier) in self.slots[..i].iter().enumerate() {
                if let Some(name) = &earlier.name {
                    let value = self.resolve(j)?;
                    ctx.insert(name.as_str(), value);
                }
            }
        }
        if let Some(index) = slot.index {
            ctx.insert("_index", index);
        }

        let mut stream = SharedBytes {
            data: self.data.clone(),
            base: self.base,
            pos: slot.offset,
        };
        tracing::trace!(path = %slot.path, offset = slot.offset, "resolving lazy member");
        let value = parse_child(&*slot.construct, &mut stream, &mut ctx, &slot.path)?;
        // A concurrent resolution may have won; both parsed the same bytes.
        let _ = slot.cache.set(value.clone());
        Ok(value)
    }

    fn resolved(&self) -> usize {
        self.slots.iter().filter(|s| s.cache.get().is_some()).count()
    }

    /// Path of the list itself, for errors not tied to an element.
    fn list_path(&self) -> String {
        self.slots
            .first()
            .and_then(|s| s.path.rsplit_once('['))
            .map_or_else(|| crate::construct::ROOT_PATH.to_string(), |(p, _)| p.to_string())
    }
}

/// A structure whose members are parsed on first access.
#[derive(Clone)]
pub struct LazyContainer {
    members: Arc<Members>,
}

impl LazyContainer {
    /// The member named `name`, or `None` if there is no such member.
    pub fn get(&self, name: &str) -> Result<Option<Value>> {
        match self
            .members
            .slots
            .iter()
            .position(|s| s.name.as_deref() == Some(name))
        {
            Some(i) => self.members.resolve(i).map(Some),
            None => Ok(None),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.members.slots.iter().filter_map(|s| s.name.as_deref())
    }

    pub fn len(&self) -> usize {
        self.keys().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of members resolved so far.
    pub fn resolved(&self) -> usize {
        self.members.resolved()
    }

    /// Resolves every member into an ordinary container.
    pub fn force(&self) -> Result<Container> {
        let mut out = Container::new();
        for (i, slot) in self.members.slots.iter().enumerate() {
            if let Some(name) = &slot.name {
                out.insert(name.as_str(), self.members.resolve(i)?.force()?);
            }
        }
        Ok(out)
    }
}

impl fmt::Debug for LazyContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyContainer")
            .field("keys", &self.keys().collect::<Vec<_>>())
            .field("resolved", &self.resolved())
            .finish()
    }
}

/// A list whose elements are parsed on first access.
#[derive(Clone)]
pub struct LazyList {
    members: Arc<Members>,
}

impl LazyList {
    pub fn get(&self, index: usize) -> Result<Value> {
        if index >= self.len() {
            return Err(ErrorKind::Expression(format!(
                "index {index} out of range for {} elements",
                self.len()
            ))
            .at(&self.members.list_path()));
        }
        self.members.resolve(index)
    }

    pub fn len(&self) -> usize {
        self.members.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.slots.is_empty()
    }

    pub fn resolved(&self) -> usize {
        self.members.resolved()
    }

    pub fn force(&self) -> Result<Vec<Value>> {
        (0..self.len())
            .map(|i| self.members.resolve(i)?.force())
            .collect()
    }
}

impl fmt::Debug for LazyList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyList")
            .field("len", &self.len())
            .field("resolved", &self.resolved())
            .finish()
    }
}

/// Parses the pending fixed-size members now, so a variable-size member sees them.
fn materialize(
    slots: &mut [Slot],
    stream: &mut dyn Stream,
    ctx: &mut Context,
    path: &str,
) -> Result<()> {
    let back = stream::tell(stream, path)?;
    for slot in slots.iter_mut().filter(|s| s.cache.get().is_none()) {
        stream::seek(stream, SeekFrom::Start(slot.offset), &slot.path)?;
        let value = parse_child(&*slot.construct, stream, ctx, &slot.path)?;
        if let Some(name) = &slot.name {
            ctx.insert(name.as_str(), value.clone());
        }
        slot.cache = OnceLock::from(value);
    }
    stream::seek(stream, SeekFrom::Start(back), path)?;
    Ok(())
}

/// Walks `members`, skipping the fixed-size ones and parsing the rest in place.
fn scan_members(
    members: &[ConstructRef],
    stream: &mut dyn Stream,
    ctx: &mut Context,
    path: &str,
    named_paths: bool,
) -> Result<Vec<Slot>> {
    let mut slots: Vec<Slot> = Vec::with_capacity(members.len());

    for (i, member) in members.iter().enumerate() {
        let sub = match member.name() {
            Some(name) if named_paths => member_path(path, name),
            _ if named_paths => path.to_string(),
            _ => element_path(path, i),
        };
        let offset = stream::tell(stream, &sub)?;

        if named_paths && member.is_embedded() {
            materialize(&mut slots, stream, ctx, path)?;
            let before: Vec<String> = ctx.this().keys().map(str::to_string).collect();
            member.parse_inline(stream, ctx, &sub, false)?;
            let added: Vec<(String, Value)> = ctx
                .this()
                .iter()
                .filter(|(key, _)| !before.iter().any(|b| b.as_str() == *key))
                .map(|(key, value)| (key.to_string(), value.clone()))
                .collect();
            for (name, value) in added {
                slots.push(Slot::new(Some(&name), offset, member, sub.clone()).parsed(value));
            }
            continue;
        }

        match member.sizeof(ctx, &sub) {
            Ok(n) if n > 0 => {
                let step = i64::try_from(n).map_err(|_| {
                    ErrorKind::StreamUnderflow(format!("member of {n} bytes")).at(&sub)
                })?;
                stream::seek(stream, SeekFrom::Current(step), &sub)?;
                slots.push(Slot::new(member.name(), offset, member, sub));
            }
            _ => {
                materialize(&mut slots, stream, ctx, path)?;
                let value = parse_child(&**member, stream, ctx, &sub)?;
                if let Some(name) = member.name() {
                    ctx.insert(name, value.clone());
                }
                slots.push(Slot::new(member.name(), offset, member, sub).parsed(value));
            }
        }
    }

    // Skipping may have run past the end; fail now as an eager parse would.
    let end = stream::tell(stream, path)?;
    if end > stream::size(stream, path)? {
        materialize(&mut slots, stream, ctx, path)?;
    }
    Ok(slots)
}

/// A structure whose fixed-size fields are parsed on first access.
#[derive(Debug, Clone)]
pub struct LazyStruct {
    inner: Struct,
}

impl LazyStruct {
    pub fn new(fields: impl IntoIterator<Item = ConstructRef>) -> Self {
        Self {
            inner: Struct::new(fields),
        }
    }
}

impl Construct for LazyStruct {
    fn parse(&self, stream: &mut dyn Stream, ctx: &mut Context, path: &str) -> Result<Value> {
        let start = stream::tell(stream, path)?;
        ctx.push(Container::new());
        let result = scan_members(self.inner.fields(), stream, ctx, path, true);
        let snapshot = ctx.clone();
        ctx.pop();
        let slots = result?;
        let end = stream::tell(stream, path)?;

        let members = Members {
            data: stream::snapshot(stream, start, end, path)?,
            base: start,
            ctx: snapshot,
            slots,
            chained: true,
        };
        Ok(Value::LazyContainer(LazyContainer {
            members: Arc::new(members),
        }))
    }

    fn build(
        &self,
        value: &Value,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        self.inner.build(value, stream, ctx, path)
    }

    fn sizeof(&self, ctx: &mut Context, path: &str) -> Result<usize> {
        self.inner.sizeof(ctx, path)
    }
}

/// A sequence whose fixed-size items are parsed on first access.
#[derive(Debug, Clone)]
pub struct LazySequence {
    items: Vec<ConstructRef>,
    inner: Sequence,
}

impl LazySequence {
    pub fn new(items: impl IntoIterator<Item = ConstructRef>) -> Self {
        let items: Vec<ConstructRef> = items.into_iter().collect();
        Self {
            inner: Sequence::new(items.clone()),
            items,
        }
    }
}

impl Construct for LazySequence {
    fn parse(&self, stream: &mut dyn Stream, ctx: &mut Context, path: &str) -> Result<Value> {
        let start = stream::tell(stream, path)?;
        ctx.push(Container::new());
        let result = scan_members(&self.items, stream, ctx, path, false);
        let snapshot = ctx.clone();
        ctx.pop();
        let slots = result?;
        let end = stream::tell(stream, path)?;

        let members = Members {
            data: stream::snapshot(stream, start, end, path)?,
            base: start,
            ctx: snapshot,
            slots,
            chained: true,
        };
        Ok(Value::LazyList(LazyList {
            members: Arc::new(members),
        }))
    }

    fn build(
        &self,
        value: &Value,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        self.inner.build(value, stream, ctx, path)
    }

    fn sizeof(&self, ctx: &mut Context, path: &str) -> Result<usize> {
        self.inner.sizeof(ctx, path)
    }
}

/// `count` fixed-size elements located without parsing them.
fn lazy_elements(
    child: &ConstructRef,
    count: usize,
    size: usize,
    stream: &mut dyn Stream,
    ctx: &Context,
    path: &str,
) -> Result<Value> {
    let start = stream::tell(stream, path)?;
    let available = stream::size(stream, path)?.saturating_sub(start);
    let total = count
        .checked_mul(size)
        .map(|n| n as u64)
        .filter(|n| *n <= available)
        .ok_or_else(|| {
            ErrorKind::StreamUnderflow(format!(
                "{count} elements of {size} bytes do not fit in {available} bytes"
            ))
            .at(path)
        })?;

    let data = stream::snapshot(stream, start, start + total, path)?;
    stream::seek(stream, SeekFrom::Start(start + total), path)?;

    let slots = (0..count)
        .map(|i| {
            // i * size <= total, checked above
            let offset = start + (i * size) as u64;
            let mut slot = Slot::new(None, offset, child, element_path(path, i));
            slot.index = Some(i);
            slot
        })
        .collect();
    let members = Members {
        data,
        base: start,
        ctx: ctx.clone(),
        slots,
        chained: false,
    };
    Ok(Value::LazyList(LazyList {
        members: Arc::new(members),
    }))
}

/// Wraps eagerly parsed elements so every list variant has the same shape.
fn parsed_elements(
    child: &ConstructRef,
    items: Vec<Value>,
    ctx: &Context,
    path: &str,
) -> Value {
    let slots = items
        .into_iter()
        .enumerate()
        .map(|(i, v)| Slot::new(None, 0, child, element_path(path, i)).parsed(v))
        .collect();
    Value::LazyList(LazyList {
        members: Arc::new(Members {
            data: Arc::from(Vec::new()),
            base: 0,
            ctx: ctx.clone(),
            slots,
            chained: false,
        }),
    })
}

/// `count` elements parsed on first access. A child without a static size is parsed
/// eagerly.
#[derive(Debug, Clone)]
pub struct LazyArray {
    count: Expr,
    child: ConstructRef,
    inner: Array,
}

impl LazyArray {
    pub fn new(count: impl Into<Expr>, child: impl Into<ConstructRef>) -> Self {
        let count = count.into();
        let child = child.into();
        Self {
            inner: Array::new(count.clone(), child.clone()),
            count,
            child,
        }
    }
}

impl Construct for LazyArray {
    fn parse(&self, stream: &mut dyn Stream, ctx: &mut Context, path: &str) -> Result<Value> {
        let count = self.count.evaluate_usize(ctx, path)?;
        match self.child.sizeof(ctx, &element_path(path, 0)) {
            Ok(size) => lazy_elements(&self.child, count, size, stream, ctx, path),
            Err(_) => {
                let items = self.inner.parse(stream, ctx, path)?;
                let items = items.as_list().map(<[Value]>::to_vec).unwrap_or_default();
                Ok(parsed_elements(&self.child, items, ctx, path))
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
        self.inner.build(value, stream, ctx, path)
    }

    fn sizeof(&self, ctx: &mut Context, path: &str) -> Result<usize> {
        self.inner.sizeof(ctx, path)
    }
}

/// Between `min` and `max` elements, as many as the stream holds, parsed on first
/// access. A child without a static size (or of size zero) is parsed eagerly.
#[derive(Debug, Clone)]
pub struct LazyRange {
    min: Expr,
    max: Expr,
    child: ConstructRef,
    inner: BoundedRange,
}

impl LazyRange {
    pub fn new(min: impl Into<Expr>, max: impl Into<Expr>, child: impl Into<ConstructRef>) -> Self {
        let (min, max, child) = (min.into(), max.into(), child.into());
        Self {
            inner: BoundedRange::new(min.clone(), max.clone(), child.clone()),
            min,
            max,
            child,
        }
    }
}

impl Construct for LazyRange {
    fn parse(&self, stream: &mut dyn Stream, ctx: &mut Context, path: &str) -> Result<Value> {
        let size = self
            .child
            .sizeof(ctx, &element_path(path, 0))
            .ok()
            .filter(|n| *n > 0);
        let Some(size) = size else {
            let items = self.inner.parse(stream, ctx, path)?;
            let items = items.as_list().map(<[Value]>::to_vec).unwrap_or_default();
            return Ok(parsed_elements(&self.child, items, ctx, path));
        };

        let min = self.min.evaluate_usize(ctx, path)?;
        let max = self.max.evaluate_usize(ctx, path)?;
        let remaining = stream::size(stream, path)?.saturating_sub(stream::tell(stream, path)?);
        let count = max.min(remaining as usize / size);
        if count < min {
            return Err(ErrorKind::RangeCount(format!(
                "expected at least {min} elements, found {count}"
            ))
            .at(path));
        }
        lazy_elements(&self.child, count, size, stream, ctx, path)
    }

    fn build(
        &self,
        value: &Value,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        self.inner.build(value, stream, ctx, path)
    }

    fn sizeof(&self, ctx: &mut Context, path: &str) -> Result<usize> {
        let min = static_count(&self.min, ctx, path)?;
        let max = static_count(&self.max, ctx, path)?;
        if min != max {
            return Err(ErrorKind::SizeofUnknown(format!(
                "element count varies between {min} and {max}"
            ))
            .at(path));
        }
        let size = self.child.sizeof(ctx, &element_path(path, 0))?;
        min.checked_mul(size).ok_or_else(|| {
            ErrorKind::SizeofUnknown(format!("{min} elements of {size} bytes overflow")).at(path)
        })
    }
}

type Factory = Arc<dyn Fn() -> ConstructRef + Send + Sync>;

/// A construct produced on first use, for formats that refer to themselves.
#[derive(Clone)]
pub struct LazyBound {
    factory: Factory,
    child: Arc<OnceLock<ConstructRef>>,
}

impl LazyBound {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> ConstructRef + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(factory),
            child: Arc::new(OnceLock::new()),
        }
    }

    fn child(&self) -> &ConstructRef {
        self.child.get_or_init(|| (self.factory)())
    }
}

impl fmt::Debug for LazyBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyBound")
            .field("bound", &self.child.get().is_some())
            .finish()
    }
}

impl Construct for LazyBound {
    fn parse(&self, stream: &mut dyn Stream, ctx: &mut Context, path: &str) -> Result<Value> {
        self.child().parse(stream, ctx, path)
    }

    fn build(
        &self,
        value: &Value,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        self.child().build(value, stream, ctx, path)
    }

    fn sizeof(&self, ctx: &mut Context, path: &str) -> Result<usize> {
        self.child().sizeof(ctx, path)
    }
}

impl_into_ref!(LazyStruct, LazySequence, LazyArray, LazyRange, LazyBound);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditional::IfThenElse;
    use crate::derived::Computed;
    use crate::expr::this;
    use crate::primitives::{GreedyBytes, Pass, bytes, u16_be, u64_be, u8};
    use crate::structs::{Embedded, Struct, field};
    use crate::{ConstructExt, container};

    #[test]
    fn test_lazy_struct_defers_fixed_fields() {
        let s = LazyStruct::new([field("a", u8()), field("b", u16_be()), field("c", u8())]);
        let parsed = s.parse_bytes(&[1, 0, 2, 3]).unwrap();
        let Value::LazyContainer(lazy) = &parsed else {
            panic!("expected a lazy container, found {parsed:?}");
        };
        assert_eq!(lazy.resolved(), 0);
        assert_eq!(lazy.get("b").unwrap(), Some(Value::Int(2)));
        assert_eq!(lazy.resolved(), 2);
        assert_eq!(lazy.get("zz").unwrap(), None);
        assert_eq!(parsed, container! { "a" => 1, "b" => 2, "c" => 3 });
    }

    #[test]
    fn test_lazy_struct_variable_field_sees_earlier_fields() {
        let s = LazyStruct::new([
            field("n", u8()),
            field("data", bytes(this("n"))),
            field("tail", u8()),
        ]);
        let parsed = s.parse_bytes(&[2, 7, 8, 9]).unwrap();
        assert_eq!(parsed.attr("tail").unwrap(), Value::Int(9));
        assert_eq!(parsed.attr("data").unwrap(), Value::Bytes(vec![7, 8]));
    }

    #[test]
    fn test_lazy_member_sees_earlier_lazy_member() {
        let s = LazyStruct::new([
            field("w", u16_be()),
            field("double", Computed::new(this("w") * 2)),
        ]);
        let parsed = s.parse_bytes(&[0, 5]).unwrap();
        assert_eq!(parsed.attr("double").unwrap(), Value::Int(10));
    }

    #[test]
    fn test_lazy_struct_condition_on_skipped_field() {
        let s = LazyStruct::new([
            field("wide", u8()),
            field("v", IfThenElse::new(this("wide"), u16_be(), Pass)),
            field("tail", u8()),
        ]);
        let parsed = s.parse_bytes(&[1, 0, 5, 6]).unwrap();
        assert_eq!(parsed, container! { "wide" => 1, "v" => 5, "tail" => 6 });
    }

    #[test]
    fn test_lazy_struct_embedded_members() {
        let s = LazyStruct::new([
            field("a", u8()),
            Embedded::new(Struct::new([field("b", u8()), field("c", u8())])).into(),
            field("d", u8()),
        ]);
        let parsed = s.parse_bytes(&[1, 2, 3, 4]).unwrap();
        assert_eq!(
            parsed,
            container! { "a" => 1, "b" => 2, "c" => 3, "d" => 4 }
        );
    }

    #[test]
    fn test_lazy_struct_builds_like_struct() {
        let s = LazyStruct::new([field("a", u8()), field("rest", GreedyBytes)]);
        let parsed = s.parse_bytes(&[1, 2, 3]).unwrap();
        assert_eq!(s.build_bytes(&parsed).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_lazy_sequence() {
        let s = LazySequence::new([u8(), u16_be()]);
        let parsed = s.parse_bytes(&[1, 0, 2]).unwrap();
        assert_eq!(parsed.item(1).unwrap(), Value::Int(2));
        assert_eq!(parsed, Value::from(vec![Value::from(1), Value::from(2)]));
    }

    #[test]
    fn test_lazy_array() {
        let a = LazyArray::new(3, u16_be());
        let parsed = a.parse_bytes(&[0, 1, 0, 2, 0, 3]).unwrap();
        let Value::LazyList(list) = &parsed else {
            panic!("expected a lazy list, found {parsed:?}");
        };
        assert_eq!(list.len(), 3);
        assert_eq!(list.get(2).unwrap(), Value::Int(3));
        assert_eq!(list.resolved(), 1);
        assert!(list.get(3).is_err());

        assert!(matches!(
            a.parse_bytes(&[0, 1]).unwrap_err().kind,
            ErrorKind::StreamUnderflow(_)
        ));
    }

    #[test]
    fn test_lazy_range_takes_what_fits() {
        let r = LazyRange::new(1, 10, u16_be());
        assert_eq!(
            r.parse_bytes(&[0, 1, 0, 2, 9]).unwrap(),
            Value::from(vec![Value::from(1), Value::from(2)])
        );
        assert!(matches!(
            r.parse_bytes(&[9]).unwrap_err().kind,
            ErrorKind::RangeCount(_)
        ));
    }

    #[test]
    fn test_lazy_array_huge_count_fails() {
        let a = LazyArray::new(this("n"), u16_be());
        let format = Struct::new([field("n", u64_be()), field("items", a)]);
        let err = format
            .parse_bytes(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0, 1])
            .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::StreamUnderflow(_)));
    }

    #[test]
    fn test_lazy_array_keeps_only_its_window() {
        let format = Struct::new([
            field("head", bytes(4)),
            field("items", LazyArray::new(2, u8())),
            field("rest", GreedyBytes),
        ]);
        let mut data = vec![0xEE; 4];
        data.extend([7, 8]);
        data.extend(vec![0xAA; 4096]);
        let parsed = format.parse_bytes(&data).unwrap();

        let items = parsed.attr("items").unwrap();
        let Value::LazyList(list) = &items else {
            panic!("expected a lazy list, found {items:?}");
        };
        assert_eq!(list.members.data.len(), 2);
        assert_eq!(list.members.base, 4);
        assert_eq!(items, Value::from(vec![Value::from(7), Value::from(8)]));
    }

    #[test]
    fn test_lazy_struct_keeps_only_its_window() {
        let format = Struct::new([
            field("skip", u8()),
            field("rec", LazyStruct::new([field("a", u8()), field("b", u16_be())])),
            field("rest", GreedyBytes),
        ]);
        let parsed = format.parse_bytes(&[9, 1, 0, 2, 0xAA, 0xAA, 0xAA]).unwrap();
        let rec = parsed.attr("rec").unwrap();
        let Value::LazyContainer(lazy) = &rec else {
            panic!("expected a lazy container, found {rec:?}");
        };
        assert_eq!(&*lazy.members.data, &[1, 0, 2]);
        assert_eq!(rec, container! { "a" => 1, "b" => 2 });
    }

    fn node() -> ConstructRef {
        Struct::new([
            field("v", u8()),
            field(
                "next",
                IfThenElse::new(this("v"), LazyBound::new(node), Pass),
            ),
        ])
        .into()
    }

    #[test]
    fn test_lazy_bound_recursion() {
        let parsed = node().parse_bytes(&[1, 2, 0]).unwrap();
        assert_eq!(
            parsed,
            container! {
                "v" => 1,
                "next" => container! {
                    "v" => 2,
                    "next" => container! { "v" => 0, "next" => Value::None },
                },
            }
        );
        assert_eq!(node().build_bytes(&parsed).unwrap(), vec![1, 2, 0]);
    }
}
