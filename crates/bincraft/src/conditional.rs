//! Choice: speculative alternatives, overlays, conditions and keyed dispatch.

use std::io::SeekFrom;

use crate::construct::{
    ConstructRef, build_child, container_input, impl_into_ref, insert_inline, member_path,
    parse_child,
};
use crate::context::Context;
use crate::errors::{ErrorKind, Result};
use crate::expr::Expr;
use crate::primitives::Pass;
use crate::stream::{self, Stream};
use crate::value::{Container, Value};
use crate::Construct;

/// Builds `child` into a scratch buffer and copies it out on success, so a failed
/// attempt leaves no bytes behind.
pub(crate) fn build_scratch(
    child: &dyn Construct,
    value: &Value,
    ctx: &mut Context,
    path: &str,
) -> Result<(Value, Vec<u8>)> {
    let mut scratch = stream::memory(Vec::new());
    let built = child.build(value, &mut scratch, ctx, path)?;
    Ok((built, scratch.into_inner()))
}

/// Copies a scratch buffer into `stream` and relocates the patches recorded against it.
pub(crate) fn splice_scratch(
    data: &[u8],
    mark: usize,
    stream: &mut dyn Stream,
    ctx: &mut Context,
    path: &str,
) -> Result<()> {
    let base = stream::tell(stream, path)?;
    stream::write_all(stream, data, path)?;
    ctx.rebase_deferred_since(mark, base);
    Ok(())
}

/// The first alternative that succeeds.
#[derive(Debug, Clone)]
pub struct Select {
    alternatives: Vec<ConstructRef>,
    include_name: bool,
}

impl Select {
    pub fn new(alternatives: impl IntoIterator<Item = ConstructRef>) -> Self {
        Self {
            alternatives: alternatives.into_iter().collect(),
            include_name: false,
        }
    }

    /// Parse yields `{name, value}` naming the matching alternative; build accepts the
    /// same shape and goes straight to that alternative.
    pub fn include_name(mut self) -> Self {
        self.include_name = true;
        self
    }

    fn tagged(&self, alternative: &ConstructRef, value: Value) -> Value {
        if !self.include_name {
            return value;
        }
        let mut c = Container::new();
        c.insert("name", Value::from(alternative.name()));
        c.insert("value", value);
        Value::Container(c)
    }

    fn try_build(
        &self,
        alternative: &ConstructRef,
        value: &Value,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        let mark = ctx.deferred_mark();
        match build_scratch(&**alternative, value, ctx, path) {
            Ok((built, data)) => {
                splice_scratch(&data, mark, stream, ctx, path)?;
                Ok(self.tagged(alternative, built))
            }
            Err(e) => {
                ctx.discard_deferred_since(mark);
                Err(e)
            }
        }
    }
}

impl Construct for Select {
    fn parse(&self, stream: &mut dyn Stream, ctx: &mut Context, path: &str) -> Result<Value> {
        let start = stream::tell(stream, path)?;

        for alternative in &self.alternatives {
            match parse_child(&**alternative, stream, ctx, path) {
                Ok(value) => return Ok(self.tagged(alternative, value)),
                Err(e) if e.is_explicit() => return Err(e),
                Err(e) => {
                    tracing::trace!(path = path, error = %e, "select alternative failed, rewinding");
                    stream::seek(stream, SeekFrom::Start(start), path)?;
                }
            }
        }

        Err(ErrorKind::SelectNoMatch(format!(
            "none of {} alternatives parsed",
            self.alternatives.len()
        ))
        .at(path))
    }

    fn build(
        &self,
        value: &Value,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        if self.include_name {
            if let Some(tag) = value.as_container() {
                let name = tag.get("name").and_then(Value::as_str);
                let inner = tag.get("value").cloned().unwrap_or_default();
                if let Some(alternative) = self
                    .alternatives
                    .iter()
                    .find(|a| name.is_some() && a.name() == name)
                {
                    return self.try_build(alternative, &inner, stream, ctx, path);
                }
            }
        }

        for alternative in &self.alternatives {
            match self.try_build(alternative, value, stream, ctx, path) {
                Ok(built) => return Ok(built),
                Err(e) if e.is_explicit() => return Err(e),
                Err(e) => {
                    tracing::trace!(path = path, error = %e, "select alternative failed to build");
                }
            }
        }

        Err(ErrorKind::SelectNoMatch(format!(
            "none of {} alternatives could build {value:?}",
            self.alternatives.len()
        ))
        .at(path))
    }

    fn sizeof(&self, ctx: &mut Context, path: &str) -> Result<usize> {
        let mut sizes = Vec::with_capacity(self.alternatives.len());
        for alternative in &self.alternatives {
            sizes.push(alternative.sizeof(ctx, path)?);
        }
        match sizes.split_first() {
            Some((first, rest)) if rest.iter().all(|s| s == first) => Ok(*first),
            _ => Err(ErrorKind::SizeofUnknown("select alternatives differ in size".into()).at(path)),
        }
    }

    fn is_self_supplying(&self) -> bool {
        self.alternatives.iter().any(|a| a.is_self_supplying())
    }
}

/// `child`, or absence when it fails.
pub fn optional(child: impl Into<ConstructRef>) -> ConstructRef {
    Select::new([child.into(), Pass.into()]).into()
}

/// Selects a union alternative by position or name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnionKey {
    Index(usize),
    Name(String),
}

impl From<usize> for UnionKey {
    fn from(index: usize) -> Self {
        UnionKey::Index(index)
    }
}

impl From<&str> for UnionKey {
    fn from(name: &str) -> Self {
        UnionKey::Name(name.to_string())
    }
}

/// Alternatives overlaid on the same bytes.
///
/// With a `parse_from` key the stream ends where that alternative ended. Without one it
/// advances by the largest fixed size among the alternatives (zero if none is fixed), on
/// parse and build alike.
#[derive(Debug, Clone)]
pub struct Union {
    parse_from: Option<UnionKey>,
    alternatives: Vec<ConstructRef>,
}

impl Union {
    pub fn new(
        parse_from: Option<UnionKey>,
        alternatives: impl IntoIterator<Item = ConstructRef>,
    ) -> Self {
        Self {
            parse_from,
            alternatives: alternatives.into_iter().collect(),
        }
    }

    fn key_index(&self, path: &str) -> Result<Option<usize>> {
        let Some(key) = &self.parse_from else {
            return Ok(None);
        };
        let index = match key {
            UnionKey::Index(i) => Some(*i).filter(|i| *i < self.alternatives.len()),
            UnionKey::Name(name) => self
                .alternatives
                .iter()
                .position(|a| a.name() == Some(name.as_str())),
        };
        index
            .map(Some)
            .ok_or_else(|| ErrorKind::TypeMismatch(format!("union key {key:?} names no alternative")).at(path))
    }

    fn fixed_advance(&self, ctx: &mut Context, path: &str) -> usize {
        self.alternatives
            .iter()
            .filter_map(|a| a.sizeof(ctx, path).ok())
            .max()
            .unwrap_or(0)
    }

    fn parse_into_frame(
        &self,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
        embedded: Option<bool>,
    ) -> Result<()> {
        let key = self.key_index(path)?;
        let start = stream::tell(stream, path)?;
        let mut end = start;

        for (i, alternative) in self.alternatives.iter().enumerate() {
            stream::seek(stream, SeekFrom::Start(start), path)?;
            let sub = alternative.name().map_or_else(|| path.to_string(), |n| member_path(path, n));
            let value = parse_child(&**alternative, stream, ctx, &sub)?;
            if key == Some(i) {
                end = stream::tell(stream, path)?;
            }
            if let Some(name) = alternative.name() {
                match embedded {
                    Some(allow) => insert_inline(ctx, name, value, allow, &sub)?,
                    None => ctx.insert(name, value),
                }
            }
        }

        if key.is_none() {
            end = start + self.fixed_advance(ctx, path) as u64;
        }
        stream::seek(stream, SeekFrom::Start(end), path)?;
        Ok(())
    }

    fn build_into_frame(
        &self,
        input: &Container,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
    ) -> Result<()> {
        let chosen = self
            .alternatives
            .iter()
            .find(|a| a.name().is_some_and(|n| input.contains_key(n)))
            .ok_or_else(|| {
                ErrorKind::MissingField("any union alternative".to_string()).at(path)
            })?;
        let name = chosen.name().unwrap_or_default();
        let sub = member_path(path, name);

        let start = stream::tell(stream, path)?;
        let value = input.get(name).cloned().unwrap_or_default();
        let built = build_child(&**chosen, &value, stream, ctx, &sub)?;
        ctx.insert(name, built);

        if self.key_index(path)?.is_none() {
            let advance = self.fixed_advance(ctx, path) as u64;
            let written = stream::tell(stream, path)? - start;
            if written < advance {
                stream::write_all(stream, &vec![0; (advance - written) as usize], path)?;
            }
            stream::seek(stream, SeekFrom::Start(start + advance), path)?;
        }
        Ok(())
    }
}

impl Construct for Union {
    fn parse(&self, stream: &mut dyn Stream, ctx: &mut Context, path: &str) -> Result<Value> {
        ctx.push(Container::new());
        let result = self.parse_into_frame(stream, ctx, path, None);
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
        let result = self.build_into_frame(&input, stream, ctx, path);
        let frame = ctx.pop();
        result.map(|()| Value::Container(frame))
    }

    fn sizeof(&self, ctx: &mut Context, path: &str) -> Result<usize> {
        match self.key_index(path)? {
            Some(i) => self.alternatives[i].sizeof(ctx, path),
            None => Ok(self.fixed_advance(ctx, path)),
        }
    }

    fn parse_inline(
        &self,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
        allow_overwrite: bool,
    ) -> Result<()> {
        self.parse_into_frame(stream, ctx, path, Some(allow_overwrite))
    }

    fn build_inline(
        &self,
        value: &Container,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
        _allow_overwrite: bool,
    ) -> Result<()> {
        self.build_into_frame(value, stream, ctx, path)
    }
}

/// `then_child` when `condition` holds, otherwise `else_child`.
#[derive(Debug, Clone)]
pub struct IfThenElse {
    condition: Expr,
    then_child: ConstructRef,
    else_child: ConstructRef,
}

impl IfThenElse {
    pub fn new(
        condition: impl Into<Expr>,
        then_child: impl Into<ConstructRef>,
        else_child: impl Into<ConstructRef>,
    ) -> Self {
        Self {
            condition: condition.into(),
            then_child: then_child.into(),
            else_child: else_child.into(),
        }
    }

    fn branch(&self, ctx: &Context, path: &str) -> Result<&ConstructRef> {
        let holds = self.condition.evaluate(ctx, path)?.truthy();
        Ok(if holds {
            &self.then_child
        } else {
            &self.else_child
        })
    }
}

impl Construct for IfThenElse {
    fn parse(&self, stream: &mut dyn Stream, ctx: &mut Context, path: &str) -> Result<Value> {
        let branch = self.branch(ctx, path)?;
        branch.parse(stream, ctx, path)
    }

    fn build(
        &self,
        value: &Value,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        let branch = self.branch(ctx, path)?;
        branch.build(value, stream, ctx, path)
    }

    fn sizeof(&self, ctx: &mut Context, path: &str) -> Result<usize> {
        let branch = self.branch(ctx, path).map_err(|e| {
            ErrorKind::SizeofUnknown(format!("condition {} is not known: {}", self.condition, e.kind))
                .at(path)
        })?;
        branch.sizeof(ctx, path)
    }

    fn is_self_supplying(&self) -> bool {
        self.then_child.is_self_supplying() || self.else_child.is_self_supplying()
    }
}

/// `child` when `condition` holds, otherwise absence.
pub fn if_(condition: impl Into<Expr>, child: impl Into<ConstructRef>) -> ConstructRef {
    IfThenElse::new(condition, child, Pass).into()
}

/// Dispatch on a key computed from the context.
#[derive(Debug, Clone)]
pub struct Switch {
    key: Expr,
    cases: Vec<(Value, ConstructRef)>,
    default: Option<ConstructRef>,
}

impl Switch {
    pub fn new(key: impl Into<Expr>) -> Self {
        Self {
            key: key.into(),
            cases: Vec::new(),
            default: None,
        }
    }

    pub fn case(mut self, key: impl Into<Value>, child: impl Into<ConstructRef>) -> Self {
        self.cases.push((key.into(), child.into()));
        self
    }

    pub fn default(mut self, child: impl Into<ConstructRef>) -> Self {
        self.default = Some(child.into());
        self
    }

    fn select(&self, ctx: &Context, path: &str) -> Result<&ConstructRef> {
        let key = self.key.evaluate(ctx, path)?;
        self.cases
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, c)| c)
            .or(self.default.as_ref())
            .ok_or_else(|| ErrorKind::SwitchNoMatch(format!("no case for key {key:?}")).at(path))
    }
}

impl Construct for Switch {
    fn parse(&self, stream: &mut dyn Stream, ctx: &mut Context, path: &str) -> Result<Value> {
        let case = self.select(ctx, path)?;
        case.parse(stream, ctx, path)
    }

    fn build(
        &self,
        value: &Value,
        stream: &mut dyn Stream,
        ctx: &mut Context,
        path: &str,
    ) -> Result<Value> {
        let case = self.select(ctx, path)?;
        case.build(value, stream, ctx, path)
    }

    fn sizeof(&self, ctx: &mut Context, path: &str) -> Result<usize> {
        if let Ok(case) = self.select(ctx, path) {
            return case.sizeof(ctx, path);
        }

        let mut sizes = Vec::new();
        for child in self.cases.iter().map(|(_, c)| c).chain(self.default.as_ref()) {
            sizes.push(child.sizeof(ctx, path)?);
        }
        match sizes.split_first() {
            Some((first, rest)) if rest.iter().all(|s| s == first) => Ok(*first),
            _ => Err(ErrorKind::SizeofUnknown(format!(
                "switch key {} is not known and cases differ in size",
                self.key
            ))
            .at(path)),
        }
    }
}

impl_into_ref!(Select, Union, IfThenElse, Switch);
