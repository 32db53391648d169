//! The context stack threaded through a single parse or build call.
//!
//! Frame 0 holds the caller's keyword parameters (`_params`). Every structural construct
//! pushes a frame that accumulates its fields; `_` names the frame below, `_root` the
//! frame of the outermost structure.

use std::io::SeekFrom;

use crate::construct::ConstructRef;
use crate::derived::HashFn;
use crate::errors::{ErrorKind, Result};
use crate::expr::Expr;
use crate::stream::{self, Stream};
use crate::value::{Container, Value};

#[derive(Debug, Clone, Default)]
struct Frame {
    values: Container,
    deferred: Vec<Deferred>,
}

/// How a deferred patch computes the value it writes.
#[derive(Debug, Clone)]
pub(crate) enum Patch {
    Value(Expr),
    Checksum { data: Expr, hash: HashFn },
}

impl Patch {
    pub(crate) fn compute(&self, ctx: &Context, path: &str) -> Result<Value> {
        match self {
            Patch::Value(expr) => expr.evaluate(ctx, path),
            Patch::Checksum { data, hash } => {
                let data = crate::derived::checksum_input(&data.evaluate(ctx, path)?, path)?;
                Ok(hash.digest(&data))
            }
        }
    }
}

/// A reserved region to be written once the value it depends on is known.
#[derive(Debug, Clone)]
pub(crate) struct Deferred {
    pub offset: u64,
    pub size: usize,
    pub field: ConstructRef,
    pub patch: Patch,
    pub path: String,
    /// Frame index the patch was registered at; set by [`Context::defer`].
    pub depth: usize,
    /// Frames popped since registration, outermost first. The patch is computed with
    /// them pushed back, so `this` keeps meaning the structure that registered it.
    pub scopes: Vec<Container>,
}

/// Stack of ordered attribute maps for one parse/build call.
#[derive(Debug, Clone)]
pub struct Context {
    frames: Vec<Frame>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new(Container::new())
    }
}

impl Context {
    pub fn new(params: Container) -> Self {
        Self {
            frames: vec![Frame {
                values: params,
                deferred: Vec::new(),
            }],
        }
    }

    /// The user-supplied parameters.
    pub fn params(&self) -> &Container {
        &self.frames[0].values
    }

    /// Number of frames, including the parameter frame.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// The frame of the innermost structure.
    pub fn this(&self) -> &Container {
        &self.frames[self.top_index()].values
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.this().get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let top = self.top_index();
        self.frames[top].values.insert(name, value);
    }

    pub(crate) fn top_index(&self) -> usize {
        self.frames.len() - 1
    }

    pub(crate) fn root_index(&self) -> usize {
        if self.frames.len() > 1 { 1 } else { 0 }
    }

    pub(crate) fn frame(&self, index: usize) -> Option<&Container> {
        self.frames.get(index).map(|f| &f.values)
    }

    pub(crate) fn push(&mut self, values: Container) {
        self.frames.push(Frame {
            values,
            deferred: Vec::new(),
        });
    }

    /// Pops the innermost frame; patches it could not resolve move to the new innermost one.
    pub(crate) fn pop(&mut self) -> Container {
        if self.frames.len() == 1 {
            return self.frames[0].values.clone();
        }
        let frame = self.frames.pop().unwrap_or_default();
        let top = self.top_index();
        for mut deferred in frame.deferred {
            deferred.scopes.insert(0, frame.values.clone());
            self.frames[top].deferred.push(deferred);
        }
        frame.values
    }

    pub(crate) fn defer(&mut self, mut deferred: Deferred) {
        tracing::trace!(path = %deferred.path, offset = deferred.offset, "back-patch deferred");
        let top = self.top_index();
        deferred.depth = top;
        self.frames[top].deferred.push(deferred);
    }

    /// Number of patches queued on the innermost frame; pass it to the `*_since` methods.
    pub(crate) fn deferred_mark(&self) -> usize {
        self.frames[self.top_index()].deferred.len()
    }

    /// Shifts patches queued after `mark` by `base`, once a scratch buffer lands at `base`.
    pub(crate) fn rebase_deferred_since(&mut self, mark: usize, base: u64) {
        let top = self.top_index();
        for deferred in self.frames[top].deferred.iter_mut().skip(mark) {
            deferred.offset += base;
        }
    }

    /// Drops patches queued after `mark`, after the bytes they point into were thrown away.
    pub(crate) fn discard_deferred_since(&mut self, mark: usize) {
        let top = self.top_index();
        self.frames[top].deferred.truncate(mark);
    }

    fn compute_in_scope(&mut self, deferred: &Deferred) -> Result<Value> {
        for values in &deferred.scopes {
            self.push(values.clone());
        }
        let result = deferred.patch.compute(self, &deferred.path);
        for _ in &deferred.scopes {
            self.frames.pop();
        }
        result
    }

    /// Writes every pending patch of the innermost frame whose value can now be computed.
    ///
    /// With `strict` every patch must resolve; otherwise unresolved ones stay queued and
    /// travel to the parent frame on [`Context::pop`].
    pub(crate) fn resolve_deferred(&mut self, stream: &mut dyn Stream, strict: bool) -> Result<()> {
        self.resolve_deferred_since(0, stream, strict)
    }

    /// Like [`Context::resolve_deferred`], limited to patches queued after `mark`.
    pub(crate) fn resolve_deferred_since(
        &mut self,
        mark: usize,
        stream: &mut dyn Stream,
        strict: bool,
    ) -> Result<()> {
        let top = self.top_index();
        let split = mark.min(self.frames[top].deferred.len());
        let pending = self.frames[top].deferred.split_off(split);
        let mut unresolved = Vec::new();

        for deferred in pending {
            let value = match self.compute_in_scope(&deferred) {
                Ok(value) => value,
                Err(e) if !strict && e.is_unresolved() => {
                    unresolved.push(deferred);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let back = stream::tell(stream, &deferred.path)?;
            stream::seek(stream, SeekFrom::Start(deferred.offset), &deferred.path)?;
            let built = deferred
                .field
                .build(&value, stream, self, &deferred.path)?;
            let end = stream::tell(stream, &deferred.path)?;
            stream::seek(stream, SeekFrom::Start(back), &deferred.path)?;

            let written = (end - deferred.offset) as usize;
            if written != deferred.size {
                return Err(ErrorKind::FieldSize(format!(
                    "back-patch wrote {written} bytes into a {}-byte reservation",
                    deferred.size
                ))
                .at(&deferred.path));
            }

            if deferred.scopes.is_empty() && deferred.depth == top {
                if let Some(name) = field_name(&deferred.path) {
                    if self.this().contains_key(name) {
                        self.insert(name, built);
                    }
                }
            }
            tracing::trace!(path = %deferred.path, offset = deferred.offset, "back-patch applied");
        }

        self.frames[top].deferred.extend(unresolved);
        Ok(())
    }
}

/// The last dotted segment of a path, when it names a field.
fn field_name(path: &str) -> Option<&str> {
    let last = path.rsplit('.').next()?;
    (!last.is_empty() && !last.ends_with(']') && last != "this").then_some(last)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_live_in_frame_zero() {
        let ctx = Context::new(Container::from([("n", 4)]));
        assert_eq!(ctx.params()["n"], Value::Int(4));
        assert_eq!(ctx.depth(), 1);
        assert_eq!(ctx.root_index(), 0);
    }

    #[test]
    fn test_push_pop() {
        let mut ctx = Context::default();
        ctx.push(Container::new());
        ctx.insert("a", 1);
        assert_eq!(ctx.get("a"), Some(&Value::Int(1)));
        assert_eq!(ctx.root_index(), 1);

        let frame = ctx.pop();
        assert_eq!(frame["a"], Value::Int(1));
        assert_eq!(ctx.get("a"), None);
    }

    #[test]
    fn test_field_name() {
        assert_eq!(field_name("this.header.csum"), Some("csum"));
        assert_eq!(field_name("this.items[2]"), None);
        assert_eq!(field_name("this"), None);
    }
}
