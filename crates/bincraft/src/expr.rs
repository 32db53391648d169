//! Lazy expressions over the context.
//!
//! An [`Expr`] is a small tree built with [`this`], operators and helper functions; it
//! is evaluated against a [`Context`] only when a construct needs the value, so a field
//! length can depend on a field parsed earlier:
//!
//! ```
//! use bincraft::expr::{this, len};
//!
//! let count = this("header.count") * 2;
//! let total = len(this("items")) + 1;
//! assert_eq!(count.to_string(), "(this.header.count * 2)");
//! assert_eq!(total.to_string(), "(len_(this.items) + 1)");
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::ops;
use std::sync::Arc;

use crate::context::Context;
use crate::errors::{ErrorKind, Result};
use crate::value::Value;

type ExprFn = Arc<dyn Fn(&Scope<'_>) -> Result<Value> + Send + Sync>;

/// What an expression can see: the context plus, inside predicates, the current element.
pub struct Scope<'a> {
    pub ctx: &'a Context,
    /// The element under inspection (`obj_`).
    pub obj: Option<&'a Value>,
    /// Elements accumulated so far (`list_`).
    pub list: Option<&'a [Value]>,
}

impl<'a> Scope<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self {
            ctx,
            obj: None,
            list: None,
        }
    }

    pub fn with_obj(ctx: &'a Context, obj: &'a Value) -> Self {
        Self {
            ctx,
            obj: Some(obj),
            list: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "//",
            BinOp::Rem => "%",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "and",
            BinOp::Or => "or",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

/// Named helpers callable inside expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Len,
    Sum,
    Min,
    Max,
    Abs,
}

impl Func {
    fn name(self) -> &'static str {
        match self {
            Func::Len => "len_",
            Func::Sum => "sum_",
            Func::Min => "min_",
            Func::Max => "max_",
            Func::Abs => "abs_",
        }
    }
}

/// A lazily evaluated computation over the context.
#[derive(Clone)]
pub enum Expr {
    Const(Value),
    /// The innermost frame.
    This,
    /// The element under inspection inside a predicate.
    Obj,
    /// The elements accumulated so far inside a predicate.
    List,
    Attr(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Unary(UnOp, Box<Expr>),
    Call(Func, Vec<Expr>),
    /// Host-supplied function.
    Func(ExprFn),
}

/// Intermediate result: either a context frame (navigable with `_`) or a plain value.
enum Resolved {
    Frame(usize),
    Value(Value),
}

/// `this("a.b")`: a dotted path rooted at the innermost frame.
///
/// Segments `_`, `_root` and `_params` navigate frames; a leading `this.` is accepted.
pub fn this(path: &str) -> Expr {
    let path = path.strip_prefix("this").unwrap_or(path);
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .fold(Expr::This, |base, segment| base.attr(segment))
}

/// `obj_`: the element under inspection in a predicate.
pub fn obj() -> Expr {
    Expr::Obj
}

/// `list_`: the elements accumulated so far in a predicate.
pub fn list() -> Expr {
    Expr::List
}

pub fn len(e: impl Into<Expr>) -> Expr {
    Expr::Call(Func::Len, vec![e.into()])
}

pub fn sum(e: impl Into<Expr>) -> Expr {
    Expr::Call(Func::Sum, vec![e.into()])
}

/// Smallest element of a list, or of several arguments.
pub fn min<I, E>(args: I) -> Expr
where
    I: IntoIterator<Item = E>,
    E: Into<Expr>,
{
    Expr::Call(Func::Min, args.into_iter().map(Into::into).collect())
}

/// Largest element of a list, or of several arguments.
pub fn max<I, E>(args: I) -> Expr
where
    I: IntoIterator<Item = E>,
    E: Into<Expr>,
{
    Expr::Call(Func::Max, args.into_iter().map(Into::into).collect())
}

pub fn abs(e: impl Into<Expr>) -> Expr {
    Expr::Call(Func::Abs, vec![e.into()])
}

impl Expr {
    /// Wraps a host function.
    pub fn func<F>(f: F) -> Expr
    where
        F: Fn(&Scope<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        Expr::Func(Arc::new(f))
    }

    pub fn attr(self, name: impl Into<String>) -> Expr {
        Expr::Attr(Box::new(self), name.into())
    }

    pub fn index(self, key: impl Into<Expr>) -> Expr {
        Expr::Index(Box::new(self), Box::new(key.into()))
    }

    fn binary(self, op: BinOp, rhs: impl Into<Expr>) -> Expr {
        Expr::Binary(op, Box::new(self), Box::new(rhs.into()))
    }

    pub fn eq(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinOp::Eq, rhs)
    }

    pub fn ne(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinOp::Ne, rhs)
    }

    pub fn lt(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinOp::Lt, rhs)
    }

    pub fn le(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinOp::Le, rhs)
    }

    pub fn gt(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinOp::Gt, rhs)
    }

    pub fn ge(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinOp::Ge, rhs)
    }

    pub fn and(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinOp::And, rhs)
    }

    pub fn or(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinOp::Or, rhs)
    }

    /// The literal value, when the expression does not depend on the context.
    pub fn as_const(&self) -> Option<&Value> {
        match self {
            Expr::Const(v) => Some(v),
            _ => None,
        }
    }

    pub fn evaluate(&self, ctx: &Context, path: &str) -> Result<Value> {
        self.evaluate_in(&Scope::new(ctx), path)
    }

    pub fn evaluate_in(&self, scope: &Scope<'_>, path: &str) -> Result<Value> {
        if let Expr::Func(f) = self {
            return f(scope);
        }
        let resolved = self.resolve(scope).map_err(|kind| kind.at(path))?;
        Ok(match resolved {
            Resolved::Frame(i) => {
                Value::Container(scope.ctx.frame(i).cloned().unwrap_or_default())
            }
            Resolved::Value(v) => v,
        })
    }

    /// Evaluates to a non-negative size or count.
    pub fn evaluate_usize(&self, ctx: &Context, path: &str) -> Result<usize> {
        let value = self.evaluate(ctx, path)?;
        match value.as_int() {
            Some(n) if n >= 0 && n <= usize::MAX as i128 => Ok(n as usize),
            Some(n) => Err(ErrorKind::RangeCount(format!("{self} evaluated to {n}")).at(path)),
            None => Err(ErrorKind::TypeMismatch(format!(
                "{self} evaluated to a {}, expected an integer",
                value.type_name()
            ))
            .at(path)),
        }
    }

    pub fn evaluate_int(&self, ctx: &Context, path: &str) -> Result<i128> {
        let value = self.evaluate(ctx, path)?;
        value.as_int().ok_or_else(|| {
            ErrorKind::TypeMismatch(format!(
                "{self} evaluated to a {}, expected an integer",
                value.type_name()
            ))
            .at(path)
        })
    }

    pub fn evaluate_bool(&self, scope: &Scope<'_>, path: &str) -> Result<bool> {
        Ok(self.evaluate_in(scope, path)?.truthy())
    }

    fn resolve(&self, scope: &Scope<'_>) -> std::result::Result<Resolved, ErrorKind> {
        match self {
            Expr::Const(v) => Ok(Resolved::Value(v.clone())),
            Expr::This => Ok(Resolved::Frame(scope.ctx.top_index())),
            Expr::Obj => scope
                .obj
                .cloned()
                .map(Resolved::Value)
                .ok_or_else(|| ErrorKind::Expression("obj_ is only bound inside predicates".into())),
            Expr::List => scope
                .list
                .map(|items| Resolved::Value(Value::List(items.to_vec())))
                .ok_or_else(|| ErrorKind::Expression("list_ is only bound inside predicates".into())),
            Expr::Attr(base, name) => {
                let base = base.resolve(scope)?;
                member(scope, base, name)
            }
            Expr::Index(base, key) => {
                let base = base.resolve(scope)?;
                let key = key.value(scope)?;
                match key {
                    Value::Str(name) => member(scope, base, &name),
                    Value::Int(i) => match base {
                        Resolved::Value(v) => v.item(i).map(Resolved::Value),
                        Resolved::Frame(_) => Err(ErrorKind::Expression(
                            "cannot index a context frame by position".into(),
                        )),
                    },
                    other => Err(ErrorKind::Expression(format!(
                        "cannot index with a {}",
                        other.type_name()
                    ))),
                }
            }
            Expr::Binary(op, lhs, rhs) => binary(*op, lhs, rhs, scope).map(Resolved::Value),
            Expr::Unary(op, operand) => unary(*op, operand.value(scope)?).map(Resolved::Value),
            Expr::Call(func, args) => call(*func, args, scope).map(Resolved::Value),
            Expr::Func(f) => f(scope).map(Resolved::Value).map_err(|e| e.kind),
        }
    }

    fn value(&self, scope: &Scope<'_>) -> std::result::Result<Value, ErrorKind> {
        Ok(match self.resolve(scope)? {
            Resolved::Frame(i) => Value::Container(scope.ctx.frame(i).cloned().unwrap_or_default()),
            Resolved::Value(v) => v,
        })
    }
}

fn member(scope: &Scope<'_>, base: Resolved, name: &str) -> std::result::Result<Resolved, ErrorKind> {
    match base {
        Resolved::Frame(i) => match name {
            "_" if i == 0 => Err(ErrorKind::Expression("the parameter frame has no parent".into())),
            "_" => Ok(Resolved::Frame(i - 1)),
            "_root" => Ok(Resolved::Frame(scope.ctx.root_index())),
            "_params" => Ok(Resolved::Frame(0)),
            // Repeaters record the element index on the frame enclosing them.
            "_index" => (0..=i)
                .rev()
                .find_map(|j| scope.ctx.frame(j).and_then(|frame| frame.get(name)))
                .cloned()
                .map(Resolved::Value)
                .ok_or_else(|| ErrorKind::Expression("`_index` outside of a repeater".into())),
            _ => scope
                .ctx
                .frame(i)
                .and_then(|frame| frame.get(name))
                .cloned()
                .map(Resolved::Value)
                .ok_or_else(|| ErrorKind::Expression(format!("no field `{name}` in context"))),
        },
        Resolved::Value(v) => v.attr(name).map(Resolved::Value),
    }
}

fn binary(
    op: BinOp,
    lhs: &Expr,
    rhs: &Expr,
    scope: &Scope<'_>,
) -> std::result::Result<Value, ErrorKind> {
    let a = lhs.value(scope)?;

    match op {
        BinOp::And if !a.truthy() => return Ok(Value::Bool(false)),
        BinOp::Or if a.truthy() => return Ok(Value::Bool(true)),
        BinOp::And | BinOp::Or => return Ok(Value::Bool(rhs.value(scope)?.truthy())),
        _ => {}
    }

    let b = rhs.value(scope)?;
    apply_binary(op, &a, &b)
}

pub(crate) fn apply_binary(op: BinOp, a: &Value, b: &Value) -> std::result::Result<Value, ErrorKind> {
    let mismatch = || {
        ErrorKind::Expression(format!(
            "unsupported operands for {}: {} and {}",
            op.symbol(),
            a.type_name(),
            b.type_name()
        ))
    };

    match op {
        BinOp::Eq => return Ok(Value::Bool(a == b)),
        BinOp::Ne => return Ok(Value::Bool(a != b)),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ord = compare(a, b).ok_or_else(mismatch)?;
            let result = match op {
                BinOp::Lt => ord == Ordering::Less,
                BinOp::Le => ord != Ordering::Greater,
                BinOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            };
            return Ok(Value::Bool(result));
        }
        _ => {}
    }

    match (a, b) {
        (Value::Bytes(x), Value::Bytes(y)) if op == BinOp::Add => {
            Ok(Value::Bytes([x.as_slice(), y.as_slice()].concat()))
        }
        (Value::Str(x), Value::Str(y)) if op == BinOp::Add => Ok(Value::Str(format!("{x}{y}"))),
        (Value::Bool(x), Value::Bool(y)) if matches!(op, BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor) => {
            Ok(Value::Bool(match op {
                BinOp::BitAnd => *x & *y,
                BinOp::BitOr => *x | *y,
                _ => *x ^ *y,
            }))
        }
        (Value::Float(_), _) | (_, Value::Float(_)) => {
            let x = a.as_float().ok_or_else(mismatch)?;
            let y = b.as_float().ok_or_else(mismatch)?;
            float_arith(op, x, y).ok_or_else(mismatch)
        }
        _ => {
            let x = a.as_int().ok_or_else(mismatch)?;
            let y = b.as_int().ok_or_else(mismatch)?;
            int_arith(op, x, y)
        }
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        (Value::Bytes(x), Value::Bytes(y)) => Some(x.cmp(y)),
        (Value::Float(_), _) | (_, Value::Float(_)) => a.as_float()?.partial_cmp(&b.as_float()?),
        _ => Some(a.as_int()?.cmp(&b.as_int()?)),
    }
}

fn float_arith(op: BinOp, x: f64, y: f64) -> Option<Value> {
    let v = match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => x / y,
        BinOp::Rem => x % y,
        _ => return None,
    };
    Some(Value::Float(v))
}

fn int_arith(op: BinOp, x: i128, y: i128) -> std::result::Result<Value, ErrorKind> {
    let overflow = || ErrorKind::Expression(format!("integer overflow in {x} {} {y}", op.symbol()));
    let v = match op {
        BinOp::Add => x.checked_add(y).ok_or_else(overflow)?,
        BinOp::Sub => x.checked_sub(y).ok_or_else(overflow)?,
        BinOp::Mul => x.checked_mul(y).ok_or_else(overflow)?,
        BinOp::Div | BinOp::Rem if y == 0 => {
            return Err(ErrorKind::Expression("division by zero".into()));
        }
        BinOp::Div => floor_div(x, y).ok_or_else(overflow)?,
        BinOp::Rem => floor_rem(x, y),
        BinOp::BitAnd => x & y,
        BinOp::BitOr => x | y,
        BinOp::BitXor => x ^ y,
        BinOp::Shl => {
            let shift = u32::try_from(y).map_err(|_| overflow())?;
            x.checked_shl(shift).ok_or_else(overflow)?
        }
        BinOp::Shr => {
            let shift = u32::try_from(y).map_err(|_| overflow())?;
            x.checked_shr(shift).ok_or_else(overflow)?
        }
        _ => {
            return Err(ErrorKind::Expression(format!(
                "`{}` is not an arithmetic operator",
                op.symbol()
            )));
        }
    };
    Ok(Value::Int(v))
}

fn floor_div(x: i128, y: i128) -> Option<i128> {
    let q = x.checked_div(y)?;
    Some(if x % y != 0 && ((x < 0) != (y < 0)) { q - 1 } else { q })
}

/// Remainder with the sign of `y`; `y` is non-zero.
fn floor_rem(x: i128, y: i128) -> i128 {
    let r = x.wrapping_rem(y);
    if r != 0 && ((r < 0) != (y < 0)) { r + y } else { r }
}

fn unary(op: UnOp, v: Value) -> std::result::Result<Value, ErrorKind> {
    match (op, &v) {
        (UnOp::Neg, Value::Int(x)) => x
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| ErrorKind::Expression(format!("integer overflow in -({x})"))),
        (UnOp::Neg, Value::Float(x)) => Ok(Value::Float(-x)),
        (UnOp::Not, Value::Int(x)) => Ok(Value::Int(!x)),
        (UnOp::Not, _) => Ok(Value::Bool(!v.truthy())),
        (UnOp::Neg, _) => Err(ErrorKind::Expression(format!("cannot negate a {}", v.type_name()))),
    }
}

fn call(func: Func, args: &[Expr], scope: &Scope<'_>) -> std::result::Result<Value, ErrorKind> {
    let values = args
        .iter()
        .map(|arg| arg.value(scope))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let single = || -> std::result::Result<&Value, ErrorKind> {
        values
            .first()
            .ok_or_else(|| ErrorKind::Expression(format!("{} needs an argument", func.name())))
    };

    match func {
        Func::Len => {
            let v = single()?;
            v.len()
                .map(Value::from)
                .ok_or_else(|| ErrorKind::Expression(format!("a {} has no length", v.type_name())))
        }
        Func::Abs => match single()? {
            Value::Int(x) => x
                .checked_abs()
                .map(Value::Int)
                .ok_or_else(|| ErrorKind::Expression(format!("integer overflow in abs_({x})"))),
            Value::Float(x) => Ok(Value::Float(x.abs())),
            other => Err(ErrorKind::Expression(format!("abs_ of a {}", other.type_name()))),
        },
        Func::Sum => {
            let items = elements(single()?)?;
            items
                .iter()
                .try_fold(Value::Int(0), |acc, v| apply_binary(BinOp::Add, &acc, v))
        }
        Func::Min | Func::Max => {
            let items = if values.len() == 1 {
                elements(&values[0])?
            } else {
                values.clone()
            };
            let wanted = if func == Func::Min { Ordering::Less } else { Ordering::Greater };
            let mut iter = items.into_iter();
            let first = iter
                .next()
                .ok_or_else(|| ErrorKind::Expression(format!("{} of an empty list", func.name())))?;
            iter.try_fold(first, |best, v| {
                let ord = compare(&v, &best).ok_or_else(|| {
                    ErrorKind::Expression(format!("{} over incomparable values", func.name()))
                })?;
                Ok(if ord == wanted { v } else { best })
            })
        }
    }
}

fn elements(v: &Value) -> std::result::Result<Vec<Value>, ErrorKind> {
    match v.force().map_err(|e| e.kind)? {
        Value::List(items) => Ok(items),
        Value::Bytes(b) => Ok(b.into_iter().map(Value::from).collect()),
        other => Err(ErrorKind::Expression(format!("expected a list, found a {}", other.type_name()))),
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Expr({self})")
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const(v) => match v {
                Value::Int(i) => write!(f, "{i}"),
                Value::Str(s) => write!(f, "{s:?}"),
                other => write!(f, "{other:?}"),
            },
            Expr::This => f.write_str("this"),
            Expr::Obj => f.write_str("obj_"),
            Expr::List => f.write_str("list_"),
            Expr::Attr(base, name) => write!(f, "{base}.{name}"),
            Expr::Index(base, key) => write!(f, "{base}[{key}]"),
            Expr::Binary(op, a, b) => write!(f, "({a} {} {b})", op.symbol()),
            Expr::Unary(UnOp::Neg, a) => write!(f, "-{a}"),
            Expr::Unary(UnOp::Not, a) => write!(f, "not {a}"),
            Expr::Call(func, args) => {
                write!(f, "{}(", func.name())?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
            Expr::Func(_) => f.write_str("<fn>"),
        }
    }
}

impl From<Value> for Expr {
    fn from(v: Value) -> Self {
        Expr::Const(v)
    }
}

macro_rules! expr_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Expr {
                fn from(v: $ty) -> Self {
                    Expr::Const(Value::from(v))
                }
            }
        )*
    };
}

expr_from!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, usize, bool, f64, &str, String, Vec<u8>);

macro_rules! expr_op {
    ($($trait:ident, $method:ident, $op:expr);* $(;)?) => {
        $(
            impl<T: Into<Expr>> ops::$trait<T> for Expr {
                type Output = Expr;

                fn $method(self, rhs: T) -> Expr {
                    self.binary($op, rhs)
                }
            }
        )*
    };
}

expr_op! {
    Add, add, BinOp::Add;
    Sub, sub, BinOp::Sub;
    Mul, mul, BinOp::Mul;
    Div, div, BinOp::Div;
    Rem, rem, BinOp::Rem;
    BitAnd, bitand, BinOp::BitAnd;
    BitOr, bitor, BinOp::BitOr;
    BitXor, bitxor, BinOp::BitXor;
    Shl, shl, BinOp::Shl;
    Shr, shr, BinOp::Shr;
}

impl ops::Neg for Expr {
    type Output = Expr;

    fn neg(self) -> Expr {
        Expr::Unary(UnOp::Neg, Box::new(self))
    }
}

impl ops::Not for Expr {
    type Output = Expr;

    fn not(self) -> Expr {
        Expr::Unary(UnOp::Not, Box::new(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Container;

    fn ctx() -> Context {
        let mut ctx = Context::new(Container::from([("scale", 10)]));
        ctx.push(Container::new());
        ctx.insert("header", crate::container! { "count" => 3 });
        ctx.push(Container::new());
        ctx.insert("n", 4);
        ctx.insert("items", vec![Value::from(5), Value::from(1), Value::from(9)]);
        ctx
    }

    #[test]
    fn test_field_and_arithmetic() {
        let ctx = ctx();
        assert_eq!((this("n") + 1).evaluate(&ctx, "this").unwrap(), Value::Int(5));
        assert_eq!((this("n") * this("n") - 6).evaluate(&ctx, "this").unwrap(), Value::Int(10));
    }

    #[test]
    fn test_parent_root_and_params() {
        let ctx = ctx();
        assert_eq!(this("_.header.count").evaluate(&ctx, "this").unwrap(), Value::Int(3));
        assert_eq!(this("_root.header.count").evaluate(&ctx, "this").unwrap(), Value::Int(3));
        assert_eq!(this("_params.scale").evaluate(&ctx, "this").unwrap(), Value::Int(10));
    }

    #[test]
    fn test_index_by_name_and_position() {
        let ctx = ctx();
        assert_eq!(Expr::This.index("n").evaluate(&ctx, "this").unwrap(), Value::Int(4));
        assert_eq!(this("items").index(-1).evaluate(&ctx, "this").unwrap(), Value::Int(9));
    }

    #[test]
    fn test_helpers() {
        let ctx = ctx();
        assert_eq!(len(this("items")).evaluate(&ctx, "this").unwrap(), Value::Int(3));
        assert_eq!(sum(this("items")).evaluate(&ctx, "this").unwrap(), Value::Int(15));
        assert_eq!(min([this("items")]).evaluate(&ctx, "this").unwrap(), Value::Int(1));
        assert_eq!(max([this("n"), Expr::from(2)]).evaluate(&ctx, "this").unwrap(), Value::Int(4));
        assert_eq!(abs(-this("n")).evaluate(&ctx, "this").unwrap(), Value::Int(4));
    }

    #[test]
    fn test_comparison_and_logic() {
        let ctx = ctx();
        assert_eq!(this("n").gt(3).and(this("n").lt(5)).evaluate(&ctx, "this").unwrap(), Value::Bool(true));
        assert_eq!(this("n").eq(5).or(false).evaluate(&ctx, "this").unwrap(), Value::Bool(false));
        assert_eq!((!this("n").eq(4)).evaluate(&ctx, "this").unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_floor_division() {
        let ctx = Context::default();
        assert_eq!((Expr::from(-7) / 2).evaluate(&ctx, "this").unwrap(), Value::Int(-4));
        assert_eq!((Expr::from(-7) % 2).evaluate(&ctx, "this").unwrap(), Value::Int(1));
        assert!((Expr::from(1) / 0).evaluate(&ctx, "this").is_err());
    }

    #[test]
    fn test_integer_overflow_is_expression_error() {
        let ctx = Context::default();
        let overflowing = [
            Expr::from(i128::MIN) / -1,
            -Expr::from(i128::MIN),
            abs(Expr::from(i128::MIN)),
        ];
        for expr in overflowing {
            let err = expr.evaluate(&ctx, "this").unwrap_err();
            assert!(matches!(err.kind, ErrorKind::Expression(_)), "{expr}: {err}");
        }
        assert_eq!((Expr::from(i128::MIN) % -1).evaluate(&ctx, "this").unwrap(), Value::Int(0));
    }

    #[test]
    fn test_missing_field_is_expression_error() {
        let ctx = ctx();
        let err = this("nope").evaluate(&ctx, "this.x").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Expression(_)));
        assert_eq!(err.path, "this.x");
    }

    #[test]
    fn test_obj_in_scope() {
        let ctx = Context::default();
        let item = Value::Int(7);
        let scope = Scope::with_obj(&ctx, &item);
        assert!(obj().eq(7).evaluate_bool(&scope, "this").unwrap());
        assert!(obj().evaluate(&ctx, "this").is_err());
    }

    #[test]
    fn test_host_function() {
        let ctx = ctx();
        let e = Expr::func(|scope| Ok(Value::Int(scope.ctx.this().len() as i128)));
        assert_eq!(e.evaluate(&ctx, "this").unwrap(), Value::Int(2));
    }

    #[test]
    fn test_display() {
        assert_eq!(this("a.b").to_string(), "this.a.b");
        assert_eq!(this("this.a").to_string(), "this.a");
        assert_eq!((this("n") / 2).to_string(), "(this.n // 2)");
    }
}
