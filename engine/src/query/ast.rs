//! Structured query representation.
//!
//! A [`Query`] is produced by a front-end query builder and consumed by
//! [`compile`](super::compile). Joins, `distinct` and row locks are part of
//! the shape so that they can be rejected explicitly.

use crate::{FieldName, ModelName, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinOp {
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Rem,
}

impl BinOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::NotEq | BinOp::Lt | BinOp::Lte | BinOp::Gt | BinOp::Gte
        )
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Pow | BinOp::Rem
        )
    }

    /// The operator with its operands swapped, for comparisons.
    pub fn flipped(self) -> Self {
        match self {
            BinOp::Lt => BinOp::Gt,
            BinOp::Lte => BinOp::Gte,
            BinOp::Gt => BinOp::Lt,
            BinOp::Gte => BinOp::Lte,
            other => other,
        }
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            BinOp::Eq => "==",
            BinOp::NotEq => "!=",
            BinOp::Lt => "<",
            BinOp::Lte => "<=",
            BinOp::Gt => ">",
            BinOp::Gte => ">=",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Pow => "pow",
            BinOp::Rem => "rem",
        };
        f.write_str(symbol)
    }
}

/// Aggregate functions usable in `having` and `select`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregate {
    Avg,
    Count,
    Max,
    Min,
    Sum,
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Aggregate::Avg => "avg",
            Aggregate::Count => "count",
            Aggregate::Max => "max",
            Aggregate::Min => "min",
            Aggregate::Sum => "sum",
        };
        f.write_str(name)
    }
}

/// Scalar functions usable in `select`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Function {
    Now,
    Random,
    Round,
    Upcase,
    Downcase,
    Concat,
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Function::Now => "now",
            Function::Random => "random",
            Function::Round => "round",
            Function::Upcase => "upcase",
            Function::Downcase => "downcase",
            Function::Concat => "concat",
        };
        f.write_str(name)
    }
}

/// Query expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    /// Field of the queried model
    Field(FieldName),
    Literal(Value),
    Null,
    /// The whole entity
    Var,
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Not(Box<Expr>),
    In {
        expr: Box<Expr>,
        list: Vec<Expr>,
    },
    IsNil(Box<Expr>),
    /// Aggregate over a group; `count` without an argument counts rows
    Aggregate {
        func: Aggregate,
        arg: Option<Box<Expr>>,
    },
    Call {
        func: Function,
        args: Vec<Expr>,
    },
    Tuple(Vec<Expr>),
    List(Vec<Expr>),
}

impl Expr {
    pub fn field(name: impl Into<FieldName>) -> Self {
        Expr::Field(name.into())
    }

    pub fn lit(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn eq(self, rhs: Expr) -> Self {
        Self::binary(BinOp::Eq, self, rhs)
    }

    pub fn not_eq(self, rhs: Expr) -> Self {
        Self::binary(BinOp::NotEq, self, rhs)
    }

    pub fn lt(self, rhs: Expr) -> Self {
        Self::binary(BinOp::Lt, self, rhs)
    }

    pub fn lte(self, rhs: Expr) -> Self {
        Self::binary(BinOp::Lte, self, rhs)
    }

    pub fn gt(self, rhs: Expr) -> Self {
        Self::binary(BinOp::Gt, self, rhs)
    }

    pub fn gte(self, rhs: Expr) -> Self {
        Self::binary(BinOp::Gte, self, rhs)
    }

    pub fn and(self, rhs: Expr) -> Self {
        Self::binary(BinOp::And, self, rhs)
    }

    pub fn or(self, rhs: Expr) -> Self {
        Self::binary(BinOp::Or, self, rhs)
    }

    pub fn negate(self) -> Self {
        Expr::Not(Box::new(self))
    }

    pub fn is_in(self, list: Vec<Expr>) -> Self {
        Expr::In {
            expr: Box::new(self),
            list,
        }
    }

    pub fn is_nil(self) -> Self {
        Expr::IsNil(Box::new(self))
    }

    /// `count(*)`
    pub fn count() -> Self {
        Expr::Aggregate {
            func: Aggregate::Count,
            arg: None,
        }
    }

    pub fn aggregate(func: Aggregate, arg: Expr) -> Self {
        Expr::Aggregate {
            func,
            arg: Some(Box::new(arg)),
        }
    }

    pub fn call(func: Function, args: Vec<Expr>) -> Self {
        Expr::Call { func, args }
    }

    /// Whether any aggregate appears in the expression.
    pub fn has_aggregate(&self) -> bool {
        let mut found = false;
        self.walk(&mut |e| found |= matches!(e, Expr::Aggregate { .. }));
        found
    }

    /// Visit the expression and every sub-expression, parents first.
    pub fn walk(&self, visit: &mut impl FnMut(&Expr)) {
        visit(self);
        match self {
            Expr::Binary { lhs, rhs, .. } => {
                lhs.walk(visit);
                rhs.walk(visit);
            }
            Expr::Not(inner) | Expr::IsNil(inner) => inner.walk(visit),
            Expr::In { expr, list } => {
                expr.walk(visit);
                list.iter().for_each(|e| e.walk(visit));
            }
            Expr::Aggregate { arg: Some(arg), .. } => arg.walk(visit),
            Expr::Call { args: items, .. } | Expr::Tuple(items) | Expr::List(items) => {
                items.iter().for_each(|e| e.walk(visit));
            }
            Expr::Field(_)
            | Expr::Literal(_)
            | Expr::Null
            | Expr::Var
            | Expr::Aggregate { arg: None, .. } => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub expr: Expr,
    pub direction: Direction,
}

impl OrderBy {
    pub fn asc(expr: Expr) -> Self {
        Self {
            expr,
            direction: Direction::Asc,
        }
    }

    pub fn desc(expr: Expr) -> Self {
        Self {
            expr,
            direction: Direction::Desc,
        }
    }
}

/// A join against another model. Never executable; kept so that it can be
/// rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Join {
    pub model: ModelName,
    pub on: Option<Expr>,
}

/// A SELECT-like query over one model.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub from: ModelName,
    /// Conditions, all of which must hold
    pub wheres: Vec<Expr>,
    pub order_bys: Vec<OrderBy>,
    pub group_bys: Vec<Expr>,
    /// Group conditions, all of which must hold
    pub havings: Vec<Expr>,
    pub select: Option<Expr>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub joins: Vec<Join>,
    pub distinct: bool,
    pub lock: Option<String>,
}

impl Query {
    /// Query every entity of a model.
    pub fn new(model: impl Into<ModelName>) -> Self {
        Self {
            from: model.into(),
            ..Self::default()
        }
    }

    pub fn filter(mut self, condition: Expr) -> Self {
        self.wheres.push(condition);
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_bys.push(order);
        self
    }

    pub fn group_by(mut self, expr: Expr) -> Self {
        self.group_bys.push(expr);
        self
    }

    pub fn having(mut self, condition: Expr) -> Self {
        self.havings.push(condition);
        self
    }

    pub fn select(mut self, expr: Expr) -> Self {
        self.select = Some(expr);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn lock(mut self, lock: impl Into<String>) -> Self {
        self.lock = Some(lock.into());
        self
    }
}
