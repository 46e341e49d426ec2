//! Client-side expression evaluation.
//!
//! Expressions are evaluated against a group of entities. Plain field
//! references read the first entity of the group, aggregates fold over all
//! of them. An ungrouped row is a group of one.

use super::{Aggregate, BinOp, Expr, Function, QueryError};
use crate::{codec, Entity, Value};
use std::cmp::Ordering;

type Result<T> = std::result::Result<T, QueryError>;

/// One post-processed result row, or a component of one.
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Null,
    Value(Value),
    Entity(Box<Entity>),
    Tuple(Vec<Datum>),
    List(Vec<Datum>),
}

impl Datum {
    pub fn type_name(&self) -> &'static str {
        match self {
            Datum::Null => "null",
            Datum::Value(v) => v.type_name(),
            Datum::Entity(_) => "entity",
            Datum::Tuple(_) => "tuple",
            Datum::List(_) => "list",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Datum::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<&Entity> {
        match self {
            Datum::Entity(e) => Some(e),
            _ => None,
        }
    }

    /// Only `true` passes a condition; null and everything else fail it.
    pub fn is_true(&self) -> bool {
        matches!(self, Datum::Value(Value::Boolean(true)))
    }

    /// Total order used for sorting. Null sorts first, floats follow
    /// `f64::total_cmp` and values of different kinds order by kind.
    pub fn sort_cmp(&self, other: &Datum) -> Ordering {
        match (self, other) {
            (Datum::Value(a), Datum::Value(b)) => value_order(a, b),
            (Datum::Tuple(a), Datum::Tuple(b)) | (Datum::List(a), Datum::List(b)) => a
                .iter()
                .zip(b)
                .map(|(x, y)| x.sort_cmp(y))
                .find(|o| o.is_ne())
                .unwrap_or_else(|| a.len().cmp(&b.len())),
            _ => self.rank().cmp(&other.rank()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Datum::Null => 0,
            Datum::Value(_) => 1,
            Datum::Entity(_) => 2,
            Datum::Tuple(_) => 3,
            Datum::List(_) => 4,
        }
    }

    /// Equality as used by `==`, `in` and grouping. Integers and floats
    /// compare numerically.
    pub fn equals(&self, other: &Datum) -> bool {
        match (self, other) {
            (Datum::Value(a), Datum::Value(b)) => a.compare(b) == Some(Ordering::Equal),
            (Datum::Tuple(a), Datum::Tuple(b)) | (Datum::List(a), Datum::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.equals(y))
            }
            _ => self == other,
        }
    }
}

fn value_order(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => x.cmp(y),
        (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
            match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                _ => Ordering::Equal,
            }
        }
        (Value::List(x), Value::List(y)) => x
            .iter()
            .zip(y)
            .map(|(p, q)| value_order(p, q))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        _ => a
            .compare(b)
            .unwrap_or_else(|| value_rank(a).cmp(&value_rank(b))),
    }
}

fn value_rank(value: &Value) -> u8 {
    match value {
        Value::Integer(_) | Value::Float(_) => 0,
        Value::Boolean(_) => 1,
        Value::String(_) => 2,
        Value::Binary(_) => 3,
        Value::DateTime(_) => 4,
        Value::Interval(_) => 5,
        Value::List(_) => 6,
    }
}

impl From<Value> for Datum {
    fn from(value: Value) -> Self {
        Datum::Value(value)
    }
}

impl From<Option<Value>> for Datum {
    fn from(value: Option<Value>) -> Self {
        value.map_or(Datum::Null, Datum::Value)
    }
}

impl From<Entity> for Datum {
    fn from(entity: Entity) -> Self {
        Datum::Entity(Box::new(entity))
    }
}

/// Evaluate an expression over a group of entities.
pub fn evaluate(expr: &Expr, group: &[Entity]) -> Result<Datum> {
    match expr {
        Expr::Field(name) => Ok(group.first().and_then(|e| e.value(name)).into()),
        Expr::Literal(value) => Ok(Datum::Value(value.clone())),
        Expr::Null => Ok(Datum::Null),
        Expr::Var => Ok(group
            .first()
            .map_or(Datum::Null, |e| Datum::from(e.clone()))),
        Expr::Binary { op, lhs, rhs } => {
            let lhs = evaluate(lhs, group)?;
            // and/or short-circuit on the left operand
            match (op, lhs.is_true()) {
                (BinOp::And, false) => return Ok(boolean(false)),
                (BinOp::Or, true) => return Ok(boolean(true)),
                _ => {}
            }
            let rhs = evaluate(rhs, group)?;
            binary(*op, &lhs, &rhs)
        }
        Expr::Not(inner) => match evaluate(inner, group)? {
            Datum::Null => Ok(Datum::Null),
            datum => Ok(boolean(!datum.is_true())),
        },
        Expr::In { expr, list } => {
            let needle = evaluate(expr, group)?;
            if needle.is_null() {
                return Ok(Datum::Null);
            }
            for candidate in list {
                if needle.equals(&evaluate(candidate, group)?) {
                    return Ok(boolean(true));
                }
            }
            Ok(boolean(false))
        }
        Expr::IsNil(inner) => Ok(boolean(evaluate(inner, group)?.is_null())),
        Expr::Aggregate { func, arg } => aggregate(*func, arg.as_deref(), group),
        Expr::Call { func, args } => {
            let args = args
                .iter()
                .map(|a| evaluate(a, group))
                .collect::<Result<Vec<_>>>()?;
            call(*func, args)
        }
        Expr::Tuple(items) => Ok(Datum::Tuple(evaluate_all(items, group)?)),
        Expr::List(items) => Ok(Datum::List(evaluate_all(items, group)?)),
    }
}

fn evaluate_all(items: &[Expr], group: &[Entity]) -> Result<Vec<Datum>> {
    items.iter().map(|e| evaluate(e, group)).collect()
}

fn boolean(b: bool) -> Datum {
    Datum::Value(Value::Boolean(b))
}

fn binary(op: BinOp, lhs: &Datum, rhs: &Datum) -> Result<Datum> {
    match op {
        BinOp::And => Ok(boolean(lhs.is_true() && rhs.is_true())),
        BinOp::Or => Ok(boolean(lhs.is_true() || rhs.is_true())),
        BinOp::Eq | BinOp::NotEq if lhs.is_null() || rhs.is_null() => Ok(Datum::Null),
        BinOp::Eq => Ok(boolean(lhs.equals(rhs))),
        BinOp::NotEq => Ok(boolean(!lhs.equals(rhs))),
        BinOp::Lt | BinOp::Lte | BinOp::Gt | BinOp::Gte => {
            let (Datum::Value(a), Datum::Value(b)) = (lhs, rhs) else {
                return Ok(Datum::Null);
            };
            let Some(ordering) = a.compare(b) else {
                return Err(invalid(op, lhs, rhs));
            };
            Ok(boolean(match op {
                BinOp::Lt => ordering.is_lt(),
                BinOp::Lte => ordering.is_le(),
                BinOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        _ => match (lhs, rhs) {
            (Datum::Null, _) | (_, Datum::Null) => Ok(Datum::Null),
            (Datum::Value(a), Datum::Value(b)) => arithmetic(op, a, b).map(Datum::Value),
            _ => Err(invalid(op, lhs, rhs)),
        },
    }
}

/// Apply an arithmetic operator to two numbers.
///
/// Integer operands stay integers except for `/`, which always divides as
/// floats.
pub fn arithmetic(op: BinOp, a: &Value, b: &Value) -> Result<Value> {
    let overflow = || QueryError::Overflow(op.to_string());
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => match op {
            BinOp::Add => x.checked_add(*y).map(Value::Integer).ok_or_else(overflow),
            BinOp::Sub => x.checked_sub(*y).map(Value::Integer).ok_or_else(overflow),
            BinOp::Mul => x.checked_mul(*y).map(Value::Integer).ok_or_else(overflow),
            BinOp::Rem if *y == 0 => Err(QueryError::DivisionByZero),
            BinOp::Rem => x.checked_rem(*y).map(Value::Integer).ok_or_else(overflow),
            BinOp::Pow => match u32::try_from(*y) {
                Ok(exp) => x.checked_pow(exp).map(Value::Integer).ok_or_else(overflow),
                Err(_) => Ok(Value::Float((*x as f64).powf(*y as f64))),
            },
            BinOp::Div if *y == 0 => Err(QueryError::DivisionByZero),
            _ => float_arithmetic(op, *x as f64, *y as f64),
        },
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => float_arithmetic(op, x, y),
            _ => Err(QueryError::InvalidOperands {
                op: op.to_string(),
                lhs: a.type_name(),
                rhs: b.type_name(),
            }),
        },
    }
}

fn float_arithmetic(op: BinOp, x: f64, y: f64) -> Result<Value> {
    let result = match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div | BinOp::Rem if y == 0.0 => return Err(QueryError::DivisionByZero),
        BinOp::Div => x / y,
        BinOp::Rem => x % y,
        BinOp::Pow => x.powf(y),
        other => {
            return Err(QueryError::InvalidOperands {
                op: other.to_string(),
                lhs: "float",
                rhs: "float",
            })
        }
    };
    Ok(Value::Float(result))
}

fn invalid(op: BinOp, lhs: &Datum, rhs: &Datum) -> QueryError {
    QueryError::InvalidOperands {
        op: op.to_string(),
        lhs: lhs.type_name(),
        rhs: rhs.type_name(),
    }
}

fn aggregate(func: Aggregate, arg: Option<&Expr>, group: &[Entity]) -> Result<Datum> {
    let Some(arg) = arg else {
        return match func {
            Aggregate::Count => Ok(Datum::Value(Value::Integer(group.len() as i64))),
            other => Err(QueryError::InvalidArgument {
                function: other.to_string(),
                reason: "requires an argument".into(),
            }),
        };
    };

    let mut values = Vec::with_capacity(group.len());
    for entity in group {
        match evaluate(arg, std::slice::from_ref(entity))? {
            Datum::Null => {}
            Datum::Value(v) => values.push(v),
            other => {
                return Err(QueryError::InvalidArgument {
                    function: func.to_string(),
                    reason: format!("cannot aggregate {}", other.type_name()),
                })
            }
        }
    }

    match func {
        Aggregate::Count => Ok(Datum::Value(Value::Integer(values.len() as i64))),
        Aggregate::Max => Ok(extreme(values, Ordering::Greater)),
        Aggregate::Min => Ok(extreme(values, Ordering::Less)),
        Aggregate::Sum => {
            let mut total: Option<Value> = None;
            for value in values {
                total = Some(match total {
                    None => numeric(func, value)?,
                    Some(acc) => arithmetic(BinOp::Add, &acc, &value)?,
                });
            }
            Ok(total.into())
        }
        Aggregate::Avg => {
            if values.is_empty() {
                return Ok(Datum::Null);
            }
            let count = values.len() as f64;
            let mut sum = 0.0;
            for value in &values {
                sum += value.as_f64().ok_or_else(|| QueryError::InvalidArgument {
                    function: func.to_string(),
                    reason: format!("cannot average {}", value.type_name()),
                })?;
            }
            Ok(Datum::Value(Value::Float(sum / count)))
        }
    }
}

fn numeric(func: Aggregate, value: Value) -> Result<Value> {
    match value {
        Value::Integer(_) | Value::Float(_) => Ok(value),
        other => Err(QueryError::InvalidArgument {
            function: func.to_string(),
            reason: format!("cannot sum {}", other.type_name()),
        }),
    }
}

fn extreme(values: Vec<Value>, keep: Ordering) -> Datum {
    values
        .into_iter()
        .reduce(|best, next| {
            if next.compare(&best) == Some(keep) {
                next
            } else {
                best
            }
        })
        .into()
}

fn call(func: Function, args: Vec<Datum>) -> Result<Datum> {
    let bad = |reason: &str| QueryError::InvalidArgument {
        function: func.to_string(),
        reason: reason.to_string(),
    };

    match func {
        Function::Now => Ok(Datum::Value(Value::DateTime(chrono::Utc::now().naive_utc()))),
        Function::Random => Ok(Datum::Value(Value::Float(rand::random::<f64>()))),
        Function::Round => {
            let mut args = args.into_iter();
            let value = args.next().ok_or_else(|| bad("expects a number"))?;
            let digits = match args.next() {
                None => 0,
                Some(Datum::Value(Value::Integer(d))) => {
                    i32::try_from(d).map_err(|_| bad("precision out of range"))?
                }
                Some(_) => return Err(bad("precision must be an integer")),
            };
            match value {
                Datum::Null => Ok(Datum::Null),
                Datum::Value(Value::Integer(i)) => Ok(Datum::Value(Value::Integer(i))),
                Datum::Value(Value::Float(f)) => {
                    let scale = 10f64.powi(digits);
                    Ok(Datum::Value(Value::Float((f * scale).round() / scale)))
                }
                _ => Err(bad("expects a number")),
            }
        }
        Function::Upcase | Function::Downcase => match args.as_slice() {
            [Datum::Null] => Ok(Datum::Null),
            [Datum::Value(Value::String(s))] => Ok(Datum::Value(Value::String(
                if func == Function::Upcase {
                    s.to_uppercase()
                } else {
                    s.to_lowercase()
                },
            ))),
            _ => Err(bad("expects one string")),
        },
        Function::Concat => {
            let mut out = String::new();
            for arg in &args {
                match arg {
                    Datum::Null => {}
                    Datum::Value(Value::String(s)) => out.push_str(s),
                    Datum::Value(v) => out.push_str(&codec::search_text(v)),
                    _ => return Err(bad("expects scalar arguments")),
                }
            }
            Ok(Datum::Value(Value::String(out)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FieldDef, FieldType, ModelSchema};

    fn entity(category: &str, price: i64) -> Entity {
        let model = ModelSchema::new(
            "App.Item",
            "items",
            1,
            vec![
                FieldDef::new("category", FieldType::String),
                FieldDef::new("price", FieldType::Integer),
            ],
        );
        Entity::new(&model)
            .with_id(format!("{category}-{price}"))
            .with("category", category)
            .with("price", price)
    }

    fn value(d: Datum) -> Value {
        d.as_value().cloned().unwrap()
    }

    #[test]
    fn fields_read_first_entity() {
        let group = vec![entity("a", 1), entity("b", 2)];
        let result = evaluate(&Expr::field("category"), &group).unwrap();
        assert_eq!(result, Datum::Value(Value::from("a")));
        assert_eq!(evaluate(&Expr::field("missing"), &group).unwrap(), Datum::Null);
        assert_eq!(evaluate(&Expr::field("id"), &group).unwrap(), Datum::Value("a-1".into()));
    }

    #[test]
    fn aggregates_fold_over_group() {
        let group = vec![entity("a", 1), entity("a", 4), entity("a", 7)];
        let eval = |func| value(evaluate(&Expr::aggregate(func, Expr::field("price")), &group).unwrap());
        assert_eq!(eval(Aggregate::Sum), Value::Integer(12));
        assert_eq!(eval(Aggregate::Avg), Value::Float(4.0));
        assert_eq!(eval(Aggregate::Max), Value::Integer(7));
        assert_eq!(eval(Aggregate::Min), Value::Integer(1));
        assert_eq!(eval(Aggregate::Count), Value::Integer(3));
        assert_eq!(value(evaluate(&Expr::count(), &group).unwrap()), Value::Integer(3));
    }

    #[test]
    fn empty_group_aggregates() {
        assert_eq!(value(evaluate(&Expr::count(), &[]).unwrap()), Value::Integer(0));
        let sum = Expr::aggregate(Aggregate::Sum, Expr::field("price"));
        assert_eq!(evaluate(&sum, &[]).unwrap(), Datum::Null);
    }

    #[test]
    fn arithmetic_on_aggregates() {
        let group = vec![entity("a", 3), entity("a", 5)];
        let expr = Expr::binary(
            BinOp::Mul,
            Expr::aggregate(Aggregate::Sum, Expr::field("price")),
            Expr::lit(2),
        )
        .gte(Expr::lit(16));
        assert!(evaluate(&expr, &group).unwrap().is_true());
    }

    #[test]
    fn integer_and_float_arithmetic() {
        assert_eq!(
            arithmetic(BinOp::Div, &Value::Integer(7), &Value::Integer(2)).unwrap(),
            Value::Float(3.5)
        );
        assert_eq!(
            arithmetic(BinOp::Rem, &Value::Integer(7), &Value::Integer(2)).unwrap(),
            Value::Integer(1)
        );
        assert_eq!(
            arithmetic(BinOp::Pow, &Value::Integer(2), &Value::Integer(10)).unwrap(),
            Value::Integer(1024)
        );
        assert_eq!(
            arithmetic(BinOp::Add, &Value::Integer(1), &Value::Float(0.5)).unwrap(),
            Value::Float(1.5)
        );
        assert_eq!(
            arithmetic(BinOp::Div, &Value::Integer(1), &Value::Integer(0)),
            Err(QueryError::DivisionByZero)
        );
        assert!(matches!(
            arithmetic(BinOp::Add, &Value::from("a"), &Value::Integer(1)),
            Err(QueryError::InvalidOperands { .. })
        ));
        assert!(matches!(
            arithmetic(BinOp::Mul, &Value::Integer(i64::MAX), &Value::Integer(2)),
            Err(QueryError::Overflow(_))
        ));
    }

    #[test]
    fn null_propagation() {
        let group = vec![entity("a", 1)];
        let cmp = Expr::field("missing").eq(Expr::lit(1));
        assert_eq!(evaluate(&cmp, &group).unwrap(), Datum::Null);
        assert!(!evaluate(&cmp, &group).unwrap().is_true());
        assert!(evaluate(&Expr::field("missing").is_nil(), &group)
            .unwrap()
            .is_true());
    }

    #[test]
    fn membership() {
        let group = vec![entity("b", 1)];
        let expr = Expr::field("category").is_in(vec![Expr::lit("a"), Expr::lit("b")]);
        assert!(evaluate(&expr, &group).unwrap().is_true());
        let expr = Expr::field("price").is_in(vec![Expr::lit(1.0)]);
        assert!(evaluate(&expr, &group).unwrap().is_true());
    }

    #[test]
    fn string_functions() {
        let group = vec![entity("Books", 3)];
        let up = Expr::call(Function::Upcase, vec![Expr::field("category")]);
        assert_eq!(value(evaluate(&up, &group).unwrap()), Value::from("BOOKS"));
        let down = Expr::call(Function::Downcase, vec![Expr::field("category")]);
        assert_eq!(value(evaluate(&down, &group).unwrap()), Value::from("books"));
        let concat = Expr::call(
            Function::Concat,
            vec![Expr::field("category"), Expr::lit(":"), Expr::field("price")],
        );
        assert_eq!(value(evaluate(&concat, &group).unwrap()), Value::from("Books:3"));
        assert!(evaluate(&Expr::call(Function::Upcase, vec![]), &group).is_err());
    }

    #[test]
    fn numeric_functions() {
        let round = Expr::call(Function::Round, vec![Expr::lit(2.346), Expr::lit(2)]);
        assert_eq!(value(evaluate(&round, &[]).unwrap()), Value::Float(2.35));
        let round = Expr::call(Function::Round, vec![Expr::lit(2.5)]);
        assert_eq!(value(evaluate(&round, &[]).unwrap()), Value::Float(3.0));

        let random = value(evaluate(&Expr::call(Function::Random, vec![]), &[]).unwrap());
        let r = random.as_f64().unwrap();
        assert!((0.0..1.0).contains(&r));

        let now = evaluate(&Expr::call(Function::Now, vec![]), &[]).unwrap();
        assert!(matches!(now, Datum::Value(Value::DateTime(_))));
    }

    #[test]
    fn var_yields_entity() {
        let group = vec![entity("a", 1)];
        let datum = evaluate(&Expr::Var, &group).unwrap();
        assert_eq!(datum.as_entity(), Some(&group[0]));
        let tuple = evaluate(&Expr::Tuple(vec![Expr::field("category"), Expr::Var]), &group).unwrap();
        assert!(matches!(tuple, Datum::Tuple(ref items) if items.len() == 2));
    }

    #[test]
    fn sort_order_puts_null_first() {
        let mut data = vec![Datum::Value(3.into()), Datum::Null, Datum::Value(1.into())];
        data.sort_by(Datum::sort_cmp);
        assert_eq!(data, vec![Datum::Null, Datum::Value(1.into()), Datum::Value(3.into())]);
    }

    #[test]
    fn sort_order_is_total_across_kinds() {
        let mut data = vec![
            Datum::Value(Value::from("a")),
            Datum::Value(Value::Float(f64::NAN)),
            Datum::Value(1.into()),
            Datum::Value(true.into()),
            Datum::Null,
            Datum::Value(Value::Float(2.5)),
        ];
        data.sort_by(Datum::sort_cmp);
        let kinds: Vec<_> = data.iter().map(Datum::type_name).collect();
        assert_eq!(kinds, vec!["null", "integer", "float", "float", "boolean", "string"]);
        assert!(matches!(data[3], Datum::Value(Value::Float(f)) if f.is_nan()));

        for x in &data {
            for y in &data {
                assert_eq!(x.sort_cmp(y), y.sort_cmp(x).reverse());
            }
        }
    }
}
