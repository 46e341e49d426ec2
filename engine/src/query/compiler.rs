//! Query compilation.
//!
//! Lowers a [`Query`] into a search request for the store's index plus the
//! [`PostProcess`] steps that have to run on the decoded results.
//!
//! # Index query syntax
//!
//! ```text
//! *:*                  - every document
//! title_s:Hello        - field equals term
//! title_s:*            - field has a value
//! views_i:[1 TO 5]     - inclusive range, `*` for an open end
//! views_i:{1 TO *}     - exclusive range
//! (a AND b) (a OR b)   - boolean combinations
//! (*:* NOT a)          - negation
//! ```
//!
//! Special characters in terms are escaped with a backslash.

use super::{BinOp, Expr, OrderBy, PostProcess, Query, QueryError};
use crate::{
    codec, error::Result, Error, FieldType, ModelName, ModelSchema, Schema, Value,
};

/// Hit metadata key holding the bucket.
pub const BUCKET_FIELD: &str = "_yz_rb";
/// Hit metadata key holding the object key.
pub const KEY_FIELD: &str = "_yz_rk";
/// Hit metadata key holding the index document id.
pub const DOC_ID_FIELD: &str = "_yz_id";
/// Hit metadata key holding the relevance score.
pub const SCORE_FIELD: &str = "score";

/// Rows requested when results are post-processed client-side.
pub const DEFAULT_MAX_ROWS: usize = 10_000;

const MATCH_ALL: &str = "*:*";
const MATCH_NONE: &str = "(*:* NOT *:*)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    /// Rows to request when the whole result set is needed client-side
    pub max_rows: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            max_rows: DEFAULT_MAX_ROWS,
        }
    }
}

/// Options passed along with the index query string.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchOptions {
    /// Sort clause, e.g. `views_i desc,title_s asc`
    pub sort: Option<String>,
    pub start: Option<usize>,
    pub rows: Option<usize>,
    /// Filter query restricting hits to one bucket
    pub filter: Option<String>,
}

/// A search request against a model's index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub index: String,
    pub bucket: String,
    pub query: String,
    pub options: SearchOptions,
}

/// How the candidate entities are obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetch {
    /// Direct fetch of one key
    Key { bucket: String, key: String },
    Search(SearchQuery),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub model: ModelName,
    pub fetch: Fetch,
    pub post: PostProcess,
}

/// Compile a query against the declared schema.
///
/// Joins, `distinct` and locks are rejected before anything else.
pub fn compile(query: &Query, schema: &Schema, options: &CompileOptions) -> Result<CompiledQuery> {
    if !query.joins.is_empty() {
        return Err(QueryError::Unsupported("joins".into()).into());
    }
    if query.distinct {
        return Err(QueryError::Unsupported("distinct".into()).into());
    }
    if query.lock.is_some() {
        return Err(QueryError::Unsupported("locks".into()).into());
    }

    let model = schema.require_model(&query.from)?;
    check_fields(query, model)?;

    let mut post = PostProcess {
        filters: Vec::new(),
        group_bys: query.group_bys.clone(),
        havings: query.havings.clone(),
        order_bys: Vec::new(),
        select: query.select.clone(),
        limit: None,
        offset: None,
    };

    if let Some(key) = key_lookup(&query.wheres) {
        tracing::debug!(model = %model.name, key, "compiled to key fetch");
        post.order_bys = query.order_bys.clone();
        post.limit = query.limit;
        post.offset = query.offset;
        return Ok(CompiledQuery {
            model: model.name.clone(),
            fetch: Fetch::Key {
                bucket: model.bucket.clone(),
                key: key.to_string(),
            },
            post,
        });
    }

    let mut fragments = Vec::with_capacity(query.wheres.len());
    for condition in &query.wheres {
        // Lowered either way so that unsupported conditions still fail here.
        let fragment = lower(condition, model)?;
        if needs_client_range(condition, model) {
            post.filters.push(condition.clone());
        } else {
            fragments.push(fragment);
        }
    }
    let query_string = if fragments.is_empty() {
        MATCH_ALL.to_string()
    } else {
        fragments.join(" AND ")
    };

    let store_sort = if post.is_grouped() || !post.filters.is_empty() {
        None
    } else {
        store_sort(&query.order_bys, model)
    };

    let mut search_options = SearchOptions {
        filter: Some(format!("{}:{}", BUCKET_FIELD, escape(&model.bucket))),
        ..SearchOptions::default()
    };
    match store_sort {
        Some(sort) => {
            search_options.sort = sort;
            search_options.start = query.offset;
            search_options.rows = Some(query.limit.unwrap_or(options.max_rows));
        }
        None => {
            post.order_bys = query.order_bys.clone();
            post.limit = query.limit;
            post.offset = query.offset;
            search_options.rows = Some(options.max_rows);
        }
    }

    tracing::debug!(model = %model.name, query = %query_string, "compiled search query");

    Ok(CompiledQuery {
        model: model.name.clone(),
        fetch: Fetch::Search(SearchQuery {
            index: model.search_index.clone(),
            bucket: model.bucket.clone(),
            query: query_string,
            options: search_options,
        }),
        post,
    })
}

/// The key of a query that is a single equality on the primary key.
fn key_lookup(wheres: &[Expr]) -> Option<&str> {
    let [Expr::Binary {
        op: BinOp::Eq,
        lhs,
        rhs,
    }] = wheres
    else {
        return None;
    };
    match (lhs.as_ref(), rhs.as_ref()) {
        (Expr::Field(f), Expr::Literal(Value::String(key)))
        | (Expr::Literal(Value::String(key)), Expr::Field(f))
            if f == crate::schema::ID_FIELD =>
        {
            Some(key.as_str())
        }
        _ => None,
    }
}

/// Sort clause for the index, or `None` when ordering must happen
/// client-side. `Some(None)` means there is nothing to sort.
fn store_sort(order_bys: &[OrderBy], model: &ModelSchema) -> Option<Option<String>> {
    if order_bys.is_empty() {
        return Some(None);
    }
    let mut clauses = Vec::with_capacity(order_bys.len());
    for order in order_bys {
        let Expr::Field(name) = &order.expr else {
            return None;
        };
        let field_type = model.field_type(name)?;
        if text_misorders(field_type) || field_type.is_list() {
            return None;
        }
        let direction = match order.direction {
            super::Direction::Asc => "asc",
            super::Direction::Desc => "desc",
        };
        clauses.push(format!("{} {}", codec::storage_key(name, field_type), direction));
    }
    Some(Some(clauses.join(",")))
}

/// Types whose index text does not order like their values.
fn text_misorders(field_type: FieldType) -> bool {
    matches!(field_type, FieldType::DateTime | FieldType::Interval)
}

/// Whether a where condition range-compares a field whose index text does
/// not order like its values.
fn needs_client_range(condition: &Expr, model: &ModelSchema) -> bool {
    let mut found = false;
    condition.walk(&mut |expr| {
        let Expr::Binary { op, lhs, rhs } = expr else {
            return;
        };
        if !matches!(op, BinOp::Lt | BinOp::Lte | BinOp::Gt | BinOp::Gte) {
            return;
        }
        for side in [lhs.as_ref(), rhs.as_ref()] {
            if let Expr::Field(name) = side {
                if model.field_type(name).is_some_and(text_misorders) {
                    found = true;
                }
            }
        }
    });
    found
}

fn check_fields(query: &Query, model: &ModelSchema) -> Result<()> {
    let mut unknown = None;
    let mut visit = |expr: &Expr| {
        if let Expr::Field(name) = expr {
            if unknown.is_none() && model.field_type(name).is_none() {
                unknown = Some(name.clone());
            }
        }
    };
    for expr in query
        .wheres
        .iter()
        .chain(&query.group_bys)
        .chain(&query.havings)
        .chain(query.order_bys.iter().map(|o| &o.expr))
        .chain(&query.select)
    {
        expr.walk(&mut visit);
    }
    match unknown {
        Some(field) => Err(Error::UnknownField {
            model: model.name.clone(),
            field,
        }),
        None => Ok(()),
    }
}

/// An operand of a where-clause comparison.
enum Operand<'a> {
    Field(&'a str),
    Value(Value),
    Null,
}

/// Lower one where-clause expression to index query syntax.
fn lower(expr: &Expr, model: &ModelSchema) -> Result<String> {
    match expr {
        Expr::Binary {
            op: BinOp::And,
            lhs,
            rhs,
        } => Ok(format!("({} AND {})", lower(lhs, model)?, lower(rhs, model)?)),
        Expr::Binary {
            op: BinOp::Or,
            lhs,
            rhs,
        } => Ok(format!("({} OR {})", lower(lhs, model)?, lower(rhs, model)?)),
        Expr::Binary { op, lhs, rhs } if op.is_comparison() => {
            comparison(*op, operand(lhs)?, operand(rhs)?, model)
        }
        Expr::Binary { op, .. } => {
            disallow(*op)?;
            Err(QueryError::Unsupported(format!("'{}' used as a condition", op)).into())
        }
        Expr::Not(inner) => Ok(format!("(*:* NOT {})", lower(inner, model)?)),
        Expr::IsNil(inner) => match operand(inner)? {
            Operand::Field(name) => Ok(format!("(*:* NOT {}:*)", key_of(name, model)?)),
            _ => Err(QueryError::Unsupported("is_nil on a non-field".into()).into()),
        },
        Expr::In { expr, list } => {
            let Operand::Field(name) = operand(expr)? else {
                return Err(QueryError::Unsupported("'in' on a non-field".into()).into());
            };
            let key = key_of(name, model)?;
            let mut terms = Vec::with_capacity(list.len());
            for item in list {
                match operand(item)? {
                    Operand::Value(value) => terms.push(term(&key, &value)?),
                    Operand::Null => terms.push(format!("(*:* NOT {}:*)", key)),
                    Operand::Field(_) => {
                        return Err(QueryError::Unsupported("fields in an 'in' list".into()).into())
                    }
                }
            }
            if terms.is_empty() {
                Ok(MATCH_NONE.to_string())
            } else {
                Ok(format!("({})", terms.join(" OR ")))
            }
        }
        Expr::Literal(Value::Boolean(true)) => Ok(MATCH_ALL.to_string()),
        Expr::Literal(Value::Boolean(false)) => Ok(MATCH_NONE.to_string()),
        other => Err(QueryError::Unsupported(format!("where clause {:?}", other)).into()),
    }
}

fn disallow(op: BinOp) -> Result<()> {
    match op {
        BinOp::Div | BinOp::Pow | BinOp::Rem => Err(QueryError::DisallowedOperator(op).into()),
        _ => Ok(()),
    }
}

/// Reduce an expression to a field reference or a constant.
///
/// Arithmetic over literals is folded; arithmetic involving fields has no
/// index syntax.
fn operand(expr: &Expr) -> Result<Operand<'_>> {
    match expr {
        Expr::Field(name) => Ok(Operand::Field(name)),
        Expr::Literal(value) => Ok(Operand::Value(value.clone())),
        Expr::Null => Ok(Operand::Null),
        Expr::Binary { op, lhs, rhs } if op.is_arithmetic() => {
            disallow(*op)?;
            match (operand(lhs)?, operand(rhs)?) {
                (Operand::Value(a), Operand::Value(b)) => {
                    Ok(Operand::Value(super::eval::arithmetic(*op, &a, &b)?))
                }
                (Operand::Null, _) | (_, Operand::Null) => Ok(Operand::Null),
                _ => Err(QueryError::Unsupported(format!("'{}' on a field in a where clause", op)).into()),
            }
        }
        other => Err(QueryError::Unsupported(format!("operand {:?}", other)).into()),
    }
}

fn comparison(op: BinOp, lhs: Operand<'_>, rhs: Operand<'_>, model: &ModelSchema) -> Result<String> {
    let (name, op, value) = match (lhs, rhs) {
        (Operand::Field(name), Operand::Value(v)) => (name, op, Some(v)),
        (Operand::Value(v), Operand::Field(name)) => (name, op.flipped(), Some(v)),
        (Operand::Field(name), Operand::Null) | (Operand::Null, Operand::Field(name)) => {
            (name, op, None)
        }
        (Operand::Field(_), Operand::Field(_)) => {
            return Err(QueryError::Unsupported("comparing two fields".into()).into())
        }
        _ => return Err(QueryError::Unsupported("comparison without a field".into()).into()),
    };
    let key = key_of(name, model)?;

    let Some(value) = value else {
        return match op {
            BinOp::Eq => Ok(format!("(*:* NOT {}:*)", key)),
            BinOp::NotEq => Ok(format!("{}:*", key)),
            _ => Err(QueryError::Unsupported(format!("'{}' against null", op)).into()),
        };
    };

    let bound = || -> Result<String> { Ok(escape(&scalar_text(&key, &value)?)) };
    match op {
        BinOp::Eq => term(&key, &value),
        BinOp::NotEq => Ok(format!("(*:* NOT {})", term(&key, &value)?)),
        BinOp::Lt => Ok(format!("{}:{{* TO {}}}", key, bound()?)),
        BinOp::Lte => Ok(format!("{}:[* TO {}]", key, bound()?)),
        BinOp::Gt => Ok(format!("{}:{{{} TO *}}", key, bound()?)),
        BinOp::Gte => Ok(format!("{}:[{} TO *]", key, bound()?)),
        other => Err(QueryError::Unsupported(format!("comparison '{}'", other)).into()),
    }
}

fn key_of(name: &str, model: &ModelSchema) -> Result<String> {
    let field_type = model.field_type(name).ok_or_else(|| Error::UnknownField {
        model: model.name.clone(),
        field: name.to_string(),
    })?;
    Ok(codec::storage_key(name, field_type))
}

fn term(key: &str, value: &Value) -> Result<String> {
    Ok(format!("{}:{}", key, escape(&scalar_text(key, value)?)))
}

fn scalar_text(key: &str, value: &Value) -> Result<String> {
    if let Value::List(_) = value {
        return Err(QueryError::Unsupported(format!("list literal compared with '{}'", key)).into());
    }
    Ok(codec::search_text(value))
}

/// Escape a term for the index query parser.
pub fn escape(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        match c {
            '\\' | '+' | '-' | '!' | '(' | ')' | ':' | '^' | '[' | ']' | '"' | '{' | '}' | '~'
            | '*' | '?' | '|' | '&' | '/' => {
                escaped.push('\\');
                escaped.push(c);
            }
            c if c.is_whitespace() => {
                escaped.push('\\');
                escaped.push(c);
            }
            _ => escaped.push(c),
        }
    }
    escaped
}
