//! Evaluation of index query strings over stored records.
//!
//! Understands the subset of the Lucene syntax the query compiler emits:
//! `field:term`, `field:*`, `*:*`, `[a TO b]` / `{a TO b}` ranges with `*`
//! as an open bound, `AND`, `OR`, `NOT`, parentheses and backslash escapes.
//! Adjacent clauses without an operator are ANDed.

use super::StoreError;
use cairn_engine::{
    codec::{self, DATETIME_FORMAT},
    query::{BUCKET_FIELD, KEY_FIELD},
    RawRecord, Value,
};
use chrono::NaiveDateTime;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Indexed view of one sibling: decoded values keyed by storage key.
#[derive(Debug, Clone, Default)]
pub(crate) struct Document {
    fields: HashMap<String, Vec<Value>>,
}

impl Document {
    pub fn new(bucket: &str, key: &str, record: &RawRecord) -> Self {
        let mut fields = HashMap::new();
        fields.insert(BUCKET_FIELD.to_string(), vec![Value::from(bucket)]);
        fields.insert(KEY_FIELD.to_string(), vec![Value::from(key)]);
        for (storage_key, raw) in &record.entries {
            let values = match codec::decode_field(raw) {
                Some(Value::List(items)) => items,
                Some(value) => vec![value],
                None => continue,
            };
            fields.insert(storage_key.clone(), values);
        }
        Self { fields }
    }

    fn values(&self, field: &str) -> &[Value] {
        self.fields.get(field).map(Vec::as_slice).unwrap_or_default()
    }

    fn first(&self, field: &str) -> Option<&Value> {
        self.values(field).first()
    }
}

/// Parsed index query.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SearchExpr {
    All,
    Exists(String),
    Term(String, String),
    Range {
        field: String,
        lower: Option<Bound>,
        upper: Option<Bound>,
    },
    And(Box<SearchExpr>, Box<SearchExpr>),
    Or(Box<SearchExpr>, Box<SearchExpr>),
    Not(Box<SearchExpr>),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Bound {
    text: String,
    inclusive: bool,
}

impl SearchExpr {
    pub fn parse(input: &str) -> Result<Self, StoreError> {
        let mut parser = Parser {
            tokens: tokenize(input)?,
            pos: 0,
        };
        let expr = parser.or()?;
        match parser.peek() {
            None => Ok(expr),
            Some(token) => Err(bad(format!("unexpected {:?} in '{}'", token, input))),
        }
    }

    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            SearchExpr::All => true,
            SearchExpr::Exists(field) => !doc.values(field).is_empty(),
            SearchExpr::Term(field, text) => doc
                .values(field)
                .iter()
                .any(|v| compare_text(v, text) == Some(Ordering::Equal)),
            SearchExpr::Range {
                field,
                lower,
                upper,
            } => doc.values(field).iter().any(|v| {
                let above = lower.as_ref().map_or(true, |b| {
                    match compare_text(v, &b.text) {
                        Some(Ordering::Greater) => true,
                        Some(Ordering::Equal) => b.inclusive,
                        _ => false,
                    }
                });
                let below = upper.as_ref().map_or(true, |b| {
                    match compare_text(v, &b.text) {
                        Some(Ordering::Less) => true,
                        Some(Ordering::Equal) => b.inclusive,
                        _ => false,
                    }
                });
                above && below
            }),
            SearchExpr::And(a, b) => a.matches(doc) && b.matches(doc),
            SearchExpr::Or(a, b) => a.matches(doc) || b.matches(doc),
            SearchExpr::Not(inner) => !inner.matches(doc),
        }
    }
}

/// Compare a typed value with query text, numerically for numbers.
fn compare_text(value: &Value, text: &str) -> Option<Ordering> {
    match value {
        Value::Integer(i) => match text.parse::<i64>() {
            Ok(other) => Some(i.cmp(&other)),
            Err(_) => (*i as f64).partial_cmp(&text.parse::<f64>().ok()?),
        },
        Value::Float(f) => f.partial_cmp(&text.parse::<f64>().ok()?),
        Value::DateTime(dt) => Some(dt.cmp(&NaiveDateTime::parse_from_str(text, DATETIME_FORMAT).ok()?)),
        other => Some(codec::search_text(other).as_str().cmp(text)),
    }
}

/// A `sort` option entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SortKey {
    field: String,
    descending: bool,
}

pub(crate) fn parse_sort(sort: &str) -> Result<Vec<SortKey>, StoreError> {
    sort.split(',')
        .map(str::trim)
        .filter(|clause| !clause.is_empty())
        .map(|clause| {
            let mut parts = clause.split_whitespace();
            let field = parts.next().unwrap_or_default().to_string();
            let descending = match parts.next() {
                None | Some("asc") => false,
                Some("desc") => true,
                Some(other) => return Err(bad(format!("unknown sort direction '{}'", other))),
            };
            Ok(SortKey { field, descending })
        })
        .collect()
}

/// Order two documents by sort keys. Documents missing a field sort first.
pub(crate) fn compare_documents(a: &Document, b: &Document, keys: &[SortKey]) -> Ordering {
    for key in keys {
        let ordering = match (a.first(&key.field), b.first(&key.field)) {
            (Some(x), Some(y)) => x.compare(y).unwrap_or(Ordering::Equal),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        let ordering = if key.descending {
            ordering.reverse()
        } else {
            ordering
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn bad(message: impl Into<String>) -> StoreError {
    StoreError::BadQuery(message.into())
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    /// `[` or `{`, carrying inclusiveness
    Open(bool),
    /// `]` or `}`, carrying inclusiveness
    Close(bool),
    Colon,
    And,
    Or,
    Not,
    To,
    Word { text: String, wildcard: bool },
}

fn tokenize(input: &str) -> Result<Vec<Token>, StoreError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        let single = match c {
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            '[' => Some(Token::Open(true)),
            '{' => Some(Token::Open(false)),
            ']' => Some(Token::Close(true)),
            '}' => Some(Token::Close(false)),
            ':' => Some(Token::Colon),
            _ => None,
        };
        if let Some(token) = single {
            chars.next();
            tokens.push(token);
            continue;
        }
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let mut text = String::new();
        let mut escaped = false;
        while let Some(&c) = chars.peek() {
            if c == '\\' {
                chars.next();
                let next = chars.next().ok_or_else(|| bad("dangling escape"))?;
                text.push(next);
                escaped = true;
            } else if c.is_whitespace() || "()[]{}:".contains(c) {
                break;
            } else {
                text.push(c);
                chars.next();
            }
        }

        tokens.push(match (text.as_str(), escaped) {
            ("AND", false) => Token::And,
            ("OR", false) => Token::Or,
            ("NOT", false) => Token::Not,
            ("TO", false) => Token::To,
            ("*", false) => Token::Word {
                text,
                wildcard: true,
            },
            _ => Token::Word {
                text,
                wildcard: false,
            },
        });
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), StoreError> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            found => Err(bad(format!("expected {:?}, found {:?}", expected, found))),
        }
    }

    fn or(&mut self) -> Result<SearchExpr, StoreError> {
        let mut expr = self.and()?;
        while self.peek() == Some(&Token::Or) {
            self.next();
            let rhs = self.and()?;
            expr = SearchExpr::Or(Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn and(&mut self) -> Result<SearchExpr, StoreError> {
        let mut expr = self.unary()?;
        loop {
            let rhs = match self.peek() {
                Some(Token::And) => {
                    self.next();
                    self.unary()?
                }
                Some(Token::Not | Token::LParen | Token::Word { .. }) => self.unary()?,
                _ => break,
            };
            expr = SearchExpr::And(Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn unary(&mut self) -> Result<SearchExpr, StoreError> {
        if self.peek() == Some(&Token::Not) {
            self.next();
            return Ok(SearchExpr::Not(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<SearchExpr, StoreError> {
        match self.next() {
            Some(Token::LParen) => {
                let expr = self.or()?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }
            Some(Token::Word {
                text: field,
                wildcard: field_wildcard,
            }) => {
                self.expect(Token::Colon)?;
                match self.next() {
                    Some(Token::Word { wildcard: true, .. }) if field_wildcard => Ok(SearchExpr::All),
                    Some(Token::Word { wildcard: true, .. }) => Ok(SearchExpr::Exists(field)),
                    Some(Token::Word { text, .. }) if !field_wildcard => {
                        Ok(SearchExpr::Term(field, text))
                    }
                    Some(Token::Open(lower_inclusive)) if !field_wildcard => {
                        let lower = self.bound(lower_inclusive)?;
                        self.expect(Token::To)?;
                        let upper_text = self.bound(false)?;
                        let upper = match self.next() {
                            Some(Token::Close(inclusive)) => upper_text.map(|b| Bound {
                                inclusive,
                                ..b
                            }),
                            found => {
                                return Err(bad(format!("unterminated range, found {:?}", found)))
                            }
                        };
                        Ok(SearchExpr::Range {
                            field,
                            lower,
                            upper,
                        })
                    }
                    found => Err(bad(format!("invalid value for '{}': {:?}", field, found))),
                }
            }
            found => Err(bad(format!("expected a clause, found {:?}", found))),
        }
    }

    fn bound(&mut self, inclusive: bool) -> Result<Option<Bound>, StoreError> {
        match self.next() {
            Some(Token::Word { wildcard: true, .. }) => Ok(None),
            Some(Token::Word { text, .. }) => Ok(Some(Bound { text, inclusive })),
            found => Err(bad(format!("invalid range bound {:?}", found))),
        }
    }
}
