//! Client-side post-processing of search results.
//!
//! The search index cannot group, filter groups or compute projections, so
//! those steps run over the decoded entities in a fixed order:
//! deferred `where` conditions, `group_by`, `having`, `order_by`,
//! `limit`/`offset`, `select`.

use super::{
    eval::{evaluate, Datum},
    Direction, Expr, OrderBy, QueryError,
};
use crate::Entity;

/// The client-side part of a compiled query.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PostProcess {
    /// Where conditions the index cannot evaluate faithfully
    pub filters: Vec<Expr>,
    pub group_bys: Vec<Expr>,
    pub havings: Vec<Expr>,
    /// Orderings the search could not apply
    pub order_bys: Vec<OrderBy>,
    pub select: Option<Expr>,
    /// Set only when ordering or grouping happens here
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

struct Group {
    key: Vec<Datum>,
    members: Vec<Entity>,
}

impl PostProcess {
    /// Whether entities pass through untouched.
    pub fn is_passthrough(&self) -> bool {
        self.filters.is_empty()
            && self.group_bys.is_empty()
            && self.havings.is_empty()
            && self.order_bys.is_empty()
            && self.select.is_none()
            && self.limit.is_none()
            && self.offset.is_none()
    }

    /// Whether rows are groups rather than single entities.
    pub fn is_grouped(&self) -> bool {
        !self.group_bys.is_empty()
            || !self.havings.is_empty()
            || self.select.as_ref().is_some_and(Expr::has_aggregate)
    }

    pub fn run(&self, entities: Vec<Entity>) -> Result<Vec<Datum>, QueryError> {
        let entities = self.filter(entities)?;
        let mut groups = self.group(entities)?;

        if !self.havings.is_empty() {
            let mut kept = Vec::with_capacity(groups.len());
            for group in groups {
                if self.passes(&group.members)? {
                    kept.push(group);
                }
            }
            groups = kept;
        }

        if !self.order_bys.is_empty() {
            let mut keyed = Vec::with_capacity(groups.len());
            for group in groups {
                let key = self
                    .order_bys
                    .iter()
                    .map(|o| evaluate(&o.expr, &group.members))
                    .collect::<Result<Vec<_>, _>>()?;
                keyed.push((key, group));
            }
            keyed.sort_by(|(a, _), (b, _)| {
                self.order_bys
                    .iter()
                    .zip(a.iter().zip(b))
                    .map(|(order, (x, y))| match order.direction {
                        Direction::Asc => x.sort_cmp(y),
                        Direction::Desc => y.sort_cmp(x),
                    })
                    .find(|o| o.is_ne())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            groups = keyed.into_iter().map(|(_, group)| group).collect();
        }

        let rows = groups
            .into_iter()
            .skip(self.offset.unwrap_or(0))
            .take(self.limit.unwrap_or(usize::MAX));

        let grouped = self.is_grouped();
        rows.map(|group| match &self.select {
            Some(select) => evaluate(select, &group.members),
            None if grouped => Ok(Datum::List(
                group.members.into_iter().map(Datum::from).collect(),
            )),
            None => Ok(group
                .members
                .into_iter()
                .next()
                .map_or(Datum::Null, Datum::from)),
        })
        .collect()
    }

    fn filter(&self, entities: Vec<Entity>) -> Result<Vec<Entity>, QueryError> {
        if self.filters.is_empty() {
            return Ok(entities);
        }
        let mut kept = Vec::with_capacity(entities.len());
        for entity in entities {
            let row = std::slice::from_ref(&entity);
            let mut passes = true;
            for filter in &self.filters {
                if !evaluate(filter, row)?.is_true() {
                    passes = false;
                    break;
                }
            }
            if passes {
                kept.push(entity);
            }
        }
        Ok(kept)
    }

    fn passes(&self, members: &[Entity]) -> Result<bool, QueryError> {
        for having in &self.havings {
            if !evaluate(having, members)?.is_true() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Split entities into groups, preserving first-seen order.
    ///
    /// Without `group_by`, a query with `having` or an aggregate projection
    /// is one group holding every entity; otherwise each entity is its own
    /// row.
    fn group(&self, entities: Vec<Entity>) -> Result<Vec<Group>, QueryError> {
        if self.group_bys.is_empty() {
            if self.is_grouped() {
                return Ok(vec![Group {
                    key: Vec::new(),
                    members: entities,
                }]);
            }
            return Ok(entities
                .into_iter()
                .map(|e| Group {
                    key: Vec::new(),
                    members: vec![e],
                })
                .collect());
        }

        let mut groups: Vec<Group> = Vec::new();
        for entity in entities {
            let key = self
                .group_bys
                .iter()
                .map(|g| evaluate(g, std::slice::from_ref(&entity)))
                .collect::<Result<Vec<_>, _>>()?;
            match groups.iter_mut().find(|g| same_key(&g.key, &key)) {
                Some(group) => group.members.push(entity),
                None => groups.push(Group {
                    key,
                    members: vec![entity],
                }),
            }
        }
        tracing::debug!(groups = groups.len(), "grouped results");
        Ok(groups)
    }
}

fn same_key(a: &[Datum], b: &[Datum]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b)
            .all(|(x, y)| (x.is_null() && y.is_null()) || x.equals(y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{query::Aggregate, FieldDef, FieldType, ModelSchema, Value};

    fn entities() -> Vec<Entity> {
        let model = ModelSchema::new(
            "App.Item",
            "items",
            1,
            vec![
                FieldDef::new("category", FieldType::String),
                FieldDef::new("price", FieldType::Integer),
            ],
        );
        [("a", 10), ("b", 5), ("a", 30), ("c", 20)]
            .iter()
            .enumerate()
            .map(|(i, (category, price))| {
                Entity::new(&model)
                    .with_id(format!("k{i}"))
                    .with("category", *category)
                    .with("price", *price)
            })
            .collect()
    }

    fn tuple(items: Vec<Value>) -> Datum {
        Datum::Tuple(items.into_iter().map(Datum::Value).collect())
    }

    #[test]
    fn passthrough_keeps_entities() {
        let post = PostProcess::default();
        assert!(post.is_passthrough());
        let rows = post.run(entities()).unwrap();
        assert_eq!(rows.len(), 4);
        assert!(rows.iter().all(|r| r.as_entity().is_some()));
    }

    #[test]
    fn filters_run_before_grouping() {
        let post = PostProcess {
            filters: vec![Expr::field("price").gte(Expr::lit(10))],
            group_bys: vec![Expr::field("category")],
            select: Some(Expr::Tuple(vec![Expr::field("category"), Expr::count()])),
            ..Default::default()
        };
        assert!(!post.is_passthrough());
        let rows = post.run(entities()).unwrap();
        assert_eq!(
            rows,
            vec![
                tuple(vec!["a".into(), 2.into()]),
                tuple(vec!["c".into(), 1.into()]),
            ]
        );
    }

    #[test]
    fn group_having_select() {
        let post = PostProcess {
            group_bys: vec![Expr::field("category")],
            havings: vec![Expr::count().gt(Expr::lit(1))],
            select: Some(Expr::Tuple(vec![Expr::field("category"), Expr::count()])),
            ..Default::default()
        };
        let rows = post.run(entities()).unwrap();
        assert_eq!(rows, vec![tuple(vec!["a".into(), 2.into()])]);
    }

    #[test]
    fn groups_keep_first_seen_order() {
        let post = PostProcess {
            group_bys: vec![Expr::field("category")],
            select: Some(Expr::field("category")),
            ..Default::default()
        };
        let rows = post.run(entities()).unwrap();
        let categories: Vec<_> = rows.iter().filter_map(Datum::as_value).cloned().collect();
        assert_eq!(
            categories,
            vec![Value::from("a"), Value::from("b"), Value::from("c")]
        );
    }

    #[test]
    fn having_without_group_gates_everything() {
        let keep = PostProcess {
            havings: vec![Expr::count().gte(Expr::lit(4))],
            ..Default::default()
        };
        let rows = keep.run(entities()).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(matches!(&rows[0], Datum::List(items) if items.len() == 4));

        let drop = PostProcess {
            havings: vec![Expr::count().gt(Expr::lit(4))],
            ..Default::default()
        };
        assert!(drop.run(entities()).unwrap().is_empty());
    }

    #[test]
    fn aggregate_select_without_group() {
        let post = PostProcess {
            select: Some(Expr::aggregate(Aggregate::Sum, Expr::field("price"))),
            ..Default::default()
        };
        assert_eq!(post.run(entities()).unwrap(), vec![Datum::Value(65.into())]);
    }

    #[test]
    fn order_then_limit_and_offset() {
        let post = PostProcess {
            order_bys: vec![OrderBy::desc(Expr::field("price"))],
            select: Some(Expr::field("price")),
            offset: Some(1),
            limit: Some(2),
            ..Default::default()
        };
        let rows = post.run(entities()).unwrap();
        assert_eq!(rows, vec![Datum::Value(20.into()), Datum::Value(10.into())]);
    }

    #[test]
    fn order_groups_by_aggregate() {
        let post = PostProcess {
            group_bys: vec![Expr::field("category")],
            order_bys: vec![OrderBy::desc(Expr::aggregate(
                Aggregate::Sum,
                Expr::field("price"),
            ))],
            select: Some(Expr::Tuple(vec![
                Expr::field("category"),
                Expr::aggregate(Aggregate::Sum, Expr::field("price")),
            ])),
            ..Default::default()
        };
        let rows = post.run(entities()).unwrap();
        assert_eq!(
            rows,
            vec![
                tuple(vec!["a".into(), 40.into()]),
                tuple(vec!["c".into(), 20.into()]),
                tuple(vec!["b".into(), 5.into()]),
            ]
        );
    }

    #[test]
    fn evaluation_errors_surface() {
        let post = PostProcess {
            select: Some(Expr::binary(
                crate::query::BinOp::Add,
                Expr::field("category"),
                Expr::lit(1),
            )),
            ..Default::default()
        };
        assert!(matches!(
            post.run(entities()),
            Err(QueryError::InvalidOperands { .. })
        ));
    }
}
