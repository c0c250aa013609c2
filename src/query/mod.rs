//! Query options
//!
//! Parses the `$`-options of a request into a [`Query`]. Option names the
//! engine does not know are rejected; plain (non-`$`) parameters are left to
//! the caller.

pub mod expression;
pub mod parser;

pub use expression::{CompareOp, Expression, compare_values};
pub use parser::parse_expression;

use crate::config::CoreSettings;
use crate::core::error::{RequestError, StaResult};
use crate::links::url::split_query;
use crate::model::EntityType;
use std::fmt;

/// One `$orderby` clause
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub expression: Expression,
    pub ascending: bool,
}

impl OrderBy {
    pub fn asc(expression: Expression) -> Self {
        Self {
            expression,
            ascending: true,
        }
    }

    pub fn desc(expression: Expression) -> Self {
        Self {
            expression,
            ascending: false,
        }
    }
}

impl fmt::Display for OrderBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}",
            self.expression,
            if self.ascending { "asc" } else { "desc" }
        )
    }
}

/// How much link metadata responses carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Metadata {
    Full,
    #[default]
    Default,
    /// No navigation links
    Minimal,
    /// No links at all, no `Location` header on create
    Off,
}

impl Metadata {
    fn parse(text: &str) -> StaResult<Self> {
        match text.to_ascii_lowercase().as_str() {
            "full" => Ok(Metadata::Full),
            "default" => Ok(Metadata::Default),
            "minimal" => Ok(Metadata::Minimal),
            "off" => Ok(Metadata::Off),
            other => Err(RequestError::query(format!("unknown $resultMetadata '{other}'")).into()),
        }
    }
}

/// Parsed query options of one request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filter: Option<Expression>,
    pub skip_filter: Option<Expression>,
    pub order_by: Vec<OrderBy>,
    pub select: Vec<String>,
    pub expand: Vec<String>,
    pub top: Option<usize>,
    pub skip: Option<usize>,
    pub count: Option<bool>,
    pub format: Option<String>,
    pub metadata: Metadata,
    /// Target of a `$ref` delete
    pub ref_id: Option<String>,
    pub(crate) pk_order: bool,
}

fn single<'a>(key: &str, values: &'a [String]) -> StaResult<&'a str> {
    match values {
        [value] => Ok(value),
        _ => Err(RequestError::query(format!("{key} given more than once")).into()),
    }
}

fn parse_count(key: &str, value: &str) -> StaResult<usize> {
    value
        .trim()
        .parse()
        .map_err(|_| RequestError::query(format!("{key} must be a non-negative integer, got '{value}'")).into())
}

fn list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl Query {
    /// Parse a raw query string; names are checked against `entity_type`
    /// when the request targets entities
    pub fn parse(
        raw: &str,
        entity_type: Option<&EntityType>,
        settings: &CoreSettings,
    ) -> StaResult<Query> {
        let mut query = Query::default();
        for (key, values) in split_query(raw) {
            if !key.starts_with('$') {
                continue;
            }
            let value = single(&key, &values)?;
            match key.as_str() {
                "$filter" => query.filter = Some(parse_expression(value)?),
                "$skipFilter" => query.skip_filter = Some(parse_expression(value)?),
                "$orderby" => query.order_by = parse_order_by(value)?,
                "$select" => query.select = list(value),
                "$expand" => query.expand = list(value),
                "$top" => query.top = Some(parse_count(&key, value)?.min(settings.max_top)),
                "$skip" => query.skip = Some(parse_count(&key, value)?),
                "$count" => {
                    query.count = Some(match value {
                        "true" => true,
                        "false" => false,
                        other => {
                            return Err(RequestError::query(format!(
                                "$count must be true or false, got '{other}'"
                            ))
                            .into());
                        }
                    })
                }
                "$format" => query.format = Some(value.to_string()),
                "$resultMetadata" => query.metadata = Metadata::parse(value)?,
                "$id" => query.ref_id = Some(value.to_string()),
                other => {
                    return Err(RequestError::query(format!("unknown query option '{other}'")).into());
                }
            }
        }
        if let Some(entity_type) = entity_type {
            query.validate(entity_type)?;
        }
        Ok(query)
    }

    fn validate(&self, entity_type: &EntityType) -> StaResult<()> {
        let mut paths: Vec<&[String]> = Vec::new();
        for expr in self.filter.iter().chain(self.skip_filter.iter()) {
            paths.extend(expr.paths());
        }
        for order in &self.order_by {
            paths.extend(order.expression.paths());
        }
        for path in paths {
            let Some((first, rest)) = path.split_first() else {
                continue;
            };
            let prop = entity_type.entity_property(first).ok_or_else(|| {
                RequestError::query(format!("no property '{first}' on {}", entity_type.name()))
            })?;
            if !rest.is_empty() && !prop.has_custom_properties() {
                return Err(RequestError::query(format!(
                    "'{first}' has no sub-properties"
                ))
                .into());
            }
        }
        for name in &self.select {
            if entity_type.property(name).is_none() {
                return Err(RequestError::query(format!(
                    "cannot select '{name}' on {}",
                    entity_type.name()
                ))
                .into());
            }
        }
        for name in &self.expand {
            if entity_type.navigation_property(name).is_none() {
                return Err(RequestError::query(format!(
                    "cannot expand '{name}' on {}",
                    entity_type.name()
                ))
                .into());
            }
        }
        Ok(())
    }

    /// Page size: `$top`, or the configured default
    pub fn effective_top(&self, settings: &CoreSettings) -> usize {
        self.top.unwrap_or(settings.default_top.min(settings.max_top))
    }

    pub fn effective_skip(&self) -> usize {
        self.skip.unwrap_or(0)
    }

    pub fn is_count(&self) -> bool {
        self.count.unwrap_or(false)
    }

    /// Make the ordering total by appending the primary key when it is
    /// not already ordered on
    pub fn add_pk_order(&mut self, entity_type: &EntityType) {
        let pk = entity_type.primary_key().name();
        let has_pk = self.order_by.iter().any(|o| {
            o.expression
                .as_path()
                .is_some_and(|p| p.len() == 1 && p[0] == pk)
        });
        if !has_pk {
            self.order_by.push(OrderBy::asc(Expression::path(&[pk])));
        }
        self.pk_order = true;
    }

    /// Ordering ends in a unique key, so continuation filters are exact
    pub fn is_pk_order(&self) -> bool {
        self.pk_order
    }

    /// Options a filtered bulk delete must not carry
    pub fn check_bulk_delete(&self) -> StaResult<()> {
        if self.count.is_some() || !self.expand.is_empty() || self.top.is_some() || self.skip.is_some() {
            return Err(RequestError::not_allowed(
                "$count, $expand, $top and $skip are not allowed when deleting by query",
            )
            .into());
        }
        Ok(())
    }
}

fn parse_order_by(text: &str) -> StaResult<Vec<OrderBy>> {
    list(text)
        .into_iter()
        .map(|clause| {
            let (expr_text, ascending) = match clause.rsplit_once(' ') {
                Some((e, dir)) if dir.eq_ignore_ascii_case("asc") => (e.trim(), true),
                Some((e, dir)) if dir.eq_ignore_ascii_case("desc") => (e.trim(), false),
                _ => (clause.as_str(), true),
            };
            Ok(OrderBy {
                expression: parse_expression(expr_text)?,
                ascending,
            })
        })
        .collect()
}
