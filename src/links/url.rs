//! URL construction: self links, navigation links, relative paths and
//! next links with keyset continuation

use crate::core::version::Version;
use crate::model::Entity;
use crate::query::{CompareOp, Expression, OrderBy, Query};
use indexmap::IndexMap;

/// `{root}/{version}/{Plural}({id})`, when the entity has an id
pub fn self_link(service_root_url: &str, version: Version, entity: &Entity) -> Option<String> {
    let id = entity.id()?;
    Some(format!(
        "{}/{}/{}({})",
        service_root_url.trim_end_matches('/'),
        version,
        entity.entity_type().plural(),
        id.to_url_string()
    ))
}

/// `{self link}/{navigation}`
pub fn navigation_link(self_link: &str, navigation: &str) -> String {
    format!("{self_link}/{navigation}")
}

/// Express `target` relative to `base`
///
/// A base that ends in `/` is a directory; otherwise its last segment is a
/// file and does not count as a directory to climb out of. Paths without a
/// shared first segment cannot be relativised and come back unchanged.
pub fn relative_path(target: &str, base: &str) -> String {
    let base_parts: Vec<&str> = base.split('/').collect();
    let mut target_parts: Vec<&str> = target.split('/').collect();
    while target_parts.last() == Some(&"") {
        target_parts.pop();
    }

    let mut common = String::new();
    let mut common_count = 0;
    for (t, b) in target_parts.iter().zip(&base_parts) {
        if t != b {
            break;
        }
        common.push_str(t);
        common.push('/');
        common_count += 1;
    }
    if common_count == 0 {
        return target.to_string();
    }

    let mut relative = String::new();
    if base_parts.len() == common_count {
        relative.push_str("./");
    } else {
        for _ in 0..(base_parts.len() - common_count - 1) {
            relative.push_str("../");
        }
    }
    if target.len() > common.len() {
        relative.push_str(&target[common.len()..]);
    }
    relative
}

/// Split a raw query string into decoded key / values pairs
///
/// Repeated keys accumulate in order under the first occurrence.
pub fn split_query(raw: &str) -> IndexMap<String, Vec<String>> {
    let mut result: IndexMap<String, Vec<String>> = IndexMap::new();
    let decode = |s: &str| {
        let spaced = s.replace('+', " ");
        urlencoding::decode(&spaced)
            .map(|c| c.into_owned())
            .unwrap_or(spaced)
    };
    for pair in raw.trim_start_matches('?').split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        result.entry(decode(key)).or_default().push(decode(value));
    }
    result
}

/// Directives of a `Prefer` header: `return=minimal, odata.maxpagesize=10`
pub fn parse_prefer(header: &str) -> IndexMap<String, String> {
    header
        .split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(|d| match d.split_once('=') {
            Some((k, v)) => (k.trim().to_string(), v.trim().to_string()),
            None => (d.to_string(), String::new()),
        })
        .collect()
}

/// Filter selecting the rows that sort strictly after `last`
///
/// `next` is the first row of the following page. Clauses tied between the
/// two rows extend an equality prefix; the first differing clause closes the
/// tuple comparison. `None` when a clause is not a plain path, a value is
/// missing or has no literal form, or every clause ties.
pub fn skip_filter(order_by: &[OrderBy], last: &Entity, next: &Entity) -> Option<Expression> {
    let mut prefix: Option<Expression> = None;
    let mut filter: Option<Expression> = None;
    for clause in order_by {
        let path = clause.expression.as_path()?;
        let last_value = last.value_for_path(path)?;
        let next_value = next.value_for_path(path)?;
        let last_constant = Expression::constant(&last_value)?;
        Expression::constant(&next_value)?;

        let op = if clause.ascending {
            CompareOp::Gt
        } else {
            CompareOp::Lt
        };
        let strict = Expression::compare(op, clause.expression.clone(), last_constant.clone());
        let step = match &prefix {
            None => strict,
            Some(p) => p.clone().and(strict),
        };
        let combined = match filter.take() {
            None => step,
            Some(f) => f.or(step),
        };

        if last_value != next_value {
            return Some(combined);
        }
        filter = Some(combined);
        let equal = Expression::compare(CompareOp::Eq, clause.expression.clone(), last_constant);
        prefix = Some(match prefix {
            None => equal,
            Some(p) => p.and(equal),
        });
    }
    None
}

/// How the next page continues
#[derive(Debug, Clone, PartialEq)]
pub enum Continuation {
    Skip(usize),
    SkipFilter(Expression),
}

impl Continuation {
    /// Keyset continuation when the ordering is total and both boundary
    /// rows are known; offset continuation otherwise
    pub fn for_page(
        query: &Query,
        top: usize,
        last: Option<&Entity>,
        next: Option<&Entity>,
    ) -> Continuation {
        if query.is_pk_order() {
            if let (Some(last), Some(next)) = (last, next) {
                if let Some(filter) = skip_filter(&query.order_by, last, next) {
                    return Continuation::SkipFilter(filter);
                }
            }
        }
        Continuation::Skip(query.effective_skip() + top)
    }
}

/// Next link for `request_url` keeping every option of `raw_query` except
/// `$skip`; an incoming `$skipFilter` is replaced by a keyset continuation
/// and kept under an offset one
pub fn next_link(request_url: &str, raw_query: &str, continuation: &Continuation) -> String {
    let keyset = matches!(continuation, Continuation::SkipFilter(_));
    let mut parts = Vec::new();
    for (key, values) in split_query(raw_query) {
        if key == "$skip" || (keyset && key == "$skipFilter") {
            continue;
        }
        for value in values {
            parts.push(format!("{key}={}", urlencoding::encode(&value)));
        }
    }
    match continuation {
        Continuation::Skip(skip) => parts.push(format!("$skip={skip}")),
        Continuation::SkipFilter(filter) => parts.push(format!(
            "$skipFilter={}",
            urlencoding::encode(&filter.to_string())
        )),
    }
    format!("{request_url}?{}", parts.join("&"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreSettings;
    use crate::model::{EntityType, PkValue};
    use crate::plugins::PluginManager;
    use serde_json::{Value, json};
    use std::sync::Arc;

    fn observation_type() -> Arc<EntityType> {
        let registry = PluginManager::with_defaults()
            .build_registry(&CoreSettings::default())
            .unwrap();
        registry.entity_type_for_name("Observation").unwrap().clone()
    }

    fn row(ty: &Arc<EntityType>, id: i64, a: Value, b: Value) -> Entity {
        Entity::new(ty.clone())
            .with_id(PkValue::single(id))
            .with_property("phenomenonTime", a)
            .with_property("resultTime", b)
    }

    fn order(names: &[(&str, bool)]) -> Vec<OrderBy> {
        names
            .iter()
            .map(|(n, asc)| OrderBy {
                expression: Expression::path(&[n]),
                ascending: *asc,
            })
            .collect()
    }

    #[test]
    fn test_relative_path() {
        assert_eq!(
            relative_path("/v1.1/Things(1)/Datastreams", "/v1.1/Things(1)"),
            "./Datastreams"
        );
        assert_eq!(
            relative_path("/v1.1/Things(1)/Locations", "/v1.1/Things(1)/Datastreams"),
            "Locations"
        );
        assert_eq!(
            relative_path("/v1.1/Sensors(2)", "/v1.1/Things(1)/Datastreams"),
            "../Sensors(2)"
        );
        assert_eq!(relative_path("/v1.1/Things(1)", "/v1.1/Things(1)"), "./");
        assert_eq!(
            relative_path("http://x.org/v1.1/Things", "/v1.1/Things"),
            "http://x.org/v1.1/Things"
        );
    }

    #[test]
    fn test_split_query() {
        let q = split_query("$top=2&b=%27x%27&$top=3&flag&c=a+b");
        let keys: Vec<_> = q.keys().cloned().collect();
        assert_eq!(keys, vec!["$top", "b", "flag", "c"]);
        assert_eq!(q["$top"], vec!["2", "3"]);
        assert_eq!(q["b"], vec!["'x'"]);
        assert_eq!(q["flag"], vec![""]);
        assert_eq!(q["c"], vec!["a b"]);
        assert!(split_query("").is_empty());
    }

    #[test]
    fn test_parse_prefer() {
        let prefs = parse_prefer(" return = minimal ,odata.maxpagesize=5,respond-async");
        assert_eq!(prefs["return"], "minimal");
        assert_eq!(prefs["odata.maxpagesize"], "5");
        assert_eq!(prefs["respond-async"], "");
    }

    #[test]
    fn test_skip_filter_single_column() {
        let ty = observation_type();
        let last = row(&ty, 4, json!(1), json!(1));
        let next = row(&ty, 5, json!(1), json!(1));
        let filter = skip_filter(&order(&[("id", true)]), &last, &next).unwrap();
        assert_eq!(filter.to_string(), "id gt 4");
    }

    #[test]
    fn test_skip_filter_two_columns() {
        let ty = observation_type();
        let last = row(&ty, 7, json!(3), json!(0));
        let next = row(&ty, 8, json!(3), json!(0));
        let filter =
            skip_filter(&order(&[("phenomenonTime", false), ("id", true)]), &last, &next).unwrap();
        assert_eq!(
            filter.to_string(),
            "(phenomenonTime lt 3 or (phenomenonTime eq 3 and id gt 7))"
        );

        let candidates = [
            row(&ty, 1, json!(5), json!(0)),
            row(&ty, 6, json!(3), json!(0)),
            row(&ty, 7, json!(3), json!(0)),
            row(&ty, 8, json!(3), json!(0)),
            row(&ty, 2, json!(2), json!(0)),
        ];
        let selected: Vec<_> = candidates
            .iter()
            .filter(|e| filter.matches(e))
            .map(|e| e.id().unwrap().to_string())
            .collect();
        assert_eq!(selected, vec!["8", "2"]);
    }

    #[test]
    fn test_skip_filter_three_columns_last_breaks_tie() {
        let ty = observation_type();
        let last = row(&ty, 3, json!(1), json!("b"));
        let next = row(&ty, 9, json!(1), json!("b"));
        let clauses = order(&[("phenomenonTime", true), ("resultTime", true), ("id", true)]);
        let filter = skip_filter(&clauses, &last, &next).unwrap();
        assert_eq!(
            filter.to_string(),
            "((phenomenonTime gt 1 or (phenomenonTime eq 1 and resultTime gt 'b')) \
             or ((phenomenonTime eq 1 and resultTime eq 'b') and id gt 3))"
        );

        let rows = [
            row(&ty, 1, json!(0), json!("z")),
            row(&ty, 2, json!(1), json!("a")),
            row(&ty, 3, json!(1), json!("b")),
            row(&ty, 4, json!(1), json!("b")),
            row(&ty, 5, json!(1), json!("c")),
            row(&ty, 6, json!(2), json!("a")),
        ];
        let selected: Vec<_> = rows
            .iter()
            .filter(|e| filter.matches(e))
            .map(|e| e.id().unwrap().to_string())
            .collect();
        assert_eq!(selected, vec!["4", "5", "6"]);
    }

    #[test]
    fn test_skip_filter_first_column_differs() {
        let ty = observation_type();
        let last = row(&ty, 3, json!(1), json!(0));
        let next = row(&ty, 4, json!(2), json!(0));
        let filter =
            skip_filter(&order(&[("phenomenonTime", true), ("id", true)]), &last, &next).unwrap();
        assert_eq!(filter.to_string(), "phenomenonTime gt 1");
    }

    #[test]
    fn test_skip_filter_fallbacks() {
        let ty = observation_type();
        let last = row(&ty, 3, json!(null), json!(0));
        let next = row(&ty, 4, json!(null), json!(0));
        assert!(skip_filter(&order(&[("phenomenonTime", true)]), &last, &next).is_none());

        let not_a_path = vec![OrderBy::asc(Expression::Constant(json!(1)))];
        assert!(skip_filter(&not_a_path, &last, &next).is_none());

        let tied = row(&ty, 3, json!(null), json!(0));
        assert!(skip_filter(&order(&[("resultTime", true)]), &tied, &next).is_none());
    }

    #[test]
    fn test_next_link() {
        let link = next_link(
            "http://x.org/v1.1/Things",
            "$top=2&$skip=4&$filter=name%20eq%20'a'",
            &Continuation::Skip(6),
        );
        assert_eq!(
            link,
            "http://x.org/v1.1/Things?$top=2&$filter=name%20eq%20%27a%27&$skip=6"
        );

        let filter = Expression::compare(
            CompareOp::Gt,
            Expression::path(&["id"]),
            Expression::Constant(json!(4)),
        );
        let link = next_link(
            "http://x.org/v1.1/Things",
            "$top=2&$skipFilter=id%20gt%202",
            &Continuation::SkipFilter(filter),
        );
        assert_eq!(link, "http://x.org/v1.1/Things?$top=2&$skipFilter=id%20gt%204");

        // an offset continues inside the filtered window
        let link = next_link(
            "http://x.org/v1.1/Things",
            "$top=2&$skipFilter=id%20gt%202&$skip=2",
            &Continuation::Skip(4),
        );
        assert_eq!(
            link,
            "http://x.org/v1.1/Things?$top=2&$skipFilter=id%20gt%202&$skip=4"
        );
    }

    #[test]
    fn test_continuation_for_page() {
        let ty = observation_type();
        let last = row(&ty, 3, json!(1), json!(0));
        let next = row(&ty, 4, json!(1), json!(0));

        let mut query = Query::default();
        assert_eq!(
            Continuation::for_page(&query, 10, Some(&last), Some(&next)),
            Continuation::Skip(10)
        );
        query.add_pk_order(&ty);
        assert!(matches!(
            Continuation::for_page(&query, 10, Some(&last), Some(&next)),
            Continuation::SkipFilter(_)
        ));
        assert_eq!(
            Continuation::for_page(&query, 10, Some(&last), None),
            Continuation::Skip(10)
        );
    }

    #[test]
    fn test_self_link() {
        let ty = observation_type();
        let entity = Entity::new(ty.clone()).with_id(PkValue::single("a'b"));
        assert_eq!(
            self_link("http://x.org/", Version::V1_1, &entity).unwrap(),
            "http://x.org/v1.1/Observations('a''b')"
        );
        assert!(self_link("http://x.org", Version::V1_1, &Entity::new(ty)).is_none());
    }
}
