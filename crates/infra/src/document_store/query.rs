//! Collection queries over JSON field paths.
//!
//! Paths are dotted (`target.instance_id`). A missing path never matches.

use core::cmp::Ordering;
use core::ops::Bound;

use serde_json::Value as JsonValue;

use super::document::{Collection, StoredDocument};

/// One predicate on a document field.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq { path: String, value: JsonValue },
    /// The field equals one of `values`.
    In { path: String, values: Vec<JsonValue> },
    /// The field is an array holding `value`.
    ArrayContains { path: String, value: JsonValue },
    /// The field is an array holding at least one of `values`.
    ArrayContainsAny { path: String, values: Vec<JsonValue> },
    /// Numbers compare numerically, strings lexicographically; mixed types never match.
    Range {
        path: String,
        lower: Bound<JsonValue>,
        upper: Bound<JsonValue>,
    },
}

impl Filter {
    pub fn eq(path: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Filter::Eq {
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn is_in<V: Into<JsonValue>>(path: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Filter::In {
            path: path.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn array_contains(path: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Filter::ArrayContains {
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn array_contains_any<V: Into<JsonValue>>(
        path: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Filter::ArrayContainsAny {
            path: path.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn range(path: impl Into<String>, lower: Bound<JsonValue>, upper: Bound<JsonValue>) -> Self {
        Filter::Range {
            path: path.into(),
            lower,
            upper,
        }
    }

    pub fn matches(&self, body: &JsonValue) -> bool {
        match self {
            Filter::Eq { path, value } => field(body, path) == Some(value),
            Filter::In { path, values } => field(body, path).is_some_and(|v| values.contains(v)),
            Filter::ArrayContains { path, value } => array(body, path).is_some_and(|a| a.contains(value)),
            Filter::ArrayContainsAny { path, values } => {
                array(body, path).is_some_and(|a| a.iter().any(|v| values.contains(v)))
            }
            Filter::Range { path, lower, upper } => field(body, path).is_some_and(|v| {
                let above = match lower {
                    Bound::Unbounded => true,
                    Bound::Included(l) => compare(v, l).is_some_and(Ordering::is_ge),
                    Bound::Excluded(l) => compare(v, l).is_some_and(Ordering::is_gt),
                };
                let below = match upper {
                    Bound::Unbounded => true,
                    Bound::Included(u) => compare(v, u).is_some_and(Ordering::is_le),
                    Bound::Excluded(u) => compare(v, u).is_some_and(Ordering::is_lt),
                };
                above && below
            }),
        }
    }
}

fn field<'a>(body: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    path.split('.').try_fold(body, |node, segment| node.get(segment))
}

fn array<'a>(body: &'a JsonValue, path: &str) -> Option<&'a Vec<JsonValue>> {
    field(body, path).and_then(JsonValue::as_array)
}

fn compare(a: &JsonValue, b: &JsonValue) -> Option<Ordering> {
    match (a, b) {
        (JsonValue::Number(x), JsonValue::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (JsonValue::String(x), JsonValue::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Conjunction of filters over one collection, ordered by creation sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: Collection,
    pub filters: Vec<Filter>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new(collection: Collection) -> Self {
        Self {
            collection,
            filters: Vec::new(),
            limit: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, document: &StoredDocument) -> bool {
        document.collection == self.collection && self.filters.iter().all(|f| f.matches(&document.body))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn body() -> JsonValue {
        json!({
            "order_id": "o-1",
            "status": "aguardando",
            "quantity_to_produce": 4,
            "instance_ids": ["a-1", "a-2"],
            "target": { "instance_id": "kit-1" }
        })
    }

    #[test]
    fn equality_follows_dotted_paths() {
        assert!(Filter::eq("target.instance_id", "kit-1").matches(&body()));
        assert!(!Filter::eq("target.instance_id", "kit-2").matches(&body()));
        assert!(!Filter::eq("target.missing", "kit-1").matches(&body()));
    }

    #[test]
    fn membership_and_array_predicates() {
        assert!(Filter::is_in("status", ["em_producao", "aguardando"]).matches(&body()));
        assert!(!Filter::is_in("status", ["produzido"]).matches(&body()));
        assert!(Filter::array_contains("instance_ids", "a-2").matches(&body()));
        assert!(!Filter::array_contains("status", "aguardando").matches(&body()));
        assert!(Filter::array_contains_any("instance_ids", ["z", "a-1"]).matches(&body()));
        assert!(!Filter::array_contains_any("instance_ids", ["z"]).matches(&body()));
    }

    #[test]
    fn ranges_compare_like_types_only() {
        let within = Filter::range("quantity_to_produce", Bound::Included(json!(4)), Bound::Excluded(json!(5)));
        assert!(within.matches(&body()));

        let above = Filter::range("quantity_to_produce", Bound::Excluded(json!(4)), Bound::Unbounded);
        assert!(!above.matches(&body()));

        let strings = Filter::range("order_id", Bound::Included(json!("o-0")), Bound::Included(json!("o-9")));
        assert!(strings.matches(&body()));

        let mixed = Filter::range("order_id", Bound::Included(json!(0)), Bound::Unbounded);
        assert!(!mixed.matches(&body()));
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                ..ProptestConfig::default()
            })]

            /// Property: an inclusive numeric range matches exactly the values between its bounds.
            #[test]
            fn inclusive_range_agrees_with_integer_order(x in -1000i64..1000, a in -1000i64..1000, b in -1000i64..1000) {
                let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
                let filter = Filter::range("n", Bound::Included(json!(lo)), Bound::Included(json!(hi)));
                prop_assert_eq!(filter.matches(&json!({ "n": x })), lo <= x && x <= hi);
            }

            /// Property: membership is equality against any listed value.
            #[test]
            fn membership_is_any_equality(x in 0u8..8, values in prop::collection::vec(0u8..8, 0..6)) {
                let body = json!({ "n": x });
                let any_eq = values.iter().any(|v| Filter::eq("n", *v).matches(&body));
                prop_assert_eq!(Filter::is_in("n", values.clone()).matches(&body), any_eq);
            }
        }
    }
}
