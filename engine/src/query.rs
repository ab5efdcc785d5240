//! Collection queries and their document ordering.

use crate::document::{DocComparator, Document};
use crate::{DocumentKey, ResourcePath};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::Arc;

/// Sort direction for an order-by clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

/// Orders documents by a top-level field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// A query over the direct children of a collection path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub path: ResourcePath,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<OrderBy>,
}

impl Query {
    /// Query every document directly under `path`, in key order.
    pub fn at_path(path: ResourcePath) -> Self {
        Self {
            path,
            order_by: None,
        }
    }

    /// Order results by `field`. Ties fall back to key order.
    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    /// Whether `doc` is a direct member of the queried collection.
    pub fn matches(&self, doc: &Document) -> bool {
        self.matches_key(&doc.key)
    }

    /// Whether a document stored at `key` would be a direct member of the
    /// queried collection.
    pub fn matches_key(&self, key: &DocumentKey) -> bool {
        let doc_path = key.path();
        doc_path.len() == self.path.len() + 1 && self.path.is_prefix_of(doc_path)
    }

    /// Compare two documents the way results are ordered.
    pub fn compare_documents(&self, a: &Document, b: &Document) -> Ordering {
        compare_by(self.order_by.as_ref(), a, b)
    }

    /// Shareable form of [`Query::compare_documents`].
    pub fn comparator(&self) -> DocComparator {
        let order_by = self.order_by.clone();
        Arc::new(move |a: &Document, b: &Document| compare_by(order_by.as_ref(), a, b))
    }
}

fn compare_by(order_by: Option<&OrderBy>, a: &Document, b: &Document) -> Ordering {
    let by_field = order_by.map_or(Ordering::Equal, |order| {
        let null = Value::Null;
        let ord = compare_values(
            a.field(&order.field).unwrap_or(&null),
            b.field(&order.field).unwrap_or(&null),
        );
        match order.direction {
            Direction::Ascending => ord,
            Direction::Descending => ord.reverse(),
        }
    });
    by_field.then_with(|| a.key.cmp(&b.key))
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values: values of different types order by type,
/// values of the same type by content.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x
                .as_f64()
                .unwrap_or(f64::NAN)
                .total_cmp(&y.as_f64().unwrap_or(f64::NAN)),
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x
            .iter()
            .zip(y)
            .map(|(x, y)| compare_values(x, y))
            .find(|ord| ord.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        (Value::Object(x), Value::Object(y)) => x
            .iter()
            .zip(y)
            .map(|((kx, vx), (ky, vy))| kx.cmp(ky).then_with(|| compare_values(vx, vy)))
            .find(|ord| ord.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(path: &str, data: Value) -> Document {
        Document::new(DocumentKey::from_string(path).unwrap(), data)
    }

    #[test]
    fn matches_direct_children_only() {
        let query = Query::at_path(ResourcePath::from_string("rooms").unwrap());
        assert!(query.matches(&doc("rooms/a", json!({}))));
        assert!(!query.matches(&doc("rooms/a/messages/1", json!({}))));
        assert!(!query.matches(&doc("halls/a", json!({}))));
    }

    #[test]
    fn default_order_is_by_key() {
        let query = Query::at_path(ResourcePath::from_string("rooms").unwrap());
        let a = doc("rooms/a", json!({"n": 2}));
        let b = doc("rooms/b", json!({"n": 1}));
        assert_eq!(query.compare_documents(&a, &b), Ordering::Less);
    }

    #[test]
    fn order_by_field_and_direction() {
        let query =
            Query::at_path(ResourcePath::from_string("rooms").unwrap()).order_by("n", Direction::Descending);
        let a = doc("rooms/a", json!({"n": 2}));
        let b = doc("rooms/b", json!({"n": 10}));
        let c = doc("rooms/c", json!({"n": 10}));
        let cmp = query.comparator();
        assert_eq!(cmp(&a, &b), Ordering::Greater);
        assert_eq!(cmp(&b, &c), Ordering::Less);
    }

    #[test]
    fn value_ordering_ranks_types() {
        assert_eq!(compare_values(&json!(null), &json!(false)), Ordering::Less);
        assert_eq!(compare_values(&json!(true), &json!(0)), Ordering::Less);
        assert_eq!(compare_values(&json!(1.5), &json!(2)), Ordering::Less);
        assert_eq!(compare_values(&json!(3), &json!("a")), Ordering::Less);
        assert_eq!(compare_values(&json!([1, 2]), &json!([1, 2, 0])), Ordering::Less);
        assert_eq!(compare_values(&json!({"a": 1}), &json!({"a": 2})), Ordering::Less);
    }
}
