//! Boolean filter expressions over record metadata.
//!
//! Backends translate a [`Filter`] into their native predicate language and
//! evaluate it server-side. [`Filter::matches`] is the reference semantics
//! used by the in-process store and by tests.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Filter operator for metadata queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOperator {
    /// Equal to.
    Eq(Value),
    /// Not equal to.
    Ne(Value),
    /// Greater than.
    Gt(Value),
    /// Greater than or equal to.
    Gte(Value),
    /// Less than.
    Lt(Value),
    /// Less than or equal to.
    Lte(Value),
    /// In list.
    In(Vec<Value>),
    /// Not in list.
    Nin(Vec<Value>),
}

/// A single filter condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterCondition {
    /// Field name to filter on.
    pub field: String,
    /// Operator to apply.
    pub operator: FilterOperator,
}

impl FilterCondition {
    pub fn new(field: impl Into<String>, operator: FilterOperator) -> Self {
        Self {
            field: field.into(),
            operator,
        }
    }

    /// Evaluate against a payload. A missing field only satisfies `Ne` and `Nin`.
    pub fn matches(&self, payload: &HashMap<String, Value>) -> bool {
        let value = payload.get(&self.field);
        match &self.operator {
            FilterOperator::Eq(v) => value.is_some_and(|fv| values_equal(fv, v)),
            FilterOperator::Ne(v) => !value.is_some_and(|fv| values_equal(fv, v)),
            FilterOperator::Gt(v) => compare(value, v).is_some_and(|o| o == Ordering::Greater),
            FilterOperator::Gte(v) => compare(value, v).is_some_and(|o| o != Ordering::Less),
            FilterOperator::Lt(v) => compare(value, v).is_some_and(|o| o == Ordering::Less),
            FilterOperator::Lte(v) => compare(value, v).is_some_and(|o| o != Ordering::Greater),
            FilterOperator::In(values) => {
                value.is_some_and(|fv| values.iter().any(|v| values_equal(fv, v)))
            }
            FilterOperator::Nin(values) => {
                !value.is_some_and(|fv| values.iter().any(|v| values_equal(fv, v)))
            }
        }
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Numbers compare numerically and strings lexicographically; anything else is incomparable.
fn compare(field_value: Option<&Value>, compare_to: &Value) -> Option<Ordering> {
    match (field_value?, compare_to) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Composite filter with AND/OR/NOT logic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    /// Single condition.
    Condition(FilterCondition),
    /// AND of multiple filters.
    And(Vec<Filter>),
    /// OR of multiple filters.
    Or(Vec<Filter>),
    /// NOT of a filter.
    Not(Box<Filter>),
}

impl Filter {
    /// Create an equality filter.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Condition(FilterCondition::new(field, FilterOperator::Eq(value.into())))
    }

    /// Create an inequality filter.
    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Condition(FilterCondition::new(field, FilterOperator::Ne(value.into())))
    }

    /// Create a greater than filter.
    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Condition(FilterCondition::new(field, FilterOperator::Gt(value.into())))
    }

    /// Create a greater than or equal filter.
    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Condition(FilterCondition::new(field, FilterOperator::Gte(value.into())))
    }

    /// Create a less than filter.
    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Condition(FilterCondition::new(field, FilterOperator::Lt(value.into())))
    }

    /// Create a less than or equal filter.
    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Condition(FilterCondition::new(field, FilterOperator::Lte(value.into())))
    }

    /// Create an in-list filter.
    pub fn in_list(field: impl Into<String>, values: Vec<Value>) -> Self {
        Filter::Condition(FilterCondition::new(field, FilterOperator::In(values)))
    }

    /// Create a not-in-list filter.
    pub fn not_in(field: impl Into<String>, values: Vec<Value>) -> Self {
        Filter::Condition(FilterCondition::new(field, FilterOperator::Nin(values)))
    }

    /// Create an AND filter.
    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::And(filters)
    }

    /// Create an OR filter.
    pub fn or(filters: Vec<Filter>) -> Self {
        Filter::Or(filters)
    }

    /// Create a NOT filter.
    pub fn not(filter: Filter) -> Self {
        Filter::Not(Box::new(filter))
    }

    /// Evaluate the filter against a record payload.
    ///
    /// An empty `And` is true and an empty `Or` is false.
    pub fn matches(&self, payload: &HashMap<String, Value>) -> bool {
        match self {
            Filter::Condition(cond) => cond.matches(payload),
            Filter::And(filters) => filters.iter().all(|f| f.matches(payload)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(payload)),
            Filter::Not(inner) => !inner.matches(payload),
        }
    }

    /// Render in the `$and` / `$or` / `$lte` JSON dialect, for logs and debug output.
    pub fn to_json(&self) -> Value {
        match self {
            Filter::Condition(cond) => {
                let (op, operand) = match &cond.operator {
                    FilterOperator::Eq(v) => ("$eq", v.clone()),
                    FilterOperator::Ne(v) => ("$ne", v.clone()),
                    FilterOperator::Gt(v) => ("$gt", v.clone()),
                    FilterOperator::Gte(v) => ("$gte", v.clone()),
                    FilterOperator::Lt(v) => ("$lt", v.clone()),
                    FilterOperator::Lte(v) => ("$lte", v.clone()),
                    FilterOperator::In(vs) => ("$in", Value::Array(vs.clone())),
                    FilterOperator::Nin(vs) => ("$nin", Value::Array(vs.clone())),
                };
                let mut inner = Map::new();
                inner.insert(op.to_string(), operand);
                let mut outer = Map::new();
                outer.insert(cond.field.clone(), Value::Object(inner));
                Value::Object(outer)
            }
            Filter::And(filters) => json!({ "$and": filters.iter().map(Filter::to_json).collect::<Vec<_>>() }),
            Filter::Or(filters) => json!({ "$or": filters.iter().map(Filter::to_json).collect::<Vec<_>>() }),
            Filter::Not(inner) => json!({ "$not": inner.to_json() }),
        }
    }
}

/// Trait for translating filters to backend-specific formats.
pub trait FilterTranslator {
    type Output;
    type Error;

    /// Translate a filter to the backend-specific format.
    fn translate(&self, filter: &Filter) -> Result<Self::Output, Self::Error>;
}
