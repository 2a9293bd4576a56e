//! Local query descriptors: structured predicates, sort keys, single-id lookup.

use std::cmp::Ordering;

use crate::record::{FieldValue, Record};

/// A filter expression over record fields.
///
/// Fields a record does not expose evaluate to `FieldValue::Null`.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Eq(String, FieldValue),
    Ne(String, FieldValue),
    Lt(String, FieldValue),
    Le(String, FieldValue),
    Gt(String, FieldValue),
    Ge(String, FieldValue),
    IsNull(String),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn eq(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Predicate::Eq(field.into(), value.into())
    }

    pub fn ne(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Predicate::Ne(field.into(), value.into())
    }

    pub fn lt(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Predicate::Lt(field.into(), value.into())
    }

    pub fn le(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Predicate::Le(field.into(), value.into())
    }

    pub fn gt(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Predicate::Gt(field.into(), value.into())
    }

    pub fn ge(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Predicate::Ge(field.into(), value.into())
    }

    pub fn is_null(field: impl Into<String>) -> Self {
        Predicate::IsNull(field.into())
    }

    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::And(mut all) => {
                all.push(other);
                Predicate::And(all)
            }
            first => Predicate::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Predicate) -> Self {
        match self {
            Predicate::Or(mut any) => {
                any.push(other);
                Predicate::Or(any)
            }
            first => Predicate::Or(vec![first, other]),
        }
    }

    pub fn negate(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    /// Evaluate against a record.
    pub fn matches<R: Record>(&self, record: &R) -> bool {
        let value = |field: &str| record.field(field).unwrap_or(FieldValue::Null);
        match self {
            Predicate::Eq(field, expected) => value(field).matches(expected),
            Predicate::Ne(field, expected) => !value(field).matches(expected),
            Predicate::Lt(field, bound) => compare(&value(field), bound) == Some(Ordering::Less),
            Predicate::Le(field, bound) => matches!(
                compare(&value(field), bound),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Predicate::Gt(field, bound) => {
                compare(&value(field), bound) == Some(Ordering::Greater)
            }
            Predicate::Ge(field, bound) => matches!(
                compare(&value(field), bound),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Predicate::IsNull(field) => value(field) == FieldValue::Null,
            Predicate::And(all) => all.iter().all(|p| p.matches(record)),
            Predicate::Or(any) => any.iter().any(|p| p.matches(record)),
            Predicate::Not(inner) => !inner.matches(record),
        }
    }
}

/// Ordering comparisons only hold between values of the same kind; null never orders.
fn compare(actual: &FieldValue, bound: &FieldValue) -> Option<Ordering> {
    let comparable = matches!(
        (actual, bound),
        (FieldValue::Bool(_), FieldValue::Bool(_))
            | (FieldValue::Text(_), FieldValue::Text(_))
            | (
                FieldValue::Int(_) | FieldValue::Float(_),
                FieldValue::Int(_) | FieldValue::Float(_)
            )
    );
    comparable.then(|| actual.total_cmp(bound))
}

/// Sort by one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub ascending: bool,
}

impl SortKey {
    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ascending: true,
        }
    }

    pub fn descending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ascending: false,
        }
    }

    pub(crate) fn compare<R: Record>(&self, a: &R, b: &R) -> Ordering {
        let left = a.field(&self.field).unwrap_or(FieldValue::Null);
        let right = b.field(&self.field).unwrap_or(FieldValue::Null);
        let ordering = left.total_cmp(&right);
        if self.ascending {
            ordering
        } else {
            ordering.reverse()
        }
    }
}

/// The local half of an access request.
///
/// All parts are optional: an empty query matches every record of the type.
#[derive(Debug, Clone)]
pub struct LocalQuery<R> {
    pub predicate: Option<Predicate>,
    pub sort: Option<SortKey>,
    pub id: Option<String>,
    pub record: Option<R>,
}

impl<R> Default for LocalQuery<R> {
    fn default() -> Self {
        Self {
            predicate: None,
            sort: None,
            id: None,
            record: None,
        }
    }
}

impl<R: Record> LocalQuery<R> {
    /// Match every record of the type.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn filter(predicate: Predicate) -> Self {
        Self {
            predicate: Some(predicate),
            ..Self::default()
        }
    }

    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    /// Attach a record to be written by `save`.
    pub fn with_record(record: R) -> Self {
        Self {
            record: Some(record),
            ..Self::default()
        }
    }

    pub fn sorted_by(mut self, sort: SortKey) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn and_where(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(match self.predicate.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    /// Whether a record belongs in this query's result set.
    pub fn matches(&self, record: &R) -> bool {
        if let Some(id) = &self.id {
            if record.id() != id {
                return false;
            }
        }
        self.predicate
            .as_ref()
            .map_or(true, |predicate| predicate.matches(record))
    }

    /// Sort records in place. Without a sort key, the given order is kept.
    pub fn order(&self, records: &mut [R]) {
        if let Some(sort) = &self.sort {
            // stable: ties keep insertion order
            records.sort_by(|a, b| sort.compare(a, b));
        }
    }
}
