//! Query construction.
//!
//! Terms are first resolved into [`Predicate`]s according to the configured
//! [`TermMode`], then rendered into a Firestore structured query. The
//! in-memory store evaluates the same predicates locally.

use ksstore_core::{Op, Result, StoreError, Term};
use serde::Serialize;
use serde_json::Value;

use crate::config::TermMode;
use crate::value::{encode, parse_dotted_path, FieldValue};

/// A validated query predicate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Predicate<'a> {
    /// Dotted field path.
    pub field: &'a str,
    /// Parsed operator.
    pub op: Op,
    /// Value compared against.
    pub value: &'a Value,
}

impl<'a> Predicate<'a> {
    fn from_term(term: &'a Term) -> Result<Self> {
        let op = term.operator()?;
        parse_dotted_path(&term.field)?;
        let value = &term.value;

        let shape_ok = match op {
            Op::Eq | Op::NotEq => true,
            Op::In | Op::NotIn | Op::ArrayContainsAny => value.is_array(),
            Op::Lt | Op::Lte | Op::Gt | Op::Gte | Op::ArrayContains => !value.is_null(),
        };
        if !shape_ok {
            tracing::error!(field = %term.field, op = %op, "value not allowed for operator");
            return Err(StoreError::InvalidData);
        }

        Ok(Self {
            field: &term.field,
            op,
            value,
        })
    }
}

/// Select and validate the terms that constrain a query.
///
/// # Errors
///
/// Returns `StoreError::InvalidData` if there are no terms, or if a selected
/// term has a malformed field path, an unknown operator or a value its
/// operator cannot take.
pub fn predicates(terms: &[Term], mode: TermMode) -> Result<Vec<Predicate<'_>>> {
    let Some(last) = terms.last() else {
        tracing::error!("Query has no terms");
        return Err(StoreError::InvalidData);
    };

    match mode {
        TermMode::LastTermWins => {
            if terms.len() > 1 {
                tracing::warn!(
                    ignored = terms.len() - 1,
                    field = %last.field,
                    "only the last query term is applied"
                );
            }
            Ok(vec![Predicate::from_term(last)?])
        }
        TermMode::AllTerms => terms.iter().map(Predicate::from_term).collect(),
    }
}

/// A Firestore structured query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructuredQuery {
    /// Collections queried.
    pub from: Vec<CollectionSelector>,
    /// Filter applied to the collection.
    #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
}

/// Selects a collection by id.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSelector {
    /// Collection id relative to the database root.
    pub collection_id: String,
}

/// A query filter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Filter {
    /// Compares a field with a value.
    FieldFilter(FieldFilter),
    /// Tests a field for null.
    UnaryFilter(UnaryFilter),
    /// Combines filters.
    CompositeFilter(CompositeFilter),
}

/// Field/value comparison.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldFilter {
    /// Field compared.
    pub field: FieldReference,
    /// Firestore operator name.
    pub op: &'static str,
    /// Operand.
    pub value: FieldValue,
}

/// Null test on a field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnaryFilter {
    /// `IS_NULL` or `IS_NOT_NULL`.
    pub op: &'static str,
    /// Field tested.
    pub field: FieldReference,
}

/// Conjunction of filters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompositeFilter {
    /// Always `AND`.
    pub op: &'static str,
    /// Combined filters.
    pub filters: Vec<Filter>,
}

/// Reference to a document field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldReference {
    /// Quoted field path.
    pub field_path: String,
}

const fn operator_name(op: Op) -> &'static str {
    match op {
        Op::Eq => "EQUAL",
        Op::NotEq => "NOT_EQUAL",
        Op::Lt => "LESS_THAN",
        Op::Lte => "LESS_THAN_OR_EQUAL",
        Op::Gt => "GREATER_THAN",
        Op::Gte => "GREATER_THAN_OR_EQUAL",
        Op::ArrayContains => "ARRAY_CONTAINS",
        Op::ArrayContainsAny => "ARRAY_CONTAINS_ANY",
        Op::In => "IN",
        Op::NotIn => "NOT_IN",
    }
}

fn filter(predicate: &Predicate<'_>) -> Result<Filter> {
    let field = FieldReference {
        field_path: parse_dotted_path(predicate.field)?,
    };

    let filter = match (predicate.op, predicate.value) {
        (Op::Eq, Value::Null) => Filter::UnaryFilter(UnaryFilter {
            op: "IS_NULL",
            field,
        }),
        (Op::NotEq, Value::Null) => Filter::UnaryFilter(UnaryFilter {
            op: "IS_NOT_NULL",
            field,
        }),
        (op, value) => Filter::FieldFilter(FieldFilter {
            field,
            op: operator_name(op),
            value: encode(value),
        }),
    };
    Ok(filter)
}

/// Render predicates into a structured query over `collection`.
///
/// For a subcollection path only the last segment is named; the parent
/// document is chosen by the endpoint the query is posted to.
///
/// # Errors
///
/// Returns `StoreError::InvalidData` if a field path is malformed.
pub fn build(collection: &str, predicates: &[Predicate<'_>]) -> Result<StructuredQuery> {
    let mut filters = predicates.iter().map(filter).collect::<Result<Vec<_>>>()?;

    let filter = if filters.len() > 1 {
        Some(Filter::CompositeFilter(CompositeFilter {
            op: "AND",
            filters,
        }))
    } else {
        filters.pop()
    };

    Ok(StructuredQuery {
        from: vec![CollectionSelector {
            collection_id: collection
                .rsplit('/')
                .next()
                .unwrap_or(collection)
                .to_string(),
        }],
        filter,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn two_terms() -> Vec<Term> {
        vec![Term::new("a", "==", 1), Term::new("b", "==", 2)]
    }

    #[test]
    fn no_terms_is_invalid() {
        assert_eq!(
            predicates(&[], TermMode::LastTermWins),
            Err(StoreError::InvalidData)
        );
        assert_eq!(
            predicates(&[], TermMode::AllTerms),
            Err(StoreError::InvalidData)
        );
    }

    // Existing callers see only the last term applied. This pins that
    // behavior until the multi-term semantics are confirmed.
    #[test]
    fn last_term_wins_drops_earlier_terms() {
        let terms = two_terms();
        let preds = predicates(&terms, TermMode::LastTermWins).unwrap();
        assert_eq!(preds.len(), 1);
        assert_eq!(preds[0].field, "b");

        let query = serde_json::to_value(build("items", &preds).unwrap()).unwrap();
        assert_eq!(
            query,
            json!({
                "from": [{"collectionId": "items"}],
                "where": {"fieldFilter": {
                    "field": {"fieldPath": "b"},
                    "op": "EQUAL",
                    "value": {"integerValue": "2"}
                }}
            })
        );
    }

    #[test]
    fn all_terms_builds_conjunction() {
        let terms = two_terms();
        let preds = predicates(&terms, TermMode::AllTerms).unwrap();
        let query = serde_json::to_value(build("items", &preds).unwrap()).unwrap();
        assert_eq!(
            query["where"],
            json!({"compositeFilter": {
                "op": "AND",
                "filters": [
                    {"fieldFilter": {
                        "field": {"fieldPath": "a"},
                        "op": "EQUAL",
                        "value": {"integerValue": "1"}
                    }},
                    {"fieldFilter": {
                        "field": {"fieldPath": "b"},
                        "op": "EQUAL",
                        "value": {"integerValue": "2"}
                    }}
                ]
            }})
        );
    }

    #[test]
    fn earlier_bad_terms_ignored_under_last_term_wins() {
        let terms = vec![Term::new("a", "~~", 1), Term::new("b", ">", 2)];
        assert!(predicates(&terms, TermMode::LastTermWins).is_ok());
        assert_eq!(
            predicates(&terms, TermMode::AllTerms),
            Err(StoreError::InvalidData)
        );
    }

    #[test]
    fn null_comparisons_become_unary_filters() {
        let terms = vec![Term::new("deleted_at", "==", Value::Null)];
        let preds = predicates(&terms, TermMode::LastTermWins).unwrap();
        let query = serde_json::to_value(build("items", &preds).unwrap()).unwrap();
        assert_eq!(
            query["where"],
            json!({"unaryFilter": {
                "op": "IS_NULL",
                "field": {"fieldPath": "deleted_at"}
            }})
        );

        let terms = vec![Term::new("deleted_at", "<", Value::Null)];
        assert_eq!(
            predicates(&terms, TermMode::LastTermWins),
            Err(StoreError::InvalidData)
        );
    }

    #[test]
    fn membership_operators_need_arrays() {
        let terms = vec![Term::new("status", "in", "active")];
        assert_eq!(
            predicates(&terms, TermMode::LastTermWins),
            Err(StoreError::InvalidData)
        );

        let terms = vec![Term::new("status", "not-in", json!(["banned"]))];
        let preds = predicates(&terms, TermMode::LastTermWins).unwrap();
        let query = serde_json::to_value(build("users", &preds).unwrap()).unwrap();
        assert_eq!(query["where"]["fieldFilter"]["op"], "NOT_IN");
    }

    #[test]
    fn malformed_field_paths_rejected_in_every_mode() {
        for field in ["a..b", "a[0]", "", "a.", "x/y"] {
            let terms = vec![Term::new(field, "==", 1)];
            assert_eq!(
                predicates(&terms, TermMode::LastTermWins),
                Err(StoreError::InvalidData),
                "{field:?}"
            );
            assert_eq!(
                predicates(&terms, TermMode::AllTerms),
                Err(StoreError::InvalidData),
                "{field:?}"
            );
        }
    }

    #[test]
    fn subcollection_names_last_segment() {
        let terms = vec![Term::new("total", ">", 10)];
        let preds = predicates(&terms, TermMode::LastTermWins).unwrap();
        let query = serde_json::to_value(build("users/u1/orders", &preds).unwrap()).unwrap();
        assert_eq!(query["from"], json!([{"collectionId": "orders"}]));
    }

    #[test]
    fn nested_paths_are_quoted() {
        let terms = vec![Term::new("profile.first name", "==", "Ada")];
        let preds = predicates(&terms, TermMode::LastTermWins).unwrap();
        let query = serde_json::to_value(build("users", &preds).unwrap()).unwrap();
        assert_eq!(
            query["where"]["fieldFilter"]["field"]["fieldPath"],
            "profile.`first name`"
        );
    }
}
