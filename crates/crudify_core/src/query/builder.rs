//! Predicate construction.
//!
//! # Responsibility
//! - Turn [`QueryCriteria`] into a storage-neutral [`QueryPlan`] of
//!   predicates plus named parameters.
//! - Validate filter fields and coerce literals before any storage access.
//!
//! # Invariants
//! - Every predicate references columns resolved from metadata, never raw
//!   caller text.
//! - Every literal is bound as a named parameter.
//! - An empty search binds `""`, which makes the search predicate
//!   vacuously true.

use crate::error::{CrudError, CrudResult};
use crate::metadata::{coerce_literal, RecordMetadata};
use crate::model::record::{DELETED_FIELD, ID_FIELD};
use crate::model::value::Value;
use crate::query::criteria::{Operator, QueryCriteria, Scope, SortSpec};
use std::fmt::{Display, Formatter};

/// Name of the search parameter.
pub const SEARCH_PARAM: &str = "search";

/// One conjunct of a plan.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `deleted = <flag>`.
    Deleted(bool),
    /// `(:param = '' OR col1 ILIKE :param OR ...)`.
    Search { columns: Vec<String>, param: String },
    /// `column <op> :param`.
    Compare {
        column: String,
        operator: Operator,
        param: String,
    },
    /// `id IN (:p0, :p1, ...)`; always false when empty.
    IdIn { params: Vec<String> },
}

/// Conjunction of predicates with their bound parameters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryPlan {
    predicates: Vec<Predicate>,
    params: Vec<(String, Value)>,
}

impl QueryPlan {
    /// Plan selecting every row under `scope`.
    pub fn scoped(scope: Scope) -> Self {
        let mut plan = Self::default();
        if let Some(flag) = scope.deleted_flag() {
            plan.predicates.push(Predicate::Deleted(flag));
        }
        plan
    }

    /// Plan selecting one identifier under `scope`.
    pub fn for_id(id: i64, scope: Scope) -> Self {
        let mut plan = Self::scoped(scope);
        plan.push_compare(ID_FIELD, Operator::Eq, ID_FIELD, Value::Int(id));
        plan
    }

    /// Plan selecting any of `ids` under `scope`.
    pub fn for_ids(ids: &[i64], scope: Scope) -> Self {
        let mut plan = Self::scoped(scope);
        let mut params = Vec::with_capacity(ids.len());
        for (index, id) in ids.iter().enumerate() {
            let name = format!("id_{index}");
            plan.params.push((name.clone(), Value::Int(*id)));
            params.push(name);
        }
        plan.predicates.push(Predicate::IdIn { params });
        plan
    }

    /// Plan selecting rows whose `column` equals `value` under `scope`.
    pub fn for_column(column: &str, value: Value, scope: Scope) -> Self {
        let mut plan = Self::scoped(scope);
        plan.push_compare(column, Operator::Eq, column, value);
        plan
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn params(&self) -> &[(String, Value)] {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params
            .iter()
            .find(|(param, _)| param == name)
            .map(|(_, value)| value)
    }

    fn push_compare(&mut self, column: &str, operator: Operator, param: &str, value: Value) {
        self.predicates.push(Predicate::Compare {
            column: column.to_string(),
            operator,
            param: param.to_string(),
        });
        self.params.push((param.to_string(), value));
    }
}

impl Display for QueryPlan {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.predicates.is_empty() {
            return f.write_str("true");
        }
        for (index, predicate) in self.predicates.iter().enumerate() {
            if index > 0 {
                f.write_str(" AND ")?;
            }
            match predicate {
                Predicate::Deleted(flag) => write!(f, "{DELETED_FIELD} = {flag}")?,
                Predicate::Search { columns, param } => {
                    write!(f, "(:{param} = ''")?;
                    for column in columns {
                        write!(f, " OR {column} ILIKE :{param}")?;
                    }
                    f.write_str(")")?;
                }
                Predicate::Compare {
                    column,
                    operator,
                    param,
                } => write!(f, "{column} {operator} :{param}")?,
                Predicate::IdIn { params } => {
                    let list = params
                        .iter()
                        .map(|param| format!(":{param}"))
                        .collect::<Vec<_>>()
                        .join(", ");
                    write!(f, "{ID_FIELD} IN ({list})")?;
                }
            }
        }
        Ok(())
    }
}

/// Builds the scoped predicate of `criteria` (no sort, no pagination).
///
/// # Errors
/// - `BadRequest` for an unknown filter field or a literal that does not
///   coerce to the field's type.
pub fn build_plan(metadata: &RecordMetadata, criteria: &QueryCriteria) -> CrudResult<QueryPlan> {
    let mut plan = QueryPlan::scoped(criteria.scope);

    let columns = metadata
        .searchable_fields()
        .map(|field| field.column_name().to_string())
        .collect();
    let term = if criteria.search.is_empty() {
        String::new()
    } else {
        format!("%{}%", criteria.search)
    };
    plan.predicates.push(Predicate::Search {
        columns,
        param: SEARCH_PARAM.to_string(),
    });
    plan.params.push((SEARCH_PARAM.to_string(), Value::Text(term)));

    for (name, expr) in &criteria.filters {
        let field = metadata.field(name).ok_or_else(|| {
            CrudError::bad_request("Entity {} has no field {}")
                .with_arg(metadata.type_name())
                .with_arg(name)
        })?;
        let value = coerce_literal(field, &expr.literal)?;
        let param = if field.column_name() == SEARCH_PARAM {
            format!("{SEARCH_PARAM}_filter")
        } else {
            field.column_name().to_string()
        };
        plan.push_compare(field.column_name(), expr.operator, &param, value);
    }

    Ok(plan)
}

/// One resolved `ORDER BY` term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortColumn {
    pub column: String,
    pub descending: bool,
}

/// Resolves sort fields to columns.
///
/// An empty field list falls back to the identifier.
pub fn resolve_sort(metadata: &RecordMetadata, sort: &SortSpec) -> CrudResult<Vec<SortColumn>> {
    if sort.fields.is_empty() {
        return Ok(vec![SortColumn {
            column: ID_FIELD.to_string(),
            descending: sort.descending,
        }]);
    }

    sort.fields
        .iter()
        .map(|name| {
            let field = metadata
                .field(name)
                .filter(|field| field.field_type().has_column())
                .ok_or_else(|| {
                    CrudError::bad_request("Entity {} cannot be sorted by {}")
                        .with_arg(metadata.type_name())
                        .with_arg(name)
                })?;
            Ok(SortColumn {
                column: field.column_name().to_string(),
                descending: sort.descending,
            })
        })
        .collect()
}
