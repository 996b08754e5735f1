//! Query execution over a persistence provider.

use crate::error::{CrudError, CrudResult};
use crate::metadata::RecordMetadata;
use crate::model::record::Record;
use crate::query::builder::{build_plan, resolve_sort, QueryPlan};
use crate::query::criteria::{QueryCriteria, Scope};
use crate::repo::{Cursor, PersistenceProvider};
use log::debug;

/// One page of records plus the totals of the whole result.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPage {
    pub records: Vec<Record>,
    pub total: i64,
    pub pages: i64,
}

/// Runs `criteria` and returns the requested page and the total match count.
///
/// A page size of zero or less yields an empty page; totals are still
/// computed.
pub fn query(
    provider: &dyn PersistenceProvider,
    metadata: &RecordMetadata,
    criteria: &QueryCriteria,
) -> CrudResult<QueryPage> {
    let plan = build_plan(metadata, criteria)?;
    let sort = resolve_sort(metadata, &criteria.sort)?;
    debug!(
        "event=query module=query status=start type={} scope={} predicate={}",
        metadata.type_name(),
        criteria.scope,
        plan
    );

    let total = provider.count(metadata, &plan)?;
    let records = Cursor::new(provider, metadata, plan)
        .sort(sort)
        .page(criteria.offset(), criteria.size)
        .list()?;

    Ok(QueryPage {
        records,
        total,
        pages: count_pages(total, criteria.size),
    })
}

/// Counts every record matching `criteria` under its scope only.
pub fn count(
    provider: &dyn PersistenceProvider,
    metadata: &RecordMetadata,
    criteria: &QueryCriteria,
) -> CrudResult<i64> {
    let plan = build_plan(metadata, criteria)?;
    Ok(provider.count(metadata, &plan)?)
}

/// `ceil(total / size)`; zero when `size <= 0` or nothing matched.
pub fn count_pages(total: i64, size: i64) -> i64 {
    if size <= 0 || total <= 0 {
        return 0;
    }
    (total + size - 1) / size
}

/// Looks up one record by id under `scope`.
pub fn find_by_id(
    provider: &dyn PersistenceProvider,
    metadata: &RecordMetadata,
    id: i64,
    scope: Scope,
) -> CrudResult<Option<Record>> {
    Ok(Cursor::new(provider, metadata, QueryPlan::for_id(id, scope)).first_result()?)
}

/// Like [`find_by_id`] but a miss is `NotFound`.
pub fn get_by_id(
    provider: &dyn PersistenceProvider,
    metadata: &RecordMetadata,
    id: i64,
    scope: Scope,
) -> CrudResult<Record> {
    find_by_id(provider, metadata, id, scope)?.ok_or_else(|| not_found(metadata, id))
}

/// Loads every record whose id is in `ids` under `scope` in one round trip.
pub fn find_by_ids(
    provider: &dyn PersistenceProvider,
    metadata: &RecordMetadata,
    ids: &[i64],
    scope: Scope,
) -> CrudResult<Vec<Record>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    Ok(Cursor::new(provider, metadata, QueryPlan::for_ids(ids, scope)).list()?)
}

pub(crate) fn not_found(metadata: &RecordMetadata, id: i64) -> CrudError {
    CrudError::not_found("Entity {} with id {} is not present in the database")
        .with_arg(metadata.type_name())
        .with_arg(id)
}

#[cfg(test)]
mod tests {
    use super::count_pages;

    #[test]
    fn pages_round_up() {
        assert_eq!(count_pages(25, 10), 3);
        assert_eq!(count_pages(20, 10), 2);
        assert_eq!(count_pages(1, 50), 1);
    }

    #[test]
    fn empty_or_invalid_sizes_have_no_pages() {
        assert_eq!(count_pages(0, 10), 0);
        assert_eq!(count_pages(25, 0), 0);
        assert_eq!(count_pages(25, -5), 0);
    }
}
