use crudify_core::db::open_db_in_memory;
use crudify_core::query::{self, count_pages, find_by_id, get_by_id};
use crudify_core::repo::SqliteProvider;
use crudify_core::{
    EntityRegistry, ErrorKind, FieldDescriptor, FilterExpr, PersistenceProvider, QueryCriteria,
    Record, RecordMetadata, Scope, SortSpec,
};
use std::sync::Arc;

fn setup() -> (SqliteProvider, Arc<RecordMetadata>) {
    let registry = Arc::new(
        EntityRegistry::new()
            .with(
                RecordMetadata::builder("person")
                    .field(FieldDescriptor::text("name"))
                    .field(FieldDescriptor::text("city"))
                    .field(FieldDescriptor::integer("age"))
                    .build()
                    .unwrap(),
            )
            .unwrap(),
    );
    let conn = open_db_in_memory(&registry).unwrap();
    let meta = registry.describe("person").unwrap();
    (SqliteProvider::new(conn, registry), meta)
}

fn insert(provider: &mut SqliteProvider, meta: &RecordMetadata, name: &str, age: i64, deleted: bool) -> i64 {
    let mut record = Record::new("person")
        .with("name", name)
        .with("city", "Lisbon")
        .with("age", age);
    record.set_deleted(deleted);
    provider.persist(meta, &mut record).unwrap();
    record.id().unwrap()
}

fn names(records: &[Record]) -> Vec<String> {
    records
        .iter()
        .map(|record| record.get("name").as_str().unwrap_or_default().to_string())
        .collect()
}

#[test]
fn scopes_are_disjoint_and_all_is_their_union() {
    let (mut provider, meta) = setup();
    insert(&mut provider, &meta, "Ada", 36, false);
    insert(&mut provider, &meta, "Bob", 41, false);
    insert(&mut provider, &meta, "Cy", 29, true);

    let count = |scope| query::count(&provider, &meta, &QueryCriteria::new().scope(scope)).unwrap();
    assert_eq!(count(Scope::Active), 2);
    assert_eq!(count(Scope::Archived), 1);
    assert_eq!(count(Scope::All), 3);

    let archived = query::query(&provider, &meta, &QueryCriteria::new().scope(Scope::Archived)).unwrap();
    assert!(archived.records.iter().all(Record::is_deleted));
    let active = query::query(&provider, &meta, &QueryCriteria::new()).unwrap();
    assert!(active.records.iter().all(Record::is_active));
}

#[test]
fn search_is_case_insensitive_substring_over_text_fields() {
    let (mut provider, meta) = setup();
    insert(&mut provider, &meta, "John Doe", 30, false);
    insert(&mut provider, &meta, "Jane DOE", 31, false);
    insert(&mut provider, &meta, "Max Mustermann", 32, false);

    let page = query::query(&provider, &meta, &QueryCriteria::new().search("doe")).unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(names(&page.records), vec!["Jane DOE", "John Doe"]);

    let everyone = query::query(&provider, &meta, &QueryCriteria::new().search("")).unwrap();
    assert_eq!(everyone.total, 3);
}

#[test]
fn filters_combine_with_search_and_scope() {
    let (mut provider, meta) = setup();
    insert(&mut provider, &meta, "John Doe", 17, false);
    insert(&mut provider, &meta, "Jane Doe", 42, false);
    insert(&mut provider, &meta, "Jim Doe", 50, true);

    let criteria = QueryCriteria::new()
        .search("doe")
        .filter_raw("age", "> 18")
        .unwrap()
        .page(0, 20);
    let page = query::query(&provider, &meta, &criteria).unwrap();
    assert_eq!(names(&page.records), vec!["Jane Doe"]);

    let like = QueryCriteria::new()
        .filter("name", FilterExpr::parse("like J%n%").unwrap())
        .scope(Scope::All);
    let page = query::query(&provider, &meta, &like).unwrap();
    assert_eq!(page.total, 2);
}

#[test]
fn pages_are_ceiling_of_total_over_size() {
    let (mut provider, meta) = setup();
    for index in 0..25 {
        insert(&mut provider, &meta, &format!("p{index:02}"), index, false);
    }

    let criteria = QueryCriteria::new()
        .page(2, 10)
        .sort(SortSpec::new(["name"], false));
    let page = query::query(&provider, &meta, &criteria).unwrap();
    assert_eq!(page.total, 25);
    assert_eq!(page.pages, 3);
    assert_eq!(names(&page.records), vec!["p20", "p21", "p22", "p23", "p24"]);
    assert_eq!(count_pages(25, 10), 3);
}

#[test]
fn default_sort_is_id_descending() {
    let (mut provider, meta) = setup();
    let first = insert(&mut provider, &meta, "first", 1, false);
    let second = insert(&mut provider, &meta, "second", 2, false);

    let page = query::query(&provider, &meta, &QueryCriteria::new()).unwrap();
    let ids: Vec<i64> = page.records.iter().filter_map(Record::id).collect();
    assert_eq!(ids, vec![second, first]);
}

#[test]
fn id_lookup_respects_scope() {
    let (mut provider, meta) = setup();
    let archived = insert(&mut provider, &meta, "old", 70, true);

    assert!(find_by_id(&provider, &meta, archived, Scope::Active).unwrap().is_none());
    assert!(find_by_id(&provider, &meta, archived, Scope::Archived).unwrap().is_some());
    assert!(find_by_id(&provider, &meta, archived, Scope::All).unwrap().is_some());

    let err = get_by_id(&provider, &meta, archived, Scope::Active).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(
        err.message(),
        format!("Entity person with id {archived} is not present in the database")
    );
}

#[test]
fn malformed_criteria_fail_before_storage_access() {
    let (provider, meta) = setup();

    let unknown_field = QueryCriteria::new().filter("shoe_size", FilterExpr::eq("42"));
    let err = query::query(&provider, &meta, &unknown_field).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadRequest);

    let not_a_number = QueryCriteria::new().filter("age", FilterExpr::eq("old"));
    let err = query::count(&provider, &meta, &not_a_number).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadRequest);

    let bad_sort = QueryCriteria::new().sort(SortSpec::new(["shoe_size"], true));
    let err = query::query(&provider, &meta, &bad_sort).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadRequest);

    assert!(QueryCriteria::new().filter_raw("age", "~ 3").is_err());
}
