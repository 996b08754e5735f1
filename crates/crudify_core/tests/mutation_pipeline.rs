use crudify_core::metadata::InputTransform;
use crudify_core::query::build_plan;
use crudify_core::{
    CrudError, EntityManager, EntityRegistry, ErrorKind, ExecutionContext, FieldDescriptor,
    LifecycleHook, Method, Phase, Projection, ProviderFactory, QueryCriteria, QueryPlan,
    RecordMetadata, Scope, SqliteProviderFactory, TransactionState,
};
use serde_json::{json, Map, Value as JsonValue};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

type Journal = Arc<Mutex<Vec<String>>>;

fn person(hooks: Vec<LifecycleHook>) -> RecordMetadata {
    let mut builder = RecordMetadata::builder("person")
        .field(FieldDescriptor::text("name").transform(InputTransform::Trim))
        .field(FieldDescriptor::integer("age"));
    for hook in hooks {
        builder = builder.hook(hook);
    }
    builder.build().unwrap()
}

fn factory(metadata: RecordMetadata) -> SqliteProviderFactory {
    let registry = EntityRegistry::new().with(metadata).unwrap();
    SqliteProviderFactory::in_memory(Arc::new(registry)).unwrap()
}

fn context(factory: &SqliteProviderFactory, method: Method) -> ExecutionContext {
    ExecutionContext::new(
        Uuid::new_v4(),
        method,
        Projection::default(),
        factory.open_provider().unwrap(),
    )
}

fn input(value: JsonValue) -> Map<String, JsonValue> {
    value.as_object().cloned().unwrap()
}

fn journaling(journal: &Journal, name: &'static str, phase: Phase) -> LifecycleHook {
    let journal = Arc::clone(journal);
    LifecycleHook::new(name, phase, move |ctx, _| {
        journal
            .lock()
            .unwrap()
            .push(format!("{}:{}", ctx.phase, ctx.method));
        Ok(())
    })
}

fn total(factory: &SqliteProviderFactory) -> i64 {
    let ctx = context(factory, Method::Get);
    EntityManager::new(factory.registry(), &ctx, "person")
        .unwrap()
        .count(&QueryCriteria::new().scope(Scope::All))
        .unwrap()
}

#[test]
fn save_applies_transforms_and_assigns_identifier() {
    let metadata = RecordMetadata::builder("account")
        .field(FieldDescriptor::text("email").transform(InputTransform::NormalizeEmail))
        .field(
            FieldDescriptor::text("password")
                .transform(InputTransform::HashSecret)
                .hidden(),
        )
        .build()
        .unwrap();
    let factory = SqliteProviderFactory::in_memory(Arc::new(
        EntityRegistry::new().with(metadata).unwrap(),
    ))
    .unwrap();
    let ctx = context(&factory, Method::Post);
    let mut manager = EntityManager::new(factory.registry(), &ctx, "account").unwrap();

    let saved = manager
        .save(&input(json!({ "email": " Ada@Example.COM ", "password": "secret" })))
        .unwrap();

    assert!(saved.id().is_some());
    assert!(saved.is_active());
    assert_eq!(saved.get("email").as_str(), Some("ada@example.com"));
    let hash = saved.get("password").as_str().unwrap().to_string();
    assert_eq!(hash.len(), 64);
    assert_ne!(hash, "secret");
    assert_eq!(manager.state(), TransactionState::Committed);
}

#[test]
fn hooks_run_around_the_transaction_in_phase_order() {
    let journal: Journal = Arc::default();
    let shout = LifecycleHook::new("shout", Phase::DuringTransaction, |_, record| {
        if let Some(upper) = record.get("name").as_str().map(str::to_uppercase) {
            record.set("name", upper.into());
        }
        Ok(())
    });
    let factory = factory(person(vec![
        journaling(&journal, "after", Phase::AfterTransaction),
        journaling(&journal, "during", Phase::DuringTransaction),
        shout,
        journaling(&journal, "before", Phase::BeforeTransaction),
    ]));

    let ctx = context(&factory, Method::Post);
    let mut manager = EntityManager::new(factory.registry(), &ctx, "person").unwrap();
    let saved = manager.save(&input(json!({ "name": "ada" }))).unwrap();

    assert_eq!(
        *journal.lock().unwrap(),
        vec![
            "before_transaction:POST",
            "during_transaction:POST",
            "after_transaction:POST"
        ]
    );
    assert_eq!(saved.get("name").as_str(), Some("ADA"));

    let reloaded = manager
        .find_by_id(saved.id().unwrap(), Scope::Active)
        .unwrap();
    assert_eq!(reloaded.get("name").as_str(), Some("ADA"));
}

#[test]
fn propagated_failure_rolls_back_and_keeps_its_kind() {
    let veto = LifecycleHook::new("veto", Phase::DuringTransaction, |_, record| {
        if record.get("name").as_str() == Some("bad") {
            return Err(CrudError::bad_request("Record {} is rejected").with_arg("bad"));
        }
        Ok(())
    })
    .propagate_failures();
    let factory = factory(person(vec![veto]));

    let ctx = context(&factory, Method::Post);
    let mut manager = EntityManager::new(factory.registry(), &ctx, "person").unwrap();
    let inputs = vec![
        input(json!({ "name": "good" })),
        input(json!({ "name": "bad" })),
    ];
    let err = manager.save_all(&inputs).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::BadRequest);
    assert_eq!(err.message(), "Record bad is rejected");
    assert_eq!(manager.state(), TransactionState::RolledBack);
    assert_eq!(total(&factory), 0);
}

#[test]
fn best_effort_hook_failure_does_not_abort() {
    let flaky = LifecycleHook::new("flaky", Phase::AfterTransaction, |_, _| {
        Err(CrudError::internal("notification service down"))
    });
    let factory = factory(person(vec![flaky]));

    let ctx = context(&factory, Method::Post);
    let mut manager = EntityManager::new(factory.registry(), &ctx, "person").unwrap();
    manager.save(&input(json!({ "name": "Ada" }))).unwrap();
    assert_eq!(total(&factory), 1);
}

#[test]
fn invalid_input_fails_before_any_write() {
    let factory = factory(person(Vec::new()));

    let ctx = context(&factory, Method::Post);
    let mut manager = EntityManager::new(factory.registry(), &ctx, "person").unwrap();
    let err = manager
        .save_all(&[
            input(json!({ "name": "fine", "age": 3 })),
            input(json!({ "name": "broken", "age": "three" })),
        ])
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::BadRequest);
    assert_eq!(manager.state(), TransactionState::Pending);
    assert_eq!(total(&factory), 0);
}

#[test]
fn update_never_overwrites_with_null() {
    let factory = factory(person(Vec::new()));
    let post = context(&factory, Method::Post);
    let id = EntityManager::new(factory.registry(), &post, "person")
        .unwrap()
        .save(&input(json!({ "name": "Ada", "age": 36 })))
        .unwrap()
        .id()
        .unwrap();

    let put = context(&factory, Method::Put);
    let mut manager = EntityManager::new(factory.registry(), &put, "person").unwrap();
    let updated = manager
        .update(id, &input(json!({ "name": null, "age": 37 })))
        .unwrap();

    assert_eq!(updated.id(), Some(id));
    assert_eq!(updated.get("name").as_str(), Some("Ada"));
    assert_eq!(updated.get("age").as_i64(), Some(37));
}

#[test]
fn raw_update_replaces_every_field_including_nulls() {
    let factory = factory(person(Vec::new()));
    let post = context(&factory, Method::Post);
    let id = EntityManager::new(factory.registry(), &post, "person")
        .unwrap()
        .save(&input(json!({ "name": "Ada", "age": 36 })))
        .unwrap()
        .id()
        .unwrap();

    let put = context(&factory, Method::Put);
    let mut manager = EntityManager::new(factory.registry(), &put, "person").unwrap();
    let replaced = manager
        .raw_update(id, &input(json!({ "name": null, "age": 37 })))
        .unwrap();
    assert_eq!(replaced.id(), Some(id));
    assert!(replaced.get("name").is_null());

    let reloaded = manager.find_by_id(id, Scope::Active).unwrap();
    assert!(reloaded.get("name").is_null());
    assert_eq!(reloaded.get("age").as_i64(), Some(37));

    let omitted = manager.raw_update(id, &input(json!({ "name": " Grace " }))).unwrap();
    assert_eq!(omitted.get("name").as_str(), Some("Grace"));
    assert!(omitted.get("age").is_null());

    assert_eq!(
        manager.raw_update(id + 100, &input(json!({ "age": 1 }))).unwrap_err().kind(),
        ErrorKind::NotFound
    );
}

#[test]
fn conditional_find_and_hard_delete_use_the_plan() {
    let factory = factory(person(Vec::new()));
    let post = context(&factory, Method::Post);
    let mut writer = EntityManager::new(factory.registry(), &post, "person").unwrap();
    for (name, age) in [("Ada", 36), ("Grace", 45), ("Alan", 41), ("Edsger", 72)] {
        writer.save(&input(json!({ "name": name, "age": age }))).unwrap();
    }

    let delete = context(&factory, Method::Delete);
    let mut manager = EntityManager::new(factory.registry(), &delete, "person").unwrap();
    let grace = manager.find_all_where(&QueryPlan::scoped(Scope::Active)).unwrap()[1].clone();
    manager.soft_delete(grace.id().unwrap()).unwrap();

    let over_forty = build_plan(
        manager.metadata(),
        &QueryCriteria::new().filter_raw("age", "> 40").unwrap().scope(Scope::All),
    )
    .unwrap();
    let names: Vec<_> = manager
        .find_all_where(&over_forty)
        .unwrap()
        .iter()
        .map(|record| record.get("name").as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(names, ["Grace", "Alan", "Edsger"]);
    assert_eq!(
        manager.find_where(&over_forty).unwrap().and_then(|r| r.id()),
        grace.id()
    );

    let active_over_forty = build_plan(
        manager.metadata(),
        &QueryCriteria::new().filter_raw("age", "> 40").unwrap(),
    )
    .unwrap();
    assert_eq!(manager.hard_delete_where(&active_over_forty).unwrap(), 2);
    assert_eq!(manager.state(), TransactionState::Committed);
    assert_eq!(total(&factory), 2);
    assert_eq!(manager.hard_delete_where(&active_over_forty).unwrap(), 0);

    let none = build_plan(
        manager.metadata(),
        &QueryCriteria::new().filter_raw("age", "> 100").unwrap(),
    )
    .unwrap();
    assert!(manager.find_where(&none).unwrap().is_none());
}

#[test]
fn soft_and_hard_delete_follow_scopes() {
    let factory = factory(person(Vec::new()));
    let post = context(&factory, Method::Post);
    let id = EntityManager::new(factory.registry(), &post, "person")
        .unwrap()
        .save(&input(json!({ "name": "Ada" })))
        .unwrap()
        .id()
        .unwrap();

    let delete = context(&factory, Method::Delete);
    let mut manager = EntityManager::new(factory.registry(), &delete, "person").unwrap();

    let archived = manager.soft_delete(id).unwrap();
    assert!(archived.is_deleted());
    assert_eq!(
        manager.find_by_id(id, Scope::Active).unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert!(manager.find_by_id(id, Scope::Archived).is_ok());
    assert_eq!(manager.soft_delete(id).unwrap_err().kind(), ErrorKind::NotFound);

    let put = context(&factory, Method::Put);
    let err = EntityManager::new(factory.registry(), &put, "person")
        .unwrap()
        .update(id, &input(json!({ "name": "Back" })))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    manager.hard_delete(id).unwrap();
    for scope in [Scope::Active, Scope::Archived, Scope::All] {
        assert_eq!(
            manager.find_by_id(id, scope).unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }
    assert_eq!(manager.hard_delete(id).unwrap_err().kind(), ErrorKind::NotFound);
}

#[test]
fn merge_upserts_in_input_order_and_skips_unchanged_records() {
    let journal: Journal = Arc::default();
    let factory = factory(person(vec![
        journaling(&journal, "writes", Phase::DuringTransaction).only_on(&[Method::Patch])
    ]));

    let post = context(&factory, Method::Post);
    let saved = EntityManager::new(factory.registry(), &post, "person")
        .unwrap()
        .save_all(&[
            input(json!({ "name": "Ada", "age": 36 })),
            input(json!({ "name": "Bob", "age": 41 })),
        ])
        .unwrap();
    let ada = saved[0].id().unwrap();
    let bob = saved[1].id().unwrap();

    let patch = context(&factory, Method::Patch);
    let mut manager = EntityManager::new(factory.registry(), &patch, "person").unwrap();
    let merged = manager
        .merge(&[
            input(json!({ "id": ada, "age": 37 })),
            input(json!({ "name": "Cy" })),
            input(json!({ "id": bob })),
        ])
        .unwrap();

    assert_eq!(merged.len(), 3);
    assert_eq!(merged[0].id(), Some(ada));
    assert_eq!(merged[0].get("name").as_str(), Some("Ada"));
    assert_eq!(merged[0].get("age").as_i64(), Some(37));
    assert_eq!(merged[1].get("name").as_str(), Some("Cy"));
    assert!(merged[1].id().is_some());
    assert_eq!(merged[2], saved[1]);

    assert_eq!(journal.lock().unwrap().len(), 2, "unchanged record is not written");
    assert_eq!(total(&factory), 3);
}

#[test]
fn merge_with_unknown_identifier_writes_nothing() {
    let factory = factory(person(Vec::new()));

    let patch = context(&factory, Method::Patch);
    let mut manager = EntityManager::new(factory.registry(), &patch, "person").unwrap();
    let err = manager
        .merge(&[input(json!({ "name": "new" })), input(json!({ "id": 999 }))])
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(
        err.message(),
        "Entity person with id 999 is not present in the database"
    );
    assert_eq!(total(&factory), 0);
}

#[test]
fn unknown_type_is_not_found() {
    let factory = factory(person(Vec::new()));
    let ctx = context(&factory, Method::Get);
    let err = EntityManager::new(factory.registry(), &ctx, "ghost").err().unwrap();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
