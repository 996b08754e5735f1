//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `crudify_core` linkage end to end against a real database.
//! - Keep output deterministic for quick local sanity checks.

use crudify_core::metadata::InputTransform;
use crudify_core::{
    init_from_config, CrudConfig, CrudResult, CrudService, EntityRegistry, FieldDescriptor,
    Projection, QueryCriteria, RecordMetadata, Scope,
};
use log::error;
use serde_json::json;
use std::process::ExitCode;

fn main() -> ExitCode {
    println!("crudify_core ping={}", crudify_core::ping());
    println!("crudify_core version={}", crudify_core::core_version());

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("event=cli_run module=cli status=error error={err}");
            eprintln!("crudify smoke failed: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = CrudConfig::from_env()?;
    init_from_config(&config)?;

    let service = CrudService::open(demo_registry()?, config)?;
    smoke(&service)?;
    Ok(())
}

fn demo_registry() -> Result<EntityRegistry, Box<dyn std::error::Error>> {
    let note = RecordMetadata::builder("note")
        .field(FieldDescriptor::text("title").transform(InputTransform::Trim))
        .field(FieldDescriptor::text("body"))
        .field(FieldDescriptor::integer("priority"))
        .build()?;
    Ok(EntityRegistry::new().with(note)?)
}

fn smoke(service: &CrudService) -> CrudResult<()> {
    let created = service.save(
        "note",
        &json!({ "title": "  hello crudify  ", "body": "first note", "priority": 2 }),
        Projection::default().skipping(["deleted"]),
    )?;
    println!("created={created}");

    let criteria = service.criteria().search("hello");
    let page = service.query("note", criteria, vec!["id".to_string(), "title".to_string()])?;
    println!("page={page}");

    let active = service.count("note", QueryCriteria::new().scope(Scope::Active))?;
    println!("active_count={active}");
    Ok(())
}
