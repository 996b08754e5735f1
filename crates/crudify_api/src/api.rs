//! Request-level API over the core service.
//!
//! # Responsibility
//! - Turn raw query-string pairs and JSON bodies into core calls.
//! - Map every outcome to a status/status-message/body envelope.
//!
//! # Invariants
//! - Handlers never panic and never return `Err`; failures become envelopes.
//! - Failure bodies carry the error chain as text, never stack traces.

use crate::params::RequestParams;
use crudify_core::{
    core_version as core_version_inner, init_logging as init_logging_inner, ping as ping_inner,
    CrudConfig, CrudError, CrudResult, CrudService, EntityRegistry,
};
use log::info;
use serde::Serialize;
use serde_json::{json, Value as JsonValue};

const STATUS_OK: u16 = 200;
const STATUS_CREATED: u16 = 201;

/// Response envelope handed to the transport layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse {
    pub status: u16,
    pub status_message: String,
    pub body: JsonValue,
}

impl ApiResponse {
    fn ok(body: JsonValue) -> Self {
        Self {
            status: STATUS_OK,
            status_message: "OK".to_string(),
            body,
        }
    }

    fn created(body: JsonValue) -> Self {
        Self {
            status: STATUS_CREATED,
            status_message: "Created".to_string(),
            body,
        }
    }

    fn failure(err: &CrudError) -> Self {
        let response = err.to_response();
        let body = serde_json::to_value(&response.body).unwrap_or_else(|_| {
            json!({ "errorCode": response.status, "errorMessage": response.status_message })
        });
        Self {
            status: response.status,
            status_message: response.status_message,
            body,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Handlers for the generic `/<entity>` routes.
pub struct CrudApi {
    service: CrudService,
}

impl CrudApi {
    pub fn new(service: CrudService) -> Self {
        Self { service }
    }

    /// Opens storage per `config` for the types in `registry`.
    pub fn open(registry: EntityRegistry, config: CrudConfig) -> CrudResult<Self> {
        CrudService::open(registry, config).map(Self::new)
    }

    pub fn service(&self) -> &CrudService {
        &self.service
    }

    /// `GET /<entity>`: paged search, `{ "data": [...], "pages": N }`.
    pub fn list(&self, entity: &str, query: &[(String, String)]) -> ApiResponse {
        info!("event=api_call module=api status=start route=list entity={entity}");
        respond(STATUS_OK, || {
            let params = RequestParams::parse(query)?;
            let criteria = params.criteria(self.service.config().default_page_size)?;
            self.service
                .query(entity, criteria, params.projection())
        })
    }

    /// `GET /<entity>/count`: `{ "count": N }` under the selected scope only.
    pub fn count(&self, entity: &str, query: &[(String, String)]) -> ApiResponse {
        info!("event=api_call module=api status=start route=count entity={entity}");
        respond(STATUS_OK, || {
            let params = RequestParams::parse(query)?;
            let criteria = params.criteria(self.service.config().default_page_size)?;
            let count = self.service.count(entity, criteria)?;
            Ok(json!({ "count": count }))
        })
    }

    /// `GET /<entity>/<id>` under the selected scope.
    pub fn get_one(&self, entity: &str, id: i64, query: &[(String, String)]) -> ApiResponse {
        info!("event=api_call module=api status=start route=get_one entity={entity}");
        respond(STATUS_OK, || {
            let params = RequestParams::parse(query)?;
            self.service
                .find_one(entity, id, params.scope, params.projection())
        })
    }

    /// `POST /<entity>`: an object is saved, an array is bulk-saved.
    pub fn create(&self, entity: &str, body: &JsonValue, query: &[(String, String)]) -> ApiResponse {
        info!("event=api_call module=api status=start route=create entity={entity}");
        respond(STATUS_CREATED, || {
            let params = RequestParams::parse(query)?;
            if body.is_array() {
                self.service.save_all(entity, body, params.projection())
            } else {
                self.service.save(entity, body, params.projection())
            }
        })
    }

    /// `PUT /<entity>/<id>`: non-null fields of `body` replace stored values.
    pub fn update(
        &self,
        entity: &str,
        id: i64,
        body: &JsonValue,
        query: &[(String, String)],
    ) -> ApiResponse {
        info!("event=api_call module=api status=start route=update entity={entity}");
        respond(STATUS_OK, || {
            let params = RequestParams::parse(query)?;
            self.service
                .update(entity, id, body, params.projection())
        })
    }

    /// `PATCH /<entity>`: batch upsert of an array body.
    pub fn merge(&self, entity: &str, body: &JsonValue, query: &[(String, String)]) -> ApiResponse {
        info!("event=api_call module=api status=start route=merge entity={entity}");
        respond(STATUS_OK, || {
            let params = RequestParams::parse(query)?;
            self.service.merge(entity, body, params.projection())
        })
    }

    /// `DELETE /<entity>/<id>`: soft delete unless `hard=true`.
    pub fn delete(&self, entity: &str, id: i64, query: &[(String, String)]) -> ApiResponse {
        info!("event=api_call module=api status=start route=delete entity={entity}");
        respond(STATUS_OK, || {
            let params = RequestParams::parse(query)?;
            if params.hard {
                self.service.hard_delete(entity, id)
            } else {
                self.service.soft_delete(entity, id)
            }
        })
    }
}

fn respond(success: u16, call: impl FnOnce() -> CrudResult<JsonValue>) -> ApiResponse {
    match call() {
        Ok(body) if success == STATUS_CREATED => ApiResponse::created(body),
        Ok(body) => ApiResponse::ok(body),
        Err(err) => ApiResponse::failure(&err),
    }
}

/// Minimal health-check passthrough.
pub fn ping() -> String {
    ping_inner().to_owned()
}

pub fn core_version() -> String {
    core_version_inner().to_owned()
}

/// Initializes core logging once per process.
///
/// Returns an empty string on success and the error message otherwise.
pub fn init_logging(level: String, log_dir: String) -> String {
    match init_logging_inner(level.as_str(), log_dir.as_str()) {
        Ok(()) => String::new(),
        Err(err) => err,
    }
}
