//! The distinguished `.config/...` streams that drive pod ownership,
//! routing, the domain set, and per-stream schema validation. Each is an
//! ordinary append-only stream; only the pod owner may write to the
//! pod-level ones.

use crate::db::models::ExternalBlobRef;
use crate::db::records::{self, AppendInput, ListOptions};
use crate::db::{pods, streams};
use crate::errors::{AppError, ErrorKind};
use serde_json::Value;
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};

async fn latest_config_content(
    pool: &PgPool,
    pod: &str,
    stream_path: &str,
    record_name: &str,
) -> Result<Option<Value>, AppError> {
    let Some(stream) = streams::get_stream_by_path(pool, pod, stream_path).await? else {
        return Ok(None);
    };
    match records::get_record_by_name(pool, stream.id, record_name, false).await {
        Ok(record) => Ok(serde_json::from_str(&record.content).ok()),
        Err(AppError { kind: ErrorKind::RecordNotFound, .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

pub async fn get_owner(pool: &PgPool, pod: &str) -> Result<Option<String>, AppError> {
    pods::get_pod_owner(pool, pod).await
}

pub async fn transfer_ownership(pool: &PgPool, pod: &str, caller: &str, new_owner: &str) -> Result<(), AppError> {
    let current = get_owner(pool, pod).await?;
    if current.as_deref() != Some(caller) {
        return Err(AppError::new(ErrorKind::Forbidden, "only the current owner may transfer ownership"));
    }
    let stream = streams::get_or_create_stream(pool, pod, "/.config/owner", caller, Some("owner")).await?;
    let body = serde_json::json!({ "userId": new_owner }).to_string();
    append_config_record(pool, stream.id, &stream.path, caller, "owner", body.as_bytes()).await?;
    Ok(())
}

pub async fn get_routing(pool: &PgPool, pod: &str) -> Result<HashMap<String, String>, AppError> {
    let content = latest_config_content(pool, pod, "/.config/routing", "routes").await?;
    Ok(content
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default())
}

pub async fn write_routing(
    pool: &PgPool,
    pod: &str,
    caller: &str,
    routes: HashMap<String, String>,
) -> Result<(), AppError> {
    require_owner(pool, pod, caller).await?;
    let stream = streams::get_or_create_stream(pool, pod, "/.config/routing", caller, Some("owner")).await?;
    let body = serde_json::to_vec(&routes).expect("route map always serializes");
    append_config_record(pool, stream.id, &stream.path, caller, "routes", &body).await?;
    Ok(())
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
struct DomainEvent {
    domain: String,
    action: String,
}

pub async fn get_domains(pool: &PgPool, pod: &str) -> Result<HashSet<String>, AppError> {
    let Some(stream) = streams::get_stream_by_path(pool, pod, "/.config/domains").await? else {
        return Ok(HashSet::new());
    };
    let page = records::list_records(
        pool,
        stream.id,
        &ListOptions { limit: i64::MAX, after: None, fields: None, max_content_size: None },
    )
    .await?;

    let mut domains = HashSet::new();
    for record in &page.records {
        let Some(content) = record.get("content").and_then(|c| c.as_str()) else { continue };
        let Ok(event) = serde_json::from_str::<DomainEvent>(content) else { continue };
        match event.action.as_str() {
            "add" => {
                domains.insert(event.domain);
            }
            "remove" => {
                domains.remove(&event.domain);
            }
            _ => {}
        }
    }
    Ok(domains)
}

pub async fn record_domain_action(
    pool: &PgPool,
    pod: &str,
    caller: &str,
    domain: &str,
    action: &str,
) -> Result<(), AppError> {
    require_owner(pool, pod, caller).await?;
    let stream = streams::get_or_create_stream(pool, pod, "/.config/domains", caller, Some("owner")).await?;
    let body = serde_json::json!({ "domain": domain, "action": action }).to_string();
    append_config_record(pool, stream.id, &stream.path, caller, "domains", body.as_bytes()).await?;
    Ok(())
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct SchemaConfig {
    #[serde(rename = "schemaType")]
    pub schema_type: String,
    pub schema: Option<Value>,
    #[serde(rename = "validationMode", default)]
    pub validation_mode: Option<String>,
    #[serde(rename = "appliesTo", default)]
    pub applies_to: Option<Vec<String>>,
}

pub async fn get_schema(pool: &PgPool, pod: &str, stream_path: &str) -> Result<Option<SchemaConfig>, AppError> {
    let config_path = format!("{}/.config", stream_path.trim_end_matches('/'));
    let content = latest_config_content(pool, pod, &config_path, "schema").await?;
    Ok(content.and_then(|v| serde_json::from_value(v).ok()))
}

pub async fn write_schema(
    pool: &PgPool,
    pod: &str,
    stream_path: &str,
    caller: &str,
    config: &SchemaConfig,
) -> Result<(), AppError> {
    let config_path = format!("{}/.config", stream_path.trim_end_matches('/'));
    let config_stream = streams::get_or_create_stream(pool, pod, &config_path, caller, Some("owner")).await?;
    let body = serde_json::to_vec(config).expect("schema config always serializes");
    append_config_record(pool, config_stream.id, &config_stream.path, caller, "schema", &body).await?;

    if let Some(target) = streams::get_stream_by_path(pool, pod, stream_path).await? {
        let has_schema = config.schema_type != "none";
        sqlx::query("update streams set has_schema = $1, updated_at = now() where id = $2")
            .bind(has_schema)
            .bind(target.id)
            .execute(pool)
            .await?;
    }
    Ok(())
}

pub fn validate_against_schema(config: &SchemaConfig, content: &Value) -> Result<(), AppError> {
    if config.schema_type == "none" {
        return Ok(());
    }
    let Some(schema) = &config.schema else { return Ok(()) };
    let validator = jsonschema::validator_for(schema)
        .map_err(|e| AppError::new(ErrorKind::SchemaError, format!("invalid schema: {}", e)))?;
    if let Err(errors) = validator.validate(content) {
        return Err(AppError::new(ErrorKind::ValidationError, errors.to_string()));
    }
    Ok(())
}

async fn require_owner(pool: &PgPool, pod: &str, caller: &str) -> Result<(), AppError> {
    let owner = get_owner(pool, pod).await?;
    if owner.as_deref() != Some(caller) {
        return Err(AppError::new(ErrorKind::Forbidden, "only the pod owner may write this config stream"));
    }
    Ok(())
}

async fn append_config_record(
    pool: &PgPool,
    stream_id: i64,
    stream_path: &str,
    caller: &str,
    record_name: &str,
    body: &[u8],
) -> Result<(), AppError> {
    records::append_record(
        pool,
        AppendInput {
            stream_id,
            stream_path,
            author: caller,
            name: record_name,
            content_bytes: body,
            content_type: "application/json",
            headers: serde_json::json!({}),
            external_blob: None::<ExternalBlobRef>,
            deleted: false,
        },
    )
    .await?;
    Ok(())
}
