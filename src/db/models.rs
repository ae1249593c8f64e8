use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Pod {
    pub name: String,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Stream {
    pub id: i64,
    pub pod_name: String,
    pub name: String,
    pub parent_id: Option<i64>,
    pub path: String,
    pub user_id: String,
    pub access_permission: String,
    pub has_schema: bool,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Closed set of access modes a stream's `access_permission` column can
/// hold, plus the stream-reference form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessMode {
    Public,
    Private,
    Owner,
    PermissionStream(String),
}

impl AccessMode {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "public" => AccessMode::Public,
            "private" => AccessMode::Private,
            "owner" => AccessMode::Owner,
            other if other.starts_with('/') => AccessMode::PermissionStream(other.to_string()),
            _ => AccessMode::Public,
        }
    }

    pub fn as_str(&self) -> String {
        match self {
            AccessMode::Public => "public".to_string(),
            AccessMode::Private => "private".to_string(),
            AccessMode::Owner => "owner".to_string(),
            AccessMode::PermissionStream(path) => path.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Record {
    pub id: i64,
    pub stream_id: i64,
    pub index: i64,
    pub name: String,
    pub path: String,
    pub content: String,
    pub content_type: String,
    pub size: i64,
    pub is_binary: bool,
    pub content_hash: String,
    pub hash: String,
    pub previous_hash: Option<String>,
    pub user_id: String,
    pub headers: Value,
    pub storage: Option<Value>,
    pub deleted: bool,
    pub purged: bool,
    pub created_at: DateTime<Utc>,
}

/// External-blob reference persisted in `records.storage` as a typed
/// column instead of a loosely-shaped JSON bag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalBlobRef {
    pub hash: String,
    pub size: u64,
    pub url: String,
}
