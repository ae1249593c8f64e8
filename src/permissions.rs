//! Evaluates a stream's `access_permission` against a caller, including
//! the stream-reference form whose effective `{read, write}` tuple is
//! folded from another stream's records.

use crate::db::models::{AccessMode, Stream};
use crate::db::records::{self, ListOptions};
use crate::db::{pods, streams};
use crate::errors::AppError;
use sqlx::PgPool;

#[derive(Debug, Clone, Copy, Default)]
pub struct Access {
    pub read: bool,
    pub write: bool,
}

fn is_system_stream(path: &str) -> bool {
    streams::is_system_path(&streams::split_path(path))
}

/// `user_id` is `None` for unauthenticated callers.
pub async fn effective_access(
    pool: &PgPool,
    pod: &str,
    stream: &Stream,
    user_id: Option<&str>,
) -> Result<Access, AppError> {
    let owner = pods::get_pod_owner(pool, pod).await?;
    if owner.is_some() && owner.as_deref() == user_id {
        return Ok(Access { read: true, write: true });
    }
    if Some(stream.user_id.as_str()) == user_id {
        return Ok(Access { read: true, write: true });
    }

    let mode = AccessMode::parse(&stream.access_permission);
    let base = match mode {
        AccessMode::Public => Access { read: true, write: user_id.is_some() },
        AccessMode::Private => Access { read: false, write: false },
        AccessMode::Owner => Access { read: false, write: false },
        AccessMode::PermissionStream(ref permission_path) => match user_id {
            Some(uid) => resolve_permission_stream(pool, pod, permission_path, uid).await?,
            None => Access::default(),
        },
    };

    if is_system_stream(&stream.path) {
        // Only the owner (handled above) may write a system stream; `public`
        // only ever widens a `.config` stream's read, never its write, and a
        // stream-reference is the one mechanism that can widen write too.
        return Ok(match mode {
            AccessMode::Public => Access { read: true, write: false },
            AccessMode::PermissionStream(_) => base,
            _ => Access::default(),
        });
    }

    Ok(base)
}

/// Folds the referenced stream's records, in `index` order, into a
/// running `{read, write}` tuple for `user_id`; a `deleted: true` record
/// clears the tuple back to no access.
async fn resolve_permission_stream(
    pool: &PgPool,
    pod: &str,
    permission_path: &str,
    user_id: &str,
) -> Result<Access, AppError> {
    let stream = match streams::get_stream_by_path(pool, pod, permission_path).await? {
        Some(s) => s,
        None => return Ok(Access::default()),
    };

    let page = records::list_records(
        pool,
        stream.id,
        &ListOptions { limit: i64::MAX, after: None, fields: None, max_content_size: None },
    )
    .await?;

    let mut access = Access::default();
    for record in &page.records {
        let Some(content) = record.get("content").and_then(|c| c.as_str()) else { continue };
        let Ok(parsed) = serde_json::from_str::<serde_json::Value>(content) else { continue };
        let Some(matches_user) = parsed.get("userId").and_then(|u| u.as_str()) else { continue };
        if matches_user != user_id {
            continue;
        }
        if parsed.get("deleted").and_then(|d| d.as_bool()).unwrap_or(false) {
            access = Access::default();
            continue;
        }
        access.read = parsed.get("read").and_then(|v| v.as_bool()).unwrap_or(access.read);
        access.write = parsed.get("write").and_then(|v| v.as_bool()).unwrap_or(access.write);
    }
    Ok(access)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_defaults_to_closed() {
        let a = Access::default();
        assert!(!a.read);
        assert!(!a.write);
    }
}
