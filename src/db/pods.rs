use super::models::Pod;
use crate::errors::{AppError, ErrorKind};
use regex::Regex;
use sqlx::PgPool;
use std::sync::OnceLock;

fn pod_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$").unwrap())
}

pub fn validate_pod_name(name: &str) -> Result<(), AppError> {
    if name.len() > 63 || !pod_name_re().is_match(name) {
        return Err(AppError::new(
            ErrorKind::InvalidName,
            format!("'{}' is not a valid pod name", name),
        ));
    }
    Ok(())
}

pub async fn create_pod(pool: &PgPool, name: &str, creator: &str) -> Result<Pod, AppError> {
    validate_pod_name(name)?;

    let mut tx = pool.begin().await?;
    let pod = sqlx::query_as::<_, Pod>(
        "insert into pods (name) values ($1) returning name, metadata, created_at, updated_at",
    )
    .bind(name)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
            AppError::new(ErrorKind::PodExists, format!("pod '{}' already exists", name))
        }
        e => AppError::from(e),
    })?;

    // root stream + `.config/owner` record transferring ownership to the creator.
    let root_id: i64 = sqlx::query_scalar(
        "insert into streams (pod_name, name, parent_id, path, user_id, access_permission)
         values ($1, '.config', null, '/.config', $2, 'owner') returning id",
    )
    .bind(name)
    .bind(creator)
    .fetch_one(&mut *tx)
    .await?;

    let owner_stream_id: i64 = sqlx::query_scalar(
        "insert into streams (pod_name, name, parent_id, path, user_id, access_permission)
         values ($1, 'owner', $2, '/.config/owner', $3, 'owner') returning id",
    )
    .bind(name)
    .bind(root_id)
    .bind(creator)
    .fetch_one(&mut *tx)
    .await?;

    let content = serde_json::json!({ "userId": creator }).to_string();
    let content_hash = crate::hash::content_hash(content.as_bytes());
    let created_at = super::records::now_iso();
    let hash = crate::hash::chain_hash(None, &content_hash, creator, &created_at);

    sqlx::query(
        "insert into records (stream_id, index, name, path, content, content_type, size,
            is_binary, content_hash, hash, previous_hash, user_id, headers, created_at)
         values ($1, 0, 'owner', '/.config/owner/owner', $2, 'application/json', $3,
            false, $4, $5, null, $6, '{}'::jsonb, $7)",
    )
    .bind(owner_stream_id)
    .bind(&content)
    .bind(content.len() as i64)
    .bind(&content_hash)
    .bind(&hash)
    .bind(creator)
    .bind(chrono::DateTime::parse_from_rfc3339(&created_at).unwrap())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(pod)
}

pub async fn get_pod(pool: &PgPool, name: &str) -> Result<Pod, AppError> {
    sqlx::query_as::<_, Pod>("select name, metadata, created_at, updated_at from pods where name = $1")
        .bind(name)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::new(ErrorKind::PodNotFound, format!("pod '{}' not found", name)))
}

/// A pod's owner is the `userId` of the latest non-deleted record named
/// `owner` in its `.config/owner` stream.
pub async fn get_pod_owner(pool: &PgPool, pod_name: &str) -> Result<Option<String>, AppError> {
    let content: Option<String> = sqlx::query_scalar(
        "select r.content from records r
         join streams s on s.id = r.stream_id
         where s.pod_name = $1 and s.path = '/.config/owner' and r.name = 'owner'
           and r.deleted = false
         order by r.index desc limit 1",
    )
    .bind(pod_name)
    .fetch_optional(pool)
    .await?;

    Ok(content.and_then(|c| serde_json::from_str::<serde_json::Value>(&c).ok())
        .and_then(|v| v.get("userId").and_then(|u| u.as_str()).map(str::to_string)))
}

pub async fn list_user_pods(pool: &PgPool, user_id: &str) -> Result<Vec<Pod>, AppError> {
    let pods = sqlx::query_as::<_, Pod>(
        "select p.name, p.metadata, p.created_at, p.updated_at from pods p
         where (
            select r.content from records r
            join streams s on s.id = r.stream_id
            where s.pod_name = p.name and s.path = '/.config/owner' and r.name = 'owner'
              and r.deleted = false
            order by r.index desc limit 1
         )::jsonb ->> 'userId' = $1
         order by p.name",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(pods)
}

pub async fn delete_pod(pool: &PgPool, name: &str, caller: &str) -> Result<(), AppError> {
    let owner = get_pod_owner(pool, name).await?;
    if owner.as_deref() != Some(caller) {
        return Err(AppError::new(ErrorKind::Forbidden, "only the pod owner may delete a pod"));
    }
    // cascades: streams -> records via ON DELETE CASCADE. Blob purge is
    // the caller's responsibility (it iterates records with external
    // storage before issuing this delete; see controllers::pods).
    let result = sqlx::query("delete from pods where name = $1").bind(name).execute(pool).await?;
    if result.rows_affected() == 0 {
        return Err(AppError::new(ErrorKind::PodNotFound, format!("pod '{}' not found", name)));
    }
    Ok(())
}
