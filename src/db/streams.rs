use super::models::Stream;
use crate::errors::{AppError, ErrorKind};
use regex::Regex;
use sqlx::PgPool;
use std::sync::OnceLock;

fn segment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.-]+$").unwrap())
}

pub fn validate_segment(segment: &str) -> Result<(), AppError> {
    if segment.is_empty()
        || segment == "."
        || segment == ".."
        || !segment_re().is_match(segment)
    {
        return Err(AppError::new(
            ErrorKind::InvalidPath,
            format!("'{}' is not a valid stream segment", segment),
        ));
    }
    Ok(())
}

pub fn split_path(path: &str) -> Vec<String> {
    path.trim_matches('/').split('/').filter(|s| !s.is_empty()).map(str::to_string).collect()
}

pub fn is_system_path(segments: &[String]) -> bool {
    segments.first().map(|s| s == ".config").unwrap_or(false)
}

pub async fn get_stream_by_path(pool: &PgPool, pod: &str, path: &str) -> Result<Option<Stream>, AppError> {
    let normalized = format!("/{}", split_path(path).join("/"));
    let stream = sqlx::query_as::<_, Stream>(
        "select id, pod_name, name, parent_id, path, user_id, access_permission, has_schema,
                metadata, created_at, updated_at
         from streams where pod_name = $1 and path = $2",
    )
    .bind(pod)
    .bind(&normalized)
    .fetch_optional(pool)
    .await?;
    Ok(stream)
}

/// Walks `path`'s segments; each missing segment is created with
/// `access_mode` (defaulting to `public`), existing segments are returned
/// unchanged.
pub async fn get_or_create_stream(
    pool: &PgPool,
    pod: &str,
    path: &str,
    creator: &str,
    access_mode: Option<&str>,
) -> Result<Stream, AppError> {
    let segments = split_path(path);
    if segments.is_empty() {
        return Err(AppError::new(ErrorKind::InvalidPath, "stream path must have at least one segment"));
    }
    for segment in &segments {
        validate_segment(segment)?;
    }

    let mut tx = pool.begin().await?;
    let mut parent_id: Option<i64> = None;
    let mut current_path = String::new();
    let mut current: Option<Stream> = None;

    for segment in &segments {
        current_path.push('/');
        current_path.push_str(segment);

        let existing = sqlx::query_as::<_, Stream>(
            "select id, pod_name, name, parent_id, path, user_id, access_permission, has_schema,
                    metadata, created_at, updated_at
             from streams where pod_name = $1 and parent_id is not distinct from $2 and name = $3",
        )
        .bind(pod)
        .bind(parent_id)
        .bind(segment)
        .fetch_optional(&mut *tx)
        .await?;

        current = Some(match existing {
            Some(stream) => stream,
            None => {
                sqlx::query_as::<_, Stream>(
                    "insert into streams (pod_name, name, parent_id, path, user_id, access_permission)
                     values ($1, $2, $3, $4, $5, $6)
                     returning id, pod_name, name, parent_id, path, user_id, access_permission,
                               has_schema, metadata, created_at, updated_at",
                )
                .bind(pod)
                .bind(segment)
                .bind(parent_id)
                .bind(&current_path)
                .bind(creator)
                .bind(access_mode.unwrap_or("public"))
                .fetch_one(&mut *tx)
                .await?
            }
        });
        parent_id = current.as_ref().map(|s| s.id);
    }

    tx.commit().await?;
    Ok(current.expect("segments is non-empty"))
}

pub struct ListStreamsOptions {
    pub path_prefix: Option<String>,
    pub recursive: bool,
}

pub async fn get_streams_with_prefix(
    pool: &PgPool,
    pod: &str,
    prefix: &str,
) -> Result<Vec<Stream>, AppError> {
    let normalized = format!("/{}", split_path(prefix).join("/"));
    let like_pattern = format!("{}/%", normalized);
    let streams = sqlx::query_as::<_, Stream>(
        "select id, pod_name, name, parent_id, path, user_id, access_permission, has_schema,
                metadata, created_at, updated_at
         from streams
         where pod_name = $1 and (path = $2 or path like $3)
         order by path",
    )
    .bind(pod)
    .bind(&normalized)
    .bind(&like_pattern)
    .fetch_all(pool)
    .await?;
    Ok(streams)
}

pub async fn list_streams(
    pool: &PgPool,
    pod: &str,
    opts: &ListStreamsOptions,
) -> Result<Vec<Stream>, AppError> {
    match &opts.path_prefix {
        Some(prefix) if !opts.recursive => {
            let normalized = format!("/{}", split_path(prefix).join("/"));
            let streams = sqlx::query_as::<_, Stream>(
                "select id, pod_name, name, parent_id, path, user_id, access_permission, has_schema,
                        metadata, created_at, updated_at
                 from streams where pod_name = $1 and path = $2
                 order by path",
            )
            .bind(pod)
            .bind(&normalized)
            .fetch_all(pool)
            .await?;
            Ok(streams)
        }
        Some(prefix) => get_streams_with_prefix(pool, pod, prefix).await,
        None => {
            let streams = sqlx::query_as::<_, Stream>(
                "select id, pod_name, name, parent_id, path, user_id, access_permission, has_schema,
                        metadata, created_at, updated_at
                 from streams where pod_name = $1
                 order by path",
            )
            .bind(pod)
            .fetch_all(pool)
            .await?;
            Ok(streams)
        }
    }
}

pub async fn record_count(pool: &PgPool, stream_id: i64) -> Result<i64, AppError> {
    let count: i64 = sqlx::query_scalar("select count(*) from records where stream_id = $1")
        .bind(stream_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Returns the latest record's `hash` and whether every `previous_hash`
/// in the stream links to the row before it.
pub async fn hash_chain_status(pool: &PgPool, stream_id: i64) -> Result<(Option<String>, bool), AppError> {
    let rows: Vec<(String, Option<String>)> = sqlx::query_as(
        "select hash, previous_hash from records where stream_id = $1 order by index asc",
    )
    .bind(stream_id)
    .fetch_all(pool)
    .await?;

    let mut valid = true;
    let mut prior_hash: Option<&str> = None;
    for (hash, previous_hash) in &rows {
        if previous_hash.as_deref() != prior_hash {
            valid = false;
            break;
        }
        prior_hash = Some(hash.as_str());
    }
    let last_hash = rows.last().map(|(hash, _)| hash.clone());
    Ok((last_hash, valid))
}

pub async fn delete_stream(pool: &PgPool, pod: &str, stream_id: i64, caller: &str) -> Result<(), AppError> {
    let stream = sqlx::query_as::<_, Stream>(
        "select id, pod_name, name, parent_id, path, user_id, access_permission, has_schema,
                metadata, created_at, updated_at
         from streams where pod_name = $1 and id = $2",
    )
    .bind(pod)
    .bind(stream_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::new(ErrorKind::StreamNotFound, "stream not found"))?;

    if is_system_path(&split_path(&stream.path)) {
        return Err(AppError::new(ErrorKind::Forbidden, "system streams cannot be destroyed"));
    }
    let owner = super::pods::get_pod_owner(pool, pod).await?;
    if stream.user_id != caller && owner.as_deref() != Some(caller) {
        return Err(AppError::new(ErrorKind::Forbidden, "only the creator or pod owner may delete a stream"));
    }

    sqlx::query("delete from streams where id = $1").bind(stream_id).execute(pool).await?;
    Ok(())
}
