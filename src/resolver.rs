//! Maps a pod-relative URL path to a stream (and, for reads, a record
//! name) across the ambiguous segmentations a flat path allows.

use crate::db::streams::{get_stream_by_path, split_path, validate_segment};
use crate::errors::{AppError, ErrorKind};
use sqlx::PgPool;

#[derive(Debug, Clone)]
pub struct Resolved {
    pub stream_id: i64,
    pub stream_path: String,
    pub record_name: Option<String>,
}

pub fn validate_record_name(name: &str) -> Result<(), AppError> {
    let invalid = name.is_empty()
        || name.len() > 256
        || name.starts_with('.')
        || name.ends_with('.')
        || name.contains('/')
        || name.chars().any(|c| "?#%&=".contains(c));
    if invalid {
        return Err(AppError::new(ErrorKind::InvalidInput, format!("'{}' is not a valid record name", name)));
    }
    Ok(())
}

/// Write path: every segment is a stream segment, never a record name.
/// Callers pass the result straight to `Catalog::get_or_create_stream`.
pub fn resolve_for_write(path: &str) -> Result<Vec<String>, AppError> {
    let segments = split_path(path);
    if segments.is_empty() {
        return Err(AppError::new(ErrorKind::InvalidPath, "a stream path is required"));
    }
    for segment in &segments {
        validate_segment(segment)?;
    }
    Ok(segments)
}

/// Read path with an explicit `i=` index query, or a plain stream listing
/// (paging params, no `i=`): both treat every segment as a stream segment
/// with no trailing record name.
pub async fn resolve_for_indexed_read(pool: &PgPool, pod: &str, path: &str) -> Result<Resolved, AppError> {
    let segments = split_path(path);
    if segments.is_empty() {
        return Err(AppError::new(ErrorKind::InvalidPath, "a stream path is required"));
    }
    let normalized = format!("/{}", segments.join("/"));
    let stream = get_stream_by_path(pool, pod, &normalized)
        .await?
        .ok_or_else(|| AppError::new(ErrorKind::StreamNotFound, format!("stream '{}' not found", normalized)))?;
    Ok(Resolved { stream_id: stream.id, stream_path: stream.path, record_name: None })
}

/// Read path with no `i=` query. Tries the "record first" split — the
/// longest stream prefix plus a trailing record name — before falling
/// back to treating the whole path as a stream (a listing).
pub async fn resolve_for_read(pool: &PgPool, pod: &str, path: &str) -> Result<Resolved, AppError> {
    let segments = split_path(path);
    if segments.is_empty() {
        return Err(AppError::new(ErrorKind::InvalidPath, "a stream path is required"));
    }

    if segments.len() > 1 {
        let (stream_segments, last) = segments.split_at(segments.len() - 1);
        let candidate_name = &last[0];
        if validate_record_name(candidate_name).is_ok() {
            let stream_path = format!("/{}", stream_segments.join("/"));
            if let Some(stream) = get_stream_by_path(pool, pod, &stream_path).await? {
                return Ok(Resolved {
                    stream_id: stream.id,
                    stream_path: stream.path,
                    record_name: Some(candidate_name.clone()),
                });
            }
        }
    }

    let whole_path = format!("/{}", segments.join("/"));
    let stream = get_stream_by_path(pool, pod, &whole_path)
        .await?
        .ok_or_else(|| AppError::new(ErrorKind::StreamNotFound, format!("stream '{}' not found", whole_path)))?;
    Ok(Resolved { stream_id: stream.id, stream_path: stream.path, record_name: None })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_name_rejects_dot_prefixed_and_slashed_names() {
        assert!(validate_record_name("record.html").is_ok());
        assert!(validate_record_name(".hidden").is_err());
        assert!(validate_record_name("trailing.").is_err());
        assert!(validate_record_name("a/b").is_err());
        assert!(validate_record_name("").is_err());
    }

    #[test]
    fn write_path_requires_at_least_one_segment() {
        assert!(resolve_for_write("/").is_err());
        assert_eq!(resolve_for_write("/a/b/c").unwrap(), vec!["a", "b", "c"]);
    }
}
