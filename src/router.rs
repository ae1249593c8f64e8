//! HTTP-facing routing: host-to-pod resolution, system-path precedence,
//! and the single-hop link rewrite driven by `.config/routing`.

use crate::config::AppConfig;
use crate::config_streams;
use crate::db::models::Record;
use crate::db::streams::split_path;
use crate::errors::{AppError, ErrorKind};
use actix_web::HttpRequest;
use sqlx::PgPool;

/// Prefixes that are always handled by system endpoints, never by pod
/// content, regardless of which pod a host maps to.
pub const SYSTEM_PREFIXES: &[&str] =
    &["/health", "/auth/", "/api/", "/oauth2/", "/connect", "/.well-known/"];

pub fn is_system_path(path: &str) -> bool {
    let normalized = if path.starts_with('/') { path.to_string() } else { format!("/{}", path) };
    SYSTEM_PREFIXES.iter().any(|p| {
        if p.ends_with('/') {
            normalized.starts_with(p)
        } else {
            normalized == *p
        }
    })
}

/// The leftmost DNS label of the request host becomes the pod name; the
/// bare apex maps to the configured `root_pod`, if any.
pub fn pod_from_host(req: &HttpRequest, config: &AppConfig) -> Result<String, AppError> {
    let host = req
        .connection_info()
        .host()
        .split(':')
        .next()
        .unwrap_or("")
        .to_string();

    if host == config.apex_domain {
        return config
            .root_pod()
            .map(str::to_string)
            .ok_or_else(|| AppError::new(ErrorKind::PodNotFound, "no root pod configured for the apex domain"));
    }

    let suffix = format!(".{}", config.apex_domain);
    let label = host
        .strip_suffix(&suffix)
        .ok_or_else(|| AppError::new(ErrorKind::PodNotFound, format!("'{}' is not a {} host", host, config.apex_domain)))?;

    if label.is_empty() || label.contains('.') {
        return Err(AppError::new(ErrorKind::PodNotFound, format!("'{}' does not name a pod", host)));
    }
    Ok(label.to_string())
}

#[derive(Debug, Clone)]
pub struct RouteTarget {
    pub path: String,
    pub index_override: Option<String>,
}

/// Consults `.config/routing` for a rewrite of `raw_path`. Only one hop is
/// ever taken — the rewritten target is never itself looked up in the
/// routing table, which is what keeps cycles structurally impossible.
pub async fn resolve_route(pool: &PgPool, pod: &str, raw_path: &str) -> Result<RouteTarget, AppError> {
    let segments = split_path(raw_path);
    let key = if segments.is_empty() { "/".to_string() } else { format!("/{}", segments.join("/")) };

    let routes = config_streams::get_routing(pool, pod).await?;
    let Some(target) = routes.get(&key) else {
        return Ok(RouteTarget { path: raw_path.to_string(), index_override: None });
    };

    match target.split_once('?') {
        Some((path, query)) => {
            let index_override = query
                .split('&')
                .find_map(|kv| kv.strip_prefix("i="))
                .map(str::to_string);
            Ok(RouteTarget { path: path.to_string(), index_override })
        }
        None => Ok(RouteTarget { path: target.clone(), index_override: None }),
    }
}

/// Response metadata headers exposed on a record read, each key already
/// lowercased per the wire contract.
pub fn record_header_pairs(record: &Record) -> Vec<(String, String)> {
    let mut pairs = vec![
        ("x-index".to_string(), record.index.to_string()),
        ("x-hash".to_string(), record.hash.clone()),
        ("x-content-hash".to_string(), record.content_hash.clone()),
        ("x-author".to_string(), record.user_id.clone()),
        ("x-timestamp".to_string(), record.created_at.to_rfc3339()),
    ];
    if let Some(previous) = &record.previous_hash {
        pairs.push(("x-previous-hash".to_string(), previous.clone()));
    }
    if let Some(obj) = record.headers.as_object() {
        for (k, v) in obj {
            if let Some(s) = v.as_str() {
                pairs.push((k.to_lowercase(), s.to_string()));
            }
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prefixes_cover_the_fixed_set() {
        assert!(is_system_path("/health"));
        assert!(is_system_path("/auth/login"));
        assert!(is_system_path("/api/pods"));
        assert!(is_system_path("/oauth2/token"));
        assert!(is_system_path("/connect"));
        assert!(is_system_path("/.well-known/openid-configuration"));
        assert!(!is_system_path("/blog/post1"));
    }
}
