//! Pod-content HTTP surface: `GET`/`POST`/`DELETE` against `<pod>.<apex>`
//! paths. Registered as a catch-all beneath the system controllers, which
//! win on any literal path they claim (`/health`, `/api/*`, ...).

use crate::blobstore::BlobStore;
use crate::cache::{Cache, CachePool};
use crate::config::AppConfig;
use crate::config_streams::{self, SchemaConfig};
use crate::db::models::{ExternalBlobRef, Record, Stream};
use crate::db::records::{self, AppendInput, IndexSpec, ListOptions};
use crate::db::{pods, streams};
use crate::errors::{AppError, ErrorKind};
use crate::middlewares::auth::caller_of;
use crate::permissions::{self, Access};
use crate::resolver;
use crate::router;
use actix_web::http::header::{HeaderName, CACHE_CONTROL, CONTENT_TYPE, LOCATION};
use actix_web::{delete, get, post, web, HttpRequest, HttpResponse, Responder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use std::str::FromStr;

const ALLOWED_CUSTOM_HEADERS: &[&str] = &["cache-control", "hello-world"];
const BINARY_TYPE_PREFIXES: &[&str] =
    &["image/", "audio/", "video/", "application/pdf", "application/octet-stream", "application/zip"];
const HEADER_PREFIX: &str = "x-record-header-";

#[derive(Deserialize)]
pub struct ReadQuery {
    pub i: Option<String>,
    pub limit: Option<i64>,
    pub after: Option<i64>,
    pub unique: Option<bool>,
    pub recursive: Option<bool>,
    pub fields: Option<String>,
    #[serde(rename = "maxContentSize")]
    pub max_content_size: Option<usize>,
}

impl ReadQuery {
    fn wants_list(&self) -> bool {
        self.limit.is_some()
            || self.after.is_some()
            || self.unique.is_some()
            || self.recursive.is_some()
            || self.fields.is_some()
            || self.max_content_size.is_some()
    }

    fn fields_vec(&self) -> Option<Vec<String>> {
        self.fields.as_ref().map(|f| f.split(',').map(str::trim).map(str::to_string).collect())
    }
}

#[derive(Deserialize)]
pub struct WriteQuery {
    pub access: Option<String>,
}

#[derive(Deserialize)]
pub struct DeleteQuery {
    pub purge: Option<bool>,
}

#[derive(Serialize, Deserialize, Clone)]
struct ListResponse {
    records: Vec<Value>,
    total: i64,
    #[serde(rename = "hasMore")]
    has_more: bool,
}

#[derive(Serialize)]
struct WriteResponse {
    index: i64,
    name: String,
    path: String,
    hash: String,
    size: i64,
    #[serde(rename = "contentHash")]
    content_hash: String,
    #[serde(rename = "previousHash")]
    previous_hash: Option<String>,
}

impl From<&Record> for WriteResponse {
    fn from(r: &Record) -> Self {
        WriteResponse {
            index: r.index,
            name: r.name.clone(),
            path: r.path.clone(),
            hash: r.hash.clone(),
            size: r.size,
            content_hash: r.content_hash.clone(),
            previous_hash: r.previous_hash.clone(),
        }
    }
}

fn require_caller(req: &HttpRequest) -> Result<String, AppError> {
    caller_of(req).ok_or_else(|| AppError::new(ErrorKind::Unauthorized, "authentication required"))
}

async fn require_read(
    db: &PgPool,
    pod: &str,
    stream: &Stream,
    caller: Option<&str>,
) -> Result<Access, AppError> {
    let access = permissions::effective_access(db, pod, stream, caller).await?;
    if !access.read {
        return Err(AppError::new(ErrorKind::Forbidden, "read access denied"));
    }
    Ok(access)
}

async fn require_write(
    db: &PgPool,
    pod: &str,
    stream: &Stream,
    caller: Option<&str>,
) -> Result<Access, AppError> {
    let access = permissions::effective_access(db, pod, stream, caller).await?;
    if !access.write {
        return Err(AppError::new(ErrorKind::Forbidden, "write access denied"));
    }
    Ok(access)
}

/// Builds an actix response for a single record: a `302` to the blob
/// store when externally stored, otherwise the inline body with the
/// metadata headers from §4.G.
fn record_response(record: &Record, blobs: &BlobStore, pod: &str, stream_path: &str, max_age: u32) -> HttpResponse {
    if let Some(storage) = &record.storage {
        let url = storage.get("url").and_then(|u| u.as_str()).unwrap_or_default();
        let mut builder = HttpResponse::Found();
        builder.insert_header((LOCATION, url));
        builder.insert_header((CACHE_CONTROL, format!("max-age={}", max_age)));
        for (k, v) in router::record_header_pairs(record) {
            if let Ok(name) = HeaderName::from_str(&k) {
                builder.insert_header((name, v));
            }
        }
        let _ = (blobs, pod, stream_path);
        return builder.finish();
    }

    let mut builder = HttpResponse::Ok();
    builder.insert_header((CONTENT_TYPE, record.content_type.clone()));
    for (k, v) in router::record_header_pairs(record) {
        if let Ok(name) = HeaderName::from_str(&k) {
            builder.insert_header((name, v));
        }
    }
    builder.body(record.content.clone())
}

fn list_options(query: &ReadQuery, default_limit: i64, max_limit: i64) -> ListOptions {
    ListOptions {
        limit: query.limit.unwrap_or(default_limit).clamp(1, max_limit),
        after: query.after,
        fields: query.fields_vec(),
        max_content_size: query.max_content_size,
    }
}

#[get("/{tail:.*}")]
pub async fn get_content(
    req: HttpRequest,
    tail: web::Path<String>,
    query: web::Query<ReadQuery>,
    db: web::Data<PgPool>,
    cache: web::Data<Cache>,
    blobs: web::Data<BlobStore>,
    config: web::Data<AppConfig>,
) -> Result<HttpResponse, AppError> {
    let pod = router::pod_from_host(&req, &config)?;
    let caller = caller_of(&req);
    let raw_path = tail.into_inner();

    let route = router::resolve_route(&db, &pod, &raw_path).await?;
    let index_spec = route.index_override.or_else(|| query.i.clone());

    if let Some(raw_spec) = index_spec {
        if query.wants_list() {
            return Err(AppError::new(ErrorKind::InvalidInput, "'i' cannot be combined with paging parameters"));
        }
        let resolved = resolver::resolve_for_indexed_read(&db, &pod, &route.path).await?;
        let stream = streams::get_stream_by_path(&db, &pod, &resolved.stream_path)
            .await?
            .ok_or_else(|| AppError::new(ErrorKind::StreamNotFound, "stream not found"))?;
        require_read(&db, &pod, &stream, caller.as_deref()).await?;

        let spec = records::parse_index_spec(&raw_spec)?;
        let recs = records::get_records_by_index(&db, stream.id, spec).await?;
        return Ok(match (spec, recs.as_slice()) {
            (IndexSpec::Single(_), [record]) => {
                record_response(record, &blobs, &pod, &stream.path, config.blob_redirect_max_age())
            }
            _ => {
                let total = recs.len() as i64;
                let records = recs
                    .iter()
                    .map(|r| serde_json::to_value(r).expect("Record always serializes"))
                    .collect();
                HttpResponse::Ok().json(ListResponse { records, total, has_more: false })
            }
        });
    }

    if query.unique.unwrap_or(false) && query.recursive.unwrap_or(false) {
        return Err(AppError::new(ErrorKind::InvalidInput, "'unique' cannot be combined with 'recursive'"));
    }

    if query.wants_list() {
        let resolved = resolver::resolve_for_indexed_read(&db, &pod, &route.path).await?;
        let stream = streams::get_stream_by_path(&db, &pod, &resolved.stream_path)
            .await?
            .ok_or_else(|| AppError::new(ErrorKind::StreamNotFound, "stream not found"))?;
        require_read(&db, &pod, &stream, caller.as_deref()).await?;
        return list_response(&db, &cache, &pod, &stream, &query, caller.as_deref(), config.list_default_limit(), config.list_max_limit())
            .await;
    }

    let resolved = resolver::resolve_for_read(&db, &pod, &route.path).await?;
    let stream = streams::get_stream_by_path(&db, &pod, &resolved.stream_path)
        .await?
        .ok_or_else(|| AppError::new(ErrorKind::StreamNotFound, "stream not found"))?;
    require_read(&db, &pod, &stream, caller.as_deref()).await?;

    match resolved.record_name {
        Some(name) => {
            let cache_key = format!("{}/{}/{}", pod, stream.path.trim_start_matches('/'), name);
            if let Some(cached) = cache.get::<Record>(CachePool::SingleRecords, &cache_key).await {
                return Ok(record_response(&cached, &blobs, &pod, &stream.path, config.blob_redirect_max_age()));
            }
            let record = records::get_record_by_name(&db, stream.id, &name, false).await?;
            cache.set(CachePool::SingleRecords, &cache_key, &record, None).await;
            Ok(record_response(&record, &blobs, &pod, &stream.path, config.blob_redirect_max_age()))
        }
        None => {
            list_response(&db, &cache, &pod, &stream, &query, caller.as_deref(), config.list_default_limit(), config.list_max_limit())
                .await
        }
    }
}

/// The stream itself plus every descendant whose path falls under it,
/// narrowed to the ones `caller` may actually read — mirrors the
/// access-filtering `catalog::list_streams` does over the same prefix
/// helper.
async fn recursive_stream_ids(
    db: &PgPool,
    pod: &str,
    stream: &Stream,
    caller: Option<&str>,
) -> Result<Vec<i64>, AppError> {
    let candidates = streams::get_streams_with_prefix(db, pod, &stream.path).await?;
    let mut ids = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if permissions::effective_access(db, pod, &candidate, caller).await?.read {
            ids.push(candidate.id);
        }
    }
    Ok(ids)
}

async fn list_response(
    db: &PgPool,
    cache: &Cache,
    pod: &str,
    stream: &Stream,
    query: &ReadQuery,
    caller: Option<&str>,
    default_limit: i64,
    max_limit: i64,
) -> Result<HttpResponse, AppError> {
    let opts = list_options(query, default_limit, max_limit);
    let cache_key = format!(
        "{}/{}?limit={}&after={:?}&unique={:?}&recursive={:?}&fields={:?}",
        pod,
        stream.path.trim_start_matches('/'),
        opts.limit,
        opts.after,
        query.unique,
        query.recursive,
        query.fields
    );
    if let Some(cached) = cache.get::<ListResponse>(CachePool::RecordLists, &cache_key).await {
        return Ok(HttpResponse::Ok().json(cached));
    }

    let page = if query.recursive.unwrap_or(false) {
        let stream_ids = recursive_stream_ids(db, pod, stream, caller).await?;
        records::list_records_recursive(db, &stream_ids, &opts).await?
    } else if query.unique.unwrap_or(false) {
        records::list_unique_records(db, stream.id, &opts).await?
    } else {
        records::list_records(db, stream.id, &opts).await?
    };
    let response = ListResponse { records: page.records, total: page.total, has_more: page.has_more };
    cache.set(CachePool::RecordLists, &cache_key, &response, None).await;
    Ok(HttpResponse::Ok().json(response))
}

fn classify_storage(content_type: &str, force_external: bool) -> bool {
    force_external || BINARY_TYPE_PREFIXES.iter().any(|p| content_type.starts_with(p))
}

/// `get_or_create_stream` has no notion of who may create a stream — it
/// will happily mint one for whoever writes to it first, and that first
/// writer becomes its creator with full access. That's the right default
/// for ordinary content, but a `.config`-rooted path must stay owner-only
/// from the moment it's created; otherwise any caller could create, say,
/// `/.config/permissions/docs` themselves and grant themselves access as
/// its "creator". Only gates *creation*: writes to a `.config` stream that
/// already exists are governed by `effective_access` as usual.
async fn require_owner_for_new_system_stream(
    db: &PgPool,
    pod: &str,
    caller: &str,
    stream_path: &str,
) -> Result<(), AppError> {
    if !streams::is_system_path(&streams::split_path(stream_path)) {
        return Ok(());
    }
    if streams::get_stream_by_path(db, pod, stream_path).await?.is_some() {
        return Ok(());
    }
    let owner = pods::get_pod_owner(db, pod).await?;
    if owner.as_deref() != Some(caller) {
        return Err(AppError::new(ErrorKind::Forbidden, "only the pod owner may create a stream under .config"));
    }
    Ok(())
}

fn collect_custom_headers(req: &HttpRequest) -> Value {
    let mut map = serde_json::Map::new();
    for (name, value) in req.headers() {
        let name = name.as_str().to_lowercase();
        if let Some(key) = name.strip_prefix(HEADER_PREFIX) {
            if ALLOWED_CUSTOM_HEADERS.contains(&key) {
                if let Ok(v) = value.to_str() {
                    map.insert(key.to_string(), Value::String(v.to_string()));
                }
            }
        }
    }
    Value::Object(map)
}

#[post("/{tail:.*}")]
pub async fn post_content(
    req: HttpRequest,
    tail: web::Path<String>,
    query: web::Query<WriteQuery>,
    body: web::Bytes,
    db: web::Data<PgPool>,
    cache: web::Data<Cache>,
    blobs: web::Data<BlobStore>,
    config: web::Data<AppConfig>,
) -> Result<HttpResponse, AppError> {
    let pod = router::pod_from_host(&req, &config)?;
    let caller = require_caller(&req)?;
    let raw_path = tail.into_inner();
    let segments = resolver::resolve_for_write(&raw_path)?;
    let normalized_path = format!("/{}", segments.join("/"));

    match normalized_path.as_str() {
        "/.config/owner" => {
            let payload: Value = serde_json::from_slice(&body)
                .map_err(|e| AppError::new(ErrorKind::InvalidInput, e.to_string()))?;
            let new_owner = payload
                .get("userId")
                .and_then(|v| v.as_str())
                .ok_or_else(|| AppError::new(ErrorKind::InvalidInput, "userId is required"))?;
            config_streams::transfer_ownership(&db, &pod, &caller, new_owner).await?;
            cache.invalidate_for_pod_config_change(&pod).await;
            return Ok(HttpResponse::Created().finish());
        }
        "/.config/routing" => {
            let routes: std::collections::HashMap<String, String> = serde_json::from_slice(&body)
                .map_err(|e| AppError::new(ErrorKind::InvalidInput, e.to_string()))?;
            config_streams::write_routing(&db, &pod, &caller, routes).await?;
            cache.invalidate_for_pod_config_change(&pod).await;
            return Ok(HttpResponse::Created().finish());
        }
        "/.config/domains" => {
            let payload: Value = serde_json::from_slice(&body)
                .map_err(|e| AppError::new(ErrorKind::InvalidInput, e.to_string()))?;
            let domain = payload
                .get("domain")
                .and_then(|v| v.as_str())
                .ok_or_else(|| AppError::new(ErrorKind::InvalidInput, "domain is required"))?;
            let action = payload.get("action").and_then(|v| v.as_str()).unwrap_or("add");
            config_streams::record_domain_action(&db, &pod, &caller, domain, action).await?;
            cache.invalidate_for_pod_config_change(&pod).await;
            return Ok(HttpResponse::Created().finish());
        }
        _ => {}
    }

    if body.is_empty() {
        require_owner_for_new_system_stream(&db, &pod, &caller, &normalized_path).await?;
        let stream = streams::get_or_create_stream(&db, &pod, &normalized_path, &caller, query.access.as_deref()).await?;
        cache.invalidate_for_stream_change(&pod).await;
        return Ok(HttpResponse::Created().json(serde_json::json!({
            "id": stream.id,
            "path": stream.path,
            "accessPermission": stream.access_permission,
        })));
    }

    if segments.len() < 2 {
        return Err(AppError::new(ErrorKind::InvalidPath, "a record write needs a stream path and a record name"));
    }
    let (stream_segments, last) = segments.split_at(segments.len() - 1);
    let record_name = &last[0];
    resolver::validate_record_name(record_name)?;
    let stream_path = format!("/{}", stream_segments.join("/"));

    require_owner_for_new_system_stream(&db, &pod, &caller, &stream_path).await?;
    let stream = streams::get_or_create_stream(&db, &pod, &stream_path, &caller, query.access.as_deref()).await?;
    require_write(&db, &pod, &stream, Some(&caller)).await?;

    if stream.name == ".config" && record_name == "schema" {
        if let Some(parent_path) = stream_path.strip_suffix("/.config") {
            let parent_path = if parent_path.is_empty() { "/" } else { parent_path };
            let schema_config: SchemaConfig = serde_json::from_slice(&body)
                .map_err(|e| AppError::new(ErrorKind::InvalidInput, e.to_string()))?;
            config_streams::write_schema(&db, &pod, parent_path, &caller, &schema_config).await?;
            cache.invalidate_for_stream_change(&pod).await;
            return Ok(HttpResponse::Created().finish());
        }
    }

    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    let forced_file = req
        .headers()
        .get("x-record-type")
        .and_then(|h| h.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("file"))
        .unwrap_or(false);

    if let Some(schema) = config_streams::get_schema(&db, &pod, &stream_path).await? {
        if content_type.starts_with("application/json") {
            if let Ok(parsed) = serde_json::from_slice::<Value>(&body) {
                config_streams::validate_against_schema(&schema, &parsed)?;
            }
        }
    }

    let headers = collect_custom_headers(&req);
    let external = if classify_storage(&content_type, forced_file) {
        let put = blobs.put(&pod, &stream.path, record_name, &body)?;
        Some(ExternalBlobRef { hash: put.hash, size: put.size, url: put.url })
    } else {
        None
    };

    let record = records::append_record(
        &db,
        AppendInput {
            stream_id: stream.id,
            stream_path: &stream.path,
            author: &caller,
            name: record_name,
            content_bytes: &body,
            content_type: &content_type,
            headers,
            external_blob: external,
            deleted: false,
        },
    )
    .await?;

    cache.invalidate_for_append(&pod, &stream.path).await;
    Ok(HttpResponse::Created().json(WriteResponse::from(&record)))
}

#[delete("/{tail:.*}")]
pub async fn delete_content(
    req: HttpRequest,
    tail: web::Path<String>,
    query: web::Query<DeleteQuery>,
    db: web::Data<PgPool>,
    cache: web::Data<Cache>,
    blobs: web::Data<BlobStore>,
    config: web::Data<AppConfig>,
) -> Result<HttpResponse, AppError> {
    let pod = router::pod_from_host(&req, &config)?;
    let caller = require_caller(&req)?;
    let raw_path = tail.into_inner();
    let resolved = resolver::resolve_for_read(&db, &pod, &raw_path).await?;
    let stream = streams::get_stream_by_path(&db, &pod, &resolved.stream_path)
        .await?
        .ok_or_else(|| AppError::new(ErrorKind::StreamNotFound, "stream not found"))?;

    match resolved.record_name {
        Some(name) => {
            require_write(&db, &pod, &stream, Some(&caller)).await?;
            if query.purge.unwrap_or(false) {
                let record = records::purge_record(&db, stream.id, &name, &caller).await?;
                if record.storage.is_some() {
                    blobs.purge(&pod, &stream.path, &record.content_hash)?;
                }
                blobs.soft_delete(&pod, &stream.path, &name)?;
            } else {
                records::soft_delete_record(&db, stream.id, &stream.path, &name, &caller).await?;
                blobs.soft_delete(&pod, &stream.path, &name)?;
            }
            cache.invalidate_for_append(&pod, &stream.path).await;
            Ok(HttpResponse::NoContent().finish())
        }
        None => {
            streams::delete_stream(&db, &pod, stream.id, &caller).await?;
            cache.invalidate_for_stream_change(&pod).await;
            Ok(HttpResponse::NoContent().finish())
        }
    }
}

pub fn setup_controllers(cfg: &mut web::ServiceConfig) {
    cfg.service(get_content).service(post_content).service(delete_content);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pods;
    use crate::tests::utils::{claims, perform_integration_test, test_app_config, test_blob_store, test_cache, WebData};
    use actix_web::http::StatusCode;
    use actix_web::test::TestRequest;

    fn web_data(db: &PgPool, blobs: &BlobStore, sub: &str) -> WebData {
        WebData {
            config: Some(test_app_config()),
            db: Some(db.clone()),
            cache: Some(test_cache()),
            blobs: Some(blobs.clone()),
            auth: Some(claims(sub)),
        }
    }

    fn anon(db: &PgPool, blobs: &BlobStore) -> WebData {
        WebData { auth: None, ..web_data(db, blobs, "") }
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn write_then_read_reflects_the_new_record(pool: PgPool) {
        pods::create_pod(&pool, "acme", "owner1").await.unwrap();
        let (blobs, _dir) = test_blob_store();

        let write = perform_integration_test(
            post_content,
            TestRequest::post()
                .uri("/notes/first")
                .insert_header(("host", "acme.webpods.test"))
                .insert_header(("content-type", "text/plain"))
                .set_payload("hello world"),
            web_data(&pool, &blobs, "owner1"),
        )
        .await;
        assert_eq!(write.status, StatusCode::CREATED);
        let body = write.body.unwrap();
        assert_eq!(body["index"].as_i64(), Some(0));
        assert_eq!(body["name"].as_str(), Some("first"));
        assert!(body["previousHash"].is_null());

        let read = perform_integration_test(
            get_content,
            TestRequest::get().uri("/notes/first").insert_header(("host", "acme.webpods.test")),
            anon(&pool, &blobs),
        )
        .await;
        assert_eq!(read.status, StatusCode::OK);
        assert_eq!(read.body_bytes, web::Bytes::from_static(b"hello world"));
        assert_eq!(read.headers.get("x-index").unwrap(), "0");
        assert!(read.headers.get("x-previous-hash").is_none());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn negative_after_returns_the_last_k_records(pool: PgPool) {
        pods::create_pod(&pool, "acme", "owner1").await.unwrap();
        let (blobs, _dir) = test_blob_store();

        for i in 0..10 {
            let resp = perform_integration_test(
                post_content,
                TestRequest::post()
                    .uri(&format!("/log/r{i}"))
                    .insert_header(("host", "acme.webpods.test"))
                    .insert_header(("content-type", "text/plain"))
                    .set_payload(format!("entry {i}")),
                web_data(&pool, &blobs, "owner1"),
            )
            .await;
            assert_eq!(resp.status, StatusCode::CREATED);
        }

        let page = perform_integration_test(
            get_content,
            TestRequest::get().uri("/log?after=-3").insert_header(("host", "acme.webpods.test")),
            anon(&pool, &blobs),
        )
        .await;
        assert_eq!(page.status, StatusCode::OK);
        let body = page.body.unwrap();
        assert_eq!(body["total"].as_i64(), Some(10));
        assert_eq!(body["hasMore"].as_bool(), Some(false));
        let records = body["records"].as_array().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0]["name"].as_str(), Some("r7"));
        assert_eq!(records[2]["name"].as_str(), Some("r9"));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn unique_view_hides_a_tombstoned_name(pool: PgPool) {
        pods::create_pod(&pool, "acme", "owner1").await.unwrap();
        let (blobs, _dir) = test_blob_store();
        let data = web_data(&pool, &blobs, "owner1");

        for content in ["v1", "v2"] {
            let resp = perform_integration_test(
                post_content,
                TestRequest::post()
                    .uri("/items/x")
                    .insert_header(("host", "acme.webpods.test"))
                    .insert_header(("content-type", "text/plain"))
                    .set_payload(content),
                data.clone(),
            )
            .await;
            assert_eq!(resp.status, StatusCode::CREATED);
        }

        let delete = perform_integration_test(
            delete_content,
            TestRequest::delete().uri("/items/x").insert_header(("host", "acme.webpods.test")),
            data.clone(),
        )
        .await;
        assert_eq!(delete.status, StatusCode::NO_CONTENT);

        let unique = perform_integration_test(
            get_content,
            TestRequest::get().uri("/items?unique=true").insert_header(("host", "acme.webpods.test")),
            anon(&pool, &blobs),
        )
        .await;
        let body = unique.body.unwrap();
        assert_eq!(body["total"].as_i64(), Some(0));

        let all = perform_integration_test(
            get_content,
            TestRequest::get().uri("/items?limit=100").insert_header(("host", "acme.webpods.test")),
            anon(&pool, &blobs),
        )
        .await;
        let body = all.body.unwrap();
        assert_eq!(body["total"].as_i64(), Some(3));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn permission_stream_grants_then_revokes_write_access(pool: PgPool) {
        pods::create_pod(&pool, "acme", "owner1").await.unwrap();
        let (blobs, _dir) = test_blob_store();
        let owner = web_data(&pool, &blobs, "owner1");

        let create_stream = perform_integration_test(
            post_content,
            TestRequest::post()
                .uri("/docs?access=%2F.config%2Fpermissions%2Fdocs")
                .insert_header(("host", "acme.webpods.test")),
            owner.clone(),
        )
        .await;
        assert_eq!(create_stream.status, StatusCode::CREATED);

        let grant_read_only = perform_integration_test(
            post_content,
            TestRequest::post()
                .uri("/.config/permissions/docs/p1")
                .insert_header(("host", "acme.webpods.test"))
                .insert_header(("content-type", "application/json"))
                .set_payload(r#"{"userId":"u2","read":true,"write":false}"#),
            owner.clone(),
        )
        .await;
        assert_eq!(grant_read_only.status, StatusCode::CREATED);

        let u2_blocked = perform_integration_test(
            post_content,
            TestRequest::post()
                .uri("/docs/note")
                .insert_header(("host", "acme.webpods.test"))
                .insert_header(("content-type", "text/plain"))
                .set_payload("hi"),
            web_data(&pool, &blobs, "u2"),
        )
        .await;
        assert_eq!(u2_blocked.status, StatusCode::FORBIDDEN);

        let grant_write = perform_integration_test(
            post_content,
            TestRequest::post()
                .uri("/.config/permissions/docs/p2")
                .insert_header(("host", "acme.webpods.test"))
                .insert_header(("content-type", "application/json"))
                .set_payload(r#"{"userId":"u2","read":true,"write":true}"#),
            owner.clone(),
        )
        .await;
        assert_eq!(grant_write.status, StatusCode::CREATED);

        let u2_allowed = perform_integration_test(
            post_content,
            TestRequest::post()
                .uri("/docs/note")
                .insert_header(("host", "acme.webpods.test"))
                .insert_header(("content-type", "text/plain"))
                .set_payload("hi"),
            web_data(&pool, &blobs, "u2"),
        )
        .await;
        assert_eq!(u2_allowed.status, StatusCode::CREATED);

        let revoke = perform_integration_test(
            post_content,
            TestRequest::post()
                .uri("/.config/permissions/docs/p3")
                .insert_header(("host", "acme.webpods.test"))
                .insert_header(("content-type", "application/json"))
                .set_payload(r#"{"userId":"u2","deleted":true}"#),
            owner.clone(),
        )
        .await;
        assert_eq!(revoke.status, StatusCode::CREATED);

        let u2_blocked_again = perform_integration_test(
            post_content,
            TestRequest::post()
                .uri("/docs/note2")
                .insert_header(("host", "acme.webpods.test"))
                .insert_header(("content-type", "text/plain"))
                .set_payload("hi"),
            web_data(&pool, &blobs, "u2"),
        )
        .await;
        assert_eq!(u2_blocked_again.status, StatusCode::FORBIDDEN);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn single_hop_routing_rewrite(pool: PgPool) {
        pods::create_pod(&pool, "acme", "owner1").await.unwrap();
        let (blobs, _dir) = test_blob_store();
        let owner = web_data(&pool, &blobs, "owner1");

        let home = perform_integration_test(
            post_content,
            TestRequest::post()
                .uri("/site/home")
                .insert_header(("host", "acme.webpods.test"))
                .insert_header(("content-type", "text/html"))
                .set_payload("<html>Home</html>"),
            owner.clone(),
        )
        .await;
        assert_eq!(home.status, StatusCode::CREATED);

        let routing = perform_integration_test(
            post_content,
            TestRequest::post()
                .uri("/.config/routing")
                .insert_header(("host", "acme.webpods.test"))
                .insert_header(("content-type", "application/json"))
                .set_payload(r#"{"/":"site/home"}"#),
            owner.clone(),
        )
        .await;
        assert_eq!(routing.status, StatusCode::CREATED);

        let root = perform_integration_test(
            get_content,
            TestRequest::get().uri("/").insert_header(("host", "acme.webpods.test")),
            anon(&pool, &blobs),
        )
        .await;
        assert_eq!(root.status, StatusCode::OK);
        assert_eq!(root.body_bytes, web::Bytes::from_static(b"<html>Home</html>"));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn external_blob_redirects_and_dedupes_canonical_storage(pool: PgPool) {
        pods::create_pod(&pool, "acme", "owner1").await.unwrap();
        let (blobs, _dir) = test_blob_store();
        let owner = web_data(&pool, &blobs, "owner1");
        let payload = vec![7u8; 2048];

        let upload = perform_integration_test(
            post_content,
            TestRequest::post()
                .uri("/img/logo")
                .insert_header(("host", "acme.webpods.test"))
                .insert_header(("content-type", "application/octet-stream"))
                .insert_header(("x-record-type", "file"))
                .set_payload(payload.clone()),
            owner.clone(),
        )
        .await;
        assert_eq!(upload.status, StatusCode::CREATED);
        let first_hash = upload.body.unwrap()["contentHash"].as_str().unwrap().to_string();
        assert!(first_hash.starts_with("sha256:"));

        let redirect = perform_integration_test(
            get_content,
            TestRequest::get().uri("/img/logo").insert_header(("host", "acme.webpods.test")),
            anon(&pool, &blobs),
        )
        .await;
        assert_eq!(redirect.status, StatusCode::FOUND);
        let location = redirect.headers.get("location").unwrap().to_str().unwrap();
        assert_eq!(location, "https://acme.webpods.test/img/logo");
        assert_eq!(redirect.headers.get("cache-control").unwrap(), "max-age=3600");

        let second_upload = perform_integration_test(
            post_content,
            TestRequest::post()
                .uri("/img/logo2")
                .insert_header(("host", "acme.webpods.test"))
                .insert_header(("content-type", "application/octet-stream"))
                .insert_header(("x-record-type", "file"))
                .set_payload(payload),
            owner.clone(),
        )
        .await;
        assert_eq!(second_upload.status, StatusCode::CREATED);
        let second_hash = second_upload.body.unwrap()["contentHash"].as_str().unwrap().to_string();
        assert_eq!(first_hash, second_hash);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn recursive_listing_aggregates_descendant_streams(pool: PgPool) {
        pods::create_pod(&pool, "acme", "owner1").await.unwrap();
        let (blobs, _dir) = test_blob_store();
        let owner = web_data(&pool, &blobs, "owner1");

        for (path, name) in [
            ("/blog/post1", "post1"),
            ("/blog/comments/c1", "c1"),
            ("/blog/comments/c2", "c2"),
            ("/blog/comments/replies/r1", "r1"),
        ] {
            let resp = perform_integration_test(
                post_content,
                TestRequest::post()
                    .uri(path)
                    .insert_header(("host", "acme.webpods.test"))
                    .insert_header(("content-type", "text/plain"))
                    .set_payload(name),
                owner.clone(),
            )
            .await;
            assert_eq!(resp.status, StatusCode::CREATED, "writing {path}");
        }

        let flat = perform_integration_test(
            get_content,
            TestRequest::get().uri("/blog?limit=100").insert_header(("host", "acme.webpods.test")),
            anon(&pool, &blobs),
        )
        .await;
        assert_eq!(flat.body.unwrap()["total"].as_i64(), Some(1));

        let recursive = perform_integration_test(
            get_content,
            TestRequest::get().uri("/blog?recursive=true&limit=100").insert_header(("host", "acme.webpods.test")),
            anon(&pool, &blobs),
        )
        .await;
        assert_eq!(recursive.status, StatusCode::OK);
        let body = recursive.body.unwrap();
        assert_eq!(body["total"].as_i64(), Some(4));
        let names: Vec<&str> = body["records"].as_array().unwrap().iter().map(|r| r["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["post1", "c1", "c2", "r1"]);

        let conflicting = perform_integration_test(
            get_content,
            TestRequest::get().uri("/blog?unique=true&recursive=true").insert_header(("host", "acme.webpods.test")),
            anon(&pool, &blobs),
        )
        .await;
        assert_eq!(conflicting.status, StatusCode::BAD_REQUEST);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn a_non_owner_cannot_self_grant_write_to_a_config_stream(pool: PgPool) {
        pods::create_pod(&pool, "acme", "owner1").await.unwrap();
        let (blobs, _dir) = test_blob_store();

        let forged_grant = perform_integration_test(
            post_content,
            TestRequest::post()
                .uri("/.config/permissions/docs/self-grant")
                .insert_header(("host", "acme.webpods.test"))
                .insert_header(("content-type", "application/json"))
                .set_payload(r#"{"userId":"intruder","read":true,"write":true}"#),
            web_data(&pool, &blobs, "intruder"),
        )
        .await;
        assert_eq!(forged_grant.status, StatusCode::FORBIDDEN);
    }
}
