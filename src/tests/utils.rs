//! Shared integration-test scaffolding, grounded on the teacher's
//! `tests/utils.rs` (`WebData`/`perform_integration_test`), adapted from a
//! Mongo-backed `WebData{db}` to this crate's Postgres pool, Redis-backed
//! cache, and filesystem blob store. Handlers are exercised directly
//! through `actix_web::test`, bypassing the auth/rate-limit middlewares
//! the same way the teacher's harness does: a caller's claims are
//! inserted straight into the request extensions rather than minted and
//! verified as a real bearer token.

use crate::blobstore::BlobStore;
use crate::cache::Cache;
use crate::config::AppConfig;
use crate::jwt::AccessTokenClaims;
use actix_web::{
    dev::HttpServiceFactory,
    http::{header::HeaderMap, StatusCode},
    test::{self, TestRequest},
    web, App, HttpMessage,
};
use sqlx::PgPool;

#[derive(Clone, Default)]
pub struct WebData {
    pub config: Option<AppConfig>,
    pub db: Option<PgPool>,
    pub cache: Option<Cache>,
    pub blobs: Option<BlobStore>,
    pub auth: Option<AccessTokenClaims>,
}

pub struct IntegrationTestResponse {
    pub status: StatusCode,
    pub body: Option<serde_json::Value>,
    pub body_bytes: web::Bytes,
    pub headers: HeaderMap,
}

pub async fn perform_integration_test<C>(
    controller: C,
    req: TestRequest,
    web_data: WebData,
) -> IntegrationTestResponse
where
    C: HttpServiceFactory + 'static,
{
    let mut app_builder = web::scope("");
    if let Some(config) = web_data.config {
        app_builder = app_builder.app_data(web::Data::new(config));
    }
    if let Some(db) = web_data.db {
        app_builder = app_builder.app_data(web::Data::new(db));
    }
    if let Some(cache) = web_data.cache {
        app_builder = app_builder.app_data(web::Data::new(cache));
    }
    if let Some(blobs) = web_data.blobs {
        app_builder = app_builder.app_data(web::Data::new(blobs));
    }

    let app = test::init_service(App::new().service(app_builder.service(controller))).await;

    let mut request = req.to_request();
    if let Some(auth) = web_data.auth {
        request.extensions_mut().insert(auth);
    }

    let res = test::call_service(&app, request).await;
    let status = res.status();
    let headers = res.headers().clone();
    let body_bytes = test::read_body(res).await;
    let body = serde_json::from_slice(&body_bytes).ok();

    IntegrationTestResponse { status, body, body_bytes, headers }
}

/// Claims for a caller authenticated as `sub`, far from expiry.
pub fn claims(sub: &str) -> AccessTokenClaims {
    AccessTokenClaims { sub: sub.to_string(), exp: 9_999_999_999, pod: None }
}

pub fn test_app_config() -> AppConfig {
    AppConfig {
        database_url: String::new(),
        redis_url: "redis://127.0.0.1:1/0".to_string(),
        jwt_secret: "test-secret".to_string(),
        apex_domain: "webpods.test".to_string(),
        root_pod: None,
        host: None,
        port: None,
        blob_storage_location: None,
        blob_url_template: Some("https://{pod}.webpods.test/{stream_path}/{record_name}".to_string()),
        blob_redirect_max_age: None,
        enable_swagger: None,
        list_default_limit: None,
        list_max_limit: None,
        rate_limit_max_requests: None,
        rate_limit_window_seconds: None,
    }
}

/// A `Cache` pointed at a port nothing listens on. Every `get`/`set`
/// degrades to a miss/no-op exactly as it would against a down Redis in
/// production, which is the behavior these tests want: they exercise the
/// catalog logic, not the cache's own round-trip (that's covered in
/// `cache.rs`'s unit tests against a real pool).
pub fn test_cache() -> Cache {
    let pool = crate::cache::setup_cache("redis://127.0.0.1:1/0").expect("pool construction is lazy, never connects eagerly");
    Cache::new(pool)
}

pub fn test_blob_store() -> (BlobStore, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = BlobStore::new(dir.path(), "https://{pod}.webpods.test/{stream_path}/{record_name}");
    (store, dir)
}
