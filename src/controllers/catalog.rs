use crate::db::streams::{self, ListStreamsOptions};
use crate::errors::AppError;
use crate::middlewares::auth::caller_of;
use crate::permissions;
use actix_web::{get, web, HttpRequest, HttpResponse, Responder};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

#[derive(Deserialize)]
pub struct CatalogQuery {
    pub path: Option<String>,
    pub recursive: Option<bool>,
    #[serde(rename = "includeRecordCounts")]
    pub include_record_counts: Option<bool>,
    #[serde(rename = "includeHashes")]
    pub include_hashes: Option<bool>,
}

#[derive(Serialize)]
pub struct StreamView {
    pub id: i64,
    pub name: String,
    pub path: String,
    #[serde(rename = "accessPermission")]
    pub access_permission: String,
    #[serde(rename = "hasSchema")]
    pub has_schema: bool,
    #[serde(rename = "recordCount", skip_serializing_if = "Option::is_none")]
    pub record_count: Option<i64>,
    #[serde(rename = "lastHash", skip_serializing_if = "Option::is_none")]
    pub last_hash: Option<String>,
    #[serde(rename = "hashChainValid", skip_serializing_if = "Option::is_none")]
    pub hash_chain_valid: Option<bool>,
}

/// Resolves the requesting pod from the Host header the same way the
/// content router does; this endpoint lives under the reserved
/// `/.config/api/streams` system path on every pod host.
#[get("/.config/api/streams")]
pub async fn list_streams(
    req: HttpRequest,
    query: web::Query<CatalogQuery>,
    db: web::Data<PgPool>,
    config: web::Data<crate::config::AppConfig>,
) -> Result<impl Responder, AppError> {
    let pod = crate::router::pod_from_host(&req, &config)?;
    let caller = caller_of(&req);

    let opts = ListStreamsOptions {
        path_prefix: query.path.clone(),
        recursive: query.recursive.unwrap_or(false),
    };
    let all = streams::list_streams(&db, &pod, &opts).await?;

    let mut views = Vec::with_capacity(all.len());
    for stream in all {
        let access = permissions::effective_access(&db, &pod, &stream, caller.as_deref()).await?;
        if !access.read {
            continue;
        }
        let record_count = if query.include_record_counts.unwrap_or(false) {
            Some(streams::record_count(&db, stream.id).await?)
        } else {
            None
        };
        let (last_hash, hash_chain_valid) = if query.include_hashes.unwrap_or(false) {
            let (hash, valid) = streams::hash_chain_status(&db, stream.id).await?;
            (hash, Some(valid))
        } else {
            (None, None)
        };
        views.push(StreamView {
            id: stream.id,
            name: stream.name,
            path: stream.path,
            access_permission: stream.access_permission,
            has_schema: stream.has_schema,
            record_count,
            last_hash,
            hash_chain_valid,
        });
    }

    Ok(HttpResponse::Ok().json(views))
}

pub fn setup_controllers(cfg: &mut actix_web::web::ServiceConfig) {
    cfg.service(list_streams);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pods;
    use crate::db::records::{append_record, AppendInput};
    use crate::tests::utils::{claims, perform_integration_test, test_app_config, WebData};
    use actix_web::http::StatusCode;
    use actix_web::test::TestRequest;

    #[sqlx::test(migrations = "./migrations")]
    async fn lists_streams_with_record_counts_and_hashes_when_requested(pool: PgPool) {
        pods::create_pod(&pool, "acme", "owner1").await.unwrap();
        let stream = streams::get_or_create_stream(&pool, "acme", "/notes", "owner1", None).await.unwrap();
        for i in 0..3 {
            append_record(
                &pool,
                AppendInput {
                    stream_id: stream.id,
                    stream_path: "/notes",
                    author: "owner1",
                    name: &format!("n{i}"),
                    content_bytes: b"hello",
                    content_type: "text/plain",
                    headers: serde_json::json!({}),
                    external_blob: None,
                    deleted: false,
                },
            )
            .await
            .unwrap();
        }

        let bare = perform_integration_test(
            list_streams,
            TestRequest::get().uri("/.config/api/streams").insert_header(("Host", "acme.webpods.test")),
            WebData { config: Some(test_app_config()), db: Some(pool.clone()), auth: Some(claims("owner1")), ..Default::default() },
        )
        .await;
        assert_eq!(bare.status, StatusCode::OK);
        let views = bare.body.unwrap();
        let notes = views.as_array().unwrap().iter().find(|v| v["path"] == "/notes").unwrap();
        assert!(notes.get("recordCount").is_none());
        assert!(notes.get("lastHash").is_none());

        let enriched = perform_integration_test(
            list_streams,
            TestRequest::get()
                .uri("/.config/api/streams?includeRecordCounts=true&includeHashes=true")
                .insert_header(("Host", "acme.webpods.test")),
            WebData { config: Some(test_app_config()), db: Some(pool.clone()), auth: Some(claims("owner1")), ..Default::default() },
        )
        .await;
        assert_eq!(enriched.status, StatusCode::OK);
        let views = enriched.body.unwrap();
        let notes = views.as_array().unwrap().iter().find(|v| v["path"] == "/notes").unwrap();
        assert_eq!(notes["recordCount"], 3);
        assert_eq!(notes["hashChainValid"], true);
        assert!(notes["lastHash"].is_string());
    }
}
