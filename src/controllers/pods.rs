use crate::blobstore::BlobStore;
use crate::db::models::Pod;
use crate::db::pods;
use crate::errors::{AppError, ErrorKind};
use crate::middlewares::auth::caller_of;
use actix_web::{delete, get, post, web, HttpRequest, HttpResponse, Responder};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use utoipa::{OpenApi, ToSchema};

#[derive(OpenApi)]
#[openapi(
    paths(create_pod, list_pods, delete_pod),
    components(schemas(CreatePodRequest, PodResponse))
)]
pub struct OpenApiSpec;

#[derive(Deserialize, ToSchema)]
pub struct CreatePodRequest {
    pub name: String,
}

#[derive(Serialize, ToSchema)]
pub struct PodResponse {
    pub name: String,
    pub metadata: serde_json::Value,
}

impl From<Pod> for PodResponse {
    fn from(pod: Pod) -> Self {
        PodResponse { name: pod.name, metadata: pod.metadata }
    }
}

fn require_caller(req: &HttpRequest) -> Result<String, AppError> {
    caller_of(req).ok_or_else(|| AppError::new(ErrorKind::Unauthorized, "authentication required"))
}

#[utoipa::path(
    post,
    path = "/api/pods",
    tag = "Pods",
    summary = "Create a pod",
    security(("Bearer" = [])),
    request_body = CreatePodRequest,
    responses((status = 201, body = PodResponse))
)]
#[post("/api/pods")]
pub async fn create_pod(
    req: HttpRequest,
    body: web::Json<CreatePodRequest>,
    db: web::Data<PgPool>,
) -> Result<impl Responder, AppError> {
    let caller = require_caller(&req)?;
    let pod = pods::create_pod(&db, &body.name, &caller).await?;
    Ok(HttpResponse::Created().json(PodResponse::from(pod)))
}

#[utoipa::path(
    get,
    path = "/api/pods",
    tag = "Pods",
    summary = "List pods owned by the caller",
    security(("Bearer" = [])),
    responses((status = 200, body = [PodResponse]))
)]
#[get("/api/pods")]
pub async fn list_pods(req: HttpRequest, db: web::Data<PgPool>) -> Result<impl Responder, AppError> {
    let caller = require_caller(&req)?;
    let pods = pods::list_user_pods(&db, &caller).await?;
    let pods: Vec<PodResponse> = pods.into_iter().map(PodResponse::from).collect();
    Ok(HttpResponse::Ok().json(pods))
}

#[utoipa::path(
    delete,
    path = "/api/pods/{name}",
    tag = "Pods",
    summary = "Delete a pod",
    security(("Bearer" = [])),
    responses((status = 204))
)]
#[delete("/api/pods/{name}")]
pub async fn delete_pod(
    req: HttpRequest,
    path: web::Path<String>,
    db: web::Data<PgPool>,
    blobs: web::Data<BlobStore>,
) -> Result<impl Responder, AppError> {
    let caller = require_caller(&req)?;
    let name = path.into_inner();
    purge_pod_blobs(&db, &blobs, &name).await;
    pods::delete_pod(&db, &name, &caller).await?;
    Ok(HttpResponse::NoContent().finish())
}

/// Best-effort: blob purge failures are logged, never block pod deletion —
/// the catalog row is the source of truth and is removed regardless.
async fn purge_pod_blobs(db: &PgPool, blobs: &BlobStore, pod: &str) {
    let rows: Vec<(String, serde_json::Value)> = sqlx::query_as(
        "select s.path, r.storage from records r
         join streams s on s.id = r.stream_id
         where s.pod_name = $1 and r.storage is not null",
    )
    .bind(pod)
    .fetch_all(db)
    .await
    .unwrap_or_default();

    for (stream_path, storage) in rows {
        if let Some(hash) = storage.get("hash").and_then(|h| h.as_str()) {
            if let Err(err) = blobs.purge(pod, &stream_path, hash) {
                tracing::warn!(pod, stream_path, "failed to purge blob during pod delete: {}", err);
            }
        }
    }
}

pub fn setup_controllers(cfg: &mut actix_web::web::ServiceConfig) {
    cfg.service(create_pod).service(list_pods).service(delete_pod);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::utils::{claims, perform_integration_test, test_app_config, test_blob_store, WebData};
    use actix_web::http::StatusCode;
    use actix_web::test::TestRequest;

    fn web_data(db: &PgPool, sub: &str) -> WebData {
        WebData { config: Some(test_app_config()), db: Some(db.clone()), cache: None, blobs: None, auth: Some(claims(sub)) }
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn create_pod_makes_the_caller_owner_and_rejects_a_duplicate_name(pool: PgPool) {
        let first = perform_integration_test(
            create_pod,
            TestRequest::post().uri("/api/pods").set_json(serde_json::json!({ "name": "acme" })),
            web_data(&pool, "owner1"),
        )
        .await;
        assert_eq!(first.status, StatusCode::CREATED);

        let dup = perform_integration_test(
            create_pod,
            TestRequest::post().uri("/api/pods").set_json(serde_json::json!({ "name": "acme" })),
            web_data(&pool, "owner2"),
        )
        .await;
        assert_eq!(dup.status, StatusCode::CONFLICT);
        assert_eq!(dup.body.unwrap()["error"]["code"], "POD_EXISTS");
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn list_pods_returns_only_the_callers_pods(pool: PgPool) {
        pods::create_pod(&pool, "acme", "owner1").await.unwrap();
        pods::create_pod(&pool, "globex", "owner2").await.unwrap();

        let listed = perform_integration_test(
            list_pods,
            TestRequest::get().uri("/api/pods"),
            web_data(&pool, "owner1"),
        )
        .await;
        assert_eq!(listed.status, StatusCode::OK);
        let body = listed.body.unwrap();
        let names: Vec<&str> = body.as_array().unwrap().iter().map(|p| p["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["acme"]);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn delete_pod_is_forbidden_for_a_non_owner(pool: PgPool) {
        pods::create_pod(&pool, "acme", "owner1").await.unwrap();
        let (blobs, _dir) = test_blob_store();

        let attempt = perform_integration_test(
            delete_pod,
            TestRequest::delete().uri("/api/pods/acme"),
            WebData { blobs: Some(blobs), ..web_data(&pool, "someone-else") },
        )
        .await;
        assert_eq!(attempt.status, StatusCode::FORBIDDEN);
        pods::get_pod(&pool, "acme").await.expect("pod must still exist");
    }
}
