use actix_web::{get, HttpResponse, Responder};
use serde::Serialize;
use utoipa::{OpenApi, ToSchema};

#[derive(OpenApi)]
#[openapi(paths(health_check), components(schemas(HealthCheckResponse)))]
pub struct OpenApiSpec;

#[derive(Serialize, ToSchema)]
pub struct HealthCheckResponse {
    pub status: String,
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "System",
    summary = "Health check",
    responses((status = 200, body = HealthCheckResponse))
)]
#[get("/health")]
pub async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(HealthCheckResponse { status: "ok".to_string() })
}

pub fn setup_controllers(cfg: &mut actix_web::web::ServiceConfig) {
    cfg.service(health_check);
}
