pub mod catalog;
pub mod content;
pub mod health;
pub mod pods;

use actix_web::web;
use utoipa::OpenApi;

pub fn setup_system_controllers(cfg: &mut web::ServiceConfig) {
    health::setup_controllers(cfg);
    pods::setup_controllers(cfg);
    catalog::setup_controllers(cfg);
}

pub fn setup_docs() -> utoipa::openapi::OpenApi {
    let mut openapi = utoipa::openapi::OpenApi::default();
    openapi.merge(health::OpenApiSpec::openapi());
    openapi.merge(pods::OpenApiSpec::openapi());
    openapi
}
