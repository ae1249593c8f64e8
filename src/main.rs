use actix_cors::Cors;
use actix_web::{middleware::from_fn, web, App, HttpServer};
use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};
use utoipa_swagger_ui::SwaggerUi;

mod blobstore;
mod cache;
mod config;
mod config_streams;
mod controllers;
mod db;
mod errors;
mod hash;
mod jwt;
mod middlewares;
mod permissions;
mod resolver;
mod router;
#[cfg(test)]
mod tests;

use blobstore::BlobStore;
use cache::Cache;
use middlewares::{auth::auth_middleware, logging::logging_middleware, rate_limit::rate_limit_middleware};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let app_config = config::load_config().unwrap_or_else(|err| {
        tracing::error!("error loading config: {}", err);
        std::process::exit(1);
    });

    let mut docs = controllers::setup_docs();
    docs.components.as_mut().unwrap().security_schemes.insert(
        "Bearer".to_string(),
        SecurityScheme::Http(utoipa::openapi::security::Http::new(
            utoipa::openapi::security::HttpAuthScheme::Bearer,
        )),
    );
    docs.components.as_mut().unwrap().security_schemes.insert(
        "ApiKey".to_string(),
        SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("API-KEY"))),
    );
    docs.info.title = "WebPods".to_string();
    docs.info.description =
        Some("Multi-tenant, append-only, content-addressed record store served over per-pod subdomains.".to_string());
    docs.info.version = "1.0.0".to_string();
    docs.servers = Some(vec![utoipa::openapi::Server::new(app_config.host())]);

    let db_pool = db::setup_database(&app_config.database_url).await.unwrap_or_else(|err| {
        tracing::error!("error setting up database: {}", err);
        std::process::exit(1);
    });

    let redis_pool = cache::setup_cache(&app_config.redis_url).unwrap_or_else(|err| {
        tracing::error!("error setting up cache: {}", err);
        std::process::exit(1);
    });
    let cache = Cache::new(redis_pool.clone());

    let blobs = BlobStore::new(app_config.blob_storage_location(), app_config.blob_url_template());

    tracing::info!(port = app_config.port(), "starting server");
    let port = app_config.port();
    let enable_swagger = app_config.enable_swagger();

    HttpServer::new(move || {
        let mut app = App::new()
            .app_data(web::Data::new(app_config.clone()))
            .app_data(web::Data::new(db_pool.clone()))
            .app_data(web::Data::new(cache.clone()))
            .app_data(web::Data::new(redis_pool.clone()))
            .app_data(web::Data::new(blobs.clone()))
            .wrap(Cors::permissive())
            .wrap(from_fn(logging_middleware))
            .wrap(from_fn(auth_middleware))
            .wrap(from_fn(rate_limit_middleware));

        if enable_swagger {
            app = app.service(
                SwaggerUi::new("/swagger/{_:.*}").url("/api-docs/openapi.json", docs.clone()),
            );
        }

        app.configure(controllers::setup_system_controllers)
            .configure(controllers::content::setup_controllers)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
