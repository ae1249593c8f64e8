use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    /// REQUIRED
    /// connection string for the catalog database
    pub database_url: String,
    /// connection string for the cache
    pub redis_url: String,
    /// secret used to verify bearer tokens issued by the (external) auth server
    pub jwt_secret: String,
    /// apex domain pods are served under, e.g. "webpods.example"
    pub apex_domain: String,

    /// OPTIONAL
    /// pod served when the request host is the bare apex, defaults to none
    pub root_pod: Option<String>,
    /// the current address of the server, defaults to http://localhost:3000
    pub host: Option<String>,
    /// port to run the server on, defaults to 3000
    pub port: Option<u16>,
    /// root directory for the blob store, defaults to '.webpods-blobs'
    pub blob_storage_location: Option<String>,
    /// URL template for blob redirects, placeholders {pod} {stream_path} {record_name}
    pub blob_url_template: Option<String>,
    /// cache-control max-age applied to blob redirects, defaults to 3600
    pub blob_redirect_max_age: Option<u32>,
    /// enable the swagger UI for system endpoints, defaults to false
    pub enable_swagger: Option<bool>,
    /// defaults to 100 records per list page
    pub list_default_limit: Option<i64>,
    /// hard cap on `limit` regardless of what the caller asks for
    pub list_max_limit: Option<i64>,
    /// defaults to 100 requests
    pub rate_limit_max_requests: Option<i64>,
    /// defaults to 60 seconds
    pub rate_limit_window_seconds: Option<i64>,
}

impl AppConfig {
    pub fn root_pod(&self) -> Option<&str> {
        self.root_pod.as_deref()
    }

    pub fn host(&self) -> String {
        self.host.clone().unwrap_or_else(|| "http://localhost:3000".to_string())
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(3000)
    }

    pub fn blob_storage_location(&self) -> String {
        self.blob_storage_location.clone().unwrap_or_else(|| ".webpods-blobs".to_string())
    }

    pub fn blob_url_template(&self) -> String {
        self.blob_url_template.clone().unwrap_or_else(|| {
            format!("https://{{pod}}.{}/{{stream_path}}/{{record_name}}", self.apex_domain)
        })
    }

    pub fn blob_redirect_max_age(&self) -> u32 {
        self.blob_redirect_max_age.unwrap_or(3600)
    }

    pub fn enable_swagger(&self) -> bool {
        self.enable_swagger.unwrap_or(false)
    }

    pub fn list_default_limit(&self) -> i64 {
        self.list_default_limit.unwrap_or(100)
    }

    pub fn list_max_limit(&self) -> i64 {
        self.list_max_limit.unwrap_or(1000)
    }

    pub fn rate_limit_max_requests(&self) -> i64 {
        self.rate_limit_max_requests.unwrap_or(100)
    }

    pub fn rate_limit_window_seconds(&self) -> i64 {
        self.rate_limit_window_seconds.unwrap_or(60)
    }
}

pub fn load_config() -> Result<AppConfig, config::ConfigError> {
    dotenvy::dotenv().ok();

    let settings = Config::builder()
        .set_default("port", 3000)?
        .add_source(File::with_name(".env").required(false))
        .add_source(Environment::default())
        .build()?;

    settings.try_deserialize()
}
