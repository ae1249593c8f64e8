use crate::middlewares::auth::caller_of;
use actix_web::{
    body::MessageBody,
    dev::{ServiceRequest, ServiceResponse},
    http::StatusCode,
    Error,
};

pub async fn logging_middleware(
    req: ServiceRequest,
    next: actix_web::middleware::Next<impl MessageBody>,
) -> Result<ServiceResponse<impl MessageBody>, Error> {
    let method = req.method().clone();
    let path = req.path().to_owned();
    let ip = req.peer_addr().map(|a| a.ip().to_string()).unwrap_or_default();
    let caller = caller_of(req.request()).unwrap_or_else(|| "anonymous".to_string());
    let started = std::time::Instant::now();

    let response = next.call(req).await;

    let status = match &response {
        Ok(resp) => resp.status().as_u16(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
    };

    tracing::info!(
        method = %method,
        path = %path,
        ip = %ip,
        caller = %caller,
        status,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request",
    );

    response
}
