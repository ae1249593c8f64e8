use crate::config::AppConfig;
use crate::errors::{AppError, ErrorKind};
use actix_web::{
    body::{BoxBody, MessageBody},
    dev::{ServiceRequest, ServiceResponse},
    middleware::Next,
    web, Error, ResponseError,
};
use deadpool_redis::{redis::AsyncCommands, Pool};

/// Per-IP and per-principal INCR+EXPIRE counters, grounded on the
/// teacher's `middlewares/limiter.rs`. A Redis outage fails open — a
/// counter we cannot read or write never blocks a request.
pub async fn rate_limit_middleware(
    req: ServiceRequest,
    next: Next<impl MessageBody + 'static>,
) -> Result<ServiceResponse<BoxBody>, Error> {
    let pool = req.app_data::<web::Data<Pool>>().cloned();
    let config = req.app_data::<web::Data<AppConfig>>().cloned();

    if let (Some(pool), Some(config)) = (pool, config) {
        let ip = req.peer_addr().map(|a| a.ip().to_string()).unwrap_or_default();
        let principal = crate::middlewares::auth::caller_of(req.request()).unwrap_or_default();
        let key = format!("ratelimit:{}:{}", ip, principal);

        if let Ok(mut conn) = pool.get().await {
            let count: i64 = conn.get(&key).await.unwrap_or(0);
            if count >= config.rate_limit_max_requests() {
                let (req_http, _) = req.into_parts();
                let err = AppError::new(ErrorKind::RateLimitExceeded, "rate limit exceeded");
                return Ok(ServiceResponse::new(req_http, err.error_response()));
            }
            if count == 0 {
                let mut pipe = deadpool_redis::redis::pipe();
                pipe.cmd("SET").arg(&key).arg(1).ignore();
                pipe.cmd("EXPIRE").arg(&key).arg(config.rate_limit_window_seconds()).ignore();
                let _: Result<(), _> = pipe.query_async(&mut conn).await;
            } else {
                let _: Result<i64, _> = conn.incr(&key, 1).await;
            }
        }
    }

    let resp = next.call(req).await?;
    Ok(resp.map_into_boxed_body())
}
