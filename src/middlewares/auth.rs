use crate::config::AppConfig;
use crate::errors::{AppError, ErrorKind};
use crate::jwt::{self, AccessTokenClaims};
use actix_web::{
    body::{BoxBody, MessageBody},
    dev::{ServiceRequest, ServiceResponse},
    middleware::Next,
    web, Error, HttpMessage, ResponseError,
};

/// Unlike the teacher's mandatory bearer check, a missing header is not
/// itself an error here — most pod content is public. A present-but-bad
/// token still fails closed, since a caller who tried to authenticate
/// and failed should not be silently downgraded to anonymous.
pub async fn auth_middleware(
    req: ServiceRequest,
    next: Next<impl MessageBody + 'static>,
) -> Result<ServiceResponse<BoxBody>, Error> {
    let token = req
        .headers()
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::to_owned);

    if let Some(token) = token {
        let config = req.app_data::<web::Data<AppConfig>>().cloned();
        let secret = match config {
            Some(config) => config.jwt_secret.clone(),
            None => {
                return Ok(bounce(req, AppError::new(ErrorKind::InternalError, "no app config")));
            }
        };

        match jwt::verify_access_token(&token, &secret) {
            Ok(claims) => {
                if claims.exp < now_epoch_seconds(&req) {
                    return Ok(bounce(req, AppError::new(ErrorKind::TokenExpired, "access token expired")));
                }
                req.extensions_mut().insert(claims);
            }
            Err(err) => {
                tracing::debug!("rejected token: {}", err);
                return Ok(bounce(req, AppError::new(ErrorKind::InvalidToken, "invalid access token")));
            }
        }
    }

    let resp = next.call(req).await?;
    Ok(resp.map_into_boxed_body())
}

fn now_epoch_seconds(_req: &ServiceRequest) -> usize {
    chrono::Utc::now().timestamp() as usize
}

fn bounce(req: ServiceRequest, err: AppError) -> ServiceResponse<BoxBody> {
    let (req_http, _) = req.into_parts();
    ServiceResponse::new(req_http, err.error_response())
}

pub fn caller_of(req: &actix_web::HttpRequest) -> Option<String> {
    req.extensions().get::<AccessTokenClaims>().map(|c| c.sub.clone())
}
