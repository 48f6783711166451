use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use std::future::{ready, Ready};

use crate::config::Config;
use crate::error::AppError;

/// Extractor for the admin Bearer token (API endpoints)
///
/// Usage in handlers:
/// ```ignore
/// async fn my_handler(_auth: AdminAuth) -> HttpResponse {
///     // only reached with a valid ADMIN_API_TOKEN
/// }
/// ```
///
/// Without a configured `ADMIN_API_TOKEN` every request is rejected.
#[derive(Debug)]
pub struct AdminAuth;

impl FromRequest for AdminAuth {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(authorize(req))
    }
}

fn authorize(req: &HttpRequest) -> Result<AdminAuth, AppError> {
    let config = req
        .app_data::<web::Data<Config>>()
        .ok_or_else(|| AppError::Internal("Configuration not available".to_string()))?;

    let expected = config
        .security
        .admin_token
        .as_deref()
        .ok_or_else(|| AppError::Unauthorized("Admin API is disabled".to_string()))?;

    let header = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing Authorization header".to_string()))?;

    let token = header.strip_prefix("Bearer ").ok_or_else(|| {
        AppError::Unauthorized(
            "Invalid Authorization header format, expected 'Bearer <token>'".to_string(),
        )
    })?;

    if !constant_time_eq(token.trim().as_bytes(), expected.as_bytes()) {
        return Err(AppError::Unauthorized("Invalid Bearer token".to_string()));
    }

    Ok(AdminAuth)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
