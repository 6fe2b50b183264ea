use super::{signup::TokenQuery, success, Profile};
use crate::{
    auth::AuthService,
    error::{Error, Result},
};
use axum::{
    extract::{Extension, Query},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

#[derive(ToSchema, Deserialize, Debug)]
pub struct PasswordResetRequest {
    email: String,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct PasswordResetCompletion {
    token: String,
    #[schema(format = Password)]
    password: String,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct PasswordResetTarget {
    email: String,
}

#[utoipa::path(
    post,
    path = "/api/auth/password-reset",
    request_body = PasswordResetRequest,
    responses(
        (status = 200, description = "Reset email queued if the account exists", body = bool),
    ),
    tag = "auth"
)]
pub async fn request_reset(
    Extension(service): Extension<Arc<AuthService>>,
    payload: Option<Json<PasswordResetRequest>>,
) -> Result<Response> {
    let Some(Json(request)) = payload else {
        return Err(Error::bad_parameter("missing payload"));
    };
    service
        .begin_password_reset(&request.email, Utc::now())
        .await?;
    Ok(success(true).into_response())
}

#[utoipa::path(
    get,
    path = "/api/auth/password-reset",
    params(TokenQuery),
    responses(
        (status = 200, description = "Token is valid; email confirmed", body = PasswordResetTarget),
        (status = 400, description = "Token malformed, used or expired"),
        (status = 404, description = "Unknown token"),
    ),
    tag = "auth"
)]
pub async fn confirm_reset(
    Extension(service): Extension<Arc<AuthService>>,
    Query(query): Query<TokenQuery>,
) -> Result<Response> {
    let token = query
        .token
        .ok_or_else(|| Error::bad_parameter("missing token"))?;
    let identity = service.confirm_password_reset(&token, Utc::now()).await?;
    Ok(success(PasswordResetTarget {
        email: identity.email,
    })
    .into_response())
}

#[utoipa::path(
    put,
    path = "/api/auth/password-reset",
    request_body = PasswordResetCompletion,
    responses(
        (status = 200, description = "Password changed", body = Profile),
        (status = 400, description = "Token malformed, used or expired, or empty password"),
        (status = 404, description = "Unknown token"),
    ),
    tag = "auth"
)]
pub async fn complete_reset(
    Extension(service): Extension<Arc<AuthService>>,
    payload: Option<Json<PasswordResetCompletion>>,
) -> Result<Response> {
    let Some(Json(request)) = payload else {
        return Err(Error::bad_parameter("missing payload"));
    };
    let identity = service
        .complete_password_reset(&request.token, &request.password, Utc::now())
        .await?;
    Ok(success(Profile::new(service.codec(), &identity)?).into_response())
}
