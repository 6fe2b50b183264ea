use super::{success, Profile};
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
use serde::Deserialize;
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};

#[derive(ToSchema, Deserialize, Debug)]
pub struct SignupRequest {
    email: String,
    #[schema(format = Password)]
    password: String,
    name: String,
}

#[derive(IntoParams, Deserialize, Debug)]
pub struct TokenQuery {
    /// Token from the emailed link.
    pub(super) token: Option<String>,
}

#[utoipa::path(
    post,
    path = "/api/auth/register",
    request_body = SignupRequest,
    responses(
        (status = 200, description = "Confirmation email queued", body = bool),
        (status = 400, description = "Invalid email, password or name"),
        (status = 409, description = "An account with this email already exists"),
    ),
    tag = "auth"
)]
pub async fn register(
    Extension(service): Extension<Arc<AuthService>>,
    payload: Option<Json<SignupRequest>>,
) -> Result<Response> {
    let Some(Json(request)) = payload else {
        return Err(Error::bad_parameter("missing payload"));
    };
    service
        .begin_signup(&request.email, &request.password, &request.name, Utc::now())
        .await?;
    Ok(success(true).into_response())
}

#[utoipa::path(
    get,
    path = "/api/auth/register",
    params(TokenQuery),
    responses(
        (status = 200, description = "Account created and confirmed", body = Profile),
        (status = 400, description = "Token malformed, used or expired"),
        (status = 404, description = "Unknown token"),
        (status = 409, description = "An account with this email already exists"),
    ),
    tag = "auth"
)]
pub async fn verify(
    Extension(service): Extension<Arc<AuthService>>,
    Query(query): Query<TokenQuery>,
) -> Result<Response> {
    let token = query
        .token
        .ok_or_else(|| Error::bad_parameter("missing token"))?;
    let identity = service.complete_signup(&token, Utc::now()).await?;
    Ok(success(Profile::new(service.codec(), &identity)?).into_response())
}
