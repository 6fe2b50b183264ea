use super::{client_info, session::with_cookie, success, Profile};
use crate::{
    auth::{session::session_cookie, AuthService},
    error::{Error, Result},
};
use axum::{
    extract::{ConnectInfo, Extension},
    http::HeaderMap,
    response::Response,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use std::{net::SocketAddr, sync::Arc};
use utoipa::ToSchema;

#[derive(ToSchema, Deserialize, Debug)]
pub struct LoginRequest {
    email: String,
    #[schema(format = Password)]
    password: String,
    /// Keep the session until explicit logout.
    #[serde(default)]
    remember: bool,
}

#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in; the session cookie is set", body = Profile),
        (status = 400, description = "Invalid email or password"),
    ),
    tag = "auth"
)]
pub async fn login(
    Extension(service): Extension<Arc<AuthService>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: Option<Json<LoginRequest>>,
) -> Result<Response> {
    let Some(Json(request)) = payload else {
        return Err(Error::bad_parameter("missing payload"));
    };

    let client = client_info(&headers, peer);
    let (identity, session) = service
        .login(
            &request.email,
            &request.password,
            request.remember,
            &client,
            Utc::now(),
        )
        .await?;

    let profile = Profile::new(service.codec(), &identity)?;
    let cookie = session_cookie(&session);
    Ok(with_cookie(success(profile), &cookie))
}
