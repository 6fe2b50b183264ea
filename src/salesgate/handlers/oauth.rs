use super::{client_info, session::with_cookie, success, Profile};
use crate::{
    auth::{session::session_cookie, AuthService},
    error::{Error, Result},
    store::OAuthProvider,
};
use axum::{
    extract::{ConnectInfo, Extension, Path, Query},
    http::{
        header::{ORIGIN, REFERER},
        HeaderMap,
    },
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use utoipa::{IntoParams, ToSchema};

#[derive(IntoParams, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeQuery {
    /// Where to send the browser after sign-in. Defaults to the referring page.
    destination_url: Option<String>,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct AuthorizationUrl {
    url: String,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct ExchangeRequest {
    code: String,
    state: String,
}

#[derive(ToSchema, Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct OAuthSignIn {
    profile: Profile,
    destination_url: Option<String>,
}

fn header<'a>(headers: &'a HeaderMap, name: &axum::http::HeaderName) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
}

#[utoipa::path(
    get,
    path = "/api/auth/oauth/{provider}",
    params(
        ("provider" = String, Path, description = "`google` or `microsoft`"),
        AuthorizeQuery,
    ),
    responses(
        (status = 200, description = "Provider consent URL", body = AuthorizationUrl),
        (status = 400, description = "Unknown or unconfigured provider, or origin not allowed"),
    ),
    tag = "oauth"
)]
pub async fn authorize(
    Extension(service): Extension<Arc<AuthService>>,
    Path(provider): Path<String>,
    Query(query): Query<AuthorizeQuery>,
    headers: HeaderMap,
) -> Result<Response> {
    let provider: OAuthProvider = provider.parse()?;
    let origin = service
        .oauth()
        .resolve_origin(header(&headers, &REFERER), header(&headers, &ORIGIN))?;
    let url = service
        .begin_oauth(
            provider,
            &origin,
            query.destination_url.as_deref(),
            Utc::now(),
        )
        .await?;
    Ok(success(AuthorizationUrl { url }).into_response())
}

#[utoipa::path(
    post,
    path = "/api/auth/oauth/{provider}",
    params(("provider" = String, Path, description = "`google` or `microsoft`")),
    request_body = ExchangeRequest,
    responses(
        (status = 200, description = "Signed in; the session cookie is set", body = OAuthSignIn),
        (status = 400, description = "State invalid, used or expired, or ID token incomplete"),
        (status = 404, description = "Unknown state"),
        (status = 500, description = "Provider token exchange failed"),
    ),
    tag = "oauth"
)]
pub async fn exchange(
    Extension(service): Extension<Arc<AuthService>>,
    Path(provider): Path<String>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: Option<Json<ExchangeRequest>>,
) -> Result<Response> {
    let provider: OAuthProvider = provider.parse()?;
    let Some(Json(request)) = payload else {
        return Err(Error::bad_parameter("missing payload"));
    };
    let origin = service
        .oauth()
        .resolve_origin(header(&headers, &REFERER), header(&headers, &ORIGIN))?;
    let client = client_info(&headers, peer);
    let login = service
        .complete_oauth(
            provider,
            &request.code,
            &request.state,
            &origin,
            &client,
            Utc::now(),
        )
        .await?;

    let body = OAuthSignIn {
        profile: Profile::new(service.codec(), &login.identity)?,
        destination_url: login.destination_url,
    };
    let cookie = session_cookie(&login.session);
    Ok(with_cookie(success(body), &cookie))
}
