//! Session cookie resolution, the auth layers and logout.

use super::success;
use crate::{
    auth::{
        session::{clear_session_cookie, extract_session_token, session_cookie, SESSION_COOKIE_NAME},
        AuthService, SessionLookup,
    },
    error::{Error, Result},
    store::{Identity, Session},
};
use axum::{
    async_trait,
    extract::{Extension, FromRequestParts, Request, State},
    http::{
        header::{COOKIE, SET_COOKIE},
        request::Parts,
        HeaderMap, HeaderValue,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error};

/// The signed-in session and account, attached to the request by
/// [`load_auth`] or [`must_auth`].
#[derive(Debug, Clone)]
pub struct CurrentSession {
    pub session: Session,
    pub identity: Identity,
}

/// Extracts the signed-in account; rejects with `Unauthenticated` when the
/// request carries no usable session.
#[derive(Debug, Clone)]
pub struct CurrentIdentity(pub Identity);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CurrentIdentity {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentSession>()
            .map(|current| Self(current.identity.clone()))
            .ok_or(Error::Unauthenticated)
    }
}

/// Append a `Set-Cookie` header. Invalid values are logged and skipped.
pub fn append_cookie(headers: &mut HeaderMap, cookie: &str) {
    match HeaderValue::from_str(cookie) {
        Ok(value) => {
            headers.append(SET_COOKIE, value);
        }
        Err(err) => error!("Failed to build session cookie: {err}"),
    }
}

/// Attach a cookie to a response.
pub fn with_cookie(response: impl IntoResponse, cookie: &str) -> Response {
    let mut response = response.into_response();
    append_cookie(response.headers_mut(), cookie);
    response
}

fn sets_session_cookie(headers: &HeaderMap) -> bool {
    let prefix = format!("{SESSION_COOKIE_NAME}=");
    headers
        .get_all(SET_COOKIE)
        .iter()
        .any(|value| value.as_bytes().starts_with(prefix.as_bytes()))
}

fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(extract_session_token)
}

/// Resolve the session cookie. Returns the current session, if usable, and
/// the cookie to send back: a refreshed one after renewal, a clearing one
/// when the presented session is unknown or no longer usable.
async fn resolve(
    service: &AuthService,
    headers: &HeaderMap,
) -> Result<(Option<CurrentSession>, Option<String>)> {
    let Some(token) = session_token(headers) else {
        return Ok((None, None));
    };
    match service.authenticate(&token, Utc::now()).await? {
        SessionLookup::Missing => {
            debug!("unknown session cookie");
            Ok((None, Some(clear_session_cookie())))
        }
        SessionLookup::Unusable(session) => {
            debug!(identity_id = session.identity_id, "unusable session cookie");
            Ok((None, Some(clear_session_cookie())))
        }
        SessionLookup::Active {
            session,
            identity,
            renewed,
        } => {
            let cookie = renewed.then(|| session_cookie(&session));
            Ok((Some(CurrentSession { session, identity }), cookie))
        }
    }
}

fn finish(mut response: Response, cookie: Option<String>) -> Response {
    // A handler that sets its own session cookie (login) takes precedence.
    if let Some(cookie) = cookie {
        if !sets_session_cookie(response.headers()) {
            append_cookie(response.headers_mut(), &cookie);
        }
    }
    response
}

/// Soft authentication: attach the session when there is a usable one and
/// carry on either way.
pub async fn load_auth(
    State(service): State<Arc<AuthService>>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let (current, cookie) = resolve(&service, request.headers()).await?;
    if let Some(current) = current {
        request.extensions_mut().insert(current);
    }
    Ok(finish(next.run(request).await, cookie))
}

/// Hard authentication: reject with `Unauthenticated` unless there is a
/// usable session.
pub async fn must_auth(
    State(service): State<Arc<AuthService>>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let (current, cookie) = resolve(&service, request.headers()).await?;
    let Some(current) = current else {
        return Ok(finish(Error::Unauthenticated.into_response(), cookie));
    };
    request.extensions_mut().insert(current);
    Ok(finish(next.run(request).await, cookie))
}

#[utoipa::path(
    get,
    path = "/api/auth/logout",
    responses(
        (status = 200, description = "Session logged out and cookie cleared", body = bool)
    ),
    tag = "auth"
)]
pub async fn logout(
    Extension(service): Extension<Arc<AuthService>>,
    current: Option<Extension<CurrentSession>>,
) -> Result<Response> {
    if let Some(Extension(CurrentSession { mut session, .. })) = current {
        service.logout(&mut session, Utc::now()).await?;
    }
    let cookie = clear_session_cookie();
    Ok(with_cookie(success(true), &cookie))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_token_from_any_cookie_header() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("theme=dark"));
        headers.append(COOKIE, HeaderValue::from_static("lang=en; appSession=abc"));
        assert_eq!(session_token(&headers).as_deref(), Some("abc"));
        assert_eq!(session_token(&HeaderMap::new()), None);
    }

    #[test]
    fn test_handler_cookie_wins() {
        let mut response = success(true).into_response();
        append_cookie(response.headers_mut(), "appSession=fresh; Path=/api");
        let response = finish(response, Some("appSession=; Max-Age=0".to_string()));
        let cookies: Vec<_> = response.headers().get_all(SET_COOKIE).iter().collect();
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0], "appSession=fresh; Path=/api");

        let response = finish(success(true).into_response(), Some("appSession=; Max-Age=0".to_string()));
        assert_eq!(response.headers().get_all(SET_COOKIE).iter().count(), 1);
    }
}
