//! Error responses and the error boundary.
//!
//! Handlers return [`Error`] directly. Its response carries the public
//! envelope plus the error itself as a response extension, which the
//! boundary middleware uses to log it and, when the deployment opts in, to
//! add the diagnostic detail to the body.

use crate::{auth::AuthService, error::Error};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tracing::{info, warn};

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let mut response = (self.status(), Json(self.to_body(false))).into_response();
        response.extensions_mut().insert(Arc::new(self));
        response
    }
}

pub async fn error_boundary(
    State(service): State<Arc<AuthService>>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let mut response = next.run(request).await;

    let Some(err) = response.extensions_mut().remove::<Arc<Error>>() else {
        return response;
    };

    if err.should_log() {
        warn!(%method, %uri, code = err.code(), detail = ?err.detail(), "{err}");
    } else {
        info!(%method, %uri, code = err.code(), "{err}");
    }

    if !service.config().expose_error_details() || err.detail().is_none() {
        return response;
    }

    let (parts, _) = response.into_parts();
    let mut exposed = Json(err.to_body(true)).into_response();
    *exposed.status_mut() = parts.status;
    exposed.headers_mut().extend(parts.headers);
    exposed
}

pub async fn route_not_found() -> Error {
    Error::RouteNotFound
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::to_bytes, http::StatusCode};
    use serde_json::{json, Value};

    #[tokio::test]
    async fn test_error_response_hides_detail() {
        let response =
            Error::server_with_detail("provider failed", json!({"status": 502})).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.extensions().get::<Arc<Error>>().is_some());

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["code"], "server_error");
        assert!(body.get("detail").is_none());
    }

    #[tokio::test]
    async fn test_route_not_found() {
        let response = route_not_found().await.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
