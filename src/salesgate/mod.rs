//! HTTP surface: routes, middleware and server bootstrap.

pub mod errors;
pub mod handlers;
mod openapi;

pub use openapi::openapi;

use crate::auth::AuthService;
use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{MatchedPath, Request, State},
    http::{
        header::{CONTENT_TYPE, X_FRAME_OPTIONS},
        HeaderName, HeaderValue, Method,
    },
    middleware::{self, Next},
    response::{Json, Response},
    routing::{get, post},
    Extension, Router,
};
use handlers::{health, login, oauth, password_reset, profile, session, signup};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::{SetRequestHeaderLayer, SetResponseHeaderLayer},
    trace::TraceLayer,
};
use tracing::{info, info_span, warn, Span};
use ulid::Ulid;
use url::Url;

/// Build the application router.
///
/// # Errors
///
/// Returns an error if a configured origin cannot be used as a CORS origin.
pub fn router(service: Arc<AuthService>) -> Result<Router> {
    let public = Router::new()
        .route("/login", post(login::login))
        .route("/logout", get(session::logout))
        .route("/register", get(signup::verify).post(signup::register))
        .route(
            "/password-reset",
            get(password_reset::confirm_reset)
                .post(password_reset::request_reset)
                .put(password_reset::complete_reset),
        )
        .route("/oauth/:provider", get(oauth::authorize).post(oauth::exchange))
        .route_layer(middleware::from_fn_with_state(
            service.clone(),
            session::load_auth,
        ));

    let protected = Router::new()
        .route(
            "/profile",
            get(profile::get_profile).put(profile::update_profile),
        )
        .route_layer(middleware::from_fn_with_state(
            service.clone(),
            session::must_auth,
        ));

    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE])
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_origin(AllowOrigin::list(cors_origins(
            service.config().allowed_origins(),
        )?))
        .allow_credentials(true);

    let app = Router::new()
        .route("/health", get(health::health))
        .route("/api-docs/openapi.json", get(|| async { Json(openapi()) }))
        .nest("/api/auth", public.merge(protected))
        .fallback(errors::route_not_found)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(SetResponseHeaderLayer::overriding(
                    X_FRAME_OPTIONS,
                    HeaderValue::from_static("SAMEORIGIN"),
                ))
                .layer(cors)
                .layer(middleware::from_fn_with_state(
                    service.clone(),
                    slow_request_notifier,
                ))
                .layer(middleware::from_fn_with_state(
                    service.clone(),
                    errors::error_boundary,
                ))
                .layer(Extension(service)),
        );

    Ok(app)
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(port: u16, service: Arc<AuthService>) -> Result<()> {
    let app = router(service)?;

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for shutdown signal: {err}");
            std::future::pending::<()>().await;
        }
        info!("Gracefully shutdown");
    })
    .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

/// Log requests that outlive the configured threshold. The request keeps
/// running; nothing is cancelled.
async fn slow_request_notifier(
    State(service): State<Arc<AuthService>>,
    request: Request,
    next: Next,
) -> Response {
    let threshold = service.config().slow_request_threshold();
    let uri = request.uri().clone();
    let run = next.run(request);
    tokio::pin!(run);

    tokio::select! {
        response = &mut run => response,
        () = tokio::time::sleep(threshold) => {
            warn!(%uri, threshold_secs = threshold.as_secs(), "long request timeout");
            run.await
        }
    }
}

fn cors_origins(origins: &[String]) -> Result<Vec<HeaderValue>> {
    origins
        .iter()
        .map(|origin| {
            let parsed =
                Url::parse(origin).with_context(|| format!("Invalid allowed origin: {origin}"))?;
            HeaderValue::from_str(&parsed.origin().ascii_serialization())
                .context("Failed to build allowed origin header")
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cors_origins_are_normalized() {
        let origins = cors_origins(&[
            "https://app.example.com".to_string(),
            "http://localhost:3000".to_string(),
            "https://app.example.com:443".to_string(),
        ])
        .unwrap();
        assert_eq!(origins[0], "https://app.example.com");
        assert_eq!(origins[1], "http://localhost:3000");
        assert_eq!(origins[2], "https://app.example.com");
        assert!(cors_origins(&["not a url".to_string()]).is_err());
    }
}
