use anyhow::Result;
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use salesgate::{
    auth::{
        mailer::EmailMessage, utils::TOKEN_LEN, AuthConfig, AuthService, CredentialStore,
        EmailSender, Mailer, MailerConfig, OAuthConfig,
    },
    codec::IdCodec,
    salesgate::router,
    store::MemoryStore,
};
use serde_json::{json, Value};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tower::ServiceExt;

#[derive(Default)]
struct Outbox {
    messages: Mutex<Vec<EmailMessage>>,
}

impl Outbox {
    fn tokens(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter_map(|message| {
                let start = message.html_body.find("token=")? + "token=".len();
                message
                    .html_body
                    .get(start..start + TOKEN_LEN)
                    .map(str::to_string)
            })
            .collect()
    }

    async fn wait_for_tokens(&self, count: usize) -> Vec<String> {
        for _ in 0..200 {
            let tokens = self.tokens();
            if tokens.len() >= count {
                return tokens;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {count} emails");
    }
}

impl EmailSender for Outbox {
    fn send(&self, message: &EmailMessage) -> anyhow::Result<()> {
        self.messages.lock().unwrap().push(message.clone());
        Ok(())
    }
}

struct App {
    router: Router,
    outbox: Arc<Outbox>,
}

fn app_with(config: AuthConfig) -> App {
    let outbox = Arc::new(Outbox::default());
    let (mailer, _worker) = Mailer::spawn(outbox.clone(), MailerConfig::new());
    let service = AuthService::new(
        Arc::new(config),
        Arc::new(MemoryStore::new()),
        IdCodec::default(),
        CredentialStore::with_params(1024, 1).unwrap(),
        mailer,
        OAuthConfig::new(),
    )
    .unwrap();
    App {
        router: router(Arc::new(service)).unwrap(),
        outbox,
    }
}

fn app() -> App {
    app_with(AuthConfig::new("https://app.example.com"))
}

struct Reply {
    status: StatusCode,
    set_cookie: Option<String>,
    body: Value,
}

impl Reply {
    fn session_cookie(&self) -> String {
        let cookie = self.set_cookie.as_deref().expect("set-cookie header");
        cookie
            .split(';')
            .next()
            .expect("cookie pair")
            .trim()
            .to_string()
    }
}

async fn send(
    router: &Router,
    method: Method,
    uri: &str,
    cookie: Option<&str>,
    body: Option<Value>,
) -> Result<Reply> {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(cookie) = cookie {
        request = request.header(header::COOKIE, cookie);
    }
    let request = match body {
        Some(body) => request
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))?,
        None => request.body(Body::empty())?,
    };

    let response = router.clone().oneshot(request).await?;
    let status = response.status();
    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok(Reply {
        status,
        set_cookie,
        body,
    })
}

async fn sign_up(app: &App, email: &str, password: &str) -> Result<Value> {
    let reply = send(
        &app.router,
        Method::POST,
        "/api/auth/register",
        None,
        Some(json!({"email": email, "password": password, "name": "Grace Hopper"})),
    )
    .await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, json!({"error": false, "data": true}));

    let count = app.outbox.tokens().len() + 1;
    let token = app.outbox.wait_for_tokens(count).await[count - 1].clone();
    let reply = send(
        &app.router,
        Method::GET,
        &format!("/api/auth/register?token={token}"),
        None,
        None,
    )
    .await?;
    assert_eq!(reply.status, StatusCode::OK);
    Ok(reply.body["data"].clone())
}

async fn log_in(app: &App, email: &str, password: &str) -> Result<Reply> {
    send(
        &app.router,
        Method::POST,
        "/api/auth/login",
        None,
        Some(json!({"email": email, "password": password})),
    )
    .await
}

#[tokio::test]
async fn test_signup_login_profile_logout() -> Result<()> {
    let app = app();

    let profile = sign_up(&app, "Grace@Example.com", "cobol1959").await?;
    assert_eq!(profile["email"], "Grace@Example.com");
    assert_eq!(profile["emailConfirmed"], true);
    assert_eq!(profile["hasPassword"], true);
    assert_eq!(profile["id"].as_str().map(str::len), Some(8));
    assert!(profile.get("password").is_none());

    let reply = log_in(&app, "grace@example.com", "cobol1959").await?;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.body["code"], "invalid_user");
    let reply = log_in(&app, "Grace@Example.com", "cobol1959").await?;
    assert_eq!(reply.status, StatusCode::OK);
    let set_cookie = reply.set_cookie.clone().unwrap();
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains("; Secure"));
    assert!(set_cookie.contains("Path=/api"));
    let cookie = reply.session_cookie();

    let reply = send(
        &app.router,
        Method::GET,
        "/api/auth/profile",
        Some(&cookie),
        None,
    )
    .await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["data"]["id"], profile["id"]);

    let reply = send(
        &app.router,
        Method::PUT,
        "/api/auth/profile",
        Some(&cookie),
        Some(json!({"name": "Rear Admiral Hopper"})),
    )
    .await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["data"]["name"], "Rear Admiral Hopper");

    let reply = send(
        &app.router,
        Method::GET,
        "/api/auth/logout",
        Some(&cookie),
        None,
    )
    .await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["data"], true);
    assert!(reply.set_cookie.unwrap().contains("Max-Age=0"));

    let reply = send(
        &app.router,
        Method::GET,
        "/api/auth/profile",
        Some(&cookie),
        None,
    )
    .await?;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert_eq!(reply.body["code"], "unauthenticated");
    Ok(())
}

#[tokio::test]
async fn test_wrong_password_is_invalid_user() -> Result<()> {
    let app = app();
    sign_up(&app, "ada@example.com", "engine1843").await?;

    let reply = log_in(&app, "ada@example.com", "wrong-password").await?;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.body["error"], true);
    assert_eq!(reply.body["code"], "invalid_user");
    assert!(reply.set_cookie.is_none());

    let reply = log_in(&app, "nobody@example.com", "engine1843").await?;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.body["code"], "invalid_user");
    Ok(())
}

#[tokio::test]
async fn test_duplicate_signup_is_preexist() -> Result<()> {
    let app = app();
    sign_up(&app, "ada@example.com", "engine1843").await?;

    let reply = send(
        &app.router,
        Method::POST,
        "/api/auth/register",
        None,
        Some(json!({"email": " ada@example.com ", "password": "another1", "name": "Ada"})),
    )
    .await?;
    assert_eq!(reply.status, StatusCode::CONFLICT);
    assert_eq!(reply.body["code"], "preexist");
    Ok(())
}

#[tokio::test]
async fn test_signup_token_is_single_use() -> Result<()> {
    let app = app();
    sign_up(&app, "ada@example.com", "engine1843").await?;
    let token = app.outbox.tokens()[0].clone();

    let reply = send(
        &app.router,
        Method::GET,
        &format!("/api/auth/register?token={token}"),
        None,
        None,
    )
    .await?;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.body["code"], "bad_parameter");
    Ok(())
}

#[tokio::test]
async fn test_password_reset_flow() -> Result<()> {
    let app = app();
    sign_up(&app, "ada@example.com", "engine1843").await?;

    let reply = send(
        &app.router,
        Method::POST,
        "/api/auth/password-reset",
        None,
        Some(json!({"email": "ada@example.com"})),
    )
    .await?;
    assert_eq!(reply.status, StatusCode::OK);
    let token = app.outbox.wait_for_tokens(2).await[1].clone();

    let reply = send(
        &app.router,
        Method::GET,
        &format!("/api/auth/password-reset?token={token}"),
        None,
        None,
    )
    .await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["data"]["email"], "ada@example.com");

    let reply = send(
        &app.router,
        Method::PUT,
        "/api/auth/password-reset",
        None,
        Some(json!({"token": token, "password": "analytical1"})),
    )
    .await?;
    assert_eq!(reply.status, StatusCode::OK);

    let reply = send(
        &app.router,
        Method::PUT,
        "/api/auth/password-reset",
        None,
        Some(json!({"token": token, "password": "again-and-again"})),
    )
    .await?;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);

    assert_eq!(
        log_in(&app, "ada@example.com", "engine1843").await?.status,
        StatusCode::BAD_REQUEST
    );
    assert_eq!(
        log_in(&app, "ada@example.com", "analytical1").await?.status,
        StatusCode::OK
    );
    Ok(())
}

#[tokio::test]
async fn test_password_reset_for_unknown_email_still_succeeds() -> Result<()> {
    let app = app();
    let reply = send(
        &app.router,
        Method::POST,
        "/api/auth/password-reset",
        None,
        Some(json!({"email": "ghost@example.com"})),
    )
    .await?;
    assert_eq!(reply.status, StatusCode::OK);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(app.outbox.tokens().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_token_links_without_token_are_bad_parameter() -> Result<()> {
    let app = app();
    for uri in ["/api/auth/password-reset", "/api/auth/register"] {
        let reply = send(&app.router, Method::GET, uri, None, None).await?;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(reply.body["code"], "bad_parameter");
        assert_eq!(reply.body["message"], "missing token");
    }
    Ok(())
}

#[tokio::test]
async fn test_profile_requires_session() -> Result<()> {
    let app = app();
    let reply = send(&app.router, Method::GET, "/api/auth/profile", None, None).await?;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert_eq!(reply.body["code"], "unauthenticated");
    assert!(reply.body.get("detail").is_none());
    Ok(())
}

#[tokio::test]
async fn test_unknown_session_cookie_is_cleared() -> Result<()> {
    let app = app();
    let reply = send(
        &app.router,
        Method::POST,
        "/api/auth/password-reset",
        Some("appSession=AAAAAAAAAAAAAAAAAAAAAA"),
        Some(json!({"email": "ghost@example.com"})),
    )
    .await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.set_cookie.unwrap().contains("Max-Age=0"));
    Ok(())
}

#[tokio::test]
async fn test_unknown_route() -> Result<()> {
    let app = app();
    let reply = send(&app.router, Method::GET, "/api/auth/nothing", None, None).await?;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.body["code"], "route_not_found");
    Ok(())
}

#[tokio::test]
async fn test_malformed_token_is_bad_parameter() -> Result<()> {
    let app = app_with(AuthConfig::new("https://app.example.com").with_expose_error_details(true));
    let reply = send(
        &app.router,
        Method::GET,
        "/api/auth/register?token=short",
        None,
        None,
    )
    .await?;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        reply.body,
        json!({
            "error": true,
            "code": "bad_parameter",
            "message": "invalid verification token",
        })
    );
    Ok(())
}

#[tokio::test]
async fn test_health_and_openapi() -> Result<()> {
    let app = app();
    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-app"));
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(
        response.headers().get(header::X_FRAME_OPTIONS).unwrap(),
        "SAMEORIGIN"
    );
    let health: Value = serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await?)?;
    assert_eq!(health["storage"], "memory");
    assert_eq!(health["storage_status"], "ok");

    let reply = send(&app.router, Method::GET, "/api-docs/openapi.json", None, None).await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.body["paths"]["/api/auth/login"].is_object());
    Ok(())
}
