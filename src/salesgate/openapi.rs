use super::handlers::{health, login, oauth, password_reset, profile, session, signup};
use utoipa::{
    openapi::{InfoBuilder, License},
    OpenApi,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        login::login,
        session::logout,
        signup::register,
        signup::verify,
        password_reset::request_reset,
        password_reset::confirm_reset,
        password_reset::complete_reset,
        oauth::authorize,
        oauth::exchange,
        profile::get_profile,
        profile::update_profile,
    ),
    components(schemas(
        health::Health,
        super::handlers::Profile,
        login::LoginRequest,
        signup::SignupRequest,
        password_reset::PasswordResetRequest,
        password_reset::PasswordResetCompletion,
        password_reset::PasswordResetTarget,
        oauth::AuthorizationUrl,
        oauth::ExchangeRequest,
        oauth::OAuthSignIn,
        profile::ProfileUpdate,
    )),
    tags(
        (name = "health", description = "Service and storage status"),
        (name = "auth", description = "Password login, sign-up and password reset"),
        (name = "oauth", description = "Google and Microsoft sign-in"),
        (name = "profile", description = "The signed-in account"),
    )
)]
struct ApiDoc;

/// `OpenAPI` document with package metadata from Cargo.toml.
#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let mut doc = ApiDoc::openapi();

    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();
    info.license = optional_str(env!("CARGO_PKG_LICENSE")).map(|identifier| {
        let mut license = License::new(identifier);
        license.identifier = Some(identifier.to_string());
        license
    });
    doc.info = info;
    doc
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}
