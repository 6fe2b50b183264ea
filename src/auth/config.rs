use chrono::Duration;
use std::time::Duration as StdDuration;

const DEFAULT_APP_NAME: &str = "Salesgate";
const DEFAULT_SESSION_TTL_MINUTES: i64 = 30;
const DEFAULT_VERIFICATION_TTL_MINUTES: i64 = 30;
const DEFAULT_SLOW_REQUEST_SECONDS: u64 = 10;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    app_name: String,
    public_base_url: String,
    allowed_origins: Vec<String>,
    session_ttl_minutes: i64,
    verification_ttl_minutes: i64,
    signup_verify_url: String,
    password_reset_url: String,
    expose_error_details: bool,
    slow_request_seconds: u64,
}

impl AuthConfig {
    #[must_use]
    pub fn new(public_base_url: &str) -> Self {
        let base = public_base_url.trim_end_matches('/').to_string();
        Self {
            app_name: DEFAULT_APP_NAME.to_string(),
            signup_verify_url: format!("{base}/api/auth/register?token="),
            password_reset_url: format!("{base}/password-reset?token="),
            allowed_origins: vec![base.clone()],
            public_base_url: base,
            session_ttl_minutes: DEFAULT_SESSION_TTL_MINUTES,
            verification_ttl_minutes: DEFAULT_VERIFICATION_TTL_MINUTES,
            expose_error_details: false,
            slow_request_seconds: DEFAULT_SLOW_REQUEST_SECONDS,
        }
    }

    #[must_use]
    pub fn with_app_name(mut self, app_name: String) -> Self {
        self.app_name = app_name;
        self
    }

    /// Extra origins allowed as OAuth redirect targets. The public base URL
    /// is always allowed.
    #[must_use]
    pub fn with_allowed_origins(mut self, origins: Vec<String>) -> Self {
        for origin in origins {
            let origin = origin.trim().trim_end_matches('/').to_string();
            if !origin.is_empty() && !self.allowed_origins.contains(&origin) {
                self.allowed_origins.push(origin);
            }
        }
        self
    }

    #[must_use]
    pub fn with_session_ttl_minutes(mut self, minutes: i64) -> Self {
        self.session_ttl_minutes = minutes.max(1);
        self
    }

    #[must_use]
    pub fn with_verification_ttl_minutes(mut self, minutes: i64) -> Self {
        self.verification_ttl_minutes = minutes.max(1);
        self
    }

    #[must_use]
    pub fn with_signup_verify_url(mut self, prefix: String) -> Self {
        self.signup_verify_url = prefix;
        self
    }

    #[must_use]
    pub fn with_password_reset_url(mut self, prefix: String) -> Self {
        self.password_reset_url = prefix;
        self
    }

    #[must_use]
    pub fn with_expose_error_details(mut self, expose: bool) -> Self {
        self.expose_error_details = expose;
        self
    }

    #[must_use]
    pub fn with_slow_request_seconds(mut self, seconds: u64) -> Self {
        self.slow_request_seconds = seconds;
        self
    }

    #[must_use]
    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    #[must_use]
    pub fn public_base_url(&self) -> &str {
        &self.public_base_url
    }

    #[must_use]
    pub fn allowed_origins(&self) -> &[String] {
        &self.allowed_origins
    }

    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        Duration::minutes(self.session_ttl_minutes)
    }

    #[must_use]
    pub fn verification_ttl(&self) -> Duration {
        Duration::minutes(self.verification_ttl_minutes)
    }

    #[must_use]
    pub fn signup_verify_url(&self) -> &str {
        &self.signup_verify_url
    }

    #[must_use]
    pub fn password_reset_url(&self) -> &str {
        &self.password_reset_url
    }

    #[must_use]
    pub fn expose_error_details(&self) -> bool {
        self.expose_error_details
    }

    #[must_use]
    pub fn slow_request_threshold(&self) -> StdDuration {
        StdDuration::from_secs(self.slow_request_seconds)
    }
}
