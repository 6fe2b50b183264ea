//! OAuth2 authorization-code exchange with external identity providers.
//!
//! Every attempt is guarded by a persisted state record keyed by
//! `(provider, state)`. The record is short-lived and can be exchanged at
//! most once: the exchange stamp is written with a conditional update, so
//! of any number of concurrent completions for one state exactly one wins.
//!
//! The redirect URI is derived from the caller's own origin, which must be
//! on the configured allow-list.

pub mod assertion;
pub mod provider;

#[cfg(test)]
mod testdata;

use crate::{
    auth::{config::AuthConfig, utils},
    error::{Error, Result},
    store::{
        run_detached, AuthStore, ExchangeMark, ExchangedIdentity, OAuthAuthorization,
        OAuthProvider,
    },
    APP_USER_AGENT,
};
use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Duration, Utc};
use provider::{GoogleClient, MicrosoftClient, ProviderClient};
use serde::Deserialize;
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration as StdDuration};
use tracing::{info, instrument, warn};
use url::Url;

const DEFAULT_STATE_TTL_SECONDS: i64 = 180;
const MAX_PROVIDER_RESPONSE_BYTES: usize = 1024 * 1024;
const PROVIDER_TIMEOUT: StdDuration = StdDuration::from_secs(10);

#[derive(Debug, Default)]
pub struct OAuthConfig {
    google: Option<GoogleClient>,
    microsoft: Option<MicrosoftClient>,
    state_ttl_seconds: Option<i64>,
}

impl OAuthConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_google(mut self, client: GoogleClient) -> Self {
        self.google = Some(client);
        self
    }

    #[must_use]
    pub fn with_microsoft(mut self, client: MicrosoftClient) -> Self {
        self.microsoft = Some(client);
        self
    }

    #[must_use]
    pub fn with_state_ttl_seconds(mut self, seconds: i64) -> Self {
        self.state_ttl_seconds = Some(seconds);
        self
    }

    #[must_use]
    pub fn state_ttl(&self) -> Duration {
        Duration::seconds(
            self.state_ttl_seconds
                .unwrap_or(DEFAULT_STATE_TTL_SECONDS)
                .max(1),
        )
    }
}

/// Where an OAuth request came from: a normalized, allow-listed origin and
/// the path of the page that started it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOrigin {
    pub origin: String,
    pub path: Option<String>,
}

impl RequestOrigin {
    #[must_use]
    pub fn redirect_uri(&self, provider: OAuthProvider) -> String {
        format!("{}/oauth/{provider}", self.origin)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedExchange {
    pub identity: ExchangedIdentity,
    pub destination_url: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    id_token: Option<String>,
}

#[derive(Deserialize)]
struct IdTokenClaims {
    email: Option<String>,
    sub: Option<String>,
    name: Option<String>,
}

/// Decode the claims segment of an ID token. The signature is not checked:
/// the token arrives directly from the provider over TLS.
///
/// # Errors
///
/// Returns `BadParameter` if the token is malformed or lacks the `email` or
/// `sub` claim.
pub fn parse_id_token(id_token: &str) -> Result<ExchangedIdentity> {
    let mut segments = id_token.split('.');
    let (Some(_), Some(payload), Some(_), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(Error::bad_parameter("malformed id token"));
    };
    let decoded = Base64UrlUnpadded::decode_vec(payload.trim_end_matches('='))
        .map_err(|_| Error::bad_parameter("malformed id token"))?;
    let raw: Value =
        serde_json::from_slice(&decoded).map_err(|_| Error::bad_parameter("malformed id token"))?;
    let claims: IdTokenClaims = serde_json::from_value(raw.clone())
        .map_err(|_| Error::bad_parameter("malformed id token"))?;

    let email = claims
        .email
        .filter(|email| !email.is_empty())
        .ok_or_else(|| {
            Error::bad_parameter_with_detail("id token missing email claim", raw.clone())
        })?;
    let subject = claims
        .sub
        .filter(|sub| !sub.is_empty())
        .ok_or_else(|| Error::bad_parameter_with_detail("id token missing sub claim", raw))?;
    Ok(ExchangedIdentity {
        email,
        subject,
        name: claims.name.filter(|name| !name.is_empty()),
    })
}

/// Keep only same-site relative paths. Anything under `/oauth` collapses to
/// `/` so a completed login never lands back on the callback page.
#[must_use]
pub fn sanitize_destination(destination: &str) -> String {
    let destination = destination.trim();
    if !destination.starts_with('/') || destination.starts_with("//") || destination.contains('\\')
    {
        return "/".to_string();
    }
    if destination == "/oauth" || destination.starts_with("/oauth/") {
        return "/".to_string();
    }
    destination.to_string()
}

fn origin_of(url: &str) -> Option<Url> {
    Url::parse(url)
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https") && url.host().is_some())
}

async fn read_limited(mut response: reqwest::Response, limit: usize) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if body.len() + chunk.len() > limit {
            return Err(Error::server("provider response too large"));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

pub struct OAuthCoordinator {
    store: Arc<dyn AuthStore>,
    config: Arc<AuthConfig>,
    google: Option<ProviderClient>,
    microsoft: Option<ProviderClient>,
    state_ttl: Duration,
    http: reqwest::Client,
}

impl OAuthCoordinator {
    /// # Errors
    ///
    /// Returns a server error if the HTTP client cannot be built.
    pub fn new(
        store: Arc<dyn AuthStore>,
        config: Arc<AuthConfig>,
        oauth: OAuthConfig,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(PROVIDER_TIMEOUT)
            .build()?;
        let state_ttl = oauth.state_ttl();
        Ok(Self {
            store,
            config,
            google: oauth.google.map(ProviderClient::Google),
            microsoft: oauth.microsoft.map(ProviderClient::Microsoft),
            state_ttl,
            http,
        })
    }

    fn client(&self, provider: OAuthProvider) -> Result<&ProviderClient> {
        match provider {
            OAuthProvider::Google => self.google.as_ref(),
            OAuthProvider::Microsoft => self.microsoft.as_ref(),
        }
        .ok_or_else(|| Error::bad_parameter(format!("oauth provider {provider} not configured")))
    }

    /// Work out the caller's origin from `Referer`, then `Origin`, and
    /// check it against the allow-list. With neither header the public base
    /// URL is used.
    ///
    /// # Errors
    ///
    /// Returns `BadParameter` for an unparsable or disallowed origin.
    pub fn resolve_origin(
        &self,
        referer: Option<&str>,
        origin: Option<&str>,
    ) -> Result<RequestOrigin> {
        let (url, path) = if let Some(referer) = referer {
            let url = origin_of(referer).ok_or_else(|| Error::bad_parameter("invalid referer"))?;
            let path = match url.query() {
                Some(query) => format!("{}?{query}", url.path()),
                None => url.path().to_string(),
            };
            (url, Some(path))
        } else if let Some(origin) = origin {
            let url = origin_of(origin).ok_or_else(|| Error::bad_parameter("invalid origin"))?;
            (url, None)
        } else {
            let url = origin_of(self.config.public_base_url())
                .ok_or_else(|| Error::server("invalid public base url"))?;
            (url, None)
        };

        let origin = url.origin().ascii_serialization();
        let allowed = self.config.allowed_origins().iter().any(|allowed| {
            origin_of(allowed).is_some_and(|allowed| allowed.origin().ascii_serialization() == origin)
        });
        if !allowed {
            warn!(%origin, "oauth request from disallowed origin");
            return Err(Error::bad_parameter("origin not allowed"));
        }
        Ok(RequestOrigin { origin, path })
    }

    /// Persist a fresh state record and return the provider's consent URL.
    ///
    /// `destination` overrides the referer path as the post-login target.
    ///
    /// # Errors
    ///
    /// Returns `BadParameter` for an unconfigured provider and a server
    /// error if the state cannot be persisted.
    #[instrument(skip(self, origin, destination), fields(origin = %origin.origin))]
    pub async fn begin_authorization(
        &self,
        provider: OAuthProvider,
        origin: &RequestOrigin,
        destination: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let client = self.client(provider)?;
        let destination_url = destination
            .or(origin.path.as_deref())
            .map(sanitize_destination);

        let authorization = OAuthAuthorization {
            provider,
            state: utils::generate_token_id()?,
            destination_url,
            subject: None,
            email: None,
            name: None,
            created_at: now,
            expires_at: now + self.state_ttl,
            exchanged_at: None,
        };
        let url = client.authorize_url(
            &origin.redirect_uri(provider),
            &utils::encode_token(authorization.state),
        )?;

        let store = self.store.clone();
        let record = authorization.clone();
        run_detached(async move { store.insert_authorization(&record).await }).await?;

        info!(%provider, "oauth authorization started");
        Ok(url)
    }

    /// Trade an authorization code for the identity it vouches for.
    ///
    /// # Errors
    ///
    /// - `BadParameter` for a malformed state, a state that was already
    ///   exchanged or has expired, or an ID token lacking required claims.
    /// - `NotExist` for an unknown state.
    /// - `ServerError` (with provider status and body as detail) when the
    ///   token endpoint fails or answers with something unusable.
    #[instrument(skip(self, code, state, origin), fields(origin = %origin.origin))]
    pub async fn complete_exchange(
        &self,
        provider: OAuthProvider,
        code: &str,
        state: &str,
        origin: &RequestOrigin,
        now: DateTime<Utc>,
    ) -> Result<CompletedExchange> {
        let client = self.client(provider)?;
        if code.is_empty() {
            return Err(Error::bad_parameter("missing authorization code"));
        }
        let state = utils::decode_token(state)
            .ok_or_else(|| Error::bad_parameter("invalid oauth state"))?;
        let authorization = self
            .store
            .authorization_by_state(provider, state)
            .await?
            .ok_or_else(|| Error::not_exist("oauth state not found"))?;
        if authorization.exchanged_at.is_some() {
            return Err(Error::bad_parameter("code already used"));
        }
        if authorization.expires_at <= now {
            return Err(Error::bad_parameter("code expired"));
        }

        let redirect_uri = origin.redirect_uri(provider);
        let form = client.token_form(code, &redirect_uri, now).await?;
        let response = self.http.post(client.token_url()).form(&form).send().await?;
        let status = response.status();
        let body = read_limited(response, MAX_PROVIDER_RESPONSE_BYTES).await?;
        if !status.is_success() {
            warn!(%provider, status = status.as_u16(), "oauth token exchange rejected");
            return Err(Error::server_with_detail(
                "oauth token exchange failed",
                json!({
                    "provider": provider.as_str(),
                    "status": status.as_u16(),
                    "body": String::from_utf8_lossy(&body),
                }),
            ));
        }

        let id_token = serde_json::from_slice::<TokenResponse>(&body)
            .ok()
            .and_then(|token| token.id_token)
            .ok_or_else(|| {
                Error::server_with_detail(
                    "oauth token response missing id_token",
                    json!({
                        "provider": provider.as_str(),
                        "status": status.as_u16(),
                        "body": String::from_utf8_lossy(&body),
                    }),
                )
            })?;
        let identity = parse_id_token(&id_token)?;

        let store = self.store.clone();
        let exchanged = identity.clone();
        let mark = run_detached(async move {
            store
                .mark_authorization_exchanged(provider, state, &exchanged, now, now)
                .await
        })
        .await?;
        match mark {
            ExchangeMark::Marked(authorization) => {
                info!(%provider, "oauth code exchanged");
                Ok(CompletedExchange {
                    identity,
                    destination_url: authorization.destination_url,
                })
            }
            ExchangeMark::AlreadyExchanged => Err(Error::bad_parameter("code already used")),
            ExchangeMark::Expired => Err(Error::bad_parameter("code expired")),
            ExchangeMark::NotFound => Err(Error::not_exist("oauth state not found")),
        }
    }
}

impl std::fmt::Debug for OAuthCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthCoordinator")
            .field("google", &self.google.is_some())
            .field("microsoft", &self.microsoft.is_some())
            .field("state_ttl", &self.state_ttl)
            .finish_non_exhaustive()
    }
}
