//! Provider endpoints and per-provider request parameters.

use super::assertion::{ClientAssertionSigner, CLIENT_ASSERTION_TYPE};
use crate::{
    error::{Error, Result},
    store::OAuthProvider,
};
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use url::Url;

pub const GOOGLE_AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const MICROSOFT_AUTHORIZE_URL: &str =
    "https://login.microsoftonline.com/common/oauth2/v2.0/authorize";
pub const MICROSOFT_TOKEN_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/token";

const SCOPE: &str = "openid email profile";

#[derive(Debug)]
pub struct GoogleClient {
    client_id: String,
    client_secret: SecretString,
    authorize_url: String,
    token_url: String,
}

impl GoogleClient {
    #[must_use]
    pub fn new(client_id: String, client_secret: SecretString) -> Self {
        Self {
            client_id,
            client_secret,
            authorize_url: GOOGLE_AUTHORIZE_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
        }
    }

    #[must_use]
    pub fn with_endpoints(mut self, authorize_url: String, token_url: String) -> Self {
        self.authorize_url = authorize_url;
        self.token_url = token_url;
        self
    }
}

#[derive(Debug)]
pub struct MicrosoftClient {
    authorize_url: String,
    token_url: String,
    signer: ClientAssertionSigner,
}

impl MicrosoftClient {
    /// The assertion audience is the token endpoint.
    #[must_use]
    pub fn new(client_id: String, private_key_pem: SecretString, certificate_pem: String) -> Self {
        Self::with_endpoints(
            client_id,
            private_key_pem,
            certificate_pem,
            MICROSOFT_AUTHORIZE_URL.to_string(),
            MICROSOFT_TOKEN_URL.to_string(),
        )
    }

    #[must_use]
    pub fn with_endpoints(
        client_id: String,
        private_key_pem: SecretString,
        certificate_pem: String,
        authorize_url: String,
        token_url: String,
    ) -> Self {
        let signer =
            ClientAssertionSigner::new(client_id, token_url.clone(), private_key_pem, certificate_pem);
        Self {
            authorize_url,
            token_url,
            signer,
        }
    }
}

#[derive(Debug)]
pub enum ProviderClient {
    Google(GoogleClient),
    Microsoft(MicrosoftClient),
}

impl ProviderClient {
    #[must_use]
    pub fn provider(&self) -> OAuthProvider {
        match self {
            Self::Google(_) => OAuthProvider::Google,
            Self::Microsoft(_) => OAuthProvider::Microsoft,
        }
    }

    #[must_use]
    pub fn token_url(&self) -> &str {
        match self {
            Self::Google(client) => &client.token_url,
            Self::Microsoft(client) => &client.token_url,
        }
    }

    /// Provider consent URL carrying `state`. Microsoft also receives the
    /// state as its `nonce`.
    ///
    /// # Errors
    ///
    /// Returns a server error if the configured endpoint is not a URL.
    pub fn authorize_url(&self, redirect_uri: &str, state: &str) -> Result<String> {
        let (endpoint, client_id) = match self {
            Self::Google(client) => (&client.authorize_url, client.client_id.as_str()),
            Self::Microsoft(client) => (&client.authorize_url, client.signer.client_id()),
        };
        let mut url = Url::parse(endpoint)
            .map_err(|err| Error::server(format!("invalid authorize endpoint: {err}")))?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", client_id)
                .append_pair("redirect_uri", redirect_uri)
                .append_pair("response_type", "code")
                .append_pair("scope", SCOPE)
                .append_pair("state", state);
            if let Self::Microsoft(_) = self {
                query
                    .append_pair("response_mode", "query")
                    .append_pair("nonce", state);
            }
        }
        Ok(url.into())
    }

    /// Form body for the authorization-code exchange.
    ///
    /// # Errors
    ///
    /// Returns a server error if the Microsoft client assertion cannot be
    /// produced.
    pub async fn token_form(
        &self,
        code: &str,
        redirect_uri: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<(&'static str, String)>> {
        let mut form = vec![
            ("grant_type", "authorization_code".to_string()),
            ("code", code.to_string()),
            ("redirect_uri", redirect_uri.to_string()),
        ];
        match self {
            Self::Google(client) => {
                form.push(("client_id", client.client_id.clone()));
                form.push((
                    "client_secret",
                    client.client_secret.expose_secret().to_string(),
                ));
            }
            Self::Microsoft(client) => {
                let assertion = client.signer.assertion(now).await?;
                form.push(("client_id", client.signer.client_id().to_string()));
                form.push(("scope", SCOPE.to_string()));
                form.push(("client_assertion_type", CLIENT_ASSERTION_TYPE.to_string()));
                form.push(("client_assertion", assertion.to_string()));
            }
        }
        Ok(form)
    }
}
