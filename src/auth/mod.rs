//! Identity, session and external-authorization flows.
//!
//! [`AuthService`] wires the components together and is what the HTTP layer
//! talks to:
//!
//! - password login through [`credential::CredentialStore`] and
//!   [`session::SessionManager`];
//! - sign-up confirmation and password reset through
//!   [`verification::VerificationTokenService`];
//! - Google and Microsoft sign-in through [`oauth::OAuthCoordinator`].
//!
//! Every component is built once at startup and shared behind an `Arc`.

pub mod config;
pub mod credential;
pub mod mailer;
pub mod oauth;
pub mod session;
pub mod user_agent;
pub mod utils;
pub mod verification;

pub use config::AuthConfig;
pub use credential::CredentialStore;
pub use mailer::{EmailSender, LogEmailSender, Mailer, MailerConfig, SmtpEmailSender};
pub use oauth::{OAuthConfig, OAuthCoordinator, RequestOrigin};
pub use session::{ClientInfo, SessionLookup, SessionManager};
pub use verification::VerificationTokenService;

use crate::{
    codec::IdCodec,
    error::{Error, Result},
    store::{
        run_detached, AuthStore, Identity, NewIdentity, OAuthProvider, RedemptionEffect, Session,
        VerificationPurpose, VerificationToken,
    },
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

const MIN_NAME_LEN: usize = 2;

/// Prospective account carried by a `signup_verify` token. Only the hash of
/// the chosen password is stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignupPayload {
    pub email: String,
    pub password_hash: String,
    pub name: String,
}

/// Result of a completed OAuth sign-in.
#[derive(Debug, Clone)]
pub struct OAuthLogin {
    pub identity: Identity,
    pub session: Session,
    pub destination_url: Option<String>,
}

fn valid_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.chars().count() < MIN_NAME_LEN {
        return Err(Error::bad_parameter(format!(
            "name must be at least {MIN_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}

fn valid_password(password: &str) -> Result<()> {
    if password.is_empty() {
        return Err(Error::bad_parameter("password must not be empty"));
    }
    Ok(())
}

pub struct AuthService {
    config: Arc<AuthConfig>,
    store: Arc<dyn AuthStore>,
    codec: Arc<IdCodec>,
    credentials: CredentialStore,
    sessions: SessionManager,
    verification: VerificationTokenService,
    oauth: OAuthCoordinator,
    mailer: Mailer,
}

impl AuthService {
    /// # Errors
    ///
    /// Returns a server error if the OAuth HTTP client cannot be built.
    pub fn new(
        config: Arc<AuthConfig>,
        store: Arc<dyn AuthStore>,
        codec: IdCodec,
        credentials: CredentialStore,
        mailer: Mailer,
        oauth: OAuthConfig,
    ) -> Result<Self> {
        let sessions = SessionManager::new(store.clone(), config.session_ttl());
        let verification =
            VerificationTokenService::new(store.clone(), mailer.clone(), config.clone());
        let oauth = OAuthCoordinator::new(store.clone(), config.clone(), oauth)?;
        Ok(Self {
            config,
            store,
            codec: Arc::new(codec),
            credentials,
            sessions,
            verification,
            oauth,
            mailer,
        })
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn codec(&self) -> &IdCodec {
        &self.codec
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    #[must_use]
    pub fn oauth(&self) -> &OAuthCoordinator {
        &self.oauth
    }

    #[must_use]
    pub fn mailer(&self) -> &Mailer {
        &self.mailer
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn AuthStore> {
        &self.store
    }

    /// Check an email and password and open a session. `remember` opens a
    /// session that never expires.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCredential` for an unknown email, a wrong password,
    /// an account without a password or a deactivated account alike.
    #[instrument(skip(self, password, client))]
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        remember: bool,
        client: &ClientInfo,
        now: DateTime<Utc>,
    ) -> Result<(Identity, Session)> {
        let email = utils::trim_email(email);
        let identity = match self.store.identity_by_email(&email).await? {
            Some(identity) if identity.is_active() => identity,
            _ => {
                debug!("login for unknown or inactive account");
                return self
                    .credentials
                    .reject_blocking(password.to_string())
                    .await
                    .and(Err(Error::InvalidCredential));
            }
        };
        let Some(password_hash) = identity.password_hash.clone() else {
            debug!(identity_id = identity.id, "login for account without password");
            return self
                .credentials
                .reject_blocking(password.to_string())
                .await
                .and(Err(Error::InvalidCredential));
        };
        self.credentials
            .verify_blocking(password_hash, password.to_string())
            .await?;

        let ttl = if remember {
            None
        } else {
            Some(self.sessions.default_ttl())
        };
        let session = self
            .sessions
            .create_session(&identity, client, ttl, now)
            .await?;
        info!(identity_id = identity.id, remember, "login succeeded");
        Ok((identity, session))
    }

    /// Validate a sign-up and mail a confirmation link. Nothing is created
    /// until the link is redeemed.
    ///
    /// # Errors
    ///
    /// Returns `BadParameter` for invalid input and `Preexist` when an
    /// account with the email already exists.
    #[instrument(skip(self, password, name))]
    pub async fn begin_signup(
        &self,
        email: &str,
        password: &str,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let email = utils::trim_email(email);
        if !utils::valid_email(&email) {
            return Err(Error::bad_parameter("invalid email"));
        }
        valid_password(password)?;
        let name = valid_name(name)?;
        if self.store.identity_by_email(&email).await?.is_some() {
            return Err(Error::preexist("email already registered"));
        }

        let password_hash = self.credentials.hash_blocking(password.to_string()).await?;
        let payload = serde_json::to_value(SignupPayload {
            email: email.clone(),
            password_hash,
            name,
        })?;
        self.verification
            .issue(VerificationPurpose::SignupVerify, &email, None, Some(payload), now)
            .await?;
        Ok(())
    }

    /// Redeem a sign-up token, creating the confirmed account it carries.
    ///
    /// # Errors
    ///
    /// - `BadParameter` for a malformed, used or expired token.
    /// - `NotExist` for an unknown token.
    /// - `Preexist` when an account with the email was created after the
    ///   token was issued; the token stays unused in that case.
    #[instrument(skip_all)]
    pub async fn complete_signup(&self, token: &str, now: DateTime<Utc>) -> Result<Identity> {
        let token = self
            .verification
            .redeem_check(VerificationPurpose::SignupVerify, token)
            .await?;
        token.ensure_redeemable(now)?;

        let payload: SignupPayload = token
            .payload
            .clone()
            .map(serde_json::from_value)
            .transpose()?
            .ok_or_else(|| Error::server("sign-up token without payload"))?;
        if self.store.identity_by_email(&payload.email).await?.is_some() {
            return Err(Error::preexist("email already registered"));
        }

        let effect = RedemptionEffect::ProvisionIdentity(NewIdentity {
            email: payload.email,
            email_confirmed: true,
            password_hash: Some(payload.password_hash),
            name: Some(payload.name),
        });
        let identity = self.verification.redeem(&token, effect, now).await?;
        info!(identity_id = identity.id, "account created");
        Ok(identity)
    }

    /// Mail a password reset link if the email belongs to an active account.
    /// Succeeds either way so the response does not reveal which emails are
    /// registered.
    ///
    /// # Errors
    ///
    /// Returns a server error only if the store fails.
    #[instrument(skip(self))]
    pub async fn begin_password_reset(&self, email: &str, now: DateTime<Utc>) -> Result<()> {
        let email = utils::trim_email(email);
        match self.store.identity_by_email(&email).await? {
            Some(identity) if identity.is_active() => {
                self.verification
                    .issue(
                        VerificationPurpose::PasswordReset,
                        &identity.email,
                        Some(identity.id),
                        None,
                        now,
                    )
                    .await?;
            }
            _ => debug!("password reset for unknown or inactive account"),
        }
        Ok(())
    }

    async fn password_reset_target(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<(VerificationToken, Identity)> {
        let token = self
            .verification
            .redeem_check(VerificationPurpose::PasswordReset, token)
            .await?;
        token.ensure_redeemable(now)?;
        let identity_id = token
            .identity_id
            .ok_or_else(|| Error::server("password reset token without owner"))?;
        let identity = self
            .store
            .identity_by_id(identity_id)
            .await?
            .ok_or_else(|| Error::not_exist("account not found"))?;
        Ok((token, identity))
    }

    /// Confirm a password reset link without consuming it. Receiving the
    /// link proves control of the mailbox, so the email is marked confirmed.
    ///
    /// # Errors
    ///
    /// `BadParameter` for a malformed, used or expired token and `NotExist`
    /// for an unknown token or account.
    #[instrument(skip_all)]
    pub async fn confirm_password_reset(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Identity> {
        let (_, mut identity) = self.password_reset_target(token, now).await?;
        if !identity.email_confirmed {
            let store = self.store.clone();
            let id = identity.id;
            run_detached(async move { store.confirm_email(id).await }).await?;
            identity.email_confirmed = true;
        }
        Ok(identity)
    }

    /// Redeem a password reset link, setting a new password.
    ///
    /// # Errors
    ///
    /// As [`AuthService::confirm_password_reset`], plus `BadParameter` for
    /// an empty password or a token consumed concurrently.
    #[instrument(skip_all)]
    pub async fn complete_password_reset(
        &self,
        token: &str,
        password: &str,
        now: DateTime<Utc>,
    ) -> Result<Identity> {
        valid_password(password)?;
        let (token, identity) = self.password_reset_target(token, now).await?;
        let password_hash = self.credentials.hash_blocking(password.to_string()).await?;
        let effect = RedemptionEffect::SetPassword {
            identity_id: identity.id,
            password_hash,
        };
        let identity = self.verification.redeem(&token, effect, now).await?;
        info!(identity_id = identity.id, "password reset");
        Ok(identity)
    }

    /// Start an OAuth sign-in and return the provider's consent URL.
    ///
    /// # Errors
    ///
    /// `BadParameter` for a disallowed origin or an unconfigured provider.
    pub async fn begin_oauth(
        &self,
        provider: OAuthProvider,
        origin: &RequestOrigin,
        destination: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<String> {
        self.oauth
            .begin_authorization(provider, origin, destination, now)
            .await
    }

    /// Finish an OAuth sign-in: exchange the code, find or create the
    /// account for the returned email and open a session.
    ///
    /// # Errors
    ///
    /// Everything [`OAuthCoordinator::complete_exchange`] returns, plus
    /// `InvalidCredential` for a deactivated account.
    #[instrument(skip(self, code, state, origin, client))]
    pub async fn complete_oauth(
        &self,
        provider: OAuthProvider,
        code: &str,
        state: &str,
        origin: &RequestOrigin,
        client: &ClientInfo,
        now: DateTime<Utc>,
    ) -> Result<OAuthLogin> {
        let exchange = self
            .oauth
            .complete_exchange(provider, code, state, origin, now)
            .await?;
        let email = utils::trim_email(&exchange.identity.email);

        let identity = match self.store.identity_by_email(&email).await? {
            Some(identity) if !identity.is_active() => {
                warn!(identity_id = identity.id, "oauth sign-in for deactivated account");
                return Err(Error::InvalidCredential);
            }
            Some(mut identity) => {
                if !identity.email_confirmed {
                    let store = self.store.clone();
                    let id = identity.id;
                    run_detached(async move { store.confirm_email(id).await }).await?;
                    identity.email_confirmed = true;
                }
                identity
            }
            None => self.provision_oauth_identity(email, exchange.identity.name).await?,
        };

        let ttl = Some(self.sessions.default_ttl());
        let session = self
            .sessions
            .create_session(&identity, client, ttl, now)
            .await?;
        info!(identity_id = identity.id, %provider, "oauth sign-in succeeded");
        Ok(OAuthLogin {
            identity,
            session,
            destination_url: exchange.destination_url,
        })
    }

    async fn provision_oauth_identity(
        &self,
        email: String,
        name: Option<String>,
    ) -> Result<Identity> {
        let store = self.store.clone();
        let new = NewIdentity {
            email: email.clone(),
            email_confirmed: true,
            password_hash: None,
            name,
        };
        match run_detached(async move { store.create_identity(new).await }).await {
            Ok(identity) => {
                info!(identity_id = identity.id, "account created from oauth");
                Ok(identity)
            }
            // Lost a race with a concurrent sign-in for the same email.
            Err(Error::Preexist(_)) => self
                .store
                .identity_by_email(&email)
                .await?
                .ok_or_else(|| Error::server("account vanished after conflict")),
            Err(err) => Err(err),
        }
    }

    /// Resolve a session cookie value.
    ///
    /// # Errors
    ///
    /// Returns a server error if the store fails.
    pub async fn authenticate(&self, token: &str, now: DateTime<Utc>) -> Result<SessionLookup> {
        self.sessions.authenticate(token, now).await
    }

    /// # Errors
    ///
    /// Returns a server error if the logout cannot be persisted.
    pub async fn logout(&self, session: &mut Session, now: DateTime<Utc>) -> Result<()> {
        self.sessions.logout(session, now).await
    }

    /// # Errors
    ///
    /// `BadParameter` for a name shorter than two characters and `NotExist`
    /// if the account is gone.
    #[instrument(skip(self, name))]
    pub async fn update_name(&self, identity_id: i32, name: &str) -> Result<Identity> {
        let name = valid_name(name)?;
        self.store
            .update_identity_name(identity_id, &name)
            .await?
            .ok_or_else(|| Error::not_exist("account not found"))
    }
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService")
            .field("config", &self.config)
            .field("backend", &self.store.backend())
            .field("oauth", &self.oauth)
            .finish_non_exhaustive()
    }
}
