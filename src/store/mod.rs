//! Persistence seam for identities, sessions, verification tokens and OAuth
//! authorization states.
//!
//! [`AuthStore`] is the only way components touch storage. [`PgStore`] backs
//! production; [`MemoryStore`] backs tests and local development. Both
//! implement the conditional "mark once" writes that make token redemption
//! and code exchange race-free.

use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::{fmt, future::Future, net::IpAddr, str::FromStr};
use uuid::Uuid;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: i32,
    pub email: String,
    pub email_confirmed: bool,
    pub password_hash: Option<String>,
    pub name: Option<String>,
    pub profile_img_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl Identity {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.deactivated_at.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIdentity {
    pub email: String,
    pub email_confirmed: bool,
    pub password_hash: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: Uuid,
    pub identity_id: i32,
    pub ip_addr: Option<IpAddr>,
    pub user_agent: Option<String>,
    pub user_agent_description: Option<String>,
    pub created_at: DateTime<Utc>,
    /// `None` means the session never expires.
    pub expires_at: Option<DateTime<Utc>>,
    pub logged_out_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VerificationPurpose {
    PasswordReset,
    SignupVerify,
}

impl VerificationPurpose {
    #[must_use]
    pub fn as_i16(self) -> i16 {
        match self {
            Self::PasswordReset => 0,
            Self::SignupVerify => 1,
        }
    }

    /// # Errors
    ///
    /// Returns a server error for values outside the known set.
    pub fn from_i16(value: i16) -> Result<Self> {
        match value {
            0 => Ok(Self::PasswordReset),
            1 => Ok(Self::SignupVerify),
            other => Err(Error::server(format!("unknown verification purpose {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerificationToken {
    pub id: Uuid,
    pub purpose: VerificationPurpose,
    pub identity_id: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub payload: Option<Value>,
}

/// The write performed together with marking a verification token used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedemptionEffect {
    /// Mark the linked identity's email as confirmed.
    ConfirmEmail { identity_id: i32 },
    /// Replace the password hash and confirm the email.
    SetPassword {
        identity_id: i32,
        password_hash: String,
    },
    /// Create a new identity. Fails with `Preexist` if the email is taken.
    ProvisionIdentity(NewIdentity),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redemption {
    /// The token was marked used and the effect applied. Carries the
    /// affected identity.
    Redeemed(Identity),
    AlreadyUsed,
    Expired,
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OAuthProvider {
    Google,
    Microsoft,
}

impl OAuthProvider {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::Microsoft => "microsoft",
        }
    }

    #[must_use]
    pub fn as_i16(self) -> i16 {
        match self {
            Self::Google => 1,
            Self::Microsoft => 2,
        }
    }

    /// # Errors
    ///
    /// Returns a server error for values outside the known set.
    pub fn from_i16(value: i16) -> Result<Self> {
        match value {
            1 => Ok(Self::Google),
            2 => Ok(Self::Microsoft),
            other => Err(Error::server(format!("unknown oauth provider {other}"))),
        }
    }
}

impl fmt::Display for OAuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OAuthProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "google" => Ok(Self::Google),
            "microsoft" => Ok(Self::Microsoft),
            _ => Err(Error::bad_parameter("invalid oauth provider")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthAuthorization {
    pub provider: OAuthProvider,
    pub state: Uuid,
    pub destination_url: Option<String>,
    pub subject: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub exchanged_at: Option<DateTime<Utc>>,
}

/// Identity attributes resolved from a provider's ID token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangedIdentity {
    pub email: String,
    pub subject: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeMark {
    Marked(OAuthAuthorization),
    AlreadyExchanged,
    Expired,
    NotFound,
}

#[async_trait]
pub trait AuthStore: Send + Sync {
    /// Backend name and reachability, for health reporting.
    fn backend(&self) -> &'static str;

    async fn ping(&self) -> Result<()>;

    async fn identity_by_id(&self, id: i32) -> Result<Option<Identity>>;

    async fn identity_by_email(&self, email: &str) -> Result<Option<Identity>>;

    /// # Errors
    ///
    /// Returns `Preexist` when the email is already registered.
    async fn create_identity(&self, identity: NewIdentity) -> Result<Identity>;

    async fn update_identity_name(&self, id: i32, name: &str) -> Result<Option<Identity>>;

    async fn confirm_email(&self, id: i32) -> Result<()>;

    async fn insert_session(&self, session: &Session) -> Result<()>;

    async fn session_by_id(&self, id: Uuid) -> Result<Option<Session>>;

    /// Last writer wins.
    async fn update_session_expiry(&self, id: Uuid, expires_at: DateTime<Utc>) -> Result<()>;

    /// Stamp the logout time unless already set. Returns the stored value.
    async fn mark_session_logged_out(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>>;

    async fn insert_verification(&self, token: &VerificationToken) -> Result<()>;

    async fn verification_by_id(
        &self,
        purpose: VerificationPurpose,
        id: Uuid,
    ) -> Result<Option<VerificationToken>>;

    /// Atomically mark an unused, unexpired token as used and apply `effect`.
    /// Either both writes land or neither does.
    async fn redeem_verification(
        &self,
        purpose: VerificationPurpose,
        id: Uuid,
        at: DateTime<Utc>,
        effect: RedemptionEffect,
    ) -> Result<Redemption>;

    async fn insert_authorization(&self, authorization: &OAuthAuthorization) -> Result<()>;

    async fn authorization_by_state(
        &self,
        provider: OAuthProvider,
        state: Uuid,
    ) -> Result<Option<OAuthAuthorization>>;

    /// Persist the exchanged identity and stamp the exchange time, only if
    /// the state has not been exchanged and had not expired at `checked_at`.
    async fn mark_authorization_exchanged(
        &self,
        provider: OAuthProvider,
        state: Uuid,
        identity: &ExchangedIdentity,
        checked_at: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<ExchangeMark>;
}

/// Run a store write on its own task and wait for it.
///
/// Dropping the caller (client disconnect, timeout) does not cancel the write.
///
/// # Errors
///
/// Propagates the write's error, or a server error if the task panicked.
pub async fn run_detached<T, F>(write: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(write).await?
}
