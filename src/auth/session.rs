//! Server-side sessions bound to the `appSession` cookie.
//!
//! A session is usable while it has no logout stamp and is not past its
//! expiry (`None` expiry never lapses). Renewal is lazy: when a request finds
//! less than half the default duration left, the expiry is pushed out to a
//! full duration and the cookie is rewritten. Logout stamps the row instead
//! of deleting it, so the audit trail survives.

use crate::{
    auth::{user_agent, utils},
    error::Result,
    store::{run_detached, AuthStore, Identity, Session},
};
use chrono::{DateTime, Duration, Utc};
use std::{net::IpAddr, sync::Arc};
use tracing::{debug, info};

pub const SESSION_COOKIE_NAME: &str = "appSession";
pub const SESSION_COOKIE_PATH: &str = "/api";

const COOKIE_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    /// Usable, but less than half the default duration remains.
    RenewalDue,
    LoggedOut,
    Expired,
}

impl Session {
    #[must_use]
    pub fn state(&self, now: DateTime<Utc>, default_ttl: Duration) -> SessionState {
        if self.logged_out_at.is_some() {
            return SessionState::LoggedOut;
        }
        match self.expires_at {
            None => SessionState::Active,
            Some(expires_at) if expires_at <= now => SessionState::Expired,
            Some(expires_at) if expires_at - now < default_ttl / 2 => SessionState::RenewalDue,
            Some(_) => SessionState::Active,
        }
    }

    #[must_use]
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.logged_out_at.is_none() && self.expires_at.map_or(true, |expires_at| expires_at > now)
    }

    /// Opaque wire form of the session id.
    #[must_use]
    pub fn token(&self) -> String {
        utils::encode_token(self.id)
    }
}

/// Request attributes recorded with a new session.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip_addr: Option<IpAddr>,
    pub user_agent: Option<String>,
}

/// Outcome of resolving a session cookie.
#[derive(Debug, Clone)]
pub enum SessionLookup {
    /// No cookie, a malformed value, or an unknown id.
    Missing,
    /// The session exists but is logged out, expired, or its identity is gone
    /// or deactivated.
    Unusable(Session),
    Active {
        session: Session,
        identity: Identity,
        renewed: bool,
    },
}

#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn AuthStore>,
    default_ttl: Duration,
}

impl SessionManager {
    #[must_use]
    pub fn new(store: Arc<dyn AuthStore>, default_ttl: Duration) -> Self {
        Self { store, default_ttl }
    }

    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Create and persist a session. `ttl == None` creates a session that
    /// never expires.
    ///
    /// # Errors
    ///
    /// Returns a server error if the id cannot be generated or persisted.
    pub async fn create_session(
        &self,
        identity: &Identity,
        client: &ClientInfo,
        ttl: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Result<Session> {
        let session = Session {
            id: utils::generate_token_id()?,
            identity_id: identity.id,
            ip_addr: client.ip_addr,
            user_agent: client.user_agent.clone(),
            user_agent_description: client.user_agent.as_deref().map(user_agent::describe),
            created_at: now,
            expires_at: ttl.map(|ttl| now + ttl),
            logged_out_at: None,
        };

        let store = self.store.clone();
        let record = session.clone();
        run_detached(async move { store.insert_session(&record).await }).await?;

        info!(identity_id = identity.id, expires_at = ?session.expires_at, "session created");
        Ok(session)
    }

    /// Load a session by its wire token. Malformed tokens resolve to `None`.
    ///
    /// # Errors
    ///
    /// Returns a server error if the store fails.
    pub async fn resolve_session(&self, token: &str) -> Result<Option<Session>> {
        let Some(id) = utils::decode_token(token) else {
            debug!("malformed session token");
            return Ok(None);
        };
        self.store.session_by_id(id).await
    }

    /// Push the expiry out to a full default duration when less than half of
    /// it remains. Returns whether the session was renewed.
    ///
    /// # Errors
    ///
    /// Returns a server error if the new expiry cannot be persisted.
    pub async fn ensure_renewal(&self, session: &mut Session, now: DateTime<Utc>) -> Result<bool> {
        if session.state(now, self.default_ttl) != SessionState::RenewalDue {
            return Ok(false);
        }
        let expires_at = now + self.default_ttl;
        let store = self.store.clone();
        let id = session.id;
        run_detached(async move { store.update_session_expiry(id, expires_at).await }).await?;
        session.expires_at = Some(expires_at);
        debug!(identity_id = session.identity_id, "session renewed");
        Ok(true)
    }

    /// Stamp the logout time. A second logout keeps the first stamp.
    ///
    /// # Errors
    ///
    /// Returns a server error if the stamp cannot be persisted.
    pub async fn logout(&self, session: &mut Session, now: DateTime<Utc>) -> Result<()> {
        let store = self.store.clone();
        let id = session.id;
        let stamped =
            run_detached(async move { store.mark_session_logged_out(id, now).await }).await?;
        session.logged_out_at = stamped.or(Some(now));
        info!(identity_id = session.identity_id, "session logged out");
        Ok(())
    }

    /// Resolve a cookie value into a usable session and its identity,
    /// renewing the session when due.
    ///
    /// # Errors
    ///
    /// Returns a server error if the store fails.
    pub async fn authenticate(&self, token: &str, now: DateTime<Utc>) -> Result<SessionLookup> {
        let Some(mut session) = self.resolve_session(token).await? else {
            return Ok(SessionLookup::Missing);
        };
        if !session.is_usable(now) {
            return Ok(SessionLookup::Unusable(session));
        }
        let identity = match self.store.identity_by_id(session.identity_id).await? {
            Some(identity) if identity.is_active() => identity,
            _ => return Ok(SessionLookup::Unusable(session)),
        };
        let renewed = self.ensure_renewal(&mut session, now).await?;
        Ok(SessionLookup::Active {
            session,
            identity,
            renewed,
        })
    }
}

/// `Set-Cookie` value carrying the session token. Sessions without expiry get
/// a browser-session cookie.
#[must_use]
pub fn session_cookie(session: &Session) -> String {
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={}; Path={SESSION_COOKIE_PATH}; HttpOnly; SameSite=Lax",
        session.token()
    );
    if let Some(expires_at) = session.expires_at {
        cookie.push_str(&format!("; Expires={}", expires_at.format(COOKIE_DATE_FORMAT)));
    }
    cookie.push_str("; Secure");
    cookie
}

/// `Set-Cookie` value that clears the session cookie.
#[must_use]
pub fn clear_session_cookie() -> String {
    format!(
        "{SESSION_COOKIE_NAME}=; Path={SESSION_COOKIE_PATH}; HttpOnly; SameSite=Lax; \
         Expires=Thu, 01 Jan 1970 00:00:00 GMT; Max-Age=0; Secure"
    )
}

/// Extract the session token from a `Cookie` header value.
#[must_use]
pub fn extract_session_token(cookie_header: &str) -> Option<String> {
    cookie_header.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key.trim() == SESSION_COOKIE_NAME && !value.trim().is_empty())
            .then(|| value.trim().to_string())
    })
}
