//! # Salesgate (identity, sessions and external authorization)
//!
//! `salesgate` is the authentication core of the sales pipeline backend. It
//! owns everything with real state-machine semantics around an account:
//!
//! - **Credentials:** Argon2id password hashing and constant-time verification.
//! - **Sessions:** cookie-backed server-side sessions with lazy renewal and
//!   audit-preserving logout.
//! - **Verification tokens:** single-use, expiring capabilities mailed out for
//!   sign-up confirmation and password reset.
//! - **OAuth:** CSRF-safe authorization-code exchange with Google and
//!   Microsoft (the latter authenticated with a signed client assertion).
//!
//! Numeric identifiers never leave the process unobfuscated; see [`codec`].
//!
//! Expiry of sessions, tokens and authorization states is evaluated at read
//! time. Nothing sweeps expired rows.

pub mod auth;
pub mod cli;
pub mod codec;
pub mod error;
pub mod salesgate;
pub mod store;

pub use error::{Error, Result};

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
