//! Single-use, expiring capabilities delivered by email.
//!
//! A token moves `issued -> used` at most once. Redemption checks run in a
//! fixed order (already used, then expired) so callers always get the same
//! answer for the same token, and the "mark used" write lands atomically with
//! the redemption's effect.

use crate::{
    auth::{
        config::AuthConfig,
        mailer::{EmailMessage, Mailer},
        utils,
    },
    error::{Error, Result},
    store::{
        run_detached, AuthStore, Identity, Redemption, RedemptionEffect, VerificationPurpose,
        VerificationToken,
    },
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

impl VerificationPurpose {
    #[must_use]
    pub fn email_subject(self, app_name: &str) -> String {
        match self {
            Self::PasswordReset => format!("{app_name}: Reset Your Password"),
            Self::SignupVerify => format!("{app_name}: Verify Your Account"),
        }
    }

    #[must_use]
    pub fn email_body(self, app_name: &str, link: &str) -> String {
        let intro = match self {
            Self::PasswordReset => {
                "<p>We received a request to reset your password. \
                 <a href=\"{link}\">Choose a new password</a>.</p>"
            }
            Self::SignupVerify => {
                "<p>Thanks for signing up to {app}. \
                 <a href=\"{link}\">Confirm your email address</a> to finish registration.</p>"
            }
        };
        let intro = intro.replace("{link}", link).replace("{app}", app_name);
        format!(
            "{intro}<p>If the link does not open, paste this address into your browser:<br>{link}</p>\
             <p>The link can be used once and expires soon.</p>"
        )
    }
}

impl VerificationToken {
    /// Opaque wire form of the token id.
    #[must_use]
    pub fn token(&self) -> String {
        utils::encode_token(self.id)
    }

    /// Check order: already used, then expired.
    ///
    /// # Errors
    ///
    /// Returns `BadParameter` naming the first failed check.
    pub fn ensure_redeemable(&self, now: DateTime<Utc>) -> Result<()> {
        if self.used_at.is_some() {
            return Err(Error::bad_parameter("verification token already used"));
        }
        if self.expires_at <= now {
            return Err(Error::bad_parameter("verification token expired"));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct VerificationTokenService {
    store: Arc<dyn AuthStore>,
    mailer: Mailer,
    config: Arc<AuthConfig>,
}

impl VerificationTokenService {
    #[must_use]
    pub fn new(store: Arc<dyn AuthStore>, mailer: Mailer, config: Arc<AuthConfig>) -> Self {
        Self {
            store,
            mailer,
            config,
        }
    }

    fn link_prefix(&self, purpose: VerificationPurpose) -> &str {
        match purpose {
            VerificationPurpose::PasswordReset => self.config.password_reset_url(),
            VerificationPurpose::SignupVerify => self.config.signup_verify_url(),
        }
    }

    /// Persist a new token and queue the email carrying its link. Delivery
    /// happens in the background; the token is valid whether or not the
    /// email goes out.
    ///
    /// # Errors
    ///
    /// Returns a server error if the token cannot be generated or persisted.
    pub async fn issue(
        &self,
        purpose: VerificationPurpose,
        email: &str,
        identity_id: Option<i32>,
        payload: Option<Value>,
        now: DateTime<Utc>,
    ) -> Result<VerificationToken> {
        let token = VerificationToken {
            id: utils::generate_token_id()?,
            purpose,
            identity_id,
            created_at: now,
            expires_at: now + self.config.verification_ttl(),
            used_at: None,
            payload,
        };

        let store = self.store.clone();
        let record = token.clone();
        run_detached(async move { store.insert_verification(&record).await }).await?;

        let app_name = self.config.app_name();
        let link = format!("{}{}", self.link_prefix(purpose), token.token());
        let queued = self.mailer.dispatch(EmailMessage {
            to: email.to_string(),
            subject: purpose.email_subject(app_name),
            html_body: purpose.email_body(app_name, &link),
        });
        if !queued {
            warn!(?purpose, "verification email not queued");
        }
        info!(?purpose, identity_id = ?identity_id, "verification token issued");
        Ok(token)
    }

    /// Load a token by its wire form without consuming it.
    ///
    /// # Errors
    ///
    /// Returns `BadParameter` for a malformed token and `NotExist` for an
    /// unknown one.
    pub async fn redeem_check(
        &self,
        purpose: VerificationPurpose,
        token: &str,
    ) -> Result<VerificationToken> {
        let id = utils::decode_token(token)
            .ok_or_else(|| Error::bad_parameter("invalid verification token"))?;
        self.store
            .verification_by_id(purpose, id)
            .await?
            .ok_or_else(|| Error::not_exist("verification token not found"))
    }

    /// Mark the token used and apply `effect` in one atomic step. Exactly
    /// one of any number of concurrent redemptions succeeds.
    ///
    /// # Errors
    ///
    /// Returns `BadParameter` if the token was used or expired in the
    /// meantime, and the effect's own error (for example `Preexist`) if it
    /// fails, in which case the token stays unused.
    pub async fn redeem(
        &self,
        token: &VerificationToken,
        effect: RedemptionEffect,
        now: DateTime<Utc>,
    ) -> Result<Identity> {
        let store = self.store.clone();
        let (purpose, id) = (token.purpose, token.id);
        let outcome =
            run_detached(async move { store.redeem_verification(purpose, id, now, effect).await })
                .await?;
        match outcome {
            Redemption::Redeemed(identity) => {
                info!(?purpose, identity_id = identity.id, "verification token redeemed");
                Ok(identity)
            }
            Redemption::AlreadyUsed => Err(Error::bad_parameter("verification token already used")),
            Redemption::Expired => Err(Error::bad_parameter("verification token expired")),
            Redemption::NotFound => Err(Error::not_exist("verification token not found")),
        }
    }
}
