//! In-process [`AuthStore`] for tests and local development.
//!
//! All state sits behind one async mutex, so every conditional write is
//! atomic with respect to every other.

use super::{
    AuthStore, ExchangeMark, ExchangedIdentity, Identity, NewIdentity, OAuthAuthorization,
    OAuthProvider, Redemption, RedemptionEffect, Session, VerificationPurpose, VerificationToken,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Tables {
    next_identity_id: i32,
    identities: HashMap<i32, Identity>,
    sessions: HashMap<Uuid, Session>,
    verifications: HashMap<Uuid, VerificationToken>,
    authorizations: HashMap<(OAuthProvider, Uuid), OAuthAuthorization>,
}

impl Tables {
    fn find_by_email(&self, email: &str) -> Option<&Identity> {
        self.identities
            .values()
            .find(|identity| identity.email == email)
    }

    fn insert_identity(&mut self, new: NewIdentity) -> Result<Identity> {
        if self.find_by_email(&new.email).is_some() {
            return Err(Error::preexist("email already registered"));
        }
        self.next_identity_id += 1;
        let identity = Identity {
            id: self.next_identity_id,
            email: new.email,
            email_confirmed: new.email_confirmed,
            password_hash: new.password_hash,
            name: new.name,
            profile_img_url: None,
            created_at: Utc::now(),
            deactivated_at: None,
        };
        self.identities.insert(identity.id, identity.clone());
        Ok(identity)
    }

    fn identity_mut(&mut self, id: i32) -> Result<&mut Identity> {
        self.identities
            .get_mut(&id)
            .ok_or_else(|| Error::not_exist("identity not found"))
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp an identity as deactivated. Deactivation is an operator action
    /// outside the request API.
    ///
    /// # Errors
    ///
    /// Returns `NotExist` for an unknown id.
    pub async fn deactivate_identity(&self, id: i32, at: DateTime<Utc>) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables.identity_mut(id)?.deactivated_at = Some(at);
        Ok(())
    }
}

#[async_trait]
impl AuthStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn identity_by_id(&self, id: i32) -> Result<Option<Identity>> {
        Ok(self.tables.lock().await.identities.get(&id).cloned())
    }

    async fn identity_by_email(&self, email: &str) -> Result<Option<Identity>> {
        Ok(self.tables.lock().await.find_by_email(email).cloned())
    }

    async fn create_identity(&self, identity: NewIdentity) -> Result<Identity> {
        self.tables.lock().await.insert_identity(identity)
    }

    async fn update_identity_name(&self, id: i32, name: &str) -> Result<Option<Identity>> {
        let mut tables = self.tables.lock().await;
        Ok(tables.identities.get_mut(&id).map(|identity| {
            identity.name = Some(name.to_string());
            identity.clone()
        }))
    }

    async fn confirm_email(&self, id: i32) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables.identity_mut(id)?.email_confirmed = true;
        Ok(())
    }

    async fn insert_session(&self, session: &Session) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if tables.sessions.contains_key(&session.id) {
            return Err(Error::server("session id collision"));
        }
        tables.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn session_by_id(&self, id: Uuid) -> Result<Option<Session>> {
        Ok(self.tables.lock().await.sessions.get(&id).cloned())
    }

    async fn update_session_expiry(&self, id: Uuid, expires_at: DateTime<Utc>) -> Result<()> {
        if let Some(session) = self.tables.lock().await.sessions.get_mut(&id) {
            session.expires_at = Some(expires_at);
        }
        Ok(())
    }

    async fn mark_session_logged_out(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        let mut tables = self.tables.lock().await;
        Ok(tables
            .sessions
            .get_mut(&id)
            .map(|session| *session.logged_out_at.get_or_insert(at)))
    }

    async fn insert_verification(&self, token: &VerificationToken) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables.verifications.insert(token.id, token.clone());
        Ok(())
    }

    async fn verification_by_id(
        &self,
        purpose: VerificationPurpose,
        id: Uuid,
    ) -> Result<Option<VerificationToken>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .verifications
            .get(&id)
            .filter(|token| token.purpose == purpose)
            .cloned())
    }

    async fn redeem_verification(
        &self,
        purpose: VerificationPurpose,
        id: Uuid,
        at: DateTime<Utc>,
        effect: RedemptionEffect,
    ) -> Result<Redemption> {
        let mut tables = self.tables.lock().await;
        let Some(token) = tables
            .verifications
            .get(&id)
            .filter(|token| token.purpose == purpose)
        else {
            return Ok(Redemption::NotFound);
        };
        if token.used_at.is_some() {
            return Ok(Redemption::AlreadyUsed);
        }
        if token.expires_at <= at {
            return Ok(Redemption::Expired);
        }

        // Apply the effect first; a failure leaves the token unused.
        let identity = match effect {
            RedemptionEffect::ConfirmEmail { identity_id } => {
                let identity = tables.identity_mut(identity_id)?;
                identity.email_confirmed = true;
                identity.clone()
            }
            RedemptionEffect::SetPassword {
                identity_id,
                password_hash,
            } => {
                let identity = tables.identity_mut(identity_id)?;
                identity.password_hash = Some(password_hash);
                identity.email_confirmed = true;
                identity.clone()
            }
            RedemptionEffect::ProvisionIdentity(new) => tables.insert_identity(new)?,
        };

        if let Some(token) = tables.verifications.get_mut(&id) {
            token.used_at = Some(at);
        }
        Ok(Redemption::Redeemed(identity))
    }

    async fn insert_authorization(&self, authorization: &OAuthAuthorization) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables.authorizations.insert(
            (authorization.provider, authorization.state),
            authorization.clone(),
        );
        Ok(())
    }

    async fn authorization_by_state(
        &self,
        provider: OAuthProvider,
        state: Uuid,
    ) -> Result<Option<OAuthAuthorization>> {
        let tables = self.tables.lock().await;
        Ok(tables.authorizations.get(&(provider, state)).cloned())
    }

    async fn mark_authorization_exchanged(
        &self,
        provider: OAuthProvider,
        state: Uuid,
        identity: &ExchangedIdentity,
        checked_at: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<ExchangeMark> {
        let mut tables = self.tables.lock().await;
        let Some(authorization) = tables.authorizations.get_mut(&(provider, state)) else {
            return Ok(ExchangeMark::NotFound);
        };
        if authorization.exchanged_at.is_some() {
            return Ok(ExchangeMark::AlreadyExchanged);
        }
        if authorization.expires_at <= checked_at {
            return Ok(ExchangeMark::Expired);
        }
        authorization.email = Some(identity.email.clone());
        authorization.subject = Some(identity.subject.clone());
        authorization.name.clone_from(&identity.name);
        authorization.exchanged_at = Some(at);
        Ok(ExchangeMark::Marked(authorization.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;

    fn new_identity(email: &str) -> NewIdentity {
        NewIdentity {
            email: email.to_string(),
            email_confirmed: false,
            password_hash: Some("hash".to_string()),
            name: Some("Ada".to_string()),
        }
    }

    fn token(purpose: VerificationPurpose, identity_id: Option<i32>) -> VerificationToken {
        let now = Utc::now();
        VerificationToken {
            id: Uuid::new_v4(),
            purpose,
            identity_id,
            created_at: now,
            expires_at: now + Duration::minutes(30),
            used_at: None,
            payload: None,
        }
    }

    #[tokio::test]
    async fn test_duplicate_email_is_preexist() {
        let store = MemoryStore::new();
        store.create_identity(new_identity("a@example.com")).await.unwrap();
        let err = store
            .create_identity(new_identity("a@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Preexist(_)));
    }

    #[tokio::test]
    async fn test_email_lookup_is_case_sensitive() {
        let store = MemoryStore::new();
        let lower = store.create_identity(new_identity("a@example.com")).await.unwrap();
        let upper = store.create_identity(new_identity("A@example.com")).await.unwrap();
        assert_ne!(lower.id, upper.id);
        assert_eq!(
            store.identity_by_email("A@example.com").await.unwrap().map(|i| i.id),
            Some(upper.id)
        );
        assert!(store.identity_by_email("A@EXAMPLE.COM").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_logout_stamp_is_sticky() {
        let store = MemoryStore::new();
        let identity = store.create_identity(new_identity("a@example.com")).await.unwrap();
        let session = Session {
            id: Uuid::new_v4(),
            identity_id: identity.id,
            ip_addr: None,
            user_agent: None,
            user_agent_description: None,
            created_at: Utc::now(),
            expires_at: None,
            logged_out_at: None,
        };
        store.insert_session(&session).await.unwrap();

        let first = Utc::now();
        let later = first + Duration::minutes(5);
        assert_eq!(
            store.mark_session_logged_out(session.id, first).await.unwrap(),
            Some(first)
        );
        assert_eq!(
            store.mark_session_logged_out(session.id, later).await.unwrap(),
            Some(first)
        );
    }

    #[tokio::test]
    async fn test_concurrent_redemption_succeeds_once() {
        let store = Arc::new(MemoryStore::new());
        let identity = store.create_identity(new_identity("a@example.com")).await.unwrap();
        let token = token(VerificationPurpose::PasswordReset, Some(identity.id));
        store.insert_verification(&token).await.unwrap();
        let (token_id, identity_id) = (token.id, identity.id);

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .redeem_verification(
                        VerificationPurpose::PasswordReset,
                        token_id,
                        Utc::now(),
                        RedemptionEffect::SetPassword {
                            identity_id,
                            password_hash: format!("hash-{i}"),
                        },
                    )
                    .await
                    .unwrap()
            }));
        }

        let mut redeemed = 0;
        let mut already_used = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Redemption::Redeemed(_) => redeemed += 1,
                Redemption::AlreadyUsed => already_used += 1,
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        assert_eq!(redeemed, 1);
        assert_eq!(already_used, 7);
    }

    #[tokio::test]
    async fn test_failed_effect_leaves_token_unused() {
        let store = MemoryStore::new();
        store.create_identity(new_identity("taken@example.com")).await.unwrap();
        let token = token(VerificationPurpose::SignupVerify, None);
        store.insert_verification(&token).await.unwrap();

        let err = store
            .redeem_verification(
                VerificationPurpose::SignupVerify,
                token.id,
                Utc::now(),
                RedemptionEffect::ProvisionIdentity(new_identity("taken@example.com")),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Preexist(_)));

        let stored = store
            .verification_by_id(VerificationPurpose::SignupVerify, token.id)
            .await
            .unwrap()
            .unwrap();
        assert!(stored.used_at.is_none());
    }

    #[tokio::test]
    async fn test_purpose_mismatch_is_not_found() {
        let store = MemoryStore::new();
        let token = token(VerificationPurpose::SignupVerify, None);
        store.insert_verification(&token).await.unwrap();
        assert!(store
            .verification_by_id(VerificationPurpose::PasswordReset, token.id)
            .await
            .unwrap()
            .is_none());
    }
}
