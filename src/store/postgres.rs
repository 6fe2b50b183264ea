//! Postgres-backed [`AuthStore`].
//!
//! Conditional writes (`... IS NULL AND expiry > $n RETURNING`) guarantee that
//! at most one caller wins a redemption or an exchange. Schema lives in
//! `sql/schema.sql`.

use super::{
    AuthStore, ExchangeMark, ExchangedIdentity, Identity, NewIdentity, OAuthAuthorization,
    OAuthProvider, Redemption, RedemptionEffect, Session, VerificationPurpose, VerificationToken,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{
    postgres::PgRow, types::ipnetwork::IpNetwork, Connection, PgPool, Postgres, Row, Transaction,
};
use tracing::{info_span, Instrument, Span};
use uuid::Uuid;

const IDENTITY_COLUMNS: &str =
    "id, email, email_confirmed, password, name, profile_img_url, create_ts, deactivated_ts";

const SESSION_COLUMNS: &str =
    "id, user_id, ip_addr, user_agent, user_agent_description, create_ts, expiry_ts, logout_ts";

const VERIFICATION_COLUMNS: &str = "id, purpose, user_id, create_ts, expiry_ts, used_ts, meta";

const AUTHORIZATION_COLUMNS: &str =
    "provider, state, destination_url, subject, email, name, create_ts, expiry, exchange_ts";

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn db_span(operation: &'static str, statement: &str) -> Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505"))
}

fn identity_from_row(row: &PgRow) -> Result<Identity> {
    Ok(Identity {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        email_confirmed: row.try_get("email_confirmed")?,
        password_hash: row.try_get("password")?,
        name: row.try_get("name")?,
        profile_img_url: row.try_get("profile_img_url")?,
        created_at: row.try_get("create_ts")?,
        deactivated_at: row.try_get("deactivated_ts")?,
    })
}

fn session_from_row(row: &PgRow) -> Result<Session> {
    let ip_addr: Option<IpNetwork> = row.try_get("ip_addr")?;
    Ok(Session {
        id: row.try_get("id")?,
        identity_id: row.try_get("user_id")?,
        ip_addr: ip_addr.map(|network| network.ip()),
        user_agent: row.try_get("user_agent")?,
        user_agent_description: row.try_get("user_agent_description")?,
        created_at: row.try_get("create_ts")?,
        expires_at: row.try_get("expiry_ts")?,
        logged_out_at: row.try_get("logout_ts")?,
    })
}

fn verification_from_row(row: &PgRow) -> Result<VerificationToken> {
    Ok(VerificationToken {
        id: row.try_get("id")?,
        purpose: VerificationPurpose::from_i16(row.try_get("purpose")?)?,
        identity_id: row.try_get("user_id")?,
        created_at: row.try_get("create_ts")?,
        expires_at: row.try_get("expiry_ts")?,
        used_at: row.try_get("used_ts")?,
        payload: row.try_get::<Option<Value>, _>("meta")?,
    })
}

fn authorization_from_row(row: &PgRow) -> Result<OAuthAuthorization> {
    Ok(OAuthAuthorization {
        provider: OAuthProvider::from_i16(row.try_get("provider")?)?,
        state: row.try_get("state")?,
        destination_url: row.try_get("destination_url")?,
        subject: row.try_get("subject")?,
        email: row.try_get("email")?,
        name: row.try_get("name")?,
        created_at: row.try_get("create_ts")?,
        expires_at: row.try_get("expiry")?,
        exchanged_at: row.try_get("exchange_ts")?,
    })
}

async fn insert_identity(
    tx: &mut Transaction<'_, Postgres>,
    identity: &NewIdentity,
) -> Result<Identity> {
    let query = format!(
        "INSERT INTO users (email, email_confirmed, password, name) VALUES ($1, $2, $3, $4) \
         RETURNING {IDENTITY_COLUMNS}"
    );
    let result = sqlx::query(&query)
        .bind(&identity.email)
        .bind(identity.email_confirmed)
        .bind(&identity.password_hash)
        .bind(&identity.name)
        .fetch_one(&mut **tx)
        .instrument(db_span("INSERT", &query))
        .await;
    match result {
        Ok(row) => identity_from_row(&row),
        Err(err) if is_unique_violation(&err) => Err(Error::preexist("email already registered")),
        Err(err) => Err(err.into()),
    }
}

async fn update_identity_credentials(
    tx: &mut Transaction<'_, Postgres>,
    identity_id: i32,
    password_hash: Option<&str>,
) -> Result<Identity> {
    let query = format!(
        "UPDATE users SET email_confirmed = TRUE, password = COALESCE($2, password) \
         WHERE id = $1 RETURNING {IDENTITY_COLUMNS}"
    );
    let row = sqlx::query(&query)
        .bind(identity_id)
        .bind(password_hash)
        .fetch_optional(&mut **tx)
        .instrument(db_span("UPDATE", &query))
        .await?
        .ok_or_else(|| Error::not_exist("identity not found"))?;
    identity_from_row(&row)
}

#[async_trait]
impl AuthStore for PgStore {
    fn backend(&self) -> &'static str {
        "postgresql"
    }

    async fn ping(&self) -> Result<()> {
        let acquire_span = info_span!(
            "db.acquire",
            db.system = "postgresql",
            db.operation = "ACQUIRE"
        );
        let mut conn = self.pool.acquire().instrument(acquire_span).await?;
        let ping_span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
        conn.ping().instrument(ping_span).await?;
        Ok(())
    }

    async fn identity_by_id(&self, id: i32) -> Result<Option<Identity>> {
        let query = format!("SELECT {IDENTITY_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await?;
        row.as_ref().map(identity_from_row).transpose()
    }

    async fn identity_by_email(&self, email: &str) -> Result<Option<Identity>> {
        let query = format!("SELECT {IDENTITY_COLUMNS} FROM users WHERE email = $1");
        let row = sqlx::query(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await?;
        row.as_ref().map(identity_from_row).transpose()
    }

    async fn create_identity(&self, identity: NewIdentity) -> Result<Identity> {
        let mut tx = self.pool.begin().await?;
        let created = insert_identity(&mut tx, &identity).await?;
        tx.commit().await?;
        Ok(created)
    }

    async fn update_identity_name(&self, id: i32, name: &str) -> Result<Option<Identity>> {
        let query = format!("UPDATE users SET name = $2 WHERE id = $1 RETURNING {IDENTITY_COLUMNS}");
        let row = sqlx::query(&query)
            .bind(id)
            .bind(name)
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE", &query))
            .await?;
        row.as_ref().map(identity_from_row).transpose()
    }

    async fn confirm_email(&self, id: i32) -> Result<()> {
        let query = "UPDATE users SET email_confirmed = TRUE WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_exist("identity not found"));
        }
        Ok(())
    }

    async fn insert_session(&self, session: &Session) -> Result<()> {
        let query = r"
            INSERT INTO user_sessions
                (id, user_id, ip_addr, user_agent, user_agent_description, create_ts, expiry_ts)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
        ";
        let result = sqlx::query(query)
            .bind(session.id)
            .bind(session.identity_id)
            .bind(session.ip_addr.map(IpNetwork::from))
            .bind(&session.user_agent)
            .bind(&session.user_agent_description)
            .bind(session.created_at)
            .bind(session.expires_at)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(Error::server("session id collision")),
            Err(err) => Err(err.into()),
        }
    }

    async fn session_by_id(&self, id: Uuid) -> Result<Option<Session>> {
        let query = format!("SELECT {SESSION_COLUMNS} FROM user_sessions WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn update_session_expiry(&self, id: Uuid, expires_at: DateTime<Utc>) -> Result<()> {
        let query = "UPDATE user_sessions SET expiry_ts = $2 WHERE id = $1";
        sqlx::query(query)
            .bind(id)
            .bind(expires_at)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await?;
        Ok(())
    }

    async fn mark_session_logged_out(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        let query = r"
            UPDATE user_sessions
            SET logout_ts = COALESCE(logout_ts, $2)
            WHERE id = $1
            RETURNING logout_ts
        ";
        let row = sqlx::query(query)
            .bind(id)
            .bind(at)
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await?;
        Ok(row
            .map(|row| row.try_get::<Option<DateTime<Utc>>, _>("logout_ts"))
            .transpose()?
            .flatten())
    }

    async fn insert_verification(&self, token: &VerificationToken) -> Result<()> {
        let query = r"
            INSERT INTO user_email_verifications
                (id, purpose, user_id, create_ts, expiry_ts, meta)
            VALUES ($1, $2, $3, $4, $5, $6)
        ";
        sqlx::query(query)
            .bind(token.id)
            .bind(token.purpose.as_i16())
            .bind(token.identity_id)
            .bind(token.created_at)
            .bind(token.expires_at)
            .bind(&token.payload)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await?;
        Ok(())
    }

    async fn verification_by_id(
        &self,
        purpose: VerificationPurpose,
        id: Uuid,
    ) -> Result<Option<VerificationToken>> {
        let query = format!(
            "SELECT {VERIFICATION_COLUMNS} FROM user_email_verifications \
             WHERE id = $1 AND purpose = $2"
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(purpose.as_i16())
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await?;
        row.as_ref().map(verification_from_row).transpose()
    }

    async fn redeem_verification(
        &self,
        purpose: VerificationPurpose,
        id: Uuid,
        at: DateTime<Utc>,
        effect: RedemptionEffect,
    ) -> Result<Redemption> {
        let mut tx = self.pool.begin().await?;

        // Row lock: concurrent redeemers queue here and see used_ts afterwards.
        let query = r"
            UPDATE user_email_verifications
            SET used_ts = $3
            WHERE id = $1 AND purpose = $2 AND used_ts IS NULL AND expiry_ts > $3
            RETURNING id
        ";
        let claimed = sqlx::query(query)
            .bind(id)
            .bind(purpose.as_i16())
            .bind(at)
            .fetch_optional(&mut *tx)
            .instrument(db_span("UPDATE", query))
            .await?;

        if claimed.is_none() {
            tx.rollback().await?;
            return Ok(match self.verification_by_id(purpose, id).await? {
                None => Redemption::NotFound,
                Some(token) if token.used_at.is_some() => Redemption::AlreadyUsed,
                Some(_) => Redemption::Expired,
            });
        }

        let applied = match &effect {
            RedemptionEffect::ConfirmEmail { identity_id } => {
                update_identity_credentials(&mut tx, *identity_id, None).await
            }
            RedemptionEffect::SetPassword {
                identity_id,
                password_hash,
            } => update_identity_credentials(&mut tx, *identity_id, Some(password_hash.as_str())).await,
            RedemptionEffect::ProvisionIdentity(new) => insert_identity(&mut tx, new).await,
        };

        match applied {
            Ok(identity) => {
                tx.commit().await?;
                Ok(Redemption::Redeemed(identity))
            }
            Err(err) => {
                tx.rollback().await?;
                Err(err)
            }
        }
    }

    async fn insert_authorization(&self, authorization: &OAuthAuthorization) -> Result<()> {
        let query = r"
            INSERT INTO oauth_authorizations
                (provider, state, destination_url, create_ts, expiry)
            VALUES ($1, $2, $3, $4, $5)
        ";
        sqlx::query(query)
            .bind(authorization.provider.as_i16())
            .bind(authorization.state)
            .bind(&authorization.destination_url)
            .bind(authorization.created_at)
            .bind(authorization.expires_at)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await?;
        Ok(())
    }

    async fn authorization_by_state(
        &self,
        provider: OAuthProvider,
        state: Uuid,
    ) -> Result<Option<OAuthAuthorization>> {
        let query = format!(
            "SELECT {AUTHORIZATION_COLUMNS} FROM oauth_authorizations \
             WHERE provider = $1 AND state = $2"
        );
        let row = sqlx::query(&query)
            .bind(provider.as_i16())
            .bind(state)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await?;
        row.as_ref().map(authorization_from_row).transpose()
    }

    async fn mark_authorization_exchanged(
        &self,
        provider: OAuthProvider,
        state: Uuid,
        identity: &ExchangedIdentity,
        checked_at: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<ExchangeMark> {
        let query = format!(
            "UPDATE oauth_authorizations \
             SET email = $3, subject = $4, name = $5, exchange_ts = $6 \
             WHERE provider = $1 AND state = $2 AND exchange_ts IS NULL AND expiry > $7 \
             RETURNING {AUTHORIZATION_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(provider.as_i16())
            .bind(state)
            .bind(&identity.email)
            .bind(&identity.subject)
            .bind(&identity.name)
            .bind(at)
            .bind(checked_at)
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE", &query))
            .await?;

        if let Some(row) = row {
            return Ok(ExchangeMark::Marked(authorization_from_row(&row)?));
        }
        Ok(match self.authorization_by_state(provider, state).await? {
            None => ExchangeMark::NotFound,
            Some(authorization) if authorization.exchanged_at.is_some() => {
                ExchangeMark::AlreadyExchanged
            }
            Some(_) => ExchangeMark::Expired,
        })
    }
}
