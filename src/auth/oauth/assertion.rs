//! RS256 client assertions for the Microsoft token endpoint.
//!
//! The key and certificate are parsed once, on first use. Minted assertions
//! live for 16 minutes and are replaced once they are 15 minutes old. The
//! check, the re-mint and the publish of a new assertion all happen under one
//! lock, so concurrent callers either reuse the current assertion or wait for
//! its replacement; none of them can observe a half-written one.

use crate::error::{Error, Result};
use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Duration, Utc};
use rsa::{
    pkcs1::DecodeRsaPrivateKey,
    pkcs1v15::{Signature, SigningKey},
    pkcs8::DecodePrivateKey,
    signature::{SignatureEncoding, Signer},
    RsaPrivateKey,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use sha2::Sha256;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::debug;
use uuid::Uuid;
use x509_parser::pem::parse_x509_pem;

pub const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

const LIFETIME_MINUTES: i64 = 16;
const REFRESH_AFTER_MINUTES: i64 = 15;
const NOT_BEFORE_SKEW_SECONDS: i64 = 15;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssertionHeader {
    pub alg: String,
    pub typ: String,
    pub x5t: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssertionClaims {
    pub aud: String,
    pub exp: i64,
    pub iss: String,
    pub jti: String,
    pub nbf: i64,
    pub sub: String,
    pub iat: i64,
}

struct SigningMaterial {
    key: SigningKey<Sha256>,
    thumbprint: String,
}

struct MintedAssertion {
    token: Arc<str>,
    issued_at: DateTime<Utc>,
    version: u64,
}

pub struct ClientAssertionSigner {
    client_id: String,
    audience: String,
    private_key_pem: SecretString,
    certificate_pem: String,
    material: OnceCell<SigningMaterial>,
    current: Mutex<Option<MintedAssertion>>,
}

impl std::fmt::Debug for ClientAssertionSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientAssertionSigner")
            .field("client_id", &self.client_id)
            .field("audience", &self.audience)
            .finish_non_exhaustive()
    }
}

fn decode_private_key(pem: &str) -> Result<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|_| Error::server("invalid client assertion private key"))
}

/// Base64url (unpadded) SHA-1 of the certificate's DER encoding.
fn certificate_thumbprint(pem: &str) -> Result<String> {
    let (_, pem) = parse_x509_pem(pem.as_bytes())
        .map_err(|_| Error::server("invalid client assertion certificate"))?;
    pem.parse_x509()
        .map_err(|_| Error::server("invalid client assertion certificate"))?;
    Ok(Base64UrlUnpadded::encode_string(&Sha1::digest(&pem.contents)))
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

impl ClientAssertionSigner {
    /// `audience` is the token endpoint the assertion is presented to.
    #[must_use]
    pub fn new(
        client_id: String,
        audience: String,
        private_key_pem: SecretString,
        certificate_pem: String,
    ) -> Self {
        Self {
            client_id,
            audience,
            private_key_pem,
            certificate_pem,
            material: OnceCell::new(),
            current: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn material(&self) -> Result<&SigningMaterial> {
        self.material
            .get_or_try_init(|| async {
                let key = decode_private_key(self.private_key_pem.expose_secret())?;
                let thumbprint = certificate_thumbprint(&self.certificate_pem)?;
                debug!(%thumbprint, "client assertion signing material loaded");
                Ok::<_, Error>(SigningMaterial {
                    key: SigningKey::<Sha256>::new(key),
                    thumbprint,
                })
            })
            .await
    }

    fn mint(&self, material: &SigningMaterial, now: DateTime<Utc>) -> Result<String> {
        let header = AssertionHeader {
            alg: "RS256".to_string(),
            typ: "JWT".to_string(),
            x5t: material.thumbprint.clone(),
        };
        let claims = AssertionClaims {
            aud: self.audience.clone(),
            exp: (now + Duration::minutes(LIFETIME_MINUTES)).timestamp(),
            iss: self.client_id.clone(),
            jti: Uuid::new_v4().to_string(),
            nbf: (now - Duration::seconds(NOT_BEFORE_SKEW_SECONDS)).timestamp(),
            sub: self.client_id.clone(),
            iat: now.timestamp(),
        };
        let signing_input = format!("{}.{}", b64e_json(&header)?, b64e_json(&claims)?);
        let signature: Signature = material
            .key
            .try_sign(signing_input.as_bytes())
            .map_err(|err| Error::server(format!("failed to sign client assertion: {err}")))?;
        let signature_b64 = Base64UrlUnpadded::encode_string(&signature.to_vec());
        Ok(format!("{signing_input}.{signature_b64}"))
    }

    /// Current assertion, minting a replacement when the current one is due.
    ///
    /// # Errors
    ///
    /// Returns a server error if the key or certificate cannot be parsed or
    /// signing fails.
    pub async fn assertion(&self, now: DateTime<Utc>) -> Result<Arc<str>> {
        let material = self.material().await?;
        let mut current = self.current.lock().await;

        if let Some(minted) = current.as_ref() {
            if now - minted.issued_at < Duration::minutes(REFRESH_AFTER_MINUTES) {
                return Ok(minted.token.clone());
            }
        }

        let token: Arc<str> = Arc::from(self.mint(material, now)?);
        let version = current.as_ref().map_or(1, |minted| minted.version + 1);
        *current = Some(MintedAssertion {
            token: token.clone(),
            issued_at: now,
            version,
        });
        debug!(version, "client assertion minted");
        Ok(token)
    }

    /// Number of assertions minted so far.
    pub async fn version(&self) -> u64 {
        self.current
            .lock()
            .await
            .as_ref()
            .map_or(0, |minted| minted.version)
    }
}
