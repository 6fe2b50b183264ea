//! Password hashing with Argon2id.
//!
//! Hashes are PHC strings (`$argon2id$v=19$m=65536,t=3,p=1$<salt>$<hash>`),
//! so verification always uses the parameters a hash was created with.

use crate::error::{Error, Result};
use argon2::{
    password_hash::{
        rand_core::{OsRng, RngCore},
        PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
    },
    Algorithm, Argon2, Params, Version,
};
use base64ct::{Base64UrlUnpadded, Encoding};

/// Memory cost in KiB (64 MiB).
pub const DEFAULT_M_COST_KIB: u32 = 64 * 1024;
pub const DEFAULT_T_COST: u32 = 3;
pub const DEFAULT_P_COST: u32 = 1;
pub const OUTPUT_LEN: usize = 32;

#[derive(Clone, Debug)]
pub struct CredentialStore {
    argon2: Argon2<'static>,
    // Hash of a random secret, verified against when there is no account hash.
    decoy: String,
}

impl CredentialStore {
    /// Production parameters: 64 MiB, 3 iterations, parallelism 1, 32-byte output.
    ///
    /// # Errors
    ///
    /// Returns a server error if the parameters are rejected.
    pub fn new() -> Result<Self> {
        Self::with_params(DEFAULT_M_COST_KIB, DEFAULT_T_COST)
    }

    /// Custom memory and time cost. Used by tests and tooling where the
    /// production cost is too slow.
    ///
    /// # Errors
    ///
    /// Returns a server error if the parameters are rejected.
    pub fn with_params(m_cost_kib: u32, t_cost: u32) -> Result<Self> {
        let params = Params::new(m_cost_kib, t_cost, DEFAULT_P_COST, Some(OUTPUT_LEN))
            .map_err(|err| Error::server(format!("invalid argon2 parameters: {err}")))?;
        let mut store = Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
            decoy: String::new(),
        };
        let mut secret = [0u8; 16];
        OsRng.fill_bytes(&mut secret);
        store.decoy = store.hash(&Base64UrlUnpadded::encode_string(&secret))?;
        Ok(store)
    }

    /// Hash a plaintext password with a fresh 16-byte salt.
    ///
    /// # Errors
    ///
    /// Returns a server error if hashing fails.
    pub fn hash(&self, plaintext: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2
            .hash_password(plaintext.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|err| Error::server(format!("failed to hash password: {err}")))
    }

    /// Verify a plaintext against an encoded hash in constant time.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCredential` on mismatch and on a malformed hash alike.
    pub fn verify(&self, encoded: &str, plaintext: &str) -> Result<()> {
        let parsed = PasswordHash::new(encoded).map_err(|_| Error::InvalidCredential)?;
        self.argon2
            .verify_password(plaintext.as_bytes(), &parsed)
            .map_err(|_| Error::InvalidCredential)
    }

    /// Run a full verification against a hash no password matches. Always
    /// `InvalidCredential`.
    ///
    /// # Errors
    ///
    /// Always.
    pub fn reject(&self, plaintext: &str) -> Result<()> {
        self.verify(&self.decoy, plaintext)
            .and(Err(Error::InvalidCredential))
    }

    /// [`CredentialStore::hash`] on the blocking pool.
    ///
    /// # Errors
    ///
    /// Same as `hash`, plus a server error if the blocking task fails.
    pub async fn hash_blocking(&self, plaintext: String) -> Result<String> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.hash(&plaintext)).await?
    }

    /// [`CredentialStore::verify`] on the blocking pool.
    ///
    /// # Errors
    ///
    /// Same as `verify`, plus a server error if the blocking task fails.
    pub async fn verify_blocking(&self, encoded: String, plaintext: String) -> Result<()> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.verify(&encoded, &plaintext)).await?
    }

    /// [`CredentialStore::reject`] on the blocking pool.
    ///
    /// # Errors
    ///
    /// Always `InvalidCredential`, or a server error if the blocking task
    /// fails.
    pub async fn reject_blocking(&self, plaintext: String) -> Result<()> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.reject(&plaintext)).await?
    }
}
