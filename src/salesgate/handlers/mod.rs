pub mod health;
pub mod login;
pub mod oauth;
pub mod password_reset;
pub mod profile;
pub mod session;
pub mod signup;

// common types and helpers for the handlers
use crate::{
    auth::ClientInfo,
    codec::{IdCodec, ObfuscatedId},
    error::Result,
    store::Identity,
};
use axum::{
    extract::ConnectInfo,
    http::{header::USER_AGENT, HeaderMap},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::{IpAddr, SocketAddr};
use utoipa::ToSchema;

/// Success envelope: `{"error": false, "data": ...}`.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    error: bool,
    data: T,
}

pub fn success<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope { error: false, data })
}

/// An account as clients see it. The numeric id is obfuscated and the
/// password hash never leaves the server.
#[derive(ToSchema, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[schema(value_type = String, example = "fc91a02b")]
    pub id: ObfuscatedId,
    pub email: String,
    pub email_confirmed: bool,
    pub name: Option<String>,
    pub profile_img_url: Option<String>,
    pub has_password: bool,
    pub created_at: DateTime<Utc>,
}

impl Profile {
    /// # Errors
    ///
    /// Returns `BadParameter` if the id cannot be encoded.
    pub fn new(codec: &IdCodec, identity: &Identity) -> Result<Self> {
        Ok(Self {
            id: ObfuscatedId::new(codec, identity.id)?,
            email: identity.email.clone(),
            email_confirmed: identity.email_confirmed,
            name: identity.name.clone(),
            profile_img_url: identity.profile_img_url.clone(),
            has_password: identity.password_hash.is_some(),
            created_at: identity.created_at,
        })
    }
}

/// Client address and user agent. A proxy-supplied `X-Forwarded-For` or
/// `X-Real-IP` wins over the socket peer.
pub fn client_info(headers: &HeaderMap, peer: Option<ConnectInfo<SocketAddr>>) -> ClientInfo {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|value| value.trim().parse::<IpAddr>().ok());
    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<IpAddr>().ok())
    };
    ClientInfo {
        ip_addr: forwarded
            .or_else(real_ip)
            .or_else(|| peer.map(|ConnectInfo(addr)| addr.ip())),
        user_agent: headers
            .get(USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
    }
}
