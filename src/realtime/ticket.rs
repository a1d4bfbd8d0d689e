//! One-shot stream tickets.
//!
//! `EventSource` cannot send an Authorization header, so the stream endpoint
//! authenticates with a short-lived signed token in the URL instead. Each
//! ticket is consumable exactly once: the nonce is recorded in a short-TTL
//! cache at consumption and a replay fails.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum TicketError {
    #[error("malformed stream token")]
    Malformed,
    #[error("bad stream token signature")]
    BadSignature,
    #[error("stream token expired")]
    Expired,
    #[error("stream token already used")]
    AlreadyUsed,
}

/// Identity carried by a ticket, restored at consumption.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamClaims {
    #[serde(default)]
    pub uid: Option<u64>,
    #[serde(default)]
    pub admin: bool,
    pub nonce: String,
    pub exp: i64,
}

/// Issues and consumes stream tickets. One instance per process.
pub struct TicketIssuer {
    secret: Vec<u8>,
    ttl: Duration,
    /// Consumed nonces, each kept until its ticket would have expired anyway.
    consumed: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl TicketIssuer {
    /// TTL below 5 seconds is clamped; a ticket must survive one redirect.
    pub fn new(secret: impl Into<Vec<u8>>, ttl_seconds: u64) -> Self {
        let mut secret = secret.into();
        if secret.is_empty() {
            secret = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(32)
                .collect();
        }
        Self {
            secret,
            ttl: Duration::seconds(ttl_seconds.max(5) as i64),
            consumed: Mutex::new(HashMap::new()),
        }
    }

    /// Seconds an issued ticket stays valid.
    pub fn ttl_seconds(&self) -> i64 {
        self.ttl.num_seconds()
    }

    /// Issue a ticket for the given caller identity.
    pub fn issue(&self, uid: Option<u64>, admin: bool) -> String {
        let nonce: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(16)
            .map(char::from)
            .collect();
        let claims = StreamClaims {
            uid,
            admin,
            nonce,
            exp: (Utc::now() + self.ttl).timestamp(),
        };
        // Claims are always serializable: plain scalars only.
        let payload = URL_SAFE_NO_PAD
            .encode(serde_json::to_vec(&claims).unwrap_or_default());
        let signature = self.sign(&payload);
        format!("{payload}.{signature}")
    }

    /// Verify and consume a ticket. A second consumption of the same ticket
    /// fails with [`TicketError::AlreadyUsed`].
    pub fn consume(&self, token: &str) -> Result<StreamClaims, TicketError> {
        let (payload, signature) = token.split_once('.').ok_or(TicketError::Malformed)?;
        if self.sign(payload) != signature {
            return Err(TicketError::BadSignature);
        }

        let raw = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| TicketError::Malformed)?;
        let claims: StreamClaims =
            serde_json::from_slice(&raw).map_err(|_| TicketError::Malformed)?;

        let now = Utc::now();
        if claims.exp < now.timestamp() {
            return Err(TicketError::Expired);
        }

        let mut consumed = self.consumed.lock().unwrap_or_else(|p| p.into_inner());
        consumed.retain(|_, expiry| *expiry > now);
        if consumed.contains_key(&claims.nonce) {
            return Err(TicketError::AlreadyUsed);
        }
        consumed.insert(claims.nonce.clone(), now + self.ttl);

        Ok(claims)
    }

    fn sign(&self, payload: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.secret);
        hasher.update(payload.as_bytes());
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }
}
