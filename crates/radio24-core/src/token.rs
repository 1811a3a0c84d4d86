//! Media-server access tokens (HS256 JWT with a video grant).
//!
//! Listeners receive subscribe-only tokens for [`ROOM_NAME`]; the host mints a
//! publish grant for itself when it connects its tracks.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{RadioError, Result};

/// The single broadcast room.
pub const ROOM_NAME: &str = "radio-24";

/// Validity of a listener token, in seconds.
pub const LISTENER_TTL_SECS: i64 = 3600;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoGrant {
    pub room_join: bool,
    pub room: String,
    pub can_publish: bool,
    pub can_subscribe: bool,
}

impl VideoGrant {
    pub fn subscribe_only(room: &str) -> Self {
        Self {
            room_join: true,
            room: room.to_string(),
            can_publish: false,
            can_subscribe: true,
        }
    }

    pub fn publisher(room: &str) -> Self {
        Self {
            room_join: true,
            room: room.to_string(),
            can_publish: true,
            can_subscribe: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// API key of the issuer.
    pub iss: String,
    /// Participant identity.
    pub sub: String,
    pub nbf: i64,
    pub exp: i64,
    pub video: VideoGrant,
}

/// Body returned by `POST /v1/room/join`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinResponse {
    pub url: String,
    pub token: String,
    pub room: String,
}

#[derive(Clone)]
pub struct TokenMinter {
    api_key: String,
    api_secret: String,
}

impl std::fmt::Debug for TokenMinter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenMinter")
            .field("api_key", &self.api_key)
            .finish_non_exhaustive()
    }
}

impl TokenMinter {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    pub fn mint(&self, identity: &str, grant: VideoGrant, ttl: Duration) -> Result<String> {
        if identity.is_empty() {
            return Err(RadioError::Token("identity must not be empty".into()));
        }
        let now = Utc::now().timestamp();
        let claims = Claims {
            iss: self.api_key.clone(),
            sub: identity.to_string(),
            nbf: now,
            exp: now + ttl.num_seconds(),
            video: grant,
        };

        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?);
        let signing_input = format!("{header}.{payload}");
        let signature = URL_SAFE_NO_PAD.encode(self.sign(signing_input.as_bytes())?);
        Ok(format!("{signing_input}.{signature}"))
    }

    /// Subscribe-only listener token for the broadcast room, valid one hour.
    pub fn join(&self, identity: &str, url: &str) -> Result<JoinResponse> {
        let token = self.mint(
            identity,
            VideoGrant::subscribe_only(ROOM_NAME),
            Duration::seconds(LISTENER_TTL_SECS),
        )?;
        Ok(JoinResponse {
            url: url.to_string(),
            token,
            room: ROOM_NAME.to_string(),
        })
    }

    /// Check signature and validity window, returning the claims.
    pub fn verify(&self, token: &str) -> Result<Claims> {
        let mut parts = token.split('.');
        let (Some(header), Some(payload), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(RadioError::Token("malformed token".into()));
        };

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|e| RadioError::Token(format!("bad signature encoding: {e}")))?;
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| RadioError::Token(e.to_string()))?;
        mac.update(format!("{header}.{payload}").as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| RadioError::Token("signature mismatch".into()))?;

        let payload = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|e| RadioError::Token(format!("bad payload encoding: {e}")))?;
        let claims: Claims = serde_json::from_slice(&payload)?;

        let now = Utc::now().timestamp();
        if now < claims.nbf || now >= claims.exp {
            return Err(RadioError::Token("token outside validity window".into()));
        }
        if claims.iss != self.api_key {
            return Err(RadioError::Token("unknown issuer".into()));
        }
        Ok(claims)
    }

    fn sign(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| RadioError::Token(e.to_string()))?;
        mac.update(input);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}
