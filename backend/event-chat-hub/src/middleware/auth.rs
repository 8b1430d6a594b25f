//! Identity and channel access checks for the upgrade endpoint.
//!
//! The hub only ever sees a verified [`UserId`]; how that id is derived from
//! the credential lives behind [`IdentityVerifier`].

use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::websocket::{ChannelId, UserId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("credential missing")]
    MissingCredential,

    #[error("credential rejected: {0}")]
    InvalidCredential(String),
}

/// Maps an opaque credential to a verified user id
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, credential: &str) -> Result<UserId, AuthError>;
}

/// Decides whether a verified user may subscribe to a channel
#[async_trait]
pub trait ChannelAccess: Send + Sync {
    async fn can_join(&self, user_id: UserId, channel_id: ChannelId) -> bool;
}

/// Lets every verified user into every channel
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenChannelAccess;

#[async_trait]
impl ChannelAccess for OpenChannelAccess {
    async fn can_join(&self, _user_id: UserId, _channel_id: ChannelId) -> bool {
        true
    }
}

/// Claims issued by the chat login endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
}

/// HMAC-signed JWT verification with a shared secret.
///
/// `exp` is enforced when present but not required.
pub struct JwtIdentityVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtIdentityVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
        validation.required_spec_claims.clear();

        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

#[async_trait]
impl IdentityVerifier for JwtIdentityVerifier {
    async fn verify(&self, credential: &str) -> Result<UserId, AuthError> {
        if credential.is_empty() {
            return Err(AuthError::MissingCredential);
        }

        decode::<Claims>(credential, &self.key, &self.validation)
            .map(|data| data.claims.user_id)
            .map_err(|e| AuthError::InvalidCredential(format!("{:?}", e.kind())))
    }
}
