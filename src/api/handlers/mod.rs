//! Route handlers: the gateway fallback plus the admin API under
//! [`ADMIN_PREFIX`](super::ADMIN_PREFIX).

pub mod admin;
pub mod gateway;
pub mod health;

use axum::http::{HeaderMap, header::AUTHORIZATION};
use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;

/// Bearer token guarding the admin API. Without one the API stays hidden.
#[derive(Clone, Debug, Default)]
pub struct AdminToken(Option<SecretString>);

impl AdminToken {
    #[must_use]
    pub fn new(token: Option<SecretString>) -> Self {
        Self(token)
    }

    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.0.is_some()
    }

    /// Whether `headers` carry `Authorization: Bearer <token>`.
    #[must_use]
    pub fn authorizes(&self, headers: &HeaderMap) -> bool {
        let Some(token) = self.0.as_ref() else {
            return false;
        };

        headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .is_some_and(|presented| {
                presented
                    .trim()
                    .as_bytes()
                    .ct_eq(token.expose_secret().as_bytes())
                    .into()
            })
    }
}
