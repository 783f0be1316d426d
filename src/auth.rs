//! Bearer identity verification and the `AuthUser` extractor.

use async_trait::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::{header::AUTHORIZATION, request::Parts};
use headers::{authorization::Bearer, Authorization, HeaderMapExt};
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::AppError;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,

    #[error("authorization header is not a bearer token")]
    MalformedHeader,

    #[error("invalid identity token: {0}")]
    InvalidToken(String),

    #[error("identity token has expired")]
    Expired,

    #[error("identity verifier misconfigured: {0}")]
    Misconfigured(String),
}

/// Turns an identity token into the caller's user id
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<String, AuthError>;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IdentityClaims {
    pub sub: String,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

/// Verifies JWTs signed with a shared HS256 secret or an RS256 key pair
#[derive(Clone)]
pub struct JwtIdentityVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtIdentityVerifier {
    pub fn from_secret(secret: &[u8], issuer: Option<&str>, audience: Option<&str>) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret),
            validation: build_validation(Algorithm::HS256, issuer, audience),
        }
    }

    pub fn from_rsa_pem(
        pem: &[u8],
        issuer: Option<&str>,
        audience: Option<&str>,
    ) -> Result<Self, AuthError> {
        let decoding_key = DecodingKey::from_rsa_pem(pem)
            .map_err(|e| AuthError::Misconfigured(format!("invalid RSA public key: {}", e)))?;

        Ok(Self {
            decoding_key,
            validation: build_validation(Algorithm::RS256, issuer, audience),
        })
    }
}

fn build_validation(algorithm: Algorithm, issuer: Option<&str>, audience: Option<&str>) -> Validation {
    let mut validation = Validation::new(algorithm);
    if let Some(issuer) = issuer {
        validation.set_issuer(&[issuer]);
    }
    match audience {
        Some(audience) => validation.set_audience(&[audience]),
        None => validation.validate_aud = false,
    }
    validation
}

#[async_trait]
impl IdentityVerifier for JwtIdentityVerifier {
    async fn verify(&self, token: &str) -> Result<String, AuthError> {
        let data = decode::<IdentityClaims>(token, &self.decoding_key, &self.validation).map_err(
            |e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken(e.to_string()),
            },
        )?;

        let user_id = data.claims.sub.trim();
        if user_id.is_empty() {
            return Err(AuthError::InvalidToken("empty subject".to_string()));
        }

        Ok(user_id.to_string())
    }
}

/// Verify a raw token, logging the reason for a rejection
pub async fn authenticate(verifier: &dyn IdentityVerifier, token: &str) -> Result<String, AuthError> {
    match verifier.verify(token).await {
        Ok(user_id) => {
            debug!(user_id = %user_id, "Identity token verified");
            Ok(user_id)
        }
        Err(e) => {
            warn!("Identity token rejected: {}", e);
            Err(e)
        }
    }
}

/// Authenticated caller, extracted from `Authorization: Bearer <token>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    Arc<dyn IdentityVerifier>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if !parts.headers.contains_key(AUTHORIZATION) {
            return Err(AuthError::MissingToken.into());
        }

        let bearer = parts
            .headers
            .typed_get::<Authorization<Bearer>>()
            .ok_or(AuthError::MalformedHeader)?;

        let verifier = Arc::<dyn IdentityVerifier>::from_ref(state);
        let user_id = authenticate(verifier.as_ref(), bearer.token()).await?;

        Ok(AuthUser { user_id })
    }
}
