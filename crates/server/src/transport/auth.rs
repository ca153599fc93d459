// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token authentication: HS256 JWTs signed with the server secret.
//!
//! The secret comes from `JWT_SECRET`; when unset a random one is generated
//! at boot (tokens then die with the process). `--no-auth` disables the
//! whole layer.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::Engine;
use rand::Rng;
use ring::hmac;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ErrorResponse};
use crate::state::AppState;

const B64: base64::engine::general_purpose::GeneralPurpose =
    base64::engine::general_purpose::URL_SAFE_NO_PAD;

#[derive(Debug, Serialize, Deserialize)]
struct JwtHeader {
    alg: String,
    typ: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct JwtClaims {
    sub: String,
    iat: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    exp: Option<u64>,
}

/// HMAC key for signing and verifying API tokens. `None` = auth disabled.
pub struct AuthKeys {
    key: Option<hmac::Key>,
}

impl AuthKeys {
    /// Build from the environment. Generates an ephemeral secret when
    /// `JWT_SECRET` is absent.
    pub fn from_env(no_auth: bool) -> anyhow::Result<Self> {
        if no_auth {
            return Ok(Self { key: None });
        }
        let secret = match std::env::var("JWT_SECRET") {
            Ok(s) if !s.is_empty() => s,
            _ => {
                let mut bytes = [0u8; 32];
                rand::rng().fill(&mut bytes);
                let generated = B64.encode(bytes);
                tracing::warn!("JWT_SECRET not set; generated an ephemeral secret");
                generated
            }
        };
        Ok(Self { key: Some(hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes())) })
    }

    /// Auth layer for tests: fixed secret.
    pub fn from_secret(secret: &str) -> Self {
        Self { key: Some(hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes())) }
    }

    /// An AuthKeys with authentication disabled.
    pub fn disabled() -> Self {
        Self { key: None }
    }

    pub fn enabled(&self) -> bool {
        self.key.is_some()
    }

    /// Sign a token for `subject`, valid for `ttl_secs` (0 = no expiry).
    pub fn issue(&self, subject: &str, ttl_secs: u64) -> Option<String> {
        let key = self.key.as_ref()?;
        let now = epoch_secs();
        let header = JwtHeader { alg: "HS256".to_owned(), typ: "JWT".to_owned() };
        let claims = JwtClaims {
            sub: subject.to_owned(),
            iat: now,
            exp: (ttl_secs > 0).then(|| now + ttl_secs),
        };
        let h = B64.encode(serde_json::to_vec(&header).ok()?);
        let c = B64.encode(serde_json::to_vec(&claims).ok()?);
        let signing_input = format!("{h}.{c}");
        let sig = hmac::sign(key, signing_input.as_bytes());
        Some(format!("{signing_input}.{}", B64.encode(sig.as_ref())))
    }

    /// Verify a compact JWT: structure, HS256 signature, and expiry.
    pub fn verify(&self, token: &str) -> Result<(), ApiError> {
        let Some(key) = self.key.as_ref() else {
            return Ok(());
        };

        let mut parts = token.split('.');
        let (Some(h), Some(c), Some(s), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(ApiError::Auth);
        };

        let header_bytes = B64.decode(h).map_err(|_| ApiError::Auth)?;
        let header: JwtHeader =
            serde_json::from_slice(&header_bytes).map_err(|_| ApiError::Auth)?;
        if header.alg != "HS256" {
            return Err(ApiError::Auth);
        }

        let sig = B64.decode(s).map_err(|_| ApiError::Auth)?;
        let signing_input = format!("{h}.{c}");
        hmac::verify(key, signing_input.as_bytes(), &sig).map_err(|_| ApiError::Auth)?;

        let claim_bytes = B64.decode(c).map_err(|_| ApiError::Auth)?;
        let claims: JwtClaims =
            serde_json::from_slice(&claim_bytes).map_err(|_| ApiError::Auth)?;
        if let Some(exp) = claims.exp {
            if exp < epoch_secs() {
                return Err(ApiError::Auth);
            }
        }
        Ok(())
    }
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Extract a token from the Authorization header or `?token=` query string.
pub fn extract_token(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    if let Some(header) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        if let Some(token) = header.strip_prefix("Bearer ") {
            return Some(token.to_owned());
        }
    }
    for pair in query.unwrap_or("").split('&') {
        if let Some(value) = pair.strip_prefix("token=") {
            return Some(value.to_owned());
        }
    }
    None
}

/// Axum middleware enforcing token auth.
///
/// Exempt: `/api/health` and WebSocket upgrades (`/ws`), which validate the
/// query token inside the handler.
pub async fn auth_layer(
    state: State<Arc<AppState>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let path = req.uri().path();
    if path == "/api/health" || path == "/ws" {
        return next.run(req).await;
    }

    if state.auth.enabled() {
        let token = extract_token(req.headers(), req.uri().query());
        let ok = matches!(token.as_deref().map(|t| state.auth.verify(t)), Some(Ok(())));
        if !ok {
            let body = ErrorResponse { error: "unauthorized".to_owned(), details: None };
            return (StatusCode::UNAUTHORIZED, axum::Json(body)).into_response();
        }
    }

    next.run(req).await
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
