// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

/// Error codes for the HTTP and WebSocket surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApiError {
    /// Invalid flags or environment; fatal at boot.
    Config,
    /// Bad request body or parameters.
    Validation,
    /// Missing or invalid token.
    Auth,
    /// Unknown session or route.
    NotFound,
    /// Session exists but is not in `running`.
    Busy,
    /// PTY spawn/resize/kill failure.
    Pty,
    /// Stream file I/O or watcher failure (per-subscriber).
    Stream,
    /// HQ peer unreachable or timed out.
    Upstream,
    Internal,
}

impl ApiError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Config => 500,
            Self::Validation => 400,
            Self::Auth => 401,
            Self::NotFound => 404,
            Self::Busy => 400,
            Self::Pty => 500,
            Self::Stream => 500,
            Self::Upstream => 503,
            Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Config => "CONFIG",
            Self::Validation => "VALIDATION",
            Self::Auth => "UNAUTHORIZED",
            Self::NotFound => "NOT_FOUND",
            Self::Busy => "BUSY",
            Self::Pty => "PTY",
            Self::Stream => "STREAM",
            Self::Upstream => "UPSTREAM",
            Self::Internal => "INTERNAL",
        }
    }

    /// WebSocket close code used when this error terminates a connection.
    pub fn ws_close_code(&self) -> u16 {
        match self {
            Self::Auth => 1008,
            Self::Validation => 1002,
            _ => 1011,
        }
    }

    pub fn to_http_response(
        &self,
        message: impl Into<String>,
    ) -> (StatusCode, Json<ErrorResponse>) {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(ErrorResponse { error: message.into(), details: None }))
    }

    pub fn to_http_response_with(
        &self,
        message: impl Into<String>,
        details: impl Into<String>,
    ) -> (StatusCode, Json<ErrorResponse>) {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(ErrorResponse { error: message.into(), details: Some(details.into()) }))
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error body: `{error, details?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}
