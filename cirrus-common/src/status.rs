// Copyright 2024 The Cirrus Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Cirrus status/error types.
//!
//! Operations across the workspace return `Result<T, CirrusError>`,
//! aliased as `CirrusResult<T>`. The code set is exactly what this
//! system produces: duplicate puts, get deadlines, and transport
//! failures reported by the RPC clients.

use std::fmt;

/// Status codes carried by [`CirrusError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// Duplicate put of an object ID.
    ObjectExists,
    /// A bounded wait expired.
    TimedOut,
    /// Transport-level RPC failure.
    RpcError,
}

impl StatusCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ObjectExists => "ObjectExists",
            Self::TimedOut => "TimedOut",
            Self::RpcError => "RpcError",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The primary error type for Cirrus operations.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct CirrusError {
    pub code: StatusCode,
    pub message: String,
    /// For RpcError, the transport-level status code.
    pub rpc_code: Option<i32>,
}

impl CirrusError {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            rpc_code: None,
        }
    }

    // Convenience constructors
    pub fn object_exists(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::ObjectExists, msg)
    }
    pub fn timed_out(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::TimedOut, msg)
    }
    pub fn rpc_error(msg: impl Into<String>, rpc_code: i32) -> Self {
        Self {
            code: StatusCode::RpcError,
            message: msg.into(),
            rpc_code: Some(rpc_code),
        }
    }

    // Status code predicates
    pub fn is_object_exists(&self) -> bool {
        self.code == StatusCode::ObjectExists
    }
    pub fn is_timed_out(&self) -> bool {
        self.code == StatusCode::TimedOut
    }
    pub fn is_rpc_error(&self) -> bool {
        self.code == StatusCode::RpcError
    }
}

/// Convenience type alias: `Result<T, CirrusError>`.
pub type CirrusResult<T> = Result<T, CirrusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CirrusError::timed_out("get expired");
        assert_eq!(err.to_string(), "TimedOut: get expired");
    }

    #[test]
    fn test_predicates() {
        assert!(CirrusError::timed_out("t").is_timed_out());
        assert!(CirrusError::object_exists("o").is_object_exists());
        assert!(!CirrusError::object_exists("o").is_rpc_error());
    }

    #[test]
    fn test_rpc_error_code() {
        let err = CirrusError::rpc_error("connection refused", 14);
        assert!(err.is_rpc_error());
        assert_eq!(err.rpc_code, Some(14));
    }
}
