// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The fixed error-code taxonomy and the stage error type.
//!
//! Stages never invent codes outside this taxonomy; the code travels on the
//! wire in `PushResult.error_code` and in the `error_code` internal label of
//! DLQ'd batches.

use std::fmt;
use std::str::FromStr;

/// The fixed error-code taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Malformed envelope or payload; terminal at the detecting stage.
    InvalidInput,
    /// Stage-internal failure (state-store I/O, decoder crash, overload).
    ProcessingFailed,
    /// Raw PII survived scrubbing; terminal at the detecting stage.
    PiiLeak,
    /// The downstream peer rejected or never received the batch.
    ForwardingFailed,
    /// The downstream circuit breaker is open; the batch was not attempted.
    CircuitBreakerOpen,
    /// The DLQ itself rejected the batch; the only code that may lose data.
    DlqSendFailed,
    /// The distributed configuration failed stage validation.
    ConfigInvalid,
    /// In-flight work was cancelled by the shutdown drain deadline.
    ShutdownTimeout,
}

impl ErrorCode {
    /// The wire spelling of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::ProcessingFailed => "PROCESSING_FAILED",
            ErrorCode::PiiLeak => "PII_LEAK",
            ErrorCode::ForwardingFailed => "FORWARDING_FAILED",
            ErrorCode::CircuitBreakerOpen => "CIRCUIT_BREAKER_OPEN",
            ErrorCode::DlqSendFailed => "DLQ_SEND_FAILED",
            ErrorCode::ConfigInvalid => "CONFIG_INVALID",
            ErrorCode::ShutdownTimeout => "SHUTDOWN_TIMEOUT",
        }
    }

    /// Terminal codes are never retried automatically.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ErrorCode::InvalidInput | ErrorCode::PiiLeak)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INVALID_INPUT" => Ok(ErrorCode::InvalidInput),
            "PROCESSING_FAILED" => Ok(ErrorCode::ProcessingFailed),
            "PII_LEAK" => Ok(ErrorCode::PiiLeak),
            "FORWARDING_FAILED" => Ok(ErrorCode::ForwardingFailed),
            "CIRCUIT_BREAKER_OPEN" => Ok(ErrorCode::CircuitBreakerOpen),
            "DLQ_SEND_FAILED" => Ok(ErrorCode::DlqSendFailed),
            "CONFIG_INVALID" => Ok(ErrorCode::ConfigInvalid),
            "SHUTDOWN_TIMEOUT" => Ok(ErrorCode::ShutdownTimeout),
            _ => Err(()),
        }
    }
}

/// A classified stage failure.
#[derive(thiserror::Error, Debug, Clone)]
#[error("{code}: {message}")]
pub struct StageError {
    /// Taxonomy code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
}

impl StageError {
    /// Builds an error with the given code.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// `INVALID_INPUT` constructor.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// `PROCESSING_FAILED` constructor.
    pub fn processing_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ProcessingFailed, message)
    }

    /// `PII_LEAK` constructor.
    pub fn pii_leak(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PiiLeak, message)
    }

    /// `FORWARDING_FAILED` constructor.
    pub fn forwarding_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ForwardingFailed, message)
    }

    /// `CONFIG_INVALID` constructor.
    pub fn config_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigInvalid, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_roundtrip_through_wire_spelling() {
        for code in [
            ErrorCode::InvalidInput,
            ErrorCode::ProcessingFailed,
            ErrorCode::PiiLeak,
            ErrorCode::ForwardingFailed,
            ErrorCode::CircuitBreakerOpen,
            ErrorCode::DlqSendFailed,
            ErrorCode::ConfigInvalid,
            ErrorCode::ShutdownTimeout,
        ] {
            assert_eq!(code.as_str().parse::<ErrorCode>(), Ok(code));
        }
    }

    #[test]
    fn only_input_and_pii_codes_are_terminal() {
        assert!(ErrorCode::InvalidInput.is_terminal());
        assert!(ErrorCode::PiiLeak.is_terminal());
        assert!(!ErrorCode::ForwardingFailed.is_terminal());
        assert!(!ErrorCode::ProcessingFailed.is_terminal());
    }
}
