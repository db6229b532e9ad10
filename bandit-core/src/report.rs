//! Error reporting
//!
//! Online serving logs the full error. In batch mode the log may be shared
//! with the job owner, so it only gets the public message and the full text
//! goes to the `trusted` tracing target, which operators route separately.

use tracing::error;

use crate::config::InferenceMode;
use crate::error::{ErrorKind, ServingError};

/// Tracing target for messages that may contain internal detail
pub const TRUSTED_TARGET: &str = "trusted";

/// What gets logged for one failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    /// Line written to the regular log
    pub message: String,
    /// Line written to the trusted target, batch mode only
    pub trusted: Option<String>,
}

impl ErrorReport {
    pub fn new(error: &ServingError, mode: InferenceMode) -> Self {
        let kind = error.kind();
        match mode {
            InferenceMode::Online => Self {
                kind,
                message: error.private_message(),
                trusted: None,
            },
            InferenceMode::Batch => Self {
                kind,
                message: error.public_message(),
                trusted: Some(error.private_message()),
            },
        }
    }

    pub fn emit(&self) {
        error!(kind = %self.kind, "{}", self.message);
        if let Some(trusted) = &self.trusted {
            error!(target: TRUSTED_TARGET, kind = %self.kind, "{}", trusted);
        }
    }
}

/// Log `error` the way `mode` requires
pub fn report_error(error: &ServingError, mode: InferenceMode) -> ErrorReport {
    let report = ErrorReport::new(error, mode);
    report.emit();
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScorerError;

    #[test]
    fn online_logs_private_message() {
        let error = ServingError::Algorithm("socket /tmp/x closed".to_string());
        let report = report_error(&error, InferenceMode::Online);
        assert!(report.message.contains("/tmp/x"));
        assert!(report.trusted.is_none());
    }

    #[test]
    fn batch_splits_public_and_trusted() {
        let error = ServingError::from(ScorerError::Protocol("bad line 'abc'".to_string()));
        let report = report_error(&error, InferenceMode::Batch);
        assert_eq!(report.kind, ErrorKind::Algorithm);
        assert!(!report.message.contains("abc"));
        assert!(report.trusted.as_deref().unwrap().contains("abc"));
    }

    #[test]
    fn batch_customer_error_is_descriptive() {
        let error = ServingError::Customer("top_k out of range".to_string());
        let report = ErrorReport::new(&error, InferenceMode::Batch);
        assert_eq!(report.message, "top_k out of range");
    }
}
