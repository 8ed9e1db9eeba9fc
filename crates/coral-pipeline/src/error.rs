use thiserror::Error;

use coral_ai::ProviderErrorKind;
use coral_channels::{NormalizationError, Platform};
use coral_store::StoreError;

/// Reply substituted for provider failures; the real detail is logged, never
/// shown to the customer.
pub const PROVIDER_FAILURE_REPLY: &str =
    "Sorry, I am unable to respond right now. Please try again in a moment.";

#[derive(Debug, Error)]
/// Enumerates supported `PipelineError` values.
pub enum PipelineError {
    #[error("webhook signature verification failed for {}", platform.as_str())]
    Authentication { platform: Platform },
    #[error("normalization failed: {0}")]
    Normalization(#[from] NormalizationError),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("provider error ({}): {message}", kind.as_str())]
    Provider {
        kind: ProviderErrorKind,
        message: String,
    },
    #[error("delivery failed: {0}")]
    Delivery(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl PipelineError {
    /// Stable machine-readable code carried in per-message results.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Authentication { .. } => "invalid_signature",
            Self::Normalization(error) => error.code.as_str(),
            Self::Configuration(_) => "configuration_error",
            Self::Provider { kind, .. } => match kind {
                ProviderErrorKind::Auth => "provider_auth",
                ProviderErrorKind::RateLimited => "provider_rate_limited",
                ProviderErrorKind::Transient => "provider_transient",
                ProviderErrorKind::Invalid => "provider_invalid",
            },
            Self::Delivery(_) => "delivery_failed",
            Self::Store(_) => "store_error",
        }
    }

    /// True when the per-message result should carry the generic provider
    /// failure reply instead of the error detail.
    pub fn is_provider_failure(&self) -> bool {
        matches!(self, Self::Provider { .. })
    }
}

#[cfg(test)]
mod tests {
    use coral_ai::ProviderErrorKind;

    use super::PipelineError;

    #[test]
    fn unit_error_codes_are_stable() {
        let error = PipelineError::Configuration("no active channel".to_string());
        assert_eq!(error.code(), "configuration_error");

        let error = PipelineError::Provider {
            kind: ProviderErrorKind::RateLimited,
            message: "429".to_string(),
        };
        assert_eq!(error.code(), "provider_rate_limited");
        assert!(error.is_provider_failure());
    }
}
