//! Error types shared across the pipeline stages.

use thiserror::Error;

pub use crate::{chord::ChordParseError, matcher::MatcherError};

/// Errors raised while turning a signal into pitch features.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    /// The sample rate cannot be used by the selected strategy.
    #[error("sample rate {got} Hz is below the required {minimum} Hz")]
    InvalidSampleRate {
        /// Lowest accepted sample rate.
        minimum: u32,
        /// The rate that was supplied.
        got: u32,
    },

    /// The signal holds no samples.
    #[error("signal is empty")]
    EmptySignal,

    /// The strategy parameters are inconsistent.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The input could not be resampled to the reference rate.
    #[error("resampling failed: {0}")]
    Resampling(String),
}

/// Errors raised by malformed feature filter parameters.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FilterError {
    /// A filter parameter is out of range.
    #[error("invalid `{filter}` parameter: {msg}")]
    InvalidParameter {
        /// Name of the offending filter.
        filter: &'static str,
        /// What is wrong with it.
        msg: String,
    },
}

impl FilterError {
    pub(crate) fn invalid(filter: &'static str, msg: impl Into<String>) -> Self {
        FilterError::InvalidParameter {
            filter,
            msg: msg.into(),
        }
    }
}

/// Any failure of a chord estimation run.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EstimatorError {
    /// Feature extraction failed.
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    /// The transform pipeline is misconfigured.
    #[error(transparent)]
    Filter(#[from] FilterError),

    /// The matcher is misconfigured.
    #[error(transparent)]
    Matcher(#[from] MatcherError),

    /// The estimator configuration is inconsistent.
    #[error("configuration error: {0}")]
    Configuration(String),
}
