//! Error taxonomy for the benchmark engine
//!
//! - `ConfigurationError` - invalid or incomplete configuration, raised before any work
//! - `StageExecutionError` - one stage failed for one input
//! - `ExternalServiceError` - transport/timeout failure talking to an LLM or vectorstore
//! - `MetricsError` - a score could not be computed (unparseable judge payload, out-of-range value)

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::StageCategory;

/// Configuration problems. Never retried; a sweep aborts before running anything.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigurationError {
    #[error("invalid pipeline configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),

    #[error("unknown {category} technique '{name}'")]
    UnknownTechnique { category: StageCategory, name: String },

    #[error("{category} stage requires parameter '{param}'")]
    MissingParameter { category: StageCategory, param: String },

    #[error("sweep resolves to no configurations (add at least one [[models]] entry)")]
    EmptyConfigurationSet,

    #[error("failed to load {what}: {reason}")]
    Load { what: String, reason: String },

    #[error("{category} stage needs a {service} but none was provided")]
    MissingService { category: StageCategory, service: String },
}

/// Failure talking to an external collaborator.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExternalServiceError {
    #[error("{service} request failed: {message}")]
    Request { service: String, message: String },

    #[error("{service} returned HTTP {status}: {body}")]
    Status { service: String, status: u16, body: String },

    #[error("{service} returned an unexpected payload: {message}")]
    Payload { service: String, message: String },

    #[error("{service} call timed out")]
    Timeout { service: String },
}

impl ExternalServiceError {
    pub fn request(service: &str, message: impl ToString) -> Self {
        Self::Request {
            service: service.to_string(),
            message: message.to_string(),
        }
    }

    pub fn payload(service: &str, message: impl ToString) -> Self {
        Self::Payload {
            service: service.to_string(),
            message: message.to_string(),
        }
    }
}

/// A single stage failed while processing one input.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[error("{stage} stage failed: {message}")]
pub struct StageExecutionError {
    pub stage: StageCategory,
    pub message: String,
    /// Set when the stage failed because a collaborator did
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<ExternalServiceError>,
}

impl StageExecutionError {
    pub fn new(stage: StageCategory, message: impl ToString) -> Self {
        Self {
            stage,
            message: message.to_string(),
            cause: None,
        }
    }

    pub fn from_service(stage: StageCategory, err: ExternalServiceError) -> Self {
        Self {
            cause: Some(err.clone()),
            ..Self::new(stage, err)
        }
    }
}

/// Scoring failures. Surfaced instead of defaulted so aggregates stay honest.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum MetricsError {
    #[error("judge response could not be parsed: {0}")]
    Parse(String),

    #[error("{metric} = {value} is outside [0, 1]")]
    OutOfRange { metric: String, value: f64 },

    #[error("missing ground truth: {0}")]
    MissingGroundTruth(String),

    #[error(transparent)]
    Service(#[from] ExternalServiceError),
}
