use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::store::StoreError;

/// Kinds of record a request can fail to resolve. Reported without ids so a
/// caller cannot probe which records exist in other tenants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Entity {
    Tenant,
    Room,
    Service,
    Booking,
    Rule,
    Exception,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Entity::Tenant => "tenant",
            Entity::Room => "room",
            Entity::Service => "service",
            Entity::Booking => "booking",
            Entity::Rule => "availability rule",
            Entity::Exception => "availability exception",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

fn summarize(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed: {}", summarize(.0))]
    Validation(Vec<FieldError>),
    /// Missing, inactive, unpublished, not bookable, or owned by another tenant.
    #[error("{0} not found or unavailable")]
    NotFound(Entity),
    /// The slot was taken between listing and committing. Re-fetch slots.
    #[error("this slot is no longer available")]
    Conflict,
    #[error("{0} is referenced by existing bookings")]
    InUse(Entity),
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("store error: {0}")]
    Store(StoreError),
}

/// How a caller should present an [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    Validation,
    NotFound,
    Conflict,
    Internal,
}

impl EngineError {
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        EngineError::Validation(vec![FieldError::new(field, message)])
    }

    pub fn rejection(&self) -> Rejection {
        match self {
            EngineError::Validation(_) | EngineError::InUse(_) | EngineError::LimitExceeded(_) => {
                Rejection::Validation
            }
            EngineError::NotFound(_) => Rejection::NotFound,
            EngineError::Conflict => Rejection::Conflict,
            EngineError::InvalidTimezone(_) | EngineError::Store(_) => Rejection::Internal,
        }
    }

    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::NotFound(_) => "not_found",
            EngineError::Conflict => "conflict",
            EngineError::InUse(_) => "in_use",
            EngineError::InvalidTimezone(_) => "invalid_timezone",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::Store(_) => "store",
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Overlap(_) => EngineError::Conflict,
            StoreError::LimitExceeded(msg) => EngineError::LimitExceeded(msg),
            other => EngineError::Store(other),
        }
    }
}
