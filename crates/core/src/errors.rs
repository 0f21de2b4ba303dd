use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::quote::QuoteStatus;
use crate::policy::{Action, DenialReason, SubjectKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Actor,
    Quote,
    Request,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Actor => "actor",
            Self::Quote => "quote",
            Self::Request => "request",
        })
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("{entity} `{id}` was not found")]
    NotFound { entity: EntityKind, id: String },
    #[error("{action} denied: {reason}")]
    PolicyDenied { action: Action, reason: DenialReason },
    #[error("{action} does not apply to a {subject} subject")]
    PolicyNotApplicable { action: Action, subject: SubjectKind },
    #[error("invalid quote transition from {from} to {to}")]
    InvalidTransition { from: QuoteStatus, to: QuoteStatus },
    #[error("stale {entity} `{id}`: expected version {expected}, found {found}")]
    StaleState { entity: EntityKind, id: String, expected: u64, found: u64 },
    #[error("validation failed: {0}")]
    Validation(String),
}

impl DomainError {
    pub fn not_found(entity: EntityKind, id: impl fmt::Display) -> Self {
        Self::NotFound { entity, id: id.to_string() }
    }

    /// Stable machine-readable code for logs and audit metadata.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::PolicyDenied { .. } => "policy_denied",
            Self::PolicyNotApplicable { .. } => "policy_not_applicable",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::StaleState { .. } => "stale_state",
            Self::Validation(_) => "validation_error",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl ApplicationError {
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Domain(DomainError::StaleState { .. }))
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Domain(error) => error.code(),
            Self::Persistence(_) => "persistence",
            Self::Configuration(_) => "configuration",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Forbidden { .. } => "You are not allowed to perform this action on this quote.",
            Self::NotFound { .. } => "The requested quote or request does not exist.",
            Self::Conflict { .. } => {
                "The quote changed while your action was processed. Reload and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Forbidden { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Domain(error) => {
                let message = error.to_string();
                match error {
                    DomainError::NotFound { .. } => Self::NotFound { message, correlation_id },
                    DomainError::PolicyDenied { .. } | DomainError::PolicyNotApplicable { .. } => {
                        Self::Forbidden { message, correlation_id }
                    }
                    DomainError::InvalidTransition { .. } | DomainError::StaleState { .. } => {
                        Self::Conflict { message, correlation_id }
                    }
                    DomainError::Validation(_) => Self::BadRequest { message, correlation_id },
                }
            }
            ApplicationError::Persistence(message) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            ApplicationError::Configuration(message) => Self::Internal { message, correlation_id },
        }
    }
}
