use async_trait::async_trait;
use thiserror::Error;

use bidbroker_core::domain::actor::{Actor, ActorId};
use bidbroker_core::domain::quote::{Quote, QuoteId};
use bidbroker_core::domain::request::{ServiceRequest, ServiceRequestId};
use bidbroker_core::errors::{ApplicationError, DomainError, EntityKind};
use bidbroker_core::lifecycle::ChangeSet;

pub mod memory;

pub use memory::InMemoryBrokerStore;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("version conflict on {entity} `{id}`: expected {expected}, found {found}")]
    Conflict { entity: EntityKind, id: String, expected: u64, found: u64 },
    #[error("{entity} `{id}` already exists")]
    Duplicate { entity: EntityKind, id: String },
    #[error("{entity} `{id}` is missing from the store")]
    Missing { entity: EntityKind, id: String },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<RepositoryError> for ApplicationError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Conflict { entity, id, expected, found } => {
                Self::Domain(DomainError::StaleState { entity, id, expected, found })
            }
            RepositoryError::Duplicate { entity, id } => {
                Self::Domain(DomainError::Validation(format!("{entity} `{id}` already exists")))
            }
            RepositoryError::Missing { entity, id } => {
                Self::Domain(DomainError::NotFound { entity, id })
            }
            RepositoryError::Unavailable(message) => Self::Persistence(message),
        }
    }
}

#[async_trait]
pub trait ActorRepository: Send + Sync {
    async fn find_actor(&self, id: &ActorId) -> Result<Option<Actor>, RepositoryError>;
    async fn save_actor(&self, actor: Actor) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait RequestRepository: Send + Sync {
    async fn find_request(
        &self,
        id: &ServiceRequestId,
    ) -> Result<Option<ServiceRequest>, RepositoryError>;

    /// Unconditional upsert; versioned writes go through [`ChangeCommitter::commit`].
    async fn save_request(&self, request: ServiceRequest) -> Result<(), RepositoryError>;

    /// Requests holding at least one pending quote, in id order.
    async fn list_requests_with_pending_quotes(
        &self,
    ) -> Result<Vec<ServiceRequestId>, RepositoryError>;
}

#[async_trait]
pub trait QuoteRepository: Send + Sync {
    async fn find_quote(&self, id: &QuoteId) -> Result<Option<Quote>, RepositoryError>;

    /// Quotes of one request in insertion order.
    async fn list_quotes_for_request(
        &self,
        request_id: &ServiceRequestId,
    ) -> Result<Vec<Quote>, RepositoryError>;

    async fn insert_quote(&self, quote: Quote) -> Result<(), RepositoryError>;

    async fn delete_quote(&self, id: &QuoteId, expected_version: u64)
        -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ChangeCommitter: Send + Sync {
    /// Writes every entity in `changes` or none of them.
    ///
    /// Each entity must still carry the version currently stored. The returned
    /// set holds the committed snapshots with their bumped versions.
    async fn commit(&self, changes: &ChangeSet) -> Result<ChangeSet, RepositoryError>;
}

/// Everything the broker service consumes from persistence.
pub trait BrokerStore: ActorRepository + RequestRepository + QuoteRepository + ChangeCommitter {}

impl<T> BrokerStore for T where
    T: ActorRepository + RequestRepository + QuoteRepository + ChangeCommitter
{
}

#[cfg(test)]
mod tests {
    use bidbroker_core::errors::{ApplicationError, DomainError, EntityKind};

    use super::RepositoryError;

    #[test]
    fn conflict_surfaces_as_stale_state() {
        let error = ApplicationError::from(RepositoryError::Conflict {
            entity: EntityKind::Quote,
            id: "Q-1".to_owned(),
            expected: 1,
            found: 2,
        });
        assert!(error.is_stale());
        assert_eq!(error.code(), "stale_state");
    }

    #[test]
    fn remaining_variants_map_to_application_errors() {
        let missing = ApplicationError::from(RepositoryError::Missing {
            entity: EntityKind::Request,
            id: "REQ-1".to_owned(),
        });
        assert!(matches!(missing, ApplicationError::Domain(DomainError::NotFound { .. })));

        let duplicate = ApplicationError::from(RepositoryError::Duplicate {
            entity: EntityKind::Quote,
            id: "Q-1".to_owned(),
        });
        assert!(matches!(duplicate, ApplicationError::Domain(DomainError::Validation(_))));

        let unavailable = ApplicationError::from(RepositoryError::Unavailable("down".to_owned()));
        assert_eq!(unavailable, ApplicationError::Persistence("down".to_owned()));
    }
}
