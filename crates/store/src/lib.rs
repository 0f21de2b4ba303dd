pub mod repositories;

pub use repositories::{
    ActorRepository, BrokerStore, ChangeCommitter, InMemoryBrokerStore, QuoteRepository,
    RepositoryError, RequestRepository,
};
