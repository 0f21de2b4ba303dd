pub mod audit;
pub mod clock;
pub mod config;
pub mod domain;
pub mod errors;
pub mod expiration;
pub mod lifecycle;
pub mod policy;

#[cfg(test)]
mod fixtures;

pub use audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
pub use clock::{Clock, FixedClock, SystemClock};
pub use domain::actor::{Actor, ActorId, ActorRole, Capability};
pub use domain::bundle::RequestBundle;
pub use domain::quote::{BookingId, Quote, QuoteAmendment, QuoteDraft, QuoteId, QuoteStatus};
pub use domain::request::{RequestStatus, ServiceRequest, ServiceRequestId};
pub use errors::{ApplicationError, DomainError, EntityKind, InterfaceError};
pub use expiration::{effective_status, should_auto_expire, ExpiryCause, SweepOutcome};
pub use lifecycle::{ChangeSet, LifecycleEngine, LifecycleSettings, Transition, TransitionOutcome};
pub use policy::{
    Action, Decision, DenialReason, EligibilityPolicy, PolicySettings, QuotePolicy, Subject,
    SubjectKind,
};
