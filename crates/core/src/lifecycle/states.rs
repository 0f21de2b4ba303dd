use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::actor::Actor;
use crate::domain::quote::{Quote, QuoteId, QuoteStatus};
use crate::domain::request::{RequestStatus, ServiceRequest};

/// Recorded on quotes rejected because a competitor was accepted.
pub const SIBLING_ACCEPTED_REASON: &str = "sibling accepted";

#[derive(Clone, Copy, Debug)]
pub enum Initiator<'a> {
    Actor(&'a Actor),
    System,
}

impl Initiator<'_> {
    pub fn label(&self) -> String {
        match self {
            Self::Actor(actor) => actor.id.0.clone(),
            Self::System => "system".to_owned(),
        }
    }
}

/// One requested status change on one quote.
#[derive(Clone, Debug)]
pub struct Transition<'a> {
    pub quote_id: &'a QuoteId,
    pub target: QuoteStatus,
    pub initiator: Initiator<'a>,
    pub now: DateTime<Utc>,
    pub reason: Option<String>,
    pub closes_request_as: Option<RequestStatus>,
}

impl<'a> Transition<'a> {
    pub fn by(
        actor: &'a Actor,
        quote_id: &'a QuoteId,
        target: QuoteStatus,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            quote_id,
            target,
            initiator: Initiator::Actor(actor),
            now,
            reason: None,
            closes_request_as: None,
        }
    }

    pub fn expire(quote_id: &'a QuoteId, now: DateTime<Utc>, reason: impl Into<String>) -> Self {
        Self {
            quote_id,
            target: QuoteStatus::Expired,
            initiator: Initiator::System,
            now,
            reason: Some(reason.into()),
            closes_request_as: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Request status applied on acceptance; the engine default is used when unset.
    pub fn closing_request_as(mut self, status: RequestStatus) -> Self {
        self.closes_request_as = Some(status);
        self
    }
}

/// Every entity one engine call mutated, as it should be persisted.
///
/// Entities keep the `version` they were loaded with; the store compares it
/// against the stored row and bumps it on commit.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub request: Option<ServiceRequest>,
    pub quotes: Vec<Quote>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.request.is_none() && self.quotes.is_empty()
    }

    pub fn quote(&self, id: &QuoteId) -> Option<&Quote> {
        self.quotes.iter().find(|quote| &quote.id == id)
    }

    /// Later snapshots of the same entity replace earlier ones.
    pub fn merge(&mut self, other: ChangeSet) {
        if other.request.is_some() {
            self.request = other.request;
        }
        for quote in other.quotes {
            match self.quotes.iter_mut().find(|existing| existing.id == quote.id) {
                Some(existing) => *existing = quote,
                None => self.quotes.push(quote),
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub quote_id: QuoteId,
    pub from: QuoteStatus,
    pub to: QuoteStatus,
    pub cascaded: Vec<QuoteId>,
    pub changes: ChangeSet,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleSettings {
    pub accept_request_status: RequestStatus,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self { accept_request_status: RequestStatus::InNegotiation }
    }
}
