use serde::{Deserialize, Serialize};

use crate::domain::actor::ActorId;
use crate::domain::quote::{Quote, QuoteId, QuoteStatus};
use crate::domain::request::ServiceRequest;

/// A request together with its quotes in submission order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestBundle {
    pub request: ServiceRequest,
    pub quotes: Vec<Quote>,
}

impl RequestBundle {
    pub fn new(request: ServiceRequest, quotes: Vec<Quote>) -> Self {
        Self { request, quotes }
    }

    pub fn quote(&self, id: &QuoteId) -> Option<&Quote> {
        self.quotes.iter().find(|quote| &quote.id == id)
    }

    pub fn quote_mut(&mut self, id: &QuoteId) -> Option<&mut Quote> {
        self.quotes.iter_mut().find(|quote| &quote.id == id)
    }

    pub fn accepted_quote(&self) -> Option<&Quote> {
        self.quotes.iter().find(|quote| quote.status == QuoteStatus::Accepted)
    }

    /// True when a quote other than `id` already holds the accepted slot.
    pub fn has_accepted_sibling(&self, id: &QuoteId) -> bool {
        self.accepted_quote().is_some_and(|accepted| &accepted.id != id)
    }

    pub fn has_quote_from(&self, provider: &ActorId) -> bool {
        self.quotes.iter().any(|quote| quote.is_submitted_by(provider))
    }

    pub fn pending_quote_ids(&self) -> Vec<QuoteId> {
        self.quotes
            .iter()
            .filter(|quote| quote.is_pending())
            .map(|quote| quote.id.clone())
            .collect()
    }
}
