use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;

use crate::domain::actor::{Actor, ActorId};
use crate::domain::bundle::RequestBundle;
use crate::domain::quote::{Quote, QuoteDraft, QuoteId};
use crate::domain::request::{RequestStatus, ServiceRequest, ServiceRequestId};

pub(crate) const CLIENT: &str = "client-1";

pub(crate) fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 30, 0).single().expect("valid fixture instant")
}

pub(crate) fn client() -> Actor {
    Actor::client(CLIENT)
}

pub(crate) fn provider(id: &str) -> Actor {
    Actor::provider(id, &["plumbing"])
}

pub(crate) fn request(status: RequestStatus) -> ServiceRequest {
    ServiceRequest {
        id: ServiceRequestId("REQ-1".to_owned()),
        client_id: ActorId(CLIENT.to_owned()),
        status,
        category: Some("plumbing".to_owned()),
        budget: Some(Decimal::ONE_HUNDRED),
        expires_at: None,
        created_at: now(),
        version: 0,
    }
}

pub(crate) fn quote(id: &str, provider: &str, amount: i64) -> Quote {
    Quote::from_draft(
        QuoteId(id.to_owned()),
        ServiceRequestId("REQ-1".to_owned()),
        ActorId(provider.to_owned()),
        QuoteDraft::new(Decimal::new(amount, 0)),
        now(),
    )
}

/// Open request with one pending quote per `(quote id, provider id)` pair.
pub(crate) fn bundle(quotes: &[(&str, &str)]) -> RequestBundle {
    RequestBundle::new(
        request(RequestStatus::Open),
        quotes.iter().map(|(id, provider)| quote(id, provider, 120)).collect(),
    )
}

pub(crate) fn quote_id(id: &str) -> QuoteId {
    QuoteId(id.to_owned())
}
