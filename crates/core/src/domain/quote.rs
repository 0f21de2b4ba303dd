use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::actor::ActorId;
use crate::domain::request::ServiceRequestId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QuoteId(pub String);

impl fmt::Display for QuoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BookingId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteStatus {
    Pending,
    Accepted,
    Rejected,
    Withdrawn,
    Expired,
}

impl QuoteStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Withdrawn => "withdrawn",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for QuoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A provider's proposed terms before the quote exists.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteDraft {
    pub amount: Decimal,
    pub valid_until: Option<DateTime<Utc>>,
}

impl QuoteDraft {
    pub fn new(amount: Decimal) -> Self {
        Self { amount, valid_until: None }
    }

    pub fn valid_until(mut self, valid_until: DateTime<Utc>) -> Self {
        self.valid_until = Some(valid_until);
        self
    }

    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), DomainError> {
        validate_amount(self.amount)?;
        validate_valid_until(self.valid_until, now)
    }
}

/// Partial update of a pending quote. `valid_until: Some(None)` clears the deadline.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteAmendment {
    pub amount: Option<Decimal>,
    pub valid_until: Option<Option<DateTime<Utc>>>,
}

impl QuoteAmendment {
    pub fn is_empty(&self) -> bool {
        self.amount.is_none() && self.valid_until.is_none()
    }

    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), DomainError> {
        if self.is_empty() {
            return Err(DomainError::Validation("amendment changes nothing".to_owned()));
        }
        if let Some(amount) = self.amount {
            validate_amount(amount)?;
        }
        if let Some(valid_until) = self.valid_until {
            validate_valid_until(valid_until, now)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub id: QuoteId,
    pub request_id: ServiceRequestId,
    pub provider_id: ActorId,
    pub amount: Decimal,
    pub valid_until: Option<DateTime<Utc>>,
    pub status: QuoteStatus,
    pub booking_id: Option<BookingId>,
    pub status_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub withdrawn_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl Quote {
    pub fn from_draft(
        id: QuoteId,
        request_id: ServiceRequestId,
        provider_id: ActorId,
        draft: QuoteDraft,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            request_id,
            provider_id,
            amount: draft.amount,
            valid_until: draft.valid_until,
            status: QuoteStatus::Pending,
            booking_id: None,
            status_reason: None,
            created_at: now,
            updated_at: now,
            accepted_at: None,
            rejected_at: None,
            withdrawn_at: None,
            expired_at: None,
            version: 0,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == QuoteStatus::Pending
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.valid_until.is_some_and(|valid_until| valid_until < now)
    }

    pub fn is_submitted_by(&self, provider: &ActorId) -> bool {
        &self.provider_id == provider
    }

    pub fn can_transition_to(&self, next: QuoteStatus) -> bool {
        matches!(
            (self.status, next),
            (QuoteStatus::Pending, QuoteStatus::Accepted)
                | (QuoteStatus::Pending, QuoteStatus::Rejected)
                | (QuoteStatus::Pending, QuoteStatus::Withdrawn)
                | (QuoteStatus::Pending, QuoteStatus::Expired)
        )
    }

    pub fn transition_to(
        &mut self,
        next: QuoteStatus,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if !self.can_transition_to(next) {
            return Err(DomainError::InvalidTransition { from: self.status, to: next });
        }

        self.status = next;
        self.updated_at = now;
        self.stamp(next, now);
        Ok(())
    }

    pub fn timestamp_for(&self, status: QuoteStatus) -> Option<DateTime<Utc>> {
        match status {
            QuoteStatus::Pending => Some(self.created_at),
            QuoteStatus::Accepted => self.accepted_at,
            QuoteStatus::Rejected => self.rejected_at,
            QuoteStatus::Withdrawn => self.withdrawn_at,
            QuoteStatus::Expired => self.expired_at,
        }
    }

    pub fn apply_amendment(&mut self, amendment: &QuoteAmendment, now: DateTime<Utc>) {
        if let Some(amount) = amendment.amount {
            self.amount = amount;
        }
        if let Some(valid_until) = amendment.valid_until {
            self.valid_until = valid_until;
        }
        self.updated_at = now;
    }

    // First write wins; retried transitions keep the original instant.
    fn stamp(&mut self, status: QuoteStatus, now: DateTime<Utc>) {
        let slot = match status {
            QuoteStatus::Pending => return,
            QuoteStatus::Accepted => &mut self.accepted_at,
            QuoteStatus::Rejected => &mut self.rejected_at,
            QuoteStatus::Withdrawn => &mut self.withdrawn_at,
            QuoteStatus::Expired => &mut self.expired_at,
        };
        slot.get_or_insert(now);
    }
}

fn validate_amount(amount: Decimal) -> Result<(), DomainError> {
    if amount <= Decimal::ZERO {
        return Err(DomainError::Validation(format!("quote amount must be positive, got {amount}")));
    }
    Ok(())
}

fn validate_valid_until(
    valid_until: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<(), DomainError> {
    match valid_until {
        Some(deadline) if deadline <= now => Err(DomainError::Validation(
            "quote valid_until must be in the future".to_owned(),
        )),
        _ => Ok(()),
    }
}
