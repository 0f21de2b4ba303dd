//! Time- and closure-driven expiry of pending quotes.
//!
//! [`expiry_cause`] is pure so read paths can report an effective status
//! without writing. [`sweep_bundle`] commits the same decision through the
//! lifecycle engine using the system initiator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::{AuditContext, AuditSink, NoopAuditSink};
use crate::domain::bundle::RequestBundle;
use crate::domain::quote::{Quote, QuoteId, QuoteStatus};
use crate::domain::request::ServiceRequestId;
use crate::errors::DomainError;
use crate::lifecycle::{ChangeSet, LifecycleEngine, Transition};
use crate::policy::EligibilityPolicy;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryCause {
    ValidityElapsed,
    RequestClosed,
    RequestExpired,
    SiblingAccepted,
}

impl ExpiryCause {
    pub fn describe(self) -> &'static str {
        match self {
            Self::ValidityElapsed => "quote validity window elapsed",
            Self::RequestClosed => "request was closed",
            Self::RequestExpired => "request expired",
            Self::SiblingAccepted => "another quote was accepted",
        }
    }
}

pub fn expiry_cause(
    quote: &Quote,
    bundle: &RequestBundle,
    now: DateTime<Utc>,
) -> Option<ExpiryCause> {
    if !quote.is_pending() {
        return None;
    }
    if quote.is_expired_at(now) {
        return Some(ExpiryCause::ValidityElapsed);
    }
    if bundle.request.status.is_closed() {
        return Some(ExpiryCause::RequestClosed);
    }
    if bundle.request.is_expired_at(now) {
        return Some(ExpiryCause::RequestExpired);
    }
    if bundle.has_accepted_sibling(&quote.id) {
        return Some(ExpiryCause::SiblingAccepted);
    }
    None
}

pub fn should_auto_expire(quote: &Quote, bundle: &RequestBundle, now: DateTime<Utc>) -> bool {
    expiry_cause(quote, bundle, now).is_some()
}

/// Status a reader should see, counting expiry that has not been committed yet.
pub fn effective_status(quote: &Quote, bundle: &RequestBundle, now: DateTime<Utc>) -> QuoteStatus {
    if should_auto_expire(quote, bundle, now) {
        QuoteStatus::Expired
    } else {
        quote.status
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SweepFailure {
    pub quote_id: QuoteId,
    pub error: DomainError,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SweepOutcome {
    pub request_id: ServiceRequestId,
    pub expired: Vec<(QuoteId, ExpiryCause)>,
    pub failures: Vec<SweepFailure>,
    pub changes: ChangeSet,
}

impl SweepOutcome {
    pub fn expired_count(&self) -> usize {
        self.expired.len()
    }
}

pub fn sweep_bundle<P>(
    engine: &LifecycleEngine<P>,
    bundle: &mut RequestBundle,
    now: DateTime<Utc>,
) -> SweepOutcome
where
    P: EligibilityPolicy,
{
    let audit = AuditContext::new(None, Some(bundle.request.id.clone()), "sweep", "system");
    sweep_bundle_with_audit(engine, bundle, now, &NoopAuditSink, &audit)
}

/// Expires every pending quote that should auto-expire. A failing quote is
/// recorded in [`SweepOutcome::failures`] and the sweep moves on.
pub fn sweep_bundle_with_audit<P, S>(
    engine: &LifecycleEngine<P>,
    bundle: &mut RequestBundle,
    now: DateTime<Utc>,
    sink: &S,
    audit: &AuditContext,
) -> SweepOutcome
where
    P: EligibilityPolicy,
    S: AuditSink + ?Sized,
{
    let candidates: Vec<(QuoteId, ExpiryCause)> = bundle
        .quotes
        .iter()
        .filter_map(|quote| expiry_cause(quote, bundle, now).map(|cause| (quote.id.clone(), cause)))
        .collect();

    let mut outcome = SweepOutcome {
        request_id: bundle.request.id.clone(),
        expired: Vec::new(),
        failures: Vec::new(),
        changes: ChangeSet::default(),
    };

    for (quote_id, cause) in candidates {
        let transition = Transition::expire(&quote_id, now, cause.describe());
        match engine.transition_with_audit(bundle, &transition, sink, audit) {
            Ok(applied) => {
                outcome.changes.merge(applied.changes);
                outcome.expired.push((quote_id, cause));
            }
            Err(error) => outcome.failures.push(SweepFailure { quote_id, error }),
        }
    }

    outcome
}
