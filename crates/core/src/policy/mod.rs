//! Eligibility policy: who may do what to a quote or request right now.
//!
//! Evaluation is pure. Callers pass the actor, the action and a [`Subject`]
//! snapshot and get back a [`Decision`]. Nothing here mutates state; the
//! lifecycle engine re-runs the same checks before it applies a transition.

mod rules;

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::actor::{Actor, Capability};
use crate::domain::bundle::RequestBundle;
use crate::domain::quote::{Quote, QuoteDraft};
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    View,
    Create,
    Edit,
    Delete,
    Accept,
    Reject,
    Withdraw,
    ViewList,
    Compare,
    Negotiate,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Create => "create",
            Self::Edit => "edit",
            Self::Delete => "delete",
            Self::Accept => "accept",
            Self::Reject => "reject",
            Self::Withdraw => "withdraw",
            Self::ViewList => "view_list",
            Self::Compare => "compare",
            Self::Negotiate => "negotiate",
        }
    }

    fn applies_to(self, subject: SubjectKind) -> bool {
        match self {
            Self::View
            | Self::Edit
            | Self::Delete
            | Self::Accept
            | Self::Reject
            | Self::Withdraw
            | Self::Negotiate => subject == SubjectKind::Quote,
            Self::ViewList | Self::Compare => subject == SubjectKind::Request,
            Self::Create => matches!(subject, SubjectKind::Request | SubjectKind::Proposal),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    Quote,
    Request,
    Proposal,
}

impl fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Quote => "quote",
            Self::Request => "request",
            Self::Proposal => "proposal",
        })
    }
}

/// What an action is evaluated against. Every variant carries the full request
/// bundle because several rules look at competing quotes.
#[derive(Clone, Copy, Debug)]
pub enum Subject<'a> {
    Quote { quote: &'a Quote, bundle: &'a RequestBundle },
    Request(&'a RequestBundle),
    Proposal { draft: &'a QuoteDraft, bundle: &'a RequestBundle },
}

impl Subject<'_> {
    pub fn kind(&self) -> SubjectKind {
        match self {
            Self::Quote { .. } => SubjectKind::Quote,
            Self::Request(_) => SubjectKind::Request,
            Self::Proposal { .. } => SubjectKind::Proposal,
        }
    }

    pub fn bundle(&self) -> &RequestBundle {
        match self {
            Self::Quote { bundle, .. } | Self::Request(bundle) | Self::Proposal { bundle, .. } => {
                bundle
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum DenialReason {
    NotOwner,
    RoleNotPermitted,
    ActorInactive,
    ActorNotApproved,
    RequestNotOpen,
    RequestExpired,
    AlreadyQuoted,
    CategoryMismatch,
    BudgetExceeded { amount: Decimal, cap: Decimal },
    QuoteNotPending,
    QuoteExpired,
    QuoteNotDeletable,
    HasBooking,
    SiblingAccepted,
    NotEnoughQuotes,
}

impl DenialReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotOwner => "not_owner",
            Self::RoleNotPermitted => "role_not_permitted",
            Self::ActorInactive => "actor_inactive",
            Self::ActorNotApproved => "actor_not_approved",
            Self::RequestNotOpen => "request_not_open",
            Self::RequestExpired => "request_expired",
            Self::AlreadyQuoted => "already_quoted",
            Self::CategoryMismatch => "category_mismatch",
            Self::BudgetExceeded { .. } => "budget_exceeded",
            Self::QuoteNotPending => "quote_not_pending",
            Self::QuoteExpired => "quote_expired",
            Self::QuoteNotDeletable => "quote_not_deletable",
            Self::HasBooking => "has_booking",
            Self::SiblingAccepted => "sibling_accepted",
            Self::NotEnoughQuotes => "not_enough_quotes",
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotOwner => f.write_str("actor does not own this quote or request"),
            Self::RoleNotPermitted => f.write_str("actor role cannot perform this action"),
            Self::ActorInactive => f.write_str("provider account is inactive"),
            Self::ActorNotApproved => f.write_str("provider account is not approved"),
            Self::RequestNotOpen => f.write_str("request not open"),
            Self::RequestExpired => f.write_str("request expired"),
            Self::AlreadyQuoted => f.write_str("already quoted"),
            Self::CategoryMismatch => f.write_str("provider does not serve the request category"),
            Self::BudgetExceeded { amount, cap } => {
                write!(f, "budget exceeded: amount {amount} is above cap {cap}")
            }
            Self::QuoteNotPending => f.write_str("quote not pending"),
            Self::QuoteExpired => f.write_str("quote expired"),
            Self::QuoteNotDeletable => f.write_str("quote status does not allow deletion"),
            Self::HasBooking => f.write_str("quote already has a booking"),
            Self::SiblingAccepted => f.write_str("another quote was already accepted"),
            Self::NotEnoughQuotes => f.write_str("at least two quotes are needed to compare"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Deny { reason: DenialReason },
    NotApplicable,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    pub fn into_result(self, action: Action, subject: SubjectKind) -> Result<(), DomainError> {
        match self {
            Self::Allow => Ok(()),
            Self::Deny { reason } => Err(DomainError::PolicyDenied { action, reason }),
            Self::NotApplicable => Err(DomainError::PolicyNotApplicable { action, subject }),
        }
    }
}

impl From<Result<(), DenialReason>> for Decision {
    fn from(value: Result<(), DenialReason>) -> Self {
        match value {
            Ok(()) => Self::Allow,
            Err(reason) => Self::Deny { reason },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySettings {
    /// Highest accepted proposal as a multiple of the request budget.
    pub budget_tolerance: Decimal,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self { budget_tolerance: Decimal::new(15, 1) }
    }
}

pub trait EligibilityPolicy: Send + Sync {
    fn decide(
        &self,
        action: Action,
        actor: &Actor,
        subject: Subject<'_>,
        now: DateTime<Utc>,
    ) -> Decision;
}

#[derive(Clone, Debug, Default)]
pub struct QuotePolicy {
    settings: PolicySettings,
}

impl QuotePolicy {
    pub fn new(settings: PolicySettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &PolicySettings {
        &self.settings
    }
}

impl EligibilityPolicy for QuotePolicy {
    fn decide(
        &self,
        action: Action,
        actor: &Actor,
        subject: Subject<'_>,
        now: DateTime<Utc>,
    ) -> Decision {
        decide_with(&self.settings, action, actor, subject, now)
    }
}

/// Evaluates with default settings.
pub fn decide(action: Action, actor: &Actor, subject: Subject<'_>, now: DateTime<Utc>) -> Decision {
    decide_with(&PolicySettings::default(), action, actor, subject, now)
}

pub fn decide_with(
    settings: &PolicySettings,
    action: Action,
    actor: &Actor,
    subject: Subject<'_>,
    now: DateTime<Utc>,
) -> Decision {
    if !action.applies_to(subject.kind()) {
        return Decision::NotApplicable;
    }

    if actor.has_capability(Capability::BypassPolicy) {
        return Decision::Allow;
    }

    rules::evaluate(settings, action, actor, subject, now).into()
}
