use chrono::{DateTime, Utc};

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::actor::Actor;
use crate::domain::bundle::RequestBundle;
use crate::domain::quote::{Quote, QuoteAmendment, QuoteDraft, QuoteId, QuoteStatus};
use crate::domain::request::RequestStatus;
use crate::errors::{DomainError, EntityKind};
use crate::lifecycle::states::{
    ChangeSet, Initiator, LifecycleSettings, Transition, TransitionOutcome,
    SIBLING_ACCEPTED_REASON,
};
use crate::policy::{
    Action, DenialReason, Decision, EligibilityPolicy, QuotePolicy, Subject, SubjectKind,
};

/// Applies quote transitions to a loaded [`RequestBundle`].
///
/// The engine never trusts an earlier policy check: every actor-initiated
/// transition is re-authorized against the bundle it is about to mutate.
/// Mutations happen on the caller's bundle and are mirrored into the returned
/// [`ChangeSet`] so the caller can persist them in one commit.
pub struct LifecycleEngine<P = QuotePolicy> {
    policy: P,
    settings: LifecycleSettings,
}

impl<P> LifecycleEngine<P>
where
    P: EligibilityPolicy,
{
    pub fn new(policy: P, settings: LifecycleSettings) -> Self {
        Self { policy, settings }
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    pub fn decide(
        &self,
        action: Action,
        actor: &Actor,
        subject: Subject<'_>,
        now: DateTime<Utc>,
    ) -> Decision {
        self.policy.decide(action, actor, subject, now)
    }

    pub fn transition(
        &self,
        bundle: &mut RequestBundle,
        transition: &Transition<'_>,
    ) -> Result<TransitionOutcome, DomainError> {
        let from = {
            let quote = bundle
                .quote(transition.quote_id)
                .ok_or_else(|| DomainError::not_found(EntityKind::Quote, transition.quote_id))?;
            if !quote.can_transition_to(transition.target) {
                return Err(DomainError::InvalidTransition {
                    from: quote.status,
                    to: transition.target,
                });
            }
            self.authorize(bundle, quote, transition)?;
            quote.status
        };

        let (changes, cascaded) = match transition.target {
            QuoteStatus::Accepted => self.accept(bundle, transition)?,
            _ => (close(bundle, transition)?, Vec::new()),
        };

        Ok(TransitionOutcome {
            quote_id: transition.quote_id.clone(),
            from,
            to: transition.target,
            cascaded,
            changes,
        })
    }

    pub fn transition_with_audit<S>(
        &self,
        bundle: &mut RequestBundle,
        transition: &Transition<'_>,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, DomainError>
    where
        S: AuditSink + ?Sized,
    {
        let category = match transition.initiator {
            Initiator::System => AuditCategory::Expiration,
            Initiator::Actor(_) => AuditCategory::Lifecycle,
        };
        let result = self.transition(bundle, transition);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::new(
                        audit,
                        "quote.transition_applied",
                        category.clone(),
                        AuditOutcome::Success,
                        transition.now,
                    )
                    .for_quote(outcome.quote_id.clone())
                    .with_metadata("from", outcome.from.as_str())
                    .with_metadata("to", outcome.to.as_str())
                    .with_metadata("cascaded", outcome.cascaded.len().to_string()),
                );
                for sibling in &outcome.cascaded {
                    sink.emit(
                        AuditEvent::new(
                            audit,
                            "quote.cascade_rejected",
                            category.clone(),
                            AuditOutcome::Success,
                            transition.now,
                        )
                        .for_quote(sibling.clone())
                        .with_metadata("accepted_quote_id", outcome.quote_id.0.clone()),
                    );
                }
            }
            Err(error) => {
                let category = match error {
                    DomainError::PolicyDenied { .. } | DomainError::PolicyNotApplicable { .. } => {
                        AuditCategory::Policy
                    }
                    _ => category,
                };
                sink.emit(
                    AuditEvent::new(
                        audit,
                        "quote.transition_rejected",
                        category,
                        AuditOutcome::Rejected,
                        transition.now,
                    )
                    .for_quote(transition.quote_id.clone())
                    .with_metadata("target", transition.target.as_str())
                    .with_metadata("error_code", error.code())
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }

    /// Builds a pending quote for `actor` after the Create check, including the budget cap.
    pub fn submit(
        &self,
        bundle: &RequestBundle,
        actor: &Actor,
        quote_id: QuoteId,
        draft: QuoteDraft,
        now: DateTime<Utc>,
    ) -> Result<Quote, DomainError> {
        draft.validate(now)?;
        if bundle.quote(&quote_id).is_some() {
            return Err(DomainError::Validation(format!("quote id `{quote_id}` is already in use")));
        }

        self.policy
            .decide(Action::Create, actor, Subject::Proposal { draft: &draft, bundle }, now)
            .into_result(Action::Create, SubjectKind::Proposal)?;

        Ok(Quote::from_draft(quote_id, bundle.request.id.clone(), actor.id.clone(), draft, now))
    }

    pub fn amend(
        &self,
        bundle: &mut RequestBundle,
        actor: &Actor,
        quote_id: &QuoteId,
        amendment: &QuoteAmendment,
        now: DateTime<Utc>,
    ) -> Result<ChangeSet, DomainError> {
        amendment.validate(now)?;
        {
            let quote = bundle
                .quote(quote_id)
                .ok_or_else(|| DomainError::not_found(EntityKind::Quote, quote_id))?;
            self.policy
                .decide(Action::Edit, actor, Subject::Quote { quote, bundle }, now)
                .into_result(Action::Edit, SubjectKind::Quote)?;
            require_within_validity(Action::Edit, quote, now)?;
        }

        let quote = bundle
            .quote_mut(quote_id)
            .ok_or_else(|| DomainError::not_found(EntityKind::Quote, quote_id))?;
        quote.apply_amendment(amendment, now);
        Ok(ChangeSet { request: None, quotes: vec![quote.clone()] })
    }

    /// Delete authorization only; removing the record is the store's job.
    pub fn check_delete(
        &self,
        bundle: &RequestBundle,
        actor: &Actor,
        quote_id: &QuoteId,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let quote = bundle
            .quote(quote_id)
            .ok_or_else(|| DomainError::not_found(EntityKind::Quote, quote_id))?;
        self.policy
            .decide(Action::Delete, actor, Subject::Quote { quote, bundle }, now)
            .into_result(Action::Delete, SubjectKind::Quote)
    }

    fn authorize(
        &self,
        bundle: &RequestBundle,
        quote: &Quote,
        transition: &Transition<'_>,
    ) -> Result<(), DomainError> {
        let target = transition.target;
        match (transition.initiator, action_for(target)) {
            (Initiator::System, None) => Ok(()),
            (Initiator::System, Some(_)) => Err(DomainError::Validation(format!(
                "system transitions may only expire quotes, not mark them {target}"
            ))),
            (Initiator::Actor(_), None) => Err(DomainError::Validation(
                "quotes expire automatically and cannot be expired by an actor".to_owned(),
            )),
            (Initiator::Actor(actor), Some(action)) => {
                self.policy
                    .decide(action, actor, Subject::Quote { quote, bundle }, transition.now)
                    .into_result(action, SubjectKind::Quote)?;
                require_within_validity(action, quote, transition.now)
            }
        }
    }

    fn accept(
        &self,
        bundle: &mut RequestBundle,
        transition: &Transition<'_>,
    ) -> Result<(ChangeSet, Vec<QuoteId>), DomainError> {
        let closes_as = transition.closes_request_as.unwrap_or(self.settings.accept_request_status);
        if !matches!(closes_as, RequestStatus::InNegotiation | RequestStatus::Completed) {
            return Err(DomainError::Validation(format!(
                "accepting a quote must move the request to in_negotiation or completed, not {}",
                closes_as.as_str()
            )));
        }
        // Holds even for policy-bypassing actors.
        if bundle.has_accepted_sibling(transition.quote_id) {
            return Err(DomainError::PolicyDenied {
                action: Action::Accept,
                reason: DenialReason::SiblingAccepted,
            });
        }

        let now = transition.now;
        let mut changes = ChangeSet::default();
        let mut cascaded = Vec::new();
        for quote in &mut bundle.quotes {
            if &quote.id == transition.quote_id {
                quote.transition_to(QuoteStatus::Accepted, now)?;
                quote.status_reason = transition.reason.clone();
            } else if quote.is_pending() {
                quote.transition_to(QuoteStatus::Rejected, now)?;
                quote.status_reason = Some(SIBLING_ACCEPTED_REASON.to_owned());
                cascaded.push(quote.id.clone());
            } else {
                continue;
            }
            changes.quotes.push(quote.clone());
        }

        bundle.request.status = closes_as;
        changes.request = Some(bundle.request.clone());
        Ok((changes, cascaded))
    }
}

impl Default for LifecycleEngine<QuotePolicy> {
    fn default() -> Self {
        Self::new(QuotePolicy::default(), LifecycleSettings::default())
    }
}

fn action_for(target: QuoteStatus) -> Option<Action> {
    match target {
        QuoteStatus::Accepted => Some(Action::Accept),
        QuoteStatus::Rejected => Some(Action::Reject),
        QuoteStatus::Withdrawn => Some(Action::Withdraw),
        QuoteStatus::Pending | QuoteStatus::Expired => None,
    }
}

/// An elapsed quote may only be expired, whatever the actor's capabilities.
fn require_within_validity(
    action: Action,
    quote: &Quote,
    now: DateTime<Utc>,
) -> Result<(), DomainError> {
    if quote.is_expired_at(now) {
        return Err(DomainError::PolicyDenied { action, reason: DenialReason::QuoteExpired });
    }
    Ok(())
}

fn close(
    bundle: &mut RequestBundle,
    transition: &Transition<'_>,
) -> Result<ChangeSet, DomainError> {
    let quote = bundle
        .quote_mut(transition.quote_id)
        .ok_or_else(|| DomainError::not_found(EntityKind::Quote, transition.quote_id))?;
    quote.transition_to(transition.target, transition.now)?;
    if transition.reason.is_some() {
        quote.status_reason = transition.reason.clone();
    }
    Ok(ChangeSet { request: None, quotes: vec![quote.clone()] })
}
