use chrono::{DateTime, Utc};

use crate::domain::actor::{Actor, Capability};
use crate::domain::bundle::RequestBundle;
use crate::domain::quote::{Quote, QuoteDraft, QuoteStatus};

use super::{Action, DenialReason, PolicySettings, Subject};

type RuleResult = Result<(), DenialReason>;

pub(super) fn evaluate(
    settings: &PolicySettings,
    action: Action,
    actor: &Actor,
    subject: Subject<'_>,
    now: DateTime<Utc>,
) -> RuleResult {
    match (action, subject) {
        (Action::View, Subject::Quote { quote, bundle }) => view(actor, quote, bundle),
        (Action::Create, Subject::Request(bundle)) => create(actor, bundle, now),
        (Action::Create, Subject::Proposal { draft, bundle }) => {
            create(actor, bundle, now)?;
            within_budget(settings, draft, bundle)
        }
        (Action::Edit, Subject::Quote { quote, bundle }) => edit(actor, quote, bundle, now),
        (Action::Delete, Subject::Quote { quote, .. }) => delete(actor, quote),
        (Action::Accept, Subject::Quote { quote, bundle }) => accept(actor, quote, bundle, now),
        (Action::Reject, Subject::Quote { quote, bundle }) => reject(actor, quote, bundle, now),
        (Action::Withdraw, Subject::Quote { quote, .. }) => withdraw(actor, quote, now),
        (Action::ViewList, Subject::Request(bundle)) => view_list(actor, bundle),
        (Action::Compare, Subject::Request(bundle)) => compare(actor, bundle),
        (Action::Negotiate, Subject::Quote { quote, bundle }) => {
            negotiate(actor, quote, bundle, now)
        }
        // Applicability is checked before dispatch.
        _ => Err(DenialReason::RoleNotPermitted),
    }
}

fn view(actor: &Actor, quote: &Quote, bundle: &RequestBundle) -> RuleResult {
    if quote.is_submitted_by(&actor.id) || bundle.request.is_owned_by(&actor.id) {
        return Ok(());
    }
    Err(DenialReason::NotOwner)
}

fn create(actor: &Actor, bundle: &RequestBundle, now: DateTime<Utc>) -> RuleResult {
    if !actor.has_capability(Capability::SubmitQuotes) {
        return Err(DenialReason::RoleNotPermitted);
    }
    if !actor.active {
        return Err(DenialReason::ActorInactive);
    }
    if !actor.approved {
        return Err(DenialReason::ActorNotApproved);
    }
    if !bundle.request.is_open() {
        return Err(DenialReason::RequestNotOpen);
    }
    if bundle.has_quote_from(&actor.id) {
        return Err(DenialReason::AlreadyQuoted);
    }
    if let Some(category) = bundle.request.category.as_deref() {
        if !actor.offers_category(category) {
            return Err(DenialReason::CategoryMismatch);
        }
    }
    if bundle.request.is_expired_at(now) {
        return Err(DenialReason::RequestExpired);
    }
    Ok(())
}

fn within_budget(
    settings: &PolicySettings,
    draft: &QuoteDraft,
    bundle: &RequestBundle,
) -> RuleResult {
    let Some(budget) = bundle.request.budget else {
        return Ok(());
    };
    let cap = budget * settings.budget_tolerance;
    if draft.amount > cap {
        return Err(DenialReason::BudgetExceeded { amount: draft.amount, cap });
    }
    Ok(())
}

fn edit(actor: &Actor, quote: &Quote, bundle: &RequestBundle, now: DateTime<Utc>) -> RuleResult {
    require_quote_owner(actor, quote)?;
    require_pending(quote)?;
    require_not_expired(quote, now)?;
    require_request_open(bundle)
}

fn delete(actor: &Actor, quote: &Quote) -> RuleResult {
    require_quote_owner(actor, quote)?;
    if !matches!(quote.status, QuoteStatus::Pending | QuoteStatus::Rejected | QuoteStatus::Expired)
    {
        return Err(DenialReason::QuoteNotDeletable);
    }
    if quote.booking_id.is_some() {
        return Err(DenialReason::HasBooking);
    }
    Ok(())
}

fn accept(actor: &Actor, quote: &Quote, bundle: &RequestBundle, now: DateTime<Utc>) -> RuleResult {
    require_request_owner(actor, bundle)?;
    require_pending(quote)?;
    require_not_expired(quote, now)?;
    require_request_open(bundle)?;
    if bundle.has_accepted_sibling(&quote.id) {
        return Err(DenialReason::SiblingAccepted);
    }
    Ok(())
}

fn reject(actor: &Actor, quote: &Quote, bundle: &RequestBundle, now: DateTime<Utc>) -> RuleResult {
    require_request_owner(actor, bundle)?;
    require_pending(quote)?;
    require_not_expired(quote, now)?;
    require_request_open(bundle)
}

fn withdraw(actor: &Actor, quote: &Quote, now: DateTime<Utc>) -> RuleResult {
    require_quote_owner(actor, quote)?;
    require_pending(quote)?;
    require_not_expired(quote, now)
}

fn view_list(actor: &Actor, bundle: &RequestBundle) -> RuleResult {
    if bundle.request.is_owned_by(&actor.id) {
        return Ok(());
    }
    if actor.has_capability(Capability::SubmitQuotes) && bundle.has_quote_from(&actor.id) {
        return Ok(());
    }
    Err(DenialReason::NotOwner)
}

fn compare(actor: &Actor, bundle: &RequestBundle) -> RuleResult {
    require_request_owner(actor, bundle)?;
    if bundle.quotes.len() < 2 {
        return Err(DenialReason::NotEnoughQuotes);
    }
    Ok(())
}

fn negotiate(
    actor: &Actor,
    quote: &Quote,
    bundle: &RequestBundle,
    now: DateTime<Utc>,
) -> RuleResult {
    if require_request_owner(actor, bundle).is_ok() {
        require_request_open(bundle)?;
        require_pending(quote)?;
        return require_not_expired(quote, now);
    }
    require_quote_owner(actor, quote)?;
    require_pending(quote)
}

fn require_request_owner(actor: &Actor, bundle: &RequestBundle) -> RuleResult {
    if !actor.has_capability(Capability::ReviewQuotes) {
        return Err(DenialReason::RoleNotPermitted);
    }
    if !bundle.request.is_owned_by(&actor.id) {
        return Err(DenialReason::NotOwner);
    }
    Ok(())
}

fn require_quote_owner(actor: &Actor, quote: &Quote) -> RuleResult {
    if !actor.has_capability(Capability::ManageOwnQuotes) {
        return Err(DenialReason::RoleNotPermitted);
    }
    if !quote.is_submitted_by(&actor.id) {
        return Err(DenialReason::NotOwner);
    }
    Ok(())
}

fn require_pending(quote: &Quote) -> RuleResult {
    if !quote.is_pending() {
        return Err(DenialReason::QuoteNotPending);
    }
    Ok(())
}

fn require_not_expired(quote: &Quote, now: DateTime<Utc>) -> RuleResult {
    if quote.is_expired_at(now) {
        return Err(DenialReason::QuoteExpired);
    }
    Ok(())
}

fn require_request_open(bundle: &RequestBundle) -> RuleResult {
    if !bundle.request.is_open() {
        return Err(DenialReason::RequestNotOpen);
    }
    Ok(())
}
