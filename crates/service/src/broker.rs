//! Request-level entry points over the lifecycle engine.
//!
//! Every mutating call takes the per-request lock, loads a fresh
//! [`RequestBundle`], runs the engine and commits the resulting
//! [`ChangeSet`] before the lock is released. Reads skip the lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use bidbroker_core::audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, NoopAuditSink,
};
use bidbroker_core::clock::{Clock, SystemClock};
use bidbroker_core::config::AppConfig;
use bidbroker_core::domain::actor::{Actor, ActorId};
use bidbroker_core::domain::bundle::RequestBundle;
use bidbroker_core::domain::quote::{Quote, QuoteAmendment, QuoteDraft, QuoteId, QuoteStatus};
use bidbroker_core::domain::request::{RequestStatus, ServiceRequestId};
use bidbroker_core::errors::{ApplicationError, DomainError, EntityKind};
use bidbroker_core::expiration;
use bidbroker_core::lifecycle::{ChangeSet, LifecycleEngine, Transition};
use bidbroker_core::policy::{Action, Decision, QuotePolicy, Subject};
use bidbroker_store::BrokerStore;

/// Identifies what a [`BrokerService::decide`] call is evaluated against.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubjectRef {
    Quote(QuoteId),
    Request(ServiceRequestId),
    Proposal { request_id: ServiceRequestId, draft: QuoteDraft },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionRequest {
    pub quote_id: QuoteId,
    pub target: QuoteStatus,
    pub actor_id: ActorId,
    /// Quote version the caller last saw; a mismatch fails with `StaleState`.
    pub expected_version: Option<u64>,
    pub closes_request_as: Option<RequestStatus>,
    pub reason: Option<String>,
}

impl TransitionRequest {
    pub fn new(actor_id: ActorId, quote_id: QuoteId, target: QuoteStatus) -> Self {
        Self {
            quote_id,
            target,
            actor_id,
            expected_version: None,
            closes_request_as: None,
            reason: None,
        }
    }

    pub fn expecting_version(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }

    pub fn closing_request_as(mut self, status: RequestStatus) -> Self {
        self.closes_request_as = Some(status);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[derive(Default)]
struct RequestLocks {
    locks: StdMutex<HashMap<ServiceRequestId, Arc<Mutex<()>>>>,
}

impl RequestLocks {
    fn lease(&self, id: &ServiceRequestId) -> RequestLease<'_> {
        let lock = self.registry().entry(id.clone()).or_default().clone();
        RequestLease { locks: self, id: id.clone(), lock }
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<ServiceRequestId, Arc<Mutex<()>>>> {
        match self.locks.lock() {
            Ok(locks) => locks,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.registry().len()
    }
}

/// Handle on one request's lock. The registry entry is dropped with the last lease.
struct RequestLease<'a> {
    locks: &'a RequestLocks,
    id: ServiceRequestId,
    lock: Arc<Mutex<()>>,
}

impl RequestLease<'_> {
    async fn lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.lock.lock().await
    }
}

impl Drop for RequestLease<'_> {
    fn drop(&mut self) {
        let mut registry = self.locks.registry();
        // Registry plus this lease; new leases need the registry lock to clone.
        if Arc::strong_count(&self.lock) == 2 {
            registry.remove(&self.id);
        }
    }
}

pub struct BrokerService<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    engine: LifecycleEngine,
    audit: Arc<dyn AuditSink>,
    locks: RequestLocks,
}

impl<S> BrokerService<S>
where
    S: BrokerStore,
{
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            engine: LifecycleEngine::default(),
            audit: Arc::new(NoopAuditSink),
            locks: RequestLocks::default(),
        }
    }

    pub fn from_config(store: Arc<S>, config: &AppConfig) -> Self {
        let mut service = Self::new(store);
        service.engine = LifecycleEngine::new(
            QuotePolicy::new(config.policy_settings()),
            config.lifecycle_settings(),
        );
        service
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn decide(
        &self,
        action: Action,
        actor_id: &ActorId,
        subject: SubjectRef,
    ) -> Result<Decision, ApplicationError> {
        let actor = self.load_actor(actor_id).await?;
        let now = self.clock.now();

        let decision = match &subject {
            SubjectRef::Quote(quote_id) => {
                let bundle = self.load_bundle_for_quote(quote_id).await?;
                let quote = bundle
                    .quote(quote_id)
                    .ok_or_else(|| DomainError::not_found(EntityKind::Quote, quote_id))?;
                self.engine.decide(action, &actor, Subject::Quote { quote, bundle: &bundle }, now)
            }
            SubjectRef::Request(request_id) => {
                let bundle = self.load_bundle(request_id).await?;
                self.engine.decide(action, &actor, Subject::Request(&bundle), now)
            }
            SubjectRef::Proposal { request_id, draft } => {
                let bundle = self.load_bundle(request_id).await?;
                let subject = Subject::Proposal { draft, bundle: &bundle };
                self.engine.decide(action, &actor, subject, now)
            }
        };

        debug!(
            event_name = "policy.decision.evaluated",
            actor_id = %actor.id,
            action = action.as_str(),
            allowed = decision.is_allowed(),
            "eligibility decision evaluated"
        );
        Ok(decision)
    }

    /// Authorizes and applies one transition, returning the committed entities.
    pub async fn request_transition(
        &self,
        request: TransitionRequest,
    ) -> Result<ChangeSet, ApplicationError> {
        let correlation_id = new_correlation_id();
        let actor = self.load_actor(&request.actor_id).await?;
        let request_id = self.request_id_for_quote(&request.quote_id).await?;

        let lease = self.locks.lease(&request_id);
        let _guard = lease.lock().await;

        let mut bundle = self.load_bundle(&request_id).await?;
        if let Some(expected) = request.expected_version {
            let found = bundle
                .quote(&request.quote_id)
                .map(|quote| quote.version)
                .ok_or_else(|| DomainError::not_found(EntityKind::Quote, &request.quote_id))?;
            if found != expected {
                return Err(DomainError::StaleState {
                    entity: EntityKind::Quote,
                    id: request.quote_id.to_string(),
                    expected,
                    found,
                }
                .into());
            }
        }

        let mut transition = Transition::by(&actor, &request.quote_id, request.target, self.now());
        if let Some(status) = request.closes_request_as {
            transition = transition.closing_request_as(status);
        }
        if let Some(reason) = &request.reason {
            transition = transition.with_reason(reason.clone());
        }
        let audit = AuditContext::new(
            Some(request.quote_id.clone()),
            Some(request_id.clone()),
            correlation_id.clone(),
            actor.id.0.clone(),
        );

        let applied =
            self.engine.transition_with_audit(&mut bundle, &transition, &*self.audit, &audit);
        let outcome = match applied {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(
                    event_name = "quote.transition.rejected",
                    correlation_id = %correlation_id,
                    quote_id = %request.quote_id,
                    request_id = %request_id,
                    actor_id = %actor.id,
                    target = request.target.as_str(),
                    error_code = error.code(),
                    error = %error,
                    "quote transition rejected"
                );
                return Err(error.into());
            }
        };

        let committed = match self.store.commit(&outcome.changes).await {
            Ok(committed) => committed,
            Err(error) => {
                let error = ApplicationError::from(error);
                warn!(
                    event_name = "quote.transition.commit_failed",
                    correlation_id = %correlation_id,
                    quote_id = %request.quote_id,
                    request_id = %request_id,
                    error_code = error.code(),
                    error = %error,
                    "quote transition could not be committed"
                );
                return Err(error);
            }
        };

        info!(
            event_name = "quote.transition.applied",
            correlation_id = %correlation_id,
            quote_id = %outcome.quote_id,
            request_id = %request_id,
            actor_id = %actor.id,
            from = outcome.from.as_str(),
            to = outcome.to.as_str(),
            cascaded = outcome.cascaded.len(),
            "quote transition applied"
        );
        Ok(committed)
    }

    /// Expires every pending quote that should auto-expire at `now`.
    ///
    /// A request that fails to load or commit is logged and skipped; the
    /// return value counts only quotes whose expiry was persisted.
    pub async fn sweep_expirations(&self, now: DateTime<Utc>) -> Result<usize, ApplicationError> {
        let correlation_id = new_correlation_id();
        let request_ids = self.store.list_requests_with_pending_quotes().await?;
        let scanned = request_ids.len();

        let mut expired = 0;
        for request_id in request_ids {
            match self.sweep_request(&request_id, now, &correlation_id).await {
                Ok(count) => expired += count,
                Err(error) => warn!(
                    event_name = "quote.sweep.request_failed",
                    correlation_id = %correlation_id,
                    request_id = %request_id,
                    error_code = error.code(),
                    error = %error,
                    "expiry sweep skipped request"
                ),
            }
        }

        info!(
            event_name = "quote.sweep.completed",
            correlation_id = %correlation_id,
            requests_scanned = scanned,
            quotes_expired = expired,
            "expiry sweep completed"
        );
        Ok(expired)
    }

    pub async fn submit_quote(
        &self,
        actor_id: &ActorId,
        request_id: &ServiceRequestId,
        draft: QuoteDraft,
    ) -> Result<Quote, ApplicationError> {
        let correlation_id = new_correlation_id();
        let actor = self.load_actor(actor_id).await?;

        let lease = self.locks.lease(request_id);
        let _guard = lease.lock().await;

        let bundle = self.load_bundle(request_id).await?;
        let now = self.now();
        let quote_id = QuoteId(format!("Q-{}", Uuid::new_v4()));
        let quote = match self.engine.submit(&bundle, &actor, quote_id, draft, now) {
            Ok(quote) => quote,
            Err(error) => {
                warn!(
                    event_name = "quote.submit.rejected",
                    correlation_id = %correlation_id,
                    request_id = %request_id,
                    actor_id = %actor.id,
                    error_code = error.code(),
                    error = %error,
                    "quote submission rejected"
                );
                return Err(error.into());
            }
        };

        self.store.insert_quote(quote.clone()).await?;

        let audit = AuditContext::new(
            Some(quote.id.clone()),
            Some(request_id.clone()),
            correlation_id.clone(),
            actor.id.0.clone(),
        );
        self.audit.emit(
            AuditEvent::new(
                &audit,
                "quote.submitted",
                AuditCategory::Lifecycle,
                AuditOutcome::Success,
                now,
            )
            .with_metadata("amount", quote.amount.to_string()),
        );
        info!(
            event_name = "quote.submitted",
            correlation_id = %correlation_id,
            quote_id = %quote.id,
            request_id = %request_id,
            actor_id = %actor.id,
            amount = %quote.amount,
            "quote submitted"
        );
        Ok(quote)
    }

    pub async fn amend_quote(
        &self,
        actor_id: &ActorId,
        quote_id: &QuoteId,
        amendment: QuoteAmendment,
    ) -> Result<Quote, ApplicationError> {
        let actor = self.load_actor(actor_id).await?;
        let request_id = self.request_id_for_quote(quote_id).await?;

        let lease = self.locks.lease(&request_id);
        let _guard = lease.lock().await;

        let mut bundle = self.load_bundle(&request_id).await?;
        let changes = self.engine.amend(&mut bundle, &actor, quote_id, &amendment, self.now())?;
        let committed = self.store.commit(&changes).await?;

        info!(
            event_name = "quote.amended",
            quote_id = %quote_id,
            request_id = %request_id,
            actor_id = %actor.id,
            "quote amended"
        );
        committed.quotes.into_iter().next().ok_or_else(|| {
            ApplicationError::Persistence(format!("commit returned no snapshot for `{quote_id}`"))
        })
    }

    pub async fn delete_quote(
        &self,
        actor_id: &ActorId,
        quote_id: &QuoteId,
    ) -> Result<(), ApplicationError> {
        let actor = self.load_actor(actor_id).await?;
        let request_id = self.request_id_for_quote(quote_id).await?;

        let lease = self.locks.lease(&request_id);
        let _guard = lease.lock().await;

        let bundle = self.load_bundle(&request_id).await?;
        let version = bundle
            .quote(quote_id)
            .map(|quote| quote.version)
            .ok_or_else(|| DomainError::not_found(EntityKind::Quote, quote_id))?;
        self.engine.check_delete(&bundle, &actor, quote_id, self.now())?;
        self.store.delete_quote(quote_id, version).await?;

        info!(
            event_name = "quote.deleted",
            quote_id = %quote_id,
            request_id = %request_id,
            actor_id = %actor.id,
            "quote deleted"
        );
        Ok(())
    }

    /// Stored status, reported as expired when expiry is due but not yet swept.
    pub async fn effective_status(
        &self,
        quote_id: &QuoteId,
    ) -> Result<QuoteStatus, ApplicationError> {
        let bundle = self.load_bundle_for_quote(quote_id).await?;
        let quote = bundle
            .quote(quote_id)
            .ok_or_else(|| DomainError::not_found(EntityKind::Quote, quote_id))?;
        Ok(expiration::effective_status(quote, &bundle, self.now()))
    }

    async fn sweep_request(
        &self,
        request_id: &ServiceRequestId,
        now: DateTime<Utc>,
        correlation_id: &str,
    ) -> Result<usize, ApplicationError> {
        let lease = self.locks.lease(request_id);
        let _guard = lease.lock().await;

        let mut bundle = self.load_bundle(request_id).await?;
        let audit = AuditContext::new(None, Some(request_id.clone()), correlation_id, "system");
        let outcome = expiration::sweep_bundle_with_audit(
            &self.engine,
            &mut bundle,
            now,
            &*self.audit,
            &audit,
        );

        for failure in &outcome.failures {
            warn!(
                event_name = "quote.sweep.quote_failed",
                correlation_id = %correlation_id,
                quote_id = %failure.quote_id,
                request_id = %request_id,
                error_code = failure.error.code(),
                error = %failure.error,
                "quote could not be expired"
            );
        }
        if outcome.changes.is_empty() {
            return Ok(0);
        }

        self.store.commit(&outcome.changes).await?;
        for (quote_id, cause) in &outcome.expired {
            debug!(
                event_name = "quote.expired",
                correlation_id = %correlation_id,
                quote_id = %quote_id,
                request_id = %request_id,
                cause = cause.describe(),
                "quote expired"
            );
        }
        Ok(outcome.expired_count())
    }

    async fn load_actor(&self, id: &ActorId) -> Result<Actor, ApplicationError> {
        self.store
            .find_actor(id)
            .await?
            .ok_or_else(|| DomainError::not_found(EntityKind::Actor, id).into())
    }

    async fn load_bundle(&self, id: &ServiceRequestId) -> Result<RequestBundle, ApplicationError> {
        let request = self
            .store
            .find_request(id)
            .await?
            .ok_or_else(|| DomainError::not_found(EntityKind::Request, id))?;
        let quotes = self.store.list_quotes_for_request(id).await?;
        Ok(RequestBundle::new(request, quotes))
    }

    async fn request_id_for_quote(
        &self,
        quote_id: &QuoteId,
    ) -> Result<ServiceRequestId, ApplicationError> {
        self.store
            .find_quote(quote_id)
            .await?
            .map(|quote| quote.request_id)
            .ok_or_else(|| DomainError::not_found(EntityKind::Quote, quote_id).into())
    }

    async fn load_bundle_for_quote(
        &self,
        quote_id: &QuoteId,
    ) -> Result<RequestBundle, ApplicationError> {
        let request_id = self.request_id_for_quote(quote_id).await?;
        self.load_bundle(&request_id).await
    }
}

fn new_correlation_id() -> String {
    Uuid::new_v4().to_string()
}
