use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;

use bidbroker_core::audit::InMemoryAuditSink;
use bidbroker_core::clock::FixedClock;
use bidbroker_core::domain::actor::{Actor, ActorId};
use bidbroker_core::domain::quote::{Quote, QuoteAmendment, QuoteDraft, QuoteId, QuoteStatus};
use bidbroker_core::domain::request::{RequestStatus, ServiceRequest, ServiceRequestId};
use bidbroker_core::errors::{ApplicationError, DomainError, EntityKind, InterfaceError};
use bidbroker_core::lifecycle::ChangeSet;
use bidbroker_core::policy::{Action, Decision, DenialReason};
use bidbroker_service::{BrokerService, SubjectRef, SweepScheduler, TransitionRequest};
use bidbroker_store::{
    ActorRepository, ChangeCommitter, InMemoryBrokerStore, QuoteRepository, RepositoryError,
    RequestRepository,
};

const CLIENT: &str = "client-1";

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 30, 0).single().expect("valid instant")
}

fn actor_id(id: &str) -> ActorId {
    ActorId(id.to_owned())
}

fn request(id: &str) -> ServiceRequest {
    ServiceRequest {
        id: ServiceRequestId(id.to_owned()),
        client_id: actor_id(CLIENT),
        status: RequestStatus::Open,
        category: Some("plumbing".to_owned()),
        budget: Some(Decimal::ONE_HUNDRED),
        expires_at: None,
        created_at: start(),
        version: 0,
    }
}

async fn seed<S>(store: &S, request_ids: &[&str])
where
    S: ActorRepository + RequestRepository,
{
    store.save_actor(Actor::client(CLIENT)).await.expect("seed client");
    store.save_actor(Actor::client("client-2")).await.expect("seed second client");
    for provider in ["prov-1", "prov-2", "prov-3"] {
        store.save_actor(Actor::provider(provider, &["plumbing"])).await.expect("seed provider");
    }
    for id in request_ids {
        store.save_request(request(id)).await.expect("seed request");
    }
}

struct Harness {
    service: Arc<BrokerService<InMemoryBrokerStore>>,
    store: Arc<InMemoryBrokerStore>,
    clock: FixedClock,
    audit: InMemoryAuditSink,
}

async fn harness() -> Harness {
    let store = Arc::new(InMemoryBrokerStore::default());
    seed(store.as_ref(), &["REQ-1"]).await;
    let clock = FixedClock::new(start());
    let audit = InMemoryAuditSink::default();
    let service = BrokerService::new(store.clone())
        .with_clock(Arc::new(clock.clone()))
        .with_audit_sink(Arc::new(audit.clone()));
    Harness { service: Arc::new(service), store, clock, audit }
}

fn req_id(id: &str) -> ServiceRequestId {
    ServiceRequestId(id.to_owned())
}

async fn submit(harness: &Harness, provider: &str, request_id: &str, amount: i64) -> Quote {
    harness
        .service
        .submit_quote(
            &actor_id(provider),
            &req_id(request_id),
            QuoteDraft::new(Decimal::new(amount, 0)),
        )
        .await
        .expect("submit quote")
}

async fn stored_quote(store: &InMemoryBrokerStore, id: &QuoteId) -> Quote {
    store.find_quote(id).await.expect("find quote").expect("quote exists")
}

async fn cancel(store: &InMemoryBrokerStore, request_id: &str) {
    let mut cancelled = store
        .find_request(&req_id(request_id))
        .await
        .expect("find request")
        .expect("request exists");
    cancelled.status = RequestStatus::Cancelled;
    store.save_request(cancelled).await.expect("cancel request");
}

#[tokio::test]
async fn budget_capped_bidding_then_acceptance_cascades() {
    let harness = harness().await;

    let first = submit(&harness, "prov-1", "REQ-1", 120).await;
    let over_cap = harness
        .service
        .submit_quote(
            &actor_id("prov-2"),
            &req_id("REQ-1"),
            QuoteDraft::new(Decimal::new(200, 0)),
        )
        .await
        .expect_err("200 exceeds 1.5x budget");
    assert!(matches!(
        over_cap,
        ApplicationError::Domain(DomainError::PolicyDenied {
            action: Action::Create,
            reason: DenialReason::BudgetExceeded { .. },
        })
    ));
    let third = submit(&harness, "prov-3", "REQ-1", 95).await;

    let committed = harness
        .service
        .request_transition(TransitionRequest::new(
            actor_id(CLIENT),
            first.id.clone(),
            QuoteStatus::Accepted,
        ))
        .await
        .expect("client accepts first quote");

    assert_eq!(committed.quotes.len(), 2);
    assert_eq!(
        committed.request.as_ref().map(|request| request.status),
        Some(RequestStatus::InNegotiation)
    );
    assert_eq!(stored_quote(&harness.store, &first.id).await.status, QuoteStatus::Accepted);
    let sibling = stored_quote(&harness.store, &third.id).await;
    assert_eq!(sibling.status, QuoteStatus::Rejected);
    assert_eq!(sibling.rejected_at, Some(start()));
    assert_eq!(sibling.version, 1);

    let request = harness.store.find_request(&req_id("REQ-1")).await.expect("find request");
    assert_eq!(request.map(|request| request.status), Some(RequestStatus::InNegotiation));
}

#[tokio::test]
async fn one_quote_per_provider_per_request() {
    let harness = harness().await;
    let quote = submit(&harness, "prov-1", "REQ-1", 90).await;
    harness
        .service
        .request_transition(TransitionRequest::new(
            actor_id("prov-1"),
            quote.id.clone(),
            QuoteStatus::Withdrawn,
        ))
        .await
        .expect("withdraw");

    let again = harness
        .service
        .submit_quote(
            &actor_id("prov-1"),
            &req_id("REQ-1"),
            QuoteDraft::new(Decimal::new(80, 0)),
        )
        .await
        .expect_err("withdrawn quote still counts");
    assert!(matches!(
        again,
        ApplicationError::Domain(DomainError::PolicyDenied {
            reason: DenialReason::AlreadyQuoted,
            ..
        })
    ));
}

#[tokio::test]
async fn elapsed_quote_cannot_be_accepted_and_is_swept() {
    let harness = harness().await;
    let quote = harness
        .service
        .submit_quote(
            &actor_id("prov-1"),
            &req_id("REQ-1"),
            QuoteDraft::new(Decimal::new(90, 0)).valid_until(start() + Duration::hours(1)),
        )
        .await
        .expect("submit quote");
    harness.clock.advance(Duration::hours(1) + Duration::seconds(1));

    let error = harness
        .service
        .request_transition(TransitionRequest::new(
            actor_id(CLIENT),
            quote.id.clone(),
            QuoteStatus::Accepted,
        ))
        .await
        .expect_err("expired quote");
    assert!(error.to_string().contains("quote expired"));
    assert!(matches!(error.clone().into_interface("req-1"), InterfaceError::Forbidden { .. }));

    assert_eq!(
        harness.service.effective_status(&quote.id).await.expect("status"),
        QuoteStatus::Expired
    );
    assert_eq!(stored_quote(&harness.store, &quote.id).await.status, QuoteStatus::Pending);

    let expired = harness.service.sweep_expirations(harness.service.now()).await.expect("sweep");
    assert_eq!(expired, 1);
    let swept = stored_quote(&harness.store, &quote.id).await;
    assert_eq!(swept.status, QuoteStatus::Expired);
    assert_eq!(swept.expired_at, Some(start() + Duration::hours(1) + Duration::seconds(1)));
}

#[tokio::test]
async fn cancelled_request_expires_every_pending_quote() {
    let harness = harness().await;
    let quotes = [
        submit(&harness, "prov-1", "REQ-1", 90).await,
        submit(&harness, "prov-2", "REQ-1", 95).await,
        submit(&harness, "prov-3", "REQ-1", 99).await,
    ];
    cancel(&harness.store, "REQ-1").await;

    let expired = harness.service.sweep_expirations(harness.service.now()).await.expect("sweep");

    assert_eq!(expired, 3);
    for quote in &quotes {
        assert_eq!(stored_quote(&harness.store, &quote.id).await.status, QuoteStatus::Expired);
    }
    assert_eq!(harness.service.sweep_expirations(harness.service.now()).await.expect("sweep"), 0);
}

#[tokio::test]
async fn concurrent_accepts_leave_exactly_one_winner() {
    let harness = harness().await;
    let first = submit(&harness, "prov-1", "REQ-1", 90).await;
    let second = submit(&harness, "prov-2", "REQ-1", 95).await;

    let accept = |quote_id: QuoteId| {
        let service = harness.service.clone();
        tokio::spawn(async move {
            service
                .request_transition(TransitionRequest::new(
                    actor_id(CLIENT),
                    quote_id,
                    QuoteStatus::Accepted,
                ))
                .await
        })
    };
    let (left, right) = tokio::join!(accept(first.id.clone()), accept(second.id.clone()));
    let results = [left.expect("task joined"), right.expect("task joined")];

    assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
    let loser = results.iter().find_map(|result| result.as_ref().err()).expect("one failure");
    assert!(matches!(loser.clone().into_interface("race"), InterfaceError::Conflict { .. }));

    let mut accepted = 0;
    for quote in harness
        .store
        .list_quotes_for_request(&req_id("REQ-1"))
        .await
        .expect("list quotes")
    {
        if quote.status == QuoteStatus::Accepted {
            accepted += 1;
        }
    }
    assert_eq!(accepted, 1);
}

/// One pending quote on REQ-1, with the clock moved past the request's own expiry.
async fn lapsed_request_with_quote(harness: &Harness) -> Quote {
    let mut lapsing = request("REQ-1");
    lapsing.expires_at = Some(start() + Duration::hours(1));
    harness.store.save_request(lapsing).await.expect("set request expiry");
    let quote = submit(harness, "prov-1", "REQ-1", 90).await;
    harness.clock.advance(Duration::hours(1) + Duration::seconds(1));
    quote
}

fn accept_request(quote_id: &QuoteId) -> TransitionRequest {
    TransitionRequest::new(actor_id(CLIENT), quote_id.clone(), QuoteStatus::Accepted)
}

#[tokio::test]
async fn accept_committed_before_sweep_wins() {
    let harness = harness().await;
    let quote = lapsed_request_with_quote(&harness).await;

    harness.service.request_transition(accept_request(&quote.id)).await.expect("accept first");
    let swept = harness.service.sweep_expirations(harness.service.now()).await.expect("sweep");

    assert_eq!(swept, 0);
    let stored = stored_quote(&harness.store, &quote.id).await;
    assert_eq!(stored.status, QuoteStatus::Accepted);
    assert_eq!(stored.expired_at, None);
    assert_eq!(stored.version, 1);
}

#[tokio::test]
async fn sweep_committed_before_accept_wins() {
    let harness = harness().await;
    let quote = lapsed_request_with_quote(&harness).await;

    let swept = harness.service.sweep_expirations(harness.service.now()).await.expect("sweep");
    let error = harness
        .service
        .request_transition(accept_request(&quote.id))
        .await
        .expect_err("expired quote cannot be accepted");

    assert_eq!(swept, 1);
    assert!(matches!(
        error,
        ApplicationError::Domain(DomainError::InvalidTransition {
            from: QuoteStatus::Expired,
            to: QuoteStatus::Accepted,
        })
    ));
    assert!(matches!(error.into_interface("race"), InterfaceError::Conflict { .. }));
    let stored = stored_quote(&harness.store, &quote.id).await;
    assert_eq!(stored.status, QuoteStatus::Expired);
    assert_eq!(stored.accepted_at, None);
    assert_eq!(stored.version, 1);
}

#[tokio::test]
async fn racing_accept_and_sweep_commit_exactly_one_outcome() {
    let harness = harness().await;
    let quote = lapsed_request_with_quote(&harness).await;

    let accept = {
        let service = harness.service.clone();
        let request = accept_request(&quote.id);
        tokio::spawn(async move { service.request_transition(request).await })
    };
    let sweep = {
        let service = harness.service.clone();
        tokio::spawn(async move { service.sweep_expirations(service.now()).await })
    };
    let (accepted, swept) = tokio::join!(accept, sweep);
    let accepted = accepted.expect("accept task joined");
    let swept = swept.expect("sweep task joined").expect("sweep runs");

    let stored = stored_quote(&harness.store, &quote.id).await;
    assert_eq!(stored.version, 1, "only one commit touched the quote");
    match accepted {
        Ok(_) => {
            assert_eq!(swept, 0);
            assert_eq!(stored.status, QuoteStatus::Accepted);
        }
        Err(error) => {
            assert_eq!(swept, 1);
            assert!(matches!(error.into_interface("race"), InterfaceError::Conflict { .. }));
            assert_eq!(stored.status, QuoteStatus::Expired);
        }
    }
}

#[tokio::test]
async fn stale_expected_version_is_refused() {
    let harness = harness().await;
    let quote = submit(&harness, "prov-1", "REQ-1", 90).await;
    let amended = harness
        .service
        .amend_quote(
            &actor_id("prov-1"),
            &quote.id,
            QuoteAmendment { amount: Some(Decimal::new(85, 0)), valid_until: None },
        )
        .await
        .expect("amend");
    assert_eq!(amended.version, 1);
    assert_eq!(amended.amount, Decimal::new(85, 0));

    let error = harness
        .service
        .request_transition(
            TransitionRequest::new(actor_id(CLIENT), quote.id.clone(), QuoteStatus::Rejected)
                .expecting_version(0),
        )
        .await
        .expect_err("client saw version 0");
    assert!(error.is_stale());
    assert_eq!(
        error,
        ApplicationError::Domain(DomainError::StaleState {
            entity: EntityKind::Quote,
            id: quote.id.to_string(),
            expected: 0,
            found: 1,
        })
    );

    harness
        .service
        .request_transition(
            TransitionRequest::new(actor_id(CLIENT), quote.id.clone(), QuoteStatus::Rejected)
                .expecting_version(1)
                .with_reason("too slow"),
        )
        .await
        .expect("fresh version");
    let rejected = stored_quote(&harness.store, &quote.id).await;
    assert_eq!(rejected.status, QuoteStatus::Rejected);
    assert_eq!(rejected.status_reason.as_deref(), Some("too slow"));
}

#[tokio::test]
async fn decide_reports_allow_deny_and_not_applicable() {
    let harness = harness().await;
    let quote = submit(&harness, "prov-1", "REQ-1", 90).await;

    let owner = harness
        .service
        .decide(Action::Accept, &actor_id(CLIENT), SubjectRef::Quote(quote.id.clone()))
        .await
        .expect("decide");
    assert_eq!(owner, Decision::Allow);

    let stranger = harness
        .service
        .decide(Action::Accept, &actor_id("client-2"), SubjectRef::Quote(quote.id.clone()))
        .await
        .expect("decide");
    assert_eq!(stranger, Decision::Deny { reason: DenialReason::NotOwner });

    let misapplied = harness
        .service
        .decide(Action::Compare, &actor_id(CLIENT), SubjectRef::Quote(quote.id.clone()))
        .await
        .expect("decide");
    assert_eq!(misapplied, Decision::NotApplicable);

    let compare = harness
        .service
        .decide(Action::Compare, &actor_id(CLIENT), SubjectRef::Request(req_id("REQ-1")))
        .await
        .expect("decide");
    assert_eq!(compare, Decision::Deny { reason: DenialReason::NotEnoughQuotes });

    let proposal = harness
        .service
        .decide(
            Action::Create,
            &actor_id("prov-2"),
            SubjectRef::Proposal {
                request_id: req_id("REQ-1"),
                draft: QuoteDraft::new(Decimal::new(151, 0)),
            },
        )
        .await
        .expect("decide");
    assert!(matches!(
        proposal,
        Decision::Deny { reason: DenialReason::BudgetExceeded { .. } }
    ));

    let unknown = harness
        .service
        .decide(Action::View, &actor_id("ghost"), SubjectRef::Quote(quote.id))
        .await
        .expect_err("unknown actor");
    assert!(matches!(
        unknown,
        ApplicationError::Domain(DomainError::NotFound { entity: EntityKind::Actor, .. })
    ));
}

#[tokio::test]
async fn delete_follows_ownership_and_status_rules() {
    let harness = harness().await;
    let quote = submit(&harness, "prov-1", "REQ-1", 90).await;

    let denied = harness
        .service
        .delete_quote(&actor_id("prov-2"), &quote.id)
        .await
        .expect_err("not the owner");
    assert!(matches!(
        denied,
        ApplicationError::Domain(DomainError::PolicyDenied { action: Action::Delete, .. })
    ));

    harness.service.delete_quote(&actor_id("prov-1"), &quote.id).await.expect("owner deletes");
    assert_eq!(harness.store.find_quote(&quote.id).await.expect("find quote"), None);

    let missing = harness
        .service
        .effective_status(&quote.id)
        .await
        .expect_err("deleted quote");
    assert!(matches!(missing.into_interface("req-9"), InterfaceError::NotFound { .. }));
}

#[tokio::test]
async fn audit_trail_covers_submission_and_cascade() {
    let harness = harness().await;
    let first = submit(&harness, "prov-1", "REQ-1", 90).await;
    submit(&harness, "prov-2", "REQ-1", 95).await;

    harness
        .service
        .request_transition(TransitionRequest::new(
            actor_id(CLIENT),
            first.id.clone(),
            QuoteStatus::Accepted,
        ))
        .await
        .expect("accept");

    let kinds: Vec<String> =
        harness.audit.events().into_iter().map(|event| event.event_type).collect();
    assert_eq!(
        kinds,
        vec![
            "quote.submitted",
            "quote.submitted",
            "quote.transition_applied",
            "quote.cascade_rejected",
        ]
    );
}

/// Delegates to the in-memory store but refuses commits touching one request.
struct FlakyStore {
    inner: InMemoryBrokerStore,
    failing_request: ServiceRequestId,
}

#[async_trait]
impl ActorRepository for FlakyStore {
    async fn find_actor(&self, id: &ActorId) -> Result<Option<Actor>, RepositoryError> {
        self.inner.find_actor(id).await
    }

    async fn save_actor(&self, actor: Actor) -> Result<(), RepositoryError> {
        self.inner.save_actor(actor).await
    }
}

#[async_trait]
impl RequestRepository for FlakyStore {
    async fn find_request(
        &self,
        id: &ServiceRequestId,
    ) -> Result<Option<ServiceRequest>, RepositoryError> {
        self.inner.find_request(id).await
    }

    async fn save_request(&self, request: ServiceRequest) -> Result<(), RepositoryError> {
        self.inner.save_request(request).await
    }

    async fn list_requests_with_pending_quotes(
        &self,
    ) -> Result<Vec<ServiceRequestId>, RepositoryError> {
        self.inner.list_requests_with_pending_quotes().await
    }
}

#[async_trait]
impl QuoteRepository for FlakyStore {
    async fn find_quote(&self, id: &QuoteId) -> Result<Option<Quote>, RepositoryError> {
        self.inner.find_quote(id).await
    }

    async fn list_quotes_for_request(
        &self,
        request_id: &ServiceRequestId,
    ) -> Result<Vec<Quote>, RepositoryError> {
        self.inner.list_quotes_for_request(request_id).await
    }

    async fn insert_quote(&self, quote: Quote) -> Result<(), RepositoryError> {
        self.inner.insert_quote(quote).await
    }

    async fn delete_quote(
        &self,
        id: &QuoteId,
        expected_version: u64,
    ) -> Result<(), RepositoryError> {
        self.inner.delete_quote(id, expected_version).await
    }
}

#[async_trait]
impl ChangeCommitter for FlakyStore {
    async fn commit(&self, changes: &ChangeSet) -> Result<ChangeSet, RepositoryError> {
        if changes.quotes.iter().any(|quote| quote.request_id == self.failing_request) {
            return Err(RepositoryError::Unavailable("disk full".to_owned()));
        }
        self.inner.commit(changes).await
    }
}

#[tokio::test]
async fn sweep_continues_past_a_failing_request() {
    let store = Arc::new(FlakyStore {
        inner: InMemoryBrokerStore::default(),
        failing_request: req_id("REQ-1"),
    });
    seed(store.as_ref(), &["REQ-1", "REQ-2"]).await;
    let service = BrokerService::new(store.clone()).with_clock(Arc::new(FixedClock::new(start())));

    let mut ids = Vec::new();
    for (provider, request_id) in [("prov-1", "REQ-1"), ("prov-2", "REQ-2"), ("prov-3", "REQ-2")] {
        let quote = service
            .submit_quote(&actor_id(provider), &req_id(request_id), QuoteDraft::new(Decimal::TEN))
            .await
            .expect("submit quote");
        ids.push(quote.id);
    }
    cancel(&store.inner, "REQ-1").await;
    cancel(&store.inner, "REQ-2").await;

    let expired = service.sweep_expirations(start()).await.expect("sweep keeps going");

    assert_eq!(expired, 2);
    assert_eq!(stored_quote(&store.inner, &ids[0]).await.status, QuoteStatus::Pending);
    assert_eq!(stored_quote(&store.inner, &ids[1]).await.status, QuoteStatus::Expired);
    assert_eq!(stored_quote(&store.inner, &ids[2]).await.status, QuoteStatus::Expired);
}

#[tokio::test]
async fn failed_commit_surfaces_as_service_unavailable() {
    let store = Arc::new(FlakyStore {
        inner: InMemoryBrokerStore::default(),
        failing_request: req_id("REQ-1"),
    });
    seed(store.as_ref(), &["REQ-1"]).await;
    let service = BrokerService::new(store.clone()).with_clock(Arc::new(FixedClock::new(start())));
    let quote = service
        .submit_quote(&actor_id("prov-1"), &req_id("REQ-1"), QuoteDraft::new(Decimal::TEN))
        .await
        .expect("insert is not a commit");

    let error = service
        .request_transition(TransitionRequest::new(
            actor_id(CLIENT),
            quote.id.clone(),
            QuoteStatus::Accepted,
        ))
        .await
        .expect_err("commit fails");

    assert_eq!(error, ApplicationError::Persistence("disk full".to_owned()));
    assert!(matches!(
        error.into_interface("req-7"),
        InterfaceError::ServiceUnavailable { .. }
    ));
    assert_eq!(stored_quote(&store.inner, &quote.id).await.status, QuoteStatus::Pending);
}

#[tokio::test(start_paused = true)]
async fn scheduler_sweeps_on_its_interval_until_shut_down() {
    let harness = harness().await;
    let quote = submit(&harness, "prov-1", "REQ-1", 90).await;
    cancel(&harness.store, "REQ-1").await;

    let scheduler = SweepScheduler::spawn(harness.service.clone(), StdDuration::from_secs(60));
    tokio::time::sleep(StdDuration::from_secs(1)).await;

    assert_eq!(stored_quote(&harness.store, &quote.id).await.status, QuoteStatus::Expired);
    scheduler.shutdown().await;
}
