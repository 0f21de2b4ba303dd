use std::collections::HashMap;

use tokio::sync::RwLock;

use bidbroker_core::domain::actor::{Actor, ActorId};
use bidbroker_core::domain::quote::{Quote, QuoteId};
use bidbroker_core::domain::request::{ServiceRequest, ServiceRequestId};
use bidbroker_core::errors::EntityKind;
use bidbroker_core::lifecycle::ChangeSet;

use super::{ActorRepository, ChangeCommitter, QuoteRepository, RepositoryError, RequestRepository};

#[derive(Default)]
struct StoreState {
    actors: HashMap<ActorId, Actor>,
    requests: HashMap<ServiceRequestId, ServiceRequest>,
    quotes: HashMap<QuoteId, Quote>,
    request_quotes: HashMap<ServiceRequestId, Vec<QuoteId>>,
}

impl StoreState {
    fn check_request(&self, request: &ServiceRequest) -> Result<(), RepositoryError> {
        let stored = self.requests.get(&request.id).ok_or_else(|| RepositoryError::Missing {
            entity: EntityKind::Request,
            id: request.id.to_string(),
        })?;
        check_version(EntityKind::Request, &request.id.0, request.version, stored.version)
    }

    fn check_quote(&self, quote: &Quote) -> Result<(), RepositoryError> {
        let stored = self.quotes.get(&quote.id).ok_or_else(|| RepositoryError::Missing {
            entity: EntityKind::Quote,
            id: quote.id.to_string(),
        })?;
        check_version(EntityKind::Quote, &quote.id.0, quote.version, stored.version)
    }
}

fn check_version(
    entity: EntityKind,
    id: &str,
    expected: u64,
    found: u64,
) -> Result<(), RepositoryError> {
    if expected == found {
        Ok(())
    } else {
        Err(RepositoryError::Conflict { entity, id: id.to_owned(), expected, found })
    }
}

/// Single-lock store: a commit observes and writes a consistent snapshot.
#[derive(Default)]
pub struct InMemoryBrokerStore {
    state: RwLock<StoreState>,
}

#[async_trait::async_trait]
impl ActorRepository for InMemoryBrokerStore {
    async fn find_actor(&self, id: &ActorId) -> Result<Option<Actor>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.actors.get(id).cloned())
    }

    async fn save_actor(&self, actor: Actor) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state.actors.insert(actor.id.clone(), actor);
        Ok(())
    }
}

#[async_trait::async_trait]
impl RequestRepository for InMemoryBrokerStore {
    async fn find_request(
        &self,
        id: &ServiceRequestId,
    ) -> Result<Option<ServiceRequest>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.requests.get(id).cloned())
    }

    async fn save_request(&self, request: ServiceRequest) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state.request_quotes.entry(request.id.clone()).or_default();
        state.requests.insert(request.id.clone(), request);
        Ok(())
    }

    async fn list_requests_with_pending_quotes(
        &self,
    ) -> Result<Vec<ServiceRequestId>, RepositoryError> {
        let state = self.state.read().await;
        let mut ids: Vec<ServiceRequestId> = state
            .request_quotes
            .iter()
            .filter(|(_, quote_ids)| {
                quote_ids
                    .iter()
                    .filter_map(|id| state.quotes.get(id))
                    .any(Quote::is_pending)
            })
            .map(|(request_id, _)| request_id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[async_trait::async_trait]
impl QuoteRepository for InMemoryBrokerStore {
    async fn find_quote(&self, id: &QuoteId) -> Result<Option<Quote>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.quotes.get(id).cloned())
    }

    async fn list_quotes_for_request(
        &self,
        request_id: &ServiceRequestId,
    ) -> Result<Vec<Quote>, RepositoryError> {
        let state = self.state.read().await;
        let quotes = state
            .request_quotes
            .get(request_id)
            .map(|ids| ids.iter().filter_map(|id| state.quotes.get(id).cloned()).collect())
            .unwrap_or_default();
        Ok(quotes)
    }

    async fn insert_quote(&self, quote: Quote) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        if state.quotes.contains_key(&quote.id) {
            return Err(RepositoryError::Duplicate {
                entity: EntityKind::Quote,
                id: quote.id.to_string(),
            });
        }
        if !state.requests.contains_key(&quote.request_id) {
            return Err(RepositoryError::Missing {
                entity: EntityKind::Request,
                id: quote.request_id.to_string(),
            });
        }

        state.request_quotes.entry(quote.request_id.clone()).or_default().push(quote.id.clone());
        state.quotes.insert(quote.id.clone(), quote);
        Ok(())
    }

    async fn delete_quote(
        &self,
        id: &QuoteId,
        expected_version: u64,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let stored = state.quotes.get(id).ok_or_else(|| RepositoryError::Missing {
            entity: EntityKind::Quote,
            id: id.to_string(),
        })?;
        check_version(EntityKind::Quote, &id.0, expected_version, stored.version)?;

        let request_id = stored.request_id.clone();
        state.quotes.remove(id);
        if let Some(ids) = state.request_quotes.get_mut(&request_id) {
            ids.retain(|existing| existing != id);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ChangeCommitter for InMemoryBrokerStore {
    async fn commit(&self, changes: &ChangeSet) -> Result<ChangeSet, RepositoryError> {
        let mut state = self.state.write().await;

        if let Some(request) = &changes.request {
            state.check_request(request)?;
        }
        for quote in &changes.quotes {
            state.check_quote(quote)?;
        }

        let mut committed = ChangeSet::default();
        if let Some(request) = &changes.request {
            let mut stored = request.clone();
            stored.version += 1;
            state.requests.insert(stored.id.clone(), stored.clone());
            committed.request = Some(stored);
        }
        for quote in &changes.quotes {
            let mut stored = quote.clone();
            stored.version += 1;
            state.quotes.insert(stored.id.clone(), stored.clone());
            committed.quotes.push(stored);
        }

        Ok(committed)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};
    use rust_decimal::Decimal;

    use bidbroker_core::domain::actor::{Actor, ActorId};
    use bidbroker_core::domain::quote::{Quote, QuoteDraft, QuoteId, QuoteStatus};
    use bidbroker_core::domain::request::{RequestStatus, ServiceRequest, ServiceRequestId};
    use bidbroker_core::errors::EntityKind;
    use bidbroker_core::lifecycle::ChangeSet;

    use crate::repositories::{
        ActorRepository, ChangeCommitter, InMemoryBrokerStore, QuoteRepository, RepositoryError,
        RequestRepository,
    };

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 30, 0).single().expect("valid instant")
    }

    fn request(id: &str) -> ServiceRequest {
        ServiceRequest {
            id: ServiceRequestId(id.to_owned()),
            client_id: ActorId("client-1".to_owned()),
            status: RequestStatus::Open,
            category: None,
            budget: Some(Decimal::ONE_HUNDRED),
            expires_at: None,
            created_at: now(),
            version: 0,
        }
    }

    fn quote(id: &str, request_id: &str) -> Quote {
        Quote::from_draft(
            QuoteId(id.to_owned()),
            ServiceRequestId(request_id.to_owned()),
            ActorId(format!("prov-{id}")),
            QuoteDraft::new(Decimal::new(90, 0)),
            now(),
        )
    }

    async fn seeded() -> InMemoryBrokerStore {
        let store = InMemoryBrokerStore::default();
        store.save_request(request("REQ-1")).await.expect("save request");
        for id in ["Q-3", "Q-1", "Q-2"] {
            store.insert_quote(quote(id, "REQ-1")).await.expect("insert quote");
        }
        store
    }

    #[tokio::test]
    async fn actor_round_trip() {
        let store = InMemoryBrokerStore::default();
        let actor = Actor::provider("prov-1", &["plumbing"]);

        store.save_actor(actor.clone()).await.expect("save actor");
        let found = store.find_actor(&actor.id).await.expect("find actor");

        assert_eq!(found, Some(actor));
    }

    #[tokio::test]
    async fn quotes_are_listed_in_insertion_order() {
        let store = seeded().await;
        let ids: Vec<String> = store
            .list_quotes_for_request(&ServiceRequestId("REQ-1".to_owned()))
            .await
            .expect("list quotes")
            .into_iter()
            .map(|quote| quote.id.0)
            .collect();
        assert_eq!(ids, vec!["Q-3", "Q-1", "Q-2"]);
    }

    #[tokio::test]
    async fn insert_rejects_duplicates_and_orphans() {
        let store = seeded().await;

        let duplicate = store.insert_quote(quote("Q-1", "REQ-1")).await;
        assert!(matches!(duplicate, Err(RepositoryError::Duplicate { .. })));

        let orphan = store.insert_quote(quote("Q-9", "REQ-404")).await;
        assert!(matches!(
            orphan,
            Err(RepositoryError::Missing { entity: EntityKind::Request, .. })
        ));
    }

    #[tokio::test]
    async fn commit_bumps_every_version() {
        let store = seeded().await;
        let mut request = request("REQ-1");
        request.status = RequestStatus::InNegotiation;
        let mut accepted = quote("Q-1", "REQ-1");
        accepted.status = QuoteStatus::Accepted;

        let committed = store
            .commit(&ChangeSet { request: Some(request), quotes: vec![accepted] })
            .await
            .expect("commit");

        assert_eq!(committed.request.as_ref().map(|request| request.version), Some(1));
        assert_eq!(committed.quotes[0].version, 1);
        let stored = store.find_quote(&QuoteId("Q-1".to_owned())).await.expect("find quote");
        assert_eq!(stored.map(|quote| quote.status), Some(QuoteStatus::Accepted));
    }

    #[tokio::test]
    async fn stale_entity_aborts_whole_commit() {
        let store = seeded().await;
        let mut first = quote("Q-1", "REQ-1");
        first.status = QuoteStatus::Rejected;
        store.commit(&ChangeSet { request: None, quotes: vec![first] }).await.expect("commit");

        let mut fresh = quote("Q-2", "REQ-1");
        fresh.status = QuoteStatus::Rejected;
        let mut stale = quote("Q-1", "REQ-1");
        stale.status = QuoteStatus::Accepted;

        let error = store
            .commit(&ChangeSet { request: None, quotes: vec![fresh, stale] })
            .await
            .expect_err("stale version");
        assert_eq!(
            error,
            RepositoryError::Conflict {
                entity: EntityKind::Quote,
                id: "Q-1".to_owned(),
                expected: 0,
                found: 1,
            }
        );

        let untouched = store.find_quote(&QuoteId("Q-2".to_owned())).await.expect("find quote");
        assert_eq!(untouched.map(|quote| quote.status), Some(QuoteStatus::Pending));
    }

    #[tokio::test]
    async fn delete_checks_version_and_unlinks() {
        let store = seeded().await;
        let id = QuoteId("Q-1".to_owned());

        let stale = store.delete_quote(&id, 5).await;
        assert!(matches!(stale, Err(RepositoryError::Conflict { found: 0, .. })));

        store.delete_quote(&id, 0).await.expect("delete");
        assert_eq!(store.find_quote(&id).await.expect("find quote"), None);
        let remaining = store
            .list_quotes_for_request(&ServiceRequestId("REQ-1".to_owned()))
            .await
            .expect("list quotes");
        assert_eq!(remaining.len(), 2);
    }

    #[tokio::test]
    async fn only_requests_with_pending_quotes_are_listed() {
        let store = seeded().await;
        store.save_request(request("REQ-2")).await.expect("save request");
        store.save_request(request("REQ-3")).await.expect("save request");
        let mut withdrawn = quote("Q-4", "REQ-2");
        withdrawn.status = QuoteStatus::Withdrawn;
        store.insert_quote(withdrawn).await.expect("insert quote");

        let ids = store.list_requests_with_pending_quotes().await.expect("list requests");
        assert_eq!(ids, vec![ServiceRequestId("REQ-1".to_owned())]);
    }
}
