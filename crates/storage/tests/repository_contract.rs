//! Both backends must satisfy the same repository contract

use marketplace_common::{
    BillingInterval, BillingTerms, ContactInfo, Deployment, DeploymentPatch, DeploymentStatus,
    Error, NodeDetails, OperatorSettings, PageRequest, PricingConfiguration, ProviderRequest,
    ProviderRequestPatch, ProviderRequestStatus, ResourceSpec,
};
use marketplace_storage::{DeploymentFilter, ProviderRequestFilter, Store, StoreBackend};
use uuid::Uuid;

fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

fn deployment(owner: &str, name: &str, millis: i64) -> Deployment {
    let mut dep = Deployment::new(
        unique("dep"),
        owner.to_string(),
        name.to_string(),
        Some("test deployment".to_string()),
        ResourceSpec {
            cpu: 2,
            memory: 4,
            storage: 50,
        },
        BillingTerms {
            plan_id: "basic".to_string(),
            amount: 12.5,
            currency: "USD".to_string(),
            interval: BillingInterval::Monthly,
        },
    );
    let at = chrono::DateTime::from_timestamp_millis(millis).unwrap();
    dep.created_at = at;
    dep.updated_at = at;
    dep
}

fn provider_request(requester: &str) -> ProviderRequest {
    ProviderRequest::new(
        unique("req"),
        requester.to_string(),
        NodeDetails {
            location: "Lisbon".to_string(),
            resources: ResourceSpec {
                cpu: 16,
                memory: 64,
                storage: 2000,
            },
        },
        ContactInfo {
            email: "ops@example.com".to_string(),
            phone: Some("+351000000".to_string()),
        },
    )
}

async fn crud_round_trip(store: &Store) {
    let owner = unique("auth0|owner");
    let created = store
        .deployments
        .create(deployment(&owner, "web-1", 1_700_000_000_000))
        .await
        .unwrap();

    let fetched = store
        .deployments
        .get_by_id(&created.id)
        .await
        .unwrap()
        .expect("deployment should exist");
    assert_eq!(fetched, created);

    let updated = store
        .deployments
        .update(
            &created.id,
            DeploymentPatch {
                name: Some("web-renamed".to_string()),
                status: Some(DeploymentStatus::Active),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.name, "web-renamed");
    assert_eq!(updated.status, DeploymentStatus::Active);
    assert_eq!(updated.owner_subject_id, owner);
    assert_eq!(updated.resources, created.resources);
    assert!(updated.updated_at >= created.updated_at);

    assert!(store.deployments.delete(&created.id).await.unwrap());
    assert!(!store.deployments.delete(&created.id).await.unwrap());
    assert!(store.deployments.get_by_id(&created.id).await.unwrap().is_none());
}

async fn update_missing_is_not_found(store: &Store) {
    let err = store
        .deployments
        .update("does-not-exist", DeploymentPatch::status(DeploymentStatus::Failed))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
}

async fn owner_listing_is_ordered_and_counted(store: &Store) {
    let alice = unique("auth0|alice");
    let bob = unique("auth0|bob");

    let mut alice_ids = Vec::new();
    for i in 0..5 {
        let dep = store
            .deployments
            .create(deployment(&alice, &format!("a-{i}"), 1_000 + i))
            .await
            .unwrap();
        alice_ids.push(dep.id);
    }
    let bob_dep = store
        .deployments
        .create(deployment(&bob, "b-0", 500))
        .await
        .unwrap();

    let first = store
        .deployments
        .list(
            &DeploymentFilter::Owner(alice.clone()),
            &PageRequest::new(1, 2).unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(first.total_count, 5);
    let first_ids: Vec<_> = first.items.iter().map(|d| d.id.clone()).collect();
    assert_eq!(first_ids, alice_ids[0..2]);

    let last = store
        .deployments
        .list(
            &DeploymentFilter::Owner(alice.clone()),
            &PageRequest::new(3, 2).unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(last.total_count, 5);
    assert_eq!(last.items.len(), 1);
    assert_eq!(last.items[0].id, alice_ids[4]);

    let beyond = store
        .deployments
        .list(
            &DeploymentFilter::Owner(alice.clone()),
            &PageRequest::new(10, 2).unwrap(),
        )
        .await
        .unwrap();
    assert!(beyond.items.is_empty());
    assert_eq!(beyond.total_count, 5);

    assert!(first
        .items
        .iter()
        .chain(last.items.iter())
        .all(|d| d.owner_subject_id == alice));

    for id in alice_ids.iter().chain(std::iter::once(&bob_dep.id)) {
        store.deployments.delete(id).await.unwrap();
    }
}

async fn provider_request_status_index(store: &Store) {
    let requester = unique("auth0|provider");
    let request = store
        .provider_requests
        .create(provider_request(&requester))
        .await
        .unwrap();

    let by_requester = store
        .provider_requests
        .list(
            &ProviderRequestFilter::Requester(requester.clone()),
            &PageRequest::default(),
        )
        .await
        .unwrap();
    assert_eq!(by_requester.total_count, 1);

    store
        .provider_requests
        .update(
            &request.id,
            ProviderRequestPatch {
                status: Some(ProviderRequestStatus::Approved),
            },
        )
        .await
        .unwrap();

    let pending = store
        .provider_requests
        .list(
            &ProviderRequestFilter::Status(ProviderRequestStatus::Pending),
            &PageRequest::new(1, 100).unwrap(),
        )
        .await
        .unwrap();
    assert!(pending.items.iter().all(|r| r.id != request.id));

    let approved = store
        .provider_requests
        .list(
            &ProviderRequestFilter::Status(ProviderRequestStatus::Approved),
            &PageRequest::new(1, 100).unwrap(),
        )
        .await
        .unwrap();
    assert!(approved.items.iter().any(|r| r.id == request.id));

    store.provider_requests.delete(&request.id).await.unwrap();
}

async fn singletons_round_trip(store: &Store) {
    let pricing = PricingConfiguration::default();
    store.pricing.put(pricing.clone()).await.unwrap();
    assert_eq!(store.pricing.get().await.unwrap(), Some(pricing));

    let settings = OperatorSettings {
        dashboard_title: "Contract".to_string(),
        ..Default::default()
    };
    store.settings.put(settings.clone()).await.unwrap();
    assert_eq!(store.settings.get().await.unwrap(), Some(settings));
}

async fn concurrent_updates_last_write_wins(store: &Store) {
    let dep = store
        .deployments
        .create(deployment(&unique("auth0|racer"), "race", 42))
        .await
        .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = store.clone();
            let id = dep.id.clone();
            tokio::spawn(async move {
                store
                    .deployments
                    .update(
                        &id,
                        DeploymentPatch {
                            name: Some(format!("writer-{i}")),
                            ..Default::default()
                        },
                    )
                    .await
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let stored = store.deployments.get_by_id(&dep.id).await.unwrap().unwrap();
    assert!(stored.name.starts_with("writer-"));
    assert_eq!(stored.owner_subject_id, dep.owner_subject_id);

    store.deployments.delete(&dep.id).await.unwrap();
}

async fn racing_decisions_settle_once(store: &Store) {
    let request = store
        .provider_requests
        .create(provider_request(&unique("auth0|provider")))
        .await
        .unwrap();

    let handles: Vec<_> = [ProviderRequestStatus::Approved, ProviderRequestStatus::Rejected]
        .into_iter()
        .cycle()
        .take(6)
        .map(|next| {
            let store = store.clone();
            let id = request.id.clone();
            tokio::spawn(async move {
                store
                    .provider_requests
                    .update_if(
                        &id,
                        &|current| current.status.transition_to(next).map(|_| ()),
                        ProviderRequestPatch { status: Some(next) },
                    )
                    .await
            })
        })
        .collect();

    let mut decided = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(updated) => decided.push(updated.status),
            Err(err) => assert!(matches!(err, Error::InvalidTransition { .. })),
        }
    }
    decided.dedup();
    assert_eq!(decided.len(), 1, "exactly one decision must stick");

    let mut listed_under = 0;
    for status in [ProviderRequestStatus::Approved, ProviderRequestStatus::Rejected] {
        let page = store
            .provider_requests
            .list(
                &ProviderRequestFilter::Status(status),
                &PageRequest::new(1, 100).unwrap(),
            )
            .await
            .unwrap();
        if page.items.iter().any(|r| r.id == request.id) {
            assert_eq!(status, decided[0]);
            listed_under += 1;
        }
    }
    assert_eq!(listed_under, 1);

    store.provider_requests.delete(&request.id).await.unwrap();
}

async fn update_after_delete_is_not_found(store: &Store) {
    let dep = store
        .deployments
        .create(deployment(&unique("auth0|gone"), "gone", 7))
        .await
        .unwrap();
    assert!(store.deployments.delete(&dep.id).await.unwrap());

    let err = store
        .deployments
        .update(&dep.id, DeploymentPatch::status(DeploymentStatus::Active))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
    assert!(store.deployments.get_by_id(&dep.id).await.unwrap().is_none());
    assert!(!store.deployments.delete(&dep.id).await.unwrap());

    let owned = store
        .deployments
        .list(
            &DeploymentFilter::Owner(dep.owner_subject_id.clone()),
            &PageRequest::default(),
        )
        .await
        .unwrap();
    assert_eq!(owned.total_count, 0);
}

async fn run_contract(store: Store) {
    crud_round_trip(&store).await;
    update_missing_is_not_found(&store).await;
    owner_listing_is_ordered_and_counted(&store).await;
    provider_request_status_index(&store).await;
    singletons_round_trip(&store).await;
    concurrent_updates_last_write_wins(&store).await;
    racing_decisions_settle_once(&store).await;
    update_after_delete_is_not_found(&store).await;
}

#[tokio::test]
async fn test_memory_store_contract() {
    let store = Store::connect(&StoreBackend::Memory).await.unwrap();
    run_contract(store).await;
}

#[tokio::test]
async fn test_memory_singletons_start_empty() {
    let store = Store::memory();
    assert!(store.pricing.get().await.unwrap().is_none());
    assert!(store.settings.get().await.unwrap().is_none());
}

#[tokio::test]
#[ignore] // Requires Redis to be running
async fn test_redis_store_contract() {
    let store = Store::connect(&StoreBackend::Redis {
        url: "redis://127.0.0.1:6379/15".to_string(),
    })
    .await
    .expect("Failed to connect to test Redis");
    run_contract(store).await;
}
