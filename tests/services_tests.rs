//! # Service Tests
//!
//! Input validation and session gating of the literature, subscription and
//! history services, plus routing of workflow outcomes.

use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zdravscan::api_errors::ApiError;
use zdravscan::auth::AuthSession;
use zdravscan::client_config::ClientConfig;
use zdravscan::history::HistoryService;
use zdravscan::http_client::LiteratureFilter;
use zdravscan::literature::{LiteratureService, DEFAULT_SEARCH_LIMIT, MAX_SEARCH_LIMIT};
use zdravscan::models::{Page, SubscriptionType};
use zdravscan::router::{FailureReason, Navigator, Page as View};
use zdravscan::scan_workflow::ScanOutcome;
use zdravscan::subscription::SubscriptionService;
use zdravscan::token_store::MemoryTokenStore;

fn session(server: &MockServer) -> Arc<AuthSession> {
    let config = ClientConfig::with_api_url(server.uri());
    Arc::new(
        AuthSession::from_config(&config, Arc::new(MemoryTokenStore::new()), "user=%7B%7D")
            .expect("session should build"),
    )
}

async fn authenticated_session(server: &MockServer) -> Arc<AuthSession> {
    Mock::given(method("POST"))
        .and(path("/api/auth"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok",
            "user": {"id": 1, "telegram_id": 100}
        })))
        .mount(server)
        .await;
    let session = session(server);
    session.authenticate().await.expect("authentication should succeed");
    session
}

#[tokio::test]
async fn test_search_validation_happens_before_any_request() {
    let server = MockServer::start().await;
    let literature = LiteratureService::new(session(&server).client().clone());

    assert!(matches!(
        literature.search(" a ", DEFAULT_SEARCH_LIMIT).await,
        Err(ApiError::Validation(_))
    ));
    assert!(matches!(
        literature.search("acne", MAX_SEARCH_LIMIT + 1).await,
        Err(ApiError::Validation(_))
    ));
    let filter = LiteratureFilter {
        page: Page::new(0, 0),
        ..LiteratureFilter::default()
    };
    assert!(matches!(literature.list(&filter).await, Err(ApiError::Validation(_))));

    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_search_trims_query_and_blank_filters_are_dropped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/literature/search/"))
        .and(query_param("q", "acne"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{"id": 1, "title": "Acne", "category": "acne", "relevance_snippet": "acne is"}],
            "total": 1,
            "query": "acne"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/literature"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "literature": [], "total": 0, "categories": []
        })))
        .expect(1)
        .mount(&server)
        .await;

    let literature = LiteratureService::new(session(&server).client().clone());

    let results = literature.search("  acne  ", DEFAULT_SEARCH_LIMIT).await.unwrap();
    assert_eq!(results.results.len(), 1);

    let filter = LiteratureFilter {
        category: Some("   ".to_string()),
        search: Some(String::new()),
        ..LiteratureFilter::default()
    };
    literature.list(&filter).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let list_query = requests[1].url.query().unwrap_or_default().to_string();
    assert!(!list_query.contains("category"), "{list_query}");
    assert!(!list_query.contains("search"), "{list_query}");
}

#[tokio::test]
async fn test_subscription_requires_session_but_plans_are_public() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/subscription/plans"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"plans": [
            {"type": "trial", "name": "Trial", "duration": "7 days", "price": 0},
            {"type": "annual", "name": "Annual", "duration": "12 months", "price": 2990, "description": "Best value"}
        ]})))
        .expect(1)
        .mount(&server)
        .await;

    let subscriptions = SubscriptionService::new(session(&server));

    assert!(matches!(subscriptions.status().await, Err(ApiError::Auth(_))));
    assert!(matches!(
        subscriptions.create(SubscriptionType::Trial).await,
        Err(ApiError::Auth(_))
    ));
    assert!(matches!(subscriptions.cancel(1).await, Err(ApiError::Auth(_))));

    let plans = subscriptions.plans().await.unwrap();
    assert_eq!(plans.len(), 2);
    assert_eq!(plans[1].plan_type, SubscriptionType::Annual);
    assert_eq!(plans[1].description.as_deref(), Some("Best value"));
}

#[tokio::test]
async fn test_subscription_status_when_authenticated() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/subscription/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "has_active_subscription": false,
            "subscription": null
        })))
        .expect(1)
        .mount(&server)
        .await;

    let subscriptions = SubscriptionService::new(authenticated_session(&server).await);

    let status = subscriptions.status().await.unwrap();
    assert!(!status.has_active_subscription);
    assert!(status.subscription.is_none());
}

#[tokio::test]
async fn test_history_operations_when_authenticated() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/history"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "History cleared"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/history/7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "Deleted"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/scan"))
        .and(query_param("limit", "10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "scans": [{"id": 3, "status": "failed"}],
            "total": 1
        })))
        .expect(1)
        .mount(&server)
        .await;

    let history = HistoryService::new(authenticated_session(&server).await);

    assert!(history.clear().await.unwrap());
    assert!(history.delete(7).await.unwrap());
    let scans = history
        .scans(zdravscan::history::DEFAULT_SCAN_PAGE)
        .await
        .unwrap();
    assert_eq!(scans.total, 1);
    assert!(scans.scans[0].diagnosis().is_none());
}

#[test]
fn test_navigator_routes_outcomes_to_pages() {
    let mut navigator = Navigator::new();
    navigator.navigate(View::Upload);

    navigator.apply(&ScanOutcome::BackendFailure);
    assert_eq!(navigator.current(), &View::Failure(FailureReason::Analysis));

    navigator.apply(&ScanOutcome::Fatal(ApiError::Upload("HTTP 500".to_string())));
    assert!(matches!(navigator.current(), View::Failure(FailureReason::Error(message)) if message.contains("HTTP 500")));
}
