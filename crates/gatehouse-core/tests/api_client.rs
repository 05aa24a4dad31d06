//! Integration tests for the authenticated request wrapper.


use std::time::Duration;

use fixtures::{mount_refresh, refresh_grant, requests_to, test_session, REFRESH_PATH};
use gatehouse_core::{ApiClient, ApiError, Role};
use serde::Deserialize;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const VISITORS_PATH: &str = "/api/visitors";

#[derive(Debug, Deserialize, PartialEq)]
struct Visitor {
    name: String,
}

#[tokio::test]
async fn test_get_sends_bearer_token() {
    if !fixtures::can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(VISITORS_PATH))
        .and(header("authorization", "Bearer A1"))
        .and(header("content-type", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{"name": "Karim"}])))
        .expect(1)
        .mount(&server)
        .await;

    let t = test_session(&server);
    t.session.store_tokens("A1", "R1", 3600).unwrap();
    let api = ApiClient::new(t.session.clone());

    let response = api.get::<Vec<Visitor>>(VISITORS_PATH).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(
        response.data,
        Some(vec![Visitor {
            name: "Karim".into()
        }])
    );
    assert!(requests_to(&server, REFRESH_PATH).await.is_empty());
}

#[tokio::test]
async fn test_unauthorized_refreshes_and_retries_once() {
    if !fixtures::can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(VISITORS_PATH))
        .and(header("authorization", "Bearer A1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(VISITORS_PATH))
        .and(header("authorization", "Bearer A2"))
        .and(body_json(serde_json::json!({"name": "Karim"})))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(serde_json::json!({"name": "Karim", "message": "Visiteur ajouté"})),
        )
        .expect(1)
        .mount(&server)
        .await;
    mount_refresh(&server, refresh_grant("A2", None, 3600), 1).await;

    let t = test_session(&server);
    t.session.store_tokens("A1", "R1", 3600).unwrap();
    let api = ApiClient::new(t.session.clone());

    let response = api
        .post::<Visitor, _>(VISITORS_PATH, &serde_json::json!({"name": "Karim"}))
        .await
        .unwrap();
    assert_eq!(response.status, 201);
    assert_eq!(response.message.as_deref(), Some("Visiteur ajouté"));
    assert_eq!(t.session.stored_tokens().unwrap().access_token, "A2");
}

#[tokio::test]
async fn test_second_unauthorized_does_not_loop() {
    if !fixtures::can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(VISITORS_PATH))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;
    mount_refresh(&server, refresh_grant("A2", None, 3600), 1).await;

    let t = test_session(&server);
    t.session.store_tokens("A1", "R1", 3600).unwrap();
    let api = ApiClient::new(t.session.clone());

    let err = api.get::<serde_json::Value>(VISITORS_PATH).await.unwrap_err();
    assert_eq!(err.status(), Some(401));
    assert_eq!(requests_to(&server, VISITORS_PATH).await.len(), 2);
    assert_eq!(requests_to(&server, REFRESH_PATH).await.len(), 1);
}

#[tokio::test]
async fn test_rejected_refresh_on_retry_is_session_expired() {
    if !fixtures::can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(VISITORS_PATH))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    mount_refresh(&server, ResponseTemplate::new(401), 1).await;

    let t = test_session(&server);
    t.session.store_tokens("A1", "R1", 3600).unwrap();
    let api = ApiClient::new(t.session.clone());

    let err = api.get::<serde_json::Value>(VISITORS_PATH).await.unwrap_err();
    assert_eq!(err, ApiError::SessionExpired);
    assert!(t.session.stored_tokens().is_none());
}

#[tokio::test]
async fn test_no_session_fails_before_any_request() {
    if !fixtures::can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let server = MockServer::start().await;
    let t = test_session(&server);
    let api = ApiClient::new(t.session.clone());

    let err = api.get::<serde_json::Value>(VISITORS_PATH).await.unwrap_err();
    assert!(err.is_session_expired());
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_expired_token_is_refreshed_before_the_request() {
    if !fixtures::can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(VISITORS_PATH))
        .and(header("authorization", "Bearer A2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .expect(1)
        .mount(&server)
        .await;
    mount_refresh(&server, refresh_grant("A2", None, 3600), 1).await;

    let t = test_session(&server);
    t.session.store_tokens("A1", "R1", 3600).unwrap();
    t.clock.advance(Duration::from_secs(3600));
    let api = ApiClient::new(t.session.clone());

    let response = api.get::<Vec<Visitor>>(VISITORS_PATH).await.unwrap();
    assert_eq!(response.data, Some(vec![]));
}

#[tokio::test]
async fn test_error_status_carries_server_message() {
    if !fixtures::can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/deliveries/42"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(serde_json::json!({"message": "Livraison introuvable"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/api/deliveries/43"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let t = test_session(&server);
    t.session.store_tokens("A1", "R1", 3600).unwrap();
    let api = ApiClient::new(t.session.clone());

    let err = api.delete::<serde_json::Value>("/api/deliveries/42").await.unwrap_err();
    assert_eq!(
        err,
        ApiError::Request {
            status: 404,
            message: "Livraison introuvable".into()
        }
    );

    let err = api
        .put::<serde_json::Value, _>("/api/deliveries/43", &serde_json::json!({"status": "received"}))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "HTTP error! status: 500");
    // Request errors never touch the session
    assert!(t.session.stored_tokens().is_some());
}

#[tokio::test]
async fn test_non_json_success_has_no_data() {
    if !fixtures::can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/visitors/7"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let t = test_session(&server);
    t.session.store_tokens("A1", "R1", 3600).unwrap();
    let api = ApiClient::new(t.session.clone());

    let response = api.delete::<serde_json::Value>("/api/visitors/7").await.unwrap();
    assert_eq!(response.status, 204);
    assert_eq!(response.data, None);
}

#[tokio::test]
async fn test_endpoint_helpers() {
    if !fixtures::can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/update-profile"))
        .and(body_json(serde_json::json!({"fullName": "Sara B", "role": "security"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"message": "ok"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/notifications/unread-count/u1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"count": 3})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/notifications/u1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!([{"title": "Colis arrivé"}])),
        )
        .mount(&server)
        .await;

    let t = test_session(&server);
    t.session.store_tokens("A1", "R1", 3600).unwrap();
    let api = ApiClient::new(t.session.clone());

    let response = api.update_profile("Sara B", Role::Security).await.unwrap();
    assert_eq!(response.message.as_deref(), Some("ok"));
    assert_eq!(api.unread_notifications_count("u1").await.unwrap(), 3);
    let notifications = api.notifications("u1").await.unwrap();
    assert_eq!(notifications[0]["title"], "Colis arrivé");
}
