/// Integration tests for the Payments Gateway client with a mocked API
/// Exercises the transfer endpoint contract without a real gateway
use bigdecimal::BigDecimal;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use peerlend_risk::errors::RiskError;
use peerlend_risk::gateway::{
    transfer_idempotency_key, HttpPaymentsGateway, PaymentsGateway, TransferStatus,
};

fn gateway_for(server: &MockServer) -> HttpPaymentsGateway {
    HttpPaymentsGateway::new(server.uri(), "test_token".to_string()).unwrap()
}

#[tokio::test]
async fn test_initiate_transfer_success() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/transfers"))
        .and(header("Authorization", "Bearer test_token"))
        .and(header_exists("Idempotency-Key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "transfer_id": "tr_abc123",
            "status": "pending"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let gateway = gateway_for(&mock_server);
    let metadata = json!({
        "loan_id": Uuid::new_v4(),
        "idempotency_key": transfer_idempotency_key(Uuid::new_v4(), Uuid::new_v4()),
    });

    let receipt = gateway
        .initiate_transfer("fs_borrower", "fs_lender", &BigDecimal::from(250), metadata)
        .await
        .unwrap();
    assert_eq!(receipt.transfer_id, "tr_abc123");
}

#[tokio::test]
async fn test_initiate_transfer_accepts_alternate_id_fields() {
    let mock_server = MockServer::start().await;

    // Some gateway versions return the id nested under `data`.
    Mock::given(method("POST"))
        .and(path("/v1/transfers"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "data": { "id": "tr_nested" }
        })))
        .mount(&mock_server)
        .await;

    let gateway = gateway_for(&mock_server);
    let receipt = gateway
        .initiate_transfer(
            "fs_borrower",
            "fs_lender",
            &BigDecimal::from(100),
            json!({}),
        )
        .await
        .unwrap();
    assert_eq!(receipt.transfer_id, "tr_nested");
}

#[tokio::test]
async fn test_initiate_transfer_server_error_maps_to_gateway_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/transfers"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .mount(&mock_server)
        .await;

    let gateway = gateway_for(&mock_server);
    let result = gateway
        .initiate_transfer(
            "fs_borrower",
            "fs_lender",
            &BigDecimal::from(100),
            json!({}),
        )
        .await;

    match result {
        Err(RiskError::GatewayError(msg)) => assert!(msg.contains("500")),
        other => panic!("expected gateway error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_initiate_transfer_missing_id_is_an_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/transfers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .mount(&mock_server)
        .await;

    let gateway = gateway_for(&mock_server);
    let result = gateway
        .initiate_transfer(
            "fs_borrower",
            "fs_lender",
            &BigDecimal::from(100),
            json!({}),
        )
        .await;
    assert!(matches!(result, Err(RiskError::GatewayError(_))));
}

#[tokio::test]
async fn test_transfer_status_mapping() {
    let mock_server = MockServer::start().await;

    for (id, raw, expected) in [
        ("tr_1", "processing", TransferStatus::Pending),
        ("tr_2", "completed", TransferStatus::Completed),
        ("tr_3", "returned", TransferStatus::Failed),
    ] {
        Mock::given(method("GET"))
            .and(path(format!("/v1/transfers/{}", id)))
            .and(header("Authorization", "Bearer test_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": raw })))
            .mount(&mock_server)
            .await;

        let gateway = gateway_for(&mock_server);
        assert_eq!(gateway.transfer_status(id).await.unwrap(), expected);
    }
}

#[tokio::test]
async fn test_circuit_opens_after_consecutive_failures() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/transfers"))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .mount(&mock_server)
        .await;

    let gateway = gateway_for(&mock_server);
    for _ in 0..5 {
        let result = gateway
            .initiate_transfer("fs_a", "fs_b", &BigDecimal::from(10), json!({}))
            .await;
        assert!(result.is_err());
    }

    // The sixth call is rejected without reaching the gateway.
    match gateway
        .initiate_transfer("fs_a", "fs_b", &BigDecimal::from(10), json!({}))
        .await
    {
        Err(RiskError::GatewayError(msg)) => assert!(msg.contains("circuit open")),
        other => panic!("expected circuit rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unknown_transfer_status_is_an_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/transfers/tr_weird"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "sideways" })))
        .mount(&mock_server)
        .await;

    let gateway = gateway_for(&mock_server);
    assert!(matches!(
        gateway.transfer_status("tr_weird").await,
        Err(RiskError::GatewayError(_))
    ));
}
