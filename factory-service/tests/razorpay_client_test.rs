//! Razorpay REST client tests against a mocked API.

use factory_service::config::RazorpayConfig;
use factory_service::services::razorpay::{
    CreateOrderRequest, CreateSubscriptionRequest, RazorpayApi, RazorpayApiError,
    RazorpayClient,
};
use secrecy::Secret;
use serde_json::json;
use wiremock::matchers::{basic_auth, body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> RazorpayClient {
    RazorpayClient::new(RazorpayConfig {
        key_id: "rzp_test_key".to_string(),
        key_secret: Secret::new("rzp_test_secret".to_string()),
        webhook_secret: Secret::new("whsec".to_string()),
        api_base_url: server.uri(),
    })
}

#[tokio::test]
async fn create_order_sends_basic_auth_and_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/orders"))
        .and(basic_auth("rzp_test_key", "rzp_test_secret"))
        .and(body_partial_json(json!({
            "amount": 49900,
            "currency": "INR",
            "receipt": "receipt_1",
            "partial_payment": false
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "order_abc",
            "entity": "order",
            "amount": 49900,
            "amount_paid": 0,
            "amount_due": 49900,
            "currency": "INR",
            "receipt": "receipt_1",
            "status": "created",
            "attempts": 0,
            "notes": [],
            "created_at": 1717000000
        })))
        .expect(1)
        .mount(&server)
        .await;

    let order = client_for(&server)
        .create_order(&CreateOrderRequest {
            amount: 49900,
            currency: "INR".to_string(),
            receipt: "receipt_1".to_string(),
            partial_payment: false,
            notes: json!({ "user_id": "u1" }),
        })
        .await
        .expect("order should be created");

    assert_eq!(order.id, "order_abc");
    assert_eq!(order.status, "created");
    assert_eq!(order.amount_due, 49900);
}

#[tokio::test]
async fn fetch_order_reports_paid_status() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/orders/order_paid"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "order_paid",
            "amount": 1000,
            "amount_paid": 1000,
            "currency": "INR",
            "receipt": null,
            "status": "paid"
        })))
        .mount(&server)
        .await;

    let order = client_for(&server).fetch_order("order_paid").await.unwrap();
    assert_eq!(order.status, "paid");
    assert_eq!(order.amount_paid, 1000);
}

#[tokio::test]
async fn api_error_is_decoded() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/orders/order_missing"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {
                "code": "BAD_REQUEST_ERROR",
                "description": "The id provided does not exist"
            }
        })))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .fetch_order("order_missing")
        .await
        .unwrap_err();

    match &err {
        RazorpayApiError::Api {
            status,
            code,
            description,
        } => {
            assert_eq!(*status, 400);
            assert_eq!(code, "BAD_REQUEST_ERROR");
            assert_eq!(description, "The id provided does not exist");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn server_errors_are_retryable() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/subscriptions/sub_1"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .fetch_subscription("sub_1")
        .await
        .unwrap_err();

    assert!(matches!(err, RazorpayApiError::Api { status: 503, .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn create_subscription_returns_checkout_url() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/subscriptions"))
        .and(body_partial_json(json!({ "plan_id": "plan_monthly", "total_count": 12 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "sub_new",
            "entity": "subscription",
            "plan_id": "plan_monthly",
            "status": "created",
            "total_count": 12,
            "paid_count": 0,
            "short_url": "https://rzp.io/i/abc"
        })))
        .mount(&server)
        .await;

    let subscription = client_for(&server)
        .create_subscription(&CreateSubscriptionRequest {
            plan_id: "plan_monthly".to_string(),
            total_count: 12,
            quantity: 1,
            customer_notify: 1,
            notes: json!({}),
        })
        .await
        .unwrap();

    assert_eq!(subscription.id, "sub_new");
    assert_eq!(subscription.short_url.as_deref(), Some("https://rzp.io/i/abc"));
}

#[tokio::test]
async fn unconfigured_client_never_calls_out() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = RazorpayClient::new(RazorpayConfig {
        key_id: String::new(),
        key_secret: Secret::new(String::new()),
        webhook_secret: Secret::new(String::new()),
        api_base_url: server.uri(),
    });

    let err = client.fetch_order("order_1").await.unwrap_err();
    assert!(matches!(err, RazorpayApiError::NotConfigured));
}
