//! Purchase flow end to end: buy, then reconcile through signed webhooks.

mod common;

use common::{
    one_time_plan, order_paid_event, payment_failed_event, subscription_event, subscription_plan,
    TestApp,
};
use factory_service::services::PaymentStore;
use serde_json::{json, Value};

/// Buy `plan` as the holder of `token`, with Razorpay answering `order_id`.
async fn buy(app: &TestApp, token: &str, plan: &Value, order_id: &str, amount: u64) -> Value {
    app.mock_create_order(order_id, amount).await;

    let response = app
        .client
        .get(app.url(&format!(
            "/products/{}/buy/razorpay",
            plan["id"].as_str().unwrap()
        )))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    response.json().await.unwrap()
}

#[tokio::test]
async fn order_paid_credits_tokens_exactly_once() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    let plan = app.create_plan(one_time_plan("Starter", 499.0, 100)).await;
    let token = app.client_token("payer@example.com").await;

    let purchase = buy(&app, &token, &plan, "order_it_1", 49900).await;
    assert_eq!(purchase["gateway_key_id"], "rzp_test_key");
    assert_eq!(purchase["transaction"]["status"], "pending");
    assert_eq!(purchase["transaction"]["gateway_transaction_id"], "order_it_1");
    assert_eq!(purchase["transaction"]["amount"], 49900);

    app.mock_fetch_order("order_it_1", 49900, "paid").await;
    let event = order_paid_event("order_it_1", "pay_it_1", 49900);

    let response = app.post_webhook("evt_paid_1", &event).await;
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["outcome"], "applied");
    assert_eq!(body["transaction"]["status"], "completed");

    assert_eq!(app.me(&token).await["tokens"], 100);

    // Same delivery replayed.
    let response = app.post_webhook("evt_paid_1", &event).await;
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Event already processed");

    // Same payment under a new event id.
    let response = app.post_webhook("evt_paid_2", &event).await;
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["outcome"], "duplicate");

    assert_eq!(app.me(&token).await["tokens"], 100);

    let transactions: Value = app
        .client
        .get(app.url("/user/transactions"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(transactions.as_array().map(Vec::len), Some(1));
    assert_eq!(transactions[0]["status"], "completed");

    app.cleanup().await;
}

#[tokio::test]
async fn bad_signature_is_rejected() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    let body = serde_json::to_vec(&order_paid_event("order_x", "pay_x", 100)).unwrap();

    let response = app
        .client
        .post(app.url("/webhooks/razorpay"))
        .header("x-razorpay-signature", "deadbeef")
        .header("content-type", "application/json")
        .body(body.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);

    let response = app
        .client
        .post(app.url("/webhooks/razorpay"))
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);

    app.cleanup().await;
}

#[tokio::test]
async fn unknown_gateway_is_acknowledged() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    let response = app
        .client
        .post(app.url("/webhooks/paypal"))
        .json(&json!({ "event": "order.paid" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Payment gateway not found");

    app.cleanup().await;
}

#[tokio::test]
async fn unparseable_body_is_bad_request() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    let raw = b"not json".to_vec();
    let response = app
        .client
        .post(app.url("/webhooks/razorpay"))
        .header("x-razorpay-signature", common::sign(&raw))
        .body(raw)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);

    app.cleanup().await;
}

#[tokio::test]
async fn failed_payment_marks_transaction_failed() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    let plan = app.create_plan(one_time_plan("Starter", 499.0, 100)).await;
    let token = app.client_token("declined@example.com").await;

    buy(&app, &token, &plan, "order_it_2", 49900).await;
    app.mock_fetch_order("order_it_2", 49900, "attempted").await;

    let response = app
        .post_webhook(
            "evt_failed_1",
            &payment_failed_event("order_it_2", "pay_it_2", 49900),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["outcome"], "applied");
    assert_eq!(body["transaction"]["status"], "failed");

    assert_eq!(app.me(&token).await["tokens"], 0);

    app.cleanup().await;
}

#[tokio::test]
async fn webhook_for_unknown_order_is_rejected_without_retry() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    app.mock_fetch_order("order_ghost", 1000, "paid").await;

    let response = app
        .post_webhook("evt_ghost", &order_paid_event("order_ghost", "pay_ghost", 1000))
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["outcome"], "rejected");

    app.cleanup().await;
}

#[tokio::test]
async fn buy_with_unknown_gateway_fails() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    let plan = app.create_plan(one_time_plan("Starter", 499.0, 100)).await;
    let token = app.client_token("wrong-gw@example.com").await;

    let response = app
        .client
        .get(app.url(&format!(
            "/products/{}/buy/stripe",
            plan["id"].as_str().unwrap()
        )))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);

    app.cleanup().await;
}

#[tokio::test]
async fn razorpay_outage_is_retried_and_not_recorded() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    let plan = app.create_plan(one_time_plan("Starter", 499.0, 100)).await;
    let token = app.client_token("outage@example.com").await;
    buy(&app, &token, &plan, "order_it_3", 49900).await;

    app.mock_fetch_order_unavailable("order_it_3").await;
    let event = order_paid_event("order_it_3", "pay_it_3", 49900);

    let response = app.post_webhook("evt_outage", &event).await;
    assert_eq!(response.status().as_u16(), 500);
    assert!(!app.db.has_webhook_event("evt_outage").await.unwrap());
    assert_eq!(app.me(&token).await["tokens"], 0);

    // Razorpay's retry of the same delivery goes through once the API is back.
    app.mock_fetch_order("order_it_3", 49900, "paid").await;
    let response = app.post_webhook("evt_outage", &event).await;
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["outcome"], "applied");
    assert!(app.db.has_webhook_event("evt_outage").await.unwrap());
    assert_eq!(app.me(&token).await["tokens"], 100);

    app.cleanup().await;
}

#[tokio::test]
async fn subscription_charges_credit_tokens_once_per_payment() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    let plan = app
        .create_plan(subscription_plan("Monthly", 299.0, 30, "plan_rzp_monthly"))
        .await;
    let token = app.client_token("subscriber@example.com").await;

    app.mock_create_subscription("sub_it_1", "plan_rzp_monthly").await;
    app.mock_fetch_subscription("sub_it_1", "plan_rzp_monthly").await;

    let response = app
        .client
        .get(app.url(&format!(
            "/products/{}/buy/razorpay",
            plan["id"].as_str().unwrap()
        )))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let purchase: Value = response.json().await.unwrap();
    assert_eq!(purchase["transaction"]["gateway_transaction_id"], "sub_it_1");
    assert_eq!(purchase["transaction"]["tokens"], 0);
    assert_eq!(purchase["redirect_url"], "https://rzp.io/i/sub_it_1");

    let activated = subscription_event(
        "subscription.activated",
        "sub_it_1",
        "plan_rzp_monthly",
        None,
    );
    let response = app.post_webhook("evt_sub_active", &activated).await;
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["outcome"], "applied");

    let charged = subscription_event(
        "subscription.charged",
        "sub_it_1",
        "plan_rzp_monthly",
        Some(("pay_sub_1", 29900)),
    );
    let body: Value = app
        .post_webhook("evt_sub_charge_1", &charged)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["outcome"], "applied");
    assert_eq!(body["transaction"]["gateway_transaction_id"], "pay_sub_1");
    assert_eq!(body["transaction"]["tokens"], 30);

    // Same payment, new event id.
    let body: Value = app
        .post_webhook("evt_sub_charge_2", &charged)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["outcome"], "duplicate");

    assert_eq!(app.me(&token).await["tokens"], 30);

    let mine: Value = app
        .client
        .get(app.url("/user/subscriptions"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(mine.as_array().map(Vec::len), Some(1));
    assert_eq!(mine[0]["subscription_id"], "sub_it_1");
    assert_eq!(mine[0]["status"], "charged");
    assert_eq!(mine[0]["is_active"], true);
    assert_eq!(mine[0]["charged_count"], 1);

    let admin = app.admin_token().await;
    let active: Value = app
        .client
        .get(app.url("/subscriptions?is_active=true&min_charged_count=1"))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(active.as_array().map(Vec::len), Some(1));

    let cancelled: Value = app
        .client
        .get(app.url("/subscriptions?status=cancelled"))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(cancelled.as_array().map(Vec::len), Some(0));

    let transactions: Value = app
        .client
        .get(app.url("/user/transactions"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(transactions.as_array().map(Vec::len), Some(2));
    assert!(transactions
        .as_array()
        .unwrap()
        .iter()
        .all(|t| t["status"] == "completed"));

    app.cleanup().await;
}
