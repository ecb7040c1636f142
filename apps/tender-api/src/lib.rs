//! # Tender API
//!
//! HTTP surface of the payment engine.
//!
//! ## Routes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           Tender API Routes                             │
//! │                                                                         │
//! │  POST /sales                       sale, any method (terminal: pending) │
//! │  GET  /payment/status/{id}         poll a pending terminal sale         │
//! │  POST /sales/charge-invoices       bulk charge one stored profile       │
//! │                                                                         │
//! │  POST /valor/payment               push an amount to a device           │
//! │  GET  /valor/status/{id}           persisted terminal session state     │
//! │  POST /valor/payment/{id}/cancel   cancel while pending                 │
//! │                                                                         │
//! │  GET  /orders?status=open          back-office order list               │
//! │  GET  /orders/{id}/payment-status  order + payment + terminal session   │
//! │  POST /orders/{id}/void            PAID → VOIDED                        │
//! │  POST /orders/{id}/refund          PAID → REFUNDED                      │
//! │                                                                         │
//! │  GET  /health                      database, open orders, conflicts     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

pub use config::{ApiConfig, ConfigError};
pub use error::{ApiError, ApiResult};
pub use state::AppState;

/// Builds the application router.
pub fn router(state: Arc<AppState>, body_limit_bytes: usize) -> Router {
    Router::new()
        // Sales
        .route("/sales", post(routes::sales::create_sale))
        .route("/sales/charge-invoices", post(routes::sales::charge_invoices))
        .route("/payment/status/{id}", get(routes::sales::payment_status))
        // Direct device payments
        .route("/valor/payment", post(routes::terminal::start_payment))
        .route("/valor/status/{id}", get(routes::terminal::payment_status))
        .route("/valor/payment/{id}/cancel", post(routes::terminal::cancel_payment))
        // Orders
        .route("/orders", get(routes::orders::list_orders))
        .route("/orders/{id}/payment-status", get(routes::orders::payment_status))
        .route("/orders/{id}/void", post(routes::orders::void_order))
        .route("/orders/{id}/refund", post(routes::orders::refund_order))
        .route("/health", get(routes::health::health))
        .layer(RequestBodyLimitLayer::new(body_limit_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use tender_db::{Database, DbConfig};
    use tender_payments::testing::{PollStep, Scripted, StubGateway, StubTerminal};
    use tender_payments::{PaymentOrchestrator, PaymentsConfig, ProviderClients};

    struct TestApp {
        app: Router,
        terminal: Arc<StubTerminal>,
    }

    async fn test_app(gateway: StubGateway, terminal: StubTerminal) -> TestApp {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let terminal = Arc::new(terminal);
        let clients = ProviderClients {
            gateway: Arc::new(gateway),
            terminal: terminal.clone(),
            accounting: None,
        };

        let mut config = PaymentsConfig::default();
        config.terminal.poll_interval_ms = 10;
        config.terminal.max_attempts = 500;

        let orchestrator = PaymentOrchestrator::from_clients(db, &clients, &config).unwrap();
        let app = router(Arc::new(AppState::new(orchestrator)), 64 * 1024);

        TestApp { app, terminal }
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    fn cash_sale(received: i64) -> Value {
        json!({
            "payment": { "method": "cash", "cashReceivedCents": received },
            "lineItems": [
                { "itemId": "SKU-1", "name": "Shop towels", "unitPriceCents": 1000 }
            ],
            "taxRateBps": 0,
            "laneId": "lane-1",
            "cashierId": "cashier-7"
        })
    }

    fn device_payment(amount: i64) -> Value {
        json!({
            "deviceId": "EPI-0001",
            "amountCents": amount,
            "laneId": "lane-1",
            "cashierId": "cashier-7"
        })
    }

    /// The session turns approved before the settlement lands; wait for both.
    async fn wait_until_settled(app: &Router, reference: &str) -> Value {
        for _ in 0..200 {
            let (status, body) = send(app, "GET", &format!("/valor/status/{}", reference), None).await;
            assert_eq!(status, StatusCode::OK);
            if body["approved"] == json!(true) && body["transactionId"].is_string() {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("terminal payment {} never settled", reference);
    }

    #[tokio::test]
    async fn test_health() {
        let t = test_app(StubGateway::approving(), StubTerminal::new()).await;

        let (status, body) = send(&t.app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["database"], json!(true));
        assert_eq!(body["openOrders"], json!(0));
    }

    #[tokio::test]
    async fn test_cash_sale_returns_change() {
        let t = test_app(StubGateway::approving(), StubTerminal::new()).await;

        let (status, body) = send(&t.app, "POST", "/sales", Some(cash_sale(2000))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], json!("completed"));
        assert_eq!(body["pending"], json!(false));
        assert_eq!(body["changeCents"], json!(1000));
    }

    #[tokio::test]
    async fn test_short_cash_is_validation_error() {
        let t = test_app(StubGateway::approving(), StubTerminal::new()).await;

        let (status, body) = send(&t.app, "POST", "/sales", Some(cash_sale(500))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], json!("validation_error"));
        assert_eq!(body["retrySafe"], json!(true));
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let t = test_app(StubGateway::approving(), StubTerminal::new()).await;

        let (status, body) = send(&t.app, "POST", "/sales", Some(json!({ "payment": "cash" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], json!("validation_error"));
    }

    #[tokio::test]
    async fn test_declined_card_is_payment_required() {
        let gateway = StubGateway::scripted(vec![Scripted::Decline("This transaction has been declined.")]);
        let t = test_app(gateway, StubTerminal::new()).await;

        let sale = json!({
            "payment": {
                "method": "card_manual",
                "number": "4111111111111111",
                "expiry": "12/30",
                "cvv": "123"
            },
            "lineItems": [
                { "itemId": "SKU-1", "name": "Shop towels", "unitPriceCents": 1000 }
            ],
            "taxRateBps": 0,
            "laneId": "lane-1",
            "cashierId": "cashier-7"
        });

        let (status, body) = send(&t.app, "POST", "/sales", Some(sale)).await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body["code"], json!("payment_declined"));
        assert_eq!(body["retrySafe"], json!(true));
    }

    #[tokio::test]
    async fn test_device_payment_settles_then_refunds() {
        let t = test_app(StubGateway::approving(), StubTerminal::with_statuses(vec![PollStep::Approve])).await;

        let (status, body) = send(&t.app, "POST", "/valor/payment", Some(device_payment(1000))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pending"], json!(true));
        let reference = body["transactionId"].as_str().unwrap().to_string();
        let order_id = body["orderId"].as_str().unwrap().to_string();

        let view = wait_until_settled(&t.app, &reference).await;
        assert_eq!(view["transactionId"], json!(format!("T-{}", reference)));

        let (status, body) = send(&t.app, "GET", &format!("/orders/{}/payment-status", order_id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["paid"], json!(true));

        // Partial amounts are refused before the provider is called.
        let (status, body) = send(
            &t.app,
            "POST",
            &format!("/orders/{}/refund", order_id),
            Some(json!({ "amountCents": 500 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], json!("validation_error"));
        assert_eq!(t.terminal.refund_count(), 0);

        let (status, body) = send(&t.app, "POST", &format!("/orders/{}/refund", order_id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], json!("refunded"));
        // Full settled amount, surcharge included.
        assert!(body["amount"].as_i64().unwrap() >= 1000);
        assert_eq!(t.terminal.refund_count(), 1);

        // Refunded orders accept nothing further.
        let (status, body) = send(&t.app, "POST", &format!("/orders/{}/void", order_id), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], json!("invalid_state"));
        assert_eq!(t.terminal.void_count(), 0);
    }

    #[tokio::test]
    async fn test_open_order_cannot_be_voided_or_refunded() {
        let t = test_app(StubGateway::approving(), StubTerminal::new()).await;

        let (_, body) = send(&t.app, "POST", "/valor/payment", Some(device_payment(1000))).await;
        let order_id = body["orderId"].as_str().unwrap().to_string();

        let (status, _) = send(&t.app, "POST", &format!("/orders/{}/void", order_id), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let (status, _) = send(&t.app, "POST", &format!("/orders/{}/refund", order_id), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        assert_eq!(t.terminal.void_count(), 0);
        assert_eq!(t.terminal.refund_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_only_while_pending() {
        let t = test_app(StubGateway::approving(), StubTerminal::new()).await;

        let (_, body) = send(&t.app, "POST", "/valor/payment", Some(device_payment(1000))).await;
        let reference = body["transactionId"].as_str().unwrap().to_string();

        let (status, body) = send(&t.app, "POST", &format!("/valor/payment/{}/cancel", reference), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["reference"], json!(reference));
        assert_eq!(t.terminal.cancels(), vec![reference.clone()]);

        let (status, _) = send(&t.app, "POST", &format!("/valor/payment/{}/cancel", reference), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_device_payment_requires_device_id() {
        let t = test_app(StubGateway::approving(), StubTerminal::new()).await;

        let mut request = device_payment(1000);
        request["deviceId"] = json!("  ");

        let (status, body) = send(&t.app, "POST", "/valor/payment", Some(request)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], json!("validation_error"));
        assert!(t.terminal.pushes().is_empty());
    }

    #[tokio::test]
    async fn test_list_orders_by_status() {
        let t = test_app(StubGateway::approving(), StubTerminal::new()).await;
        send(&t.app, "POST", "/valor/payment", Some(device_payment(1000))).await;

        let (status, body) = send(&t.app, "GET", "/orders?status=open", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);

        let (status, body) = send(&t.app, "GET", "/orders?status=paid", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.as_array().unwrap().is_empty());

        let (status, _) = send(&t.app, "GET", "/orders?status=lost", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_references_are_not_found() {
        let t = test_app(StubGateway::approving(), StubTerminal::new()).await;

        let (status, body) = send(&t.app, "GET", "/orders/ord-missing/payment-status", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], json!("not_found"));

        let (status, _) = send(&t.app, "GET", "/payment/status/ref-missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_charge_invoices() {
        let gateway = StubGateway::scripted(vec![Scripted::Approve, Scripted::Review]);
        let t = test_app(gateway, StubTerminal::new()).await;

        let request = json!({
            "customerRef": "CUST-42",
            "profile": { "customerProfileId": "900100", "paymentProfileId": "900200" },
            "documents": [
                { "documentType": "invoice", "documentId": "INV-000101", "amountCents": 5000 },
                { "documentType": "invoice", "documentId": "INV-000102", "amountCents": 7500 }
            ]
        });

        let (status, body) = send(&t.app, "POST", "/sales/charge-invoices", Some(request)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["summary"]["successful"], json!(1));
        assert_eq!(body["summary"]["failed"], json!(0));
        assert_eq!(body["summary"]["underReview"], json!(1));
    }

    #[tokio::test]
    async fn test_charge_invoices_rejects_empty_batch() {
        let t = test_app(StubGateway::approving(), StubTerminal::new()).await;

        let request = json!({
            "customerRef": "CUST-42",
            "profile": { "customerProfileId": "900100", "paymentProfileId": "900200" },
            "documents": []
        });

        let (status, _) = send(&t.app, "POST", "/sales/charge-invoices", Some(request)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
