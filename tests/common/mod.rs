//! Shared fixtures: an in-memory app with a scripted provider and a
//! notifier that records what it was asked to send.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, Response},
};
use chrono::Utc;
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use crowdfunding_web_server::error::AppError;
use crowdfunding_web_server::models::payment::{NewPayment, Payment};
use crowdfunding_web_server::models::project::Project;
use crowdfunding_web_server::models::user::User;
use crowdfunding_web_server::provider::{
    Inquiry, Intention, IntentionRequest, PaymentProvider, ProviderTransaction,
};
use crowdfunding_web_server::routes;
use crowdfunding_web_server::services::notifier::{
    Dispatcher, Notification, Notifier, NotifyError,
};
use crowdfunding_web_server::services::polling_driver::PollingConfig;
use crowdfunding_web_server::services::webhook_driver::{CallbackPayload, sign_callback};
use crowdfunding_web_server::state::{AppState, ServiceSettings};
use crowdfunding_web_server::store::MemoryStore;

pub const HMAC_SECRET: &str = "test-hmac-secret";
pub const DONOR_TOKEN: &str = "donor-token";
pub const OTHER_TOKEN: &str = "other-token";

/// Provider whose inquiry answer can be changed mid-test.
pub struct FakeProvider {
    pub answer: Mutex<Inquiry>,
    pub inquiries: AtomicU32,
    pub intentions: Mutex<Vec<IntentionRequest>>,
    pub refuse_intentions: Mutex<bool>,
    next_order: AtomicU64,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            answer: Mutex::new(Inquiry::NotFound),
            inquiries: AtomicU32::new(0),
            intentions: Mutex::new(Vec::new()),
            refuse_intentions: Mutex::new(false),
            next_order: AtomicU64::new(5000),
        }
    }

    pub fn settle(&self, success: bool, amount_cents: i64) {
        *self.answer.lock().unwrap() = Inquiry::Transaction(ProviderTransaction {
            success,
            pending: false,
            amount_cents,
            currency: "EGP".to_string(),
            merchant_order_id: None,
        });
    }
}

#[async_trait]
impl PaymentProvider for FakeProvider {
    async fn authenticate(&self) -> Result<String, AppError> {
        Ok("fake-token".to_string())
    }

    async fn inquire(&self, _token: &str, _order_id: &str) -> Result<Inquiry, AppError> {
        self.inquiries.fetch_add(1, Ordering::SeqCst);
        Ok(self.answer.lock().unwrap().clone())
    }

    async fn create_intention(&self, request: &IntentionRequest) -> Result<Intention, AppError> {
        if *self.refuse_intentions.lock().unwrap() {
            return Err(AppError::Provider("intention returned 400".to_string()));
        }
        self.intentions.lock().unwrap().push(request.clone());
        let order = self.next_order.fetch_add(1, Ordering::SeqCst);
        Ok(Intention {
            order_id: order.to_string(),
            client_secret: format!("csk_{order}"),
        })
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn kinds(&self) -> Vec<&'static str> {
        self.sent.lock().unwrap().iter().map(|n| n.kind()).collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.kinds().into_iter().filter(|k| *k == kind).count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub provider: Arc<FakeProvider>,
    pub notifier: Arc<RecordingNotifier>,
    pub state: AppState,
    pub owner: User,
    pub donor: User,
    pub project: Project,
}

impl TestApp {
    /// One owner, one donor (`DONOR_TOKEN`), a second user (`OTHER_TOKEN`)
    /// and an active project with the given target.
    pub fn new(target_cents: i64) -> Self {
        let store = Arc::new(MemoryStore::new());
        let owner = store.add_user("owner", "owner@example.com");
        let donor = store.add_user("donor", "donor@example.com");
        let other = store.add_user("other", "other@example.com");
        store.issue_token(donor.id, DONOR_TOKEN);
        store.issue_token(other.id, OTHER_TOKEN);
        let project = store.add_project(
            owner.id,
            "School roof",
            target_cents,
            Utc::now() + chrono::Duration::days(30),
        );

        let provider = Arc::new(FakeProvider::new());
        let notifier = Arc::new(RecordingNotifier::default());

        let state = AppState::new(
            store.clone(),
            provider.clone(),
            Dispatcher::inline(notifier.clone()),
            ServiceSettings {
                hmac_secret: HMAC_SECRET.to_string(),
                currency: "EGP".to_string(),
                public_key: "egy_pk_test".to_string(),
                polling: PollingConfig {
                    max_attempts: 3,
                    retry_delay: Duration::from_millis(10),
                },
            },
        );

        Self {
            store,
            provider,
            notifier,
            state,
            owner,
            donor,
            project,
        }
    }

    pub fn router(&self) -> Router {
        routes::router(self.state.clone())
    }

    /// Open a pending payment for the donor directly through the ledger.
    pub async fn open_payment(&self, order_id: &str, amount_cents: i64) -> Payment {
        self.state
            .ledger
            .open_payment(NewPayment {
                id: Uuid::new_v4(),
                provider_order_id: order_id.to_string(),
                provider_payment_key: format!("csk_{order_id}"),
                amount_cents,
                currency: "EGP".to_string(),
                user_id: self.donor.id,
                project_id: self.project.id,
            })
            .await
            .unwrap()
    }

    pub async fn send(&self, request: Request<Body>) -> (u16, Value) {
        let response = self.router().oneshot(request).await.unwrap();
        read_json(response).await
    }
}

pub async fn read_json(response: Response<Body>) -> (u16, Value) {
    let status = response.status().as_u16();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

/// Callback body in the provider's `obj` shape, as the provider would send
/// it for `payment`.
pub fn callback_body(payment: &Payment, success: bool) -> Value {
    callback_body_with(
        &payment.provider_order_id,
        payment.id,
        success,
        payment.amount_cents,
    )
}

pub fn callback_body_with(
    order_id: &str,
    special_reference: Uuid,
    success: bool,
    amount_cents: i64,
) -> Value {
    json!({
        "type": "TRANSACTION",
        "obj": {
            "id": 192036465,
            "success": success,
            "pending": false,
            "amount_cents": amount_cents,
            "currency": "EGP",
            "special_reference": special_reference.to_string(),
            "order": { "id": order_id.parse::<i64>().unwrap_or(0) }
        }
    })
}

pub fn sign(body: &Value) -> String {
    sign_callback(HMAC_SECRET, &CallbackPayload::from_value(body))
}

pub fn callback_request(body: &Value, signature: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/v1/payments/paymob/callback")
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header("HMAC", signature);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn authed(method: &str, uri: &str, token: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {token}"))
        .header("content-type", "application/json");
    match body {
        Some(body) => builder.body(Body::from(body.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}
