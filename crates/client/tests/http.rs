// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end tests against a mock portal backend on a loopback port.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;

use portal_client::{
    ApiClient, ClientConfig, ClientError, CredentialPair, CredentialStore, FileCredentialStore,
    MemoryCredentialStore, PendingCall, SessionEvent, SessionObserver,
};

/// Scriptable stand-in for the portal API.
struct Backend {
    valid_access: Mutex<String>,
    valid_refresh: Mutex<String>,
    refresh_calls: AtomicUsize,
    refresh_ok: AtomicBool,
    rotate: AtomicBool,
    /// The refresh endpoint holds its response until this many 401s were sent.
    hold_until_unauthorized: AtomicUsize,
    unauthorized: AtomicUsize,
    seen_auth: Mutex<Vec<Option<String>>>,
    logout_bodies: Mutex<Vec<String>>,
}

impl Backend {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            valid_access: Mutex::new("access-0".to_owned()),
            valid_refresh: Mutex::new("refresh-1".to_owned()),
            refresh_calls: AtomicUsize::new(0),
            refresh_ok: AtomicBool::new(true),
            rotate: AtomicBool::new(false),
            hold_until_unauthorized: AtomicUsize::new(0),
            unauthorized: AtomicUsize::new(0),
            seen_auth: Mutex::new(vec![]),
            logout_bodies: Mutex::new(vec![]),
        })
    }

    fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    fn seen_with(&self, token: &str) -> usize {
        let expected = format!("Bearer {token}");
        self.seen_auth.lock().iter().filter(|h| h.as_deref() == Some(expected.as_str())).count()
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let auth = bearer(headers);
        self.seen_auth.lock().push(auth.clone());
        let ok = auth.as_deref() == Some(format!("Bearer {}", self.valid_access.lock()).as_str());
        if !ok {
            self.unauthorized.fetch_add(1, Ordering::SeqCst);
        }
        ok
    }
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()).map(str::to_owned)
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "detail": "Given token not valid for any token type" })))
        .into_response()
}

fn profile() -> serde_json::Value {
    json!({
        "id": 3,
        "email": "teacher@school.test",
        "phone": "+70000000000",
        "student_full_name": null,
        "parent_full_name": null,
        "role": "TEACHER",
        "is_staff": false,
        "is_superuser": false
    })
}

async fn protected(State(b): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    if !b.authorized(&headers) {
        return unauthorized();
    }
    Json(json!({ "lessons": [1, 2, 3] })).into_response()
}

async fn public(State(b): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    b.seen_auth.lock().push(bearer(&headers));
    Json(json!({ "news": [] })).into_response()
}

async fn always_unauthorized(State(b): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    b.seen_auth.lock().push(bearer(&headers));
    unauthorized()
}

async fn me(State(b): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    if !b.authorized(&headers) {
        return unauthorized();
    }
    Json(profile()).into_response()
}

#[derive(Deserialize)]
struct RefreshBody {
    refresh: String,
}

async fn refresh(State(b): State<Arc<Backend>>, Json(body): Json<RefreshBody>) -> Response {
    let n = b.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;

    let hold = b.hold_until_unauthorized.load(Ordering::SeqCst);
    if hold > 0 {
        let _ = tokio::time::timeout(Duration::from_secs(2), async {
            while b.unauthorized.load(Ordering::SeqCst) < hold {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        // Let the last 401s reach their callers before settling.
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    if !b.refresh_ok.load(Ordering::SeqCst) || body.refresh != *b.valid_refresh.lock() {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "detail": "Token is invalid or expired" })))
            .into_response();
    }

    let access = format!("access-{n}");
    *b.valid_access.lock() = access.clone();
    if b.rotate.load(Ordering::SeqCst) {
        let rotated = format!("refresh-{}", n + 1);
        *b.valid_refresh.lock() = rotated.clone();
        Json(json!({ "access": access, "refresh": rotated })).into_response()
    } else {
        Json(json!({ "access": access })).into_response()
    }
}

async fn edit_lesson(
    State(b): State<Arc<Backend>>,
    Path(id): Path<u32>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Response {
    if !b.authorized(&headers) {
        return unauthorized();
    }
    Json(json!({ "id": id, "lesson": body })).into_response()
}

async fn delete_lesson(State(b): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    if !b.authorized(&headers) {
        return unauthorized();
    }
    StatusCode::NO_CONTENT.into_response()
}

#[derive(Deserialize)]
struct LoginBody {
    email: String,
    password: String,
}

async fn login(State(b): State<Arc<Backend>>, Json(body): Json<LoginBody>) -> Response {
    if body.email != "teacher@school.test" || body.password != "pw" {
        return (StatusCode::BAD_REQUEST, Json(json!({ "detail": "Invalid credentials" })))
            .into_response();
    }
    *b.valid_access.lock() = "access-login".to_owned();
    *b.valid_refresh.lock() = "refresh-1".to_owned();
    Json(json!({
        "user": profile(),
        "tokens": { "access": "access-login", "refresh": "refresh-1" }
    }))
    .into_response()
}

async fn logout(State(b): State<Arc<Backend>>, Json(body): Json<RefreshBody>) -> StatusCode {
    b.logout_bodies.lock().push(body.refresh);
    StatusCode::RESET_CONTENT
}

async fn serve(backend: Arc<Backend>) -> anyhow::Result<String> {
    let app = Router::new()
        .route("/api/protected/", get(protected))
        .route("/api/public/", get(public))
        .route("/api/always-401/", get(always_unauthorized))
        .route("/api/token/refresh/", post(refresh))
        .route("/api/auth/login/", post(login))
        .route("/api/auth/me/", get(me))
        .route("/api/auth/logout/", post(logout))
        .route("/api/lessons/{id}/", put(edit_lesson).patch(edit_lesson).delete(delete_lesson))
        .with_state(backend);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("http://{addr}/api"))
}

/// Observer parked on a dashboard that counts navigation signals.
#[derive(Default)]
struct Dashboard {
    navigations: AtomicUsize,
}

impl SessionObserver for Dashboard {
    fn current_location(&self) -> Option<String> {
        Some("/teacher".to_owned())
    }

    fn on_terminated(&self, _target: &str) {
        self.navigations.fetch_add(1, Ordering::SeqCst);
    }
}

struct Fixture {
    backend: Arc<Backend>,
    api: Arc<ApiClient>,
    store: Arc<MemoryCredentialStore>,
    observer: Arc<Dashboard>,
}

async fn fixture(pair: CredentialPair) -> anyhow::Result<Fixture> {
    let backend = Backend::new();
    let base = serve(Arc::clone(&backend)).await?;
    let store = Arc::new(MemoryCredentialStore::with_pair(pair));
    let observer = Arc::new(Dashboard::default());
    let api = ApiClient::builder(ClientConfig::for_api(base))
        .store(store.clone())
        .observer(observer.clone())
        .build()?;
    Ok(Fixture { backend, api, store, observer })
}

/// Store whose pair is replaced right after the first read, as if another
/// task refreshed the credential while a request was in flight.
struct ReplacedAfterRead {
    pair: Mutex<CredentialPair>,
    next: Mutex<Option<CredentialPair>>,
}

impl CredentialStore for ReplacedAfterRead {
    fn get(&self) -> CredentialPair {
        let current = self.pair.lock().clone();
        if let Some(next) = self.next.lock().take() {
            *self.pair.lock() = next;
        }
        current
    }

    fn set(&self, pair: &CredentialPair) -> Result<(), ClientError> {
        *self.pair.lock() = pair.clone();
        Ok(())
    }

    fn clear(&self) -> Result<(), ClientError> {
        *self.pair.lock() = CredentialPair::default();
        Ok(())
    }
}

fn stale() -> CredentialPair {
    CredentialPair::new("stale", Some("refresh-1".into()))
}

async fn fire(api: &Arc<ApiClient>, path: &str, n: usize) -> anyhow::Result<Vec<Result<serde_json::Value, ClientError>>> {
    let mut handles = Vec::with_capacity(n);
    for _ in 0..n {
        let api = Arc::clone(api);
        let path = path.to_owned();
        handles.push(tokio::spawn(async move { api.get_json::<serde_json::Value>(&path).await }));
    }
    let mut out = Vec::with_capacity(n);
    for h in handles {
        out.push(h.await?);
    }
    Ok(out)
}

#[tokio::test]
async fn concurrent_401s_trigger_one_refresh() -> anyhow::Result<()> {
    let f = fixture(stale()).await?;
    f.backend.hold_until_unauthorized.store(10, Ordering::SeqCst);
    let mut events = f.api.subscribe();

    let results = fire(&f.api, "/protected/", 10).await?;
    for r in &results {
        assert_eq!(r.as_ref().ok().map(|v| v["lessons"][0].clone()), Some(json!(1)));
    }

    assert_eq!(f.backend.refresh_calls(), 1);
    assert_eq!(f.backend.seen_with("stale"), 10);
    assert_eq!(f.backend.seen_with("access-1"), 10);
    assert_eq!(f.store.get().access.as_deref(), Some("access-1"));
    assert_eq!(f.store.get().refresh.as_deref(), Some("refresh-1"));
    assert_eq!(events.recv().await?, SessionEvent::Refreshed);
    assert_eq!(f.observer.navigations.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn rejected_refresh_fails_every_caller_and_ends_session() -> anyhow::Result<()> {
    let f = fixture(stale()).await?;
    f.backend.refresh_ok.store(false, Ordering::SeqCst);
    f.backend.hold_until_unauthorized.store(5, Ordering::SeqCst);

    let results = fire(&f.api, "/protected/", 5).await?;
    for r in results {
        assert!(matches!(r, Err(ClientError::RefreshRejected(_))), "got {r:?}");
    }

    assert_eq!(f.backend.refresh_calls(), 1);
    assert!(f.store.get().is_empty());
    assert_eq!(f.observer.navigations.load(Ordering::SeqCst), 1);
    assert!(!f.api.is_authenticated());
    Ok(())
}

#[tokio::test]
async fn replay_is_attempted_at_most_once() -> anyhow::Result<()> {
    let f = fixture(stale()).await?;

    let err = f.api.get_json::<serde_json::Value>("/always-401/").await.err();
    assert_eq!(err, Some(ClientError::RetryExhausted));
    assert_eq!(f.backend.refresh_calls(), 1);
    assert_eq!(*f.backend.seen_auth.lock(), vec![
        Some("Bearer stale".to_owned()),
        Some("Bearer access-1".to_owned()),
    ]);
    // The refresh itself succeeded, so the session survives.
    assert_eq!(f.store.get().access.as_deref(), Some("access-1"));
    assert_eq!(f.observer.navigations.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn anonymous_calls_carry_no_authorization() -> anyhow::Result<()> {
    let f = fixture(CredentialPair::default()).await?;

    let news: serde_json::Value = f.api.get_json("/public/").await?;
    assert_eq!(news["news"], json!([]));
    assert_eq!(*f.backend.seen_auth.lock(), vec![None]);
    Ok(())
}

#[tokio::test]
async fn missing_refresh_credential_skips_the_refresh_call() -> anyhow::Result<()> {
    let f = fixture(CredentialPair::new("stale", None)).await?;

    let err = f.api.get_json::<serde_json::Value>("/protected/").await.err();
    assert_eq!(err, Some(ClientError::RefreshUnavailable));
    assert_eq!(f.backend.refresh_calls(), 0);
    assert!(f.store.get().is_empty());
    assert_eq!(f.observer.navigations.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn other_errors_pass_through_without_refresh() -> anyhow::Result<()> {
    let f = fixture(stale()).await?;

    let err = f.api.get_json::<serde_json::Value>("/no-such-route/").await.err();
    assert!(matches!(err, Some(ClientError::Status { status: 404, .. })), "got {err:?}");
    assert_eq!(f.backend.refresh_calls(), 0);
    assert_eq!(f.store.get(), stale());
    Ok(())
}

#[tokio::test]
async fn login_me_logout_round() -> anyhow::Result<()> {
    let f = fixture(CredentialPair::default()).await?;

    let payload = f.api.login(" Teacher@School.test ", "pw").await?;
    assert_eq!(payload.user.landing_route(), "teacher-dashboard");
    assert_eq!(f.store.get(), CredentialPair::new("access-login", Some("refresh-1".into())));

    let me = f.api.me().await?;
    assert_eq!(me.email, "teacher@school.test");

    f.api.logout().await?;
    assert!(f.store.get().is_empty());
    assert_eq!(*f.backend.logout_bodies.lock(), vec!["refresh-1".to_owned()]);
    Ok(())
}

#[tokio::test]
async fn bad_login_is_a_status_error_and_stores_nothing() -> anyhow::Result<()> {
    let f = fixture(CredentialPair::default()).await?;

    let err = f.api.login("teacher@school.test", "wrong").await.err();
    assert!(matches!(err, Some(ClientError::Status { status: 400, .. })), "got {err:?}");
    assert!(f.store.get().is_empty());
    assert_eq!(f.backend.refresh_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn rotated_refresh_credential_survives_restart() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let backend = Backend::new();
    backend.rotate.store(true, Ordering::SeqCst);
    let base = serve(Arc::clone(&backend)).await?;

    let mut config = ClientConfig::for_api(base);
    config.state_dir = Some(dir.path().to_path_buf());
    let path = config.credential_path();
    FileCredentialStore::open(path.clone()).set(&stale())?;

    let api = ApiClient::builder(config).build()?;
    let _: serde_json::Value = api.get_json("/protected/").await?;

    let reopened = FileCredentialStore::open(path.clone()).get();
    assert_eq!(reopened, CredentialPair::new("access-1", Some("refresh-2".into())));
    Ok(())
}

#[tokio::test]
async fn refresh_endpoint_401_is_surfaced_without_refreshing() -> anyhow::Result<()> {
    let f = fixture(stale()).await?;

    let call = PendingCall::post("/token/refresh/").with_body(json!({ "refresh": "forged" }));
    let err = f.api.execute(call).await.err();
    assert_eq!(err, Some(ClientError::AuthExpired));

    // Only the call above reached the endpoint; the coordinator stayed out of it.
    assert_eq!(f.backend.refresh_calls(), 1);
    assert_eq!(f.api.coordinator().refresh_attempts(), 0);
    assert_eq!(f.store.get(), stale());
    assert_eq!(f.observer.navigations.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn transport_errors_are_surfaced_immediately() -> anyhow::Result<()> {
    let store = Arc::new(MemoryCredentialStore::with_pair(stale()));
    let observer = Arc::new(Dashboard::default());
    let api = ApiClient::builder(ClientConfig::for_api("http://127.0.0.1:1/api"))
        .store(store.clone())
        .observer(observer.clone())
        .build()?;

    let err = api.get_json::<serde_json::Value>("/protected/").await.err();
    assert!(matches!(err, Some(ClientError::Transport(_))), "got {err:?}");
    assert_eq!(api.coordinator().refresh_attempts(), 0);
    assert!(!api.coordinator().is_refreshing());
    assert_eq!(store.get(), stale());
    assert_eq!(observer.navigations.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn put_patch_and_delete_recover_like_any_call() -> anyhow::Result<()> {
    let f = fixture(stale()).await?;

    let lesson = json!({ "topic": "Fractions", "room": 12 });
    let put: serde_json::Value = f.api.put_json("/lessons/4/", &lesson).await?;
    assert_eq!(put, json!({ "id": 4, "lesson": lesson }));
    assert_eq!(f.backend.refresh_calls(), 1);
    // The replay carried the original body.
    assert_eq!(f.backend.seen_with("access-1"), 1);

    let patch: serde_json::Value = f.api.patch_json("/lessons/4/", &json!({ "room": 14 })).await?;
    assert_eq!(patch["lesson"]["room"], 14);

    f.api.delete("/lessons/4/").await?;
    assert_eq!(f.backend.refresh_calls(), 1);
    assert_eq!(f.backend.seen_with("access-1"), 3);
    Ok(())
}

#[tokio::test]
async fn late_401_replays_with_the_replaced_credential() -> anyhow::Result<()> {
    let backend = Backend::new();
    let base = serve(Arc::clone(&backend)).await?;
    let store = Arc::new(ReplacedAfterRead {
        pair: Mutex::new(stale()),
        next: Mutex::new(Some(CredentialPair::new("access-0", Some("refresh-1".into())))),
    });
    let api = ApiClient::builder(ClientConfig::for_api(base)).store(store).build()?;

    let lessons: serde_json::Value = api.get_json("/protected/").await?;
    assert_eq!(lessons["lessons"], json!([1, 2, 3]));
    assert_eq!(backend.refresh_calls(), 0);
    assert_eq!(api.coordinator().refresh_attempts(), 0);
    assert_eq!(*backend.seen_auth.lock(), vec![
        Some("Bearer stale".to_owned()),
        Some("Bearer access-0".to_owned()),
    ]);
    Ok(())
}
