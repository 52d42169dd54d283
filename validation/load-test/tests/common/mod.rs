//! Common test utilities for books-load-test integration tests
//!
//! Provides an in-process stub of the books API that:
//! - Binds an ephemeral port on 127.0.0.1
//! - Records every request it receives, in order
//! - Can be told to misbehave in specific ways

#![allow(dead_code)]

use axum::{
    extract::Path,
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use books_load_test::config::DEFAULT_FIXTURE_PATH;
use books_load_test::{FixtureStore, MetricsRegistry, RunConfig, RunDriver, WorkloadShape};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// How the stub responds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Behaves like a correct books API.
    Healthy,
    /// Every create returns 500.
    CreateFails,
    /// Creates return 201 with a body that has no `id`.
    CreateWithoutId,
    /// Deletes return 200 instead of 204.
    DeleteReturnsOk,
    /// Every third list call is bad: alternately a 500, then a 200 with a
    /// non-JSON content type.
    FlakyList,
}

pub struct StubState {
    behavior: Behavior,
    books: Mutex<HashMap<String, Value>>,
    next_id: AtomicU64,
    list_calls: AtomicU64,
    bad_responses: AtomicU64,
    requests: Mutex<Vec<(Method, String)>>,
}

impl StubState {
    fn record(&self, method: Method, path: String) {
        self.requests.lock().push((method, path));
    }
}

pub struct StubServer {
    pub base_url: String,
    pub state: Arc<StubState>,
    handle: JoinHandle<()>,
}

impl StubServer {
    pub async fn start(behavior: Behavior) -> Self {
        let state = Arc::new(StubState {
            behavior,
            books: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            list_calls: AtomicU64::new(0),
            bad_responses: AtomicU64::new(0),
            requests: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/books", post(create_book).get(list_books))
            .route("/books/:id", get(show_book).delete(delete_book))
            .layer(Extension(state.clone()));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            state,
            handle,
        }
    }

    /// Requests received so far as `(METHOD, path)`.
    pub fn requests(&self) -> Vec<(String, String)> {
        self.state
            .requests
            .lock()
            .iter()
            .map(|(m, p)| (m.to_string(), p.clone()))
            .collect()
    }

    /// Responses the stub deliberately got wrong.
    pub fn bad_responses(&self) -> u64 {
        self.state.bad_responses.load(Ordering::SeqCst)
    }

    pub fn stored_books(&self) -> usize {
        self.state.books.lock().len()
    }

    /// Run configuration for `flow` against this stub, with pacing disabled.
    pub fn config(&self, flow: &str) -> RunConfig {
        RunConfig {
            base_url: self.base_url.clone(),
            flow: Some(flow.to_string()),
            no_pacing: true,
            request_timeout_secs: 5,
            ..Default::default()
        }
    }

    pub fn driver(&self, flow: &str, shape: &WorkloadShape) -> (RunDriver, Arc<MetricsRegistry>) {
        self.driver_with(&self.config(flow), shape)
    }

    pub fn driver_with(
        &self,
        config: &RunConfig,
        shape: &WorkloadShape,
    ) -> (RunDriver, Arc<MetricsRegistry>) {
        let metrics = Arc::new(MetricsRegistry::new());
        let fixtures = Arc::new(FixtureStore::new(DEFAULT_FIXTURE_PATH));
        let driver = RunDriver::new(config, shape, fixtures, metrics.clone()).unwrap();
        (driver, metrics)
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// One VU, one iteration.
pub fn single_iteration() -> WorkloadShape {
    WorkloadShape::FixedIterations {
        vus: 1,
        iterations: 1,
        per_vu: false,
    }
}

async fn create_book(
    Extension(state): Extension<Arc<StubState>>,
    Json(mut book): Json<Value>,
) -> Response {
    state.record(Method::POST, "/books".to_string());

    match state.behavior {
        Behavior::CreateFails => {
            state.bad_responses.fetch_add(1, Ordering::SeqCst);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "database unavailable" })),
            )
                .into_response()
        }
        Behavior::CreateWithoutId => {
            state.bad_responses.fetch_add(1, Ordering::SeqCst);
            (StatusCode::CREATED, Json(book)).into_response()
        }
        _ => {
            let id = state.next_id.fetch_add(1, Ordering::SeqCst).to_string();
            book["id"] = json!(id);
            state.books.lock().insert(id.clone(), book.clone());
            (StatusCode::CREATED, Json(book)).into_response()
        }
    }
}

async fn list_books(Extension(state): Extension<Arc<StubState>>) -> Response {
    state.record(Method::GET, "/books".to_string());

    if state.behavior == Behavior::FlakyList {
        let call = state.list_calls.fetch_add(1, Ordering::SeqCst);
        if call % 6 == 0 {
            state.bad_responses.fetch_add(1, Ordering::SeqCst);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
        if call % 3 == 0 {
            state.bad_responses.fetch_add(1, Ordering::SeqCst);
            return ([(header::CONTENT_TYPE, "text/plain")], "[]").into_response();
        }
    }

    let books: Vec<Value> = state.books.lock().values().cloned().collect();
    Json(books).into_response()
}

async fn show_book(
    Extension(state): Extension<Arc<StubState>>,
    Path(id): Path<String>,
) -> Response {
    state.record(Method::GET, format!("/books/{}", id));

    match state.books.lock().get(&id) {
        Some(book) => Json(book.clone()).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({ "error": "not found" }))).into_response(),
    }
}

async fn delete_book(
    Extension(state): Extension<Arc<StubState>>,
    Path(id): Path<String>,
) -> Response {
    state.record(Method::DELETE, format!("/books/{}", id));

    if state.books.lock().remove(&id).is_none() {
        return StatusCode::NOT_FOUND.into_response();
    }
    match state.behavior {
        Behavior::DeleteReturnsOk => (StatusCode::OK, Json(json!({ "deleted": id }))).into_response(),
        _ => StatusCode::NO_CONTENT.into_response(),
    }
}
