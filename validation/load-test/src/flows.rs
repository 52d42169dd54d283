//! HTTP request flows against the books API.
//!
//! A flow is an ordered list of steps. Each step issues one request, records
//! its latency, and bumps the step's error counter when an expectation
//! fails. Steps that need a book id are skipped when the create step did not
//! produce one.

use crate::error::{HarnessError, HarnessResult};
use crate::fixtures::FixtureStore;
use crate::metrics::MetricsRegistry;
use crate::payload::BookPayload;
use reqwest::{header, Client, RequestBuilder, Url};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// A single request kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Create,
    List,
    Get,
    Delete,
}

impl Step {
    /// Latency distribution this step records into.
    pub fn trend_name(&self) -> &'static str {
        match self {
            Step::Create => "CreateBook",
            Step::List => "ListBooks",
            Step::Get => "ShowBook",
            Step::Delete => "DeleteBook",
        }
    }

    /// Counter incremented when this step's expectations fail.
    pub fn error_counter(&self) -> &'static str {
        match self {
            Step::Create => "CreateBookErrors",
            Step::List => "ListBooksErrors",
            Step::Get => "ShowBookErrors",
            Step::Delete => "DeleteBookErrors",
        }
    }

    /// Whether the step needs an id produced by an earlier create.
    pub fn needs_id(&self) -> bool {
        matches!(self, Step::Get | Step::Delete)
    }

    fn accepts_status(&self, status: u16) -> bool {
        match self {
            Step::Create => status == 201,
            Step::List | Step::Get => status == 200,
            // Both are treated as a successful delete.
            Step::Delete => status == 204 || status == 200,
        }
    }

    fn expects_json(&self) -> bool {
        !matches!(self, Step::Delete)
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Create => "create",
            Step::List => "list",
            Step::Get => "get",
            Step::Delete => "delete",
        };
        write!(f, "{}", name)
    }
}

/// Result of a single HTTP request.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub step: Step,
    pub url: String,
    /// HTTP status, or 0 when the request never got a response.
    pub status: u16,
    pub latency: Duration,
    pub json_content_type: bool,
    /// Identifier returned by a create.
    pub id: Option<String>,
    pub error: Option<String>,
}

impl StepResult {
    fn transport_failure(step: Step, url: String, latency: Duration, error: String) -> Self {
        Self {
            step,
            url,
            status: 0,
            latency,
            json_content_type: false,
            id: None,
            error: Some(error),
        }
    }

    /// Why the step's expectations failed, or `None` if they held.
    pub fn failure(&self) -> Option<String> {
        if let Some(err) = &self.error {
            return Some(format!("request failed: {}", err));
        }
        if !self.step.accepts_status(self.status) {
            return Some(format!("unexpected status {}", self.status));
        }
        if self.step.expects_json() && !self.json_content_type {
            return Some("content-type is not application/json".to_string());
        }
        if self.step == Step::Create && self.id.is_none() {
            return Some("response has no id".to_string());
        }
        None
    }

    pub fn passed(&self) -> bool {
        self.failure().is_none()
    }

    /// Counts toward `http_req_failed`: no response, or an error status.
    pub fn http_failed(&self) -> bool {
        self.error.is_some() || self.status >= 400
    }
}

/// Thin client for the books collection.
#[derive(Debug, Clone)]
pub struct BooksClient {
    client: Client,
    collection: Url,
}

impl BooksClient {
    /// Create a client for `{base_url}/books`.
    pub fn new(base_url: &str, timeout: Duration, max_idle_per_host: usize) -> HarnessResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(max_idle_per_host)
            .build()?;

        let invalid = |message: String| HarnessError::InvalidBaseUrl {
            url: base_url.to_string(),
            message,
        };
        let collection = Url::parse(&format!("{}/books", base_url.trim_end_matches('/')))
            .map_err(|e| invalid(e.to_string()))?;
        if collection.cannot_be_a_base() {
            return Err(invalid("URL cannot carry a path".to_string()));
        }

        Ok(Self { client, collection })
    }

    pub fn collection_url(&self) -> &str {
        self.collection.as_str()
    }

    /// `{collection}/{id}` with the id percent-encoded as one path segment.
    fn book_url(&self, id: &str) -> String {
        let mut url = self.collection.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(id);
        }
        url.into()
    }

    /// POST a new book.
    pub async fn create(&self, payload: &BookPayload) -> StepResult {
        let url = self.collection_url().to_string();
        let request = self.client.post(&url).json(payload);
        self.execute(Step::Create, url, request).await
    }

    /// GET the collection.
    pub async fn list(&self) -> StepResult {
        let url = self.collection_url().to_string();
        let request = self.client.get(&url);
        self.execute(Step::List, url, request).await
    }

    /// GET one book.
    pub async fn get(&self, id: &str) -> StepResult {
        let url = self.book_url(id);
        let request = self.client.get(&url);
        self.execute(Step::Get, url, request).await
    }

    /// DELETE one book.
    pub async fn delete(&self, id: &str) -> StepResult {
        let url = self.book_url(id);
        let request = self
            .client
            .delete(&url)
            .header(header::CONTENT_TYPE, "application/json");
        self.execute(Step::Delete, url, request).await
    }

    async fn execute(&self, step: Step, url: String, request: RequestBuilder) -> StepResult {
        let start = Instant::now();

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                return StepResult::transport_failure(step, url, start.elapsed(), e.to_string())
            }
        };

        let status = response.status().as_u16();
        let json_content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(is_json_media_type)
            .unwrap_or(false);

        // Read the full body so latency covers the whole response.
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                return StepResult::transport_failure(step, url, start.elapsed(), e.to_string())
            }
        };
        let latency = start.elapsed();

        let id = if step == Step::Create {
            extract_id(&body)
        } else {
            None
        };

        StepResult {
            step,
            url,
            status,
            latency,
            json_content_type,
            id,
            error: None,
        }
    }
}

/// `application/json`, ignoring case and parameters such as charset.
fn is_json_media_type(value: &str) -> bool {
    value
        .split(';')
        .next()
        .map(|media| media.trim().eq_ignore_ascii_case("application/json"))
        .unwrap_or(false)
}

/// The `id` field of a create response, as a string.
fn extract_id(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    match value.get("id")? {
        // "." and ".." would address the collection or its parent.
        serde_json::Value::String(s) if !matches!(s.trim(), "" | "." | "..") => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// A named sequence of steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flow {
    Create,
    List,
    CreateGet,
    CreateDelete,
    CreateGetDelete,
}

impl Flow {
    pub const ALL: [Flow; 5] = [
        Flow::Create,
        Flow::List,
        Flow::CreateGet,
        Flow::CreateDelete,
        Flow::CreateGetDelete,
    ];

    /// Look up a flow by its name or a script-style alias.
    pub fn from_name(name: &str) -> Option<Flow> {
        match name.trim().to_lowercase().as_str() {
            "create" | "create-book" => Some(Flow::Create),
            "list" | "get-books" => Some(Flow::List),
            "create-get" | "create-get-book" => Some(Flow::CreateGet),
            "create-delete" | "create-delete-book" => Some(Flow::CreateDelete),
            "create-get-delete" | "create-get-delete-book" | "flow" => Some(Flow::CreateGetDelete),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Flow::Create => "create",
            Flow::List => "list",
            Flow::CreateGet => "create-get",
            Flow::CreateDelete => "create-delete",
            Flow::CreateGetDelete => "create-get-delete",
        }
    }

    pub fn steps(&self) -> &'static [Step] {
        match self {
            Flow::Create => &[Step::Create],
            Flow::List => &[Step::List],
            Flow::CreateGet => &[Step::Create, Step::Get],
            Flow::CreateDelete => &[Step::Create, Step::Delete],
            Flow::CreateGetDelete => &[Step::Create, Step::Get, Step::Delete],
        }
    }

    /// Register this flow's counters and distributions so they appear in
    /// results even when they stay at zero.
    pub fn register_metrics(&self, metrics: &MetricsRegistry) {
        for step in self.steps() {
            metrics.register_counter(step.error_counter());
            metrics.register_trend(step.trend_name());
        }
    }

    /// Execute every step in order.
    pub async fn run(
        &self,
        client: &BooksClient,
        fixtures: &FixtureStore,
        metrics: &MetricsRegistry,
    ) -> FlowOutcome {
        let mut outcome = FlowOutcome::new(*self);
        let mut book_id: Option<String> = None;

        for &step in self.steps() {
            let result = match step {
                Step::Create => {
                    let payload = fixtures.sample().and_then(BookPayload::build);
                    match payload {
                        Ok(payload) => client.create(&payload).await,
                        Err(e) => {
                            warn!(error = %e, "Could not build create payload");
                            metrics.add(step.error_counter(), 1);
                            outcome.skipped.push(step);
                            continue;
                        }
                    }
                }
                Step::List => client.list().await,
                Step::Get | Step::Delete => {
                    let Some(id) = book_id.as_deref() else {
                        debug!(flow = self.name(), step = %step, "Skipping step without a book id");
                        outcome.skipped.push(step);
                        continue;
                    };
                    if step == Step::Get {
                        client.get(id).await
                    } else {
                        client.delete(id).await
                    }
                }
            };

            let passed = record(metrics, &result);
            if step == Step::Create {
                book_id = if passed { result.id.clone() } else { None };
            }
            outcome.results.push(result);
        }

        outcome
    }
}

impl FromStr for Flow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Flow::from_name(s).ok_or_else(|| format!("unknown flow '{}'", s))
    }
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Record a step's latency and outcome; returns whether it passed.
fn record(metrics: &MetricsRegistry, result: &StepResult) -> bool {
    metrics.observe(result.step.trend_name(), result.latency);
    metrics.record_request(result.latency, result.http_failed());

    match result.failure() {
        None => {
            debug!(
                step = %result.step,
                status = result.status,
                latency_ms = result.latency.as_secs_f64() * 1000.0,
                "Step passed"
            );
            true
        }
        Some(reason) => {
            metrics.add(result.step.error_counter(), 1);
            warn!(
                step = %result.step,
                url = %result.url,
                status = result.status,
                reason = %reason,
                "Step failed"
            );
            false
        }
    }
}

/// What one flow invocation did.
#[derive(Debug, Clone)]
pub struct FlowOutcome {
    pub flow: Flow,
    pub results: Vec<StepResult>,
    pub skipped: Vec<Step>,
}

impl FlowOutcome {
    fn new(flow: Flow) -> Self {
        Self {
            flow,
            results: Vec::new(),
            skipped: Vec::new(),
        }
    }

    /// Steps that issued a request, in order.
    pub fn issued(&self) -> Vec<Step> {
        self.results.iter().map(|r| r.step).collect()
    }

    /// Whether every issued step passed and nothing was skipped.
    pub fn passed(&self) -> bool {
        self.skipped.is_empty() && self.results.iter().all(StepResult::passed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(step: Step, status: u16, json: bool, id: Option<&str>) -> StepResult {
        StepResult {
            step,
            url: "http://localhost/books".to_string(),
            status,
            latency: Duration::from_millis(3),
            json_content_type: json,
            id: id.map(str::to_string),
            error: None,
        }
    }

    #[test]
    fn test_flow_names() {
        assert_eq!(Flow::from_name("flow"), Some(Flow::CreateGetDelete));
        assert_eq!(Flow::from_name("get-books"), Some(Flow::List));
        assert_eq!(Flow::from_name("Create-Delete-Book"), Some(Flow::CreateDelete));
        assert_eq!(Flow::from_name(""), None);
        assert_eq!(Flow::from_name("update"), None);

        for flow in Flow::ALL {
            assert_eq!(flow.name().parse::<Flow>().unwrap(), flow);
        }
    }

    #[test]
    fn test_flow_steps() {
        assert_eq!(
            Flow::CreateGetDelete.steps(),
            &[Step::Create, Step::Get, Step::Delete]
        );
        assert!(Flow::CreateDelete.steps().iter().skip(1).all(Step::needs_id));
    }

    #[test]
    fn test_create_expectations() {
        assert!(result(Step::Create, 201, true, Some("abc")).passed());
        assert!(!result(Step::Create, 200, true, Some("abc")).passed());
        assert!(!result(Step::Create, 201, false, Some("abc")).passed());
        assert_eq!(
            result(Step::Create, 201, true, None).failure().as_deref(),
            Some("response has no id")
        );
    }

    #[test]
    fn test_delete_accepts_200_and_204() {
        assert!(result(Step::Delete, 204, false, None).passed());
        assert!(result(Step::Delete, 200, true, None).passed());
        assert!(!result(Step::Delete, 404, true, None).passed());
    }

    #[test]
    fn test_transport_failure() {
        let r = StepResult::transport_failure(
            Step::List,
            "http://localhost/books".to_string(),
            Duration::from_millis(1),
            "connection refused".to_string(),
        );
        assert!(!r.passed());
        assert!(r.http_failed());
    }

    #[test]
    fn test_json_media_type() {
        assert!(is_json_media_type("application/json"));
        assert!(is_json_media_type("application/json; charset=utf-8"));
        assert!(is_json_media_type("Application/JSON"));
        assert!(!is_json_media_type("text/plain"));
        assert!(!is_json_media_type("application/jsonx"));
    }

    #[test]
    fn test_extract_id() {
        assert_eq!(extract_id(br#"{"id": "b-1"}"#).as_deref(), Some("b-1"));
        assert_eq!(extract_id(br#"{"id": 42}"#).as_deref(), Some("42"));
        assert_eq!(extract_id(br#"{"id": ""}"#), None);
        assert_eq!(extract_id(br#"{"title": "Code"}"#), None);
        assert_eq!(extract_id(b"not json"), None);
        assert_eq!(extract_id(br#"{"id": ".."}"#), None);
        assert_eq!(extract_id(br#"{"id": "."}"#), None);
    }

    #[test]
    fn test_book_url_encodes_id() {
        let client = BooksClient::new("http://localhost:3000/", Duration::from_secs(1), 1).unwrap();
        assert_eq!(client.collection_url(), "http://localhost:3000/books");
        assert_eq!(client.book_url("b-1"), "http://localhost:3000/books/b-1");
        assert_eq!(
            client.book_url("a/b?c#d"),
            "http://localhost:3000/books/a%2Fb%3Fc%23d"
        );
        assert_eq!(
            client.book_url("war and peace"),
            "http://localhost:3000/books/war%20and%20peace"
        );

        let nested = BooksClient::new("http://localhost:3000/api/v1", Duration::from_secs(1), 1).unwrap();
        assert_eq!(nested.book_url("7"), "http://localhost:3000/api/v1/books/7");
    }

    #[test]
    fn test_client_rejects_unparseable_base_url() {
        let err = BooksClient::new("not a url", Duration::from_secs(1), 1).unwrap_err();
        assert!(matches!(err, HarnessError::InvalidBaseUrl { .. }));
    }

    #[test]
    fn test_record_counts_failures() {
        let metrics = MetricsRegistry::new();
        assert!(record(&metrics, &result(Step::List, 200, true, None)));
        assert!(!record(&metrics, &result(Step::List, 500, true, None)));

        assert_eq!(metrics.counter("ListBooksErrors"), Some(1));
        assert_eq!(metrics.counter(crate::metrics::HTTP_REQ_FAILED), Some(1));
        assert_eq!(metrics.trend("ListBooks").unwrap().count, 2);
    }
}
