use crate::{
    configuration::{self, StubConfig, StubOption},
    error::Error,
};
use hyper::{HeaderMap, StatusCode};
use serde_json::Value;
use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError},
    time::Duration,
};
use tracing::{debug, info, warn};

/// Callback invoked once with the captured request body and headers when an
/// interaction is consumed.
pub type RequestCaptureFn = Arc<dyn Fn(&[u8], &HeaderMap) + Send + Sync>;

/// The request that consumed an interaction, as seen by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedRequest {
    pub body: Vec<u8>,
    pub headers: HeaderMap,
}

/// Serialization applied to the response payload by the transport layer.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ContentType {
    Json,
    Xml,
}

impl Default for ContentType {
    fn default() -> Self {
        ContentType::Json
    }
}

impl From<&str> for ContentType {
    /// Unrecognized values deliberately fall back to JSON rather than failing.
    fn from(value: &str) -> Self {
        if value.eq_ignore_ascii_case("xml") {
            ContentType::Xml
        } else {
            ContentType::Json
        }
    }
}

/// One stubbed request/response pairing for a method+path.
///
/// The response fields are fixed at registration time. The captured request
/// transitions from empty to populated exactly once, on consumption; that
/// cell is shared between the registry's stored record and every copy handed
/// out, so captures performed through a returned copy are visible to later
/// [`Interactions::interaction`] lookups.
#[derive(Clone)]
pub struct InteractionData {
    pub method: String,
    pub path: String,
    pub response_status: u16,
    pub response_body: Option<Value>,
    pub response_content_type: ContentType,
    pub delay_response: Duration,
    capture_fn: Option<RequestCaptureFn>,
    captured: Arc<OnceLock<CapturedRequest>>,
}

impl InteractionData {
    fn new(
        method: &str,
        path: &str,
        response_status: u16,
        response_body: Option<Value>,
        response_content_type: ContentType,
        capture_fn: Option<RequestCaptureFn>,
        config: StubConfig,
    ) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            response_status,
            response_body,
            response_content_type,
            delay_response: config.delay,
            capture_fn,
            captured: Arc::new(OnceLock::new()),
        }
    }

    /// Records the request that consumed this interaction and invokes the
    /// capture callback with exactly those values. Only the first call has
    /// any effect; later calls are no-ops.
    pub fn capture(&self, body: &[u8], headers: &HeaderMap) {
        let captured = CapturedRequest {
            body: body.to_vec(),
            headers: headers.clone(),
        };

        if self.captured.set(captured).is_ok() {
            if let (Some(capture_fn), Some(captured)) = (&self.capture_fn, self.captured.get()) {
                capture_fn(&captured.body, &captured.headers);
            }
        }
    }

    /// The captured request body/headers, if this interaction has been
    /// consumed and captured.
    pub fn captured_request(&self) -> Option<&CapturedRequest> {
        self.captured.get()
    }
}

impl fmt::Debug for InteractionData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InteractionData")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("response_status", &self.response_status)
            .field("response_body", &self.response_body)
            .field("response_content_type", &self.response_content_type)
            .field("delay_response", &self.delay_response)
            .field("has_capture_fn", &self.capture_fn.is_some())
            .field("captured", &self.captured.get())
            .finish()
    }
}

#[derive(Debug, Default)]
struct InteractionQueue {
    attempt: usize,
    request_responses: Vec<InteractionData>,
}

/// Thread-safe registry of stubbed interactions, keyed by method+path.
///
/// Interactions registered for a key are replayed once each, in registration
/// order. All operations serialize on a single lock across the whole table;
/// delays and capture callbacks run in the transport layer after the lock is
/// released.
#[derive(Debug, Default)]
pub struct Interactions {
    table: Mutex<HashMap<String, InteractionQueue>>,
}

impl Interactions {
    pub fn new() -> Self {
        debug!("created new interaction registry");
        Self::default()
    }

    /// Appends a stubbed response to the queue for method+path.
    ///
    /// Validation is eager: empty method/path, an out-of-range status code,
    /// and a bad option set all fail here rather than at dispatch time.
    pub fn add(
        &self,
        method: &str,
        path: &str,
        response_status: u16,
        response_body: Option<Value>,
        response_content_type: ContentType,
        capture_fn: Option<RequestCaptureFn>,
        options: &[StubOption],
    ) -> Result<(), Error> {
        if method.is_empty() {
            return Err(Error::EmptyMethod);
        }
        if path.is_empty() {
            return Err(Error::EmptyPath);
        }
        StatusCode::from_u16(response_status)
            .map_err(|_| Error::InvalidStatusCode(response_status))?;

        let config = configuration::resolve(options)?;
        let interaction = InteractionData::new(
            method,
            path,
            response_status,
            response_body,
            response_content_type,
            capture_fn,
            config,
        );

        info!(method, path, response_status, "adding mock interaction");

        let key = derive_key(method, path);
        let mut table = self.lock();
        table
            .entry(key)
            .or_insert_with(InteractionQueue::default)
            .request_responses
            .push(interaction);

        Ok(())
    }

    /// Hands out the next unconsumed interaction for method+path and advances
    /// the cursor, or `None` when the key is unknown or exhausted.
    ///
    /// The returned value is a detached copy; each registered interaction is
    /// delivered at most once, in registration order, even under concurrent
    /// calls.
    pub fn next_interaction(&self, method: &str, path: &str) -> Option<InteractionData> {
        let key = derive_key(method, path);
        let mut table = self.lock();

        match table.get_mut(&key) {
            Some(queue) if queue.attempt < queue.request_responses.len() => {
                let interaction = queue.request_responses[queue.attempt].clone();
                queue.attempt += 1;
                Some(interaction)
            }
            _ => {
                warn!(%key, "no mock interactions left for key");
                None
            }
        }
    }

    /// Read-only lookup of the interaction at a zero-based attempt index,
    /// without touching the cursor. Used for post-hoc assertions.
    pub fn interaction(&self, method: &str, path: &str, attempt: usize) -> Option<InteractionData> {
        let table = self.lock();
        table
            .get(&derive_key(method, path))
            .and_then(|queue| queue.request_responses.get(attempt))
            .cloned()
    }

    /// All interactions ever registered for method+path, consumed or not, in
    /// registration order.
    pub fn all_interactions(&self, method: &str, path: &str) -> Vec<InteractionData> {
        let table = self.lock();
        table
            .get(&derive_key(method, path))
            .map(|queue| queue.request_responses.clone())
            .unwrap_or_default()
    }

    /// Discards every queue and cursor, leaving an empty registry.
    pub fn reset(&self) {
        let mut table = self.lock();
        *table = HashMap::new();
    }

    // No operation leaves the table in a torn state mid-update, so a lock
    // poisoned by a panicking thread is still safe to recover.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, InteractionQueue>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn derive_key(method: &str, path: &str) -> String {
    format!("{}_{}", method, path)
}
