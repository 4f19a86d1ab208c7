//! Per-request and per-connection session context.
//!
//! One [`RequestContext`] is created for every HTTP request (which may
//! batch several operations) and for every operation on a persistent
//! connection. It resolves the caller's identity once, owns the request
//! span, and keeps every operation in the session acting under a single
//! access key.
//!
//! Lifecycle: `Created -> Active -> Finishing -> Finished`. The context
//! becomes `Active` on the first authorization or log call; only
//! [`RequestContext::finish`] moves it on from there. A transport close
//! fires [`RequestContext::closed`] without changing the state.

pub mod carrier;
pub mod events;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use qserver_core::{AccessArgs, AccessRights, ClockSource, QError, QLog, RegistryMap, SystemClock};

use crate::auth::Auth;
use crate::config::QConfig;
use crate::stats::QStats;
use crate::tracer::{QTracer, Span, SpanContext, Tracer, REQUEST_SPAN_NAME};

use self::carrier::TransportCarrier;
use self::events::RequestEvents;

/// Shared collaborators referenced by every context.
#[derive(Clone)]
pub struct RequestServices {
    pub config: Arc<QConfig>,
    pub auth: Arc<Auth>,
    pub tracer: Tracer,
    pub stats: QStats,
    pub clock: Arc<dyn ClockSource>,
    pub listeners: Arc<RegistryMap<ListenerEntry>>,
    pub log: QLog,
}

impl std::fmt::Debug for RequestServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestServices")
            .field("auth", &self.auth)
            .field("tracer", &self.tracer)
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

impl RequestServices {
    #[must_use]
    pub fn new(config: QConfig, auth: Auth, tracer: Tracer) -> Self {
        let stats = QStats::new(&config.stats);
        Self {
            config: Arc::new(config),
            auth: Arc::new(auth),
            tracer,
            stats,
            clock: Arc::new(SystemClock),
            listeners: Arc::new(RegistryMap::new("listeners")),
            log: QLog::new("server"),
        }
    }

    /// Builds the authorization client and tracer described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built or a reporting
    /// tracer is configured outside a tokio runtime.
    pub fn from_config(config: QConfig) -> anyhow::Result<Self> {
        let auth = Auth::new(config.authorization.clone())?;
        let tracer = QTracer::create(&config.jaeger)?;
        Ok(Self::new(config, auth, tracer))
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn ClockSource>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_stats(mut self, stats: QStats) -> Self {
        self.stats = stats;
        self
    }
}

/// A long-lived listener registered through a context.
#[derive(Debug, Clone)]
pub struct ListenerEntry {
    pub name: String,
    pub request_id: Uuid,
    pub token: CancellationToken,
}

/// One entry of the request timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    /// Milliseconds since the context was created.
    pub time: u64,
    pub event_name: String,
    #[serde(rename = "additionalInfo", skip_serializing_if = "Option::is_none")]
    pub additional_info: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Created,
    Active,
    Finishing,
    Finished,
}

/// Credentials bound to the session so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyBinding {
    pub used_access_key: Option<String>,
    pub used_mam_access_key: Option<String>,
    pub multiple_access_keys_detected: bool,
}

impl KeyBinding {
    /// Compares `candidate` with the bound key without binding it.
    fn check(&mut self, candidate: Option<&str>) -> Result<Option<String>, QError> {
        let Some(candidate) = candidate.filter(|k| !k.is_empty()) else {
            return Ok(self.used_access_key.clone());
        };
        if let Some(used) = &self.used_access_key {
            if used != candidate {
                self.multiple_access_keys_detected = true;
                return Err(QError::multiple_access_keys());
            }
        }
        Ok(Some(candidate.to_string()))
    }
}

/// Session state of one request or connection operation.
pub struct RequestContext {
    services: RequestServices,
    id: Uuid,
    start: u64,
    remote_address: String,
    access_key: Option<String>,
    parent_span: Option<SpanContext>,
    request_span: Span,
    events: RequestEvents,
    log_entries: Mutex<Vec<LogEntry>>,
    keys: Mutex<KeyBinding>,
    listener_ids: Mutex<Vec<u64>>,
    state: ArcSwap<ContextState>,
    finish_started: AtomicBool,
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("id", &self.id)
            .field("remote_address", &self.remote_address)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl RequestContext {
    /// Creates the context for one unit of transport work.
    ///
    /// Extracts the credential and parent trace context from `carrier`,
    /// opens the request span, and subscribes to the transport close signal
    /// when a tokio runtime is available.
    #[must_use]
    pub fn new(services: RequestServices, carrier: &TransportCarrier) -> Arc<Self> {
        let start = services.clock.now();
        let access_key = Auth::extract_access_key(carrier);
        let parent_span = QTracer::extract_parent_span(&services.tracer, carrier);
        let request_span = services.tracer.start_span(REQUEST_SPAN_NAME, parent_span.clone());
        QTracer::attach_common_tags(&services.tracer, &request_span);
        request_span.log_event("request_body", json!({ "body": carrier.body() }));

        let context = Arc::new(Self {
            id: Uuid::new_v4(),
            start,
            remote_address: carrier.remote_address(),
            access_key,
            parent_span,
            request_span,
            events: RequestEvents::new(),
            log_entries: Mutex::new(Vec::new()),
            keys: Mutex::new(KeyBinding::default()),
            listener_ids: Mutex::new(Vec::new()),
            state: ArcSwap::from_pointee(ContextState::Created),
            finish_started: AtomicBool::new(false),
            services,
        });

        if let Some(close) = carrier.close_signal() {
            context.watch_transport_close(close);
        }
        context.log("Context_create", Some(&start.to_string()));
        context
    }

    fn watch_transport_close(self: &Arc<Self>, close: CancellationToken) {
        if tokio::runtime::Handle::try_current().is_err() {
            debug!(id = %self.id, "no runtime, transport close is not observed");
            return;
        }
        let context = Arc::downgrade(self);
        let finished = self.events.finished();
        tokio::spawn(async move {
            tokio::select! {
                () = close.cancelled() => {
                    if let Some(context) = context.upgrade() {
                        context.emit_close();
                    }
                }
                () = finished.cancelled() => {}
            }
        });
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Creation time in clock milliseconds.
    #[must_use]
    pub fn start(&self) -> u64 {
        self.start
    }

    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        self.services.clock.now().saturating_sub(self.start)
    }

    #[must_use]
    pub fn services(&self) -> &RequestServices {
        &self.services
    }

    #[must_use]
    pub fn remote_address(&self) -> &str {
        &self.remote_address
    }

    /// Credential presented at the transport level.
    #[must_use]
    pub fn access_key(&self) -> Option<&str> {
        self.access_key.as_deref()
    }

    #[must_use]
    pub fn parent_span(&self) -> Option<SpanContext> {
        self.parent_span.clone()
    }

    #[must_use]
    pub fn request_span(&self) -> &Span {
        &self.request_span
    }

    #[must_use]
    pub fn state(&self) -> ContextState {
        **self.state.load()
    }

    #[must_use]
    pub fn key_binding(&self) -> KeyBinding {
        self.keys.lock().clone()
    }

    #[must_use]
    pub fn multiple_access_keys_detected(&self) -> bool {
        self.keys.lock().multiple_access_keys_detected
    }

    fn activate(&self) {
        let current = self.state.load();
        if **current == ContextState::Created {
            self.state
                .compare_and_swap(&*current, Arc::new(ContextState::Active));
        }
    }

    /// Authorizes an operation through the remote service.
    ///
    /// The transport credential wins over one supplied in `args`; either
    /// way it is bound to the session first.
    ///
    /// # Errors
    ///
    /// `MultipleAccessKeys` when it differs from the bound key,
    /// `Unauthorized` when access is denied, or the remote failure.
    pub async fn require_granted_access(&self, args: &AccessArgs) -> Result<AccessRights, QError> {
        self.activate();
        let access_key = self
            .access_key
            .clone()
            .or_else(|| args.key().map(str::to_string));
        self.check_used_access_key(access_key.as_deref())?;
        self.services
            .auth
            .require_granted_access(access_key.as_deref())
            .await
    }

    /// Binds `candidate` as the session key, or checks it against the key
    /// already bound. An empty candidate returns the bound key unchanged.
    ///
    /// # Errors
    ///
    /// `MultipleAccessKeys` when a different key is already bound.
    pub fn check_used_access_key(&self, candidate: Option<&str>) -> Result<Option<String>, QError> {
        let mut keys = self.keys.lock();
        let already_detected = keys.multiple_access_keys_detected;
        match keys.check(candidate) {
            Ok(used) => {
                keys.used_access_key.clone_from(&used);
                Ok(used)
            }
            Err(err) => {
                drop(keys);
                if !already_detected {
                    self.log("Multiple_access_keys", None);
                    warn!(id = %self.id, "multiple access keys in one session");
                }
                Err(err)
            }
        }
    }

    /// Authorizes a management operation against the static allow-set.
    ///
    /// # Errors
    ///
    /// `MultipleAccessKeys` when the key differs from the session key,
    /// `Unauthorized` when it is missing or not allow-listed.
    pub fn mam_access_required(&self, args: &AccessArgs) -> Result<(), QError> {
        self.activate();
        let access_key = args.key();
        {
            let mut keys = self.keys.lock();
            keys.used_mam_access_key = keys.check(access_key)?;
        }
        match access_key {
            Some(key) if self.services.auth.is_mam_access_key(key) => Ok(()),
            _ => Err(Auth::unauthorized_error()),
        }
    }

    /// Fails if more than one key was presented during the session.
    ///
    /// # Errors
    ///
    /// `MultipleAccessKeys`.
    pub fn ensure_single_access_key(&self) -> Result<(), QError> {
        if self.multiple_access_keys_detected() {
            return Err(QError::multiple_access_keys());
        }
        Ok(())
    }

    /// Appends a timeline entry and logs it onto the request span.
    pub fn log(&self, event_name: &str, additional_info: Option<&str>) {
        if self.state() == ContextState::Created && event_name != "Context_create" {
            self.activate();
        }
        let entry = LogEntry {
            time: self.elapsed_ms(),
            event_name: event_name.to_string(),
            additional_info: additional_info.map(str::to_string),
        };
        if let Ok(fields) = serde_json::to_value(&entry) {
            self.request_span.log_event(&entry.event_name, fields);
        }
        self.log_entries.lock().push(entry);
    }

    #[must_use]
    pub fn log_entries(&self) -> Vec<LogEntry> {
        self.log_entries.lock().clone()
    }

    /// Token cancelled when the transport closes.
    #[must_use]
    pub fn closed(&self) -> CancellationToken {
        self.events.closed()
    }

    /// Token cancelled when the context finishes.
    #[must_use]
    pub fn finished(&self) -> CancellationToken {
        self.events.finished()
    }

    pub fn on_close(&self, f: impl FnOnce() + Send + 'static) -> bool {
        self.events.on_close(f)
    }

    pub fn on_finish(&self, f: impl FnOnce() + Send + 'static) -> bool {
        self.events.on_finish(f)
    }

    /// Signals a transport-level disconnect. In-flight operations continue.
    pub fn emit_close(&self) -> bool {
        let emitted = self.events.emit_close();
        if emitted {
            self.log("Context_close", None);
        }
        emitted
    }

    /// Registers a long-lived listener owned by this context.
    ///
    /// The returned token is cancelled when the listener is removed or the
    /// context finishes. Returns `None` once the context is finishing.
    #[must_use]
    pub fn add_listener(&self, name: &str) -> Option<(u64, CancellationToken)> {
        let mut ids = self.listener_ids.lock();
        if self.finish_started.load(Ordering::Acquire) {
            return None;
        }
        let token = self.events.finished().child_token();
        let id = self.services.listeners.add(ListenerEntry {
            name: name.to_string(),
            request_id: self.id,
            token: token.clone(),
        });
        ids.push(id);
        Some((id, token))
    }

    /// Removes a listener registered through this context.
    pub fn remove_listener(&self, id: u64) -> bool {
        let mut ids = self.listener_ids.lock();
        let Some(pos) = ids.iter().position(|i| *i == id) else {
            return false;
        };
        ids.swap_remove(pos);
        drop(ids);
        if let Some(entry) = self.services.listeners.remove(id) {
            entry.token.cancel();
        }
        true
    }

    fn release_listeners(&self) {
        let ids = std::mem::take(&mut *self.listener_ids.lock());
        for id in ids {
            if let Some(entry) = self.services.listeners.remove(id) {
                entry.token.cancel();
            }
        }
    }

    /// Finishes the request span. Later calls are no-ops.
    pub fn on_request_finishing(&self) -> bool {
        self.request_span.finish()
    }

    /// Ends the context: fires `finish`, detaches all listeners, releases
    /// registered listeners and finishes the request span.
    ///
    /// Returns `false` if the context was already finished.
    pub fn finish(&self) -> bool {
        {
            let _ids = self.listener_ids.lock();
            if self.finish_started.swap(true, Ordering::AcqRel) {
                return false;
            }
        }
        self.state.store(Arc::new(ContextState::Finishing));
        self.release_listeners();
        self.events.emit_finish();
        self.on_request_finishing();
        self.state.store(Arc::new(ContextState::Finished));
        debug!(id = %self.id, elapsed_ms = self.elapsed_ms(), "request context finished");
        true
    }
}

impl Drop for RequestContext {
    fn drop(&mut self) {
        if !self.finish_started.load(Ordering::Acquire) {
            self.finish();
        }
    }
}
