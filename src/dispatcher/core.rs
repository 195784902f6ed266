use crate::error::{CancelReason, DispatchError};
use crate::ids::DispatchId;
use crate::interceptor::InterceptorSlot;
use crate::matcher::page_link_path;
use crate::registry::{
    HandlerResult, OperationEntry, OperationHandler, OperationKind, OperationRegistry,
};
use crate::request::{OperationId, OperationRequest, RequestExt};
use crate::responder::{
    PageEntry, PagerResponder, PollPhase, PollStep, PollerResponder, Responder,
};
use crate::runtime_config::RuntimeConfig;
use crate::synth::{self, absolute_link, SimResponse};
use crate::task::{run_cancellable, CancelToken, TaskError};
use crate::tracker::{Claim, Disposition, Tracker, TrackingKey};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

type HandlerFn<R> = dyn Fn(&OperationRequest) -> HandlerResult<R> + Send + Sync;

/// Header a caller may use to pin the dispatch id (must hold a ULID).
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Anything that can complete a simulated round trip.
pub trait Transport: Send + Sync {
    /// Complete one round trip.
    ///
    /// # Errors
    ///
    /// See [`DispatchError`].
    fn send(&self, request: http::Request<Vec<u8>>) -> Result<SimResponse, DispatchError>;
}

/// Dispatch counters.
#[derive(Debug, Default)]
pub struct DispatcherStats {
    /// Requests received
    pub dispatched_count: AtomicU64,
    /// Requests answered by the interceptor
    pub intercepted_count: AtomicU64,
    /// Handler invocations (tracked flows count once)
    pub handler_invocations: AtomicU64,
    /// Dispatches abandoned on cancellation or deadline
    pub canceled_count: AtomicU64,
    /// Dispatches that failed for any other reason
    pub failed_count: AtomicU64,
}

impl DispatcherStats {
    pub fn get_dispatched_count(&self) -> u64 {
        self.dispatched_count.load(Ordering::Relaxed)
    }

    pub fn get_intercepted_count(&self) -> u64 {
        self.intercepted_count.load(Ordering::Relaxed)
    }

    pub fn get_handler_invocations(&self) -> u64 {
        self.handler_invocations.load(Ordering::Relaxed)
    }

    pub fn get_canceled_count(&self) -> u64 {
        self.canceled_count.load(Ordering::Relaxed)
    }

    pub fn get_failed_count(&self) -> u64 {
        self.failed_count.load(Ordering::Relaxed)
    }
}

/// Progress of one long-running operation.
#[derive(Debug)]
pub struct PollerState {
    responder: PollerResponder,
    step: usize,
    phase: PollPhase,
}

impl PollerState {
    fn new(responder: PollerResponder) -> Self {
        Self {
            responder,
            step: 0,
            phase: PollPhase::InProgress,
        }
    }

    fn advance(&mut self) -> Option<PollStep> {
        let step = self.responder.next_step();
        self.step += 1;
        self.phase = step.as_ref().map_or(PollPhase::Failed, PollStep::phase);
        step
    }
}

/// Progress of one paged listing.
#[derive(Debug)]
pub struct PagerState {
    responder: PagerResponder,
    served: usize,
}

impl PagerState {
    fn advance(&mut self) -> (Option<PageEntry>, bool) {
        let entry = self.responder.next_entry();
        self.served += 1;
        let finished = match entry {
            Some(PageEntry::Page(_)) => !self.responder.more(),
            Some(PageEntry::Error(_)) | None => true,
        };
        (entry, finished)
    }
}

/// State stored in the tracker between calls of a multi-call protocol.
#[derive(Debug)]
pub enum TrackedFlow {
    /// Long-running operation
    Poller(PollerState),
    /// Paged listing
    Pager(PagerState),
}

struct DispatcherInner {
    name: Arc<str>,
    registry: OperationRegistry,
    tracker: Tracker<TrackedFlow>,
    interceptor: Option<InterceptorSlot>,
    config: RuntimeConfig,
    stats: DispatcherStats,
}

/// Fake server for one client: routes tagged requests to operation handlers.
///
/// Cloning yields another handle to the same server (same tracked flows,
/// same counters).
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

/// Builder for [`Dispatcher`].
pub struct DispatcherBuilder {
    name: Arc<str>,
    registry: OperationRegistry,
    interceptor: Option<InterceptorSlot>,
    config: Option<RuntimeConfig>,
}

impl DispatcherBuilder {
    /// Name used in logs and coroutine names.
    #[must_use]
    pub fn name(mut self, name: &str) -> Self {
        self.name = Arc::from(name);
        self
    }

    /// Consult `slot` before every dispatch.
    #[must_use]
    pub fn interceptor_slot(mut self, slot: InterceptorSlot) -> Self {
        self.interceptor = Some(slot);
        self
    }

    /// Consult the process-wide [`InterceptorSlot::global`].
    #[must_use]
    pub fn global_interceptor(self) -> Self {
        self.interceptor_slot(InterceptorSlot::global().clone())
    }

    /// Use `config` instead of reading the environment.
    #[must_use]
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Build the dispatcher.
    #[must_use]
    pub fn build(self) -> Dispatcher {
        let config = self.config.unwrap_or_else(RuntimeConfig::from_env);
        let operations = self.registry.operation_ids();
        info!(
            dispatcher = %self.name,
            operations_count = operations.len(),
            operations = ?operations,
            stack_size = config.stack_size,
            dispatch_timeout = ?config.dispatch_timeout,
            interceptor = self.interceptor.is_some(),
            "Operation table loaded"
        );
        Dispatcher {
            inner: Arc::new(DispatcherInner {
                name: self.name,
                registry: self.registry,
                tracker: Tracker::new(),
                interceptor: self.interceptor,
                config,
                stats: DispatcherStats::default(),
            }),
        }
    }
}

impl Dispatcher {
    /// Dispatcher over `registry` with configuration from the environment.
    #[must_use]
    pub fn new(registry: OperationRegistry) -> Self {
        Self::builder(registry).build()
    }

    /// Start building a dispatcher over `registry`.
    #[must_use]
    pub fn builder(registry: OperationRegistry) -> DispatcherBuilder {
        DispatcherBuilder {
            name: Arc::from("fake"),
            registry,
            interceptor: None,
            config: None,
        }
    }

    /// Name used in logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The operation table.
    #[must_use]
    pub fn registry(&self) -> &OperationRegistry {
        &self.inner.registry
    }

    /// Dispatch counters.
    #[must_use]
    pub fn stats(&self) -> &DispatcherStats {
        &self.inner.stats
    }

    /// Number of in-progress pollers and pagers.
    #[must_use]
    pub fn tracked_flows(&self) -> usize {
        self.inner.tracker.len()
    }

    /// Whether a flow is in progress for `operation` at `path`.
    #[must_use]
    pub fn is_tracking(&self, operation: &str, path: &str) -> bool {
        self.inner
            .tracker
            .contains(&TrackingKey::new(Arc::from(operation), path))
    }

    /// Complete one simulated round trip.
    ///
    /// The work runs on its own coroutine and races the request's
    /// [`CancelToken`] (or the configured default deadline). Losing the race
    /// returns [`DispatchError::Canceled`] immediately; the abandoned work
    /// finishes in the background and its result is dropped.
    ///
    /// # Errors
    ///
    /// See [`DispatchError`]. Only [`DispatchError::SimulatedBackend`] is an
    /// expected outcome.
    pub fn dispatch(&self, request: http::Request<Vec<u8>>) -> Result<SimResponse, DispatchError> {
        self.inner.stats.dispatched_count.fetch_add(1, Ordering::Relaxed);

        // D1: Operation context
        let Some(operation) = request.operation_id().cloned() else {
            self.inner.stats.failed_count.fetch_add(1, Ordering::Relaxed);
            error!(
                dispatcher = %self.inner.name,
                method = %request.method(),
                path = %request.uri().path(),
                "Request has no operation id - CRITICAL"
            );
            return Err(DispatchError::MissingOperationContext);
        };

        let dispatch_id = DispatchId::from_header_or_new(
            request
                .headers()
                .get(REQUEST_ID_HEADER)
                .and_then(|v| v.to_str().ok()),
        );
        let token = match request.cancel_token() {
            Some(token) => token.clone(),
            None => match self.inner.config.dispatch_timeout {
                Some(timeout) => CancelToken::with_timeout(timeout),
                None => CancelToken::new(),
            },
        };

        info!(
            dispatch_id = %dispatch_id,
            operation = %operation,
            method = %request.method(),
            path = %request.uri().path(),
            "Request dispatched"
        );

        let start = Instant::now();
        let inner = Arc::clone(&self.inner);
        let task_operation = operation.clone();
        let task_token = token.clone();
        let outcome = run_cancellable(
            &format!("{}-{}", self.inner.name, operation),
            &token,
            self.inner.config.stack_size,
            move || inner.dispatch_in_task(request, task_operation, dispatch_id, task_token),
        );

        let result = match outcome {
            Ok(result) => result,
            Err(TaskError::Canceled(reason)) => Err(DispatchError::Canceled {
                operation: Arc::clone(operation.as_arc()),
                reason,
            }),
            Err(TaskError::Panicked(message)) => Err(DispatchError::HandlerPanicked {
                operation: Arc::clone(operation.as_arc()),
                message,
            }),
            Err(TaskError::Spawn(reason)) => Err(DispatchError::TaskSpawn {
                operation: Arc::clone(operation.as_arc()),
                reason,
            }),
        };

        let latency_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(response) => info!(
                dispatch_id = %dispatch_id,
                operation = %operation,
                status = response.status().as_u16(),
                latency_ms = latency_ms,
                "Response synthesized"
            ),
            Err(DispatchError::Canceled { reason, .. }) => {
                self.inner.stats.canceled_count.fetch_add(1, Ordering::Relaxed);
                warn!(
                    dispatch_id = %dispatch_id,
                    operation = %operation,
                    reason = %reason,
                    deadline_exceeded = *reason == CancelReason::DeadlineExceeded,
                    latency_ms = latency_ms,
                    "Dispatch abandoned"
                );
            }
            Err(DispatchError::SimulatedBackend(failure)) => info!(
                dispatch_id = %dispatch_id,
                operation = %operation,
                status = failure.status,
                error_code = %failure.error_code,
                latency_ms = latency_ms,
                "Simulated backend error"
            ),
            Err(e) => {
                self.inner.stats.failed_count.fetch_add(1, Ordering::Relaxed);
                error!(
                    dispatch_id = %dispatch_id,
                    operation = %operation,
                    error = %e,
                    latency_ms = latency_ms,
                    "Dispatch failed"
                );
            }
        }
        result
    }
}

impl Transport for Dispatcher {
    fn send(&self, request: http::Request<Vec<u8>>) -> Result<SimResponse, DispatchError> {
        self.dispatch(request)
    }
}

fn not_implemented(operation: &OperationId, reason: &str) -> DispatchError {
    DispatchError::NotImplemented {
        operation: Arc::clone(operation.as_arc()),
        reason: reason.to_string(),
    }
}

fn encode_error(operation: &OperationId) -> impl FnOnce(String) -> DispatchError + '_ {
    move |reason| DispatchError::Encode {
        operation: Arc::clone(operation.as_arc()),
        reason,
    }
}

impl DispatcherInner {
    fn dispatch_in_task(
        &self,
        request: http::Request<Vec<u8>>,
        operation: OperationId,
        dispatch_id: DispatchId,
        token: CancelToken,
    ) -> Result<SimResponse, DispatchError> {
        // D2: Interceptor
        if let Some(outcome) = self
            .interceptor
            .as_ref()
            .and_then(|slot| slot.intercept(&request))
        {
            self.stats.intercepted_count.fetch_add(1, Ordering::Relaxed);
            info!(
                dispatch_id = %dispatch_id,
                operation = %operation,
                "Request answered by interceptor"
            );
            return outcome;
        }

        // D3: Operation lookup
        let Some(entry) = self.registry.get(operation.as_str()) else {
            let available = self.registry.operation_ids();
            warn!(
                operation = %operation,
                available_operations = ?available,
                "Operation not registered"
            );
            return Err(not_implemented(&operation, "no such operation is registered"));
        };
        let Some(handler) = entry.handler.clone() else {
            return Err(not_implemented(
                &operation,
                &format!("no handler set for method {}", request.method()),
            ));
        };

        let call = Call {
            inner: self,
            entry: entry.as_ref(),
            operation,
            dispatch_id,
            token,
            request,
        };
        match handler {
            OperationHandler::Single(handler) => call.single(&*handler),
            OperationHandler::Poller(handler) => call.poller(&*handler),
            OperationHandler::Pager(handler) => call.pager(&*handler),
        }
    }
}

/// One dispatch resolved to a registered operation.
struct Call<'a> {
    inner: &'a DispatcherInner,
    entry: &'a OperationEntry,
    operation: OperationId,
    dispatch_id: DispatchId,
    token: CancelToken,
    request: http::Request<Vec<u8>>,
}

impl Call<'_> {
    fn parse(&self) -> Result<OperationRequest, DispatchError> {
        if let Some(method) = &self.entry.method {
            if self.request.method() != method {
                return Err(DispatchError::MalformedRequest {
                    operation: Arc::clone(self.operation.as_arc()),
                    path: self.request.uri().path().to_string(),
                    reason: format!("expected method {method}, got {}", self.request.method()),
                });
            }
        }
        let parse = match self.entry.kind {
            OperationKind::SingleShot => OperationRequest::parse,
            OperationKind::Poller | OperationKind::Pager => OperationRequest::parse_tracked,
        };
        parse(
            self.dispatch_id,
            self.operation.clone(),
            &self.entry.template,
            &self.request,
            self.token.clone(),
        )
    }

    fn invoke<R>(
        &self,
        handler: &HandlerFn<R>,
    ) -> Result<R, DispatchError> {
        let op_request = self.parse()?;
        self.inner
            .stats
            .handler_invocations
            .fetch_add(1, Ordering::Relaxed);
        debug!(
            dispatch_id = %self.dispatch_id,
            operation = %self.operation,
            path_params = ?op_request.path_params,
            "Invoking handler"
        );
        handler(&op_request).map_err(DispatchError::from)
    }

    fn key(&self) -> TrackingKey {
        TrackingKey::new(Arc::clone(self.operation.as_arc()), self.request.uri().path())
    }

    fn canceled(&self, reason: CancelReason) -> DispatchError {
        DispatchError::Canceled {
            operation: Arc::clone(self.operation.as_arc()),
            reason,
        }
    }

    fn invalid(&self, reason: &str) -> DispatchError {
        DispatchError::InvalidResponder {
            operation: Arc::clone(self.operation.as_arc()),
            reason: reason.to_string(),
        }
    }

    /// Reject a status outside the contract and drop the flow it belongs to.
    fn check_tracked_status(&self, key: &TrackingKey, status: u16) -> Result<(), DispatchError> {
        self.entry.check_status(status).inspect_err(|_| {
            if self.inner.tracker.remove(key).is_some() {
                warn!(key = %key, status = status, "Tracked flow dropped on unexpected status");
            }
        })
    }

    fn single(
        self,
        handler: &HandlerFn<Responder>,
    ) -> Result<SimResponse, DispatchError> {
        let responder = self.invoke(handler)?;
        self.entry.check_status(responder.status)?;
        synth::synthesize_responder(&responder).map_err(encode_error(&self.operation))
    }

    /// Resolve the tracked flow for this call, creating it with `init` when
    /// nobody tracks the identity yet, then run one step of it.
    fn tracked<R>(
        &self,
        key: &TrackingKey,
        init: impl Fn() -> Result<TrackedFlow, DispatchError>,
        step: impl Fn(&mut TrackedFlow) -> (R, Disposition),
    ) -> Result<R, DispatchError> {
        loop {
            // An abandoned dispatch must not touch tracked state.
            if let Some(reason) = self.token.reason() {
                return Err(self.canceled(reason));
            }
            match self.inner.tracker.claim(key) {
                Claim::Tracked => {
                    if let Some(result) = self.inner.tracker.advance(key, &step) {
                        return Ok(result);
                    }
                    // Finished by a concurrent call between claim and advance.
                }
                Claim::Wait(waiter) => {
                    debug!(key = %key, "Waiting for concurrent flow registration");
                    waiter
                        .wait_or_cancel(&self.token)
                        .map_err(|reason| self.canceled(reason))?;
                }
                Claim::Reserved(mut reservation) => {
                    // Dropping the reservation on error releases the identity.
                    reservation.release_on_cancel(&self.token);
                    let flow = init()?;
                    if !reservation.fulfill(flow) {
                        debug!(key = %key, "Flow not published, claiming again");
                    }
                }
            }
        }
    }

    fn poller(
        self,
        handler: &HandlerFn<PollerResponder>,
    ) -> Result<SimResponse, DispatchError> {
        let key = self.key();
        let step = self.tracked(
            &key,
            || {
                let responder = self.invoke(handler)?;
                if !responder.has_terminal() {
                    return Err(self.invalid("poller responder has no terminal response"));
                }
                Ok(TrackedFlow::Poller(PollerState::new(responder)))
            },
            |flow| match flow {
                TrackedFlow::Poller(state) => {
                    let step = state.advance();
                    let disposition = if state.phase.is_terminal() {
                        Disposition::Remove
                    } else {
                        Disposition::Keep
                    };
                    debug!(
                        key = %key,
                        step = state.step,
                        phase = ?state.phase,
                        "Poller advanced"
                    );
                    (step, disposition)
                }
                TrackedFlow::Pager(_) => (None, Disposition::Remove),
            },
        )?;

        let encode = encode_error(&self.operation);
        match step {
            None => Err(self.invalid("poller has no more responses")),
            Some(PollStep::InProgress(status)) => {
                self.check_tracked_status(&key, status)?;
                synth::synthesize_in_progress(status, self.request.uri(), key.path()).map_err(encode)
            }
            Some(PollStep::TransientError(error)) | Some(PollStep::Failed(error)) => {
                Err(DispatchError::SimulatedBackend(error.into_failure()))
            }
            Some(PollStep::Succeeded(responder)) => {
                self.check_tracked_status(&key, responder.status)?;
                synth::synthesize_responder(&responder).map_err(encode)
            }
            Some(PollStep::Canceled(status)) => {
                self.check_tracked_status(&key, status)?;
                synth::synthesize_canceled(status).map_err(encode)
            }
        }
    }

    fn pager(
        self,
        handler: &HandlerFn<PagerResponder>,
    ) -> Result<SimResponse, DispatchError> {
        let key = self.key();
        let entry = self.tracked(
            &key,
            || {
                let mut responder = self.invoke(handler)?;
                if responder.is_empty() {
                    return Err(self.invalid("pager responder has no pages"));
                }
                responder.inject_next_links(&self.entry.next_link, |page| {
                    absolute_link(self.request.uri(), &page_link_path(key.path(), page))
                });
                Ok(TrackedFlow::Pager(PagerState {
                    responder,
                    served: 0,
                }))
            },
            |flow| match flow {
                TrackedFlow::Pager(state) => {
                    let (entry, finished) = state.advance();
                    debug!(
                        key = %key,
                        page = state.served,
                        remaining = state.responder.len(),
                        "Pager advanced"
                    );
                    let disposition = if finished {
                        Disposition::Remove
                    } else {
                        Disposition::Keep
                    };
                    (entry, disposition)
                }
                TrackedFlow::Poller(_) => (None, Disposition::Remove),
            },
        )?;

        match entry {
            None => Err(self.invalid("pager has no more pages")),
            Some(PageEntry::Page(responder)) => {
                self.check_tracked_status(&key, responder.status)?;
                synth::synthesize_responder(&responder).map_err(encode_error(&self.operation))
            }
            Some(PageEntry::Error(error)) => {
                Err(DispatchError::SimulatedBackend(error.into_failure()))
            }
        }
    }
}
