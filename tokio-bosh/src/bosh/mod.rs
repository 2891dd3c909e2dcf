//! BOSH transport: one logical XMPP stream over a sequence of HTTP requests

use log::{debug, error, info, warn};
use minidom::Element;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tokio_stream::wrappers::UnboundedReceiverStream;

mod body;
mod connector;
mod settings;

use self::body::{parse_response, Body};
#[cfg(test)]
pub(crate) use self::connector::mock::MockConnector;
pub use self::connector::{ConnectorError, HttpConnector, HttpResponse, ReqwestConnector};
pub use self::settings::{ConnectionSettings, StreamSettings, Timings};
use crate::connection::XmppConnection;
use crate::event::{ConnectionState, HandlerError, Listeners};
use crate::{ns, Error};

/// XMPP stream over BOSH
///
/// Cloning yields another handle to the same connection. Every operation returns without
/// waiting for I/O; HTTP exchanges and timers run as tasks on the current tokio runtime, so
/// `connect()`, `send()` and `resume()` must be called from within one.
pub struct BoshTransport<C: HttpConnector> {
    shared: Arc<Shared<C>>,
}

impl<C: HttpConnector> Clone for BoshTransport<C> {
    fn clone(&self) -> Self {
        BoshTransport {
            shared: self.shared.clone(),
        }
    }
}

struct Shared<C> {
    connector: C,
    state: Mutex<State>,
    received: Listeners<Element>,
    sent: Listeners<Element>,
    responses: Listeners<Element>,
    states: Listeners<ConnectionState>,
}

#[derive(Default)]
struct State {
    settings: Option<ConnectionSettings>,
    timings: Timings,
    stream: Option<StreamSettings>,
    active: bool,
    pending: Option<Body>,
    active_requests: usize,
    /// Consecutive errors over all requests; only reset by `connect()`.
    errors: u32,
    /// Serialized requests being resent; no new body goes out while non-empty.
    retrying: HashSet<String>,
    /// Received stanzas being dispatched; sends are batched meanwhile.
    collecting: usize,
    heartbeat: bool,
}

impl State {
    fn pending_body(&mut self) -> &mut Body {
        let State {
            pending, stream, ..
        } = self;
        pending.get_or_insert_with(|| match stream.as_mut() {
            Some(stream) => {
                let rid = stream.next_rid();
                Body::new(Some(rid), stream.sid.as_deref())
            }
            None => Body::new(None, None),
        })
    }

    fn may_send(&self) -> bool {
        let max_requests = self.settings.as_ref().map_or(0, |s| s.max_requests);
        self.collecting == 0
            && self.active
            && self.active_requests < max_requests
            && self.retrying.is_empty()
    }
}

impl<C: HttpConnector> BoshTransport<C> {
    /// Creates an inactive transport sending its requests through `connector`.
    pub fn new(connector: C) -> Self {
        BoshTransport {
            shared: Arc::new(Shared {
                connector,
                state: Mutex::new(State::default()),
                received: Listeners::default(),
                sent: Listeners::default(),
                responses: Listeners::default(),
                states: Listeners::default(),
            }),
        }
    }

    /// Overrides the timer tunables.
    pub fn with_timings(self, timings: Timings) -> Self {
        self.lock().timings = timings;
        self
    }

    /// Installs the settings used by the next `connect()`.
    pub fn set_settings(&self, settings: ConnectionSettings) {
        self.lock().settings = Some(settings);
    }

    /// Current settings, if any were set.
    pub fn settings(&self) -> Option<ConnectionSettings> {
        self.lock().settings.clone()
    }

    /// Starts a new session, unless one is already active.
    pub fn connect(&self) -> Result<(), Error> {
        let heartbeat = {
            let mut state = self.lock();
            let settings = state.settings.clone().ok_or(Error::NoSettings)?;
            state.errors = 0;
            state.retrying.clear();
            if state.active {
                return Ok(());
            }
            info!(
                "Connecting to {} through {}",
                settings.host_name, settings.http_base
            );
            state.active = true;
            let mut stream = StreamSettings::new();
            let rid = stream.next_rid();
            state.stream = Some(stream);
            state.active_requests = 0;
            if let Some(dropped) = state.pending.take() {
                if !dropped.children().is_empty() {
                    warn!(
                        "Dropping {} stanzas queued before connect",
                        dropped.children().len()
                    );
                }
            }
            state.pending = Some(Body::session_creation(&settings, rid));
            self.flush_locked(&mut state, false);
            self.heartbeat_period(&mut state)
        };
        if let Some(period) = heartbeat {
            self.start_heartbeat(period);
        }
        Ok(())
    }

    /// Ends the session with a `terminate` body, dropping anything not yet sent.
    pub fn disconnect(&self) {
        let mut notices = Vec::new();
        {
            let mut state = self.lock();
            self.disconnect_locked(&mut state, &mut notices);
        }
        self.notify(notices);
    }

    /// Queues a stanza and sends it as soon as the flush policy allows.
    pub fn send(&self, stanza: Element) {
        {
            let mut state = self.lock();
            state.pending_body().push(stanza.clone());
            self.flush_locked(&mut state, false);
        }
        self.shared.sent.emit(&stanza);
    }

    /// Sends the pending body if the flush policy allows.
    pub fn flush(&self) {
        let mut state = self.lock();
        self.flush_locked(&mut state, false);
    }

    /// Asks the server to keep the session for `maxpause` seconds without requests.
    ///
    /// Returns the state to hand to `resume()`, or `None` when there is no session or the
    /// server did not allow pausing.
    pub fn pause(&self) -> Option<StreamSettings> {
        let mut state = self.lock();
        let max_pause = match state.stream.as_ref() {
            Some(StreamSettings {
                sid: Some(_),
                max_pause,
                ..
            }) => *max_pause,
            _ => return None,
        };
        let max_pause = match max_pause {
            Some(max_pause) => max_pause,
            None => {
                warn!("Server did not advertise maxpause, not pausing");
                return None;
            }
        };
        state.pending_body().set_attr("pause", max_pause.to_string());
        self.flush_locked(&mut state, true);
        state.stream.clone()
    }

    /// Resumes a session saved by `pause()`.
    pub fn resume(&self, settings: StreamSettings) -> bool {
        let (active, heartbeat) = {
            let mut state = self.lock();
            state.active = true;
            state.stream = Some(settings);
            self.continue_connection(&mut state);
            (state.active, self.heartbeat_period(&mut state))
        };
        if let Some(period) = heartbeat {
            self.start_heartbeat(period);
        }
        active
    }

    /// Marks the pending body as an XMPP stream restart; call `flush()` to send it.
    pub fn restart_stream(&self) {
        let mut state = self.lock();
        let host_name = state
            .settings
            .as_ref()
            .map(|settings| settings.host_name.clone())
            .unwrap_or_default();
        let body = state.pending_body();
        body.set_attr("xmlns:xmpp", ns::XBOSH);
        body.set_attr("xmpp:restart", "true");
        body.set_attr("to", host_name);
        body.set_attr("xml:lang", "en");
    }

    /// Whether a session is active.
    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    /// Whether stream state exists.
    pub fn is_connected(&self) -> bool {
        self.lock().stream.is_some()
    }

    /// Whether requests are being retried.
    pub fn has_errors(&self) -> bool {
        !self.lock().retrying.is_empty()
    }

    /// Current stream state.
    pub fn stream_settings(&self) -> Option<StreamSettings> {
        self.lock().stream.clone()
    }

    /// Registers a handler called with every stanza passed to `send()`.
    pub fn on_stanza_sent<F>(&self, handler: F)
    where
        F: Fn(&Element) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.shared.sent.add_handler(handler);
    }

    /// Registers a handler called with every raw `<body/>` received.
    pub fn on_response<F>(&self, handler: F)
    where
        F: Fn(&Element) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.shared.responses.add_handler(handler);
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, notices: Vec<ConnectionState>) {
        for notice in notices {
            self.shared.states.emit(&notice);
        }
    }

    fn flush_locked(&self, state: &mut State, force: bool) {
        if !force && !state.may_send() {
            debug!("Body queued");
            return;
        }
        if let Some(body) = state.pending.take() {
            self.transmit(state, body.to_string());
        }
    }

    fn transmit(&self, state: &mut State, request: String) {
        let http_base = match state.settings.as_ref() {
            Some(settings) => settings.http_base.clone(),
            None => {
                warn!("No connection settings, dropping request");
                return;
            }
        };
        let timeout = match state.stream.as_ref() {
            Some(stream) => stream.request_timeout(&state.timings),
            None => state.timings.http_timeout,
        };
        state.active_requests += 1;
        if let Some(stream) = state.stream.as_mut() {
            stream.last_request_time = Some(Instant::now());
        }
        debug!(">> {}", request);
        let response = self
            .shared
            .connector
            .send(&http_base, request.clone(), timeout);
        let shared = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            let result = response.await;
            if let Some(shared) = shared.upgrade() {
                let transport = BoshTransport { shared };
                match result {
                    Ok(response) => transport.on_http_response(request, response),
                    Err(e) => transport.on_failure(request, e),
                }
            }
        });
    }

    /// Runs `action` after `delay`, unless the transport was dropped meanwhile.
    fn schedule<F>(&self, delay: Duration, action: F)
    where
        F: FnOnce(&BoshTransport<C>) + Send + 'static,
    {
        let shared = Arc::downgrade(&self.shared);
        let deadline = Instant::now() + delay;
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(shared) = shared.upgrade() {
                action(&BoshTransport { shared });
            }
        });
    }

    fn heartbeat_period(&self, state: &mut State) -> Option<Duration> {
        if state.heartbeat || state.timings.heartbeat.is_zero() {
            return None;
        }
        state.heartbeat = true;
        Some(state.timings.heartbeat)
    }

    fn start_heartbeat(&self, period: Duration) {
        let shared = Arc::downgrade(&self.shared);
        let start = Instant::now() + period;
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval_at(start, period);
            loop {
                ticks.tick().await;
                match shared.upgrade() {
                    Some(shared) => BoshTransport { shared }.heartbeat(),
                    None => break,
                }
            }
        });
    }

    fn heartbeat(&self) {
        let mut state = self.lock();
        if state.active && state.retrying.is_empty() {
            self.continue_connection(&mut state);
        }
    }

    /// Keeps a request outstanding: sends what is pending, or an empty body once idle.
    fn continue_connection(&self, state: &mut State) {
        let rid = match state.stream.as_ref() {
            Some(stream) if state.active_requests == 0 => stream.rid,
            _ => return,
        };
        if state.pending.is_some() {
            self.flush_locked(state, false);
            return;
        }
        self.schedule(state.timings.continuation, move |transport| {
            let mut state = transport.lock();
            let idle = state.active
                && state.pending.is_none()
                && state.active_requests == 0
                && state.retrying.is_empty()
                && state.stream.as_ref().map_or(false, |stream| stream.rid == rid);
            if idle {
                state.pending_body();
                transport.flush_locked(&mut state, false);
            }
        });
    }

    fn disconnect_locked(&self, state: &mut State, notices: &mut Vec<ConnectionState>) {
        state.pending = None;
        if state.stream.is_some() {
            state.pending_body().set_attr("type", "terminate");
            self.flush_locked(state, true);
        }
        state.active = false;
        if let Some(stream) = state.stream.as_mut() {
            stream.sid = None;
        }
        info!("Disconnected: logged out");
        notices.push(ConnectionState::Disconnected("logged out".to_owned()));
    }

    fn on_failure(&self, request: String, e: ConnectorError) {
        let mut notices = Vec::new();
        {
            let mut state = self.lock();
            self.on_error_locked(&mut state, request, e.to_string(), &mut notices);
        }
        self.notify(notices);
    }

    fn on_error_locked(
        &self,
        state: &mut State,
        request: String,
        reason: String,
        notices: &mut Vec<ConnectionState>,
    ) {
        if !state.active {
            return;
        }
        state.errors += 1;
        let attempt = state.errors;
        warn!("Connection error #{}: {}", attempt, reason);
        state.retrying.insert(request.clone());

        let sid = state.stream.as_ref().and_then(|stream| stream.sid.clone());
        let budget = match state.stream.as_ref() {
            Some(stream) => stream.error_timeout(&state.timings),
            None => state.timings.error_timeout,
        };
        let delay = state.timings.retry_delay;
        let exhausted = delay
            .checked_mul(attempt)
            .map_or(true, |elapsed| elapsed > budget);
        if exhausted {
            state.active_requests = state.active_requests.saturating_sub(1);
            error!(
                "Connection errored for longer than {:?}, giving up",
                budget
            );
            notices.push(ConnectionState::Error(format!(
                "Connection error: {}",
                reason
            )));
            self.disconnect_locked(state, notices);
            return;
        }

        info!("Retrying request in {:?}", delay);
        notices.push(ConnectionState::WaitingForRetry { attempt, delay });
        self.schedule(delay, move |transport| {
            let mut state = transport.lock();
            let same_session = state
                .stream
                .as_ref()
                .map_or(false, |stream| stream.sid == sid);
            if state.active && same_session {
                info!("Error retry: {}", attempt);
                state.active_requests = state.active_requests.saturating_sub(1);
                transport.transmit(&mut state, request);
            }
        });
    }

    fn on_http_response(&self, request: String, response: HttpResponse) {
        let mut notices = Vec::new();
        let body = {
            let mut state = self.lock();
            if !state.active {
                debug!("Ignoring response on inactive connection");
                return;
            }
            match response.status {
                404 => {
                    state.active_requests = state.active_requests.saturating_sub(1);
                    notices.push(ConnectionState::Error(format!(
                        "404 Connection Error (session removed ?!) : {}",
                        response.body
                    )));
                    self.disconnect_locked(&mut state, &mut notices);
                    None
                }
                200 | 0 => match parse_response(&response.body) {
                    Ok(body) => {
                        state.active_requests = state.active_requests.saturating_sub(1);
                        if state.retrying.remove(&request) {
                            info!("Errored request went through on retry");
                        }
                        Some(body)
                    }
                    Err(e) => {
                        let reason = format!("Bad response: {} {}", response.status, e);
                        self.on_error_locked(&mut state, request, reason, &mut notices);
                        None
                    }
                },
                status => {
                    let reason = format!("Bad status: {} {}", status, response.body);
                    self.on_error_locked(&mut state, request, reason, &mut notices);
                    None
                }
            }
        };
        self.notify(notices);
        if let Some(body) = body {
            self.handle_body(body);
        }
    }

    fn handle_body(&self, body: Element) {
        self.shared.responses.emit(&body);

        let terminated = matches!(body.attr("type"), Some("terminate") | Some("terminal"));
        let mut notices = Vec::new();
        {
            let mut state = self.lock();
            if !state.active {
                debug!("Session ended while handling response, dropping it");
                return;
            }
            if terminated {
                state.active = false;
                if let Some(stream) = state.stream.as_mut() {
                    stream.sid = None;
                }
                info!("Disconnected by server");
                notices.push(ConnectionState::Disconnected(
                    "disconnected by server".to_owned(),
                ));
            } else {
                if let Some(stream) = state.stream.as_mut() {
                    if stream.sid.is_none() {
                        stream.sid = body.attr("sid").map(str::to_owned);
                        stream.wait = body.attr("wait").and_then(|v| v.parse().ok());
                        stream.inactivity = body.attr("inactivity").and_then(|v| v.parse().ok());
                        stream.max_pause = body.attr("maxpause").and_then(|v| v.parse().ok());
                        info!("Session {:?} established", stream.sid);
                        notices.push(ConnectionState::Connected);
                    }
                }
                state.collecting += 1;
            }
        }
        self.notify(notices);
        if terminated {
            return;
        }

        for stanza in body.children() {
            if !self.lock().active {
                debug!("Session ended, dropping the rest of the body");
                break;
            }
            self.shared.received.emit(stanza);
        }

        let mut state = self.lock();
        state.collecting -= 1;
        self.continue_connection(&mut state);
    }
}

impl<C: HttpConnector> XmppConnection for BoshTransport<C> {
    fn send(&self, stanza: Element) {
        BoshTransport::send(self, stanza)
    }

    fn on_stanza_received<F>(&self, handler: F)
    where
        F: Fn(&Element) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.shared.received.add_handler(handler);
    }

    fn on_connection_state<F>(&self, handler: F)
    where
        F: Fn(&ConnectionState) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.shared.states.add_handler(handler);
    }

    fn stanzas(&self) -> UnboundedReceiverStream<Element> {
        UnboundedReceiverStream::new(self.shared.received.subscribe())
    }

    fn states(&self) -> UnboundedReceiverStream<ConnectionState> {
        UnboundedReceiverStream::new(self.shared.states.subscribe())
    }
}

impl<C: HttpConnector> fmt::Debug for BoshTransport<C> {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        let state = self.lock();
        fmt.debug_struct("BoshTransport")
            .field("active", &state.active)
            .field("stream", &state.stream)
            .field("active_requests", &state.active_requests)
            .finish()
    }
}
