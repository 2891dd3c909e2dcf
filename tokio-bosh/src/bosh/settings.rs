use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;

/// User configuration of a BOSH session
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// URL of the connection manager
    pub http_base: String,
    /// XMPP domain to connect to
    pub host_name: String,
    /// Host to ask the connection manager to route to
    pub route_host: Option<String>,
    /// Port to ask the connection manager to route to
    pub route_port: Option<u16>,
    /// Requests the connection manager may hold at once
    pub hold: u32,
    /// Longest time in seconds the connection manager may hold a request
    pub wait: u32,
    /// Most requests in flight at once
    pub max_requests: usize,
    /// Whether the connection manager must use a secure channel to the server
    pub secure: bool,
    /// BOSH protocol version
    pub version: String,
}

impl ConnectionSettings {
    /// Settings for `host_name` through the connection manager at `http_base`.
    pub fn new<B: Into<String>, H: Into<String>>(http_base: B, host_name: H) -> Self {
        ConnectionSettings {
            http_base: http_base.into(),
            host_name: host_name.into(),
            route_host: None,
            route_port: None,
            hold: 1,
            wait: 60,
            max_requests: 2,
            secure: true,
            version: "1.6".to_owned(),
        }
    }

    /// Asks the connection manager to route to `host:port`.
    pub fn with_route<H: Into<String>>(mut self, host: H, port: u16) -> Self {
        self.route_host = Some(host.into());
        self.route_port = Some(port);
        self
    }

    /// Sets `hold`.
    pub fn with_hold(mut self, hold: u32) -> Self {
        self.hold = hold;
        self
    }

    /// Sets `wait`, in seconds.
    pub fn with_wait(mut self, wait: u32) -> Self {
        self.wait = wait;
        self
    }

    /// Sets the maximum number of concurrent requests.
    pub fn with_max_requests(mut self, max_requests: usize) -> Self {
        self.max_requests = max_requests;
        self
    }

    /// Sets `secure`.
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Sets the protocol version.
    pub fn with_version<V: Into<String>>(mut self, version: V) -> Self {
        self.version = version.into();
        self
    }

    pub(crate) fn route(&self) -> Option<String> {
        match (&self.route_host, self.route_port) {
            (Some(host), Some(port)) => Some(format!("xmpp:{}:{}", host, port)),
            _ => None,
        }
    }
}

/// Timer tunables of the transport
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timings {
    /// Delay before resending a failed request
    pub retry_delay: Duration,
    /// How long errors may go on when the server gave no inactivity period
    pub error_timeout: Duration,
    /// HTTP timeout until the server advertised `wait` and `inactivity`
    pub http_timeout: Duration,
    /// Period of the self-healing heartbeat
    pub heartbeat: Duration,
    /// Delay before an idle connection sends an empty body
    pub continuation: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Timings {
            retry_delay: Duration::from_millis(2000),
            error_timeout: Duration::from_secs(60),
            http_timeout: Duration::from_millis(120_000),
            heartbeat: Duration::from_millis(5000),
            continuation: Duration::from_millis(300),
        }
    }
}

impl Timings {
    /// Sets the retry delay.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Sets the fallback error timeout.
    pub fn with_error_timeout(mut self, timeout: Duration) -> Self {
        self.error_timeout = timeout;
        self
    }

    /// Sets the default HTTP timeout.
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Sets the heartbeat period.
    pub fn with_heartbeat(mut self, period: Duration) -> Self {
        self.heartbeat = period;
        self
    }

    /// Sets the idle continuation delay.
    pub fn with_continuation(mut self, delay: Duration) -> Self {
        self.continuation = delay;
        self
    }
}

/// Server-side state of a session, handed out by `pause()` to resume it later
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamSettings {
    /// Session id, absent until assigned and after termination
    pub sid: Option<String>,
    /// Last request id handed out
    pub rid: u64,
    /// Server `wait`, in seconds
    pub wait: Option<u32>,
    /// Server `inactivity`, in seconds
    pub inactivity: Option<u32>,
    /// Server `maxpause`, in seconds
    pub max_pause: Option<u32>,
    /// When the last request went out
    pub last_request_time: Option<Instant>,
}

impl StreamSettings {
    /// Fresh stream state with a random starting request id.
    pub fn new() -> Self {
        StreamSettings {
            sid: None,
            rid: rand::thread_rng().gen_range(1_000..10_000_000),
            wait: None,
            inactivity: None,
            max_pause: None,
            last_request_time: None,
        }
    }

    /// Hands out the next request id.
    pub fn next_rid(&mut self) -> u64 {
        self.rid += 1;
        self.rid
    }

    /// Timeout for the next request.
    pub(crate) fn request_timeout(&self, timings: &Timings) -> Duration {
        match (self.wait, self.inactivity) {
            (Some(wait), Some(inactivity)) if wait > 0 && inactivity > 0 => {
                Duration::from_secs(u64::from(wait) + u64::from(inactivity / 2))
            }
            _ => timings.http_timeout,
        }
    }

    /// How long errors may go on before the session is given up.
    pub(crate) fn error_timeout(&self, timings: &Timings) -> Duration {
        match self.inactivity {
            Some(inactivity) if inactivity > 0 => Duration::from_secs(u64::from(inactivity)),
            _ => timings.error_timeout,
        }
    }
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings = ConnectionSettings::new("http://localhost/http-bind", "localhost");
        assert_eq!(settings.hold, 1);
        assert_eq!(settings.wait, 60);
        assert_eq!(settings.max_requests, 2);
        assert!(settings.secure);
        assert_eq!(settings.version, "1.6");
        assert_eq!(settings.route(), None);
    }

    #[test]
    fn route_needs_host_and_port() {
        let settings = ConnectionSettings::new("http://localhost/http-bind", "localhost")
            .with_route("xmpp.localhost", 5222);
        assert_eq!(settings.route().as_deref(), Some("xmpp:xmpp.localhost:5222"));
    }

    #[test]
    fn rids_increase() {
        let mut stream = StreamSettings::new();
        let first = stream.next_rid();
        assert!(first > 1_000);
        assert_eq!(stream.next_rid(), first + 1);
    }

    #[test]
    fn request_timeout_from_server() {
        let timings = Timings::default();
        let mut stream = StreamSettings::new();
        assert_eq!(stream.request_timeout(&timings), Duration::from_millis(120_000));
        stream.wait = Some(30);
        assert_eq!(stream.request_timeout(&timings), Duration::from_millis(120_000));
        stream.inactivity = Some(50);
        assert_eq!(stream.request_timeout(&timings), Duration::from_millis(55_000));
    }

    #[test]
    fn error_timeout_falls_back() {
        let timings = Timings::default();
        let mut stream = StreamSettings::new();
        assert_eq!(stream.error_timeout(&timings), Duration::from_secs(60));
        stream.inactivity = Some(30);
        assert_eq!(stream.error_timeout(&timings), Duration::from_secs(30));
    }
}
