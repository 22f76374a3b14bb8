use rustls::{ClientConfig, RootCertStore};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 61613;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(120_000);

/// Connection settings captured when a [`Connection`](crate::Connection) is
/// initialized.
///
/// `login` and `passcode` are only sent when both are present; `client_id`
/// and `vhost` map to the `client-id` and `host` CONNECT headers.
///
/// ```
/// use scampi_stomp::Options;
/// use rustls::{ClientConfig, RootCertStore};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let opts = Options::new()
///     .host("broker.internal")
///     .login("guest")
///     .passcode("guest")
///     .timeout(Duration::from_secs(30));
/// assert_eq!(opts.addr(), "broker.internal:61613");
/// ```
#[derive(Clone)]
pub struct Options {
    pub host: String,
    pub port: u16,
    pub login: Option<String>,
    pub passcode: Option<String>,
    pub ssl: bool,
    /// Tear the connection down when the broker certificate is not trusted.
    /// When false an untrusted certificate is logged and accepted.
    pub ssl_validate: bool,
    /// Trust anchors used instead of the bundled webpki roots, for brokers
    /// whose certificate comes from a private CA.
    pub ssl_roots: Option<Arc<RootCertStore>>,
    /// Complete TLS client configuration, used as is. Needed for client
    /// certificates; `ssl_validate` and `ssl_roots` do not apply to it.
    pub ssl_config: Option<Arc<ClientConfig>>,
    pub client_id: Option<String>,
    pub vhost: Option<String>,
    /// Idle timeout; `None` or zero disables it.
    pub timeout: Option<Duration>,
    /// TCP keep-alive on the broker socket.
    pub keep_alive: bool,
    /// Emit per-frame wire traces.
    pub debug: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            login: None,
            passcode: None,
            ssl: false,
            ssl_validate: false,
            ssl_roots: None,
            ssl_config: None,
            client_id: None,
            vhost: None,
            timeout: Some(DEFAULT_TIMEOUT),
            keep_alive: false,
            debug: false,
        }
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn login(mut self, login: impl Into<String>) -> Self {
        self.login = Some(login.into());
        self
    }

    pub fn passcode(mut self, passcode: impl Into<String>) -> Self {
        self.passcode = Some(passcode.into());
        self
    }

    pub fn ssl(mut self, ssl: bool) -> Self {
        self.ssl = ssl;
        self
    }

    pub fn ssl_validate(mut self, validate: bool) -> Self {
        self.ssl_validate = validate;
        self
    }

    pub fn ssl_roots(mut self, roots: impl Into<Arc<RootCertStore>>) -> Self {
        self.ssl_roots = Some(roots.into());
        self
    }

    pub fn ssl_config(mut self, config: impl Into<Arc<ClientConfig>>) -> Self {
        self.ssl_config = Some(config.into());
        self
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn vhost(mut self, vhost: impl Into<String>) -> Self {
        self.vhost = Some(vhost.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn no_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// `host:port` of the broker.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The idle timeout in effect, if any.
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.timeout.filter(|t| !t.is_zero())
    }

    /// Headers for the CONNECT frame, each included only when configured.
    pub fn connect_headers(&self) -> Vec<(String, String)> {
        let mut headers = Vec::new();
        if let (Some(login), Some(passcode)) = (&self.login, &self.passcode) {
            headers.push(("login".to_string(), login.clone()));
            headers.push(("passcode".to_string(), passcode.clone()));
        }
        if let Some(client_id) = &self.client_id {
            headers.push(("client-id".to_string(), client_id.clone()));
        }
        if let Some(vhost) = &self.vhost {
            headers.push(("host".to_string(), vhost.clone()));
        }
        headers
    }
}

fn same_arc<T>(a: &Option<Arc<T>>, b: &Option<Arc<T>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

// TLS material compares by identity.
impl PartialEq for Options {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host
            && self.port == other.port
            && self.login == other.login
            && self.passcode == other.passcode
            && self.ssl == other.ssl
            && self.ssl_validate == other.ssl_validate
            && same_arc(&self.ssl_roots, &other.ssl_roots)
            && same_arc(&self.ssl_config, &other.ssl_config)
            && self.client_id == other.client_id
            && self.vhost == other.vhost
            && self.timeout == other.timeout
            && self.keep_alive == other.keep_alive
            && self.debug == other.debug
    }
}

impl Eq for Options {}

impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("login", &self.login)
            .field("passcode", &self.passcode.as_ref().map(|_| "******"))
            .field("ssl", &self.ssl)
            .field("ssl_validate", &self.ssl_validate)
            .field("ssl_roots", &self.ssl_roots.as_ref().map(|r| r.len()))
            .field("ssl_config", &self.ssl_config.is_some())
            .field("client_id", &self.client_id)
            .field("vhost", &self.vhost)
            .field("timeout", &self.timeout)
            .field("keep_alive", &self.keep_alive)
            .field("debug", &self.debug)
            .finish()
    }
}
