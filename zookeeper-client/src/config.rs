//! Client configuration types and builders.

use std::time::Duration;

use zookeeper_core::protocol::DEFAULT_MAX_PACKET_SIZE;

use crate::path::validate_path;

/// Default ensemble member.
const DEFAULT_SERVER: &str = "127.0.0.1:2181";
/// Default requested session timeout.
const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30);
/// Default connect timeout per attempt.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default initial retry backoff.
const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(100);
/// Default maximum retry backoff.
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(10);
/// Default maximum initial connection attempts.
const DEFAULT_MAX_RETRIES: u32 = 10;
/// Smallest packet limit that still fits a handshake and a stat.
const MIN_MAX_PACKET_SIZE: usize = 1024;

/// Configuration error returned when validation fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    message: String,
}

impl ConfigError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

/// Retry configuration for connection attempts.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    initial_backoff: Duration,
    max_backoff: Duration,
    max_retries: u32,
}

impl RetryConfig {
    /// Returns the initial backoff duration.
    pub fn initial_backoff(&self) -> Duration {
        self.initial_backoff
    }

    /// Returns the maximum backoff duration.
    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    /// Returns the maximum number of initial connection attempts.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl From<RetryConfig> for RetryConfigBuilder {
    fn from(config: RetryConfig) -> Self {
        Self {
            initial_backoff: Some(config.initial_backoff),
            max_backoff: Some(config.max_backoff),
            max_retries: Some(config.max_retries),
        }
    }
}

/// Builder for `RetryConfig`.
#[derive(Debug, Clone, Default)]
pub struct RetryConfigBuilder {
    initial_backoff: Option<Duration>,
    max_backoff: Option<Duration>,
    max_retries: Option<u32>,
}

impl RetryConfigBuilder {
    /// Creates a new retry configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the initial backoff duration.
    pub fn initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = Some(backoff);
        self
    }

    /// Sets the maximum backoff duration.
    pub fn max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = Some(backoff);
        self
    }

    /// Sets the maximum number of initial connection attempts.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Builds the retry configuration, returning an error if validation fails.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - `initial_backoff` is zero
    /// - `initial_backoff` exceeds `max_backoff`
    /// - `max_retries` is zero
    pub fn build(self) -> Result<RetryConfig, ConfigError> {
        let initial_backoff = self.initial_backoff.unwrap_or(DEFAULT_INITIAL_BACKOFF);
        let max_backoff = self.max_backoff.unwrap_or(DEFAULT_MAX_BACKOFF);
        let max_retries = self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES);

        if initial_backoff.is_zero() {
            return Err(ConfigError::new("initial_backoff must be positive"));
        }

        if initial_backoff > max_backoff {
            return Err(ConfigError::new(
                "initial_backoff must not exceed max_backoff",
            ));
        }

        if max_retries == 0 {
            return Err(ConfigError::new("max_retries must be at least 1"));
        }

        Ok(RetryConfig {
            initial_backoff,
            max_backoff,
            max_retries,
        })
    }
}

/// Credentials sent with `add_auth` on every (re)connect.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthCredential {
    scheme: String,
    credential: Vec<u8>,
}

impl AuthCredential {
    /// Creates a credential for the given scheme, e.g. `digest` and `user:password`.
    pub fn new(scheme: impl Into<String>, credential: impl Into<Vec<u8>>) -> Self {
        Self {
            scheme: scheme.into(),
            credential: credential.into(),
        }
    }

    /// Returns the authentication scheme.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Returns the raw credential bytes.
    pub fn credential(&self) -> &[u8] {
        &self.credential
    }
}

impl std::fmt::Debug for AuthCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthCredential")
            .field("scheme", &self.scheme)
            .field("credential", &"<redacted>")
            .finish()
    }
}

/// Parsed form of a `host:port,host:port/chroot` connect string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectString {
    /// Ensemble members as `host:port`.
    pub servers: Vec<String>,
    /// Optional chroot suffix.
    pub chroot: Option<String>,
}

impl ConnectString {
    /// Parses a connect string.
    ///
    /// Hosts without a port get the default client port 2181.
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let input = input.trim();
        let (hosts, chroot) = match input.find('/') {
            Some(idx) => (&input[..idx], Some(input[idx..].to_string())),
            None => (input, None),
        };

        let mut servers = Vec::new();
        for host in hosts.split(',').map(str::trim).filter(|h| !h.is_empty()) {
            servers.push(normalize_server(host)?);
        }
        if servers.is_empty() {
            return Err(ConfigError::new(format!(
                "connect string {:?} names no servers",
                input
            )));
        }

        if let Some(chroot) = &chroot {
            validate_chroot(chroot)?;
        }

        Ok(Self {
            servers,
            chroot: chroot.filter(|c| c != "/"),
        })
    }
}

fn normalize_server(server: &str) -> Result<String, ConfigError> {
    let server = server.trim();
    // Bracketed IPv6 literal, optionally with a port.
    if let Some(rest) = server.strip_prefix('[') {
        let Some(end) = rest.find(']') else {
            return Err(ConfigError::new(format!("invalid server address {:?}", server)));
        };
        let port = &rest[end + 1..];
        return match port.strip_prefix(':') {
            Some(port) => {
                parse_port(server, port)?;
                Ok(server.to_string())
            }
            None if port.is_empty() => Ok(format!("{}:2181", server)),
            None => Err(ConfigError::new(format!("invalid server address {:?}", server))),
        };
    }

    match server.rsplit_once(':') {
        Some((host, port)) => {
            if host.is_empty() {
                return Err(ConfigError::new(format!("missing host in {:?}", server)));
            }
            parse_port(server, port)?;
            Ok(server.to_string())
        }
        None if !server.is_empty() => Ok(format!("{}:2181", server)),
        None => Err(ConfigError::new("server address must not be empty")),
    }
}

fn parse_port(server: &str, port: &str) -> Result<u16, ConfigError> {
    match port.parse::<u16>() {
        Ok(p) if p != 0 => Ok(p),
        _ => Err(ConfigError::new(format!("invalid port in {:?}", server))),
    }
}

fn validate_chroot(chroot: &str) -> Result<(), ConfigError> {
    validate_path(chroot, false)
        .map_err(|e| ConfigError::new(format!("invalid chroot: {}", e)))
}

/// Main client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    servers: Vec<String>,
    chroot: Option<String>,
    session_timeout: Duration,
    connect_timeout: Duration,
    request_timeout: Option<Duration>,
    retry: RetryConfig,
    can_be_read_only: bool,
    auth: Vec<AuthCredential>,
    max_packet_size: usize,
}

impl ClientConfig {
    /// Creates a new client configuration builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Returns the ensemble members as `host:port`.
    pub fn servers(&self) -> &[String] {
        &self.servers
    }

    /// Returns the chroot every path is resolved under, if any.
    pub fn chroot(&self) -> Option<&str> {
        self.chroot.as_deref()
    }

    /// Returns the requested session timeout.
    pub fn session_timeout(&self) -> Duration {
        self.session_timeout
    }

    /// Returns the timeout of a single connection attempt.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Returns the default per-operation timeout, if any.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    /// Returns the retry configuration.
    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    /// Returns `true` if read-only servers are acceptable.
    pub fn can_be_read_only(&self) -> bool {
        self.can_be_read_only
    }

    /// Returns the credentials added on every connect.
    pub fn auth(&self) -> &[AuthCredential] {
        &self.auth
    }

    /// Returns the largest packet accepted from the ensemble.
    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            servers: vec![DEFAULT_SERVER.to_string()],
            chroot: None,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: None,
            retry: RetryConfig::default(),
            can_be_read_only: false,
            auth: Vec::new(),
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }
}

/// Builder for `ClientConfig`.
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    servers: Vec<String>,
    connect_string: Option<String>,
    chroot: Option<String>,
    session_timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
    retry: RetryConfigBuilder,
    can_be_read_only: Option<bool>,
    auth: Vec<AuthCredential>,
    max_packet_size: Option<usize>,
}

impl ClientConfigBuilder {
    /// Creates a new client configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets servers and chroot from a `host:port,host:port/chroot` string.
    ///
    /// Parsed on [`build`](Self::build); an explicit [`chroot`](Self::chroot)
    /// wins over the one in the string.
    pub fn connect_string(mut self, connect_string: impl Into<String>) -> Self {
        self.connect_string = Some(connect_string.into());
        self
    }

    /// Adds an ensemble member as `host:port`.
    pub fn add_server(mut self, server: impl Into<String>) -> Self {
        self.servers.push(server.into());
        self
    }

    /// Sets the ensemble members.
    pub fn servers<I, S>(mut self, servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.servers = servers.into_iter().map(Into::into).collect();
        self
    }

    /// Roots every path under `chroot`.
    pub fn chroot(mut self, chroot: impl Into<String>) -> Self {
        self.chroot = Some(chroot.into());
        self
    }

    /// Sets the requested session timeout.
    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = Some(timeout);
        self
    }

    /// Sets the timeout of a single connection attempt.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets the default per-operation timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Configures retry settings using a builder function.
    pub fn retry<F>(mut self, f: F) -> Self
    where
        F: FnOnce(RetryConfigBuilder) -> RetryConfigBuilder,
    {
        self.retry = f(self.retry);
        self
    }

    /// Allows connecting to servers in read-only mode.
    pub fn can_be_read_only(mut self, allowed: bool) -> Self {
        self.can_be_read_only = Some(allowed);
        self
    }

    /// Adds credentials sent on every connect.
    pub fn add_auth(mut self, scheme: impl Into<String>, credential: impl Into<Vec<u8>>) -> Self {
        self.auth.push(AuthCredential::new(scheme, credential));
        self
    }

    /// Sets the largest packet accepted from the ensemble.
    pub fn max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = Some(size);
        self
    }

    /// Builds the client configuration, returning an error if validation fails.
    pub fn build(self) -> Result<ClientConfig, ConfigError> {
        let (mut servers, mut chroot) = match &self.connect_string {
            Some(cs) => {
                let parsed = ConnectString::parse(cs)?;
                (parsed.servers, parsed.chroot)
            }
            None => (Vec::new(), None),
        };

        for server in &self.servers {
            servers.push(normalize_server(server)?);
        }
        if servers.is_empty() {
            servers.push(DEFAULT_SERVER.to_string());
        }

        if let Some(explicit) = self.chroot {
            validate_chroot(&explicit)?;
            chroot = Some(explicit).filter(|c| c != "/");
        }

        let session_timeout = self.session_timeout.unwrap_or(DEFAULT_SESSION_TIMEOUT);
        if session_timeout.is_zero() {
            return Err(ConfigError::new("session_timeout must be positive"));
        }
        if session_timeout.as_millis() > i32::MAX as u128 {
            return Err(ConfigError::new("session_timeout is too large"));
        }

        let connect_timeout = self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        if connect_timeout.is_zero() {
            return Err(ConfigError::new("connect_timeout must be positive"));
        }

        if let Some(timeout) = self.request_timeout {
            if timeout.is_zero() {
                return Err(ConfigError::new("request_timeout must be positive"));
            }
        }

        let max_packet_size = self.max_packet_size.unwrap_or(DEFAULT_MAX_PACKET_SIZE);
        if max_packet_size < MIN_MAX_PACKET_SIZE || max_packet_size > i32::MAX as usize {
            return Err(ConfigError::new(format!(
                "max_packet_size must be between {} and {}",
                MIN_MAX_PACKET_SIZE,
                i32::MAX
            )));
        }

        for auth in &self.auth {
            if auth.scheme.is_empty() {
                return Err(ConfigError::new("auth scheme must not be empty"));
            }
        }

        let retry = self.retry.build()?;

        Ok(ClientConfig {
            servers,
            chroot,
            session_timeout,
            connect_timeout,
            request_timeout: self.request_timeout,
            retry,
            can_be_read_only: self.can_be_read_only.unwrap_or(false),
            auth: self.auth,
            max_packet_size,
        })
    }
}
