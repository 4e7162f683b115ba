//! Poll configuration resolved once at startup.
//!
//! `PollConfig` carries everything the collection core needs: where the
//! Connect:Direct Web Services endpoint lives, the credentials and node
//! connection parameters sent at sign-on, the poll interval, the timeout
//! bounds for the HTTP calls, and how results are published.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default context path of the web console under the server base URL.
pub const DEFAULT_CONTEXT_PATH: &str = "/cdwebconsole";

/// Default Connect:Direct node API port.
pub const DEFAULT_NODE_PORT: u16 = 1363;

/// Default transport-security protocol requested at sign-on.
pub const DEFAULT_NODE_PROTOCOL: &str = "TLS1.3";

/// Default interval between poll cycles.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Default connect and read timeout for upstream calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Error type for configuration problems detected at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required value is empty.
    Missing(&'static str),
    /// A value is present but unusable.
    Invalid { field: &'static str, reason: String },
    /// The HTTP client could not be constructed.
    HttpClient(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(field) => write!(f, "{} is required", field),
            ConfigError::Invalid { field, reason } => write!(f, "invalid {}: {}", field, reason),
            ConfigError::HttpClient(msg) => write!(f, "failed to build HTTP client: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// How category counts are exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublishMode {
    /// Each metric is set to the freshly computed count.
    #[default]
    Gauge,
    /// Each metric only receives signed increments relative to the baseline.
    Delta,
}

impl FromStr for PublishMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gauge" => Ok(PublishMode::Gauge),
            "delta" => Ok(PublishMode::Delta),
            other => Err(format!("unknown publish mode '{}' (expected gauge or delta)", other)),
        }
    }
}

impl fmt::Display for PublishMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishMode::Gauge => f.write_str("gauge"),
            PublishMode::Delta => f.write_str("delta"),
        }
    }
}

/// Shape of the queue-status response and the resource that produces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    /// JSON array of records, each carrying a `queue` field.
    #[default]
    Json,
    /// Raw body scanned for category labels.
    Text,
}

impl ResponseFormat {
    /// Resource (relative to `/svc/`) queried for this format.
    pub fn query_resource(self) -> &'static str {
        match self {
            ResponseFormat::Json => "processcontrolcriterias?queue=all",
            ResponseFormat::Text => "processcontrolcriteria?queue=ALL",
        }
    }
}

impl FromStr for ResponseFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ResponseFormat::Json),
            "text" => Ok(ResponseFormat::Text),
            other => Err(format!("unknown response format '{}' (expected json or text)", other)),
        }
    }
}

impl fmt::Display for ResponseFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseFormat::Json => f.write_str("json"),
            ResponseFormat::Text => f.write_str("text"),
        }
    }
}

/// Username and password encoded into the Basic credential at sign-on.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Target-node connection parameters carried in the sign-on body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEndpoint {
    pub address: String,
    pub port: u16,
    pub protocol: String,
}

/// Timeout bounds applied to every upstream call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub read: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: DEFAULT_TIMEOUT,
            read: DEFAULT_TIMEOUT,
        }
    }
}

/// Immutable configuration for the poll loop.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Web services base URL, e.g. `https://cdws.example:9443`.
    pub server: String,
    /// Path prepended to `/svc/...` (may be empty).
    pub context_path: String,
    pub credentials: Credentials,
    pub node: NodeEndpoint,
    pub interval: Duration,
    pub timeouts: Timeouts,
    pub mode: PublishMode,
    pub format: ResponseFormat,
    /// Skip TLS certificate verification for the web services endpoint.
    pub accept_invalid_certs: bool,
}

impl PollConfig {
    /// Creates a configuration with defaults for everything but the
    /// server, credentials and node address.
    pub fn new(
        server: impl Into<String>,
        credentials: Credentials,
        node_address: impl Into<String>,
    ) -> Self {
        Self {
            server: server.into(),
            context_path: DEFAULT_CONTEXT_PATH.to_string(),
            credentials,
            node: NodeEndpoint {
                address: node_address.into(),
                port: DEFAULT_NODE_PORT,
                protocol: DEFAULT_NODE_PROTOCOL.to_string(),
            },
            interval: DEFAULT_INTERVAL,
            timeouts: Timeouts::default(),
            mode: PublishMode::default(),
            format: ResponseFormat::default(),
            accept_invalid_certs: false,
        }
    }

    /// Checks the configuration before any network call is made.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let server = self.server.trim();
        if server.is_empty() {
            return Err(ConfigError::Missing("server URL"));
        }
        if !server.starts_with("http://") && !server.starts_with("https://") {
            return Err(ConfigError::Invalid {
                field: "server URL",
                reason: format!("'{}' must start with http:// or https://", server),
            });
        }
        if !self.context_path.is_empty() && !self.context_path.starts_with('/') {
            return Err(ConfigError::Invalid {
                field: "context path",
                reason: format!("'{}' must start with '/'", self.context_path),
            });
        }
        if self.credentials.user.trim().is_empty() {
            return Err(ConfigError::Missing("username"));
        }
        if self.node.address.trim().is_empty() {
            return Err(ConfigError::Missing("node address"));
        }
        if self.interval.is_zero() {
            return Err(ConfigError::Invalid {
                field: "interval",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.timeouts.connect.is_zero() || self.timeouts.read.is_zero() {
            return Err(ConfigError::Invalid {
                field: "timeout",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Builds the full URL of a web services resource.
    ///
    /// `resource` is relative to `/svc/` and may carry a query string.
    pub fn endpoint(&self, resource: &str) -> String {
        format!(
            "{}{}/svc/{}",
            self.server.trim().trim_end_matches('/'),
            self.context_path.trim_end_matches('/'),
            resource
        )
    }

    /// URL of the queue-status query for the configured response format.
    pub fn query_url(&self) -> String {
        self.endpoint(self.format.query_resource())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PollConfig {
        PollConfig::new(
            "https://cdws.local:9443",
            Credentials {
                user: "admin".to_string(),
                password: "secret".to_string(),
            },
            "10.0.0.5",
        )
    }

    #[test]
    fn defaults_follow_upstream_conventions() {
        let config = sample();
        assert_eq!(config.node.port, 1363);
        assert_eq!(config.node.protocol, "TLS1.3");
        assert_eq!(config.interval, Duration::from_secs(60));
        assert_eq!(config.timeouts.connect, Duration::from_secs(30));
        assert_eq!(config.timeouts.read, Duration::from_secs(30));
        assert_eq!(config.mode, PublishMode::Gauge);
        assert_eq!(config.format, ResponseFormat::Json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn endpoint_joins_server_context_and_resource() {
        let mut config = sample();
        config.server = "https://cdws.local:9443/".to_string();
        assert_eq!(
            config.endpoint("signon"),
            "https://cdws.local:9443/cdwebconsole/svc/signon"
        );

        config.context_path = String::new();
        assert_eq!(config.endpoint("signout"), "https://cdws.local:9443/svc/signout");
    }

    #[test]
    fn query_url_depends_on_format() {
        let mut config = sample();
        assert!(config.query_url().ends_with("/svc/processcontrolcriterias?queue=all"));
        config.format = ResponseFormat::Text;
        assert!(config.query_url().ends_with("/svc/processcontrolcriteria?queue=ALL"));
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = sample();
        config.server = "  ".to_string();
        assert_eq!(config.validate(), Err(ConfigError::Missing("server URL")));

        let mut config = sample();
        config.server = "cdws.local:9443".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "server URL", .. })
        ));

        let mut config = sample();
        config.credentials.user = String::new();
        assert_eq!(config.validate(), Err(ConfigError::Missing("username")));

        let mut config = sample();
        config.node.address = String::new();
        assert_eq!(config.validate(), Err(ConfigError::Missing("node address")));

        let mut config = sample();
        config.interval = Duration::ZERO;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "interval", .. })
        ));

        let mut config = sample();
        config.timeouts.read = Duration::ZERO;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "timeout", .. })
        ));

        let mut config = sample();
        config.context_path = "cdwebconsole".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "context path", .. })
        ));
    }

    #[test]
    fn modes_and_formats_parse_case_insensitively() {
        assert_eq!("Delta".parse::<PublishMode>(), Ok(PublishMode::Delta));
        assert_eq!("gauge".parse::<PublishMode>(), Ok(PublishMode::Gauge));
        assert!("counter".parse::<PublishMode>().is_err());
        assert_eq!("TEXT".parse::<ResponseFormat>(), Ok(ResponseFormat::Text));
        assert!("xml".parse::<ResponseFormat>().is_err());
    }

    #[test]
    fn debug_output_redacts_password() {
        let rendered = format!("{:?}", sample());
        assert!(rendered.contains("admin"));
        assert!(!rendered.contains("secret"));
    }
}
