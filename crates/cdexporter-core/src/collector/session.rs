//! Authenticated session lifecycle.
//!
//! A [`Session`] only exists fully populated: sign-on either yields all three
//! credential artifacts or no session at all. The [`SessionManager`] holds
//! at most one session, re-authenticates only when asked to (after a failed
//! cycle) and releases the session best-effort on shutdown.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, SET_COOKIE};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::collector::traits::ControlApi;

/// Anti-forgery token sent with the first sign-on, before the server
/// has issued one.
pub const INITIAL_XSRF_TOKEN: &str = "Y2hlY2tpdA==";

/// Response header carrying the authorization token.
pub(crate) const AUTHORIZATION_HEADER: &str = "authorization";
/// Response header carrying the anti-forgery token.
pub(crate) const CSRF_HEADER: &str = "_csrf";

/// Error type for sign-on failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The server answered with a non-success status.
    Rejected { status: u16, body: String },
    /// Connect or read timed out.
    Timeout,
    /// The server could not be reached.
    Connect(String),
    /// Any other transport failure.
    Transport(String),
    /// Success status, but a credential artifact was absent or empty.
    MissingArtifact(&'static str),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::Rejected { status, body } => {
                write!(f, "sign-on rejected with status {}: {}", status, body)
            }
            AuthError::Timeout => write!(f, "sign-on timed out"),
            AuthError::Connect(msg) => write!(f, "sign-on connection failed: {}", msg),
            AuthError::Transport(msg) => write!(f, "sign-on failed: {}", msg),
            AuthError::MissingArtifact(name) => {
                write!(f, "sign-on response lacks the '{}' header", name)
            }
        }
    }
}

impl std::error::Error for AuthError {}

/// Error type for sign-out failures. Only ever logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignOutError {
    Rejected { status: u16, body: String },
    Transport(String),
}

impl fmt::Display for SignOutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignOutError::Rejected { status, body } => {
                write!(f, "sign-out rejected with status {}: {}", status, body)
            }
            SignOutError::Transport(msg) => write!(f, "sign-out failed: {}", msg),
        }
    }
}

impl std::error::Error for SignOutError {}

/// Encodes `user:password` as a Basic authorization value.
pub fn basic_credential(user: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{}:{}", user, password)))
}

/// One authenticated context with the web services API.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    authorization: String,
    xsrf_token: String,
    cookie: String,
    created_at: DateTime<Utc>,
}

impl Session {
    /// Builds a session; returns `None` unless every artifact is non-empty.
    pub fn new(
        authorization: impl Into<String>,
        xsrf_token: impl Into<String>,
        cookie: impl Into<String>,
    ) -> Option<Self> {
        let authorization = authorization.into();
        let xsrf_token = xsrf_token.into();
        let cookie = cookie.into();
        if authorization.is_empty() || xsrf_token.is_empty() || cookie.is_empty() {
            return None;
        }
        Some(Self {
            authorization,
            xsrf_token,
            cookie,
            created_at: Utc::now(),
        })
    }

    /// Extracts the credential artifacts from sign-on response headers.
    ///
    /// Multiple `set-cookie` headers are reduced to their `name=value`
    /// pairs, joined the way a `Cookie` request header expects.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, AuthError> {
        let authorization = header_value(headers, AUTHORIZATION_HEADER)
            .ok_or(AuthError::MissingArtifact(AUTHORIZATION_HEADER))?;
        let xsrf_token =
            header_value(headers, CSRF_HEADER).ok_or(AuthError::MissingArtifact(CSRF_HEADER))?;

        let cookie = headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|v| v.split(';').next())
            .map(str::trim)
            .filter(|pair| !pair.is_empty())
            .collect::<Vec<_>>()
            .join("; ");

        Self::new(authorization, xsrf_token, cookie)
            .ok_or(AuthError::MissingArtifact("set-cookie"))
    }

    pub fn authorization(&self) -> &str {
        &self.authorization
    }

    pub fn xsrf_token(&self) -> &str {
        &self.xsrf_token
    }

    pub fn cookie(&self) -> &str {
        &self.cookie
    }

    /// Seconds since sign-on.
    pub fn age_secs(&self) -> i64 {
        (Utc::now() - self.created_at).num_seconds()
    }

    /// Opaque payload sent in the sign-out body.
    pub fn access_token_payload(&self) -> impl Serialize + '_ {
        #[derive(Serialize)]
        struct AccessToken<'a> {
            authorization: &'a str,
            #[serde(rename = "_csrf")]
            csrf: &'a str,
            #[serde(rename = "set-cookie")]
            cookie: &'a str,
        }

        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Payload<'a> {
            user_access_token: AccessToken<'a>,
        }

        Payload {
            user_access_token: AccessToken {
                authorization: &self.authorization,
                csrf: &self.xsrf_token,
                cookie: &self.cookie,
            },
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Owner of the current session.
///
/// Sessions are never renewed proactively; the poll loop invalidates the
/// session after a failed cycle and asks for a new one.
#[derive(Debug, Default)]
pub struct SessionManager {
    current: Option<Session>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signs on, replacing any current session.
    ///
    /// On failure no session is held afterwards.
    pub fn authenticate<A: ControlApi + ?Sized>(&mut self, api: &A) -> Result<&Session, AuthError> {
        self.current = None;
        match api.sign_on() {
            Ok(session) => {
                info!("signon: OK");
                Ok(self.current.insert(session))
            }
            Err(e) => {
                warn!(error = %e, "signon: failed");
                Err(e)
            }
        }
    }

    /// Returns the current session, signing on first if there is none.
    pub fn ensure<A: ControlApi + ?Sized>(&mut self, api: &A) -> Result<&Session, AuthError> {
        match self.current {
            Some(ref session) => Ok(session),
            None => self.authenticate(api),
        }
    }

    /// Drops the current session without contacting the server.
    pub fn invalidate(&mut self) -> Option<Session> {
        let session = self.current.take();
        if let Some(ref s) = session {
            debug!(age_secs = s.age_secs(), "session invalidated");
        }
        session
    }

    /// Signs the current session out. Failures are logged, never returned.
    pub fn release<A: ControlApi + ?Sized>(&mut self, api: &A) {
        let Some(session) = self.current.take() else {
            return;
        };
        match api.sign_out(&session) {
            Ok(()) => info!(age_secs = session.age_secs(), "signout: OK"),
            Err(e) => warn!(error = %e, "signout: failed"),
        }
    }

    pub fn current(&self) -> Option<&Session> {
        self.current.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.current.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::MockApi;
    use reqwest::header::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn basic_credential_encodes_user_and_password() {
        assert_eq!(basic_credential("admin", "secret"), "Basic YWRtaW46c2VjcmV0");
        assert_eq!(basic_credential("", ""), "Basic Og==");
    }

    #[test]
    fn from_headers_extracts_all_artifacts() {
        let map = headers(&[
            ("authorization", "Bearer abc"),
            ("_csrf", "token-1"),
            ("set-cookie", "JSESSIONID=xyz; Path=/; Secure; HttpOnly"),
            ("set-cookie", "XSRF-TOKEN=token-1; Path=/"),
        ]);

        let session = Session::from_headers(&map).unwrap();
        assert_eq!(session.authorization(), "Bearer abc");
        assert_eq!(session.xsrf_token(), "token-1");
        assert_eq!(session.cookie(), "JSESSIONID=xyz; XSRF-TOKEN=token-1");
    }

    #[test]
    fn from_headers_never_builds_partial_session() {
        let no_csrf = headers(&[("authorization", "Bearer abc"), ("set-cookie", "A=1")]);
        assert_eq!(
            Session::from_headers(&no_csrf),
            Err(AuthError::MissingArtifact("_csrf"))
        );

        let no_cookie = headers(&[("authorization", "Bearer abc"), ("_csrf", "t")]);
        assert_eq!(
            Session::from_headers(&no_cookie),
            Err(AuthError::MissingArtifact("set-cookie"))
        );

        let empty_auth = headers(&[("authorization", " "), ("_csrf", "t"), ("set-cookie", "A=1")]);
        assert_eq!(
            Session::from_headers(&empty_auth),
            Err(AuthError::MissingArtifact("authorization"))
        );
    }

    #[test]
    fn new_requires_every_artifact() {
        assert!(Session::new("a", "b", "c").is_some());
        assert!(Session::new("", "b", "c").is_none());
        assert!(Session::new("a", "", "c").is_none());
        assert!(Session::new("a", "b", "").is_none());
    }

    #[test]
    fn access_token_payload_shape() {
        let session = Session::new("Bearer abc", "t1", "A=1").unwrap();
        let json = serde_json::to_value(session.access_token_payload()).unwrap();
        assert_eq!(json["userAccessToken"]["authorization"], "Bearer abc");
        assert_eq!(json["userAccessToken"]["_csrf"], "t1");
        assert_eq!(json["userAccessToken"]["set-cookie"], "A=1");
    }

    #[test]
    fn debug_output_hides_tokens() {
        let session = Session::new("Bearer abc", "t1", "A=1").unwrap();
        let rendered = format!("{:?}", session);
        assert!(!rendered.contains("Bearer abc"));
        assert!(!rendered.contains("t1"));
    }

    #[test]
    fn ensure_signs_on_once_and_reuses_session() {
        let api = MockApi::new();
        let mut sessions = SessionManager::new();

        sessions.ensure(&api).unwrap();
        sessions.ensure(&api).unwrap();
        assert_eq!(api.sign_on_calls(), 1);
        assert!(sessions.is_authenticated());
    }

    #[test]
    fn failed_authenticate_leaves_no_session() {
        let api = MockApi::new();
        let mut sessions = SessionManager::new();
        sessions.ensure(&api).unwrap();

        api.push_sign_on(Err(AuthError::Rejected {
            status: 401,
            body: "bad credentials".to_string(),
        }));
        assert!(sessions.authenticate(&api).is_err());
        assert!(!sessions.is_authenticated());
    }

    #[test]
    fn release_is_best_effort() {
        let api = MockApi::new();
        let mut sessions = SessionManager::new();
        sessions.ensure(&api).unwrap();

        api.push_sign_out(Err(SignOutError::Transport("connection reset".to_string())));
        sessions.release(&api);
        assert_eq!(api.sign_out_calls(), 1);
        assert!(!sessions.is_authenticated());

        // Nothing to release: no call.
        sessions.release(&api);
        assert_eq!(api.sign_out_calls(), 1);
    }

    #[test]
    fn invalidate_does_not_contact_server() {
        let api = MockApi::new();
        let mut sessions = SessionManager::new();
        sessions.ensure(&api).unwrap();

        assert!(sessions.invalidate().is_some());
        assert!(sessions.current().is_none());
        assert_eq!(api.sign_out_calls(), 0);
    }
}
