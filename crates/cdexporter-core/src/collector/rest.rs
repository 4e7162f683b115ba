//! Blocking HTTP transport for the Connect:Direct Web Services API.

use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE, COOKIE};
use serde::Serialize;

use crate::collector::fetch::FetchError;
use crate::collector::session::{
    AuthError, INITIAL_XSRF_TOKEN, Session, SignOutError, basic_credential,
};
use crate::collector::traits::ControlApi;
use crate::config::{ConfigError, NodeEndpoint, PollConfig};

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";
const XSRF_HEADER: &str = "X-XSRF-TOKEN";

/// Longest response body kept in error messages.
const MAX_ERROR_BODY: usize = 256;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignOnRequest<'a> {
    ip_address: &'a str,
    port: u16,
    protocol: &'a str,
}

/// Real [`ControlApi`] backed by a blocking reqwest client.
///
/// Every call is bounded by the configured connect timeout, and the whole
/// request by connect + read timeout.
pub struct RestApi {
    client: Client,
    signon_url: String,
    signout_url: String,
    query_url: String,
    credential: String,
    node: NodeEndpoint,
}

impl RestApi {
    pub fn new(config: &PollConfig) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .connect_timeout(config.timeouts.connect)
            .timeout(config.timeouts.connect + config.timeouts.read)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            client,
            signon_url: config.endpoint("signon"),
            signout_url: config.endpoint("signout"),
            query_url: config.query_url(),
            credential: basic_credential(&config.credentials.user, &config.credentials.password),
            node: config.node.clone(),
        })
    }

    /// Adds the headers every authenticated call carries.
    fn authenticated(&self, builder: RequestBuilder, session: &Session) -> RequestBuilder {
        builder
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .header(XSRF_HEADER, session.xsrf_token())
            .header(AUTHORIZATION, session.authorization())
            .header(COOKIE, session.cookie())
    }
}

impl ControlApi for RestApi {
    fn sign_on(&self) -> Result<Session, AuthError> {
        let body = SignOnRequest {
            ip_address: &self.node.address,
            port: self.node.port,
            protocol: &self.node.protocol,
        };

        let response = self
            .client
            .post(&self.signon_url)
            .header(AUTHORIZATION, &self.credential)
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .header(XSRF_HEADER, INITIAL_XSRF_TOKEN)
            .header(CACHE_CONTROL, "no-cache")
            .json(&body)
            .send()
            .map_err(auth_error)?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body: error_body(response),
            });
        }

        Session::from_headers(response.headers())
    }

    fn query_queue(&self, session: &Session) -> Result<String, FetchError> {
        let response = self
            .authenticated(self.client.get(&self.query_url), session)
            .send()
            .map_err(fetch_error)?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::Status {
                status: status.as_u16(),
                body: error_body(response),
            });
        }

        response.text().map_err(fetch_error)
    }

    fn sign_out(&self, session: &Session) -> Result<(), SignOutError> {
        let response = self
            .authenticated(self.client.delete(&self.signout_url), session)
            .json(&session.access_token_payload())
            .send()
            .map_err(|e| SignOutError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SignOutError::Rejected {
                status: status.as_u16(),
                body: error_body(response),
            });
        }
        Ok(())
    }
}

fn auth_error(e: reqwest::Error) -> AuthError {
    if e.is_timeout() {
        AuthError::Timeout
    } else if e.is_connect() {
        AuthError::Connect(e.to_string())
    } else {
        AuthError::Transport(e.to_string())
    }
}

fn fetch_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else if e.is_connect() {
        FetchError::Connect(e.to_string())
    } else {
        FetchError::Transport(e.to_string())
    }
}

/// Reads a response body for an error message, truncated.
fn error_body(response: Response) -> String {
    let text = response.text().unwrap_or_default();
    let text = text.trim();
    if text.chars().count() > MAX_ERROR_BODY {
        let mut truncated: String = text.chars().take(MAX_ERROR_BODY).collect();
        truncated.push('…');
        truncated
    } else {
        text.to_string()
    }
}
