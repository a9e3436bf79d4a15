//! EVA API HTTP client

use std::future::Future;
use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use tracing::{debug, info, warn};

use crate::config::AuthConfig;
use crate::credential::CredentialCache;
use crate::error::{Error, Result};

use super::types::*;

/// How many times an operation is retried after the upstream rejects the token
pub const MAX_AUTH_RETRIES: usize = 1;

/// EVA API client
///
/// Holds the shared [`CredentialCache`]; tenant credentials are passed per call
/// so one client serves every tenant.
#[derive(Clone)]
pub struct EvaClient {
    client: Client,
    credentials: CredentialCache,
}

impl EvaClient {
    /// Create a new client with a 120s request timeout
    pub fn new(credentials: CredentialCache) -> Result<Self> {
        Self::with_timeout(credentials, Duration::from_secs(120))
    }

    pub fn with_timeout(credentials: CredentialCache, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(Error::Http)?;

        Ok(Self {
            client,
            credentials,
        })
    }

    pub fn credentials(&self) -> &CredentialCache {
        &self.credentials
    }

    pub(crate) fn http(&self) -> &Client {
        &self.client
    }

    /// Exchange client credentials for a bearer token
    pub async fn login(&self, auth: &AuthConfig) -> Result<String> {
        let url = endpoint(auth, "login");
        debug!("Logging in to EVA as client {}", auth.client_id);

        let response = self
            .client
            .post(&url)
            .json(&LoginRequest {
                client_id: &auth.client_id,
                password: &auth.password,
            })
            .send()
            .await
            .map_err(Error::Http)?;

        let status = response.status();
        let body = response.bytes().await.map_err(Error::Http)?;
        if !status.is_success() {
            return Err(Error::Auth(format!(
                "login failed for client {}: {} - {}",
                auth.client_id,
                status,
                String::from_utf8_lossy(&body)
            )));
        }

        let login: LoginResponse = serde_json::from_slice(&body)?;
        login
            .message
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Auth(format!("login for client {} returned no token", auth.client_id)))
    }

    /// Cached token for the tenant, logging in on a miss
    pub async fn token(&self, auth: &AuthConfig) -> Result<String> {
        self.credentials
            .get_token(&auth.client_id, || self.login(auth))
            .await
    }

    /// Run `op` with a bearer token, retrying once with a fresh token if the
    /// upstream rejects it
    ///
    /// A second consecutive rejection is returned as [`Error::Auth`].
    pub async fn with_auth_retry<T, F, Fut>(&self, auth: &AuthConfig, mut op: F) -> Result<T>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retries = 0;
        loop {
            let token = self.token(auth).await?;
            match op(token).await {
                Err(Error::Auth(reason)) if retries < MAX_AUTH_RETRIES => {
                    warn!(
                        "EVA rejected token for client {} ({}), retrying with a fresh one",
                        auth.client_id, reason
                    );
                    self.credentials.invalidate(&auth.client_id);
                    retries += 1;
                }
                Err(Error::Auth(reason)) => {
                    self.credentials.invalidate(&auth.client_id);
                    return Err(Error::Auth(reason));
                }
                other => return other,
            }
        }
    }

    /// Send a prompt to the conversational endpoint
    pub async fn ask(&self, auth: &AuthConfig, request: &AskRequest) -> Result<AskResponse> {
        debug!(
            "EVA request: template={:?}, session={:?}",
            request.template, request.session_id
        );

        let response = self
            .with_auth_retry(auth, |token| self.post_ask(auth, request, token))
            .await?;

        info!(
            "EVA response: {} characters, session={:?}",
            response.message.len(),
            response.session_id
        );
        Ok(response)
    }

    async fn post_ask(&self, auth: &AuthConfig, request: &AskRequest, token: String) -> Result<AskResponse> {
        let response = self
            .client
            .post(endpoint(auth, "ai/ask"))
            .bearer_auth(token)
            .json(request)
            .send()
            .await
            .map_err(Error::Http)?;

        let response = check_status(response).await?;
        let body = response.bytes().await.map_err(Error::Http)?;
        serde_json::from_slice(&body).map_err(|e| {
            Error::UpstreamApi {
                status: StatusCode::OK.as_u16(),
                body: format!("unparseable ask response: {} - {}", e, String::from_utf8_lossy(&body)),
            }
        })
    }
}

/// `{host}/api/{path}`
pub(crate) fn endpoint(auth: &AuthConfig, path: &str) -> String {
    format!("{}/api/{}", auth.host.trim_end_matches('/'), path)
}

/// Pass successful responses through, classify the rest
pub(crate) async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.bytes().await.unwrap_or_default();
    Err(classify_failure(status, &body))
}

/// Map a failed EVA response to [`Error::Auth`] or [`Error::UpstreamApi`]
///
/// Token rejection is signalled by the sentinel body message; a bare 401 is
/// treated the same way.
pub fn classify_failure(status: StatusCode, body: &[u8]) -> Error {
    let message = serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message);

    if message.as_deref() == Some(AUTH_EXPIRED_MESSAGE) || status == StatusCode::UNAUTHORIZED {
        return Error::Auth(message.unwrap_or_else(|| status.to_string()));
    }

    Error::UpstreamApi {
        status: status.as_u16(),
        body: String::from_utf8_lossy(body).into_owned(),
    }
}
