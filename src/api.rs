//! HTTP collaborators of the auction server.
//!
//! [`ApiClient`] speaks to the identity and logout endpoints and carries the
//! ambient session cookie. [`AuthenticatedClient`] wraps it for every other
//! authenticated call and routes 401s through the [`SessionGuard`].

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::constants;
use crate::error::{IdentityError, SessionError};
use crate::navigation::Navigator;
use crate::session::{Identity, IdentitySource, LogoutClient, SessionGuard};

/// Identity endpoint body: either the user itself or `{ "user": ... }`.
#[derive(Deserialize)]
#[serde(untagged)]
enum IdentityResponse {
    Wrapped { user: Identity },
    Bare(Identity),
}

/// Client for the auction server's session endpoints.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    server_url: String,
    session_cookie: Option<String>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("server_url", &self.server_url)
            .field("has_session", &self.session_cookie.is_some())
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Creates a new API client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(server_url: String, session_cookie: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(constants::HTTP_REQUEST_TIMEOUT)
            .build()?;
        Ok(Self::with_client(client, server_url, session_cookie))
    }

    /// Creates an API client with a pre-configured HTTP client.
    pub fn with_client(client: Client, server_url: String, session_cookie: Option<String>) -> Self {
        Self {
            client,
            server_url: server_url.trim_end_matches('/').to_string(),
            session_cookie,
        }
    }

    /// Client for the configured server and session.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.server_url.clone(),
            config.has_session().then(|| config.session_cookie.clone()),
        )
    }

    /// Returns the server URL.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Absolute URL for `path`.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.server_url, path)
    }

    /// Request builder for `path` with the session cookie attached.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match &self.session_cookie {
            Some(cookie) => builder.header(
                reqwest::header::COOKIE,
                format!("{}={}", constants::SESSION_COOKIE_NAME, cookie),
            ),
            None => builder,
        }
    }

    /// Fetch the current user.
    ///
    /// A 401 is [`IdentityError::Unauthenticated`]; anything else that fails
    /// is [`IdentityError::Unavailable`].
    pub async fn fetch_identity(&self) -> Result<Identity, IdentityError> {
        let response = self
            .request(Method::GET, constants::IDENTITY_ENDPOINT)
            .send()
            .await
            .map_err(|e| IdentityError::Unavailable(e.to_string()))?;

        match response.status() {
            StatusCode::UNAUTHORIZED => Err(IdentityError::Unauthenticated),
            status if status.is_success() => {
                let body: IdentityResponse = response
                    .json()
                    .await
                    .map_err(|e| IdentityError::Unavailable(format!("bad identity body: {e}")))?;
                Ok(match body {
                    IdentityResponse::Wrapped { user } | IdentityResponse::Bare(user) => user,
                })
            }
            status => Err(IdentityError::Unavailable(format!("status {status}"))),
        }
    }

    /// Invalidate the session server-side. A 401 means it already was.
    pub async fn logout(&self) -> Result<(), SessionError> {
        let url = self.url(constants::LOGOUT_ENDPOINT);
        let response = self.request(Method::POST, constants::LOGOUT_ENDPOINT).send().await?;
        let status = response.status();
        if status.is_success() || status == StatusCode::UNAUTHORIZED {
            log::debug!("[Api] Logout acknowledged ({})", status);
            Ok(())
        } else {
            Err(SessionError::Status {
                url,
                status: status.as_u16(),
            })
        }
    }
}

#[async_trait]
impl IdentitySource for ApiClient {
    async fn fetch_identity(&self) -> Result<Identity, IdentityError> {
        ApiClient::fetch_identity(self).await
    }
}

#[async_trait]
impl LogoutClient for ApiClient {
    async fn logout(&self) -> Result<(), SessionError> {
        ApiClient::logout(self).await
    }
}

/// Authenticated REST calls with 401 handling.
///
/// Every 401 is reported to the [`SessionGuard`] and then returned as
/// [`SessionError::Invalid`], exempt session or not.
#[derive(Debug, Clone)]
pub struct AuthenticatedClient {
    api: Arc<ApiClient>,
    guard: Arc<SessionGuard>,
    navigator: Arc<dyn Navigator>,
}

impl AuthenticatedClient {
    /// Wrap `api`.
    pub fn new(api: Arc<ApiClient>, guard: Arc<SessionGuard>, navigator: Arc<dyn Navigator>) -> Self {
        Self {
            api,
            guard,
            navigator,
        }
    }

    /// Underlying client.
    pub fn api(&self) -> &Arc<ApiClient> {
        &self.api
    }

    /// Send `request`, classifying the response status.
    pub async fn send(&self, request: RequestBuilder) -> Result<Response, SessionError> {
        let response = request.send().await?;
        let url = response.url().to_string();
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            let outcome = self
                .guard
                .handle_unauthorized(&url, &self.navigator.current_route());
            log::debug!("[Api] 401 from {}: {:?}", url, outcome);
            return Err(SessionError::Invalid { url });
        }
        if !status.is_success() {
            return Err(SessionError::Status {
                url,
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    /// GET `path` and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, SessionError> {
        let response = self.send(self.api.request(Method::GET, path)).await?;
        Ok(response.json().await?)
    }

    /// POST `body` as JSON to `path` and decode the JSON reply.
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, SessionError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .send(self.api.request(Method::POST, path).json(body))
            .await?;
        Ok(response.json().await?)
    }
}
