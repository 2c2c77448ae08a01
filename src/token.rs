//! Room join credentials.

use std::{cell::RefCell, collections::HashMap, rc::Rc, time::Duration};

use async_trait::async_trait;
use derive_more::Display;
use tracerr::Traced;
use url::Url;

use crate::{
    conf,
    errors::{Classified, ErrorKind},
    media::UserId,
};

/// Parameters a join credential is issued for.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct TokenRequest {
    /// ID of the application.
    pub app_id: String,

    /// Name of the room.
    pub room: String,

    /// ID of the user joining the room.
    pub user_id: UserId,
}

/// Errors occurring when fetching a credential.
#[derive(Clone, Debug, Display)]
pub enum TokenError {
    /// Configured endpoint is not a valid base URL.
    #[display(fmt = "Invalid token endpoint `{}`", _0)]
    InvalidEndpoint(String),

    /// HTTP request failed.
    #[display(fmt = "Token request failed: {}", _0)]
    Request(String),

    /// Endpoint responded with a non-success status.
    #[display(fmt = "Token endpoint responded with {}", _0)]
    Status(u16),
}

impl Classified for TokenError {
    fn name(&self) -> &'static str {
        "TokenError"
    }

    fn kind(&self) -> ErrorKind {
        ErrorKind::TransportRejection
    }
}

impl From<reqwest::Error> for TokenError {
    fn from(err: reqwest::Error) -> Self {
        Self::Request(err.to_string())
    }
}

/// Issuer of room join credentials.
#[async_trait(?Send)]
pub trait TokenSource {
    /// Fetches a new opaque credential for the given [`TokenRequest`].
    async fn fetch(
        &self,
        request: &TokenRequest,
    ) -> Result<String, Traced<TokenError>>;
}

/// [`TokenSource`] issuing credentials via HTTP `GET
/// {endpoint}/app/{app_id}/room/{room}/user/{user_id}`.
pub struct HttpTokenSource {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpTokenSource {
    /// Creates a new [`HttpTokenSource`] from the provided configuration.
    pub fn new(conf: &conf::Token) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: conf.endpoint.clone(),
            timeout: conf.timeout,
        }
    }

    /// Returns URL to fetch a credential for the given [`TokenRequest`] from.
    fn url(&self, request: &TokenRequest) -> Result<Url, TokenError> {
        let invalid = || TokenError::InvalidEndpoint(self.endpoint.clone());
        let mut url = Url::parse(&self.endpoint).map_err(|_| invalid())?;
        let _ = url
            .path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .extend(&[
                "app",
                request.app_id.as_str(),
                "room",
                request.room.as_str(),
                "user",
                request.user_id.0.as_str(),
            ]);
        Ok(url)
    }
}

#[async_trait(?Send)]
impl TokenSource for HttpTokenSource {
    async fn fetch(
        &self,
        request: &TokenRequest,
    ) -> Result<String, Traced<TokenError>> {
        let url = self.url(request).map_err(tracerr::wrap!())?;
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(tracerr::from_and_wrap!())?;
        if !response.status().is_success() {
            return Err(tracerr::new!(TokenError::Status(
                response.status().as_u16()
            )));
        }
        response.text().await.map_err(tracerr::from_and_wrap!())
    }
}

/// Cache of credentials issued by a [`TokenSource`].
///
/// A credential is reused until it's invalidated, which happens once a join
/// with it is rejected.
pub struct Credentials {
    source: Rc<dyn TokenSource>,
    cache: RefCell<HashMap<TokenRequest, String>>,
}

impl Credentials {
    /// Creates a new empty [`Credentials`] cache over the given
    /// [`TokenSource`].
    pub fn new(source: Rc<dyn TokenSource>) -> Self {
        Self {
            source,
            cache: RefCell::default(),
        }
    }

    /// Returns a cached credential for the given [`TokenRequest`], fetching
    /// it if there is none.
    ///
    /// # Errors
    ///
    /// Errors of the underlying [`TokenSource`].
    pub async fn token(
        &self,
        request: &TokenRequest,
    ) -> Result<String, Traced<TokenError>> {
        if let Some(token) = self.cache.borrow().get(request) {
            return Ok(token.clone());
        }
        let token = self.source.fetch(request).await?;
        drop(
            self.cache
                .borrow_mut()
                .insert(request.clone(), token.clone()),
        );
        Ok(token)
    }

    /// Drops a cached credential, so the next [`Credentials::token()`] call
    /// fetches a new one.
    pub fn invalidate(&self, request: &TokenRequest) {
        if self.cache.borrow_mut().remove(request).is_some() {
            log::debug!("Credentials of {} are invalidated", request.user_id);
        }
    }
}
