// Copyright 2018-2026 the Deno authors. MIT license.

mod fs_fetch_handler;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
pub use fs_fetch_handler::FsFetchHandler;
use http::HeaderMap;
use http::HeaderValue;
use http::Method;
use http::StatusCode;
use http::header::USER_AGENT;
use url::Url;

pub const USER_AGENT_STRING: &str =
  concat!("bereg/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
  #[error("error sending request for url ({url}): {source}")]
  Request {
    url: Url,
    #[source]
    source: reqwest::Error,
  },
  #[error("Unable to fetch \"{0}\".")]
  File(Url),
  #[error("scheme '{0}' is not supported")]
  UnsupportedScheme(String),
  #[error("network is unavailable")]
  Offline,
  #[error("Invalid user agent {0}")]
  InvalidUserAgent(String),
  #[error(transparent)]
  ClientCreate(reqwest::Error),
}

/// Redirects followed by an HTTP client, at most.
const MAX_REDIRECTS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RedirectMode {
  /// Follow redirects and hand back the final response.
  Follow,
  /// Hand a redirect response back as is.
  #[default]
  Manual,
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
  pub method: Method,
  pub url: Url,
  pub headers: HeaderMap,
  pub body: Bytes,
  pub redirect: RedirectMode,
}

impl FetchRequest {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: HeaderMap::new(),
      body: Bytes::new(),
      redirect: RedirectMode::Manual,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  pub fn with_redirect(mut self, redirect: RedirectMode) -> Self {
    self.redirect = redirect;
    self
  }
}

/// A fully buffered response. Cloning is cheap, the body is shared.
#[derive(Debug, Clone)]
pub struct FetchResponse {
  pub url: Url,
  pub status: StatusCode,
  pub headers: HeaderMap,
  pub body: Bytes,
}

impl FetchResponse {
  pub fn new(url: Url, status: StatusCode, body: impl Into<Bytes>) -> Self {
    Self {
      url,
      status,
      headers: HeaderMap::new(),
      body: body.into(),
    }
  }

  pub fn status_text(&self) -> &'static str {
    self.status.canonical_reason().unwrap_or("")
  }
}

/// Performs a request against the network (or whatever stands in for it).
///
/// Any response, whatever its status, is `Ok`. An `Err` means no response
/// could be obtained at all.
#[async_trait]
pub trait FetchHandler: Send + Sync + 'static {
  async fn fetch(
    &self,
    request: FetchRequest,
  ) -> Result<FetchResponse, FetchError>;
}

#[derive(Debug, Clone, Default)]
pub struct CreateHttpClientOptions {
  pub timeout: Option<Duration>,
}

/// Create new instance of async reqwest::Client. With
/// [`RedirectMode::Manual`] a redirect response is handed back as is.
pub fn create_http_client(
  user_agent: &str,
  options: CreateHttpClientOptions,
  redirect: RedirectMode,
) -> Result<reqwest::Client, FetchError> {
  let mut headers = HeaderMap::new();
  let user_agent = user_agent
    .parse::<HeaderValue>()
    .map_err(|_| FetchError::InvalidUserAgent(user_agent.to_string()))?;
  headers.insert(USER_AGENT, user_agent);
  let policy = match redirect {
    RedirectMode::Follow => reqwest::redirect::Policy::limited(MAX_REDIRECTS),
    RedirectMode::Manual => reqwest::redirect::Policy::none(),
  };
  let mut builder = reqwest::Client::builder()
    .redirect(policy)
    .default_headers(headers)
    .use_rustls_tls();
  if let Some(timeout) = options.timeout {
    builder = builder.timeout(timeout);
  }
  builder.build().map_err(FetchError::ClientCreate)
}

/// The redirect policy of a reqwest client is fixed when it is built, so
/// there is one client per [`RedirectMode`].
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
  following_client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new(options: CreateHttpClientOptions) -> Result<Self, FetchError> {
    Ok(Self {
      client: create_http_client(
        USER_AGENT_STRING,
        options.clone(),
        RedirectMode::Manual,
      )?,
      following_client: create_http_client(
        USER_AGENT_STRING,
        options,
        RedirectMode::Follow,
      )?,
    })
  }
}

#[async_trait]
impl FetchHandler for HttpFetcher {
  async fn fetch(
    &self,
    request: FetchRequest,
  ) -> Result<FetchResponse, FetchError> {
    let url = request.url.clone();
    let to_fetch_error = |source| FetchError::Request {
      url: url.clone(),
      source,
    };
    log::debug!("{} {}", request.method, request.url);
    let client = match request.redirect {
      RedirectMode::Follow => &self.following_client,
      RedirectMode::Manual => &self.client,
    };
    let mut builder = client
      .request(request.method, request.url)
      .headers(request.headers);
    if !request.body.is_empty() {
      builder = builder.body(request.body);
    }
    let response = builder.send().await.map_err(to_fetch_error)?;
    let status = response.status();
    let headers = response.headers().clone();
    let response_url = response.url().clone();
    let body = response.bytes().await.map_err(to_fetch_error)?;
    Ok(FetchResponse {
      url: response_url,
      status,
      headers,
      body,
    })
  }
}

/// Sends `file:` URLs to the file system and everything else to HTTP.
#[derive(Clone)]
pub struct SchemeFetchHandler {
  http: HttpFetcher,
  fs: FsFetchHandler,
}

impl SchemeFetchHandler {
  pub fn new(http: HttpFetcher) -> Self {
    Self {
      http,
      fs: FsFetchHandler,
    }
  }
}

#[async_trait]
impl FetchHandler for SchemeFetchHandler {
  async fn fetch(
    &self,
    request: FetchRequest,
  ) -> Result<FetchResponse, FetchError> {
    match request.url.scheme() {
      "file" => self.fs.fetch(request).await,
      "http" | "https" => self.http.fetch(request).await,
      scheme => Err(FetchError::UnsupportedScheme(scheme.to_string())),
    }
  }
}

/// Fails every request as if the network were down.
#[derive(Clone, Copy, Default)]
pub struct OfflineFetchHandler;

#[async_trait]
impl FetchHandler for OfflineFetchHandler {
  async fn fetch(
    &self,
    request: FetchRequest,
  ) -> Result<FetchResponse, FetchError> {
    log::debug!("offline, refusing {}", request.url);
    Err(FetchError::Offline)
  }
}
