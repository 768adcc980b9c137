// Copyright 2018-2026 the Deno authors. MIT license.

use bereg_cache::CacheError;
use bereg_fetch::FetchError;
use http::StatusCode;
use url::Url;

use crate::worker::WorkerState;

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
  #[error("Install failed: could not fetch {url}")]
  InstallFetch {
    url: Url,
    #[source]
    source: FetchError,
  },
  #[error("Install failed: {url} responded with {status}")]
  InstallStatus { url: Url, status: StatusCode },
  #[error("Invalid static asset \"{specifier}\": {source}")]
  InvalidAsset {
    specifier: String,
    #[source]
    source: url::ParseError,
  },
  #[error(transparent)]
  Cache(#[from] CacheError),
  #[error("Network error when fetching {url}")]
  NetworkError {
    url: Url,
    #[source]
    source: FetchError,
  },
  #[error("Cached entry for {url} is malformed: {reason}")]
  MalformedEntry { url: String, reason: String },
  #[error("Cannot {operation} a worker that is {state}")]
  InvalidState {
    operation: &'static str,
    state: WorkerState,
  },
  #[error("Request was cancelled")]
  Cancelled,
  #[error(transparent)]
  Join(#[from] tokio::task::JoinError),
}

impl WorkerError {
  /// Whether this is the error a requester sees when both the network and
  /// the cache came up empty.
  pub fn is_network_error(&self) -> bool {
    matches!(self, WorkerError::NetworkError { .. })
  }
}
