// Copyright 2018-2026 the Deno authors. MIT license.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use bereg_cache::Cache;
use bereg_cache::CacheMatchRequest;
use bereg_cache::CacheMatchResponse;
use bereg_cache::CachePutRequest;
use bereg_fetch::FetchHandler;
use bereg_fetch::FetchRequest;
use bereg_fetch::FetchResponse;
use bereg_fetch::RedirectMode;
use http::HeaderMap;
use http::HeaderName;
use http::HeaderValue;
use http::Method;
use http::StatusCode;
use parking_lot::Mutex;
use tokio_util::task::TaskTracker;
use url::Url;

use crate::clients::Clients;
use crate::errors::WorkerError;
use crate::events::FetchDisposition;
use crate::events::FetchEvent;
use crate::events::ResponseSource;
use crate::events::RespondTask;
use crate::events::WorkerResponse;
use crate::options::WorkerOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Parsed,
  Installing,
  Installed,
  Activating,
  Activated,
  /// Install failed; the worker will never become active.
  Redundant,
}

impl fmt::Display for WorkerState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      WorkerState::Parsed => "parsed",
      WorkerState::Installing => "installing",
      WorkerState::Installed => "installed",
      WorkerState::Activating => "activating",
      WorkerState::Activated => "activated",
      WorkerState::Redundant => "redundant",
    };
    f.write_str(name)
  }
}

struct WorkerInner<C: Cache> {
  options: WorkerOptions,
  caches: C,
  fetcher: Arc<dyn FetchHandler>,
  state: Mutex<WorkerState>,
  skip_waiting: AtomicBool,
  clients: Arc<Clients>,
  pending_writes: TaskTracker,
}

/// A worker owning one cache generation.
///
/// Cloning is cheap; clones share state.
pub struct ServiceWorker<C: Cache> {
  inner: Arc<WorkerInner<C>>,
}

impl<C: Cache> Clone for ServiceWorker<C> {
  fn clone(&self) -> Self {
    Self {
      inner: self.inner.clone(),
    }
  }
}

impl<C: Cache> ServiceWorker<C> {
  pub fn new(
    options: WorkerOptions,
    caches: C,
    fetcher: Arc<dyn FetchHandler>,
  ) -> Self {
    Self::with_clients(options, caches, fetcher, Arc::default())
  }

  pub fn with_clients(
    options: WorkerOptions,
    caches: C,
    fetcher: Arc<dyn FetchHandler>,
    clients: Arc<Clients>,
  ) -> Self {
    Self {
      inner: Arc::new(WorkerInner {
        options,
        caches,
        fetcher,
        state: Mutex::new(WorkerState::Parsed),
        skip_waiting: AtomicBool::new(false),
        clients,
        pending_writes: TaskTracker::new(),
      }),
    }
  }

  pub fn options(&self) -> &WorkerOptions {
    &self.inner.options
  }

  pub fn caches(&self) -> &C {
    &self.inner.caches
  }

  pub fn clients(&self) -> &Arc<Clients> {
    &self.inner.clients
  }

  pub fn state(&self) -> WorkerState {
    *self.inner.state.lock()
  }

  fn transition(
    &self,
    operation: &'static str,
    from: WorkerState,
    to: WorkerState,
  ) -> Result<(), WorkerError> {
    let mut state = self.inner.state.lock();
    if *state != from {
      return Err(WorkerError::InvalidState {
        operation,
        state: *state,
      });
    }
    *state = to;
    Ok(())
  }

  fn set_state(&self, state: WorkerState) {
    *self.inner.state.lock() = state;
  }

  /// Ask to become active as soon as install finishes, without waiting for
  /// the clients of a previous worker to close.
  pub fn skip_waiting(&self) {
    self.inner.skip_waiting.store(true, Ordering::SeqCst);
  }

  pub fn skip_waiting_requested(&self) -> bool {
    self.inner.skip_waiting.load(Ordering::SeqCst)
  }

  /// Populate the current generation with the static manifest.
  ///
  /// Resolves once population is complete. On failure nothing is written
  /// and the worker becomes redundant.
  pub async fn install(&self) -> Result<(), WorkerError> {
    self.transition("install", WorkerState::Parsed, WorkerState::Installing)?;
    log::info!("Installing {}", self.inner.options.cache_name);
    match self.populate_static_assets().await {
      Ok(()) => {
        self.set_state(WorkerState::Installed);
        self.skip_waiting();
        Ok(())
      }
      Err(err) => {
        log::error!(
          "Install of {} failed: {}",
          self.inner.options.cache_name,
          err
        );
        self.set_state(WorkerState::Redundant);
        Err(err)
      }
    }
  }

  async fn populate_static_assets(&self) -> Result<(), WorkerError> {
    let urls = self.inner.options.resolve_static_assets()?;
    let cache_id = self
      .inner
      .caches
      .storage_open(self.inner.options.cache_name.clone())
      .await?;

    // Everything is fetched before anything is stored, so a single failure
    // leaves the partition untouched.
    let fetches = urls.into_iter().map(|url| async move {
      let response = self
        .inner
        .fetcher
        .fetch(
          FetchRequest::get(url.clone()).with_redirect(RedirectMode::Follow),
        )
        .await
        .map_err(|source| WorkerError::InstallFetch {
          url: url.clone(),
          source,
        })?;
      if !response.status.is_success() {
        return Err(WorkerError::InstallStatus {
          url,
          status: response.status,
        });
      }
      Ok((url, response))
    });
    let responses = futures::future::try_join_all(fetches).await?;

    for (url, response) in responses {
      self
        .inner
        .caches
        .put(put_request(cache_id, &url, &response))
        .await?;
      log::debug!("Cached {}", url);
    }
    Ok(())
  }

  /// Remove every generation except the current one, then claim all open
  /// clients.
  pub async fn activate(&self) -> Result<(), WorkerError> {
    self.transition(
      "activate",
      WorkerState::Installed,
      WorkerState::Activating,
    )?;
    match self.delete_stale_caches().await {
      Ok(()) => {
        let claimed = self.inner.clients.claim();
        log::debug!("Claimed {} client(s)", claimed);
        self.set_state(WorkerState::Activated);
        log::info!("Activated {}", self.inner.options.cache_name);
        Ok(())
      }
      Err(err) => {
        self.set_state(WorkerState::Installed);
        Err(err)
      }
    }
  }

  async fn delete_stale_caches(&self) -> Result<(), WorkerError> {
    let caches = &self.inner.caches;
    let current = &self.inner.options.cache_name;
    let keys = caches.storage_keys().await?;
    let deletions = keys
      .into_iter()
      .filter(|key| key != current)
      .map(|key| async move {
        let deleted = caches.storage_delete(key.clone()).await?;
        if deleted {
          log::info!("Deleted stale cache {}", key);
        }
        Ok::<_, WorkerError>(())
      });
    futures::future::try_join_all(deletions).await?;
    Ok(())
  }

  /// Intercept a request. Only `GET` requests to `http(s)` URLs are taken
  /// over, everything else is passed through untouched.
  pub fn handle_fetch(&self, event: FetchEvent) -> FetchDisposition {
    if !should_intercept(&event.request) {
      log::debug!(
        "Not intercepting {} {}",
        event.request.method,
        event.request.url
      );
      return FetchDisposition::Passthrough(event.request);
    }
    let cancel = event.cancellation();
    let inner = self.inner.clone();
    FetchDisposition::RespondWith(RespondTask::spawn(
      network_first(inner, event.request),
      cancel,
    ))
  }

  /// Wait for every cache write started so far to finish.
  pub async fn settle(&self) {
    let tracker = &self.inner.pending_writes;
    tracker.close();
    tracker.wait().await;
    tracker.reopen();
  }
}

fn should_intercept(request: &FetchRequest) -> bool {
  request.method == Method::GET && request.url.scheme().starts_with("http")
}

/// Cache key for a request. Fragments never reach the network, so they
/// don't take part in matching either.
pub fn request_key(url: &Url) -> String {
  let mut url = url.clone();
  url.set_fragment(None);
  url.into()
}

async fn network_first<C: Cache>(
  inner: Arc<WorkerInner<C>>,
  request: FetchRequest,
) -> Result<WorkerResponse, WorkerError> {
  let url = request.url.clone();
  match inner.fetcher.fetch(request).await {
    Ok(response) => {
      if response.status == StatusCode::OK {
        // The response goes back right away, the write finishes on its own.
        let clone = response.clone();
        let writer = inner.clone();
        inner.pending_writes.spawn(async move {
          if let Err(err) = writer.store(&url, &clone).await {
            log::warn!("Failed to cache {}: {}", url, err);
          }
        });
      }
      Ok(WorkerResponse {
        response,
        source: ResponseSource::Network,
      })
    }
    Err(source) => {
      log::debug!("Network failed for {} ({}), trying cache", url, source);
      let cached = inner
        .caches
        .r#match(CacheMatchRequest {
          cache_id: None,
          request_url: request_key(&url),
        })
        .await?;
      match cached {
        Some(cached) => Ok(WorkerResponse {
          response: from_cached(url, cached)?,
          source: ResponseSource::Cache,
        }),
        None => Err(WorkerError::NetworkError { url, source }),
      }
    }
  }
}

impl<C: Cache> WorkerInner<C> {
  async fn store(
    &self,
    url: &Url,
    response: &FetchResponse,
  ) -> Result<(), WorkerError> {
    let cache_id = self
      .caches
      .storage_open(self.options.cache_name.clone())
      .await?;
    self.caches.put(put_request(cache_id, url, response)).await?;
    log::debug!("Cached {}", url);
    Ok(())
  }
}

fn put_request(
  cache_id: bereg_cache::CacheId,
  url: &Url,
  response: &FetchResponse,
) -> CachePutRequest {
  CachePutRequest {
    cache_id,
    request_url: request_key(url),
    response_headers: response
      .headers
      .iter()
      .map(|(name, value)| {
        (name.as_str().as_bytes().to_vec(), value.as_bytes().to_vec())
      })
      .collect(),
    response_status: response.status.as_u16(),
    response_status_text: response.status_text().to_string(),
    response_body: response.body.clone(),
  }
}

fn from_cached(
  url: Url,
  cached: CacheMatchResponse,
) -> Result<FetchResponse, WorkerError> {
  let malformed = |reason: String| WorkerError::MalformedEntry {
    url: request_key(&url),
    reason,
  };
  let status = StatusCode::from_u16(cached.response_status)
    .map_err(|err| malformed(err.to_string()))?;
  let mut headers = HeaderMap::with_capacity(cached.response_headers.len());
  for (name, value) in cached.response_headers {
    let name = HeaderName::from_bytes(&name)
      .map_err(|err| malformed(err.to_string()))?;
    let value = HeaderValue::from_bytes(&value)
      .map_err(|err| malformed(err.to_string()))?;
    headers.append(name, value);
  }
  Ok(FetchResponse {
    url,
    status,
    headers,
    body: cached.response_body,
  })
}
