// Copyright 2018-2026 the Deno authors. MIT license.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use bereg_cache::Cache;
use bereg_cache::CacheDeleteRequest;
use bereg_cache::CacheError;
use bereg_cache::CacheId;
use bereg_cache::CacheImpl;
use bereg_cache::CacheMatchRequest;
use bereg_cache::CacheMatchResponse;
use bereg_cache::CachePutRequest;
use bereg_cache::InMemoryCache;
use bereg_fetch::FetchError;
use bereg_fetch::FetchHandler;
use bereg_fetch::FetchRequest;
use bereg_fetch::FetchResponse;
use bereg_fetch::RedirectMode;
use bytes::Bytes;
use http::HeaderName;
use http::HeaderValue;
use http::Method;
use http::StatusCode;
use http::header::CONTENT_TYPE;
use http::header::LOCATION;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::FetchDisposition;
use crate::FetchEvent;
use crate::ResponseSource;
use crate::ServiceWorker;
use crate::WorkerError;
use crate::WorkerHost;
use crate::WorkerOptions;
use crate::WorkerResponse;
use crate::WorkerState;

const SCOPE: &str = "https://app.test/";

#[derive(Clone)]
enum Route {
  Respond(StatusCode, &'static str),
  /// 301 to another path under the scope.
  Redirect(&'static str),
  Fail,
  Hang,
}

/// A network that answers from a routing table.
#[derive(Default)]
struct ScriptedNetwork {
  routes: Mutex<HashMap<String, Route>>,
  offline: AtomicBool,
  requests: Mutex<Vec<(Method, String)>>,
}

impl ScriptedNetwork {
  fn route(&self, path: &str, route: Route) {
    let url = Url::parse(SCOPE).unwrap().join(path).unwrap();
    self.routes.lock().insert(url.to_string(), route);
  }

  fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  fn request_count(&self) -> usize {
    self.requests.lock().len()
  }
}

#[async_trait]
impl FetchHandler for ScriptedNetwork {
  async fn fetch(
    &self,
    request: FetchRequest,
  ) -> Result<FetchResponse, FetchError> {
    self
      .requests
      .lock()
      .push((request.method.clone(), request.url.to_string()));
    if self.offline.load(Ordering::SeqCst) {
      return Err(FetchError::Offline);
    }
    let mut url = request.url;
    loop {
      let route = self.routes.lock().get(url.as_str()).cloned();
      match route {
        Some(Route::Respond(status, body)) => {
          let body = Bytes::from_static(body.as_bytes());
          let mut response = FetchResponse::new(url, status, body);
          response
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
          response.headers.insert(
            HeaderName::from_static("x-legacy"),
            HeaderValue::from_bytes(&[b'c', 0xE9]).unwrap(),
          );
          return Ok(response);
        }
        Some(Route::Redirect(path)) => {
          let target = Url::parse(SCOPE).unwrap().join(path).unwrap();
          if request.redirect == RedirectMode::Follow {
            url = target;
            continue;
          }
          let mut response =
            FetchResponse::new(url, StatusCode::MOVED_PERMANENTLY, "");
          response.headers.insert(
            LOCATION,
            HeaderValue::from_str(target.as_str()).unwrap(),
          );
          return Ok(response);
        }
        Some(Route::Hang) => std::future::pending().await,
        Some(Route::Fail) | None => return Err(FetchError::Offline),
      }
    }
  }
}

/// In-memory caches whose writes can be held back and whose partition
/// deletes can be made to fail.
#[derive(Clone, Default)]
struct ScriptedCache {
  inner: InMemoryCache,
  control: Arc<CacheControl>,
}

#[derive(Default)]
struct CacheControl {
  hold_puts: AtomicBool,
  put_started: Notify,
  release_puts: Notify,
  fail_deletes: AtomicBool,
}

#[async_trait]
impl Cache for ScriptedCache {
  async fn storage_open(
    &self,
    cache_name: String,
  ) -> Result<CacheId, CacheError> {
    self.inner.storage_open(cache_name).await
  }

  async fn storage_has(&self, cache_name: String) -> Result<bool, CacheError> {
    self.inner.storage_has(cache_name).await
  }

  async fn storage_delete(
    &self,
    cache_name: String,
  ) -> Result<bool, CacheError> {
    if self.control.fail_deletes.load(Ordering::SeqCst) {
      return Err(CacheError::NotFound);
    }
    self.inner.storage_delete(cache_name).await
  }

  async fn storage_keys(&self) -> Result<Vec<String>, CacheError> {
    self.inner.storage_keys().await
  }

  async fn put(&self, request: CachePutRequest) -> Result<(), CacheError> {
    if self.control.hold_puts.load(Ordering::SeqCst) {
      self.control.put_started.notify_one();
      self.control.release_puts.notified().await;
    }
    self.inner.put(request).await
  }

  async fn r#match(
    &self,
    request: CacheMatchRequest,
  ) -> Result<Option<CacheMatchResponse>, CacheError> {
    self.inner.r#match(request).await
  }

  async fn delete(
    &self,
    request: CacheDeleteRequest,
  ) -> Result<bool, CacheError> {
    self.inner.delete(request).await
  }

  async fn keys(&self, cache_id: CacheId) -> Result<Vec<String>, CacheError> {
    self.inner.keys(cache_id).await
  }
}

fn network_with_manifest() -> Arc<ScriptedNetwork> {
  let network = Arc::new(ScriptedNetwork::default());
  network.route("./", Route::Respond(StatusCode::OK, "<html>root</html>"));
  network.route(
    "./index.html",
    Route::Respond(StatusCode::OK, "<html>index</html>"),
  );
  network
}

fn create_worker<C: Cache>(
  caches: C,
  network: &Arc<ScriptedNetwork>,
) -> ServiceWorker<C> {
  let options = WorkerOptions::new(Url::parse(SCOPE).unwrap());
  ServiceWorker::new(options, caches, network.clone())
}

async fn activated_worker(
  network: &Arc<ScriptedNetwork>,
) -> ServiceWorker<InMemoryCache> {
  let worker = create_worker(InMemoryCache::default(), network);
  worker.install().await.unwrap();
  worker.activate().await.unwrap();
  worker
}

fn get(path: &str) -> FetchRequest {
  FetchRequest::get(Url::parse(SCOPE).unwrap().join(path).unwrap())
}

async fn respond<C: Cache>(
  worker: &ServiceWorker<C>,
  request: FetchRequest,
) -> Result<WorkerResponse, WorkerError> {
  match worker.handle_fetch(FetchEvent::new(request)) {
    FetchDisposition::RespondWith(task) => task.await,
    FetchDisposition::Passthrough(request) => {
      panic!("{} was not intercepted", request.url)
    }
  }
}

async fn partition_keys<C: Cache>(caches: &C, name: &str) -> Vec<String> {
  let id = caches.storage_open(name.to_string()).await.unwrap();
  caches.keys(id).await.unwrap()
}

#[tokio::test]
async fn install_caches_manifest() {
  let network = network_with_manifest();
  let worker = create_worker(InMemoryCache::default(), &network);
  worker.install().await.unwrap();

  assert_eq!(worker.state(), WorkerState::Installed);
  assert!(worker.skip_waiting_requested());
  assert_eq!(
    partition_keys(worker.caches(), "be-regular-v3").await,
    vec!["https://app.test/", "https://app.test/index.html"]
  );
}

#[tokio::test]
async fn install_is_all_or_nothing() {
  let network = Arc::new(ScriptedNetwork::default());
  network.route("./", Route::Respond(StatusCode::OK, "root"));
  network.route("./index.html", Route::Fail);
  let worker = create_worker(InMemoryCache::default(), &network);

  let err = worker.install().await.unwrap_err();
  assert!(matches!(
    &err,
    WorkerError::InstallFetch { url, .. }
      if url.as_str() == "https://app.test/index.html"
  ));
  assert_eq!(worker.state(), WorkerState::Redundant);
  assert!(!worker.skip_waiting_requested());
  assert!(partition_keys(worker.caches(), "be-regular-v3").await.is_empty());
}

#[tokio::test]
async fn install_follows_redirects() {
  let network = Arc::new(ScriptedNetwork::default());
  network.route("./", Route::Redirect("./index.html"));
  network.route(
    "./index.html",
    Route::Respond(StatusCode::OK, "<html>index</html>"),
  );
  let worker = create_worker(InMemoryCache::default(), &network);
  worker.install().await.unwrap();
  assert_eq!(worker.state(), WorkerState::Installed);

  // Stored under the manifest URL, not the redirect target.
  network.set_offline(true);
  let response = respond(&worker, get("./")).await.unwrap();
  assert_eq!(response.source, ResponseSource::Cache);
  assert_eq!(&response.response.body[..], b"<html>index</html>");
}

#[tokio::test]
async fn intercepted_redirect_is_returned_as_is() {
  let network = network_with_manifest();
  network.route("./old", Route::Redirect("./new"));
  network.route("./new", Route::Respond(StatusCode::OK, "new"));
  let worker = activated_worker(&network).await;

  let response = respond(&worker, get("./old")).await.unwrap();
  assert_eq!(response.source, ResponseSource::Network);
  assert_eq!(response.response.status, StatusCode::MOVED_PERMANENTLY);
  assert_eq!(
    response.response.headers.get(LOCATION).unwrap(),
    "https://app.test/new"
  );
  worker.settle().await;
  assert!(
    !partition_keys(worker.caches(), "be-regular-v3")
      .await
      .contains(&"https://app.test/old".to_string())
  );
}

#[tokio::test]
async fn install_rejects_non_ok_asset() {
  let network = Arc::new(ScriptedNetwork::default());
  network.route("./", Route::Respond(StatusCode::OK, "root"));
  network.route("./index.html", Route::Respond(StatusCode::NOT_FOUND, ""));
  let worker = create_worker(InMemoryCache::default(), &network);

  let err = worker.install().await.unwrap_err();
  assert!(matches!(
    err,
    WorkerError::InstallStatus {
      status: StatusCode::NOT_FOUND,
      ..
    }
  ));
  assert!(partition_keys(worker.caches(), "be-regular-v3").await.is_empty());
}

#[tokio::test]
async fn lifecycle_order_is_enforced() {
  let network = network_with_manifest();
  let worker = create_worker(InMemoryCache::default(), &network);
  assert!(matches!(
    worker.activate().await,
    Err(WorkerError::InvalidState {
      state: WorkerState::Parsed,
      ..
    })
  ));
  worker.install().await.unwrap();
  assert!(matches!(
    worker.install().await,
    Err(WorkerError::InvalidState { .. })
  ));
}

#[tokio::test]
async fn activate_deletes_stale_generations() {
  let caches = InMemoryCache::default();
  caches.storage_open("be-regular-v2".into()).await.unwrap();
  caches.storage_open("be-regular-v3".into()).await.unwrap();
  caches.storage_open("other".into()).await.unwrap();

  let network = network_with_manifest();
  let worker = create_worker(caches.clone(), &network);
  worker.install().await.unwrap();
  worker.activate().await.unwrap();

  assert_eq!(worker.state(), WorkerState::Activated);
  assert_eq!(caches.storage_keys().await.unwrap(), vec!["be-regular-v3"]);

  // A second activation over the same store changes nothing.
  let again = create_worker(caches.clone(), &network);
  again.install().await.unwrap();
  again.activate().await.unwrap();
  assert_eq!(caches.storage_keys().await.unwrap(), vec!["be-regular-v3"]);
  assert_eq!(
    partition_keys(&caches, "be-regular-v3").await,
    vec!["https://app.test/", "https://app.test/index.html"]
  );
}

#[tokio::test]
async fn activate_claims_open_clients() {
  let network = network_with_manifest();
  let worker = create_worker(InMemoryCache::default(), &network);
  let client = worker.clients().open(false);
  worker.install().await.unwrap();
  assert!(!worker.clients().is_controlled(client));
  worker.activate().await.unwrap();
  assert!(worker.clients().is_controlled(client));
}

#[tokio::test]
async fn failed_activation_stays_installed() {
  let caches = ScriptedCache::default();
  caches.storage_open("be-regular-v2".into()).await.unwrap();
  caches.control.fail_deletes.store(true, Ordering::SeqCst);
  let network = network_with_manifest();
  let worker = create_worker(caches.clone(), &network);
  let client = worker.clients().open(false);
  worker.install().await.unwrap();

  let err = worker.activate().await.unwrap_err();
  assert!(matches!(err, WorkerError::Cache(CacheError::NotFound)));
  assert_eq!(worker.state(), WorkerState::Installed);
  assert!(!worker.clients().is_controlled(client));
  assert!(caches.storage_has("be-regular-v2".into()).await.unwrap());

  // Activation can be retried once the store recovers.
  caches.control.fail_deletes.store(false, Ordering::SeqCst);
  worker.activate().await.unwrap();
  assert_eq!(worker.state(), WorkerState::Activated);
  assert!(worker.clients().is_controlled(client));
  assert_eq!(caches.storage_keys().await.unwrap(), vec!["be-regular-v3"]);
}

#[tokio::test]
async fn response_does_not_wait_for_cache_write() {
  let caches = ScriptedCache::default();
  let network = network_with_manifest();
  network.route("./api/data", Route::Respond(StatusCode::OK, "data"));
  let worker = create_worker(caches.clone(), &network);
  worker.install().await.unwrap();
  worker.activate().await.unwrap();
  caches.control.hold_puts.store(true, Ordering::SeqCst);

  let response = tokio::time::timeout(
    Duration::from_secs(5),
    respond(&worker, get("./api/data")),
  )
  .await
  .expect("response waited for the cache write")
  .unwrap();
  assert_eq!(response.source, ResponseSource::Network);
  assert_eq!(&response.response.body[..], b"data");

  caches.control.put_started.notified().await;
  assert!(
    !partition_keys(&caches, "be-regular-v3")
      .await
      .contains(&"https://app.test/api/data".to_string())
  );
  caches.control.release_puts.notify_one();
  worker.settle().await;
  assert!(
    partition_keys(&caches, "be-regular-v3")
      .await
      .contains(&"https://app.test/api/data".to_string())
  );
}

#[tokio::test]
async fn non_get_requests_pass_through() {
  let network = network_with_manifest();
  let worker = activated_worker(&network).await;
  let before = network.request_count();

  for method in [Method::POST, Method::PUT, Method::DELETE, Method::HEAD] {
    let request = FetchRequest::new(method.clone(), get("./api/data").url);
    match worker.handle_fetch(FetchEvent::new(request)) {
      FetchDisposition::Passthrough(request) => {
        assert_eq!(request.method, method)
      }
      FetchDisposition::RespondWith(_) => panic!("{method} was intercepted"),
    }
  }
  worker.settle().await;
  assert_eq!(network.request_count(), before);
  assert_eq!(
    partition_keys(worker.caches(), "be-regular-v3").await.len(),
    2
  );
}

#[tokio::test]
async fn non_http_requests_pass_through() {
  let network = network_with_manifest();
  let worker = activated_worker(&network).await;
  for url in [
    "chrome-extension://abcdef/content.js",
    "file:///etc/hosts",
    "data:text/plain,hello",
  ] {
    let request = FetchRequest::get(Url::parse(url).unwrap());
    assert!(matches!(
      worker.handle_fetch(FetchEvent::new(request)),
      FetchDisposition::Passthrough(_)
    ));
  }
}

#[tokio::test]
async fn ok_response_is_cached_and_served_offline() {
  let network = network_with_manifest();
  network.route("./api/data", Route::Respond(StatusCode::OK, "{\"n\":1}"));
  let worker = activated_worker(&network).await;

  let online = respond(&worker, get("./api/data")).await.unwrap();
  assert_eq!(online.source, ResponseSource::Network);
  assert_eq!(&online.response.body[..], b"{\"n\":1}");
  worker.settle().await;
  assert!(
    partition_keys(worker.caches(), "be-regular-v3")
      .await
      .contains(&"https://app.test/api/data".to_string())
  );

  network.set_offline(true);
  let offline = respond(&worker, get("./api/data")).await.unwrap();
  assert_eq!(offline.source, ResponseSource::Cache);
  assert_eq!(offline.response.status, StatusCode::OK);
  assert_eq!(offline.response.body, online.response.body);
  assert_eq!(offline.response.headers, online.response.headers);
}

#[tokio::test]
async fn newer_ok_response_overwrites_entry() {
  let network = network_with_manifest();
  network.route("./api/data", Route::Respond(StatusCode::OK, "first"));
  let worker = activated_worker(&network).await;
  respond(&worker, get("./api/data")).await.unwrap();
  worker.settle().await;

  network.route("./api/data", Route::Respond(StatusCode::OK, "second"));
  respond(&worker, get("./api/data")).await.unwrap();
  worker.settle().await;

  network.set_offline(true);
  let offline = respond(&worker, get("./api/data")).await.unwrap();
  assert_eq!(&offline.response.body[..], b"second");
}

#[tokio::test]
async fn non_ok_response_is_returned_but_not_cached() {
  let network = network_with_manifest();
  network.route("./missing", Route::Respond(StatusCode::NOT_FOUND, "nope"));
  network.route("./created", Route::Respond(StatusCode::CREATED, "made"));
  let worker = activated_worker(&network).await;

  let response = respond(&worker, get("./missing")).await.unwrap();
  assert_eq!(response.response.status, StatusCode::NOT_FOUND);
  assert_eq!(response.source, ResponseSource::Network);
  let response = respond(&worker, get("./created")).await.unwrap();
  assert_eq!(response.response.status, StatusCode::CREATED);
  worker.settle().await;

  assert_eq!(
    partition_keys(worker.caches(), "be-regular-v3").await,
    vec!["https://app.test/", "https://app.test/index.html"]
  );
}

#[tokio::test]
async fn network_failure_without_entry_is_a_network_error() {
  let network = network_with_manifest();
  let worker = activated_worker(&network).await;
  network.set_offline(true);

  let err = respond(&worker, get("./api/data")).await.unwrap_err();
  assert!(err.is_network_error());
}

#[tokio::test]
async fn fallback_serves_manifest_entries() {
  let network = network_with_manifest();
  let worker = activated_worker(&network).await;
  network.set_offline(true);

  let response = respond(&worker, get("./index.html#top")).await.unwrap();
  assert_eq!(response.source, ResponseSource::Cache);
  assert_eq!(&response.response.body[..], b"<html>index</html>");
  assert_eq!(
    response.response.headers.get(CONTENT_TYPE).unwrap(),
    "text/plain"
  );
}

#[tokio::test]
async fn fallback_searches_every_generation() {
  let caches = InMemoryCache::default();
  let network = network_with_manifest();

  // An entry left by another generation is still a valid fallback until
  // the next activation removes it.
  let other = caches.storage_open("be-regular-v4".into()).await.unwrap();
  caches
    .put(CachePutRequest {
      cache_id: other,
      request_url: "https://app.test/legacy".into(),
      response_headers: vec![],
      response_status: 200,
      response_status_text: "OK".into(),
      response_body: Bytes::from_static(b"legacy"),
    })
    .await
    .unwrap();
  let worker = create_worker(caches, &network);
  network.set_offline(true);
  let response = respond(&worker, get("./legacy")).await.unwrap();
  assert_eq!(&response.response.body[..], b"legacy");
}

#[tokio::test]
async fn cancelled_request_is_abandoned() {
  let network = network_with_manifest();
  network.route("./slow", Route::Hang);
  let worker = activated_worker(&network).await;

  let cancel = CancellationToken::new();
  let event = FetchEvent::new(get("./slow")).with_cancellation(cancel.clone());
  let FetchDisposition::RespondWith(task) = worker.handle_fetch(event) else {
    panic!("slow request was not intercepted");
  };
  cancel.cancel();
  assert!(matches!(task.await, Err(WorkerError::Cancelled)));
}

#[tokio::test]
async fn host_routes_only_after_activation() {
  let network = network_with_manifest();
  network.route("./api/data", Route::Respond(StatusCode::OK, "data"));
  let host = WorkerHost::new(create_worker(InMemoryCache::default(), &network));

  let early = host.open_client();
  assert!(matches!(
    host.dispatch_fetch(Some(early), get("./api/data")),
    FetchDisposition::Passthrough(_)
  ));

  assert_eq!(host.start().await.unwrap(), WorkerState::Activated);
  // Claimed during activation, no reload needed.
  match host.dispatch_fetch(Some(early), get("./api/data")) {
    FetchDisposition::RespondWith(task) => {
      assert_eq!(&task.await.unwrap().response.body[..], b"data")
    }
    FetchDisposition::Passthrough(_) => panic!("client was not claimed"),
  }
  let late = host.open_client();
  assert!(host.worker().clients().is_controlled(late));
  host.close_client(late).await.unwrap();
}

#[tokio::test]
async fn host_start_propagates_install_failure() {
  let network = Arc::new(ScriptedNetwork::default());
  let host = WorkerHost::new(create_worker(InMemoryCache::default(), &network));
  assert!(host.start().await.is_err());
  assert_eq!(host.worker().state(), WorkerState::Redundant);
  assert!(matches!(
    host.dispatch_fetch(None, get("./")),
    FetchDisposition::Passthrough(_)
  ));
}

#[tokio::test]
async fn sqlite_store_end_to_end() {
  let dir = tempfile::tempdir().unwrap();
  let network = network_with_manifest();
  network.route("./api/data", Route::Respond(StatusCode::OK, "persisted"));
  {
    let caches = CacheImpl::sqlite(dir.path().to_path_buf()).unwrap();
    caches.storage_open("be-regular-v2".into()).await.unwrap();
    let worker = create_worker(caches.clone(), &network);
    worker.install().await.unwrap();
    worker.activate().await.unwrap();
    respond(&worker, get("./api/data")).await.unwrap();
    worker.settle().await;
    assert_eq!(caches.storage_keys().await.unwrap(), vec!["be-regular-v3"]);
  }

  network.set_offline(true);
  let caches = CacheImpl::sqlite(dir.path().to_path_buf()).unwrap();
  let worker = create_worker(caches, &network);
  let response = respond(&worker, get("./api/data")).await.unwrap();
  assert_eq!(response.source, ResponseSource::Cache);
  assert_eq!(&response.response.body[..], b"persisted");
}
