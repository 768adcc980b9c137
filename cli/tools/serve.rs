// Copyright 2018-2026 the Deno authors. MIT license.

use std::convert::Infallible;
use std::sync::Arc;

use async_trait::async_trait;
use bereg_cache::Cache;
use bereg_fetch::FetchError;
use bereg_fetch::FetchHandler;
use bereg_fetch::FetchRequest;
use bereg_fetch::FetchResponse;
use bereg_runtime::ServiceWorker;
use bereg_runtime::WorkerHost;
use bytes::Bytes;
use http::HeaderMap;
use http::HeaderName;
use http::HeaderValue;
use http::Request;
use http::Response;
use http::StatusCode;
use http::header;
use http_body_util::BodyExt;
use http_body_util::Full;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use url::Url;

use crate::args::AnyError;
use crate::args::Flags;
use crate::args::ServeFlags;
use crate::args::resolve_url_or_path;
use crate::factory::CliFactory;
use crate::tools::fetch::respond;

pub const SOURCE_HEADER: &str = "x-bereg-source";

/// The network as seen from the public scope: URLs under `scope` are
/// rewritten to the same path under `origin` and sent with `inner`.
pub struct OriginFetchHandler {
  scope: Url,
  origin: Url,
  inner: Arc<dyn FetchHandler>,
}

impl OriginFetchHandler {
  pub fn new(scope: Url, origin: Url, inner: Arc<dyn FetchHandler>) -> Self {
    Self {
      scope,
      origin,
      inner,
    }
  }

  /// `None` for URLs outside of the scope.
  pub fn to_origin(&self, url: &Url) -> Option<Url> {
    let rest = url.as_str().strip_prefix(self.scope.as_str())?;
    Url::parse(&format!("{}{}", self.origin, rest)).ok()
  }
}

#[async_trait]
impl FetchHandler for OriginFetchHandler {
  async fn fetch(
    &self,
    mut request: FetchRequest,
  ) -> Result<FetchResponse, FetchError> {
    let public_url = request.url.clone();
    let Some(origin_url) = self.to_origin(&public_url) else {
      return self.inner.fetch(request).await;
    };
    log::debug!("{} -> {}", public_url, origin_url);
    request.url = origin_url;
    let mut response = self.inner.fetch(request).await?;
    response.url = public_url;
    Ok(response)
  }
}

pub struct ServeContext<C: Cache> {
  pub host: WorkerHost<C>,
  /// Where declined requests go.
  pub network: Arc<dyn FetchHandler>,
  pub scope: Url,
}

pub async fn serve(
  flags: Arc<Flags>,
  serve_flags: ServeFlags,
) -> Result<(), AnyError> {
  let factory = CliFactory::from_flags(flags);
  let origin = resolve_url_or_path(
    &serve_flags.origin,
    factory.cli_options()?.initial_cwd(),
  )?;

  let listener =
    TcpListener::bind((serve_flags.host.as_str(), serve_flags.port)).await?;
  let local_addr = listener.local_addr()?;
  let scope = Url::parse(&format!("http://{local_addr}/"))?;

  let network: Arc<dyn FetchHandler> = Arc::new(OriginFetchHandler::new(
    scope.clone(),
    origin.clone(),
    factory.fetcher()?,
  ));
  let mut options = factory.worker_options()?.clone();
  options.scope = scope.clone();
  let worker =
    ServiceWorker::new(options, factory.caches()?.clone(), network.clone());
  let context = Arc::new(ServeContext {
    host: WorkerHost::new(worker.clone()),
    network,
    scope: scope.clone(),
  });

  if let Err(err) = context.host.start().await {
    log::warn!(
      "Worker failed to start, requests go straight to the origin: {err}"
    );
  }
  log::info!("Listening on {} (origin {})", scope, origin);

  loop {
    let (stream, remote_addr) = tokio::select! {
      accepted = listener.accept() => accepted?,
      _ = tokio::signal::ctrl_c() => break,
    };
    let io = TokioIo::new(stream);
    let context = context.clone();
    tokio::spawn(async move {
      let service =
        service_fn(move |req| handle_request(context.clone(), req));
      if let Err(err) = hyper::server::conn::http1::Builder::new()
        .serve_connection(io, service)
        .await
      {
        log::debug!("Connection from {} failed: {:?}", remote_addr, err);
      }
    });
  }

  worker.settle().await;
  Ok(())
}

/// Answer one request: through the worker when it is active, straight from
/// the origin otherwise. Failures become `502 Bad Gateway`.
pub async fn handle_request<C, B>(
  context: Arc<ServeContext<C>>,
  req: Request<B>,
) -> Result<Response<Full<Bytes>>, Infallible>
where
  C: Cache,
  B: hyper::body::Body,
  B::Error: std::fmt::Display,
{
  let (parts, body) = req.into_parts();
  let path_and_query = parts
    .uri
    .path_and_query()
    .map(|p| p.as_str())
    .unwrap_or("/");
  let url = match Url::parse(&format!(
    "{}{}",
    context.scope.as_str().trim_end_matches('/'),
    path_and_query
  )) {
    Ok(url) => url,
    Err(err) => {
      return Ok(text_response(StatusCode::BAD_REQUEST, err.to_string()));
    }
  };
  let body = match body.collect().await {
    Ok(collected) => collected.to_bytes(),
    Err(err) => {
      return Ok(text_response(StatusCode::BAD_REQUEST, err.to_string()));
    }
  };

  let mut request = FetchRequest::new(parts.method, url.clone());
  request.headers = forwarded_headers(parts.headers);
  request.headers.remove(header::HOST);
  request.body = body;

  let disposition = context.host.dispatch_fetch(None, request);
  let (mut response, served) =
    match respond(disposition, context.network.as_ref()).await {
      Ok(result) => result,
      Err(err) => {
        log::warn!("{} failed: {:#}", url, err);
        return Ok(text_response(StatusCode::BAD_GATEWAY, err.to_string()));
      }
    };
  log::debug!("{} {} ({})", response.status, url, served.as_str());

  let mut headers = forwarded_headers(std::mem::take(&mut response.headers));
  headers.remove(header::CONTENT_LENGTH);
  headers.insert(
    HeaderName::from_static(SOURCE_HEADER),
    HeaderValue::from_static(served.as_str()),
  );
  let mut res = Response::new(Full::new(response.body));
  *res.status_mut() = response.status;
  *res.headers_mut() = headers;
  Ok(res)
}

/// Drop the headers describing a single connection, they are never
/// forwarded.
fn forwarded_headers(mut headers: HeaderMap) -> HeaderMap {
  let hop_by_hop = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
  ];
  for name in hop_by_hop {
    headers.remove(name);
  }
  headers.remove("keep-alive");
  headers.remove("proxy-connection");
  headers
}

fn text_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
  let mut res = Response::new(Full::new(Bytes::from(body)));
  *res.status_mut() = status;
  res.headers_mut().insert(
    header::CONTENT_TYPE,
    HeaderValue::from_static("text/plain; charset=utf-8"),
  );
  res
}
