// Copyright 2018-2026 the Deno authors. MIT license.

use std::io::Write;
use std::sync::Arc;

use bereg_fetch::FetchHandler;
use bereg_fetch::FetchRequest;
use bereg_fetch::FetchResponse;
use bereg_fetch::OfflineFetchHandler;
use bereg_runtime::FetchDisposition;
use bereg_runtime::FetchEvent;
use bereg_runtime::ResponseSource;
use http::Method;

use crate::args::AnyError;
use crate::args::FetchFlags;
use crate::args::Flags;
use crate::factory::CliFactory;

/// Where a response handed to the requester came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Served {
  /// The worker declined the request and it went out as is.
  Passthrough,
  Worker(ResponseSource),
}

impl Served {
  pub fn as_str(&self) -> &'static str {
    match self {
      Served::Passthrough => "passthrough",
      Served::Worker(ResponseSource::Network) => "network",
      Served::Worker(ResponseSource::Cache) => "cache",
    }
  }
}

/// Settle what the worker decided for a request. A declined request is sent
/// with `network` directly, the way a browser would without a worker.
pub async fn respond(
  disposition: FetchDisposition,
  network: &dyn FetchHandler,
) -> Result<(FetchResponse, Served), AnyError> {
  match disposition {
    FetchDisposition::Passthrough(request) => {
      let response = network.fetch(request).await?;
      Ok((response, Served::Passthrough))
    }
    FetchDisposition::RespondWith(task) => {
      let response = task.await?;
      Ok((response.response, Served::Worker(response.source)))
    }
  }
}

pub async fn fetch(
  flags: Arc<Flags>,
  fetch_flags: FetchFlags,
) -> Result<(), AnyError> {
  let factory = CliFactory::from_flags(flags);
  let url = factory.worker_options()?.scope.join(&fetch_flags.url)?;
  let method = Method::from_bytes(fetch_flags.method.as_bytes())?;
  let network: Arc<dyn FetchHandler> = if fetch_flags.offline {
    Arc::new(OfflineFetchHandler)
  } else {
    factory.fetcher()?
  };
  let worker = factory.create_worker(network.clone())?;

  let event = FetchEvent::new(FetchRequest::new(method, url.clone()));
  let result = respond(worker.handle_fetch(event), network.as_ref()).await;
  // Let the cache write of a network response land before exiting.
  worker.settle().await;
  let (response, served) = result?;

  log::info!("{} {} ({})", response.status, url, served.as_str());
  let mut stdout = std::io::stdout().lock();
  stdout.write_all(&response.body)?;
  stdout.flush()?;
  Ok(())
}
