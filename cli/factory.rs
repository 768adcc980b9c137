// Copyright 2018-2026 the Deno authors. MIT license.

use std::sync::Arc;

use bereg_cache::CacheImpl;
use bereg_fetch::FetchHandler;
use bereg_fetch::HttpFetcher;
use bereg_fetch::SchemeFetchHandler;
use bereg_runtime::ServiceWorker;
use bereg_runtime::WorkerOptions;

use crate::args::AnyError;
use crate::args::CacheStorage;
use crate::args::CliOptions;
use crate::args::Flags;

pub struct Deferred<T>(once_cell::unsync::OnceCell<T>);

impl<T> Default for Deferred<T> {
  fn default() -> Self {
    Self(once_cell::unsync::OnceCell::default())
  }
}

impl<T> Deferred<T> {
  pub fn from_value(value: T) -> Self {
    Self(once_cell::unsync::OnceCell::from(value))
  }

  #[inline(always)]
  pub fn get_or_try_init(
    &self,
    create: impl FnOnce() -> Result<T, AnyError>,
  ) -> Result<&T, AnyError> {
    self.0.get_or_try_init(create)
  }
}

#[derive(Default)]
struct CliFactoryServices {
  cli_options: Deferred<Arc<CliOptions>>,
  caches: Deferred<CacheImpl>,
  http_fetcher: Deferred<HttpFetcher>,
  worker_options: Deferred<WorkerOptions>,
}

/// Builds the pieces a command needs, each one at most once.
pub struct CliFactory {
  flags: Arc<Flags>,
  services: CliFactoryServices,
}

impl CliFactory {
  pub fn from_flags(flags: Arc<Flags>) -> Self {
    Self {
      flags,
      services: Default::default(),
    }
  }

  pub fn from_cli_options(cli_options: Arc<CliOptions>) -> Self {
    Self {
      flags: Default::default(),
      services: CliFactoryServices {
        cli_options: Deferred::from_value(cli_options),
        ..Default::default()
      },
    }
  }

  pub fn cli_options(&self) -> Result<&Arc<CliOptions>, AnyError> {
    self
      .services
      .cli_options
      .get_or_try_init(|| {
        CliOptions::from_flags(self.flags.clone()).map(Arc::new)
      })
  }

  pub fn caches(&self) -> Result<&CacheImpl, AnyError> {
    self.services.caches.get_or_try_init(|| {
      let caches = match self.cli_options()?.cache_storage() {
        CacheStorage::InMemory => CacheImpl::in_memory(),
        CacheStorage::Dir(dir) => {
          log::debug!("Cache storage at {}", dir.display());
          CacheImpl::sqlite(dir)?
        }
      };
      Ok(caches)
    })
  }

  pub fn http_fetcher(&self) -> Result<&HttpFetcher, AnyError> {
    self.services.http_fetcher.get_or_try_init(|| {
      let options = self.cli_options()?.http_client_options();
      Ok(HttpFetcher::new(options)?)
    })
  }

  /// The network as seen by the worker: `file:` URLs are read from disk,
  /// everything else goes over HTTP.
  pub fn fetcher(&self) -> Result<Arc<dyn FetchHandler>, AnyError> {
    Ok(Arc::new(SchemeFetchHandler::new(self.http_fetcher()?.clone())))
  }

  pub fn worker_options(&self) -> Result<&WorkerOptions, AnyError> {
    self
      .services
      .worker_options
      .get_or_try_init(|| self.cli_options()?.worker_options())
  }

  pub fn create_worker(
    &self,
    fetcher: Arc<dyn FetchHandler>,
  ) -> Result<ServiceWorker<CacheImpl>, AnyError> {
    Ok(ServiceWorker::new(
      self.worker_options()?.clone(),
      self.caches()?.clone(),
      fetcher,
    ))
  }
}
