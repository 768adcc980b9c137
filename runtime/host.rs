// Copyright 2018-2026 the Deno authors. MIT license.

use bereg_cache::Cache;
use bereg_fetch::FetchRequest;

use crate::clients::ClientId;
use crate::errors::WorkerError;
use crate::events::FetchDisposition;
use crate::events::FetchEvent;
use crate::worker::ServiceWorker;
use crate::worker::WorkerState;

/// Drives a worker through its lifecycle in the order a browser would:
/// install, then activate, and only then route fetches through it.
pub struct WorkerHost<C: Cache> {
  worker: ServiceWorker<C>,
}

impl<C: Cache> WorkerHost<C> {
  pub fn new(worker: ServiceWorker<C>) -> Self {
    Self { worker }
  }

  pub fn worker(&self) -> &ServiceWorker<C> {
    &self.worker
  }

  /// Install the worker and, unless it has to wait for existing clients to
  /// go away, activate it.
  pub async fn start(&self) -> Result<WorkerState, WorkerError> {
    self.worker.install().await?;
    if self.worker.skip_waiting_requested() || self.worker.clients().is_empty()
    {
      self.worker.activate().await?;
    } else {
      log::info!(
        "{} installed, waiting for {} client(s) to close",
        self.worker.options().cache_name,
        self.worker.clients().len()
      );
    }
    Ok(self.worker.state())
  }

  /// Open a new client. It is controlled right away if the worker is active.
  pub fn open_client(&self) -> ClientId {
    self
      .worker
      .clients()
      .open(self.worker.state() == WorkerState::Activated)
  }

  /// Close a client, activating a waiting worker once the last one is gone.
  pub async fn close_client(
    &self,
    client_id: ClientId,
  ) -> Result<(), WorkerError> {
    self.worker.clients().close(client_id);
    if self.worker.state() == WorkerState::Installed
      && self.worker.clients().is_empty()
    {
      self.worker.activate().await?;
    }
    Ok(())
  }

  /// Route a request. Requests reach the worker only once it is active and,
  /// for requests from an existing client, only when that client is
  /// controlled.
  pub fn dispatch_fetch(
    &self,
    client_id: Option<ClientId>,
    request: FetchRequest,
  ) -> FetchDisposition {
    let controlled = match client_id {
      Some(id) => self.worker.clients().is_controlled(id),
      None => true,
    };
    if self.worker.state() != WorkerState::Activated || !controlled {
      return FetchDisposition::Passthrough(request);
    }
    let mut event = FetchEvent::new(request);
    if let Some(id) = client_id {
      event = event.with_client(id);
    }
    self.worker.handle_fetch(event)
  }
}
