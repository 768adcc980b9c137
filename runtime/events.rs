// Copyright 2018-2026 the Deno authors. MIT license.

//! Fetch interception as explicit tasks.
//!
//! A fetch event either declines (the request goes out unintercepted) or
//! hands back a [`RespondTask`]: a spawned task the requester awaits for
//! the response, and can cancel.

use std::future::Future;
use std::pin::Pin;
use std::task::Context;
use std::task::Poll;

use bereg_fetch::FetchRequest;
use bereg_fetch::FetchResponse;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clients::ClientId;
use crate::errors::WorkerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  Network,
  Cache,
}

#[derive(Debug, Clone)]
pub struct WorkerResponse {
  pub response: FetchResponse,
  pub source: ResponseSource,
}

pub struct FetchEvent {
  pub request: FetchRequest,
  /// The client the request originates from, `None` for a navigation that
  /// creates a new client.
  pub client_id: Option<ClientId>,
  cancel: CancellationToken,
}

impl FetchEvent {
  pub fn new(request: FetchRequest) -> Self {
    Self {
      request,
      client_id: None,
      cancel: CancellationToken::new(),
    }
  }

  pub fn with_client(mut self, client_id: ClientId) -> Self {
    self.client_id = Some(client_id);
    self
  }

  /// Abort the event when `cancel` fires, e.g. when the requester goes away.
  pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
    self.cancel = cancel;
    self
  }

  pub(crate) fn cancellation(&self) -> CancellationToken {
    self.cancel.clone()
  }
}

pub enum FetchDisposition {
  /// The worker declined; the request should go out as is.
  Passthrough(FetchRequest),
  RespondWith(RespondTask),
}

/// The response a worker promised for an intercepted request.
///
/// Dropping the task cancels it.
pub struct RespondTask {
  handle: JoinHandle<Result<WorkerResponse, WorkerError>>,
  cancel: CancellationToken,
}

impl RespondTask {
  pub(crate) fn spawn<F>(future: F, cancel: CancellationToken) -> Self
  where
    F: Future<Output = Result<WorkerResponse, WorkerError>> + Send + 'static,
  {
    let token = cancel.clone();
    let handle = tokio::spawn(async move {
      tokio::select! {
        _ = token.cancelled() => Err(WorkerError::Cancelled),
        result = future => result,
      }
    });
    Self { handle, cancel }
  }

  pub fn cancel(&self) {
    self.cancel.cancel();
  }
}

impl Future for RespondTask {
  type Output = Result<WorkerResponse, WorkerError>;

  fn poll(
    mut self: Pin<&mut Self>,
    cx: &mut Context<'_>,
  ) -> Poll<Self::Output> {
    match Pin::new(&mut self.handle).poll(cx) {
      Poll::Ready(Ok(result)) => Poll::Ready(result),
      Poll::Ready(Err(err)) => Poll::Ready(Err(err.into())),
      Poll::Pending => Poll::Pending,
    }
  }
}

impl Drop for RespondTask {
  fn drop(&mut self) {
    self.cancel.cancel();
  }
}
