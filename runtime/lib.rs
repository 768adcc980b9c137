// Copyright 2018-2026 the Deno authors. MIT license.

pub use bereg_cache;
pub use bereg_fetch;

pub mod clients;
pub mod errors;
pub mod events;
pub mod host;
pub mod options;
pub mod tokio_util;
pub mod worker;

#[cfg(test)]
mod tests;

pub use clients::ClientId;
pub use clients::Clients;
pub use errors::WorkerError;
pub use events::FetchDisposition;
pub use events::FetchEvent;
pub use events::RespondTask;
pub use events::ResponseSource;
pub use events::WorkerResponse;
pub use host::WorkerHost;
pub use options::WorkerOptions;
pub use worker::ServiceWorker;
pub use worker::WorkerState;
