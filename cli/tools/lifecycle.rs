// Copyright 2018-2026 the Deno authors. MIT license.

use std::sync::Arc;

use bereg_cache::Cache;
use bereg_runtime::WorkerHost;

use crate::args::AnyError;
use crate::args::Flags;
use crate::factory::CliFactory;

/// Run the install handler on its own and print what ended up cached.
pub async fn install(flags: Arc<Flags>) -> Result<(), AnyError> {
  let factory = CliFactory::from_flags(flags);
  let worker = factory.create_worker(factory.fetcher()?)?;
  worker.install().await?;

  let cache_name = worker.options().cache_name.clone();
  let cache_id = worker.caches().storage_open(cache_name.clone()).await?;
  let keys = worker.caches().keys(cache_id).await?;
  log::info!("Installed {} ({} entries)", cache_name, keys.len());
  for key in keys {
    println!("{key}");
  }
  Ok(())
}

/// Install and activate, then print the cache generations left behind.
pub async fn activate(flags: Arc<Flags>) -> Result<(), AnyError> {
  let factory = CliFactory::from_flags(flags);
  let host = WorkerHost::new(factory.create_worker(factory.fetcher()?)?);
  let state = host.start().await?;
  log::debug!("Worker is {}", state);
  for name in host.worker().caches().storage_keys().await? {
    println!("{name}");
  }
  Ok(())
}
