// Copyright 2018-2026 the Deno authors. MIT license.

use std::fmt::Write;
use std::sync::Arc;

use bereg_cache::Cache;

use crate::args::AnyError;
use crate::args::Flags;
use crate::factory::CliFactory;

pub async fn caches(flags: Arc<Flags>) -> Result<(), AnyError> {
  let factory = CliFactory::from_flags(flags);
  let caches = factory.caches()?;
  let current = &factory.worker_options()?.cache_name;
  print!("{}", format_caches(caches, current).await?);
  Ok(())
}

/// One line per partition, each followed by its indented request URLs. The
/// current generation is marked with a `*`.
pub async fn format_caches<C: Cache>(
  caches: &C,
  current: &str,
) -> Result<String, AnyError> {
  let mut output = String::new();
  for name in caches.storage_keys().await? {
    let marker = if name == current { "*" } else { " " };
    writeln!(output, "{marker} {name}")?;
    let cache_id = caches.storage_open(name).await?;
    for key in caches.keys(cache_id).await? {
      writeln!(output, "    {key}")?;
    }
  }
  Ok(output)
}
