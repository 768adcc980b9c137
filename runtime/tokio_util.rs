// Copyright 2018-2026 the Deno authors. MIT license.

use std::future::Future;

pub fn create_basic_runtime() -> std::io::Result<tokio::runtime::Runtime> {
  tokio::runtime::Builder::new_current_thread()
    .enable_io()
    .enable_time()
    // This limits the number of threads for blocking operations (sqlite
    // access goes through `spawn_blocking`). The default value is 512, which
    // is an unhelpfully large thread pool.
    .max_blocking_threads(32)
    .build()
}

pub fn run<F, R>(future: F) -> std::io::Result<R>
where
  F: Future<Output = R>,
{
  let rt = create_basic_runtime()?;
  Ok(rt.block_on(future))
}
