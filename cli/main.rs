// Copyright 2018-2026 the Deno authors. MIT license.

mod args;
mod factory;
mod tools;
mod util;

use std::env;
use std::ffi::OsString;
use std::sync::Arc;

use bereg_runtime::tokio_util;

use crate::args::AnyError;
use crate::args::BeregSubcommand;
use crate::args::Flags;
use crate::args::flags_from_vec;
use crate::util::logger;

async fn run_subcommand(flags: Arc<Flags>) -> Result<(), AnyError> {
  match flags.subcommand.clone() {
    BeregSubcommand::Install => tools::lifecycle::install(flags).await,
    BeregSubcommand::Activate => tools::lifecycle::activate(flags).await,
    BeregSubcommand::Caches => tools::caches::caches(flags).await,
    BeregSubcommand::Fetch(fetch_flags) => {
      tools::fetch::fetch(flags, fetch_flags).await
    }
    BeregSubcommand::Serve(serve_flags) => {
      tools::serve::serve(flags, serve_flags).await
    }
  }
}

fn unwrap_or_exit<T>(result: Result<T, AnyError>) -> T {
  match result {
    Ok(value) => value,
    Err(error) => {
      eprintln!("error: {:?}", error);
      std::process::exit(1);
    }
  }
}

pub fn main() {
  let args: Vec<OsString> = env::args_os().collect();
  let flags = match flags_from_vec(args) {
    Ok(flags) => flags,
    // Prints help and version to stdout with exit code 0, anything else to
    // stderr with exit code 2.
    Err(err) => err.exit(),
  };

  logger::init(flags.log_level);

  let result = tokio_util::run(run_subcommand(Arc::new(flags)))
    .map_err(AnyError::from)
    .and_then(|result| result);
  unwrap_or_exit(result);
}
