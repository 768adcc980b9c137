// Copyright 2018-2026 the Deno authors. MIT license.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::Arg;
use clap::ArgAction;
use clap::ArgMatches;
use clap::Command;
use clap::ValueHint;
use clap::value_parser;
use log::Level;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FetchFlags {
  pub url: String,
  pub method: String,
  pub offline: bool,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServeFlags {
  pub origin: String,
  pub host: String,
  pub port: u16,
}

#[derive(Clone, Debug, Eq, PartialEq, Default)]
pub enum BeregSubcommand {
  Install,
  Activate,
  #[default]
  Caches,
  Fetch(FetchFlags),
  Serve(ServeFlags),
}

#[derive(Clone, Debug, Eq, PartialEq, Default)]
pub struct Flags {
  pub subcommand: BeregSubcommand,
  pub log_level: Option<Level>,
  pub cache_dir: Option<PathBuf>,
  pub in_memory: bool,
  pub config_path: Option<PathBuf>,
  pub cache_name: Option<String>,
  pub scope: Option<String>,
  pub timeout_secs: Option<u64>,
}

static ENV_VARIABLES_HELP: &str = r#"ENVIRONMENT VARIABLES:
    BEREG_DIR            Set the cache storage directory
    BEREG_LOG            Set the log filter (overrides --log-level)
    BEREG_LOG_STYLE      Set the log style (auto, always, never)"#;

/// Main entry point for parsing bereg's command line flags.
pub fn flags_from_vec(args: Vec<OsString>) -> clap::error::Result<Flags> {
  let mut app = clap_root();
  let mut matches = app.try_get_matches_from_mut(&args)?;

  let mut flags = Flags::default();

  if matches.get_flag("quiet") {
    flags.log_level = Some(Level::Error);
  } else if let Some(log_level) = matches.get_one::<String>("log-level") {
    flags.log_level = match log_level.as_str() {
      "trace" => Some(Level::Trace),
      "debug" => Some(Level::Debug),
      "info" => Some(Level::Info),
      _ => unreachable!(),
    };
  }

  flags.cache_dir = matches.remove_one::<PathBuf>("cache-dir");
  flags.in_memory = matches.get_flag("in-memory");
  flags.config_path = matches.remove_one::<PathBuf>("config");
  flags.cache_name = matches.remove_one::<String>("cache-name");
  flags.scope = matches.remove_one::<String>("scope");
  flags.timeout_secs = matches.remove_one::<u64>("timeout");

  if let Some((subcommand, mut m)) = matches.remove_subcommand() {
    match subcommand.as_str() {
      "activate" => flags.subcommand = BeregSubcommand::Activate,
      "caches" => flags.subcommand = BeregSubcommand::Caches,
      "fetch" => fetch_parse(&mut flags, &mut m),
      "install" => flags.subcommand = BeregSubcommand::Install,
      "serve" => serve_parse(&mut flags, &mut m),
      _ => unreachable!(),
    }
  }

  Ok(flags)
}

fn clap_root() -> Command {
  Command::new("bereg")
    .bin_name("bereg")
    .version(env!("CARGO_PKG_VERSION"))
    .about(
      "An offline worker for the Be Regular web app: pre-caches its shell, \
       serves network-first and falls back to the cache.",
    )
    .after_help(ENV_VARIABLES_HELP)
    .subcommand_required(true)
    .arg_required_else_help(true)
    .arg(
      Arg::new("log-level")
        .short('L')
        .long("log-level")
        .help("Set log level")
        .value_parser(["trace", "debug", "info"])
        .global(true),
    )
    .arg(
      Arg::new("quiet")
        .short('q')
        .long("quiet")
        .help("Suppress diagnostic output")
        .action(ArgAction::SetTrue)
        .global(true),
    )
    .arg(
      Arg::new("cache-dir")
        .long("cache-dir")
        .help("Directory holding the cache storage database")
        .value_parser(value_parser!(PathBuf))
        .value_hint(ValueHint::DirPath)
        .global(true),
    )
    .arg(
      Arg::new("in-memory")
        .long("in-memory")
        .help("Keep caches in memory, nothing is written to disk")
        .action(ArgAction::SetTrue)
        .conflicts_with("cache-dir")
        .global(true),
    )
    .arg(
      Arg::new("config")
        .short('c')
        .long("config")
        .help("Load configuration from this JSON file instead of ./bereg.json")
        .value_parser(value_parser!(PathBuf))
        .value_hint(ValueHint::FilePath)
        .global(true),
    )
    .arg(
      Arg::new("cache-name")
        .long("cache-name")
        .help("Name of the current cache generation")
        .global(true),
    )
    .arg(
      Arg::new("scope")
        .long("scope")
        .help("Base URL (or directory) the worker controls")
        .value_hint(ValueHint::Url)
        .global(true),
    )
    .arg(
      Arg::new("timeout")
        .long("timeout")
        .help("Give up on network requests after this many seconds")
        .value_parser(value_parser!(u64).range(1..))
        .global(true),
    )
    .subcommand(install_subcommand())
    .subcommand(activate_subcommand())
    .subcommand(fetch_subcommand())
    .subcommand(caches_subcommand())
    .subcommand(serve_subcommand())
}

fn install_subcommand() -> Command {
  Command::new("install").about(
    "Fetch every static asset and store it in the current cache generation.

Fails without caching anything if a single asset can't be fetched.",
  )
}

fn activate_subcommand() -> Command {
  Command::new("activate").about(
    "Install, then delete every cache generation except the current one.",
  )
}

fn caches_subcommand() -> Command {
  Command::new("caches").about("List cache generations and their entries.")
}

fn fetch_subcommand() -> Command {
  Command::new("fetch")
    .about(
      "Send a request through the worker and print the response body.

Relative URLs are resolved against the scope:
  bereg --scope https://app.example/ fetch ./api/data",
    )
    .arg(
      Arg::new("url")
        .required(true)
        .help("URL to request")
        .value_hint(ValueHint::Url),
    )
    .arg(
      Arg::new("method")
        .short('X')
        .long("method")
        .help("Request method")
        .default_value("GET"),
    )
    .arg(
      Arg::new("offline")
        .long("offline")
        .help("Act as if the network were down")
        .action(ArgAction::SetTrue),
    )
}

fn serve_subcommand() -> Command {
  Command::new("serve")
    .about(
      "Serve an origin through the worker.

Every request is answered network-first from the origin, falling back to the
cache when the origin can't be reached:
  bereg serve --origin ./public --port 8000",
    )
    .arg(
      Arg::new("origin")
        .long("origin")
        .required(true)
        .help("URL or directory to serve")
        .value_hint(ValueHint::AnyPath),
    )
    .arg(
      Arg::new("host")
        .long("host")
        .help("The TCP address to serve on")
        .default_value("127.0.0.1"),
    )
    .arg(
      Arg::new("port")
        .long("port")
        .help("The TCP port to serve on")
        .value_parser(value_parser!(u16))
        .default_value("8000"),
    )
}

fn fetch_parse(flags: &mut Flags, matches: &mut ArgMatches) {
  let url = matches.remove_one::<String>("url").unwrap();
  let method = matches.remove_one::<String>("method").unwrap();
  flags.subcommand = BeregSubcommand::Fetch(FetchFlags {
    url,
    method: method.to_uppercase(),
    offline: matches.get_flag("offline"),
  });
}

fn serve_parse(flags: &mut Flags, matches: &mut ArgMatches) {
  let origin = matches.remove_one::<String>("origin").unwrap();
  let host = matches.remove_one::<String>("host").unwrap();
  let port = matches.remove_one::<u16>("port").unwrap();
  flags.subcommand = BeregSubcommand::Serve(ServeFlags { origin, host, port });
}
