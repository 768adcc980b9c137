// Copyright 2018-2026 the Deno authors. MIT license.

mod config_file;
mod flags;

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use anyhow::anyhow;
use anyhow::bail;
use bereg_fetch::CreateHttpClientOptions;
use bereg_runtime::WorkerOptions;
use url::Url;

pub use config_file::ConfigFile;
pub use flags::*;

pub type AnyError = anyhow::Error;

/// Overrides the default cache storage directory.
pub const BEREG_DIR_ENV: &str = "BEREG_DIR";
const DEFAULT_CACHE_DIR: &str = ".bereg_cache";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheStorage {
  InMemory,
  Dir(PathBuf),
}

/// Flags, the config file and the environment merged into the settings a
/// command runs with. Flags win over the config file, which wins over the
/// built-in defaults.
#[derive(Debug)]
pub struct CliOptions {
  flags: Arc<Flags>,
  initial_cwd: PathBuf,
  maybe_config_file: Option<ConfigFile>,
  maybe_env_dir: Option<PathBuf>,
}

impl CliOptions {
  pub fn new(
    flags: Arc<Flags>,
    initial_cwd: PathBuf,
    maybe_config_file: Option<ConfigFile>,
    maybe_env_dir: Option<PathBuf>,
  ) -> Self {
    Self {
      flags,
      initial_cwd,
      maybe_config_file,
      maybe_env_dir,
    }
  }

  pub fn from_flags(flags: Arc<Flags>) -> Result<Self, AnyError> {
    let initial_cwd =
      std::env::current_dir().with_context(|| "Failed getting cwd.")?;
    let maybe_config_file =
      ConfigFile::discover(flags.config_path.as_deref(), &initial_cwd)?;
    let maybe_env_dir = std::env::var_os(BEREG_DIR_ENV)
      .filter(|dir| !dir.is_empty())
      .map(PathBuf::from);
    Ok(Self::new(flags, initial_cwd, maybe_config_file, maybe_env_dir))
  }

  pub fn initial_cwd(&self) -> &Path {
    &self.initial_cwd
  }

  fn config(&self) -> Option<&ConfigFile> {
    self.maybe_config_file.as_ref()
  }

  /// The base URL the worker controls. Defaults to the current directory.
  pub fn scope(&self) -> Result<Url, AnyError> {
    let specifier = self
      .flags
      .scope
      .as_deref()
      .or_else(|| self.config().and_then(|c| c.scope.as_deref()));
    match specifier {
      Some(specifier) => resolve_url_or_path(specifier, &self.initial_cwd),
      None => resolve_url_or_path(".", &self.initial_cwd),
    }
  }

  pub fn worker_options(&self) -> Result<WorkerOptions, AnyError> {
    let mut options = WorkerOptions::new(self.scope()?);
    let cache_name = self
      .flags
      .cache_name
      .clone()
      .or_else(|| self.config().and_then(|c| c.cache_name.clone()));
    if let Some(cache_name) = cache_name {
      if cache_name.is_empty() {
        bail!("Cache name must not be empty.");
      }
      options.cache_name = cache_name;
    }
    if let Some(static_assets) =
      self.config().and_then(|c| c.static_assets.clone())
    {
      options.static_assets = static_assets;
    }
    Ok(options)
  }

  pub fn cache_storage(&self) -> CacheStorage {
    if self.flags.in_memory {
      return CacheStorage::InMemory;
    }
    let dir = self
      .flags
      .cache_dir
      .clone()
      .or_else(|| self.config().and_then(|c| c.cache_dir.clone()))
      .or_else(|| self.maybe_env_dir.clone())
      .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR));
    CacheStorage::Dir(self.initial_cwd.join(dir))
  }

  pub fn http_client_options(&self) -> CreateHttpClientOptions {
    CreateHttpClientOptions {
      timeout: self.flags.timeout_secs.map(Duration::from_secs),
    }
  }
}

/// Resolve a URL, or a path relative to `cwd`, to a URL that can be used as
/// a base for relative specifiers (it always ends with a slash).
pub fn resolve_url_or_path(
  specifier: &str,
  cwd: &Path,
) -> Result<Url, AnyError> {
  let mut url = if specifier_has_uri_scheme(specifier) {
    Url::parse(specifier)
      .with_context(|| format!("Invalid URL \"{specifier}\""))?
  } else {
    let path = cwd.join(specifier);
    Url::from_directory_path(&path)
      .map_err(|_| anyhow!("Invalid path \"{}\"", path.display()))?
  };
  if !url.path().ends_with('/') {
    let path = format!("{}/", url.path());
    url.set_path(&path);
  }
  Ok(url)
}

/// Single letter schemes are Windows drive letters, not URLs.
fn specifier_has_uri_scheme(specifier: &str) -> bool {
  match Url::parse(specifier) {
    Ok(url) => url.scheme().len() > 1,
    Err(_) => false,
  }
}
