// Copyright 2018-2026 the Deno authors. MIT license.

use url::Url;

use crate::errors::WorkerError;

/// Name of the cache generation owned by this release.
pub const DEFAULT_CACHE_NAME: &str = "be-regular-v3";

/// Resources guaranteed to be cached once install succeeds.
pub const DEFAULT_STATIC_ASSETS: &[&str] = &["./", "./index.html"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerOptions {
  /// The current cache generation. Every other generation found in the
  /// store is considered stale and is removed on activation.
  pub cache_name: String,
  /// Static manifest, relative to `scope`, in the order it is fetched.
  pub static_assets: Vec<String>,
  /// Base URL the worker controls.
  pub scope: Url,
}

impl WorkerOptions {
  pub fn new(scope: Url) -> Self {
    Self {
      cache_name: DEFAULT_CACHE_NAME.to_string(),
      static_assets: DEFAULT_STATIC_ASSETS
        .iter()
        .map(|s| s.to_string())
        .collect(),
      scope,
    }
  }

  /// Resolve the static manifest against the scope.
  pub fn resolve_static_assets(&self) -> Result<Vec<Url>, WorkerError> {
    self
      .static_assets
      .iter()
      .map(|specifier| {
        self
          .scope
          .join(specifier)
          .map_err(|source| WorkerError::InvalidAsset {
            specifier: specifier.clone(),
            source,
          })
      })
      .collect()
  }
}
