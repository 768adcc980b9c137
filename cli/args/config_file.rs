// Copyright 2018-2026 the Deno authors. MIT license.

use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;

pub const CONFIG_FILE_NAME: &str = "bereg.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
  #[error("Unable to read config file \"{}\": {source}", path.display())]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("Unable to parse config file JSON \"{}\": {source}", path.display())]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
}

/// Contents of a `bereg.json` file. Every field is optional, anything left
/// out falls back to the built-in default.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct ConfigFile {
  pub cache_name: Option<String>,
  pub static_assets: Option<Vec<String>>,
  pub scope: Option<String>,
  pub cache_dir: Option<PathBuf>,
}

impl ConfigFile {
  pub fn parse(text: &str, path: &Path) -> Result<Self, ConfigFileError> {
    serde_json::from_str(text).map_err(|source| ConfigFileError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  pub fn read(path: &Path) -> Result<Self, ConfigFileError> {
    let text =
      std::fs::read_to_string(path).map_err(|source| ConfigFileError::Read {
        path: path.to_path_buf(),
        source,
      })?;
    let config = Self::parse(&text, path)?;
    log::debug!("Config file found at '{}'", path.display());
    Ok(config)
  }

  /// Read an explicitly given config file, or look for `bereg.json` in `cwd`.
  pub fn discover(
    explicit: Option<&Path>,
    cwd: &Path,
  ) -> Result<Option<Self>, ConfigFileError> {
    if let Some(path) = explicit {
      return Self::read(path).map(Some);
    }
    let path = cwd.join(CONFIG_FILE_NAME);
    if path.is_file() {
      Self::read(&path).map(Some)
    } else {
      Ok(None)
    }
  }
}
