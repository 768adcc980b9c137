// Copyright 2018-2026 the Deno authors. MIT license.

//! Cache partitions keyed by request URL.
//!
//! A partition ("cache generation") is addressed by name. Entries inside a
//! partition are opaque responses: status, headers and body bytes.

use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;

mod memory;
mod sqlite;

pub use memory::InMemoryCache;
pub use sqlite::SqliteBackedCache;

pub type CacheId = i64;

/// Raw header bytes. Values aren't required to be UTF-8.
pub type ByteString = Vec<u8>;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
  #[error("Cache name cannot be empty")]
  EmptyName,
  #[error("Cache not found")]
  NotFound,
  #[error(transparent)]
  Sqlite(#[from] rusqlite::Error),
  #[error(transparent)]
  JoinError(#[from] tokio::task::JoinError),
  #[error("malformed headers in cache entry")]
  MalformedHeaders,
  #[error("Failed to create cache storage directory {}", .dir.display())]
  CacheStorageDirectory {
    dir: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

#[derive(Debug, Clone)]
pub struct CachePutRequest {
  pub cache_id: CacheId,
  pub request_url: String,
  pub response_headers: Vec<(ByteString, ByteString)>,
  pub response_status: u16,
  pub response_status_text: String,
  pub response_body: Bytes,
}

#[derive(Debug, Clone)]
pub struct CacheMatchRequest {
  /// `None` searches every partition in creation order.
  pub cache_id: Option<CacheId>,
  pub request_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheMatchResponse {
  pub response_status: u16,
  pub response_status_text: String,
  pub response_headers: Vec<(ByteString, ByteString)>,
  pub response_body: Bytes,
}

#[derive(Debug, Clone)]
pub struct CacheDeleteRequest {
  pub cache_id: CacheId,
  pub request_url: String,
}

/// Storage for named cache partitions.
///
/// Operations on a single entry are atomic. There are no transactions
/// spanning several entries or partitions.
#[async_trait]
pub trait Cache: Clone + Send + Sync + 'static {
  /// Open a partition, creating it if it doesn't exist.
  async fn storage_open(&self, cache_name: String)
  -> Result<CacheId, CacheError>;
  async fn storage_has(&self, cache_name: String) -> Result<bool, CacheError>;
  /// Delete a partition with all of its entries. Returns `false` when there
  /// was nothing to delete.
  async fn storage_delete(
    &self,
    cache_name: String,
  ) -> Result<bool, CacheError>;
  /// Names of all partitions, in creation order.
  async fn storage_keys(&self) -> Result<Vec<String>, CacheError>;

  /// Put a response into a partition, replacing any previous entry for the
  /// same request.
  async fn put(&self, request: CachePutRequest) -> Result<(), CacheError>;
  async fn r#match(
    &self,
    request: CacheMatchRequest,
  ) -> Result<Option<CacheMatchResponse>, CacheError>;
  async fn delete(
    &self,
    request: CacheDeleteRequest,
  ) -> Result<bool, CacheError>;
  /// Request URLs stored in a partition, in insertion order.
  async fn keys(&self, cache_id: CacheId) -> Result<Vec<String>, CacheError>;
}

#[derive(Clone)]
pub enum CacheImpl {
  Memory(InMemoryCache),
  Sqlite(SqliteBackedCache),
}

impl CacheImpl {
  pub fn in_memory() -> Self {
    Self::Memory(InMemoryCache::default())
  }

  pub fn sqlite(db_dir: PathBuf) -> Result<Self, CacheError> {
    Ok(Self::Sqlite(SqliteBackedCache::new(db_dir)?))
  }
}

#[async_trait]
impl Cache for CacheImpl {
  async fn storage_open(
    &self,
    cache_name: String,
  ) -> Result<CacheId, CacheError> {
    match self {
      Self::Memory(cache) => cache.storage_open(cache_name).await,
      Self::Sqlite(cache) => cache.storage_open(cache_name).await,
    }
  }

  async fn storage_has(&self, cache_name: String) -> Result<bool, CacheError> {
    match self {
      Self::Memory(cache) => cache.storage_has(cache_name).await,
      Self::Sqlite(cache) => cache.storage_has(cache_name).await,
    }
  }

  async fn storage_delete(
    &self,
    cache_name: String,
  ) -> Result<bool, CacheError> {
    match self {
      Self::Memory(cache) => cache.storage_delete(cache_name).await,
      Self::Sqlite(cache) => cache.storage_delete(cache_name).await,
    }
  }

  async fn storage_keys(&self) -> Result<Vec<String>, CacheError> {
    match self {
      Self::Memory(cache) => cache.storage_keys().await,
      Self::Sqlite(cache) => cache.storage_keys().await,
    }
  }

  async fn put(&self, request: CachePutRequest) -> Result<(), CacheError> {
    match self {
      Self::Memory(cache) => cache.put(request).await,
      Self::Sqlite(cache) => cache.put(request).await,
    }
  }

  async fn r#match(
    &self,
    request: CacheMatchRequest,
  ) -> Result<Option<CacheMatchResponse>, CacheError> {
    match self {
      Self::Memory(cache) => cache.r#match(request).await,
      Self::Sqlite(cache) => cache.r#match(request).await,
    }
  }

  async fn delete(
    &self,
    request: CacheDeleteRequest,
  ) -> Result<bool, CacheError> {
    match self {
      Self::Memory(cache) => cache.delete(request).await,
      Self::Sqlite(cache) => cache.delete(request).await,
    }
  }

  async fn keys(&self, cache_id: CacheId) -> Result<Vec<String>, CacheError> {
    match self {
      Self::Memory(cache) => cache.keys(cache_id).await,
      Self::Sqlite(cache) => cache.keys(cache_id).await,
    }
  }
}

/// Serialize headers into bytes, each name and value followed by `\r\n`.
/// Neither can contain a bare CR or LF, so the encoding is unambiguous.
pub fn serialize_headers(headers: &[(ByteString, ByteString)]) -> Vec<u8> {
  let mut serialized_headers = Vec::new();
  for (name, value) in headers {
    serialized_headers.extend_from_slice(name);
    serialized_headers.extend_from_slice(b"\r\n");
    serialized_headers.extend_from_slice(value);
    serialized_headers.extend_from_slice(b"\r\n");
  }
  serialized_headers
}

/// Deserialize bytes produced by [`serialize_headers`].
pub fn deserialize_headers(
  serialized_headers: &[u8],
) -> Result<Vec<(ByteString, ByteString)>, CacheError> {
  let mut headers = Vec::new();
  let mut name = None;
  let mut start = 0;
  for (i, byte) in serialized_headers.iter().enumerate() {
    if byte == &b'\r' && serialized_headers.get(i + 1) == Some(&b'\n') {
      match name.take() {
        None => name = Some(start..i),
        Some(name) => headers.push((
          serialized_headers[name].to_vec(),
          serialized_headers[start..i].to_vec(),
        )),
      }
      start = i + 2;
    }
  }
  if name.is_some() || start != serialized_headers.len() {
    return Err(CacheError::MalformedHeaders);
  }
  Ok(headers)
}
