// Copyright 2018-2026 the Deno authors. MIT license.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::Cache;
use crate::CacheDeleteRequest;
use crate::CacheError;
use crate::CacheId;
use crate::CacheMatchRequest;
use crate::CacheMatchResponse;
use crate::CachePutRequest;

#[derive(Default)]
struct MemoryStorage {
  next_id: CacheId,
  /// Partition name to id, in creation order.
  names: IndexMap<String, CacheId>,
  entries: HashMap<CacheId, IndexMap<String, CacheMatchResponse>>,
}

/// A non-persistent store. Cloning shares the underlying partitions.
#[derive(Clone, Default)]
pub struct InMemoryCache(Arc<Mutex<MemoryStorage>>);

#[allow(clippy::unused_async)]
#[async_trait]
impl Cache for InMemoryCache {
  async fn storage_open(
    &self,
    cache_name: String,
  ) -> Result<CacheId, CacheError> {
    if cache_name.is_empty() {
      return Err(CacheError::EmptyName);
    }
    let mut storage = self.0.lock();
    if let Some(id) = storage.names.get(&cache_name) {
      return Ok(*id);
    }
    storage.next_id += 1;
    let id = storage.next_id;
    storage.names.insert(cache_name, id);
    storage.entries.insert(id, IndexMap::new());
    Ok(id)
  }

  async fn storage_has(&self, cache_name: String) -> Result<bool, CacheError> {
    Ok(self.0.lock().names.contains_key(&cache_name))
  }

  async fn storage_delete(
    &self,
    cache_name: String,
  ) -> Result<bool, CacheError> {
    let mut storage = self.0.lock();
    match storage.names.shift_remove(&cache_name) {
      Some(id) => {
        storage.entries.remove(&id);
        Ok(true)
      }
      None => Ok(false),
    }
  }

  async fn storage_keys(&self) -> Result<Vec<String>, CacheError> {
    Ok(self.0.lock().names.keys().cloned().collect())
  }

  async fn put(&self, request: CachePutRequest) -> Result<(), CacheError> {
    let mut storage = self.0.lock();
    let Some(entries) = storage.entries.get_mut(&request.cache_id) else {
      return Err(CacheError::NotFound);
    };
    entries.insert(
      request.request_url,
      CacheMatchResponse {
        response_status: request.response_status,
        response_status_text: request.response_status_text,
        response_headers: request.response_headers,
        response_body: request.response_body,
      },
    );
    Ok(())
  }

  async fn r#match(
    &self,
    request: CacheMatchRequest,
  ) -> Result<Option<CacheMatchResponse>, CacheError> {
    let storage = self.0.lock();
    match request.cache_id {
      Some(cache_id) => {
        let Some(entries) = storage.entries.get(&cache_id) else {
          return Err(CacheError::NotFound);
        };
        Ok(entries.get(&request.request_url).cloned())
      }
      None => Ok(
        storage
          .names
          .values()
          .filter_map(|id| storage.entries.get(id))
          .find_map(|entries| entries.get(&request.request_url))
          .cloned(),
      ),
    }
  }

  async fn delete(
    &self,
    request: CacheDeleteRequest,
  ) -> Result<bool, CacheError> {
    let mut storage = self.0.lock();
    let Some(entries) = storage.entries.get_mut(&request.cache_id) else {
      return Err(CacheError::NotFound);
    };
    Ok(entries.shift_remove(&request.request_url).is_some())
  }

  async fn keys(&self, cache_id: CacheId) -> Result<Vec<String>, CacheError> {
    let storage = self.0.lock();
    let Some(entries) = storage.entries.get(&cache_id) else {
      return Err(CacheError::NotFound);
    };
    Ok(entries.keys().cloned().collect())
  }
}
