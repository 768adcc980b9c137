// Copyright 2018-2026 the Deno authors. MIT license.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::params;

use crate::Cache;
use crate::CacheDeleteRequest;
use crate::CacheError;
use crate::CacheId;
use crate::CacheMatchRequest;
use crate::CacheMatchResponse;
use crate::CachePutRequest;
use crate::deserialize_headers;
use crate::serialize_headers;

#[derive(Clone)]
pub struct SqliteBackedCache(Arc<Mutex<Connection>>);

impl SqliteBackedCache {
  pub fn new(db_dir: PathBuf) -> Result<Self, CacheError> {
    std::fs::create_dir_all(&db_dir).map_err(|source| {
      CacheError::CacheStorageDirectory {
        dir: db_dir.clone(),
        source,
      }
    })?;
    let path = db_dir.join("cache_metadata.db");
    log::debug!("Opening cache storage {}", path.display());
    let connection = Connection::open(&path)?;
    connection.execute_batch(
      "PRAGMA journal_mode=WAL;
       PRAGMA synchronous=NORMAL;
       PRAGMA foreign_keys=ON;",
    )?;
    connection.execute(
      // Ids are never reused: a stale `CacheId` can't reach a newer partition.
      "CREATE TABLE IF NOT EXISTS cache_storage (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                cache_name      TEXT NOT NULL UNIQUE
            )",
      (),
    )?;
    connection.execute(
      "CREATE TABLE IF NOT EXISTS request_response_list (
                id                     INTEGER PRIMARY KEY,
                cache_id               INTEGER NOT NULL,
                request_url            TEXT NOT NULL,
                response_headers       BLOB NOT NULL,
                response_status        INTEGER NOT NULL,
                response_status_text   TEXT NOT NULL,
                response_body          BLOB NOT NULL,
                UNIQUE (cache_id, request_url),
                FOREIGN KEY (cache_id) REFERENCES cache_storage(id)
                  ON DELETE CASCADE
            )",
      (),
    )?;
    Ok(SqliteBackedCache(Arc::new(Mutex::new(connection))))
  }
}

fn cache_exists(
  db: &Connection,
  cache_id: CacheId,
) -> Result<bool, CacheError> {
  let count: i64 = db.query_row(
    "SELECT count(id) FROM cache_storage WHERE id = ?1",
    params![cache_id],
    |row| row.get(0),
  )?;
  Ok(count > 0)
}

type ResponseRow = (Vec<u8>, u16, String, Vec<u8>);

fn response_row(row: &rusqlite::Row) -> rusqlite::Result<ResponseRow> {
  Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn read_response(row: ResponseRow) -> Result<CacheMatchResponse, CacheError> {
  let (response_headers, response_status, response_status_text, response_body) =
    row;
  let response_headers = deserialize_headers(&response_headers)?;
  Ok(CacheMatchResponse {
    response_status,
    response_status_text,
    response_headers,
    response_body: Bytes::from(response_body),
  })
}

#[async_trait]
impl Cache for SqliteBackedCache {
  /// Open a cache storage. Internally, this creates a row in the sqlite if the
  /// cache doesn't exist and returns the internal id of the cache.
  async fn storage_open(
    &self,
    cache_name: String,
  ) -> Result<CacheId, CacheError> {
    if cache_name.is_empty() {
      return Err(CacheError::EmptyName);
    }
    let db = self.0.clone();
    tokio::task::spawn_blocking(move || {
      let db = db.lock();
      db.execute(
        "INSERT OR IGNORE INTO cache_storage (cache_name) VALUES (?1)",
        params![cache_name],
      )?;
      let cache_id = db.query_row(
        "SELECT id FROM cache_storage WHERE cache_name = ?1",
        params![cache_name],
        |row| {
          let id: i64 = row.get(0)?;
          Ok(id)
        },
      )?;
      Ok::<CacheId, CacheError>(cache_id)
    })
    .await?
  }

  async fn storage_has(&self, cache_name: String) -> Result<bool, CacheError> {
    let db = self.0.clone();
    tokio::task::spawn_blocking(move || {
      let db = db.lock();
      let cache_exists = db.query_row(
        "SELECT count(cache_name) FROM cache_storage WHERE cache_name = ?1",
        params![cache_name],
        |row| {
          let count: i64 = row.get(0)?;
          Ok(count > 0)
        },
      )?;
      Ok::<bool, CacheError>(cache_exists)
    })
    .await?
  }

  /// Entries go with the partition through the `ON DELETE CASCADE`.
  async fn storage_delete(
    &self,
    cache_name: String,
  ) -> Result<bool, CacheError> {
    let db = self.0.clone();
    tokio::task::spawn_blocking(move || {
      let db = db.lock();
      let rows_effected = db.execute(
        "DELETE FROM cache_storage WHERE cache_name = ?1",
        params![cache_name],
      )?;
      Ok::<bool, CacheError>(rows_effected > 0)
    })
    .await?
  }

  async fn storage_keys(&self) -> Result<Vec<String>, CacheError> {
    let db = self.0.clone();
    tokio::task::spawn_blocking(move || {
      let db = db.lock();
      let mut stmt =
        db.prepare("SELECT cache_name FROM cache_storage ORDER BY id")?;
      let names = stmt
        .query_map((), |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
      Ok::<Vec<String>, CacheError>(names)
    })
    .await?
  }

  async fn put(&self, request: CachePutRequest) -> Result<(), CacheError> {
    let db = self.0.clone();
    tokio::task::spawn_blocking(move || {
      let response_headers = serialize_headers(&request.response_headers);
      let db = db.lock();
      if !cache_exists(&db, request.cache_id)? {
        return Err(CacheError::NotFound);
      }
      // An upsert rather than `INSERT OR REPLACE` so the row keeps its id and
      // with it its position in `keys()`.
      db.execute(
        "INSERT INTO request_response_list
             (cache_id, request_url, response_headers, response_status,
              response_status_text, response_body)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (cache_id, request_url) DO UPDATE SET
               response_headers = excluded.response_headers,
               response_status = excluded.response_status,
               response_status_text = excluded.response_status_text,
               response_body = excluded.response_body",
        (
          request.cache_id,
          &request.request_url,
          response_headers,
          request.response_status,
          &request.response_status_text,
          &request.response_body[..],
        ),
      )?;
      Ok::<(), CacheError>(())
    })
    .await?
  }

  async fn r#match(
    &self,
    request: CacheMatchRequest,
  ) -> Result<Option<CacheMatchResponse>, CacheError> {
    let db = self.0.clone();
    tokio::task::spawn_blocking(move || {
      let db = db.lock();
      let row = match request.cache_id {
        Some(cache_id) => {
          if !cache_exists(&db, cache_id)? {
            return Err(CacheError::NotFound);
          }
          db.query_row(
            "SELECT response_headers, response_status,
                    response_status_text, response_body
                 FROM request_response_list
                 WHERE cache_id = ?1 AND request_url = ?2",
            params![cache_id, request.request_url],
            response_row,
          )
          .optional()?
        }
        None => db
          .query_row(
            "SELECT r.response_headers, r.response_status,
                    r.response_status_text, r.response_body
                 FROM request_response_list r
                 JOIN cache_storage c ON r.cache_id = c.id
                 WHERE r.request_url = ?1
                 ORDER BY c.id
                 LIMIT 1",
            params![request.request_url],
            response_row,
          )
          .optional()?,
      };
      row.map(read_response).transpose()
    })
    .await?
  }

  async fn delete(
    &self,
    request: CacheDeleteRequest,
  ) -> Result<bool, CacheError> {
    let db = self.0.clone();
    tokio::task::spawn_blocking(move || {
      let db = db.lock();
      if !cache_exists(&db, request.cache_id)? {
        return Err(CacheError::NotFound);
      }
      let rows_effected = db.execute(
        "DELETE FROM request_response_list
             WHERE cache_id = ?1 AND request_url = ?2",
        (request.cache_id, &request.request_url),
      )?;
      Ok::<bool, CacheError>(rows_effected > 0)
    })
    .await?
  }

  async fn keys(&self, cache_id: CacheId) -> Result<Vec<String>, CacheError> {
    let db = self.0.clone();
    tokio::task::spawn_blocking(move || {
      let db = db.lock();
      if !cache_exists(&db, cache_id)? {
        return Err(CacheError::NotFound);
      }
      let mut stmt = db.prepare(
        "SELECT request_url FROM request_response_list
             WHERE cache_id = ?1 ORDER BY id",
      )?;
      let urls = stmt
        .query_map(params![cache_id], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
      Ok::<Vec<String>, CacheError>(urls)
    })
    .await?
  }
}
