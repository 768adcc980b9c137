// Copyright 2018-2026 the Deno authors. MIT license.

use async_trait::async_trait;
use http::HeaderValue;
use http::Method;
use http::StatusCode;
use http::header::CONTENT_TYPE;

use crate::FetchError;
use crate::FetchHandler;
use crate::FetchRequest;
use crate::FetchResponse;

/// An implementation which tries to read file URLs from the file system via
/// tokio::fs. A directory is served through its `index.html`.
#[derive(Clone, Copy, Default)]
pub struct FsFetchHandler;

#[async_trait]
impl FetchHandler for FsFetchHandler {
  async fn fetch(
    &self,
    request: FetchRequest,
  ) -> Result<FetchResponse, FetchError> {
    let url = request.url;
    if request.method != Method::GET && request.method != Method::HEAD {
      return Ok(FetchResponse::new(
        url,
        StatusCode::METHOD_NOT_ALLOWED,
        "",
      ));
    }
    // Error messages are kept intentionally generic in order to discourage
    // probing, and attempting to discern something from the environment.
    let mut path = url
      .to_file_path()
      .map_err(|_| FetchError::File(url.clone()))?;
    if tokio::fs::metadata(&path)
      .await
      .map(|m| m.is_dir())
      .unwrap_or(false)
    {
      path = path.join("index.html");
    }
    let body = match tokio::fs::read(&path).await {
      Ok(body) => body,
      Err(err) => {
        log::debug!("failed to read {}: {}", path.display(), err);
        return Err(FetchError::File(url));
      }
    };
    let mut response = FetchResponse::new(url, StatusCode::OK, body);
    if let Some(content_type) = path
      .extension()
      .and_then(|ext| ext.to_str())
      .and_then(content_type_for_extension)
    {
      response
        .headers
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    }
    if request.method == Method::HEAD {
      response.body = Default::default();
    }
    Ok(response)
  }
}

fn content_type_for_extension(ext: &str) -> Option<&'static str> {
  let content_type = match ext.to_ascii_lowercase().as_str() {
    "html" | "htm" => "text/html; charset=utf-8",
    "js" | "mjs" => "text/javascript; charset=utf-8",
    "css" => "text/css; charset=utf-8",
    "json" | "webmanifest" => "application/json",
    "txt" => "text/plain; charset=utf-8",
    "svg" => "image/svg+xml",
    "png" => "image/png",
    "jpg" | "jpeg" => "image/jpeg",
    "ico" => "image/x-icon",
    "wasm" => "application/wasm",
    _ => return None,
  };
  Some(content_type)
}
