// Copyright 2018-2026 the Deno authors. MIT license.

pub mod caches;
pub mod fetch;
pub mod lifecycle;
pub mod serve;
