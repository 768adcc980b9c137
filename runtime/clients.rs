// Copyright 2018-2026 the Deno authors. MIT license.

use std::collections::BTreeMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;

pub type ClientId = u64;

/// Execution contexts (pages, tabs) the worker may control.
#[derive(Default)]
pub struct Clients {
  next_id: AtomicU64,
  /// Open clients and whether the worker controls them.
  open: Mutex<BTreeMap<ClientId, bool>>,
}

impl Clients {
  pub fn open(&self, controlled: bool) -> ClientId {
    let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
    self.open.lock().insert(id, controlled);
    id
  }

  /// Returns `true` if the client was open.
  pub fn close(&self, id: ClientId) -> bool {
    self.open.lock().remove(&id).is_some()
  }

  pub fn is_controlled(&self, id: ClientId) -> bool {
    self.open.lock().get(&id).copied().unwrap_or(false)
  }

  pub fn len(&self) -> usize {
    self.open.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Take control of every open client. Returns how many were newly claimed.
  pub fn claim(&self) -> usize {
    let mut open = self.open.lock();
    let mut claimed = 0;
    for controlled in open.values_mut().filter(|c| !**c) {
      *controlled = true;
      claimed += 1;
    }
    claimed
  }
}
