//! Instance pool shared by every chunk scatterer.
//!
//! Handles are parked per prop instead of being destroyed, so a chunk that streams back in
//! reuses the exact objects it gave up. The pool also tracks which handles are currently
//! checked out; releasing a handle it never handed out is an internal invariant violation.

use std::hash::Hash;
use std::sync::Arc;

use bevy::prelude::*;
use dashmap::DashMap;

use crate::PropId;

/// Pool shared between scatterers on different schedules.
pub type SharedPool<H> = Arc<InstancePool<H>>;

/// Concurrent stack of idle handles per prop, plus the set of handles currently in use.
///
/// All operations take `&self` and lock at most one shard at a time.
#[derive(Debug)]
pub struct InstancePool<H>
where
    H: Eq + Hash,
{
    idle: DashMap<PropId, Vec<H>>,
    checked_out: DashMap<H, PropId>,
}

impl<H> Default for InstancePool<H>
where
    H: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self {
            idle: DashMap::new(),
            checked_out: DashMap::new(),
        }
    }
}

impl<H> InstancePool<H>
where
    H: Eq + Hash + Clone + std::fmt::Debug,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedPool<H> {
        Arc::new(Self::new())
    }

    /// Pop the most recently released handle for `prop`.
    pub fn acquire(&self, prop: &PropId) -> Option<H> {
        let handle = self.idle.get_mut(prop)?.pop()?;
        self.checked_out.insert(handle.clone(), prop.clone());
        Some(handle)
    }

    /// Register a freshly constructed handle as checked out under `prop`.
    pub fn track(&self, prop: &PropId, handle: H) {
        self.checked_out.insert(handle, prop.clone());
    }

    /// Return a checked-out handle to the idle stack of `prop`.
    ///
    /// Returns `false` if the handle was not checked out under `prop`; debug builds panic.
    pub fn release(&self, prop: &PropId, handle: H) -> bool {
        match self.checked_out.remove(&handle) {
            Some((_, owner)) if owner == *prop => {
                self.idle.entry(prop.clone()).or_default().push(handle);
                true
            }
            Some((handle, owner)) => {
                error!(
                    "Instance pool: {:?} released under '{}' but was checked out as '{}'",
                    handle, prop, owner
                );
                debug_assert!(false, "instance released under the wrong prop");
                // Keep it tracked under its real owner.
                self.checked_out.insert(handle, owner);
                false
            }
            None => {
                error!("Instance pool: released untracked handle {:?} for '{}'", handle, prop);
                debug_assert!(false, "released an instance the pool never handed out");
                false
            }
        }
    }

    /// Stop tracking a checked-out handle that the caller is about to destroy.
    pub fn forget(&self, handle: &H) -> Option<PropId> {
        self.checked_out.remove(handle).map(|(_, prop)| prop)
    }

    pub fn idle_count(&self, prop: &PropId) -> usize {
        self.idle.get(prop).map_or(0, |stack| stack.len())
    }

    pub fn total_idle(&self) -> usize {
        self.idle.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn checked_out_count(&self) -> usize {
        self.checked_out.len()
    }

    pub fn is_checked_out(&self, handle: &H) -> bool {
        self.checked_out.contains_key(handle)
    }

    /// Remove every idle handle, e.g. to destroy them on a full reset.
    pub fn drain_idle(&self) -> Vec<(PropId, H)> {
        let props: Vec<PropId> = self.idle.iter().map(|entry| entry.key().clone()).collect();
        let mut drained = Vec::new();
        for prop in props {
            if let Some((prop, stack)) = self.idle.remove(&prop) {
                drained.extend(stack.into_iter().map(|h| (prop.clone(), h)));
            }
        }
        drained
    }
}
