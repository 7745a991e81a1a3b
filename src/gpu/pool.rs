//! Texture bookkeeping shared by every GPU backend
//!
//! The pool does not know what a texture is; it tracks handles, names,
//! sizes, creation order and the used flag, and hands resources back to the
//! caller when they are evicted or collected so the backend can free them.

use std::collections::HashMap;

use log::debug;

use super::{PixelFormat, TextureId, TextureInfo};

/// Named uploads kept alive before eviction kicks in
pub const DEFAULT_POOL_LIMIT: usize = 30;

#[derive(Debug)]
struct PoolEntry<T> {
    name: Option<String>,
    width: u32,
    height: u32,
    format: PixelFormat,
    created: u64,
    used: bool,
    resource: T,
}

/// Handle-indexed texture store with a bounded named pool
#[derive(Debug)]
pub struct TexturePool<T> {
    entries: HashMap<TextureId, PoolEntry<T>>,
    names: HashMap<String, TextureId>,
    next_id: u64,
    clock: u64,
    limit: usize,
}

impl<T> TexturePool<T> {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: HashMap::new(),
            names: HashMap::new(),
            next_id: 1,
            clock: 0,
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Find a named texture and mark it used
    pub fn lookup(&mut self, name: &str) -> Option<TextureId> {
        let id = *self.names.get(name)?;
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.used = true;
        }
        Some(id)
    }

    /// Store a new texture. Named inserts may evict the oldest unused named
    /// texture, which is returned so the caller can destroy it.
    pub fn insert(
        &mut self,
        name: Option<String>,
        width: u32,
        height: u32,
        format: PixelFormat,
        resource: T,
    ) -> (TextureId, Option<(TextureId, T)>) {
        let evicted = if name.is_some() && self.names.len() >= self.limit {
            self.evict_oldest_unused()
        } else {
            None
        };

        if let Some(name) = name.as_ref() {
            // A stale entry under the same name loses its key
            if let Some(previous) = self.names.get(name).copied() {
                if let Some(entry) = self.entries.get_mut(&previous) {
                    entry.name = None;
                }
            }
        }

        let id = TextureId(self.next_id);
        self.next_id += 1;
        self.clock += 1;
        if let Some(name) = name.as_ref() {
            self.names.insert(name.clone(), id);
        }
        self.entries.insert(
            id,
            PoolEntry {
                name,
                width,
                height,
                format,
                created: self.clock,
                used: true,
                resource,
            },
        );
        (id, evicted)
    }

    fn evict_oldest_unused(&mut self) -> Option<(TextureId, T)> {
        let victim = self
            .entries
            .iter()
            .filter(|(_, e)| e.name.is_some() && !e.used)
            .min_by_key(|(_, e)| e.created)
            .map(|(id, _)| *id)?;
        debug!("Evicting pooled texture {:?}", victim);
        self.remove(victim).map(|resource| (victim, resource))
    }

    pub fn get(&self, id: TextureId) -> Option<&T> {
        self.entries.get(&id).map(|e| &e.resource)
    }

    pub fn get_mut(&mut self, id: TextureId) -> Option<&mut T> {
        self.entries.get_mut(&id).map(|e| &mut e.resource)
    }

    /// Swap the resource behind a handle, e.g. after a resize on re-upload
    pub fn replace(
        &mut self,
        id: TextureId,
        width: u32,
        height: u32,
        format: PixelFormat,
        resource: T,
    ) -> Option<T> {
        let entry = self.entries.get_mut(&id)?;
        entry.width = width;
        entry.height = height;
        entry.format = format;
        entry.used = true;
        Some(std::mem::replace(&mut entry.resource, resource))
    }

    pub fn info(&self, id: TextureId) -> Option<TextureInfo> {
        self.entries.get(&id).map(|e| TextureInfo {
            id,
            name: e.name.clone(),
            width: e.width,
            height: e.height,
            format: e.format,
            used: e.used,
        })
    }

    pub fn contains(&self, id: TextureId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn remove(&mut self, id: TextureId) -> Option<T> {
        let entry = self.entries.remove(&id)?;
        if let Some(name) = entry.name {
            if self.names.get(&name) == Some(&id) {
                self.names.remove(&name);
            }
        }
        Some(entry.resource)
    }

    pub fn mark_used(&mut self, id: TextureId) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.used = true;
        }
    }

    pub fn mark_unused(&mut self, id: TextureId) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.used = false;
        }
    }

    /// Remove every unused texture and return the freed resources
    pub fn collect_garbage(&mut self) -> Vec<(TextureId, T)> {
        let unused: Vec<TextureId> = self
            .entries
            .iter()
            .filter(|(_, e)| !e.used)
            .map(|(id, _)| *id)
            .collect();
        unused
            .into_iter()
            .filter_map(|id| self.remove(id).map(|r| (id, r)))
            .collect()
    }

    /// Handles in creation order
    pub fn ids(&self) -> Vec<TextureId> {
        let mut ids: Vec<_> = self.entries.iter().map(|(id, e)| (e.created, *id)).collect();
        ids.sort_unstable();
        ids.into_iter().map(|(_, id)| id).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn named_len(&self) -> usize {
        self.names.len()
    }

    pub fn drain(&mut self) -> Vec<T> {
        self.names.clear();
        self.entries.drain().map(|(_, e)| e.resource).collect()
    }
}

impl<T> Default for TexturePool<T> {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_LIMIT)
    }
}
