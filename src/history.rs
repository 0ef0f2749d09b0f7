use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::settings::{DEFAULT_RETENTION_LIMIT, clamp_retention_limit};
use crate::storage::models::{HistoryStats, Item, ItemContent, ItemId, ItemKind};

#[derive(Debug, Clone)]
pub struct History {
    items: Vec<Item>,
    retention_limit: u32,
}

impl Default for History {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION_LIMIT)
    }
}

impl History {
    pub fn new(retention_limit: u32) -> Self {
        Self {
            items: Vec::new(),
            retention_limit: clamp_retention_limit(retention_limit as i64),
        }
    }

    /// Seed from persisted items. Duplicate ids are dropped, pinned items are
    /// stably moved to the front and retention is applied.
    pub fn with_items(items: Vec<Item>, retention_limit: u32) -> Self {
        let mut seen = HashSet::new();
        let (pinned, unpinned): (Vec<Item>, Vec<Item>) = items
            .into_iter()
            .filter(|item| seen.insert(item.id))
            .partition(|item| item.is_pinned);

        let mut history = Self::new(retention_limit);
        history.items = pinned;
        history.items.extend(unpinned);
        history.enforce_retention();
        history
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: ItemId) -> Option<&Item> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn retention_limit(&self) -> u32 {
        self.retention_limit
    }

    pub fn pinned_count(&self) -> usize {
        self.items.iter().take_while(|item| item.is_pinned).count()
    }

    pub fn unpinned_count(&self) -> usize {
        self.items.len() - self.pinned_count()
    }

    pub fn insert_or_touch(&mut self, content: ItemContent) -> ItemId {
        self.insert_or_touch_at(content, Utc::now())
    }

    pub fn insert_or_touch_at(&mut self, content: ItemContent, now: DateTime<Utc>) -> ItemId {
        let id = match self.items.iter().position(|item| item.same_content(&content)) {
            Some(index) => {
                let mut item = self.items.remove(index);
                item.timestamp = now;
                let id = item.id;
                debug!(%id, "touched existing item");
                self.place_at_head(item);
                id
            }
            None => {
                let mut item = Item::new(content);
                item.timestamp = now;
                let id = item.id;
                self.place_at_head(item);
                id
            }
        };
        self.enforce_retention();
        id
    }

    pub fn toggle_pin(&mut self, id: ItemId) -> bool {
        self.toggle_pin_at(id, Utc::now())
    }

    pub fn toggle_pin_at(&mut self, id: ItemId, now: DateTime<Utc>) -> bool {
        let Some(index) = self.index_of(id) else {
            return false;
        };
        let mut item = self.items.remove(index);
        item.is_pinned = !item.is_pinned;
        item.timestamp = now;
        self.place_at_head(item);
        self.enforce_retention();
        true
    }

    pub fn remove(&mut self, id: ItemId) -> Option<Item> {
        let index = self.index_of(id)?;
        Some(self.items.remove(index))
    }

    pub fn clear_all(&mut self) -> usize {
        let removed = self.items.len();
        self.items.clear();
        removed
    }

    pub fn set_retention_limit(&mut self, requested: i64) -> u32 {
        let clamped = clamp_retention_limit(requested);
        if clamped as i64 != requested {
            return self.set_retention_limit(clamped as i64);
        }
        self.retention_limit = clamped;
        self.enforce_retention();
        clamped
    }

    /// Evict least-recently-active unpinned items until the limit holds.
    pub fn enforce_retention(&mut self) -> Vec<Item> {
        let mut evicted = Vec::new();
        while self.unpinned_count() > self.retention_limit as usize {
            let Some(tail) = self.items.iter().rposition(|item| !item.is_pinned) else {
                break;
            };
            evicted.push(self.items.remove(tail));
        }
        if !evicted.is_empty() {
            debug!(count = evicted.len(), limit = self.retention_limit, "evicted items");
        }
        evicted
    }

    pub fn stats(&self) -> HistoryStats {
        let count_kind = |kind: ItemKind| self.items.iter().filter(|i| i.kind() == kind).count();
        HistoryStats {
            total_items: self.items.len(),
            text_items: count_kind(ItemKind::Text),
            image_items: count_kind(ItemKind::Image),
            pinned_items: self.pinned_count(),
            total_size: self.items.iter().map(|i| i.content.size_bytes()).sum(),
            retention_limit: self.retention_limit,
            oldest: self.items.iter().map(|i| i.timestamp).min(),
            newest: self.items.iter().map(|i| i.timestamp).max(),
        }
    }

    fn index_of(&self, id: ItemId) -> Option<usize> {
        self.items.iter().position(|item| item.id == id)
    }

    // Head of the item's own block, so the pinned prefix stays contiguous.
    fn place_at_head(&mut self, item: Item) {
        let index = if item.is_pinned { 0 } else { self.pinned_count() };
        self.items.insert(index, item);
    }
}
