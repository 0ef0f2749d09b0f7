use std::collections::{HashMap, HashSet};
use std::io::Cursor;

use image::ImageReader;

use crate::storage::models::{Item, ItemId};

#[derive(Default)]
pub struct ImageInfoCache {
    dimensions: HashMap<ItemId, Option<(u32, u32)>>,
}

impl ImageInfoCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dimensions(&mut self, item: &Item) -> Option<(u32, u32)> {
        let bytes = item.image_bytes()?;
        *self
            .dimensions
            .entry(item.id)
            .or_insert_with(|| read_dimensions(bytes))
    }

    pub fn retain(&mut self, live: &HashSet<ItemId>) {
        self.dimensions.retain(|id, _| live.contains(id));
    }

    pub fn len(&self) -> usize {
        self.dimensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }
}

// Reads only the header, not the pixel data.
pub fn read_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}
