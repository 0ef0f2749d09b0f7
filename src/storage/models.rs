use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(Uuid);

impl ItemId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }

    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }

    pub fn matches_prefix(&self, prefix: &str) -> bool {
        let prefix = prefix.to_ascii_lowercase().replace('-', "");
        self.0.simple().to_string().starts_with(&prefix)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Text,
    Image,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Text => "text",
            ItemKind::Image => "image",
        }
    }

    pub fn parse(s: &str) -> Option<ItemKind> {
        match s {
            "text" => Some(ItemKind::Text),
            "image" => Some(ItemKind::Image),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemContent {
    Text(String),
    /// Opaque encoded bitmap (PNG as captured).
    Image(Vec<u8>),
}

impl ItemContent {
    pub fn kind(&self) -> ItemKind {
        match self {
            ItemContent::Text(_) => ItemKind::Text,
            ItemContent::Image(_) => ItemKind::Image,
        }
    }

    pub fn size_bytes(&self) -> usize {
        match self {
            ItemContent::Text(text) => text.len(),
            ItemContent::Image(bytes) => bytes.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub id: ItemId,
    pub content: ItemContent,
    /// Last activity: capture, copy-out, pin or unpin.
    pub timestamp: DateTime<Utc>,
    pub is_pinned: bool,
}

impl Item {
    pub fn new(content: ItemContent) -> Self {
        Self {
            id: ItemId::generate(),
            content,
            timestamp: Utc::now(),
            is_pinned: false,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(ItemContent::Text(text.into()))
    }

    pub fn image(bytes: Vec<u8>) -> Self {
        Self::new(ItemContent::Image(bytes))
    }

    pub fn kind(&self) -> ItemKind {
        self.content.kind()
    }

    pub fn text_content(&self) -> Option<&str> {
        match &self.content {
            ItemContent::Text(text) => Some(text),
            ItemContent::Image(_) => None,
        }
    }

    pub fn image_bytes(&self) -> Option<&[u8]> {
        match &self.content {
            ItemContent::Image(bytes) => Some(bytes),
            ItemContent::Text(_) => None,
        }
    }

    pub fn same_content(&self, other: &ItemContent) -> bool {
        self.content == *other
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryStats {
    pub total_items: usize,
    pub text_items: usize,
    pub image_items: usize,
    pub pinned_items: usize,
    pub total_size: usize,
    pub retention_limit: u32,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}
