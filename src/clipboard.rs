use std::borrow::Cow;

use arboard::Clipboard;
use image::{ExtendedColorType, ImageEncoder};
use tracing::warn;

use crate::errors::{ClipError, Result};
use crate::hash::hash_content;
use crate::storage::models::{Item, ItemContent};

/// Two reads of the same payload yield the same token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeToken(String);

impl ChangeToken {
    pub fn for_text(text: &str) -> Self {
        Self(hash_content(text.as_bytes()))
    }

    pub fn for_rgba(bytes: &[u8]) -> Self {
        Self(hash_content(bytes))
    }
}

pub struct ClipboardContent {
    pub content: ItemContent,
    pub token: ChangeToken,
}

pub trait ClipboardWriter: Send {
    fn write(&self, item: &Item) -> Result<ChangeToken>;
}

pub struct SystemClipboard;

impl ClipboardWriter for SystemClipboard {
    fn write(&self, item: &Item) -> Result<ChangeToken> {
        match &item.content {
            ItemContent::Text(text) => {
                write_text_to_clipboard(text)?;
                Ok(ChangeToken::for_text(text))
            }
            ItemContent::Image(png) => write_image_to_clipboard(png),
        }
    }
}

pub fn read_clipboard() -> Result<Option<ClipboardContent>> {
    let mut cb = Clipboard::new().map_err(|e| ClipError::Clipboard(e.to_string()))?;

    if let Ok(text) = cb.get_text()
        && !text.is_empty()
    {
        let token = ChangeToken::for_text(&text);
        return Ok(Some(ClipboardContent {
            content: ItemContent::Text(text),
            token,
        }));
    }

    if let Ok(img) = cb.get_image() {
        let token = ChangeToken::for_rgba(&img.bytes);
        let png = encode_png(&img.bytes, img.width as u32, img.height as u32)?;
        return Ok(Some(ClipboardContent {
            content: ItemContent::Image(png),
            token,
        }));
    }

    Ok(None)
}

pub fn write_text_to_clipboard(text: &str) -> Result<()> {
    let mut cb = Clipboard::new().map_err(|e| ClipError::Clipboard(e.to_string()))?;
    cb.set_text(text).map_err(|e| ClipError::Clipboard(e.to_string()))
}

pub fn write_image_to_clipboard(png: &[u8]) -> Result<ChangeToken> {
    let (rgba, width, height) = decode_png(png)?;
    let token = ChangeToken::for_rgba(&rgba);
    let mut cb = Clipboard::new().map_err(|e| ClipError::Clipboard(e.to_string()))?;
    let img_data = arboard::ImageData {
        width: width as usize,
        height: height as usize,
        bytes: Cow::Owned(rgba),
    };
    cb.set_image(img_data)
        .map_err(|e| ClipError::Clipboard(e.to_string()))?;
    Ok(token)
}

pub fn encode_png(rgba: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    image::codecs::png::PngEncoder::new(&mut out)
        .write_image(rgba, width, height, ExtendedColorType::Rgba8)
        .map_err(|e| ClipError::Image(e.to_string()))?;
    Ok(out)
}

pub fn decode_png(bytes: &[u8]) -> Result<(Vec<u8>, u32, u32)> {
    let rgba = image::load_from_memory(bytes)
        .map_err(|e| ClipError::Image(e.to_string()))?
        .to_rgba8();
    let (width, height) = rgba.dimensions();
    Ok((rgba.into_raw(), width, height))
}

#[derive(Default)]
pub struct ClipboardMonitor {
    last_seen: Option<ChangeToken>,
}

impl ClipboardMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat `reading` as already seen, so only later changes are reported.
    pub fn seeded(reading: Option<&ClipboardContent>) -> Self {
        Self {
            last_seen: reading.map(|r| r.token.clone()),
        }
    }

    pub fn from_current() -> Self {
        match read_clipboard() {
            Ok(reading) => Self::seeded(reading.as_ref()),
            Err(e) => {
                warn!(error = %e, "could not read clipboard at startup");
                Self::new()
            }
        }
    }

    pub fn poll(&mut self) -> Result<Option<ItemContent>> {
        Ok(self.observe(read_clipboard()?))
    }

    pub fn observe(&mut self, reading: Option<ClipboardContent>) -> Option<ItemContent> {
        let reading = reading?;
        if self.last_seen.as_ref() == Some(&reading.token) {
            return None;
        }
        self.last_seen = Some(reading.token);
        Some(reading.content)
    }

    // Our own copy-out must not come back as a capture.
    pub fn acknowledge(&mut self, token: ChangeToken) {
        self.last_seen = Some(token);
    }
}
