use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::errors::{ClipError, Result};
use super::models::{Item, ItemContent, ItemId, ItemKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredItem {
    pub id: ItemId,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_data: Option<String>,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_pinned: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Iso(DateTime<Utc>),
    Epoch(f64),
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    match RawTimestamp::deserialize(deserializer)? {
        RawTimestamp::Iso(dt) => Ok(dt),
        RawTimestamp::Epoch(secs) => {
            let whole = secs.trunc() as i64;
            let nanos = ((secs.fract()) * 1e9).round().clamp(0.0, 999_999_999.0) as u32;
            Utc.timestamp_opt(whole, nanos)
                .single()
                .ok_or_else(|| serde::de::Error::custom(format!("timestamp out of range: {secs}")))
        }
    }
}

impl From<&Item> for StoredItem {
    fn from(item: &Item) -> Self {
        let (text_content, image_data) = match &item.content {
            ItemContent::Text(text) => (Some(text.clone()), None),
            ItemContent::Image(bytes) => (None, Some(BASE64.encode(bytes))),
        };
        Self {
            id: item.id,
            kind: item.kind().as_str().to_string(),
            text_content,
            image_data,
            timestamp: item.timestamp,
            is_pinned: item.is_pinned,
        }
    }
}

impl TryFrom<StoredItem> for Item {
    type Error = ClipError;

    fn try_from(stored: StoredItem) -> Result<Self> {
        let content = match ItemKind::parse(&stored.kind) {
            Some(ItemKind::Text) => match stored.text_content {
                Some(text) => ItemContent::Text(text),
                None => {
                    return Err(ClipError::InvalidInput(format!(
                        "text item {} has no textContent",
                        stored.id
                    )));
                }
            },
            Some(ItemKind::Image) => {
                let encoded = stored.image_data.ok_or_else(|| {
                    ClipError::InvalidInput(format!("image item {} has no imageData", stored.id))
                })?;
                let bytes = BASE64.decode(encoded.as_bytes()).map_err(|e| {
                    ClipError::InvalidInput(format!("image item {}: {e}", stored.id))
                })?;
                ItemContent::Image(bytes)
            }
            None => {
                return Err(ClipError::InvalidInput(format!(
                    "item {} has unknown type {:?}",
                    stored.id, stored.kind
                )));
            }
        };
        Ok(Item {
            id: stored.id,
            content,
            timestamp: stored.timestamp,
            is_pinned: stored.is_pinned,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_record_shape() {
        let mut item = Item::text("hello");
        item.is_pinned = true;
        let value = serde_json::to_value(StoredItem::from(&item)).unwrap();
        assert_eq!(value["type"], "text");
        assert_eq!(value["textContent"], "hello");
        assert_eq!(value["isPinned"], true);
        assert!(value.get("imageData").is_none());
        assert_eq!(value["id"], item.id.to_string());
    }

    #[test]
    fn test_image_record_is_base64() {
        let item = Item::image(vec![0, 1, 2, 255]);
        let stored = StoredItem::from(&item);
        assert_eq!(stored.kind, "image");
        assert_eq!(stored.image_data.as_deref(), Some("AAEC/w=="));
        assert!(stored.text_content.is_none());

        let back = Item::try_from(stored).unwrap();
        assert_eq!(back.image_bytes(), Some(&[0u8, 1, 2, 255][..]));
    }

    #[test]
    fn test_epoch_timestamp_accepted() {
        let id = ItemId::generate();
        let json = format!(
            r#"{{"id":"{id}","type":"text","textContent":"x","timestamp":1700000000.5,"isPinned":false}}"#
        );
        let stored: StoredItem = serde_json::from_str(&json).unwrap();
        assert_eq!(stored.timestamp.timestamp(), 1_700_000_000);
        assert_eq!(stored.timestamp.timestamp_subsec_millis(), 500);
    }

    #[test]
    fn test_missing_pinned_defaults_false() {
        let id = ItemId::generate();
        let json = format!(
            r#"{{"id":"{id}","type":"text","textContent":"x","timestamp":"2024-01-02T03:04:05Z"}}"#
        );
        let stored: StoredItem = serde_json::from_str(&json).unwrap();
        assert!(!stored.is_pinned);
    }

    #[test]
    fn test_kind_payload_mismatch_rejected() {
        let stored = StoredItem {
            id: ItemId::generate(),
            kind: "text".into(),
            text_content: None,
            image_data: Some("AAAA".into()),
            timestamp: Utc::now(),
            is_pinned: false,
        };
        assert!(matches!(Item::try_from(stored), Err(ClipError::InvalidInput(_))));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let stored = StoredItem {
            id: ItemId::generate(),
            kind: "fileref".into(),
            text_content: Some("/tmp/a".into()),
            image_data: None,
            timestamp: Utc::now(),
            is_pinned: false,
        };
        assert!(Item::try_from(stored).is_err());
    }
}
