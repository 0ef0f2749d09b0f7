pub mod json;
pub mod models;
pub mod schema;
pub mod writer;

use crate::errors::Result;
use models::Item;

/// `load` never fails: an unreadable or corrupt document means "no saved
/// history" and is reported through logging only.
pub trait HistoryPersistence: Send + Sync {
    fn load(&self) -> Vec<Item>;
    fn save(&self, items: &[Item]) -> Result<()>;
}
