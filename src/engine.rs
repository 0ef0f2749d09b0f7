use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::clipboard::{ChangeToken, ClipboardWriter, SystemClipboard};
use crate::config::AppPaths;
use crate::coordinator::{QueryCoordinator, QueryPhase, RequestId};
use crate::embedding::{Embedder, NoEmbeddings};
use crate::errors::{ClipError, Result};
use crate::history::History;
use crate::images::ImageInfoCache;
use crate::ranking::RankingIndex;
use crate::settings::{JsonSettings, SettingsStore};
use crate::storage::HistoryPersistence;
use crate::storage::json::JsonStorage;
use crate::storage::models::{HistoryStats, Item, ItemContent, ItemId};
use crate::storage::writer::{PersistenceWriter, Snapshot};

pub const MIN_ID_PREFIX: usize = 4;

pub struct Engine {
    history: History,
    query: String,
    coordinator: QueryCoordinator,
    writer: PersistenceWriter,
    settings: Box<dyn SettingsStore>,
    clipboard: Box<dyn ClipboardWriter>,
    images: ImageInfoCache,
}

impl Engine {
    pub fn new(
        persistence: Arc<dyn HistoryPersistence>,
        settings: Box<dyn SettingsStore>,
        clipboard: Box<dyn ClipboardWriter>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        let limit = settings.retention_limit();
        let history = History::with_items(persistence.load(), limit);
        info!(items = history.len(), retention_limit = limit, "history loaded");

        let mut engine = Self {
            history,
            query: String::new(),
            coordinator: QueryCoordinator::spawn(RankingIndex::new(embedder))?,
            writer: PersistenceWriter::spawn(persistence)?,
            settings,
            clipboard,
            images: ImageInfoCache::new(),
        };
        engine.refresh();
        Ok(engine)
    }

    pub fn open(paths: &AppPaths) -> Result<Self> {
        let settings = JsonSettings::open(paths.settings_file.clone());
        let embedder = build_embedder(settings.snapshot().embedding_model.as_deref(), paths);
        Self::new(
            Arc::new(JsonStorage::new(paths.history_file.clone())),
            Box::new(settings),
            Box::new(SystemClipboard),
            embedder,
        )
    }

    pub fn items(&self) -> &[Item] {
        self.history.items()
    }

    pub fn get(&self, id: ItemId) -> Option<&Item> {
        self.history.get(id)
    }

    /// Accept a full id or a unique prefix of at least four hex digits.
    pub fn resolve(&self, raw: &str) -> Result<ItemId> {
        let raw = raw.trim();
        if let Some(id) = ItemId::parse(raw) {
            return self
                .history
                .get(id)
                .map(|item| item.id)
                .ok_or_else(|| ClipError::NotFound(raw.to_string()));
        }
        if raw.len() < MIN_ID_PREFIX {
            return Err(ClipError::InvalidInput(format!(
                "id prefix `{raw}` is too short (need {MIN_ID_PREFIX} characters)"
            )));
        }
        let mut matches = self.history.items().iter().filter(|i| i.id.matches_prefix(raw));
        match (matches.next(), matches.next()) {
            (Some(item), None) => Ok(item.id),
            (None, _) => Err(ClipError::NotFound(raw.to_string())),
            (Some(_), Some(_)) => Err(ClipError::InvalidInput(format!(
                "id prefix `{raw}` is ambiguous"
            ))),
        }
    }

    pub fn retention_limit(&self) -> u32 {
        self.history.retention_limit()
    }

    pub fn stats(&self) -> HistoryStats {
        self.history.stats()
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn capture(&mut self, content: ItemContent) -> ItemId {
        let id = self.history.insert_or_touch(content);
        self.mutated();
        id
    }

    pub fn insert_or_touch(&mut self, item: &Item) -> ItemId {
        self.capture(item.content.clone())
    }

    pub fn toggle_pin(&mut self, id: ItemId) -> bool {
        let changed = self.history.toggle_pin(id);
        if changed {
            self.mutated();
        }
        changed
    }

    pub fn remove(&mut self, id: ItemId) -> bool {
        let removed = self.history.remove(id).is_some();
        if removed {
            self.mutated();
        }
        removed
    }

    pub fn clear_all(&mut self) -> usize {
        let removed = self.history.clear_all();
        self.mutated();
        removed
    }

    /// The returned token marks our own write for the clipboard monitor.
    pub fn copy_out(&mut self, id: ItemId) -> Result<Option<ChangeToken>> {
        let Some(item) = self.history.get(id).cloned() else {
            return Ok(None);
        };
        let token = self.clipboard.write(&item)?;
        self.insert_or_touch(&item);
        Ok(Some(token))
    }

    pub fn set_retention_limit(&mut self, requested: i64) -> u32 {
        let applied = self.history.set_retention_limit(requested);
        if let Err(e) = self.settings.set_retention_limit(applied) {
            warn!(error = %e, "failed to persist retention limit");
        }
        self.mutated();
        applied
    }

    pub fn set_query(&mut self, query: &str) -> RequestId {
        self.query = query.to_string();
        self.coordinator.invalidate();
        self.refresh()
    }

    pub fn displayed_items(&self) -> &[Item] {
        self.coordinator.displayed()
    }

    pub fn phase(&self) -> QueryPhase {
        self.coordinator.phase()
    }

    pub fn poll_results(&mut self) -> bool {
        self.coordinator.poll()
    }

    pub fn wait_for_results(&mut self, timeout: Duration) -> bool {
        self.coordinator.wait(timeout)
    }

    pub fn image_dimensions(&mut self, id: ItemId) -> Option<(u32, u32)> {
        let item = self.history.get(id)?;
        self.images.dimensions(item)
    }

    /// Block until every mutation so far is on disk.
    pub fn flush(&self) {
        self.writer.flush();
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot::from(self.history.items())
    }

    fn mutated(&mut self) {
        let snapshot = self.snapshot();
        self.writer.submit(snapshot);

        let live: HashSet<ItemId> = self.history.items().iter().map(|i| i.id).collect();
        self.images.retain(&live);

        self.coordinator.invalidate();
        self.refresh();
    }

    fn refresh(&mut self) -> RequestId {
        let snapshot = self.snapshot();
        let id = self.coordinator.refresh(snapshot, &self.query);
        debug!(request = id, query = %self.query, "results refresh issued");
        id
    }
}

/// Falls back to lexical-only ranking when no model is configured or it
/// fails to load.
pub fn build_embedder(model: Option<&str>, paths: &AppPaths) -> Arc<dyn Embedder> {
    #[cfg(feature = "semantic")]
    if let Some(name) = model {
        match crate::embedding::FastEmbedder::new(name, paths.models_dir.clone()) {
            Ok(embedder) => {
                info!(model = embedder.name(), "semantic ranking enabled");
                return Arc::new(embedder);
            }
            Err(e) => warn!(model = name, error = %e, "semantic ranking disabled"),
        }
    }
    #[cfg(not(feature = "semantic"))]
    if let Some(name) = model {
        warn!(
            model = name,
            models_dir = %paths.models_dir.display(),
            "built without the semantic feature, ignoring embedding model"
        );
    }
    Arc::new(NoEmbeddings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clipboard::ChangeToken;
    use crate::embedding::NoEmbeddings;
    use crate::errors::ClipError;
    use crate::settings::DEFAULT_RETENTION_LIMIT;
    use std::sync::Mutex;

    const WAIT: Duration = Duration::from_secs(10);

    #[derive(Default)]
    struct MemoryPersistence {
        seed: Vec<Item>,
        saved: Mutex<Option<Vec<Item>>>,
    }

    impl HistoryPersistence for MemoryPersistence {
        fn load(&self) -> Vec<Item> {
            self.seed.clone()
        }

        fn save(&self, items: &[Item]) -> Result<()> {
            *self.saved.lock().unwrap() = Some(items.to_vec());
            Ok(())
        }
    }

    struct MemorySettings {
        limit: Arc<Mutex<u32>>,
    }

    impl SettingsStore for MemorySettings {
        fn retention_limit(&self) -> u32 {
            *self.limit.lock().unwrap()
        }

        fn set_retention_limit(&self, limit: u32) -> Result<()> {
            *self.limit.lock().unwrap() = limit;
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct FakeClipboard {
        written: Arc<Mutex<Vec<Item>>>,
        fail: bool,
    }

    impl ClipboardWriter for FakeClipboard {
        fn write(&self, item: &Item) -> Result<ChangeToken> {
            if self.fail {
                return Err(ClipError::Clipboard("no pasteboard".into()));
            }
            self.written.lock().unwrap().push(item.clone());
            Ok(ChangeToken::for_text(item.text_content().unwrap_or("")))
        }
    }

    struct Harness {
        engine: Engine,
        persistence: Arc<MemoryPersistence>,
        limit: Arc<Mutex<u32>>,
        clipboard: FakeClipboard,
    }

    fn harness_with(seed: Vec<Item>, limit: u32, clipboard: FakeClipboard) -> Harness {
        let persistence = Arc::new(MemoryPersistence {
            seed,
            ..Default::default()
        });
        let limit = Arc::new(Mutex::new(limit));
        let engine = Engine::new(
            persistence.clone(),
            Box::new(MemorySettings {
                limit: limit.clone(),
            }),
            Box::new(clipboard.clone()),
            Arc::new(NoEmbeddings),
        )
        .unwrap();
        Harness {
            engine,
            persistence,
            limit,
            clipboard,
        }
    }

    fn harness() -> Harness {
        harness_with(Vec::new(), DEFAULT_RETENTION_LIMIT, FakeClipboard::default())
    }

    fn text(s: &str) -> ItemContent {
        ItemContent::Text(s.to_string())
    }

    fn saved(h: &Harness) -> Vec<Item> {
        h.engine.flush();
        h.persistence.saved.lock().unwrap().clone().unwrap_or_default()
    }

    #[test]
    fn test_seeded_history_is_displayed() {
        let seed = vec![Item::text("one"), Item::text("two")];
        let h = harness_with(seed.clone(), 20, FakeClipboard::default());
        assert_eq!(h.engine.items(), &seed[..]);
        assert_eq!(h.engine.displayed_items(), &seed[..]);
    }

    #[test]
    fn test_stored_limit_applied_on_load() {
        let seed: Vec<Item> = (0..10).map(|i| Item::text(format!("{i}"))).collect();
        let h = harness_with(seed, 4, FakeClipboard::default());
        assert_eq!(h.engine.items().len(), 4);
    }

    #[test]
    fn test_capture_persists_and_refreshes_view() {
        let mut h = harness();
        let id = h.engine.capture(text("hello"));
        assert_eq!(h.engine.displayed_items()[0].id, id);
        assert_eq!(saved(&h).len(), 1);
    }

    #[test]
    fn test_toggle_pin_missing_is_noop() {
        let mut h = harness();
        h.engine.capture(text("a"));
        assert!(!h.engine.toggle_pin(ItemId::generate()));
        assert!(!h.engine.remove(ItemId::generate()));
        assert_eq!(h.engine.items().len(), 1);
    }

    #[test]
    fn test_copy_out_writes_and_touches() {
        let mut h = harness();
        let old = h.engine.capture(text("old"));
        h.engine.capture(text("new"));

        let token = h.engine.copy_out(old).unwrap();

        assert_eq!(token, Some(ChangeToken::for_text("old")));
        assert_eq!(h.clipboard.written.lock().unwrap().len(), 1);
        assert_eq!(h.engine.items().len(), 2);
        assert_eq!(h.engine.items()[0].id, old);
    }

    #[test]
    fn test_copy_out_unknown_id() {
        let mut h = harness();
        assert_eq!(h.engine.copy_out(ItemId::generate()).unwrap(), None);
        assert!(h.clipboard.written.lock().unwrap().is_empty());
    }

    #[test]
    fn test_copy_out_failure_leaves_history_untouched() {
        let clipboard = FakeClipboard {
            fail: true,
            ..Default::default()
        };
        let mut h = harness_with(Vec::new(), 20, clipboard);
        let old = h.engine.capture(text("old"));
        h.engine.capture(text("new"));
        assert!(h.engine.copy_out(old).is_err());
        assert_eq!(h.engine.items()[1].id, old);
    }

    #[test]
    fn test_set_retention_limit_clamps_persists_and_evicts() {
        let mut h = harness();
        for i in 0..30 {
            h.engine.capture(text(&format!("item {i}")));
        }
        assert_eq!(h.engine.items().len(), 20);

        assert_eq!(h.engine.set_retention_limit(5), 5);
        assert_eq!(*h.limit.lock().unwrap(), 5);
        assert_eq!(h.engine.items().len(), 5);
        assert_eq!(h.engine.items()[0].text_content(), Some("item 29"));

        assert_eq!(h.engine.set_retention_limit(0), 1);
        assert_eq!(*h.limit.lock().unwrap(), 1);
        assert_eq!(saved(&h).len(), 1);
    }

    #[test]
    fn test_query_results_follow_mutations() {
        let mut h = harness();
        h.engine.capture(text("the quick brown fox"));
        h.engine.capture(text("completely unrelated content"));
        h.engine.set_query("quick fox");
        assert!(h.engine.wait_for_results(WAIT));
        assert_eq!(h.engine.displayed_items().len(), 1);

        h.engine.capture(text("a quick fox again"));
        assert!(h.engine.wait_for_results(WAIT));
        assert_eq!(
            h.engine.displayed_items()[0].text_content(),
            Some("a quick fox again")
        );
    }

    #[test]
    fn test_clearing_query_shows_history_immediately() {
        let mut h = harness();
        h.engine.capture(text("abc"));
        h.engine.capture(text("xyz"));
        h.engine.set_query("abc");
        h.engine.set_query("");
        assert_eq!(h.engine.phase(), QueryPhase::Idle);
        assert_eq!(h.engine.displayed_items().len(), 2);

        // A late "abc" result must not replace the history view.
        std::thread::sleep(Duration::from_millis(100));
        h.engine.poll_results();
        assert_eq!(h.engine.displayed_items().len(), 2);
    }

    #[test]
    fn test_images_hidden_while_searching() {
        let mut h = harness();
        h.engine.capture(ItemContent::Image(vec![1, 2, 3]));
        h.engine.capture(text("image of a cat"));
        h.engine.set_query("image");
        assert!(h.engine.wait_for_results(WAIT));
        assert_eq!(h.engine.displayed_items().len(), 1);
        assert!(h.engine.displayed_items()[0].text_content().is_some());
    }

    #[test]
    fn test_resolve_full_id_and_prefix() {
        let mut h = harness();
        let id = h.engine.capture(text("a"));
        assert_eq!(h.engine.resolve(&id.to_string()).unwrap(), id);
        assert_eq!(h.engine.resolve(&id.short()).unwrap(), id);
        assert_eq!(h.engine.resolve(&id.short()[..4]).unwrap(), id);
    }

    #[test]
    fn test_resolve_errors() {
        let mut h = harness();
        let id = h.engine.capture(text("a"));
        assert!(matches!(
            h.engine.resolve(&id.short()[..3]),
            Err(ClipError::InvalidInput(_))
        ));
        assert!(matches!(
            h.engine.resolve(&ItemId::generate().to_string()),
            Err(ClipError::NotFound(_))
        ));
        assert!(matches!(h.engine.resolve("zzzz"), Err(ClipError::NotFound(_))));
    }

    #[test]
    fn test_build_embedder_without_model_is_lexical() {
        let dir = tempfile::TempDir::new().unwrap();
        let paths = AppPaths::from_base(dir.path().to_path_buf());
        assert!(build_embedder(None, &paths).embed("anything").is_none());
    }

    #[test]
    fn test_open_reads_settings_and_history_from_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let paths = AppPaths::from_base(dir.path().to_path_buf());
        std::fs::write(&paths.settings_file, r#"{"retention_limit": 3}"#).unwrap();
        {
            let mut engine = Engine::open(&paths).unwrap();
            for i in 0..5 {
                engine.capture(text(&format!("{i}")));
            }
            engine.flush();
        }
        let engine = Engine::open(&paths).unwrap();
        assert_eq!(engine.retention_limit(), 3);
        assert_eq!(engine.items().len(), 3);
        assert_eq!(engine.items()[0].text_content(), Some("4"));
    }

    #[test]
    fn test_clear_all_empties_and_persists() {
        let mut h = harness();
        let id = h.engine.capture(text("pinned"));
        h.engine.toggle_pin(id);
        assert_eq!(h.engine.clear_all(), 1);
        assert!(h.engine.items().is_empty());
        assert!(saved(&h).is_empty());
    }
}
