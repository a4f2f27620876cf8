use bson::{Bson, Document as BsonDocument};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::errors::{GatewayError, Result};
use crate::query::{self, Filter, FindOptions, UpdateDoc, UpdateReport};
use crate::utils::json::parse_json_to_bson_document;

use super::DocumentStore;
use super::collection::Collection;

/// Extension of seed files read by [`MemoryStore::load_dir`].
pub const SEED_EXTENSION: &str = "ndjson";

/// Embedded store keeping every collection in memory.
#[derive(Debug)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Arc<Collection>>>,
    open: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self { collections: RwLock::new(HashMap::new()), open: AtomicBool::new(true) }
    }

    /// Open a store seeded from every `<collection>.ndjson` file in `dir`.
    ///
    /// # Errors
    /// Returns `Io` when the directory cannot be read and `MalformedSpecification` for a bad line.
    pub fn open_dir(dir: &Path) -> Result<Self> {
        let store = Self::new();
        let n = store.load_dir(dir)?;
        log::info!("seeded {n} documents from {}", dir.display());
        Ok(store)
    }

    /// Mark the store unreachable; every later call fails with `StoreUnavailable`.
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(GatewayError::StoreUnavailable("store is closed".into()))
        }
    }

    #[must_use]
    pub fn collection(&self, name: &str) -> Option<Arc<Collection>> {
        self.collections.read().get(name).cloned()
    }

    /// Get a collection, creating it empty if missing.
    pub fn collection_or_create(&self, name: &str) -> Arc<Collection> {
        if let Some(c) = self.collection(name) {
            return c;
        }
        self.collections
            .write()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Collection::new(name)))
            .clone()
    }

    #[must_use]
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Insert every non-blank line of `reader` as a document of `collection`.
    ///
    /// # Errors
    /// Returns `MalformedSpecification` naming the first bad line, or `QueryRejected` on a
    /// duplicate `_id`.
    pub fn load_ndjson(&self, collection: &str, reader: impl BufRead) -> Result<usize> {
        let col = self.collection_or_create(collection);
        let mut n = 0usize;
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let doc = parse_json_to_bson_document(&line).map_err(|e| {
                GatewayError::MalformedSpecification(format!("{collection}:{}: {e}", lineno + 1))
            })?;
            col.insert(doc)?;
            n += 1;
        }
        log::debug!("loaded {n} documents into '{collection}'");
        Ok(n)
    }

    /// Seed from `dir/*.ndjson`; each file stem names the collection.
    ///
    /// # Errors
    /// See [`MemoryStore::load_ndjson`]; also `Io` for unreadable files.
    pub fn load_dir(&self, dir: &Path) -> Result<usize> {
        let mut paths: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(std::result::Result::ok)
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == SEED_EXTENSION))
            .collect();
        paths.sort();
        let mut total = 0usize;
        for path in paths {
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let file = std::fs::File::open(&path)?;
            total += self.load_ndjson(stem, std::io::BufReader::new(file))?;
        }
        Ok(total)
    }

    /// Insert documents directly, mainly for fixtures.
    ///
    /// # Errors
    /// Returns `QueryRejected` on a duplicate `_id`.
    pub fn seed(&self, collection: &str, docs: impl IntoIterator<Item = BsonDocument>) -> Result<usize> {
        let col = self.collection_or_create(collection);
        let mut n = 0usize;
        for d in docs {
            col.insert(d)?;
            n += 1;
        }
        Ok(n)
    }
}

impl DocumentStore for MemoryStore {
    fn find(&self, collection: &str, filter: &Filter, opts: &FindOptions) -> Result<Vec<BsonDocument>> {
        self.ensure_open()?;
        match self.collection(collection) {
            Some(col) => query::find_docs(&col, filter, opts),
            None => {
                query::Matcher::compile(filter)?;
                Ok(Vec::new())
            }
        }
    }

    fn aggregate(&self, collection: &str, pipeline: &[BsonDocument]) -> Result<Vec<BsonDocument>> {
        self.ensure_open()?;
        let stages = query::parse_pipeline(pipeline)?;
        let docs = self.collection(collection).map(|c| c.snapshot()).unwrap_or_default();
        query::run_stages(collection, docs, &stages)
    }

    fn distinct(&self, collection: &str, path: &str, filter: &Filter) -> Result<Vec<Bson>> {
        self.ensure_open()?;
        match self.collection(collection) {
            Some(col) => query::distinct_values(&col, path, filter),
            None => Ok(Vec::new()),
        }
    }

    fn count(&self, collection: &str, filter: &Filter) -> Result<u64> {
        self.ensure_open()?;
        match self.collection(collection) {
            Some(col) => query::count_docs(&col, filter),
            None => Ok(0),
        }
    }

    fn update_one(&self, collection: &str, filter: &Filter, update: &UpdateDoc) -> Result<UpdateReport> {
        self.ensure_open()?;
        match self.collection(collection) {
            Some(col) => query::update_one(&col, filter, update),
            None => Ok(UpdateReport::default()),
        }
    }

    fn insert_one(&self, collection: &str, doc: BsonDocument) -> Result<Bson> {
        self.ensure_open()?;
        self.collection_or_create(collection).insert(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use std::io::Write;

    #[test]
    fn load_ndjson_skips_blank_lines_and_reports_bad_ones() {
        let store = MemoryStore::new();
        let data = "{\"_id\":\"u1\",\"name\":\"A\"}\n\n{\"_id\":\"u2\",\"name\":\"B\"}\n";
        assert_eq!(store.load_ndjson("universities", data.as_bytes()).unwrap(), 2);
        let e = store.load_ndjson("universities", "{oops}\n".as_bytes()).unwrap_err();
        assert!(matches!(e, GatewayError::MalformedSpecification(ref m) if m.contains("universities:1")));
    }

    #[test]
    fn load_dir_uses_file_stems() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = std::fs::File::create(dir.path().join("cities.ndjson")).unwrap();
        writeln!(f, "{{\"_id\":\"c1\",\"name\":\"Vienna\"}}").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        let store = MemoryStore::open_dir(dir.path()).unwrap();
        assert_eq!(store.collection_names(), vec!["cities".to_string()]);
        assert_eq!(store.count("cities", &Filter::True).unwrap(), 1);
    }

    #[test]
    fn missing_collection_reads_empty() {
        let store = MemoryStore::new();
        assert!(store.find("nope", &Filter::True, &FindOptions::default()).unwrap().is_empty());
        assert_eq!(store.count("nope", &Filter::True).unwrap(), 0);
        assert!(store.aggregate("nope", &[doc! { "$count": "n" }]).unwrap().is_empty());
    }

    #[test]
    fn closed_store_is_unavailable() {
        let store = MemoryStore::new();
        store.seed("universities", [doc! { "_id": "u1" }]).unwrap();
        store.close();
        let e = store.count("universities", &Filter::True).unwrap_err();
        assert!(matches!(e, GatewayError::StoreUnavailable(_)));
        assert!(store.insert_one("feedback", doc! {}).is_err());
    }
}
