use crate::models::{DocumentDraft, DocumentRecord, Section};
use anyhow::{Context, Result};
use chrono::Utc;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

pub const DEFAULT_DOCUMENTS_FILE: &str = "documents.json";

/// Where the serialized record collection lives between runs.
pub trait RecordStorage {
    fn read(&self) -> Result<Option<String>>;

    fn write(&self, data: &str) -> Result<()>;
}

pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RecordStorage for FileStorage {
    fn read(&self) -> Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        Ok(Some(data))
    }

    fn write(&self, data: &str) -> Result<()> {
        fs::write(&self.path, data)
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }
}

#[derive(Default)]
pub struct MemoryStorage {
    data: Mutex<Option<String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Option<String> {
        self.data.lock().map(|data| data.clone()).unwrap_or_default()
    }
}

impl RecordStorage for MemoryStorage {
    fn read(&self) -> Result<Option<String>> {
        let data = self
            .data
            .lock()
            .map_err(|_| anyhow::anyhow!("Document storage lock poisoned"))?;
        Ok(data.clone())
    }

    fn write(&self, data: &str) -> Result<()> {
        let mut stored = self
            .data
            .lock()
            .map_err(|_| anyhow::anyhow!("Document storage lock poisoned"))?;
        *stored = Some(data.to_string());
        Ok(())
    }
}

impl<T: RecordStorage + ?Sized> RecordStorage for &T {
    fn read(&self) -> Result<Option<String>> {
        (**self).read()
    }

    fn write(&self, data: &str) -> Result<()> {
        (**self).write(data)
    }
}

fn write_documents(storage: &impl RecordStorage, documents: &[DocumentRecord]) -> Result<()> {
    let json =
        serde_json::to_string_pretty(documents).context("Failed to serialize documents")?;
    storage.write(&json)
}

/// The ordered document collection. Every mutation rewrites the whole
/// collection to storage before returning.
pub struct DocumentStore<S> {
    storage: S,
    documents: Vec<DocumentRecord>,
}

impl<S: RecordStorage> DocumentStore<S> {
    pub fn open(storage: S) -> Result<Self> {
        let mut store = Self {
            storage,
            documents: Vec::new(),
        };
        store.load()?;
        Ok(store)
    }

    pub fn load(&mut self) -> Result<()> {
        self.documents = match self.storage.read()? {
            Some(data) if !data.trim().is_empty() => {
                serde_json::from_str(&data).context("Failed to parse stored documents")?
            }
            _ => Vec::new(),
        };
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        write_documents(&self.storage, &self.documents)
    }

    /// Writes `documents` and only then makes them the in-memory collection,
    /// so a failed write leaves both sides as they were.
    fn commit(&mut self, documents: Vec<DocumentRecord>) -> Result<()> {
        write_documents(&self.storage, &documents)?;
        self.documents = documents;
        Ok(())
    }

    pub fn all(&self) -> &[DocumentRecord] {
        &self.documents
    }

    pub fn get(&self, id: &str) -> Option<&DocumentRecord> {
        self.documents.iter().find(|doc| doc.id == id)
    }

    pub fn in_section(&self, section: Section) -> Vec<&DocumentRecord> {
        self.documents.iter().filter(|doc| doc.section == section).collect()
    }

    pub fn add(&mut self, draft: DocumentDraft) -> Result<DocumentRecord> {
        let record = DocumentRecord::from_draft(self.mint_id(), draft);
        let mut documents = self.documents.clone();
        documents.push(record.clone());
        self.commit(documents)?;
        Ok(record)
    }

    /// Returns `None` without touching storage when no record has `id`.
    pub fn update(&mut self, id: &str, draft: DocumentDraft) -> Result<Option<DocumentRecord>> {
        let mut documents = self.documents.clone();
        let Some(record) = documents.iter_mut().find(|doc| doc.id == id) else {
            return Ok(None);
        };
        record.apply(draft);
        let updated = record.clone();
        self.commit(documents)?;
        Ok(Some(updated))
    }

    pub fn remove(&mut self, id: &str) -> Result<bool> {
        let documents: Vec<_> = self
            .documents
            .iter()
            .filter(|doc| doc.id != id)
            .cloned()
            .collect();
        let removed = documents.len() != self.documents.len();
        self.commit(documents)?;
        Ok(removed)
    }

    pub fn replace_all(&mut self, documents: Vec<DocumentRecord>) -> Result<()> {
        self.commit(documents)
    }

    pub fn clear(&mut self) -> Result<()> {
        self.replace_all(Vec::new())
    }

    /// Millisecond timestamp, bumped past any id already in use.
    fn mint_id(&self) -> String {
        let mut candidate = Utc::now().timestamp_millis();
        while self.documents.iter().any(|doc| doc.id == candidate.to_string()) {
            candidate += 1;
        }
        candidate.to_string()
    }
}
