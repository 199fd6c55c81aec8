//! Listeners that keep the extracted items.

use std::{
    collections::BTreeMap,
    fs,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};

use crate::{
    events::{Envelope, Event, Listener},
    page::Record,
};

/// Appends items to `<dir>/<sender>.jsonl`, one record per line.
#[derive(Debug, Clone)]
pub struct JsonLinesSink {
    dir: PathBuf,
}

impl JsonLinesSink {
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, sender: &str) -> PathBuf {
        let file_name: String = sender
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{file_name}.jsonl"))
    }

    fn append(&self, path: &Path, items: &[Record]) -> io::Result<()> {
        let file = fs::OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = BufWriter::new(file);
        for item in items {
            serde_json::to_writer(&mut writer, item)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()
    }
}

impl Listener for JsonLinesSink {
    fn on_event(&mut self, envelope: &Envelope) {
        let Event::ItemsExtracted { url, items } = &envelope.event else {
            return;
        };
        let path = self.path_for(&envelope.sender);
        match self.append(&path, items) {
            Ok(()) => tracing::debug!(
                url = url,
                items = items.len(),
                "storage: appended to '{}'",
                path.display()
            ),
            Err(err) => tracing::error!(
                url = url,
                "failed write to '{}', error '{:?}'",
                path.display(),
                err
            ),
        }
    }
}

/// Keeps items in memory by sender. Clones share the same store.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    items: Arc<Mutex<BTreeMap<String, Vec<Record>>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything collected so far.
    pub fn items(&self) -> BTreeMap<String, Vec<Record>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn items_of(&self, sender: &str) -> Vec<Record> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(sender)
            .cloned()
            .unwrap_or_default()
    }
}

impl Listener for MemorySink {
    fn on_event(&mut self, envelope: &Envelope) {
        if let Event::ItemsExtracted { items, .. } = &envelope.event {
            self.items
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(envelope.sender.to_string())
                .or_default()
                .extend(items.iter().cloned());
        }
    }
}
