//! Intent Dataset
//!
//! The tag -> patterns/responses corpus the classifier is trained from.
//! Persisted as a single JSON document that is read fully and replaced
//! atomically (temp file + rename). Writes go through a single-writer lock
//! and carry a version number so an out-of-process writer is detected
//! instead of silently overwritten.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::error::{DatasetError, DatasetResult};

/// One intent: a tag with example utterances and candidate replies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub tag: String,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub responses: Vec<String>,
    #[serde(default)]
    pub context_set: String,
}

impl Intent {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            patterns: Vec::new(),
            responses: Vec::new(),
            context_set: String::new(),
        }
    }
}

/// The persisted document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntentsDocument {
    /// Bumped on every replace; absent in documents written by other tools
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub intents: Vec<Intent>,
}

/// What a single correction did to the document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Pattern appended to an existing intent
    Extended { response_added: bool },
    /// A new intent was created for the tag
    Created,
}

impl IntentsDocument {
    pub fn find(&self, tag: &str) -> Option<&Intent> {
        self.intents.iter().find(|i| i.tag == tag)
    }

    pub fn tags(&self) -> Vec<String> {
        self.intents.iter().map(|i| i.tag.clone()).collect()
    }

    /// Fold a corrected message into the intent named `tag`
    ///
    /// Patterns are appended as-is; a new response is only appended when it
    /// is not already present. Unknown tags get a fresh intent.
    pub fn merge_correction(
        &mut self,
        tag: &str,
        message: &str,
        new_response: Option<&str>,
    ) -> MergeOutcome {
        let new_response = new_response.map(str::trim).filter(|r| !r.is_empty());

        if let Some(intent) = self.intents.iter_mut().find(|i| i.tag == tag) {
            intent.patterns.push(message.to_string());
            let mut response_added = false;
            if let Some(response) = new_response {
                if !intent.responses.iter().any(|r| r == response) {
                    intent.responses.push(response.to_string());
                    response_added = true;
                }
            }
            return MergeOutcome::Extended { response_added };
        }

        let mut intent = Intent::new(tag);
        intent.patterns.push(message.to_string());
        if let Some(response) = new_response {
            intent.responses.push(response.to_string());
        }
        self.intents.push(intent);
        MergeOutcome::Created
    }
}

/// Modification time and size of the document when it was last read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: SystemTime,
    len: u64,
}

fn file_stamp(path: &Path) -> Option<FileStamp> {
    let meta = std::fs::metadata(path).ok()?;
    Some(FileStamp {
        modified: meta.modified().ok()?,
        len: meta.len(),
    })
}

struct Loaded {
    document: Arc<IntentsDocument>,
    stamp: Option<FileStamp>,
}

/// Shared handle to the on-disk dataset with an in-memory snapshot for readers
///
/// The snapshot follows the file: a rewrite by another process (the CLI, a
/// retraining job) is picked up on the next `snapshot()` call.
pub struct IntentDataset {
    path: PathBuf,
    loaded: RwLock<Loaded>,
    writer: Mutex<()>,
}

/// Exclusive write access held for the duration of a read-modify-replace cycle
pub struct DatasetWriter<'a> {
    dataset: &'a IntentDataset,
    _guard: MutexGuard<'a, ()>,
}

impl IntentDataset {
    /// Open the dataset, creating an empty document when the file is missing
    pub fn open<P: AsRef<Path>>(path: P) -> DatasetResult<Self> {
        let path = path.as_ref().to_path_buf();

        let document = if path.exists() {
            read_document(&path)?
        } else {
            warn!(path = %path.display(), "Intents document missing, starting empty");
            let document = IntentsDocument::default();
            write_document(&path, &document)?;
            document
        };

        info!(
            path = %path.display(),
            intents = document.intents.len(),
            version = document.version,
            "Loaded intent dataset"
        );

        let stamp = file_stamp(&path);
        Ok(Self {
            path,
            loaded: RwLock::new(Loaded {
                document: Arc::new(document),
                stamp,
            }),
            writer: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current view used for inference-time lookups, re-read if the file changed
    pub fn snapshot(&self) -> Arc<IntentsDocument> {
        let current = file_stamp(&self.path);
        let (document, stale) = {
            let guard = match self.loaded.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            (
                guard.document.clone(),
                current.is_some() && current != guard.stamp,
            )
        };
        if !stale {
            return document;
        }

        match read_document(&self.path) {
            Ok(fresh) => {
                let fresh = Arc::new(fresh);
                debug!(version = fresh.version, "Intents document changed on disk, reloaded");
                self.set_snapshot(fresh.clone(), current);
                fresh
            }
            Err(e) => {
                // Keep serving the last good document; retry on the next change
                warn!(error = %e, "Failed to reload intents document");
                self.set_snapshot(document.clone(), current);
                document
            }
        }
    }

    /// Re-read the document from disk unconditionally
    pub fn reload(&self) -> DatasetResult<Arc<IntentsDocument>> {
        let stamp = file_stamp(&self.path);
        let document = Arc::new(read_document(&self.path)?);
        self.set_snapshot(document.clone(), stamp);
        Ok(document)
    }

    /// Acquire the single-writer lock
    pub async fn writer(&self) -> DatasetWriter<'_> {
        DatasetWriter {
            dataset: self,
            _guard: self.writer.lock().await,
        }
    }

    fn set_snapshot(&self, document: Arc<IntentsDocument>, stamp: Option<FileStamp>) {
        let loaded = Loaded { document, stamp };
        match self.loaded.write() {
            Ok(mut guard) => *guard = loaded,
            Err(poisoned) => *poisoned.into_inner() = loaded,
        }
    }
}

impl DatasetWriter<'_> {
    /// Read the full document from disk
    pub fn load(&self) -> DatasetResult<IntentsDocument> {
        read_document(&self.dataset.path)
    }

    /// Replace the whole document, bumping its version
    ///
    /// Fails with `VersionConflict` if the file on disk no longer carries the
    /// version `document` was read at.
    pub fn replace(&self, mut document: IntentsDocument) -> DatasetResult<Arc<IntentsDocument>> {
        let on_disk = read_document(&self.dataset.path)?;
        if on_disk.version != document.version {
            return Err(DatasetError::VersionConflict {
                expected: document.version,
                found: on_disk.version,
            });
        }

        document.version += 1;
        write_document(&self.dataset.path, &document)?;
        debug!(version = document.version, "Replaced intents document");

        let document = Arc::new(document);
        self.dataset
            .set_snapshot(document.clone(), file_stamp(&self.dataset.path));
        Ok(document)
    }
}

fn read_document(path: &Path) -> DatasetResult<IntentsDocument> {
    let contents = std::fs::read_to_string(path).map_err(|source| DatasetError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| DatasetError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn write_document(path: &Path, document: &IntentsDocument) -> DatasetResult<()> {
    let write_err = |source| DatasetError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
    }

    let json = serde_json::to_string_pretty(document)?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "intents.json".to_string());
    let tmp = path.with_file_name(format!(".{}.{}.tmp", file_name, std::process::id()));

    std::fs::write(&tmp, json).map_err(write_err)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(write_err(e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> IntentsDocument {
        IntentsDocument {
            version: 0,
            intents: vec![Intent {
                tag: "pen_color".to_string(),
                patterns: vec!["red pen".to_string()],
                responses: vec!["We have many colors.".to_string()],
                context_set: String::new(),
            }],
        }
    }

    #[test]
    fn test_merge_into_existing_tag_appends_one_pattern() {
        let mut doc = sample();
        let outcome = doc.merge_correction("pen_color", "blue pen please", None);
        assert_eq!(outcome, MergeOutcome::Extended { response_added: false });

        let intent = doc.find("pen_color").unwrap();
        assert_eq!(intent.patterns, vec!["red pen", "blue pen please"]);
        assert_eq!(doc.intents.len(), 1);
    }

    #[test]
    fn test_merge_new_tag_creates_single_intent() {
        let mut doc = sample();
        let outcome = doc.merge_correction("warranty_question", "is this covered?", None);
        assert_eq!(outcome, MergeOutcome::Created);

        let created = doc.find("warranty_question").unwrap();
        assert_eq!(created.patterns, vec!["is this covered?"]);
        assert!(created.responses.is_empty());
        assert_eq!(created.context_set, "");
        assert_eq!(doc.intents.iter().filter(|i| i.tag == "warranty_question").count(), 1);
    }

    #[test]
    fn test_patterns_duplicate_but_responses_do_not() {
        let mut doc = sample();
        doc.merge_correction("pen_color", "red pen", Some("We have many colors."));
        doc.merge_correction("pen_color", "red pen", Some("Blue and red."));

        let intent = doc.find("pen_color").unwrap();
        assert_eq!(intent.patterns, vec!["red pen", "red pen", "red pen"]);
        assert_eq!(intent.responses, vec!["We have many colors.", "Blue and red."]);
    }

    #[test]
    fn test_legacy_document_without_version_parses() {
        let json = r#"{"intents":[{"tag":"greeting","patterns":["hi"],"responses":["Hello!"],"context_set":""}]}"#;
        let doc: IntentsDocument = serde_json::from_str(json).unwrap();
        assert_eq!(doc.version, 0);
        assert_eq!(doc.tags(), vec!["greeting"]);
    }

    #[tokio::test]
    async fn test_replace_bumps_version_and_refreshes_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("intents.json");
        std::fs::write(&path, serde_json::to_string(&sample()).unwrap()).unwrap();

        let dataset = IntentDataset::open(&path).unwrap();
        let writer = dataset.writer().await;
        let mut doc = writer.load().unwrap();
        doc.merge_correction("greeting", "hey", Some("Hello!"));
        writer.replace(doc).unwrap();
        drop(writer);

        let snapshot = dataset.snapshot();
        assert_eq!(snapshot.version, 1);
        assert!(snapshot.find("greeting").is_some());

        let reread = dataset.reload().unwrap();
        assert_eq!(reread.version, 1);
    }

    #[tokio::test]
    async fn test_replace_detects_external_writer() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("intents.json");
        let dataset = IntentDataset::open(&path).unwrap();

        let writer = dataset.writer().await;
        let doc = writer.load().unwrap();

        let mut external = doc.clone();
        external.version = 5;
        std::fs::write(&path, serde_json::to_string(&external).unwrap()).unwrap();

        let err = writer.replace(doc).unwrap_err();
        assert!(matches!(err, DatasetError::VersionConflict { expected: 0, found: 5 }));
    }

    #[tokio::test]
    async fn test_snapshot_follows_writes_from_another_handle() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("intents.json");
        std::fs::write(&path, serde_json::to_string(&sample()).unwrap()).unwrap();

        let serving = IntentDataset::open(&path).unwrap();
        assert!(serving.snapshot().find("warranty_question").is_none());

        let other = IntentDataset::open(&path).unwrap();
        let writer = other.writer().await;
        let mut doc = writer.load().unwrap();
        doc.merge_correction("warranty_question", "is this covered?", None);
        writer.replace(doc).unwrap();
        drop(writer);

        let snapshot = serving.snapshot();
        assert!(snapshot.find("warranty_question").is_some());
        assert_eq!(snapshot.version, 1);
    }

    #[test]
    fn test_snapshot_keeps_last_good_document_on_corrupt_rewrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("intents.json");
        std::fs::write(&path, serde_json::to_string(&sample()).unwrap()).unwrap();

        let dataset = IntentDataset::open(&path).unwrap();
        std::fs::write(&path, "{ truncated").unwrap();

        assert!(dataset.snapshot().find("pen_color").is_some());
    }

    #[test]
    fn test_malformed_document_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("intents.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            IntentDataset::open(&path),
            Err(DatasetError::Parse { .. })
        ));
    }
}
