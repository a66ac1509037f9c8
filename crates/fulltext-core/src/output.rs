//! Atomic per-identifier artifact commits.
//!
//! Each identifier owns a leaf directory
//! `<root>/<h0h1>/<h2h3>/<percent-encoded identifier>/` where `h` is the blake3
//! hex of the identifier. Leaves all sit at the same depth, so no identifier's
//! directory can contain another's.
//!
//! A commit writes every artifact into a staging directory beside the leaf,
//! then swaps it into place. Readers see either the previous complete set or
//! the new one. Staging and retired directories carry the leaf name, so a
//! crash mid-swap can be undone by [`OutputWriter::recover`].

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::{self, StatusStore, StoreError};
use crate::{
    DeclaredFormat, DocumentDescriptor, ExtractionResult, ExtractionStatus, UpdateReason,
};

pub const META_FILE: &str = "meta.json";
pub const FULLTEXT_FILE: &str = "fulltext.txt";
pub const REMOTE_PAYLOAD_FILE: &str = "grobid_fulltext.xml";

const SWAP_ATTEMPTS: usize = 3;
const STAGING_PREFIX: &str = ".staging-";
const RETIRED_PREFIX: &str = ".retired-";
const STAGING_RAND_LEN: usize = 6;
const RETIRED_HEX_LEN: usize = 16;

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("identifier {0:?} cannot be used as a directory name")]
    InvalidIdentifier(String),
    #[error("IO error at {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("cannot serialize metadata: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("status update failed: {0}")]
    Store(#[from] StoreError),
    #[error("write timed out after {0}s")]
    Timeout(u64),
    #[error("commit abandoned before swap")]
    Abandoned,
    #[error("write task failed: {0}")]
    Task(String),
}

/// Contents of `meta.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaRecord {
    pub identifier: String,
    pub source_path: PathBuf,
    pub provider: String,
    pub declared_format: DeclaredFormat,
    pub update_reason: UpdateReason,
    pub extracted_at: DateTime<Utc>,
    pub source_version: String,
    pub backend_used: String,
    #[serde(default)]
    pub structured_metadata: BTreeMap<String, String>,
    pub has_remote_payload: bool,
}

/// State of a leaf after [`OutputWriter::recover`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafState {
    /// A complete artifact set is in place.
    Committed,
    /// The leaf was missing and a retired copy was moved back.
    Restored,
    /// No committed artifacts exist for this identifier.
    Missing,
}

impl LeafState {
    pub fn has_artifacts(&self) -> bool {
        !matches!(self, Self::Missing)
    }
}

#[derive(Debug, Clone)]
pub struct WriteOutcome {
    pub location: PathBuf,
    pub status: ExtractionStatus,
    pub remote_payload_written: bool,
}

/// Leaf directory for `identifier` under `root`.
pub fn location_for(root: &Path, identifier: &str) -> Result<PathBuf, WriteError> {
    if identifier.is_empty() || identifier == "." || identifier == ".." {
        return Err(WriteError::InvalidIdentifier(identifier.to_string()));
    }
    let hash = blake3::hash(identifier.as_bytes()).to_hex();
    let encoded = urlencoding::encode(identifier);
    Ok(root
        .join(&hash[0..2])
        .join(&hash[2..4])
        .join(encoded.as_ref()))
}

pub struct OutputWriter {
    root: PathBuf,
    store: Arc<dyn StatusStore>,
    write_timeout: Duration,
    store_timeout: Duration,
}

impl OutputWriter {
    pub fn new(
        root: impl Into<PathBuf>,
        store: Arc<dyn StatusStore>,
        write_timeout: Duration,
        store_timeout: Duration,
    ) -> Self {
        Self {
            root: root.into(),
            store,
            write_timeout,
            store_timeout,
        }
    }

    pub fn location(&self, identifier: &str) -> Result<PathBuf, WriteError> {
        location_for(&self.root, identifier)
    }

    /// Commit the artifacts for one document, then record its status.
    ///
    /// If the commit fails, previously committed artifacts are left as they
    /// were. If only the status update fails, the artifacts are in place and a
    /// repeat call rewrites them identically before retrying the update.
    pub async fn write(
        &self,
        descriptor: &DocumentDescriptor,
        result: &ExtractionResult,
        update_reason: UpdateReason,
        source_version: &str,
    ) -> Result<WriteOutcome, WriteError> {
        let location = self.location(&descriptor.identifier)?;
        let extracted_at = Utc::now();

        let meta = MetaRecord {
            identifier: descriptor.identifier.clone(),
            source_path: descriptor.source_path.clone(),
            provider: descriptor.provider.clone(),
            declared_format: descriptor.declared_format.clone(),
            update_reason,
            extracted_at,
            source_version: source_version.to_string(),
            backend_used: result.backend_used.clone(),
            structured_metadata: result.structured_metadata.clone(),
            has_remote_payload: result.raw_service_payload.is_some(),
        };
        let artifacts = Artifacts {
            meta: serde_json::to_vec_pretty(&meta)?,
            fulltext: result.fulltext.clone().into_bytes(),
            remote_payload: result.raw_service_payload.clone(),
        };

        let guard = CommitGuard::default();
        let mut task = {
            let location = location.clone();
            let guard = guard.clone();
            tokio::task::spawn_blocking(move || commit(&location, &artifacts, &guard))
        };
        let joined = match tokio::time::timeout(self.write_timeout, &mut task).await {
            Ok(joined) => joined,
            Err(_) if guard.abandon() => {
                return Err(WriteError::Timeout(self.write_timeout.as_secs()));
            }
            Err(_) => {
                // The swap is already under way; its outcome decides the status.
                tracing::warn!(
                    identifier = %descriptor.identifier,
                    "write exceeded its timeout mid-swap, waiting for it"
                );
                task.await
            }
        };
        match joined {
            Ok(result) => result?,
            Err(join) => return Err(WriteError::Task(join.to_string())),
        }

        let status = ExtractionStatus {
            identifier: descriptor.identifier.clone(),
            source_path: descriptor.source_path.clone(),
            provider: descriptor.provider.clone(),
            last_extracted_at: extracted_at,
            source_version: source_version.to_string(),
            last_update_reason: update_reason,
        };
        store::set_status_bounded(&self.store, status.clone(), self.store_timeout).await?;

        tracing::debug!(
            identifier = %descriptor.identifier,
            location = %location.display(),
            "artifacts committed"
        );
        Ok(WriteOutcome {
            location,
            status,
            remote_payload_written: meta.has_remote_payload,
        })
    }

    /// Undo what an interrupted commit left beside the leaf.
    ///
    /// A missing leaf with a retired copy beside it is restored from the
    /// newest copy. Retired copies beside a present leaf are removed, as are
    /// staging directories older than the write timeout.
    pub async fn recover(&self, identifier: &str) -> Result<LeafState, WriteError> {
        let leaf = self.location(identifier)?;
        let stale_after = self.write_timeout;
        tokio::task::spawn_blocking(move || recover_leaf(&leaf, stale_after))
            .await
            .map_err(|e| WriteError::Task(e.to_string()))?
    }

    /// Read back the committed `meta.json` for an identifier, if any.
    pub fn read_meta(&self, identifier: &str) -> Result<Option<MetaRecord>, WriteError> {
        let path = self.location(identifier)?.join(META_FILE);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(WriteError::Io { path, source }),
        }
    }
}

struct Artifacts {
    meta: Vec<u8>,
    fulltext: Vec<u8>,
    remote_payload: Option<Vec<u8>>,
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> WriteError + '_ {
    move |source| WriteError::Io {
        path: path.to_path_buf(),
        source,
    }
}

const RUNNING: u8 = 0;
const SWAPPING: u8 = 1;
const ABANDONED: u8 = 2;

/// Settles the race between a commit reaching its swap and the caller
/// giving up on it. Exactly one of the two wins.
#[derive(Clone, Default)]
struct CommitGuard(Arc<AtomicU8>);

impl CommitGuard {
    fn begin_swap(&self) -> bool {
        self.0
            .compare_exchange(RUNNING, SWAPPING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn abandon(&self) -> bool {
        self.0
            .compare_exchange(RUNNING, ABANDONED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

fn leaf_name(leaf: &Path) -> Result<String, WriteError> {
    leaf.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| WriteError::InvalidIdentifier(leaf.display().to_string()))
}

fn leaf_parent(leaf: &Path) -> Result<&Path, WriteError> {
    leaf.parent()
        .ok_or_else(|| WriteError::InvalidIdentifier(leaf.display().to_string()))
}

/// Stage all artifacts next to `leaf`, then swap them into place unless the
/// guard was abandoned first.
fn commit(leaf: &Path, artifacts: &Artifacts, guard: &CommitGuard) -> Result<(), WriteError> {
    let parent = leaf_parent(leaf)?;
    let name = leaf_name(leaf)?;
    fs::create_dir_all(parent).map_err(io_err(parent))?;

    let staging = tempfile::Builder::new()
        .prefix(&format!("{STAGING_PREFIX}{name}-"))
        .rand_bytes(STAGING_RAND_LEN)
        .tempdir_in(parent)
        .map_err(io_err(parent))?;
    write_synced(&staging.path().join(FULLTEXT_FILE), &artifacts.fulltext)?;
    write_synced(&staging.path().join(META_FILE), &artifacts.meta)?;
    if let Some(payload) = &artifacts.remote_payload {
        write_synced(&staging.path().join(REMOTE_PAYLOAD_FILE), payload)?;
    }

    // Dropping `staging` removes it.
    if !guard.begin_swap() {
        return Err(WriteError::Abandoned);
    }

    // From here on the staging directory is ours to clean up.
    let staged = staging.keep();
    if let Err(e) = swap_into_place(&staged, leaf) {
        let _ = fs::remove_dir_all(&staged);
        return Err(WriteError::Io {
            path: leaf.to_path_buf(),
            source: e,
        });
    }
    Ok(())
}

fn write_synced(path: &Path, contents: &[u8]) -> Result<(), WriteError> {
    let mut file = File::create(path).map_err(io_err(path))?;
    file.write_all(contents).map_err(io_err(path))?;
    file.sync_all().map_err(io_err(path))?;
    Ok(())
}

/// Replace `leaf` with `staged`.
///
/// The old leaf is renamed aside first and restored if the final rename
/// fails. A concurrent writer can re-create the leaf between the two renames;
/// the swap is then retried, so the last commit wins.
fn swap_into_place(staged: &Path, leaf: &Path) -> io::Result<()> {
    let parent = leaf.parent().unwrap_or(Path::new("."));
    let name = leaf.file_name().unwrap_or_default().to_string_lossy();
    let mut last_err = None;

    for attempt in 0..SWAP_ATTEMPTS {
        let retired = if leaf.exists() {
            let aside =
                parent.join(format!("{RETIRED_PREFIX}{name}-{:016x}", fastrand::u64(..)));
            match fs::rename(leaf, &aside) {
                Ok(()) => Some(aside),
                // Another writer moved it first.
                Err(e) if e.kind() == io::ErrorKind::NotFound => None,
                Err(e) => return Err(e),
            }
        } else {
            None
        };

        match fs::rename(staged, leaf) {
            Ok(()) => {
                if let Some(retired) = retired {
                    let _ = fs::remove_dir_all(retired);
                }
                return Ok(());
            }
            Err(e) => {
                if let Some(retired) = retired {
                    if leaf.exists() {
                        // Someone else committed in between; theirs supersedes the old copy.
                        let _ = fs::remove_dir_all(&retired);
                    } else {
                        let _ = fs::rename(&retired, leaf);
                    }
                }
                tracing::debug!(
                    leaf = %leaf.display(),
                    attempt = attempt + 1,
                    error = %e,
                    "artifact swap failed"
                );
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| io::Error::other("artifact swap failed")))
}

/// Leftovers of a commit for one leaf, found among its siblings.
#[derive(Default)]
struct Leftovers {
    retired: Vec<PathBuf>,
    staging: Vec<PathBuf>,
}

/// Whether `file_name` is `prefix` + `leaf` + `-` + a suffix of `len`
/// characters accepted by `valid`.
fn matches_leaf(
    file_name: &str,
    prefix: &str,
    leaf: &str,
    len: usize,
    valid: fn(char) -> bool,
) -> bool {
    file_name
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix(leaf))
        .and_then(|rest| rest.strip_prefix('-'))
        .is_some_and(|suffix| suffix.len() == len && suffix.chars().all(valid))
}

fn find_leftovers(leaf: &Path) -> Result<Leftovers, WriteError> {
    let parent = leaf_parent(leaf)?;
    let name = leaf_name(leaf)?;
    let entries = match fs::read_dir(parent) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Leftovers::default()),
        Err(source) => {
            return Err(WriteError::Io {
                path: parent.to_path_buf(),
                source,
            });
        }
    };

    let mut found = Leftovers::default();
    for entry in entries {
        let entry = entry.map_err(io_err(parent))?;
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        if matches_leaf(&file_name, RETIRED_PREFIX, &name, RETIRED_HEX_LEN, |c| {
            c.is_ascii_hexdigit()
        }) {
            found.retired.push(entry.path());
        } else if matches_leaf(&file_name, STAGING_PREFIX, &name, STAGING_RAND_LEN, |c| {
            c.is_ascii_alphanumeric()
        }) {
            found.staging.push(entry.path());
        }
    }
    Ok(found)
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn recover_leaf(leaf: &Path, stale_after: Duration) -> Result<LeafState, WriteError> {
    let Leftovers {
        mut retired,
        staging,
    } = find_leftovers(leaf)?;

    for dir in staging {
        let age = modified(&dir).and_then(|t| t.elapsed().ok());
        if age.is_some_and(|age| age >= stale_after) {
            tracing::info!(path = %dir.display(), "removing stale staging directory");
            let _ = fs::remove_dir_all(&dir);
        }
    }

    let mut state = if leaf.exists() {
        LeafState::Committed
    } else {
        LeafState::Missing
    };

    if state == LeafState::Missing && !retired.is_empty() {
        // Newest last.
        retired.sort_by_key(|dir| modified(dir));
        if let Some(newest) = retired.pop() {
            match fs::rename(&newest, leaf) {
                Ok(()) => {
                    tracing::warn!(
                        leaf = %leaf.display(),
                        from = %newest.display(),
                        "restored artifacts left aside by an interrupted commit"
                    );
                    state = LeafState::Restored;
                }
                // A concurrent commit put a new leaf in place first.
                Err(_) if leaf.exists() => state = LeafState::Committed,
                Err(source) => {
                    return Err(WriteError::Io {
                        path: newest,
                        source,
                    });
                }
            }
        }
    }

    if state.has_artifacts() {
        for dir in retired {
            tracing::debug!(path = %dir.display(), "removing retired artifacts");
            let _ = fs::remove_dir_all(&dir);
        }
    }

    if state.has_artifacts() && !leaf.join(META_FILE).exists() {
        state = LeafState::Missing;
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStatusStore;

    fn writer(root: &Path) -> (OutputWriter, Arc<MemoryStatusStore>) {
        let store = Arc::new(MemoryStatusStore::new());
        let writer = OutputWriter::new(
            root,
            store.clone(),
            Duration::from_secs(5),
            Duration::from_secs(5),
        );
        (writer, store)
    }

    fn descriptor(identifier: &str) -> DocumentDescriptor {
        DocumentDescriptor::new(
            identifier,
            "/data/2015/doc.pdf",
            DeclaredFormat::BinaryDocument,
            "Elsevier",
        )
    }

    fn result(text: &str, payload: Option<&[u8]>) -> ExtractionResult {
        ExtractionResult {
            fulltext: text.to_string(),
            structured_metadata: BTreeMap::from([("title".to_string(), "A Title".to_string())]),
            backend_used: "pdftotext".to_string(),
            raw_service_payload: payload.map(|p| p.to_vec()),
        }
    }

    #[test]
    fn location_layout() {
        let root = Path::new("/out");
        let loc = location_for(root, "2015MNRAS.446..999X").unwrap();
        let rel = loc.strip_prefix(root).unwrap();
        let parts: Vec<_> = rel.iter().map(|p| p.to_string_lossy().into_owned()).collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 2);
        assert_eq!(parts[1].len(), 2);
        assert_eq!(parts[2], "2015MNRAS.446..999X");
    }

    #[test]
    fn location_encodes_separators() {
        let loc = location_for(Path::new("/out"), "10.1000/xyz").unwrap();
        assert_eq!(loc.file_name().unwrap(), "10.1000%2Fxyz");
    }

    #[test]
    fn dot_identifiers_rejected() {
        for bad in ["", ".", ".."] {
            assert!(matches!(
                location_for(Path::new("/out"), bad),
                Err(WriteError::InvalidIdentifier(_))
            ));
        }
    }

    #[tokio::test]
    async fn writes_all_artifacts_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let (w, store) = writer(dir.path());
        let d = descriptor("2015MNRAS.446..999X");

        let outcome = w
            .write(
                &d,
                &result("Introduction\nTHIS IS AN INTERESTING TITLE\n\n\x0c", Some(&b"<hello/>"[..])),
                UpdateReason::NotExtractedBefore,
                "blake3:abc",
            )
            .await
            .unwrap();

        assert_eq!(
            fs::read_to_string(outcome.location.join(FULLTEXT_FILE)).unwrap(),
            "Introduction\nTHIS IS AN INTERESTING TITLE\n\n\x0c"
        );
        assert_eq!(
            fs::read(outcome.location.join(REMOTE_PAYLOAD_FILE)).unwrap(),
            b"<hello/>"
        );
        let meta = w.read_meta(&d.identifier).unwrap().unwrap();
        assert_eq!(meta.update_reason, UpdateReason::NotExtractedBefore);
        assert_eq!(meta.source_version, "blake3:abc");
        assert_eq!(meta.structured_metadata["title"], "A Title");
        assert!(meta.has_remote_payload);
        assert!(outcome.remote_payload_written);

        let status = store.get_status(&d.identifier).unwrap().unwrap();
        assert_eq!(status.source_version, "blake3:abc");
        assert_eq!(status.last_extracted_at, meta.extracted_at);
    }

    #[tokio::test]
    async fn rewrite_replaces_the_whole_set() {
        let dir = tempfile::tempdir().unwrap();
        let (w, _) = writer(dir.path());
        let d = descriptor("id");

        w.write(&d, &result("first", Some(&b"<a/>"[..])), UpdateReason::NotExtractedBefore, "v1")
            .await
            .unwrap();
        let outcome = w
            .write(&d, &result("second", None), UpdateReason::ForcedReextract, "v2")
            .await
            .unwrap();

        assert_eq!(
            fs::read_to_string(outcome.location.join(FULLTEXT_FILE)).unwrap(),
            "second"
        );
        // Stale payload from the previous commit must not survive.
        assert!(!outcome.location.join(REMOTE_PAYLOAD_FILE).exists());
        // Nothing left behind beside the leaf.
        let siblings: Vec<_> = fs::read_dir(outcome.location.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(siblings, vec![std::ffi::OsString::from("id")]);
    }

    #[tokio::test]
    async fn concurrent_writers_leave_one_complete_set() {
        let dir = tempfile::tempdir().unwrap();
        let (w, _) = writer(dir.path());
        let w = Arc::new(w);
        let d = descriptor("contended");

        let mut handles = Vec::new();
        for i in 0..8 {
            let w = Arc::clone(&w);
            let d = d.clone();
            handles.push(tokio::spawn(async move {
                let text = format!("writer {i}");
                w.write(&d, &result(&text, None), UpdateReason::ForcedReextract, &text)
                    .await
            }));
        }
        for h in handles {
            // Individual swaps may lose races; the leaf must still be coherent.
            let _ = h.await.unwrap();
        }

        let meta = w.read_meta("contended").unwrap().unwrap();
        let text = fs::read_to_string(w.location("contended").unwrap().join(FULLTEXT_FILE)).unwrap();
        assert_eq!(text, meta.source_version);
    }

    fn siblings(leaf: &Path) -> Vec<String> {
        let mut names: Vec<_> = fs::read_dir(leaf.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    fn artifacts(text: &str) -> Artifacts {
        Artifacts {
            meta: b"{}".to_vec(),
            fulltext: text.as_bytes().to_vec(),
            remote_payload: None,
        }
    }

    #[test]
    fn abandoned_commit_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let leaf = location_for(dir.path(), "late").unwrap();
        let guard = CommitGuard::default();
        assert!(guard.abandon());

        let err = commit(&leaf, &artifacts("late text"), &guard).unwrap_err();
        assert!(matches!(err, WriteError::Abandoned));
        assert!(!leaf.exists());
        assert!(siblings(&leaf).is_empty());
    }

    #[test]
    fn swap_and_abandon_are_exclusive() {
        let started = CommitGuard::default();
        assert!(started.begin_swap());
        assert!(!started.abandon());

        let given_up = CommitGuard::default();
        assert!(given_up.abandon());
        assert!(!given_up.begin_swap());
    }

    #[tokio::test]
    async fn recover_restores_a_leaf_left_aside() {
        let dir = tempfile::tempdir().unwrap();
        let (w, _) = writer(dir.path());
        let d = descriptor("id");
        w.write(&d, &result("kept", None), UpdateReason::NotExtractedBefore, "v1")
            .await
            .unwrap();

        // Crash after the old leaf was renamed aside, before the new one landed.
        let leaf = w.location("id").unwrap();
        fs::rename(&leaf, leaf.with_file_name(".retired-id-00000000deadbeef")).unwrap();
        assert_eq!(w.read_meta("id").unwrap(), None);

        assert_eq!(w.recover("id").await.unwrap(), LeafState::Restored);
        assert_eq!(fs::read_to_string(leaf.join(FULLTEXT_FILE)).unwrap(), "kept");
        assert_eq!(w.read_meta("id").unwrap().unwrap().source_version, "v1");
        assert_eq!(siblings(&leaf), vec!["id"]);
    }

    #[tokio::test]
    async fn recover_only_touches_its_own_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let (w, _) = writer(dir.path());
        w.write(&descriptor("id"), &result("text", None), UpdateReason::NotExtractedBefore, "v1")
            .await
            .unwrap();

        let leaf = w.location("id").unwrap();
        let own = leaf.with_file_name(".retired-id-0123456789abcdef");
        // Retired copy of an identifier named "id-other" in the same directory.
        let foreign = leaf.with_file_name(".retired-id-other-0123456789abcdef");
        fs::create_dir(&own).unwrap();
        fs::create_dir(&foreign).unwrap();

        assert_eq!(w.recover("id").await.unwrap(), LeafState::Committed);
        assert!(!own.exists());
        assert!(foreign.exists());
    }

    #[tokio::test]
    async fn recover_sweeps_stale_staging() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStatusStore::new());
        let w = OutputWriter::new(dir.path(), store, Duration::ZERO, Duration::from_secs(5));

        let leaf = w.location("id").unwrap();
        let staging = leaf.with_file_name(".staging-id-a1B2c3");
        fs::create_dir_all(&staging).unwrap();
        fs::write(staging.join(FULLTEXT_FILE), "half written").unwrap();

        assert_eq!(w.recover("id").await.unwrap(), LeafState::Missing);
        assert!(!staging.exists());
        assert!(!leaf.exists());
    }

    #[tokio::test]
    async fn recover_without_output_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let (w, _) = writer(dir.path());
        assert_eq!(w.recover("never-written").await.unwrap(), LeafState::Missing);
    }
}
