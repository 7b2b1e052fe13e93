//! Atomic snapshot replacement for one retailer.
//!
//! Order is fixed: write every new image, then swap the store rows in one
//! transaction, then sweep files that are not part of the new set. A failure
//! while writing leaves the store untouched; a store failure leaves the new
//! files as orphans for the next successful sweep. Store rows never point at
//! a file that was already removed.

pub mod store;

pub use store::{CatalogueRecord, CatalogueStore, SqliteStore};

use crate::error::PublishError;
use crate::raster::check_sequence;
use crate::types::{CatalogueSnapshot, PageImage, PublishedArtifact, RetailerId, PUBLIC_PREFIX};
use chrono::NaiveDate;
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Writes page images under `{root}/catalogue_images/{retailer}/` and keeps the
/// store in step with them.
#[derive(Clone)]
pub struct Publisher {
    root: PathBuf,
    store: Arc<dyn CatalogueStore>,
}

impl Publisher {
    pub fn new(publish_root: impl Into<PathBuf>, store: Arc<dyn CatalogueStore>) -> Self {
        Self {
            root: publish_root.into(),
            store,
        }
    }

    pub fn store(&self) -> &Arc<dyn CatalogueStore> {
        &self.store
    }

    /// Directory holding a retailer's images.
    pub fn retailer_dir(&self, retailer: &RetailerId) -> PathBuf {
        self.root.join(PUBLIC_PREFIX).join(retailer.as_str())
    }

    /// Replace the retailer's published snapshot with `pages`, stamped `week_date`.
    ///
    /// Blocking: call from a blocking thread inside async code.
    pub fn publish(
        &self,
        retailer: &RetailerId,
        pages: &[PageImage],
        week_date: NaiveDate,
    ) -> Result<CatalogueSnapshot, PublishError> {
        check_sequence(pages).map_err(PublishError::InvalidSequence)?;

        let dir = self.retailer_dir(retailer);
        fs::create_dir_all(&dir).map_err(|source| PublishError::FilesystemWrite {
            path: dir.clone(),
            source,
        })?;

        // 1. Files.
        let mut artifacts = Vec::with_capacity(pages.len());
        for page in pages {
            let artifact = PublishedArtifact::new(retailer, page.index, week_date);
            write_atomically(&dir.join(artifact.file_name()), &page.bytes)?;
            artifacts.push(artifact);
        }
        debug!(retailer = %retailer, pages = artifacts.len(), "page files written");

        // 2. Store.
        self.store
            .replace_snapshot(retailer, &artifacts)
            .map_err(PublishError::StoreWrite)?;

        // 3. Sweep.
        let keep: HashSet<String> = artifacts.iter().map(PublishedArtifact::file_name).collect();
        let (stale_removed, stale_remaining) = sweep(&dir, &keep);

        info!(
            retailer = %retailer,
            pages = artifacts.len(),
            stale_removed,
            stale_remaining,
            "snapshot published"
        );

        Ok(CatalogueSnapshot {
            retailer: retailer.clone(),
            week_date,
            artifacts,
            stale_removed,
            stale_remaining,
        })
    }

    /// Regular files currently in the retailer's directory, sorted by name.
    pub fn files_on_disk(&self, retailer: &RetailerId) -> std::io::Result<Vec<String>> {
        let dir = self.retailer_dir(retailer);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Write via `<name>.tmp`, fsync, rename. A reader never sees a half-written image.
fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), PublishError> {
    let fs_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| PublishError::FilesystemWrite { path, source }
    };

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    let mut file = fs::File::create(&tmp).map_err(fs_err(&tmp))?;
    file.write_all(bytes).map_err(fs_err(&tmp))?;
    file.sync_all().map_err(fs_err(&tmp))?;
    drop(file);

    fs::rename(&tmp, path).map_err(fs_err(path))
}

/// Remove every regular file in `dir` not named in `keep`.
///
/// Returns `(removed, failed)`. Failures are logged and left for the next run.
fn sweep(dir: &Path, keep: &HashSet<String>) -> (usize, usize) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), "sweep could not list directory: {e}");
            return (0, 0);
        }
    };

    let mut removed = 0;
    let mut failed = 0;
    for entry in entries.flatten() {
        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
        let name = entry.file_name().to_string_lossy().into_owned();
        if !is_file || keep.contains(&name) {
            continue;
        }
        match fs::remove_file(entry.path()) {
            Ok(()) => {
                debug!(file = %name, "removed stale artifact");
                removed += 1;
            }
            Err(e) => {
                warn!(file = %name, "failed to remove stale artifact: {e}");
                failed += 1;
            }
        }
    }
    (removed, failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;

    fn id(raw: &str) -> RetailerId {
        RetailerId::parse(raw).unwrap()
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, d).unwrap()
    }

    fn pages(n: u32) -> Vec<PageImage> {
        (1..=n)
            .map(|index| PageImage {
                index,
                bytes: format!("jpeg-{index}").into_bytes(),
                width: 10,
                height: 10,
            })
            .collect()
    }

    fn setup() -> (tempfile::TempDir, Publisher, Arc<SqliteStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let publisher = Publisher::new(dir.path(), store.clone());
        (dir, publisher, store)
    }

    struct BrokenStore;

    impl CatalogueStore for BrokenStore {
        fn replace_snapshot(&self, _: &RetailerId, _: &[PublishedArtifact]) -> Result<(), StoreError> {
            Err(StoreError::Poisoned)
        }
        fn records(&self, _: &RetailerId) -> Result<Vec<CatalogueRecord>, StoreError> {
            Ok(Vec::new())
        }
        fn count(&self, _: &RetailerId) -> Result<usize, StoreError> {
            Ok(0)
        }
        fn ping(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[test]
    fn test_three_page_publish() {
        let (_dir, publisher, store) = setup();
        let coles = id("coles");

        let snap = publisher.publish(&coles, &pages(3), date(21)).unwrap();

        assert_eq!(snap.page_count(), 3);
        assert_eq!(
            publisher.files_on_disk(&coles).unwrap(),
            vec!["20261021_page1.jpg", "20261021_page2.jpg", "20261021_page3.jpg"]
        );
        let rows = store.records(&coles).unwrap();
        assert_eq!(rows.iter().map(|r| r.page_number).collect::<Vec<_>>(), vec![1, 2, 3]);
        let on_disk = fs::read(publisher.retailer_dir(&coles).join("20261021_page2.jpg")).unwrap();
        assert_eq!(on_disk, b"jpeg-2");
    }

    #[test]
    fn test_sweep_removes_previous_snapshot_and_orphans() {
        let (_dir, publisher, store) = setup();
        let coles = id("coles");

        publisher.publish(&coles, &pages(5), date(14)).unwrap();
        let dir = publisher.retailer_dir(&coles);
        fs::write(dir.join("20261017_page9.jpg"), b"orphan").unwrap();
        fs::write(dir.join("20261021_page1.jpg.tmp"), b"partial").unwrap();

        let snap = publisher.publish(&coles, &pages(2), date(21)).unwrap();

        assert_eq!(snap.stale_removed, 7);
        assert_eq!(snap.stale_remaining, 0);
        assert_eq!(
            publisher.files_on_disk(&coles).unwrap(),
            vec!["20261021_page1.jpg", "20261021_page2.jpg"]
        );
        assert_eq!(store.count(&coles).unwrap(), 2);
    }

    #[test]
    fn test_same_day_rerun_overwrites_own_files() {
        let (_dir, publisher, _store) = setup();
        let coles = id("coles");

        let first = publisher.publish(&coles, &pages(4), date(21)).unwrap();
        let second = publisher.publish(&coles, &pages(4), date(21)).unwrap();

        assert_eq!(first.artifacts, second.artifacts);
        assert_eq!(second.stale_removed, 0);
        assert_eq!(publisher.files_on_disk(&coles).unwrap().len(), 4);
    }

    #[test]
    fn test_write_failure_leaves_store_untouched() {
        let (_dir, publisher, store) = setup();
        let coles = id("coles");
        publisher.publish(&coles, &pages(3), date(14)).unwrap();
        let before = store.records(&coles).unwrap();

        // A directory squatting on page 2's path makes the rename fail.
        fs::create_dir_all(publisher.retailer_dir(&coles).join("20261021_page2.jpg")).unwrap();

        let err = publisher.publish(&coles, &pages(3), date(21)).unwrap_err();
        assert!(matches!(err, PublishError::FilesystemWrite { .. }));
        assert_eq!(store.records(&coles).unwrap(), before);
        assert!(publisher
            .retailer_dir(&coles)
            .join("20261014_page3.jpg")
            .exists());
    }

    #[test]
    fn test_store_failure_keeps_old_files_and_reports() {
        let dir = tempfile::tempdir().unwrap();
        let good = Publisher::new(dir.path(), Arc::new(SqliteStore::open_in_memory().unwrap()));
        let coles = id("coles");
        good.publish(&coles, &pages(2), date(14)).unwrap();

        let broken = Publisher::new(dir.path(), Arc::new(BrokenStore));
        let err = broken.publish(&coles, &pages(2), date(21)).unwrap_err();
        assert!(matches!(err, PublishError::StoreWrite(_)));

        // Nothing swept: old files remain, new ones are orphans.
        assert_eq!(good.files_on_disk(&coles).unwrap().len(), 4);
    }

    #[test]
    fn test_invalid_sequence_writes_nothing() {
        let (_dir, publisher, store) = setup();
        let coles = id("coles");
        let mut gappy = pages(3);
        gappy.remove(1);

        let err = publisher.publish(&coles, &gappy, date(21)).unwrap_err();
        assert!(matches!(err, PublishError::InvalidSequence(_)));
        assert!(publisher.files_on_disk(&coles).unwrap().is_empty());
        assert_eq!(store.count(&coles).unwrap(), 0);
    }
}
