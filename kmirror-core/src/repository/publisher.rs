// kmirror-core/src/repository/publisher.rs
use std::fs;
use std::path::Path;
use std::sync::Arc;

use kmirror_common::config::DEFAULT_TAG_PREFIX_LEN;
use kmirror_common::error::{KmError, Result};
use kmirror_common::model::artifact::file_name_of;
use kmirror_common::model::{Asset, NewRelease, Release};
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use super::cache::ReleaseCache;

/// Publishes artifacts into per-version releases without ever creating two
/// releases for the same version.
pub struct Publisher {
    cache: Arc<ReleaseCache>,
    // Held across the whole lookup-then-create sequence. One lock covers all
    // versions; creations are rare next to lookups.
    create_lock: Mutex<()>,
    tag_prefix_len: usize,
    draft: bool,
}

impl Publisher {
    pub fn new(cache: Arc<ReleaseCache>) -> Self {
        Self {
            cache,
            create_lock: Mutex::new(()),
            tag_prefix_len: DEFAULT_TAG_PREFIX_LEN,
            draft: false,
        }
    }

    pub fn with_tag_prefix_len(mut self, len: usize) -> Self {
        self.tag_prefix_len = len.max(1);
        self
    }

    pub fn with_draft_releases(mut self, draft: bool) -> Self {
        self.draft = draft;
        self
    }

    pub fn cache(&self) -> &Arc<ReleaseCache> {
        &self.cache
    }

    /// Release tag for a version key: versions longer than the prefix length
    /// are cut down to it, shorter ones are used as they are.
    pub fn tag_for_version(&self, version: &str) -> String {
        version.chars().take(self.tag_prefix_len).collect()
    }

    /// The release whose name is exactly `version`, or `NotFound`.
    pub fn find_release_for_version(&self, version: &str) -> Result<Release> {
        self.cache
            .list_releases()?
            .into_iter()
            .find(|release| release.name_matches(version))
            .ok_or_else(|| KmError::NotFound(format!("release for version {version}")))
    }

    #[instrument(skip(self))]
    pub fn ensure_release_for_version(&self, version: &str) -> Result<Release> {
        let _guard = self.create_lock.lock();

        match self.find_release_for_version(version) {
            Ok(release) => {
                debug!(release_id = release.id, "found existing release");
                Ok(release)
            }
            Err(e) if e.is_not_found() => {
                let new_release = NewRelease {
                    name: version.to_string(),
                    tag_name: self.tag_for_version(version),
                    draft: self.draft,
                };
                info!(tag = %new_release.tag_name, "no release for version, creating one");
                self.cache.create_release(&new_release)
            }
            Err(e) => Err(e),
        }
    }

    /// Uploads `content` as `artifact_name` under the release for `version`.
    ///
    /// Failing to get hold of the release is an error. A failed upload is
    /// only logged and yields `Ok(None)`, so one bad artifact does not stop
    /// its siblings from being mirrored.
    #[instrument(skip(self, content), fields(size = content.len()))]
    pub fn publish_artifact(
        &self,
        version: &str,
        artifact_name: &str,
        content: &[u8],
    ) -> Result<Option<Asset>> {
        let release = self.ensure_release_for_version(version)?;

        match self.cache.upload_asset(release.id, artifact_name, content) {
            Ok(asset) => {
                info!(
                    release_id = release.id,
                    download_url = %asset.browser_download_url,
                    "published artifact"
                );
                Ok(Some(asset))
            }
            Err(e) => {
                warn!(release_id = release.id, error = %e, "could not upload artifact");
                Ok(None)
            }
        }
    }

    /// Reads the file at `path` and publishes it under its file name.
    pub fn publish_artifact_file(&self, version: &str, path: &Path) -> Result<Option<Asset>> {
        let artifact_name = file_name_of(path)?;
        let content = fs::read(path)?;
        self.publish_artifact(version, &artifact_name, &content)
    }

    /// Whether `artifact_name` already exists under the release for
    /// `version`. A missing release simply means "not published".
    pub fn is_already_published(&self, version: &str, artifact_name: &str) -> Result<bool> {
        let release = match self.find_release_for_version(version) {
            Ok(release) => release,
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e),
        };
        let published = self.cache.find_asset(release.id, artifact_name)?.is_some();
        debug!(
            version,
            artifact_name,
            release_id = release.id,
            published,
            "checked publication"
        );
        Ok(published)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    use kmirror_common::store::ReleaseStore;

    use super::*;
    use crate::repository::MemoryReleaseStore;

    const DRIVER_VERSION: &str = "85c88952b018fdbce2464222c3303229f5bfcfad";

    fn publisher_for(store: &Arc<MemoryReleaseStore>) -> Publisher {
        let cache = ReleaseCache::new(Arc::clone(store) as Arc<dyn ReleaseStore>);
        Publisher::new(Arc::new(cache))
    }

    #[test]
    fn tags_are_truncated_versions() {
        let store = Arc::new(MemoryReleaseStore::new());
        let publisher = publisher_for(&store);
        assert_eq!(publisher.tag_for_version(DRIVER_VERSION), "85c88952");
        assert_eq!(publisher.tag_for_version("0.29"), "0.29");
        let publisher = publisher.with_tag_prefix_len(12);
        assert_eq!(publisher.tag_for_version(DRIVER_VERSION), "85c88952b018");
    }

    #[test]
    fn ensure_creates_once_and_then_reuses() {
        let store = Arc::new(MemoryReleaseStore::new());
        let publisher = publisher_for(&store);

        let first = publisher.ensure_release_for_version(DRIVER_VERSION).unwrap();
        assert!(first.name_matches(DRIVER_VERSION));
        assert_eq!(first.tag_name, "85c88952");
        let second = publisher.ensure_release_for_version(DRIVER_VERSION).unwrap();
        assert_eq!(first, second);
        assert_eq!(store.calls().create_release, 1);
        assert_eq!(store.release_count(), 1);
    }

    #[test]
    fn ensure_reuses_a_release_that_already_exists_remotely() {
        let store = Arc::new(MemoryReleaseStore::new());
        let existing = store.seed_release(DRIVER_VERSION, "85c88952");
        let publisher = publisher_for(&store);
        assert_eq!(
            publisher.ensure_release_for_version(DRIVER_VERSION).unwrap(),
            existing
        );
        assert_eq!(store.calls().create_release, 0);
    }

    #[test]
    fn concurrent_ensure_creates_exactly_one_release() {
        let store = Arc::new(
            MemoryReleaseStore::new().with_create_delay(Duration::from_millis(20)),
        );
        let publisher = Arc::new(publisher_for(&store));
        let parallelism = 10;
        let barrier = Arc::new(Barrier::new(parallelism));

        let handles: Vec<_> = (0..parallelism)
            .map(|_| {
                let publisher = Arc::clone(&publisher);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    publisher.ensure_release_for_version(DRIVER_VERSION)
                })
            })
            .collect();
        let releases: Vec<Release> = handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect();

        assert_eq!(store.calls().create_release, 1);
        for release in &releases {
            assert_eq!(release.id, releases[0].id);
        }
    }

    #[test]
    fn missing_release_means_not_published() {
        let store = Arc::new(MemoryReleaseStore::new());
        let publisher = publisher_for(&store);
        assert!(!publisher.is_already_published("nope", "a.o").unwrap());
        assert_eq!(store.calls().create_release, 0);
    }

    #[test]
    fn published_artifact_is_found_without_refetching() {
        let store = Arc::new(MemoryReleaseStore::new());
        let publisher = publisher_for(&store);

        let asset = publisher
            .publish_artifact(DRIVER_VERSION, "probe.o", b"probe")
            .unwrap()
            .expect("upload succeeds");
        assert_eq!(asset.name, "probe.o");
        let calls_after_publish = publisher.cache().remote_calls();

        assert!(publisher
            .is_already_published(DRIVER_VERSION, "probe.o")
            .unwrap());
        assert!(!publisher
            .is_already_published(DRIVER_VERSION, "other.o")
            .unwrap());
        assert_eq!(publisher.cache().remote_calls(), calls_after_publish);
    }

    #[test]
    fn publish_to_preexisting_release_is_visible_after_upload() {
        let store = Arc::new(MemoryReleaseStore::new());
        let release = store.seed_release(DRIVER_VERSION, "85c88952");
        store.seed_asset(release.id, "old.o", b"old");
        let publisher = publisher_for(&store);

        assert!(publisher.is_already_published(DRIVER_VERSION, "old.o").unwrap());
        assert!(!publisher.is_already_published(DRIVER_VERSION, "new.o").unwrap());
        let calls = publisher.cache().remote_calls();

        publisher
            .publish_artifact(DRIVER_VERSION, "new.o", b"new")
            .unwrap();
        assert!(publisher.is_already_published(DRIVER_VERSION, "new.o").unwrap());
        // Only the upload itself went to the store.
        assert_eq!(publisher.cache().remote_calls(), calls + 1);
    }

    #[test]
    fn publish_into_unlisted_release_is_found_without_refetching() {
        let store = Arc::new(MemoryReleaseStore::new());
        store.seed_release(DRIVER_VERSION, "85c88952");
        let publisher = publisher_for(&store);

        let asset = publisher
            .publish_artifact(DRIVER_VERSION, "new.o", b"new")
            .unwrap();
        assert!(asset.is_some());
        let calls = publisher.cache().remote_calls();

        assert!(publisher.is_already_published(DRIVER_VERSION, "new.o").unwrap());
        assert_eq!(publisher.cache().remote_calls(), calls);
        assert_eq!(store.calls().list_assets, 1);
    }

    #[test]
    fn failed_upload_is_not_fatal() {
        let store = Arc::new(MemoryReleaseStore::new());
        let release = store.seed_release(DRIVER_VERSION, "85c88952");
        store.seed_asset(release.id, "dup.o", b"dup");
        let publisher = publisher_for(&store);

        // The store rejects the duplicate name; the publisher reports no asset.
        let outcome = publisher
            .publish_artifact(DRIVER_VERSION, "dup.o", b"dup")
            .unwrap();
        assert!(outcome.is_none());
    }

    #[test]
    fn publish_artifact_file_uses_the_file_name() {
        let store = Arc::new(MemoryReleaseStore::new());
        let publisher = publisher_for(&store);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("falco-dummy-probe.o");
        std::fs::write(&path, b"falco-dummy-probe").unwrap();

        let asset = publisher
            .publish_artifact_file(DRIVER_VERSION, &path)
            .unwrap()
            .unwrap();
        assert_eq!(asset.name, "falco-dummy-probe.o");
        assert_eq!(asset.size, 17);
    }
}
