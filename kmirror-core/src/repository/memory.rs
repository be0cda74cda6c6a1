// kmirror-core/src/repository/memory.rs
use std::collections::BTreeMap;
use std::time::Duration;

use kmirror_common::error::{KmError, Result};
use kmirror_common::model::{Asset, NewRelease, Page, Release, ReleaseId};
use kmirror_common::store::ReleaseStore;
use parking_lot::Mutex;
use tracing::debug;

const DEFAULT_PAGE_SIZE: usize = 100;

/// Per-operation request counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCalls {
    pub list_releases: u64,
    pub list_assets: u64,
    pub create_release: u64,
    pub upload_asset: u64,
}

#[derive(Default)]
struct MemoryState {
    releases: BTreeMap<ReleaseId, Release>,
    assets: BTreeMap<ReleaseId, Vec<Asset>>,
    next_id: u64,
    calls: StoreCalls,
    fail_next_list: bool,
}

impl MemoryState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// A paginated [`ReleaseStore`] kept in process memory. Used for dry runs,
/// where nothing should leave the machine, and as a test double.
///
/// It rejects duplicate tags and duplicate asset names the way GitHub does.
pub struct MemoryReleaseStore {
    state: Mutex<MemoryState>,
    page_size: usize,
    create_delay: Duration,
}

impl MemoryReleaseStore {
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            page_size: page_size.max(1),
            create_delay: Duration::ZERO,
        }
    }

    /// Makes `create_release` sleep, widening any check-then-create window.
    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = delay;
        self
    }

    pub fn calls(&self) -> StoreCalls {
        self.state.lock().calls
    }

    pub fn seed_release(&self, name: &str, tag_name: &str) -> Release {
        let mut state = self.state.lock();
        let id = state.next_id();
        let release = Release {
            id,
            name: Some(name.to_string()),
            tag_name: tag_name.to_string(),
            draft: false,
            upload_url: None,
        };
        state.releases.insert(id, release.clone());
        release
    }

    pub fn seed_asset(&self, release_id: ReleaseId, name: &str, content: &[u8]) -> Asset {
        let mut state = self.state.lock();
        let asset = new_asset(&mut state, release_id, name, content);
        state
            .assets
            .entry(release_id)
            .or_default()
            .push(asset.clone());
        asset
    }

    /// The next release listing request fails with a server error.
    pub fn fail_next_list(&self) {
        self.state.lock().fail_next_list = true;
    }

    pub fn release_count(&self) -> usize {
        self.state.lock().releases.len()
    }

    pub fn asset_names(&self, release_id: ReleaseId) -> Vec<String> {
        self.state
            .lock()
            .assets
            .get(&release_id)
            .map(|assets| assets.iter().map(|a| a.name.clone()).collect())
            .unwrap_or_default()
    }

    fn page_of<T: Clone>(&self, items: &[T], cursor: Option<&str>) -> Result<Page<T>> {
        let start = match cursor {
            None => 0,
            Some(raw) => raw.parse::<usize>().map_err(|_| {
                KmError::ValidationError(format!("invalid page cursor '{raw}'"))
            })?,
        };
        let end = (start + self.page_size).min(items.len());
        let page_items = items.get(start..end).map(|s| s.to_vec()).unwrap_or_default();
        let next = (end < items.len()).then(|| end.to_string());
        Ok(Page {
            items: page_items,
            next,
        })
    }
}

impl Default for MemoryReleaseStore {
    fn default() -> Self {
        Self::new()
    }
}

fn new_asset(state: &mut MemoryState, release_id: ReleaseId, name: &str, content: &[u8]) -> Asset {
    let tag = state
        .releases
        .get(&release_id)
        .map(|r| r.tag_name.clone())
        .unwrap_or_default();
    Asset {
        id: state.next_id(),
        name: name.to_string(),
        size: content.len() as u64,
        browser_download_url: format!("memory://releases/download/{tag}/{name}"),
    }
}

impl ReleaseStore for MemoryReleaseStore {
    fn list_releases(&self, cursor: Option<&str>) -> Result<Page<Release>> {
        let releases: Vec<Release> = {
            let mut state = self.state.lock();
            state.calls.list_releases += 1;
            if std::mem::take(&mut state.fail_next_list) {
                return Err(KmError::Api {
                    status: 502,
                    message: "bad gateway".to_string(),
                });
            }
            state.releases.values().cloned().collect()
        };
        self.page_of(&releases, cursor)
    }

    fn list_release_assets(&self, release: &Release, cursor: Option<&str>) -> Result<Page<Asset>> {
        let assets: Vec<Asset> = {
            let mut state = self.state.lock();
            state.calls.list_assets += 1;
            if !state.releases.contains_key(&release.id) {
                return Err(KmError::Api {
                    status: 404,
                    message: format!("release {} does not exist", release.id),
                });
            }
            state
                .assets
                .get(&release.id)
                .cloned()
                .unwrap_or_default()
        };
        self.page_of(&assets, cursor)
    }

    fn create_release(&self, release: &NewRelease) -> Result<Release> {
        self.state.lock().calls.create_release += 1;
        if !self.create_delay.is_zero() {
            std::thread::sleep(self.create_delay);
        }

        let mut state = self.state.lock();
        if state
            .releases
            .values()
            .any(|r| r.tag_name == release.tag_name)
        {
            return Err(KmError::Api {
                status: 422,
                message: format!("tag_name '{}' already_exists", release.tag_name),
            });
        }
        let id = state.next_id();
        let created = Release {
            id,
            name: Some(release.name.clone()),
            tag_name: release.tag_name.clone(),
            draft: release.draft,
            upload_url: None,
        };
        state.releases.insert(id, created.clone());
        debug!(release_id = id, "memory store created release");
        Ok(created)
    }

    fn upload_release_asset(&self, release: &Release, name: &str, content: &[u8]) -> Result<Asset> {
        let mut state = self.state.lock();
        state.calls.upload_asset += 1;
        if !state.releases.contains_key(&release.id) {
            return Err(KmError::Api {
                status: 404,
                message: format!("release {} does not exist", release.id),
            });
        }
        let duplicate = state
            .assets
            .get(&release.id)
            .is_some_and(|assets| assets.iter().any(|a| a.name == name));
        if duplicate {
            return Err(KmError::Api {
                status: 422,
                message: format!("asset '{name}' already_exists"),
            });
        }
        let asset = new_asset(&mut state, release.id, name, content);
        state
            .assets
            .entry(release.id)
            .or_default()
            .push(asset.clone());
        Ok(asset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_follow_the_cursor() {
        let store = MemoryReleaseStore::with_page_size(2);
        for i in 0..3 {
            store.seed_release(&format!("r{i}"), &format!("t{i}"));
        }
        let first = store.list_releases(None).unwrap();
        assert_eq!(first.items.len(), 2);
        let second = store.list_releases(first.next.as_deref()).unwrap();
        assert_eq!(second.items.len(), 1);
        assert!(second.next.is_none());
        assert_eq!(store.calls().list_releases, 2);
    }

    #[test]
    fn duplicate_tags_and_assets_are_rejected() {
        let store = MemoryReleaseStore::new();
        let new_release = NewRelease {
            name: "v1".to_string(),
            tag_name: "v1".to_string(),
            draft: false,
        };
        let release = store.create_release(&new_release).unwrap();
        assert!(matches!(
            store.create_release(&new_release),
            Err(KmError::Api { status: 422, .. })
        ));

        store.upload_release_asset(&release, "a.o", b"a").unwrap();
        assert!(matches!(
            store.upload_release_asset(&release, "a.o", b"a"),
            Err(KmError::Api { status: 422, .. })
        ));
        assert_eq!(store.asset_names(release.id), vec!["a.o".to_string()]);
    }
}
