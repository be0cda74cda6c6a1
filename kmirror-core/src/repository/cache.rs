// kmirror-core/src/repository/cache.rs
//! In-memory mirror of the remote release collection.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use kmirror_common::error::{KmError, Result};
use kmirror_common::model::{Asset, AssetId, NewRelease, Release, ReleaseId};
use kmirror_common::store::ReleaseStore;
use parking_lot::RwLock;
use tracing::{debug, info, instrument};

#[derive(Default)]
struct CacheData {
    releases_by_id: HashMap<ReleaseId, Release>,
    assets_by_id: HashMap<AssetId, Asset>,
    asset_release_ids: HashMap<AssetId, ReleaseId>,
    releases_populated: bool,
    assets_populated: HashSet<ReleaseId>,
}

impl CacheData {
    fn assets_of(&self, release_id: ReleaseId) -> Vec<Asset> {
        let mut assets: Vec<Asset> = self
            .asset_release_ids
            .iter()
            .filter(|(_, owner)| **owner == release_id)
            .filter_map(|(asset_id, _)| self.assets_by_id.get(asset_id).cloned())
            .collect();
        assets.sort_by_key(|a| a.id);
        assets
    }

    fn insert_asset(&mut self, release_id: ReleaseId, asset: Asset) {
        self.asset_release_ids.insert(asset.id, release_id);
        self.assets_by_id.insert(asset.id, asset);
    }
}

/// Lazily populated view of a [`ReleaseStore`].
///
/// Listings are fetched in full (every page) the first time they are needed
/// and served from memory afterwards. Creations and uploads go to the store
/// and are then written into the cache, so reads stay consistent without
/// another round trip. All state sits behind one reader/writer lock;
/// population holds the write lock for the whole paginated fetch, so readers
/// see either the old or the new contents, never a mix.
pub struct ReleaseCache {
    store: Arc<dyn ReleaseStore>,
    data: RwLock<CacheData>,
    remote_calls: AtomicU64,
}

impl ReleaseCache {
    pub fn new(store: Arc<dyn ReleaseStore>) -> Self {
        Self {
            store,
            data: RwLock::new(CacheData::default()),
            remote_calls: AtomicU64::new(0),
        }
    }

    /// Number of requests made to the store so far.
    pub fn remote_calls(&self) -> u64 {
        self.remote_calls.load(Ordering::SeqCst)
    }

    fn remote(&self) -> &dyn ReleaseStore {
        self.remote_calls.fetch_add(1, Ordering::SeqCst);
        self.store.as_ref()
    }

    pub fn list_releases(&self) -> Result<Vec<Release>> {
        {
            let data = self.data.read();
            if data.releases_populated {
                return Ok(sorted_releases(&data));
            }
        }
        self.populate_releases()?;
        let data = self.data.read();
        Ok(sorted_releases(&data))
    }

    /// Looks a release up by id, populating the release listing once if the
    /// id is unknown.
    pub fn get_release(&self, release_id: ReleaseId) -> Result<Release> {
        {
            let data = self.data.read();
            if let Some(release) = data.releases_by_id.get(&release_id) {
                return Ok(release.clone());
            }
            if data.releases_populated {
                return Err(release_not_found(release_id));
            }
        }
        self.populate_releases()?;
        self.data
            .read()
            .releases_by_id
            .get(&release_id)
            .cloned()
            .ok_or_else(|| release_not_found(release_id))
    }

    pub fn list_release_assets(&self, release_id: ReleaseId) -> Result<Vec<Asset>> {
        let release = self.get_release(release_id)?;
        {
            let data = self.data.read();
            if data.assets_populated.contains(&release_id) {
                return Ok(data.assets_of(release_id));
            }
        }
        self.populate_release_assets(&release)?;
        Ok(self.data.read().assets_of(release_id))
    }

    pub fn find_asset(&self, release_id: ReleaseId, name: &str) -> Result<Option<Asset>> {
        Ok(self
            .list_release_assets(release_id)?
            .into_iter()
            .find(|asset| asset.name == name))
    }

    #[instrument(skip(self), fields(name = %new_release.name, tag = %new_release.tag_name))]
    pub fn create_release(&self, new_release: &NewRelease) -> Result<Release> {
        let release = self.remote().create_release(new_release)?;

        let mut data = self.data.write();
        data.releases_by_id.insert(release.id, release.clone());
        // A release that was just created has no assets yet.
        data.assets_populated.insert(release.id);
        info!(release_id = release.id, "release created");
        Ok(release)
    }

    #[instrument(skip(self, content), fields(size = content.len()))]
    pub fn upload_asset(&self, release_id: ReleaseId, name: &str, content: &[u8]) -> Result<Asset> {
        let release = self.get_release(release_id)?;
        // Load the existing listing first so the set is complete once the new
        // asset is inserted and later reads stay in memory.
        if !self.data.read().assets_populated.contains(&release_id) {
            self.populate_release_assets(&release)?;
        }
        let asset = self.remote().upload_release_asset(&release, name, content)?;

        let mut data = self.data.write();
        data.insert_asset(release_id, asset.clone());
        info!(
            asset_id = asset.id,
            download_url = %asset.browser_download_url,
            "asset uploaded"
        );
        Ok(asset)
    }

    fn populate_releases(&self) -> Result<()> {
        let mut data = self.data.write();
        if data.releases_populated {
            // Another caller populated while we waited for the lock.
            return Ok(());
        }

        let mut releases_by_id = HashMap::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0usize;
        loop {
            let page = self
                .remote()
                .list_releases(cursor.as_deref())
                .map_err(|e| with_context("could not list releases", e))?;
            pages += 1;
            for release in page.items {
                releases_by_id.insert(release.id, release);
            }
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        debug!(
            pages,
            releases = releases_by_id.len(),
            "release cache populated"
        );
        data.releases_by_id = releases_by_id;
        data.releases_populated = true;
        Ok(())
    }

    fn populate_release_assets(&self, release: &Release) -> Result<()> {
        let mut data = self.data.write();
        if data.assets_populated.contains(&release.id) {
            return Ok(());
        }

        let mut fetched = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0usize;
        loop {
            let page = self
                .remote()
                .list_release_assets(release, cursor.as_deref())
                .map_err(|e| with_context("could not list release's assets", e))?;
            pages += 1;
            fetched.extend(page.items);
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        debug!(
            release_id = release.id,
            pages,
            assets = fetched.len(),
            "asset cache populated"
        );
        for asset in fetched {
            data.insert_asset(release.id, asset);
        }
        data.assets_populated.insert(release.id);
        Ok(())
    }
}

fn sorted_releases(data: &CacheData) -> Vec<Release> {
    let mut releases: Vec<Release> = data.releases_by_id.values().cloned().collect();
    releases.sort_by_key(|r| r.id);
    releases
}

fn release_not_found(release_id: ReleaseId) -> KmError {
    KmError::NotFound(format!("release {release_id}"))
}

fn with_context(context: &str, err: KmError) -> KmError {
    match err {
        KmError::Api { status, message } => KmError::Api {
            status,
            message: format!("{context}: {message}"),
        },
        other => other,
    }
}
