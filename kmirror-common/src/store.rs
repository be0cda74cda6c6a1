// kmirror-common/src/store.rs
//! The remote artifact store as seen by the release cache.

use crate::error::Result;
use crate::model::{Asset, NewRelease, Page, Release};

/// A paginated, versioned remote collection of releases and their assets.
///
/// Implementations perform exactly one remote request per call, so callers
/// can count calls to reason about request budgets. `cursor` is `None` for
/// the first page and otherwise a value previously returned in
/// [`Page::next`].
pub trait ReleaseStore: Send + Sync {
    fn list_releases(&self, cursor: Option<&str>) -> Result<Page<Release>>;

    fn list_release_assets(&self, release: &Release, cursor: Option<&str>) -> Result<Page<Asset>>;

    fn create_release(&self, release: &NewRelease) -> Result<Release>;

    fn upload_release_asset(&self, release: &Release, name: &str, content: &[u8])
        -> Result<Asset>;
}
