// kmirror-common/src/model/release.rs
use serde::{Deserialize, Serialize};

pub type ReleaseId = u64;
pub type AssetId = u64;

/// A versioned container of published artifacts. The release name carries the
/// full driver version; the tag may be a truncated form of it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Release {
    pub id: ReleaseId,
    #[serde(default)]
    pub name: Option<String>,
    pub tag_name: String,
    #[serde(default)]
    pub draft: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_url: Option<String>,
}

impl Release {
    pub fn name_matches(&self, version: &str) -> bool {
        self.name.as_deref() == Some(version)
    }
}

/// One named artifact attached to a release.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Asset {
    pub id: AssetId,
    pub name: String,
    #[serde(default)]
    pub size: u64,
    pub browser_download_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewRelease {
    pub name: String,
    pub tag_name: String,
    pub draft: bool,
}

/// One page of a paginated listing. `next` is an opaque cursor understood
/// only by the store that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_deserializes_from_github_payload() {
        let raw = r#"{
            "id": 1,
            "name": "85c88952b018fdbce2464222c3303229f5bfcfad",
            "tag_name": "85c88952",
            "draft": false,
            "upload_url": "https://uploads.github.com/repos/o/r/releases/1/assets{?name,label}",
            "body": "ignored"
        }"#;
        let release: Release = serde_json::from_str(raw).unwrap();
        assert_eq!(release.id, 1);
        assert!(release.name_matches("85c88952b018fdbce2464222c3303229f5bfcfad"));
        assert!(!release.name_matches("85c88952"));
    }

    #[test]
    fn release_without_name_matches_nothing() {
        let raw = r#"{"id": 7, "name": null, "tag_name": "v1"}"#;
        let release: Release = serde_json::from_str(raw).unwrap();
        assert!(!release.name_matches(""));
        assert!(!release.draft);
    }
}
