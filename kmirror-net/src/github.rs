// kmirror-net/src/github.rs
use std::time::Duration;

use kmirror_common::config::Config;
use kmirror_common::error::{KmError, Result};
use kmirror_common::model::{Asset, NewRelease, Page, Release};
use kmirror_common::store::ReleaseStore;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, LINK, USER_AGENT};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use crate::validation::{ensure_same_origin, sha256_hex, validate_url};

const REQUEST_TIMEOUT_SECS: u64 = 300;
const CONNECT_TIMEOUT_SECS: u64 = 30;
const USER_AGENT_STRING: &str = "kmirror (Rust; kernel artifact mirror)";
const GITHUB_ACCEPT: &str = "application/vnd.github+json";
const GITHUB_API_VERSION: &str = "2022-11-28";

/// [`ReleaseStore`] backed by the GitHub Releases REST API.
///
/// Every trait call is exactly one HTTP request. Page cursors are the
/// `rel="next"` URLs from the `Link` response header.
pub struct GithubReleases {
    client: Client,
    config: Config,
}

impl GithubReleases {
    pub fn new(config: Config) -> Result<Self> {
        validate_url(&config.api_base_url)?;
        Ok(Self {
            client: build_http_client()?,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match self.config.github_token.as_deref() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn first_page_url(&self, collection_url: &str) -> String {
        format!("{}?per_page={}", collection_url, self.config.page_size)
    }

    fn get_page<T: DeserializeOwned>(&self, collection_url: &str, cursor: Option<&str>) -> Result<Page<T>> {
        let url = match cursor {
            Some(next) => ensure_same_origin(&self.config.api_base_url, next)?.to_string(),
            None => self.first_page_url(collection_url),
        };
        debug!("GET {}", url);

        let response = self.authorized(self.client.get(&url)).send()?;
        let response = check_status(&url, response)?;
        let next = response
            .headers()
            .get(LINK)
            .and_then(|value| value.to_str().ok())
            .and_then(next_page_url);
        let items: Vec<T> = parse_json(response)?;
        Ok(Page { items, next })
    }

    fn upload_url_for(&self, release: &Release, name: &str) -> Result<String> {
        let base = match release.upload_url.as_deref() {
            // "https://uploads.github.com/repos/o/r/releases/1/assets{?name,label}"
            Some(template) => template
                .split_once('{')
                .map_or(template, |(base, _)| base)
                .to_string(),
            None => self.config.release_upload_url(release.id),
        };
        let mut url = validate_url(&base)?;
        url.query_pairs_mut().append_pair("name", name);
        Ok(url.to_string())
    }
}

impl ReleaseStore for GithubReleases {
    fn list_releases(&self, cursor: Option<&str>) -> Result<Page<Release>> {
        self.get_page(&self.config.releases_url(), cursor)
    }

    fn list_release_assets(&self, release: &Release, cursor: Option<&str>) -> Result<Page<Asset>> {
        self.get_page(&self.config.release_assets_url(release.id), cursor)
    }

    fn create_release(&self, release: &NewRelease) -> Result<Release> {
        let token = self.config.require_token()?;
        let url = self.config.releases_url();
        debug!("POST {} (tag {})", url, release.tag_name);

        let response = self.client.post(&url).bearer_auth(token).json(release).send()?;
        let created: Release = parse_json(check_status(&url, response)?)?;
        info!(
            release_id = created.id,
            tag = %created.tag_name,
            "created GitHub release"
        );
        Ok(created)
    }

    fn upload_release_asset(&self, release: &Release, name: &str, content: &[u8]) -> Result<Asset> {
        let token = self.config.require_token()?;
        let url = self.upload_url_for(release, name)?;
        let digest = sha256_hex(content);
        debug!("POST {} ({} bytes, sha256 {})", url, content.len(), digest);

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(content.to_vec())
            .send()?;
        let asset: Asset = parse_json(check_status(&url, response)?)?;
        info!(
            release_id = release.id,
            asset = %asset.name,
            sha256 = %digest,
            download_url = %asset.browser_download_url,
            "uploaded GitHub release asset"
        );
        Ok(asset)
    }
}

fn build_http_client() -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_STRING));
    headers.insert(ACCEPT, HeaderValue::from_static(GITHUB_ACCEPT));
    headers.insert(
        "x-github-api-version",
        HeaderValue::from_static(GITHUB_API_VERSION),
    );
    Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .default_headers(headers)
        .build()
        .map_err(|e| KmError::Config(format!("Failed to build HTTP client: {e}")))
}

fn check_status(url: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .unwrap_or_else(|_| "Failed to read response body".to_string());
    error!("HTTP error {} for URL {}: {}", status, url, body);
    Err(KmError::Api {
        status: status.as_u16(),
        message: api_message(&body),
    })
}

fn parse_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let body = response.text()?;
    Ok(serde_json::from_str(&body)?)
}

/// GitHub error bodies look like `{"message": "...", "errors": [...]}`.
/// Falls back to the raw body for anything else.
fn api_message(body: &str) -> String {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let Some(value) = parsed else {
        return body.trim().to_string();
    };
    let message = value
        .get("message")
        .and_then(|m| m.as_str())
        .unwrap_or_else(|| body.trim());
    let codes: Vec<&str> = value
        .get("errors")
        .and_then(|e| e.as_array())
        .map(|errors| {
            errors
                .iter()
                .filter_map(|e| e.get("code").and_then(|c| c.as_str()))
                .collect()
        })
        .unwrap_or_default();
    if codes.is_empty() {
        message.to_string()
    } else {
        format!("{} ({})", message, codes.join(", "))
    }
}

/// Extracts the `rel="next"` target from a `Link` header.
pub(crate) fn next_page_url(link_header: &str) -> Option<String> {
    link_header.split(',').find_map(|entry| {
        let mut parts = entry.split(';');
        let target = parts.next()?.trim();
        let is_next = parts.any(|param| {
            let param = param.trim();
            param == r#"rel="next""# || param == "rel=next"
        });
        if !is_next {
            return None;
        }
        target
            .strip_prefix('<')
            .and_then(|t| t.strip_suffix('>'))
            .map(str::to_string)
    })
}

#[cfg(test)]
mod tests {
    use mockito::{Matcher, Server};
    use serde_json::json;

    use super::*;

    fn config_for(server: &Server, token: Option<&str>) -> Config {
        let mut config = Config::from_lookup(|_| None)
            .unwrap()
            .with_api_base_url(server.url())
            .with_repository("acme", "probes");
        config.page_size = 2;
        match token {
            Some(token) => config.with_token(token),
            None => config,
        }
    }

    fn release_json(id: u64, name: &str, tag: &str) -> serde_json::Value {
        json!({
            "id": id,
            "name": name,
            "tag_name": tag,
            "draft": false,
            "upload_url": format!("https://uploads.github.com/repos/acme/probes/releases/{id}/assets{{?name,label}}"),
        })
    }

    #[test]
    fn link_header_next_is_extracted() {
        let header = r#"<https://api.github.com/repositories/1/releases?per_page=2&page=2>; rel="next", <https://api.github.com/repositories/1/releases?per_page=2&page=5>; rel="last""#;
        assert_eq!(
            next_page_url(header).as_deref(),
            Some("https://api.github.com/repositories/1/releases?per_page=2&page=2")
        );
        let last_page = r#"<https://api.github.com/repositories/1/releases?per_page=2&page=1>; rel="prev", <https://api.github.com/repositories/1/releases?per_page=2&page=1>; rel="first""#;
        assert_eq!(next_page_url(last_page), None);
        assert_eq!(next_page_url(""), None);
    }

    #[test]
    fn api_messages_include_error_codes() {
        let body = r#"{"message":"Validation Failed","errors":[{"resource":"Release","code":"already_exists","field":"tag_name"}]}"#;
        assert_eq!(api_message(body), "Validation Failed (already_exists)");
        assert_eq!(api_message(r#"{"message":"Not Found"}"#), "Not Found");
        assert_eq!(api_message("gateway timeout\n"), "gateway timeout");
    }

    #[test]
    fn list_releases_follows_the_link_header() {
        let mut server = Server::new();
        let next = format!("{}/repos/acme/probes/releases?per_page=2&page=2", server.url());
        let first = server
            .mock("GET", "/repos/acme/probes/releases")
            .match_query(Matcher::Exact("per_page=2".to_string()))
            .match_header("accept", GITHUB_ACCEPT)
            .with_status(200)
            .with_header("link", &format!("<{next}>; rel=\"next\""))
            .with_body(json!([release_json(1, "a", "a"), release_json(2, "b", "b")]).to_string())
            .expect(1)
            .create();
        let second = server
            .mock("GET", "/repos/acme/probes/releases")
            .match_query(Matcher::Exact("per_page=2&page=2".to_string()))
            .with_status(200)
            .with_body(json!([release_json(3, "c", "c")]).to_string())
            .expect(1)
            .create();

        let store = GithubReleases::new(config_for(&server, None)).unwrap();
        let page = store.list_releases(None).unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.next.as_deref(), Some(next.as_str()));
        let page = store.list_releases(page.next.as_deref()).unwrap();
        assert_eq!(page.items[0].tag_name, "c");
        assert!(page.next.is_none());

        first.assert();
        second.assert();
    }

    #[test]
    fn foreign_cursor_is_rejected_without_a_request() {
        let server = Server::new();
        let store = GithubReleases::new(config_for(&server, Some("t0ken"))).unwrap();
        let err = store
            .list_releases(Some("https://evil.example.com/releases?page=2"))
            .unwrap_err();
        assert!(matches!(err, KmError::ValidationError(_)));
    }

    #[test]
    fn create_release_posts_name_and_tag_with_token() {
        let mut server = Server::new();
        let mock = server
            .mock("POST", "/repos/acme/probes/releases")
            .match_header("authorization", "Bearer t0ken")
            .match_body(Matcher::PartialJson(json!({
                "name": "85c88952b018fdbce2464222c3303229f5bfcfad",
                "tag_name": "85c88952",
                "draft": false
            })))
            .with_status(201)
            .with_body(release_json(9, "85c88952b018fdbce2464222c3303229f5bfcfad", "85c88952").to_string())
            .create();

        let store = GithubReleases::new(config_for(&server, Some("t0ken"))).unwrap();
        let created = store
            .create_release(&NewRelease {
                name: "85c88952b018fdbce2464222c3303229f5bfcfad".to_string(),
                tag_name: "85c88952".to_string(),
                draft: false,
            })
            .unwrap();
        assert_eq!(created.id, 9);
        mock.assert();
    }

    #[test]
    fn writes_require_a_token() {
        let server = Server::new();
        let store = GithubReleases::new(config_for(&server, None)).unwrap();
        let err = store
            .create_release(&NewRelease {
                name: "v".to_string(),
                tag_name: "v".to_string(),
                draft: false,
            })
            .unwrap_err();
        assert!(matches!(err, KmError::Config(_)));
    }

    #[test]
    fn upload_strips_the_url_template() {
        let mut server = Server::new();
        let mock = server
            .mock("POST", "/uploads/repos/acme/probes/releases/7/assets")
            .match_query(Matcher::Exact("name=falco_ubuntu_4.15.0-147-generic_151.o".to_string()))
            .match_header("content-type", "application/octet-stream")
            .match_body("probe-bytes")
            .with_status(201)
            .with_body(
                json!({
                    "id": 70,
                    "name": "falco_ubuntu_4.15.0-147-generic_151.o",
                    "size": 11,
                    "browser_download_url": "https://github.com/acme/probes/releases/download/v/falco_ubuntu_4.15.0-147-generic_151.o"
                })
                .to_string(),
            )
            .create();

        let store = GithubReleases::new(config_for(&server, Some("t0ken"))).unwrap();
        let release = Release {
            id: 7,
            name: Some("v".to_string()),
            tag_name: "v".to_string(),
            draft: false,
            upload_url: Some(format!(
                "{}/uploads/repos/acme/probes/releases/7/assets{{?name,label}}",
                server.url()
            )),
        };
        let asset = store
            .upload_release_asset(&release, "falco_ubuntu_4.15.0-147-generic_151.o", b"probe-bytes")
            .unwrap();
        assert_eq!(asset.id, 70);
        assert_eq!(asset.size, 11);
        mock.assert();
    }

    #[test]
    fn upload_without_template_uses_configured_upload_host() {
        let mut server = Server::new();
        let mock = server
            .mock("POST", "/repos/acme/probes/releases/3/assets")
            .match_query(Matcher::UrlEncoded("name".to_string(), "a.o".to_string()))
            .with_status(201)
            .with_body(json!({"id": 1, "name": "a.o", "size": 1, "browser_download_url": "x"}).to_string())
            .create();

        let store = GithubReleases::new(config_for(&server, Some("t0ken"))).unwrap();
        let release = Release {
            id: 3,
            name: None,
            tag_name: "t".to_string(),
            draft: false,
            upload_url: None,
        };
        store.upload_release_asset(&release, "a.o", b"a").unwrap();
        mock.assert();
    }

    #[test]
    fn error_statuses_become_api_errors() {
        let mut server = Server::new();
        let _mock = server
            .mock("POST", "/repos/acme/probes/releases")
            .with_status(422)
            .with_body(r#"{"message":"Validation Failed","errors":[{"code":"already_exists"}]}"#)
            .create();

        let store = GithubReleases::new(config_for(&server, Some("t0ken"))).unwrap();
        let err = store
            .create_release(&NewRelease {
                name: "v".to_string(),
                tag_name: "v".to_string(),
                draft: false,
            })
            .unwrap_err();
        match err {
            KmError::Api { status, message } => {
                assert_eq!(status, 422);
                assert_eq!(message, "Validation Failed (already_exists)");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
