// kmirror-net/src/lib.rs
pub mod github;
pub mod validation;

pub use github::GithubReleases;
pub use validation::{sha256_hex, validate_url};
