//! Remote side of a refresh: download of buyer-hosted update documents.

pub mod client;
pub mod options;

pub use client::{parse_update_uri, FetchError, HttpUpdateClient, UpdateSource};
pub use options::HttpFetchOptions;
