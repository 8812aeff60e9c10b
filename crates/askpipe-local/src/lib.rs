//! Concrete backend adapters for askpipe.
//!
//! Each upstream gets one module composed from the same small parts: the
//! redirect resolver, a per-backend [`cache::QueryCache`], a stream
//! normalizer, and (for the channel backend) the HTML formatter.

use askpipe_core::{Error, Result};
use std::time::Duration;

pub mod brave;
pub mod cache;
pub mod duckduckgo;
pub mod felo;
pub mod htmlfmt;
pub mod iask;
pub mod page;
pub mod redirect;
pub mod stream;
pub mod useragent;

pub use brave::BraveAiClient;
pub use duckduckgo::DuckDuckGoClient;
pub use felo::FeloClient;
pub use iask::IAskClient;
pub use page::{FetchOptions, PageClient, PageMetadata};

/// Shared HTTP client defaults: bounded connect + total timeouts so a
/// stalled upstream cannot hang a request forever.
pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .map_err(|e| Error::Transport(e.to_string()))
}
