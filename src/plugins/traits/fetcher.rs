use async_trait::async_trait;

use crate::models::Listing;
use crate::Result;

/// Turns a saved-search URL into the listings currently shown for it.
///
/// Site-specific parsing lives entirely behind this trait. An empty result
/// page is `Ok(vec![])`; only transport or parse failures are errors.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, query_url: &str) -> Result<Vec<Listing>>;
}
