//! Remote collaborators the cache sits in front of.
//!
//! The engine never talks to the network itself. Applications plug in a
//! scraper or API client by implementing these traits and hand them to
//! [`ChordCache`](crate::ChordCache)'s read-through helpers.

use async_trait::async_trait;

use crate::cache::{ChordSheet, SearchResults};
use crate::keys::SearchType;

/// Error type reported by a source implementation.
pub type SourceError = Box<dyn std::error::Error + Send + Sync>;

/// Fetches a single chord sheet by its `artist-title` path.
#[async_trait]
pub trait ChordSheetSource: Send + Sync {
    /// `Ok(None)` means the source has no sheet for `path`.
    async fn fetch_chord_sheet(&self, path: &str) -> Result<Option<ChordSheet>, SourceError>;
}

/// Runs a search against a remote catalogue.
#[async_trait]
pub trait SearchSource: Send + Sync {
    async fn fetch_search_results(&self, query: &str, search_type: SearchType) -> Result<SearchResults, SourceError>;

    /// Name recorded in each cached entry's descriptor.
    fn data_source(&self) -> &str {
        "remote"
    }
}
