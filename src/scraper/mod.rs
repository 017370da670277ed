// Registry scraping: fetch the list page, follow its continuation pages, parse every table.

pub mod fetcher;
pub mod traits;

pub use fetcher::ScraperImpl;
pub use traits::Fetcher;

use crate::model::{Marker, ScraperError};
use crate::parser::{Parser, RegistryParser};
use futures::future::join_all;
use tracing::{info, warn};

/// Scrapes the registry starting at `url`. Continuation pages are fetched concurrently;
/// a page that fails to download is logged and skipped.
pub async fn scrape_registry(
    fetcher: &dyn Fetcher,
    parser: &RegistryParser,
    url: &str,
) -> Result<Vec<Marker>, ScraperError> {
    info!("Fetching registry page {}", url);
    let html = fetcher.fetch(url).await?;
    let mut markers = parser.parse(&html)?;
    let pages = parser.linked_pages(&html)?;

    info!("Fetching {} continuation pages...", pages.len());
    let results = join_all(pages.iter().map(|page| fetcher.fetch(page))).await;
    for (page, result) in pages.iter().zip(results) {
        match result {
            Ok(html) => {
                let found = parser.parse(&html)?;
                info!("{}: {} markers", page, found.len());
                markers.extend(found);
            }
            Err(e) => warn!("Skipping {}: {}", page, e),
        }
    }

    info!("Scraped {} markers", markers.len());
    Ok(markers)
}
