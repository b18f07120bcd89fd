//! Paginated prefix listing

use tracing::debug;

use crate::provider::{PaginationCursor, ProviderResult, RemoteProvider};

/// Collect keys under `prefix` page by page
///
/// Each call asks for at most `page_size` keys (clamped to the provider's
/// cap, and to what is still needed under `max_keys`). The loop ends when the
/// provider returns no cursor or `max_keys` keys are in hand; a page that
/// over-delivers is truncated.
pub fn list_keys<P>(
    provider: &P,
    prefix: &str,
    max_keys: Option<usize>,
    page_size: usize,
) -> ProviderResult<Vec<String>>
where
    P: RemoteProvider + ?Sized,
{
    let page_size = page_size.clamp(1, provider.max_page_size().max(1));
    let mut keys = Vec::new();
    let mut cursor: Option<PaginationCursor> = None;
    let mut pages = 0usize;

    loop {
        let request = match max_keys {
            Some(limit) => {
                let remaining = limit.saturating_sub(keys.len());
                if remaining == 0 {
                    break;
                }
                remaining.min(page_size)
            }
            None => page_size,
        };

        let page = provider.list_page(prefix, cursor.as_ref(), request)?;
        pages += 1;
        keys.extend(page.keys);

        match page.next {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    if let Some(limit) = max_keys {
        keys.truncate(limit);
    }

    debug!(prefix, pages, keys = keys.len(), "Listed keys");
    Ok(keys)
}
