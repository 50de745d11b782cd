use std::time::Duration;

use tracing::warn;

use crate::api::{FetchPage, Page};

/// Lazy, forward-only page sequence for a single name prefix.
///
/// A fetch failure ends the sequence for this prefix only; restarting means
/// constructing a new iterator (which begins again at page 0).
pub struct PageIter<'a, F: FetchPage> {
    fetcher: &'a F,
    prefix: char,
    page_size: u32,
    page_delay: Duration,
    page_number: u32,
    done: bool,
}

impl<'a, F: FetchPage> PageIter<'a, F> {
    pub fn new(fetcher: &'a F, prefix: char, page_size: u32, page_delay: Duration) -> Self {
        PageIter {
            fetcher,
            prefix,
            page_size,
            page_delay,
            page_number: 0,
            done: false,
        }
    }
}

impl<F: FetchPage> Iterator for PageIter<'_, F> {
    type Item = Page;

    fn next(&mut self) -> Option<Page> {
        if self.done {
            return None;
        }

        // Cooperative pacing between consecutive requests.
        if self.page_number > 0 && !self.page_delay.is_zero() {
            std::thread::sleep(self.page_delay);
        }

        let page = match self
            .fetcher
            .fetch_page(self.prefix, self.page_number, self.page_size)
        {
            Ok(page) => page,
            Err(e) => {
                warn!(
                    prefix = %self.prefix,
                    page_number = self.page_number,
                    "fetch failed, skipping rest of prefix: {e}"
                );
                self.done = true;
                return None;
            }
        };

        // No page-count metadata: only a literal empty list stops the walk
        // (and is swallowed, not emitted); null/absent content keeps going.
        if page.total_pages.is_none()
            && matches!(&page.content, Some(items) if items.is_empty())
        {
            self.done = true;
            return None;
        }

        self.done = match page.total_pages {
            Some(total) => self.page_number + 1 >= total,
            None => false,
        };
        self.page_number += 1;

        Some(page)
    }
}

// ── Tests ──
