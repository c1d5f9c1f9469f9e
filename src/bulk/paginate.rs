use std::collections::HashSet;

use tracing::debug;

use crate::config::DEFAULT_MAX_PAGES;
use crate::connectors::{MailboxApi, MessagePage};
use crate::error::MailError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum PageState {
    NotStarted,
    Listing(String),
    Done,
}

/// Walks a messages.list query page by page, following continuation tokens.
///
/// A token that repeats within one pass, or more pages than `max_pages`
/// across the paginator's lifetime, fails with `PaginationStalled` instead of
/// looping forever. An optional `limit` caps the ids handed out; the last page
/// is cut short and no further page is requested.
#[derive(Debug, Clone)]
pub struct Paginator {
    query: String,
    page_size: usize,
    max_pages: usize,
    limit: Option<usize>,
    state: PageState,
    pages_fetched: usize,
    ids_yielded: usize,
    seen_tokens: HashSet<String>,
}

impl Paginator {
    pub fn new(query: impl Into<String>, page_size: usize) -> Self {
        Self {
            query: query.into(),
            page_size,
            max_pages: DEFAULT_MAX_PAGES,
            limit: None,
            state: PageState::NotStarted,
            pages_fetched: 0,
            ids_yielded: 0,
            seen_tokens: HashSet::new(),
        }
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    /// Starts another pass from the first page. The page budget is not reset.
    pub fn restart(&mut self) {
        self.state = PageState::NotStarted;
        self.seen_tokens.clear();
    }

    /// The next page, or `None` once the previous page carried no token or
    /// the limit was reached.
    pub async fn next_page<A>(&mut self, api: &A) -> Result<Option<MessagePage>, MailError>
    where
        A: MailboxApi + ?Sized,
    {
        if self.limit_reached() {
            self.state = PageState::Done;
            return Ok(None);
        }

        let token = match &self.state {
            PageState::Done => return Ok(None),
            PageState::NotStarted => None,
            PageState::Listing(token) => Some(token.clone()),
        };

        if self.pages_fetched >= self.max_pages {
            return Err(self.stalled(format!("page limit of {} reached", self.max_pages)));
        }

        let mut page = api
            .list_messages(&self.query, token.as_deref(), self.page_size)
            .await?;
        self.pages_fetched += 1;
        debug!(
            "query '{}' page {}: {} ids, more={}",
            self.query,
            self.pages_fetched,
            page.ids.len(),
            page.next_page_token.is_some()
        );

        self.state = match page.next_page_token.as_deref().filter(|next| !next.is_empty()) {
            None => PageState::Done,
            Some(next) => {
                if !self.seen_tokens.insert(next.to_string()) {
                    return Err(self.stalled(format!("continuation token '{next}' repeated")));
                }
                PageState::Listing(next.to_string())
            }
        };

        if let Some(limit) = self.limit {
            page.ids.truncate(limit.saturating_sub(self.ids_yielded));
        }
        self.ids_yielded += page.ids.len();
        if self.limit_reached() {
            self.state = PageState::Done;
        }

        Ok(Some(page))
    }

    fn limit_reached(&self) -> bool {
        self.limit.is_some_and(|limit| self.ids_yielded >= limit)
    }

    fn stalled(&self, reason: String) -> MailError {
        MailError::PaginationStalled {
            query: self.query.clone(),
            pages: self.pages_fetched,
            reason,
        }
    }
}
