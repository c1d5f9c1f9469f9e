use serde::Serialize;
use tracing::debug;

use crate::bulk::Paginator;
use crate::config::{DEFAULT_MAX_PAGES, DEFAULT_PAGE_SIZE};
use crate::connectors::{MailboxApi, MessageDetail};
use crate::error::MailError;

pub const SENDER_HEADER: &str = "From";
pub const SUBJECT_HEADER: &str = "Subject";

/// One search match. Missing headers stay `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageSummary {
    pub id: String,
    pub sender: Option<String>,
    pub subject: Option<String>,
}

impl From<MessageDetail> for MessageSummary {
    fn from(detail: MessageDetail) -> Self {
        let sender = detail.header(SENDER_HEADER).map(str::to_string);
        let subject = detail.header(SUBJECT_HEADER).map(str::to_string);
        Self {
            id: detail.id,
            sender,
            subject,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOptions {
    pub page_size: usize,
    pub max_pages: usize,
    /// Stop listing once this many matches are collected.
    pub limit: Option<usize>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_pages: DEFAULT_MAX_PAGES,
            limit: None,
        }
    }
}

/// Lists every message matching `query` and fetches its sender and subject,
/// in server order. Any failing call aborts the whole search.
pub async fn search_messages<A>(
    api: &A,
    query: &str,
    options: &SearchOptions,
) -> Result<Vec<MessageSummary>, MailError>
where
    A: MailboxApi + ?Sized,
{
    let mut paginator = Paginator::new(query, options.page_size)
        .with_max_pages(options.max_pages)
        .with_limit(options.limit);
    let mut summaries = Vec::new();

    while let Some(page) = paginator.next_page(api).await? {
        for id in page.ids {
            let detail = api.get_message(&id).await?;
            summaries.push(MessageSummary::from(detail));
        }
        debug!("search '{query}': {} matches so far", summaries.len());
    }

    Ok(summaries)
}

pub fn message_ids(summaries: &[MessageSummary]) -> Vec<String> {
    summaries.iter().map(|summary| summary.id.clone()).collect()
}
