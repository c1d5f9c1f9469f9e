use std::collections::HashSet;
use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{Settings, DEFAULT_MAX_PAGES, DEFAULT_PAGE_SIZE, MAX_BULK_ITEMS};
use crate::connectors::{Label, MailboxApi, INBOX_LABEL, UNREAD_LABEL};
use crate::error::MailError;

pub mod chunk;
pub mod labels;
pub mod paginate;

pub use chunk::chunked;
pub use labels::{archive_label_name, resolve_label};
pub use paginate::Paginator;

pub const UNREAD_QUERY: &str = "is:unread";
pub const INBOX_QUERY: &str = "in:inbox";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BulkKind {
    Delete,
    MarkRead,
    Archive,
}

impl fmt::Display for BulkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Delete => "delete",
            Self::MarkRead => "mark-read",
            Self::Archive => "archive",
        };
        f.write_str(name)
    }
}

/// Work applied by one bulk run: the size of every successful call in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkReport {
    pub kind: BulkKind,
    pub total: usize,
    pub batches: Vec<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<Label>,
}

impl BulkReport {
    pub fn new(kind: BulkKind) -> Self {
        Self {
            kind,
            total: 0,
            batches: Vec::new(),
            label: None,
        }
    }

    fn record(&mut self, size: usize) {
        self.total += size;
        self.batches.push(size);
    }
}

/// A bulk run that stopped early. Calls listed in `completed` stay applied.
#[derive(Debug, Error)]
#[error("{} stopped after {} messages: {}", .completed.kind, .completed.total, .source)]
pub struct BulkFailure {
    pub completed: BulkReport,
    #[source]
    pub source: MailError,
}

impl BulkFailure {
    fn new(completed: BulkReport, source: MailError) -> Self {
        Self { completed, source }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkOptions {
    pub batch_size: usize,
    pub page_size: usize,
    pub max_pages: usize,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            batch_size: MAX_BULK_ITEMS,
            page_size: DEFAULT_PAGE_SIZE,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }
}

impl From<&Settings> for BulkOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            batch_size: settings.batch_size,
            page_size: settings.page_size,
            max_pages: settings.max_pages,
        }
    }
}

/// Permanently deletes `ids` with one batchDelete call per chunk.
pub async fn delete_messages<A, F>(
    api: &A,
    ids: &[String],
    options: &BulkOptions,
    mut on_batch: F,
) -> Result<BulkReport, BulkFailure>
where
    A: MailboxApi + ?Sized,
    F: FnMut(usize),
{
    let mut report = BulkReport::new(BulkKind::Delete);
    let chunks = match chunked(ids, options.batch_size) {
        Ok(chunks) => chunks,
        Err(source) => return Err(BulkFailure::new(report, source)),
    };

    for chunk in chunks {
        if let Err(source) = api.batch_delete(chunk).await {
            return Err(BulkFailure::new(report, source));
        }
        report.record(chunk.len());
        info!(
            "deleted batch {} of {} messages ({} total)",
            report.batches.len(),
            chunk.len(),
            report.total
        );
        on_batch(chunk.len());
    }

    Ok(report)
}

/// Removes `UNREAD` from every message matching `is:unread`.
pub async fn mark_all_read<A, F>(
    api: &A,
    options: &BulkOptions,
    on_batch: F,
) -> Result<BulkReport, BulkFailure>
where
    A: MailboxApi + ?Sized,
    F: FnMut(usize),
{
    let remove = [UNREAD_LABEL.to_string()];
    drain(
        api,
        BulkReport::new(BulkKind::MarkRead),
        UNREAD_QUERY,
        &[],
        &remove,
        options,
        on_batch,
    )
    .await
}

/// Moves every inbox message under the label `label_name`, resolved once up
/// front, and takes it out of `INBOX`.
pub async fn archive_inbox<A, F>(
    api: &A,
    label_name: &str,
    options: &BulkOptions,
    on_batch: F,
) -> Result<BulkReport, BulkFailure>
where
    A: MailboxApi + ?Sized,
    F: FnMut(usize),
{
    let mut report = BulkReport::new(BulkKind::Archive);
    let label = match resolve_label(api, label_name).await {
        Ok(label) => label,
        Err(source) => return Err(BulkFailure::new(report, source)),
    };

    let add = [label.id.clone()];
    let remove = [INBOX_LABEL.to_string()];
    report.label = Some(label);
    drain(api, report, INBOX_QUERY, &add, &remove, options, on_batch).await
}

/// Applies one label change to everything matching `query` until a full pass
/// over the query finds nothing left to change.
///
/// Mutating messages shrinks the result set underneath the continuation
/// tokens, so each pass restarts from the first page and skips ids already
/// handled in this run.
async fn drain<A, F>(
    api: &A,
    mut report: BulkReport,
    query: &str,
    add_label_ids: &[String],
    remove_label_ids: &[String],
    options: &BulkOptions,
    mut on_batch: F,
) -> Result<BulkReport, BulkFailure>
where
    A: MailboxApi + ?Sized,
    F: FnMut(usize),
{
    if options.batch_size == 0 {
        return Err(BulkFailure::new(
            report,
            MailError::InvalidArgument("batch size must be positive".to_string()),
        ));
    }

    let mut paginator = Paginator::new(query, options.page_size).with_max_pages(options.max_pages);
    let mut processed: HashSet<String> = HashSet::new();

    loop {
        let mut listed_again = 0usize;
        let mut changed_in_pass = 0usize;

        loop {
            let page = match paginator.next_page(api).await {
                Ok(Some(page)) => page,
                Ok(None) => break,
                Err(source) => return Err(BulkFailure::new(report, source)),
            };
            if page.ids.is_empty() {
                break;
            }

            let mut fresh = Vec::with_capacity(page.ids.len());
            for id in page.ids {
                if processed.contains(&id) {
                    listed_again += 1;
                } else if !fresh.contains(&id) {
                    fresh.push(id);
                }
            }

            for chunk in fresh.chunks(options.batch_size) {
                if let Err(source) = api
                    .batch_modify(chunk, add_label_ids, remove_label_ids)
                    .await
                {
                    return Err(BulkFailure::new(report, source));
                }
                report.record(chunk.len());
                info!(
                    "{} batch {}: {} messages ({} total)",
                    report.kind,
                    report.batches.len(),
                    chunk.len(),
                    report.total
                );
                on_batch(chunk.len());
                changed_in_pass += chunk.len();
            }
            processed.extend(fresh);
        }

        debug!(
            "{} pass done: {changed_in_pass} changed, {} pages listed so far",
            report.kind,
            paginator.pages_fetched()
        );
        if changed_in_pass == 0 {
            if listed_again > 0 {
                warn!(
                    "{listed_again} already processed messages still match '{query}'; stopping"
                );
            }
            break;
        }
        paginator.restart();
    }

    Ok(report)
}
