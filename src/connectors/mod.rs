use async_trait::async_trait;
use serde::Serialize;

use crate::error::MailError;

pub mod gmail_api;
pub mod retry;

pub use gmail_api::GmailApiClient;

pub const UNREAD_LABEL: &str = "UNREAD";
pub const INBOX_LABEL: &str = "INBOX";

/// One page of a messages.list response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePage {
    pub ids: Vec<String>,
    pub next_page_token: Option<String>,
    pub result_size_estimate: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub name: String,
    pub value: String,
}

/// Header metadata of a single message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDetail {
    pub id: String,
    pub headers: Vec<MessageHeader>,
}

impl MessageDetail {
    /// First header with the exact name, matching the service's casing.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|header| header.name == name)
            .map(|header| header.value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Label {
    pub id: String,
    pub name: String,
}

/// The remote calls the bulk drivers and search are built on.
///
/// Implementations are called strictly sequentially.
#[async_trait(?Send)]
pub trait MailboxApi {
    async fn list_messages(
        &self,
        query: &str,
        page_token: Option<&str>,
        max_results: usize,
    ) -> Result<MessagePage, MailError>;

    async fn get_message(&self, id: &str) -> Result<MessageDetail, MailError>;

    async fn batch_delete(&self, ids: &[String]) -> Result<(), MailError>;

    async fn batch_modify(
        &self,
        ids: &[String],
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<(), MailError>;

    async fn list_labels(&self) -> Result<Vec<Label>, MailError>;

    async fn create_label(&self, name: &str) -> Result<Label, MailError>;
}
