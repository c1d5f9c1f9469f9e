use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::Authenticator;
use crate::config::{gmail_api_base, DEFAULT_USER_ID};
use crate::connectors::retry::{with_retry, RetryPolicy};
use crate::connectors::{Label, MailboxApi, MessageDetail, MessageHeader, MessagePage};
use crate::error::MailError;

/// Headers requested with `format=metadata`; everything else is skipped.
const SUMMARY_HEADERS: &[&str] = &["From", "Subject"];

/// Gmail REST API v1 client for a single authenticated user.
pub struct GmailApiClient {
    http: Client,
    auth: Authenticator,
    base_url: String,
    user_id: String,
    retry: RetryPolicy,
}

impl GmailApiClient {
    pub fn new(http: Client, auth: Authenticator) -> Self {
        Self {
            http,
            auth,
            base_url: gmail_api_base(),
            user_id: DEFAULT_USER_ID.to_string(),
            retry: RetryPolicy::none(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn authenticator(&self) -> &Authenticator {
        &self.auth
    }

    fn user_url(&self, path: &str) -> String {
        format!("{}/users/{}/{}", self.base_url, self.user_id, path)
    }

    /// Sends the request built by `build` with a fresh bearer token, retrying
    /// per policy, and returns the raw response body.
    async fn execute<F>(&self, operation: &str, build: F) -> Result<String, MailError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let build = &build;
        with_retry(&self.retry, operation, || async move {
            let token = self.auth.bearer_token().await?;
            let response = build(&self.http)
                .bearer_auth(token)
                .header("accept", "application/json")
                .send()
                .await?;

            let status = response.status();
            let body = response.text().await?;
            debug!("gmail {operation}: status={status} bytes={}", body.len());
            if !status.is_success() {
                return Err(MailError::api(status, &body));
            }
            Ok(body)
        })
        .await
    }

    async fn execute_json<T, F>(&self, operation: &str, build: F) -> Result<T, MailError>
    where
        T: DeserializeOwned,
        F: Fn(&Client) -> RequestBuilder,
    {
        let body = self.execute(operation, build).await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait(?Send)]
impl MailboxApi for GmailApiClient {
    async fn list_messages(
        &self,
        query: &str,
        page_token: Option<&str>,
        max_results: usize,
    ) -> Result<MessagePage, MailError> {
        let url = self.user_url("messages");
        let params = list_params(query, page_token, max_results);
        let list: GmailMessageList = self
            .execute_json("messages.list", |http| http.get(&url).query(&params))
            .await?;
        Ok(list.into())
    }

    async fn get_message(&self, id: &str) -> Result<MessageDetail, MailError> {
        let url = self.user_url(&format!("messages/{id}"));
        let mut params = vec![("format", "metadata")];
        params.extend(SUMMARY_HEADERS.iter().map(|header| ("metadataHeaders", *header)));
        let message: GmailMessage = self
            .execute_json("messages.get", |http| http.get(&url).query(&params))
            .await?;
        Ok(message.into())
    }

    async fn batch_delete(&self, ids: &[String]) -> Result<(), MailError> {
        let url = self.user_url("messages/batchDelete");
        let body = BatchDeleteRequest { ids };
        self.execute("messages.batchDelete", |http| http.post(&url).json(&body))
            .await?;
        Ok(())
    }

    async fn batch_modify(
        &self,
        ids: &[String],
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<(), MailError> {
        let url = self.user_url("messages/batchModify");
        let body = BatchModifyRequest {
            ids,
            add_label_ids,
            remove_label_ids,
        };
        self.execute("messages.batchModify", |http| http.post(&url).json(&body))
            .await?;
        Ok(())
    }

    async fn list_labels(&self) -> Result<Vec<Label>, MailError> {
        let url = self.user_url("labels");
        let list: GmailLabelList = self
            .execute_json("labels.list", |http| http.get(&url))
            .await?;
        Ok(list
            .labels
            .unwrap_or_default()
            .into_iter()
            .map(Label::from)
            .collect())
    }

    async fn create_label(&self, name: &str) -> Result<Label, MailError> {
        let url = self.user_url("labels");
        let body = CreateLabelRequest::visible(name);
        let created: GmailLabel = self
            .execute_json("labels.create", |http| http.post(&url).json(&body))
            .await?;
        Ok(created.into())
    }
}

fn list_params(
    query: &str,
    page_token: Option<&str>,
    max_results: usize,
) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("q", query.to_string()),
        ("maxResults", max_results.to_string()),
    ];
    if let Some(token) = page_token {
        params.push(("pageToken", token.to_string()));
    }
    params
}

// --- Gmail API request and response types ---

#[derive(Debug, Serialize)]
struct BatchDeleteRequest<'a> {
    ids: &'a [String],
}

#[derive(Debug, Serialize)]
struct BatchModifyRequest<'a> {
    ids: &'a [String],
    #[serde(rename = "addLabelIds", skip_serializing_if = "<[String]>::is_empty")]
    add_label_ids: &'a [String],
    #[serde(rename = "removeLabelIds", skip_serializing_if = "<[String]>::is_empty")]
    remove_label_ids: &'a [String],
}

#[derive(Debug, Serialize)]
struct CreateLabelRequest<'a> {
    name: &'a str,
    #[serde(rename = "labelListVisibility")]
    label_list_visibility: &'static str,
    #[serde(rename = "messageListVisibility")]
    message_list_visibility: &'static str,
}

impl<'a> CreateLabelRequest<'a> {
    /// Shown both in the label list and on messages.
    fn visible(name: &'a str) -> Self {
        Self {
            name,
            label_list_visibility: "labelShow",
            message_list_visibility: "show",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct GmailMessageList {
    messages: Option<Vec<GmailMessageStub>>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
    #[serde(rename = "resultSizeEstimate")]
    result_size_estimate: Option<u64>,
}

impl From<GmailMessageList> for MessagePage {
    fn from(list: GmailMessageList) -> Self {
        Self {
            ids: list
                .messages
                .unwrap_or_default()
                .into_iter()
                .map(|stub| stub.id)
                .collect(),
            next_page_token: list.next_page_token,
            result_size_estimate: list.result_size_estimate,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct GmailMessageStub {
    id: String,
}

#[derive(Debug, Clone, Deserialize)]
struct GmailMessage {
    id: String,
    payload: Option<GmailPayload>,
}

#[derive(Debug, Clone, Deserialize)]
struct GmailPayload {
    headers: Option<Vec<GmailHeader>>,
}

#[derive(Debug, Clone, Deserialize)]
struct GmailHeader {
    name: String,
    value: String,
}

impl From<GmailMessage> for MessageDetail {
    fn from(message: GmailMessage) -> Self {
        let headers = message
            .payload
            .and_then(|payload| payload.headers)
            .unwrap_or_default()
            .into_iter()
            .map(|header| MessageHeader {
                name: header.name,
                value: header.value,
            })
            .collect();
        Self {
            id: message.id,
            headers,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct GmailLabelList {
    labels: Option<Vec<GmailLabel>>,
}

#[derive(Debug, Clone, Deserialize)]
struct GmailLabel {
    id: String,
    name: String,
}

impl From<GmailLabel> for Label {
    fn from(label: GmailLabel) -> Self {
        Self {
            id: label.id,
            name: label.name,
        }
    }
}
