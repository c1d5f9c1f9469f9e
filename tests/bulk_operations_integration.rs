use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use mailprune::bulk::{
    archive_inbox, archive_label_name, delete_messages, mark_all_read, BulkKind, BulkOptions,
};
use mailprune::connectors::{Label, MailboxApi, MessageDetail, MessageHeader, MessagePage};
use mailprune::error::MailError;
use mailprune::search::{message_ids, search_messages, SearchOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tokens {
    /// Continuation tokens index into the result set captured by the first page.
    Snapshot,
    /// Continuation tokens are offsets into the live result set.
    Offset,
}

#[derive(Debug)]
struct StoredMessage {
    id: String,
    from: Option<String>,
    subject: Option<String>,
    labels: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct CallLog {
    lists: usize,
    deletes: Vec<usize>,
    modifies: Vec<(usize, Vec<String>, Vec<String>)>,
    label_creates: Vec<String>,
}

struct SimulatedMailbox {
    tokens: Tokens,
    messages: RefCell<Vec<StoredMessage>>,
    labels: RefCell<Vec<Label>>,
    snapshots: RefCell<HashMap<String, Vec<String>>>,
    calls: RefCell<CallLog>,
    fail_on_delete_call: Option<usize>,
}

impl SimulatedMailbox {
    fn new(tokens: Tokens) -> Self {
        Self {
            tokens,
            messages: RefCell::new(Vec::new()),
            labels: RefCell::new(vec![
                Label {
                    id: "INBOX".to_string(),
                    name: "INBOX".to_string(),
                },
                Label {
                    id: "UNREAD".to_string(),
                    name: "UNREAD".to_string(),
                },
            ]),
            snapshots: RefCell::new(HashMap::new()),
            calls: RefCell::new(CallLog::default()),
            fail_on_delete_call: None,
        }
    }

    fn with_messages(self, count: usize, labels: &[&str], from: &str) -> Self {
        {
            let mut messages = self.messages.borrow_mut();
            let start = messages.len();
            for i in start..start + count {
                messages.push(StoredMessage {
                    id: format!("{i:016x}"),
                    from: Some(from.to_string()),
                    subject: (i % 3 != 0).then(|| format!("Message {i}")),
                    labels: labels.iter().map(|label| label.to_string()).collect(),
                });
            }
        }
        self
    }

    fn matches(message: &StoredMessage, query: &str) -> bool {
        query.split_whitespace().all(|term| match term {
            "is:unread" => message.labels.contains("UNREAD"),
            "in:inbox" => message.labels.contains("INBOX"),
            term => match term.strip_prefix("from:") {
                Some(sender) => message.from.as_deref().is_some_and(|from| from.contains(sender)),
                None => true,
            },
        })
    }

    fn matching_ids(&self, query: &str) -> Vec<String> {
        self.messages
            .borrow()
            .iter()
            .filter(|message| Self::matches(message, query))
            .map(|message| message.id.clone())
            .collect()
    }

    fn count_with_label(&self, label: &str) -> usize {
        self.messages
            .borrow()
            .iter()
            .filter(|message| message.labels.contains(label))
            .count()
    }
}

#[async_trait(?Send)]
impl MailboxApi for SimulatedMailbox {
    async fn list_messages(
        &self,
        query: &str,
        page_token: Option<&str>,
        max_results: usize,
    ) -> Result<MessagePage, MailError> {
        let call = {
            let mut calls = self.calls.borrow_mut();
            calls.lists += 1;
            calls.lists
        };

        let (all, offset) = match (self.tokens, page_token) {
            (_, None) => (self.matching_ids(query), 0),
            (Tokens::Offset, Some(token)) => (
                self.matching_ids(query),
                token.parse().map_err(|_| MailError::Api {
                    status: 400,
                    body: "bad page token".to_string(),
                })?,
            ),
            (Tokens::Snapshot, Some(token)) => {
                let snapshot = self
                    .snapshots
                    .borrow()
                    .get(token)
                    .cloned()
                    .ok_or_else(|| MailError::Api {
                        status: 400,
                        body: "unknown page token".to_string(),
                    })?;
                (snapshot, 0)
            }
        };

        let end = (offset + max_results).min(all.len());
        let ids = all.get(offset..end).map(<[String]>::to_vec).unwrap_or_default();
        let next_page_token = (end < all.len()).then(|| match self.tokens {
            Tokens::Offset => end.to_string(),
            Tokens::Snapshot => {
                let token = format!("snapshot-{call}");
                self.snapshots
                    .borrow_mut()
                    .insert(token.clone(), all[end..].to_vec());
                token
            }
        });

        Ok(MessagePage {
            ids,
            next_page_token,
            result_size_estimate: Some(all.len() as u64),
        })
    }

    async fn get_message(&self, id: &str) -> Result<MessageDetail, MailError> {
        let messages = self.messages.borrow();
        let message = messages
            .iter()
            .find(|message| message.id == id)
            .ok_or_else(|| MailError::Api {
                status: 404,
                body: format!("message {id} not found"),
            })?;

        let mut headers = Vec::new();
        if let Some(from) = &message.from {
            headers.push(MessageHeader {
                name: "From".to_string(),
                value: from.clone(),
            });
        }
        if let Some(subject) = &message.subject {
            headers.push(MessageHeader {
                name: "Subject".to_string(),
                value: subject.clone(),
            });
        }
        Ok(MessageDetail {
            id: message.id.clone(),
            headers,
        })
    }

    async fn batch_delete(&self, ids: &[String]) -> Result<(), MailError> {
        assert!(ids.len() <= 1000, "batchDelete accepts at most 1000 ids");
        let call = self.calls.borrow().deletes.len() + 1;
        if self.fail_on_delete_call == Some(call) {
            return Err(MailError::Api {
                status: 500,
                body: "backendError".to_string(),
            });
        }
        self.calls.borrow_mut().deletes.push(ids.len());
        self.messages
            .borrow_mut()
            .retain(|message| !ids.contains(&message.id));
        Ok(())
    }

    async fn batch_modify(
        &self,
        ids: &[String],
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<(), MailError> {
        assert!(ids.len() <= 1000, "batchModify accepts at most 1000 ids");
        self.calls.borrow_mut().modifies.push((
            ids.len(),
            add_label_ids.to_vec(),
            remove_label_ids.to_vec(),
        ));
        for message in self.messages.borrow_mut().iter_mut() {
            if ids.contains(&message.id) {
                message.labels.extend(add_label_ids.iter().cloned());
                for label in remove_label_ids {
                    message.labels.remove(label);
                }
            }
        }
        Ok(())
    }

    async fn list_labels(&self) -> Result<Vec<Label>, MailError> {
        Ok(self.labels.borrow().clone())
    }

    async fn create_label(&self, name: &str) -> Result<Label, MailError> {
        self.calls.borrow_mut().label_creates.push(name.to_string());
        let label = Label {
            id: format!("Label_{}", self.labels.borrow().len() + 1),
            name: name.to_string(),
        };
        self.labels.borrow_mut().push(label.clone());
        Ok(label)
    }
}

#[tokio::test]
async fn search_then_delete_removes_every_match_in_capped_batches() -> Result<()> {
    let mailbox = SimulatedMailbox::new(Tokens::Snapshot)
        .with_messages(2500, &["INBOX"], "News <news@example.com>")
        .with_messages(40, &["INBOX"], "Friend <friend@example.com>");

    let matches = search_messages(&mailbox, "from:news@example.com", &SearchOptions::default()).await?;
    assert_eq!(matches.len(), 2500);
    assert!(matches.iter().any(|summary| summary.subject.is_none()));

    let ids = message_ids(&matches);
    let mut progress = Vec::new();
    let report = delete_messages(&mailbox, &ids, &BulkOptions::default(), |n| progress.push(n))
        .await
        .map_err(|failure| failure.source)?;

    assert_eq!(report.kind, BulkKind::Delete);
    assert_eq!(report.batches, vec![1000, 1000, 500]);
    assert_eq!(progress, vec![1000, 1000, 500]);
    assert_eq!(mailbox.calls.borrow().deletes, vec![1000, 1000, 500]);
    assert_eq!(mailbox.messages.borrow().len(), 40);
    assert!(mailbox.matching_ids("from:news@example.com").is_empty());
    Ok(())
}

#[tokio::test]
async fn failed_delete_batch_keeps_earlier_deletions() -> Result<()> {
    let mut mailbox = SimulatedMailbox::new(Tokens::Snapshot).with_messages(
        2500,
        &["INBOX"],
        "news@example.com",
    );
    mailbox.fail_on_delete_call = Some(2);
    let ids = mailbox.matching_ids("");

    let failure = delete_messages(&mailbox, &ids, &BulkOptions::default(), |_| {})
        .await
        .expect_err("second batch fails");

    assert_eq!(failure.completed.total, 1000);
    assert_eq!(failure.completed.batches, vec![1000]);
    assert!(matches!(failure.source, MailError::Api { status: 500, .. }));
    assert_eq!(mailbox.messages.borrow().len(), 1500);
    Ok(())
}

#[tokio::test]
async fn limited_search_lists_only_what_it_needs() -> Result<()> {
    let mailbox =
        SimulatedMailbox::new(Tokens::Snapshot).with_messages(1200, &["INBOX"], "a@example.com");
    let options = SearchOptions {
        page_size: 100,
        limit: Some(250),
        ..SearchOptions::default()
    };

    let matches = search_messages(&mailbox, "in:inbox", &options).await?;
    assert_eq!(matches.len(), 250);
    assert_eq!(mailbox.calls.borrow().lists, 3);
    Ok(())
}

#[tokio::test]
async fn mark_read_with_nothing_unread_makes_no_modify_calls() -> Result<()> {
    let mailbox =
        SimulatedMailbox::new(Tokens::Offset).with_messages(30, &["INBOX"], "a@example.com");

    let report = mark_all_read(&mailbox, &BulkOptions::default(), |_| {})
        .await
        .map_err(|failure| failure.source)?;

    assert_eq!(report.total, 0);
    assert!(report.batches.is_empty());
    assert!(mailbox.calls.borrow().modifies.is_empty());
    Ok(())
}

#[tokio::test]
async fn mark_read_reaches_every_message_under_either_token_model() -> Result<()> {
    for tokens in [Tokens::Snapshot, Tokens::Offset] {
        let mailbox = SimulatedMailbox::new(tokens)
            .with_messages(2300, &["INBOX", "UNREAD"], "a@example.com")
            .with_messages(70, &["INBOX"], "b@example.com");

        let report = mark_all_read(&mailbox, &BulkOptions::default(), |_| {})
            .await
            .map_err(|failure| failure.source)?;

        assert_eq!(report.total, 2300, "{tokens:?}");
        assert_eq!(mailbox.count_with_label("UNREAD"), 0, "{tokens:?}");
        for (size, added, removed) in &mailbox.calls.borrow().modifies {
            assert!(*size <= 1000);
            assert!(added.is_empty());
            assert_eq!(removed, &vec!["UNREAD".to_string()]);
        }
    }
    Ok(())
}

#[tokio::test]
async fn archive_moves_whole_inbox_under_one_new_label() -> Result<()> {
    let started = Utc
        .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .expect("valid timestamp");
    let label_name = archive_label_name(&started);
    assert_eq!(label_name, "archive_20240101_000000");

    for tokens in [Tokens::Snapshot, Tokens::Offset] {
        let mailbox = SimulatedMailbox::new(tokens)
            .with_messages(1700, &["INBOX"], "a@example.com")
            .with_messages(25, &["SENT"], "me@example.com");

        let report = archive_inbox(&mailbox, &label_name, &BulkOptions::default(), |_| {})
            .await
            .map_err(|failure| failure.source)?;

        let label = report.label.clone().expect("archive label");
        assert_eq!(label.name, label_name);
        assert_eq!(report.total, 1700, "{tokens:?}");
        assert_eq!(mailbox.calls.borrow().label_creates, vec![label_name.clone()]);
        assert_eq!(mailbox.count_with_label("INBOX"), 0, "{tokens:?}");
        assert_eq!(mailbox.count_with_label(&label.id), 1700, "{tokens:?}");
        for (_, added, removed) in &mailbox.calls.borrow().modifies {
            assert_eq!(added, &vec![label.id.clone()]);
            assert_eq!(removed, &vec!["INBOX".to_string()]);
        }
    }
    Ok(())
}

#[tokio::test]
async fn archive_reuses_existing_label_of_the_same_name() -> Result<()> {
    let mailbox =
        SimulatedMailbox::new(Tokens::Offset).with_messages(10, &["INBOX"], "a@example.com");
    mailbox.labels.borrow_mut().push(Label {
        id: "Label_77".to_string(),
        name: "archive_20240101_000000".to_string(),
    });

    let report = archive_inbox(&mailbox, "archive_20240101_000000", &BulkOptions::default(), |_| {})
        .await
        .map_err(|failure| failure.source)?;

    assert!(mailbox.calls.borrow().label_creates.is_empty());
    assert_eq!(report.label.map(|label| label.id).as_deref(), Some("Label_77"));
    assert_eq!(mailbox.count_with_label("Label_77"), 10);
    Ok(())
}
