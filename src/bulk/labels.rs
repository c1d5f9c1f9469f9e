use chrono::{DateTime, TimeZone};
use tracing::info;

use crate::connectors::{Label, MailboxApi};
use crate::error::MailError;

/// `archive_YYYYMMDD_HHMMSS` for the moment an archive run started.
pub fn archive_label_name<Tz>(started_at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    format!("archive_{}", started_at.format("%Y%m%d_%H%M%S"))
}

/// Returns the label named exactly `name`, creating it when the mailbox has none.
///
/// Two concurrent resolvers can both create the label; the service decides
/// whether that yields duplicates.
pub async fn resolve_label<A>(api: &A, name: &str) -> Result<Label, MailError>
where
    A: MailboxApi + ?Sized,
{
    if name.trim().is_empty() {
        return Err(MailError::InvalidArgument(
            "label name must not be empty".to_string(),
        ));
    }

    if let Some(existing) = api
        .list_labels()
        .await?
        .into_iter()
        .find(|label| label.name == name)
    {
        return Ok(existing);
    }

    let created = api.create_label(name).await?;
    info!("created label '{}' with id {}", created.name, created.id);
    Ok(created)
}
