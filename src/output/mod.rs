pub mod json;
pub mod table;

use anyhow::Result;

use crate::bulk::BulkReport;
use crate::search::MessageSummary;

/// Shown for a header the message does not carry.
pub const MISSING_FIELD: &str = "N/A";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
}

impl OutputFormat {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            Self::Json
        } else {
            Self::Table
        }
    }
}

pub fn format_summaries(format: OutputFormat, summaries: &[MessageSummary]) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_summaries(summaries)),
        OutputFormat::Json => json::format_summaries(summaries),
    }
}

pub fn format_report(format: OutputFormat, report: &BulkReport) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_report(report)),
        OutputFormat::Json => json::format_report(report),
    }
}
