use anyhow::Result;

use crate::bulk::BulkReport;
use crate::search::MessageSummary;

pub fn format_summaries(summaries: &[MessageSummary]) -> Result<String> {
    Ok(serde_json::to_string_pretty(summaries)?)
}

pub fn format_report(report: &BulkReport) -> Result<String> {
    Ok(serde_json::to_string_pretty(report)?)
}
