use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::bulk::{BulkKind, BulkReport};
use crate::output::MISSING_FIELD;
use crate::search::MessageSummary;

const ID_WIDTH: usize = 16;
const SENDER_WIDTH: usize = 36;
const SUBJECT_WIDTH: usize = 60;

pub fn format_summaries(summaries: &[MessageSummary]) -> String {
    if summaries.is_empty() {
        return "No messages found.".to_string();
    }

    let mut out = String::from("Messages:\n");
    out.push_str(&format!(
        "{:<id$}  {:<sender$}  {}\n",
        "ID",
        "Sender",
        "Subject",
        id = ID_WIDTH,
        sender = SENDER_WIDTH
    ));
    out.push_str(&format!(
        "{}  {}  {}\n",
        "-".repeat(ID_WIDTH),
        "-".repeat(SENDER_WIDTH),
        "-".repeat(SUBJECT_WIDTH)
    ));

    for summary in summaries {
        let sender = truncate_for_width(
            summary.sender.as_deref().unwrap_or(MISSING_FIELD),
            SENDER_WIDTH,
        );
        let subject = truncate_for_width(
            summary.subject.as_deref().unwrap_or(MISSING_FIELD),
            SUBJECT_WIDTH,
        );
        out.push_str(&format!(
            "{:<id$}  {}  {}\n",
            summary.id,
            pad_to_width(&sender, SENDER_WIDTH),
            subject,
            id = ID_WIDTH
        ));
    }

    out
}

pub fn format_report(report: &BulkReport) -> String {
    let verb = match report.kind {
        BulkKind::Delete => "Deleted",
        BulkKind::MarkRead => "Marked as read",
        BulkKind::Archive => "Archived",
    };

    let mut out = format!("{verb}: {} messages", report.total);
    if let Some(label) = &report.label {
        out.push_str(&format!(" (label '{}', id {})", label.name, label.id));
    }
    if !report.batches.is_empty() {
        let sizes: Vec<String> = report.batches.iter().map(usize::to_string).collect();
        out.push_str(&format!(" in {} batches [{}]", report.batches.len(), sizes.join(", ")));
    }
    out
}

// `{:<N}` pads by char count, which misaligns wide glyphs.
fn pad_to_width(value: &str, width: usize) -> String {
    let used = UnicodeWidthStr::width(value);
    format!("{value}{}", " ".repeat(width.saturating_sub(used)))
}

fn truncate_for_width(value: &str, max_width: usize) -> String {
    if UnicodeWidthStr::width(value) <= max_width {
        return value.to_string();
    }

    if max_width <= 1 {
        return "…".to_string();
    }

    let mut out = String::new();
    let mut width = 0usize;
    for c in value.chars() {
        let cw = UnicodeWidthChar::width(c).unwrap_or(0);
        if width + cw + 1 > max_width {
            break;
        }
        out.push(c);
        width += cw;
    }
    out.push('…');
    out
}
