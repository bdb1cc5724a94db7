//! Terminal rendering of progress events.

use pulse_client::RestartAccepted;
use pulse_core::{DocumentId, ProgressEvent, ProgressStatus};

/// One human-readable line for a progress event.
pub fn progress_line(event: &ProgressEvent) -> String {
    let status = status_label(event.status);
    let percent = event
        .overall_progress
        .map_or_else(|| "    -".to_owned(), |p| format!("{p:>5.1}"));

    let mut line = format!("[{status:<10}] {percent}%");
    match (event.current_item_index, event.total_items) {
        (Some(index), Some(total)) => line.push_str(&format!("  item {}/{total}", index + 1)),
        (None, Some(total)) => line.push_str(&format!("  {total} items")),
        _ => {}
    }
    if let Some(item) = event.current_item.as_deref().filter(|s| !s.is_empty()) {
        line.push_str("  ");
        line.push_str(item);
    }
    if !event.skipped_items.is_empty() {
        line.push_str(&format!("  ({} skipped)", event.skipped_items.len()));
    }
    line
}

/// One JSON line for a progress event.
pub fn progress_json(event: &ProgressEvent) -> String {
    serde_json::to_string(event).unwrap_or_else(|_| "{}".to_owned())
}

/// Summary of an accepted restart.
pub fn restart_line(document_id: &DocumentId, accepted: &RestartAccepted) -> String {
    match accepted.message.as_deref() {
        Some(message) => format!("restart of {document_id} accepted: {message}"),
        None => format!("restart of {document_id} accepted"),
    }
}

fn status_label(status: Option<ProgressStatus>) -> &'static str {
    match status {
        Some(ProgressStatus::Processing) => "processing",
        Some(ProgressStatus::Completed) => "completed",
        Some(ProgressStatus::Error) => "error",
        Some(ProgressStatus::Unknown) => "unknown",
        None => "-",
    }
}
