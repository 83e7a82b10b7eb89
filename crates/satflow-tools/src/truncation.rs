/// Log excerpt helpers for failure reports.
use std::path::Path;

/// Keep the last `max_chars` bytes of `output`, prefixed with a marker
/// saying how much was dropped. The cut moves forward to a UTF-8 boundary.
pub fn truncate_output(output: &str, max_chars: usize) -> String {
    if output.len() <= max_chars {
        return output.to_string();
    }
    let tail_start = ceil_boundary(output, output.len() - max_chars);
    format!(
        "[... {} characters removed ...]\n{}",
        tail_start,
        &output[tail_start..]
    )
}

/// The last `lines` lines of `text`.
pub fn tail_lines(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

/// Read the last `lines` lines of a log file, capped at `max_chars`.
///
/// A missing or unreadable log yields an empty excerpt rather than an error:
/// the excerpt only decorates a failure that is reported anyway.
pub async fn read_log_tail(path: &Path, lines: usize, max_chars: usize) -> String {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let text = String::from_utf8_lossy(&bytes);
            truncate_output(&tail_lines(&text, lines), max_chars)
        }
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "No log to excerpt");
            String::new()
        }
    }
}

fn ceil_boundary(s: &str, mut idx: usize) -> usize {
    while idx < s.len() && !s.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}
