//! Sleep Prohibition
//!
//! **Policy**: gateway production code never blocks a runtime thread with
//! `std::thread::sleep`, and only waits on a timer between retry attempts.
//! Everything else waits on I/O, permits or cancellation.

use architectural_enforcement::{code_part, production_sources, SourceFile};

/// Lines around an async sleep searched for retry context
const BACKOFF_WINDOW: usize = 15;

#[test]
fn test_no_blocking_sleep() {
    let mut violations = Vec::new();
    for file in production_sources() {
        for (number, line) in &file.lines {
            let code = code_part(line);
            if code.contains("thread::sleep") {
                violations.push(file.violation(*number, line));
            }
        }
    }

    assert!(
        violations.is_empty(),
        "\nBlocking sleep in production code:\n  {}\n",
        violations.join("\n  ")
    );
}

#[test]
fn test_async_sleep_only_for_backoff() {
    let mut violations = Vec::new();
    for file in production_sources() {
        for (idx, (number, line)) in file.lines.iter().enumerate() {
            let code = code_part(line);
            let is_sleep = code.contains("::sleep(") || code.contains(".sleep(");
            if is_sleep && !code.contains("thread::sleep") && !is_backoff_context(&file, idx) {
                violations.push(file.violation(*number, line));
            }
        }
    }

    assert!(
        violations.is_empty(),
        "\nTimer sleeps outside retry backoff:\n  {}\n\
         Wait on I/O, a permit or a CancellationToken instead.\n",
        violations.join("\n  ")
    );
}

fn is_backoff_context(file: &SourceFile, idx: usize) -> bool {
    let start = idx.saturating_sub(BACKOFF_WINDOW);
    file.lines[start..=idx].iter().any(|(_, line)| {
        let line = line.to_lowercase();
        line.contains("backoff") || line.contains("retry")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_backoff_detection() {
        let file = SourceFile::parse(
            PathBuf::from("retry.rs"),
            "let delay = self.retry.backoff_for_attempt(attempt);\n\
             tokio::time::sleep(delay).await;\n",
        );
        assert!(is_backoff_context(&file, 1));

        let polling = SourceFile::parse(
            PathBuf::from("poll.rs"),
            "loop {\n    check();\n    tokio::time::sleep(Duration::from_millis(10)).await;\n}\n",
        );
        assert!(!is_backoff_context(&polling, 2));
    }
}
