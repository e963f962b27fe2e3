//! Maps known aligner failure signatures in `logs.txt` to user-facing causes.

use lazy_static::lazy_static;
use regex::Regex;
use std::path::Path;
use tracing::debug;

/// Number of trailing log lines inspected for a signature.
const TAIL_LINES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCause {
    MemoryExhausted,
    Generic,
}

impl FailureCause {
    /// Message template; `#ID#` is substituted with the job id at render time.
    pub fn message(&self) -> &'static str {
        match self {
            FailureCause::MemoryExhausted => {
                "Your job #ID# has failed because of memory limit exceeded. \
                 May be your sequences are too big?<br/>\
                 You can contact the support for more information."
            }
            FailureCause::Generic => {
                "Your job #ID# has failed. You can try again.<br/>\
                 If the problem persists, please contact the support."
            }
        }
    }
}

lazy_static! {
    static ref SIGNATURES: Vec<(Regex, FailureCause)> = vec![
        (
            Regex::new(r"^\[morecore\] \d+ bytes requested but not available")
                .expect("Invalid morecore bytes pattern"),
            FailureCause::MemoryExhausted,
        ),
        (
            Regex::new(r"^\[morecore\] insufficient memory")
                .expect("Invalid morecore memory pattern"),
            FailureCause::MemoryExhausted,
        ),
    ];
}

/// Classify the tail of a log already read in memory.
pub fn classify_lines<'a>(lines: impl DoubleEndedIterator<Item = &'a str>) -> FailureCause {
    let tail: Vec<&str> = lines.rev().take(TAIL_LINES).collect();
    for line in tail {
        for (pattern, cause) in SIGNATURES.iter() {
            if pattern.is_match(line) {
                return *cause;
            }
        }
    }
    FailureCause::Generic
}

/// Last `count` lines of `bytes`, decoded lossily. A trailing newline does
/// not count as an empty final line.
fn tail_lines(bytes: &[u8], count: usize) -> Vec<String> {
    let bytes = bytes.strip_suffix(b"\n").unwrap_or(bytes);
    if bytes.is_empty() {
        return Vec::new();
    }
    let mut tail: Vec<String> = bytes
        .rsplit(|b| *b == b'\n')
        .take(count)
        .map(|line| {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            String::from_utf8_lossy(line).into_owned()
        })
        .collect();
    tail.reverse();
    tail
}

/// Classify the failure recorded in `log_path`. A missing or unreadable log is generic.
pub fn classify(log_path: &Path) -> FailureCause {
    match std::fs::read(log_path) {
        Ok(contents) => {
            let tail = tail_lines(&contents, TAIL_LINES);
            classify_lines(tail.iter().map(String::as_str))
        }
        Err(e) => {
            debug!("Could not read aligner log {:?}: {}", log_path, e);
            FailureCause::Generic
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_signatures_detected_in_tail() {
        let log = "[M::main] loading\n[morecore] 123456 bytes requested but not available.\n";
        assert_eq!(classify_lines(log.lines()), FailureCause::MemoryExhausted);

        let log = "[morecore] insufficient memory\nSegmentation fault\n";
        assert_eq!(classify_lines(log.lines()), FailureCause::MemoryExhausted);
    }

    #[test]
    fn test_signature_outside_tail_is_generic() {
        let log = "[morecore] insufficient memory\nline two\nline three\n";
        assert_eq!(classify_lines(log.lines()), FailureCause::Generic);
    }

    #[test]
    fn test_signature_must_start_the_line() {
        let log = "note: [morecore] insufficient memory\n";
        assert_eq!(classify_lines(log.lines()), FailureCause::Generic);
    }

    #[test]
    fn test_missing_log_is_generic() {
        let temp_dir = TempDir::new().unwrap();
        assert_eq!(
            classify(&temp_dir.path().join("logs.txt")),
            FailureCause::Generic
        );
    }

    #[test]
    fn test_classify_reads_file() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("logs.txt");
        std::fs::write(&log_path, "start\n[morecore] insufficient memory\n").unwrap();
        assert_eq!(classify(&log_path), FailureCause::MemoryExhausted);
    }

    #[test]
    fn test_classify_tolerates_binary_noise() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("logs.txt");
        std::fs::write(
            &log_path,
            b"[M::main] reading \xff\xfe junk\n[morecore] insufficient memory\n",
        )
        .unwrap();
        assert_eq!(classify(&log_path), FailureCause::MemoryExhausted);

        std::fs::write(&log_path, b"[morecore] insufficient memory\r\n\xff\xfe\r\n").unwrap();
        assert_eq!(classify(&log_path), FailureCause::MemoryExhausted);
    }

    #[test]
    fn test_tail_lines() {
        assert_eq!(tail_lines(b"a\nb\nc\n", 2), vec!["b", "c"]);
        assert_eq!(tail_lines(b"a\nb\nc", 2), vec!["b", "c"]);
        assert_eq!(tail_lines(b"only", 2), vec!["only"]);
        assert!(tail_lines(b"", 2).is_empty());
    }

    #[test]
    fn test_messages_keep_placeholder() {
        assert!(FailureCause::Generic.message().contains("#ID#"));
        assert!(FailureCause::MemoryExhausted
            .message()
            .starts_with("Your job #ID# has failed because of memory limit exceeded. May be"));
        assert!(FailureCause::MemoryExhausted.message().contains("?<br/>You can"));
    }
}
