//! Console transcript handling and outcome classification.

use stagehand_constants::console::{COMPLETION_MARKER, EXIT_CODE_SEPARATOR};

use crate::result::{FailureInfo, FailureKind, TestStatus};

/// Console substrings that indicate a guest crash, lowercase.
pub const CRASH_SIGNATURES: &[&str] = &[
    "kernel panic",
    "oops:",
    "general protection fault",
    "unable to handle kernel",
    "stack overflow",
    "stack-protector",
    "out of memory",
    "call trace:",
];

/// Console substrings that indicate the guest never booted, lowercase.
pub const BOOT_FAILURE_SIGNATURES: &[&str] = &[
    "vfs: unable to mount root fs",
    "no working init found",
    "failed to execute /init",
    "could not load kernel",
    "could not open",
];

/// Longest unterminated line kept while looking for the completion marker.
const MAX_PARTIAL_LINE: usize = 4096;

/// Tail of an overlong line kept when it is truncated. Large enough to
/// hold the marker and its exit code.
const PARTIAL_LINE_TAIL: usize = 256;

/// Which stream a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    /// Guest serial console.
    Stdout,
    /// Emulator diagnostics.
    Stderr,
}

/// Raw bytes read from one stream.
#[derive(Debug)]
pub struct ConsoleChunk {
    /// Source stream.
    pub stream: Stream,
    /// Data.
    pub data: Vec<u8>,
}

/// Append-only console buffer that watches for the completion marker.
///
/// Bytes are decoded per stream; a multibyte character split across reads
/// is held back until the rest of it arrives.
#[derive(Debug, Default)]
pub struct ConsoleBuffer {
    stdout: String,
    stderr: String,
    transcript: String,
    partial_line: String,
    stdout_pending: Vec<u8>,
    stderr_pending: Vec<u8>,
    completion: Option<i32>,
}

impl ConsoleBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk.
    pub fn push(&mut self, chunk: &ConsoleChunk) {
        let pending = match chunk.stream {
            Stream::Stdout => &mut self.stdout_pending,
            Stream::Stderr => &mut self.stderr_pending,
        };
        pending.extend_from_slice(&chunk.data);
        let complete = pending.len() - incomplete_tail(pending);
        let text = String::from_utf8_lossy(&pending[..complete]).into_owned();
        pending.drain(..complete);
        self.append(chunk.stream, &text);
    }

    fn append(&mut self, stream: Stream, text: &str) {
        if text.is_empty() {
            return;
        }
        self.transcript.push_str(text);
        match stream {
            Stream::Stderr => self.stderr.push_str(text),
            Stream::Stdout => {
                self.stdout.push_str(text);
                if self.completion.is_none() {
                    self.scan_lines(text);
                }
            }
        }
    }

    fn scan_lines(&mut self, text: &str) {
        self.partial_line.push_str(text);
        while let Some(pos) = self.partial_line.find('\n') {
            let line: String = self.partial_line.drain(..=pos).collect();
            if let Some(code) = parse_completion(&line) {
                self.completion = Some(code);
                self.partial_line.clear();
                return;
            }
        }
        if self.partial_line.len() > MAX_PARTIAL_LINE {
            let mut cut = self.partial_line.len() - PARTIAL_LINE_TAIL;
            while !self.partial_line.is_char_boundary(cut) {
                cut += 1;
            }
            self.partial_line.drain(..cut);
        }
    }

    /// Flushes undecoded bytes and checks an unterminated final line once
    /// the streams have ended.
    pub fn finish(&mut self) {
        for stream in [Stream::Stdout, Stream::Stderr] {
            let pending = match stream {
                Stream::Stdout => std::mem::take(&mut self.stdout_pending),
                Stream::Stderr => std::mem::take(&mut self.stderr_pending),
            };
            let text = String::from_utf8_lossy(&pending).into_owned();
            self.append(stream, &text);
        }
        if self.completion.is_none() && !self.partial_line.is_empty() {
            self.completion = parse_completion(&self.partial_line);
        }
        self.partial_line.clear();
    }

    /// Exit code from the completion marker, once seen.
    #[must_use]
    pub const fn completion(&self) -> Option<i32> {
        self.completion
    }

    /// Guest console output.
    #[must_use]
    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    /// Emulator diagnostics.
    #[must_use]
    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    /// Both streams, interleaved in arrival order.
    #[must_use]
    pub fn transcript(&self) -> &str {
        &self.transcript
    }
}

/// Length of a truncated UTF-8 sequence at the end of `bytes`.
fn incomplete_tail(bytes: &[u8]) -> usize {
    for back in 1..=bytes.len().min(3) {
        let byte = bytes[bytes.len() - back];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let needed = match byte {
            0xF0..=0xF7 => 4,
            0xE0..=0xEF => 3,
            0xC0..=0xDF => 2,
            _ => 1,
        };
        return if needed > back { back } else { 0 };
    }
    0
}

/// Parses `STAGEHAND_TEST_COMPLETE:<code>` anywhere in a line.
#[must_use]
pub fn parse_completion(line: &str) -> Option<i32> {
    let start = line.find(COMPLETION_MARKER)? + COMPLETION_MARKER.len();
    let rest = line[start..].strip_prefix(EXIT_CODE_SEPARATOR)?;
    let end = rest
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && c == '-')))
        .map_or(rest.len(), |(i, _)| i);
    rest[..end].parse().ok()
}

fn find_signature<'a>(text: &str, signatures: &[&'a str]) -> Option<(&'a str, usize)> {
    let lower = text.to_lowercase();
    signatures
        .iter()
        .filter_map(|sig| lower.find(sig).map(|pos| (*sig, pos)))
        .min_by_key(|&(_, pos)| pos)
}

/// First crash signature in `text`, case-insensitive.
#[must_use]
pub fn detect_crash(text: &str) -> Option<&'static str> {
    find_signature(text, CRASH_SIGNATURES).map(|(sig, _)| sig)
}

/// First boot-failure signature in `text`, case-insensitive.
#[must_use]
pub fn detect_boot_failure(text: &str) -> Option<&'static str> {
    find_signature(text, BOOT_FAILURE_SIGNATURES).map(|(sig, _)| sig)
}

/// Up to `context` lines either side of the line containing `needle`.
fn excerpt(text: &str, needle: &str, context: usize) -> Option<String> {
    let lines: Vec<&str> = text.lines().collect();
    let index = lines
        .iter()
        .position(|line| line.to_lowercase().contains(needle))?;
    let start = index.saturating_sub(context);
    let end = (index + context + 1).min(lines.len());
    Some(lines[start..end].join("\n"))
}

/// How the execution loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEnd {
    /// The completion marker was seen.
    Completed(i32),
    /// The emulator exited on its own.
    Exited(Option<i32>),
    /// The wall-clock limit fired.
    TimedOut,
    /// The caller cancelled.
    Cancelled,
}

/// Classifies a finished run.
///
/// Precedence: timeout and cancellation first, then crash signatures
/// (regardless of exit code), then boot failures, then the exit code
/// reported by the completion marker.
#[must_use]
pub fn classify(end: &RunEnd, transcript: &str) -> (TestStatus, Option<i32>, Option<FailureInfo>) {
    match end {
        RunEnd::TimedOut => {
            return (
                TestStatus::Timeout,
                None,
                Some(FailureInfo::new(FailureKind::Timeout, "test did not complete before the timeout")),
            );
        }
        RunEnd::Cancelled => {
            return (
                TestStatus::Cancelled,
                None,
                Some(FailureInfo::new(FailureKind::Cancelled, "test was cancelled")),
            );
        }
        RunEnd::Completed(_) | RunEnd::Exited(_) => {}
    }

    let exit_code = match end {
        RunEnd::Completed(code) => Some(*code),
        RunEnd::Exited(code) => *code,
        _ => None,
    };

    if let Some(signature) = detect_crash(transcript) {
        return (
            TestStatus::Failed,
            exit_code,
            Some(FailureInfo {
                kind: FailureKind::Crash,
                kernel_panic: true,
                signature: Some(signature.to_string()),
                message: format!("guest crashed: {signature}"),
                excerpt: excerpt(transcript, signature, 5),
            }),
        );
    }

    if let Some(signature) = detect_boot_failure(transcript) {
        return (
            TestStatus::Error,
            exit_code,
            Some(FailureInfo {
                kind: FailureKind::BootFailure,
                kernel_panic: false,
                signature: Some(signature.to_string()),
                message: format!("guest failed to boot: {signature}"),
                excerpt: excerpt(transcript, signature, 3),
            }),
        );
    }

    match end {
        RunEnd::Completed(0) => (TestStatus::Passed, Some(0), None),
        RunEnd::Completed(code) => (
            TestStatus::Failed,
            Some(*code),
            Some(FailureInfo::new(
                FailureKind::NonZeroExit,
                format!("test exited with code {code}"),
            )),
        ),
        _ => (
            TestStatus::Error,
            exit_code,
            Some(FailureInfo::new(
                FailureKind::MissingCompletion,
                match exit_code {
                    Some(code) => format!("emulator exited with code {code} before the test completed"),
                    None => "emulator exited before the test completed".to_string(),
                },
            )),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stdout(data: &str) -> ConsoleChunk {
        ConsoleChunk {
            stream: Stream::Stdout,
            data: data.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_parse_completion() {
        assert_eq!(parse_completion("STAGEHAND_TEST_COMPLETE:0\n"), Some(0));
        assert_eq!(parse_completion("[  1.2] STAGEHAND_TEST_COMPLETE:42\r\n"), Some(42));
        assert_eq!(parse_completion("STAGEHAND_TEST_COMPLETE:-1"), Some(-1));
        assert_eq!(parse_completion("STAGEHAND_TEST_COMPLETE:"), None);
        assert_eq!(parse_completion("echo \"STAGEHAND_TEST_COMPLETE:$rc\""), None);
        assert_eq!(parse_completion("nothing here"), None);
    }

    #[test]
    fn test_marker_split_across_chunks() {
        let mut buffer = ConsoleBuffer::new();
        buffer.push(&stdout("booting\nSTAGEHAND_TEST_"));
        assert_eq!(buffer.completion(), None);
        buffer.push(&stdout("COMPLETE:3"));
        assert_eq!(buffer.completion(), None);
        buffer.push(&stdout("\nreboot: Power down\n"));
        assert_eq!(buffer.completion(), Some(3));
        assert!(buffer.transcript().ends_with("Power down\n"));
    }

    #[test]
    fn test_multibyte_char_split_across_chunks() {
        let bytes = "temp 21°C ✓\n".as_bytes();
        let split = bytes.iter().position(|&b| b == 0xC2).unwrap() + 1;
        let tick = bytes.len() - 2;

        let mut buffer = ConsoleBuffer::new();
        for part in [&bytes[..split], &bytes[split..tick], &bytes[tick..]] {
            buffer.push(&ConsoleChunk {
                stream: Stream::Stdout,
                data: part.to_vec(),
            });
        }
        buffer.finish();
        assert_eq!(buffer.stdout(), "temp 21°C ✓\n");
        assert!(!buffer.transcript().contains('\u{FFFD}'));
    }

    #[test]
    fn test_truncated_tail_flushed_on_finish() {
        let mut buffer = ConsoleBuffer::new();
        buffer.push(&ConsoleChunk {
            stream: Stream::Stderr,
            data: vec![b'x', 0xE2, 0x9C],
        });
        assert_eq!(buffer.stderr(), "x");
        buffer.finish();
        assert_eq!(buffer.stderr(), "x\u{FFFD}");
    }

    #[test]
    fn test_long_line_without_newline_is_bounded() {
        let mut buffer = ConsoleBuffer::new();
        let noise = "#".repeat(1000);
        for _ in 0..100 {
            buffer.push(&stdout(&noise));
        }
        assert!(buffer.partial_line.len() <= MAX_PARTIAL_LINE);
        assert_eq!(buffer.stdout().len(), 100_000);

        buffer.push(&stdout("STAGEHAND_TEST_COMPLETE:7\n"));
        assert_eq!(buffer.completion(), Some(7));
    }

    #[test]
    fn test_unterminated_marker_found_on_finish() {
        let mut buffer = ConsoleBuffer::new();
        buffer.push(&stdout("STAGEHAND_TEST_COMPLETE:0"));
        assert_eq!(buffer.completion(), None);
        buffer.finish();
        assert_eq!(buffer.completion(), Some(0));
    }

    #[test]
    fn test_panic_with_zero_exit_is_failure() {
        let transcript = "ok\nKernel panic - not syncing: Attempted to kill init!\nSTAGEHAND_TEST_COMPLETE:0\n";
        let (status, code, failure) = classify(&RunEnd::Completed(0), transcript);
        assert_eq!(status, TestStatus::Failed);
        assert_eq!(code, Some(0));
        let failure = failure.unwrap();
        assert!(failure.kernel_panic);
        assert_eq!(failure.signature.as_deref(), Some("kernel panic"));
        assert!(failure.excerpt.unwrap().contains("Attempted to kill init"));
    }

    #[test]
    fn test_classification_precedence() {
        assert_eq!(classify(&RunEnd::TimedOut, "Kernel panic").0, TestStatus::Timeout);
        assert_eq!(classify(&RunEnd::Cancelled, "").0, TestStatus::Cancelled);
        assert_eq!(
            classify(&RunEnd::Exited(Some(1)), "VFS: Unable to mount root fs on unknown-block(0,0)").0,
            TestStatus::Error
        );
        assert_eq!(classify(&RunEnd::Completed(0), "all good").0, TestStatus::Passed);

        let (status, code, failure) = classify(&RunEnd::Completed(2), "fail");
        assert_eq!((status, code), (TestStatus::Failed, Some(2)));
        assert_eq!(failure.unwrap().kind, FailureKind::NonZeroExit);

        let (status, _, failure) = classify(&RunEnd::Exited(Some(0)), "no marker");
        assert_eq!(status, TestStatus::Error);
        assert_eq!(failure.unwrap().kind, FailureKind::MissingCompletion);
    }
}
