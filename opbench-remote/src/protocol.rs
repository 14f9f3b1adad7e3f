//! Result Protocol
//!
//! The child prints exactly one JSON object on stdout when it completes:
//!
//! ```text
//! {"mem": {"peak": .., "final": .., "real": ..}, "time": {"net": .., "revs": ..}, "buffer": ".."}
//! ```
//!
//! A recoverable failure inside the child is reported as a diagnostic on
//! stderr together with a non-zero exit code.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::process::ExitStatus;
use thiserror::Error;

/// Longest stdout excerpt quoted in a protocol error
const EXCERPT_LEN: usize = 256;

/// The child signalled a failure while running the benchmark
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ScriptError {
    /// Diagnostic text, verbatim from the child's error stream when present
    pub message: String,
    /// Exit code, if the child exited normally
    pub exit_code: Option<i32>,
}

/// Output that does not conform to the result protocol
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Nothing but whitespace on stdout
    #[error("Script produced no output")]
    EmptyOutput,

    /// Stdout is not a single JSON document
    #[error("Script output is not valid JSON ({reason}): {output}")]
    Malformed {
        /// Parser diagnostic
        reason: String,
        /// Leading part of the offending output
        output: String,
    },

    /// Stdout is JSON but not an object
    #[error("Script output is not a JSON object: {0}")]
    NotARecord(String),

    /// A required sub-record (`time` or `mem`) is absent
    #[error("Script output is missing the `{0}` record")]
    MissingRecord(&'static str),

    /// A sub-record is present but has the wrong shape
    #[error("Invalid `{record}` record: {reason}")]
    InvalidRecord {
        /// Sub-record name
        record: &'static str,
        /// Decoder diagnostic
        reason: String,
    },

    /// The reported revolution count differs from the requested one
    #[error("Expected {expected} revolutions, script reported {actual}")]
    RevolutionMismatch {
        /// Revolutions requested
        expected: u64,
        /// Revolutions the script reported
        actual: u64,
    },
}

/// Raw capture of one child process run. Never mutated after capture.
#[derive(Debug, Clone)]
pub struct RawResult {
    exit_code: Option<i32>,
    signal: Option<i32>,
    stdout: String,
    stderr: String,
}

impl RawResult {
    /// Build from explicit parts
    pub fn new(
        exit_code: Option<i32>,
        signal: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        Self {
            exit_code,
            signal,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// Build from a reaped child's status and its captured streams
    pub fn from_status(status: ExitStatus, stdout: &[u8], stderr: &[u8]) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self::new(
            status.code(),
            signal,
            String::from_utf8_lossy(stdout),
            String::from_utf8_lossy(stderr),
        )
    }

    /// Exit code, `None` when killed by a signal
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Terminating signal, if any
    pub fn signal(&self) -> Option<i32> {
        self.signal
    }

    /// Full standard output
    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    /// Full standard error
    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    /// Whether the child exited with status 0
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Classify a failed run as a script error.
    ///
    /// Returns `None` for a zero exit. Otherwise the diagnostic is stderr
    /// followed by stdout, each verbatim and skipped when blank: PHP reports
    /// uncaught fatals on stdout while stderr may hold unrelated noise.
    /// Without either, a generic description is used.
    pub fn script_error(&self) -> Option<ScriptError> {
        if self.success() {
            return None;
        }

        let mut message = String::new();
        for stream in [&self.stderr, &self.stdout] {
            if stream.trim().is_empty() {
                continue;
            }
            if !message.is_empty() && !message.ends_with('\n') {
                message.push('\n');
            }
            message.push_str(stream);
        }

        if message.is_empty() {
            message = match (self.exit_code, self.signal) {
                (Some(code), _) => format!("Script exited with code {} and no output", code),
                (None, Some(signal)) => format!("Script terminated by signal {}", signal),
                (None, None) => "Script exited abnormally".to_string(),
            };
        }

        Some(ScriptError {
            message,
            exit_code: self.exit_code,
        })
    }

    /// Decode the measurement record from stdout
    pub fn decode_measurement(&self) -> Result<DecodedMeasurement, ProtocolError> {
        decode_measurement(&self.stdout)
    }
}

/// `time` record: net microseconds for `revs` timed invocations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRecord {
    /// Net elapsed time in microseconds, warm-up excluded
    pub net: u64,
    /// Number of timed invocations
    pub revs: u64,
}

/// `mem` record, in bytes as reported by the child
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Peak usage
    pub peak: u64,
    /// Usage after the measured loop
    #[serde(rename = "final")]
    pub final_usage: u64,
    /// Memory allocated from the system
    pub real: u64,
}

/// Structured decode of a child's stdout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMeasurement {
    /// Timing record
    pub time: TimeRecord,
    /// Memory record
    pub mem: MemoryRecord,
    /// Output the subject printed while being measured
    pub buffer: Option<String>,
}

/// Decode the single JSON record a child prints on success.
///
/// Never defaults missing data to zero: empty, malformed or incomplete
/// output is a [`ProtocolError`].
pub fn decode_measurement(stdout: &str) -> Result<DecodedMeasurement, ProtocolError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Err(ProtocolError::EmptyOutput);
    }

    let value: Value = serde_json::from_str(trimmed).map_err(|e| ProtocolError::Malformed {
        reason: e.to_string(),
        output: excerpt(trimmed),
    })?;

    let Value::Object(mut record) = value else {
        return Err(ProtocolError::NotARecord(excerpt(trimmed)));
    };

    let time = record
        .remove("time")
        .ok_or(ProtocolError::MissingRecord("time"))?;
    let mem = record
        .remove("mem")
        .ok_or(ProtocolError::MissingRecord("mem"))?;

    let time: TimeRecord =
        serde_json::from_value(time).map_err(|e| ProtocolError::InvalidRecord {
            record: "time",
            reason: e.to_string(),
        })?;
    let mem: MemoryRecord =
        serde_json::from_value(mem).map_err(|e| ProtocolError::InvalidRecord {
            record: "mem",
            reason: e.to_string(),
        })?;

    let buffer = match record.remove("buffer") {
        Some(Value::String(s)) => Some(s),
        Some(Value::Null) | None => None,
        Some(other) => {
            return Err(ProtocolError::InvalidRecord {
                record: "buffer",
                reason: format!("expected a string, got {}", other),
            });
        }
    };

    Ok(DecodedMeasurement { time, mem, buffer })
}

/// Longest prefix of `text` no longer than `max_len` bytes that ends on a
/// char boundary
pub fn truncate_to_char_boundary(text: &str, max_len: usize) -> &str {
    if text.len() <= max_len {
        return text;
    }
    let mut end = max_len;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

fn excerpt(text: &str) -> String {
    let cut = truncate_to_char_boundary(text, EXCERPT_LEN);
    if cut.len() == text.len() {
        return text.to_string();
    }
    format!("{}...", cut)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{"mem":{"peak":2097152,"final":1048576,"real":2097152},"time":{"net":1500,"revs":3},"buffer":""}"#;

    #[test]
    fn test_decode_valid_record() {
        let decoded = decode_measurement(VALID).unwrap();
        assert_eq!(decoded.time, TimeRecord { net: 1500, revs: 3 });
        assert_eq!(decoded.mem.peak, 2_097_152);
        assert_eq!(decoded.mem.final_usage, 1_048_576);
        assert_eq!(decoded.buffer.as_deref(), Some(""));
    }

    #[test]
    fn test_decode_tolerates_surrounding_whitespace() {
        let padded = format!("\n  {}\n", VALID);
        assert!(decode_measurement(&padded).is_ok());
    }

    #[test]
    fn test_decode_empty_output() {
        assert_eq!(decode_measurement("  \n"), Err(ProtocolError::EmptyOutput));
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(
            decode_measurement("Fatal error: oops"),
            Err(ProtocolError::Malformed { .. })
        ));
        // Exactly one record: trailing data is rejected.
        let doubled = format!("{}{}", VALID, VALID);
        assert!(matches!(
            decode_measurement(&doubled),
            Err(ProtocolError::Malformed { .. })
        ));
    }

    #[test]
    fn test_decode_not_an_object() {
        assert!(matches!(
            decode_measurement("[1, 2]"),
            Err(ProtocolError::NotARecord(_))
        ));
    }

    #[test]
    fn test_decode_missing_records() {
        assert_eq!(
            decode_measurement(r#"{"mem":{"peak":1,"final":1,"real":1}}"#),
            Err(ProtocolError::MissingRecord("time"))
        );
        assert_eq!(
            decode_measurement(r#"{"time":{"net":1,"revs":1}}"#),
            Err(ProtocolError::MissingRecord("mem"))
        );
    }

    #[test]
    fn test_decode_invalid_record_shape() {
        let err = decode_measurement(
            r#"{"time":{"net":"fast","revs":1},"mem":{"peak":1,"final":1,"real":1}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidRecord { record: "time", .. }));
    }

    #[test]
    fn test_script_error_uses_stderr_verbatim() {
        let raw = RawResult::new(Some(255), None, "", "RuntimeException: boom in x.php:3\n");
        let err = raw.script_error().unwrap();
        assert_eq!(err.message, "RuntimeException: boom in x.php:3\n");
        assert_eq!(err.exit_code, Some(255));
        assert_eq!(err.to_string(), "RuntimeException: boom in x.php:3\n");
    }

    #[test]
    fn test_script_error_keeps_stdout_fatal_next_to_trace() {
        let raw = RawResult::new(
            Some(255),
            None,
            "PHP Fatal error:  Allowed memory size of 134217728 bytes exhausted in /srv/bench/SampleBench.php on line 12\n",
            "$_main:\n     ; (lines=1)\n0000 RETURN int(1)",
        );
        let err = raw.script_error().unwrap();
        assert!(err.message.contains("Allowed memory size"));
        assert!(err.message.starts_with("$_main:"));
        assert!(err.message.contains("0000 RETURN int(1)\nPHP Fatal error"));
    }

    #[test]
    fn test_script_error_fallbacks() {
        let raw = RawResult::new(Some(1), None, "PHP Parse error", "");
        assert_eq!(raw.script_error().unwrap().message, "PHP Parse error");

        let raw = RawResult::new(Some(3), None, "", "");
        assert!(raw.script_error().unwrap().message.contains("code 3"));

        let raw = RawResult::new(None, Some(9), "", "");
        assert!(raw.script_error().unwrap().message.contains("signal 9"));
    }

    #[test]
    fn test_success_has_no_script_error() {
        let raw = RawResult::new(Some(0), None, VALID, "trace");
        assert!(raw.script_error().is_none());
        assert!(raw.decode_measurement().is_ok());
    }

    #[test]
    fn test_excerpt_truncates_on_char_boundary() {
        let long = "é".repeat(300);
        let cut = excerpt(&long);
        assert!(cut.ends_with("..."));
        assert!(cut.len() <= EXCERPT_LEN + 3);

        assert_eq!(truncate_to_char_boundary("héllo", 2), "h");
        assert_eq!(truncate_to_char_boundary("héllo", 3), "hé");
        assert_eq!(truncate_to_char_boundary("abc", 10), "abc");
    }
}
