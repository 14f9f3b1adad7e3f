//! Opcache Debug Trace Parsing
//!
//! With `opcache.opt_debug_level` set, PHP dumps the compiled opcodes of every
//! function to stderr, one block per function:
//!
//! ```text
//! $_main:
//!      ; (lines=3, args=0, vars=1, tmps=1)
//!      ; (after optimizer)
//!      ; /srv/bench/SampleBench.php:1-9
//! 0000 ASSIGN CV0($x) int(1)
//! 0001 ECHO CV0($x)
//! 0002 RETURN int(1)
//! ```
//!
//! The dump is an internal debugging aid, not a stable format, so parsing is a
//! line scan for numbered instruction lines rather than a structural parse.

use regex::Regex;
use std::sync::LazyLock;

/// Numbered instruction: zero-padded op number, whitespace, then the opcode and
/// any annotation columns. Live-range (`0: 0001 - 0002`) and exception-table
/// (`0003, 0005, ...`) rows do not have this shape.
static INSTRUCTION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*[0-9]{4,}[ \t]+[A-Z]").expect("instruction pattern is valid")
});

/// Any line of the dump: instructions, function headers, `;` annotations,
/// and the live-range and exception tables with their headings.
static DUMP_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:[ \t]*[0-9]{4,}[ \t]+[A-Z].*|[ \t]+; .*|\S+:|LIVE RANGES:|EXCEPTION TABLE:|[ \t]+[0-9]+: [0-9]{4,} - [0-9]{4,}.*|[ \t]+[0-9]{4,}, .*)\r?$",
    )
    .expect("dump line pattern is valid")
});

/// Converts a debug trace into an instruction count
pub trait TraceParser {
    /// Count instruction records across the whole trace
    fn count_opcodes(&self, trace: &str) -> u64;

    /// Remove the trace from `text`, keeping any other diagnostics
    fn strip_trace(&self, text: &str) -> String {
        text.to_string()
    }
}

/// Parser for the opcache optimizer debug dump
#[derive(Debug, Clone, Copy, Default)]
pub struct OpcodeDebugParser;

impl OpcodeDebugParser {
    pub fn new() -> Self {
        Self
    }
}

impl TraceParser for OpcodeDebugParser {
    fn count_opcodes(&self, trace: &str) -> u64 {
        INSTRUCTION_LINE.find_iter(trace).count() as u64
    }

    fn strip_trace(&self, text: &str) -> String {
        text.lines()
            .filter(|line| !line.trim().is_empty() && !DUMP_LINE.is_match(line))
            .map(|line| format!("{line}\n"))
            .collect()
    }
}
