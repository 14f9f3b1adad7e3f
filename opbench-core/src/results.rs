//! Execution Results
//!
//! The metric bundle a successful execution returns: exactly one time, one
//! memory and one opcode result.

use crate::error::ExecutionError;
use opbench_remote::{MemoryRecord, TimeRecord};
use serde::{Deserialize, Serialize};

/// Net time spent in the measured loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeResult {
    /// Microseconds for all revolutions, warm-up excluded
    pub net: u64,
    /// Number of timed invocations
    pub revs: u64,
}

impl TimeResult {
    pub fn new(net: u64, revs: u64) -> Self {
        Self { net, revs }
    }

    /// Net microseconds
    pub fn net_time(&self) -> u64 {
        self.net
    }

    pub fn revs(&self) -> u64 {
        self.revs
    }

    /// Mean microseconds per revolution
    pub fn time_per_revolution(&self) -> f64 {
        if self.revs == 0 {
            return 0.0;
        }
        self.net as f64 / self.revs as f64
    }
}

impl From<TimeRecord> for TimeResult {
    fn from(record: TimeRecord) -> Self {
        Self::new(record.net, record.revs)
    }
}

/// Memory usage in bytes as reported by the child
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryResult {
    pub peak: u64,
    #[serde(rename = "final")]
    pub final_usage: u64,
    pub real: u64,
}

impl MemoryResult {
    pub fn new(peak: u64, final_usage: u64, real: u64) -> Self {
        Self {
            peak,
            final_usage,
            real,
        }
    }
}

impl From<MemoryRecord> for MemoryResult {
    fn from(record: MemoryRecord) -> Self {
        Self::new(record.peak, record.final_usage, record.real)
    }
}

/// Number of compiled opcodes seen in the debug trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpcodeResult {
    pub count: u64,
}

impl OpcodeResult {
    pub fn new(count: u64) -> Self {
        Self { count }
    }
}

/// Any single metric
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricResult {
    Time(TimeResult),
    Memory(MemoryResult),
    Opcode(OpcodeResult),
}

impl MetricResult {
    /// Metric kind name
    pub fn kind(&self) -> &'static str {
        match self {
            MetricResult::Time(_) => "time",
            MetricResult::Memory(_) => "memory",
            MetricResult::Opcode(_) => "opcode",
        }
    }
}

impl From<TimeResult> for MetricResult {
    fn from(result: TimeResult) -> Self {
        MetricResult::Time(result)
    }
}

impl From<MemoryResult> for MetricResult {
    fn from(result: MemoryResult) -> Self {
        MetricResult::Memory(result)
    }
}

impl From<OpcodeResult> for MetricResult {
    fn from(result: OpcodeResult) -> Self {
        MetricResult::Opcode(result)
    }
}

/// Metrics of one execution, each present exactly once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResults {
    time: TimeResult,
    memory: MemoryResult,
    opcodes: OpcodeResult,
}

impl ExecutionResults {
    pub fn new(time: TimeResult, memory: MemoryResult, opcodes: OpcodeResult) -> Self {
        Self {
            time,
            memory,
            opcodes,
        }
    }

    /// Assemble from loose metrics, rejecting a missing or repeated kind
    pub fn from_results(
        results: impl IntoIterator<Item = MetricResult>,
    ) -> Result<Self, ExecutionError> {
        let mut time = None;
        let mut memory = None;
        let mut opcodes = None;

        for result in results {
            let kind = result.kind();
            let duplicate = match result {
                MetricResult::Time(r) => time.replace(r).is_some(),
                MetricResult::Memory(r) => memory.replace(r).is_some(),
                MetricResult::Opcode(r) => opcodes.replace(r).is_some(),
            };
            if duplicate {
                return Err(ExecutionError::DuplicateMetric(kind));
            }
        }

        Ok(Self {
            time: time.ok_or(ExecutionError::MissingMetric("time"))?,
            memory: memory.ok_or(ExecutionError::MissingMetric("memory"))?,
            opcodes: opcodes.ok_or(ExecutionError::MissingMetric("opcode"))?,
        })
    }

    pub fn time(&self) -> &TimeResult {
        &self.time
    }

    pub fn memory(&self) -> &MemoryResult {
        &self.memory
    }

    pub fn opcodes(&self) -> &OpcodeResult {
        &self.opcodes
    }

    /// All metrics in fixed order: time, memory, opcode
    pub fn metrics(&self) -> [MetricResult; 3] {
        [
            self.time.into(),
            self.memory.into(),
            self.opcodes.into(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> [MetricResult; 3] {
        [
            TimeResult::new(300, 3).into(),
            MemoryResult::new(2048, 1024, 4096).into(),
            OpcodeResult::new(42).into(),
        ]
    }

    #[test]
    fn test_from_results_any_order() {
        let mut metrics = sample();
        metrics.reverse();
        let results = ExecutionResults::from_results(metrics).unwrap();
        assert_eq!(results.time().net_time(), 300);
        assert_eq!(results.memory().peak, 2048);
        assert_eq!(results.opcodes().count, 42);
        assert_eq!(results.metrics(), sample());
    }

    #[test]
    fn test_missing_metric() {
        let [time, memory, _] = sample();
        let err = ExecutionResults::from_results([time, memory]).unwrap_err();
        assert!(matches!(err, ExecutionError::MissingMetric("opcode")));
    }

    #[test]
    fn test_duplicate_metric() {
        let [time, memory, opcodes] = sample();
        let err = ExecutionResults::from_results([time, memory, opcodes, time]).unwrap_err();
        assert!(matches!(err, ExecutionError::DuplicateMetric("time")));
    }

    #[test]
    fn test_time_per_revolution() {
        assert_eq!(TimeResult::new(300, 3).time_per_revolution(), 100.0);
        assert_eq!(TimeResult::new(0, 0).time_per_revolution(), 0.0);
    }

    #[test]
    fn test_serializes_final_key() {
        let json = serde_json::to_value(MemoryResult::new(3, 2, 1)).unwrap();
        assert_eq!(json["final"], 2);
    }
}
