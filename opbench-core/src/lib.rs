//! opbench Core - Opcode Execution
//!
//! This crate turns one benchmark subject into a set of metrics:
//! - `ExecutionContext` / `ParameterSet` describing what to run
//! - `ExecutionConfig` with the executor's two options
//! - `OpcodeExecutor` running the subject out of process
//! - `OpcodeDebugParser` counting instructions in the opcache debug dump
//! - `ExecutionResults` holding exactly one time, memory and opcode metric

mod config;
mod context;
mod error;
mod executor;
mod opcache;
mod results;

pub use config::{ExecutionConfig, OPTION_PHP_CONFIG, OPTION_SAFE_PARAMETERS};
pub use context::{ExecutionContext, ParameterSet};
pub use error::ExecutionError;
pub use executor::{OpcodeExecutor, REMOTE_TEMPLATE, baseline_php_config, create_tokens};
pub use opcache::{OpcodeDebugParser, TraceParser};
pub use results::{ExecutionResults, MemoryResult, MetricResult, OpcodeResult, TimeResult};
