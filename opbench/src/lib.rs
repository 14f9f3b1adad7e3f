#![warn(missing_docs)]
//! # opbench
//!
//! Micro-benchmarks for PHP subjects, each run in a fresh, isolated PHP process:
//! - **Process Isolation**: one child per subject, own process group, killed on timeout
//! - **Opcode Counting**: compiled instruction count from the opcache optimizer dump
//! - **Time and Memory**: net microseconds for the timed revolutions, peak/final/real memory
//! - **Safe Script Generation**: every token is a self-escaping PHP literal
//!
//! ## Quick Start
//!
//! ```no_run
//! use opbench::prelude::*;
//!
//! let executor = OpcodeExecutor::new(Launcher::default());
//! let context = ExecutionContext::new("SampleBench", "bench/SampleBench.php", "run")
//!     .with_revolutions(3)
//!     .with_warmup(1);
//!
//! let results = executor.execute(&context, &ExecutionConfig::default())?;
//! println!("{} opcodes", results.opcodes().count);
//! # Ok::<(), opbench::ExecutionError>(())
//! ```

// Re-export core types
pub use opbench_core::{
    ExecutionConfig, ExecutionContext, ExecutionError, ExecutionResults, MemoryResult,
    MetricResult, OpcodeDebugParser, OpcodeExecutor, OpcodeResult, ParameterSet, TimeResult,
    TraceParser, baseline_php_config, create_tokens,
};

// Re-export remote execution types
pub use opbench_remote::{
    IniValue, LaunchPayload, Launcher, PhpConfig, PhpLiteral, ProtocolError, RawResult,
    RemoteError, ScriptError, ScriptTokens, TemplateSource,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        ExecutionConfig, ExecutionContext, ExecutionError, ExecutionResults, Launcher,
        OpcodeExecutor, ParameterSet,
    };
}

/// Run the opbench CLI.
///
/// Call this from a binary's `main()`:
/// ```ignore
/// fn main() {
///     opbench::run().unwrap();
/// }
/// ```
pub use opbench_cli::run;
