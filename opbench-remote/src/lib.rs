#![warn(missing_docs)]
//! opbench Remote Execution
//!
//! Out-of-process plumbing between the harness and a PHP child process:
//! - PHP literal encoding for script tokens (`PhpLiteral`, `php_serialize`)
//! - `{{ token }}` template rendering
//! - Child process launching with ini overrides, timeout and process-group teardown
//! - Decoding of the JSON result record the child prints on stdout

mod launcher;
mod literal;
mod protocol;
mod template;

pub use launcher::{IniValue, LaunchPayload, Launcher, PhpConfig, RemoteError};
pub use literal::{PhpLiteral, php_serialize};
pub use protocol::{
    DecodedMeasurement, MemoryRecord, ProtocolError, RawResult, ScriptError, TimeRecord,
    decode_measurement, truncate_to_char_boundary,
};
pub use template::{ScriptTokens, TemplateError, TemplateSource, render};

/// Ini flag used to pass a single runtime setting to the PHP binary.
pub const INI_FLAG: &str = "-d";

/// Flag that tells the PHP binary to ignore every php.ini file.
pub const DISABLE_INI_FLAG: &str = "-n";
