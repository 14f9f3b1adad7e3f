//! Opcode Executor
//!
//! Runs one benchmark subject in a fresh PHP process and turns its output into
//! time, memory and opcode metrics:
//!
//! 1. Encode the context as script tokens
//! 2. Launch the rendered template with the opcache debug trace enabled
//! 3. Decode the JSON record on stdout
//! 4. Count opcodes in the trace on stderr
//! 5. Assemble the results

use crate::config::ExecutionConfig;
use crate::context::ExecutionContext;
use crate::error::ExecutionError;
use crate::opcache::{OpcodeDebugParser, TraceParser};
use crate::results::{ExecutionResults, MemoryResult, OpcodeResult, TimeResult};
use opbench_remote::{
    IniValue, Launcher, PhpConfig, PhpLiteral, ProtocolError, RemoteError, ScriptTokens,
    TemplateSource, truncate_to_char_boundary,
};
use serde_json::{Map, Value};
use std::time::Instant;
use tracing::{debug, warn};

/// Template bundled with the crate
pub const REMOTE_TEMPLATE: &str = include_str!("../templates/remote.template");

/// Longest captured-output excerpt included in a log line
const BUFFER_EXCERPT_LEN: usize = 200;

/// Ini settings every opcode run needs: no execution time limit, and opcache
/// enabled on the CLI with the optimizer dump on stderr.
pub fn baseline_php_config() -> PhpConfig {
    PhpConfig::from([
        ("max_execution_time".to_string(), IniValue::Int(0)),
        ("opcache.enable_cli".to_string(), IniValue::Int(1)),
        ("opcache.opt_debug_level".to_string(), IniValue::from("0x10000")),
    ])
}

/// Parameter values in the encoding the template expects
fn resolve_parameters(context: &ExecutionContext, config: &ExecutionConfig) -> Map<String, Value> {
    if config.safe_parameters {
        context.parameter_set().to_serialized_parameters()
    } else {
        context.parameter_set().to_unserialized_parameters()
    }
}

/// Encode the context as template tokens. Pure: touches no files or processes.
pub fn create_tokens(context: &ExecutionContext, config: &ExecutionConfig) -> ScriptTokens {
    ScriptTokens::new()
        .with("class", PhpLiteral::string(context.class_name()))
        .with(
            "file",
            PhpLiteral::string(&context.class_path().to_string_lossy()),
        )
        .with("subject", PhpLiteral::string(context.method_name()))
        .with("revolutions", PhpLiteral::uint(context.revolutions()))
        .with("warmup", PhpLiteral::uint(context.warmup()))
        .with("beforeMethods", PhpLiteral::list(context.before_methods()))
        .with("afterMethods", PhpLiteral::list(context.after_methods()))
        .with(
            "parameters",
            PhpLiteral::map(&resolve_parameters(context, config)),
        )
        .with(
            "serializedParameters",
            PhpLiteral::bool(config.safe_parameters),
        )
}

fn validate(context: &ExecutionContext) -> Result<(), ExecutionError> {
    if context.revolutions() == 0 {
        return Err(ExecutionError::InvalidContext(format!(
            "{} needs at least one revolution",
            context.subject_label()
        )));
    }
    if context.class_name().is_empty() || context.method_name().is_empty() {
        return Err(ExecutionError::InvalidContext(
            "class and subject names must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Executes subjects out of process and reports opcode counts alongside
/// time and memory.
#[derive(Debug, Clone)]
pub struct OpcodeExecutor<P: TraceParser = OpcodeDebugParser> {
    launcher: Launcher,
    parser: P,
    template: TemplateSource,
}

impl OpcodeExecutor<OpcodeDebugParser> {
    /// Executor using the bundled template and the opcache dump parser
    pub fn new(launcher: Launcher) -> Self {
        Self::with_parser(launcher, OpcodeDebugParser::new())
    }
}

impl<P: TraceParser> OpcodeExecutor<P> {
    pub fn with_parser(launcher: Launcher, parser: P) -> Self {
        Self {
            launcher,
            parser,
            template: TemplateSource::from(REMOTE_TEMPLATE),
        }
    }

    /// Replace the bundled template
    pub fn with_template(mut self, template: impl Into<TemplateSource>) -> Self {
        self.template = template.into();
        self
    }

    pub fn launcher(&self) -> &Launcher {
        &self.launcher
    }

    /// Drop the opcode dump from a failed script's diagnostic
    fn without_trace(&self, err: RemoteError) -> RemoteError {
        match err {
            RemoteError::Script(mut error) => {
                let stripped = self.parser.strip_trace(&error.message);
                if !stripped.trim().is_empty() {
                    error.message = stripped;
                }
                RemoteError::Script(error)
            }
            other => other,
        }
    }

    /// Run one subject and collect its metrics.
    ///
    /// Blocks until the child exits or is killed on timeout. Each call
    /// builds its own payload, so calls may run concurrently.
    pub fn execute(
        &self,
        context: &ExecutionContext,
        config: &ExecutionConfig,
    ) -> Result<ExecutionResults, ExecutionError> {
        validate(context)?;

        let tokens = create_tokens(context, config);
        let mut payload = self
            .launcher
            .payload(self.template.clone(), tokens, context.timeout());
        payload.merge_php_config(baseline_php_config());
        payload.merge_php_config(config.php_config.clone());

        let subject = context.subject_label();
        debug!(%subject, revs = context.revolutions(), warmup = context.warmup(), "executing subject");
        let start = Instant::now();

        let raw = payload.launch_result().map_err(|err| self.without_trace(err))?;
        let measurement = raw.decode_measurement()?;

        if measurement.time.revs != context.revolutions() {
            return Err(ProtocolError::RevolutionMismatch {
                expected: context.revolutions(),
                actual: measurement.time.revs,
            }
            .into());
        }

        if let Some(buffer) = measurement.buffer.as_deref().filter(|b| !b.is_empty()) {
            warn!(
                %subject,
                bytes = buffer.len(),
                output = truncate_to_char_boundary(buffer, BUFFER_EXCERPT_LEN),
                "benchmark script printed output"
            );
        }

        let opcodes = self.parser.count_opcodes(raw.stderr());
        debug!(
            %subject,
            net_us = measurement.time.net,
            opcodes,
            elapsed = ?start.elapsed(),
            "subject executed"
        );

        ExecutionResults::from_results([
            OpcodeResult::new(opcodes).into(),
            TimeResult::from(measurement.time).into(),
            MemoryResult::from(measurement.mem).into(),
        ])
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::context::ParameterSet;
    use serde_json::json;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Stand-in interpreter: echoes ini overrides to stderr, runs the script with /bin/sh
    const FAKE_PHP: &str = r#"#!/bin/sh
while [ $# -gt 1 ]; do
  case "$1" in
    -d) echo "ini $2" >&2; shift 2 ;;
    -n) shift ;;
    *) break ;;
  esac
done
exec /bin/sh "$1"
"#;

    /// Shell stand-in for the PHP template: reports `revolutions` with 100us
    /// each and prints a three-instruction trace.
    const SH_TEMPLATE: &str = r#"REVS={{ revolutions }}
echo "tokens class={{ class }} subject={{ subject }} warmup={{ warmup }}" >&2
cat >&2 <<'TRACE'
$_main:
     ; (lines=3, args=0, vars=0, tmps=1)
     ; (after optimizer)
0000 INIT_FCALL 0 80 string("run")
0001 DO_UCALL
0002 RETURN int(1)
TRACE
printf '{"mem":{"peak":2048,"final":1024,"real":4096},"time":{"net":%d,"revs":%d},"buffer":""}\n' $((REVS * 100)) "$REVS"
"#;

    fn fake_launcher(dir: &TempDir) -> Launcher {
        let path = dir.path().join("php");
        std::fs::write(&path, FAKE_PHP).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        Launcher::new(path.to_string_lossy().into_owned())
    }

    fn executor(dir: &TempDir, template: &'static str) -> OpcodeExecutor {
        OpcodeExecutor::new(fake_launcher(dir)).with_template(template)
    }

    fn context() -> ExecutionContext {
        ExecutionContext::new("SampleBench", "bench/SampleBench.php", "run")
            .with_revolutions(3)
            .with_warmup(1)
            .with_timeout(Some(Duration::from_secs(10)))
    }

    #[test]
    fn test_create_tokens() {
        let Value::Object(values) = json!({"size": 10}) else {
            unreachable!()
        };
        let context = context()
            .with_before_methods(vec!["setUp".to_string()])
            .with_parameter_set(ParameterSet::new("default", values));

        let tokens = create_tokens(&context, &ExecutionConfig::default());
        let get = |name: &str| tokens.get(name).unwrap().as_str().to_string();
        assert_eq!(get("class"), "'SampleBench'");
        assert_eq!(get("file"), "'bench/SampleBench.php'");
        assert_eq!(get("subject"), "'run'");
        assert_eq!(get("revolutions"), "3");
        assert_eq!(get("warmup"), "1");
        assert_eq!(get("beforeMethods"), "array(0 => 'setUp')");
        assert_eq!(get("afterMethods"), "array()");
        assert_eq!(get("parameters"), "array('size' => 10)");
        assert_eq!(get("serializedParameters"), "false");
    }

    #[test]
    fn test_create_tokens_safe_parameters() {
        let Value::Object(values) = json!({"size": 10}) else {
            unreachable!()
        };
        let context = context().with_parameter_set(ParameterSet::new("default", values));
        let config = ExecutionConfig {
            safe_parameters: true,
            ..Default::default()
        };

        let tokens = create_tokens(&context, &config);
        assert_eq!(tokens.get("parameters").unwrap().as_str(), "array('size' => 'i:10;')");
        assert_eq!(tokens.get("serializedParameters").unwrap().as_str(), "true");
    }

    #[test]
    fn test_bundled_template_renders() {
        let tokens = create_tokens(&context(), &ExecutionConfig::default())
            .with("bootstrap", PhpLiteral::null());
        let script = opbench_remote::render(REMOTE_TEMPLATE, &tokens).unwrap();
        assert!(script.starts_with("<?php"));
        assert!(script.contains("$revolutions = 3;"));
        assert!(script.contains("$class = 'SampleBench';"));
        assert!(!script.contains("{{"));
    }

    #[test]
    fn test_bundled_template_buffers_all_output() {
        let tokens = create_tokens(&context(), &ExecutionConfig::default())
            .with("bootstrap", PhpLiteral::null());
        let script = opbench_remote::render(REMOTE_TEMPLATE, &tokens).unwrap();
        let position = |needle: &str| {
            script
                .find(needle)
                .unwrap_or_else(|| panic!("{needle} missing from template"))
        };

        let opened = position("ob_start()");
        assert!(opened < position("require_once($bootstrap)"));
        assert!(opened < position("require_once($file)"));
        assert!(opened < position("foreach ($beforeMethods"));

        let closed = position("$buffer = ob_get_clean()");
        assert!(closed > position("foreach ($afterMethods"));
        assert!(closed < position("echo json_encode"));
        assert_eq!(script.matches("ob_start()").count(), 1);
    }

    #[test]
    fn test_execute() {
        let dir = TempDir::new().unwrap();
        let results = executor(&dir, SH_TEMPLATE)
            .execute(&context(), &ExecutionConfig::default())
            .unwrap();

        assert_eq!(results.time().revs(), 3);
        assert_eq!(results.time().net_time(), 300);
        assert_eq!(results.memory().peak, 2048);
        assert_eq!(results.memory().final_usage, 1024);
        assert_eq!(results.opcodes().count, 3);
    }

    #[test]
    fn test_execute_passes_ini_overrides() {
        let template = r#"echo "ini-check" >&2
printf '{"mem":{"peak":1,"final":1,"real":1},"time":{"net":1,"revs":1},"buffer":""}\n'
"#;
        let dir = TempDir::new().unwrap();
        let mut php_config = PhpConfig::new();
        php_config.insert("max_execution_time".to_string(), IniValue::Int(100));
        php_config.insert("memory_limit".to_string(), IniValue::from("1G"));
        let config = ExecutionConfig {
            php_config,
            safe_parameters: false,
        };

        let mut launcher_config = PhpConfig::new();
        launcher_config.insert("opcache.enable_cli".to_string(), IniValue::Int(0));
        let executor = OpcodeExecutor::new(fake_launcher(&dir).with_php_config(launcher_config))
            .with_template(template);

        // The trace only holds the ini echo lines, none of which are instructions.
        let context = ExecutionContext::new("A", "a.php", "b");
        let results = executor.execute(&context, &config).unwrap();
        assert_eq!(results.opcodes().count, 0);

        let payload = {
            let mut payload = executor
                .launcher()
                .payload(template, ScriptTokens::new(), None);
            payload.merge_php_config(baseline_php_config());
            payload.merge_php_config(config.php_config.clone());
            payload
        };
        let ini = payload.php_config();
        assert_eq!(ini["max_execution_time"], IniValue::Int(100));
        assert_eq!(ini["opcache.enable_cli"], IniValue::Int(1));
        assert_eq!(ini["opcache.opt_debug_level"], IniValue::from("0x10000"));
        assert_eq!(ini["memory_limit"], IniValue::from("1G"));
    }

    #[test]
    fn test_script_error_message_verbatim() {
        let template = "echo 'RuntimeException: broken subject in SampleBench.php:12' >&2\nexit 255\n";
        let dir = TempDir::new().unwrap();
        let err = executor(&dir, template)
            .execute(&context(), &ExecutionConfig::default())
            .unwrap_err();

        match err {
            ExecutionError::Script { message, exit_code } => {
                assert!(message.ends_with("RuntimeException: broken subject in SampleBench.php:12\n"));
                assert_eq!(exit_code, Some(255));
            }
            other => panic!("expected script error, got {:?}", other),
        }
    }

    #[test]
    fn test_script_error_drops_trace_keeps_fatal() {
        let template = r#"cat >&2 <<'TRACE'
$_main:
     ; (lines=2, args=0, vars=0, tmps=1)
0000 INIT_FCALL 0 80 string("run")
0001 RETURN int(1)
TRACE
echo 'PHP Fatal error:  Allowed memory size of 134217728 bytes exhausted in SampleBench.php on line 12'
exit 255
"#;
        let dir = TempDir::new().unwrap();
        let err = executor(&dir, template)
            .execute(&context(), &ExecutionConfig::default())
            .unwrap_err();

        match err {
            ExecutionError::Script { message, exit_code } => {
                assert!(message.contains("Allowed memory size of 134217728 bytes exhausted"));
                assert!(!message.contains("INIT_FCALL"));
                assert!(!message.contains("$_main:"));
                assert_eq!(exit_code, Some(255));
            }
            other => panic!("expected script error, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_output_is_protocol_error() {
        let dir = TempDir::new().unwrap();
        for template in ["echo 'not json'\n", "true\n", "echo '{\"time\":{\"net\":1,\"revs\":3}}'\n"] {
            let err = executor(&dir, template)
                .execute(&context(), &ExecutionConfig::default())
                .unwrap_err();
            assert!(
                matches!(err, ExecutionError::Protocol(_)),
                "{template:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_revolution_mismatch() {
        let template = r#"printf '{"mem":{"peak":1,"final":1,"real":1},"time":{"net":10,"revs":1},"buffer":""}\n'
"#;
        let dir = TempDir::new().unwrap();
        let err = executor(&dir, template)
            .execute(&context(), &ExecutionConfig::default())
            .unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::Protocol(ProtocolError::RevolutionMismatch {
                expected: 3,
                actual: 1
            })
        ));
    }

    #[test]
    fn test_subject_output_is_ignored() {
        let template = r#"printf '{"mem":{"peak":1,"final":1,"real":1},"time":{"net":10,"revs":3},"buffer":"hello"}\n'
"#;
        let dir = TempDir::new().unwrap();
        let results = executor(&dir, template)
            .execute(&context(), &ExecutionConfig::default())
            .unwrap();
        assert_eq!(results.time().net_time(), 10);
    }

    #[test]
    fn test_timeout() {
        let dir = TempDir::new().unwrap();
        let context = context().with_timeout(Some(Duration::from_millis(200)));
        let start = Instant::now();
        let err = executor(&dir, "sleep 30\n")
            .execute(&context, &ExecutionConfig::default())
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_zero_revolutions_rejected() {
        let dir = TempDir::new().unwrap();
        let err = executor(&dir, SH_TEMPLATE)
            .execute(&context().with_revolutions(0), &ExecutionConfig::default())
            .unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidContext(_)));
    }

    #[test]
    fn test_independent_concurrent_executions() {
        let dir = TempDir::new().unwrap();
        let executor = executor(&dir, SH_TEMPLATE);
        std::thread::scope(|scope| {
            let handles: Vec<_> = (1..=4u64)
                .map(|revs| {
                    let executor = &executor;
                    scope.spawn(move || {
                        executor
                            .execute(&context().with_revolutions(revs), &ExecutionConfig::default())
                            .unwrap()
                    })
                })
                .collect();
            for (revs, handle) in (1..=4u64).zip(handles) {
                let results = handle.join().unwrap();
                assert_eq!(results.time().revs(), revs);
                assert_eq!(results.time().net_time(), revs * 100);
            }
        });
    }
}
