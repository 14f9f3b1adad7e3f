//! Execution Context
//!
//! Immutable description of one benchmark invocation: which subject to run,
//! with which parameters and hooks, and how many times.

use opbench_remote::php_serialize;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Named set of parameter values passed to the subject and its hooks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    /// Set name (e.g. `"0"` or `"small input"`)
    pub name: String,
    /// Parameter values in declaration order
    pub values: Map<String, Value>,
}

impl ParameterSet {
    /// Create a named parameter set
    pub fn new(name: impl Into<String>, values: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    /// Values as-is
    pub fn to_unserialized_parameters(&self) -> Map<String, Value> {
        self.values.clone()
    }

    /// Each value replaced by its PHP `serialize()` string
    pub fn to_serialized_parameters(&self) -> Map<String, Value> {
        self.values
            .iter()
            .map(|(key, value)| (key.clone(), Value::String(php_serialize(value))))
            .collect()
    }

    /// Whether the set has no parameters
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// One benchmark invocation
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionContext {
    class_name: String,
    class_path: PathBuf,
    method_name: String,
    revolutions: u64,
    warmup: u64,
    before_methods: Vec<String>,
    after_methods: Vec<String>,
    parameter_set: ParameterSet,
    timeout: Option<Duration>,
}

impl ExecutionContext {
    /// Context for `class_name::method_name` defined in `class_path`,
    /// with one revolution, no warm-up, no hooks, no parameters and no timeout.
    pub fn new(
        class_name: impl Into<String>,
        class_path: impl Into<PathBuf>,
        method_name: impl Into<String>,
    ) -> Self {
        Self {
            class_name: class_name.into(),
            class_path: class_path.into(),
            method_name: method_name.into(),
            revolutions: 1,
            warmup: 0,
            before_methods: Vec::new(),
            after_methods: Vec::new(),
            parameter_set: ParameterSet::default(),
            timeout: None,
        }
    }

    pub fn with_revolutions(mut self, revolutions: u64) -> Self {
        self.revolutions = revolutions;
        self
    }

    pub fn with_warmup(mut self, warmup: u64) -> Self {
        self.warmup = warmup;
        self
    }

    pub fn with_before_methods(mut self, methods: Vec<String>) -> Self {
        self.before_methods = methods;
        self
    }

    pub fn with_after_methods(mut self, methods: Vec<String>) -> Self {
        self.after_methods = methods;
        self
    }

    pub fn with_parameter_set(mut self, parameter_set: ParameterSet) -> Self {
        self.parameter_set = parameter_set;
        self
    }

    /// Wall-clock limit for the child process; zero means unlimited
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    /// Fully-qualified class name
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// File declaring the class
    pub fn class_path(&self) -> &Path {
        &self.class_path
    }

    /// Subject method
    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    /// Timed invocations per measurement
    pub fn revolutions(&self) -> u64 {
        self.revolutions
    }

    /// Untimed invocations before measurement
    pub fn warmup(&self) -> u64 {
        self.warmup
    }

    pub fn before_methods(&self) -> &[String] {
        &self.before_methods
    }

    pub fn after_methods(&self) -> &[String] {
        &self.after_methods
    }

    pub fn parameter_set(&self) -> &ParameterSet {
        &self.parameter_set
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// `Class::method` label for logs
    pub fn subject_label(&self) -> String {
        format!("{}::{}", self.class_name, self.method_name)
    }
}
