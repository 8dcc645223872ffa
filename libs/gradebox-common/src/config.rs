// Grader configuration
use crate::compare::CompareOptions;
use crate::protocol::IsolateLimits;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/gradebox.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraderConfig {
    /// Wall-clock budget for one compile check or one invocation
    pub time_budget_ms: u64,
    pub recursion_limit: usize,
    /// Returned values nested deeper than this are reported as opaque
    pub max_value_depth: usize,
    pub max_console_lines: usize,
    pub max_source_bytes: usize,
    /// Globals left visible to user code; everything else is removed
    pub allowed_globals: Vec<String>,
    pub compare: CompareOptions,
    pub clear_results_on_edit: bool,
    /// Isolate binary; resolved by the front end when unset
    pub worker_path: Option<PathBuf>,
}

impl Default for GraderConfig {
    fn default() -> Self {
        Self {
            time_budget_ms: 3000,
            recursion_limit: 1024,
            max_value_depth: 1000,
            max_console_lines: 200,
            max_source_bytes: 1024 * 1024,
            allowed_globals: default_allowed_globals(),
            compare: CompareOptions::default(),
            clear_results_on_edit: false,
            worker_path: None,
        }
    }
}

fn default_allowed_globals() -> Vec<String> {
    [
        "globalThis", "undefined", "NaN", "Infinity",
        "Object", "Array", "Number", "String", "Boolean", "Symbol", "BigInt",
        "Math", "JSON", "Date", "RegExp", "Map", "Set", "WeakMap", "WeakSet", "Reflect",
        "Promise", "Proxy",
        "Error", "TypeError", "RangeError", "SyntaxError", "ReferenceError", "EvalError",
        "URIError", "AggregateError",
        "parseInt", "parseFloat", "isNaN", "isFinite",
        "encodeURIComponent", "decodeURIComponent", "encodeURI", "decodeURI",
        "ArrayBuffer", "DataView", "Int8Array", "Uint8Array", "Uint8ClampedArray",
        "Int16Array", "Uint16Array", "Int32Array", "Uint32Array", "Float32Array",
        "Float64Array", "BigInt64Array", "BigUint64Array",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl GraderConfig {
    /// Load configuration from a JSON file
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Grader config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        let config: GraderConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load from `config_path`, or fall back to defaults when it does not exist
    pub fn load_or_default(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            Self::load(config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.time_budget_ms == 0 {
            bail!("time_budget_ms must be greater than zero");
        }
        if self.recursion_limit == 0 {
            bail!("recursion_limit must be greater than zero");
        }
        if self.max_value_depth == 0 {
            bail!("max_value_depth must be greater than zero");
        }
        if self.max_source_bytes == 0 {
            bail!("max_source_bytes must be greater than zero");
        }
        Ok(())
    }

    pub fn time_budget(&self) -> Duration {
        Duration::from_millis(self.time_budget_ms)
    }

    pub fn isolate_limits(&self) -> IsolateLimits {
        IsolateLimits {
            recursion_limit: self.recursion_limit,
            max_value_depth: self.max_value_depth,
            max_console_lines: self.max_console_lines,
            allowed_globals: self.allowed_globals.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GraderConfig::default();
        assert_eq!(config.time_budget(), Duration::from_secs(3));
        assert!(config.allowed_globals.iter().any(|g| g == "Math"));
        assert!(!config.allowed_globals.iter().any(|g| g == "eval"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_code_evaluating_globals_not_allowed_by_default() {
        let config = GraderConfig::default();
        for name in ["eval", "Function"] {
            assert!(!config.allowed_globals.iter().any(|g| g == name), "{} is allowed", name);
        }
        assert!(config.allowed_globals.iter().any(|g| g == "Object"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: GraderConfig =
            serde_json::from_str(r#"{"time_budget_ms": 500, "compare": {"nan_equals_nan": false}}"#)
                .unwrap();
        assert_eq!(config.time_budget_ms, 500);
        assert_eq!(config.recursion_limit, 1024);
        assert!(!config.compare.nan_equals_nan);
        assert!(!config.compare.distinguish_negative_zero);
    }

    #[test]
    fn test_zero_budget_rejected() {
        let config = GraderConfig { time_budget_ms: 0, ..GraderConfig::default() };
        assert!(config.validate().is_err());
        let config = GraderConfig { max_value_depth: 0, ..GraderConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = GraderConfig::load_or_default(Path::new("does/not/exist.json")).unwrap();
        assert_eq!(config, GraderConfig::default());
        assert!(GraderConfig::load(Path::new("does/not/exist.json")).is_err());
    }
}
