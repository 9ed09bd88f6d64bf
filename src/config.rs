// VM configuration
// Loaded from JSON; every field has a default

use serde::{Deserialize, Serialize};

use crate::error::{runtime_error, VmResult};

fn default_true() -> bool {
    true
}

fn default_hot_threshold() -> u32 {
    10
}

fn default_max_call_depth() -> usize {
    256
}

fn default_gc_threshold() -> usize {
    10_000
}

/// Cycle collector settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GcConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Tracked object count that triggers a collection
    #[serde(default = "default_gc_threshold")]
    pub threshold: usize,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: default_gc_threshold(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmConfig {
    #[serde(default = "default_true")]
    pub use_interpreter: bool,
    /// Enables the pre-decoded tier
    #[serde(default = "default_true")]
    pub use_jit: bool,
    /// Completed calls before a method is compiled
    #[serde(default = "default_hot_threshold")]
    pub hot_threshold: u32,
    #[serde(default = "default_max_call_depth")]
    pub max_call_depth: usize,
    #[serde(default)]
    pub gc: GcConfig,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            use_interpreter: true,
            use_jit: true,
            hot_threshold: default_hot_threshold(),
            max_call_depth: default_max_call_depth(),
            gc: GcConfig::default(),
        }
    }
}

impl VmConfig {
    pub fn from_json(text: &str) -> VmResult<Self> {
        let config: VmConfig = serde_json::from_str(text)
            .map_err(|e| runtime_error(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> VmResult<()> {
        if !self.use_interpreter && !self.use_jit {
            return Err(runtime_error(
                "Invalid configuration: both the interpreter and the compiled tier are disabled",
            ));
        }
        if self.max_call_depth == 0 {
            return Err(runtime_error("Invalid configuration: max_call_depth must be positive"));
        }
        Ok(())
    }
}
