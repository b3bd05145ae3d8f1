// External imports
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

// Internal imports
use crate::checkpoint::Selector;
use crate::constants::{
    DEFAULT_PRUNE_BANDS, DEFAULT_QUANTIZE_SELECTORS, DEFAULT_TEMPERATURE, FIXED_SCALE_FACTOR,
};
use crate::error::{GruPruneError, Result};
use crate::util::prune::{PruneMode, PruneRule};

/// How float weights are mapped to int8.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuantScheme {
    /// Per-tensor scale from the largest magnitude
    Symmetric,
    /// Constant multiplier, truncated and clamped
    Fixed { factor: f32 },
}

impl Default for QuantScheme {
    fn default() -> Self {
        QuantScheme::Symmetric
    }
}

impl QuantScheme {
    pub fn fixed_default() -> Self {
        QuantScheme::Fixed {
            factor: FIXED_SCALE_FACTOR,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizeConfig {
    #[serde(default = "default_quantize_selectors")]
    pub selectors: Vec<Selector>,
    #[serde(default)]
    pub scheme: QuantScheme,
}

impl Default for QuantizeConfig {
    fn default() -> Self {
        Self {
            selectors: default_quantize_selectors(),
            scheme: QuantScheme::default(),
        }
    }
}

fn default_quantize_selectors() -> Vec<Selector> {
    DEFAULT_QUANTIZE_SELECTORS
        .iter()
        .map(|s| Selector::Contains(s.to_string()))
        .collect()
}

pub fn default_prune_rules() -> Vec<PruneRule> {
    DEFAULT_PRUNE_BANDS
        .iter()
        .map(|(name, lower, upper)| PruneRule {
            selector: Selector::Exact(name.to_string()),
            mode: PruneMode::Band {
                lower: *lower,
                upper: *upper,
            },
        })
        .collect()
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

/// # Tool Configuration
///
/// Settings shared by the `prune`, `quantize` and `basecall` commands. Every
/// field has a default, so an empty JSON object is a valid configuration.
///
/// ```json
/// {
///   "prune": [
///     { "selector": { "exact": "sublayers.1.layer.cudnn_gru.weight_hh_l0" },
///       "mode": "band", "lower": -0.08, "upper": 0.14 }
///   ],
///   "quantize": { "selectors": [{ "contains": "linear.weight" }], "scheme": { "kind": "symmetric" } },
///   "temperature": 1.0
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolConfig {
    #[serde(default = "default_prune_rules")]
    pub prune: Vec<PruneRule>,
    #[serde(default)]
    pub quantize: QuantizeConfig,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            prune: default_prune_rules(),
            quantize: QuantizeConfig::default(),
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

impl ToolConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: ToolConfig = serde_json::from_str(&text)?;
        config.validate()?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.temperature > 0.0 && self.temperature.is_finite()) {
            return Err(GruPruneError::InvalidConfig(format!(
                "temperature must be positive, got {}",
                self.temperature
            )));
        }
        for rule in &self.prune {
            rule.mode.validate()?;
        }
        if let QuantScheme::Fixed { factor } = self.quantize.scheme {
            if !(factor > 0.0 && factor.is_finite()) {
                return Err(GruPruneError::InvalidConfig(format!(
                    "fixed quantization factor must be positive, got {factor}"
                )));
            }
        }
        Ok(())
    }
}
