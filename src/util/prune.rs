// External imports
use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

// Internal imports
use crate::checkpoint::{Checkpoint, Parameter, Selector};
use crate::error::{GruPruneError, Result};

/// # Prune Mode
///
/// Which weights a rule sets to zero:
///
/// - **Band**: every `w` with `lower < w < upper`; the bounds themselves survive
/// - **Magnitude**: every `w` with `|w| < threshold`
/// - **KeepAbove**: every `w <= threshold`, negative weights included
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PruneMode {
    Band { lower: f32, upper: f32 },
    Magnitude { threshold: f32 },
    KeepAbove { threshold: f32 },
}

impl PruneMode {
    #[inline]
    pub fn zeroes(&self, w: f32) -> bool {
        match *self {
            PruneMode::Band { lower, upper } => w > lower && w < upper,
            PruneMode::Magnitude { threshold } => w.abs() < threshold,
            PruneMode::KeepAbove { threshold } => w <= threshold,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match *self {
            PruneMode::Band { lower, upper } if !(lower < upper) => Err(
                GruPruneError::InvalidConfig(format!("empty band ({lower}, {upper})")),
            ),
            PruneMode::Magnitude { threshold } if !(threshold >= 0.0) => Err(
                GruPruneError::InvalidConfig(format!("negative magnitude threshold {threshold}")),
            ),
            PruneMode::KeepAbove { threshold } if threshold.is_nan() => Err(
                GruPruneError::InvalidConfig("threshold is NaN".to_string()),
            ),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for PruneMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PruneMode::Band { lower, upper } => write!(f, "band({lower}, {upper})"),
            PruneMode::Magnitude { threshold } => write!(f, "|w| < {threshold}"),
            PruneMode::KeepAbove { threshold } => write!(f, "w <= {threshold}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PruneRule {
    pub selector: Selector,
    #[serde(flatten)]
    pub mode: PruneMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PruneEntry {
    pub parameter: String,
    pub mode: PruneMode,
    pub zeroed: usize,
    pub total: usize,
    pub percent: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PruneReport {
    pub entries: Vec<PruneEntry>,
}

impl PruneReport {
    pub fn total_zeroed(&self) -> usize {
        self.entries.iter().map(|e| e.zeroed).sum()
    }
}

impl fmt::Display for PruneReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(
                f,
                "{}\t{}\t{}/{}\t{}",
                entry.parameter, entry.mode, entry.zeroed, entry.total, entry.percent
            )?;
        }
        Ok(())
    }
}

/// Zeroes every value the mode selects and returns how many it selected.
///
/// Values that are already zero and fall inside the zeroing region are counted.
/// A second pass never changes a value. It reports the same count only when
/// zero lies inside the region; otherwise it reports zero.
pub fn prune_tensor(values: &mut [f32], mode: PruneMode) -> usize {
    let mut zeroed = 0;
    for w in values.iter_mut() {
        if mode.zeroes(*w) {
            *w = 0.0;
            zeroed += 1;
        }
    }
    zeroed
}

fn percent(zeroed: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        (zeroed * 100) as f64 / total as f64
    }
}

/// # Prune Checkpoint
///
/// Applies every rule to every float parameter its selector matches. Rules are
/// applied in order, so a parameter matched by two rules sees both. Parameters
/// are processed in parallel with rayon.
///
/// # Arguments
///
/// * `checkpoint` - Checkpoint to rewrite in place
/// * `rules` - Pruning rules; each must match at least one parameter
///
/// # Returns
///
/// One entry per (rule, parameter) pair, ordered by rule and then by name
pub fn prune(checkpoint: &mut Checkpoint, rules: &[PruneRule]) -> Result<PruneReport> {
    for rule in rules {
        rule.mode.validate()?;
        if checkpoint.select(&rule.selector).is_empty() {
            return Err(GruPruneError::NoMatch(rule.selector.to_string()));
        }
    }

    let mut entries: Vec<(usize, PruneEntry)> = checkpoint
        .parameters_mut()
        .par_iter_mut()
        .flat_map_iter(|(name, parameter)| {
            let applicable: Vec<(usize, &PruneRule)> = rules
                .iter()
                .enumerate()
                .filter(|(_, rule)| rule.selector.matches(name))
                .collect();
            let mut local = Vec::with_capacity(applicable.len());
            match parameter {
                Parameter::Float { values, .. } => {
                    for (index, rule) in applicable {
                        let zeroed = prune_tensor(values, rule.mode);
                        local.push((
                            index,
                            PruneEntry {
                                parameter: name.clone(),
                                mode: rule.mode,
                                zeroed,
                                total: values.len(),
                                percent: percent(zeroed, values.len()),
                            },
                        ));
                    }
                }
                Parameter::Quantized(_) if !applicable.is_empty() => {
                    warn!("Skipping quantized parameter {name}");
                }
                Parameter::Quantized(_) => {}
            }
            local
        })
        .collect();
    entries.sort_by(|(ia, a), (ib, b)| ia.cmp(ib).then_with(|| a.parameter.cmp(&b.parameter)));

    let report = PruneReport {
        entries: entries.into_iter().map(|(_, entry)| entry).collect(),
    };
    for entry in &report.entries {
        info!(
            "Pruned {} with {}: {:.2}% zero",
            entry.parameter, entry.mode, entry.percent
        );
    }
    checkpoint.record(format!(
        "prune: {}",
        rules
            .iter()
            .map(|r| format!("{} {}", r.selector, r.mode))
            .collect::<Vec<_>>()
            .join("; ")
    ));
    Ok(report)
}
