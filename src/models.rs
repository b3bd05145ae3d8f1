use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::GruPruneError;

/// # Model Type
///
/// The basecalling models a checkpoint can hold. Flip-flop models emit
/// transition scores that `basecaller::step_4_global_norm` and
/// `basecaller::step_5_decoding` understand; run-length models are recognised
/// so their checkpoints can still be inspected, pruned and quantized, but they
/// are rejected for evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    R941Native,
    #[serde(rename = "r941_5mC")]
    R941FiveMc,
    R10cPcr,
    RleR941Native,
    #[serde(rename = "newrle_r941_native")]
    NewRleR941Native,
}

impl ModelType {
    pub const ALL: [ModelType; 5] = [
        ModelType::R941Native,
        ModelType::R941FiveMc,
        ModelType::R10cPcr,
        ModelType::RleR941Native,
        ModelType::NewRleR941Native,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::R941Native => "r941_native",
            ModelType::R941FiveMc => "r941_5mC",
            ModelType::R10cPcr => "r10c_pcr",
            ModelType::RleR941Native => "rle_r941_native",
            ModelType::NewRleR941Native => "newrle_r941_native",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ModelType::R941Native => "R9.4.1 model for MinION.  Trained from native DNA library",
            ModelType::R941FiveMc => {
                "R9.4.1 model for PromethION; 5mC aware.  Trained from native NA12878 library"
            }
            ModelType::R10cPcr => "R10C model for MinION.  Trained from PCR'd DNA library",
            ModelType::RleR941Native => {
                "R9.4.1 run-length encoded model for MinION.  Trained from native DNA library"
            }
            ModelType::NewRleR941Native => {
                "R9.4.1 new run-length encoded model for MinION.  Trained from native DNA library"
            }
        }
    }

    pub fn is_flipflop(&self) -> bool {
        matches!(
            self,
            ModelType::R941Native | ModelType::R941FiveMc | ModelType::R10cPcr
        )
    }

    /// Number of bases the output layer distinguishes. The 5mC model adds a
    /// methylated cytosine to the usual four.
    pub fn default_nbase(&self) -> usize {
        match self {
            ModelType::R941FiveMc => 5,
            _ => crate::constants::DEFAULT_NBASE,
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelType {
    type Err = GruPruneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModelType::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| GruPruneError::UnknownModel(s.to_string()))
    }
}
