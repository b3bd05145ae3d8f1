/// # Flip-flop Basecaller Module
///
/// This module evaluates a GRU basecalling checkpoint on raw nanopore signal.
/// It is what makes a pruned or quantized checkpoint testable: the same read
/// can be called with the original and the modified weights and the outputs
/// compared.
///
/// ## Module Structure:
///
/// 1. **step_1_signal_features**: Median/MAD normalisation and feature tensors
/// 2. **step_2_gru_cell**: The modified GRU layer, forward or backward in time
/// 3. **step_3_flipflop_model_arch**: Convolution, GRU stack and flip-flop output
/// 4. **step_4_global_norm**: Forward recursion and global normalisation of scores
/// 5. **step_5_decoding**: Viterbi decoding of transition scores to bases
/// 6. **step_6_model_loading**: Building the network from checkpoint parameters
///
pub mod step_1_signal_features;
pub mod step_2_gru_cell;
pub mod step_3_flipflop_model_arch;
pub mod step_4_global_norm;
pub mod step_5_decoding;
pub mod step_6_model_loading;

/// CPU backend used by the command line tool.
pub type CpuBackend = burn::backend::NdArray<f32>;
