/// Tests for the flip-flop basecalling network
///
/// This module contains tests for:
///
/// * A single modified GRU step against a scalar reference
/// * Forward and backward sequence processing
/// * Convolution padding, striding and activation
/// * Building the network from a checkpoint and the invariants of its output
/// * Evaluating pruned and quantized checkpoints against the original
pub mod test_basecaller;
