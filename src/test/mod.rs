/// Test modules for checkpoint surgery and basecalling
///
/// This module contains the cross-module test suites:
///
/// * `test_utils` - Small checkpoints and synthetic signals shared by the suites
/// * `checkpoint_tests` - Saving and loading checkpoints, including int8 parameters
/// * `surgery_tests` - Pruning and dynamic quantization applied to whole checkpoints
/// * `fast5_tests` - Directory scanning and read listing with a stand-in read source
/// * `basecaller` - GRU layer, convolution and end-to-end flip-flop basecalling
///
/// Unit tests for individual functions live next to the code they test.
pub mod basecaller;
pub mod surgery_tests;
