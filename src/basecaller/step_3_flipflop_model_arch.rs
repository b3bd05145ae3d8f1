// External imports
use burn::module::{Module, Param};
use burn::tensor::{activation, backend::Backend, Tensor};

// Internal imports
use super::step_1_signal_features::features_from_raw;
use super::step_2_gru_cell::ModifiedGru;
use super::step_4_global_norm::{global_norm, TransitionMatrix};
use super::step_5_decoding::{decode, states_to_sequence};
use crate::constants::FLIPFLOP_SCORE_SCALE;
use crate::error::{GruPruneError, Result};

/// # Strided Convolution
///
/// A 1-D convolution over time, implemented as a window gather followed by a
/// single matrix product. The window is zero padded so that every input sample
/// is centred once: left pad `winlen / 2`, right pad `winlen - 1 - winlen / 2`.
/// The output length is `ceil(T / stride)`.
#[derive(Module, Debug)]
pub struct Convolution<B: Backend> {
    winlen: usize,
    stride: usize,
    input_size: usize,
    /// `[winlen * input_size, channels]`, row `k * input_size + c`
    weight: Param<Tensor<B, 2>>,
    /// `[channels]`
    bias: Param<Tensor<B, 1>>,
}

impl<B: Backend> Convolution<B> {
    pub fn from_weights(
        weight: Tensor<B, 2>,
        bias: Tensor<B, 1>,
        winlen: usize,
        stride: usize,
    ) -> Self {
        let input_size = weight.dims()[0] / winlen.max(1);
        Self {
            winlen,
            stride,
            input_size,
            weight: Param::from_tensor(weight),
            bias: Param::from_tensor(bias),
        }
    }

    /// Features per input sample the weight was trained for.
    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn output_len(&self, seq_len: usize) -> usize {
        seq_len.div_ceil(self.stride)
    }

    /// Convolution followed by tanh: `[T, input_size] -> [ceil(T / stride), channels]`.
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let device = x.device();
        let [seq_len, input_size] = x.dims();
        let pad_left = self.winlen / 2;
        let pad_right = self.winlen - 1 - pad_left;

        let mut pieces = Vec::with_capacity(3);
        if pad_left > 0 {
            pieces.push(Tensor::zeros([pad_left, input_size], &device));
        }
        pieces.push(x);
        if pad_right > 0 {
            pieces.push(Tensor::zeros([pad_right, input_size], &device));
        }
        let padded = Tensor::cat(pieces, 0);

        let windows: Vec<Tensor<B, 2>> = (0..self.output_len(seq_len))
            .map(|t| {
                padded
                    .clone()
                    .narrow(0, t * self.stride, self.winlen)
                    .reshape([1, self.winlen * input_size])
            })
            .collect();
        let windows = Tensor::cat(windows, 0);

        activation::tanh(windows.matmul(self.weight.val()) + self.bias.val().unsqueeze::<2>())
    }
}

/// # Flip-flop Output Layer
///
/// Linear map from the last GRU state to the transition scores of each block,
/// bounded to `[-5, 5]` by a scaled tanh and divided by the temperature.
#[derive(Module, Debug)]
pub struct FlipFlopOutput<B: Backend> {
    nbase: usize,
    /// `[hidden_size, nparam]`
    weight: Param<Tensor<B, 2>>,
    /// `[nparam]`
    bias: Param<Tensor<B, 1>>,
}

impl<B: Backend> FlipFlopOutput<B> {
    pub fn from_weights(weight: Tensor<B, 2>, bias: Tensor<B, 1>, nbase: usize) -> Self {
        Self {
            nbase,
            weight: Param::from_tensor(weight),
            bias: Param::from_tensor(bias),
        }
    }

    pub fn nbase(&self) -> usize {
        self.nbase
    }

    pub fn forward(&self, x: Tensor<B, 2>, temperature: f32) -> Tensor<B, 2> {
        let affine = x.matmul(self.weight.val()) + self.bias.val().unsqueeze::<2>();
        activation::tanh(affine).mul_scalar(FLIPFLOP_SCORE_SCALE / temperature)
    }
}

/// Result of basecalling one read.
#[derive(Debug, Clone, PartialEq)]
pub struct Basecall {
    pub sequence: String,
    /// Viterbi path score in the globally normalised scores (a log-probability)
    pub score: f32,
    pub nblock: usize,
}

/// # Flip-flop Basecaller Architecture
///
/// ## Architecture Overview
///
/// 1. **Convolution**: strided window over the normalised signal, tanh activation
/// 2. **GRU stack**: five modified GRU layers alternating backward, forward,
///    backward, forward, backward
/// 3. **Output**: flip-flop transition scores per block, globally normalised
///
/// No residual connections are used between the GRU layers.
#[derive(Module, Debug)]
pub struct FlipFlopBasecaller<B: Backend> {
    conv: Convolution<B>,
    grus: Vec<ModifiedGru<B>>,
    output: FlipFlopOutput<B>,
}

impl<B: Backend> FlipFlopBasecaller<B> {
    pub fn new(conv: Convolution<B>, grus: Vec<ModifiedGru<B>>, output: FlipFlopOutput<B>) -> Self {
        Self { conv, grus, output }
    }

    pub fn nbase(&self) -> usize {
        self.output.nbase()
    }

    pub fn gru_layers(&self) -> &[ModifiedGru<B>] {
        &self.grus
    }

    /// Unnormalised scores for a `[T, features]` input: `[ceil(T / stride), nparam]`.
    pub fn forward(&self, features: Tensor<B, 2>, temperature: f32) -> Tensor<B, 2> {
        let mut x = self.conv.forward(features);
        for gru in &self.grus {
            x = gru.forward(x);
        }
        self.output.forward(x, temperature)
    }

    /// # Calculate Transitions
    ///
    /// Runs the network over `signal[start..end]` and globally normalises the
    /// resulting scores.
    pub fn transitions(
        &self,
        signal: &[f32],
        start: usize,
        end: usize,
        temperature: f32,
    ) -> Result<TransitionMatrix> {
        if !(temperature > 0.0) {
            return Err(GruPruneError::InvalidConfig(format!(
                "temperature must be positive, got {temperature}"
            )));
        }
        let device = self.output.weight.val().device();
        let features = features_from_raw::<B>(signal, start, end, &device)?;
        let features_per_sample = features.dims()[1];
        if features_per_sample != self.conv.input_size() {
            return Err(GruPruneError::InvalidConfig(format!(
                "convolution expects {} features per sample, signal has {}",
                self.conv.input_size(),
                features_per_sample
            )));
        }
        let scores = self.forward(features, temperature);
        let [nblock, nparam] = scores.dims();

        let mut values = scores
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| GruPruneError::TensorData(format!("{e:?}")))?;
        global_norm(&mut values, self.nbase())?;

        Ok(TransitionMatrix {
            nblock,
            nparam,
            nbase: self.nbase(),
            scores: values,
        })
    }

    /// Basecalls a whole signal.
    pub fn basecall(&self, signal: &[f32], temperature: f32) -> Result<Basecall> {
        let transitions = self.transitions(signal, 0, signal.len(), temperature)?;
        let (score, path) = decode(&transitions)?;
        Ok(Basecall {
            sequence: states_to_sequence(&path, transitions.nbase),
            score,
            nblock: transitions.nblock,
        })
    }
}
