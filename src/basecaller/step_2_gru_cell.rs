// External imports
use burn::module::{Module, Param};
use burn::tensor::{activation, backend::Backend, Tensor};

/// # Modified GRU Layer
///
/// The recurrent layer of the flip-flop basecaller. The input projection for the
/// whole sequence is computed up front, then the state is updated one sample at
/// a time, either forwards or backwards in time.
///
/// ## Mathematical Representation
///
/// With `xp_t = W_ih · x_t + b` and `s = W_hh · h_(t-1)`, each split as `[z | r | n]`:
///
/// 1. Update gate: z_t = σ(xp_z + s_z)
/// 2. Reset gate: r_t = σ(xp_r + s_r)
/// 3. Candidate state: n_t = tanh(xp_n + r_t ∘ s_n)
/// 4. New hidden state: h_t = z_t ∘ h_(t-1) + (1 - z_t) ∘ n_t
///
/// Where:
/// - σ is the sigmoid function
/// - ∘ denotes element-wise multiplication
///
/// A single bias is applied to the input projection; the state projection has none.
#[derive(Module, Debug)]
pub struct ModifiedGru<B: Backend> {
    input_size: usize,
    hidden_size: usize,
    backward: bool,

    /// `[input_size, 3 * hidden_size]`
    input_weights: Param<Tensor<B, 2>>,
    /// `[3 * hidden_size]`
    bias: Param<Tensor<B, 1>>,
    /// `[hidden_size, 3 * hidden_size]`
    state_weights: Param<Tensor<B, 2>>,
}

impl<B: Backend> ModifiedGru<B> {
    /// Create a GRU layer from trained weights
    ///
    /// # Arguments
    ///
    /// * `input_weights` - Input projection of shape [input_size, 3 * hidden_size]
    /// * `state_weights` - Recurrent projection of shape [hidden_size, 3 * hidden_size]
    /// * `bias` - Input bias of shape [3 * hidden_size]
    /// * `backward` - If true, the sequence is processed from the last sample to the first
    pub fn from_weights(
        input_weights: Tensor<B, 2>,
        state_weights: Tensor<B, 2>,
        bias: Tensor<B, 1>,
        backward: bool,
    ) -> Self {
        let [input_size, gate_size] = input_weights.dims();
        Self {
            input_size,
            hidden_size: gate_size / 3,
            backward,
            input_weights: Param::from_tensor(input_weights),
            bias: Param::from_tensor(bias),
            state_weights: Param::from_tensor(state_weights),
        }
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    pub fn is_backward(&self) -> bool {
        self.backward
    }

    /// Projects every input sample at once: `[T, input_size] -> [T, 3 * hidden_size]`.
    pub fn project_input(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        x.matmul(self.input_weights.val()) + self.bias.val().unsqueeze::<2>()
    }

    /// One state update from a projected input row `[1, 3H]` and the previous state `[1, H]`.
    pub fn step(&self, xp_t: Tensor<B, 2>, h: Tensor<B, 2>) -> Tensor<B, 2> {
        let hs = self.hidden_size;
        let state_projection = h.clone().matmul(self.state_weights.val());

        let z = activation::sigmoid(
            xp_t.clone().narrow(1, 0, hs) + state_projection.clone().narrow(1, 0, hs),
        );
        let r = activation::sigmoid(
            xp_t.clone().narrow(1, hs, hs) + state_projection.clone().narrow(1, hs, hs),
        );
        let n = activation::tanh(
            xp_t.narrow(1, 2 * hs, hs) + r * state_projection.narrow(1, 2 * hs, hs),
        );

        z.clone() * h + (Tensor::ones_like(&z) - z) * n
    }

    /// Forward pass over a whole sequence
    ///
    /// # Arguments
    ///
    /// * `x` - Input tensor of shape [seq_len, input_size], seq_len > 0
    ///
    /// # Returns
    ///
    /// Hidden states of shape [seq_len, hidden_size]. Row `t` is the state
    /// after consuming sample `t`, whichever direction the layer runs in.
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let device = x.device();
        let seq_len = x.dims()[0];
        let projected = self.project_input(x);

        // Initial hidden state (zeros)
        let mut h = Tensor::zeros([1, self.hidden_size], &device);
        let mut states = Vec::with_capacity(seq_len);

        for step in 0..seq_len {
            let t = if self.backward {
                seq_len - 1 - step
            } else {
                step
            };
            h = self.step(projected.clone().narrow(0, t, 1), h);
            states.push(h.clone());
        }

        if self.backward {
            states.reverse();
        }
        Tensor::cat(states, 0)
    }
}
