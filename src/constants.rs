// Flip-flop decoding alphabet; 'Z' is 5-methylcytosine for the 5mC model
pub const BASES: [char; 5] = ['A', 'C', 'G', 'T', 'Z'];

// Network defaults (guppy r9.4.1 flip-flop layout)
pub const DEFAULT_NBASE: usize = 4;
pub const DEFAULT_CONV_WINLEN: usize = 19;
pub const DEFAULT_CONV_STRIDE: usize = 2;
pub const DEFAULT_CONV_CHANNELS: usize = 256;
pub const DEFAULT_HIDDEN_SIZE: usize = 256;
pub const NUM_GRU_LAYERS: usize = 5;
pub const DEFAULT_TEMPERATURE: f32 = 1.0;
pub const FLIPFLOP_SCORE_SCALE: f32 = 5.0; // scores are 5 * tanh(x)

// Signal normalisation
pub const MAD_SCALE: f32 = 1.4826;

// Quantization
pub const INT8_RANGE: i32 = 127;
pub const FIXED_SCALE_FACTOR: f32 = 100.0;
pub const FIXED_POINT_FRACTIONAL_BITS: u32 = 5;

// Pruning defaults for the recurrent weights of GRU layers 1 and 5
pub const DEFAULT_PRUNE_BANDS: [(&str, f32, f32); 2] = [
    ("sublayers.1.layer.cudnn_gru.weight_hh_l0", -0.08, 0.14),
    ("sublayers.5.layer.cudnn_gru.weight_hh_l0", -0.14, 0.18),
];

// Parameters targeted by dynamic quantization (linear layers only)
pub const DEFAULT_QUANTIZE_SELECTORS: [&str; 1] = ["linear.weight"];

// File naming
pub const FAST5_EXTENSION: &str = ".fast5";
pub const METADATA_SUFFIX: &str = "meta.json";
pub const METADATA_HEADER_KEY: &str = "gruprune.metadata";
pub const SCALE_KEY_PREFIX: &str = "scale.";
