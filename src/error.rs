use thiserror::Error;

/// Failures raised by checkpoint handling, weight surgery and basecalling.
#[derive(Debug, Error)]
pub enum GruPruneError {
    #[error("parameter not found: {0}")]
    UnknownParameter(String),

    #[error("no parameter matches selector `{0}`")]
    NoMatch(String),

    #[error("shape mismatch for {name}: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("parameter {name} holds {numel} values but shape {shape:?} needs {expected}")]
    InvalidLength {
        name: String,
        numel: usize,
        shape: Vec<usize>,
        expected: usize,
    },

    #[error("unsupported dtype {dtype} for parameter {name}")]
    UnsupportedDtype { name: String, dtype: String },

    #[error("a flip-flop layer cannot have {0} parameters per block")]
    InvalidFlipFlopSize(usize),

    #[error("unknown model type: {0}")]
    UnknownModel(String),

    #[error("model {0} is not a flip-flop model and cannot be evaluated")]
    UnsupportedModel(String),

    #[error("signal is empty")]
    EmptySignal,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("tensor data error: {0}")]
    TensorData(String),

    #[error("fast5 support not compiled in; rebuild with `--features fast5`")]
    Fast5Unavailable,

    #[error("fast5 error in {file}: {message}")]
    Fast5 { file: String, message: String },

    #[error(transparent)]
    SafeTensors(#[from] safetensors::SafeTensorError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GruPruneError>;
