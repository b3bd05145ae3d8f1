// External imports
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use ndarray::ArrayView2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use safetensors::tensor::{Dtype, SafeTensors, TensorView};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

// Internal imports
use crate::constants::{
    DEFAULT_CONV_CHANNELS, DEFAULT_CONV_STRIDE, DEFAULT_CONV_WINLEN, DEFAULT_HIDDEN_SIZE,
    METADATA_HEADER_KEY, METADATA_SUFFIX, NUM_GRU_LAYERS, SCALE_KEY_PREFIX,
};
use crate::error::{GruPruneError, Result};
use crate::models::ModelType;
use crate::util::quantize::QuantizedTensor;

/// Module-path names of the basecaller parameters, in the form the
/// checkpoints were originally exported with.
pub mod names {
    pub const CONV_WEIGHT: &str = "sublayers.0.conv.weight";
    pub const CONV_BIAS: &str = "sublayers.0.conv.bias";
    pub const OUTPUT_WEIGHT: &str = "sublayers.6.linear.weight";
    pub const OUTPUT_BIAS: &str = "sublayers.6.linear.bias";

    pub fn gru_input_weight(layer: usize) -> String {
        format!("sublayers.{layer}.layer.cudnn_gru.weight_ih_l0")
    }

    pub fn gru_state_weight(layer: usize) -> String {
        format!("sublayers.{layer}.layer.cudnn_gru.weight_hh_l0")
    }

    pub fn gru_bias(layer: usize) -> String {
        format!("sublayers.{layer}.layer.cudnn_gru.bias_l0")
    }
}

/// A single named tensor, either full precision or int8.
#[derive(Debug, Clone, PartialEq)]
pub enum Parameter {
    Float { shape: Vec<usize>, values: Vec<f32> },
    Quantized(QuantizedTensor),
}

impl Parameter {
    pub fn float(shape: Vec<usize>, values: Vec<f32>) -> Self {
        Parameter::Float { shape, values }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            Parameter::Float { shape, .. } => shape,
            Parameter::Quantized(q) => &q.shape,
        }
    }

    pub fn numel(&self) -> usize {
        match self {
            Parameter::Float { values, .. } => values.len(),
            Parameter::Quantized(q) => q.numel(),
        }
    }

    pub fn dtype_name(&self) -> &'static str {
        match self {
            Parameter::Float { .. } => "f32",
            Parameter::Quantized(_) => "i8",
        }
    }

    pub fn is_quantized(&self) -> bool {
        matches!(self, Parameter::Quantized(_))
    }

    pub fn byte_size(&self) -> usize {
        match self {
            Parameter::Float { values, .. } => values.len() * std::mem::size_of::<f32>(),
            // int8 payload plus its f32 scale
            Parameter::Quantized(q) => q.numel() + std::mem::size_of::<f32>(),
        }
    }

    pub fn values(&self) -> Option<&[f32]> {
        match self {
            Parameter::Float { values, .. } => Some(values.as_slice()),
            Parameter::Quantized(_) => None,
        }
    }

    pub fn values_mut(&mut self) -> Option<&mut [f32]> {
        match self {
            Parameter::Float { values, .. } => Some(values.as_mut_slice()),
            Parameter::Quantized(_) => None,
        }
    }

    /// Values as f32, dequantizing int8 tensors.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        match self {
            Parameter::Float { values, .. } => values.clone(),
            Parameter::Quantized(q) => q.dequantize(),
        }
    }

    /// Row-major 2-D view of a float parameter.
    pub fn as_array2(&self) -> Option<ArrayView2<'_, f32>> {
        match (self.shape(), self.values()) {
            ([rows, cols], Some(values)) => ArrayView2::from_shape((*rows, *cols), values).ok(),
            _ => None,
        }
    }

    fn validate(&self, name: &str) -> Result<()> {
        let expected: usize = self.shape().iter().product();
        if expected != self.numel() {
            return Err(GruPruneError::InvalidLength {
                name: name.to_string(),
                numel: self.numel(),
                shape: self.shape().to_vec(),
                expected,
            });
        }
        Ok(())
    }
}

/// Picks parameters by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selector {
    Exact(String),
    Contains(String),
}

impl Selector {
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Selector::Exact(exact) => name == exact,
            Selector::Contains(fragment) => name.contains(fragment.as_str()),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Exact(name) => write!(f, "{name}"),
            Selector::Contains(fragment) => write!(f, "*{fragment}*"),
        }
    }
}

/// # Network Architecture
///
/// Dimensions of the convolution + 5 GRU + flip-flop output network. Together
/// with the parameter naming in [`names`] they determine every tensor shape
/// a checkpoint must contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Architecture {
    /// Features per raw sample (1 for a plain current trace)
    pub input_features: usize,
    pub conv_winlen: usize,
    pub conv_stride: usize,
    pub conv_channels: usize,
    pub hidden_size: usize,
    pub nbase: usize,
}

impl Architecture {
    pub fn for_model(model_type: ModelType) -> Self {
        Self {
            input_features: 1,
            conv_winlen: DEFAULT_CONV_WINLEN,
            conv_stride: DEFAULT_CONV_STRIDE,
            conv_channels: DEFAULT_CONV_CHANNELS,
            hidden_size: DEFAULT_HIDDEN_SIZE,
            nbase: model_type.default_nbase(),
        }
    }

    /// Transition scores per output block.
    pub fn nparam(&self) -> usize {
        2 * self.nbase * (self.nbase + 1)
    }

    pub fn gru_input_size(&self, layer: usize) -> usize {
        if layer == 1 {
            self.conv_channels
        } else {
            self.hidden_size
        }
    }

    /// Every expected parameter with its shape and the fan-in used for initialization.
    pub fn layout(&self) -> Vec<(String, Vec<usize>, usize)> {
        let conv_fan_in = self.conv_winlen * self.input_features;
        let h3 = 3 * self.hidden_size;
        let mut layout = vec![
            (
                names::CONV_WEIGHT.to_string(),
                vec![conv_fan_in, self.conv_channels],
                conv_fan_in,
            ),
            (
                names::CONV_BIAS.to_string(),
                vec![self.conv_channels],
                conv_fan_in,
            ),
        ];
        for layer in 1..=NUM_GRU_LAYERS {
            let input = self.gru_input_size(layer);
            layout.push((names::gru_input_weight(layer), vec![input, h3], input));
            layout.push((
                names::gru_state_weight(layer),
                vec![self.hidden_size, h3],
                self.hidden_size,
            ));
            layout.push((names::gru_bias(layer), vec![h3], input));
        }
        layout.push((
            names::OUTPUT_WEIGHT.to_string(),
            vec![self.hidden_size, self.nparam()],
            self.hidden_size,
        ));
        layout.push((
            names::OUTPUT_BIAS.to_string(),
            vec![self.nparam()],
            self.hidden_size,
        ));
        layout
    }
}

/// # Checkpoint Metadata
///
/// Saved both inside the safetensors header and as a `.meta.json` sidecar.
/// `history` grows by one line for every pruning or quantization pass, so a
/// checkpoint records how it was derived from the trained original.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub model_type: ModelType,
    pub architecture: Architecture,
    /// Version of the tool that last wrote the checkpoint
    pub version: String,
    pub saved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub history: Vec<String>,
}

impl CheckpointMetadata {
    pub fn new(model_type: ModelType, architecture: Architecture) -> Self {
        Self {
            model_type,
            architecture,
            version: env!("CARGO_PKG_VERSION").to_string(),
            saved_at: None,
            history: Vec::new(),
        }
    }
}

/// # Checkpoint
///
/// Named parameters of a basecalling network plus its metadata. Parameters are
/// kept sorted by name so listings, dumps and saved files are deterministic.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub metadata: CheckpointMetadata,
    parameters: BTreeMap<String, Parameter>,
}

impl Checkpoint {
    pub fn new(metadata: CheckpointMetadata) -> Self {
        Self {
            metadata,
            parameters: BTreeMap::new(),
        }
    }

    /// Builds a checkpoint with the full layout for `metadata.architecture`,
    /// every value drawn uniformly from `[-1/sqrt(fan_in), 1/sqrt(fan_in)]`.
    pub fn random(metadata: CheckpointMetadata, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut checkpoint = Self::new(metadata);
        for (name, shape, fan_in) in checkpoint.metadata.architecture.layout() {
            let bound = 1.0 / (fan_in.max(1) as f32).sqrt();
            let numel: usize = shape.iter().product();
            let values = (0..numel)
                .map(|_| rng.random_range(-bound..bound))
                .collect();
            checkpoint
                .parameters
                .insert(name, Parameter::float(shape, values));
        }
        checkpoint.record(format!("random init (seed {seed})"));
        checkpoint
    }

    pub fn insert(&mut self, name: impl Into<String>, parameter: Parameter) -> Result<()> {
        let name = name.into();
        parameter.validate(&name)?;
        self.parameters.insert(name, parameter);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&Parameter> {
        self.parameters
            .get(name)
            .ok_or_else(|| GruPruneError::UnknownParameter(name.to_string()))
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut Parameter> {
        self.parameters
            .get_mut(name)
            .ok_or_else(|| GruPruneError::UnknownParameter(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.parameters.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Parameter)> {
        self.parameters.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn select(&self, selector: &Selector) -> Vec<String> {
        self.parameters
            .keys()
            .filter(|name| selector.matches(name))
            .cloned()
            .collect()
    }

    pub(crate) fn parameters_mut(&mut self) -> &mut BTreeMap<String, Parameter> {
        &mut self.parameters
    }

    pub fn byte_size(&self) -> usize {
        self.parameters.values().map(Parameter::byte_size).sum()
    }

    pub fn record(&mut self, event: impl Into<String>) {
        self.metadata.history.push(event.into());
    }

    /// Checks that every parameter the architecture needs is present with the right shape.
    pub fn validate_layout(&self) -> Result<()> {
        for (name, shape, _) in self.metadata.architecture.layout() {
            let found = self.get(&name)?.shape();
            if found != shape.as_slice() {
                return Err(GruPruneError::ShapeMismatch {
                    name,
                    expected: shape,
                    found: found.to_vec(),
                });
            }
        }
        Ok(())
    }
}

/// Path of the JSON sidecar written next to a checkpoint file.
pub fn metadata_path(path: &Path) -> PathBuf {
    path.with_extension(METADATA_SUFFIX)
}

/// # Save Checkpoint
///
/// Writes the parameters to `path` in safetensors format and the metadata to
/// `<stem>.meta.json` next to it.
///
/// ## File Format
///
/// - Float parameters are stored as little-endian `F32` tensors
/// - Quantized parameters are stored as `I8`, with their scale in the
///   header metadata under `scale.<name>`
/// - The metadata JSON is also embedded in the header under `gruprune.metadata`
///
/// # Arguments
///
/// * `checkpoint` - The checkpoint to write; its `saved_at` is stamped on a copy of the metadata
/// * `path` - Target file; parent directories are created
pub fn save(checkpoint: &Checkpoint, path: &Path) -> Result<PathBuf> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut metadata = checkpoint.metadata.clone();
    metadata.saved_at = Some(Utc::now());
    metadata.version = env!("CARGO_PKG_VERSION").to_string();
    let metadata_json = serde_json::to_string_pretty(&metadata)?;

    let mut header: HashMap<String, String> = HashMap::new();
    header.insert(METADATA_HEADER_KEY.to_string(), metadata_json.clone());

    // Byte buffers must outlive the views handed to safetensors
    let mut buffers: Vec<(&str, Dtype, Vec<usize>, Vec<u8>)> = Vec::with_capacity(checkpoint.len());
    for (name, parameter) in checkpoint.iter() {
        match parameter {
            Parameter::Float { shape, values } => {
                let bytes = values.iter().flat_map(|v| v.to_le_bytes()).collect();
                buffers.push((name, Dtype::F32, shape.clone(), bytes));
            }
            Parameter::Quantized(q) => {
                let bytes = q.values.iter().map(|&v| v as u8).collect();
                header.insert(format!("{SCALE_KEY_PREFIX}{name}"), q.scale.to_string());
                buffers.push((name, Dtype::I8, q.shape.clone(), bytes));
            }
        }
    }

    let views = buffers
        .iter()
        .map(|(name, dtype, shape, bytes)| {
            TensorView::new(*dtype, shape.clone(), bytes).map(|view| (*name, view))
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;

    safetensors::serialize_to_file(views, &Some(header), path)?;
    fs::write(metadata_path(path), metadata_json)?;

    info!(
        "Saved checkpoint with {} parameters ({} bytes) to {}",
        checkpoint.len(),
        checkpoint.byte_size(),
        path.display()
    );
    Ok(path.to_path_buf())
}

/// # Load Checkpoint
///
/// Reads a checkpoint written by [`save`]. Metadata embedded in the header
/// takes precedence; the `.meta.json` sidecar is used when the header has none.
pub fn load(path: &Path) -> Result<Checkpoint> {
    let bytes = fs::read(path)?;
    let (_, header) = SafeTensors::read_metadata(&bytes)?;
    let header = header.metadata().clone().unwrap_or_default();
    let tensors = SafeTensors::deserialize(&bytes)?;

    let metadata: CheckpointMetadata = match header.get(METADATA_HEADER_KEY) {
        Some(json) => serde_json::from_str(json)?,
        None => {
            let sidecar = metadata_path(path);
            if !sidecar.exists() {
                return Err(GruPruneError::InvalidConfig(format!(
                    "no metadata in {} and no sidecar at {}",
                    path.display(),
                    sidecar.display()
                )));
            }
            warn!("Header metadata missing, using {}", sidecar.display());
            serde_json::from_slice(&fs::read(&sidecar)?)?
        }
    };

    let mut checkpoint = Checkpoint::new(metadata);
    for (name, view) in tensors.tensors() {
        let shape = view.shape().to_vec();
        let parameter = match view.dtype() {
            Dtype::F32 => {
                let values = view
                    .data()
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect();
                Parameter::float(shape, values)
            }
            Dtype::I8 => {
                let scale_key = format!("{SCALE_KEY_PREFIX}{name}");
                let scale = header
                    .get(&scale_key)
                    .and_then(|s| s.parse::<f32>().ok())
                    .ok_or_else(|| {
                        GruPruneError::InvalidConfig(format!("missing or invalid {scale_key}"))
                    })?;
                Parameter::Quantized(QuantizedTensor {
                    shape,
                    values: view.data().iter().map(|&b| b as i8).collect(),
                    scale,
                })
            }
            other => {
                return Err(GruPruneError::UnsupportedDtype {
                    name,
                    dtype: format!("{other:?}"),
                })
            }
        };
        debug!("loaded {} {:?} {}", name, parameter.shape(), parameter.dtype_name());
        checkpoint.insert(name, parameter)?;
    }

    info!(
        "Loaded {} parameters ({}) from {}",
        checkpoint.len(),
        checkpoint.metadata.model_type,
        path.display()
    );
    Ok(checkpoint)
}
