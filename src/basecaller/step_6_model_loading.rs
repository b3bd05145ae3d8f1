// External imports
use burn::tensor::{backend::Backend, Tensor, TensorData};
use log::{info, warn};

// Internal imports
use super::step_2_gru_cell::ModifiedGru;
use super::step_3_flipflop_model_arch::{Convolution, FlipFlopBasecaller, FlipFlopOutput};
use crate::checkpoint::{names, Checkpoint};
use crate::constants::NUM_GRU_LAYERS;
use crate::error::{GruPruneError, Result};

fn tensor2<B: Backend>(
    checkpoint: &Checkpoint,
    name: &str,
    device: &B::Device,
) -> Result<Tensor<B, 2>> {
    let parameter = checkpoint.get(name)?;
    let shape = match parameter.shape() {
        [rows, cols] => [*rows, *cols],
        other => {
            return Err(GruPruneError::ShapeMismatch {
                name: name.to_string(),
                expected: vec![0, 0],
                found: other.to_vec(),
            })
        }
    };
    if parameter.is_quantized() {
        warn!("Dequantizing {name} for evaluation");
    }
    Ok(Tensor::from_data(
        TensorData::new(parameter.to_f32_vec(), shape),
        device,
    ))
}

fn tensor1<B: Backend>(
    checkpoint: &Checkpoint,
    name: &str,
    device: &B::Device,
) -> Result<Tensor<B, 1>> {
    let parameter = checkpoint.get(name)?;
    Ok(Tensor::from_data(
        TensorData::new(parameter.to_f32_vec(), [parameter.numel()]),
        device,
    ))
}

/// # Load Basecaller From Checkpoint
///
/// Builds the flip-flop network from the named parameters of a checkpoint.
/// Pruned weights are used as they are; quantized weights are dequantized, so
/// the network evaluates exactly the values the int8 tensors represent.
///
/// # Arguments
///
/// * `checkpoint` - A checkpoint holding the full basecaller layout
/// * `device` - Device to load the model onto
///
/// # Returns
///
/// The network, or an error if the model type is not a flip-flop model, the
/// architecture does not take one feature per sample, or any parameter is
/// missing or misshapen
pub fn load_basecaller<B: Backend>(
    checkpoint: &Checkpoint,
    device: &B::Device,
) -> Result<FlipFlopBasecaller<B>> {
    let metadata = &checkpoint.metadata;
    if !metadata.model_type.is_flipflop() {
        return Err(GruPruneError::UnsupportedModel(
            metadata.model_type.to_string(),
        ));
    }
    let arch = metadata.architecture;
    if arch.conv_winlen == 0 || arch.conv_stride == 0 {
        return Err(GruPruneError::InvalidConfig(format!(
            "convolution window {} and stride {} must be positive",
            arch.conv_winlen, arch.conv_stride
        )));
    }
    // Raw signal gives one feature per sample
    if arch.input_features != 1 {
        return Err(GruPruneError::InvalidConfig(format!(
            "basecalling needs one input feature per sample, checkpoint has {}",
            arch.input_features
        )));
    }
    checkpoint.validate_layout()?;

    let conv = Convolution::from_weights(
        tensor2(checkpoint, names::CONV_WEIGHT, device)?,
        tensor1(checkpoint, names::CONV_BIAS, device)?,
        arch.conv_winlen,
        arch.conv_stride,
    );

    let grus = (1..=NUM_GRU_LAYERS)
        .map(|layer| {
            Ok(ModifiedGru::from_weights(
                tensor2(checkpoint, &names::gru_input_weight(layer), device)?,
                tensor2(checkpoint, &names::gru_state_weight(layer), device)?,
                tensor1(checkpoint, &names::gru_bias(layer), device)?,
                // Layers 1, 3 and 5 run backwards in time
                layer % 2 == 1,
            ))
        })
        .collect::<Result<Vec<_>>>()?;

    let output = FlipFlopOutput::from_weights(
        tensor2(checkpoint, names::OUTPUT_WEIGHT, device)?,
        tensor1(checkpoint, names::OUTPUT_BIAS, device)?,
        arch.nbase,
    );

    info!(
        "Built {} basecaller: conv {}x{} stride {}, {} GRU layers of size {}, {} bases",
        metadata.model_type,
        arch.conv_winlen,
        arch.conv_channels,
        arch.conv_stride,
        grus.len(),
        arch.hidden_size,
        arch.nbase
    );
    Ok(FlipFlopBasecaller::new(conv, grus, output))
}
