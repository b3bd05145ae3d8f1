// External imports
use burn::tensor::{backend::Backend, Tensor, TensorData};

// Internal imports
use crate::constants::MAD_SCALE;
use crate::error::{GruPruneError, Result};

fn median(values: &mut [f32]) -> f32 {
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    }
}

/// # Median/MAD Normalisation
///
/// Centres the signal on its median and divides by the scaled median absolute
/// deviation (`1.4826 * MAD`, the normal-consistent estimate of the standard
/// deviation). A flat signal has a MAD of zero and is only centred.
pub fn medmad_normalise(signal: &[f32]) -> Vec<f32> {
    if signal.is_empty() {
        return Vec::new();
    }
    let mut scratch = signal.to_vec();
    let med = median(&mut scratch);
    for (s, &x) in scratch.iter_mut().zip(signal) {
        *s = (x - med).abs();
    }
    let mad = MAD_SCALE * median(&mut scratch);
    let scale = if mad > 0.0 { 1.0 / mad } else { 1.0 };
    signal.iter().map(|&x| (x - med) * scale).collect()
}

/// # Features From Raw Signal
///
/// Normalises `signal[start..end]` and lays it out as a `[T, 1]` tensor, one
/// row per sample.
///
/// # Arguments
///
/// * `signal` - Raw current samples
/// * `start` - First sample to use
/// * `end` - One past the last sample to use
/// * `device` - Device to allocate the tensor on
pub fn features_from_raw<B: Backend>(
    signal: &[f32],
    start: usize,
    end: usize,
    device: &B::Device,
) -> Result<Tensor<B, 2>> {
    let end = end.min(signal.len());
    if start >= end {
        return Err(GruPruneError::EmptySignal);
    }
    let normalised = medmad_normalise(&signal[start..end]);
    let nsample = normalised.len();
    Ok(Tensor::from_data(
        TensorData::new(normalised, [nsample, 1]),
        device,
    ))
}
