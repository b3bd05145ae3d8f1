// External imports
use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

// Internal imports
use crate::checkpoint::{Checkpoint, Parameter, Selector};
use crate::config::{QuantScheme, QuantizeConfig};
use crate::constants::{FIXED_POINT_FRACTIONAL_BITS, INT8_RANGE};
use crate::error::{GruPruneError, Result};

/// # Quantized Tensor
///
/// An int8 tensor with a single per-tensor scale. The real value of element `i`
/// is `values[i] * scale`. Values live in `[-127, 127]`; `-128` is never produced
/// so the range stays symmetric around zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizedTensor {
    pub shape: Vec<usize>,
    pub values: Vec<i8>,
    pub scale: f32,
}

impl QuantizedTensor {
    pub fn numel(&self) -> usize {
        self.values.len()
    }

    pub fn dequantize(&self) -> Vec<f32> {
        self.values.iter().map(|&q| q as f32 * self.scale).collect()
    }

    /// Largest absolute difference between the dequantized tensor and `reference`.
    pub fn max_abs_error(&self, reference: &[f32]) -> f32 {
        self.values
            .iter()
            .zip(reference)
            .map(|(&q, &w)| (q as f32 * self.scale - w).abs())
            .fold(0.0, f32::max)
    }
}

fn clamp_to_int8(v: f32) -> i8 {
    (v as i32).clamp(-INT8_RANGE, INT8_RANGE) as i8
}

/// # Symmetric Int8 Quantization
///
/// Maps `values` onto `[-127, 127]` with `scale = max|w| / 127`, rounding to the
/// nearest integer. An all-zero tensor gets a scale of 1.0.
///
/// Every dequantized value lies within `scale / 2` of its original.
pub fn quantize_symmetric(values: &[f32], shape: &[usize]) -> QuantizedTensor {
    let max_abs = values.iter().fold(0.0f32, |acc, v| acc.max(v.abs()));
    let scale = if max_abs > 0.0 {
        max_abs / INT8_RANGE as f32
    } else {
        1.0
    };

    let quantized = values
        .iter()
        .map(|&w| clamp_to_int8((w / scale).round()))
        .collect();

    QuantizedTensor {
        shape: shape.to_vec(),
        values: quantized,
        scale,
    }
}

/// # Fixed-Scale Int8 Quantization
///
/// Multiplies by a constant `factor`, truncates towards zero and clamps to
/// `[-127, 127]`. With `factor = 100` a weight of `0.123` becomes `12`.
pub fn quantize_fixed(values: &[f32], shape: &[usize], factor: f32) -> QuantizedTensor {
    let quantized = values
        .iter()
        .map(|&w| clamp_to_int8((w * factor).trunc()))
        .collect();

    QuantizedTensor {
        shape: shape.to_vec(),
        values: quantized,
        scale: 1.0 / factor,
    }
}

/// # Int8 Matrix-Vector Product
///
/// Computes `y = W^T x` for a `[rows, cols]` weight and a `rows`-long input,
/// accumulating in i32 so no intermediate product saturates.
///
/// # Arguments
///
/// * `weight` - Row-major `[rows, cols]` int8 matrix
/// * `input` - Int8 vector of length `rows`
///
/// # Returns
///
/// The `cols` accumulators, still in integer units
pub fn int8_matvec(weight: &QuantizedTensor, input: &[i8]) -> Result<Vec<i32>> {
    let (rows, cols) = match weight.shape.as_slice() {
        [r, c] => (*r, *c),
        other => {
            return Err(GruPruneError::ShapeMismatch {
                name: "int8 weight".to_string(),
                expected: vec![input.len(), 0],
                found: other.to_vec(),
            })
        }
    };
    if rows != input.len() {
        return Err(GruPruneError::ShapeMismatch {
            name: "int8 input".to_string(),
            expected: vec![rows],
            found: vec![input.len()],
        });
    }
    if weight.values.len() != rows * cols {
        return Err(GruPruneError::InvalidLength {
            name: "int8 weight".to_string(),
            numel: weight.values.len(),
            shape: weight.shape.clone(),
            expected: rows * cols,
        });
    }
    if cols == 0 {
        return Ok(Vec::new());
    }

    let mut acc = vec![0i32; cols];
    for (row, &x) in weight.values.chunks_exact(cols).zip(input) {
        let x = x as i32;
        for (a, &w) in acc.iter_mut().zip(row) {
            *a += w as i32 * x;
        }
    }
    Ok(acc)
}

/// Converts i32 accumulators back to real values given the scales of both operands.
pub fn dequantize_product(acc: &[i32], weight_scale: f32, input_scale: f32) -> Vec<f32> {
    let scale = weight_scale * input_scale;
    acc.iter().map(|&a| a as f32 * scale).collect()
}

/// Unsigned fixed point with 5 fractional bits.
pub fn float_to_fixed(input: f32) -> u16 {
    (input * (1u32 << FIXED_POINT_FRACTIONAL_BITS) as f32).round() as u16
}

pub fn fixed_to_float(input: u16) -> f32 {
    input as f32 / (1u32 << FIXED_POINT_FRACTIONAL_BITS) as f32
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuantizedEntry {
    pub parameter: String,
    pub shape: Vec<usize>,
    pub scale: f32,
    pub max_abs_error: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuantizeReport {
    pub entries: Vec<QuantizedEntry>,
    pub bytes_before: usize,
    pub bytes_after: usize,
}

impl QuantizeReport {
    pub fn compression_ratio(&self) -> f64 {
        if self.bytes_after == 0 {
            return 1.0;
        }
        self.bytes_before as f64 / self.bytes_after as f64
    }
}

/// # Dynamic Quantization
///
/// Replaces every float 2-D parameter matched by the configured selectors with
/// its int8 form. Only weight matrices are considered: biases and other 1-D
/// tensors stay in float, as do parameters that are already quantized.
///
/// # Arguments
///
/// * `checkpoint` - Checkpoint to rewrite in place
/// * `config` - Selectors and quantization scheme
///
/// # Returns
///
/// A report with per-parameter scale and error, plus the total byte sizes
/// of the checkpoint before and after
pub fn quantize_dynamic(
    checkpoint: &mut Checkpoint,
    config: &QuantizeConfig,
) -> Result<QuantizeReport> {
    if config.selectors.is_empty() {
        return Err(GruPruneError::InvalidConfig(
            "quantization needs at least one selector".to_string(),
        ));
    }
    let bytes_before = checkpoint.byte_size();

    let matches = |name: &str| config.selectors.iter().any(|s: &Selector| s.matches(name));
    let scheme = config.scheme;

    let mut entries: Vec<QuantizedEntry> = checkpoint
        .parameters_mut()
        .par_iter_mut()
        .filter(|(name, param)| matches(name) && !param.is_quantized() && param.shape().len() == 2)
        .filter_map(|(name, param)| {
            let (shape, values) = match param {
                Parameter::Float { shape, values } => (shape.clone(), values),
                Parameter::Quantized(_) => return None,
            };
            let quantized = match scheme {
                QuantScheme::Symmetric => quantize_symmetric(values, &shape),
                QuantScheme::Fixed { factor } => quantize_fixed(values, &shape, factor),
            };
            let entry = QuantizedEntry {
                parameter: name.clone(),
                shape,
                scale: quantized.scale,
                max_abs_error: quantized.max_abs_error(values),
            };
            *param = Parameter::Quantized(quantized);
            Some(entry)
        })
        .collect();
    entries.sort_by(|a, b| a.parameter.cmp(&b.parameter));

    if entries.is_empty() {
        let selectors: Vec<String> = config.selectors.iter().map(|s| s.to_string()).collect();
        return Err(GruPruneError::NoMatch(selectors.join(", ")));
    }

    for entry in &entries {
        debug!(
            "quantized {} {:?} scale={} max_err={}",
            entry.parameter, entry.shape, entry.scale, entry.max_abs_error
        );
    }

    let report = QuantizeReport {
        bytes_before,
        bytes_after: checkpoint.byte_size(),
        entries,
    };
    info!(
        "Quantized {} parameters ({} -> {} bytes)",
        report.entries.len(),
        report.bytes_before,
        report.bytes_after
    );
    checkpoint.record(format!(
        "quantize {:?}: {}",
        scheme,
        report
            .entries
            .iter()
            .map(|e| e.parameter.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    ));
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symmetric_error_bounded_by_half_scale() {
        let values = vec![0.5, -1.27, 0.003, 0.9, -0.25, 1.0];
        let q = quantize_symmetric(&values, &[2, 3]);
        assert!((q.scale - 1.27 / 127.0).abs() < 1e-7);
        assert_eq!(q.values[1], -127);
        assert!(q.max_abs_error(&values) <= q.scale / 2.0 + 1e-6);
    }

    #[test]
    fn test_symmetric_all_zero_uses_unit_scale() {
        let q = quantize_symmetric(&[0.0; 4], &[2, 2]);
        assert_eq!(q.scale, 1.0);
        assert!(q.values.iter().all(|&v| v == 0));
    }

    #[test]
    fn test_fixed_scale_truncates_and_clamps() {
        let q = quantize_fixed(&[0.123, -0.199, 3.0, -5.0], &[4], 100.0);
        assert_eq!(q.values, vec![12, -19, 127, -127]);
        assert!((q.scale - 0.01).abs() < 1e-9);
    }

    #[test]
    fn test_int8_matvec_matches_float_product() {
        // 4x8 weight times a 4-vector, both at factor 100
        let a: Vec<f32> = (0..32).map(|i| [0.1, 0.2, 0.3, 0.4, 0.5][i % 5]).collect();
        let b = [0.1, 0.2, 0.3, 0.4];
        let qa = quantize_fixed(&a, &[4, 8], 100.0);
        let qb = quantize_fixed(&b, &[4], 100.0);

        let acc = int8_matvec(&qa, &qb.values).unwrap();
        let approx = dequantize_product(&acc, qa.scale, qb.scale);

        for j in 0..8 {
            let exact: f32 = (0..4).map(|i| a[i * 8 + j] * b[i]).sum();
            assert!((approx[j] - exact).abs() < 0.01, "col {j}: {} vs {}", approx[j], exact);
        }
    }

    #[test]
    fn test_int8_matvec_rejects_wrong_input_length() {
        let qa = quantize_fixed(&[0.1; 6], &[3, 2], 100.0);
        assert!(int8_matvec(&qa, &[1, 2]).is_err());
    }

    #[test]
    fn test_int8_matvec_with_no_columns_is_empty() {
        let qa = QuantizedTensor {
            shape: vec![2, 0],
            values: Vec::new(),
            scale: 1.0,
        };
        assert_eq!(int8_matvec(&qa, &[1, 2]).unwrap(), Vec::<i32>::new());
    }

    #[test]
    fn test_int8_matvec_rejects_values_shorter_than_shape() {
        let qa = QuantizedTensor {
            shape: vec![2, 3],
            values: vec![1, 2, 3, 4],
            scale: 1.0,
        };
        assert!(matches!(
            int8_matvec(&qa, &[1, 1]),
            Err(GruPruneError::InvalidLength { expected: 6, .. })
        ));
    }

    #[test]
    fn test_fixed_point_five_fractional_bits() {
        assert_eq!(float_to_fixed(1.0), 32);
        assert_eq!(float_to_fixed(0.5), 16);
        assert_eq!(fixed_to_float(48), 1.5);
        assert_eq!(fixed_to_float(float_to_fixed(2.71875)), 2.71875);
    }
}
