// External imports
use serde::Serialize;
use std::fmt;
use std::io::Write;

// Internal imports
use crate::checkpoint::{Checkpoint, Parameter};
use crate::error::Result;

/// Shape, range and sparsity of one parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterSummary {
    pub name: String,
    pub shape: Vec<usize>,
    pub dtype: &'static str,
    pub numel: usize,
    pub min: f32,
    pub max: f32,
    pub mean: f64,
    pub zero_percent: f64,
}

impl fmt::Display for ParameterSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<48} {:<14} {:<4} min={:>9.5} max={:>9.5} mean={:>9.5} zero={:>6.2}%",
            self.name,
            format!("{:?}", self.shape),
            self.dtype,
            self.min,
            self.max,
            self.mean,
            self.zero_percent
        )
    }
}

pub fn summarize_parameter(name: &str, parameter: &Parameter) -> ParameterSummary {
    let values = parameter.to_f32_vec();
    let (min, max, sum) = values.iter().fold(
        (f32::INFINITY, f32::NEG_INFINITY, 0.0f64),
        |(lo, hi, sum), &v| (lo.min(v), hi.max(v), sum + v as f64),
    );
    let numel = values.len();
    ParameterSummary {
        name: name.to_string(),
        shape: parameter.shape().to_vec(),
        dtype: parameter.dtype_name(),
        numel,
        min: if numel == 0 { 0.0 } else { min },
        max: if numel == 0 { 0.0 } else { max },
        mean: if numel == 0 { 0.0 } else { sum / numel as f64 },
        zero_percent: sparsity(parameter),
    }
}

pub fn summarize(checkpoint: &Checkpoint) -> Vec<ParameterSummary> {
    checkpoint
        .iter()
        .map(|(name, parameter)| summarize_parameter(name, parameter))
        .collect()
}

/// Percentage of entries that are exactly zero.
pub fn sparsity(parameter: &Parameter) -> f64 {
    let numel = parameter.numel();
    if numel == 0 {
        return 0.0;
    }
    let zeros = match parameter {
        Parameter::Float { values, .. } => values.iter().filter(|&&v| v == 0.0).count(),
        Parameter::Quantized(q) => q.values.iter().filter(|&&v| v == 0).count(),
    };
    (zeros * 100) as f64 / numel as f64
}

/// Writes every value of `parameter` on its own line, row by row.
///
/// Quantized parameters are written dequantized. Returns the number of values written.
pub fn dump_values<W: Write>(parameter: &Parameter, writer: &mut W) -> Result<usize> {
    let mut written = 0;
    match parameter.as_array2() {
        Some(matrix) => {
            for row in matrix.rows() {
                for value in row {
                    writeln!(writer, "{value}")?;
                    written += 1;
                }
            }
        }
        None => {
            for value in parameter.to_f32_vec() {
                writeln!(writer, "{value}")?;
                written += 1;
            }
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::quantize::QuantizedTensor;

    #[test]
    fn test_dump_writes_rows_in_order() {
        let parameter = Parameter::float(vec![2, 2], vec![1.0, 2.0, 3.0, -0.5]);
        let mut out = Vec::new();
        assert_eq!(dump_values(&parameter, &mut out).unwrap(), 4);
        assert_eq!(String::from_utf8(out).unwrap(), "1\n2\n3\n-0.5\n");
    }

    #[test]
    fn test_dump_dequantizes_int8_values() {
        let parameter = Parameter::Quantized(QuantizedTensor {
            shape: vec![2, 2],
            values: vec![2, -4, 0, 127],
            scale: 0.5,
        });
        let mut out = Vec::new();
        assert_eq!(dump_values(&parameter, &mut out).unwrap(), 4);
        assert_eq!(String::from_utf8(out).unwrap(), "1\n-2\n0\n63.5\n");
        assert_eq!(summarize_parameter("w", &parameter).dtype, "i8");
    }

    #[test]
    fn test_summary_statistics() {
        let parameter = Parameter::float(vec![4], vec![0.0, 2.0, -1.0, 0.0]);
        let summary = summarize_parameter("w", &parameter);
        assert_eq!(summary.min, -1.0);
        assert_eq!(summary.max, 2.0);
        assert!((summary.mean - 0.25).abs() < 1e-12);
        assert_eq!(summary.zero_percent, 50.0);
    }
}
