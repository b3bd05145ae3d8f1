// External imports
use anyhow::Result;
use burn::tensor::{Tensor, TensorData};
use burn_ndarray::{NdArray, NdArrayDevice};

// Internal imports
use crate::basecaller::step_2_gru_cell::ModifiedGru;
use crate::basecaller::step_3_flipflop_model_arch::{Convolution, FlipFlopBasecaller, FlipFlopOutput};
use crate::basecaller::step_4_global_norm::log_partition;
use crate::basecaller::step_6_model_loading::load_basecaller;
use crate::checkpoint::{Checkpoint, CheckpointMetadata, Selector};
use crate::config::QuantizeConfig;
use crate::error::GruPruneError;
use crate::models::ModelType;
use crate::test::test_utils::{small_architecture, small_checkpoint, synthetic_signal};
use crate::util::prune::{prune, PruneMode, PruneRule};
use crate::util::quantize::quantize_dynamic;

type TestBackend = NdArray;

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Scalar GRU with one unit, one input feature.
fn reference_gru(xs: &[f32], iw: [f32; 3], sw: [f32; 3], b: [f32; 3], backward: bool) -> Vec<f32> {
    let mut out = vec![0.0; xs.len()];
    let mut h = 0.0f32;
    let order: Vec<usize> = if backward {
        (0..xs.len()).rev().collect()
    } else {
        (0..xs.len()).collect()
    };
    for t in order {
        let xp = [xs[t] * iw[0] + b[0], xs[t] * iw[1] + b[1], xs[t] * iw[2] + b[2]];
        let z = sigmoid(xp[0] + h * sw[0]);
        let r = sigmoid(xp[1] + h * sw[1]);
        let n = (xp[2] + r * (h * sw[2])).tanh();
        h = z * h + (1.0 - z) * n;
        out[t] = h;
    }
    out
}

fn scalar_gru(backward: bool, device: &NdArrayDevice) -> ModifiedGru<TestBackend> {
    ModifiedGru::from_weights(
        Tensor::from_data(TensorData::new(vec![0.5f32, -0.3, 0.8], [1, 3]), device),
        Tensor::from_data(TensorData::new(vec![0.2f32, 0.4, -0.6], [1, 3]), device),
        Tensor::from_data(TensorData::new(vec![0.1f32, 0.0, -0.2], [3]), device),
        backward,
    )
}

#[test]
fn test_gru_matches_scalar_reference() -> Result<()> {
    let device = NdArrayDevice::Cpu;
    let xs = [1.0f32, -1.0, 0.5, 2.0];
    let x = Tensor::<TestBackend, 2>::from_data(TensorData::new(xs.to_vec(), [4, 1]), &device);

    for backward in [false, true] {
        let gru = scalar_gru(backward, &device);
        assert_eq!(gru.hidden_size(), 1);
        let output = gru.forward(x.clone());
        assert_eq!(output.dims(), [4, 1]);

        let got = output.into_data().to_vec::<f32>().unwrap();
        let expected = reference_gru(&xs, [0.5, -0.3, 0.8], [0.2, 0.4, -0.6], [0.1, 0.0, -0.2], backward);
        for (g, e) in got.iter().zip(&expected) {
            assert!((g - e).abs() < 1e-5, "backward={backward}: {got:?} vs {expected:?}");
        }
    }
    Ok(())
}

#[test]
fn test_backward_gru_last_row_sees_only_last_sample() -> Result<()> {
    let device = NdArrayDevice::Cpu;
    let gru = scalar_gru(true, &device);
    let long = Tensor::<TestBackend, 2>::from_data(TensorData::new(vec![3.0f32, -2.0, 0.7], [3, 1]), &device);
    let short = Tensor::<TestBackend, 2>::from_data(TensorData::new(vec![0.7f32], [1, 1]), &device);

    let long_out = gru.forward(long).into_data().to_vec::<f32>().unwrap();
    let short_out = gru.forward(short).into_data().to_vec::<f32>().unwrap();
    assert!((long_out[2] - short_out[0]).abs() < 1e-6);
    Ok(())
}

#[test]
fn test_convolution_pads_and_strides() -> Result<()> {
    let device = NdArrayDevice::Cpu;
    let conv = Convolution::<TestBackend>::from_weights(
        Tensor::from_data(TensorData::new(vec![0.1f32, 0.2, 0.3], [3, 1]), &device),
        Tensor::from_data(TensorData::new(vec![0.0f32], [1]), &device),
        3,
        2,
    );
    let x = Tensor::<TestBackend, 2>::from_data(
        TensorData::new(vec![1.0f32, 2.0, 3.0, 4.0, 5.0], [5, 1]),
        &device,
    );
    let out = conv.forward(x);
    assert_eq!(out.dims(), [3, 1]);

    // Windows [0 1 2], [2 3 4], [4 5 0]
    let got = out.into_data().to_vec::<f32>().unwrap();
    let expected = [0.8f32.tanh(), 2.0f32.tanh(), 1.4f32.tanh()];
    for (g, e) in got.iter().zip(&expected) {
        assert!((g - e).abs() < 1e-5, "{got:?} vs {expected:?}");
    }
    Ok(())
}

#[test]
fn test_transitions_are_globally_normalised() -> Result<()> {
    let device = NdArrayDevice::Cpu;
    let ckpt = small_checkpoint(21);
    let model = load_basecaller::<TestBackend>(&ckpt, &device)?;
    assert_eq!(model.gru_layers().len(), 5);
    assert!(model.gru_layers()[0].is_backward());
    assert!(!model.gru_layers()[1].is_backward());

    let signal = synthetic_signal(41);
    let transitions = model.transitions(&signal, 0, signal.len(), 1.0)?;
    assert_eq!(transitions.nblock, 21);
    assert_eq!(transitions.nparam, 40);
    assert!(transitions.scores.iter().all(|v| v.is_finite()));
    assert!(log_partition(&transitions.scores, 4)?.abs() < 1e-3);
    Ok(())
}

#[test]
fn test_basecall_emits_bases() -> Result<()> {
    let device = NdArrayDevice::Cpu;
    let model = load_basecaller::<TestBackend>(&small_checkpoint(4), &device)?;
    let call = model.basecall(&synthetic_signal(60), 1.0)?;

    assert_eq!(call.nblock, 30);
    assert!(!call.sequence.is_empty());
    assert!(call.sequence.len() <= call.nblock + 1);
    assert!(call.sequence.chars().all(|c| "ACGT".contains(c)));
    // A single path can never be more likely than all paths together
    assert!(call.score <= 1e-3);
    Ok(())
}

#[test]
fn test_runlength_models_are_rejected() {
    let device = NdArrayDevice::Cpu;
    let mut ckpt = small_checkpoint(4);
    ckpt.metadata.model_type = ModelType::RleR941Native;
    assert!(matches!(
        load_basecaller::<TestBackend>(&ckpt, &device),
        Err(GruPruneError::UnsupportedModel(_))
    ));
}

#[test]
fn test_quantized_checkpoint_stays_close_to_float() -> Result<()> {
    let device = NdArrayDevice::Cpu;
    let signal = synthetic_signal(30);
    let float_ckpt = small_checkpoint(9);
    let mut int8_ckpt = float_ckpt.clone();
    quantize_dynamic(&mut int8_ckpt, &QuantizeConfig::default())?;

    let float_scores = load_basecaller::<TestBackend>(&float_ckpt, &device)?
        .transitions(&signal, 0, signal.len(), 1.0)?;
    let int8_scores = load_basecaller::<TestBackend>(&int8_ckpt, &device)?
        .transitions(&signal, 0, signal.len(), 1.0)?;

    let max_diff = float_scores
        .scores
        .iter()
        .zip(&int8_scores.scores)
        .map(|(a, b)| (a - b).abs())
        .fold(0.0f32, f32::max);
    assert!(max_diff < 0.25, "max difference {max_diff}");
    Ok(())
}

#[test]
fn test_pruned_checkpoint_still_evaluates() -> Result<()> {
    let device = NdArrayDevice::Cpu;
    let mut ckpt = small_checkpoint(13);
    let rules = vec![PruneRule {
        selector: Selector::Contains("weight_hh_l0".to_string()),
        mode: PruneMode::Band {
            lower: -0.25,
            upper: 0.25,
        },
    }];
    prune(&mut ckpt, &rules)?;

    let model = load_basecaller::<TestBackend>(&ckpt, &device)?;
    let transitions = model.transitions(&synthetic_signal(20), 0, 20, 1.0)?;
    assert!(log_partition(&transitions.scores, 4)?.abs() < 1e-3);
    Ok(())
}

#[test]
fn test_multi_feature_checkpoint_is_rejected() {
    let device = NdArrayDevice::Cpu;
    let mut architecture = small_architecture();
    architecture.input_features = 2;
    let ckpt = Checkpoint::random(
        CheckpointMetadata::new(ModelType::R941Native, architecture),
        6,
    );
    ckpt.validate_layout().unwrap();
    assert!(matches!(
        load_basecaller::<TestBackend>(&ckpt, &device),
        Err(GruPruneError::InvalidConfig(_))
    ));
}

#[test]
fn test_transitions_check_convolution_input_width() {
    let device = NdArrayDevice::Cpu;
    // winlen 3 over 2 features per sample
    let conv = Convolution::<TestBackend>::from_weights(
        Tensor::zeros([6, 4], &device),
        Tensor::zeros([4], &device),
        3,
        2,
    );
    assert_eq!(conv.input_size(), 2);
    let grus = (1..=5)
        .map(|layer| {
            ModifiedGru::from_weights(
                Tensor::zeros([4, 12], &device),
                Tensor::zeros([4, 12], &device),
                Tensor::zeros([12], &device),
                layer % 2 == 1,
            )
        })
        .collect();
    let output = FlipFlopOutput::from_weights(
        Tensor::zeros([4, 40], &device),
        Tensor::zeros([40], &device),
        4,
    );
    let model = FlipFlopBasecaller::new(conv, grus, output);

    let signal = synthetic_signal(16);
    assert!(matches!(
        model.transitions(&signal, 0, signal.len(), 1.0),
        Err(GruPruneError::InvalidConfig(_))
    ));
}
