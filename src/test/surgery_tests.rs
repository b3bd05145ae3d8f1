#[cfg(test)]
mod tests {
    use crate::checkpoint::{names, Checkpoint, CheckpointMetadata, Parameter, Selector};
    use crate::config::{default_prune_rules, QuantScheme, QuantizeConfig};
    use crate::error::GruPruneError;
    use crate::models::ModelType;
    use crate::test::test_utils::{small_architecture, small_checkpoint};
    use crate::util::inspect::sparsity;
    use crate::util::prune::{prune, PruneMode, PruneRule};
    use crate::util::quantize::quantize_dynamic;

    fn band_checkpoint() -> Checkpoint {
        let mut ckpt = Checkpoint::new(CheckpointMetadata::new(
            ModelType::R941Native,
            small_architecture(),
        ));
        ckpt.insert(
            names::gru_state_weight(1),
            Parameter::float(vec![2, 3], vec![-0.1, -0.05, 0.0, 0.1, 0.14, 0.2]),
        )
        .unwrap();
        ckpt.insert(
            names::gru_state_weight(5),
            Parameter::float(vec![2, 2], vec![-0.15, -0.14, 0.17, 0.18]),
        )
        .unwrap();
        ckpt
    }

    #[test]
    fn test_default_bands_match_layer_constants() {
        let mut ckpt = band_checkpoint();
        let report = prune(&mut ckpt, &default_prune_rules()).unwrap();

        assert_eq!(report.entries.len(), 2);
        assert_eq!(report.entries[0].parameter, names::gru_state_weight(1));
        assert_eq!(report.entries[0].zeroed, 3);
        assert_eq!(report.entries[0].percent, 50.0);
        // -0.14 and 0.18 sit on the band edges and survive
        assert_eq!(report.entries[1].zeroed, 1);
        assert_eq!(report.entries[1].percent, 25.0);

        let layer1 = ckpt.get(&names::gru_state_weight(1)).unwrap();
        assert_eq!(layer1.values().unwrap(), &[-0.1, 0.0, 0.0, 0.0, 0.14, 0.2]);
    }

    #[test]
    fn test_second_pass_changes_nothing() {
        let mut ckpt = band_checkpoint();
        let rules = default_prune_rules();
        let first = prune(&mut ckpt, &rules).unwrap();
        let after_first = ckpt.get(&names::gru_state_weight(1)).unwrap().clone();

        let second = prune(&mut ckpt, &rules).unwrap();
        assert_eq!(ckpt.get(&names::gru_state_weight(1)).unwrap(), &after_first);
        // Zeros already inside the band are counted again
        assert_eq!(first.entries, second.entries);
        assert_eq!(ckpt.metadata.history.len(), 2);
    }

    #[test]
    fn test_rule_without_match_is_an_error() {
        let mut ckpt = band_checkpoint();
        let rules = vec![PruneRule {
            selector: Selector::Exact("sublayers.3.layer.cudnn_gru.weight_hh_l0".to_string()),
            mode: PruneMode::Magnitude { threshold: 0.1 },
        }];
        assert!(matches!(prune(&mut ckpt, &rules), Err(GruPruneError::NoMatch(_))));
    }

    #[test]
    fn test_contains_selector_prunes_every_gru() {
        let mut ckpt = small_checkpoint(5);
        let rules = vec![PruneRule {
            selector: Selector::Contains("weight_hh_l0".to_string()),
            mode: PruneMode::Magnitude { threshold: 0.2 },
        }];
        let report = prune(&mut ckpt, &rules).unwrap();
        assert_eq!(report.entries.len(), 5);
        for entry in &report.entries {
            let parameter = ckpt.get(&entry.parameter).unwrap();
            assert!(parameter.values().unwrap().iter().all(|w| *w == 0.0 || w.abs() >= 0.2));
            assert!((sparsity(parameter) - entry.percent).abs() < 1e-9);
        }
    }

    #[test]
    fn test_quantize_dynamic_targets_linear_weight_only() {
        let mut ckpt = small_checkpoint(8);
        let before = ckpt.byte_size();
        let report = quantize_dynamic(&mut ckpt, &QuantizeConfig::default()).unwrap();

        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.entries[0].parameter, names::OUTPUT_WEIGHT);
        assert!(report.entries[0].max_abs_error <= report.entries[0].scale / 2.0 + 1e-6);
        assert_eq!(report.bytes_before, before);
        assert!(report.bytes_after < report.bytes_before);

        assert!(ckpt.get(names::OUTPUT_WEIGHT).unwrap().is_quantized());
        assert!(!ckpt.get(names::OUTPUT_BIAS).unwrap().is_quantized());
    }

    #[test]
    fn test_quantized_parameters_are_skipped_by_pruning() {
        let mut ckpt = small_checkpoint(8);
        let config = QuantizeConfig {
            selectors: vec![Selector::Contains("weight_hh_l0".to_string())],
            scheme: QuantScheme::fixed_default(),
        };
        quantize_dynamic(&mut ckpt, &config).unwrap();

        let rules = vec![PruneRule {
            selector: Selector::Contains("weight_hh_l0".to_string()),
            mode: PruneMode::Magnitude { threshold: 0.1 },
        }];
        let report = prune(&mut ckpt, &rules).unwrap();
        assert!(report.entries.is_empty());
    }

    #[test]
    fn test_quantizing_twice_finds_nothing_new() {
        let mut ckpt = small_checkpoint(2);
        quantize_dynamic(&mut ckpt, &QuantizeConfig::default()).unwrap();
        assert!(matches!(
            quantize_dynamic(&mut ckpt, &QuantizeConfig::default()),
            Err(GruPruneError::NoMatch(_))
        ));
    }
}
