//! In-memory parameter snapshots and non-strict parameter transfer.
//!
//! Snapshots are keyed by module path (`layer1.blocks.0.bn2.gamma`,
//! `layer2.blocks.0.downsample.conv.weight`, ...). Applying them goes through the
//! same burn-store path as checkpoint files: entries without a counterpart are
//! ignored, parameters without an entry keep their value, and shape mismatches are
//! skipped. Everything that was not applied is listed in the returned
//! [LoadReport](LoadReport).

use burn::{module::Module, tensor::backend::Backend};
use burn_store::{ApplyResult, ModuleSnapshot, TensorSnapshot};

/// Parameter snapshots of a module, one per tensor.
pub type StateDict = Vec<TensorSnapshot>;

/// Outcome of a non-strict load.
pub type LoadReport = ApplyResult;

/// Snapshot every parameter and running statistic of a module.
pub fn state_dict<B: Backend, M: Module<B>>(module: &M) -> StateDict {
    <M as ModuleSnapshot<B>>::collect(module, None, None)
}

/// Overwrite the parameters of a module from snapshots, non-strictly.
pub fn load_state_dict<B: Backend, M: Module<B>>(module: &mut M, dict: StateDict) -> LoadReport {
    let report = <M as ModuleSnapshot<B>>::apply(module, dict, None, None);
    log_report(&report);
    report
}

/// Log the outcome of a load: a summary at `info`, each skipped key at `debug`.
pub fn log_report(report: &LoadReport) {
    log::info!(
        "Loaded {} tensors ({} missing, {} unused, {} errors)",
        report.applied.len(),
        report.missing.len(),
        report.unused.len(),
        report.errors.len()
    );
    for key in &report.missing {
        log::debug!("missing: {key}");
    }
    for key in &report.unused {
        log::debug!("unused: {key}");
    }
    for err in &report.errors {
        log::debug!("skipped: {err}");
    }
}

/// Find the snapshot stored under `path`.
pub fn find<'a>(dict: &'a StateDict, path: &str) -> Option<&'a TensorSnapshot> {
    dict.iter().find(|snapshot| snapshot.full_path() == path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::block::{Bottleneck, BottleneckConfig};
    use crate::tests::TestBackend;
    use burn::module::ParamId;
    use burn_store::ApplyError;

    fn block(in_planes: usize, planes: usize, stride: usize) -> Bottleneck<TestBackend> {
        BottleneckConfig::new(in_planes, planes)
            .with_stride(stride)
            .init(&Default::default())
    }

    fn values(dict: &StateDict, path: &str) -> Vec<f32> {
        find(dict, path)
            .unwrap_or_else(|| panic!("no snapshot for {path}"))
            .to_data()
            .expect("tensor data")
            .to_vec::<f32>()
            .expect("f32 data")
    }

    #[test]
    fn state_dict_covers_every_block_tensor() {
        let dict = state_dict(&block(8, 16, 2));

        // 3 convs + 3 norms * 4 + downsample conv + norm * 4
        assert_eq!(dict.len(), 3 + 12 + 1 + 4);
        assert!(find(&dict, "bn3.running_var").is_some());
        assert!(find(&dict, "downsample.conv.weight").is_some());
        assert!(find(&dict, "downsample.bn.gamma").is_some());
        assert!(find(&dict, "conv1.bias").is_none());
        assert_eq!(
            find(&dict, "conv2.weight").expect("conv2").shape,
            vec![16, 16, 3, 3]
        );
    }

    #[test]
    fn load_copies_every_matching_entry() {
        let source = block(8, 16, 2);
        let mut target = block(8, 16, 2);
        let dict = state_dict(&source);
        let paths: Vec<String> = dict.iter().map(|s| s.full_path()).collect();

        let report = load_state_dict(&mut target, dict);

        assert!(report.is_success());
        assert!(report.missing.is_empty());
        assert!(report.unused.is_empty());
        assert_eq!(report.applied.len(), paths.len());

        let expected = state_dict(&source);
        let loaded = state_dict(&target);
        for path in &paths {
            assert_eq!(values(&loaded, path), values(&expected, path), "{path}");
        }
    }

    #[test]
    fn load_skips_shape_mismatches() {
        let source = state_dict(&block(8, 16, 1));
        let mut target = block(8, 32, 1);
        let before = state_dict(&target);

        let report = load_state_dict(&mut target, source);

        let mismatch = report
            .errors
            .iter()
            .find_map(|err| match err {
                ApplyError::ShapeMismatch {
                    path,
                    expected,
                    found,
                } if path == "conv1.weight" => Some((expected.clone(), found.clone())),
                _ => None,
            })
            .expect("conv1 mismatch");
        assert_eq!(mismatch, (vec![32, 8, 3, 3], vec![16, 8, 3, 3]));

        let after = state_dict(&target);
        assert_eq!(values(&after, "conv1.weight"), values(&before, "conv1.weight"));
    }

    #[test]
    fn load_reports_missing_and_unused_keys() {
        let device = Default::default();
        let mut dict = state_dict(&block(16, 16, 1));
        dict.retain(|snapshot| snapshot.full_path() != "bn2.beta");
        dict.push(TensorSnapshot::from_data(
            burn::tensor::TensorData::new(vec![1.0f32; 4], [4]),
            vec!["head".to_string(), "weight".to_string()],
            vec!["Linear".to_string()],
            ParamId::new(),
        ));
        let mut target: Bottleneck<TestBackend> = BottleneckConfig::new(16, 16).init(&device);

        let report = load_state_dict(&mut target, dict);

        assert_eq!(report.missing, ["bn2.beta"]);
        assert_eq!(report.unused, ["head.weight"]);
        assert!(report.is_success());
    }
}
