use std::path::{Path, PathBuf};

use burn::tensor::{backend::Backend, Device};
use burn_store::{ModuleSnapshot, PytorchStore};

use super::resnet::ResNet;
use super::state::{self, LoadReport};
use crate::error::{BackboneError, Result};

/// Directory searched for checkpoints, relative to the working directory.
pub const MODEL_DIR: &str = "model_data";

/// File name of the pretrained backbone checkpoint.
pub const CHECKPOINT_FILE: &str = "resnet18.pth";

/// Location of a PyTorch checkpoint on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub model_dir: PathBuf,
    pub file_name: String,
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from(MODEL_DIR),
            file_name: CHECKPOINT_FILE.to_string(),
        }
    }
}

impl Checkpoint {
    pub fn new(model_dir: impl AsRef<Path>, file_name: impl Into<String>) -> Self {
        Self {
            model_dir: model_dir.as_ref().to_path_buf(),
            file_name: file_name.into(),
        }
    }

    /// Full path to the checkpoint file.
    pub fn path(&self) -> PathBuf {
        self.model_dir.join(&self.file_name)
    }
}

impl<B: Backend> ResNet<B> {
    /// Load a torchvision-style checkpoint into the network, non-strictly.
    ///
    /// Entries that have no counterpart in the network are ignored and parameters
    /// without an entry keep their initialization.
    pub fn load_checkpoint(&mut self, checkpoint: &Checkpoint) -> Result<LoadReport> {
        let path = checkpoint.path();
        if !path.is_file() {
            return Err(BackboneError::MissingCheckpoint(path));
        }
        log::info!("Loading checkpoint {}", path.display());

        let mut store = PytorchStore::from_file(path.clone())
            // Map layer[i].[j].* -> layer[i].blocks.[j].*
            .with_key_remapping("(layer[1-4])\\.([0-9]+)\\.(.+)", "$1.blocks.$2.$3")
            // Map downsample.0.* -> downsample.conv.*
            .with_key_remapping("downsample\\.0\\.(.+)", "downsample.conv.$1")
            // Map downsample.1.* -> downsample.bn.*
            .with_key_remapping("downsample\\.1\\.(.+)", "downsample.bn.$1")
            // Map bn*.weight -> bn*.gamma, bn*.bias -> bn*.beta
            .with_key_remapping("(bn[0-9]*)\\.weight$", "$1.gamma")
            .with_key_remapping("(bn[0-9]*)\\.bias$", "$1.beta")
            .allow_partial(true)
            .validate(false);

        let report = self
            .load_from(&mut store)
            .map_err(|err| BackboneError::Store(err.to_string()))?;
        state::log_report(&report);

        Ok(report)
    }
}

/// Build the backbone and optionally load the pretrained checkpoint.
///
/// # Arguments
///
/// * `pretrained` - Whether to load `model_data/resnet18.pth`.
/// * `device` - Device to create the module on.
///
/// # Returns
///
/// A feature-mode backbone (no classification head).
pub fn load_backbone<B: Backend>(pretrained: bool, device: &Device<B>) -> Result<ResNet<B>> {
    load_backbone_from(pretrained.then(Checkpoint::default).as_ref(), device)
}

/// Same as [load_backbone](load_backbone), reading from an explicit checkpoint.
pub fn load_backbone_from<B: Backend>(
    checkpoint: Option<&Checkpoint>,
    device: &Device<B>,
) -> Result<ResNet<B>> {
    let mut model = ResNet::resnet50(1000, false, device);
    if let Some(checkpoint) = checkpoint {
        model.load_checkpoint(checkpoint)?;
    }

    Ok(model)
}
