//! Reading weights-only checkpoints into a flat tensor map
//!
//! Training scripts save either the bare weight map or a dict that holds it
//! under a named entry (`model_state_dict` by default) next to optimizer state
//! and epoch counters. Unwrapping prefers the named entry when present and
//! otherwise treats the top level as the weights.

use candle_core::{Device, Tensor};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Flat parameter-name to tensor map
pub type StateDict = HashMap<String, Tensor>;

/// On-disk encoding of a checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightsFormat {
    Safetensors,
    /// `torch.save` zip archive
    Pickle,
}

impl WeightsFormat {
    /// Detect the format from the file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "safetensors" => Some(Self::Safetensors),
            "pth" | "pt" | "bin" | "ckpt" => Some(Self::Pickle),
            _ => None,
        }
    }
}

/// How the weights were found inside the checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointLayout {
    /// Weights were nested under the checkpoint key
    Wrapped,
    /// Top level was the weight map
    Raw,
}

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("unrecognized checkpoint format: {0} (expected .safetensors, .pth, .pt, .bin or .ckpt)")]
    UnsupportedFormat(PathBuf),

    #[error("checkpoint {0} contains no tensors")]
    Empty(PathBuf),

    #[error(transparent)]
    Candle(#[from] candle_core::Error),
}

/// Strip a flattened `"{key}."` prefix from every entry that carries it.
///
/// When any entry is nested under `key`, only those entries are kept, so
/// optimizer tensors saved beside the weights are dropped.
pub fn unwrap_state_dict(
    entries: impl IntoIterator<Item = (String, Tensor)>,
    key: &str,
) -> (StateDict, CheckpointLayout) {
    let entries: Vec<(String, Tensor)> = entries.into_iter().collect();
    let prefix = format!("{}.", key);

    if !entries.iter().any(|(name, _)| name.starts_with(&prefix)) {
        return (entries.into_iter().collect(), CheckpointLayout::Raw);
    }

    let unwrapped = entries
        .into_iter()
        .filter_map(|(name, tensor)| {
            name.strip_prefix(&prefix)
                .map(|inner| (inner.to_string(), tensor))
        })
        .collect();
    (unwrapped, CheckpointLayout::Wrapped)
}

/// Read the weight map from `path`, unwrapping `key` when present
pub fn read_state_dict(
    path: &Path,
    key: &str,
    device: &Device,
) -> Result<(StateDict, CheckpointLayout), CheckpointError> {
    let format = WeightsFormat::from_path(path)
        .ok_or_else(|| CheckpointError::UnsupportedFormat(path.to_path_buf()))?;

    let (state, layout) = match format {
        WeightsFormat::Safetensors => {
            let tensors = candle_core::safetensors::load(path, device)?;
            unwrap_state_dict(tensors, key)
        }
        WeightsFormat::Pickle => read_pickle(path, key)?,
    };

    if state.is_empty() {
        return Err(CheckpointError::Empty(path.to_path_buf()));
    }

    // Pickle tensors are materialized on the CPU
    let state = if device.is_cpu() {
        state
    } else {
        state
            .into_iter()
            .map(|(name, tensor)| Ok((name, tensor.to_device(device)?)))
            .collect::<Result<StateDict, candle_core::Error>>()?
    };

    tracing::debug!(
        path = %path.display(),
        ?format,
        ?layout,
        tensors = state.len(),
        "Read checkpoint"
    );
    Ok((state, layout))
}

fn read_pickle(path: &Path, key: &str) -> Result<(StateDict, CheckpointLayout), CheckpointError> {
    // A missing key is not an error: the file may be a bare weight map
    let nested = candle_core::pickle::read_all_with_key(path, Some(key)).unwrap_or_default();
    if !nested.is_empty() {
        return Ok((nested.into_iter().collect(), CheckpointLayout::Wrapped));
    }

    let top_level = candle_core::pickle::read_all(path)?;
    Ok(unwrap_state_dict(top_level, key))
}
