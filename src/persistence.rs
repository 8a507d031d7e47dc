//! Durable storage for the fitted pipeline.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{PipelineError, Result};
use crate::masking::MASKING_FUNCTION;
use crate::model::FraudPipeline;
use crate::transaction::FEATURE_NAMES;

pub const FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct ArtifactRef<'a> {
    format_version: u32,
    pipeline: &'a FraudPipeline,
}

#[derive(Deserialize)]
struct ArtifactHeader {
    format_version: u32,
}

#[derive(Deserialize)]
struct Artifact {
    pipeline: FraudPipeline,
}

/// Write the pipeline to `path`, replacing whatever was there.
pub fn save(pipeline: &FraudPipeline, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(&ArtifactRef {
        format_version: FORMAT_VERSION,
        pipeline,
    })
    .map_err(|e| PipelineError::Storage(format!("serializing pipeline: {e}")))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, json)?;
    info!(path = %path.display(), leaves = pipeline.tree.leaf_count(), "Pipeline saved");
    Ok(())
}

pub fn load(path: &Path) -> Result<FraudPipeline> {
    let json = match fs::read_to_string(path) {
        Ok(json) => json,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(PipelineError::ModelNotFound(path.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };

    let header: ArtifactHeader = serde_json::from_str(&json)
        .map_err(|e| PipelineError::CorruptArtifact(format!("{}: {e}", path.display())))?;
    if header.format_version != FORMAT_VERSION {
        return Err(PipelineError::CorruptArtifact(format!(
            "{}: unsupported format version {} (expected {FORMAT_VERSION})",
            path.display(),
            header.format_version
        )));
    }

    let artifact: Artifact = serde_json::from_str(&json)
        .map_err(|e| PipelineError::CorruptArtifact(format!("{}: {e}", path.display())))?;
    let pipeline = artifact.pipeline;

    if pipeline.masking != MASKING_FUNCTION {
        return Err(PipelineError::CorruptArtifact(format!(
            "unsupported masking function `{}`",
            pipeline.masking
        )));
    }
    if pipeline.features != FEATURE_NAMES {
        return Err(PipelineError::CorruptArtifact(format!(
            "unexpected feature list {:?}",
            pipeline.features
        )));
    }
    pipeline
        .tree
        .check_features()
        .map_err(PipelineError::CorruptArtifact)?;

    info!(path = %path.display(), depth = pipeline.tree.depth(), "Pipeline loaded");
    Ok(pipeline)
}
