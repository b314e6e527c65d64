use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{ensure, Context as _};
use tokio::io::AsyncWriteExt as _;

use crate::proof_types::BlockResult;

pub fn generate_block_proof_file_name(directory: &Path, block_number: u64) -> PathBuf {
    directory.join(format!("b{block_number}.zkproof"))
}

/// Reads back a file written by [`write_proof_to_dir`].
pub fn read_block_result(path: &Path) -> anyhow::Result<BlockResult> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let des = &mut serde_json::Deserializer::from_reader(&file);
    let mut results: Vec<BlockResult> = serde_path_to_error::deserialize(des)?;
    ensure!(
        results.len() == 1,
        "expected a single block result in {}, found {}",
        path.display(),
        results.len()
    );
    Ok(results.remove(0))
}

/// Writes `result` into `output_dir`, creating the directory if needed.
///
/// Returns the path of the written file.
pub async fn write_proof_to_dir(output_dir: &Path, result: &BlockResult) -> anyhow::Result<PathBuf> {
    if !output_dir.exists() {
        tracing::info!("Creating output directory {}", output_dir.display());
        tokio::fs::create_dir_all(output_dir).await?;
    }

    let path = generate_block_proof_file_name(output_dir, result.block_number());

    // A single element array, so files can be concatenated into a batch.
    let serialized = serde_json::to_vec(&[result])?;

    let mut f = tokio::fs::File::create(&path).await?;
    f.write_all(&serialized)
        .await
        .context("Failed to write proof to disk")?;

    tracing::info!("Successfully wrote to disk proof file {}", path.display());
    Ok(path)
}
