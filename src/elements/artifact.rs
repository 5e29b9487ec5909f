use std::{
    fs,
    path::{Path, PathBuf},
};

use alloy::primitives::Bytes;
use anyhow::{bail, Context};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct ArtifactFile {
    bytecode: BytecodeField,
}

/// Hardhat stores a plain hex string, foundry an object with the hex under `object`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BytecodeField {
    Hex(String),
    Object { object: String },
}

pub fn parse_bytecode(json: &str) -> anyhow::Result<Bytes> {
    let artifact: ArtifactFile = serde_json::from_str(json).context("malformed artifact")?;
    let hex = match artifact.bytecode {
        BytecodeField::Hex(hex) => hex,
        BytecodeField::Object { object } => object,
    };

    let bytecode = alloy::hex::decode(hex.trim()).context("bytecode is not valid hex")?;
    if bytecode.is_empty() {
        bail!("artifact has no creation bytecode (abstract contract or interface?)");
    }
    Ok(bytecode.into())
}

pub fn load_bytecode(path: impl AsRef<Path>) -> anyhow::Result<Bytes> {
    let path = path.as_ref();
    let json = fs::read_to_string(path)
        .with_context(|| format!("failed to read artifact {}", path.display()))?;
    parse_bytecode(&json).with_context(|| format!("artifact {}", path.display()))
}

/// Directory remote artifacts are cached in, relative to the working directory.
const CACHE_DIR: &str = "cache";

fn cache_file(url: &str) -> PathBuf {
    let name = url.rsplit('/').next().unwrap_or("artifact.json");
    let digest = alloy::primitives::keccak256(url.as_bytes());
    Path::new(CACHE_DIR).join(format!("{}-{name}", alloy::hex::encode(&digest[..8])))
}

/// Loads from a local path, or from an `http(s)://` URL through the on-disk cache.
pub async fn fetch_bytecode(location: &str) -> anyhow::Result<Bytes> {
    if !(location.starts_with("http://") || location.starts_with("https://")) {
        return load_bytecode(location);
    }

    let cached = cache_file(location);
    if !cached.exists() {
        log::info!("downloading artifact {location}");
        let response = reqwest::get(location)
            .await
            .and_then(|response| response.error_for_status())
            .with_context(|| format!("failed to download {location}"))?;
        let body = response.bytes().await?;
        fs::create_dir_all(CACHE_DIR).context("failed to create cache directory")?;
        fs::write(&cached, &body)
            .with_context(|| format!("failed to write {}", cached.display()))?;
    }
    load_bytecode(&cached)
}
