//! Model download and installation management.
//!
//! Downloads Whisper models from HuggingFace, verifies their SHA-1 checksum
//! and stores them in the user's cache directory.

use crate::error::{Result, VidscribeError};
use crate::models::catalog::{ModelInfo, get_model, resolve_name};
use futures_util::StreamExt;
use sha1::{Digest, Sha1};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Get the directory where models are stored.
///
/// Uses `~/.cache/vidscribe/models/` on Linux/Unix.
pub fn models_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("vidscribe")
        .join("models")
}

/// Full path for a model file, whether or not it exists.
pub fn model_path(name: &str) -> PathBuf {
    models_dir().join(format!("ggml-{}.bin", resolve_name(name)))
}

pub fn is_model_installed(name: &str) -> bool {
    model_path(name).exists()
}

/// Fetch `url` into `output_path`, verifying `sha1` if non-empty.
///
/// Data goes to a `.part` file first so an interrupted download never looks installed.
async fn download_to_path(
    url: &str,
    sha1: &str,
    output_path: &Path,
    on_progress: &mut dyn FnMut(u64, Option<u64>),
) -> Result<()> {
    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            VidscribeError::Other(format!("Failed to create models directory: {}", e))
        })?;
    }

    let response = reqwest::Client::new()
        .get(url)
        .send()
        .await
        .map_err(|e| VidscribeError::Other(format!("Failed to start download: {}", e)))?;

    if !response.status().is_success() {
        return Err(VidscribeError::Other(format!(
            "Download failed with status: {}",
            response.status()
        )));
    }

    let total = response.content_length();
    let partial = output_path.with_extension("bin.part");
    let mut file = fs::File::create(&partial)
        .map_err(|e| VidscribeError::Other(format!("Failed to create output file: {}", e)))?;
    let mut hasher = Sha1::new();
    let mut received = 0u64;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk
            .map_err(|e| VidscribeError::Other(format!("Failed to read download chunk: {}", e)))?;
        file.write_all(&chunk)
            .map_err(|e| VidscribeError::Other(format!("Failed to write to file: {}", e)))?;
        hasher.update(&chunk);
        received += chunk.len() as u64;
        on_progress(received, total);
    }
    drop(file);

    if !sha1.is_empty() {
        let calculated = format!("{:x}", hasher.finalize());
        if calculated != sha1 {
            if let Err(e) = fs::remove_file(&partial) {
                tracing::warn!(error = %e, "failed to remove corrupted download");
            }
            return Err(VidscribeError::Other(format!(
                "SHA-1 checksum mismatch. Expected: {}, got: {}",
                sha1, calculated
            )));
        }
    }

    fs::rename(&partial, output_path)?;
    Ok(())
}

/// Download a catalog model unless it is already installed.
///
/// `on_progress` receives the bytes received so far and the total size when known.
///
/// # Errors
///
/// `ModelNotFound` for names outside the catalog; `Other` when the download
/// fails or the checksum does not match.
pub async fn download_model(
    name: &str,
    on_progress: &mut dyn FnMut(u64, Option<u64>),
) -> Result<PathBuf> {
    let path = model_path(name);
    if path.exists() {
        tracing::debug!(model = name, path = %path.display(), "model already installed");
        return Ok(path);
    }

    let info: &ModelInfo = get_model(name).ok_or_else(|| VidscribeError::ModelNotFound {
        path: format!("{} (not in the model catalog)", name),
    })?;

    tracing::info!(model = info.name, size_mb = info.size_mb, "downloading model");
    download_to_path(&info.url(), info.sha1, &path, on_progress).await?;
    tracing::info!(model = info.name, path = %path.display(), "model installed");
    Ok(path)
}

/// Model names of every `ggml-*.bin` in the models directory, sorted.
pub fn list_installed_models() -> Vec<String> {
    let entries = match fs::read_dir(models_dir()) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut names: Vec<String> = entries
        .filter_map(|entry| {
            let entry = entry.ok()?;
            let name = entry.file_name();
            let model = name.to_str()?.strip_prefix("ggml-")?.strip_suffix(".bin")?;
            entry.path().is_file().then(|| model.to_string())
        })
        .collect();

    names.sort();
    names
}

/// One line of `vidscribe models list`.
pub fn format_model_info(model: &ModelInfo) -> String {
    let status = if is_model_installed(model.name) {
        "[installed]"
    } else {
        "[not installed]"
    };
    format!("{:16} {:5} MB   {}", model.name, model.size_mb, status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_models_dir_is_valid_path() {
        let dir = models_dir();
        assert!(dir.to_string_lossy().contains("vidscribe"));
        assert!(dir.ends_with("models"));
    }

    #[test]
    fn test_model_path_for_unknown_model() {
        let path = model_path("nonexistent");
        assert!(path.to_string_lossy().ends_with("ggml-nonexistent.bin"));
    }

    #[test]
    fn test_model_path_resolves_alias() {
        let path = model_path("large");
        assert!(path.to_string_lossy().contains("large-v3-turbo"));
    }

    #[test]
    fn test_is_model_installed_returns_false_for_invalid_model() {
        assert!(!is_model_installed("nonexistent_model_xyz"));
    }

    #[test]
    fn test_format_model_info_shows_name_and_size() {
        let formatted = format_model_info(get_model("tiny.en").unwrap());
        assert!(formatted.contains("tiny.en"));
        assert!(formatted.contains("75 MB"));
        assert!(formatted.contains("installed"));
    }

    #[test]
    fn test_list_installed_models_returns_sorted_names() {
        let installed = list_installed_models();
        let mut sorted = installed.clone();
        sorted.sort();
        assert_eq!(installed, sorted);
        for name in &installed {
            assert!(!name.starts_with("ggml-"));
            assert!(!name.ends_with(".bin"));
        }
    }

    #[tokio::test]
    async fn test_download_unknown_model_fails_before_network() {
        let mut calls = 0;
        let err = download_model("no-such-model-xyz", &mut |_, _| calls += 1)
            .await
            .unwrap_err();
        assert!(matches!(err, VidscribeError::ModelNotFound { .. }));
        assert_eq!(calls, 0);
    }
}
