use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::Engine as _;
use image::ImageFormat;
use rlo_contracts::images::ImagePayload;

use crate::BASE64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedImage {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub reencoded: bool,
}

pub fn save_image(image_url: &str, dir: &Path, file_name: &str) -> Result<SavedImage> {
    let payload = ImagePayload::from_data_url(image_url)?;
    let bytes = BASE64
        .decode(payload.data.as_bytes())
        .context("image payload base64 decode failed")?;
    let format = image::guess_format(&bytes).context("image payload format not recognized")?;
    let decoded = image::load_from_memory_with_format(&bytes, format)
        .context("image payload decode failed")?;

    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let path = dir.join(file_name);
    let reencoded = format != ImageFormat::Png;
    if reencoded {
        decoded
            .save_with_format(&path, ImageFormat::Png)
            .with_context(|| format!("failed to save {}", path.display()))?;
    } else {
        fs::write(&path, &bytes).with_context(|| format!("failed to write {}", path.display()))?;
    }

    Ok(SavedImage {
        path,
        width: decoded.width(),
        height: decoded.height(),
        reencoded,
    })
}
