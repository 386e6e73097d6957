//! Saving display entries as 16-bit grayscale TIFF files.
//!
//! Files are named `{layer}_{YYYY-mm-dd_HH-MM-SS}.tiff` from the layer name of the display
//! entry and the local time of the save. The destination folder is chosen by the operator; a
//! cancelled choice saves nothing.

use chrono::{DateTime, Local};
use image::error::{ParameterError, ParameterErrorKind};
use image::{ExtendedColorType, ImageEncoder, ImageError};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use crate::error::AppResult;
use crate::hardware::Frame;

/// File name for `layer` saved at `at`.
pub fn image_file_name(layer: &str, at: DateTime<Local>) -> String {
    format!("{layer}_{}.tiff", at.format("%Y-%m-%d_%H-%M-%S"))
}

/// Write `frame` into `folder` as a 16-bit TIFF named after `layer`.
///
/// Returns the written path, or `None` when no folder was chosen.
pub fn save_frame(
    frame: &Frame,
    layer: &str,
    folder: Option<&Path>,
    at: DateTime<Local>,
) -> AppResult<Option<PathBuf>> {
    let Some(folder) = folder else {
        tracing::debug!(layer, "save cancelled");
        return Ok(None);
    };
    if !frame.is_consistent() {
        return Err(ImageError::Parameter(ParameterError::from_kind(
            ParameterErrorKind::DimensionMismatch,
        ))
        .into());
    }

    let path = folder.join(image_file_name(layer, at));
    let writer = BufWriter::new(File::create(&path)?);
    let bytes: Vec<u8> = frame.pixels.iter().flat_map(|v| v.to_ne_bytes()).collect();
    image::codecs::tiff::TiffEncoder::new(writer).write_image(
        &bytes,
        frame.width,
        frame.height,
        ExtendedColorType::L16,
    )?;

    tracing::info!(path = ?path, width = frame.width, height = frame.height, "saved image");
    Ok(Some(path))
}
