//! Reading inputs from disk and writing PNG outputs

use crate::io::configuration::CONTROL_OUTPUT_SUFFIX;
use crate::io::error::{PipelineError, Result};
use crate::raster::buffer::RasterImage;
use std::fs;
use std::path::{Path, PathBuf};

/// Read raw vector markup
///
/// # Errors
///
/// Returns `FileSystem` if the file cannot be read as UTF-8 text
pub fn read_markup(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| PipelineError::FileSystem {
        path: path.to_path_buf(),
        operation: "read markup",
        source: e,
    })
}

/// Read an encoded image without decoding it
///
/// # Errors
///
/// Returns `FileSystem` if the file cannot be read
pub fn read_image_bytes(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| PipelineError::FileSystem {
        path: path.to_path_buf(),
        operation: "read image",
        source: e,
    })
}

/// Save a raster as PNG, creating parent directories as needed
///
/// # Errors
///
/// Returns `FileSystem` if the parent directory cannot be created and
/// `ImageExport` if encoding or writing fails
pub fn save_png(image: &RasterImage, output_path: &Path) -> Result<()> {
    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| PipelineError::FileSystem {
            path: parent.to_path_buf(),
            operation: "create directory",
            source: e,
        })?;
    }

    image
        .pixels()
        .save_with_format(output_path, image::ImageFormat::Png)
        .map_err(|e| PipelineError::ImageExport {
            path: output_path.to_path_buf(),
            source: e,
        })
}

/// Output path for the edge map of `input`, next to it
pub fn control_output_path(input: &Path) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default();
    let name = format!("{}{CONTROL_OUTPUT_SUFFIX}.png", stem.to_string_lossy());
    input.with_file_name(name)
}
