//! Delivering a removal result: an atomically written PNG or a data URL.

use std::{
    io::{BufWriter, Cursor, Write},
    path::{Path, PathBuf},
};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{ImageFormat, RgbaImage};
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::{
    error::{RemovalError, RemovalResult},
    remover::{Method, Removal},
};

/// Where a result goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    File(PathBuf),
    DataUrl,
}

impl From<Option<PathBuf>> for OutputTarget {
    fn from(path: Option<PathBuf>) -> Self {
        path.map_or(Self::DataUrl, Self::File)
    }
}

/// Printed on success.
#[derive(Debug, Clone, Serialize)]
pub struct SuccessReport {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub method: Method,
}

/// Printed on failure.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub error: String,
}

/// Encode `image` as PNG next to `path` and rename it into place.
///
/// Nothing is left at `path` if encoding or writing fails.
pub fn write_png_atomic(image: &RgbaImage, path: &Path) -> RemovalResult<()> {
    let output_error = |source: std::io::Error| RemovalError::Output {
        path: path.to_path_buf(),
        source,
    };
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut file = NamedTempFile::new_in(directory).map_err(output_error)?;
    {
        let mut writer = BufWriter::new(file.as_file_mut());
        image
            .write_to(&mut writer, ImageFormat::Png)
            .map_err(RemovalError::Encode)?;
        writer.flush().map_err(output_error)?;
    }
    file.persist(path).map_err(|e| output_error(e.error))?;

    tracing::debug!(path = %path.display(), "wrote output");
    Ok(())
}

/// `data:image/png;base64,...`
pub fn encode_data_url(image: &RgbaImage) -> RemovalResult<String> {
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(RemovalError::Encode)?;

    Ok(format!("data:image/png;base64,{}", STANDARD.encode(buffer.into_inner())))
}

/// Write or encode the result and describe it.
pub fn deliver(removal: &Removal, target: &OutputTarget) -> RemovalResult<SuccessReport> {
    let (path, image) = match target {
        OutputTarget::File(path) => {
            write_png_atomic(&removal.image, path)?;
            (Some(path.display().to_string()), None)
        }
        OutputTarget::DataUrl => (None, Some(encode_data_url(&removal.image)?)),
    };

    Ok(SuccessReport {
        status: "success",
        path,
        image,
        method: removal.method,
    })
}
