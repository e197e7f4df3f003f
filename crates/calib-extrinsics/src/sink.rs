//! Output sinks: per-cycle visualization frames and persisted results.

use std::fs;
use std::path::{Path, PathBuf};

use calib_extrinsics_core::{HomogeneousTransform, TransformError};
use image::{ImageFormat, RgbImage};

#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("malformed matrix in {path}: {source}")]
    Matrix {
        path: PathBuf,
        #[source]
        source: TransformError,
    },
}

/// Fire-and-forget display of the annotated composite frame.
pub trait VisualizationSink {
    fn publish(&mut self, frame: &RgbImage) -> Result<(), SinkError>;
}

/// Overwrites one PNG file with the latest frame.
#[derive(Clone, Debug)]
pub struct PngVisualizationSink {
    path: PathBuf,
}

impl PngVisualizationSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl VisualizationSink for PngVisualizationSink {
    fn publish(&mut self, frame: &RgbImage) -> Result<(), SinkError> {
        frame
            .save_with_format(&self.path, ImageFormat::Png)
            .map_err(|source| SinkError::Image {
                path: self.path.clone(),
                source,
            })
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NullVisualizationSink;

impl VisualizationSink for NullVisualizationSink {
    fn publish(&mut self, _frame: &RgbImage) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Persistence of one calibration result.
pub trait MatrixSink {
    fn persist(&mut self, transform: &HomogeneousTransform) -> Result<(), SinkError>;
}

/// Four whitespace-delimited rows in `%.18e` notation, replaced on each
/// capture. The text goes to a sibling `.tmp` file first and is renamed over
/// the target, so readers never see a partial matrix.
#[derive(Clone, Debug)]
pub struct TextMatrixSink {
    path: PathBuf,
}

impl TextMatrixSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl MatrixSink for TextMatrixSink {
    fn persist(&mut self, transform: &HomogeneousTransform) -> Result<(), SinkError> {
        let staging = self.staging_path();
        fs::write(&staging, transform.to_string()).map_err(|source| SinkError::Io {
            path: staging.clone(),
            source,
        })?;
        fs::rename(&staging, &self.path).map_err(|source| {
            let _ = fs::remove_file(&staging);
            SinkError::Io {
                path: self.path.clone(),
                source,
            }
        })
    }
}

/// Read back a matrix written by [`TextMatrixSink`], validating it as rigid.
pub fn read_matrix_file(path: impl AsRef<Path>) -> Result<HomogeneousTransform, SinkError> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path).map_err(|source| SinkError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    HomogeneousTransform::parse_rows(&raw).map_err(|source| SinkError::Matrix {
        path: path.to_path_buf(),
        source,
    })
}
