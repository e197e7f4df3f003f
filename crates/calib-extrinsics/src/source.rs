//! Camera frame sources.

use std::fs;
use std::path::{Path, PathBuf};

use calib_extrinsics_core::{CameraError, CameraIntrinsics};
use image::DynamicImage;

#[derive(thiserror::Error, Debug)]
pub enum AcquireError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse camera info {path}: {source}")]
    CameraInfo {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid intrinsics in {path}: {source}")]
    Intrinsics {
        path: PathBuf,
        #[source]
        source: CameraError,
    },
    #[error("failed to decode image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// One camera channel: intrinsics once at startup, a frame every cycle.
pub trait ImageSource {
    fn intrinsics(&self) -> &CameraIntrinsics;
    fn acquire(&mut self) -> Result<DynamicImage, AcquireError>;
}

/// Re-reads an image file that an external grabber keeps overwriting.
#[derive(Clone, Debug)]
pub struct FileImageSource {
    image_path: PathBuf,
    intrinsics: CameraIntrinsics,
}

impl FileImageSource {
    pub fn new(image_path: impl Into<PathBuf>, intrinsics: CameraIntrinsics) -> Self {
        Self {
            image_path: image_path.into(),
            intrinsics,
        }
    }

    /// Intrinsics from a camera-info JSON file (`{"k": [...9], "d": [...]}`).
    pub fn from_camera_info(
        image_path: impl Into<PathBuf>,
        camera_info_path: impl AsRef<Path>,
    ) -> Result<Self, AcquireError> {
        Ok(Self::new(image_path, load_intrinsics(camera_info_path)?))
    }

    pub fn image_path(&self) -> &Path {
        &self.image_path
    }
}

impl ImageSource for FileImageSource {
    fn intrinsics(&self) -> &CameraIntrinsics {
        &self.intrinsics
    }

    fn acquire(&mut self) -> Result<DynamicImage, AcquireError> {
        image::open(&self.image_path).map_err(|source| AcquireError::Image {
            path: self.image_path.clone(),
            source,
        })
    }
}

pub fn load_intrinsics(path: impl AsRef<Path>) -> Result<CameraIntrinsics, AcquireError> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path).map_err(|source| AcquireError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let info: calib_extrinsics_core::CameraInfo =
        serde_json::from_str(&raw).map_err(|source| AcquireError::CameraInfo {
            path: path.to_path_buf(),
            source,
        })?;
    CameraIntrinsics::try_from(info).map_err(|source| AcquireError::Intrinsics {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_intrinsics_and_frames() {
        let dir = tempfile::tempdir().expect("tempdir");
        let info = dir.path().join("info.json");
        fs::write(&info, r#"{"k": [600, 0, 320, 0, 600, 240, 0, 0, 1], "d": [0.1, 0, 0, 0, 0]}"#)
            .expect("write");
        let img_path = dir.path().join("frame.png");
        let mut source = FileImageSource::from_camera_info(&img_path, &info).expect("source");
        assert_eq!(source.intrinsics().k()[(0, 2)], 320.0);

        assert!(matches!(source.acquire(), Err(AcquireError::Image { .. })));
        image::GrayImage::from_pixel(4, 3, image::Luma([7]))
            .save(&img_path)
            .expect("save");
        let frame = source.acquire().expect("frame");
        assert_eq!((frame.width(), frame.height()), (4, 3));
    }

    #[test]
    fn malformed_camera_info_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let info = dir.path().join("info.json");
        fs::write(&info, r#"{"k": [1, 2, 3]}"#).expect("write");
        assert!(matches!(
            load_intrinsics(&info),
            Err(AcquireError::CameraInfo { .. }) | Err(AcquireError::Intrinsics { .. })
        ));
        assert!(matches!(
            load_intrinsics(dir.path().join("missing.json")),
            Err(AcquireError::Io { .. })
        ));
    }
}
