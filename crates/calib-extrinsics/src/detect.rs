//! ChESS corner detection adapted into the core [`Corner`] type.

use calib_extrinsics_core::Corner;
use chess_corners::{find_chess_corners_image, ChessConfig, CornerDescriptor};
use nalgebra::Point2;

#[cfg(feature = "tracing")]
use tracing::instrument;

pub const DEFAULT_CHESS_THRESHOLD_REL: f32 = 0.2;

/// Reasonable default settings for the `chess-corners` ChESS detector.
pub fn default_chess_config() -> ChessConfig {
    chess_config(DEFAULT_CHESS_THRESHOLD_REL)
}

/// Single-scale ChESS with the given relative response threshold.
pub fn chess_config(threshold_rel: f32) -> ChessConfig {
    let mut cfg = ChessConfig::single_scale();
    cfg.params.threshold_rel = threshold_rel;
    cfg.params.nms_radius = 2;
    cfg
}

pub fn adapt_chess_corner(c: &CornerDescriptor) -> Corner {
    Corner {
        position: Point2::new(c.x, c.y),
        orientation: c.orientation,
        orientation_cluster: None,
        strength: c.response,
    }
}

/// Detect ChESS corners and adapt them into `calib-extrinsics-core::Corner`.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(img, cfg), fields(width = img.width(), height = img.height()))
)]
pub fn detect_corners(img: &::image::GrayImage, cfg: &ChessConfig) -> Vec<Corner> {
    find_chess_corners_image(img, cfg)
        .iter()
        .map(adapt_chess_corner)
        .collect()
}
