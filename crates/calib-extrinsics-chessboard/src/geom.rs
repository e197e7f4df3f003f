use std::f32::consts::{FRAC_PI_2, PI};

use nalgebra::Vector2;

/// Absolute difference between two angles (radians), in `[0, π]`.
pub fn angle_diff_abs(a: f32, b: f32) -> f32 {
    let d = (b - a).rem_euclid(2.0 * PI);
    if d > PI {
        2.0 * PI - d
    } else {
        d
    }
}

/// Whether two undirected directions are orthogonal within `tolerance`.
pub fn is_orthogonal(a: f32, b: f32, tolerance: f32) -> bool {
    let d = angle_diff_abs(a, b);
    let d = d.min(PI - d);
    (FRAC_PI_2 - d).abs() <= tolerance.abs()
}

/// Angle between an undirected axis and a directed vector angle, in `[0, π/2]`.
pub fn axis_vec_diff(axis_angle: f32, vec_angle: f32) -> f32 {
    let d = angle_diff_abs(axis_angle, vec_angle);
    d.min(PI - d)
}

pub fn angle_to_unit(theta: f32) -> Vector2<f32> {
    Vector2::new(theta.cos(), theta.sin())
}

/// Image-space grid axes `(right, down)` from the two diagonal directions.
///
/// The bisectors of the diagonals are the board axes. `right` is the one
/// pointing most along image +x; `down` is `right` turned by +90° in image
/// coordinates, so `right × down` points away from the camera.
pub fn grid_axes_from_diagonals(diagonals: [f32; 2]) -> Option<(Vector2<f32>, Vector2<f32>)> {
    let a = angle_to_unit(diagonals[0]);
    let b = angle_to_unit(diagonals[1]);
    let axes = [a + b, a - b];
    if axes.iter().any(|v| v.norm_squared() < 1e-6) {
        return None;
    }
    let right = axes
        .iter()
        .flat_map(|v| [v.normalize(), -v.normalize()])
        .max_by(|p, q| p.x.total_cmp(&q.x))?;
    Some((right, Vector2::new(-right.y, right.x)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_4;

    #[test]
    fn aligned_and_orthogonal_cases() {
        assert!(is_orthogonal(0.0, FRAC_PI_2, 1e-3));
        assert!(is_orthogonal(0.1, 0.1 + FRAC_PI_2 + PI, 1e-3));
        assert!(!is_orthogonal(0.0, 0.25, 0.05));
        assert!((axis_vec_diff(0.0, PI) - 0.0).abs() < 1e-6);
        assert!((axis_vec_diff(FRAC_PI_4, 0.0) - FRAC_PI_4).abs() < 1e-6);
    }

    #[test]
    fn axes_follow_image_orientation() {
        let (right, down) =
            grid_axes_from_diagonals([FRAC_PI_4, 3.0 * FRAC_PI_4]).expect("axes");
        assert!((right - Vector2::new(1.0, 0.0)).norm() < 1e-5);
        assert!((down - Vector2::new(0.0, 1.0)).norm() < 1e-5);

        // Board rotated by 30° in the image.
        let r = 30f32.to_radians();
        let (right, down) =
            grid_axes_from_diagonals([FRAC_PI_4 + r, 3.0 * FRAC_PI_4 + r]).expect("axes");
        assert!((right - angle_to_unit(r)).norm() < 1e-5);
        assert!((down - angle_to_unit(r + FRAC_PI_2)).norm() < 1e-5);

        assert!(grid_axes_from_diagonals([0.3, 0.3]).is_none());
    }
}
