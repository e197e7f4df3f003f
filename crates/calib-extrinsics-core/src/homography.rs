use nalgebra::DMatrix;

use crate::{Mat3, Pt2, Real, Vec3};

/// Plane-to-plane projective map `dst ~ H * src`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Homography {
    pub h: Mat3,
}

impl Homography {
    pub fn new(h: Mat3) -> Self {
        Self { h }
    }

    #[inline]
    pub fn apply(&self, p: &Pt2) -> Pt2 {
        let v = self.h * Vec3::new(p.x, p.y, 1.0);
        Pt2::new(v.x / v.z, v.y / v.z)
    }

    pub fn inverse(&self) -> Option<Self> {
        self.h.try_inverse().map(Self::new)
    }
}

/// Hartley normalization: translate to the centroid and scale so the mean
/// distance from it is √2.
fn normalize_points(pts: &[Pt2]) -> Option<(Vec<Pt2>, Mat3)> {
    let n = pts.len() as Real;
    let (sx, sy) = pts
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    let (cx, cy) = (sx / n, sy / n);
    let mean_dist = pts
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<Real>()
        / n;
    if mean_dist <= 1e-12 {
        return None;
    }

    let s = std::f64::consts::SQRT_2 / mean_dist;
    let t = Mat3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let out = pts
        .iter()
        .map(|p| Pt2::new(s * (p.x - cx), s * (p.y - cy)))
        .collect();
    Some((out, t))
}

/// Estimate `H` with `dst ~ H * src` from at least four correspondences
/// (normalized DLT, solved by SVD).
pub fn estimate_homography(src: &[Pt2], dst: &[Pt2]) -> Option<Homography> {
    if src.len() != dst.len() || src.len() < 4 {
        return None;
    }

    let (s, ts) = normalize_points(src)?;
    let (d, td) = normalize_points(dst)?;

    // At least 9 rows so the SVD yields the full right-singular basis.
    let rows = (2 * src.len()).max(9);
    let mut a = DMatrix::<Real>::zeros(rows, 9);
    for (k, (p, q)) in s.iter().zip(d.iter()).enumerate() {
        let (x, y, u, v) = (p.x, p.y, q.x, q.y);

        // [ -x -y -1   0  0  0   u*x u*y u ]
        a[(2 * k, 0)] = -x;
        a[(2 * k, 1)] = -y;
        a[(2 * k, 2)] = -1.0;
        a[(2 * k, 6)] = u * x;
        a[(2 * k, 7)] = u * y;
        a[(2 * k, 8)] = u;

        // [ 0  0  0  -x -y -1   v*x v*y v ]
        a[(2 * k + 1, 3)] = -x;
        a[(2 * k + 1, 4)] = -y;
        a[(2 * k + 1, 5)] = -1.0;
        a[(2 * k + 1, 6)] = v * x;
        a[(2 * k + 1, 7)] = v * y;
        a[(2 * k + 1, 8)] = v;
    }

    let svd = a.svd(false, true);
    let vt = svd.v_t?;
    // nalgebra does not sort singular values; pick the smallest explicitly.
    let (min_idx, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    let h = vt.row(min_idx);
    let hn = Mat3::from_row_slice(&[h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]]);

    // H = Td^{-1} * Hn * Ts
    let h_den = td.try_inverse()? * hn * ts;
    let scale = h_den[(2, 2)];
    if scale.abs() < 1e-12 || !scale.is_finite() {
        return None;
    }
    Some(Homography::new(h_den / scale))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ground_truth() -> Homography {
        Homography::new(Mat3::new(
            1.0, 0.2, 12.0, //
            -0.1, 0.9, 6.0, //
            0.0006, 0.0004, 1.0,
        ))
    }

    #[test]
    fn recovers_h_from_four_points() {
        let gt = ground_truth();
        let src = [
            Pt2::new(0.0, 0.0),
            Pt2::new(180.0, 0.0),
            Pt2::new(180.0, 130.0),
            Pt2::new(0.0, 130.0),
        ];
        let dst: Vec<Pt2> = src.iter().map(|p| gt.apply(p)).collect();
        let est = estimate_homography(&src, &dst).expect("estimate");
        for p in [Pt2::new(60.0, 40.0), Pt2::new(150.0, 120.0)] {
            assert_relative_eq!(est.apply(&p), gt.apply(&p), epsilon = 1e-6);
        }
    }

    #[test]
    fn recovers_h_from_grid() {
        let gt = ground_truth();
        let src: Vec<Pt2> = (0..4)
            .flat_map(|y| (0..5).map(move |x| Pt2::new(x as Real * 40.0, y as Real * 50.0)))
            .collect();
        let dst: Vec<Pt2> = src.iter().map(|p| gt.apply(p)).collect();
        let est = estimate_homography(&src, &dst).expect("estimate");
        assert_relative_eq!(est.h, gt.h, epsilon = 1e-8);

        let inv = est.inverse().expect("invertible");
        let p = Pt2::new(33.0, 71.0);
        assert_relative_eq!(inv.apply(&est.apply(&p)), p, epsilon = 1e-8);
    }

    #[test]
    fn rejects_bad_inputs() {
        let four = [Pt2::new(0.0, 0.0); 4];
        assert!(estimate_homography(&four[..3], &four[..3]).is_none());
        assert!(estimate_homography(&four, &four[..3]).is_none());
        // All points coincide: normalization is undefined.
        assert!(estimate_homography(&four, &four).is_none());
    }
}
