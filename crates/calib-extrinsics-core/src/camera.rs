use serde::{Deserialize, Serialize};

use crate::{Mat3, Pt2, Pt3, Real, Vec2};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CameraError {
    #[error("camera matrix must have 9 entries, got {0}")]
    BadMatrixLen(usize),
    #[error("camera matrix is not a valid pinhole matrix (fx={fx}, fy={fy}, bottom row {bottom:?})")]
    BadMatrix { fx: Real, fy: Real, bottom: [Real; 3] },
    #[error("distortion must have 0, 4, 5 or 8 coefficients, got {0}")]
    BadDistortionLen(usize),
    #[error("distortion coefficients contain non-finite values")]
    NonFiniteDistortion,
}

/// Lens distortion in OpenCV order: `k1 k2 p1 p2 [k3 [k4 k5 k6]]`.
///
/// Missing trailing coefficients are zero. With `k4..k6` the radial term is
/// the rational model `(1 + k1 r² + k2 r⁴ + k3 r⁶) / (1 + k4 r² + k5 r⁴ + k6 r⁶)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Distortion {
    coeffs: [Real; 8],
}

impl Distortion {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn from_slice(d: &[Real]) -> Result<Self, CameraError> {
        if !matches!(d.len(), 0 | 4 | 5 | 8) {
            return Err(CameraError::BadDistortionLen(d.len()));
        }
        if d.iter().any(|v| !v.is_finite()) {
            return Err(CameraError::NonFiniteDistortion);
        }
        let mut coeffs = [0.0; 8];
        coeffs[..d.len()].copy_from_slice(d);
        Ok(Self { coeffs })
    }

    pub fn coeffs(&self) -> &[Real; 8] {
        &self.coeffs
    }

    pub fn is_zero(&self) -> bool {
        self.coeffs.iter().all(|&c| c == 0.0)
    }

    /// Apply distortion to an ideal normalized image point.
    pub fn distort(&self, n: &Vec2) -> Vec2 {
        let [k1, k2, p1, p2, k3, k4, k5, k6] = self.coeffs;
        let (x, y) = (n.x, n.y);
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;
        let radial = (1.0 + k1 * r2 + k2 * r4 + k3 * r6) / (1.0 + k4 * r2 + k5 * r4 + k6 * r6);
        let xy = x * y;
        let dx = 2.0 * p1 * xy + p2 * (r2 + 2.0 * x * x);
        let dy = p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * xy;
        Vec2::new(x * radial + dx, y * radial + dy)
    }

    /// Invert [`Self::distort`] by fixed-point iteration.
    pub fn undistort(&self, d: &Vec2, iters: usize) -> Vec2 {
        if self.is_zero() {
            return *d;
        }
        let mut n = *d;
        for _ in 0..iters.max(1) {
            let err = self.distort(&n) - d;
            n -= err;
            if err.norm_squared() < 1e-24 {
                break;
            }
        }
        n
    }
}

/// Pinhole intrinsics `K` plus distortion `D` of one camera channel.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CameraInfo", into = "CameraInfo")]
pub struct CameraIntrinsics {
    k: Mat3,
    k_inv: Mat3,
    distortion: Distortion,
}

/// Serialized form: row-major `k` (9 numbers) and the raw `d` vector, the
/// same layout a ROS `CameraInfo` message carries.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CameraInfo {
    pub k: Vec<Real>,
    #[serde(default)]
    pub d: Vec<Real>,
}

const UNDISTORT_ITERS: usize = 20;

impl CameraIntrinsics {
    pub fn new(k: Mat3, distortion: Distortion) -> Result<Self, CameraError> {
        let bottom = [k[(2, 0)], k[(2, 1)], k[(2, 2)]];
        let (fx, fy) = (k[(0, 0)], k[(1, 1)]);
        let bad = || CameraError::BadMatrix { fx, fy, bottom };
        if k.iter().any(|v| !v.is_finite()) || fx <= 0.0 || fy <= 0.0 || bottom != [0.0, 0.0, 1.0] {
            return Err(bad());
        }
        let k_inv = k.try_inverse().ok_or_else(bad)?;
        Ok(Self {
            k,
            k_inv,
            distortion,
        })
    }

    /// Build from a row-major `K` slice and an OpenCV distortion slice.
    pub fn from_slices(k: &[Real], d: &[Real]) -> Result<Self, CameraError> {
        if k.len() != 9 {
            return Err(CameraError::BadMatrixLen(k.len()));
        }
        Self::new(Mat3::from_row_slice(k), Distortion::from_slice(d)?)
    }

    pub fn k(&self) -> &Mat3 {
        &self.k
    }

    pub fn distortion(&self) -> &Distortion {
        &self.distortion
    }

    /// Project a camera-frame point to pixels. `None` behind the camera.
    pub fn project(&self, p: &Pt3) -> Option<Pt2> {
        if p.z <= Real::EPSILON {
            return None;
        }
        let d = self.distortion.distort(&Vec2::new(p.x / p.z, p.y / p.z));
        Some(self.normalized_to_pixel(&d))
    }

    pub fn normalized_to_pixel(&self, n: &Vec2) -> Pt2 {
        let v = self.k * nalgebra::Vector3::new(n.x, n.y, 1.0);
        Pt2::new(v.x / v.z, v.y / v.z)
    }

    /// Pixel to ideal (undistorted) normalized coordinates.
    pub fn undistort_pixel(&self, px: &Pt2) -> Vec2 {
        let v = self.k_inv * nalgebra::Vector3::new(px.x, px.y, 1.0);
        let d = Vec2::new(v.x / v.z, v.y / v.z);
        self.distortion.undistort(&d, UNDISTORT_ITERS)
    }
}

impl TryFrom<CameraInfo> for CameraIntrinsics {
    type Error = CameraError;

    fn try_from(info: CameraInfo) -> Result<Self, Self::Error> {
        Self::from_slices(&info.k, &info.d)
    }
}

impl From<CameraIntrinsics> for CameraInfo {
    fn from(cam: CameraIntrinsics) -> Self {
        let k = (0..3)
            .flat_map(|r| (0..3).map(move |c| (r, c)))
            .map(|rc| cam.k[rc])
            .collect();
        let d = if cam.distortion.is_zero() {
            Vec::new()
        } else {
            cam.distortion.coeffs.to_vec()
        };
        Self { k, d }
    }
}
