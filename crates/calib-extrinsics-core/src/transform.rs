//! 4×4 homogeneous rigid transforms.
//!
//! Naming convention: `T_a_to_b` maps coordinates expressed in frame `b` into
//! frame `a` (it is the pose of `b` seen from `a`). Chaining therefore reads
//! left to right: `T_a_to_b.compose(&T_b_to_c) == T_a_to_c`.

use std::fmt;
use std::ops::Mul;

use nalgebra::{Isometry3, Quaternion, Rotation3, UnitQuaternion};
use serde::{Deserialize, Serialize};

use crate::{Mat3, Mat4, Real, Vec3};

/// Maximal deviation accepted when validating a rotation block
/// (`|RᵀR - I|∞` and `|det R - 1|`).
pub const RIGID_TOLERANCE: Real = 1e-6;

/// Quaternions further than this from unit norm are rejected instead of
/// being normalised.
const QUATERNION_NORM_TOLERANCE: Real = 1e-3;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    #[error("transform contains non-finite entries")]
    NonFinite,
    #[error("rotation block is not orthonormal (max deviation {deviation:.3e})")]
    NotOrthonormal { deviation: Real },
    #[error("rotation block has determinant {det:.6}, expected +1")]
    NotProperRotation { det: Real },
    #[error("bottom row must be exactly [0, 0, 0, 1], got {row:?}")]
    BadBottomRow { row: [Real; 4] },
    #[error("quaternion norm {norm:.6} is not close to 1")]
    BadQuaternion { norm: Real },
    #[error("expected 4x4 matrix text, {0}")]
    Parse(String),
}

/// A rigid transform `[[R, p], [0, 0, 0, 1]]`.
///
/// Every constructor either takes an already valid rotation
/// ([`Rotation3`], [`UnitQuaternion`], [`Isometry3`]) or validates the rotation
/// block, so a value of this type always satisfies the rigid invariant up to
/// [`RIGID_TOLERANCE`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[[Real; 4]; 4]", into = "[[Real; 4]; 4]")]
pub struct HomogeneousTransform {
    m: Mat4,
}

impl HomogeneousTransform {
    pub fn identity() -> Self {
        Self { m: Mat4::identity() }
    }

    /// Embed a rotation and translation into a 4×4 matrix.
    pub fn from_rotation_translation(rotation: &Rotation3<Real>, translation: &Vec3) -> Self {
        let mut m = Mat4::identity();
        m.fixed_view_mut::<3, 3>(0, 0).copy_from(rotation.matrix());
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(translation);
        Self { m }
    }

    /// Like [`Self::from_rotation_translation`] but for a raw 3×3 block that
    /// still has to be checked.
    pub fn try_from_parts(rotation: &Mat3, translation: &Vec3) -> Result<Self, TransformError> {
        check_rotation(rotation)?;
        if translation.iter().any(|v| !v.is_finite()) {
            return Err(TransformError::NonFinite);
        }
        Ok(Self::from_rotation_translation(
            &Rotation3::from_matrix_unchecked(*rotation),
            translation,
        ))
    }

    /// Validate an arbitrary 4×4 matrix.
    pub fn try_from_matrix(m: Mat4) -> Result<Self, TransformError> {
        if m.iter().any(|v| !v.is_finite()) {
            return Err(TransformError::NonFinite);
        }
        let row = [m[(3, 0)], m[(3, 1)], m[(3, 2)], m[(3, 3)]];
        if row != [0.0, 0.0, 0.0, 1.0] {
            return Err(TransformError::BadBottomRow { row });
        }
        check_rotation(&m.fixed_view::<3, 3>(0, 0).into_owned())?;
        Ok(Self { m })
    }

    /// Build from a position and an `[x, y, z, w]` orientation quaternion,
    /// the usual shape of a robot link pose.
    pub fn from_position_quaternion(
        position: [Real; 3],
        quaternion_xyzw: [Real; 4],
    ) -> Result<Self, TransformError> {
        if position
            .iter()
            .chain(quaternion_xyzw.iter())
            .any(|v| !v.is_finite())
        {
            return Err(TransformError::NonFinite);
        }
        let [x, y, z, w] = quaternion_xyzw;
        let q = Quaternion::new(w, x, y, z);
        let norm = q.norm();
        if (norm - 1.0).abs() > QUATERNION_NORM_TOLERANCE {
            return Err(TransformError::BadQuaternion { norm });
        }
        let rotation = UnitQuaternion::from_quaternion(q).to_rotation_matrix();
        Ok(Self::from_rotation_translation(
            &rotation,
            &Vec3::new(position[0], position[1], position[2]),
        ))
    }

    /// `self · other`.
    pub fn compose(&self, other: &Self) -> Self {
        Self { m: self.m * other.m }
    }

    /// Closed-form rigid inverse: `R' = Rᵀ`, `p' = -Rᵀ p`.
    pub fn invert(&self) -> Self {
        let rt = self.rotation().transpose();
        let p = -(rt * self.translation());
        let mut m = Mat4::identity();
        m.fixed_view_mut::<3, 3>(0, 0).copy_from(&rt);
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&p);
        Self { m }
    }

    pub fn rotation(&self) -> Mat3 {
        self.m.fixed_view::<3, 3>(0, 0).into_owned()
    }

    pub fn translation(&self) -> Vec3 {
        self.m.fixed_view::<3, 1>(0, 3).into_owned()
    }

    pub fn matrix(&self) -> &Mat4 {
        &self.m
    }

    pub fn to_isometry(&self) -> Isometry3<Real> {
        let rotation = Rotation3::from_matrix_unchecked(self.rotation());
        Isometry3::from_parts(
            self.translation().into(),
            UnitQuaternion::from_rotation_matrix(&rotation),
        )
    }

    /// Row-major entries.
    pub fn to_rows(&self) -> [[Real; 4]; 4] {
        let mut rows = [[0.0; 4]; 4];
        for (r, row) in rows.iter_mut().enumerate() {
            for (c, v) in row.iter_mut().enumerate() {
                *v = self.m[(r, c)];
            }
        }
        rows
    }

    /// Parse four whitespace-delimited rows of four numbers, the format
    /// written by the result sinks.
    pub fn parse_rows(text: &str) -> Result<Self, TransformError> {
        let rows: Vec<Vec<Real>> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(|l| {
                l.split_whitespace()
                    .map(|tok| {
                        tok.parse::<Real>()
                            .map_err(|e| TransformError::Parse(format!("bad number {tok:?}: {e}")))
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<_, _>>()?;
        if rows.len() != 4 || rows.iter().any(|r| r.len() != 4) {
            return Err(TransformError::Parse(format!(
                "got {} rows with lengths {:?}",
                rows.len(),
                rows.iter().map(Vec::len).collect::<Vec<_>>()
            )));
        }
        let flat: Vec<Real> = rows.into_iter().flatten().collect();
        Self::try_from_matrix(Mat4::from_row_slice(&flat))
    }
}

impl Default for HomogeneousTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl From<Isometry3<Real>> for HomogeneousTransform {
    fn from(iso: Isometry3<Real>) -> Self {
        Self {
            m: iso.to_homogeneous(),
        }
    }
}

impl TryFrom<[[Real; 4]; 4]> for HomogeneousTransform {
    type Error = TransformError;

    fn try_from(rows: [[Real; 4]; 4]) -> Result<Self, Self::Error> {
        let flat: Vec<Real> = rows.iter().flatten().copied().collect();
        Self::try_from_matrix(Mat4::from_row_slice(&flat))
    }
}

impl From<HomogeneousTransform> for [[Real; 4]; 4] {
    fn from(t: HomogeneousTransform) -> Self {
        t.to_rows()
    }
}

impl Mul for HomogeneousTransform {
    type Output = HomogeneousTransform;

    fn mul(self, rhs: Self) -> Self::Output {
        self.compose(&rhs)
    }
}

impl<'a> Mul<&'a HomogeneousTransform> for &'a HomogeneousTransform {
    type Output = HomogeneousTransform;

    fn mul(self, rhs: &'a HomogeneousTransform) -> Self::Output {
        self.compose(rhs)
    }
}

/// Whitespace-delimited rows in `%.18e` notation.
impl fmt::Display for HomogeneousTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in self.to_rows() {
            let line: Vec<String> = row.iter().map(|v| format!("{v:.18e}")).collect();
            writeln!(f, "{}", line.join(" "))?;
        }
        Ok(())
    }
}

fn check_rotation(r: &Mat3) -> Result<(), TransformError> {
    if r.iter().any(|v| !v.is_finite()) {
        return Err(TransformError::NonFinite);
    }
    let deviation = (r.transpose() * r - Mat3::identity()).amax();
    if deviation > RIGID_TOLERANCE {
        return Err(TransformError::NotOrthonormal { deviation });
    }
    let det = r.determinant();
    if (det - 1.0).abs() > RIGID_TOLERANCE {
        return Err(TransformError::NotProperRotation { det });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample(roll: Real, pitch: Real, yaw: Real, t: [Real; 3]) -> HomogeneousTransform {
        HomogeneousTransform::from_rotation_translation(
            &Rotation3::from_euler_angles(roll, pitch, yaw),
            &Vec3::new(t[0], t[1], t[2]),
        )
    }

    #[test]
    fn identity_from_identity_parts() {
        let t = HomogeneousTransform::from_rotation_translation(&Rotation3::identity(), &Vec3::zeros());
        assert_eq!(*t.matrix(), Mat4::identity());
    }

    #[test]
    fn compose_with_inverse_is_identity() {
        for t in [
            sample(0.1, -0.4, 2.0, [0.3, -1.2, 4.0]),
            sample(3.0, 0.2, -1.1, [-10.0, 0.5, 0.01]),
            sample(0.0, 1.5, 0.0, [0.0, 0.0, 1.0]),
        ] {
            assert_relative_eq!(*t.compose(&t.invert()).matrix(), Mat4::identity(), epsilon = 1e-9);
            assert_relative_eq!(*t.invert().compose(&t).matrix(), Mat4::identity(), epsilon = 1e-9);
        }
    }

    #[test]
    fn closed_form_inverse_matches_generic_inverse() {
        let t = sample(0.7, -0.2, 1.3, [1.0, 2.0, -3.0]);
        let generic = t.matrix().try_inverse().expect("invertible");
        assert_relative_eq!(*t.invert().matrix(), generic, epsilon = 1e-12);
    }

    #[test]
    fn composition_is_associative() {
        let a = sample(0.1, 0.2, 0.3, [1.0, 0.0, 0.0]);
        let b = sample(-0.5, 0.0, 1.0, [0.0, 2.0, -1.0]);
        let c = sample(0.0, -1.2, 0.4, [0.3, 0.3, 0.3]);
        assert_relative_eq!(
            *a.compose(&b).compose(&c).matrix(),
            *a.compose(&b.compose(&c)).matrix(),
            epsilon = 1e-12
        );
        assert_eq!((a * b).matrix(), a.compose(&b).matrix());
    }

    #[test]
    fn chaining_maps_points_through_frames() {
        // T_a_to_b places b one metre along x of a; T_b_to_c rotates c by 90° about z.
        let a_to_b = sample(0.0, 0.0, 0.0, [1.0, 0.0, 0.0]);
        let b_to_c = sample(0.0, 0.0, std::f64::consts::FRAC_PI_2, [0.0, 0.0, 0.0]);
        let a_to_c = a_to_b.compose(&b_to_c);
        let p_c = nalgebra::Vector4::new(1.0, 0.0, 0.0, 1.0);
        let p_a = a_to_c.matrix() * p_c;
        assert_relative_eq!(p_a, nalgebra::Vector4::new(1.0, 1.0, 0.0, 1.0), epsilon = 1e-12);
    }

    #[test]
    fn rejects_non_rigid_matrices() {
        let mut m = Mat4::identity();
        m[(0, 0)] = 2.0;
        assert!(matches!(
            HomogeneousTransform::try_from_matrix(m),
            Err(TransformError::NotOrthonormal { .. })
        ));

        let mut m = Mat4::identity();
        m[(2, 2)] = -1.0;
        assert!(matches!(
            HomogeneousTransform::try_from_matrix(m),
            Err(TransformError::NotProperRotation { .. })
        ));

        let mut m = Mat4::identity();
        m[(3, 0)] = 1e-3;
        assert!(matches!(
            HomogeneousTransform::try_from_matrix(m),
            Err(TransformError::BadBottomRow { .. })
        ));

        let mut m = Mat4::identity();
        m[(1, 3)] = Real::NAN;
        assert_eq!(
            HomogeneousTransform::try_from_matrix(m),
            Err(TransformError::NonFinite)
        );
    }

    #[test]
    fn quaternion_pose_matches_rotation() {
        let half = std::f64::consts::FRAC_PI_4;
        // 90° about z.
        let t = HomogeneousTransform::from_position_quaternion(
            [0.5, -0.5, 2.0],
            [0.0, 0.0, half.sin(), half.cos()],
        )
        .expect("valid pose");
        let expected = sample(0.0, 0.0, std::f64::consts::FRAC_PI_2, [0.5, -0.5, 2.0]);
        assert_relative_eq!(*t.matrix(), *expected.matrix(), epsilon = 1e-12);

        assert!(matches!(
            HomogeneousTransform::from_position_quaternion([0.0; 3], [0.0, 0.0, 0.0, 0.5]),
            Err(TransformError::BadQuaternion { .. })
        ));
    }

    #[test]
    fn text_rows_round_trip() {
        let t = sample(0.3, 0.2, -0.9, [0.123456789, -4.0, 1e-5]);
        let text = t.to_string();
        assert_eq!(text.lines().count(), 4);
        let back = HomogeneousTransform::parse_rows(&text).expect("parse");
        assert_relative_eq!(*back.matrix(), *t.matrix(), epsilon = 1e-15);

        assert!(matches!(
            HomogeneousTransform::parse_rows("1 0 0\n0 1 0\n0 0 1\n"),
            Err(TransformError::Parse(_))
        ));
    }

    #[test]
    fn isometry_conversion_round_trips() {
        let t = sample(-0.3, 0.8, 0.1, [0.0, 1.0, 2.0]);
        let back = HomogeneousTransform::from(t.to_isometry());
        assert_relative_eq!(*back.matrix(), *t.matrix(), epsilon = 1e-12);
    }
}
