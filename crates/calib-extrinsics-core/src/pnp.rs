//! Planar perspective-n-point.
//!
//! The board plane is `z = 0` in board coordinates. The initial pose comes
//! from the plane-to-image homography in undistorted normalized coordinates;
//! Levenberg–Marquardt then refines all six degrees of freedom against the
//! pixel reprojection error through the full distortion model.

use nalgebra::{Matrix6, Rotation3, Vector6};
use serde::{Deserialize, Serialize};

use crate::{estimate_homography, CameraIntrinsics, HomogeneousTransform, Mat3, Pt2, Pt3, Real, Vec3};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PoseError {
    #[error("object and image point counts differ ({object} vs {image})")]
    LengthMismatch { object: usize, image: usize },
    #[error("need at least {need} correspondences, got {got}")]
    TooFewPoints { got: usize, need: usize },
    #[error("object points are not on the z = 0 plane")]
    NonPlanar,
    #[error("degenerate point configuration (homography estimation failed)")]
    Degenerate,
    #[error("board lies behind the camera")]
    BehindCamera,
    #[error("reprojection RMS {rms_px:.3} px exceeds bound {max_rms_px:.3} px")]
    NotConverged { rms_px: Real, max_rms_px: Real },
}

/// Levenberg–Marquardt settings and the acceptance bound.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseRefineParams {
    pub max_iters: usize,
    /// Reprojection RMS above which the pose is rejected (pixels).
    pub max_rms_px: Real,
    pub initial_lambda: Real,
    /// Stop once the parameter step norm falls below this.
    pub step_tolerance: Real,
}

impl Default for PoseRefineParams {
    fn default() -> Self {
        Self {
            max_iters: 50,
            max_rms_px: 2.0,
            initial_lambda: 1e-3,
            step_tolerance: 1e-12,
        }
    }
}

/// Board pose in the camera frame: `x_cam = rotation * x_board + translation`.
#[derive(Clone, Debug, PartialEq)]
pub struct PlanarPose {
    pub rotation: Rotation3<Real>,
    pub translation: Vec3,
    /// Reprojection RMS in pixels after refinement.
    pub rms_px: Real,
    pub iterations: usize,
}

impl PlanarPose {
    /// The camera-to-board transform (maps board coordinates into the camera frame).
    pub fn to_transform(&self) -> HomogeneousTransform {
        HomogeneousTransform::from_rotation_translation(&self.rotation, &self.translation)
    }
}

const MIN_POINTS: usize = 4;
const PLANE_TOLERANCE: Real = 1e-9;
const JACOBIAN_STEP: Real = 1e-7;

/// Solve the pose of a planar target from 2-D/3-D correspondences.
pub fn solve_planar_pose(
    object: &[Pt3],
    image: &[Pt2],
    camera: &CameraIntrinsics,
    params: &PoseRefineParams,
) -> Result<PlanarPose, PoseError> {
    if object.len() != image.len() {
        return Err(PoseError::LengthMismatch {
            object: object.len(),
            image: image.len(),
        });
    }
    if object.len() < MIN_POINTS {
        return Err(PoseError::TooFewPoints {
            got: object.len(),
            need: MIN_POINTS,
        });
    }
    if object.iter().any(|p| p.z.abs() > PLANE_TOLERANCE) {
        return Err(PoseError::NonPlanar);
    }

    let (rotation, translation) = initial_pose(object, image, camera)?;
    let (rotation, translation, cost, iterations) =
        refine(object, image, camera, params, rotation, translation)?;

    if object
        .iter()
        .any(|p| (rotation * p.coords + translation).z <= 0.0)
    {
        return Err(PoseError::BehindCamera);
    }

    let rms_px = (cost / object.len() as Real).sqrt();
    if !rms_px.is_finite() || rms_px > params.max_rms_px {
        return Err(PoseError::NotConverged {
            rms_px,
            max_rms_px: params.max_rms_px,
        });
    }
    log::debug!("planar pose: rms {rms_px:.4} px after {iterations} iterations");

    Ok(PlanarPose {
        rotation,
        translation,
        rms_px,
        iterations,
    })
}

/// Homography decomposition `H ~ [r1 r2 t]` projected onto SO(3).
fn initial_pose(
    object: &[Pt3],
    image: &[Pt2],
    camera: &CameraIntrinsics,
) -> Result<(Rotation3<Real>, Vec3), PoseError> {
    let src: Vec<Pt2> = object.iter().map(|p| Pt2::new(p.x, p.y)).collect();
    let dst: Vec<Pt2> = image
        .iter()
        .map(|px| Pt2::from(camera.undistort_pixel(px)))
        .collect();
    let h = estimate_homography(&src, &dst).ok_or(PoseError::Degenerate)?.h;

    let (h1, h2, h3) = (h.column(0), h.column(1), h.column(2));
    let norm = 0.5 * (h1.norm() + h2.norm());
    if norm <= Real::EPSILON || !norm.is_finite() {
        return Err(PoseError::Degenerate);
    }
    let mut lambda = 1.0 / norm;
    if h3[2] * lambda < 0.0 {
        lambda = -lambda;
    }

    let r1 = h1 * lambda;
    let r2 = h2 * lambda;
    let r3 = r1.cross(&r2);
    let t = Vec3::from(h3 * lambda);
    let approx = Mat3::from_columns(&[r1, r2, r3]);

    let svd = approx.svd(true, true);
    let (Some(mut u), Some(v_t)) = (svd.u, svd.v_t) else {
        return Err(PoseError::Degenerate);
    };
    if (u * v_t).determinant() < 0.0 {
        u.column_mut(2).neg_mut();
    }
    let r = Rotation3::from_matrix_unchecked(u * v_t);

    if t.z <= 0.0 {
        return Err(PoseError::BehindCamera);
    }
    Ok((r, t))
}

/// Stacked pixel residuals `projected - observed`; `None` if any point is
/// behind the camera.
fn residuals(
    object: &[Pt3],
    image: &[Pt2],
    camera: &CameraIntrinsics,
    r: &Rotation3<Real>,
    t: &Vec3,
) -> Option<Vec<Real>> {
    let mut out = Vec::with_capacity(2 * object.len());
    for (p, obs) in object.iter().zip(image) {
        let proj = camera.project(&Pt3::from(r * p.coords + t))?;
        out.push(proj.x - obs.x);
        out.push(proj.y - obs.y);
    }
    Some(out)
}

fn perturb(r: &Rotation3<Real>, t: &Vec3, delta: &Vector6<Real>) -> (Rotation3<Real>, Vec3) {
    let dw = Vec3::new(delta[0], delta[1], delta[2]);
    let dt = Vec3::new(delta[3], delta[4], delta[5]);
    (Rotation3::new(dw) * r, t + dt)
}

fn sum_sq(v: &[Real]) -> Real {
    v.iter().map(|x| x * x).sum()
}

/// Levenberg–Marquardt on a left-multiplied axis-angle increment plus a
/// translation increment, with a central-difference Jacobian.
fn refine(
    object: &[Pt3],
    image: &[Pt2],
    camera: &CameraIntrinsics,
    params: &PoseRefineParams,
    mut r: Rotation3<Real>,
    mut t: Vec3,
) -> Result<(Rotation3<Real>, Vec3, Real, usize), PoseError> {
    let mut res = residuals(object, image, camera, &r, &t).ok_or(PoseError::BehindCamera)?;
    let mut cost = sum_sq(&res);
    let mut lambda = params.initial_lambda;
    let mut iterations = 0;

    while iterations < params.max_iters {
        iterations += 1;

        let mut jac = vec![[0.0; 6]; res.len()];
        for k in 0..6 {
            let mut step = Vector6::zeros();
            step[k] = JACOBIAN_STEP;
            let (rp, tp) = perturb(&r, &t, &step);
            let (rm, tm) = perturb(&r, &t, &(-step));
            let plus = residuals(object, image, camera, &rp, &tp).ok_or(PoseError::BehindCamera)?;
            let minus =
                residuals(object, image, camera, &rm, &tm).ok_or(PoseError::BehindCamera)?;
            for (row, (a, b)) in jac.iter_mut().zip(plus.iter().zip(&minus)) {
                row[k] = (a - b) / (2.0 * JACOBIAN_STEP);
            }
        }

        let mut jtj = Matrix6::<Real>::zeros();
        let mut jtr = Vector6::<Real>::zeros();
        for (row, &e) in jac.iter().zip(&res) {
            let j = Vector6::from_column_slice(row);
            jtj += j * j.transpose();
            jtr += j * e;
        }

        let mut accepted = false;
        while lambda < 1e12 {
            let mut a = jtj;
            for d in 0..6 {
                a[(d, d)] += lambda * jtj[(d, d)].max(1e-12);
            }
            let Some(delta) = a.lu().solve(&(-jtr)) else {
                lambda *= 10.0;
                continue;
            };
            let (r_new, t_new) = perturb(&r, &t, &delta);
            match residuals(object, image, camera, &r_new, &t_new) {
                Some(res_new) if sum_sq(&res_new) <= cost => {
                    let converged = delta.norm() < params.step_tolerance;
                    r = r_new;
                    t = t_new;
                    cost = sum_sq(&res_new);
                    res = res_new;
                    lambda = (lambda * 0.1).max(1e-12);
                    accepted = true;
                    if converged {
                        return Ok((r, t, cost, iterations));
                    }
                    break;
                }
                _ => lambda *= 10.0,
            }
        }

        if !accepted {
            break;
        }
    }

    Ok((r, t, cost, iterations))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TargetGeometry;
    use approx::assert_relative_eq;

    fn camera() -> CameraIntrinsics {
        CameraIntrinsics::from_slices(
            &[615.0, 0.0, 322.0, 0.0, 612.0, 241.0, 0.0, 0.0, 1.0],
            &[-0.12, 0.05, 0.0008, -0.0006, -0.01],
        )
        .expect("camera")
    }

    fn board() -> Vec<Pt3> {
        TargetGeometry::default().object_points()
    }

    fn project_all(cam: &CameraIntrinsics, r: &Rotation3<Real>, t: &Vec3, obj: &[Pt3]) -> Vec<Pt2> {
        obj.iter()
            .map(|p| cam.project(&Pt3::from(r * p.coords + t)).expect("in front"))
            .collect()
    }

    #[test]
    fn recovers_synthetic_pose() {
        let cam = camera();
        let obj = board();
        let r = Rotation3::from_euler_angles(0.25, -0.3, 0.6);
        let t = Vec3::new(-0.04, 0.03, 0.45);
        let img = project_all(&cam, &r, &t, &obj);

        let pose = solve_planar_pose(&obj, &img, &cam, &PoseRefineParams::default())
            .expect("pose");
        assert!(pose.rotation.angle_to(&r) < 1e-6);
        assert_relative_eq!(pose.translation, t, epsilon = 1e-6);
        assert!(pose.rms_px < 1e-6);

        let m = pose.to_transform();
        assert_relative_eq!(m.translation(), t, epsilon = 1e-6);
    }

    #[test]
    fn fronto_parallel_board_at_one_metre() {
        let cam = CameraIntrinsics::from_slices(
            &[600.0, 0.0, 320.0, 0.0, 600.0, 240.0, 0.0, 0.0, 1.0],
            &[],
        )
        .expect("camera");
        let obj = board();
        let r = Rotation3::identity();
        let t = Vec3::new(0.0, 0.0, 1.0);
        let img = project_all(&cam, &r, &t, &obj);

        let pose = solve_planar_pose(&obj, &img, &cam, &PoseRefineParams::default())
            .expect("pose");
        assert!(pose.rotation.angle() < 1e-6);
        assert_relative_eq!(pose.translation, t, epsilon = 1e-6);
    }

    #[test]
    fn tolerates_small_pixel_noise() {
        let cam = camera();
        let obj = board();
        let r = Rotation3::from_euler_angles(-0.1, 0.2, -0.4);
        let t = Vec3::new(0.02, -0.01, 0.5);
        let img: Vec<Pt2> = project_all(&cam, &r, &t, &obj)
            .into_iter()
            .enumerate()
            .map(|(k, p)| {
                let e = 0.2 * ((k as Real) * 1.7).sin();
                Pt2::new(p.x + e, p.y - e)
            })
            .collect();

        let pose = solve_planar_pose(&obj, &img, &cam, &PoseRefineParams::default())
            .expect("pose");
        assert!(pose.rms_px < 0.3);
        assert!(pose.rotation.angle_to(&r) < 1e-2);
        assert_relative_eq!(pose.translation, t, epsilon = 2e-3);
    }

    #[test]
    fn gross_outlier_fails_the_rms_bound() {
        let cam = camera();
        let obj = board();
        let r = Rotation3::from_euler_angles(0.1, 0.1, 0.0);
        let t = Vec3::new(0.0, 0.0, 0.5);
        let mut img = project_all(&cam, &r, &t, &obj);
        img[10].x += 60.0;
        img[11].y -= 60.0;

        let err = solve_planar_pose(&obj, &img, &cam, &PoseRefineParams::default())
            .expect_err("outliers");
        assert!(matches!(err, PoseError::NotConverged { .. }));
    }

    #[test]
    fn rejects_malformed_inputs() {
        let cam = camera();
        let obj = board();
        let img = vec![Pt2::new(0.0, 0.0); 3];
        let params = PoseRefineParams::default();
        assert_eq!(
            solve_planar_pose(&obj, &img, &cam, &params),
            Err(PoseError::LengthMismatch {
                object: obj.len(),
                image: 3
            })
        );
        assert_eq!(
            solve_planar_pose(&obj[..3], &img, &cam, &params),
            Err(PoseError::TooFewPoints { got: 3, need: 4 })
        );
        let mut lifted = obj[..4].to_vec();
        lifted[2].z = 0.01;
        let img4 = vec![Pt2::new(1.0, 2.0); 4];
        assert_eq!(
            solve_planar_pose(&lifted, &img4, &cam, &params),
            Err(PoseError::NonPlanar)
        );
    }
}
