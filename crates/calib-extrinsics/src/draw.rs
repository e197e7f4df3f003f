//! Annotated visualization frames.
//!
//! Detected corners are marked and joined in grid order, the board axes are
//! projected through the channel's intrinsics (x red, y green, z blue), and
//! the two channels are placed side by side.

use calib_extrinsics_core::{CameraIntrinsics, GridCoords, Pt2, Pt3, Real, TargetGeometry};
use image::{imageops, Rgb, RgbImage};

use crate::solver::BoardPose;

const AXIS_X: Rgb<u8> = Rgb([255, 0, 0]);
const AXIS_Y: Rgb<u8> = Rgb([0, 255, 0]);
const AXIS_Z: Rgb<u8> = Rgb([0, 0, 255]);
const CORNER: Rgb<u8> = Rgb([255, 255, 0]);

/// Axis length in board squares.
const AXIS_SQUARES: Real = 3.0;

/// Draw the detected board and its projected axes onto `img`.
pub fn annotate(img: &mut RgbImage, pose: &BoardPose, camera: &CameraIntrinsics, geometry: &TargetGeometry) {
    let det = &pose.detection;
    let by_grid: std::collections::HashMap<GridCoords, Pt2> = det
        .corners
        .iter()
        .map(|c| (c.grid, Pt2::new(c.position.x as Real, c.position.y as Real)))
        .collect();

    // Rows shade from red to blue so the grid order is visible.
    let rows = det.rows.max(1) as Real;
    for c in &det.corners {
        let t = c.grid.j as Real / rows;
        let color = Rgb([(255.0 * (1.0 - t)) as u8, 64, (255.0 * t) as u8]);
        let p = Pt2::new(c.position.x as Real, c.position.y as Real);
        for next in [
            GridCoords { i: c.grid.i + 1, j: c.grid.j },
            GridCoords { i: c.grid.i, j: c.grid.j + 1 },
        ] {
            if let Some(q) = by_grid.get(&next) {
                draw_line_segment(img, to_px(&p), to_px(q), color);
            }
        }
    }
    for p in by_grid.values() {
        draw_circle(img, to_px(p), 3, CORNER);
    }

    let len = AXIS_SQUARES * geometry.square_size;
    let project = |p: Pt3| camera.project(&Pt3::from(pose.rotation * p.coords + pose.translation));
    let bound = draw_bound(img);
    let Some(origin) = project(Pt3::origin()).filter(|o| within(o, bound)) else {
        return;
    };
    for (tip, color) in [
        (Pt3::new(len, 0.0, 0.0), AXIS_X),
        (Pt3::new(0.0, len, 0.0), AXIS_Y),
        (Pt3::new(0.0, 0.0, len), AXIS_Z),
    ] {
        if let Some(end) = project(tip).filter(|e| e.x.is_finite() && e.y.is_finite()) {
            let end = pull_towards(&origin, &end, bound);
            draw_thick_line(img, to_px(&origin), to_px(&end), color);
        }
    }
}

/// Half-width of the box drawing coordinates are kept in; tips projected
/// near the camera plane are pulled back inside it.
fn draw_bound(img: &RgbImage) -> Real {
    4.0 * (img.width() + img.height()) as Real
}

fn within(p: &Pt2, bound: Real) -> bool {
    p.x.abs() <= bound && p.y.abs() <= bound
}

/// Move `p` along the segment from `anchor` until it is within `bound`.
/// `anchor` must already be within `bound`.
fn pull_towards(anchor: &Pt2, p: &Pt2, bound: Real) -> Pt2 {
    let d = p - anchor;
    let mut t: Real = 1.0;
    for (a, v) in [(anchor.x, d.x), (anchor.y, d.y)] {
        if v > 0.0 {
            t = t.min((bound - a) / v);
        } else if v < 0.0 {
            t = t.min((-bound - a) / v);
        }
    }
    anchor + d * t.max(0.0)
}

/// Place `left` and `right` side by side, padding the shorter one with black.
pub fn compose_side_by_side(left: &RgbImage, right: &RgbImage) -> RgbImage {
    let width = left.width() + right.width();
    let height = left.height().max(right.height());
    let mut out = RgbImage::new(width, height);
    imageops::replace(&mut out, left, 0, 0);
    imageops::replace(&mut out, right, left.width() as i64, 0);
    out
}

fn to_px(p: &Pt2) -> (i32, i32) {
    // Bresenham step arithmetic on these must not overflow `i32`.
    const LIMIT: Real = (1 << 24) as Real;
    (
        p.x.clamp(-LIMIT, LIMIT).round() as i32,
        p.y.clamp(-LIMIT, LIMIT).round() as i32,
    )
}

fn put(img: &mut RgbImage, x: i32, y: i32, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < img.width() && (y as u32) < img.height() {
        img.put_pixel(x as u32, y as u32, color);
    }
}

// Bresenham.
fn draw_line_segment(img: &mut RgbImage, p1: (i32, i32), p2: (i32, i32), color: Rgb<u8>) {
    let (mut x0, mut y0) = p1;
    let (x1, y1) = p2;
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    // Far off-screen projections are clipped to a bounded walk.
    let max_steps = (img.width() + img.height()) as i64 * 4;
    for _ in 0..max_steps {
        put(img, x0, y0, color);
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

fn draw_thick_line(img: &mut RgbImage, p1: (i32, i32), p2: (i32, i32), color: Rgb<u8>) {
    for (ox, oy) in [(0, 0), (1, 0), (0, 1), (-1, 0), (0, -1)] {
        draw_line_segment(img, (p1.0 + ox, p1.1 + oy), (p2.0 + ox, p2.1 + oy), color);
    }
}

fn draw_circle(img: &mut RgbImage, center: (i32, i32), radius: i32, color: Rgb<u8>) {
    let (cx, cy) = center;
    let r2 = radius * radius;
    for y in (cy - radius)..=(cy + radius) {
        for x in (cx - radius)..=(cx + radius) {
            if (x - cx).pow(2) + (y - cy).pow(2) <= r2 {
                put(img, x, y, color);
            }
        }
    }
}
