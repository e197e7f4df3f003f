use std::collections::VecDeque;
use std::f32::consts::{FRAC_PI_2, FRAC_PI_4};

use calib_extrinsics_core::{Corner, GridCoords};
use kiddo::{KdTree, SquaredEuclidean};
use nalgebra::Vector2;

use crate::geom::{angle_diff_abs, angle_to_unit, axis_vec_diff, grid_axes_from_diagonals, is_orthogonal};
use crate::params::GridGraphParams;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NeighborDirection {
    Right,
    Left,
    Up,
    Down,
}

impl NeighborDirection {
    /// Grid step `(di, dj)` taken when following this edge.
    pub fn grid_step(self) -> (i32, i32) {
        match self {
            Self::Right => (1, 0),
            Self::Left => (-1, 0),
            Self::Up => (0, -1),
            Self::Down => (0, 1),
        }
    }

    fn slot(self) -> usize {
        match self {
            Self::Right => 0,
            Self::Left => 1,
            Self::Up => 2,
            Self::Down => 3,
        }
    }
}

#[derive(Clone, Debug)]
pub struct NodeNeighbor {
    pub direction: NeighborDirection,
    pub index: usize,
    pub distance: f32,
    /// Lower is better.
    pub score: f32,
}

/// Classify an edge against the image-space grid axes.
fn classify(edge: &Vector2<f32>, axes: &(Vector2<f32>, Vector2<f32>)) -> NeighborDirection {
    let along = edge.dot(&axes.0);
    let across = edge.dot(&axes.1);
    if along.abs() > across.abs() {
        if along >= 0.0 {
            NeighborDirection::Right
        } else {
            NeighborDirection::Left
        }
    } else if across >= 0.0 {
        NeighborDirection::Down
    } else {
        NeighborDirection::Up
    }
}

fn spacing_ok(distance: f32, params: &GridGraphParams) -> bool {
    distance >= params.min_spacing_pix && distance <= params.max_spacing_pix
}

/// Neighbor test with clustered diagonals: the two corners must belong to
/// different orientation families and the edge must run along one of the
/// bisectors of the cluster centers.
fn neighbor_from_clusters(
    corner: &Corner,
    neighbor: &Corner,
    neighbor_index: usize,
    params: &GridGraphParams,
    grid_diagonals: [f32; 2],
    axes: &(Vector2<f32>, Vector2<f32>),
) -> Option<NodeNeighbor> {
    let (Some(ci), Some(cj)) = (corner.orientation_cluster, neighbor.orientation_cluster) else {
        return None;
    };
    if ci == cj {
        return None;
    }

    let edge = neighbor.position - corner.position;
    let distance = edge.norm();
    if !spacing_ok(distance, params) {
        return None;
    }

    let e = edge / distance;
    let oi = angle_to_unit(grid_diagonals[ci]);
    let oj = angle_to_unit(grid_diagonals[cj]);
    let alignment = [oi + oj, oi - oj]
        .iter()
        .filter(|v| v.norm_squared() > 1e-6)
        .map(|v| v.normalize().dot(&e).abs())
        .fold(0.0f32, f32::max);

    if alignment < params.orientation_tolerance_deg.to_radians().cos() {
        return None;
    }

    Some(NodeNeighbor {
        direction: classify(&edge, axes),
        index: neighbor_index,
        distance,
        score: 1.0 - alignment,
    })
}

/// Neighbor test on raw orientations: diagonals roughly orthogonal, and the
/// edge at ~45° to both of them.
fn neighbor_from_orientations(
    corner: &Corner,
    neighbor: &Corner,
    neighbor_index: usize,
    params: &GridGraphParams,
) -> Option<NodeNeighbor> {
    let tol = params.orientation_tolerance_deg.to_radians();
    if !is_orthogonal(corner.orientation, neighbor.orientation, tol) {
        return None;
    }

    let edge = neighbor.position - corner.position;
    let distance = edge.norm();
    if !spacing_ok(distance, params) {
        return None;
    }

    let edge_angle = edge.y.atan2(edge.x);
    let score_corner = (axis_vec_diff(corner.orientation, edge_angle) - FRAC_PI_4).abs();
    let score_neighbor = (axis_vec_diff(neighbor.orientation, edge_angle) - FRAC_PI_4).abs();
    if score_corner > tol || score_neighbor > tol {
        return None;
    }

    let d = angle_diff_abs(corner.orientation, neighbor.orientation);
    let score_orientation = (FRAC_PI_2 - d.min(std::f32::consts::PI - d)).abs();
    let image_axes = (Vector2::new(1.0, 0.0), Vector2::new(0.0, 1.0));

    Some(NodeNeighbor {
        direction: classify(&edge, &image_axes),
        index: neighbor_index,
        distance,
        score: score_corner + score_neighbor + score_orientation,
    })
}

/// Keep at most one neighbor per direction, choosing the lowest-score candidate.
fn select_neighbors(candidates: Vec<NodeNeighbor>) -> Vec<NodeNeighbor> {
    let mut best: [Option<NodeNeighbor>; 4] = [None, None, None, None];

    for candidate in candidates {
        let slot = &mut best[candidate.direction.slot()];
        let replace = match slot {
            None => true,
            Some(current) => {
                candidate.score < current.score
                    || (candidate.score == current.score && candidate.distance < current.distance)
            }
        };
        if replace {
            *slot = Some(candidate);
        }
    }

    best.into_iter().flatten().collect()
}

/// 4-connected neighborhood graph over corners.
pub struct GridGraph {
    /// For each node, at most one neighbor per direction.
    pub neighbors: Vec<Vec<NodeNeighbor>>,
}

impl GridGraph {
    /// Build the graph. With `grid_diagonals` (cluster centers), corners
    /// must carry `orientation_cluster` labels; without, raw orientations
    /// are compared pairwise.
    pub fn new(corners: &[Corner], params: &GridGraphParams, grid_diagonals: Option<[f32; 2]>) -> Self {
        if corners.is_empty() {
            return Self {
                neighbors: Vec::new(),
            };
        }

        let coords: Vec<[f32; 2]> = corners
            .iter()
            .map(|c| [c.position.x, c.position.y])
            .collect();
        let tree: KdTree<f32, 2> = (&coords).into();
        let axes = grid_diagonals.and_then(grid_axes_from_diagonals);

        let neighbors = corners
            .iter()
            .enumerate()
            .map(|(i, corner)| {
                let query = [corner.position.x, corner.position.y];
                let candidates = tree
                    .nearest_n::<SquaredEuclidean>(&query, params.k_neighbors + 1)
                    .into_iter()
                    .map(|nn| nn.item as usize)
                    .filter(|&j| j != i)
                    .filter_map(|j| match (grid_diagonals, &axes) {
                        (Some(diags), Some(axes)) => {
                            neighbor_from_clusters(corner, &corners[j], j, params, diags, axes)
                        }
                        _ => neighbor_from_orientations(corner, &corners[j], j, params),
                    })
                    .collect();
                select_neighbors(candidates)
            })
            .collect();

        Self { neighbors }
    }

    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }
}

pub fn connected_components(graph: &GridGraph) -> Vec<Vec<usize>> {
    let mut visited = vec![false; graph.len()];
    let mut components = Vec::new();

    for start in 0..graph.len() {
        if visited[start] {
            continue;
        }

        let mut component = Vec::new();
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            if visited[node] {
                continue;
            }
            visited[node] = true;
            component.push(node);
            stack.extend(
                graph.neighbors[node]
                    .iter()
                    .map(|n| n.index)
                    .filter(|&k| !visited[k]),
            );
        }

        components.push(component);
    }

    components
}

/// BFS grid coordinates for one component, shifted so the minimum `i` and
/// `j` are zero. Returns `(node index, coords)` in visit order.
pub fn assign_grid_coordinates(graph: &GridGraph, component: &[usize]) -> Vec<(usize, GridCoords)> {
    let Some(&start) = component.first() else {
        return Vec::new();
    };

    let mut coords = Vec::with_capacity(component.len());
    let mut visited = vec![false; graph.len()];
    let mut queue = VecDeque::from([(start, 0i32, 0i32)]);

    while let Some((node, i, j)) = queue.pop_front() {
        if visited[node] {
            continue;
        }
        visited[node] = true;
        coords.push((node, GridCoords { i, j }));

        for neighbor in &graph.neighbors[node] {
            if !visited[neighbor.index] {
                let (di, dj) = neighbor.direction.grid_step();
                queue.push_back((neighbor.index, i + di, j + dj));
            }
        }
    }

    let min_i = coords.iter().map(|(_, g)| g.i).min().unwrap_or(0);
    let min_j = coords.iter().map(|(_, g)| g.j).min().unwrap_or(0);
    for (_, g) in &mut coords {
        g.i -= min_i;
        g.j -= min_j;
    }
    coords
}
