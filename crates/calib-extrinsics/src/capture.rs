//! Two-stage capture state machine and the user commands driving it.

use calib_extrinsics_core::HomogeneousTransform;

/// A discrete user command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// `a`: compute and persist `T_base_to_chess` from the colour camera.
    CaptureBase,
    /// `b`: compute and persist `T_arm_to_depth` from the depth camera.
    CaptureArm,
    /// `q`: leave the run loop.
    Quit,
}

impl Command {
    pub const PROMPT: &'static str = "Press a key, then Enter, to compute transformations between \
robot base, arm, colour camera, depth camera and chessboard:\n  \
a: compute T_base_to_chess (from T_color_to_chess)\n  \
b: compute T_arm_to_depth (from T_depth_to_chess)\n  \
q: quit";

    pub fn from_key(key: char) -> Option<Self> {
        match key.to_ascii_lowercase() {
            'a' => Some(Self::CaptureBase),
            'b' => Some(Self::CaptureArm),
            'q' => Some(Self::Quit),
            _ => None,
        }
    }

    /// First non-blank character of an input line.
    pub fn parse_line(line: &str) -> Option<Self> {
        line.trim().chars().next().and_then(Self::from_key)
    }
}

/// Whether `T_base_to_chess` has been captured.
///
/// Only a successful capture-A moves to (or refreshes) `HasBaseCapture`;
/// there is no terminal state.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum CaptureState {
    #[default]
    NoBaseCapture,
    HasBaseCapture {
        base_to_chess: HomogeneousTransform,
        /// Cycle whose detection produced it; `None` when preloaded.
        captured_at: Option<u64>,
    },
}

impl CaptureState {
    pub fn base_to_chess(&self) -> Option<&HomogeneousTransform> {
        match self {
            Self::NoBaseCapture => None,
            Self::HasBaseCapture { base_to_chess, .. } => Some(base_to_chess),
        }
    }

    /// Cycles elapsed since the stored capture, if it came from a cycle.
    pub fn age(&self, now: u64) -> Option<u64> {
        match self {
            Self::HasBaseCapture {
                captured_at: Some(at),
                ..
            } => Some(now.saturating_sub(*at)),
            _ => None,
        }
    }

    /// Transition taken on a successful capture-A; overwrites any previous value.
    pub fn with_base_capture(self, base_to_chess: HomogeneousTransform, captured_at: Option<u64>) -> Self {
        Self::HasBaseCapture {
            base_to_chess,
            captured_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calib_extrinsics_core::Vec3;
    use nalgebra::Rotation3;

    #[test]
    fn keys_map_to_commands() {
        assert_eq!(Command::from_key('a'), Some(Command::CaptureBase));
        assert_eq!(Command::from_key('B'), Some(Command::CaptureArm));
        assert_eq!(Command::from_key('q'), Some(Command::Quit));
        assert_eq!(Command::from_key('x'), None);
        assert_eq!(Command::parse_line("  b\n"), Some(Command::CaptureArm));
        assert_eq!(Command::parse_line("\n"), None);
    }

    #[test]
    fn capture_overwrites_and_tracks_age() {
        let state = CaptureState::default();
        assert!(state.base_to_chess().is_none());
        assert_eq!(state.age(10), None);

        let first = HomogeneousTransform::identity();
        let second = HomogeneousTransform::from_rotation_translation(
            &Rotation3::identity(),
            &Vec3::new(0.0, 0.0, 1.0),
        );
        let state = state.with_base_capture(first, Some(3));
        let state = state.with_base_capture(second, Some(7));
        assert_eq!(state.base_to_chess(), Some(&second));
        assert_eq!(state.age(9), Some(2));

        let preloaded = CaptureState::default().with_base_capture(first, None);
        assert_eq!(preloaded.age(100), None);
    }
}
