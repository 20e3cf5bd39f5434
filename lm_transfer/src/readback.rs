//! Read-back projection of received curves into axis profile units.

use lm_common::status::{AxisScaling, StatusError};

/// Resolved projection parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReadbackScaling {
    pub resolution: f64,
    pub offset: f64,
    pub direction: i32,
}

impl Default for ReadbackScaling {
    fn default() -> Self {
        Self {
            resolution: 1.0,
            offset: 0.0,
            direction: 0,
        }
    }
}

impl ReadbackScaling {
    /// Scaling used when the axis parameters cannot be looked up.
    pub const LOOKUP_FALLBACK: Self = Self {
        resolution: 1.0,
        offset: 0.5,
        direction: 0,
    };

    /// Resolve a parameter lookup, filling unset fields with defaults.
    pub fn resolve(lookup: Result<AxisScaling, StatusError>) -> Self {
        match lookup {
            Ok(params) => {
                let defaults = Self::default();
                Self {
                    resolution: params.resolution.unwrap_or(defaults.resolution),
                    offset: params.offset.unwrap_or(defaults.offset),
                    direction: params.direction.unwrap_or(defaults.direction),
                }
            }
            Err(_) => Self::LOOKUP_FALLBACK,
        }
    }

    /// Effective resolution including the direction sign.
    #[inline]
    pub fn signed_resolution(&self) -> f64 {
        if self.direction != 0 {
            -self.resolution
        } else {
            self.resolution
        }
    }
}

/// Project `setpoints` with `p * r + offset`, keeping at most `max_points`.
pub fn project(setpoints: &[f64], scaling: ReadbackScaling, max_points: usize) -> Vec<f64> {
    let r = scaling.signed_resolution();
    setpoints
        .iter()
        .take(max_points)
        .map(|p| p * r + scaling.offset)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_projection_is_identity() {
        let scaling = ReadbackScaling::resolve(Ok(AxisScaling::default()));
        assert_eq!(scaling, ReadbackScaling::default());
        assert_eq!(project(&[1.0, -2.0], scaling, 10), vec![1.0, -2.0]);
    }

    #[test]
    fn lookup_failure_uses_half_offset() {
        let scaling = ReadbackScaling::resolve(Err(StatusError::UnknownAxis(3)));
        assert_eq!(scaling.offset, 0.5);
        assert_eq!(project(&[1.0], scaling, 10), vec![1.5]);
    }

    #[test]
    fn direction_flips_resolution() {
        let scaling = ReadbackScaling::resolve(Ok(AxisScaling {
            resolution: Some(2.0),
            offset: Some(1.0),
            direction: Some(1),
        }));
        assert_eq!(project(&[3.0], scaling, 10), vec![-5.0]);
    }

    #[test]
    fn output_is_truncated_to_max_points() {
        let points: Vec<f64> = (0..10).map(f64::from).collect();
        let out = project(&points, ReadbackScaling::default(), 4);
        assert_eq!(out, vec![0.0, 1.0, 2.0, 3.0]);
    }
}
