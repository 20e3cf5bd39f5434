//! In-memory curve model.
//!
//! A [`Curve`] is a named, identified sequence of positions in engineering
//! units. [`PositionTimeCurve`] adds the uniform sample spacing and converts
//! to and from the wire descriptor.

use serde::{Deserialize, Serialize};

use super::descriptor::{CurveDescriptor, DescriptorError};
use crate::consts::{MAX_NAME_LEN, MAX_SETPOINTS, POSITION_SCALE, X_LENGTH_SCALE};

/// Bounded curve name (the descriptor field holds 21 bytes plus terminator).
pub type CurveName = heapless::String<MAX_NAME_LEN>;

/// Convert a position in engineering units to device ticks (nearest tick).
#[inline]
pub fn position_to_ticks(position: f64) -> i32 {
    (position * POSITION_SCALE).round() as i32
}

/// Convert device ticks back to engineering units.
#[inline]
pub fn ticks_to_position(ticks: i32) -> f64 {
    ticks as f64 / POSITION_SCALE
}

/// Named, identified setpoint sequence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Curve {
    /// Curve name as stored on the device.
    pub name: CurveName,
    /// Curve id on the device (1..=max_curve_id).
    pub curve_id: u16,
    /// Positions in engineering units.
    pub setpoints: Vec<f64>,
}

impl Curve {
    /// Create an empty curve.
    ///
    /// # Errors
    /// `NameTooLong` if `name` exceeds 21 bytes.
    pub fn new(name: &str, curve_id: u16) -> Result<Self, DescriptorError> {
        let name = CurveName::try_from(name)
            .map_err(|_| DescriptorError::NameTooLong { len: name.len() })?;
        Ok(Self {
            name,
            curve_id,
            setpoints: Vec::new(),
        })
    }

    /// Setpoints scaled to device ticks.
    pub fn setpoint_ticks(&self) -> Vec<i32> {
        self.setpoints.iter().copied().map(position_to_ticks).collect()
    }
}

/// Position-vs-time curve with uniform sample spacing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionTimeCurve {
    /// Name, id and setpoints.
    #[serde(flatten)]
    pub curve: Curve,
    /// Sample spacing in seconds.
    pub dt: f64,
}

impl PositionTimeCurve {
    /// Create an empty curve with the given spacing.
    pub fn new(name: &str, curve_id: u16, dt: f64) -> Result<Self, DescriptorError> {
        Ok(Self {
            curve: Curve::new(name, curve_id)?,
            dt,
        })
    }

    /// Create a curve from existing setpoints.
    pub fn with_setpoints(
        name: &str,
        curve_id: u16,
        dt: f64,
        setpoints: Vec<f64>,
    ) -> Result<Self, DescriptorError> {
        let mut curve = Self::new(name, curve_id, dt)?;
        curve.curve.setpoints = setpoints;
        Ok(curve)
    }

    /// Curve id shortcut.
    #[inline]
    pub fn curve_id(&self) -> u16 {
        self.curve.curve_id
    }

    /// Number of setpoints.
    #[inline]
    pub fn len(&self) -> usize {
        self.curve.setpoints.len()
    }

    /// True when the curve holds no setpoints.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.curve.setpoints.is_empty()
    }

    /// Total duration: `len * dt`.
    #[inline]
    pub fn total_seconds(&self) -> f64 {
        self.len() as f64 * self.dt
    }

    /// Encode this curve's descriptor.
    ///
    /// # Errors
    /// - `InvalidDuration` unless `0 < total_seconds < LM_MAX_CURVE_TIME`
    /// - `TooManySetpoints` above [`MAX_SETPOINTS`], the largest count the
    ///   device block size can announce
    pub fn curve_info(&self) -> Result<CurveDescriptor, DescriptorError> {
        let count = u16::try_from(self.len())
            .ok()
            .filter(|&n| usize::from(n) <= MAX_SETPOINTS)
            .ok_or(DescriptorError::TooManySetpoints { count: self.len() })?;
        CurveDescriptor::new_position_time(
            self.total_seconds(),
            count,
            &self.curve.name,
            self.curve.curve_id,
        )
    }

    /// Take name, id and spacing from a decoded descriptor.
    ///
    /// `dt` is zero when either `x_length` or `num_setpoints` is zero. Names
    /// longer than 21 bytes are cut at the last character boundary that fits.
    pub fn apply_curve_info(&mut self, ci: &CurveDescriptor) {
        self.curve.name = bounded_name(&ci.name_str());
        self.curve.curve_id = ci.curve_id;
        self.dt = if ci.x_length > 0 && ci.num_setpoints > 0 {
            ci.x_length as f64 / (ci.num_setpoints as f64 * X_LENGTH_SCALE)
        } else {
            0.0
        };
    }

    /// Append one setpoint received from the device.
    #[inline]
    pub fn push_ticks(&mut self, ticks: i32) {
        self.curve.setpoints.push(ticks_to_position(ticks));
    }
}

fn bounded_name(name: &str) -> CurveName {
    let mut end = name.len().min(MAX_NAME_LEN);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    let mut bounded = CurveName::new();
    // Cannot fail: `end` is at most the capacity.
    let _ = bounded.push_str(&name[..end]);
    bounded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::LM_MAX_CURVE_TIME;

    #[test]
    fn total_seconds_is_len_times_dt() {
        let c = PositionTimeCurve::with_setpoints("t", 1, 0.01, vec![0.0, 1.0, 2.0]).unwrap();
        assert!((c.total_seconds() - 0.03).abs() < 1e-12);
    }

    #[test]
    fn curve_info_encodes_three_point_curve() {
        let c = PositionTimeCurve::with_setpoints("NewCurve", 1, 0.01, vec![0.0, 1.0, 2.0])
            .unwrap();
        let ci = c.curve_info().unwrap();
        assert_eq!(ci.num_setpoints, 3);
        assert_eq!(ci.curve_id, 1);
        assert_eq!(ci.x_length, 3000);
        assert_eq!(ci.name_str(), "NewCurve");
    }

    #[test]
    fn curve_info_rejects_empty_curve() {
        let c = PositionTimeCurve::new("empty", 1, 0.01).unwrap();
        assert!(matches!(
            c.curve_info(),
            Err(DescriptorError::InvalidDuration { .. })
        ));
    }

    #[test]
    fn curve_info_rejects_too_long_curve() {
        let c = PositionTimeCurve::with_setpoints("long", 1, 100.0, vec![0.0; 1000]).unwrap();
        assert!(c.total_seconds() >= LM_MAX_CURVE_TIME);
        assert!(matches!(
            c.curve_info(),
            Err(DescriptorError::InvalidDuration { .. })
        ));
    }

    #[test]
    fn curve_info_limits_setpoint_count_to_block_size() {
        let fits = PositionTimeCurve::with_setpoints("max", 1, 0.001, vec![0.0; MAX_SETPOINTS])
            .unwrap();
        let ci = fits.curve_info().unwrap();
        assert_eq!(
            ci.packed_block_size() >> crate::consts::BLOCK_SIZE_SHIFT,
            MAX_SETPOINTS as u32
        );

        for count in [MAX_SETPOINTS + 1, 20_000, 70_000] {
            let c = PositionTimeCurve::with_setpoints("big", 1, 0.001, vec![0.0; count]).unwrap();
            assert_eq!(
                c.curve_info(),
                Err(DescriptorError::TooManySetpoints { count })
            );
        }
    }

    #[test]
    fn curve_info_rejects_non_positive_dt() {
        let c = PositionTimeCurve::with_setpoints("neg", 1, -0.01, vec![1.0, 2.0]).unwrap();
        assert!(c.curve_info().is_err());
    }

    #[test]
    fn name_longer_than_field_is_rejected() {
        let err = Curve::new(&"n".repeat(22), 1).unwrap_err();
        assert_eq!(err, DescriptorError::NameTooLong { len: 22 });
        assert!(Curve::new(&"n".repeat(21), 1).is_ok());
    }

    #[test]
    fn apply_curve_info_recovers_dt() {
        let c = PositionTimeCurve::with_setpoints("rt", 9, 0.002, vec![0.5; 250]).unwrap();
        let ci = c.curve_info().unwrap();

        let mut back = PositionTimeCurve::default();
        back.apply_curve_info(&ci);
        assert_eq!(back.curve.name.as_str(), "rt");
        assert_eq!(back.curve_id(), 9);
        assert!((back.dt - 0.002).abs() < 1e-9);
    }

    #[test]
    fn apply_curve_info_zero_fields_give_zero_dt() {
        let mut ci = CurveDescriptor::default();
        ci.num_setpoints = 10;
        ci.x_length = 0;
        let mut c = PositionTimeCurve::default();
        c.apply_curve_info(&ci);
        assert_eq!(c.dt, 0.0);

        ci.num_setpoints = 0;
        ci.x_length = 1000;
        c.apply_curve_info(&ci);
        assert_eq!(c.dt, 0.0);
    }

    #[test]
    fn unterminated_device_name_is_truncated() {
        let mut ci = CurveDescriptor::default();
        ci.name = [b'q'; 22];
        let mut c = PositionTimeCurve::default();
        c.apply_curve_info(&ci);
        assert_eq!(c.curve.name.len(), 21);
    }

    #[test]
    fn position_round_trip_within_one_tick() {
        let ticks = position_to_ticks(1.2345);
        assert_eq!(ticks, 12345);
        assert!((ticks_to_position(ticks) - 1.2345).abs() < 1e-4);
        assert_eq!(position_to_ticks(-0.00004), 0);
        assert_eq!(position_to_ticks(-2.5), -25000);
    }

    #[test]
    fn setpoint_ticks_scales_every_point() {
        let c = Curve {
            name: CurveName::try_from("s").unwrap(),
            curve_id: 1,
            setpoints: vec![0.0, 1.0, -0.25],
        };
        assert_eq!(c.setpoint_ticks(), vec![0, 10000, -2500]);
    }
}
