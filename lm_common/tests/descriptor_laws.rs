//! Property tests for the curve descriptor codec.

use lm_common::consts::{BLOCK_SIZE_SHIFT, LM_MAX_CURVE_TIME, X_LENGTH_SCALE};
use lm_common::prelude::*;
use proptest::prelude::*;

proptest! {
    /// Encoding a curve and decoding the wire bytes recovers count, id, name and dt.
    #[test]
    fn curve_info_survives_the_wire(
        name in "[A-Za-z0-9_]{0,21}",
        curve_id in 1u16..=100,
        n in 1usize..5000,
        dt in 1.0e-4f64..1.0,
    ) {
        let curve = PositionTimeCurve::with_setpoints(&name, curve_id, dt, vec![0.0; n]).unwrap();
        prop_assume!(curve.total_seconds() < LM_MAX_CURVE_TIME);

        let ci = curve.curve_info().unwrap();
        let decoded = CurveDescriptor::from_bytes(&ci.to_bytes());
        prop_assert_eq!(decoded, ci);
        prop_assert_eq!(CurveDescriptor::from_words(&ci.to_words()), ci);

        let mut back = PositionTimeCurve::default();
        back.apply_curve_info(&decoded);
        prop_assert_eq!(decoded.num_setpoints as usize, n);
        prop_assert_eq!(back.curve_id(), curve_id);
        prop_assert_eq!(back.curve.name.as_str(), name.as_str());

        // x_length is floored to whole 10 us ticks
        let quantum = 1.0 / (n as f64 * X_LENGTH_SCALE);
        prop_assert!((back.dt - dt).abs() <= quantum + 1e-12);
    }

    /// The block size carries the setpoint count in the upper bits.
    #[test]
    fn packed_block_size_layout(n in 0u16..(1 << 14)) {
        let ci = CurveDescriptor { num_setpoints: n, ..CurveDescriptor::default() };
        let packed = ci.packed_block_size();
        prop_assert_eq!(packed, ((n as u32) << 18) | 70);
        prop_assert_eq!(packed >> BLOCK_SIZE_SHIFT, n as u32);
    }

    /// Oversized names never modify the stored name.
    #[test]
    fn long_names_are_rejected_without_side_effects(
        original in "[a-z]{1,21}",
        extra in "[a-z]{22,40}",
    ) {
        let mut ci = CurveDescriptor::default();
        ci.set_name(&original).unwrap();
        let before = ci.name;
        prop_assert!(ci.set_name(&extra).is_err());
        prop_assert_eq!(ci.name, before);
    }

    /// Positions survive the tick conversion within half a tick.
    #[test]
    fn position_ticks_round_trip(position in -1.0e5f64..1.0e5) {
        let back = ticks_to_position(position_to_ticks(position));
        prop_assert!((back - position).abs() <= 0.5 / POSITION_SCALE + 1e-9);
    }
}
