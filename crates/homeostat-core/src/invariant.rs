//! # Score Invariants
//!
//! Every score in the engine lives in [0,1]. Two helpers enforce that:
//!
//! - [`clamp_unit`] for values the engine computed itself. Leaving the range
//!   is a bug, so it is logged at `error` under the `homeostat::invariant`
//!   target and the value is clamped.
//! - [`sanitize_input`] for values that came from outside. Missing or
//!   invalid inputs are expected and get the neutral default.

use crate::primitives::NEUTRAL_SCORE;

/// Clamp a computed score into [0,1], reporting any violation.
///
/// NaN becomes the neutral score.
pub fn clamp_unit(value: f64, context: &str) -> f64 {
    if value.is_nan() {
        tracing::error!(
            target: "homeostat::invariant",
            context,
            "computed score is NaN; substituting neutral"
        );
        return NEUTRAL_SCORE;
    }
    if !(0.0..=1.0).contains(&value) {
        tracing::error!(
            target: "homeostat::invariant",
            context,
            value,
            "computed score outside [0,1]; clamping"
        );
        return value.clamp(0.0, 1.0);
    }
    value
}

/// Validate an external input score.
///
/// Returns the value and whether the neutral default was substituted.
pub fn sanitize_input(value: Option<f64>) -> (f64, bool) {
    match value {
        Some(v) if v.is_finite() && (0.0..=1.0).contains(&v) => (v, false),
        _ => (NEUTRAL_SCORE, true),
    }
}

/// Whether a value is a usable score.
#[must_use]
pub fn is_unit(value: f64) -> bool {
    value.is_finite() && (0.0..=1.0).contains(&value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_passes_valid_scores() {
        assert!((clamp_unit(0.3, "t") - 0.3).abs() < f64::EPSILON);
        assert!((clamp_unit(0.0, "t")).abs() < f64::EPSILON);
        assert!((clamp_unit(1.0, "t") - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn clamp_bounds_out_of_range() {
        assert!((clamp_unit(1.7, "t") - 1.0).abs() < f64::EPSILON);
        assert!((clamp_unit(-0.2, "t")).abs() < f64::EPSILON);
        assert!((clamp_unit(f64::INFINITY, "t") - 1.0).abs() < f64::EPSILON);
        assert!((clamp_unit(f64::NAN, "t") - NEUTRAL_SCORE).abs() < f64::EPSILON);
    }

    #[test]
    fn sanitize_substitutes_neutral() {
        assert_eq!(sanitize_input(Some(0.9)), (0.9, false));
        assert_eq!(sanitize_input(None), (NEUTRAL_SCORE, true));
        assert_eq!(sanitize_input(Some(f64::NAN)), (NEUTRAL_SCORE, true));
        assert_eq!(sanitize_input(Some(1.5)), (NEUTRAL_SCORE, true));
    }
}
