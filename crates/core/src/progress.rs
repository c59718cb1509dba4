//! Progress clamping rules.
//!
//! While a job is in flight the persisted progress never reaches 100;
//! only the terminal `completed` transition writes 100.

/// Highest value persisted or published before completion.
pub const MAX_IN_FLIGHT_PROGRESS: i32 = 99;

/// Progress written on the `completed` transition.
pub const COMPLETE_PROGRESS: i32 = 100;

/// Convert an engine-reported percentage into an in-flight value.
///
/// Rounds down, maps NaN and negatives to 0, and clamps to
/// [`MAX_IN_FLIGHT_PROGRESS`].
pub fn clamp_in_flight(reported: f64) -> i32 {
    if reported.is_nan() || reported <= 0.0 {
        return 0;
    }
    (reported.floor() as i32).min(MAX_IN_FLIGHT_PROGRESS)
}
