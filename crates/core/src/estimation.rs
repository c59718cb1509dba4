//! Rough wall-clock estimate shown when processing starts.

use crate::quality::ProcessingQuality;

/// Estimates never exceed two hours.
pub const MAX_ESTIMATE_SECS: u64 = 7_200;

/// Approximate engine seconds per input image for a quality tier.
pub fn seconds_per_image(quality: ProcessingQuality) -> u64 {
    match quality {
        ProcessingQuality::Low => 30,
        ProcessingQuality::Medium => 60,
        ProcessingQuality::High => 120,
        ProcessingQuality::Ultra => 180,
    }
}

/// Estimated processing time in seconds, capped at [`MAX_ESTIMATE_SECS`].
pub fn estimate_processing_secs(image_count: usize, quality: ProcessingQuality) -> u64 {
    (image_count as u64)
        .saturating_mul(seconds_per_image(quality))
        .min(MAX_ESTIMATE_SECS)
}
