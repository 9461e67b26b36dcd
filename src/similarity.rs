use ndarray::s;
use tracing::instrument;

use crate::{Error, PixelBuffer, Result, ScoringOptions, SimilarityResult};

/// Recall is measured against the strict reference pixel count and capped at 1. Blank
/// ink gives an all-zero result.
#[instrument(level = "debug", skip(ink, reference))]
pub fn compare(
    ink: &PixelBuffer,
    reference: &PixelBuffer,
    options: &ScoringOptions,
) -> Result<SimilarityResult> {
    if ink.width() != reference.width() || ink.height() != reference.height() {
        return Err(Error::DimensionMismatch(
            ink.width(),
            ink.height(),
            reference.width(),
            reference.height(),
        ));
    }

    let user = ink.ink_mask(options.ink_threshold);
    let expected = reference.ink_mask(options.ink_threshold);
    let (height, width) = expected.dim();
    let tolerance = options.tolerance as usize;

    let mut matching_pixels = 0;
    let mut ink_pixels = 0;
    let mut user_only_pixels = 0;
    for ((y, x), _) in user.indexed_iter().filter(|(_, drawn)| **drawn) {
        ink_pixels += 1;
        let window = expected.slice(s![
            y.saturating_sub(tolerance)..(y + tolerance + 1).min(height),
            x.saturating_sub(tolerance)..(x + tolerance + 1).min(width)
        ]);
        if window.iter().any(|present| *present) {
            matching_pixels += 1;
        } else {
            user_only_pixels += 1;
        }
    }
    let reference_pixels = expected.iter().filter(|present| **present).count();

    if ink_pixels == 0 {
        return Ok(SimilarityResult::default());
    }

    let base_precision = matching_pixels as f32 / ink_pixels as f32;
    let penalty = (-options.penalty_weight * user_only_pixels as f32
        / (matching_pixels as f32 + 1.0))
        .exp();
    let precision = base_precision * penalty;
    let recall = if reference_pixels > 0 {
        (matching_pixels as f32 / reference_pixels as f32).min(1.0)
    } else {
        0.0
    };
    let f1_score = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };
    log::trace!(
        "matching {matching_pixels}, ink {ink_pixels}, reference {reference_pixels}, extra {user_only_pixels}: p={precision} r={recall} f1={f1_score}"
    );

    Ok(SimilarityResult {
        precision,
        recall,
        f1_score,
        matching_pixels,
        ink_pixels,
        reference_pixels,
        user_only_pixels,
    })
}
