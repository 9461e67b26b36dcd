use std::{
    num::NonZeroUsize,
    sync::{Arc, Mutex},
};

mod buffer;
mod error;
pub mod glyph;
mod result;
pub mod similarity;
pub mod util;

pub use buffer::PixelBuffer;
pub use error::{Error, Result};
pub use glyph::{default_fonts, FontFamily, FontSpec, GlyphRenderer, SystemFontRenderer};
pub use result::*;

use float_ord::FloatOrd;
use lru::LruCache;
use tracing::instrument;
use util::{ink_bounds, normalize};

pub use fontdb;

type ReferenceCache = Mutex<LruCache<(char, usize), Arc<PixelBuffer>>>;

const DEFAULT_FILL_RATIO: f32 = 0.9;
// About 5 MB of 100x100 references, a few hundred characters across the default fonts.
const DEFAULT_CACHE_CAPACITY: usize = 512;

pub struct KanjiScorerBuilder {
    fonts: Vec<FontSpec>,
    renderer: Option<Arc<dyn GlyphRenderer>>,
    canonical_size: u32,
    fill_ratio: f32,
    cache_capacity: usize,
    options: ScoringOptions,
}

impl KanjiScorerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fonts(mut self, fonts: impl IntoIterator<Item = FontSpec>) -> Self {
        self.fonts = fonts.into_iter().collect();
        self
    }

    pub fn font(mut self, font: impl Into<FontSpec>) -> Self {
        self.fonts.push(font.into());
        self
    }

    pub fn renderer(mut self, renderer: impl GlyphRenderer + 'static) -> Self {
        self.renderer = Some(Arc::new(renderer));
        self
    }

    pub fn canonical_size(mut self, size: u32) -> Self {
        self.canonical_size = size;
        self
    }

    pub fn fill_ratio(mut self, fill_ratio: f32) -> Self {
        self.fill_ratio = fill_ratio;
        self
    }

    /// Number of normalized references kept, least recently used evicted first. 0 disables
    /// the cache.
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn options(mut self, options: ScoringOptions) -> Self {
        self.options = options;
        self
    }

    #[instrument(skip(self), fields(fonts = self.fonts.len()))]
    pub fn build(self) -> KanjiScorer {
        let renderer = self
            .renderer
            .unwrap_or_else(|| Arc::new(SystemFontRenderer::new()));
        let fill_ratio = if self.fill_ratio > 0.0 && self.fill_ratio <= 1.0 {
            self.fill_ratio
        } else {
            log::warn!(
                "Fill ratio {} is outside (0, 1], using {DEFAULT_FILL_RATIO}",
                self.fill_ratio
            );
            DEFAULT_FILL_RATIO
        };
        KanjiScorer {
            fonts: self.fonts,
            renderer,
            canonical_size: self.canonical_size,
            fill_ratio,
            options: self.options,
            reference_cache: NonZeroUsize::new(self.cache_capacity)
                .map(|capacity| Mutex::new(LruCache::new(capacity))),
        }
    }
}

impl Default for KanjiScorerBuilder {
    fn default() -> Self {
        Self {
            fonts: default_fonts(),
            renderer: None,
            canonical_size: 100,
            fill_ratio: DEFAULT_FILL_RATIO,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            options: ScoringOptions::default(),
        }
    }
}

pub struct KanjiScorer {
    fonts: Vec<FontSpec>,
    renderer: Arc<dyn GlyphRenderer>,
    canonical_size: u32,
    fill_ratio: f32,
    options: ScoringOptions,
    reference_cache: Option<ReferenceCache>,
}

impl KanjiScorer {
    pub fn builder() -> KanjiScorerBuilder {
        KanjiScorerBuilder::new()
    }

    pub fn fonts(&self) -> &[FontSpec] {
        &self.fonts
    }

    pub fn options(&self) -> &ScoringOptions {
        &self.options
    }

    pub fn fill_ratio(&self) -> f32 {
        self.fill_ratio
    }

    pub fn cached_references(&self) -> usize {
        self.reference_cache
            .as_ref()
            .and_then(|cache| Some(cache.lock().ok()?.len()))
            .unwrap_or(0)
    }

    pub fn clear_cache(&self) {
        if let Some(mut cache) = self
            .reference_cache
            .as_ref()
            .and_then(|cache| cache.lock().ok())
        {
            cache.clear();
        }
    }

    /// Confidence in `[0, 1]`. Blank ink scores 0.
    pub fn score(&self, ink: &PixelBuffer, target: char) -> f32 {
        self.score_with_diagnostics(ink, target).best_score
    }

    pub fn accepts(&self, ink: &PixelBuffer, target: char) -> bool {
        self.is_accepted(self.score(ink, target))
    }

    pub fn is_accepted(&self, score: f32) -> bool {
        score >= self.options.acceptance_threshold
    }

    pub fn score_data_url(&self, url: &str, target: char) -> Result<f32> {
        Ok(self.score(&PixelBuffer::from_data_url(url)?, target))
    }

    pub fn score_data_url_with_diagnostics(
        &self,
        url: &str,
        target: char,
    ) -> Result<AggregateScore> {
        Ok(self.score_with_diagnostics(&PixelBuffer::from_data_url(url)?, target))
    }

    /// Per-font results with the winning entry flagged. Fonts that fail to render are
    /// left out; when none render the best score is 0.
    #[instrument(skip(self, ink), fields(width = ink.width(), height = ink.height()))]
    pub fn score_with_diagnostics(&self, ink: &PixelBuffer, target: char) -> AggregateScore {
        let bounds = ink_bounds(ink, self.options.ink_threshold);
        if bounds.is_empty() {
            log::debug!("No ink drawn for {target:?}");
            return AggregateScore::default();
        }
        let canonical_ink = normalize(ink, bounds, self.canonical_size, self.fill_ratio);
        #[cfg(feature = "debug")]
        util::save_debug(&canonical_ink, &format!("{target}-ink"));

        let mut results = self
            .fonts
            .iter()
            .enumerate()
            .filter_map(|(index, font)| {
                let reference = self
                    .canonical_reference(target, index, font)
                    .inspect_err(|err| log::warn!("Skipping font {}: {err}", font.name()))
                    .ok()?;
                let result = similarity::compare(&canonical_ink, &reference, &self.options)
                    .inspect_err(|err| log::warn!("Skipping font {}: {err}", font.name()))
                    .ok()?;
                log::debug!("{target:?} in {}: {result:?}", font.name());
                Some(FontScore {
                    font: font.name(),
                    result,
                    is_best: false,
                })
            })
            .collect::<Vec<_>>();

        // Reversed so the first font wins ties.
        let best_score = match results
            .iter_mut()
            .rev()
            .max_by_key(|it| FloatOrd(it.result.f1_score))
        {
            Some(best) => {
                best.is_best = true;
                best.result.f1_score
            }
            None => {
                log::debug!("No font could render {target:?}");
                0.0
            }
        };

        AggregateScore {
            best_score,
            results,
        }
    }

    #[instrument(level = "debug", skip(self, font), fields(font = %font.name()))]
    fn canonical_reference(
        &self,
        target: char,
        index: usize,
        font: &FontSpec,
    ) -> Result<Arc<PixelBuffer>> {
        if let Some(cached) = self
            .reference_cache
            .as_ref()
            .and_then(|cache| cache.lock().ok()?.get(&(target, index)).cloned())
        {
            log::trace!("Reference cache hit");
            return Ok(cached);
        }

        let rendered = self.renderer.render(target, font)?;
        let bounds = ink_bounds(&rendered, self.options.ink_threshold);
        if bounds.is_empty() {
            log::debug!("Reference rendering of {target:?} has no ink");
        }
        let reference = Arc::new(normalize(
            &rendered,
            bounds,
            self.canonical_size,
            self.fill_ratio,
        ));
        #[cfg(feature = "debug")]
        util::save_debug(&reference, &format!("{target}-ref-{index}"));

        if let Some(mut cache) = self
            .reference_cache
            .as_ref()
            .and_then(|cache| cache.lock().ok())
        {
            cache.put((target, index), reference.clone());
        }
        Ok(reference)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringOptions {
    pub ink_threshold: u8,
    pub tolerance: u32,
    pub penalty_weight: f32,
    pub acceptance_threshold: f32,
}

impl Default for ScoringOptions {
    fn default() -> Self {
        Self {
            ink_threshold: 50,
            tolerance: 2,
            penalty_weight: 0.5,
            acceptance_threshold: 0.45,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};
    use imageproc::{drawing::draw_filled_rect_mut, rect::Rect};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CrossRenderer {
        calls: AtomicUsize,
    }

    impl GlyphRenderer for CrossRenderer {
        fn render(&self, _ch: char, _font: &FontSpec) -> Result<PixelBuffer> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut alpha = GrayImage::new(250, 250);
            draw_filled_rect_mut(&mut alpha, Rect::at(25, 110).of_size(200, 30), Luma([255]));
            draw_filled_rect_mut(&mut alpha, Rect::at(110, 25).of_size(30, 200), Luma([255]));
            Ok(PixelBuffer::from_alpha(alpha))
        }
    }

    fn cross_scorer(cache_capacity: usize) -> (KanjiScorer, Arc<CrossRenderer>) {
        let renderer = Arc::new(CrossRenderer {
            calls: AtomicUsize::new(0),
        });
        let scorer = KanjiScorer::builder()
            .fonts([FontSpec::new("serif"), FontSpec::new("sans-serif")])
            .renderer(renderer.clone())
            .cache_capacity(cache_capacity)
            .build();
        (scorer, renderer)
    }

    fn bar_ink() -> PixelBuffer {
        let mut alpha = GrayImage::new(256, 256);
        draw_filled_rect_mut(&mut alpha, Rect::at(40, 60).of_size(120, 14), Luma([255]));
        PixelBuffer::from_alpha(alpha)
    }

    #[test]
    fn references_are_cached_per_font() {
        let (scorer, renderer) = cross_scorer(16);
        let ink = scorer.renderer.render('十', &FontSpec::new("serif")).unwrap();
        renderer.calls.store(0, Ordering::SeqCst);

        let first = scorer.score_with_diagnostics(&ink, '十');
        let second = scorer.score_with_diagnostics(&ink, '十');
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 2);
        assert_eq!(first, second);
    }

    #[test]
    fn cache_does_not_change_scores() {
        let (cached, _) = cross_scorer(16);
        let (uncached, renderer) = cross_scorer(0);
        let ink = bar_ink();

        for _ in 0..2 {
            assert_eq!(
                cached.score_with_diagnostics(&ink, '十'),
                uncached.score_with_diagnostics(&ink, '十')
            );
        }
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn cache_stays_within_capacity() {
        let (scorer, renderer) = cross_scorer(5);
        let ink = bar_ink();
        for ch in "一二三四五六七八九十".chars() {
            scorer.score(&ink, ch);
            assert!(scorer.cached_references() <= 5);
        }
        assert_eq!(scorer.cached_references(), 5);
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 20);

        // The most recent character is still cached for both fonts.
        scorer.score(&ink, '十');
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 20);
        scorer.score(&ink, '一');
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 22);
    }

    #[test]
    fn clear_cache_drops_references() {
        let (scorer, renderer) = cross_scorer(16);
        let ink = bar_ink();
        scorer.score(&ink, '十');
        assert_eq!(scorer.cached_references(), 2);

        scorer.clear_cache();
        assert_eq!(scorer.cached_references(), 0);
        scorer.score(&ink, '十');
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn disabled_cache_holds_nothing() {
        let (scorer, _) = cross_scorer(0);
        scorer.score(&bar_ink(), '十');
        assert_eq!(scorer.cached_references(), 0);
    }

    #[test]
    fn out_of_range_fill_ratio_falls_back_to_default() {
        for fill_ratio in [0.0, -0.5, 1.5, f32::NAN] {
            let scorer = KanjiScorer::builder()
                .fonts([FontSpec::new("serif")])
                .renderer(CrossRenderer {
                    calls: AtomicUsize::new(0),
                })
                .fill_ratio(fill_ratio)
                .build();
            assert_eq!(scorer.fill_ratio(), DEFAULT_FILL_RATIO);

            // A degenerate ratio would shrink both buffers to one matching pixel.
            let aggregate = scorer.score_with_diagnostics(&bar_ink(), '十');
            assert!(aggregate.results[0].result.ink_pixels > 1);
            assert!(aggregate.best_score < 1.0);
        }

        let scorer = KanjiScorer::builder()
            .fonts(Vec::new())
            .renderer(CrossRenderer {
                calls: AtomicUsize::new(0),
            })
            .fill_ratio(0.8)
            .build();
        assert_eq!(scorer.fill_ratio(), 0.8);
    }

    #[test]
    fn first_font_wins_ties() {
        let (scorer, _) = cross_scorer(0);
        let ink = scorer.renderer.render('十', &FontSpec::new("serif")).unwrap();
        let aggregate = scorer.score_with_diagnostics(&ink, '十');
        assert_eq!(aggregate.results.len(), 2);
        assert!(aggregate.results[0].is_best);
        assert!(!aggregate.results[1].is_best);
        assert_eq!(aggregate.best().map(|it| it.font.as_str()), Some("serif"));
    }

    #[test]
    fn acceptance_threshold_is_inclusive() {
        let (scorer, _) = cross_scorer(0);
        assert!(scorer.is_accepted(0.45));
        assert!(!scorer.is_accepted(0.449));
    }
}
