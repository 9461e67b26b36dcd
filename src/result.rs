/// A blank buffer yields a box with zero width and height.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SimilarityResult {
    pub precision: f32,
    pub recall: f32,
    pub f1_score: f32,
    pub matching_pixels: usize,
    pub ink_pixels: usize,
    pub reference_pixels: usize,
    /// Ink with no reference pixel inside the tolerance window.
    pub user_only_pixels: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FontScore {
    pub font: String,
    pub result: SimilarityResult,
    pub is_best: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateScore {
    pub best_score: f32,
    pub results: Vec<FontScore>,
}

impl AggregateScore {
    pub fn best(&self) -> Option<&FontScore> {
        self.results.iter().find(|it| it.is_best)
    }
}
