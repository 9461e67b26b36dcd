use std::{path::Path, sync::Arc};

use ab_glyph::{point, Font, FontRef, PxScale};
use fontdb::{Database, Family, Query, Weight, ID};
use image::{GrayImage, Luma};
use imageproc::{
    contrast::{threshold_mut, ThresholdType},
    distance_transform::Norm,
    morphology::dilate_mut,
};
use tracing::instrument;

use crate::{Error, PixelBuffer, Result};

const DEFAULT_RENDER_SIZE: u32 = 250;
const DEFAULT_GLYPH_PX: f32 = 200.0;
const DEFAULT_STROKE_WIDTH: f32 = 3.0;
// Coverage above this counts as outline for the stroke pass.
const STROKE_COVERAGE: u8 = 127;

const DEFAULT_FONT_STACKS: &[&str] = &[
    r#""Hiragino Sans", "Meiryo", sans-serif"#,
    r#""Hiragino Mincho", "MS Mincho", serif"#,
    r#""Klee", "Comic Sans MS", cursive"#,
    r#""Yu Gothic", "Meiryo", sans-serif"#,
    "serif",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FontFamily {
    Named(String),
    Serif,
    SansSerif,
    Cursive,
    Fantasy,
    Monospace,
}

impl FontFamily {
    fn parse(raw: &str) -> Option<Self> {
        let name = raw.trim().trim_matches(|c| c == '"' || c == '\'').trim();
        if name.is_empty() {
            return None;
        }
        Some(match name.to_ascii_lowercase().as_str() {
            "serif" => Self::Serif,
            "sans-serif" => Self::SansSerif,
            "cursive" => Self::Cursive,
            "fantasy" => Self::Fantasy,
            "monospace" => Self::Monospace,
            _ => Self::Named(name.to_string()),
        })
    }

    fn as_fontdb(&self) -> Family<'_> {
        match self {
            Self::Named(name) => Family::Name(name),
            Self::Serif => Family::Serif,
            Self::SansSerif => Family::SansSerif,
            Self::Cursive => Family::Cursive,
            Self::Fantasy => Family::Fantasy,
            Self::Monospace => Family::Monospace,
        }
    }

    fn is_generic(&self) -> bool {
        !matches!(self, Self::Named(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontSpec {
    stack: String,
    families: Vec<FontFamily>,
}

impl FontSpec {
    pub fn new(stack: impl Into<String>) -> Self {
        let stack = stack.into();
        let families = stack.split(',').filter_map(FontFamily::parse).collect();
        Self { stack, families }
    }

    pub fn stack(&self) -> &str {
        &self.stack
    }

    pub fn families(&self) -> &[FontFamily] {
        &self.families
    }

    pub fn name(&self) -> String {
        match self.families.first() {
            Some(FontFamily::Named(name)) => name.clone(),
            Some(FontFamily::Serif) => "serif".into(),
            Some(FontFamily::SansSerif) => "sans-serif".into(),
            Some(FontFamily::Cursive) => "cursive".into(),
            Some(FontFamily::Fantasy) => "fantasy".into(),
            Some(FontFamily::Monospace) => "monospace".into(),
            None => self.stack.trim().to_string(),
        }
    }
}

impl From<&str> for FontSpec {
    fn from(stack: &str) -> Self {
        Self::new(stack)
    }
}

pub fn default_fonts() -> Vec<FontSpec> {
    DEFAULT_FONT_STACKS.iter().copied().map(FontSpec::new).collect()
}

/// Implementations must be deterministic for a given character and font.
pub trait GlyphRenderer: Send + Sync {
    fn render(&self, ch: char, font: &FontSpec) -> Result<PixelBuffer>;
}

impl<R: GlyphRenderer + ?Sized> GlyphRenderer for Arc<R> {
    fn render(&self, ch: char, font: &FontSpec) -> Result<PixelBuffer> {
        (**self).render(ch, font)
    }
}

/// Glyphs are drawn bold, centered on a square canvas, filled and then stroked. Faces
/// lighter than semibold get one extra pixel of stroke in place of a real bold.
pub struct SystemFontRenderer {
    db: Database,
    size: u32,
    glyph_px: f32,
    stroke_width: f32,
}

impl SystemFontRenderer {
    #[instrument(level = "debug")]
    pub fn new() -> Self {
        let mut db = Database::new();
        db.load_system_fonts();
        log::debug!("Loaded {} system font faces", db.len());
        Self::with_database(db)
    }

    pub fn with_database(db: Database) -> Self {
        Self {
            db,
            size: DEFAULT_RENDER_SIZE,
            glyph_px: DEFAULT_GLYPH_PX,
            stroke_width: DEFAULT_STROKE_WIDTH,
        }
    }

    pub fn size(mut self, size: u32) -> Self {
        self.size = size;
        self
    }

    pub fn glyph_px(mut self, glyph_px: f32) -> Self {
        self.glyph_px = glyph_px;
        self
    }

    pub fn stroke_width(mut self, stroke_width: f32) -> Self {
        self.stroke_width = stroke_width;
        self
    }

    pub fn load_font_file(&mut self, path: impl AsRef<Path>) -> std::io::Result<()> {
        self.db.load_font_file(path)
    }

    pub fn load_font_data(&mut self, data: Vec<u8>) {
        self.db.load_font_data(data);
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    // Queried families in order, then every other loaded face.
    fn candidates(&self, font: &FontSpec) -> Vec<ID> {
        let mut ids = Vec::new();
        for family in query_families(font) {
            let query = Query {
                families: &[family.as_fontdb()],
                weight: Weight::BOLD,
                ..Default::default()
            };
            if let Some(id) = self.db.query(&query) {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        for face in self.db.faces() {
            if !ids.contains(&face.id) {
                ids.push(face.id);
            }
        }
        ids
    }

    fn rasterize(&self, ch: char, data: &[u8], index: u32, weight: u16) -> Result<GrayImage> {
        let font = FontRef::try_from_slice_and_index(data, index)
            .map_err(|_| Error::MissingGlyph(ch))?;
        let glyph_id = font.glyph_id(ch);
        if glyph_id.0 == 0 {
            return Err(Error::MissingGlyph(ch));
        }
        let glyph = glyph_id.with_scale_and_position(PxScale::from(self.glyph_px), point(0.0, 0.0));
        let outlined = font.outline_glyph(glyph).ok_or(Error::MissingGlyph(ch))?;

        let bounds = outlined.px_bounds();
        let offset_x = ((self.size as f32 - bounds.width()) / 2.0).floor() as i64;
        let offset_y = ((self.size as f32 - bounds.height()) / 2.0).floor() as i64;

        let mut fill = GrayImage::new(self.size, self.size);
        outlined.draw(|x, y, coverage| {
            let px = offset_x + x as i64;
            let py = offset_y + y as i64;
            if px < 0 || py < 0 || px >= self.size as i64 || py >= self.size as i64 {
                return;
            }
            let value = (coverage.clamp(0.0, 1.0) * 255.0).round() as u8;
            let pixel = fill.get_pixel_mut(px as u32, py as u32);
            pixel[0] = pixel[0].max(value);
        });

        apply_stroke(&mut fill, stroke_radius(self.stroke_width, weight));
        Ok(fill)
    }
}

// The stack's families, then its generic family (sans-serif when it names none).
fn query_families(font: &FontSpec) -> Vec<FontFamily> {
    let mut families = font.families().to_vec();
    if !families.iter().any(FontFamily::is_generic) {
        families.push(FontFamily::SansSerif);
    }
    families
}

fn stroke_radius(stroke_width: f32, weight: u16) -> u8 {
    let radius = (stroke_width.max(0.0) / 2.0).round() as u8;
    if weight < Weight::SEMIBOLD.0 {
        radius.saturating_add(1)
    } else {
        radius
    }
}

// Square pen around solid coverage; anti-aliased edges the pen misses are kept.
fn apply_stroke(fill: &mut GrayImage, radius: u8) {
    if radius == 0 {
        return;
    }
    let mut stroke = fill.clone();
    threshold_mut(&mut stroke, STROKE_COVERAGE, ThresholdType::Binary);
    dilate_mut(&mut stroke, Norm::LInf, radius);
    for (out, stroked) in fill.pixels_mut().zip(stroke.pixels()) {
        *out = Luma([out[0].max(stroked[0])]);
    }
}

impl Default for SystemFontRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl GlyphRenderer for SystemFontRenderer {
    #[instrument(level = "debug", skip(self, font), fields(font = %font.name()))]
    fn render(&self, ch: char, font: &FontSpec) -> Result<PixelBuffer> {
        for id in self.candidates(font) {
            let weight = self.db.face(id).map_or(Weight::NORMAL.0, |face| face.weight.0);
            let rendered = self
                .db
                .with_face_data(id, |data, index| self.rasterize(ch, data, index, weight));
            match rendered {
                Some(Ok(alpha)) => {
                    if let Some(face) = self.db.face(id) {
                        log::trace!("Rendered {ch:?} with {:?}", face.families);
                        if weight < Weight::SEMIBOLD.0 {
                            log::trace!("Face weight {weight} is lighter than bold, thickening stroke");
                        }
                    }
                    return Ok(PixelBuffer::from_alpha(alpha));
                }
                Some(Err(err)) => log::trace!("Face {id:?} cannot render {ch:?}: {err}"),
                None => log::trace!("Face {id:?} has no data"),
            }
        }
        Err(Error::FontUnavailable {
            ch,
            font: font.stack().to_string(),
        })
    }
}
