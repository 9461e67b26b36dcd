use base64::{engine::general_purpose::STANDARD, Engine};
use image::{DynamicImage, GrayImage, Luma, RgbaImage};
use ndarray::Array2;
use tracing::instrument;

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    alpha: GrayImage,
}

impl PixelBuffer {
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            alpha: GrayImage::new(width, height),
        }
    }

    pub fn from_alpha(alpha: GrayImage) -> Self {
        Self { alpha }
    }

    pub fn from_rgba(image: &RgbaImage) -> Self {
        let alpha = GrayImage::from_fn(image.width(), image.height(), |x, y| {
            Luma([image.get_pixel(x, y)[3]])
        });
        Self { alpha }
    }

    pub fn from_image(image: &DynamicImage) -> Self {
        Self::from_rgba(&image.to_rgba8())
    }

    pub fn from_rgba_raw(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        let actual = data.len();
        let image = RgbaImage::from_raw(width, height, data).ok_or(Error::BufferSize {
            width,
            height,
            expected,
            actual,
        })?;
        Ok(Self::from_rgba(&image))
    }

    pub fn from_alpha_raw(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize;
        let actual = data.len();
        let alpha = GrayImage::from_raw(width, height, data).ok_or(Error::BufferSize {
            width,
            height,
            expected,
            actual,
        })?;
        Ok(Self { alpha })
    }

    /// An empty capture (`""` or `"data:,"`) decodes to a 0x0 buffer.
    #[instrument(level = "debug", skip(url), fields(len = url.len()))]
    pub fn from_data_url(url: &str) -> Result<Self> {
        if url.is_empty() || url == "data:," {
            log::debug!("Empty capture, treating as blank");
            return Ok(Self::blank(0, 0));
        }
        let rest = url
            .strip_prefix("data:")
            .ok_or_else(|| Error::InvalidDataUrl(truncated(url)))?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| Error::InvalidDataUrl(truncated(url)))?;
        if !header.ends_with(";base64") {
            return Err(Error::InvalidDataUrl(truncated(url)));
        }
        let bytes = STANDARD.decode(payload.trim())?;
        let image = image::load_from_memory(&bytes)?;
        log::debug!(
            "Decoded {header} capture of {}x{}",
            image.width(),
            image.height()
        );
        Ok(Self::from_image(&image))
    }

    pub fn width(&self) -> u32 {
        self.alpha.width()
    }

    pub fn height(&self) -> u32 {
        self.alpha.height()
    }

    pub fn alpha(&self, x: u32, y: u32) -> u8 {
        self.alpha.get_pixel(x, y)[0]
    }

    pub fn as_gray(&self) -> &GrayImage {
        &self.alpha
    }

    pub fn into_gray(self) -> GrayImage {
        self.alpha
    }

    pub fn ink_mask(&self, threshold: u8) -> Array2<bool> {
        Array2::from_shape_fn(
            (self.height() as usize, self.width() as usize),
            |(y, x)| self.alpha(x as u32, y as u32) > threshold,
        )
    }
}

fn truncated(url: &str) -> String {
    url.chars().take(32).collect()
}
