//! Software raster holding the shared drawing surface.
//!
//! Pixels are straight-alpha RGBA8, row-major. The raster only knows how to
//! stroke a single round-capped segment and how to travel as a PNG data URL;
//! everything else about drawing lives in the state machines that drive it.

use crate::brush::BrushColor;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use kurbo::Point;
use peniko::Compose;
use png::Transformations;
use std::fmt;
use std::io::Cursor;
use thiserror::Error;

/// Default canvas width, in pixels.
pub const DEFAULT_CANVAS_WIDTH: u32 = 650;
/// Default canvas height, in pixels.
pub const DEFAULT_CANVAS_HEIGHT: u32 = 450;
/// Largest accepted side length. Bounds memory for decoded snapshots.
pub const MAX_DIMENSION: u32 = 8192;
/// How many times larger per side than the local canvas a snapshot may be.
pub const MAX_SNAPSHOT_SCALE: u32 = 4;

const DATA_URL_PREFIX: &str = "data:image/png;base64,";

/// Raster errors.
#[derive(Debug, Error)]
pub enum RasterError {
    #[error("PNG encode failed: {0}")]
    Encode(#[from] png::EncodingError),
    #[error("PNG decode failed: {0}")]
    Decode(#[from] png::DecodingError),
    #[error("Invalid raster dimensions {width}x{height}")]
    Dimensions { width: u32, height: u32 },
    #[error("Raster {width}x{height} exceeds the {max_width}x{max_height} limit")]
    TooLarge {
        width: u32,
        height: u32,
        max_width: u32,
        max_height: u32,
    },
    #[error("Unsupported PNG color type: {0:?}")]
    ColorType(png::ColorType),
    #[error("Not a PNG data URL")]
    DataUrl,
    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// A fixed-size RGBA8 drawing surface.
#[derive(Clone, PartialEq, Eq)]
pub struct Raster {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl fmt::Debug for Raster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Raster")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("blank", &self.is_blank())
            .finish()
    }
}

impl Default for Raster {
    fn default() -> Self {
        Self::blank(DEFAULT_CANVAS_WIDTH, DEFAULT_CANVAS_HEIGHT)
    }
}

impl Raster {
    /// Create an opaque white raster. Dimensions are clamped to
    /// `1..=MAX_DIMENSION`.
    pub fn blank(width: u32, height: u32) -> Self {
        let width = width.clamp(1, MAX_DIMENSION);
        let height = height.clamp(1, MAX_DIMENSION);
        Self {
            width,
            height,
            pixels: BrushColor::white()
                .to_array()
                .repeat(width as usize * height as usize),
        }
    }

    /// Build a raster from raw RGBA8 pixels.
    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, RasterError> {
        check_dimensions(width, height)?;
        if pixels.len() != width as usize * height as usize * 4 {
            return Err(RasterError::Dimensions { width, height });
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// RGBA of one pixel, `None` outside the raster.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = self.index(x, y);
        Some([
            self.pixels[i],
            self.pixels[i + 1],
            self.pixels[i + 2],
            self.pixels[i + 3],
        ])
    }

    /// Reset every pixel to opaque white.
    pub fn clear(&mut self) {
        let white = BrushColor::white().to_array();
        for px in self.pixels.chunks_exact_mut(4) {
            px.copy_from_slice(&white);
        }
    }

    /// True when every pixel is opaque white.
    pub fn is_blank(&self) -> bool {
        let white = BrushColor::white().to_array();
        self.pixels.chunks_exact(4).all(|px| px == white.as_slice())
    }

    /// Stroke a round-capped segment of the given width.
    ///
    /// A pixel is covered when its center lies within `width / 2` of the
    /// segment. Non-finite input is ignored. `DestOut` knocks coverage out;
    /// every other mode paints source-over.
    pub fn stroke_segment(
        &mut self,
        from: Point,
        to: Point,
        color: BrushColor,
        width: f64,
        mode: Compose,
    ) {
        if !(from.is_finite() && to.is_finite() && width.is_finite()) || width <= 0.0 {
            return;
        }
        let radius = width / 2.0;
        let radius_sq = radius * radius;

        let min_x = (from.x.min(to.x) - radius).floor().max(0.0);
        let min_y = (from.y.min(to.y) - radius).floor().max(0.0);
        let max_x = (from.x.max(to.x) + radius).ceil().min(self.width as f64);
        let max_y = (from.y.max(to.y) + radius).ceil().min(self.height as f64);
        if min_x >= max_x || min_y >= max_y {
            return;
        }

        let src = color.to_array();
        let dir = to - from;
        let len_sq = dir.hypot2();

        for y in min_y as u32..max_y as u32 {
            for x in min_x as u32..max_x as u32 {
                let center = Point::new(x as f64 + 0.5, y as f64 + 0.5);
                let t = if len_sq > 0.0 {
                    ((center - from).dot(dir) / len_sq).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                let nearest = from + dir * t;
                if (center - nearest).hypot2() > radius_sq {
                    continue;
                }
                let i = self.index(x, y);
                let dst = &mut self.pixels[i..i + 4];
                match mode {
                    Compose::DestOut => knock_out(dst, src[3]),
                    _ => blend_over(dst, src),
                }
            }
        }
    }

    /// Nearest-neighbour resample to a new size.
    pub fn resized(&self, width: u32, height: u32) -> Raster {
        if width == self.width && height == self.height {
            return self.clone();
        }
        let mut out = Raster::blank(width, height);
        for y in 0..out.height {
            let sy = (y as u64 * self.height as u64 / out.height as u64) as u32;
            for x in 0..out.width {
                let sx = (x as u64 * self.width as u64 / out.width as u64) as u32;
                let (si, di) = (self.index(sx, sy), out.index(x, y));
                out.pixels[di..di + 4].copy_from_slice(&self.pixels[si..si + 4]);
            }
        }
        out
    }

    /// Overwrite this raster with `other`, scaled to this raster's size.
    pub fn replace_with(&mut self, other: &Raster) {
        if other.width == self.width && other.height == self.height {
            self.pixels.copy_from_slice(&other.pixels);
        } else {
            self.pixels = other.resized(self.width, self.height).pixels;
        }
    }

    /// Encode as an 8-bit RGBA PNG.
    pub fn encode_png(&self) -> Result<Vec<u8>, RasterError> {
        let mut out = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut out, self.width, self.height);
            encoder.set_color(png::ColorType::Rgba);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header()?;
            writer.write_image_data(&self.pixels)?;
            writer.finish()?;
        }
        Ok(out)
    }

    /// Decode a PNG of any common color type into RGBA8.
    pub fn decode_png(bytes: &[u8]) -> Result<Self, RasterError> {
        Self::decode_png_within(bytes, MAX_DIMENSION, MAX_DIMENSION)
    }

    /// Decode a PNG, refusing it from its header alone when it is larger
    /// than `max_width` x `max_height`.
    pub fn decode_png_within(
        bytes: &[u8],
        max_width: u32,
        max_height: u32,
    ) -> Result<Self, RasterError> {
        let mut decoder = png::Decoder::new(Cursor::new(bytes));
        decoder.set_transformations(Transformations::EXPAND | Transformations::STRIP_16);
        let mut reader = decoder.read_info()?;
        let (width, height) = {
            let info = reader.info();
            (info.width, info.height)
        };
        check_dimensions(width, height)?;
        if width > max_width || height > max_height {
            return Err(RasterError::TooLarge {
                width,
                height,
                max_width,
                max_height,
            });
        }

        let mut buf = vec![0; reader.output_buffer_size()];
        let frame = reader.next_frame(&mut buf)?;
        buf.truncate(frame.buffer_size());

        let pixels = match frame.color_type {
            png::ColorType::Rgba => buf,
            png::ColorType::Rgb => buf
                .chunks_exact(3)
                .flat_map(|c| [c[0], c[1], c[2], 255])
                .collect(),
            png::ColorType::GrayscaleAlpha => buf
                .chunks_exact(2)
                .flat_map(|c| [c[0], c[0], c[0], c[1]])
                .collect(),
            png::ColorType::Grayscale => buf.iter().flat_map(|&g| [g, g, g, 255]).collect(),
            other => return Err(RasterError::ColorType(other)),
        };
        Self::from_rgba(width, height, pixels)
    }

    /// Encode as a `data:image/png;base64,...` URL.
    pub fn to_data_url(&self) -> Result<String, RasterError> {
        let png = self.encode_png()?;
        Ok(format!("{DATA_URL_PREFIX}{}", STANDARD.encode(png)))
    }

    /// Decode a PNG data URL.
    pub fn from_data_url(url: &str) -> Result<Self, RasterError> {
        Self::decode_png(&data_url_payload(url)?)
    }

    /// Decode a snapshot that is about to replace this raster. Snapshots
    /// more than [`MAX_SNAPSHOT_SCALE`] times this raster's size per side are
    /// refused before their pixels are allocated.
    pub fn decode_snapshot(&self, url: &str) -> Result<Raster, RasterError> {
        let limit = |side: u32| side.saturating_mul(MAX_SNAPSHOT_SCALE).min(MAX_DIMENSION);
        let bytes = data_url_payload(url)?;
        Self::decode_png_within(&bytes, limit(self.width), limit(self.height))
    }

    fn index(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 4
    }
}

fn data_url_payload(url: &str) -> Result<Vec<u8>, RasterError> {
    let payload = url
        .strip_prefix(DATA_URL_PREFIX)
        .ok_or(RasterError::DataUrl)?;
    Ok(STANDARD.decode(payload.trim())?)
}

fn check_dimensions(width: u32, height: u32) -> Result<(), RasterError> {
    if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(RasterError::Dimensions { width, height });
    }
    Ok(())
}

/// Straight-alpha source-over.
fn blend_over(dst: &mut [u8], src: [u8; 4]) {
    let sa = src[3] as u32;
    if sa == 255 {
        dst.copy_from_slice(&src);
        return;
    }
    if sa == 0 {
        return;
    }
    let da = dst[3] as u32;
    let inv = 255 - sa;
    let out_a = sa * 255 + da * inv;
    if out_a == 0 {
        dst.fill(0);
        return;
    }
    for c in 0..3 {
        dst[c] = ((src[c] as u32 * sa * 255 + dst[c] as u32 * da * inv) / out_a) as u8;
    }
    dst[3] = ((out_a + 127) / 255) as u8;
}

/// Destination-out: scale existing alpha by the inverse source alpha.
fn knock_out(dst: &mut [u8], src_alpha: u8) {
    let remaining = dst[3] as u32 * (255 - src_alpha as u32) / 255;
    if remaining == 0 {
        dst.fill(0);
    } else {
        dst[3] = remaining as u8;
    }
}
