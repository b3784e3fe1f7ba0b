//! Brush settings: tool, color and width.

use peniko::Compose;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Smallest brush width accepted from the UI.
pub const MIN_BRUSH_WIDTH: f64 = 1.0;
/// Largest brush width accepted from the UI.
pub const MAX_BRUSH_WIDTH: f64 = 50.0;
/// Brush width used until the user picks one.
pub const DEFAULT_BRUSH_WIDTH: f64 = 5.0;

/// Drawing tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    #[default]
    Pen,
    Eraser,
}

impl Tool {
    /// Compositing mode a segment drawn with this tool uses. The eraser
    /// removes coverage, leaving transparent pixels.
    pub fn composite_mode(self) -> Compose {
        match self {
            Tool::Pen => Compose::SrcOver,
            Tool::Eraser => Compose::DestOut,
        }
    }
}

/// Error parsing a hex color string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid color: {0:?}")]
pub struct ParseColorError(pub String);

/// RGBA8 color exchanged on the wire as `#rrggbb` or `#rrggbbaa`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BrushColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl BrushColor {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn black() -> Self {
        Self::new(0, 0, 0, 255)
    }

    pub const fn white() -> Self {
        Self::new(255, 255, 255, 255)
    }

    pub const fn transparent() -> Self {
        Self::new(0, 0, 0, 0)
    }

    pub fn to_array(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

impl Default for BrushColor {
    fn default() -> Self {
        Self::black()
    }
}

impl FromStr for BrushColor {
    type Err = ParseColorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseColorError(s.to_string());
        let hex = s.strip_prefix('#').ok_or_else(err)?;
        if !hex.is_ascii() {
            return Err(err());
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| err());
        let short = |i: usize| {
            u8::from_str_radix(&hex[i..i + 1], 16)
                .map(|v| v * 17)
                .map_err(|_| err())
        };

        match hex.len() {
            3 => Ok(Self::new(short(0)?, short(1)?, short(2)?, 255)),
            6 => Ok(Self::new(channel(0)?, channel(2)?, channel(4)?, 255)),
            8 => {
                let alpha = channel(6)?;
                Ok(Self::new(channel(0)?, channel(2)?, channel(4)?, alpha))
            }
            _ => Err(err()),
        }
    }
}

impl fmt::Display for BrushColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.a == 255 {
            write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            write!(
                f,
                "#{:02x}{:02x}{:02x}{:02x}",
                self.r, self.g, self.b, self.a
            )
        }
    }
}

impl TryFrom<String> for BrushColor {
    type Error = ParseColorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BrushColor> for String {
    fn from(color: BrushColor) -> Self {
        color.to_string()
    }
}

/// Current brush used for new strokes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Brush {
    pub tool: Tool,
    pub color: BrushColor,
    width: f64,
}

impl Default for Brush {
    fn default() -> Self {
        Self {
            tool: Tool::default(),
            color: BrushColor::default(),
            width: DEFAULT_BRUSH_WIDTH,
        }
    }
}

impl Brush {
    pub fn new(tool: Tool, color: BrushColor, width: f64) -> Self {
        let mut brush = Self {
            tool,
            color,
            width: DEFAULT_BRUSH_WIDTH,
        };
        brush.set_width(width);
        brush
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    /// Set the width, clamped to the slider range. NaN is ignored.
    pub fn set_width(&mut self, width: f64) {
        if !width.is_nan() {
            self.width = width.clamp(MIN_BRUSH_WIDTH, MAX_BRUSH_WIDTH);
        }
    }

    /// Color actually sent for a segment. The eraser always reports white,
    /// which is what non-compositing renderers fall back to.
    pub fn stroke_color(&self) -> BrushColor {
        match self.tool {
            Tool::Pen => self.color,
            Tool::Eraser => BrushColor::white(),
        }
    }
}
