//! Colors accepted by the preprocessing and rendering configuration

use crate::io::error::{PipelineError, invalid_parameter};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// Opaque RGB color, or fully transparent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum Color {
    /// Opaque color with 8-bit channels
    Rgb(u8, u8, u8),
    /// No paint at all
    Transparent,
}

impl Color {
    /// Pure white
    pub const WHITE: Self = Self::Rgb(255, 255, 255);
    /// Pure black
    pub const BLACK: Self = Self::Rgb(0, 0, 0);

    /// Whether painting with this color leaves pixels untouched
    pub const fn is_transparent(self) -> bool {
        matches!(self, Self::Transparent)
    }

    /// RGBA channels, alpha 0 for transparent
    pub const fn to_rgba(self) -> [u8; 4] {
        match self {
            Self::Rgb(r, g, b) => [r, g, b, 255],
            Self::Transparent => [0, 0, 0, 0],
        }
    }

    /// Rec. 601 luma of the color, 0 for transparent
    pub fn luma(self) -> u8 {
        match self {
            Self::Rgb(r, g, b) => {
                let y = 0.299 * f64::from(r) + 0.587 * f64::from(g) + 0.114 * f64::from(b);
                y.round().clamp(0.0, 255.0) as u8
            }
            Self::Transparent => 0,
        }
    }
}

fn hex_channel(text: &str) -> Option<u8> {
    u8::from_str_radix(text, 16).ok()
}

impl FromStr for Color {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let parsed = match trimmed.to_ascii_lowercase().as_str() {
            "transparent" | "none" => Some(Self::Transparent),
            "white" => Some(Self::WHITE),
            "black" => Some(Self::BLACK),
            other => other.strip_prefix('#').and_then(|hex| match hex.len() {
                3 => {
                    let mut channels = hex.chars().map(|c| hex_channel(&format!("{c}{c}")));
                    Some(Self::Rgb(
                        channels.next()??,
                        channels.next()??,
                        channels.next()??,
                    ))
                }
                6 => Some(Self::Rgb(
                    hex_channel(hex.get(0..2)?)?,
                    hex_channel(hex.get(2..4)?)?,
                    hex_channel(hex.get(4..6)?)?,
                )),
                _ => None,
            }),
        };

        parsed.ok_or_else(|| {
            invalid_parameter("color", &trimmed, &"expected #RGB, #RRGGBB or transparent")
        })
    }
}

impl TryFrom<String> for Color {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rgb(r, g, b) => write!(f, "#{r:02X}{g:02X}{b:02X}"),
            Self::Transparent => write!(f, "transparent"),
        }
    }
}
