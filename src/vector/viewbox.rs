//! Viewbox derivation and padding

use crate::io::configuration::DEFAULT_VIEWBOX_SIZE;
use std::fmt;

/// User-space rectangle mapped onto the rendered canvas
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewBox {
    /// Left edge in user units
    pub x: f64,
    /// Top edge in user units
    pub y: f64,
    /// Width in user units
    pub width: f64,
    /// Height in user units
    pub height: f64,
}

impl Default for ViewBox {
    fn default() -> Self {
        Self::new(0.0, 0.0, DEFAULT_VIEWBOX_SIZE, DEFAULT_VIEWBOX_SIZE)
    }
}

impl ViewBox {
    /// Create a viewbox from its four components
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Parse a `viewBox` attribute value
    ///
    /// Accepts whitespace and/or comma separators. Returns `None` unless exactly
    /// four finite numbers with positive width and height are present.
    pub fn parse(value: &str) -> Option<Self> {
        let numbers: Vec<f64> = value
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|part| !part.is_empty())
            .map(str::parse::<f64>)
            .collect::<Result<_, _>>()
            .ok()?;

        match numbers.as_slice() {
            &[x, y, width, height]
                if [x, y, width, height].iter().all(|v| v.is_finite())
                    && width > 0.0
                    && height > 0.0 =>
            {
                Some(Self::new(x, y, width, height))
            }
            _ => None,
        }
    }

    /// Derive the viewbox of a root element
    ///
    /// Prefers an explicit `viewBox`, then `width`/`height`, then the default
    /// unit square.
    pub fn derive(view_box: Option<&str>, width: Option<&str>, height: Option<&str>) -> Self {
        if let Some(parsed) = view_box.and_then(Self::parse) {
            return parsed;
        }

        match (width.and_then(parse_length), height.and_then(parse_length)) {
            (Some(w), Some(h)) => Self::new(0.0, 0.0, w, h),
            _ => Self::default(),
        }
    }

    /// Expand symmetrically by `fraction` of each dimension on every side
    #[must_use]
    pub fn padded(&self, fraction: f64) -> Self {
        let pad_x = self.width * fraction;
        let pad_y = self.height * fraction;
        Self::new(
            self.x - pad_x,
            self.y - pad_y,
            2.0f64.mul_add(pad_x, self.width),
            2.0f64.mul_add(pad_y, self.height),
        )
    }

    /// Ratio of width to height
    pub fn aspect_ratio(&self) -> f64 {
        self.width / self.height
    }
}

impl fmt::Display for ViewBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} {}", self.x, self.y, self.width, self.height)
    }
}

/// Parse a length attribute such as `"100"`, `"100px"` or `"12.5"`
///
/// Percentages and other units have no absolute size and yield `None`.
pub fn parse_length(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    let number = trimmed.strip_suffix("px").unwrap_or(trimmed).trim();
    number
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v > 0.0)
}
