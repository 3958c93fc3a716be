//! Normalization of raw SVG markup into thick, single-color line art
//!
//! The output is a fresh document serialized from the parsed tree: every
//! stroke-bearing element is repainted with one stroke color, fills are
//! removed, stroke widths are scaled, and the viewbox is zoomed out so strokes
//! near the border survive later cropping, convolution and model redrawing.

use crate::io::configuration::{
    CONDITIONING_SIZE, DEFAULT_BACKGROUND_COLOR, DEFAULT_BASE_STROKE_WIDTH, DEFAULT_PADDING_FRACTION,
    DEFAULT_STROKE_COLOR, DEFAULT_STROKE_MULTIPLIER, PADDING_FRACTION_LIMIT,
    RECOMMENDED_MAX_PADDING, STROKE_MULTIPLIER_RANGE,
};
use crate::io::error::{Result, invalid_markup, invalid_parameter};
use crate::vector::color::Color;
use crate::vector::viewbox::{ViewBox, parse_length};
use roxmltree::{Document, Node};
use serde::Deserialize;
use tracing::{debug, warn};

const SVG_NS: &str = "http://www.w3.org/2000/svg";
const XLINK_NS: &str = "http://www.w3.org/1999/xlink";

/// Elements that draw a stroke and receive the normalized paint
const STROKE_ELEMENTS: [&str; 7] = [
    "path", "line", "polyline", "polygon", "circle", "ellipse", "rect",
];

// Raster content, text and embedded styling cannot be expressed as line art
const DROPPED_ELEMENTS: [&str; 7] = [
    "image",
    "foreignObject",
    "script",
    "style",
    "text",
    "tspan",
    "textPath",
];

/// Presentation attributes rewritten by normalization
const PAINT_PROPERTIES: [&str; 8] = [
    "stroke",
    "stroke-width",
    "stroke-linecap",
    "stroke-linejoin",
    "stroke-opacity",
    "fill",
    "fill-opacity",
    "opacity",
];

/// Settings for vector normalization
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Color forced onto every stroke
    pub stroke_color: Color,
    /// Canvas color, or transparent to skip the background rectangle
    pub background_color: Color,
    /// Factor applied to every stroke width (at least 1.0)
    pub stroke_width_multiplier: f64,
    /// Fraction of each dimension added on every side of the viewbox
    pub padding_fraction: f64,
    /// Canvas side length the document will be rendered at; stroke widths
    /// are rounded to whole pixels at this scale
    ///
    /// The pipeline always replaces this with the raster size.
    pub working_size: u32,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            stroke_color: DEFAULT_STROKE_COLOR.parse().unwrap_or(Color::WHITE),
            background_color: DEFAULT_BACKGROUND_COLOR.parse().unwrap_or(Color::BLACK),
            stroke_width_multiplier: DEFAULT_STROKE_MULTIPLIER,
            padding_fraction: DEFAULT_PADDING_FRACTION,
            working_size: CONDITIONING_SIZE,
        }
    }
}

impl PreprocessConfig {
    /// Check multiplier and padding ranges
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for a multiplier outside [1.0, 2.5], a padding
    /// fraction outside [0, 0.5), a zero working size, or a transparent
    /// stroke color
    pub fn validate(&self) -> Result<()> {
        let (min_mult, max_mult) = STROKE_MULTIPLIER_RANGE;
        if !(min_mult..=max_mult).contains(&self.stroke_width_multiplier) {
            return Err(invalid_parameter(
                "stroke_width_multiplier",
                &self.stroke_width_multiplier,
                &format!("must be within [{min_mult}, {max_mult}]"),
            ));
        }
        if !(0.0..PADDING_FRACTION_LIMIT).contains(&self.padding_fraction) {
            return Err(invalid_parameter(
                "padding_fraction",
                &self.padding_fraction,
                &format!("must be within [0, {PADDING_FRACTION_LIMIT})"),
            ));
        }
        if self.working_size == 0 {
            return Err(invalid_parameter(
                "working_size",
                &self.working_size,
                &"must be positive",
            ));
        }
        if self.stroke_color.is_transparent() {
            return Err(invalid_parameter(
                "stroke_color",
                &self.stroke_color,
                &"strokes must be visible",
            ));
        }
        Ok(())
    }
}

/// Normalized SVG document ready for rasterization
///
/// Immutable once built; the markup always carries an explicit padded viewbox
/// with matching width and height attributes.
#[derive(Debug, Clone)]
pub struct VectorDocument {
    markup: String,
    view_box: ViewBox,
    content_view_box: ViewBox,
    background: Color,
    stroke_elements: usize,
}

impl VectorDocument {
    /// Normalized markup
    pub fn markup(&self) -> &str {
        &self.markup
    }

    /// Padded viewbox the markup is rendered with
    pub const fn view_box(&self) -> ViewBox {
        self.view_box
    }

    /// Viewbox derived from the input before padding
    pub const fn content_view_box(&self) -> ViewBox {
        self.content_view_box
    }

    /// Canvas color used for letterboxing
    pub const fn background(&self) -> Color {
        self.background
    }

    /// Number of stroke-bearing elements that were normalized
    pub const fn stroke_elements(&self) -> usize {
        self.stroke_elements
    }

    /// Canvas size that renders this document at the same pixels per user
    /// unit as an unpadded document rendered at `base_size`
    pub fn scale_preserving_size(&self, base_size: u32) -> u32 {
        let content = self.content_view_box.width.max(self.content_view_box.height);
        let padded = self.view_box.width.max(self.view_box.height);
        (f64::from(base_size) * padded / content).round() as u32
    }
}

/// Normalize raw SVG markup
///
/// # Errors
///
/// Returns `InvalidMarkup` if the input is empty, is not well-formed XML, or
/// its root element is not `svg`; returns `InvalidParameter` if the
/// configuration is out of range
pub fn preprocess_markup(raw: &str, config: &PreprocessConfig) -> Result<VectorDocument> {
    config.validate()?;
    if config.padding_fraction > RECOMMENDED_MAX_PADDING {
        warn!(
            padding = config.padding_fraction,
            "padding above the recommended range shrinks the sigil noticeably"
        );
    }

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(invalid_markup(&"input is empty"));
    }

    let document = Document::parse(trimmed).map_err(|e| invalid_markup(&e))?;
    let root = document.root_element();
    if root.tag_name().name() != "svg" || !is_svg_namespace(root) {
        return Err(invalid_markup(&format!(
            "root element is <{}>, expected <svg>",
            root.tag_name().name()
        )));
    }

    let content_view_box = ViewBox::derive(
        root.attribute("viewBox"),
        root.attribute("width"),
        root.attribute("height"),
    );
    let view_box = content_view_box.padded(config.padding_fraction);

    // Contain fit: the larger viewbox dimension spans the whole canvas
    let pixels_per_unit =
        f64::from(config.working_size) / view_box.width.max(view_box.height);
    let mut writer = MarkupWriter::new(config, pixels_per_unit);
    writer.open_root(view_box);
    if !config.background_color.is_transparent() {
        writer.background_rect(view_box, config.background_color);
    }
    for child in root.children() {
        writer.node(child);
    }
    writer.close("svg");

    debug!(
        stroke_elements = writer.stroke_elements,
        view_box = %view_box,
        "normalized vector markup"
    );

    Ok(VectorDocument {
        markup: writer.out,
        view_box,
        content_view_box,
        background: config.background_color,
        stroke_elements: writer.stroke_elements,
    })
}

fn is_svg_namespace(node: Node<'_, '_>) -> bool {
    matches!(node.tag_name().namespace(), None | Some(SVG_NS))
}

/// Split a `style` attribute into trimmed `(property, value)` pairs
fn style_declarations(style: &str) -> impl Iterator<Item = (&str, &str)> {
    style.split(';').filter_map(|declaration| {
        let (property, value) = declaration.split_once(':')?;
        Some((property.trim(), value.trim()))
    })
}

/// Stroke width declared directly on an element, attribute first
fn declared_stroke_width(node: Node<'_, '_>) -> Option<f64> {
    let from_style = || {
        node.attribute("style").and_then(|style| {
            style_declarations(style)
                .filter(|(property, _)| *property == "stroke-width")
                .find_map(|(_, value)| parse_length(value))
        })
    };
    node.attribute("stroke-width")
        .and_then(parse_length)
        .or_else(from_style)
}

/// Stroke width in effect for an element, inherited from the nearest ancestor
fn effective_stroke_width(node: Node<'_, '_>) -> Option<f64> {
    node.ancestors()
        .filter(Node::is_element)
        .find_map(declared_stroke_width)
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

struct MarkupWriter<'c> {
    out: String,
    config: &'c PreprocessConfig,
    pixels_per_unit: f64,
    stroke_elements: usize,
}

impl<'c> MarkupWriter<'c> {
    fn new(config: &'c PreprocessConfig, pixels_per_unit: f64) -> Self {
        Self {
            out: String::new(),
            config,
            pixels_per_unit,
            stroke_elements: 0,
        }
    }

    fn attribute(&mut self, name: &str, value: &str) {
        self.out.push(' ');
        self.out.push_str(name);
        self.out.push_str("=\"");
        self.out.push_str(&escape(value));
        self.out.push('"');
    }

    fn open_root(&mut self, view_box: ViewBox) {
        self.out.push_str("<svg");
        self.attribute("xmlns", SVG_NS);
        self.attribute("xmlns:xlink", XLINK_NS);
        self.attribute("viewBox", &view_box.to_string());
        self.attribute("width", &view_box.width.to_string());
        self.attribute("height", &view_box.height.to_string());
        self.attribute("preserveAspectRatio", "xMidYMid meet");
        self.out.push('>');
    }

    fn background_rect(&mut self, view_box: ViewBox, color: Color) {
        self.out.push_str("<rect");
        self.attribute("x", &view_box.x.to_string());
        self.attribute("y", &view_box.y.to_string());
        self.attribute("width", &view_box.width.to_string());
        self.attribute("height", &view_box.height.to_string());
        self.attribute("fill", &color.to_string());
        self.attribute("stroke", "none");
        self.out.push_str("/>");
    }

    fn close(&mut self, name: &str) {
        self.out.push_str("</");
        self.out.push_str(name);
        self.out.push('>');
    }

    fn node(&mut self, node: Node<'_, '_>) {
        if node.is_text() {
            if let Some(text) = node.text() {
                self.out.push_str(&escape(text));
            }
            return;
        }
        if !node.is_element() || !is_svg_namespace(node) {
            return;
        }

        let name = node.tag_name().name();
        if DROPPED_ELEMENTS.contains(&name) {
            return;
        }

        self.out.push('<');
        self.out.push_str(name);
        self.copy_attributes(node);

        if STROKE_ELEMENTS.contains(&name) {
            self.stroke_paint(node);
        }

        if node.has_children() {
            self.out.push('>');
            for child in node.children() {
                self.node(child);
            }
            self.close(name);
        } else {
            self.out.push_str("/>");
        }
    }

    fn copy_attributes(&mut self, node: Node<'_, '_>) {
        for attr in node.attributes() {
            match attr.namespace() {
                Some(XLINK_NS) => self.attribute(&format!("xlink:{}", attr.name()), attr.value()),
                Some(_) => {}
                None if PAINT_PROPERTIES.contains(&attr.name()) => {}
                None if attr.name() == "style" => {
                    let kept: Vec<String> = style_declarations(attr.value())
                        .filter(|(property, _)| !PAINT_PROPERTIES.contains(property))
                        .map(|(property, value)| format!("{property}:{value}"))
                        .collect();
                    if !kept.is_empty() {
                        self.attribute("style", &kept.join(";"));
                    }
                }
                None => self.attribute(attr.name(), attr.value()),
            }
        }
    }

    /// Round a user-unit width to whole pixels at the working scale, never
    /// below one pixel, and convert back to user units
    fn rounded_width(&self, width: f64) -> f64 {
        let pixels = (width * self.pixels_per_unit).round().max(1.0);
        pixels / self.pixels_per_unit
    }

    fn stroke_paint(&mut self, node: Node<'_, '_>) {
        let base = effective_stroke_width(node).unwrap_or(DEFAULT_BASE_STROKE_WIDTH);
        let width = self.rounded_width(base * self.config.stroke_width_multiplier);
        let stroke = self.config.stroke_color.to_string();

        self.attribute("stroke", &stroke);
        self.attribute("fill", "none");
        self.attribute("stroke-width", &width.to_string());
        self.attribute("stroke-linecap", "round");
        self.attribute("stroke-linejoin", "round");
        self.stroke_elements += 1;
    }
}
