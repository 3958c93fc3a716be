//! Square-neighborhood dilation of binary masks
//!
//! A pixel is set in the output when any pixel within `radius` along both axes
//! (a `(2r+1) x (2r+1)` square) is set in the input.

use crate::raster::mask::BinaryMask;
use imageproc::distance_transform::Norm;
use imageproc::morphology::dilate;

/// Dilate a mask with a square structuring element of the given radius
///
/// Radii above 255 are clamped to 255, which already covers any scoring
/// canvas the pipeline produces.
pub fn dilate_square(mask: &BinaryMask, radius: u32) -> BinaryMask {
    if radius == 0 || mask.is_empty() {
        return mask.clone();
    }

    let radius = u8::try_from(radius).unwrap_or(u8::MAX);
    let dilated = dilate(&mask.to_gray_image(), Norm::LInf, radius);

    BinaryMask::from_fn(mask.width(), mask.height(), mask.threshold(), |x, y| {
        dilated.get_pixel(x, y).0[0] > 0
    })
}
