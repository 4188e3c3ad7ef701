//! Perspective rectification of a detected card.

use image::imageops;
use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use tracing::{debug, instrument};

use super::geometry::Quad;
use crate::config::NormalizerConfig;

/// A rectified card plus the two square crops the identifier hashes.
#[derive(Debug, Clone)]
pub struct NormalizedCard {
    /// Full rectified card, portrait.
    pub card: RgbImage,
    /// Top square of the card as presented.
    pub upright: RgbImage,
    /// Top square of the card turned 180°.
    pub rotated: RgbImage,
}

#[derive(Debug, Clone, Default)]
pub struct PerspectiveNormalizer {
    config: NormalizerConfig,
}

impl PerspectiveNormalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    /// Warp the quadrilateral onto the canonical `width × height` rectangle.
    ///
    /// Returns `None` for degenerate quadrilaterals (collinear corners).
    pub fn rectify(&self, frame: &RgbImage, quad: &Quad) -> Option<RgbImage> {
        let (w, h) = (self.config.width, self.config.height);
        let wf = w.saturating_sub(1) as f32;
        let hf = h.saturating_sub(1) as f32;

        let from = quad.ordered().to_array();
        let to = [(0.0, 0.0), (wf, 0.0), (wf, hf), (0.0, hf)];
        let projection = Projection::from_control_points(from, to)?;

        let mut out = RgbImage::new(w, h);
        warp_into(frame, &projection, Interpolation::Bilinear, Rgb([0, 0, 0]), &mut out);
        Some(out)
    }

    /// Rectify, orient to portrait and cut both orientation crops.
    #[instrument(skip_all)]
    pub fn normalize(&self, frame: &RgbImage, quad: &Quad) -> Option<NormalizedCard> {
        let card = orient_portrait(self.rectify(frame, quad)?);
        let (upright, rotated) = orientation_crops(&card, self.config.crop_size);
        debug!(
            width = card.width(),
            height = card.height(),
            crop = upright.width(),
            "Card normalized"
        );
        Some(NormalizedCard {
            card,
            upright,
            rotated,
        })
    }
}

/// Rotate 90° clockwise until the image is portrait, at most three times.
pub fn orient_portrait(mut image: RgbImage) -> RgbImage {
    for _ in 0..3 {
        if image.width() <= image.height() {
            break;
        }
        image = imageops::rotate90(&image);
    }
    image
}

/// The top `crop_size` square as presented, and the same square taken after
/// turning the card 180°.
pub fn orientation_crops(card: &RgbImage, crop_size: u32) -> (RgbImage, RgbImage) {
    let side_w = crop_size.min(card.width());
    let side_h = crop_size.min(card.height());
    let upright = imageops::crop_imm(card, 0, 0, side_w, side_h).to_image();
    let turned = imageops::rotate180(card);
    let rotated = imageops::crop_imm(&turned, 0, 0, side_w, side_h).to_image();
    (upright, rotated)
}
