// Frame preprocessing applied before detection

use image::{DynamicImage, RgbImage};
use imageproc::contrast::equalize_histogram;

/// Equalizes the luminance histogram and returns a gray frame in RGB layout,
/// so detectors that expect three channels still accept it.
pub fn equalize(image: &RgbImage) -> RgbImage {
    let gray = DynamicImage::ImageRgb8(image.clone()).into_luma8();
    let equalized = equalize_histogram(&gray);
    DynamicImage::ImageLuma8(equalized).into_rgb8()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn keeps_dimensions_and_outputs_gray() {
        let image = RgbImage::from_fn(32, 16, |x, y| Rgb([(x * 4) as u8, (y * 8) as u8, 90]));
        let out = equalize(&image);
        assert_eq!(out.dimensions(), (32, 16));
        for pixel in out.pixels() {
            assert_eq!(pixel[0], pixel[1]);
            assert_eq!(pixel[1], pixel[2]);
        }
    }

    #[test]
    fn stretches_low_contrast_input() {
        let image = RgbImage::from_fn(16, 16, |x, _| {
            let v = 100 + (x % 4) as u8;
            Rgb([v, v, v])
        });
        let out = equalize(&image);
        let min = out.pixels().map(|p| p[0]).min().unwrap();
        let max = out.pixels().map(|p| p[0]).max().unwrap();
        assert!(max - min > 100);
    }
}
