use image::{imageops, DynamicImage, Rgb, RgbImage};

pub const PAD_COLOR: Rgb<u8> = Rgb([114, 114, 114]);

/// Aspect-preserving resize into a `size`x`size` canvas, centred on grey padding.
pub fn letterbox(image: &DynamicImage, size: u32) -> RgbImage {
    let (width, height) = (image.width().max(1), image.height().max(1));
    let ratio = size as f64 / width.max(height) as f64;
    let new_w = ((width as f64 * ratio) as u32).clamp(1, size);
    let new_h = ((height as f64 * ratio) as u32).clamp(1, size);

    let resized = imageops::resize(
        &image.to_rgb8(),
        new_w,
        new_h,
        imageops::FilterType::Triangle,
    );

    let mut canvas = RgbImage::from_pixel(size, size, PAD_COLOR);
    let left = (size - new_w) / 2;
    let top = (size - new_h) / 2;
    imageops::overlay(&mut canvas, &resized, i64::from(left), i64::from(top));
    canvas
}
