use image::{GrayImage, Luma};
use imageproc::filter::gaussian_blur_f32;

pub const WHITE: Luma<u8> = Luma([u8::MAX]);
pub const BLACK: Luma<u8> = Luma([u8::MIN]);

/// Summed-area table with a zero-padded border, laid out row-major with a
/// stride of `width + 1`.
pub fn integral_image(img: &GrayImage) -> Vec<u64> {
    let (w, h) = img.dimensions();
    let stride = (w + 1) as usize;
    let mut table = vec![0u64; stride * (h + 1) as usize];

    for y in 0..h {
        let mut row_sum = 0u64;
        for x in 0..w {
            row_sum += u64::from(img.get_pixel(x, y).0[0]);
            let idx = (y + 1) as usize * stride + (x + 1) as usize;
            table[idx] = row_sum + table[y as usize * stride + (x + 1) as usize];
        }
    }

    table
}

/// Mean pixel value of the square neighborhood centered on (cx, cy), clamped
/// to the image bounds.
pub fn local_mean(
    integral: &[u64],
    width: u32,
    height: u32,
    cx: u32,
    cy: u32,
    radius: u32,
) -> f64 {
    let stride = (width + 1) as usize;
    let x1 = cx.saturating_sub(radius) as usize;
    let y1 = cy.saturating_sub(radius) as usize;
    let x2 = ((cx + radius + 1) as usize).min(width as usize);
    let y2 = ((cy + radius + 1) as usize).min(height as usize);

    let area = ((x2 - x1) * (y2 - y1)) as f64;
    if area == 0.0 {
        return 128.0;
    }

    let sum = integral[y2 * stride + x2] as f64 - integral[y1 * stride + x2] as f64
        - integral[y2 * stride + x1] as f64
        + integral[y1 * stride + x1] as f64;
    sum / area
}

/// Local-mean adaptive threshold, inverted so ink becomes foreground: a
/// pixel darker than its neighborhood mean minus `offset` maps to white.
pub fn adaptive_threshold_inv(img: &GrayImage, block_radius: u32, offset: i32) -> GrayImage {
    let (width, height) = img.dimensions();
    let integral = integral_image(img);
    let mut out = GrayImage::new(width, height);

    for y in 0..height {
        for x in 0..width {
            let mean = local_mean(&integral, width, height, x, y, block_radius);
            let cutoff = (mean as i32 - offset).clamp(0, 255) as u8;
            let pixel = img.get_pixel(x, y).0[0];
            out.put_pixel(x, y, if pixel < cutoff { WHITE } else { BLACK });
        }
    }

    out
}

/// Flatten large-scale lighting gradients by dividing the image by a heavily
/// blurred copy of itself, rescaled so even paper comes out near white.
pub fn flatten_illumination(img: &GrayImage, sigma: f32) -> GrayImage {
    let background = gaussian_blur_f32(img, sigma);
    let mut out = GrayImage::new(img.width(), img.height());

    for (x, y, pixel) in img.enumerate_pixels() {
        let bg = background.get_pixel(x, y).0[0].max(1) as f32;
        let value = (pixel.0[0] as f32 / bg * 255.0).round().min(255.0) as u8;
        out.put_pixel(x, y, Luma([value]));
    }

    out
}

/// Mean and standard deviation of a pixel sample.
pub fn sample_stats(pixels: &[u8]) -> (f32, f32) {
    if pixels.is_empty() {
        return (0.0, 0.0);
    }
    let mean = pixels.iter().map(|&p| f32::from(p)).sum::<f32>() / pixels.len() as f32;
    let variance = pixels
        .iter()
        .map(|&p| (f32::from(p) - mean).powi(2))
        .sum::<f32>()
        / pixels.len() as f32;
    (mean, variance.sqrt())
}

/// Otsu threshold over an arbitrary pixel sample rather than a whole image,
/// used when thresholding the masked interior of a single bubble.
pub fn otsu_threshold_of(pixels: &[u8]) -> u8 {
    let mut histogram = [0u64; 256];
    for &p in pixels {
        histogram[p as usize] += 1;
    }

    let total = pixels.len() as u64;
    if total == 0 {
        return 128;
    }

    let sum_total: f64 = histogram
        .iter()
        .enumerate()
        .map(|(i, &count)| i as f64 * count as f64)
        .sum();

    let mut sum_background = 0.0f64;
    let mut weight_background = 0u64;
    let mut max_variance = 0.0f64;
    let mut best = 0u8;

    for (t, &count) in histogram.iter().enumerate() {
        weight_background += count;
        if weight_background == 0 {
            continue;
        }
        let weight_foreground = total - weight_background;
        if weight_foreground == 0 {
            break;
        }

        sum_background += t as f64 * count as f64;
        let mean_background = sum_background / weight_background as f64;
        let mean_foreground = (sum_total - sum_background) / weight_foreground as f64;
        let between = weight_background as f64
            * weight_foreground as f64
            * (mean_background - mean_foreground).powi(2);

        if between > max_variance {
            max_variance = between;
            best = t as u8;
        }
    }

    best
}
