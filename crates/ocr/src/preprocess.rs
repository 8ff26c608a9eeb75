use image::{DynamicImage, GrayImage, ImageBuffer, Luma};
use imageproc::contrast::otsu_level;
use imageproc::filter::gaussian_blur_f32;
use imageproc::geometry::min_area_rect;
use imageproc::point::Point;
use marksheet_core::PreprocessConfig;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Extensions accepted as marks-card scans.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tif", "tiff"];

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("Failed to load image: {0}")]
    Load(#[from] image::ImageError),
    #[error("Unsupported image type: {0}")]
    UnsupportedFormat(String),
    #[error("Failed to encode processed image: {0}")]
    Encode(String),
    #[error("{0}")]
    Degenerate(String),
}

/// A single-channel image ready for the token source.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub image: GrayImage,
    /// The source file, when the image came from disk.
    pub source_path: Option<PathBuf>,
    /// Where the normalized image was written for audit, if it was.
    pub saved_path: Option<PathBuf>,
}

impl NormalizedImage {
    pub fn to_png(&self) -> Result<Vec<u8>, PreprocessError> {
        encode_as_png(&self.image)
    }
}

/// Deterministic image cleanup in front of OCR.
///
/// Grayscale conversion always runs. Deskew, denoise and contrast enhancement
/// are optional, and each one that fails leaves the previous image in place.
/// Binarization ends every run, adaptive or Otsu.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    config: PreprocessConfig,
}

impl Normalizer {
    pub fn new(config: PreprocessConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    /// Load an image file, normalize it, and write it to `save_dir` when one is configured.
    pub fn normalize_file(&self, path: &Path) -> Result<NormalizedImage, PreprocessError> {
        let img = load_image(path)?;
        let image = self.normalize(img);
        let saved_path = self.config.save_dir.as_deref().and_then(|dir| save_normalized(&image, dir, path));
        Ok(NormalizedImage { image, source_path: Some(path.to_path_buf()), saved_path })
    }

    /// Normalize raw image bytes (PNG / JPEG / TIFF / …). Nothing is written to disk.
    pub fn normalize_bytes(&self, data: &[u8]) -> Result<NormalizedImage, PreprocessError> {
        let img = image::load_from_memory(data)?;
        Ok(NormalizedImage { image: self.normalize(img), source_path: None, saved_path: None })
    }

    pub fn normalize(&self, img: DynamicImage) -> GrayImage {
        let cfg = &self.config;

        // Down-scale very large scans; the resize keeps aspect ratio.
        let img = match cfg.max_dimension {
            Some(max) if img.width() > max || img.height() > max => {
                debug!(width = img.width(), height = img.height(), max, "Downscaling image");
                img.resize(max, max, image::imageops::FilterType::Lanczos3)
            }
            _ => img,
        };

        let mut gray = img.to_luma8();
        if !cfg.enabled {
            return gray;
        }

        if cfg.do_deskew {
            gray = run_step("deskew", gray, |g| deskew(g, cfg.max_skew_degrees));
        }
        if cfg.do_denoise {
            gray = run_step("denoise", gray, |g| denoise(g, cfg.denoise_strength));
        }
        if cfg.enhance_contrast {
            gray = run_step("contrast", gray, |g| {
                equalize_adaptive(g, cfg.clahe_clip_limit, cfg.clahe_grid)
            });
        }

        if cfg.use_adaptive_threshold {
            binarize_adaptive(&gray, cfg.adaptive_block_radius, cfg.adaptive_offset)
        } else {
            binarize_otsu(&gray)
        }
    }
}

/// Check the extension against [`SUPPORTED_EXTENSIONS`] and decode.
pub fn load_image(path: &Path) -> Result<DynamicImage, PreprocessError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    if !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(PreprocessError::UnsupportedFormat(path.display().to_string()));
    }
    Ok(image::open(path)?)
}

fn run_step(
    name: &str,
    input: GrayImage,
    step: impl FnOnce(&GrayImage) -> Result<GrayImage, PreprocessError>,
) -> GrayImage {
    match step(&input) {
        Ok(out) => {
            debug!(step = name, "Preprocessing step applied");
            out
        }
        Err(e) => {
            warn!(step = name, error = %e, "Preprocessing step failed, keeping previous image");
            input
        }
    }
}

fn save_normalized(image: &GrayImage, dir: &Path, source: &Path) -> Option<PathBuf> {
    let stem = source.file_stem().and_then(|s| s.to_str()).unwrap_or("image");
    let dest = dir.join(format!("{stem}_preprocessed.png"));
    let written = std::fs::create_dir_all(dir)
        .map_err(|e| e.to_string())
        .and_then(|_| {
            image.save_with_format(&dest, image::ImageFormat::Png).map_err(|e| e.to_string())
        });
    match written {
        Ok(()) => {
            debug!(path = %dest.display(), "Normalized image saved");
            Some(dest)
        }
        Err(e) => {
            warn!(path = %dest.display(), error = %e, "Could not save normalized image");
            None
        }
    }
}

fn encode_as_png(img: &GrayImage) -> Result<Vec<u8>, PreprocessError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| PreprocessError::Encode(e.to_string()))?;
    Ok(buf)
}

// ── Deskew ────────────────────────────────────────────────────────────────────

/// Angle (degrees, in (-45, 45]) of the minimum-area rectangle around the dark
/// pixels. Positive means content runs downhill to the right. `None` when there
/// are too few dark pixels to fit a rectangle.
pub fn estimate_skew(gray: &GrayImage) -> Option<f32> {
    let level = otsu_level(gray);
    // Dark pixels are the foreground (text), as if the Otsu result were inverted.
    let points: Vec<Point<i32>> = gray
        .enumerate_pixels()
        .filter(|(_, _, p)| p[0] <= level)
        .map(|(x, y, _)| Point::new(x as i32, y as i32))
        .collect();
    if points.len() < 3 {
        return None;
    }

    let corners = min_area_rect(&points);
    let (dx, dy) = (corners[1].x - corners[0].x, corners[1].y - corners[0].y);
    let (dx, dy) = if dx == 0 && dy == 0 {
        (corners[2].x - corners[1].x, corners[2].y - corners[1].y)
    } else {
        (dx, dy)
    };
    let mut angle = (dy as f32).atan2(dx as f32).to_degrees();
    while angle > 45.0 {
        angle -= 90.0;
    }
    while angle <= -45.0 {
        angle += 90.0;
    }
    Some(angle)
}

/// Rotate the page so its text lines run horizontally. The correction is
/// clamped to `max_degrees` either way.
pub fn deskew(gray: &GrayImage, max_degrees: f32) -> Result<GrayImage, PreprocessError> {
    let angle = estimate_skew(gray)
        .ok_or_else(|| PreprocessError::Degenerate("no foreground pixels to deskew".to_string()))?;
    let angle = angle.clamp(-max_degrees, max_degrees);
    debug!(angle, "Estimated skew");
    if angle.abs() < 0.01 {
        return Ok(gray.clone());
    }
    Ok(rotate_replicate(gray, angle))
}

/// Rotate by `degrees` about the image centre, undoing a skew of that angle.
/// Bicubic sampling; samples past the border repeat the nearest edge pixel.
fn rotate_replicate(gray: &GrayImage, degrees: f32) -> GrayImage {
    let (w, h) = gray.dimensions();
    let (sin, cos) = degrees.to_radians().sin_cos();
    let cx = (w as f32 - 1.0) / 2.0;
    let cy = (h as f32 - 1.0) / 2.0;

    ImageBuffer::from_fn(w, h, |x, y| {
        let (rx, ry) = (x as f32 - cx, y as f32 - cy);
        let sx = cx + cos * rx - sin * ry;
        let sy = cy + sin * rx + cos * ry;
        Luma([sample_bicubic(gray, sx, sy)])
    })
}

fn sample_bicubic(gray: &GrayImage, sx: f32, sy: f32) -> u8 {
    let (w, h) = gray.dimensions();
    let x0 = sx.floor();
    let y0 = sy.floor();
    let (fx, fy) = (sx - x0, sy - y0);
    let (x0, y0) = (x0 as i64, y0 as i64);

    let mut acc = 0.0f32;
    for n in -1..=2i64 {
        let wy = cubic_weight(fy - n as f32);
        let py = (y0 + n).clamp(0, h as i64 - 1) as u32;
        for m in -1..=2i64 {
            let wx = cubic_weight(fx - m as f32);
            let px = (x0 + m).clamp(0, w as i64 - 1) as u32;
            acc += wx * wy * gray.get_pixel(px, py)[0] as f32;
        }
    }
    acc.round().clamp(0.0, 255.0) as u8
}

/// Cubic convolution kernel with a = -0.75.
fn cubic_weight(t: f32) -> f32 {
    const A: f32 = -0.75;
    let t = t.abs();
    if t <= 1.0 {
        ((A + 2.0) * t - (A + 3.0)) * t * t + 1.0
    } else if t < 2.0 {
        ((A * t - 5.0 * A) * t + 8.0 * A) * t - 4.0 * A
    } else {
        0.0
    }
}

// ── Denoise ───────────────────────────────────────────────────────────────────

const PATCH_RADIUS: i64 = 1;
const SEARCH_RADIUS: i64 = 3;

/// Non-local-means denoising: each pixel becomes a weighted mean of the pixels
/// in its search window, weighted by how closely their 3×3 neighbourhoods match.
pub fn denoise(gray: &GrayImage, strength: f32) -> Result<GrayImage, PreprocessError> {
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        return Err(PreprocessError::Degenerate("empty image".to_string()));
    }
    if !(strength > 0.0) {
        return Err(PreprocessError::Degenerate(format!("invalid denoise strength {strength}")));
    }

    // Weight by mean squared patch distance, which is an integer in 0..=65025.
    let h2 = strength * strength;
    let weights: Vec<f32> = (0..=255u32 * 255).map(|d| (-(d as f32) / h2).exp()).collect();
    let patch_len = ((2 * PATCH_RADIUS + 1) * (2 * PATCH_RADIUS + 1)) as u32;

    let at = |x: i64, y: i64| -> i32 {
        let x = x.clamp(0, w as i64 - 1) as u32;
        let y = y.clamp(0, h as i64 - 1) as u32;
        gray.get_pixel(x, y)[0] as i32
    };

    Ok(ImageBuffer::from_fn(w, h, |x, y| {
        let (x, y) = (x as i64, y as i64);
        let mut sum = 0.0f32;
        let mut norm = 0.0f32;
        for qy in (y - SEARCH_RADIUS)..=(y + SEARCH_RADIUS) {
            for qx in (x - SEARCH_RADIUS)..=(x + SEARCH_RADIUS) {
                let mut dist = 0u32;
                for oy in -PATCH_RADIUS..=PATCH_RADIUS {
                    for ox in -PATCH_RADIUS..=PATCH_RADIUS {
                        let d = at(x + ox, y + oy) - at(qx + ox, qy + oy);
                        dist += (d * d) as u32;
                    }
                }
                let weight = weights[(dist / patch_len) as usize];
                sum += weight * at(qx, qy) as f32;
                norm += weight;
            }
        }
        Luma([(sum / norm).round().clamp(0.0, 255.0) as u8])
    }))
}

// ── Contrast ──────────────────────────────────────────────────────────────────

/// Contrast-limited adaptive histogram equalization over a `grid`×`grid` tiling.
pub fn equalize_adaptive(
    gray: &GrayImage,
    clip_limit: f32,
    grid: u32,
) -> Result<GrayImage, PreprocessError> {
    let (w, h) = gray.dimensions();
    if grid == 0 || w < grid || h < grid {
        return Err(PreprocessError::Degenerate(format!(
            "{w}x{h} image is smaller than the {grid}x{grid} tile grid"
        )));
    }

    let bounds = |i: u32, len: u32| (i * len / grid, (i + 1) * len / grid);
    let mut luts = vec![[0u8; 256]; (grid * grid) as usize];

    for ty in 0..grid {
        let (y0, y1) = bounds(ty, h);
        for tx in 0..grid {
            let (x0, x1) = bounds(tx, w);
            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[gray.get_pixel(x, y)[0] as usize] += 1;
                }
            }
            let area = (x1 - x0) * (y1 - y0);
            clip_histogram(&mut hist, clip_limit, area);

            let lut = &mut luts[(ty * grid + tx) as usize];
            let mut cdf = 0u32;
            for (v, count) in hist.iter().enumerate() {
                cdf += count;
                lut[v] = ((cdf as u64 * 255 + area as u64 / 2) / area as u64).min(255) as u8;
            }
        }
    }

    // Blend the four nearest tile mappings by distance to each tile centre.
    let tile_w = w as f32 / grid as f32;
    let tile_h = h as f32 / grid as f32;
    let last = (grid - 1) as f32;
    let lut_at = |tx: u32, ty: u32, v: u8| luts[(ty * grid + tx) as usize][v as usize] as f32;

    Ok(ImageBuffer::from_fn(w, h, |x, y| {
        let gx = ((x as f32 + 0.5) / tile_w - 0.5).clamp(0.0, last);
        let gy = ((y as f32 + 0.5) / tile_h - 0.5).clamp(0.0, last);
        let (tx0, ty0) = (gx.floor() as u32, gy.floor() as u32);
        let (tx1, ty1) = ((tx0 + 1).min(grid - 1), (ty0 + 1).min(grid - 1));
        let (ax, ay) = (gx - tx0 as f32, gy - ty0 as f32);
        let v = gray.get_pixel(x, y)[0];

        let top = lut_at(tx0, ty0, v) * (1.0 - ax) + lut_at(tx1, ty0, v) * ax;
        let bottom = lut_at(tx0, ty1, v) * (1.0 - ax) + lut_at(tx1, ty1, v) * ax;
        Luma([(top * (1.0 - ay) + bottom * ay).round().clamp(0.0, 255.0) as u8])
    }))
}

/// Cap each bin at `clip_limit` times the mean bin height and spread the excess evenly.
fn clip_histogram(hist: &mut [u32; 256], clip_limit: f32, area: u32) {
    let limit = ((clip_limit * area as f32 / 256.0) as u32).max(1);
    let mut excess = 0u32;
    for count in hist.iter_mut() {
        if *count > limit {
            excess += *count - limit;
            *count = limit;
        }
    }
    let share = excess / 256;
    let remainder = (excess % 256) as usize;
    for (i, count) in hist.iter_mut().enumerate() {
        *count += share + u32::from(i < remainder);
    }
}

// ── Binarization ──────────────────────────────────────────────────────────────

/// Local threshold: a pixel is white when brighter than its Gaussian-weighted
/// neighbourhood mean minus `offset`.
pub fn binarize_adaptive(gray: &GrayImage, block_radius: u32, offset: i32) -> GrayImage {
    // Same sigma OpenCV derives for a (2r+1)-pixel Gaussian block.
    let sigma = (0.3 * (block_radius as f32 - 1.0) + 0.8).max(0.5);
    let local_mean = gaussian_blur_f32(gray, sigma);
    ImageBuffer::from_fn(gray.width(), gray.height(), |x, y| {
        let p = gray.get_pixel(x, y)[0] as i32;
        let t = local_mean.get_pixel(x, y)[0] as i32 - offset;
        Luma([if p > t { 255 } else { 0 }])
    })
}

pub fn binarize_otsu(gray: &GrayImage) -> GrayImage {
    let level = otsu_level(gray);
    debug!(level, "Otsu threshold computed");
    ImageBuffer::from_fn(gray.width(), gray.height(), |x, y| {
        Luma([if gray.get_pixel(x, y)[0] > level { 255 } else { 0 }])
    })
}
