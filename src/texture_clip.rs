//! Crops each `ParameterizedTexture`'s source image down to the axis-aligned UV
//! bounding box of one target at a time, rewriting that target's UVs against the
//! cropped subimage and bucketing the result under `<texture-folder>/<bucket>/`.
//! `GeoreferencedTexture`s are copied verbatim (image plus world-file companion) via
//! [`crate::resources::ResourceProcessor`], since there is nothing to clip.

use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat};

use crate::error::{CgtError, Result};
use crate::model::appearance::{ParameterizedTexture, SurfaceData, Uv};
use crate::model::{Appearance, Target};
use crate::resources::{ResourceKind, ResourceProcessor};

#[derive(Debug, Clone)]
pub struct TextureClipOptions {
    pub precision: u32,
    pub clamp_out_of_range: bool,
    pub force_jpeg: bool,
    pub jpeg_quality: f32,
    pub texture_folder: String,
    /// Number of buckets to spread output files over; 0 means a flat directory.
    pub bucket_count: u32,
    pub prefix: String,
}

impl Default for TextureClipOptions {
    fn default() -> Self {
        TextureClipOptions {
            precision: 7,
            clamp_out_of_range: false,
            force_jpeg: false,
            jpeg_quality: 0.85,
            texture_folder: "clipped_textures".into(),
            bucket_count: 0,
            prefix: "tex".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TextureClipStats {
    pub targets_clipped: u64,
    pub targets_copied_verbatim: u64,
}

/// Monotonically increasing counter shared across every appearance processed in one
/// run, so output file names never collide.
#[derive(Default)]
pub struct Counter(u64);

impl Counter {
    pub fn next(&mut self) -> u64 {
        self.0 += 1;
        self.0
    }
}

/// `bucket_count` of 0 is treated the same as 1: output always lands under a
/// `<bucket>/` folder, per the on-disk layout this crate documents for callers, with
/// everything landing in bucket `1` when no spreading was requested.
fn bucket_path(opts: &TextureClipOptions, out_dir: &Path, counter: u64, ext: &str) -> PathBuf {
    let name = format!("{}{}.{}", opts.prefix, counter, ext);
    let bucket_count = opts.bucket_count.max(1) as u64;
    let bucket = ((counter - 1) % bucket_count) + 1;
    out_dir.join(&opts.texture_folder).join(bucket.to_string()).join(name)
}

fn round_to(v: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    (v * factor).round() / factor
}

/// Processes every surface-data member of one appearance, replacing
/// `ParameterizedTexture`s with their clipped-and-split equivalents in place and
/// submitting `GeoreferencedTexture` copies to `resources`.
pub fn clip_appearance(
    appearance: &mut Appearance,
    source_dir: &Path,
    out_dir: &Path,
    opts: &TextureClipOptions,
    counter: &mut Counter,
    resources: &ResourceProcessor,
) -> Result<TextureClipStats> {
    let mut stats = TextureClipStats::default();
    let mut replacement = Vec::with_capacity(appearance.surface_data.len());

    for sd in appearance.surface_data.drain(..) {
        match sd {
            SurfaceData::ParameterizedTexture(tex) => {
                let (clipped, s) = clip_parameterized_texture(&tex, source_dir, out_dir, opts, counter)?;
                stats.targets_clipped += s.targets_clipped;
                stats.targets_copied_verbatim += s.targets_copied_verbatim;
                replacement.extend(clipped);
            }
            SurfaceData::GeoreferencedTexture(tex) => {
                let source = source_dir.join(&tex.image_uri);
                let dest = out_dir.join(&tex.image_uri);
                resources.submit(ResourceKind::GeoreferencedTexture, &source, &dest);
                resources.submit_world_file(&source, &dest);
                replacement.push(SurfaceData::GeoreferencedTexture(tex));
            }
            other @ SurfaceData::X3DMaterial(_) => replacement.push(other),
        }
    }

    appearance.surface_data = replacement;
    Ok(stats)
}

/// Splits one `ParameterizedTexture` into one fresh surface-data object per target,
/// each carrying a crop of the source image scoped to that target's UV bounding box.
/// Falls back to a verbatim copy (all targets kept together, image unmodified) when
/// the texture has no UV-bearing targets at all, or when the source image can't be
/// read.
fn clip_parameterized_texture(
    tex: &ParameterizedTexture,
    source_dir: &Path,
    out_dir: &Path,
    opts: &TextureClipOptions,
    counter: &mut Counter,
) -> Result<(Vec<SurfaceData>, TextureClipStats)> {
    let mut stats = TextureClipStats::default();

    if tex.targets.is_empty() {
        stats.targets_copied_verbatim += 1;
        return Ok((vec![verbatim_copy(tex, source_dir, out_dir, opts, counter)?], stats));
    }

    let source_path = source_dir.join(&tex.image_uri);
    let img = match image::open(&source_path) {
        Ok(img) => img,
        Err(e) => {
            return Err(CgtError::TextureClippingFailed {
                target: tex.image_uri.clone(),
                message: e.to_string(),
            })
        }
    };
    let is_tiff = source_path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("tif") || e.eq_ignore_ascii_case("tiff"));
    let is_transparent_png = source_path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("png"))
        && img.color().has_alpha();

    let mut out = Vec::with_capacity(tex.targets.len());
    for (target, uv) in &tex.targets {
        if uv.len() % 2 != 0 {
            return Err(CgtError::TextureClippingFailed {
                target: target.0.clone(),
                message: "odd number of texture coordinates".into(),
            });
        }
        match clip_one_target(&img, uv, opts) {
            Some((cropped, new_uv)) => {
                let n = counter.next();
                let ext = output_ext(is_tiff, is_transparent_png, opts.force_jpeg);
                let dest = bucket_path(opts, out_dir, n, ext);
                save_image(&cropped, &dest, ext, opts.jpeg_quality)?;
                out.push(single_target_surface_data(
                    target,
                    new_uv,
                    dest.strip_prefix(out_dir).unwrap_or(&dest).to_string_lossy().replace('\\', "/"),
                ));
                stats.targets_clipped += 1;
            }
            None => {
                // Unclippable target (fills the unit square, or a zero-sized crop):
                // keep it pointed at a verbatim copy of the source image.
                let surface = verbatim_copy_single(target, uv, source_dir, out_dir, &tex.image_uri, opts, counter)?;
                out.push(surface);
                stats.targets_copied_verbatim += 1;
            }
        }
    }
    Ok((out, stats))
}

fn single_target_surface_data(target: &Target, uv: Vec<Uv>, image_uri: String) -> SurfaceData {
    SurfaceData::ParameterizedTexture(ParameterizedTexture {
        id: format!("TEX_{}", uuid::Uuid::new_v4()),
        image_uri,
        targets: vec![(target.clone(), uv)],
    })
}

fn verbatim_copy(
    tex: &ParameterizedTexture,
    source_dir: &Path,
    out_dir: &Path,
    opts: &TextureClipOptions,
    counter: &mut Counter,
) -> Result<SurfaceData> {
    let source = source_dir.join(&tex.image_uri);
    let (_, image_uri) = copy_verbatim_to_bucket(&source, out_dir, opts, counter)?;
    Ok(SurfaceData::ParameterizedTexture(ParameterizedTexture {
        id: format!("TEX_{}", uuid::Uuid::new_v4()),
        image_uri,
        targets: tex.targets.clone(),
    }))
}

fn verbatim_copy_single(
    target: &Target,
    uv: &[Uv],
    source_dir: &Path,
    out_dir: &Path,
    image_uri: &str,
    opts: &TextureClipOptions,
    counter: &mut Counter,
) -> Result<SurfaceData> {
    let source = source_dir.join(image_uri);
    let (_, new_uri) = copy_verbatim_to_bucket(&source, out_dir, opts, counter)?;
    Ok(single_target_surface_data(target, uv.to_vec(), new_uri))
}

/// Copies `source` verbatim into the next bucketed slot, returning the destination
/// path and its `out_dir`-relative URI for the rewritten `imageURI`.
fn copy_verbatim_to_bucket(
    source: &Path,
    out_dir: &Path,
    opts: &TextureClipOptions,
    counter: &mut Counter,
) -> Result<(PathBuf, String)> {
    let ext = source.extension().and_then(|e| e.to_str()).unwrap_or("jpg").to_string();
    let n = counter.next();
    let dest = bucket_path(opts, out_dir, n, &ext);
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CgtError::io(parent, e))?;
    }
    std::fs::copy(source, &dest).map_err(|e| CgtError::io(source, e))?;
    let uri = dest.strip_prefix(out_dir).unwrap_or(&dest).to_string_lossy().replace('\\', "/");
    Ok((dest, uri))
}

/// Computes the UV bounding box, converts it to pixel space, crops, and rewrites the
/// UVs against the crop. Returns `None` when the box can't be clipped (fills the unit
/// square, or rounds to a zero-sized region).
fn clip_one_target(img: &DynamicImage, uv: &[Uv], opts: &TextureClipOptions) -> Option<(DynamicImage, Vec<Uv>)> {
    let mut s_min = f64::INFINITY;
    let mut s_max = f64::NEG_INFINITY;
    let mut t_min = f64::INFINITY;
    let mut t_max = f64::NEG_INFINITY;
    for &(s, t) in uv {
        let (mut s, mut t) = (round_to(s, opts.precision), round_to(t, opts.precision));
        if s < 0.0 || s > 1.0 || t < 0.0 || t > 1.0 {
            if opts.clamp_out_of_range {
                s = s.clamp(0.0, 1.0);
                t = t.clamp(0.0, 1.0);
            } else {
                return None;
            }
        }
        s_min = s_min.min(s);
        s_max = s_max.max(s);
        t_min = t_min.min(t);
        t_max = t_max.max(t);
    }

    if s_min <= 0.0 && s_max >= 1.0 && t_min <= 0.0 && t_max >= 1.0 {
        return None;
    }

    let w = img.width() as f64;
    let h = img.height() as f64;
    let x = (s_min * w).round();
    let y = (h * (1.0 - t_max)).round();
    let width = (s_max * w).round() - x;
    let height = (h * (1.0 - t_min)).round() - y;
    if width <= 0.0 || height <= 0.0 {
        return None;
    }

    let cropped = img.crop_imm(x as u32, y as u32, width as u32, height as u32);
    let new_uv = uv
        .iter()
        .map(|&(s, t)| {
            let s_px = s * w;
            let t_px = h * (1.0 - t);
            let s_new = (s_px - x) / width;
            let t_new = 1.0 - (t_px - y) / height;
            (round_to(s_new, opts.precision), round_to(t_new, opts.precision))
        })
        .collect();
    Some((cropped, new_uv))
}

fn output_ext(is_tiff: bool, is_transparent_png: bool, force_jpeg: bool) -> &'static str {
    if is_tiff && !force_jpeg {
        "tif"
    } else if is_transparent_png {
        "png"
    } else {
        "jpg"
    }
}

fn save_image(img: &DynamicImage, dest: &Path, ext: &str, jpeg_quality: f32) -> Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CgtError::io(parent, e))?;
    }
    let format = match ext {
        "tif" => ImageFormat::Tiff,
        "png" => ImageFormat::Png,
        _ => ImageFormat::Jpeg,
    };
    if format == ImageFormat::Jpeg {
        let quality = (jpeg_quality.clamp(0.0, 1.0) * 100.0).round() as u8;
        let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(
            std::fs::File::create(dest).map_err(|e| CgtError::io(dest, e))?,
            quality,
        );
        encoder
            .encode_image(img)
            .map_err(|e| CgtError::TextureClippingFailed {
                target: dest.display().to_string(),
                message: e.to_string(),
            })?;
        return Ok(());
    }
    img.save_with_format(dest, format)
        .map_err(|e| CgtError::TextureClippingFailed {
            target: dest.display().to_string(),
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_opts() -> TextureClipOptions {
        TextureClipOptions {
            precision: 7,
            ..Default::default()
        }
    }

    #[test]
    fn crop_rounds_uv_to_corners_200x200() {
        let img = DynamicImage::new_rgb8(1000, 1000);
        let opts = flat_opts();
        let uv = vec![(0.10, 0.20), (0.30, 0.40)];
        let (cropped, new_uv) = clip_one_target(&img, &uv, &opts).expect("clippable region");
        assert_eq!(cropped.width(), 200);
        assert_eq!(cropped.height(), 200);
        assert!(new_uv.contains(&(0.0, 0.0)));
        assert!(new_uv.contains(&(1.0, 1.0)));
    }

    #[test]
    fn full_unit_square_falls_back_to_verbatim() {
        let img = DynamicImage::new_rgb8(100, 100);
        let opts = flat_opts();
        let uv = vec![(0.0, 0.0), (1.0, 1.0)];
        assert!(clip_one_target(&img, &uv, &opts).is_none());
    }

    #[test]
    fn out_of_range_uv_without_clamp_is_rejected() {
        let img = DynamicImage::new_rgb8(100, 100);
        let opts = flat_opts();
        let uv = vec![(0.1, 0.1), (1.5, 0.5)];
        assert!(clip_one_target(&img, &uv, &opts).is_none());
    }

    #[test]
    fn bucketing_spreads_files_across_n_folders() {
        let opts = TextureClipOptions {
            bucket_count: 2,
            texture_folder: "clipped".into(),
            prefix: "tex".into(),
            ..Default::default()
        };
        let out = PathBuf::from("/out");
        assert_eq!(bucket_path(&opts, &out, 1, "jpg"), out.join("clipped/1/tex1.jpg"));
        assert_eq!(bucket_path(&opts, &out, 2, "jpg"), out.join("clipped/2/tex2.jpg"));
        assert_eq!(bucket_path(&opts, &out, 3, "jpg"), out.join("clipped/1/tex3.jpg"));
    }

    #[test]
    fn default_bucket_count_lands_in_bucket_one() {
        let opts = TextureClipOptions {
            texture_folder: "clipped_textures".into(),
            prefix: "tex".into(),
            ..Default::default()
        };
        let out = PathBuf::from("/out");
        assert_eq!(
            bucket_path(&opts, &out, 1, "jpg"),
            out.join("clipped_textures/1/tex1.jpg")
        );
    }
}
