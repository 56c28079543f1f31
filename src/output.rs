use std::path::Path;

use rayon::prelude::*;

use crate::error::{DeepcompError, DeepcompResult};
use crate::flatten::FlatRaster;

/// Official sRGB transfer encoding (linear segment below 0.0031308, not the
/// gamma-2.2 approximation).
pub fn linear_to_srgb_u8(x: f32) -> u8 {
    let x = x.clamp(0.0, 1.0);
    let cs = if x <= 0.0031308 {
        12.92 * x
    } else {
        1.055 * x.powf(1.0 / 2.4) - 0.055
    };
    (cs * 255.0).round().clamp(0.0, 255.0) as u8
}

/// Convert a premultiplied linear raster to straight-alpha sRGB bytes.
///
/// Color is un-premultiplied before the transfer curve; alpha stays linear.
pub fn raster_to_srgb8(raster: &FlatRaster) -> Vec<u8> {
    let stride = raster.width as usize * 4;
    let mut out = vec![0u8; raster.width as usize * raster.height as usize * 4];
    out.par_chunks_mut(stride)
        .zip(raster.data.par_chunks(stride))
        .for_each(|(dst, src)| {
            for (px_out, px) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
                let a = px[3];
                let unpremul = |c: f32| if a > 0.0 { c / a } else { 0.0 };
                px_out[0] = linear_to_srgb_u8(unpremul(px[0]));
                px_out[1] = linear_to_srgb_u8(unpremul(px[1]));
                px_out[2] = linear_to_srgb_u8(unpremul(px[2]));
                px_out[3] = (a.clamp(0.0, 1.0) * 255.0).round() as u8;
            }
        });
    out
}

/// Write the raster as an 8-bit sRGB PNG preview.
pub fn write_png(raster: &FlatRaster, path: &Path) -> DeepcompResult<()> {
    ensure_parent_dir(path)?;
    let bytes = raster_to_srgb8(raster);
    image::save_buffer_with_format(
        path,
        &bytes,
        raster.width,
        raster.height,
        image::ColorType::Rgba8,
        image::ImageFormat::Png,
    )
    .map_err(|e| DeepcompError::sink(format!("write png '{}': {e}", path.display())))
}

/// Write the raster as a flat float EXR, keeping linear premultiplied values.
pub fn write_flat_exr(raster: &FlatRaster, path: &Path) -> DeepcompResult<()> {
    ensure_parent_dir(path)?;
    exr::prelude::write_rgba_file(
        path,
        raster.width as usize,
        raster.height as usize,
        |x, y| {
            let px = raster.pixel(x as u32, y as u32);
            (px[0], px[1], px[2], px[3])
        },
    )
    .map_err(|e| DeepcompError::sink(format!("write exr '{}': {e}", path.display())))
}

pub fn ensure_parent_dir(path: &Path) -> DeepcompResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        use anyhow::Context as _;
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn srgb_endpoints_are_exact() {
        assert_eq!(linear_to_srgb_u8(0.0), 0);
        assert_eq!(linear_to_srgb_u8(1.0), 255);
        assert_eq!(linear_to_srgb_u8(-1.0), 0);
        assert_eq!(linear_to_srgb_u8(2.0), 255);
    }

    #[test]
    fn srgb_is_not_plain_gamma() {
        // Linear 0.5 encodes to 188 under the real transfer curve, not 128.
        assert_eq!(linear_to_srgb_u8(0.5), 188);
    }

    #[test]
    fn conversion_unpremultiplies_before_encoding() {
        let mut raster = FlatRaster::new(2, 1);
        // Half-covered white: premultiplied (0.5, 0.5, 0.5, 0.5) should
        // encode as full-brightness color with alpha 128.
        raster.data[0..4].copy_from_slice(&[0.5, 0.5, 0.5, 0.5]);
        // Fully transparent stays zero.
        let bytes = raster_to_srgb8(&raster);
        assert_eq!(&bytes[0..4], &[255, 255, 255, 128]);
        assert_eq!(&bytes[4..8], &[0, 0, 0, 0]);
    }
}
