//! Texel encoding of clear values

use glam::Vec4;

use crate::graphics::TextureFormat;

fn unorm8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Linear to sRGB transfer function
pub(crate) fn linear_to_srgb(value: f32) -> f32 {
    let v = value.clamp(0.0, 1.0);
    if v <= 0.003_130_8 {
        v * 12.92
    } else {
        1.055 * v.powf(1.0 / 2.4) - 0.055
    }
}

/// IEEE 754 binary16, round to nearest even
pub(crate) fn f32_to_f16(value: f32) -> u16 {
    let bits = value.to_bits();
    let sign = ((bits >> 16) & 0x8000) as u16;
    let exponent = ((bits >> 23) & 0xFF) as i32;
    let mantissa = bits & 0x007F_FFFF;

    if exponent == 0xFF {
        // Inf / NaN
        let nan = if mantissa != 0 { 0x0200 } else { 0 };
        return sign | 0x7C00 | nan;
    }
    let half_exponent = exponent - 127 + 15;
    if half_exponent >= 0x1F {
        return sign | 0x7C00;
    }
    if half_exponent <= 0 {
        if half_exponent < -10 {
            return sign;
        }
        let full = mantissa | 0x0080_0000;
        let shift = (14 - half_exponent) as u32;
        let mut half = full >> shift;
        let remainder = full & ((1 << shift) - 1);
        let halfway = 1 << (shift - 1);
        if remainder > halfway || (remainder == halfway && (half & 1) != 0) {
            half += 1;
        }
        return sign | half as u16;
    }
    let mut half = ((half_exponent as u32) << 10) | (mantissa >> 13);
    let remainder = mantissa & 0x1FFF;
    if remainder > 0x1000 || (remainder == 0x1000 && (half & 1) != 0) {
        half += 1;
    }
    sign | half as u16
}

/// One texel of `format` holding `color`
///
/// Depth formats encode `color.x` as depth with a zero stencil.
pub(crate) fn encode_color(format: TextureFormat, color: Vec4) -> Vec<u8> {
    let srgb = |c: f32| if format.is_srgb() { linear_to_srgb(c) } else { c };
    match format {
        TextureFormat::R8_UNORM => vec![unorm8(color.x)],
        TextureFormat::R8G8_UNORM => vec![unorm8(color.x), unorm8(color.y)],
        TextureFormat::R8G8B8A8_UNORM | TextureFormat::R8G8B8A8_SRGB => vec![
            unorm8(srgb(color.x)),
            unorm8(srgb(color.y)),
            unorm8(srgb(color.z)),
            unorm8(color.w),
        ],
        TextureFormat::B8G8R8A8_UNORM | TextureFormat::B8G8R8A8_SRGB => vec![
            unorm8(srgb(color.z)),
            unorm8(srgb(color.y)),
            unorm8(srgb(color.x)),
            unorm8(color.w),
        ],
        TextureFormat::R16G16B16A16_SFLOAT => color
            .to_array()
            .iter()
            .flat_map(|c| f32_to_f16(*c).to_le_bytes())
            .collect(),
        TextureFormat::R32_SFLOAT => color.x.to_le_bytes().to_vec(),
        TextureFormat::R32G32B32A32_SFLOAT => color.to_array().iter().flat_map(|c| c.to_le_bytes()).collect(),
        TextureFormat::D16_UNORM | TextureFormat::D32_FLOAT | TextureFormat::D24_UNORM_S8_UINT => {
            encode_depth_stencil(format, color.x, 0)
        }
    }
}

/// One texel of a depth format
pub(crate) fn encode_depth_stencil(format: TextureFormat, depth: f32, stencil: u8) -> Vec<u8> {
    let depth = depth.clamp(0.0, 1.0);
    match format {
        TextureFormat::D16_UNORM => ((depth * 65535.0).round() as u16).to_le_bytes().to_vec(),
        TextureFormat::D32_FLOAT => depth.to_le_bytes().to_vec(),
        TextureFormat::D24_UNORM_S8_UINT => {
            let d24 = (depth * 16_777_215.0).round() as u32;
            (d24 | (stencil as u32) << 24).to_le_bytes().to_vec()
        }
        other => encode_color(other, Vec4::splat(depth)),
    }
}

/// Fill `target` with repetitions of `texel`
pub(crate) fn fill(target: &mut [u8], texel: &[u8]) {
    if texel.is_empty() {
        return;
    }
    for chunk in target.chunks_exact_mut(texel.len()) {
        chunk.copy_from_slice(texel);
    }
}
