//! Unit tests for format.rs

use crate::graphics::format::*;

#[test]
fn test_texture_format_sizes() {
    assert_eq!(TextureFormat::R8_UNORM.bytes_per_pixel(), 1);
    assert_eq!(TextureFormat::R8G8B8A8_UNORM.bytes_per_pixel(), 4);
    assert_eq!(TextureFormat::R16G16B16A16_SFLOAT.bytes_per_pixel(), 8);
    assert_eq!(TextureFormat::R32G32B32A32_SFLOAT.bytes_per_pixel(), 16);
    assert_eq!(TextureFormat::D16_UNORM.bytes_per_pixel(), 2);
    assert_eq!(TextureFormat::D24_UNORM_S8_UINT.bytes_per_pixel(), 4);
}

#[test]
fn test_depth_classification() {
    assert!(TextureFormat::D32_FLOAT.is_depth());
    assert!(!TextureFormat::D32_FLOAT.has_stencil());
    assert!(TextureFormat::D24_UNORM_S8_UINT.has_stencil());
    assert!(!TextureFormat::R32_SFLOAT.is_depth());
    assert_eq!(TextureFormat::D16_UNORM.channel_count(), 0);
}

#[test]
fn test_srgb_and_bgra() {
    assert!(TextureFormat::B8G8R8A8_SRGB.is_srgb());
    assert!(TextureFormat::B8G8R8A8_SRGB.is_bgra());
    assert!(!TextureFormat::R8G8B8A8_UNORM.is_srgb());
    assert!(!TextureFormat::R8G8B8A8_SRGB.is_bgra());
}

#[test]
fn test_vertex_format_sizes() {
    assert_eq!(VertexFormat::Float.size_bytes(), 4);
    assert_eq!(VertexFormat::Float2.size_bytes(), 8);
    assert_eq!(VertexFormat::Float3.size_bytes(), 12);
    assert_eq!(VertexFormat::Float4.size_bytes(), 16);
    assert_eq!(VertexFormat::UByte4N.size_bytes(), 4);
    assert_eq!(VertexFormat::Short2N.size_bytes(), 4);
    assert_eq!(VertexFormat::Short4.size_bytes(), 8);
}

#[test]
fn test_vertex_element_constructors() {
    assert_eq!(VertexElement::new(VertexFormat::Float3).offset, 0);
    assert_eq!(VertexElement::with_offset(VertexFormat::Float2, 12).offset, 12);
}
