//! Initial data uploads read back unchanged, on every backend
//!
//! Run the Vulkan variants with: cargo test --test upload_readback_integration_tests -- --include-ignored


use galaxy_3d_gpu::galaxy3d::{
    Backend, BufferDescriptor, BufferUsage, Device, TextureDescriptor, TextureFormat, TextureUsage,
};
use gpu_test_utils::create_device;
use serial_test::serial;

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(7).wrapping_add(seed)).collect()
}

fn buffer_round_trip(device: &Device) {
    let data = pattern(256, 3);
    let buffer = device
        .create_buffer(&BufferDescriptor::new(256, BufferUsage::STORAGE), Some(&data))
        .unwrap();
    assert_eq!(device.read_buffer(&buffer).unwrap(), data);

    // Missing initial data reads back as zeros
    let empty = device.create_buffer(&BufferDescriptor::new(64, BufferUsage::UNIFORM), None).unwrap();
    assert_eq!(device.read_buffer(&empty).unwrap(), vec![0u8; 64]);
}

fn mip_chain_round_trip(device: &Device) {
    let desc = TextureDescriptor::new_2d(8, 8, TextureFormat::R8G8B8A8_UNORM, TextureUsage::SHADER_READ)
        .with_mip_levels(4)
        .with_array_layers(2);
    let data = pattern(desc.data_size(true), 11);
    let texture = device.create_texture(&desc, Some(&data)).unwrap();

    let mut cursor = 0;
    for layer in 0..2 {
        for mip in 0..4 {
            let size = desc.subresource_size(mip);
            let texels = device.read_texture(&texture, mip, layer).unwrap();
            assert_eq!(texels, data[cursor..cursor + size], "mip {} layer {}", mip, layer);
            cursor += size;
        }
    }
}

fn base_level_only_upload(device: &Device) {
    let desc = TextureDescriptor::new_2d(4, 4, TextureFormat::R8_UNORM, TextureUsage::SHADER_READ).with_mip_levels(3);
    let data = pattern(desc.data_size(false), 1);
    let texture = device.create_texture(&desc, Some(&data)).unwrap();

    assert_eq!(device.read_texture(&texture, 0, 0).unwrap(), data);
    // Levels without data start zeroed
    assert_eq!(device.read_texture(&texture, 1, 0).unwrap(), vec![0u8; 4]);
    assert_eq!(device.read_texture(&texture, 2, 0).unwrap(), vec![0u8; 1]);
}

fn depth_stencil_round_trip(device: &Device) {
    let desc = TextureDescriptor::new_2d(4, 2, TextureFormat::D24_UNORM_S8_UINT, TextureUsage::RENDER_TARGET);
    let data: Vec<u8> = (0..8u32)
        .flat_map(|i| ((i * 0x0001_2345) & 0x00FF_FFFF | (i + 1) << 24).to_le_bytes())
        .collect();
    let texture = device.create_texture(&desc, Some(&data)).unwrap();
    assert_eq!(device.read_texture(&texture, 0, 0).unwrap(), data);
}

// ============================================================================
// SOFTWARE
// ============================================================================

#[test]
#[serial]
fn test_software_buffer_round_trip() {
    buffer_round_trip(&create_device(Backend::Software, 16, 16, true));
}

#[test]
#[serial]
fn test_software_mip_chain_round_trip() {
    mip_chain_round_trip(&create_device(Backend::Software, 16, 16, true));
}

#[test]
#[serial]
fn test_software_base_level_only_upload() {
    base_level_only_upload(&create_device(Backend::Software, 16, 16, true));
}

#[test]
#[serial]
fn test_software_depth_stencil_round_trip() {
    depth_stencil_round_trip(&create_device(Backend::Software, 16, 16, true));
}

// ============================================================================
// VULKAN (GPU required)
// ============================================================================

#[cfg(feature = "vulkan")]
#[test]
#[ignore]
#[serial]
fn test_vulkan_buffer_round_trip() {
    buffer_round_trip(&create_device(Backend::Vulkan, 16, 16, true));
}

#[cfg(feature = "vulkan")]
#[test]
#[ignore]
#[serial]
fn test_vulkan_mip_chain_round_trip() {
    mip_chain_round_trip(&create_device(Backend::Vulkan, 16, 16, true));
}

#[cfg(feature = "vulkan")]
#[test]
#[ignore]
#[serial]
fn test_vulkan_base_level_only_upload() {
    base_level_only_upload(&create_device(Backend::Vulkan, 16, 16, true));
}

#[cfg(feature = "vulkan")]
#[test]
#[ignore]
#[serial]
fn test_vulkan_depth_stencil_round_trip() {
    depth_stencil_round_trip(&create_device(Backend::Vulkan, 16, 16, true));
}
