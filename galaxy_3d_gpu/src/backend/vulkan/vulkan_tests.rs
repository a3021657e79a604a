//! Unit tests for the Vulkan helpers that do not need a GPU

use ash::vk;
use rustc_hash::FxHashMap;

use super::debug::{message_category, message_level, severity_flags, track_message};
use super::device::{merge_depth_stencil, split_depth_stencil, RenderPassKey};
use crate::config::DebugSeverity;
use crate::graphics::{LoadAction, StoreAction, TextureFormat};
use crate::validation::MessageLevel;

// ============================================================================
// DEPTH-STENCIL PLANES
// ============================================================================

#[test]
fn test_split_depth_stencil() {
    let packed: Vec<u8> = [0xAB12_3456u32, 0x01FF_FFFF]
        .iter()
        .flat_map(|word| word.to_le_bytes())
        .collect();
    let (depth, stencil) = split_depth_stencil(&packed);
    assert_eq!(depth, [0x56, 0x34, 0x12, 0x00, 0xFF, 0xFF, 0xFF, 0x00]);
    assert_eq!(stencil, [0xAB, 0x01]);
}

#[test]
fn test_merge_depth_stencil_restores_packed_texels() {
    let packed: Vec<u8> = [0x7F00_0001u32, 0x0080_0000, 0xFF12_3456]
        .iter()
        .flat_map(|word| word.to_le_bytes())
        .collect();
    let (depth, stencil) = split_depth_stencil(&packed);
    assert_eq!(merge_depth_stencil(&depth, &stencil), packed);
}

#[test]
fn test_merge_ignores_undefined_depth_high_byte() {
    // Drivers may leave garbage in the top byte of the depth plane.
    let depth = 0xEE00_0010u32.to_le_bytes();
    let merged = merge_depth_stencil(&depth, &[0x02]);
    assert_eq!(merged, 0x0200_0010u32.to_le_bytes());
}

// ============================================================================
// RENDER PASS KEYS
// ============================================================================

#[test]
fn test_compatible_key_ignores_operations() {
    let key = RenderPassKey::compatible(&[TextureFormat::R8G8B8A8_UNORM], Some(TextureFormat::D32_FLOAT), 1);
    assert_eq!(key.colors.len(), 1);
    assert_eq!(key.colors[0].load, LoadAction::DontCare);
    assert_eq!(key.colors[0].store, StoreAction::DontCare);
    let depth = key.depth_stencil.expect("depth attachment");
    assert_eq!(depth.format, TextureFormat::D32_FLOAT);
    assert_eq!(depth.samples, 1);
}

#[test]
fn test_compatible_keys_are_equal_for_same_formats() {
    let a = RenderPassKey::compatible(&[TextureFormat::B8G8R8A8_SRGB], None, 4);
    let b = RenderPassKey::compatible(&[TextureFormat::B8G8R8A8_SRGB], None, 4);
    let c = RenderPassKey::compatible(&[TextureFormat::B8G8R8A8_SRGB], None, 1);
    assert_eq!(a, b);
    assert_ne!(a, c);
}

// ============================================================================
// DEBUG MESSENGER
// ============================================================================

#[test]
fn test_severity_flags() {
    assert_eq!(severity_flags(DebugSeverity::ErrorsOnly), vk::DebugUtilsMessageSeverityFlagsEXT::ERROR);
    let warnings = severity_flags(DebugSeverity::ErrorsAndWarnings);
    assert!(warnings.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING));
    assert!(!warnings.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO));
    assert!(severity_flags(DebugSeverity::All).contains(vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE));
}

#[test]
fn test_message_level() {
    assert_eq!(message_level(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR), MessageLevel::Error);
    assert_eq!(message_level(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING), MessageLevel::Warning);
    assert_eq!(message_level(vk::DebugUtilsMessageSeverityFlagsEXT::INFO), MessageLevel::Info);
    assert_eq!(message_level(vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE), MessageLevel::Verbose);
}

#[test]
fn test_message_category() {
    assert_eq!(message_category(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION), "Validation");
    assert_eq!(message_category(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE), "Performance");
    assert_eq!(message_category(vk::DebugUtilsMessageTypeFlagsEXT::GENERAL), "General");
}

#[test]
fn test_track_message_counts_repeats() {
    let mut counts = FxHashMap::default();
    assert_eq!(track_message(&mut counts, "layout mismatch"), 1);
    assert_eq!(track_message(&mut counts, "layout mismatch"), 2);
    assert_eq!(track_message(&mut counts, "missing barrier"), 1);
    assert_eq!(counts.len(), 2);
}
