//! Validation-layer messages routed into the engine logger
//!
//! Errors reported by the layer go through the validation hook like any
//! usage-contract violation. Lower severities are logged and counted.
//! Identical messages are grouped: repeats carry a `[xN]` suffix.

use std::ffi::{c_void, CStr};
use std::sync::Mutex;

use ash::vk;
use rustc_hash::FxHashMap;

use crate::config::DebugSeverity;
use crate::validation::{notify_validation_error, record_message, MessageLevel};
use crate::{engine_debug, engine_trace, engine_warn};

pub(crate) const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Occurrences per message text
static MESSAGE_COUNTS: Mutex<Option<FxHashMap<String, u32>>> = Mutex::new(None);

pub(crate) fn severity_flags(severity: DebugSeverity) -> vk::DebugUtilsMessageSeverityFlagsEXT {
    match severity {
        DebugSeverity::ErrorsOnly => vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        DebugSeverity::ErrorsAndWarnings => {
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
        }
        DebugSeverity::All => {
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
        }
    }
}

pub(crate) fn message_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> MessageLevel {
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        MessageLevel::Error
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        MessageLevel::Warning
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        MessageLevel::Info
    } else {
        MessageLevel::Verbose
    }
}

pub(crate) fn message_category(message_type: vk::DebugUtilsMessageTypeFlagsEXT) -> &'static str {
    if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
        "Validation"
    } else if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
        "Performance"
    } else {
        "General"
    }
}

/// Count one more occurrence of `message`; returns the new count
pub(crate) fn track_message(counts: &mut FxHashMap<String, u32>, message: &str) -> u32 {
    let count = counts.entry(message.to_string()).or_insert(0);
    *count += 1;
    *count
}

/// Forget grouped messages (called when a messenger is created)
pub(crate) fn reset_message_tracking() {
    if let Ok(mut counts) = MESSAGE_COUNTS.lock() {
        *counts = Some(FxHashMap::default());
    }
}

pub(crate) fn messenger_create_info(severity: DebugSeverity) -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(severity_flags(severity))
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(vulkan_debug_callback))
}

unsafe fn c_str_or<'a>(ptr: *const std::ffi::c_char, fallback: &'a str) -> std::borrow::Cow<'a, str> {
    if ptr.is_null() {
        std::borrow::Cow::Borrowed(fallback)
    } else {
        CStr::from_ptr(ptr).to_string_lossy()
    }
}

/// Debug-utils messenger callback
unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() {
        return vk::FALSE;
    }
    let callback_data = &*p_callback_data;
    let message_id = c_str_or(callback_data.p_message_id_name, "Unknown");
    let message = c_str_or(callback_data.p_message, "No message");
    let category = message_category(message_type);

    let occurrences = MESSAGE_COUNTS
        .lock()
        .ok()
        .map(|mut counts| track_message(counts.get_or_insert_with(FxHashMap::default), &message))
        .unwrap_or(1);
    let repeat = if occurrences > 1 { format!(" [x{}]", occurrences) } else { String::new() };

    match message_level(message_severity) {
        MessageLevel::Error => {
            notify_validation_error(&format!("[Vulkan {}]{} {}: {}", category, repeat, message_id, message));
        }
        level => {
            record_message(level);
            match level {
                MessageLevel::Warning => {
                    engine_warn!("galaxy3d::vulkan", "[{}]{} {}: {}", category, repeat, message_id, message)
                }
                MessageLevel::Info => {
                    engine_debug!("galaxy3d::vulkan", "[{}]{} {}: {}", category, repeat, message_id, message)
                }
                _ => engine_trace!("galaxy3d::vulkan", "[{}]{} {}: {}", category, repeat, message_id, message),
            }
        }
    }

    // Never abort the Vulkan call that triggered the message.
    vk::FALSE
}
