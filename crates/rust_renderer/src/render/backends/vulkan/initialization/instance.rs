//! Vulkan instance with optional validation and debug messenger

use crate::config::RendererConfig;
use crate::error::{RenderError, RenderResult, VkResultExt};
use crate::platform::PresentationWindow;
use ash::extensions::ext::DebugUtils;
use ash::{vk, Entry};
use std::ffi::{c_char, CStr, CString};

const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";
const ENGINE_NAME: &str = "RustRenderer";

/// Validation messages that are known to be harmless
///
/// The swapchain loader resolves every `VK_KHR_swapchain` entry point through
/// `vkGetDeviceProcAddr`, including the instance-level
/// `vkGetPhysicalDevicePresentRectanglesKHR`, which the layer reports.
const BENIGN_MESSAGE_PATTERNS: &[&str] = &["vkGetDeviceProcAddr(): pName is trying to grab"];

/// Vulkan instance wrapper with RAII cleanup
pub struct Instance {
    entry: Entry,
    instance: ash::Instance,
    debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl Instance {
    /// Create an instance for `window`, with validation if the config asks for it
    ///
    /// Requested layers and extensions are checked against what the loader
    /// reports first; missing names are listed in the error.
    pub fn new(config: &RendererConfig, window: &dyn PresentationWindow) -> RenderResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| RenderError::graphics(format!("failed to load Vulkan: {e}")))?;
        let validation = config.validation_enabled();

        let mut extensions = window.required_instance_extensions()?;
        if validation {
            extensions.push(cstr_to_string(DebugUtils::name()));
        }
        let layers: Vec<String> = if validation {
            vec![VALIDATION_LAYER.to_string()]
        } else {
            Vec::new()
        };

        let available_extensions: Vec<String> = entry
            .enumerate_instance_extension_properties(None)
            .check("vkEnumerateInstanceExtensionProperties")?
            .iter()
            .map(|ext| raw_name(&ext.extension_name))
            .collect();
        let missing = missing_names(&extensions, &available_extensions);
        if !missing.is_empty() {
            return Err(RenderError::graphics(format!(
                "missing instance extensions: {}",
                missing.join(", ")
            )));
        }

        let available_layers: Vec<String> = entry
            .enumerate_instance_layer_properties()
            .check("vkEnumerateInstanceLayerProperties")?
            .iter()
            .map(|layer| raw_name(&layer.layer_name))
            .collect();
        let missing = missing_names(&layers, &available_layers);
        if !missing.is_empty() {
            return Err(RenderError::graphics(format!(
                "missing instance layers: {}",
                missing.join(", ")
            )));
        }

        let app_name = to_cstring(&config.application_name)?;
        let engine_name = to_cstring(ENGINE_NAME)?;
        let (major, minor, patch) = config.application_version;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, major, minor, patch))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_3);

        let extension_names = to_cstrings(&extensions)?;
        let layer_names = to_cstrings(&layers)?;
        let extension_ptrs: Vec<*const c_char> = extension_names.iter().map(|n| n.as_ptr()).collect();
        let layer_ptrs: Vec<*const c_char> = layer_names.iter().map(|n| n.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .check("vkCreateInstance")?;

        let debug = if validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            match setup_debug_messenger(&debug_utils) {
                Ok(messenger) => Some((debug_utils, messenger)),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        log::info!(
            "Vulkan instance created (validation {})",
            if validation { "on" } else { "off" }
        );
        Ok(Self {
            entry,
            instance,
            debug,
        })
    }

    /// Vulkan entry point
    pub const fn entry(&self) -> &Entry {
        &self.entry
    }

    /// Instance function table
    pub const fn handle(&self) -> &ash::Instance {
        &self.instance
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        log::debug!("Vulkan instance destroyed");
    }
}

fn setup_debug_messenger(debug_utils: &DebugUtils) -> RenderResult<vk::DebugUtilsMessengerEXT> {
    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));

    unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
        .check("vkCreateDebugUtilsMessengerEXT")
}

/// Whether a driver message should reach the log
#[must_use]
pub fn should_forward(severity: vk::DebugUtilsMessageSeverityFlagsEXT, message: &str) -> bool {
    severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
        && !BENIGN_MESSAGE_PATTERNS
            .iter()
            .any(|pattern| message.contains(pattern))
}

/// First frame of a rendered backtrace that belongs to this crate
///
/// Frames of the debug callback itself and of the backtrace machinery are
/// skipped. Returns the symbol, followed by its `at file:line` when present.
#[must_use]
pub fn originating_frame(backtrace: &str) -> Option<String> {
    let mut lines = backtrace.lines().map(str::trim).peekable();
    while let Some(line) = lines.next() {
        let Some((index, symbol)) = line.split_once(": ") else {
            continue;
        };
        if index.parse::<usize>().is_err() {
            continue;
        }
        let symbol = symbol.trim();
        let ours = symbol.starts_with("rust_renderer::")
            && !symbol.contains("debug_callback")
            && !symbol.contains("originating_frame");
        if !ours {
            continue;
        }
        return Some(match lines.peek() {
            Some(next) if next.starts_with("at ") => format!("{symbol} ({next})"),
            _ => symbol.to_string(),
        });
    }
    None
}

/// Names from `required` that are absent from `available`, in request order
#[must_use]
pub fn missing_names<'a>(required: &'a [String], available: &[String]) -> Vec<&'a str> {
    required
        .iter()
        .filter(|name| !available.contains(name))
        .map(String::as_str)
        .collect()
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || (*callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();
    if !should_forward(message_severity, &message) {
        return vk::FALSE;
    }

    let trace = std::backtrace::Backtrace::force_capture().to_string();
    let origin = originating_frame(&trace).unwrap_or_else(|| "unknown origin".to_string());

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {:?} - {} [{}]", message_type, message, origin);
    } else {
        log::warn!("[Vulkan] {:?} - {} [{}]", message_type, message, origin);
    }

    vk::FALSE
}

fn raw_name(raw: &[c_char]) -> String {
    unsafe { CStr::from_ptr(raw.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

fn cstr_to_string(name: &CStr) -> String {
    name.to_string_lossy().into_owned()
}

fn to_cstring(name: &str) -> RenderResult<CString> {
    CString::new(name).map_err(|_| RenderError::generic(format!("name contains NUL byte: {name:?}")))
}

fn to_cstrings(names: &[String]) -> RenderResult<Vec<CString>> {
    names.iter().map(|name| to_cstring(name)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filters_below_warning() {
        let info = vk::DebugUtilsMessageSeverityFlagsEXT::INFO;
        let warning = vk::DebugUtilsMessageSeverityFlagsEXT::WARNING;
        let error = vk::DebugUtilsMessageSeverityFlagsEXT::ERROR;

        assert!(!should_forward(info, "Loader message"));
        assert!(should_forward(warning, "Image layout mismatch"));
        assert!(should_forward(error, "Invalid handle"));
    }

    #[test]
    fn test_filters_benign_pattern() {
        let message = "Validation Warning: vkGetDeviceProcAddr(): pName is trying to grab \
                       vkGetPhysicalDevicePresentRectanglesKHR which is an instance level function";
        assert!(!should_forward(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING, message));
    }

    #[test]
    fn test_originating_frame_skips_callback() {
        let trace = "   0: std::backtrace::Backtrace::force_capture\n\
                     \x20            at /rustc/library/std/src/backtrace.rs:312:9\n\
                     \x20  1: rust_renderer::render::backends::vulkan::initialization::instance::debug_callback\n\
                     \x20            at ./src/render/backends/vulkan/initialization/instance.rs:210:17\n\
                     \x20  2: libVkLayer_khronos_validation.so\n\
                     \x20  3: rust_renderer::render::backends::vulkan::resources::image::AllocatedImage::new\n\
                     \x20            at ./src/render/backends/vulkan/resources/image.rs:88:9\n";
        let origin = originating_frame(trace).unwrap();
        assert!(origin.starts_with("rust_renderer::render::backends::vulkan::resources::image"));
        assert!(origin.contains("image.rs:88:9"));
    }

    #[test]
    fn test_originating_frame_none_without_crate_frames() {
        assert_eq!(originating_frame("   0: main\n   1: __libc_start_main\n"), None);
    }

    #[test]
    fn test_missing_names_in_request_order() {
        let required = vec![
            "VK_KHR_surface".to_string(),
            "VK_EXT_debug_utils".to_string(),
            "VK_KHR_xcb_surface".to_string(),
        ];
        let available = vec!["VK_KHR_surface".to_string()];
        assert_eq!(
            missing_names(&required, &available),
            vec!["VK_EXT_debug_utils", "VK_KHR_xcb_surface"]
        );
        assert!(missing_names(&required, &required).is_empty());
    }
}
