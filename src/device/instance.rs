//! Instance creation, validation layers, the debug messenger, and
//! physical device selection. Surface/window integration is left to the
//! caller, which owns the windowing collaborator.

use ash::vk;
use std::ffi::{CStr, CString};

use crate::config::CoreConfig;
use crate::error::{VulkanError, VulkanResult};
use crate::logging::{debug, error, info, warn};

/// Owns the `ash::Entry` and `ash::Instance`, plus the debug messenger if
/// one was requested.
pub struct Instance {
    entry: ash::Entry,
    instance: ash::Instance,
    debug_utils: Option<ash::extensions::ext::DebugUtils>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl Instance {
    /// Creates an instance with the validation layers and instance
    /// extensions named in `config`, on top of whatever `extra_extensions`
    /// a windowing collaborator requires (e.g. `VK_KHR_surface` and its
    /// platform sibling). Installs a debug messenger if
    /// `config.debug_messenger` is set.
    pub fn new(app_name: &str, config: &CoreConfig, extra_extensions: &[&str]) -> VulkanResult<Self> {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| VulkanError::InitializationFailed(format!("failed to load Vulkan: {e}")))?;

        let app_name_cstr = CString::new(app_name).unwrap_or_default();
        let engine_name_cstr = CString::new("vk_core").unwrap();
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name_cstr)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_2);

        let mut extension_names: Vec<CString> =
            extra_extensions.iter().chain(config.instance_extensions.iter().map(String::as_str)).map(|s| CString::new(s).unwrap()).collect();
        if config.debug_messenger {
            extension_names.push(CString::new(ash::extensions::ext::DebugUtils::name().to_bytes()).unwrap());
        }
        extension_names.dedup_by(|a, b| a == b);
        let extension_ptrs: Vec<*const i8> = extension_names.iter().map(|s| s.as_ptr()).collect();

        let layer_names: Vec<CString> = config.validation_layers.iter().map(|s| CString::new(s.as_str()).unwrap()).collect();
        let layer_ptrs: Vec<*const i8> = layer_names.iter().map(|s| s.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs);
        let instance = unsafe { entry.create_instance(&create_info, None) }?;

        let (debug_utils, debug_messenger) = if config.debug_messenger {
            let debug_utils = ash::extensions::ext::DebugUtils::new(&entry, &instance);
            let messenger_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
                .message_severity(
                    vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
                )
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                )
                .pfn_user_callback(Some(debug_callback));
            let messenger = unsafe { debug_utils.create_debug_utils_messenger(&messenger_info, None) }?;
            (Some(debug_utils), Some(messenger))
        } else {
            (None, None)
        };

        info!("instance created ({} layer(s), {} extension(s))", layer_names.len(), extension_names.len());
        Ok(Self {
            entry,
            instance,
            debug_utils,
            debug_messenger,
        })
    }

    /// The raw `ash::Entry`.
    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    /// The raw `ash::Instance`.
    pub fn raw(&self) -> &ash::Instance {
        &self.instance
    }

    /// Clones the `ash::Instance` handle, e.g. to hand to
    /// [`crate::device::Device::new`].
    pub fn clone_handle(&self) -> ash::Instance {
        self.instance.clone()
    }

    /// Enumerates physical devices and picks one: `config.device_index` if
    /// set, else the first discrete GPU, else the first device of any
    /// kind.
    pub fn select_physical_device(&self, config: &CoreConfig) -> VulkanResult<vk::PhysicalDevice> {
        let devices = unsafe { self.instance.enumerate_physical_devices() }?;
        if devices.is_empty() {
            return Err(VulkanError::InitializationFailed("no physical devices found".to_string()));
        }

        if let Some(index) = config.device_index {
            return devices.get(index).copied().ok_or_else(|| {
                VulkanError::InitializationFailed(format!("device index {index} out of range ({} devices)", devices.len()))
            });
        }

        let discrete = devices.iter().find(|&&d| {
            let props = unsafe { self.instance.get_physical_device_properties(d) };
            props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU
        });
        let chosen = *discrete.unwrap_or(&devices[0]);
        let props = unsafe { self.instance.get_physical_device_properties(chosen) };
        let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) }.to_string_lossy();
        info!("selected physical device: {name}");
        Ok(chosen)
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let (Some(debug_utils), Some(messenger)) = (&self.debug_utils, self.debug_messenger) {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let data = *callback_data;
    let message = CStr::from_ptr(data.p_message).to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!("[{message_type:?}] {message}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!("[{message_type:?}] {message}");
    } else {
        debug!("[{message_type:?}] {message}");
    }
    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_index_out_of_range_is_reported_by_name_not_index() {
        let err = VulkanError::InitializationFailed("device index 9 out of range (1 devices)".to_string());
        assert!(err.to_string().contains("out of range"));
    }
}
