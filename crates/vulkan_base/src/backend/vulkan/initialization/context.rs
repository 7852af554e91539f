//! Vulkan device context management
//!
//! Owns the instance, the selected physical adapter, the logical device and
//! its single graphics queue. Everything else in the crate borrows from here,
//! so the context is created first and dropped last.
//!
//! Adapter policy: the first enumerated physical device is used as-is. The
//! first queue family reporting graphics support provides the device queue.
//! All instance extensions, device extensions and supported core features are
//! enabled.

use ash::extensions::ext::DebugUtils;
use ash::{vk, Device, Entry, Instance};
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use thiserror::Error;

use super::debug::{DebugMessenger, DiagnosticSink};
use crate::backend::vulkan::resources::memory::find_memory_type_index;
use crate::config::ConfigError;
use crate::core::config::BaseAppConfig;

const VALIDATION_LAYER: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"VK_LAYER_KHRONOS_validation\0") };
const ENGINE_NAME: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"VulkanBase\0") };

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// A driver call was rejected
    #[error("{operation} failed: {result:?}")]
    Api {
        /// Name of the Vulkan entry point that failed
        operation: &'static str,
        /// Result code returned by the driver
        result: vk::Result,
    },

    /// The Vulkan loader library could not be loaded
    #[error("Failed to load Vulkan: {0}")]
    Loading(String),

    /// No physical device was enumerated
    #[error("No Vulkan physical device available")]
    NoPhysicalDevice,

    /// The adapter exposes no queue family with graphics support
    #[error("No graphics-capable queue family found")]
    NoGraphicsQueue,

    /// No memory type satisfies the request
    #[error("No suitable memory type found (type bits {type_bits:#b}, required {required:?})")]
    NoSuitableMemoryType {
        /// Candidate memory type bits from the resource requirements
        type_bits: u32,
        /// Property flags that were required
        required: vk::MemoryPropertyFlags,
    },

    /// The graphics queue family cannot present to the surface
    #[error("Queue family {queue_family} cannot present to the surface")]
    PresentationUnsupported {
        /// Queue family that was checked
        queue_family: u32,
    },

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// A swap image handle from an earlier provisioning was used
    #[error("Stale swap image handle (generation {handle_generation}, current {current_generation})")]
    StaleSwapImage {
        /// Generation the handle was issued under
        handle_generation: u64,
        /// Generation of the live image set
        current_generation: u64,
    },

    /// The windowing collaborator failed to provide a surface
    #[error("Surface creation failed: {0}")]
    Surface(String),

    /// The configuration was rejected before any driver call
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl VulkanError {
    /// Build a `map_err` adapter naming the failed entry point
    pub fn api(operation: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| Self::Api { operation, result }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidOperation { reason: reason.into() }
    }
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

/// Something a presentation surface can be created for.
///
/// Implemented by the window collaborator; the device context only needs the
/// instance extensions it requires and a way to create the surface.
pub trait SurfaceTarget {
    /// Instance extensions that must be enabled for [`Self::create_surface`]
    fn required_instance_extensions(&self) -> VulkanResult<Vec<String>>;

    /// Create a surface for this target on the given instance
    fn create_surface(&mut self, entry: &Entry, instance: &Instance) -> VulkanResult<vk::SurfaceKHR>;

    /// Current drawable size in pixels
    fn framebuffer_size(&self) -> (u32, u32);
}

/// Vulkan instance wrapper with RAII cleanup
pub struct VulkanInstance {
    /// Vulkan entry point
    pub entry: Entry,
    /// Vulkan instance handle
    pub instance: Instance,
    debug_messenger: Option<DebugMessenger>,
}

impl VulkanInstance {
    /// Create an instance enabling every available instance extension.
    ///
    /// `required_extensions` must be a subset of what the loader reports.
    pub fn new(
        config: &BaseAppConfig,
        required_extensions: &[String],
        sink: Box<dyn DiagnosticSink>,
    ) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }.map_err(|e| VulkanError::Loading(e.to_string()))?;

        let available = entry
            .enumerate_instance_extension_properties(None)
            .map_err(VulkanError::api("vkEnumerateInstanceExtensionProperties"))?;
        let available_names: Vec<&CStr> = available
            .iter()
            .map(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) })
            .collect();

        let missing = missing_extensions(&available_names, required_extensions);
        if !missing.is_empty() {
            return Err(VulkanError::Surface(format!(
                "required instance extensions not available: {}",
                missing.join(", ")
            )));
        }

        let extension_ptrs: Vec<*const c_char> = available_names.iter().map(|name| name.as_ptr()).collect();

        let validation = config.renderer.validation_enabled() && has_validation_layer(&entry)?;
        let layer_ptrs: Vec<*const c_char> = if validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::new()
        };

        let app_name = CString::new(config.renderer.application_name.as_str())
            .map_err(|_| VulkanError::invalid("application name contains a NUL byte"))?;
        let (major, minor, patch) = config.renderer.application_version;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, major, minor, patch))
            .engine_name(ENGINE_NAME)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_1);

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .map_err(VulkanError::api("vkCreateInstance"))?;

        log::info!(
            "Vulkan instance created ({} extensions, validation {})",
            extension_ptrs.len(),
            if validation { "on" } else { "off" }
        );

        let debug_utils_available = available_names.iter().any(|name| *name == DebugUtils::name());
        let debug_messenger = if cfg!(debug_assertions) && validation && debug_utils_available {
            match DebugMessenger::new(&entry, &instance, &config.diagnostics, sink) {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        Ok(Self {
            entry,
            instance,
            debug_messenger,
        })
    }

    /// Whether driver diagnostics are being forwarded
    pub fn diagnostics_installed(&self) -> bool {
        self.debug_messenger.is_some()
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        // The messenger must go before the instance it was created from
        self.debug_messenger = None;
        unsafe {
            self.instance.destroy_instance(None);
        }
    }
}

fn has_validation_layer(entry: &Entry) -> VulkanResult<bool> {
    let layers = entry
        .enumerate_instance_layer_properties()
        .map_err(VulkanError::api("vkEnumerateInstanceLayerProperties"))?;
    let found = layers
        .iter()
        .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == VALIDATION_LAYER);
    if !found {
        log::warn!("Validation requested but VK_LAYER_KHRONOS_validation is not installed");
    }
    Ok(found)
}

/// Names in `required` that do not appear in `available`
pub fn missing_extensions(available: &[&CStr], required: &[String]) -> Vec<String> {
    required
        .iter()
        .filter(|req| !available.iter().any(|name| name.to_bytes() == req.as_bytes()))
        .cloned()
        .collect()
}

/// Index of the first queue family supporting graphics operations
pub fn select_graphics_queue_family(families: &[vk::QueueFamilyProperties]) -> Option<u32> {
    families
        .iter()
        .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .map(|index| index as u32)
}

/// Physical device selection and capabilities
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Supported device features
    pub features: vk::PhysicalDeviceFeatures,
    /// Memory heaps and types, in adapter preference order
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Index of the graphics queue family
    pub graphics_family: u32,
}

impl PhysicalDeviceInfo {
    /// Take the first enumerated adapter and locate its graphics queue family
    pub fn select_first(instance: &Instance) -> VulkanResult<Self> {
        let devices = unsafe { instance.enumerate_physical_devices() }
            .map_err(VulkanError::api("vkEnumeratePhysicalDevices"))?;
        let device = *devices.first().ok_or(VulkanError::NoPhysicalDevice)?;

        let properties = unsafe { instance.get_physical_device_properties(device) };
        let features = unsafe { instance.get_physical_device_features(device) };
        let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };
        let queue_families = unsafe { instance.get_physical_device_queue_family_properties(device) };

        let graphics_family = select_graphics_queue_family(&queue_families).ok_or(VulkanError::NoGraphicsQueue)?;

        log::info!(
            "Selected GPU: {} (graphics queue family {})",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy(),
            graphics_family
        );

        Ok(Self {
            device,
            properties,
            features,
            memory_properties,
            graphics_family,
        })
    }

    /// Memory type index for a resource, escalating "not found" to an error
    pub fn memory_type_index(&self, type_bits: u32, required: vk::MemoryPropertyFlags) -> VulkanResult<u32> {
        find_memory_type_index(&self.memory_properties, type_bits, required)
            .ok_or(VulkanError::NoSuitableMemoryType { type_bits, required })
    }
}

/// Logical device wrapper with RAII cleanup
pub struct LogicalDevice {
    /// Vulkan logical device handle
    pub device: Device,
    /// Graphics operations queue
    pub graphics_queue: vk::Queue,
    /// Index of the graphics queue family
    pub graphics_family: u32,
}

impl LogicalDevice {
    /// Create the logical device with one graphics queue, every device
    /// extension and every supported core feature enabled
    pub fn new(instance: &Instance, physical_device_info: &PhysicalDeviceInfo) -> VulkanResult<Self> {
        let priorities = [1.0_f32];
        let queue_infos = [vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(physical_device_info.graphics_family)
            .queue_priorities(&priorities)
            .build()];

        let extensions = unsafe { instance.enumerate_device_extension_properties(physical_device_info.device) }
            .map_err(VulkanError::api("vkEnumerateDeviceExtensionProperties"))?;
        let extension_ptrs: Vec<*const c_char> = extensions.iter().map(|ext| ext.extension_name.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extension_ptrs)
            .enabled_features(&physical_device_info.features);

        let device = unsafe { instance.create_device(physical_device_info.device, &create_info, None) }
            .map_err(VulkanError::api("vkCreateDevice"))?;

        let graphics_queue = unsafe { device.get_device_queue(physical_device_info.graphics_family, 0) };

        log::info!("Logical device created with {} device extensions", extension_ptrs.len());

        Ok(Self {
            device,
            graphics_queue,
            graphics_family: physical_device_info.graphics_family,
        })
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
    }
}

/// Main Vulkan context that owns all core Vulkan objects
pub struct DeviceContext {
    /// Selected physical device information
    pub physical_device: PhysicalDeviceInfo,
    /// Logical device for operations
    pub device: LogicalDevice,
    /// Vulkan instance and debug messenger
    pub instance: VulkanInstance,
}

impl DeviceContext {
    /// Create a context able to present to `target`
    pub fn new(
        target: &impl SurfaceTarget,
        config: &BaseAppConfig,
        sink: Box<dyn DiagnosticSink>,
    ) -> VulkanResult<Self> {
        let required = target.required_instance_extensions()?;
        Self::with_extensions(config, &required, sink)
    }

    /// Create a context without any presentation target
    pub fn new_headless(config: &BaseAppConfig, sink: Box<dyn DiagnosticSink>) -> VulkanResult<Self> {
        Self::with_extensions(config, &[], sink)
    }

    fn with_extensions(
        config: &BaseAppConfig,
        required_extensions: &[String],
        sink: Box<dyn DiagnosticSink>,
    ) -> VulkanResult<Self> {
        let instance = VulkanInstance::new(config, required_extensions, sink)?;
        let physical_device = PhysicalDeviceInfo::select_first(&instance.instance)?;
        let device = LogicalDevice::new(&instance.instance, &physical_device)?;

        Ok(Self {
            physical_device,
            device,
            instance,
        })
    }

    /// Get a reference to the Vulkan entry
    pub fn entry(&self) -> &Entry {
        &self.instance.entry
    }

    /// Get a reference to the Vulkan instance
    pub fn instance(&self) -> &Instance {
        &self.instance.instance
    }

    /// Get the physical device info
    pub fn physical_device(&self) -> &PhysicalDeviceInfo {
        &self.physical_device
    }

    /// Get the raw Device handle
    pub fn raw_device(&self) -> Device {
        self.device.device.clone()
    }

    /// Borrow the raw Device
    pub fn device(&self) -> &Device {
        &self.device.device
    }

    /// Get the graphics queue
    pub fn graphics_queue(&self) -> vk::Queue {
        self.device.graphics_queue
    }

    /// Get the graphics queue family index
    pub fn graphics_queue_family(&self) -> u32 {
        self.device.graphics_family
    }

    /// Memory heap/type table of the adapter
    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.physical_device.memory_properties
    }

    /// Block until every queued GPU operation has finished
    pub fn wait_idle(&self) -> VulkanResult<()> {
        unsafe { self.device.device.device_wait_idle() }.map_err(VulkanError::api("vkDeviceWaitIdle"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_first_graphics_family_wins() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS),
        ];
        assert_eq!(select_graphics_queue_family(&families), Some(1));
    }

    #[test]
    fn test_no_graphics_family() {
        let families = [family(vk::QueueFlags::COMPUTE), family(vk::QueueFlags::TRANSFER)];
        assert_eq!(select_graphics_queue_family(&families), None);
        assert_eq!(select_graphics_queue_family(&[]), None);
    }

    #[test]
    fn test_missing_extensions() {
        let surface = CStr::from_bytes_with_nul(b"VK_KHR_surface\0").unwrap();
        let xcb = CStr::from_bytes_with_nul(b"VK_KHR_xcb_surface\0").unwrap();
        let available = [surface, xcb];

        let required = vec!["VK_KHR_surface".to_string(), "VK_KHR_win32_surface".to_string()];
        assert_eq!(missing_extensions(&available, &required), vec!["VK_KHR_win32_surface".to_string()]);
        assert!(missing_extensions(&available, &["VK_KHR_xcb_surface".to_string()]).is_empty());
    }

    #[test]
    fn test_api_error_names_operation() {
        let err = VulkanError::api("vkCreateBuffer")(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        let message = err.to_string();
        assert!(message.contains("vkCreateBuffer"));
        assert!(message.contains("ERROR_OUT_OF_DEVICE_MEMORY"));
    }
}
