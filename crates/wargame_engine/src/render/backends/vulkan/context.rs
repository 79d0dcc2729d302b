//! Vulkan instance, surface and device
//!
//! Ownership runs one way: the device keeps the instance alive, every other wrapper keeps the
//! device alive through an `Rc<VulkanDevice>`. Objects are destroyed by whoever drops the last
//! reference, so a texture outliving the backend still releases into a live device.

use std::collections::HashSet;
use std::ffi::{c_char, CStr, CString};
use std::rc::Rc;

use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::{vk, Device, Entry, Instance};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use super::{VulkanError, VulkanResult};
use crate::core::VulkanRendererConfig;

const ENGINE_NAME: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"Wargame Engine\0") };
const VALIDATION_LAYER: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"VK_LAYER_KHRONOS_validation\0") };

/// Something a Vulkan surface can be created for
///
/// Implemented for raw window handles here and for the GLFW window behind the `glfw` feature.
pub trait SurfaceSource {
    /// Instance extensions the surface needs
    ///
    /// # Errors
    /// `InitializationFailed` when the platform has no Vulkan surface support.
    fn required_extensions(&self) -> VulkanResult<Vec<CString>>;

    /// Create the surface
    ///
    /// # Errors
    /// API errors of the platform surface call.
    fn create_surface(&self, entry: &Entry, instance: &Instance) -> VulkanResult<vk::SurfaceKHR>;

    /// Framebuffer size in pixels
    fn framebuffer_size(&self) -> (u32, u32);
}

/// Raw platform handles of a window, for windowing libraries other than GLFW
#[derive(Debug, Clone, Copy)]
pub struct WindowHandles {
    /// Display connection
    pub display: RawDisplayHandle,
    /// Window
    pub window: RawWindowHandle,
    /// Framebuffer size in pixels
    pub size: (u32, u32),
}

impl SurfaceSource for WindowHandles {
    fn required_extensions(&self) -> VulkanResult<Vec<CString>> {
        let names = ash_window::enumerate_required_extensions(self.display)
            .map_err(|e| VulkanError::InitializationFailed(format!("No surface support for this display: {e:?}")))?;
        Ok(names.iter().map(|&name| unsafe { CStr::from_ptr(name) }.to_owned()).collect())
    }

    fn create_surface(&self, entry: &Entry, instance: &Instance) -> VulkanResult<vk::SurfaceKHR> {
        unsafe { ash_window::create_surface(entry, instance, self.display, self.window, None) }.map_err(VulkanError::Api)
    }

    fn framebuffer_size(&self) -> (u32, u32) {
        self.size
    }
}

/// Vulkan instance with optional validation messenger
pub(crate) struct VulkanInstance {
    pub entry: Entry,
    pub instance: Instance,
    debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanInstance {
    pub(crate) fn new(source: &dyn SurfaceSource, config: &VulkanRendererConfig) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to load Vulkan: {e}")))?;

        let app_name = CString::new(config.application_name.as_str())
            .map_err(|_| VulkanError::InitializationFailed("application name contains a NUL byte".to_string()))?;
        let (major, minor, patch) = config.application_version;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, major, minor, patch))
            .engine_name(ENGINE_NAME)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_1);

        let mut extension_names = source.required_extensions()?;
        let validation = config.validation_enabled() && Self::has_validation_layer(&entry);
        if config.validation_enabled() && !validation {
            log::warn!("Validation requested but {:?} is not installed", VALIDATION_LAYER);
        }
        if validation {
            extension_names.push(DebugUtils::name().to_owned());
        }
        let extensions: Vec<*const c_char> = extension_names.iter().map(|name| name.as_ptr()).collect();
        let layers: Vec<*const c_char> = if validation { vec![VALIDATION_LAYER.as_ptr()] } else { Vec::new() };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);
        let instance = unsafe { entry.create_instance(&create_info, None) }.map_err(VulkanError::Api)?;

        let debug = if validation {
            let utils = DebugUtils::new(&entry, &instance);
            match Self::setup_debug_messenger(&utils) {
                Ok(messenger) => Some((utils, messenger)),
                Err(e) => {
                    log::warn!("Failed to install the validation messenger: {}", e);
                    None
                }
            }
        } else {
            None
        };

        log::info!("Vulkan instance created (validation: {})", debug.is_some());
        Ok(Self { entry, instance, debug })
    }

    fn has_validation_layer(entry: &Entry) -> bool {
        #[allow(unused_unsafe)]
        let layers = unsafe { entry.enumerate_instance_layer_properties() };
        layers.map_or(false, |layers| {
            layers.iter().any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == VALIDATION_LAYER)
        })
    }

    fn setup_debug_messenger(utils: &DebugUtils) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR)
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));
        unsafe { utils.create_debug_utils_messenger(&create_info, None) }.map_err(VulkanError::Api)
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some((utils, messenger)) = self.debug.take() {
                utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Validation messages routed into the `log` facade
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

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {:?} - {}", message_type, message);
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[Vulkan] {:?} - {}", message_type, message);
    } else {
        log::debug!("[Vulkan] {:?} - {}", message_type, message);
    }
    vk::FALSE
}

/// Presentation surface
pub(crate) struct VulkanSurface {
    pub loader: Surface,
    pub surface: vk::SurfaceKHR,
    _instance: Rc<VulkanInstance>,
}

impl VulkanSurface {
    pub(crate) fn new(instance: &Rc<VulkanInstance>, source: &dyn SurfaceSource) -> VulkanResult<Self> {
        let loader = Surface::new(&instance.entry, &instance.instance);
        let surface = source.create_surface(&instance.entry, &instance.instance)?;
        Ok(Self { loader, surface, _instance: Rc::clone(instance) })
    }
}

impl Drop for VulkanSurface {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_surface(self.surface, None) };
    }
}

/// Optional device features the backend uses when present
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct DeviceFeatures {
    pub anisotropy: bool,
    pub compressed_bc: bool,
    pub geometry_shader: bool,
}

/// Selected physical device
struct PhysicalDeviceInfo {
    device: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    features: vk::PhysicalDeviceFeatures,
    graphics_family: u32,
    present_family: u32,
}

impl PhysicalDeviceInfo {
    fn select(instance: &Instance, surface: &VulkanSurface) -> VulkanResult<Self> {
        let devices = unsafe { instance.enumerate_physical_devices() }.map_err(VulkanError::Api)?;
        let selected = devices
            .into_iter()
            .filter_map(|device| Self::evaluate(instance, device, surface).ok())
            .max_by_key(|info| match info.properties.device_type {
                vk::PhysicalDeviceType::DISCRETE_GPU => 3,
                vk::PhysicalDeviceType::INTEGRATED_GPU => 2,
                vk::PhysicalDeviceType::VIRTUAL_GPU => 1,
                _ => 0,
            })
            .ok_or_else(|| VulkanError::InitializationFailed("No suitable GPU found".to_string()))?;

        log::info!("Selected GPU: {}", unsafe { CStr::from_ptr(selected.properties.device_name.as_ptr()) }.to_string_lossy());
        Ok(selected)
    }

    fn evaluate(instance: &Instance, device: vk::PhysicalDevice, surface: &VulkanSurface) -> VulkanResult<Self> {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        if properties.api_version < vk::API_VERSION_1_1 {
            return Err(VulkanError::InitializationFailed("Vulkan 1.1 required".to_string()));
        }
        let features = unsafe { instance.get_physical_device_features(device) };
        let queue_families = unsafe { instance.get_physical_device_queue_family_properties(device) };

        let mut graphics_family = None;
        let mut present_family = None;
        for (index, family) in queue_families.iter().enumerate() {
            let index = index as u32;
            if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) && graphics_family.is_none() {
                graphics_family = Some(index);
            }
            let present_support = unsafe {
                surface.loader.get_physical_device_surface_support(device, index, surface.surface)
            }
            .map_err(VulkanError::Api)?;
            if present_support && present_family.is_none() {
                present_family = Some(index);
            }
            if graphics_family.is_some() && present_family.is_some() {
                break;
            }
        }
        let graphics_family =
            graphics_family.ok_or_else(|| VulkanError::InitializationFailed("No graphics queue family found".to_string()))?;
        let present_family =
            present_family.ok_or_else(|| VulkanError::InitializationFailed("No present queue family found".to_string()))?;

        let extensions = unsafe { instance.enumerate_device_extension_properties(device) }.map_err(VulkanError::Api)?;
        let has_swapchain = extensions
            .iter()
            .any(|available| unsafe { CStr::from_ptr(available.extension_name.as_ptr()) } == SwapchainLoader::name());
        if !has_swapchain {
            return Err(VulkanError::InitializationFailed("Required device extensions not supported".to_string()));
        }

        Ok(Self { device, properties, features, graphics_family, present_family })
    }
}

/// Logical device plus everything the backend needs to know about its GPU
pub(crate) struct VulkanDevice {
    pub device: Device,
    pub physical: vk::PhysicalDevice,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub limits: vk::PhysicalDeviceLimits,
    pub features: DeviceFeatures,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub graphics_family: u32,
    pub present_family: u32,
    pub instance: Rc<VulkanInstance>,
}

impl VulkanDevice {
    pub(crate) fn new(instance: &Rc<VulkanInstance>, surface: &VulkanSurface) -> VulkanResult<Self> {
        let info = PhysicalDeviceInfo::select(&instance.instance, surface)?;

        let unique_families: HashSet<u32> = [info.graphics_family, info.present_family].into_iter().collect();
        let priorities = [1.0];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| vk::DeviceQueueCreateInfo::builder().queue_family_index(family).queue_priorities(&priorities).build())
            .collect();

        let features = DeviceFeatures {
            anisotropy: info.features.sampler_anisotropy == vk::TRUE,
            compressed_bc: info.features.texture_compression_bc == vk::TRUE,
            geometry_shader: info.features.geometry_shader == vk::TRUE,
        };
        let enabled = vk::PhysicalDeviceFeatures::builder()
            .sampler_anisotropy(features.anisotropy)
            .texture_compression_bc(features.compressed_bc)
            .geometry_shader(features.geometry_shader)
            .build();

        let required_extensions = [SwapchainLoader::name().as_ptr()];
        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&required_extensions)
            .enabled_features(&enabled);
        let device = unsafe { instance.instance.create_device(info.device, &create_info, None) }.map_err(VulkanError::Api)?;

        let graphics_queue = unsafe { device.get_device_queue(info.graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(info.present_family, 0) };
        let memory_properties = unsafe { instance.instance.get_physical_device_memory_properties(info.device) };
        log::debug!("Device features: {:?}", features);

        Ok(Self {
            device,
            physical: info.device,
            memory_properties,
            limits: info.properties.limits,
            features,
            graphics_queue,
            present_queue,
            graphics_family: info.graphics_family,
            present_family: info.present_family,
            instance: Rc::clone(instance),
        })
    }

    /// Memory type satisfying `type_bits` and `properties`
    pub(crate) fn find_memory_type(&self, type_bits: u32, properties: vk::MemoryPropertyFlags) -> VulkanResult<u32> {
        find_memory_type(&self.memory_properties, type_bits, properties)
    }

    /// Format properties of `format` on this GPU
    pub(crate) fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe { self.instance.instance.get_physical_device_format_properties(self.physical, format) }
    }

    /// Block until the GPU finished all submitted work
    pub(crate) fn wait_idle(&self) {
        if let Err(e) = unsafe { self.device.device_wait_idle() } {
            log::error!("device_wait_idle failed: {:?}", e);
        }
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
    }
}

/// First memory type in `type_bits` with all of `properties`
pub(crate) fn find_memory_type(
    memory: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    properties: vk::MemoryPropertyFlags,
) -> VulkanResult<u32> {
    (0..memory.memory_type_count)
        .find(|&i| type_bits & (1 << i) != 0 && memory.memory_types[i as usize].property_flags.contains(properties))
        .ok_or(VulkanError::NoSuitableMemoryType)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_with(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut memory = vk::PhysicalDeviceMemoryProperties { memory_type_count: types.len() as u32, ..Default::default() };
        for (i, &flags) in types.iter().enumerate() {
            memory.memory_types[i].property_flags = flags;
        }
        memory
    }

    #[test]
    fn test_find_memory_type_respects_type_bits() {
        let memory = memory_with(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT | vk::MemoryPropertyFlags::HOST_CACHED,
        ]);
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;

        assert_eq!(find_memory_type(&memory, 0b111, host).unwrap(), 1);
        assert_eq!(find_memory_type(&memory, 0b100, host).unwrap(), 2);
        assert_eq!(find_memory_type(&memory, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(), 0);
        assert!(matches!(find_memory_type(&memory, 0b001, host), Err(VulkanError::NoSuitableMemoryType)));
    }
}
