//! Physical device selection and logical device creation
//!
//! Every enumerated GPU is described as a [`DeviceCandidate`] and run through
//! [`evaluate`]. Candidates failing a mandatory condition are rejected with
//! the specific reason; the rest are scored and the highest score wins, with
//! ties going to the device enumerated first.

use super::{Instance, Surface};
use crate::error::{RenderError, RenderResult, VkResultExt};
use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::vk;
use std::ffi::{c_char, CStr};
use std::fmt;

/// Device extensions every candidate must expose
fn required_device_extensions() -> [&'static CStr; 1] {
    [SwapchainLoader::name()]
}

/// Lowest device API version accepted (dynamic rendering is core in 1.3)
const MIN_API_VERSION: u32 = vk::API_VERSION_1_3;

/// Score bonus for discrete GPUs
const DISCRETE_BONUS: u32 = 1000;

/// Queue family indices as discovered on a physical device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// First family with graphics support
    pub graphics: Option<u32>,
    /// First family that can present to the surface
    pub present: Option<u32>,
    /// Transfer-only family when one exists, else the graphics family
    pub transfer: Option<u32>,
}

impl QueueFamilyIndices {
    /// Scan `families`, asking `supports_present` about each index in turn
    pub fn find<F>(families: &[vk::QueueFamilyProperties], mut supports_present: F) -> RenderResult<Self>
    where
        F: FnMut(u32) -> RenderResult<bool>,
    {
        let mut indices = Self::default();
        let mut dedicated_transfer = None;

        for (index, family) in (0u32..).zip(families) {
            if family.queue_count == 0 {
                continue;
            }
            let flags = family.queue_flags;

            if flags.contains(vk::QueueFlags::GRAPHICS) && indices.graphics.is_none() {
                indices.graphics = Some(index);
            }
            if flags.contains(vk::QueueFlags::TRANSFER)
                && !flags.intersects(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
                && dedicated_transfer.is_none()
            {
                dedicated_transfer = Some(index);
            }
            if indices.present.is_none() && supports_present(index)? {
                indices.present = Some(index);
            }
        }

        indices.transfer = dedicated_transfer.or(indices.graphics);
        Ok(indices)
    }

    /// Graphics and present families were both found
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// Concrete families, if complete
    #[must_use]
    pub fn resolve(&self) -> Option<QueueFamilies> {
        let graphics = self.graphics?;
        Some(QueueFamilies {
            graphics,
            present: self.present?,
            transfer: self.transfer.unwrap_or(graphics),
        })
    }
}

/// Resolved queue family per role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    /// Graphics family
    pub graphics: u32,
    /// Present family
    pub present: u32,
    /// Transfer family
    pub transfer: u32,
}

impl QueueFamilies {
    /// Distinct families, graphics first
    #[must_use]
    pub fn unique(&self) -> Vec<u32> {
        let mut families = vec![self.graphics];
        for family in [self.present, self.transfer] {
            if !families.contains(&family) {
                families.push(family);
            }
        }
        families
    }

    /// Family serving `kind`
    #[must_use]
    pub const fn get(&self, kind: QueueKind) -> u32 {
        match kind {
            QueueKind::Graphics => self.graphics,
            QueueKind::Present => self.present,
            QueueKind::Transfer => self.transfer,
        }
    }
}

/// Queue role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    /// Rendering and blits
    Graphics,
    /// Presentation
    Present,
    /// Uploads
    Transfer,
}

/// Everything selection needs to know about one physical device
#[derive(Clone)]
pub struct DeviceCandidate {
    /// Physical device handle
    pub handle: vk::PhysicalDevice,
    /// Driver-reported name
    pub name: String,
    /// Properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Core 1.0 features
    pub features: vk::PhysicalDeviceFeatures,
    /// Dynamic rendering support from the 1.3 feature set
    pub dynamic_rendering: bool,
    /// Supported device extension names
    pub extensions: Vec<String>,
    /// Queue families found on the device
    pub queue_families: QueueFamilyIndices,
}

impl DeviceCandidate {
    fn describe(
        instance: &ash::Instance,
        surface: &Surface,
        handle: vk::PhysicalDevice,
    ) -> RenderResult<Self> {
        let properties = unsafe { instance.get_physical_device_properties(handle) };
        let features = unsafe { instance.get_physical_device_features(handle) };

        let dynamic_rendering = if properties.api_version >= MIN_API_VERSION {
            let mut features13 = vk::PhysicalDeviceVulkan13Features::default();
            let mut features2 = vk::PhysicalDeviceFeatures2::builder()
                .push_next(&mut features13)
                .build();
            unsafe { instance.get_physical_device_features2(handle, &mut features2) };
            features13.dynamic_rendering == vk::TRUE
        } else {
            false
        };

        let extensions = unsafe { instance.enumerate_device_extension_properties(handle) }
            .check("vkEnumerateDeviceExtensionProperties")?
            .iter()
            .map(|ext| raw_name(&ext.extension_name))
            .collect();

        let families = unsafe { instance.get_physical_device_queue_family_properties(handle) };
        let queue_families =
            QueueFamilyIndices::find(&families, |index| surface.supports_present(handle, index))?;

        Ok(Self {
            handle,
            name: raw_name(&properties.device_name),
            properties,
            features,
            dynamic_rendering,
            extensions,
            queue_families,
        })
    }

    /// Selection score; only meaningful for candidates that pass [`evaluate`]
    #[must_use]
    pub fn score(&self) -> u32 {
        let discrete = if self.properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
            DISCRETE_BONUS
        } else {
            0
        };
        discrete.saturating_add(self.properties.limits.max_image_dimension2_d)
    }
}

impl fmt::Debug for DeviceCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceCandidate")
            .field("name", &self.name)
            .field("type", &self.properties.device_type)
            .field("queue_families", &self.queue_families)
            .finish_non_exhaustive()
    }
}

/// Why a candidate was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Anisotropic filtering unsupported
    NoSamplerAnisotropy,
    /// Geometry shaders unsupported
    NoGeometryShader,
    /// Graphics or present family missing
    IncompleteQueueFamilies,
    /// A required extension is missing
    MissingExtension(String),
    /// Device API version below 1.3
    ApiVersionTooLow(u32),
    /// Dynamic rendering feature unavailable
    NoDynamicRendering,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSamplerAnisotropy => write!(f, "anisotropic filtering not supported"),
            Self::NoGeometryShader => write!(f, "geometry shaders not supported"),
            Self::IncompleteQueueFamilies => write!(f, "no graphics or present queue family"),
            Self::MissingExtension(name) => write!(f, "missing device extension {name}"),
            Self::ApiVersionTooLow(version) => write!(
                f,
                "Vulkan {}.{} below required 1.3",
                vk::api_version_major(*version),
                vk::api_version_minor(*version)
            ),
            Self::NoDynamicRendering => write!(f, "dynamic rendering not supported"),
        }
    }
}

/// Check the mandatory conditions and return the score if they all hold
pub fn evaluate(candidate: &DeviceCandidate) -> Result<u32, Rejection> {
    if candidate.features.sampler_anisotropy != vk::TRUE {
        return Err(Rejection::NoSamplerAnisotropy);
    }
    if candidate.features.geometry_shader != vk::TRUE {
        return Err(Rejection::NoGeometryShader);
    }
    if !candidate.queue_families.is_complete() {
        return Err(Rejection::IncompleteQueueFamilies);
    }
    for required in required_device_extensions() {
        let required = required.to_string_lossy();
        if !candidate.extensions.iter().any(|ext| *ext == required) {
            return Err(Rejection::MissingExtension(required.into_owned()));
        }
    }
    if candidate.properties.api_version < MIN_API_VERSION {
        return Err(Rejection::ApiVersionTooLow(candidate.properties.api_version));
    }
    if !candidate.dynamic_rendering {
        return Err(Rejection::NoDynamicRendering);
    }
    Ok(candidate.score())
}

/// Outcome of running selection over all candidates
#[derive(Debug, Default)]
pub struct SelectionReport {
    /// Index of the winning candidate
    pub selected: Option<usize>,
    /// Rejected candidates by name
    pub rejections: Vec<(String, Rejection)>,
}

/// Pick the highest scoring acceptable candidate; first wins on ties
#[must_use]
pub fn select(candidates: &[DeviceCandidate]) -> SelectionReport {
    let mut report = SelectionReport::default();
    let mut best: Option<(usize, u32)> = None;

    for (index, candidate) in candidates.iter().enumerate() {
        match evaluate(candidate) {
            Ok(score) => {
                if best.map_or(true, |(_, best_score)| score > best_score) {
                    best = Some((index, score));
                }
            }
            Err(reason) => report.rejections.push((candidate.name.clone(), reason)),
        }
    }

    report.selected = best.map(|(index, _)| index);
    report
}

/// Highest sample count usable for both color and depth attachments
#[must_use]
pub fn max_usable_sample_count(limits: &vk::PhysicalDeviceLimits) -> vk::SampleCountFlags {
    let counts = limits.framebuffer_color_sample_counts & limits.framebuffer_depth_sample_counts;
    [
        vk::SampleCountFlags::TYPE_64,
        vk::SampleCountFlags::TYPE_32,
        vk::SampleCountFlags::TYPE_16,
        vk::SampleCountFlags::TYPE_8,
        vk::SampleCountFlags::TYPE_4,
        vk::SampleCountFlags::TYPE_2,
    ]
    .into_iter()
    .find(|&count| counts.contains(count))
    .unwrap_or(vk::SampleCountFlags::TYPE_1)
}

/// Selected physical device and its logical device
pub struct Device {
    instance: ash::Instance,
    physical: vk::PhysicalDevice,
    name: String,
    properties: vk::PhysicalDeviceProperties,
    families: QueueFamilies,
    device: ash::Device,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    transfer_queue: vk::Queue,
    swapchain_loader: SwapchainLoader,
    max_samples: vk::SampleCountFlags,
}

impl Device {
    /// Select the best GPU for `surface` and create the logical device
    pub fn new(instance: &Instance, surface: &Surface) -> RenderResult<Self> {
        let raw_instance = instance.handle();
        let handles = unsafe { raw_instance.enumerate_physical_devices() }
            .check("vkEnumeratePhysicalDevices")?;
        log::info!("Found {} GPU(s)", handles.len());

        let candidates = handles
            .into_iter()
            .map(|handle| DeviceCandidate::describe(raw_instance, surface, handle))
            .collect::<RenderResult<Vec<_>>>()?;

        let report = select(&candidates);
        for (name, reason) in &report.rejections {
            log::warn!("GPU '{}' rejected: {}", name, reason);
        }
        let chosen = report
            .selected
            .and_then(|index| candidates.into_iter().nth(index))
            .ok_or_else(|| RenderError::graphics("no suitable GPU found"))?;
        let families = chosen
            .queue_families
            .resolve()
            .ok_or_else(|| RenderError::graphics("selected GPU has incomplete queue families"))?;

        log::info!(
            "Selected GPU '{}' ({:?}), score {}, queues {:?}",
            chosen.name,
            chosen.properties.device_type,
            chosen.score(),
            families
        );

        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let extension_ptrs: Vec<*const c_char> =
            required_device_extensions().iter().map(|ext| ext.as_ptr()).collect();
        let features = vk::PhysicalDeviceFeatures::builder()
            .sampler_anisotropy(true)
            .geometry_shader(true);
        let mut features13 = vk::PhysicalDeviceVulkan13Features::builder().dynamic_rendering(true);

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extension_ptrs)
            .enabled_features(&features)
            .push_next(&mut features13);

        let device = unsafe { raw_instance.create_device(chosen.handle, &create_info, None) }
            .check("vkCreateDevice")?;

        let (graphics_queue, present_queue, transfer_queue) = unsafe {
            (
                device.get_device_queue(families.graphics, 0),
                device.get_device_queue(families.present, 0),
                device.get_device_queue(families.transfer, 0),
            )
        };
        let swapchain_loader = SwapchainLoader::new(raw_instance, &device);
        let max_samples = max_usable_sample_count(&chosen.properties.limits);
        log::debug!("Max usable sample count: {:?}", max_samples);

        Ok(Self {
            instance: raw_instance.clone(),
            physical: chosen.handle,
            name: chosen.name,
            properties: chosen.properties,
            families,
            device,
            graphics_queue,
            present_queue,
            transfer_queue,
            swapchain_loader,
            max_samples,
        })
    }

    /// Logical device function table
    pub const fn handle(&self) -> &ash::Device {
        &self.device
    }

    /// Instance function table the device was created from
    pub const fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Physical device handle
    pub const fn physical(&self) -> vk::PhysicalDevice {
        self.physical
    }

    /// GPU name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Physical device properties
    pub const fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    /// Cached queue families
    pub const fn families(&self) -> QueueFamilies {
        self.families
    }

    /// Queue serving `kind`
    pub const fn queue(&self, kind: QueueKind) -> vk::Queue {
        match kind {
            QueueKind::Graphics => self.graphics_queue,
            QueueKind::Present => self.present_queue,
            QueueKind::Transfer => self.transfer_queue,
        }
    }

    /// Swapchain extension loader
    pub const fn swapchain_loader(&self) -> &SwapchainLoader {
        &self.swapchain_loader
    }

    /// Highest usable MSAA sample count
    pub const fn max_samples(&self) -> vk::SampleCountFlags {
        self.max_samples
    }

    /// Whether optimal-tiling images of `format` support linear-filtered blits
    pub fn supports_linear_blit(&self, format: vk::Format) -> bool {
        let properties = unsafe {
            self.instance
                .get_physical_device_format_properties(self.physical, format)
        };
        properties
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR)
    }

    /// Block until the device is idle
    pub fn wait_idle(&self) -> RenderResult<()> {
        unsafe { self.device.device_wait_idle() }.check("vkDeviceWaitIdle")
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                log::warn!("vkDeviceWaitIdle failed during teardown: {:?}", e);
            }
            self.device.destroy_device(None);
        }
        log::debug!("Logical device destroyed");
    }
}

fn raw_name(raw: &[c_char]) -> String {
    unsafe { CStr::from_ptr(raw.as_ptr()) }
        .to_string_lossy()
        .into_owned()
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

    fn candidate(name: &str, device_type: vk::PhysicalDeviceType, max_dim: u32) -> DeviceCandidate {
        let mut properties = vk::PhysicalDeviceProperties {
            device_type,
            api_version: vk::API_VERSION_1_3,
            ..Default::default()
        };
        properties.limits.max_image_dimension2_d = max_dim;
        DeviceCandidate {
            handle: vk::PhysicalDevice::null(),
            name: name.to_string(),
            properties,
            features: vk::PhysicalDeviceFeatures {
                sampler_anisotropy: vk::TRUE,
                geometry_shader: vk::TRUE,
                ..Default::default()
            },
            dynamic_rendering: true,
            extensions: vec!["VK_KHR_swapchain".to_string()],
            queue_families: QueueFamilyIndices {
                graphics: Some(0),
                present: Some(0),
                transfer: Some(0),
            },
        }
    }

    #[test]
    fn test_queue_families_prefer_dedicated_transfer() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::TRANSFER),
        ];
        let indices = QueueFamilyIndices::find(&families, |i| Ok(i == 1)).unwrap();

        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.present, Some(1));
        assert_eq!(indices.transfer, Some(2));
        assert_eq!(indices.resolve().unwrap().unique(), vec![0, 1, 2]);
    }

    #[test]
    fn test_transfer_falls_back_to_graphics() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER)];
        let indices = QueueFamilyIndices::find(&families, |_| Ok(true)).unwrap();
        assert_eq!(indices.transfer, Some(0));
        assert_eq!(indices.resolve().unwrap().unique(), vec![0]);
    }

    #[test]
    fn test_missing_present_is_incomplete() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let indices = QueueFamilyIndices::find(&families, |_| Ok(false)).unwrap();
        assert!(!indices.is_complete());
        assert!(indices.resolve().is_none());
    }

    #[test]
    fn test_scoring_prefers_discrete() {
        let integrated = candidate("igpu", vk::PhysicalDeviceType::INTEGRATED_GPU, 16384);
        let discrete = candidate("dgpu", vk::PhysicalDeviceType::DISCRETE_GPU, 16384);
        assert_eq!(integrated.score(), 16384);
        assert_eq!(discrete.score(), 17384);

        let report = select(&[integrated, discrete]);
        assert_eq!(report.selected, Some(1));
    }

    #[test]
    fn test_ties_go_to_first_enumerated() {
        let a = candidate("first", vk::PhysicalDeviceType::DISCRETE_GPU, 8192);
        let b = candidate("second", vk::PhysicalDeviceType::DISCRETE_GPU, 8192);
        for _ in 0..3 {
            assert_eq!(select(&[a.clone(), b.clone()]).selected, Some(0));
        }
    }

    #[test]
    fn test_mandatory_feature_rejection() {
        let mut no_aniso = candidate("no-aniso", vk::PhysicalDeviceType::DISCRETE_GPU, 32768);
        no_aniso.features.sampler_anisotropy = vk::FALSE;
        let mut no_geometry = candidate("no-geom", vk::PhysicalDeviceType::DISCRETE_GPU, 32768);
        no_geometry.features.geometry_shader = vk::FALSE;
        let mut no_swapchain = candidate("no-swapchain", vk::PhysicalDeviceType::DISCRETE_GPU, 32768);
        no_swapchain.extensions.clear();
        let mut old = candidate("old", vk::PhysicalDeviceType::DISCRETE_GPU, 32768);
        old.properties.api_version = vk::API_VERSION_1_1;
        let ok = candidate("ok", vk::PhysicalDeviceType::INTEGRATED_GPU, 4096);

        let report = select(&[no_aniso, no_geometry, no_swapchain, old, ok]);
        assert_eq!(report.selected, Some(4));
        let reasons: Vec<_> = report.rejections.iter().map(|(_, r)| r.clone()).collect();
        assert_eq!(
            reasons,
            vec![
                Rejection::NoSamplerAnisotropy,
                Rejection::NoGeometryShader,
                Rejection::MissingExtension("VK_KHR_swapchain".to_string()),
                Rejection::ApiVersionTooLow(vk::API_VERSION_1_1),
            ]
        );
    }

    #[test]
    fn test_no_survivor_selects_nothing() {
        let mut c = candidate("broken", vk::PhysicalDeviceType::DISCRETE_GPU, 1);
        c.queue_families.present = None;
        let report = select(&[c]);
        assert_eq!(report.selected, None);
        assert_eq!(report.rejections[0].1, Rejection::IncompleteQueueFamilies);
    }

    #[test]
    fn test_max_usable_sample_count_intersects() {
        let limits = vk::PhysicalDeviceLimits {
            framebuffer_color_sample_counts: vk::SampleCountFlags::TYPE_1
                | vk::SampleCountFlags::TYPE_4
                | vk::SampleCountFlags::TYPE_8,
            framebuffer_depth_sample_counts: vk::SampleCountFlags::TYPE_1
                | vk::SampleCountFlags::TYPE_4,
            ..Default::default()
        };
        assert_eq!(max_usable_sample_count(&limits), vk::SampleCountFlags::TYPE_4);
        assert_eq!(
            max_usable_sample_count(&vk::PhysicalDeviceLimits::default()),
            vk::SampleCountFlags::TYPE_1
        );
    }
}
