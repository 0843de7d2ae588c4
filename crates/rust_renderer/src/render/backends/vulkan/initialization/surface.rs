//! Vulkan surface management
//!
//! Owns the window surface and negotiates the swapchain parameters
//! (format, present mode, extent) against what the surface supports.

use super::Instance;
use crate::error::{RenderError, RenderResult, VkResultExt};
use crate::platform::PresentationWindow;
use ash::extensions::khr;
use ash::vk;

/// Preferred swapchain format
const PREFERRED_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Vulkan surface wrapper for presentation
pub struct Surface {
    loader: khr::Surface,
    surface: vk::SurfaceKHR,
}

impl Surface {
    /// Create a surface for `window`
    pub fn new(instance: &Instance, window: &dyn PresentationWindow) -> RenderResult<Self> {
        let loader = khr::Surface::new(instance.entry(), instance.handle());
        let surface = window.create_surface(instance.handle())?;
        log::debug!("Window surface created");
        Ok(Self { loader, surface })
    }

    /// Underlying surface handle
    pub const fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Surface extension loader
    pub const fn loader(&self) -> &khr::Surface {
        &self.loader
    }

    /// Whether `family` of `physical_device` can present to this surface
    pub fn supports_present(
        &self,
        physical_device: vk::PhysicalDevice,
        family: u32,
    ) -> RenderResult<bool> {
        unsafe {
            self.loader
                .get_physical_device_surface_support(physical_device, family, self.surface)
        }
        .check("vkGetPhysicalDeviceSurfaceSupportKHR")
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_surface(self.surface, None) };
        log::debug!("Window surface destroyed");
    }
}

/// Surface capabilities and the swapchain parameters chosen from them
#[derive(Debug, Clone)]
pub struct SurfaceDetails {
    /// Capabilities reported at the last refresh
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes
    pub present_modes: Vec<vk::PresentModeKHR>,
    /// Chosen format
    pub chosen_format: vk::SurfaceFormatKHR,
    /// Chosen extent
    pub chosen_extent: vk::Extent2D,
    /// Chosen present mode
    pub chosen_present_mode: vk::PresentModeKHR,
}

impl SurfaceDetails {
    /// Query the surface and choose parameters
    pub fn query(
        surface: &Surface,
        physical_device: vk::PhysicalDevice,
        requested_extent: vk::Extent2D,
        vsync: bool,
    ) -> RenderResult<Self> {
        let mut details = Self {
            capabilities: vk::SurfaceCapabilitiesKHR::default(),
            formats: Vec::new(),
            present_modes: Vec::new(),
            chosen_format: PREFERRED_FORMAT,
            chosen_extent: requested_extent,
            chosen_present_mode: vk::PresentModeKHR::FIFO,
        };
        details.refresh(surface, physical_device, requested_extent, vsync)?;
        Ok(details)
    }

    /// Re-query capabilities, formats and present modes, then re-choose
    ///
    /// Called before every swapchain (re)creation; nothing is cached
    /// between calls.
    pub fn refresh(
        &mut self,
        surface: &Surface,
        physical_device: vk::PhysicalDevice,
        requested_extent: vk::Extent2D,
        vsync: bool,
    ) -> RenderResult<()> {
        let loader = surface.loader();
        let handle = surface.handle();
        unsafe {
            self.capabilities = loader
                .get_physical_device_surface_capabilities(physical_device, handle)
                .check("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?;
            self.formats = loader
                .get_physical_device_surface_formats(physical_device, handle)
                .check("vkGetPhysicalDeviceSurfaceFormatsKHR")?;
            self.present_modes = loader
                .get_physical_device_surface_present_modes(physical_device, handle)
                .check("vkGetPhysicalDeviceSurfacePresentModesKHR")?;
        }

        self.chosen_format = choose_surface_format(&self.formats)
            .ok_or_else(|| RenderError::graphics("surface reports no formats"))?;
        self.chosen_extent = choose_extent(&self.capabilities, requested_extent);
        self.chosen_present_mode = choose_present_mode(&self.present_modes, vsync);

        log::debug!(
            "Surface refreshed: {:?}/{:?}, {}x{}, {:?}",
            self.chosen_format.format,
            self.chosen_format.color_space,
            self.chosen_extent.width,
            self.chosen_extent.height,
            self.chosen_present_mode
        );
        Ok(())
    }

    /// Swapchain image count: one above the minimum, capped by the maximum
    #[must_use]
    pub const fn image_count(&self) -> u32 {
        let desired = self.capabilities.min_image_count + 1;
        if self.capabilities.max_image_count > 0 && desired > self.capabilities.max_image_count {
            self.capabilities.max_image_count
        } else {
            desired
        }
    }
}

/// Use the current extent unless the surface leaves it to the application
#[must_use]
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    requested: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    // Drivers have reported min > max; max wins instead of panicking.
    let (min, max) = (capabilities.min_image_extent, capabilities.max_image_extent);
    vk::Extent2D {
        width: requested.width.max(min.width).min(max.width),
        height: requested.height.max(min.height).min(max.height),
    }
}

/// sRGB BGRA8 when offered, otherwise the first supported format
#[must_use]
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == PREFERRED_FORMAT.format && f.color_space == PREFERRED_FORMAT.color_space
        })
        .or_else(|| formats.first().copied())
}

/// Mailbox, then immediate, when vsync is off; FIFO otherwise
#[must_use]
pub fn choose_present_mode(modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if !vsync {
        for preferred in [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE] {
            if modes.contains(&preferred) {
                return preferred;
            }
        }
    }
    vk::PresentModeKHR::FIFO
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(current: (u32, u32), min: (u32, u32), max: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D { width: current.0, height: current.1 },
            min_image_extent: vk::Extent2D { width: min.0, height: min.1 },
            max_image_extent: vk::Extent2D { width: max.0, height: max.1 },
            min_image_count: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_extent_uses_current_when_defined() {
        let c = caps((800, 600), (1, 1), (4096, 4096));
        let extent = choose_extent(&c, vk::Extent2D { width: 1920, height: 1080 });
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn test_extent_clamps_requested_for_sentinel() {
        let c = caps((u32::MAX, u32::MAX), (100, 100), (2000, 1000));
        let big = choose_extent(&c, vk::Extent2D { width: 5000, height: 50 });
        assert_eq!((big.width, big.height), (2000, 100));
        let inside = choose_extent(&c, vk::Extent2D { width: 640, height: 480 });
        assert_eq!((inside.width, inside.height), (640, 480));
    }

    #[test]
    fn test_extent_survives_inverted_bounds() {
        let c = caps((u32::MAX, u32::MAX), (1024, 768), (800, 600));
        let extent = choose_extent(&c, vk::Extent2D { width: 1920, height: 1080 });
        assert_eq!((extent.width, extent.height), (800, 600));
        let small = choose_extent(&c, vk::Extent2D { width: 10, height: 10 });
        assert_eq!((small.width, small.height), (800, 600));
    }

    #[test]
    fn test_format_prefers_srgb_bgra() {
        let unorm = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let format_of = |formats: &[vk::SurfaceFormatKHR]| choose_surface_format(formats).map(|f| f.format);

        assert_eq!(format_of(&[unorm, PREFERRED_FORMAT]), Some(vk::Format::B8G8R8A8_SRGB));
        assert_eq!(format_of(&[unorm]), Some(vk::Format::B8G8R8A8_UNORM));
        assert_eq!(format_of(&[]), None);
    }

    #[test]
    fn test_present_mode_fallback_chain() {
        use vk::PresentModeKHR as Mode;
        let all = [Mode::FIFO, Mode::IMMEDIATE, Mode::MAILBOX];

        assert_eq!(choose_present_mode(&all, false), Mode::MAILBOX);
        assert_eq!(choose_present_mode(&[Mode::FIFO, Mode::IMMEDIATE], false), Mode::IMMEDIATE);
        assert_eq!(choose_present_mode(&[Mode::FIFO], false), Mode::FIFO);
        assert_eq!(choose_present_mode(&all, true), Mode::FIFO);
    }

    #[test]
    fn test_image_count_respects_maximum() {
        let mut details = SurfaceDetails {
            capabilities: caps((1, 1), (1, 1), (1, 1)),
            formats: Vec::new(),
            present_modes: Vec::new(),
            chosen_format: PREFERRED_FORMAT,
            chosen_extent: vk::Extent2D::default(),
            chosen_present_mode: vk::PresentModeKHR::FIFO,
        };
        assert_eq!(details.image_count(), 3);
        details.capabilities.max_image_count = 2;
        assert_eq!(details.image_count(), 2);
    }
}
