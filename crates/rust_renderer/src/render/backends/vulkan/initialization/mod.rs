//! Vulkan instance, surface and device initialization

pub mod device;
pub mod instance;
pub mod surface;

pub use device::{Device, DeviceCandidate, QueueFamilies, QueueFamilyIndices, QueueKind};
pub use instance::Instance;
pub use surface::{Surface, SurfaceDetails};
