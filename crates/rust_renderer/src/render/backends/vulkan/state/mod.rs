//! Swapchain, synchronization and per-frame state

pub mod deletion_queue;
pub mod draw_targets;
pub mod frame;
pub mod frame_resources;
pub mod swapchain;
pub mod sync;

pub use deletion_queue::DeletionQueue;
pub use draw_targets::DrawTargets;
pub use frame::{
    AcquireOutcome, FrameDriver, FrameFlags, FrameLoop, FrameOutcome, FramePhase, FrameStats,
    PresentOutcome, FRAMES_IN_FLIGHT,
};
pub use frame_resources::FrameResources;
pub use swapchain::Swapchain;
