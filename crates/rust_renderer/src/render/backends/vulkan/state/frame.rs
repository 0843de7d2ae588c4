//! Per-frame orchestration state machine
//!
//! Every frame walks the same phases on one frame slot:
//!
//! 1. **WaitFence**: block until the slot's previous submission retired
//! 2. **AcquireImage**: get a swapchain image; out-of-date aborts the frame
//! 3. **RecordCommands**: re-record the slot's command buffer
//! 4. **Submit**: wait on image-available, signal render-finished and the fence
//! 5. **Present**: out-of-date, suboptimal or a pending resize recreate the swapchain
//! 6. **Advance**: move to the next slot
//!
//! The Vulkan work behind each phase lives in a [`FrameDriver`]; [`FrameLoop`]
//! only owns ordering, slot rotation and the recreate decision.

use crate::error::RenderResult;
use bitflags::bitflags;

/// Number of frames the CPU may record ahead of the GPU
pub const FRAMES_IN_FLIGHT: usize = 2;

/// Phase the frame loop is in or last stopped in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    /// Waiting on the slot's in-flight fence
    WaitFence,
    /// Acquiring a swapchain image
    AcquireImage,
    /// Recording the slot's command buffer
    RecordCommands,
    /// Submitting to the graphics queue
    Submit,
    /// Presenting the acquired image
    Present,
    /// Moving to the next slot
    Advance,
}

bitflags! {
    /// Conditions carried between phases
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FrameFlags: u8 {
        /// The swapchain no longer matches the surface exactly
        const SUBOPTIMAL = 1 << 0;
        /// The window reported a new framebuffer size
        const RESIZE_REQUESTED = 1 << 1;
    }
}

/// Result of acquiring a swapchain image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Image acquired; image-available will be signaled
    Acquired {
        /// Swapchain image index
        image_index: u32,
        /// Whether the swapchain reported itself suboptimal
        suboptimal: bool,
    },
    /// The swapchain must be recreated before anything can be presented
    OutOfDate,
}

/// Result of presenting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// Presented without complaint
    Presented,
    /// Presented, but the swapchain should be recreated
    Suboptimal,
    /// Not presented; the swapchain must be recreated
    OutOfDate,
}

/// What a call to [`FrameLoop::run_frame`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Rendered and presented
    Presented,
    /// Rendered and presented, then the swapchain was recreated
    Recreated,
    /// Acquire reported out-of-date; nothing was recorded and the swapchain was recreated
    Skipped,
    /// The framebuffer has no area; nothing was done
    Minimized,
}

/// Counters kept across frames
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Frames that reached the advance phase
    pub frame_number: u64,
    /// Frames aborted before recording
    pub skipped: u64,
    /// Swapchain recreations
    pub recreations: u64,
    /// Draw calls recorded in the last frame
    pub draw_calls: u32,
    /// Triangles submitted in the last frame
    pub triangles: u64,
}

/// The Vulkan side of each frame phase
///
/// Implementations map swapchain status codes onto [`AcquireOutcome`] and
/// [`PresentOutcome`]; every other failure is returned as an error.
pub trait FrameDriver {
    /// Block until `slot`'s in-flight fence is signaled, then reclaim its per-frame resources
    fn wait_for_slot(&mut self, slot: usize) -> RenderResult<()>;

    /// Acquire the next image, signaling `slot`'s image-available semaphore
    fn acquire_image(&mut self, slot: usize) -> RenderResult<AcquireOutcome>;

    /// Reset `slot`'s fence so the coming submission can signal it
    fn reset_slot_fence(&mut self, slot: usize) -> RenderResult<()>;

    /// Record `slot`'s command buffer against swapchain image `image_index`
    fn record(&mut self, slot: usize, image_index: u32) -> RenderResult<()>;

    /// Submit `slot`'s command buffer
    fn submit(&mut self, slot: usize) -> RenderResult<()>;

    /// Give up on a frame whose image was acquired but never submitted
    ///
    /// Must consume `slot`'s image-available semaphore. When `fence_reset` is
    /// set the slot's fence was already reset and must be signaled again.
    fn abandon_frame(&mut self, slot: usize, fence_reset: bool) -> RenderResult<()>;

    /// Present `image_index` once `slot`'s render-finished semaphore is signaled
    fn present(&mut self, slot: usize, image_index: u32) -> RenderResult<PresentOutcome>;

    /// Destroy and rebuild the swapchain and everything sized by it
    fn recreate_swapchain(&mut self) -> RenderResult<()>;
}

/// Slot rotation and phase ordering
#[derive(Debug, Clone)]
pub struct FrameLoop {
    current_slot: usize,
    phase: FramePhase,
    flags: FrameFlags,
    stats: FrameStats,
}

impl Default for FrameLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameLoop {
    /// Start at slot 0 with no pending conditions
    #[must_use]
    pub const fn new() -> Self {
        Self {
            current_slot: 0,
            phase: FramePhase::WaitFence,
            flags: FrameFlags::empty(),
            stats: FrameStats {
                frame_number: 0,
                skipped: 0,
                recreations: 0,
                draw_calls: 0,
                triangles: 0,
            },
        }
    }

    /// Slot the next frame will use
    pub const fn current_slot(&self) -> usize {
        self.current_slot
    }

    /// Phase reached by the last frame; stays put when a frame fails
    pub const fn phase(&self) -> FramePhase {
        self.phase
    }

    /// Pending swapchain conditions
    pub const fn flags(&self) -> FrameFlags {
        self.flags
    }

    /// Counters since startup
    pub const fn stats(&self) -> &FrameStats {
        &self.stats
    }

    /// Counters, for the draw totals filled in by the renderer
    pub fn stats_mut(&mut self) -> &mut FrameStats {
        &mut self.stats
    }

    /// Recreate the swapchain after the next present
    pub fn request_resize(&mut self) {
        self.flags.insert(FrameFlags::RESIZE_REQUESTED);
    }

    /// Count a frame the caller decided not to render
    pub fn note_skipped(&mut self) {
        self.stats.skipped += 1;
    }

    /// Run one frame through `driver`
    ///
    /// An error leaves the slot where it was; the caller escalates it. A
    /// frame failing between acquire and submit is abandoned so the slot's
    /// fence ends up signaled and its semaphore unsignaled.
    ///
    /// The fence is reset right before submission, once nothing else in the
    /// frame can fail.
    pub fn run_frame<D: FrameDriver + ?Sized>(&mut self, driver: &mut D) -> RenderResult<FrameOutcome> {
        let slot = self.current_slot;

        self.phase = FramePhase::WaitFence;
        driver.wait_for_slot(slot)?;

        self.phase = FramePhase::AcquireImage;
        let image_index = match driver.acquire_image(slot)? {
            AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            } => {
                if suboptimal {
                    self.flags.insert(FrameFlags::SUBOPTIMAL);
                }
                image_index
            }
            AcquireOutcome::OutOfDate => {
                // The fence is still signaled, so the next wait on this slot returns at once.
                log::debug!("Swapchain out of date at acquire; skipping frame");
                self.recreate(driver)?;
                self.stats.skipped += 1;
                self.phase = FramePhase::WaitFence;
                return Ok(FrameOutcome::Skipped);
            }
        };

        self.phase = FramePhase::RecordCommands;
        if let Err(error) = driver.record(slot, image_index) {
            Self::abandon(driver, slot, false);
            return Err(error);
        }

        self.phase = FramePhase::Submit;
        if let Err(error) = driver.reset_slot_fence(slot) {
            Self::abandon(driver, slot, false);
            return Err(error);
        }
        if let Err(error) = driver.submit(slot) {
            Self::abandon(driver, slot, true);
            return Err(error);
        }

        self.phase = FramePhase::Present;
        let presented = driver.present(slot, image_index)?;
        let recreate = presented != PresentOutcome::Presented
            || self
                .flags
                .intersects(FrameFlags::SUBOPTIMAL | FrameFlags::RESIZE_REQUESTED);
        if recreate {
            log::debug!("Recreating swapchain after present ({:?}, {:?})", presented, self.flags);
            self.recreate(driver)?;
        }

        self.phase = FramePhase::Advance;
        self.current_slot = (slot + 1) % FRAMES_IN_FLIGHT;
        self.stats.frame_number += 1;
        self.phase = FramePhase::WaitFence;

        Ok(if recreate {
            FrameOutcome::Recreated
        } else {
            FrameOutcome::Presented
        })
    }

    fn abandon<D: FrameDriver + ?Sized>(driver: &mut D, slot: usize, fence_reset: bool) {
        log::warn!("Abandoning frame in slot {}", slot);
        if let Err(error) = driver.abandon_frame(slot, fence_reset) {
            log::error!("Failed to release slot {} after an aborted frame: {}", slot, error);
        }
    }

    fn recreate<D: FrameDriver + ?Sized>(&mut self, driver: &mut D) -> RenderResult<()> {
        driver.recreate_swapchain()?;
        self.flags.remove(FrameFlags::SUBOPTIMAL | FrameFlags::RESIZE_REQUESTED);
        self.stats.recreations += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RenderError;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Wait(usize),
        Acquire(usize),
        ResetFence(usize),
        Record(usize, u32),
        Submit(usize),
        Abandon(usize, bool),
        Present(usize, u32),
        Recreate,
    }

    /// Scripted driver that models fences and an image rotation
    #[derive(Default)]
    struct MockDriver {
        calls: Vec<Call>,
        acquires: VecDeque<AcquireOutcome>,
        presents: VecDeque<PresentOutcome>,
        fence_signaled: [bool; FRAMES_IN_FLIGHT],
        semaphore_signaled: [bool; FRAMES_IN_FLIGHT],
        in_flight: usize,
        max_in_flight: usize,
        next_image: u32,
        fail_record: bool,
        fail_submit: bool,
    }

    impl MockDriver {
        fn new() -> Self {
            Self {
                fence_signaled: [true; FRAMES_IN_FLIGHT],
                ..Self::default()
            }
        }
    }

    impl FrameDriver for MockDriver {
        fn wait_for_slot(&mut self, slot: usize) -> RenderResult<()> {
            self.calls.push(Call::Wait(slot));
            if !self.fence_signaled[slot] {
                assert!(self.in_flight > 0, "waiting on a fence nothing will signal");
                // The GPU "finishes" the slot's work.
                self.fence_signaled[slot] = true;
                self.in_flight -= 1;
            }
            Ok(())
        }

        fn acquire_image(&mut self, slot: usize) -> RenderResult<AcquireOutcome> {
            self.calls.push(Call::Acquire(slot));
            assert!(self.fence_signaled[slot], "acquire before the slot fence was waited");
            let outcome = self.acquires.pop_front().unwrap_or_else(|| {
                let image_index = self.next_image;
                self.next_image = (self.next_image + 1) % 3;
                AcquireOutcome::Acquired {
                    image_index,
                    suboptimal: false,
                }
            });
            if matches!(outcome, AcquireOutcome::Acquired { .. }) {
                assert!(
                    !self.semaphore_signaled[slot],
                    "image-available semaphore signaled twice without a wait"
                );
                self.semaphore_signaled[slot] = true;
            }
            Ok(outcome)
        }

        fn reset_slot_fence(&mut self, slot: usize) -> RenderResult<()> {
            self.calls.push(Call::ResetFence(slot));
            assert!(self.fence_signaled[slot], "fence reset while slot still in flight");
            self.fence_signaled[slot] = false;
            Ok(())
        }

        fn record(&mut self, slot: usize, image_index: u32) -> RenderResult<()> {
            self.calls.push(Call::Record(slot, image_index));
            if self.fail_record {
                return Err(RenderError::generic("recording failed"));
            }
            Ok(())
        }

        fn submit(&mut self, slot: usize) -> RenderResult<()> {
            self.calls.push(Call::Submit(slot));
            if self.fail_submit {
                return Err(RenderError::generic("submission failed"));
            }
            self.semaphore_signaled[slot] = false;
            self.in_flight += 1;
            self.max_in_flight = self.max_in_flight.max(self.in_flight);
            Ok(())
        }

        fn abandon_frame(&mut self, slot: usize, fence_reset: bool) -> RenderResult<()> {
            self.calls.push(Call::Abandon(slot, fence_reset));
            assert_eq!(fence_reset, !self.fence_signaled[slot]);
            // Empty submission: waits the semaphore, signals the fence if it was reset.
            self.semaphore_signaled[slot] = false;
            if fence_reset {
                self.in_flight += 1;
            }
            Ok(())
        }

        fn present(&mut self, slot: usize, image_index: u32) -> RenderResult<PresentOutcome> {
            self.calls.push(Call::Present(slot, image_index));
            Ok(self.presents.pop_front().unwrap_or(PresentOutcome::Presented))
        }

        fn recreate_swapchain(&mut self) -> RenderResult<()> {
            self.calls.push(Call::Recreate);
            Ok(())
        }
    }

    #[test]
    fn test_phases_run_in_order() {
        let mut frames = FrameLoop::new();
        let mut driver = MockDriver::new();

        assert_eq!(frames.run_frame(&mut driver).unwrap(), FrameOutcome::Presented);
        assert_eq!(
            driver.calls,
            vec![
                Call::Wait(0),
                Call::Acquire(0),
                Call::Record(0, 0),
                Call::ResetFence(0),
                Call::Submit(0),
                Call::Present(0, 0),
            ]
        );
        assert_eq!(frames.current_slot(), 1);
        assert_eq!(frames.stats().frame_number, 1);
        assert_eq!(frames.phase(), FramePhase::WaitFence);
    }

    #[test]
    fn test_slots_alternate_and_never_exceed_frames_in_flight() {
        let mut frames = FrameLoop::new();
        let mut driver = MockDriver::new();

        let mut slots = Vec::new();
        for _ in 0..7 {
            slots.push(frames.current_slot());
            frames.run_frame(&mut driver).unwrap();
        }

        assert_eq!(slots, vec![0, 1, 0, 1, 0, 1, 0]);
        assert_eq!(driver.max_in_flight, FRAMES_IN_FLIGHT);
        assert!(slots.iter().all(|&slot| slot < FRAMES_IN_FLIGHT));
    }

    #[test]
    fn test_out_of_date_acquire_aborts_without_touching_fence() {
        let mut frames = FrameLoop::new();
        let mut driver = MockDriver::new();
        driver.acquires.push_back(AcquireOutcome::OutOfDate);

        assert_eq!(frames.run_frame(&mut driver).unwrap(), FrameOutcome::Skipped);
        assert_eq!(driver.calls, vec![Call::Wait(0), Call::Acquire(0), Call::Recreate]);
        assert_eq!(frames.current_slot(), 0);
        assert_eq!(frames.stats().skipped, 1);
        assert_eq!(frames.stats().recreations, 1);

        // The slot's fence was left signaled, so the retry proceeds.
        assert_eq!(frames.run_frame(&mut driver).unwrap(), FrameOutcome::Presented);
        assert_eq!(frames.current_slot(), 1);
    }

    #[test]
    fn test_resize_mid_render_recreates_after_present() {
        let mut frames = FrameLoop::new();
        let mut driver = MockDriver::new();
        frames.run_frame(&mut driver).unwrap();

        frames.request_resize();
        assert!(frames.flags().contains(FrameFlags::RESIZE_REQUESTED));
        driver.calls.clear();

        assert_eq!(frames.run_frame(&mut driver).unwrap(), FrameOutcome::Recreated);
        assert_eq!(driver.calls.last(), Some(&Call::Recreate));
        assert!(driver.calls.contains(&Call::Present(1, 1)));
        assert!(frames.flags().is_empty());
        assert_eq!(frames.current_slot(), 0);

        driver.calls.clear();
        assert_eq!(frames.run_frame(&mut driver).unwrap(), FrameOutcome::Presented);
        assert!(!driver.calls.contains(&Call::Recreate));
    }

    #[test]
    fn test_suboptimal_acquire_is_tolerated_then_recreated() {
        let mut frames = FrameLoop::new();
        let mut driver = MockDriver::new();
        driver.acquires.push_back(AcquireOutcome::Acquired {
            image_index: 2,
            suboptimal: true,
        });

        assert_eq!(frames.run_frame(&mut driver).unwrap(), FrameOutcome::Recreated);
        assert!(driver.calls.contains(&Call::Record(0, 2)));
        assert!(driver.calls.contains(&Call::Present(0, 2)));
        assert_eq!(frames.stats().recreations, 1);
    }

    #[test]
    fn test_out_of_date_present_recreates() {
        let mut frames = FrameLoop::new();
        let mut driver = MockDriver::new();
        driver.presents.push_back(PresentOutcome::OutOfDate);

        assert_eq!(frames.run_frame(&mut driver).unwrap(), FrameOutcome::Recreated);
        assert_eq!(frames.current_slot(), 1);
        assert_eq!(frames.stats().frame_number, 1);
    }

    #[test]
    fn test_failed_record_leaves_fence_signaled_for_the_retry() {
        let mut frames = FrameLoop::new();
        let mut driver = MockDriver::new();
        driver.fail_record = true;

        assert!(frames.run_frame(&mut driver).is_err());
        assert_eq!(frames.current_slot(), 0);
        assert_eq!(frames.phase(), FramePhase::RecordCommands);
        assert!(!driver.calls.contains(&Call::ResetFence(0)));
        assert!(!driver.calls.contains(&Call::Submit(0)));
        assert_eq!(driver.calls.last(), Some(&Call::Abandon(0, false)));
        assert!(driver.fence_signaled[0]);

        // The same slot runs again without waiting on a fence nothing will signal.
        driver.fail_record = false;
        driver.calls.clear();
        assert_eq!(frames.run_frame(&mut driver).unwrap(), FrameOutcome::Presented);
        assert_eq!(driver.calls.first(), Some(&Call::Wait(0)));
        assert_eq!(frames.current_slot(), 1);
    }

    #[test]
    fn test_failed_submit_re_signals_the_reset_fence() {
        let mut frames = FrameLoop::new();
        let mut driver = MockDriver::new();
        driver.fail_submit = true;

        assert!(frames.run_frame(&mut driver).is_err());
        assert_eq!(frames.phase(), FramePhase::Submit);
        assert_eq!(driver.calls.last(), Some(&Call::Abandon(0, true)));

        driver.fail_submit = false;
        assert_eq!(frames.run_frame(&mut driver).unwrap(), FrameOutcome::Presented);
        assert!(!driver.semaphore_signaled[0]);
        assert_eq!(frames.current_slot(), 1);
    }
}
