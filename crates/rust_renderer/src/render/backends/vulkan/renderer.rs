//! Vulkan renderer backend
//!
//! Owns every Vulkan object the renderer needs and drives one frame per
//! [`RendererBackend::render`] call through the [`FrameLoop`] state machine.
//! Construction order is instance, surface, device, allocator, swapchain,
//! per-frame resources, then materials; teardown runs in reverse through
//! field declaration order after an explicit device idle wait.

use super::initialization::{Device, Instance, QueueKind, Surface, SurfaceDetails};
use super::rendering::barrier::{blit_image, subresource_range, transition_color, transition_image};
use super::rendering::commands::{begin_one_time, end, CommandManager};
use super::resources::descriptor_set::PoolSizeRatio;
use super::resources::resource::DescriptorSetLayout;
use super::resources::{
    BasicBuffer, DescriptorAllocator, DescriptorWriter, GpuAllocator, GpuResource, MemoryLocation,
    Owned, Texture, TextureOptions, UploadContext,
};
use super::state::draw_targets::effective_samples;
use super::state::sync::reset_fence;
use super::state::{
    AcquireOutcome, DrawTargets, FrameDriver, FrameLoop, FrameOutcome, FrameResources, FrameStats,
    PresentOutcome, Swapchain, FRAMES_IN_FLIGHT,
};
use crate::assets::{ImageData, MeshData};
use crate::config::RendererConfig;
use crate::error::{ErrorMode, RenderError, RenderResult, VkResultExt};
use crate::foundation::context::EngineContext;
use crate::platform::PresentationWindow;
use crate::render::scene::material::scene_set_bindings;
use crate::render::scene::{
    DrawContext, GpuMeshBuffers, MaterialConstants, MaterialInstance, MaterialPass,
    MaterialResources, MetallicRoughness, RenderObject, SceneData,
};
use ash::vk;
use std::mem::size_of;
use std::sync::Arc;

/// Material sets the long-lived descriptor pool can hold
const MATERIAL_DESCRIPTOR_SETS: u32 = 256;

const MATERIAL_DESCRIPTOR_RATIOS: [PoolSizeRatio; 2] = [
    PoolSizeRatio { ty: vk::DescriptorType::UNIFORM_BUFFER, ratio: 1.0 },
    PoolSizeRatio { ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER, ratio: 2.0 },
];

/// The swapchain image an overlay draws into
#[derive(Debug, Clone, Copy)]
pub struct OverlayTarget {
    /// Swapchain image, in `COLOR_ATTACHMENT_OPTIMAL`
    pub image: vk::Image,
    /// View of the image
    pub view: vk::ImageView,
    /// Image size
    pub extent: vk::Extent2D,
    /// Swapchain format
    pub format: vk::Format,
}

/// UI or debug drawing recorded on top of the finished frame
///
/// Called after the scene has been blitted into the swapchain image and
/// before the image is transitioned for presentation. The image must be
/// left in `COLOR_ATTACHMENT_OPTIMAL`.
pub trait OverlayRenderer {
    /// Record overlay commands into `cmd`
    fn record(
        &mut self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        target: OverlayTarget,
    ) -> RenderResult<()>;
}

/// Textures every renderer starts with
pub struct DefaultTextures {
    /// Opaque white
    pub white: Owned<Texture>,
    /// Opaque black
    pub black: Owned<Texture>,
    /// Mid grey
    pub grey: Owned<Texture>,
    /// Magenta and black checkerboard for missing textures
    pub error: Owned<Texture>,
}

impl DefaultTextures {
    fn new(ctx: &UploadContext<'_>) -> RenderResult<Self> {
        let solid = |color: [u8; 4]| {
            Texture::from_image_data(ctx, &ImageData::solid_color(1, 1, color), TextureOptions::nearest())
        };
        let checker = ImageData::checkerboard(16, [255, 0, 255, 255], [0, 0, 0, 255]);
        Ok(Self {
            white: solid([255, 255, 255, 255])?,
            black: solid([0, 0, 0, 255])?,
            grey: solid([170, 170, 170, 255])?,
            error: Texture::from_image_data(ctx, &checker, TextureOptions::nearest())?,
        })
    }
}

/// Slot whose fence is waited last among those in flight
///
/// A resource used by the frame just submitted is safe to destroy once that
/// slot comes around again.
#[must_use]
pub const fn retire_slot(current_slot: usize) -> usize {
    (current_slot + FRAMES_IN_FLIGHT - 1) % FRAMES_IN_FLIGHT
}

/// Vulkan renderer backend
pub struct RendererBackend {
    frames: FrameLoop,
    frame_resources: Vec<FrameResources>,
    material_buffers: Vec<Owned<BasicBuffer>>,
    default_material: MaterialInstance,
    metal_rough: MetallicRoughness,
    material_descriptors: Owned<DescriptorAllocator>,
    scene_layout: Owned<DescriptorSetLayout>,
    default_textures: DefaultTextures,
    draw_targets: DrawTargets,
    swapchain: Owned<Swapchain>,
    surface_details: SurfaceDetails,
    commands: CommandManager,
    allocator: Arc<GpuAllocator>,
    device: Arc<Device>,
    surface: Surface,
    instance: Instance,
    error_mode: ErrorMode,
    clear_color: [f32; 4],
    vsync: bool,
    samples: vk::SampleCountFlags,
}

impl RendererBackend {
    /// Bring up Vulkan for `window`
    ///
    /// Failures are escalated through the context's [`ErrorMode`].
    pub fn new(context: &EngineContext, window: &dyn PresentationWindow) -> RenderResult<Self> {
        let config = context.config();
        config
            .validate()
            .map_err(|e| context.escalate(RenderError::generic(format!("invalid renderer configuration: {e}"))))?;
        Self::create(config, window).map_err(|e| context.escalate(e))
    }

    fn create(config: &RendererConfig, window: &dyn PresentationWindow) -> RenderResult<Self> {
        log::info!("Creating renderer backend for '{}'", config.application_name);

        let instance = Instance::new(config, window)?;
        let surface = Surface::new(&instance, window)?;
        let device = Arc::new(Device::new(&instance, &surface)?);
        let allocator = GpuAllocator::new(&device)?;
        let commands = CommandManager::new(&device)?;

        let surface_details = SurfaceDetails::query(
            &surface,
            device.physical(),
            window.framebuffer_extent(),
            config.vsync,
        )?;
        let swapchain = Swapchain::new(&device, &surface, &surface_details)?;
        let samples = effective_samples(config.msaa, device.max_samples());
        let draw_targets = DrawTargets::new(&allocator, surface_details.chosen_extent, samples)?;

        let frame_resources = (0..FRAMES_IN_FLIGHT)
            .map(|_| FrameResources::new(&allocator))
            .collect::<RenderResult<Vec<_>>>()?;

        let raw = device.handle();
        let scene_layout = scene_set_bindings().build(
            raw,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
        )?;
        let material_descriptors =
            DescriptorAllocator::new(raw, MATERIAL_DESCRIPTOR_SETS, &MATERIAL_DESCRIPTOR_RATIOS)?;

        let upload = UploadContext {
            allocator: &allocator,
            commands: &commands,
        };
        let default_textures = DefaultTextures::new(&upload)?;
        let mut metal_rough = MetallicRoughness::build(raw, &config.shaders, scene_layout.raw(), samples)?;

        let constants = create_material_buffer(&allocator, &MaterialConstants::default())?;
        let white = default_textures.white.try_get()?;
        let resources = MaterialResources::new(white, white, constants.try_get()?, 0);
        let default_material = metal_rough.write_material(
            raw,
            MaterialPass::Opaque,
            &resources,
            material_descriptors.try_get()?,
        )?;

        log::info!(
            "Renderer ready on '{}' ({} frames in flight, {:?})",
            device.name(),
            FRAMES_IN_FLIGHT,
            samples
        );
        Ok(Self {
            frames: FrameLoop::new(),
            frame_resources,
            material_buffers: vec![constants],
            default_material,
            metal_rough,
            material_descriptors,
            scene_layout,
            default_textures,
            draw_targets,
            swapchain,
            surface_details,
            commands,
            allocator,
            device,
            surface,
            instance,
            error_mode: config.error_mode,
            clear_color: config.clear_color,
            vsync: config.vsync,
            samples,
        })
    }

    /// Render and present one frame of `draw`, with an optional overlay on top
    ///
    /// Out-of-date and suboptimal swapchains are handled internally. Any other
    /// failure is escalated through the configured [`ErrorMode`].
    pub fn render(
        &mut self,
        window: &dyn PresentationWindow,
        draw: &DrawContext,
        overlay: Option<&mut dyn OverlayRenderer>,
    ) -> RenderResult<FrameOutcome> {
        let extent = window.framebuffer_extent();
        if extent.width == 0 || extent.height == 0 {
            self.frames.note_skipped();
            return Ok(FrameOutcome::Minimized);
        }
        if self.swapchain.is_empty() {
            if let Err(e) = self.recreate_swapchain(extent) {
                return Err(self.error_mode.escalate(e));
            }
            if self.swapchain.is_empty() {
                self.frames.note_skipped();
                return Ok(FrameOutcome::Minimized);
            }
        }

        let mut frames = std::mem::take(&mut self.frames);
        let mut recorder = FrameRecorder {
            backend: self,
            window,
            draw,
            overlay,
            draw_calls: 0,
        };
        let result = frames.run_frame(&mut recorder);
        let draw_calls = recorder.draw_calls;
        self.frames = frames;

        match result {
            Ok(outcome) => {
                if outcome != FrameOutcome::Skipped {
                    let stats = self.frames.stats_mut();
                    stats.draw_calls = draw_calls;
                    stats.triangles = draw.triangle_count();
                }
                Ok(outcome)
            }
            Err(e) => Err(self.error_mode.escalate(e)),
        }
    }

    /// Recreate the swapchain after the next presented frame
    pub fn notify_resized(&mut self) {
        self.frames.request_resize();
    }

    /// Upload mesh data to device-local buffers
    pub fn upload_mesh(&self, mesh: &MeshData) -> RenderResult<GpuMeshBuffers> {
        GpuMeshBuffers::upload(&self.upload_context(), mesh).map_err(|e| self.error_mode.escalate(e))
    }

    /// Upload a decoded image as a sampled texture
    pub fn upload_texture(&self, image: &ImageData, options: TextureOptions) -> RenderResult<Owned<Texture>> {
        Texture::from_image_data(&self.upload_context(), image, options)
            .map_err(|e| self.error_mode.escalate(e))
    }

    /// Create a metallic-roughness material instance
    ///
    /// The textures must outlive every frame that draws with the instance.
    pub fn create_material(
        &mut self,
        pass: MaterialPass,
        constants: &MaterialConstants,
        color: &Texture,
        metal_rough: &Texture,
    ) -> RenderResult<MaterialInstance> {
        self.write_material(pass, constants, color, metal_rough)
            .map_err(|e| self.error_mode.escalate(e))
    }

    fn write_material(
        &mut self,
        pass: MaterialPass,
        constants: &MaterialConstants,
        color: &Texture,
        metal_rough: &Texture,
    ) -> RenderResult<MaterialInstance> {
        let buffer = create_material_buffer(&self.allocator, constants)?;
        let resources = MaterialResources::new(color, metal_rough, buffer.try_get()?, 0);
        let instance = self.metal_rough.write_material(
            self.device.handle(),
            pass,
            &resources,
            self.material_descriptors.try_get()?,
        )?;
        self.material_buffers.push(buffer);
        Ok(instance)
    }

    /// Destroy `resource` once no in-flight frame can still be using it
    pub fn retire<R: GpuResource + 'static>(&mut self, resource: Owned<R>) {
        let slot = retire_slot(self.frames.current_slot());
        self.frame_resources[slot].deletion_queue.retire(resource);
    }

    /// Material used by surfaces that do not name one
    pub const fn default_material(&self) -> MaterialInstance {
        self.default_material
    }

    /// Textures created at startup
    pub const fn default_textures(&self) -> &DefaultTextures {
        &self.default_textures
    }

    /// Frame counters
    pub const fn stats(&self) -> &FrameStats {
        self.frames.stats()
    }

    /// Current swapchain size; zero while no swapchain exists
    pub fn swapchain_extent(&self) -> vk::Extent2D {
        self.swapchain
            .get()
            .map_or_else(vk::Extent2D::default, Swapchain::extent)
    }

    /// Geometry sample count
    pub const fn samples(&self) -> vk::SampleCountFlags {
        self.samples
    }

    /// Logical device shared with every resource
    pub const fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Block until the GPU is idle
    pub fn wait_idle(&self) -> RenderResult<()> {
        self.device.wait_idle()
    }

    fn upload_context(&self) -> UploadContext<'_> {
        UploadContext {
            allocator: &self.allocator,
            commands: &self.commands,
        }
    }

    /// Destroy the swapchain and draw targets and rebuild them for `extent`
    ///
    /// A zero-area surface leaves the swapchain empty until the next render
    /// with a usable size.
    fn recreate_swapchain(&mut self, extent: vk::Extent2D) -> RenderResult<()> {
        self.device.wait_idle()?;
        self.swapchain.destroy();

        self.surface_details
            .refresh(&self.surface, self.device.physical(), extent, self.vsync)?;
        let chosen = self.surface_details.chosen_extent;
        if chosen.width == 0 || chosen.height == 0 {
            log::debug!("Surface has no area; deferring swapchain creation");
            return Ok(());
        }

        self.swapchain
            .assign(Swapchain::new(&self.device, &self.surface, &self.surface_details)?);
        self.draw_targets = DrawTargets::new(&self.allocator, chosen, self.samples)?;
        log::info!("Swapchain recreated at {}x{}", chosen.width, chosen.height);
        Ok(())
    }
}

impl Drop for RendererBackend {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            log::warn!("Device idle wait failed during renderer teardown: {}", e);
        }
        log::debug!("Renderer backend shutting down");
    }
}

fn create_material_buffer(
    allocator: &Arc<GpuAllocator>,
    constants: &MaterialConstants,
) -> RenderResult<Owned<BasicBuffer>> {
    let mut buffer = BasicBuffer::new(
        allocator,
        size_of::<MaterialConstants>() as vk::DeviceSize,
        vk::BufferUsageFlags::UNIFORM_BUFFER,
        MemoryLocation::CpuToGpu,
        &[],
    )?;
    buffer.try_get_mut()?.write(0, std::slice::from_ref(constants))?;
    Ok(buffer)
}

/// Frame phases executed against a [`RendererBackend`]
struct FrameRecorder<'a, 'o> {
    backend: &'a mut RendererBackend,
    window: &'a dyn PresentationWindow,
    draw: &'a DrawContext,
    overlay: Option<&'a mut (dyn OverlayRenderer + 'o)>,
    draw_calls: u32,
}

impl FrameRecorder<'_, '_> {
    /// Allocate and fill this frame's scene set
    fn write_scene(&mut self, slot: usize) -> RenderResult<vk::DescriptorSet> {
        let device = self.backend.device.handle();
        let frame = &mut self.backend.frame_resources[slot];

        let scene_buffer = frame.scene_buffer.try_get_mut()?;
        scene_buffer.write(0, std::slice::from_ref(&self.draw.scene))?;
        let set = frame
            .descriptors
            .try_get()?
            .allocate(self.backend.scene_layout.raw())?;

        let mut writer = DescriptorWriter::new();
        writer.write_buffer(
            0,
            scene_buffer.handle(),
            size_of::<SceneData>() as vk::DeviceSize,
            0,
            vk::DescriptorType::UNIFORM_BUFFER,
        );
        writer.update_set(device, set);
        Ok(set)
    }

    /// Dynamic rendering pass over the opaque then transparent lists
    fn draw_geometry(&mut self, cmd: vk::CommandBuffer, scene_set: vk::DescriptorSet) -> RenderResult<()> {
        let device = self.backend.device.handle();
        let targets = &self.backend.draw_targets;
        let extent = targets.extent();
        let draw_view = targets.draw_image.try_get()?.view();
        let depth_view = targets.depth.try_get()?.view();

        let clear = vk::ClearValue {
            color: vk::ClearColorValue {
                float32: self.backend.clear_color,
            },
        };
        let color_attachment = match targets.msaa_color.get() {
            Some(msaa) => vk::RenderingAttachmentInfo::builder()
                .image_view(msaa.view())
                .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .clear_value(clear)
                .resolve_mode(vk::ResolveModeFlags::AVERAGE)
                .resolve_image_view(draw_view)
                .resolve_image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .build(),
            None => vk::RenderingAttachmentInfo::builder()
                .image_view(draw_view)
                .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .load_op(vk::AttachmentLoadOp::LOAD)
                .store_op(vk::AttachmentStoreOp::STORE)
                .build(),
        };
        // Reversed-Z: far plane at 0.
        let depth_attachment = vk::RenderingAttachmentInfo::builder()
            .image_view(depth_view)
            .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .clear_value(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth: 0.0, stencil: 0 },
            });

        let color_attachments = [color_attachment];
        let render_area = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent,
        };
        let rendering_info = vk::RenderingInfo::builder()
            .render_area(render_area)
            .layer_count(1)
            .color_attachments(&color_attachments)
            .depth_attachment(&depth_attachment);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };

        unsafe {
            device.cmd_begin_rendering(cmd, &rendering_info);
            device.cmd_set_viewport(cmd, 0, &[viewport]);
            device.cmd_set_scissor(cmd, 0, &[render_area]);
        }

        let draw = self.draw;
        let mut state = BindState::default();
        let opaque = draw.opaque_draw_order().into_iter().map(|i| &draw.opaque[i]);
        for object in opaque.chain(&draw.transparent) {
            if object.index_buffer == vk::Buffer::null() || object.vertex_buffer == vk::Buffer::null() {
                log::trace!("Skipping draw without GPU buffers");
                continue;
            }
            state.bind(device, cmd, object, scene_set);
            let push = object.push_constants();
            unsafe {
                device.cmd_push_constants(
                    cmd,
                    object.material.pipeline.layout,
                    vk::ShaderStageFlags::VERTEX,
                    0,
                    bytemuck::bytes_of(&push),
                );
                device.cmd_draw_indexed(cmd, object.index_count, 1, object.first_index, 0, 0);
            }
            self.draw_calls += 1;
        }

        unsafe { device.cmd_end_rendering(cmd) };
        Ok(())
    }
}

/// Last bound state, so consecutive draws sharing it skip rebinding
#[derive(Default)]
struct BindState {
    pipeline: vk::Pipeline,
    material_set: vk::DescriptorSet,
    index_buffer: vk::Buffer,
    vertex_buffer: vk::Buffer,
}

impl BindState {
    fn bind(
        &mut self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        object: &RenderObject,
        scene_set: vk::DescriptorSet,
    ) {
        let material = &object.material;
        unsafe {
            if material.pipeline.pipeline != self.pipeline {
                device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, material.pipeline.pipeline);
                device.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    material.pipeline.layout,
                    0,
                    &[scene_set],
                    &[],
                );
                self.pipeline = material.pipeline.pipeline;
                self.material_set = vk::DescriptorSet::null();
            }
            if material.set != self.material_set {
                device.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    material.pipeline.layout,
                    1,
                    &[material.set],
                    &[],
                );
                self.material_set = material.set;
            }
            if object.index_buffer != self.index_buffer {
                device.cmd_bind_index_buffer(cmd, object.index_buffer, 0, vk::IndexType::UINT32);
                self.index_buffer = object.index_buffer;
            }
            if object.vertex_buffer != self.vertex_buffer {
                device.cmd_bind_vertex_buffers(cmd, 0, &[object.vertex_buffer], &[0]);
                self.vertex_buffer = object.vertex_buffer;
            }
        }
    }
}

impl FrameDriver for FrameRecorder<'_, '_> {
    fn wait_for_slot(&mut self, slot: usize) -> RenderResult<()> {
        let device = self.backend.device.handle();
        self.backend.frame_resources[slot].wait_and_reclaim(device)
    }

    fn acquire_image(&mut self, slot: usize) -> RenderResult<AcquireOutcome> {
        let signal = self.backend.frame_resources[slot].sync.image_available.raw();
        match self.backend.swapchain.try_get()?.acquire_next_image(signal) {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(result) => Err(RenderError::vulkan("vkAcquireNextImageKHR", result)),
        }
    }

    fn reset_slot_fence(&mut self, slot: usize) -> RenderResult<()> {
        let fence = self.backend.frame_resources[slot].sync.in_flight.raw();
        reset_fence(self.backend.device.handle(), fence)
    }

    fn record(&mut self, slot: usize, image_index: u32) -> RenderResult<()> {
        let device = self.backend.device.clone();
        let device = device.handle();
        let cmd = self.backend.frame_resources[slot].command_buffer;

        begin_one_time(device, cmd)?;
        let scene_set = self.write_scene(slot)?;

        let targets = &self.backend.draw_targets;
        let draw_image = targets.draw_image.try_get()?.handle();
        let draw_extent = targets.extent();
        let depth_image = targets.depth.try_get()?.handle();
        let msaa_image = targets.msaa_color.get().map(|image| image.handle());

        let clear = vk::ClearColorValue {
            float32: self.backend.clear_color,
        };
        let color_range = subresource_range(vk::ImageAspectFlags::COLOR, 0, 1);
        transition_color(device, cmd, draw_image, vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        unsafe {
            device.cmd_clear_color_image(
                cmd,
                draw_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &clear,
                &[color_range],
            );
        }
        transition_color(
            device,
            cmd,
            draw_image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );
        if let Some(msaa_image) = msaa_image {
            transition_color(
                device,
                cmd,
                msaa_image,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            );
        }
        transition_image(
            device,
            cmd,
            depth_image,
            subresource_range(vk::ImageAspectFlags::DEPTH, 0, 1),
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
        );

        self.draw_geometry(cmd, scene_set)?;

        let swapchain = self.backend.swapchain.try_get()?;
        let index = image_index as usize;
        let swapchain_image = swapchain.images()[index];
        let target = OverlayTarget {
            image: swapchain_image,
            view: swapchain.view(index),
            extent: swapchain.extent(),
            format: swapchain.format(),
        };

        transition_color(
            device,
            cmd,
            draw_image,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        );
        transition_color(
            device,
            cmd,
            swapchain_image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        blit_image(device, cmd, draw_image, swapchain_image, draw_extent, target.extent);

        transition_color(
            device,
            cmd,
            swapchain_image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );
        if let Some(overlay) = self.overlay.as_deref_mut() {
            overlay.record(device, cmd, target)?;
        }
        transition_color(
            device,
            cmd,
            swapchain_image,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        );

        end(device, cmd)
    }

    fn submit(&mut self, slot: usize) -> RenderResult<()> {
        let frame = &self.backend.frame_resources[slot];
        let wait_semaphores = [frame.sync.image_available.raw()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [frame.sync.render_finished.raw()];
        let command_buffers = [frame.command_buffer];
        let submit = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        let device = &self.backend.device;
        unsafe {
            device.handle().queue_submit(
                device.queue(QueueKind::Graphics),
                &[submit.build()],
                frame.sync.in_flight.raw(),
            )
        }
        .check("vkQueueSubmit")
    }

    fn abandon_frame(&mut self, slot: usize, fence_reset: bool) -> RenderResult<()> {
        // Empty batch: unsignals image_available and, if needed, re-signals the fence.
        let frame = &self.backend.frame_resources[slot];
        let wait_semaphores = [frame.sync.image_available.raw()];
        let wait_stages = [vk::PipelineStageFlags::ALL_COMMANDS];
        let submit = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages);
        let fence = if fence_reset {
            frame.sync.in_flight.raw()
        } else {
            vk::Fence::null()
        };

        let device = &self.backend.device;
        unsafe {
            device
                .handle()
                .queue_submit(device.queue(QueueKind::Graphics), &[submit.build()], fence)
        }
        .check("vkQueueSubmit (abandoned frame)")
    }

    fn present(&mut self, slot: usize, image_index: u32) -> RenderResult<PresentOutcome> {
        let wait = self.backend.frame_resources[slot].sync.render_finished.raw();
        let queue = self.backend.device.queue(QueueKind::Present);
        match self.backend.swapchain.try_get()?.present(queue, wait, image_index) {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(result) => Err(RenderError::vulkan("vkQueuePresentKHR", result)),
        }
    }

    fn recreate_swapchain(&mut self) -> RenderResult<()> {
        let extent = self.window.framebuffer_extent();
        self.backend.recreate_swapchain(extent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::vulkan::resources::descriptor_set::pool_sizes;

    #[test]
    fn test_retired_resources_wait_for_the_last_submitted_slot() {
        // Slot 0 was just submitted, so slot 1 is next.
        assert_eq!(retire_slot(1), 0);
        assert_eq!(retire_slot(0), FRAMES_IN_FLIGHT - 1);
        for slot in 0..FRAMES_IN_FLIGHT {
            assert!(retire_slot(slot) < FRAMES_IN_FLIGHT);
        }
    }

    #[test]
    fn test_material_pool_has_room_for_every_binding() {
        let sizes = pool_sizes(MATERIAL_DESCRIPTOR_SETS, &MATERIAL_DESCRIPTOR_RATIOS);
        let samplers = sizes
            .iter()
            .find(|size| size.ty == vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .map(|size| size.descriptor_count);
        assert_eq!(samplers, Some(MATERIAL_DESCRIPTOR_SETS * 2));
    }
}
