//! Model viewer
//!
//! Opens a window, uploads a textured cube and draws a small scene graph of
//! spinning cubes with one transparent instance. An optional first argument
//! names a TOML or RON renderer configuration file.

use nalgebra::{Matrix4, Point3, Vector3, Vector4};
use rust_renderer::config::ConfigError;
use rust_renderer::platform::WindowError;
use rust_renderer::prelude::*;
use rust_renderer::render::backends::vulkan::resources::{Owned, Texture, TextureOptions};
use rust_renderer::render::backends::vulkan::state::FrameOutcome;
use rust_renderer::render::scene::{MaterialConstants, MeshAsset, NodeKey, SceneData};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
enum ViewerError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("window: {0}")]
    Window(#[from] WindowError),
    #[error(transparent)]
    Render(#[from] RenderError),
}

/// Cube faces as (normal, u axis, v axis)
const CUBE_FACES: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
    ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
    ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
    ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
    ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
    ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
    ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
];

/// Unit cube with per-face normals and UVs
fn cube_mesh() -> RenderResult<MeshData> {
    let mut positions = Vec::with_capacity(24 * 3);
    let mut normals = Vec::with_capacity(24 * 3);
    let mut uvs = Vec::with_capacity(24 * 2);
    let mut tangents = Vec::with_capacity(24 * 3);
    let mut bitangents = Vec::with_capacity(24 * 3);
    let mut indices = Vec::with_capacity(36);

    for (face, (n, u, v)) in CUBE_FACES.iter().enumerate() {
        let base = (face * 4) as u32;
        for (su, sv) in [(-1.0f32, -1.0f32), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            for axis in 0..3 {
                positions.push(0.5 * (n[axis] + su * u[axis] + sv * v[axis]));
            }
            normals.extend_from_slice(n);
            uvs.extend_from_slice(&[(su + 1.0) * 0.5, (1.0 - sv) * 0.5]);
            tangents.extend_from_slice(u);
            bitangents.extend_from_slice(v);
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    MeshData::from_spans(&positions, &normals, &uvs, &tangents, &bitangents, &indices)
}

/// Vulkan-style reversed-Z perspective: near maps to depth 1, far to 0
fn reversed_z_perspective(fovy: f32, aspect: f32, near: f32, far: f32) -> Matrix4<f32> {
    let f = 1.0 / (fovy * 0.5).tan();
    let a = near / (far - near);
    let b = near * far / (far - near);
    Matrix4::new(
        f / aspect, 0.0, 0.0, 0.0,
        0.0, -f, 0.0, 0.0,
        0.0, 0.0, a, b,
        0.0, 0.0, -1.0, 0.0,
    )
}

struct ViewerScene {
    graph: SceneGraph,
    spinner: NodeKey,
    orbiter: NodeKey,
}

impl ViewerScene {
    fn new(opaque: Arc<MeshAsset>, glass: Arc<MeshAsset>) -> RenderResult<Self> {
        let mut graph = SceneGraph::new();
        let spinner = graph.add_node(None, Matrix4::identity(), Some(Arc::clone(&opaque)))?;
        let orbiter = graph.add_node(Some(spinner), Matrix4::identity(), Some(opaque))?;
        graph.add_node(
            Some(orbiter),
            Matrix4::new_translation(&Vector3::new(0.0, 1.2, 0.0)) * Matrix4::new_scaling(0.6),
            Some(glass),
        )?;
        Ok(Self {
            graph,
            spinner,
            orbiter,
        })
    }

    fn animate(&mut self, seconds: f32) {
        let spin = Matrix4::from_euler_angles(seconds * 0.3, seconds * 0.7, 0.0);
        let orbit = Matrix4::new_translation(&Vector3::new(2.5, 0.0, 0.0))
            * Matrix4::new_rotation(Vector3::y() * seconds * 1.5)
            * Matrix4::new_scaling(0.5);
        self.graph.set_local_transform(self.spinner, spin);
        self.graph.set_local_transform(self.orbiter, orbit);
        self.graph.update_transforms();
    }
}

struct ModelViewer {
    // Declared first so GPU resources below are released before the renderer.
    scene: ViewerScene,
    textures: Vec<Owned<Texture>>,
    renderer: RendererBackend,
    window: GlfwWindow,
    start_time: Instant,
    last_title_update: Instant,
}

impl ModelViewer {
    fn new(config: RendererConfig) -> Result<Self, ViewerError> {
        let window = GlfwWindow::new(&config.application_name, config.window_width, config.window_height)?;
        let context = EngineContext::new(config);
        let mut renderer = RendererBackend::new(&context, &window)?;

        let checker = renderer.upload_texture(
            &ImageData::checkerboard(64, [230, 230, 230, 255], [90, 120, 200, 255]),
            TextureOptions::default(),
        )?;
        let white = renderer.upload_texture(
            &ImageData::solid_color(1, 1, [255, 255, 255, 255]),
            TextureOptions::nearest(),
        )?;
        let solid = renderer.create_material(
            MaterialPass::Opaque,
            &MaterialConstants::new([1.0, 1.0, 1.0, 1.0], 0.0, 0.8),
            checker.try_get()?,
            white.try_get()?,
        )?;
        let glass = renderer.create_material(
            MaterialPass::Transparent,
            &MaterialConstants::new([0.4, 0.8, 1.0, 0.4], 0.0, 0.1),
            white.try_get()?,
            white.try_get()?,
        )?;

        let mesh = cube_mesh()?;
        let index_count = mesh.indices.len() as u32;
        let opaque = Arc::new(MeshAsset::single_surface(
            "cube",
            renderer.upload_mesh(&mesh)?,
            index_count,
            Some(solid),
        ));
        let glass_mesh = Arc::new(MeshAsset::single_surface(
            "glass_cube",
            renderer.upload_mesh(&mesh)?,
            index_count,
            Some(glass),
        ));

        let now = Instant::now();
        Ok(Self {
            scene: ViewerScene::new(opaque, glass_mesh)?,
            textures: vec![checker, white],
            renderer,
            window,
            start_time: now,
            last_title_update: now,
        })
    }

    /// Draw until the window closes, then drain the GPU even if a frame failed
    fn run(&mut self) -> Result<(), ViewerError> {
        let frames = self.run_frames();
        let idle = self.renderer.wait_idle();
        settle(frames, idle)
    }

    fn run_frames(&mut self) -> Result<(), ViewerError> {
        while !self.window.should_close() {
            self.window.poll_events();
            if self.window.take_resized() {
                self.renderer.notify_resized();
            }

            let seconds = self.start_time.elapsed().as_secs_f32();
            self.scene.animate(seconds);
            let draw = self.build_draw_context();

            match self.renderer.render(&self.window, &draw, None)? {
                FrameOutcome::Minimized => {
                    self.window.wait_events();
                }
                _ => self.update_title(),
            }
        }
        Ok(())
    }

    fn build_draw_context(&self) -> DrawContext {
        let extent = self.renderer.swapchain_extent();
        let aspect = if extent.height == 0 {
            1.0
        } else {
            extent.width as f32 / extent.height as f32
        };
        let view = Matrix4::look_at_rh(
            &Point3::new(0.0, 2.0, 6.0),
            &Point3::origin(),
            &Vector3::y(),
        );
        let proj = reversed_z_perspective(60f32.to_radians(), aspect, 0.1, 100.0);
        let scene = SceneData::new(&view, &proj).with_lighting(
            Vector4::new(0.15, 0.15, 0.18, 1.0),
            Vector3::new(0.4, 1.0, 0.6),
            1.2,
            Vector4::new(1.0, 0.95, 0.85, 1.0),
        );

        let mut draw = DrawContext::new(scene);
        self.scene.graph.draw(self.renderer.default_material(), &mut draw);
        draw
    }

    fn update_title(&mut self) {
        if self.last_title_update.elapsed() < Duration::from_secs(1) {
            return;
        }
        self.last_title_update = Instant::now();
        let stats = self.renderer.stats();
        let title = format!(
            "Model Viewer - frame {} | {} draws | {} tris | {} recreations",
            stats.frame_number, stats.draw_calls, stats.triangles, stats.recreations
        );
        self.window.set_title(&title);
    }
}

fn load_config() -> Result<RendererConfig, ViewerError> {
    let mut config = match std::env::args().nth(1) {
        Some(path) => RendererConfig::load_from_file(&path)?,
        None => RendererConfig::default(),
    };
    if config.application_name == RendererConfig::default().application_name {
        config.application_name = "Model Viewer".to_string();
    }
    config.error_mode = ErrorMode::Raise;
    Ok(config)
}

impl Drop for ModelViewer {
    fn drop(&mut self) {
        // Scene buffers and textures drop before the renderer; nothing may still read them.
        if let Err(e) = self.renderer.wait_idle() {
            log::warn!("Device idle wait failed during viewer teardown: {}", e);
        }
    }
}

/// Frame loop result with the idle wait folded in; a frame error wins
fn settle(frames: Result<(), ViewerError>, idle: RenderResult<()>) -> Result<(), ViewerError> {
    match (frames, idle) {
        (Err(e), Err(idle_error)) => {
            log::warn!("Device idle wait failed after frame error: {}", idle_error);
            Err(e)
        }
        (Err(e), Ok(())) => Err(e),
        (Ok(()), idle) => idle.map_err(ViewerError::from),
    }
}

fn main() {
    let result = load_config().and_then(|config| {
        let mut viewer = ModelViewer::new(config)?;
        log::info!("Model viewer running; press Escape to quit");
        viewer.run()
    });

    if let Err(e) = result {
        log::error!("Model viewer failed: {}", e);
        eprintln!("Model viewer failed: {e}");
        std::process::exit(1);
    }
    log::info!("Model viewer exited cleanly");
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_settle_keeps_frame_error_over_idle_error() {
        let frames = Err(ViewerError::Render(RenderError::generic("record failed")));
        let idle = Err(RenderError::generic("device lost"));
        let err = settle(frames, idle).unwrap_err();
        assert!(err.to_string().contains("record failed"));

        let err = settle(Ok(()), Err(RenderError::generic("device lost"))).unwrap_err();
        assert!(err.to_string().contains("device lost"));

        assert!(settle(Ok(()), Ok(())).is_ok());
    }

    #[test]
    fn test_cube_mesh_has_six_faces() {
        let mesh = cube_mesh().unwrap();
        assert_eq!(mesh.vertices.len(), 24);
        assert_eq!(mesh.indices.len(), 36);
        for vertex in &mesh.vertices {
            assert!(vertex.position.iter().all(|c| c.abs() <= 0.5 + f32::EPSILON));
        }
    }

    #[test]
    fn test_reversed_z_maps_near_to_one_and_far_to_zero() {
        let proj = reversed_z_perspective(1.0, 1.0, 0.1, 100.0);
        let depth = |z: f32| {
            let clip = proj * Vector4::new(0.0, 0.0, z, 1.0);
            clip.z / clip.w
        };
        assert_relative_eq!(depth(-0.1), 1.0, epsilon = 1e-5);
        assert_relative_eq!(depth(-100.0), 0.0, epsilon = 1e-5);
    }
}
