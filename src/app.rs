use std::{sync::Arc, time::Instant};

use winit::{
    application::ApplicationHandler,
    dpi::{LogicalSize, PhysicalPosition},
    event::{ElementState, MouseButton, MouseScrollDelta, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

use crate::{
    assets::FileFetcher,
    camera::{DragMode, OrbitCamera},
    config::{ConfigError, ViewerConfig},
    ibl::{IblBaker, IblError, IblShaders},
    render_context::{
        wgpu_api::{BackendError, WgpuApi},
        RenderContext,
    },
    renderer::{Renderer, RendererError, RendererShaders},
    scene::SceneLoader,
};

#[derive(Debug, thiserror::Error)]
pub enum ViewerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("event loop: {0}")]
    EventLoop(#[from] winit::error::EventLoopError),
    #[error("failed to create window: {0}")]
    Window(#[from] winit::error::OsError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Ibl(#[from] IblError),
    #[error(transparent)]
    Renderer(#[from] RendererError),
}

/// Everything that needs a window and a device.
struct Viewer {
    window: Arc<Window>,
    ctx: RenderContext,
    fetcher: FileFetcher,
    loader: SceneLoader,
    baker: IblBaker,
    renderer: Renderer,
    camera: OrbitCamera,
    cursor: PhysicalPosition<f64>,
    started: Instant,
    last_frame: Instant,
    fitted: bool,
}

impl Viewer {
    fn new(window: Arc<Window>, config: &ViewerConfig, scene: &str) -> Result<Self, ViewerError> {
        let api = WgpuApi::new(window.clone(), config.window.force_reduced_path)?;
        let mut ctx = RenderContext::new(Box::new(api));
        let fetcher = FileFetcher::new(&config.assets.root, config.assets.io_threads);

        let mut loader = SceneLoader::new();
        loader.load(&fetcher, scene);
        let baker = IblBaker::new(
            &mut ctx,
            &fetcher,
            config.ibl.clone(),
            &IblShaders::in_dir(&config.assets.shaders),
            &config.assets.panorama,
        )?;
        let renderer = Renderer::new(
            &mut ctx,
            &fetcher,
            &RendererShaders::in_dir(&config.assets.shaders),
            config.camera.projection(),
        )?;

        let now = Instant::now();
        Ok(Self {
            window,
            ctx,
            fetcher,
            loader,
            baker,
            renderer,
            camera: OrbitCamera::new(config.camera.clone()),
            cursor: PhysicalPosition::new(0.0, 0.0),
            started: now,
            last_frame: now,
            fitted: false,
        })
    }

    fn frame(&mut self, config: &ViewerConfig) -> Result<(), ViewerError> {
        let now = Instant::now();
        let dt = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;

        if !self.loader.is_failed() {
            // fatal load errors are logged by the loader, the viewer keeps showing the environment
            let _ = self.loader.update(&mut self.ctx, &self.fetcher);
        }
        if self.loader.is_ready() && !self.fitted {
            if let Some(bounds) = self.loader.bounds() {
                self.camera.fit_bounds(&bounds);
            }
            self.fitted = true;
        }
        if let (true, Some(clip)) = (self.loader.is_ready(), config.animation.clip) {
            if clip < self.loader.clips().len() {
                let time = now.duration_since(self.started).as_secs_f32() * config.animation.speed;
                if let Err(error) = self.loader.set_animation(time, clip) {
                    log::warn!("{error}");
                }
            }
        }

        if !self.baker.is_done() && self.baker.update(&mut self.ctx)? {
            self.renderer.set_lighting(&mut self.ctx, self.baker.product())?;
        }

        self.renderer.set_view(self.camera.update(dt));
        if self.ctx.begin_frame() {
            let result = self.renderer.tick(&mut self.ctx, &self.loader);
            self.ctx.end_frame();
            result?;
        }
        Ok(())
    }

    fn destroy(self) {
        let Self { mut ctx, loader, baker, renderer, .. } = self;
        renderer.destroy(&mut ctx);
        baker.destroy(&mut ctx);
        loader.destroy(&mut ctx);
    }
}

struct App {
    config: ViewerConfig,
    scene: String,
    viewer: Option<Viewer>,
    error: Option<ViewerError>,
}

impl App {
    fn fail(&mut self, event_loop: &ActiveEventLoop, error: ViewerError) {
        log::error!("{error}");
        self.error = Some(error);
        if let Some(viewer) = self.viewer.take() {
            viewer.destroy();
        }
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.viewer.is_some() {
            return;
        }
        let attributes = Window::default_attributes()
            .with_title(self.config.window.title.clone())
            .with_inner_size(LogicalSize::new(self.config.window.width, self.config.window.height));
        let created = event_loop
            .create_window(attributes)
            .map_err(ViewerError::from)
            .and_then(|window| Viewer::new(Arc::new(window), &self.config, &self.scene));
        match created {
            Ok(viewer) => {
                viewer.window.request_redraw();
                self.viewer = Some(viewer);
            }
            Err(error) => self.fail(event_loop, error),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(viewer) = &mut self.viewer else {
            return;
        };
        match event {
            WindowEvent::CloseRequested => {
                if let Some(viewer) = self.viewer.take() {
                    viewer.destroy();
                }
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                viewer.ctx.resize_surface(size.width, size.height);
                viewer.window.request_redraw();
            }
            WindowEvent::CursorMoved { position, .. } => {
                viewer.cursor = position;
                if viewer.camera.is_dragging() {
                    viewer.camera.drag_to(position.x as f32, position.y as f32);
                }
            }
            WindowEvent::MouseInput { state, button, .. } => {
                let mode = match button {
                    MouseButton::Left => Some(DragMode::Rotate),
                    MouseButton::Middle | MouseButton::Right => Some(DragMode::Pan),
                    _ => None,
                };
                match (state, mode) {
                    (ElementState::Pressed, Some(mode)) => {
                        viewer.camera.begin_drag(mode, viewer.cursor.x as f32, viewer.cursor.y as f32);
                    }
                    (ElementState::Released, Some(_)) => viewer.camera.end_drag(),
                    _ => {}
                }
            }
            WindowEvent::MouseWheel { delta, .. } => {
                // scrolling towards the user zooms out
                let amount = match delta {
                    MouseScrollDelta::LineDelta(_, y) => -y * 100.0,
                    MouseScrollDelta::PixelDelta(position) => -position.y as f32,
                };
                viewer.camera.zoom(amount);
            }
            WindowEvent::RedrawRequested => {
                match viewer.frame(&self.config) {
                    Ok(()) => viewer.window.request_redraw(),
                    Err(error) => self.fail(event_loop, error),
                }
            }
            _ => {}
        }
    }
}

/// Opens the window and runs until it is closed. `scene` overrides the configured scene path.
pub fn run(config: ViewerConfig, scene: Option<String>) -> Result<(), ViewerError> {
    let scene = scene.unwrap_or_else(|| config.assets.scene.clone());
    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App { config, scene, viewer: None, error: None };
    event_loop.run_app(&mut app)?;
    match app.error {
        Some(error) => Err(error),
        None => Ok(()),
    }
}
