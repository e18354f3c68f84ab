//! Thin stateful layer over a [`GraphicsApi`]: typed resource handles, binding-state
//! tracking and redundant state elimination, lazily compiled shader variants and
//! render passes.

pub mod api;
pub mod buffer;
pub mod drawcall;
pub mod fullscreen;
pub mod headless;
pub mod parameters;
pub mod render_pass;
pub mod render_target;
pub mod shader;
pub mod texture;
pub mod wgpu_api;

use std::collections::HashMap;

pub use api::{
    AttributeBinding, BlendMode, BufferKind, Capabilities, ColorMask, CullFace, DataType, DepthFunc,
    Filter, GraphicsApi, IndexBinding, IndexType, PixelFormat, SamplerState, TextureData, TextureKind,
    Topology, Viewport, Wrap,
};
pub use buffer::Buffer;
pub use drawcall::{Drawcall, ShaderKey};
pub use parameters::{ParamValue, ShaderParameters};
pub use render_pass::{DrawRequest, RenderPass, RenderPassError};
pub use render_target::RenderTarget;
pub use shader::{Program, ShaderError, ShaderStage};
pub use texture::Texture;

use api::{FramebufferId, ProgramId, TextureId, VertexArrayId};

#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("{0} must be bound before it is modified")]
    NotBound(&'static str),
    #[error("buffer data changed while drawcall is still bound, unbind it first")]
    DrawcallStillBound,
    #[error("texture data must be set before its sampler")]
    TextureNotReady,
    #[error("{0} is not supported on this context")]
    Unsupported(&'static str),
    #[error("invalid attachment: {0}")]
    InvalidAttachment(String),
    #[error("texture data holds {actual} values, expected {expected}")]
    DataSize { expected: usize, actual: usize },
    #[error("texture data of type {data} does not match format {format:?}")]
    DataType { data: &'static str, format: PixelFormat },
}

/// Fixed-function state owned by a render pass and applied before its draws.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PipelineState {
    pub cull: CullFace,
    pub depth_func: DepthFunc,
    pub blend: BlendMode,
    pub depth_write: bool,
    pub color_write: ColorMask,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            cull: CullFace::Back,
            depth_func: DepthFunc::LessEqual,
            blend: BlendMode::Opaque,
            depth_write: true,
            color_write: ColorMask::ALL,
        }
    }
}

#[derive(Default)]
struct BindingState {
    texture: Option<TextureId>,
    units: HashMap<u32, Option<TextureId>>,
    program: Option<ProgramId>,
    drawcall: Option<u64>,
    framebuffer: Option<FramebufferId>,
    viewport: Option<Viewport>,
    pass_active: bool,
}

pub struct RenderContext {
    api: Box<dyn GraphicsApi>,
    capabilities: Capabilities,
    bound: BindingState,
    state: PipelineState,
    next_drawcall: u64,
}

impl RenderContext {
    pub fn new(mut api: Box<dyn GraphicsApi>) -> Self {
        let capabilities = api.capabilities();
        let state = PipelineState::default();
        api.cull_face(state.cull);
        api.depth_func(state.depth_func);
        api.blend_mode(state.blend);
        api.depth_write(state.depth_write);
        api.color_write(state.color_write);
        log::info!("render context created, reduced capability path: {}", capabilities.is_reduced());
        Self { api, capabilities, bound: BindingState::default(), state, next_drawcall: 0 }
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn surface_size(&self) -> (u32, u32) {
        self.api.surface_size()
    }

    pub fn resize_surface(&mut self, width: u32, height: u32) {
        self.api.resize_surface(width, height);
    }

    pub fn begin_frame(&mut self) -> bool {
        self.api.begin_frame()
    }

    pub fn end_frame(&mut self) {
        self.api.end_frame();
    }

    pub fn api(&mut self) -> &mut dyn GraphicsApi {
        self.api.as_mut()
    }

    pub fn create_vertex_buffer(&mut self) -> Buffer {
        Buffer::new(self, BufferKind::Vertex)
    }

    pub fn create_index_buffer(&mut self) -> Buffer {
        Buffer::new(self, BufferKind::Index)
    }

    pub fn create_texture(&mut self, kind: TextureKind) -> Texture {
        Texture::new(self, kind)
    }

    pub fn create_drawcall(&mut self, topology: Topology, vertex_count: u32) -> Drawcall {
        Drawcall::new(self, topology, vertex_count)
    }

    pub fn create_render_target(&mut self) -> RenderTarget {
        RenderTarget::new(self)
    }

    /// Applies only the fields that differ from the current state.
    pub fn apply_state(&mut self, state: &PipelineState) {
        if self.state.cull != state.cull {
            self.api.cull_face(state.cull);
        }
        if self.state.depth_func != state.depth_func {
            self.api.depth_func(state.depth_func);
        }
        if self.state.blend != state.blend {
            self.api.blend_mode(state.blend);
        }
        if self.state.depth_write != state.depth_write {
            self.api.depth_write(state.depth_write);
        }
        if self.state.color_write != state.color_write {
            self.api.color_write(state.color_write);
        }
        self.state = *state;
    }

    pub fn pipeline_state(&self) -> PipelineState {
        self.state
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        if self.bound.viewport != Some(viewport) {
            self.api.viewport(viewport);
            self.bound.viewport = Some(viewport);
        }
    }

    pub fn clear(&mut self, color: bool, depth: bool) {
        if color || depth {
            // Clears honour the write masks, so open them up first.
            if depth && !self.state.depth_write {
                self.api.depth_write(true);
                self.state.depth_write = true;
            }
            if color && self.state.color_write != ColorMask::ALL {
                self.api.color_write(ColorMask::ALL);
                self.state.color_write = ColorMask::ALL;
            }
            self.api.clear(color, depth);
        }
    }

    pub(crate) fn bind_texture(&mut self, unit: u32, texture: Option<TextureId>) {
        self.bound.texture = texture;
        let current = self.bound.units.get(&unit).copied().flatten();
        if current != texture || !self.bound.units.contains_key(&unit) {
            self.api.bind_texture(unit, texture);
            self.bound.units.insert(unit, texture);
        }
    }

    pub(crate) fn bound_texture(&self) -> Option<TextureId> {
        self.bound.texture
    }

    pub(crate) fn forget_texture(&mut self, texture: TextureId) {
        if self.bound.texture == Some(texture) {
            self.bound.texture = None;
        }
        for bound in self.bound.units.values_mut() {
            if *bound == Some(texture) {
                *bound = None;
            }
        }
    }

    pub(crate) fn use_program(&mut self, program: Option<ProgramId>) {
        if self.bound.program != program {
            self.api.use_program(program);
            self.bound.program = program;
        }
    }

    pub(crate) fn bound_program(&self) -> Option<ProgramId> {
        self.bound.program
    }

    pub(crate) fn allocate_drawcall_id(&mut self) -> u64 {
        self.next_drawcall += 1;
        self.next_drawcall
    }

    /// Tracks the drawcall being edited. Without vertex array support the default
    /// vertex array stays bound and attributes are re-issued on every draw.
    pub(crate) fn bind_drawcall(&mut self, drawcall: Option<u64>, vertex_array: Option<VertexArrayId>) {
        if self.capabilities.vertex_arrays {
            self.api.bind_vertex_array(vertex_array);
        }
        self.bound.drawcall = drawcall;
    }

    pub(crate) fn bound_drawcall(&self) -> Option<u64> {
        self.bound.drawcall
    }

    pub(crate) fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
        if self.bound.framebuffer != framebuffer {
            self.api.bind_framebuffer(framebuffer);
            self.bound.framebuffer = framebuffer;
        }
    }

    pub(crate) fn bound_framebuffer(&self) -> Option<FramebufferId> {
        self.bound.framebuffer
    }

    pub(crate) fn begin_pass(&mut self) -> bool {
        !std::mem::replace(&mut self.bound.pass_active, true)
    }

    pub(crate) fn end_pass(&mut self) {
        self.bound.pass_active = false;
    }
}
