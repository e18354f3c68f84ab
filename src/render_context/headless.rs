//! Recording backend without a GPU. Every call lands in a shared log that a
//! [`HeadlessProbe`] can inspect, which is how the render layers are tested.

use std::{cell::RefCell, rc::Rc};

use generational_arena::Arena;

use super::api::{
    AttributeBinding, BlendMode, BufferId, BufferKind, Capabilities, ColorAttachment, ColorMask,
    CullFace, DepthFunc, DrawCommand, FramebufferId, GraphicsApi, IndexBinding, PixelFormat,
    ProgramId, ProgramLayout, ProgramSource, SamplerState, TextureData, TextureId, TextureImage,
    TextureKind, UniformLocation, VertexArrayId, Viewport,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PayloadKind {
    U8,
    F16,
    F32,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ApiCall {
    BeginFrame,
    EndFrame,
    CreateBuffer(BufferId, BufferKind),
    BufferData { buffer: BufferId, len: usize },
    DeleteBuffer(BufferId),
    CreateVertexArray(VertexArrayId),
    BindVertexArray(Option<VertexArrayId>),
    VertexAttribute { location: u32, binding: AttributeBinding },
    IndexBuffer(Option<IndexBinding>),
    DeleteVertexArray(VertexArrayId),
    CreateTexture(TextureId, TextureKind),
    BindTexture { unit: u32, texture: Option<TextureId> },
    TextureImage {
        texture: TextureId,
        width: u32,
        height: u32,
        format: PixelFormat,
        face: u32,
        level: u32,
        payload: Option<(PayloadKind, usize)>,
    },
    TextureSampler { texture: TextureId, sampler: SamplerState },
    GenerateMipmaps(TextureId),
    DeleteTexture(TextureId),
    CreateFramebuffer(FramebufferId),
    BindFramebuffer(Option<FramebufferId>),
    ColorAttachments { framebuffer: FramebufferId, attachments: Vec<ColorAttachment> },
    DepthAttachment { framebuffer: FramebufferId, texture: Option<TextureId> },
    DeleteFramebuffer(FramebufferId),
    CreateProgram(ProgramId),
    UseProgram(Option<ProgramId>),
    Uniform { program: ProgramId, location: UniformLocation, bytes: Vec<u8> },
    DeleteProgram(ProgramId),
    Viewport(Viewport),
    CullFace(CullFace),
    DepthFunc(DepthFunc),
    BlendMode(BlendMode),
    DepthWrite(bool),
    ColorWrite(ColorMask),
    Clear { color: bool, depth: bool },
    Draw(DrawCommand),
}

#[derive(Clone, Debug, PartialEq)]
pub struct DrawRecord {
    pub program: Option<ProgramId>,
    pub framebuffer: Option<FramebufferId>,
    pub color_attachments: Vec<ColorAttachment>,
    pub textures: Vec<(u32, Option<TextureId>)>,
    pub command: DrawCommand,
}

#[derive(Default)]
struct FramebufferRecord {
    colors: Vec<ColorAttachment>,
}

struct HeadlessState {
    capabilities: Capabilities,
    surface: (u32, u32),
    calls: Vec<ApiCall>,
    draws: Vec<DrawRecord>,
    buffers: Arena<BufferKind>,
    vertex_arrays: Arena<()>,
    textures: Arena<TextureKind>,
    framebuffers: Arena<FramebufferRecord>,
    programs: Arena<ProgramLayout>,
    units: Vec<(u32, Option<TextureId>)>,
    program: Option<ProgramId>,
    framebuffer: Option<FramebufferId>,
    fail_links: bool,
}

pub struct HeadlessApi {
    state: Rc<RefCell<HeadlessState>>,
}

#[derive(Clone)]
pub struct HeadlessProbe {
    state: Rc<RefCell<HeadlessState>>,
}

impl HeadlessApi {
    pub fn new(capabilities: Capabilities) -> (Self, HeadlessProbe) {
        let state = Rc::new(RefCell::new(HeadlessState {
            capabilities,
            surface: (640, 480),
            calls: Vec::new(),
            draws: Vec::new(),
            buffers: Arena::new(),
            vertex_arrays: Arena::new(),
            textures: Arena::new(),
            framebuffers: Arena::new(),
            programs: Arena::new(),
            units: Vec::new(),
            program: None,
            framebuffer: None,
            fail_links: false,
        }));
        (Self { state: state.clone() }, HeadlessProbe { state })
    }

    fn record(&self, call: ApiCall) {
        self.state.borrow_mut().calls.push(call);
    }
}

impl HeadlessProbe {
    pub fn calls(&self) -> Vec<ApiCall> {
        self.state.borrow().calls.clone()
    }

    pub fn clear_calls(&self) {
        let mut state = self.state.borrow_mut();
        state.calls.clear();
        state.draws.clear();
    }

    pub fn draws(&self) -> Vec<DrawRecord> {
        self.state.borrow().draws.clone()
    }

    pub fn draw_count(&self) -> usize {
        self.state.borrow().draws.len()
    }

    pub fn count(&self, matches: impl Fn(&ApiCall) -> bool) -> usize {
        self.state.borrow().calls.iter().filter(|call| matches(call)).count()
    }

    pub fn live_buffers(&self) -> usize {
        self.state.borrow().buffers.len()
    }

    pub fn live_textures(&self) -> usize {
        self.state.borrow().textures.len()
    }

    pub fn live_framebuffers(&self) -> usize {
        self.state.borrow().framebuffers.len()
    }

    pub fn live_programs(&self) -> usize {
        self.state.borrow().programs.len()
    }

    pub fn live_vertex_arrays(&self) -> usize {
        self.state.borrow().vertex_arrays.len()
    }

    pub fn program_layout(&self, program: ProgramId) -> Option<ProgramLayout> {
        self.state.borrow().programs.get(program.0).cloned()
    }

    /// Makes every following link step fail.
    pub fn fail_links(&self, fail: bool) {
        self.state.borrow_mut().fail_links = fail;
    }

    pub fn set_surface_size(&self, width: u32, height: u32) {
        self.state.borrow_mut().surface = (width, height);
    }
}

fn payload(data: &Option<TextureData<'_>>) -> Option<(PayloadKind, usize)> {
    data.map(|data| match data {
        TextureData::U8(values) => (PayloadKind::U8, values.len()),
        TextureData::F16(values) => (PayloadKind::F16, values.len()),
        TextureData::F32(values) => (PayloadKind::F32, values.len()),
    })
}

impl GraphicsApi for HeadlessApi {
    fn capabilities(&self) -> Capabilities {
        self.state.borrow().capabilities
    }

    fn surface_size(&self) -> (u32, u32) {
        self.state.borrow().surface
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        self.state.borrow_mut().surface = (width, height);
    }

    fn begin_frame(&mut self) -> bool {
        self.record(ApiCall::BeginFrame);
        true
    }

    fn end_frame(&mut self) {
        self.record(ApiCall::EndFrame);
    }

    fn create_buffer(&mut self, kind: BufferKind) -> BufferId {
        let id = BufferId(self.state.borrow_mut().buffers.insert(kind));
        self.record(ApiCall::CreateBuffer(id, kind));
        id
    }

    fn buffer_data(&mut self, buffer: BufferId, data: &[u8]) {
        self.record(ApiCall::BufferData { buffer, len: data.len() });
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        self.state.borrow_mut().buffers.remove(buffer.0);
        self.record(ApiCall::DeleteBuffer(buffer));
    }

    fn create_vertex_array(&mut self) -> VertexArrayId {
        let id = VertexArrayId(self.state.borrow_mut().vertex_arrays.insert(()));
        self.record(ApiCall::CreateVertexArray(id));
        id
    }

    fn bind_vertex_array(&mut self, vertex_array: Option<VertexArrayId>) {
        self.record(ApiCall::BindVertexArray(vertex_array));
    }

    fn vertex_attribute(&mut self, location: u32, binding: &AttributeBinding) {
        self.record(ApiCall::VertexAttribute { location, binding: binding.clone() });
    }

    fn index_buffer(&mut self, binding: Option<&IndexBinding>) {
        self.record(ApiCall::IndexBuffer(binding.cloned()));
    }

    fn delete_vertex_array(&mut self, vertex_array: VertexArrayId) {
        self.state.borrow_mut().vertex_arrays.remove(vertex_array.0);
        self.record(ApiCall::DeleteVertexArray(vertex_array));
    }

    fn create_texture(&mut self, kind: TextureKind) -> TextureId {
        let id = TextureId(self.state.borrow_mut().textures.insert(kind));
        self.record(ApiCall::CreateTexture(id, kind));
        id
    }

    fn bind_texture(&mut self, unit: u32, texture: Option<TextureId>) {
        {
            let mut state = self.state.borrow_mut();
            state.units.retain(|(bound, _)| *bound != unit);
            state.units.push((unit, texture));
            state.units.sort_by_key(|(unit, _)| *unit);
        }
        self.record(ApiCall::BindTexture { unit, texture });
    }

    fn texture_image(&mut self, texture: TextureId, image: &TextureImage<'_>) {
        self.record(ApiCall::TextureImage {
            texture,
            width: image.width,
            height: image.height,
            format: image.format,
            face: image.face,
            level: image.level,
            payload: payload(&image.data),
        });
    }

    fn texture_sampler(&mut self, texture: TextureId, sampler: &SamplerState) {
        self.record(ApiCall::TextureSampler { texture, sampler: *sampler });
    }

    fn generate_mipmaps(&mut self, texture: TextureId) {
        self.record(ApiCall::GenerateMipmaps(texture));
    }

    fn delete_texture(&mut self, texture: TextureId) {
        self.state.borrow_mut().textures.remove(texture.0);
        self.record(ApiCall::DeleteTexture(texture));
    }

    fn create_framebuffer(&mut self) -> FramebufferId {
        let id = FramebufferId(self.state.borrow_mut().framebuffers.insert(FramebufferRecord::default()));
        self.record(ApiCall::CreateFramebuffer(id));
        id
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
        self.state.borrow_mut().framebuffer = framebuffer;
        self.record(ApiCall::BindFramebuffer(framebuffer));
    }

    fn color_attachments(&mut self, framebuffer: FramebufferId, attachments: &[ColorAttachment]) {
        if let Some(record) = self.state.borrow_mut().framebuffers.get_mut(framebuffer.0) {
            record.colors = attachments.to_vec();
        }
        self.record(ApiCall::ColorAttachments { framebuffer, attachments: attachments.to_vec() });
    }

    fn depth_attachment(&mut self, framebuffer: FramebufferId, texture: Option<TextureId>) {
        self.record(ApiCall::DepthAttachment { framebuffer, texture });
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        self.state.borrow_mut().framebuffers.remove(framebuffer.0);
        self.record(ApiCall::DeleteFramebuffer(framebuffer));
    }

    fn create_program(&mut self, source: &ProgramSource<'_>) -> Result<ProgramId, String> {
        if self.state.borrow().fail_links {
            return Err(format!("{}: link failed", source.label));
        }
        let id = ProgramId(self.state.borrow_mut().programs.insert(source.layout.clone()));
        self.record(ApiCall::CreateProgram(id));
        Ok(id)
    }

    fn use_program(&mut self, program: Option<ProgramId>) {
        self.state.borrow_mut().program = program;
        self.record(ApiCall::UseProgram(program));
    }

    fn uniform(&mut self, program: ProgramId, location: UniformLocation, bytes: &[u8]) {
        self.record(ApiCall::Uniform { program, location, bytes: bytes.to_vec() });
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.state.borrow_mut().programs.remove(program.0);
        self.record(ApiCall::DeleteProgram(program));
    }

    fn viewport(&mut self, viewport: Viewport) {
        self.record(ApiCall::Viewport(viewport));
    }

    fn cull_face(&mut self, cull: CullFace) {
        self.record(ApiCall::CullFace(cull));
    }

    fn depth_func(&mut self, func: DepthFunc) {
        self.record(ApiCall::DepthFunc(func));
    }

    fn blend_mode(&mut self, blend: BlendMode) {
        self.record(ApiCall::BlendMode(blend));
    }

    fn depth_write(&mut self, enabled: bool) {
        self.record(ApiCall::DepthWrite(enabled));
    }

    fn color_write(&mut self, mask: ColorMask) {
        self.record(ApiCall::ColorWrite(mask));
    }

    fn clear(&mut self, color: bool, depth: bool) {
        self.record(ApiCall::Clear { color, depth });
    }

    fn draw(&mut self, command: &DrawCommand) {
        let mut state = self.state.borrow_mut();
        let color_attachments = state
            .framebuffer
            .and_then(|framebuffer| state.framebuffers.get(framebuffer.0))
            .map(|record| record.colors.clone())
            .unwrap_or_default();
        let record = DrawRecord {
            program: state.program,
            framebuffer: state.framebuffer,
            color_attachments,
            textures: state.units.clone(),
            command: *command,
        };
        state.draws.push(record);
        state.calls.push(ApiCall::Draw(*command));
    }
}
