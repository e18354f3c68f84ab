use generational_arena::Index;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub Index);
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexArrayId(pub Index);
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub Index);
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FramebufferId(pub Index);
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub Index);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Vertex,
    Index,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataType {
    Byte,
    UnsignedByte,
    Short,
    UnsignedShort,
    UnsignedInt,
    Float,
}

impl DataType {
    pub fn size(self) -> u32 {
        match self {
            DataType::Byte | DataType::UnsignedByte => 1,
            DataType::Short | DataType::UnsignedShort => 2,
            DataType::UnsignedInt | DataType::Float => 4,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IndexType {
    U8,
    U16,
    U32,
}

impl IndexType {
    pub fn size(self) -> u32 {
        match self {
            IndexType::U8 => 1,
            IndexType::U16 => 2,
            IndexType::U32 => 4,
        }
    }
}

/// One vertex attribute stream. Offsets are relative to the start of `buffer`.
#[derive(Clone, Debug, PartialEq)]
pub struct AttributeBinding {
    pub buffer: BufferId,
    pub components: u32,
    pub data_type: DataType,
    pub normalized: bool,
    /// Zero means tightly packed.
    pub byte_stride: u32,
    pub byte_offset: u32,
}

impl AttributeBinding {
    pub fn element_size(&self) -> u32 {
        self.components * self.data_type.size()
    }

    pub fn stride(&self) -> u32 {
        if self.byte_stride == 0 { self.element_size() } else { self.byte_stride }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct IndexBinding {
    pub buffer: BufferId,
    pub index_type: IndexType,
    pub byte_offset: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Topology {
    Points,
    Lines,
    LineLoop,
    LineStrip,
    Triangles,
    TriangleStrip,
    TriangleFan,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrawCommand {
    pub topology: Topology,
    pub count: u32,
    /// Index type and byte offset into the bound index buffer for indexed draws.
    pub indices: Option<(IndexType, u32)>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureKind {
    D2,
    Cube,
}

impl TextureKind {
    pub fn faces(self) -> u32 {
        match self {
            TextureKind::D2 => 1,
            TextureKind::Cube => 6,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    R8,
    Rgb8,
    Rgba8,
    Srgba8,
    R16F,
    Rgb16F,
    Rgba16F,
    R11G11B10F,
    Depth,
}

impl PixelFormat {
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::R8 | PixelFormat::R16F | PixelFormat::Depth => 1,
            PixelFormat::Rgb8 | PixelFormat::Rgb16F | PixelFormat::R11G11B10F => 3,
            PixelFormat::Rgba8 | PixelFormat::Srgba8 | PixelFormat::Rgba16F => 4,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(
            self,
            PixelFormat::R16F | PixelFormat::Rgb16F | PixelFormat::Rgba16F | PixelFormat::R11G11B10F
        )
    }

    pub fn is_depth(self) -> bool {
        self == PixelFormat::Depth
    }
}

/// Texel payload. Float formats accept `F32` or pre-encoded half floats in `F16`.
#[derive(Clone, Copy, Debug)]
pub enum TextureData<'a> {
    U8(&'a [u8]),
    F16(&'a [u16]),
    F32(&'a [f32]),
}

impl TextureData<'_> {
    pub fn len(&self) -> usize {
        match self {
            TextureData::U8(data) => data.len(),
            TextureData::F16(data) => data.len(),
            TextureData::F32(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Upload of a single face/level. Level 0 of face 0 (re)allocates storage when the
/// size or format changes.
#[derive(Clone, Copy, Debug)]
pub struct TextureImage<'a> {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub face: u32,
    pub level: u32,
    pub data: Option<TextureData<'a>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Filter {
    Point,
    Bilinear,
    Trilinear,
    Anisotropic,
}

impl Filter {
    pub fn is_mipmapped(self) -> bool {
        matches!(self, Filter::Trilinear | Filter::Anisotropic)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Wrap {
    Repeat,
    Clamp,
    Mirror,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SamplerState {
    pub filter: Filter,
    pub wrap: Wrap,
}

impl Default for SamplerState {
    fn default() -> Self {
        Self { filter: Filter::Bilinear, wrap: Wrap::Clamp }
    }
}

/// Faces follow the +X, -X, +Y, -Y, +Z, -Z order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ColorAttachment {
    pub texture: TextureId,
    pub face: u32,
    pub level: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CullFace {
    None,
    Front,
    Back,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DepthFunc {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlendMode {
    Opaque,
    Alpha,
    Additive,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ColorMask(pub u8);

impl ColorMask {
    pub const R: u8 = 8;
    pub const G: u8 = 4;
    pub const B: u8 = 2;
    pub const A: u8 = 1;
    pub const ALL: ColorMask = ColorMask(0xf);
    pub const NONE: ColorMask = ColorMask(0);
}

/// Feature set of the execution target. Anything short of `FULL` takes the reduced path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Capabilities {
    pub float_textures: bool,
    pub vertex_arrays: bool,
    pub uint32_indices: bool,
    pub max_color_attachments: u32,
    pub npot_mipmaps: bool,
    /// Row 0 of a rendered texture is the top of the image.
    pub texture_origin_top: bool,
    /// Clip space depth runs from 0 to 1 instead of -1 to 1.
    pub depth_zero_to_one: bool,
}

impl Capabilities {
    pub const FULL: Capabilities = Capabilities {
        float_textures: true,
        vertex_arrays: true,
        uint32_indices: true,
        max_color_attachments: 8,
        npot_mipmaps: true,
        texture_origin_top: false,
        depth_zero_to_one: false,
    };

    pub const REDUCED: Capabilities = Capabilities {
        float_textures: false,
        vertex_arrays: false,
        uint32_indices: false,
        max_color_attachments: 1,
        npot_mipmaps: false,
        texture_origin_top: false,
        depth_zero_to_one: false,
    };

    pub fn is_reduced(&self) -> bool {
        !(self.float_textures && self.vertex_arrays && self.uint32_indices && self.npot_mipmaps)
            || self.max_color_attachments < 2
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockLayout {
    pub binding: u32,
    pub size: u32,
}

/// Texture uniform as seen by the backend: the texture unit it reads from and
/// where the texture and its sampler live in the bind group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextureSlot {
    pub name: String,
    pub unit: u32,
    pub kind: TextureKind,
    pub texture_binding: u32,
    pub sampler_binding: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProgramLayout {
    pub blocks: Vec<BlockLayout>,
    pub textures: Vec<TextureSlot>,
    pub vertex_inputs: Vec<u32>,
}

pub struct ProgramSource<'a> {
    pub label: &'a str,
    pub vertex: &'a naga::Module,
    pub fragment: &'a naga::Module,
    pub layout: &'a ProgramLayout,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UniformLocation {
    pub block: u32,
    pub offset: u32,
}

/// Stateful rasterization context. Vertex attribute and index bindings go to the bound
/// vertex array (or the default one when none is bound), uniforms are per program, texture
/// units and fixed-function state are global.
pub trait GraphicsApi {
    fn capabilities(&self) -> Capabilities;
    fn surface_size(&self) -> (u32, u32);
    fn resize_surface(&mut self, width: u32, height: u32);
    /// Returns false when no surface image is available this frame.
    fn begin_frame(&mut self) -> bool;
    fn end_frame(&mut self);

    fn create_buffer(&mut self, kind: BufferKind) -> BufferId;
    fn buffer_data(&mut self, buffer: BufferId, data: &[u8]);
    fn delete_buffer(&mut self, buffer: BufferId);

    fn create_vertex_array(&mut self) -> VertexArrayId;
    fn bind_vertex_array(&mut self, vertex_array: Option<VertexArrayId>);
    fn vertex_attribute(&mut self, location: u32, binding: &AttributeBinding);
    fn index_buffer(&mut self, binding: Option<&IndexBinding>);
    fn delete_vertex_array(&mut self, vertex_array: VertexArrayId);

    fn create_texture(&mut self, kind: TextureKind) -> TextureId;
    fn bind_texture(&mut self, unit: u32, texture: Option<TextureId>);
    fn texture_image(&mut self, texture: TextureId, image: &TextureImage<'_>);
    fn texture_sampler(&mut self, texture: TextureId, sampler: &SamplerState);
    fn generate_mipmaps(&mut self, texture: TextureId);
    fn delete_texture(&mut self, texture: TextureId);

    fn create_framebuffer(&mut self) -> FramebufferId;
    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>);
    fn color_attachments(&mut self, framebuffer: FramebufferId, attachments: &[ColorAttachment]);
    fn depth_attachment(&mut self, framebuffer: FramebufferId, texture: Option<TextureId>);
    fn delete_framebuffer(&mut self, framebuffer: FramebufferId);

    /// Link step. The error string is the backend's diagnostic log.
    fn create_program(&mut self, source: &ProgramSource<'_>) -> Result<ProgramId, String>;
    fn use_program(&mut self, program: Option<ProgramId>);
    fn uniform(&mut self, program: ProgramId, location: UniformLocation, bytes: &[u8]);
    fn delete_program(&mut self, program: ProgramId);

    fn viewport(&mut self, viewport: Viewport);
    fn cull_face(&mut self, cull: CullFace);
    fn depth_func(&mut self, func: DepthFunc);
    fn blend_mode(&mut self, blend: BlendMode);
    fn depth_write(&mut self, enabled: bool);
    fn color_write(&mut self, mask: ColorMask);
    fn clear(&mut self, color: bool, depth: bool);
    fn draw(&mut self, command: &DrawCommand);
}
