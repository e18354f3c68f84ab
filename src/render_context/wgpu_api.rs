//! [`GraphicsApi`] on top of wgpu. Bindings and fixed-function state are tracked
//! here and resolved into cached render pipelines and per-draw bind groups when a
//! draw is issued.

use std::{
    borrow::Cow,
    collections::{HashMap, HashSet},
    sync::Arc,
};

use generational_arena::Arena;
use half::f16;
use pollster::FutureExt as _;
use wgpu::util::DeviceExt;
use winit::window::Window;

use super::{
    api::{
        AttributeBinding, BlendMode, BufferId, BufferKind, Capabilities, ColorAttachment, ColorMask,
        CullFace, DataType, DepthFunc, DrawCommand, Filter, FramebufferId, GraphicsApi, IndexBinding,
        IndexType, PixelFormat, ProgramId, ProgramLayout, ProgramSource, SamplerState, TextureData,
        TextureId, TextureImage, TextureKind, Topology, UniformLocation, VertexArrayId, Viewport, Wrap,
    },
    PipelineState,
};

const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("failed to create surface: {0}")]
    Surface(#[from] wgpu::CreateSurfaceError),
    #[error("no suitable adapter: {0}")]
    Adapter(#[from] wgpu::RequestAdapterError),
    #[error("failed to open device: {0}")]
    Device(#[from] wgpu::RequestDeviceError),
    #[error("surface reports no usable format")]
    NoSurfaceFormat,
}

struct BufferRecord {
    kind: BufferKind,
    buffer: Option<wgpu::Buffer>,
    /// CPU copy of index data, 8-bit indices are widened at draw time.
    indices: Vec<u8>,
}

#[derive(Default)]
struct VertexArrayRecord {
    attributes: HashMap<u32, AttributeBinding>,
    indices: Option<IndexBinding>,
}

struct TextureStorage {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    format: wgpu::TextureFormat,
    source: PixelFormat,
    width: u32,
    height: u32,
    mip_levels: u32,
    layers: u32,
}

struct TextureRecord {
    kind: TextureKind,
    storage: Option<TextureStorage>,
    sampler: wgpu::Sampler,
}

#[derive(Default)]
struct FramebufferRecord {
    colors: Vec<ColorAttachment>,
    depth: Option<TextureId>,
}

struct ProgramRecord {
    label: String,
    vertex: wgpu::ShaderModule,
    fragment: wgpu::ShaderModule,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    layout: ProgramLayout,
    /// Shadow copy of each uniform block, uploaded per draw.
    blocks: Vec<(u32, Vec<u8>)>,
}

struct Frame {
    surface_texture: wgpu::SurfaceTexture,
    view: wgpu::TextureView,
}

struct Target {
    view: wgpu::TextureView,
    format: wgpu::TextureFormat,
}

struct Targets {
    colors: Vec<Target>,
    depth: Option<Target>,
    size: (u32, u32),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct PipelineKey {
    program: ProgramId,
    vertex: Vec<(wgpu::VertexFormat, u64)>,
    colors: Vec<wgpu::TextureFormat>,
    depth: Option<wgpu::TextureFormat>,
    topology: wgpu::PrimitiveTopology,
    strip_index: Option<wgpu::IndexFormat>,
    state: PipelineState,
}

struct Placeholders {
    d2: wgpu::TextureView,
    cube: wgpu::TextureView,
    sampler: wgpu::Sampler,
}

const MIP_BLIT_SHADER: &str = "
struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VertexOutput {
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    var out: VertexOutput;
    out.position = vec4<f32>(uv * vec2<f32>(2.0, -2.0) + vec2<f32>(-1.0, 1.0), 0.0, 1.0);
    out.uv = uv;
    return out;
}

@group(0) @binding(0) var source: texture_2d<f32>;
@group(0) @binding(1) var source_sampler: sampler;

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return textureSample(source, source_sampler, in.uv);
}
";

/// Downsamples each level from the one above it, one pipeline per texture format.
struct MipBlitter {
    shader: wgpu::ShaderModule,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    sampler: wgpu::Sampler,
    pipelines: HashMap<wgpu::TextureFormat, wgpu::RenderPipeline>,
}

impl MipBlitter {
    fn new(device: &wgpu::Device) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Mipmap Shader"),
            source: wgpu::ShaderSource::Wgsl(MIP_BLIT_SHADER.into()),
        });
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Mipmap Input Texture Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Mipmap Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Mipmap Sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        Self { shader, bind_group_layout, pipeline_layout, sampler, pipelines: HashMap::new() }
    }

    fn pipeline(&mut self, device: &wgpu::Device, format: wgpu::TextureFormat) -> &wgpu::RenderPipeline {
        let (shader, layout) = (&self.shader, &self.pipeline_layout);
        self.pipelines.entry(format).or_insert_with(|| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("Mipmap Render Pipeline"),
                layout: Some(layout),
                vertex: wgpu::VertexState {
                    module: shader,
                    entry_point: Some("vs_main"),
                    compilation_options: Default::default(),
                    buffers: &[],
                },
                fragment: Some(wgpu::FragmentState {
                    module: shader,
                    entry_point: Some("fs_main"),
                    compilation_options: Default::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    cull_mode: None,
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            })
        })
    }

    fn generate(&mut self, device: &wgpu::Device, encoder: &mut wgpu::CommandEncoder, storage: &TextureStorage) {
        let pipeline = self.pipeline(device, storage.format).clone();
        for face in 0..storage.layers {
            for level in 1..storage.mip_levels {
                let level_view = |level: u32| {
                    storage.texture.create_view(&wgpu::TextureViewDescriptor {
                        dimension: Some(wgpu::TextureViewDimension::D2),
                        base_array_layer: face,
                        array_layer_count: Some(1),
                        base_mip_level: level,
                        mip_level_count: Some(1),
                        ..Default::default()
                    })
                };
                let source_view = level_view(level - 1);
                let target_view = level_view(level);
                let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("Mipmap Input Texture Bind Group"),
                    layout: &self.bind_group_layout,
                    entries: &[
                        wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(&source_view) },
                        wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::Sampler(&self.sampler) },
                    ],
                });
                let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("Mipmap Render Pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &target_view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    occlusion_query_set: None,
                    timestamp_writes: None,
                });
                render_pass.set_pipeline(&pipeline);
                render_pass.set_bind_group(0, &bind_group, &[]);
                render_pass.draw(0..3, 0..1);
            }
        }
    }
}

fn texture_format(format: PixelFormat) -> wgpu::TextureFormat {
    match format {
        PixelFormat::R8 => wgpu::TextureFormat::R8Unorm,
        PixelFormat::Rgb8 | PixelFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
        PixelFormat::Srgba8 => wgpu::TextureFormat::Rgba8UnormSrgb,
        PixelFormat::R16F => wgpu::TextureFormat::R16Float,
        PixelFormat::Rgb16F | PixelFormat::Rgba16F | PixelFormat::R11G11B10F => wgpu::TextureFormat::Rgba16Float,
        PixelFormat::Depth => DEPTH_FORMAT,
    }
}

fn texel_size(format: wgpu::TextureFormat) -> u32 {
    match format {
        wgpu::TextureFormat::R8Unorm => 1,
        wgpu::TextureFormat::R16Float => 2,
        wgpu::TextureFormat::Rgba16Float => 8,
        _ => 4,
    }
}

/// Three channel data gains an opaque alpha channel, there are no RGB texture formats.
fn expand_rgb<T: Copy>(values: &[T], channels: usize, one: T) -> Vec<T> {
    if channels != 3 {
        return values.to_vec();
    }
    values.chunks_exact(3).flat_map(|rgb| [rgb[0], rgb[1], rgb[2], one]).collect()
}

fn texel_bytes(format: PixelFormat, data: &TextureData<'_>) -> Option<Vec<u8>> {
    let channels = format.channels();
    let one_half = f16::ONE.to_bits();
    match (format.is_float(), data) {
        (false, TextureData::U8(values)) => Some(expand_rgb(values, channels, u8::MAX)),
        (true, TextureData::F16(values)) => Some(bytemuck::cast_slice(&expand_rgb(values, channels, one_half)).to_vec()),
        (true, TextureData::F32(values)) => {
            let halves: Vec<u16> = values.iter().map(|value| f16::from_f32(*value).to_bits()).collect();
            Some(bytemuck::cast_slice(&expand_rgb(&halves, channels, one_half)).to_vec())
        }
        _ => None,
    }
}

fn allocate_texture(device: &wgpu::Device, kind: TextureKind, source: PixelFormat, width: u32, height: u32) -> TextureStorage {
    let format = texture_format(source);
    let layers = kind.faces();
    let mip_levels = if source.is_depth() { 1 } else { 32 - width.max(height).max(1).leading_zeros() };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: None,
        size: wgpu::Extent3d { width, height, depth_or_array_layers: layers },
        mip_level_count: mip_levels,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST | wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    let dimension = match kind {
        TextureKind::D2 => wgpu::TextureViewDimension::D2,
        TextureKind::Cube => wgpu::TextureViewDimension::Cube,
    };
    let view = texture.create_view(&wgpu::TextureViewDescriptor { dimension: Some(dimension), ..Default::default() });
    TextureStorage { texture, view, format, source, width, height, mip_levels, layers }
}

fn create_sampler(device: &wgpu::Device, state: &SamplerState) -> wgpu::Sampler {
    let address_mode = match state.wrap {
        Wrap::Repeat => wgpu::AddressMode::Repeat,
        Wrap::Clamp => wgpu::AddressMode::ClampToEdge,
        Wrap::Mirror => wgpu::AddressMode::MirrorRepeat,
    };
    let (filter, mipmap_filter, lod_max_clamp, anisotropy_clamp) = match state.filter {
        Filter::Point => (wgpu::FilterMode::Nearest, wgpu::FilterMode::Nearest, 0.0, 1),
        Filter::Bilinear => (wgpu::FilterMode::Linear, wgpu::FilterMode::Nearest, 0.0, 1),
        Filter::Trilinear => (wgpu::FilterMode::Linear, wgpu::FilterMode::Linear, 32.0, 1),
        Filter::Anisotropic => (wgpu::FilterMode::Linear, wgpu::FilterMode::Linear, 32.0, 16),
    };
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: None,
        address_mode_u: address_mode,
        address_mode_v: address_mode,
        address_mode_w: address_mode,
        mag_filter: filter,
        min_filter: filter,
        mipmap_filter,
        lod_max_clamp,
        anisotropy_clamp,
        ..Default::default()
    })
}

fn create_depth_view(device: &wgpu::Device, width: u32, height: u32) -> wgpu::TextureView {
    device
        .create_texture(&wgpu::TextureDescriptor {
            label: Some("Surface Depth"),
            size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        })
        .create_view(&wgpu::TextureViewDescriptor::default())
}

fn create_placeholder(device: &wgpu::Device, queue: &wgpu::Queue, kind: TextureKind) -> wgpu::TextureView {
    let storage = allocate_texture(device, kind, PixelFormat::Rgba8, 1, 1);
    for face in 0..storage.layers {
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &storage.texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x: 0, y: 0, z: face },
                aspect: wgpu::TextureAspect::All,
            },
            &[0, 0, 0, 255],
            wgpu::TexelCopyBufferLayout { offset: 0, bytes_per_row: Some(4), rows_per_image: Some(1) },
            wgpu::Extent3d { width: 1, height: 1, depth_or_array_layers: 1 },
        );
    }
    storage.view
}

fn vertex_format(binding: &AttributeBinding) -> Option<wgpu::VertexFormat> {
    use wgpu::VertexFormat as F;
    Some(match (binding.data_type, binding.normalized, binding.components) {
        (DataType::Float, _, 1) => F::Float32,
        (DataType::Float, _, 2) => F::Float32x2,
        (DataType::Float, _, 3) => F::Float32x3,
        (DataType::Float, _, 4) => F::Float32x4,
        (DataType::UnsignedByte, true, 2) => F::Unorm8x2,
        (DataType::UnsignedByte, true, 4) => F::Unorm8x4,
        (DataType::UnsignedByte, false, 2) => F::Uint8x2,
        (DataType::UnsignedByte, false, 4) => F::Uint8x4,
        (DataType::Byte, true, 2) => F::Snorm8x2,
        (DataType::Byte, true, 4) => F::Snorm8x4,
        (DataType::Byte, false, 2) => F::Sint8x2,
        (DataType::Byte, false, 4) => F::Sint8x4,
        (DataType::UnsignedShort, true, 2) => F::Unorm16x2,
        (DataType::UnsignedShort, true, 4) => F::Unorm16x4,
        (DataType::UnsignedShort, false, 2) => F::Uint16x2,
        (DataType::UnsignedShort, false, 4) => F::Uint16x4,
        (DataType::Short, true, 2) => F::Snorm16x2,
        (DataType::Short, true, 4) => F::Snorm16x4,
        (DataType::Short, false, 2) => F::Sint16x2,
        (DataType::Short, false, 4) => F::Sint16x4,
        (DataType::UnsignedInt, _, 1) => F::Uint32,
        (DataType::UnsignedInt, _, 2) => F::Uint32x2,
        (DataType::UnsignedInt, _, 3) => F::Uint32x3,
        (DataType::UnsignedInt, _, 4) => F::Uint32x4,
        _ => return None,
    })
}

fn primitive_topology(topology: Topology) -> Option<wgpu::PrimitiveTopology> {
    Some(match topology {
        Topology::Points => wgpu::PrimitiveTopology::PointList,
        Topology::Lines => wgpu::PrimitiveTopology::LineList,
        Topology::LineStrip => wgpu::PrimitiveTopology::LineStrip,
        Topology::Triangles => wgpu::PrimitiveTopology::TriangleList,
        Topology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
        Topology::LineLoop | Topology::TriangleFan => return None,
    })
}

fn compare_function(func: DepthFunc) -> wgpu::CompareFunction {
    match func {
        DepthFunc::Never => wgpu::CompareFunction::Never,
        DepthFunc::Less => wgpu::CompareFunction::Less,
        DepthFunc::Equal => wgpu::CompareFunction::Equal,
        DepthFunc::LessEqual => wgpu::CompareFunction::LessEqual,
        DepthFunc::Greater => wgpu::CompareFunction::Greater,
        DepthFunc::NotEqual => wgpu::CompareFunction::NotEqual,
        DepthFunc::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
        DepthFunc::Always => wgpu::CompareFunction::Always,
    }
}

fn blend_state(blend: BlendMode) -> Option<wgpu::BlendState> {
    match blend {
        BlendMode::Opaque => None,
        BlendMode::Alpha => Some(wgpu::BlendState::ALPHA_BLENDING),
        BlendMode::Additive => {
            let add = wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::One,
                dst_factor: wgpu::BlendFactor::One,
                operation: wgpu::BlendOperation::Add,
            };
            Some(wgpu::BlendState { color: add, alpha: add })
        }
    }
}

fn color_writes(mask: ColorMask) -> wgpu::ColorWrites {
    let mut writes = wgpu::ColorWrites::empty();
    for (bit, write) in [
        (ColorMask::R, wgpu::ColorWrites::RED),
        (ColorMask::G, wgpu::ColorWrites::GREEN),
        (ColorMask::B, wgpu::ColorWrites::BLUE),
        (ColorMask::A, wgpu::ColorWrites::ALPHA),
    ] {
        if mask.0 & bit != 0 {
            writes |= write;
        }
    }
    writes
}

fn cull_mode(cull: CullFace) -> Option<wgpu::Face> {
    match cull {
        CullFace::None => None,
        CullFace::Front => Some(wgpu::Face::Front),
        CullFace::Back => Some(wgpu::Face::Back),
    }
}

/// Converts a bottom-left origin viewport into wgpu's top-left one, clipped to the target.
fn viewport_rect(viewport: Viewport, (width, height): (u32, u32)) -> Option<[f32; 4]> {
    let x = viewport.x.max(0) as u32;
    let y = viewport.y.max(0) as u32;
    if x >= width || y >= height {
        return None;
    }
    let w = viewport.width.min(width - x);
    let h = viewport.height.min(height - y);
    if w == 0 || h == 0 {
        return None;
    }
    Some([x as f32, (height - y - h) as f32, w as f32, h as f32])
}

fn bind_group_layout_entries(layout: &ProgramLayout) -> Vec<wgpu::BindGroupLayoutEntry> {
    let visibility = wgpu::ShaderStages::VERTEX_FRAGMENT;
    let mut entries: Vec<wgpu::BindGroupLayoutEntry> = layout
        .blocks
        .iter()
        .map(|block| wgpu::BindGroupLayoutEntry {
            binding: block.binding,
            visibility,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        })
        .collect();
    for slot in &layout.textures {
        let view_dimension = match slot.kind {
            TextureKind::D2 => wgpu::TextureViewDimension::D2,
            TextureKind::Cube => wgpu::TextureViewDimension::Cube,
        };
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: slot.texture_binding,
            visibility,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension,
                multisampled: false,
            },
            count: None,
        });
        if let Some(binding) = slot.sampler_binding {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding,
                visibility,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            });
        }
    }
    entries
}

fn create_pipeline(device: &wgpu::Device, program: &ProgramRecord, key: &PipelineKey) -> Option<wgpu::RenderPipeline> {
    let attributes: Vec<[wgpu::VertexAttribute; 1]> = key
        .vertex
        .iter()
        .zip(&program.layout.vertex_inputs)
        .map(|((format, _), location)| [wgpu::VertexAttribute { format: *format, offset: 0, shader_location: *location }])
        .collect();
    let buffers: Vec<wgpu::VertexBufferLayout<'_>> = key
        .vertex
        .iter()
        .zip(&attributes)
        .map(|((_, stride), attributes)| wgpu::VertexBufferLayout {
            array_stride: *stride,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes,
        })
        .collect();
    let targets: Vec<Option<wgpu::ColorTargetState>> = key
        .colors
        .iter()
        .map(|format| {
            Some(wgpu::ColorTargetState {
                format: *format,
                blend: blend_state(key.state.blend),
                write_mask: color_writes(key.state.color_write),
            })
        })
        .collect();

    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(program.label.as_str()),
        layout: Some(&program.pipeline_layout),
        vertex: wgpu::VertexState {
            module: &program.vertex,
            entry_point: None,
            compilation_options: Default::default(),
            buffers: &buffers,
        },
        fragment: Some(wgpu::FragmentState {
            module: &program.fragment,
            entry_point: None,
            compilation_options: Default::default(),
            targets: &targets,
        }),
        primitive: wgpu::PrimitiveState {
            topology: key.topology,
            strip_index_format: key.strip_index,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: cull_mode(key.state.cull),
            ..Default::default()
        },
        depth_stencil: key.depth.map(|format| wgpu::DepthStencilState {
            format,
            depth_write_enabled: key.state.depth_write,
            depth_compare: compare_function(key.state.depth_func),
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    });
    match device.pop_error_scope().block_on() {
        Some(error) => {
            log::error!("pipeline for {} rejected: {error}", program.label);
            None
        }
        None => Some(pipeline),
    }
}

pub struct WgpuApi {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    surface_config: wgpu::SurfaceConfiguration,
    surface_depth: wgpu::TextureView,
    device: wgpu::Device,
    queue: wgpu::Queue,
    capabilities: Capabilities,
    frame: Option<Frame>,
    encoder: Option<wgpu::CommandEncoder>,
    buffers: Arena<BufferRecord>,
    vertex_arrays: Arena<VertexArrayRecord>,
    default_vertex_array: VertexArrayRecord,
    bound_vertex_array: Option<VertexArrayId>,
    textures: Arena<TextureRecord>,
    units: HashMap<u32, TextureId>,
    framebuffers: Arena<FramebufferRecord>,
    framebuffer: Option<FramebufferId>,
    programs: Arena<ProgramRecord>,
    program: Option<ProgramId>,
    pipelines: HashMap<PipelineKey, Option<wgpu::RenderPipeline>>,
    mip_blitter: MipBlitter,
    placeholders: Placeholders,
    viewport: Viewport,
    state: PipelineState,
    warned: HashSet<String>,
}

impl WgpuApi {
    /// `reduced` limits the reported capabilities so the fallback paths can be
    /// exercised on capable hardware.
    pub fn new(window: Arc<Window>, reduced: bool) -> Result<Self, BackendError> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let surface = instance.create_surface(window.clone())?;
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .block_on()?;
        log::info!("adapter: {} ({:?})", adapter.get_info().name, adapter.get_info().backend);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Viewer Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults().using_resolution(adapter.limits()),
                memory_hints: wgpu::MemoryHints::default(),
                trace: wgpu::Trace::Off,
            })
            .block_on()?;
        device.on_uncaptured_error(Box::new(|error: wgpu::Error| log::error!("wgpu: {error}")));

        let surface_caps = surface.get_capabilities(&adapter);
        // Shaders encode their own output gamma.
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|format| !format.is_srgb())
            .or_else(|| surface_caps.formats.first().copied())
            .ok_or(BackendError::NoSurfaceFormat)?;
        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode: surface_caps.alpha_modes.first().copied().unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &surface_config);
        let surface_depth = create_depth_view(&device, surface_config.width, surface_config.height);

        let base = if reduced { Capabilities::REDUCED } else { Capabilities::FULL };
        let capabilities = Capabilities { texture_origin_top: true, depth_zero_to_one: true, ..base };
        let mip_blitter = MipBlitter::new(&device);
        let placeholders = Placeholders {
            d2: create_placeholder(&device, &queue, TextureKind::D2),
            cube: create_placeholder(&device, &queue, TextureKind::Cube),
            sampler: create_sampler(&device, &SamplerState::default()),
        };

        Ok(Self {
            window,
            surface,
            surface_config,
            surface_depth,
            device,
            queue,
            capabilities,
            frame: None,
            encoder: None,
            buffers: Arena::new(),
            vertex_arrays: Arena::new(),
            default_vertex_array: VertexArrayRecord::default(),
            bound_vertex_array: None,
            textures: Arena::new(),
            units: HashMap::new(),
            framebuffers: Arena::new(),
            framebuffer: None,
            programs: Arena::new(),
            program: None,
            pipelines: HashMap::new(),
            mip_blitter,
            placeholders,
            viewport: Viewport { x: 0, y: 0, width: size.width, height: size.height },
            state: PipelineState::default(),
            warned: HashSet::new(),
        })
    }

    fn take_encoder(&mut self) -> wgpu::CommandEncoder {
        match self.encoder.take() {
            Some(encoder) => encoder,
            None => self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Frame Encoder") }),
        }
    }

    /// Submits recorded work so queue writes that follow land after it.
    fn flush(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(Some(encoder.finish()));
        }
    }

    fn vertex_array_mut(&mut self) -> Option<&mut VertexArrayRecord> {
        match self.bound_vertex_array {
            Some(id) => self.vertex_arrays.get_mut(id.0),
            None => Some(&mut self.default_vertex_array),
        }
    }

    fn targets(&self) -> Result<Targets, String> {
        let Some(id) = self.framebuffer else {
            let frame = self.frame.as_ref().ok_or("no surface image outside a frame")?;
            return Ok(Targets {
                colors: vec![Target { view: frame.view.clone(), format: self.surface_config.format }],
                depth: Some(Target { view: self.surface_depth.clone(), format: DEPTH_FORMAT }),
                size: (self.surface_config.width, self.surface_config.height),
            });
        };

        let record = self.framebuffers.get(id.0).ok_or("stale framebuffer")?;
        let mut size = None;
        let mut colors = Vec::with_capacity(record.colors.len());
        for attachment in &record.colors {
            let storage = self
                .textures
                .get(attachment.texture.0)
                .and_then(|texture| texture.storage.as_ref())
                .ok_or("color attachment has no storage")?;
            if attachment.level >= storage.mip_levels || attachment.face >= storage.layers {
                return Err(format!("attachment level {} face {} out of range", attachment.level, attachment.face));
            }
            size.get_or_insert(((storage.width >> attachment.level).max(1), (storage.height >> attachment.level).max(1)));
            let view = storage.texture.create_view(&wgpu::TextureViewDescriptor {
                dimension: Some(wgpu::TextureViewDimension::D2),
                base_mip_level: attachment.level,
                mip_level_count: Some(1),
                base_array_layer: attachment.face,
                array_layer_count: Some(1),
                ..Default::default()
            });
            colors.push(Target { view, format: storage.format });
        }
        let depth = match record.depth {
            Some(texture) => {
                let storage = self
                    .textures
                    .get(texture.0)
                    .and_then(|texture| texture.storage.as_ref())
                    .ok_or("depth attachment has no storage")?;
                size.get_or_insert((storage.width, storage.height));
                Some(Target { view: storage.texture.create_view(&wgpu::TextureViewDescriptor::default()), format: storage.format })
            }
            None => None,
        };
        let size = size.ok_or("framebuffer has no attachments")?;
        Ok(Targets { colors, depth, size })
    }

    fn try_draw(&mut self, command: &DrawCommand) -> Result<(), String> {
        let program_id = self.program.ok_or("no program in use")?;
        let topology = primitive_topology(command.topology).ok_or_else(|| format!("{:?} topology", command.topology))?;
        let targets = self.targets()?;
        let viewport = viewport_rect(self.viewport, targets.size).ok_or("empty viewport")?;
        let program = self.programs.get(program_id.0).ok_or("stale program")?;
        let vertex_array = match self.bound_vertex_array {
            Some(id) => self.vertex_arrays.get(id.0).ok_or("stale vertex array")?,
            None => &self.default_vertex_array,
        };

        let mut vertex_buffers = Vec::with_capacity(program.layout.vertex_inputs.len());
        let mut vertex_layout = Vec::with_capacity(program.layout.vertex_inputs.len());
        for location in &program.layout.vertex_inputs {
            let binding = vertex_array
                .attributes
                .get(location)
                .ok_or_else(|| format!("{}: nothing bound at attribute location {location}", program.label))?;
            let format = vertex_format(binding)
                .ok_or_else(|| format!("{:?} x{} attributes", binding.data_type, binding.components))?;
            let buffer = self
                .buffers
                .get(binding.buffer.0)
                .and_then(|record| record.buffer.clone())
                .ok_or("attribute buffer has no data")?;
            vertex_buffers.push((buffer, binding.byte_offset as u64));
            vertex_layout.push((format, binding.stride() as u64));
        }

        let index = match command.indices {
            None => None,
            Some((index_type, offset)) => {
                let binding = vertex_array.indices.as_ref().ok_or("indexed draw without an index buffer")?;
                let record = self.buffers.get(binding.buffer.0).ok_or("stale index buffer")?;
                Some(match index_type {
                    IndexType::U8 => {
                        let start = offset as usize;
                        let source = record
                            .indices
                            .get(start..start + command.count as usize)
                            .ok_or("index range out of bounds")?;
                        let widened: Vec<u16> = source.iter().map(|index| *index as u16).collect();
                        let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                            label: Some("Widened Indices"),
                            contents: bytemuck::cast_slice(&widened),
                            usage: wgpu::BufferUsages::INDEX,
                        });
                        (buffer, 0, wgpu::IndexFormat::Uint16)
                    }
                    IndexType::U16 => (record.buffer.clone().ok_or("index buffer has no data")?, offset as u64, wgpu::IndexFormat::Uint16),
                    IndexType::U32 => (record.buffer.clone().ok_or("index buffer has no data")?, offset as u64, wgpu::IndexFormat::Uint32),
                })
            }
        };
        let strip_index = match topology {
            wgpu::PrimitiveTopology::LineStrip | wgpu::PrimitiveTopology::TriangleStrip => index.as_ref().map(|(_, _, format)| *format),
            _ => None,
        };

        let key = PipelineKey {
            program: program_id,
            vertex: vertex_layout,
            colors: targets.colors.iter().map(|target| target.format).collect(),
            depth: targets.depth.as_ref().map(|target| target.format),
            topology,
            strip_index,
            state: self.state,
        };
        if !self.pipelines.contains_key(&key) {
            let pipeline = create_pipeline(&self.device, program, &key);
            self.pipelines.insert(key.clone(), pipeline);
        }
        let Some(Some(pipeline)) = self.pipelines.get(&key) else {
            return Err(format!("{}: no pipeline", program.label));
        };

        let uniform_buffers: Vec<(u32, wgpu::Buffer)> = program
            .blocks
            .iter()
            .map(|(binding, data)| {
                let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(program.label.as_str()),
                    contents: data,
                    usage: wgpu::BufferUsages::UNIFORM,
                });
                (*binding, buffer)
            })
            .collect();
        let texture_resources: Vec<_> = program
            .layout
            .textures
            .iter()
            .map(|slot| {
                let bound = self
                    .units
                    .get(&slot.unit)
                    .and_then(|id| self.textures.get(id.0))
                    .filter(|record| record.kind == slot.kind)
                    .and_then(|record| {
                        record
                            .storage
                            .as_ref()
                            .filter(|storage| !storage.source.is_depth())
                            .map(|storage| (storage.view.clone(), record.sampler.clone()))
                    });
                let (view, sampler) = bound.unwrap_or_else(|| {
                    let view = match slot.kind {
                        TextureKind::D2 => self.placeholders.d2.clone(),
                        TextureKind::Cube => self.placeholders.cube.clone(),
                    };
                    (view, self.placeholders.sampler.clone())
                });
                (slot.texture_binding, slot.sampler_binding, view, sampler)
            })
            .collect();

        let mut entries = Vec::with_capacity(uniform_buffers.len() + 2 * texture_resources.len());
        for (binding, buffer) in &uniform_buffers {
            entries.push(wgpu::BindGroupEntry { binding: *binding, resource: buffer.as_entire_binding() });
        }
        for (texture_binding, sampler_binding, view, sampler) in &texture_resources {
            entries.push(wgpu::BindGroupEntry { binding: *texture_binding, resource: wgpu::BindingResource::TextureView(view) });
            if let Some(binding) = sampler_binding {
                entries.push(wgpu::BindGroupEntry { binding: *binding, resource: wgpu::BindingResource::Sampler(sampler) });
            }
        }
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(program.label.as_str()),
            layout: &program.bind_group_layout,
            entries: &entries,
        });

        let mut encoder = match self.encoder.take() {
            Some(encoder) => encoder,
            None => self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Frame Encoder") }),
        };
        {
            let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment<'_>>> = targets
                .colors
                .iter()
                .map(|target| {
                    Some(wgpu::RenderPassColorAttachment {
                        view: &target.view,
                        resolve_target: None,
                        ops: wgpu::Operations { load: wgpu::LoadOp::Load, store: wgpu::StoreOp::Store },
                    })
                })
                .collect();
            let depth_stencil_attachment = targets.depth.as_ref().map(|target| wgpu::RenderPassDepthStencilAttachment {
                view: &target.view,
                depth_ops: Some(wgpu::Operations { load: wgpu::LoadOp::Load, store: wgpu::StoreOp::Store }),
                stencil_ops: None,
            });
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(program.label.as_str()),
                color_attachments: &color_attachments,
                depth_stencil_attachment,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            let [x, y, width, height] = viewport;
            render_pass.set_viewport(x, y, width, height, 0.0, 1.0);
            render_pass.set_pipeline(pipeline);
            render_pass.set_bind_group(0, &bind_group, &[]);
            for (slot, (buffer, offset)) in vertex_buffers.iter().enumerate() {
                render_pass.set_vertex_buffer(slot as u32, buffer.slice(*offset..));
            }
            match &index {
                Some((buffer, offset, format)) => {
                    render_pass.set_index_buffer(buffer.slice(*offset..), *format);
                    render_pass.draw_indexed(0..command.count, 0, 0..1);
                }
                None => render_pass.draw(0..command.count, 0..1),
            }
        }
        self.encoder = Some(encoder);
        Ok(())
    }
}

impl GraphicsApi for WgpuApi {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.surface_config.width, self.surface_config.height)
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.surface_config.width = width;
        self.surface_config.height = height;
        self.surface.configure(&self.device, &self.surface_config);
        self.surface_depth = create_depth_view(&self.device, width, height);
    }

    fn begin_frame(&mut self) -> bool {
        match self.surface.get_current_texture() {
            Ok(surface_texture) => {
                let view = surface_texture.texture.create_view(&wgpu::TextureViewDescriptor::default());
                self.frame = Some(Frame { surface_texture, view });
                true
            }
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                self.surface.configure(&self.device, &self.surface_config);
                false
            }
            Err(error) => {
                log::warn!("surface image unavailable: {error}");
                false
            }
        }
    }

    fn end_frame(&mut self) {
        self.flush();
        if let Some(frame) = self.frame.take() {
            self.window.pre_present_notify();
            frame.surface_texture.present();
        }
    }

    fn create_buffer(&mut self, kind: BufferKind) -> BufferId {
        BufferId(self.buffers.insert(BufferRecord { kind, buffer: None, indices: Vec::new() }))
    }

    fn buffer_data(&mut self, buffer: BufferId, data: &[u8]) {
        let Some(record) = self.buffers.get_mut(buffer.0) else { return };
        let usage = match record.kind {
            BufferKind::Vertex => wgpu::BufferUsages::VERTEX,
            BufferKind::Index => wgpu::BufferUsages::INDEX,
        };
        if record.kind == BufferKind::Index {
            record.indices = data.to_vec();
        }
        record.buffer = (!data.is_empty()).then(|| {
            self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor { label: None, contents: data, usage })
        });
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        self.buffers.remove(buffer.0);
    }

    fn create_vertex_array(&mut self) -> VertexArrayId {
        VertexArrayId(self.vertex_arrays.insert(VertexArrayRecord::default()))
    }

    fn bind_vertex_array(&mut self, vertex_array: Option<VertexArrayId>) {
        self.bound_vertex_array = vertex_array;
    }

    fn vertex_attribute(&mut self, location: u32, binding: &AttributeBinding) {
        if let Some(record) = self.vertex_array_mut() {
            record.attributes.insert(location, binding.clone());
        }
    }

    fn index_buffer(&mut self, binding: Option<&IndexBinding>) {
        if let Some(record) = self.vertex_array_mut() {
            record.indices = binding.cloned();
        }
    }

    fn delete_vertex_array(&mut self, vertex_array: VertexArrayId) {
        self.vertex_arrays.remove(vertex_array.0);
        if self.bound_vertex_array == Some(vertex_array) {
            self.bound_vertex_array = None;
        }
    }

    fn create_texture(&mut self, kind: TextureKind) -> TextureId {
        let sampler = create_sampler(&self.device, &SamplerState::default());
        TextureId(self.textures.insert(TextureRecord { kind, storage: None, sampler }))
    }

    fn bind_texture(&mut self, unit: u32, texture: Option<TextureId>) {
        match texture {
            Some(texture) => self.units.insert(unit, texture),
            None => self.units.remove(&unit),
        };
    }

    fn texture_image(&mut self, texture: TextureId, image: &TextureImage<'_>) {
        self.flush();
        let Some(record) = self.textures.get_mut(texture.0) else { return };
        let reallocate = match &record.storage {
            None => true,
            Some(storage) => {
                image.level == 0 && (storage.source != image.format || (storage.width, storage.height) != (image.width, image.height))
            }
        };
        if reallocate {
            if image.level != 0 {
                log::warn!("mip level {} uploaded before level 0", image.level);
                return;
            }
            record.storage = Some(allocate_texture(&self.device, record.kind, image.format, image.width, image.height));
        }
        let (Some(storage), Some(data)) = (&record.storage, &image.data) else { return };
        if storage.source.is_depth() || image.level >= storage.mip_levels || image.face >= storage.layers {
            log::warn!("texture upload to {:?} level {} face {} ignored", storage.source, image.level, image.face);
            return;
        }
        let Some(bytes) = texel_bytes(storage.source, data) else {
            log::warn!("texture payload does not match {:?}", storage.source);
            return;
        };
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &storage.texture,
                mip_level: image.level,
                origin: wgpu::Origin3d { x: 0, y: 0, z: image.face },
                aspect: wgpu::TextureAspect::All,
            },
            &bytes,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(image.width * texel_size(storage.format)),
                rows_per_image: Some(image.height),
            },
            wgpu::Extent3d { width: image.width, height: image.height, depth_or_array_layers: 1 },
        );
    }

    fn texture_sampler(&mut self, texture: TextureId, sampler: &SamplerState) {
        if let Some(record) = self.textures.get_mut(texture.0) {
            record.sampler = create_sampler(&self.device, sampler);
        }
    }

    fn generate_mipmaps(&mut self, texture: TextureId) {
        let needs_mips = self
            .textures
            .get(texture.0)
            .and_then(|record| record.storage.as_ref())
            .is_some_and(|storage| storage.mip_levels > 1 && !storage.source.is_depth());
        if !needs_mips {
            return;
        }
        let mut encoder = self.take_encoder();
        if let Some(storage) = self.textures.get(texture.0).and_then(|record| record.storage.as_ref()) {
            self.mip_blitter.generate(&self.device, &mut encoder, storage);
        }
        self.encoder = Some(encoder);
    }

    fn delete_texture(&mut self, texture: TextureId) {
        self.textures.remove(texture.0);
        self.units.retain(|_, bound| *bound != texture);
    }

    fn create_framebuffer(&mut self) -> FramebufferId {
        FramebufferId(self.framebuffers.insert(FramebufferRecord::default()))
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
        self.framebuffer = framebuffer;
    }

    fn color_attachments(&mut self, framebuffer: FramebufferId, attachments: &[ColorAttachment]) {
        if let Some(record) = self.framebuffers.get_mut(framebuffer.0) {
            record.colors = attachments.to_vec();
        }
    }

    fn depth_attachment(&mut self, framebuffer: FramebufferId, texture: Option<TextureId>) {
        if let Some(record) = self.framebuffers.get_mut(framebuffer.0) {
            record.depth = texture;
        }
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        self.framebuffers.remove(framebuffer.0);
        if self.framebuffer == Some(framebuffer) {
            self.framebuffer = None;
        }
    }

    fn create_program(&mut self, source: &ProgramSource<'_>) -> Result<ProgramId, String> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let vertex = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(source.label),
            source: wgpu::ShaderSource::Naga(Cow::Owned(source.vertex.clone())),
        });
        let fragment = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(source.label),
            source: wgpu::ShaderSource::Naga(Cow::Owned(source.fragment.clone())),
        });
        let bind_group_layout = self.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(source.label),
            entries: &bind_group_layout_entries(source.layout),
        });
        let pipeline_layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(source.label),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        if let Some(error) = self.device.pop_error_scope().block_on() {
            return Err(error.to_string());
        }

        let blocks = source.layout.blocks.iter().map(|block| (block.binding, vec![0; block.size as usize])).collect();
        Ok(ProgramId(self.programs.insert(ProgramRecord {
            label: source.label.to_string(),
            vertex,
            fragment,
            bind_group_layout,
            pipeline_layout,
            layout: source.layout.clone(),
            blocks,
        })))
    }

    fn use_program(&mut self, program: Option<ProgramId>) {
        self.program = program;
    }

    fn uniform(&mut self, program: ProgramId, location: UniformLocation, bytes: &[u8]) {
        let Some(record) = self.programs.get_mut(program.0) else { return };
        let Some((_, block)) = record.blocks.iter_mut().find(|(binding, _)| *binding == location.block) else {
            return;
        };
        let start = location.offset as usize;
        match block.get_mut(start..start + bytes.len()) {
            Some(target) => target.copy_from_slice(bytes),
            None => log::warn!("{}: uniform write past the end of block {}", record.label, location.block),
        }
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.remove(program.0);
        self.pipelines.retain(|key, _| key.program != program);
        if self.program == Some(program) {
            self.program = None;
        }
    }

    fn viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    fn cull_face(&mut self, cull: CullFace) {
        self.state.cull = cull;
    }

    fn depth_func(&mut self, func: DepthFunc) {
        self.state.depth_func = func;
    }

    fn blend_mode(&mut self, blend: BlendMode) {
        self.state.blend = blend;
    }

    fn depth_write(&mut self, enabled: bool) {
        self.state.depth_write = enabled;
    }

    fn color_write(&mut self, mask: ColorMask) {
        self.state.color_write = mask;
    }

    fn clear(&mut self, color: bool, depth: bool) {
        let targets = match self.targets() {
            Ok(targets) => targets,
            Err(reason) => {
                log::warn!("clear skipped: {reason}");
                return;
            }
        };
        let clear_color = if self.framebuffer.is_none() { wgpu::Color::BLACK } else { wgpu::Color::TRANSPARENT };
        let mut encoder = self.take_encoder();
        {
            let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment<'_>>> = targets
                .colors
                .iter()
                .map(|target| {
                    Some(wgpu::RenderPassColorAttachment {
                        view: &target.view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: if color { wgpu::LoadOp::Clear(clear_color) } else { wgpu::LoadOp::Load },
                            store: wgpu::StoreOp::Store,
                        },
                    })
                })
                .collect();
            let depth_stencil_attachment = targets.depth.as_ref().map(|target| wgpu::RenderPassDepthStencilAttachment {
                view: &target.view,
                depth_ops: Some(wgpu::Operations {
                    load: if depth { wgpu::LoadOp::Clear(1.0) } else { wgpu::LoadOp::Load },
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            });
            drop(encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Clear"),
                color_attachments: &color_attachments,
                depth_stencil_attachment,
                occlusion_query_set: None,
                timestamp_writes: None,
            }));
        }
        self.encoder = Some(encoder);
    }

    fn draw(&mut self, command: &DrawCommand) {
        if let Err(reason) = self.try_draw(command) {
            if self.warned.insert(reason.clone()) {
                log::warn!("draw skipped: {reason}");
            }
        }
    }
}
