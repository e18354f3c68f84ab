//! GLSL program compilation through naga, uniform introspection and parameter upload.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use naga::{AddressSpace, ArraySize, Binding, ImageClass, ImageDimension, Module, ScalarKind, TypeInner, VectorSize};

use super::{
    api::{BlockLayout, ProgramId, ProgramLayout, ProgramSource, TextureId, TextureKind, TextureSlot, UniformLocation},
    parameters::{ParamValue, ShaderParameters},
    RenderContext, ResourceError,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

#[derive(Debug, thiserror::Error)]
pub enum ShaderError {
    #[error("{stage:?} shader failed to compile:\n{log}")]
    Compile { stage: ShaderStage, log: String },
    #[error("program failed to link:\n{log}")]
    Link { log: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UniformType {
    Float,
    Vec2,
    Vec3,
    Vec4,
    Int,
    IVec2,
    IVec3,
    IVec4,
    UInt,
    Mat3,
    Mat4,
}

impl UniformType {
    fn components(self) -> usize {
        match self {
            UniformType::Float | UniformType::Int | UniformType::UInt => 1,
            UniformType::Vec2 | UniformType::IVec2 => 2,
            UniformType::Vec3 | UniformType::IVec3 => 3,
            UniformType::Vec4 | UniformType::IVec4 => 4,
            UniformType::Mat3 => 9,
            UniformType::Mat4 => 16,
        }
    }

    fn is_integer(self) -> bool {
        matches!(
            self,
            UniformType::Int | UniformType::IVec2 | UniformType::IVec3 | UniformType::IVec4 | UniformType::UInt
        )
    }

    /// std140 footprint of one element; mat3 columns are padded to vec4.
    fn element_size(self) -> usize {
        match self {
            UniformType::Mat3 => 48,
            other => other.components() * 4,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UniformInfo {
    pub ty: UniformType,
    pub location: UniformLocation,
    pub count: u32,
    pub stride: u32,
}

/// Inserts `header` after the `#version` directive, or at the top when there is none.
pub fn inject_header(source: &str, header: &str) -> String {
    let mut offset = 0;
    for line in source.split_inclusive('\n') {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("//") {
            offset += line.len();
            continue;
        }
        if trimmed.starts_with("#version") {
            let mut out = String::with_capacity(source.len() + header.len() + 1);
            out.push_str(&source[..offset + line.len()]);
            if !line.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(header);
            out.push_str(&source[offset + line.len()..]);
            return out;
        }
        break;
    }
    format!("{header}{source}")
}

fn parse(stage: ShaderStage, source: &str) -> Result<Module, ShaderError> {
    let naga_stage = match stage {
        ShaderStage::Vertex => naga::ShaderStage::Vertex,
        ShaderStage::Fragment => naga::ShaderStage::Fragment,
    };
    let mut frontend = naga::front::glsl::Frontend::default();
    let module = frontend
        .parse(&naga::front::glsl::Options::from(naga_stage), source)
        .map_err(|errors| ShaderError::Compile { stage, log: errors.to_string() })?;

    let mut validator = naga::valid::Validator::new(naga::valid::ValidationFlags::all(), naga::valid::Capabilities::all());
    validator
        .validate(&module)
        .map_err(|error| ShaderError::Compile { stage, log: error.emit_to_string(source) })?;

    if !module.entry_points.iter().any(|entry| entry.stage == naga_stage) {
        return Err(ShaderError::Compile { stage, log: "no entry point".into() });
    }
    Ok(module)
}

fn uniform_type(module: &Module, ty: naga::Handle<naga::Type>) -> Option<(UniformType, u32, u32)> {
    let uniform = match &module.types[ty].inner {
        TypeInner::Scalar(scalar) => match scalar.kind {
            ScalarKind::Float => UniformType::Float,
            ScalarKind::Sint | ScalarKind::Bool => UniformType::Int,
            ScalarKind::Uint => UniformType::UInt,
            _ => return None,
        },
        TypeInner::Vector { size, scalar } => match (size, scalar.kind) {
            (VectorSize::Bi, ScalarKind::Float) => UniformType::Vec2,
            (VectorSize::Tri, ScalarKind::Float) => UniformType::Vec3,
            (VectorSize::Quad, ScalarKind::Float) => UniformType::Vec4,
            (VectorSize::Bi, ScalarKind::Sint) => UniformType::IVec2,
            (VectorSize::Tri, ScalarKind::Sint) => UniformType::IVec3,
            (VectorSize::Quad, ScalarKind::Sint) => UniformType::IVec4,
            _ => return None,
        },
        TypeInner::Matrix { columns: VectorSize::Tri, rows: VectorSize::Tri, .. } => UniformType::Mat3,
        TypeInner::Matrix { columns: VectorSize::Quad, rows: VectorSize::Quad, .. } => UniformType::Mat4,
        TypeInner::Array { base, size: ArraySize::Constant(count), stride } => {
            let (element, _, _) = uniform_type(module, *base)?;
            return Some((element, count.get(), *stride));
        }
        _ => return None,
    };
    Some((uniform, 1, 0))
}

#[derive(Default)]
struct Reflection {
    uniforms: HashMap<String, UniformInfo>,
    blocks: BTreeMap<u32, u32>,
    textures: BTreeMap<u32, (String, TextureKind)>,
    samplers: HashMap<String, u32>,
}

impl Reflection {
    fn collect(&mut self, module: &Module) {
        for (_, var) in module.global_variables.iter() {
            let Some(binding) = var.binding.as_ref().map(|binding| binding.binding) else {
                continue;
            };
            match var.space {
                AddressSpace::Uniform => {
                    if let TypeInner::Struct { members, span } = &module.types[var.ty].inner {
                        let size = self.blocks.entry(binding).or_insert(0);
                        *size = (*size).max(*span);
                        for member in members {
                            let Some(name) = member.name.clone() else { continue };
                            let Some((ty, count, stride)) = uniform_type(module, member.ty) else {
                                log::warn!("uniform {name} has an unsupported type");
                                continue;
                            };
                            let location = UniformLocation { block: binding, offset: member.offset };
                            self.uniforms.insert(name, UniformInfo { ty, location, count, stride });
                        }
                    }
                }
                AddressSpace::Handle => {
                    let Some(name) = var.name.clone() else { continue };
                    match module.types[var.ty].inner {
                        TypeInner::Image { dim, arrayed: false, class: ImageClass::Sampled { .. } } => {
                            let kind = match dim {
                                ImageDimension::D2 => TextureKind::D2,
                                ImageDimension::Cube => TextureKind::Cube,
                                other => {
                                    log::warn!("texture {name} has unsupported dimension {other:?}");
                                    continue;
                                }
                            };
                            self.textures.insert(binding, (name, kind));
                        }
                        TypeInner::Sampler { .. } => {
                            self.samplers.insert(name, binding);
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }
    }

    /// Texture units are handed out in binding order; samplers pair up by name.
    fn layout(&self, module_inputs: Vec<u32>) -> ProgramLayout {
        let textures = self
            .textures
            .iter()
            .enumerate()
            .map(|(unit, (binding, (name, kind)))| TextureSlot {
                name: name.clone(),
                unit: unit as u32,
                kind: *kind,
                texture_binding: *binding,
                sampler_binding: self.samplers.get(&format!("{name}Sampler")).copied(),
            })
            .collect();
        ProgramLayout {
            blocks: self.blocks.iter().map(|(binding, size)| BlockLayout { binding: *binding, size: *size }).collect(),
            textures,
            vertex_inputs: module_inputs,
        }
    }
}

fn locations(module: &Module, ty: naga::Handle<naga::Type>, binding: Option<&Binding>, out: &mut BTreeSet<u32>) {
    match binding {
        Some(Binding::Location { location, .. }) => {
            out.insert(*location);
        }
        Some(Binding::BuiltIn(_)) => {}
        None => {
            if let TypeInner::Struct { members, .. } = &module.types[ty].inner {
                for member in members {
                    locations(module, member.ty, member.binding.as_ref(), out);
                }
            }
        }
    }
}

fn stage_inputs(module: &Module, stage: naga::ShaderStage) -> BTreeSet<u32> {
    let mut inputs = BTreeSet::new();
    for entry in module.entry_points.iter().filter(|entry| entry.stage == stage) {
        for argument in &entry.function.arguments {
            locations(module, argument.ty, argument.binding.as_ref(), &mut inputs);
        }
    }
    inputs
}

fn stage_outputs(module: &Module, stage: naga::ShaderStage) -> BTreeSet<u32> {
    let mut outputs = BTreeSet::new();
    for entry in module.entry_points.iter().filter(|entry| entry.stage == stage) {
        if let Some(result) = &entry.function.result {
            locations(module, result.ty, result.binding.as_ref(), &mut outputs);
        }
    }
    outputs
}

fn check_interface(vertex: &Module, fragment: &Module) -> Result<(), String> {
    let outputs = stage_outputs(vertex, naga::ShaderStage::Vertex);
    let missing: Vec<String> = stage_inputs(fragment, naga::ShaderStage::Fragment)
        .difference(&outputs)
        .map(|location| location.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(format!("fragment inputs at locations [{}] are not written by the vertex stage", missing.join(", ")));
    }
    Ok(())
}

fn float_components(value: &ParamValue) -> Option<Vec<f32>> {
    Some(match value {
        ParamValue::Float(v) => vec![*v],
        ParamValue::Vec2(v) => v.to_array().to_vec(),
        ParamValue::Vec3(v) => v.to_array().to_vec(),
        ParamValue::Vec4(v) => v.to_array().to_vec(),
        ParamValue::Mat3(m) => m.to_cols_array().to_vec(),
        ParamValue::Mat4(m) => m.to_cols_array().to_vec(),
        ParamValue::Floats(values) => values.clone(),
        _ => return None,
    })
}

fn int_components(value: &ParamValue) -> Option<Vec<i32>> {
    Some(match value {
        ParamValue::Int(v) => vec![*v],
        ParamValue::IVec2(v) => v.to_array().to_vec(),
        ParamValue::IVec3(v) => v.to_array().to_vec(),
        ParamValue::IVec4(v) => v.to_array().to_vec(),
        ParamValue::Ints(values) => values.clone(),
        _ => return None,
    })
}

/// Lays `value` out the way the uniform block expects it. `None` on a type mismatch.
pub fn encode_uniform(info: &UniformInfo, value: &ParamValue) -> Option<Vec<u8>> {
    let words: Vec<[u8; 4]> = if info.ty.is_integer() {
        int_components(value)?.into_iter().map(i32::to_le_bytes).collect()
    } else {
        float_components(value)?.into_iter().map(f32::to_le_bytes).collect()
    };
    let components = info.ty.components();
    if words.len() < components || words.len() % components != 0 {
        return None;
    }

    let element_size = info.ty.element_size();
    let elements = (words.len() / components).min(info.count.max(1) as usize);
    let stride = if elements > 1 { (info.stride as usize).max(element_size) } else { element_size };
    let mut bytes = vec![0u8; (elements - 1) * stride + element_size];
    for (index, element) in words.chunks(components).take(elements).enumerate() {
        let base = index * stride;
        if info.ty == UniformType::Mat3 {
            for (column, values) in element.chunks(3).enumerate() {
                let start = base + column * 16;
                bytes[start..start + 12].copy_from_slice(&values.concat());
            }
        } else {
            bytes[base..base + element_size].copy_from_slice(&element.concat());
        }
    }
    Some(bytes)
}

#[derive(Debug)]
struct TextureUniform {
    unit: u32,
    kind: TextureKind,
    value: Option<TextureId>,
}

/// A linked program variant with its introspected uniform table.
#[derive(Debug)]
pub struct Program {
    id: ProgramId,
    uniforms: HashMap<String, UniformInfo>,
    textures: HashMap<String, TextureUniform>,
    overridden: BTreeSet<String>,
}

impl Program {
    pub fn compile(
        ctx: &mut RenderContext,
        label: &str,
        vertex_source: &str,
        fragment_source: &str,
    ) -> Result<Self, ShaderError> {
        let vertex = parse(ShaderStage::Vertex, vertex_source)?;
        let fragment = parse(ShaderStage::Fragment, fragment_source)?;
        check_interface(&vertex, &fragment).map_err(|log| ShaderError::Link { log })?;

        let mut reflection = Reflection::default();
        reflection.collect(&vertex);
        reflection.collect(&fragment);
        let inputs = stage_inputs(&vertex, naga::ShaderStage::Vertex).into_iter().collect();
        let layout = reflection.layout(inputs);

        let source = ProgramSource { label, vertex: &vertex, fragment: &fragment, layout: &layout };
        let id = ctx.api().create_program(&source).map_err(|log| ShaderError::Link { log })?;
        log::debug!(
            "program {label} linked: {} uniforms, {} textures",
            reflection.uniforms.len(),
            layout.textures.len()
        );

        let textures = layout
            .textures
            .iter()
            .map(|slot| (slot.name.clone(), TextureUniform { unit: slot.unit, kind: slot.kind, value: None }))
            .collect();
        Ok(Self { id, uniforms: reflection.uniforms, textures, overridden: BTreeSet::new() })
    }

    pub fn id(&self) -> ProgramId {
        self.id
    }

    pub fn uniform(&self, name: &str) -> Option<&UniformInfo> {
        self.uniforms.get(name)
    }

    pub fn texture_unit(&self, name: &str) -> Option<u32> {
        self.textures.get(name).map(|texture| texture.unit)
    }

    pub fn texture_kind(&self, name: &str) -> Option<TextureKind> {
        self.textures.get(name).map(|texture| texture.kind)
    }

    pub fn bind(&self, ctx: &mut RenderContext) {
        ctx.use_program(Some(self.id));
    }

    fn check_bound(&self, ctx: &RenderContext) -> Result<(), ResourceError> {
        if ctx.bound_program() != Some(self.id) {
            return Err(ResourceError::NotBound("program"));
        }
        Ok(())
    }

    /// Returns false for names the program does not use or values of the wrong type.
    fn set_parameter(&mut self, ctx: &mut RenderContext, name: &str, value: &ParamValue) -> bool {
        if let Some(texture) = self.textures.get_mut(name) {
            let ParamValue::Texture(id) = value else {
                log::warn!("texture uniform {name} given {value:?}");
                return false;
            };
            texture.value = Some(*id);
            ctx.bind_texture(texture.unit, Some(*id));
            return true;
        }
        let Some(info) = self.uniforms.get(name) else {
            return false;
        };
        match encode_uniform(info, value) {
            Some(bytes) => {
                ctx.api().uniform(self.id, info.location, &bytes);
                true
            }
            None => {
                log::warn!("uniform {name} of type {:?} given {value:?}", info.ty);
                false
            }
        }
    }

    pub fn set_parameters(&mut self, ctx: &mut RenderContext, params: &ShaderParameters) -> Result<(), ResourceError> {
        self.check_bound(ctx)?;
        for (name, value) in params.iter() {
            self.set_parameter(ctx, name, value);
        }
        Ok(())
    }

    /// Like [`Program::set_parameters`] but remembers what was touched so
    /// [`Program::restore_defaults`] can undo it before the next draw.
    pub(crate) fn apply_overrides(&mut self, ctx: &mut RenderContext, params: &ShaderParameters) -> Result<(), ResourceError> {
        self.check_bound(ctx)?;
        for (name, value) in params.iter() {
            if self.set_parameter(ctx, name, value) {
                self.overridden.insert(name.to_string());
            }
        }
        Ok(())
    }

    pub(crate) fn restore_defaults(&mut self, ctx: &mut RenderContext, defaults: &ShaderParameters) -> Result<(), ResourceError> {
        self.check_bound(ctx)?;
        for name in std::mem::take(&mut self.overridden) {
            match defaults.get(&name) {
                Some(value) => {
                    self.set_parameter(ctx, &name, value);
                }
                None => {
                    if let Some(texture) = self.textures.get_mut(&name) {
                        texture.value = None;
                    }
                }
            }
        }
        Ok(())
    }

    /// Texture units are shared between programs, so every unit this program
    /// samples from is rebound before drawing.
    pub(crate) fn bind_textures(&self, ctx: &mut RenderContext) {
        for texture in self.textures.values() {
            ctx.bind_texture(texture.unit, texture.value);
        }
    }

    pub fn destroy(self, ctx: &mut RenderContext) {
        if ctx.bound_program() == Some(self.id) {
            ctx.use_program(None);
        }
        ctx.api().delete_program(self.id);
    }
}
