//! Serde model of the parts of a glTF 2.0 document the viewer consumes.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_repr::Deserialize_repr;

use super::LoadError;

fn default_one() -> f32 {
    1.0
}

fn default_color() -> [f32; 4] {
    [1.0; 4]
}

fn default_specular() -> [f32; 3] {
    [1.0; 3]
}

fn default_interpolation() -> String {
    "LINEAR".to_string()
}

#[derive(Deserialize_repr, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum ComponentType {
    SignedByte = 5120,
    UnsignedByte = 5121,
    SignedShort = 5122,
    UnsignedShort = 5123,
    UnsignedInt = 5125,
    Float = 5126,
}

impl ComponentType {
    pub fn size(self) -> usize {
        match self {
            ComponentType::SignedByte | ComponentType::UnsignedByte => 1,
            ComponentType::SignedShort | ComponentType::UnsignedShort => 2,
            ComponentType::UnsignedInt | ComponentType::Float => 4,
        }
    }
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessorType {
    #[serde(rename = "SCALAR")]
    Scalar,
    #[serde(rename = "VEC2")]
    Vec2,
    #[serde(rename = "VEC3")]
    Vec3,
    #[serde(rename = "VEC4")]
    Vec4,
    #[serde(rename = "MAT2")]
    Mat2,
    #[serde(rename = "MAT3")]
    Mat3,
    #[serde(rename = "MAT4")]
    Mat4,
}

impl AccessorType {
    pub fn components(self) -> usize {
        match self {
            AccessorType::Scalar => 1,
            AccessorType::Vec2 => 2,
            AccessorType::Vec3 => 3,
            AccessorType::Vec4 | AccessorType::Mat2 => 4,
            AccessorType::Mat3 => 9,
            AccessorType::Mat4 => 16,
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct Accessor {
    #[serde(rename = "bufferView")]
    pub buffer_view: Option<usize>,
    #[serde(rename = "byteOffset", default)]
    pub byte_offset: usize,
    #[serde(rename = "componentType")]
    pub component_type: ComponentType,
    #[serde(default)]
    pub normalized: bool,
    pub count: usize,
    #[serde(rename = "type")]
    pub accessor_type: AccessorType,
    pub min: Option<Vec<f32>>,
    pub max: Option<Vec<f32>>,
}

impl Accessor {
    pub fn element_size(&self) -> usize {
        self.component_type.size() * self.accessor_type.components()
    }
}

#[derive(Deserialize, Debug)]
pub struct BufferView {
    pub buffer: usize,
    #[serde(rename = "byteLength")]
    pub byte_length: usize,
    #[serde(rename = "byteOffset", default)]
    pub byte_offset: usize,
    #[serde(rename = "byteStride")]
    pub byte_stride: Option<usize>,
}

#[derive(Deserialize, Debug)]
pub struct Buffer {
    #[serde(rename = "byteLength")]
    pub byte_length: usize,
    pub uri: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct Primitive {
    #[serde(default)]
    pub attributes: BTreeMap<String, usize>,
    pub indices: Option<usize>,
    pub material: Option<usize>,
    pub mode: Option<u32>,
}

#[derive(Deserialize, Debug)]
pub struct Mesh {
    pub name: Option<String>,
    pub primitives: Vec<Primitive>,
}

#[derive(Deserialize, Clone, Copy, Debug)]
pub struct TextureInfo {
    pub index: usize,
    #[serde(rename = "texCoord", default)]
    pub tex_coord: u32,
}

#[derive(Deserialize, Debug)]
pub struct PbrMetallicRoughness {
    #[serde(rename = "baseColorFactor", default = "default_color")]
    pub base_color_factor: [f32; 4],
    #[serde(rename = "metallicFactor", default = "default_one")]
    pub metallic_factor: f32,
    #[serde(rename = "roughnessFactor", default = "default_one")]
    pub roughness_factor: f32,
    #[serde(rename = "baseColorTexture")]
    pub base_color_texture: Option<TextureInfo>,
    #[serde(rename = "metallicRoughnessTexture")]
    pub metallic_roughness_texture: Option<TextureInfo>,
}

impl Default for PbrMetallicRoughness {
    fn default() -> Self {
        Self {
            base_color_factor: default_color(),
            metallic_factor: 1.0,
            roughness_factor: 1.0,
            base_color_texture: None,
            metallic_roughness_texture: None,
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct PbrSpecularGlossiness {
    #[serde(rename = "diffuseFactor", default = "default_color")]
    pub diffuse_factor: [f32; 4],
    #[serde(rename = "specularFactor", default = "default_specular")]
    pub specular_factor: [f32; 3],
    #[serde(rename = "glossinessFactor", default = "default_one")]
    pub glossiness_factor: f32,
    #[serde(rename = "diffuseTexture")]
    pub diffuse_texture: Option<TextureInfo>,
    #[serde(rename = "specularGlossinessTexture")]
    pub specular_glossiness_texture: Option<TextureInfo>,
}

#[derive(Deserialize, Debug, Default)]
pub struct MaterialExtensions {
    #[serde(rename = "KHR_materials_pbrSpecularGlossiness")]
    pub specular_glossiness: Option<PbrSpecularGlossiness>,
    #[serde(rename = "KHR_materials_unlit")]
    pub unlit: Option<serde_json::Value>,
}

#[derive(Deserialize, Debug)]
pub struct Material {
    pub name: Option<String>,
    #[serde(rename = "pbrMetallicRoughness")]
    pub pbr_metallic_roughness: Option<PbrMetallicRoughness>,
    #[serde(rename = "normalTexture")]
    pub normal_texture: Option<TextureInfo>,
    #[serde(rename = "occlusionTexture")]
    pub occlusion_texture: Option<TextureInfo>,
    #[serde(rename = "emissiveTexture")]
    pub emissive_texture: Option<TextureInfo>,
    #[serde(rename = "emissiveFactor", default)]
    pub emissive_factor: [f32; 3],
    #[serde(default)]
    pub extensions: MaterialExtensions,
}

#[derive(Deserialize, Debug, Default)]
pub struct Node {
    pub name: Option<String>,
    pub mesh: Option<usize>,
    pub skin: Option<usize>,
    pub matrix: Option<[f32; 16]>,
    pub translation: Option<[f32; 3]>,
    pub rotation: Option<[f32; 4]>,
    pub scale: Option<[f32; 3]>,
    #[serde(default)]
    pub children: Vec<usize>,
}

#[derive(Deserialize, Debug)]
pub struct Scene {
    pub name: Option<String>,
    #[serde(default)]
    pub nodes: Vec<usize>,
}

#[derive(Deserialize, Debug)]
pub struct Skin {
    #[serde(rename = "inverseBindMatrices")]
    pub inverse_bind_matrices: Option<usize>,
    pub joints: Vec<usize>,
}

#[derive(Deserialize, Debug)]
pub struct ChannelTarget {
    pub node: Option<usize>,
    pub path: String,
}

#[derive(Deserialize, Debug)]
pub struct Channel {
    pub sampler: usize,
    pub target: ChannelTarget,
}

#[derive(Deserialize, Debug)]
pub struct AnimationSampler {
    pub input: usize,
    pub output: usize,
    #[serde(default = "default_interpolation")]
    pub interpolation: String,
}

#[derive(Deserialize, Debug)]
pub struct Animation {
    pub name: Option<String>,
    pub channels: Vec<Channel>,
    pub samplers: Vec<AnimationSampler>,
}

#[derive(Deserialize, Debug)]
pub struct Texture {
    pub source: Option<usize>,
}

#[derive(Deserialize, Debug)]
pub struct Image {
    pub uri: Option<String>,
    #[serde(rename = "bufferView")]
    pub buffer_view: Option<usize>,
    #[serde(rename = "mimeType")]
    pub mime_type: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct Document {
    pub scene: Option<usize>,
    #[serde(default)]
    pub scenes: Vec<Scene>,
    #[serde(default)]
    pub nodes: Vec<Node>,
    pub meshes: Option<Vec<Mesh>>,
    #[serde(default)]
    pub accessors: Vec<Accessor>,
    #[serde(rename = "bufferViews", default)]
    pub buffer_views: Vec<BufferView>,
    pub buffers: Option<Vec<Buffer>>,
    #[serde(default)]
    pub materials: Vec<Material>,
    #[serde(default)]
    pub textures: Vec<Texture>,
    #[serde(default)]
    pub images: Vec<Image>,
    #[serde(default)]
    pub skins: Vec<Skin>,
    #[serde(default)]
    pub animations: Vec<Animation>,
}

fn check(what: &'static str, index: usize, len: usize) -> Result<(), LoadError> {
    if index < len {
        Ok(())
    } else {
        Err(LoadError::DanglingReference { what, index })
    }
}

impl Document {
    /// Parses and runs the structural checks every later stage relies on.
    pub fn parse(json: &[u8]) -> Result<Self, LoadError> {
        let document: Document = serde_json::from_slice(json)?;
        document.validate()?;
        Ok(document)
    }

    pub fn meshes(&self) -> &[Mesh] {
        self.meshes.as_deref().unwrap_or_default()
    }

    pub fn buffers(&self) -> &[Buffer] {
        self.buffers.as_deref().unwrap_or_default()
    }

    /// Root node ids of the default scene. Without scenes every parentless node is a root.
    pub fn root_nodes(&self) -> Vec<usize> {
        if let Some(scene) = self.scenes.get(self.scene.unwrap_or(0)) {
            return scene.nodes.clone();
        }
        let mut has_parent = vec![false; self.nodes.len()];
        for node in &self.nodes {
            for &child in &node.children {
                has_parent[child] = true;
            }
        }
        (0..self.nodes.len()).filter(|&id| !has_parent[id]).collect()
    }

    /// Image index behind a texture reference.
    pub fn texture_image(&self, info: &TextureInfo) -> Option<usize> {
        self.textures.get(info.index).and_then(|texture| texture.source)
    }

    pub fn validate(&self) -> Result<(), LoadError> {
        if self.meshes.is_none() {
            return Err(LoadError::MissingArray("meshes"));
        }
        if self.buffers.is_none() && !self.buffer_views.is_empty() {
            return Err(LoadError::MissingArray("buffers"));
        }

        let buffers = self.buffers().len();
        for view in &self.buffer_views {
            check("buffer", view.buffer, buffers)?;
        }
        for accessor in &self.accessors {
            if let Some(view) = accessor.buffer_view {
                check("buffer view", view, self.buffer_views.len())?;
            }
        }
        for mesh in self.meshes() {
            for primitive in &mesh.primitives {
                for &accessor in primitive.attributes.values().chain(primitive.indices.iter()) {
                    check("accessor", accessor, self.accessors.len())?;
                }
                if let Some(material) = primitive.material {
                    check("material", material, self.materials.len())?;
                }
            }
        }
        for material in &self.materials {
            let pbr = material.pbr_metallic_roughness.as_ref();
            let spec_gloss = material.extensions.specular_glossiness.as_ref();
            let infos = [
                pbr.and_then(|pbr| pbr.base_color_texture),
                pbr.and_then(|pbr| pbr.metallic_roughness_texture),
                spec_gloss.and_then(|sg| sg.diffuse_texture),
                spec_gloss.and_then(|sg| sg.specular_glossiness_texture),
                material.normal_texture,
                material.occlusion_texture,
                material.emissive_texture,
            ];
            for info in infos.into_iter().flatten() {
                check("texture", info.index, self.textures.len())?;
            }
        }
        for texture in &self.textures {
            if let Some(source) = texture.source {
                check("image", source, self.images.len())?;
            }
        }
        for image in &self.images {
            if let Some(view) = image.buffer_view {
                check("buffer view", view, self.buffer_views.len())?;
            }
        }
        for skin in &self.skins {
            if let Some(accessor) = skin.inverse_bind_matrices {
                check("accessor", accessor, self.accessors.len())?;
            }
            for &joint in &skin.joints {
                check("node", joint, self.nodes.len())?;
            }
        }
        for animation in &self.animations {
            for channel in &animation.channels {
                check("animation sampler", channel.sampler, animation.samplers.len())?;
                if let Some(node) = channel.target.node {
                    check("node", node, self.nodes.len())?;
                }
            }
            for sampler in &animation.samplers {
                check("accessor", sampler.input, self.accessors.len())?;
                check("accessor", sampler.output, self.accessors.len())?;
            }
        }
        for scene in &self.scenes {
            for &node in &scene.nodes {
                check("node", node, self.nodes.len())?;
            }
        }
        for node in &self.nodes {
            if let Some(mesh) = node.mesh {
                check("mesh", mesh, self.meshes().len())?;
            }
            if let Some(skin) = node.skin {
                check("skin", skin, self.skins.len())?;
            }
        }
        if let Some(scene) = self.scene {
            if !self.scenes.is_empty() {
                check("scene", scene, self.scenes.len())?;
            }
        }
        self.validate_hierarchy()
    }

    /// Every node has at most one parent and no node is its own ancestor.
    fn validate_hierarchy(&self) -> Result<(), LoadError> {
        let mut parent: Vec<Option<usize>> = vec![None; self.nodes.len()];
        for (id, node) in self.nodes.iter().enumerate() {
            for &child in &node.children {
                check("node", child, self.nodes.len())?;
                if child == id || parent[child].replace(id).is_some() {
                    return Err(LoadError::NodeHierarchy(child));
                }
            }
        }
        for start in 0..self.nodes.len() {
            let mut current = start;
            let mut steps = 0;
            while let Some(up) = parent[current] {
                steps += 1;
                if up == start || steps > self.nodes.len() {
                    return Err(LoadError::NodeHierarchy(start));
                }
                current = up;
            }
        }
        Ok(())
    }
}
