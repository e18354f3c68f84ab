use std::collections::HashMap;

use glam::{Mat4, Quat, Vec3};

use super::{
    accessor::{read_floats, read_mat4s},
    document::{AccessorType, AnimationSampler, Document},
    graph::{GraphNode, SceneGraph, Trs},
    LoadError,
};
use crate::render_context::{Filter, PixelFormat, RenderContext, Texture, TextureData, TextureKind, Wrap};

/// Baked samples per second of clip time.
pub const FRAMES_PER_SECOND: f32 = 24.0;

/// Bracketing key for `time`: the index of the upper key and the blend factor from the
/// key before it. Times before the first key clamp to key 0, times past the last key to
/// the last one with a factor of 1.
pub fn interpolate(keys: &[f32], time: f32) -> (usize, f32) {
    for (index, &key) in keys.iter().enumerate() {
        if key < time {
            continue;
        }
        if key > time && index > 0 {
            let previous = keys[index - 1];
            return (index, (time - previous) / (key - previous));
        }
        return (index, 1.0);
    }
    (keys.len().saturating_sub(1), 1.0)
}

#[derive(Clone, Debug)]
enum SamplerValues {
    Scalar(Vec<f32>),
    Vec3(Vec<Vec3>),
    Quat(Vec<Quat>),
}

/// Keyframes of one animated property, linear segments only.
#[derive(Clone, Debug)]
pub struct Sampler {
    keys: Vec<f32>,
    values: SamplerValues,
}

impl Sampler {
    fn read(document: &Document, buffers: &[Vec<u8>], sampler: &AnimationSampler) -> Result<Self, LoadError> {
        if sampler.interpolation != "LINEAR" {
            return Err(LoadError::UnsupportedInterpolation(sampler.interpolation.clone()));
        }
        if document.accessors[sampler.input].accessor_type != AccessorType::Scalar {
            return Err(LoadError::InvalidAccessor { accessor: sampler.input, reason: "keyframe times must be scalars" });
        }
        let keys = read_floats(document, buffers, sampler.input)?;
        let raw = read_floats(document, buffers, sampler.output)?;
        let values = match document.accessors[sampler.output].accessor_type {
            AccessorType::Scalar => SamplerValues::Scalar(raw),
            AccessorType::Vec3 => SamplerValues::Vec3(raw.chunks_exact(3).map(Vec3::from_slice).collect()),
            AccessorType::Vec4 => SamplerValues::Quat(raw.chunks_exact(4).map(Quat::from_slice).collect()),
            _ => {
                return Err(LoadError::InvalidAccessor { accessor: sampler.output, reason: "unsupported keyframe value type" })
            }
        };
        let count = match &values {
            SamplerValues::Scalar(values) => values.len(),
            SamplerValues::Vec3(values) => values.len(),
            SamplerValues::Quat(values) => values.len(),
        };
        if keys.is_empty() || count < keys.len() {
            return Err(LoadError::InvalidAccessor { accessor: sampler.output, reason: "fewer values than keyframes" });
        }
        Ok(Self { keys, values })
    }

    pub fn keys(&self) -> &[f32] {
        &self.keys
    }

    pub fn max_key(&self) -> f32 {
        self.keys.iter().copied().fold(0.0, f32::max)
    }

    /// Vector value at `time`; scalar channels are splatted (uniform scale).
    pub fn sample_vec3(&self, time: f32) -> Option<Vec3> {
        let (index, k) = interpolate(&self.keys, time);
        match &self.values {
            SamplerValues::Scalar(values) => {
                let value = if index == 0 { values[0] } else { values[index - 1] + (values[index] - values[index - 1]) * k };
                Some(Vec3::splat(value))
            }
            SamplerValues::Vec3(values) if index == 0 => Some(values[0]),
            SamplerValues::Vec3(values) => Some(values[index - 1].lerp(values[index], k)),
            SamplerValues::Quat(_) => None,
        }
    }

    pub fn sample_quat(&self, time: f32) -> Option<Quat> {
        let (index, k) = interpolate(&self.keys, time);
        match &self.values {
            SamplerValues::Quat(values) if index == 0 => Some(values[0].normalize()),
            SamplerValues::Quat(values) => Some(values[index - 1].normalize().slerp(values[index].normalize(), k)),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct NodeChannels {
    pub translation: Option<Sampler>,
    pub rotation: Option<Sampler>,
    pub scale: Option<Sampler>,
}

impl NodeChannels {
    /// Replaces the animated components of `base` and composes the local matrix.
    pub fn local_transform(&self, base: &Trs, time: f32) -> Mat4 {
        let trs = Trs {
            translation: self.translation.as_ref().and_then(|s| s.sample_vec3(time)).unwrap_or(base.translation),
            rotation: self.rotation.as_ref().and_then(|s| s.sample_quat(time)).unwrap_or(base.rotation),
            scale: self.scale.as_ref().and_then(|s| s.sample_vec3(time)).unwrap_or(base.scale),
        };
        trs.matrix()
    }
}

/// One animation: per-node channels and the clip duration.
#[derive(Clone, Debug)]
pub struct Clip {
    pub name: Option<String>,
    pub duration: f32,
    pub channels: HashMap<usize, NodeChannels>,
}

impl Clip {
    pub fn from_document(document: &Document, buffers: &[Vec<u8>], index: usize) -> Result<Self, LoadError> {
        let animation = document.animations.get(index).ok_or(LoadError::DanglingReference { what: "animation", index })?;
        let mut channels: HashMap<usize, NodeChannels> = HashMap::new();
        let mut duration = 0.0f32;
        for channel in &animation.channels {
            let Some(node) = channel.target.node else {
                continue;
            };
            if channel.target.path == "weights" {
                log::debug!("animation {index}: skipping morph weights channel of node {node}");
                continue;
            }
            let description = &animation.samplers[channel.sampler];
            let output = document.accessors[description.output].accessor_type;
            let fits = match channel.target.path.as_str() {
                "rotation" => output == AccessorType::Vec4,
                "translation" | "scale" => matches!(output, AccessorType::Vec3 | AccessorType::Scalar),
                _ => true,
            };
            if !fits {
                return Err(LoadError::InvalidAccessor {
                    accessor: description.output,
                    reason: "keyframe value type does not match the channel path",
                });
            }
            let sampler = Sampler::read(document, buffers, description)?;
            let end = document.accessors[description.input]
                .max
                .as_ref()
                .and_then(|max| max.first().copied())
                .unwrap_or_else(|| sampler.max_key());
            duration = duration.max(end);

            let entry = channels.entry(node).or_default();
            match channel.target.path.as_str() {
                "translation" => entry.translation = Some(sampler),
                "rotation" => entry.rotation = Some(sampler),
                "scale" => entry.scale = Some(sampler),
                other => log::debug!("animation {index}: unknown channel path {other}"),
            }
        }
        Ok(Self { name: animation.name.clone(), duration, channels })
    }

    pub fn animated_local(&self, id: usize, node: &GraphNode, time: f32) -> Option<Mat4> {
        self.channels.get(&id).map(|channels| channels.local_transform(&node.trs, time))
    }

    /// `floor(duration * 24) + 1` so both clip ends are sampled.
    pub fn frame_count(&self) -> usize {
        (self.duration.max(0.0) * FRAMES_PER_SECOND).floor() as usize + 1
    }

    pub fn frame_time(&self, frame: usize) -> f32 {
        let frames = self.frame_count();
        if frames < 2 {
            return 0.0;
        }
        self.duration * frame as f32 / (frames - 1) as f32
    }
}

/// Joint node ids and inverse bind matrices of a skin.
#[derive(Clone, Debug)]
pub struct SkinJoints {
    pub joints: Vec<usize>,
    pub inverse_binds: Vec<Mat4>,
}

impl SkinJoints {
    pub fn from_document(document: &Document, buffers: &[Vec<u8>], index: usize) -> Result<Self, LoadError> {
        let skin = document.skins.get(index).ok_or(LoadError::DanglingReference { what: "skin", index })?;
        let mut inverse_binds = match skin.inverse_bind_matrices {
            Some(accessor) => read_mat4s(document, buffers, accessor)?,
            None => Vec::new(),
        };
        inverse_binds.resize(skin.joints.len(), Mat4::IDENTITY);
        Ok(Self { joints: skin.joints.clone(), inverse_binds })
    }
}

/// Skinning matrices of every joint at `time`, evaluated directly from the graph.
pub fn joint_matrices(graph: &SceneGraph, clip: Option<&Clip>, skin: &SkinJoints, time: f32) -> Vec<Mat4> {
    let mut globals = vec![Mat4::IDENTITY; graph.nodes().len()];
    graph.traverse(
        Mat4::IDENTITY,
        |id, node| clip.and_then(|clip| clip.animated_local(id, node, time)),
        |id, global| globals[id] = *global,
    );
    skin.joints.iter().zip(&skin.inverse_binds).map(|(&joint, inverse_bind)| globals[joint] * *inverse_bind).collect()
}

/// First three components of each column, i.e. a GLSL `mat4x3`: three RGBA texels.
pub fn pack_joint_matrix(matrix: &Mat4) -> [f32; 12] {
    let mut packed = [0.0; 12];
    for (column, chunk) in packed.chunks_exact_mut(3).enumerate() {
        chunk.copy_from_slice(&matrix.col(column).truncate().to_array());
    }
    packed
}

/// Texels of the skin animation texture: one row per frame, three texels per joint.
pub fn bake_skin_data(graph: &SceneGraph, clip: &Clip, skin: &SkinJoints) -> Vec<f32> {
    let frames = clip.frame_count();
    let mut data = Vec::with_capacity(frames * skin.joints.len() * 12);
    for frame in 0..frames {
        for matrix in joint_matrices(graph, Some(clip), skin, clip.frame_time(frame)) {
            data.extend_from_slice(&pack_joint_matrix(&matrix));
        }
    }
    data
}

/// Vertical texture coordinate of clip time `time` in a texture of `frames` rows:
/// frame `k`'s timestamp lands on the centre of row `k`.
pub fn sample_row_position(frames: usize, duration: f32, time: f32) -> f32 {
    let frames = frames.max(1) as f32;
    if duration <= 0.0 {
        return 0.5 / frames;
    }
    (time / duration) * (frames - 1.0) / frames + 0.5 / frames
}

/// Baked animation of one skin for one clip.
pub struct BakedSkin {
    texture: Texture,
    width: u32,
    frames: u32,
    duration: f32,
    data: Vec<f32>,
}

impl BakedSkin {
    pub fn bake(ctx: &mut RenderContext, graph: &SceneGraph, clip: &Clip, skin: &SkinJoints) -> Result<Self, LoadError> {
        let data = bake_skin_data(graph, clip, skin);
        let width = (skin.joints.len() * 3) as u32;
        let frames = clip.frame_count() as u32;

        let mut texture = ctx.create_texture(TextureKind::D2);
        let uploaded = texture
            .bind(ctx)
            .set_data(ctx, width, frames, PixelFormat::Rgba16F, Some(TextureData::F32(&data)))
            .and_then(|texture| texture.set_sampler(ctx, Filter::Bilinear, Wrap::Clamp))
            .map(|_| ());
        if let Err(error) = uploaded {
            texture.destroy(ctx);
            return Err(error.into());
        }
        log::debug!("baked skin animation: {width}x{frames} texels over {:.2}s", clip.duration);
        Ok(Self { texture, width, frames, duration: clip.duration, data })
    }

    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn frames(&self) -> u32 {
        self.frames
    }

    /// Baked texels, row-major by frame.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn row(&self, frame: usize) -> &[f32] {
        let row = self.width as usize * 4;
        &self.data[frame * row..(frame + 1) * row]
    }

    pub fn row_position(&self, time: f32) -> f32 {
        sample_row_position(self.frames as usize, self.duration, time)
    }

    pub fn destroy(self, ctx: &mut RenderContext) {
        self.texture.destroy(ctx);
    }
}
