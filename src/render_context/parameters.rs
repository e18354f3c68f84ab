use std::collections::BTreeMap;

use glam::{IVec2, IVec3, IVec4, Mat3, Mat4, Vec2, Vec3, Vec4};

use super::{api::TextureId, texture::Texture};

/// Value of a named shader parameter. `Floats` feeds uniform arrays (and matrices)
/// from tightly packed components.
#[derive(Clone, Debug, PartialEq)]
pub enum ParamValue {
    Float(f32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Int(i32),
    IVec2(IVec2),
    IVec3(IVec3),
    IVec4(IVec4),
    Mat3(Mat3),
    Mat4(Mat4),
    Floats(Vec<f32>),
    Ints(Vec<i32>),
    Texture(TextureId),
}

impl From<f32> for ParamValue {
    fn from(value: f32) -> Self {
        ParamValue::Float(value)
    }
}

impl From<Vec2> for ParamValue {
    fn from(value: Vec2) -> Self {
        ParamValue::Vec2(value)
    }
}

impl From<Vec3> for ParamValue {
    fn from(value: Vec3) -> Self {
        ParamValue::Vec3(value)
    }
}

impl From<Vec4> for ParamValue {
    fn from(value: Vec4) -> Self {
        ParamValue::Vec4(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        ParamValue::Int(value)
    }
}

impl From<Mat3> for ParamValue {
    fn from(value: Mat3) -> Self {
        ParamValue::Mat3(value)
    }
}

impl From<Mat4> for ParamValue {
    fn from(value: Mat4) -> Self {
        ParamValue::Mat4(value)
    }
}

impl From<Vec<f32>> for ParamValue {
    fn from(value: Vec<f32>) -> Self {
        ParamValue::Floats(value)
    }
}

impl From<TextureId> for ParamValue {
    fn from(value: TextureId) -> Self {
        ParamValue::Texture(value)
    }
}

impl From<&Texture> for ParamValue {
    fn from(value: &Texture) -> Self {
        ParamValue::Texture(value.id())
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ShaderParameters {
    values: BTreeMap<String, ParamValue>,
}

impl ShaderParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, value: impl Into<ParamValue>) -> &mut Self {
        self.values.insert(name.to_string(), value.into());
        self
    }

    pub fn with(mut self, name: &str, value: impl Into<ParamValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<ParamValue> {
        self.values.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Later values win.
    pub fn merge(&mut self, other: &ShaderParameters) {
        for (name, value) in &other.values {
            self.values.insert(name.clone(), value.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
