use std::{collections::BTreeMap, fmt};

use super::{
    api::{AttributeBinding, DrawCommand, IndexBinding, IndexType, Topology, VertexArrayId},
    parameters::ShaderParameters,
    RenderContext, ResourceError,
};

/// Identifies a shader variant: the sorted attribute names plus every flag and its value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderKey(String);

impl ShaderKey {
    pub fn new<'a>(
        attributes: impl IntoIterator<Item = &'a str>,
        flags: impl IntoIterator<Item = (&'a str, i32)>,
    ) -> Self {
        let attributes: Vec<&str> = attributes.into_iter().collect();
        let flags: Vec<String> = flags.into_iter().map(|(name, value)| format!("{name}={value}")).collect();
        Self(format!("{}|{}", attributes.join(","), flags.join(",")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShaderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `aLocalPosition` -> `_A_LOCAL_POSITION`, `aUV0` -> `_A_UV0`.
pub fn macro_suffix(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let leading_lower = i == 0 && c.is_ascii_lowercase();
        if leading_lower || c.is_ascii_uppercase() {
            out.push('_');
            out.push(c.to_ascii_uppercase());
            if let Some(next) = chars.get(i + 1) {
                let same_class = if leading_lower { next.is_ascii_lowercase() } else { next.is_ascii_uppercase() };
                if same_class {
                    out.push(next.to_ascii_uppercase());
                    i += 1;
                }
            }
        } else {
            out.push(c.to_ascii_uppercase());
        }
        i += 1;
    }
    out
}

/// Geometry binding plus the per-drawcall shader flags and parameters.
#[derive(Debug)]
pub struct Drawcall {
    id: u64,
    vertex_array: Option<VertexArrayId>,
    topology: Topology,
    vertex_count: u32,
    attributes: BTreeMap<String, AttributeBinding>,
    indices: Option<IndexBinding>,
    flags: BTreeMap<String, i32>,
    shader_key: ShaderKey,
    pub parameters: ShaderParameters,
}

impl Drawcall {
    pub(crate) fn new(ctx: &mut RenderContext, topology: Topology, vertex_count: u32) -> Self {
        let id = ctx.allocate_drawcall_id();
        let vertex_array = if ctx.capabilities().vertex_arrays {
            Some(ctx.api().create_vertex_array())
        } else {
            None
        };
        let mut drawcall = Self {
            id,
            vertex_array,
            topology,
            vertex_count,
            attributes: BTreeMap::new(),
            indices: None,
            flags: BTreeMap::new(),
            shader_key: ShaderKey::default(),
            parameters: ShaderParameters::new(),
        };
        drawcall.refresh_key();
        drawcall
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn attributes(&self) -> &BTreeMap<String, AttributeBinding> {
        &self.attributes
    }

    pub fn indices(&self) -> Option<&IndexBinding> {
        self.indices.as_ref()
    }

    pub fn flags(&self) -> &BTreeMap<String, i32> {
        &self.flags
    }

    pub fn bind(&mut self, ctx: &mut RenderContext) -> &mut Self {
        ctx.bind_drawcall(Some(self.id), self.vertex_array);
        self
    }

    pub fn unbind(&mut self, ctx: &mut RenderContext) -> &mut Self {
        ctx.bind_drawcall(None, None);
        self
    }

    fn check_bound(&self, ctx: &RenderContext) -> Result<(), ResourceError> {
        if ctx.bound_drawcall() != Some(self.id) {
            return Err(ResourceError::NotBound("drawcall"));
        }
        Ok(())
    }

    /// Attribute `i` in name order is bound at location `i`.
    pub fn set_attributes(
        &mut self,
        ctx: &mut RenderContext,
        attributes: BTreeMap<String, AttributeBinding>,
    ) -> Result<&mut Self, ResourceError> {
        self.check_bound(ctx)?;
        if ctx.capabilities().vertex_arrays {
            for (location, binding) in attributes.values().enumerate() {
                ctx.api().vertex_attribute(location as u32, binding);
            }
        }
        self.attributes = attributes;
        self.refresh_key();
        Ok(self)
    }

    pub fn set_indices(&mut self, ctx: &mut RenderContext, indices: Option<IndexBinding>) -> Result<&mut Self, ResourceError> {
        self.check_bound(ctx)?;
        if let Some(binding) = &indices {
            if binding.index_type == IndexType::U32 && !ctx.capabilities().uint32_indices {
                return Err(ResourceError::Unsupported("32-bit indices"));
            }
        }
        if ctx.capabilities().vertex_arrays {
            ctx.api().index_buffer(indices.as_ref());
        }
        self.indices = indices;
        Ok(self)
    }

    pub fn set_flag(&mut self, name: &str, value: i32) -> &mut Self {
        if self.flags.get(name) != Some(&value) {
            self.flags.insert(name.to_string(), value);
            self.refresh_key();
        }
        self
    }

    pub fn remove_flag(&mut self, name: &str) -> &mut Self {
        if self.flags.remove(name).is_some() {
            self.refresh_key();
        }
        self
    }

    fn refresh_key(&mut self) {
        self.shader_key = ShaderKey::new(
            self.attributes.keys().map(String::as_str),
            self.flags.iter().map(|(name, value)| (name.as_str(), *value)),
        );
    }

    pub fn shader_key(&self) -> &ShaderKey {
        &self.shader_key
    }

    pub fn shader_macros(&self) -> String {
        let mut macros = String::new();
        for (location, name) in self.attributes.keys().enumerate() {
            let suffix = macro_suffix(name);
            macros.push_str(&format!("#define USE_ATTRIB{suffix} 1\n"));
            macros.push_str(&format!("#define ATTRIB_LOCATION{suffix} {location}\n"));
        }
        for (name, value) in &self.flags {
            macros.push_str(&format!("#define {name} {value}\n"));
        }
        macros
    }

    /// Issues the draw with whatever program and state are current.
    pub fn submit(&self, ctx: &mut RenderContext) {
        let api = ctx.api();
        api.bind_vertex_array(self.vertex_array);
        if self.vertex_array.is_none() {
            for (location, binding) in self.attributes.values().enumerate() {
                api.vertex_attribute(location as u32, binding);
            }
            api.index_buffer(self.indices.as_ref());
        }
        api.draw(&DrawCommand {
            topology: self.topology,
            count: self.vertex_count,
            indices: self.indices.as_ref().map(|binding| (binding.index_type, binding.byte_offset)),
        });
    }

    pub fn destroy(self, ctx: &mut RenderContext) {
        if ctx.bound_drawcall() == Some(self.id) {
            ctx.bind_drawcall(None, None);
        }
        if let Some(vertex_array) = self.vertex_array {
            ctx.api().delete_vertex_array(vertex_array);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_context::{
        api::{BufferId, Capabilities, DataType},
        headless::{ApiCall, HeadlessApi},
    };

    fn binding(buffer: BufferId, components: u32) -> AttributeBinding {
        AttributeBinding {
            buffer,
            components,
            data_type: DataType::Float,
            normalized: false,
            byte_stride: 0,
            byte_offset: 0,
        }
    }

    #[test]
    fn macro_names_follow_attribute_names() {
        assert_eq!(macro_suffix("aLocalPosition"), "_A_LOCAL_POSITION");
        assert_eq!(macro_suffix("aUV0"), "_A_UV0");
        assert_eq!(macro_suffix("aJoints"), "_A_JOINTS");
        assert_eq!(macro_suffix("aPos"), "_A_POS");
    }

    #[test]
    fn shader_key_ignores_insertion_order() {
        let (api, _probe) = HeadlessApi::new(Capabilities::FULL);
        let mut ctx = RenderContext::new(Box::new(api));
        let buffer = ctx.create_vertex_buffer();

        let mut first = ctx.create_drawcall(Topology::Triangles, 3);
        let mut attributes = BTreeMap::new();
        attributes.insert("aNormal".to_string(), binding(buffer.id(), 3));
        attributes.insert("aLocalPosition".to_string(), binding(buffer.id(), 3));
        first.bind(&mut ctx).set_attributes(&mut ctx, attributes.clone()).unwrap().unbind(&mut ctx);
        first.set_flag("USE_NORMAL_TEX", 1).set_flag("USE_BASECOLOR_TEX", 1);

        let mut second = ctx.create_drawcall(Topology::Triangles, 3);
        second.bind(&mut ctx).set_attributes(&mut ctx, attributes).unwrap().unbind(&mut ctx);
        second.set_flag("USE_BASECOLOR_TEX", 1).set_flag("USE_NORMAL_TEX", 1);

        assert_eq!(first.shader_key(), second.shader_key());
        assert_eq!(first.shader_key().as_str(), "aLocalPosition,aNormal|USE_BASECOLOR_TEX=1,USE_NORMAL_TEX=1");

        second.set_flag("USE_NORMAL_TEX", 0);
        assert_ne!(first.shader_key(), second.shader_key());
    }

    #[test]
    fn macros_list_attributes_then_flags() {
        let (api, _probe) = HeadlessApi::new(Capabilities::FULL);
        let mut ctx = RenderContext::new(Box::new(api));
        let buffer = ctx.create_vertex_buffer();
        let mut drawcall = ctx.create_drawcall(Topology::Triangles, 3);
        let mut attributes = BTreeMap::new();
        attributes.insert("aUV0".to_string(), binding(buffer.id(), 2));
        attributes.insert("aLocalPosition".to_string(), binding(buffer.id(), 3));
        drawcall.bind(&mut ctx).set_attributes(&mut ctx, attributes).unwrap().unbind(&mut ctx);
        drawcall.set_flag("USE_EMISSIVE_TEX", 1);

        assert_eq!(
            drawcall.shader_macros(),
            "#define USE_ATTRIB_A_LOCAL_POSITION 1\n\
             #define ATTRIB_LOCATION_A_LOCAL_POSITION 0\n\
             #define USE_ATTRIB_A_UV0 1\n\
             #define ATTRIB_LOCATION_A_UV0 1\n\
             #define USE_EMISSIVE_TEX 1\n"
        );
    }

    #[test]
    fn editing_requires_binding() {
        let (api, _probe) = HeadlessApi::new(Capabilities::FULL);
        let mut ctx = RenderContext::new(Box::new(api));
        let mut drawcall = ctx.create_drawcall(Topology::Triangles, 3);
        assert!(matches!(drawcall.set_indices(&mut ctx, None), Err(ResourceError::NotBound("drawcall"))));
    }

    #[test]
    fn reduced_path_reissues_attributes_per_draw() {
        let (api, probe) = HeadlessApi::new(Capabilities::REDUCED);
        let mut ctx = RenderContext::new(Box::new(api));
        let buffer = ctx.create_vertex_buffer();
        let mut drawcall = ctx.create_drawcall(Topology::Triangles, 3);
        let mut attributes = BTreeMap::new();
        attributes.insert("aLocalPosition".to_string(), binding(buffer.id(), 3));
        drawcall.bind(&mut ctx).set_attributes(&mut ctx, attributes).unwrap().unbind(&mut ctx);
        assert_eq!(probe.live_vertex_arrays(), 0);
        probe.clear_calls();

        drawcall.submit(&mut ctx);
        drawcall.submit(&mut ctx);
        assert_eq!(probe.count(|call| matches!(call, ApiCall::VertexAttribute { location: 0, .. })), 2);
        assert_eq!(probe.draw_count(), 2);
    }

    #[test]
    fn reduced_path_rejects_32_bit_indices() {
        let (api, _probe) = HeadlessApi::new(Capabilities::REDUCED);
        let mut ctx = RenderContext::new(Box::new(api));
        let buffer = ctx.create_index_buffer();
        let mut drawcall = ctx.create_drawcall(Topology::Triangles, 3);
        drawcall.bind(&mut ctx);
        let indices = IndexBinding { buffer: buffer.id(), index_type: IndexType::U32, byte_offset: 0 };
        assert!(matches!(drawcall.set_indices(&mut ctx, Some(indices)), Err(ResourceError::Unsupported(_))));
    }
}
