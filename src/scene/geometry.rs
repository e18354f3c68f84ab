use std::collections::BTreeMap;

use glam::Vec3;

use super::{
    accessor::{check_range, view_bytes},
    document::{ComponentType, Document},
    LoadError,
};
use crate::render_context::{
    AttributeBinding, Buffer, BufferKind, DataType, Drawcall, IndexBinding, IndexType, RenderContext, Topology,
};

/// glTF attribute semantic to shader attribute name.
pub const ATTRIBUTE_NAMES: [(&str, &str); 9] = [
    ("POSITION", "aLocalPosition"),
    ("NORMAL", "aNormal"),
    ("TANGENT", "aTangent"),
    ("TEXCOORD_0", "aUV0"),
    ("TEXCOORD_1", "aUV1"),
    ("TEXCOORD_2", "aUV2"),
    ("COLOR_0", "aColor"),
    ("JOINTS_0", "aJoints"),
    ("WEIGHTS_0", "aWeights"),
];

pub fn attribute_name(semantic: &str) -> Option<&'static str> {
    ATTRIBUTE_NAMES.iter().find(|(name, _)| *name == semantic).map(|(_, attribute)| *attribute)
}

fn data_type(component: ComponentType) -> DataType {
    match component {
        ComponentType::SignedByte => DataType::Byte,
        ComponentType::UnsignedByte => DataType::UnsignedByte,
        ComponentType::SignedShort => DataType::Short,
        ComponentType::UnsignedShort => DataType::UnsignedShort,
        ComponentType::UnsignedInt => DataType::UnsignedInt,
        ComponentType::Float => DataType::Float,
    }
}

fn topology(mode: Option<u32>) -> Option<Topology> {
    Some(match mode.unwrap_or(4) {
        0 => Topology::Points,
        1 => Topology::Lines,
        2 => Topology::LineLoop,
        3 => Topology::LineStrip,
        4 => Topology::Triangles,
        5 => Topology::TriangleStrip,
        6 => Topology::TriangleFan,
        _ => return None,
    })
}

/// Axis-aligned box accumulated from POSITION accessor min/max.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl Bounds {
    pub const EMPTY: Bounds = Bounds { min: Vec3::splat(f32::INFINITY), max: Vec3::splat(f32::NEG_INFINITY) };

    pub fn is_empty(&self) -> bool {
        self.min.cmpgt(self.max).any()
    }

    pub fn extend(&mut self, min: Vec3, max: Vec3) {
        self.min = self.min.min(min);
        self.max = self.max.max(max);
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }
}

pub struct GeometryPrimitive {
    pub material: Option<usize>,
    pub drawcall: Drawcall,
}

pub struct GeometryMesh {
    pub name: Option<String>,
    pub primitives: Vec<GeometryPrimitive>,
}

/// GPU-resident meshes of a document. Buffers are created per buffer view on first use,
/// so views shared between primitives are uploaded once.
pub struct Geometry {
    pub meshes: Vec<GeometryMesh>,
    pub bounds: Bounds,
    buffers: Vec<Option<Buffer>>,
}

struct ViewBuffers<'a> {
    document: &'a Document,
    data: &'a [Vec<u8>],
    buffers: Vec<Option<Buffer>>,
}

impl ViewBuffers<'_> {
    fn get(&mut self, ctx: &mut RenderContext, view: usize, kind: BufferKind) -> Result<&Buffer, LoadError> {
        if let Some(existing) = &self.buffers[view] {
            if existing.kind() != kind {
                return Err(LoadError::BufferKindConflict(view));
            }
        } else {
            let bytes = view_bytes(self.document, self.data, view)?;
            let mut buffer = match kind {
                BufferKind::Vertex => ctx.create_vertex_buffer(),
                BufferKind::Index => ctx.create_index_buffer(),
            };
            buffer.set_data(ctx, bytes)?;
            self.buffers[view] = Some(buffer);
        }
        self.buffers[view].as_ref().ok_or(LoadError::DanglingReference { what: "buffer view", index: view })
    }
}

impl Geometry {
    pub fn build(ctx: &mut RenderContext, document: &Document, data: &[Vec<u8>]) -> Result<Self, LoadError> {
        let mut views = ViewBuffers { document, data, buffers: (0..document.buffer_views.len()).map(|_| None).collect() };
        let mut bounds = Bounds::EMPTY;
        let mut meshes = Vec::with_capacity(document.meshes().len());

        let result = (|| -> Result<(), LoadError> {
            for (mesh_id, mesh) in document.meshes().iter().enumerate() {
                // drawcalls live in `meshes` as soon as they exist, the error path destroys them from there
                meshes.push(GeometryMesh { name: mesh.name.clone(), primitives: Vec::with_capacity(mesh.primitives.len()) });
                for (primitive_id, primitive) in mesh.primitives.iter().enumerate() {
                    let mut attributes = BTreeMap::new();
                    let mut vertex_count: Option<usize> = None;
                    for (semantic, &accessor_id) in &primitive.attributes {
                        let Some(name) = attribute_name(semantic) else {
                            log::debug!("mesh {mesh_id}: skipping attribute {semantic}");
                            continue;
                        };
                        let accessor = &document.accessors[accessor_id];
                        let view = accessor
                            .buffer_view
                            .ok_or(LoadError::InvalidAccessor { accessor: accessor_id, reason: "vertex data needs a buffer view" })?;
                        check_range(document, accessor_id)?;

                        if semantic == "POSITION" {
                            if let (Some(min), Some(max)) = (&accessor.min, &accessor.max) {
                                if min.len() >= 3 && max.len() >= 3 {
                                    bounds.extend(Vec3::from_slice(min), Vec3::from_slice(max));
                                }
                            }
                        }

                        let buffer = views.get(ctx, view, BufferKind::Vertex)?;
                        attributes.insert(
                            name.to_string(),
                            AttributeBinding {
                                buffer: buffer.id(),
                                components: accessor.accessor_type.components() as u32,
                                data_type: data_type(accessor.component_type),
                                normalized: accessor.normalized,
                                byte_stride: document.buffer_views[view].byte_stride.unwrap_or(0) as u32,
                                byte_offset: accessor.byte_offset as u32,
                            },
                        );
                        vertex_count = Some(vertex_count.map_or(accessor.count, |count| count.min(accessor.count)));
                    }
                    let Some(mut count) = vertex_count else {
                        return Err(LoadError::NoAttributes { mesh: mesh_id, primitive: primitive_id });
                    };

                    let mut indices = None;
                    if let Some(accessor_id) = primitive.indices {
                        let accessor = &document.accessors[accessor_id];
                        let index_type = match accessor.component_type {
                            ComponentType::UnsignedByte => IndexType::U8,
                            ComponentType::UnsignedShort => IndexType::U16,
                            ComponentType::UnsignedInt => IndexType::U32,
                            _ => return Err(LoadError::InvalidAccessor { accessor: accessor_id, reason: "indices must be unsigned" }),
                        };
                        let view = accessor
                            .buffer_view
                            .ok_or(LoadError::InvalidAccessor { accessor: accessor_id, reason: "index data needs a buffer view" })?;
                        check_range(document, accessor_id)?;
                        let buffer = views.get(ctx, view, BufferKind::Index)?;
                        indices = Some(IndexBinding { buffer: buffer.id(), index_type, byte_offset: accessor.byte_offset as u32 });
                        count = accessor.count;
                    }

                    let topology = topology(primitive.mode)
                        .ok_or(LoadError::DanglingReference { what: "primitive mode", index: primitive.mode.unwrap_or(0) as usize })?;
                    let mut drawcall = ctx.create_drawcall(topology, count as u32);
                    drawcall.bind(ctx);
                    let configured = drawcall
                        .set_attributes(ctx, attributes)
                        .and_then(|drawcall| drawcall.set_indices(ctx, indices))
                        .map(|_| ());
                    drawcall.unbind(ctx);
                    if let Err(error) = configured {
                        drawcall.destroy(ctx);
                        return Err(error.into());
                    }
                    meshes[mesh_id].primitives.push(GeometryPrimitive { material: primitive.material, drawcall });
                }
            }
            Ok(())
        })();

        let mut geometry = Self { meshes, bounds, buffers: views.buffers };
        if let Err(error) = result {
            geometry.destroy(ctx);
            return Err(error);
        }
        log::info!("geometry built: {} meshes, {} buffers", geometry.meshes.len(), geometry.buffer_count());
        Ok(geometry)
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.iter().flatten().count()
    }

    pub fn drawcall_count(&self) -> usize {
        self.meshes.iter().map(|mesh| mesh.primitives.len()).sum()
    }

    pub fn destroy(self, ctx: &mut RenderContext) {
        for mesh in self.meshes {
            for primitive in mesh.primitives {
                primitive.drawcall.destroy(ctx);
            }
        }
        for buffer in self.buffers.into_iter().flatten() {
            buffer.destroy(ctx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_context::{headless::HeadlessApi, Capabilities};

    fn context() -> (RenderContext, crate::render_context::headless::HeadlessProbe) {
        let (api, probe) = HeadlessApi::new(Capabilities::FULL);
        (RenderContext::new(Box::new(api)), probe)
    }

    const SHARED: &str = r#"{
        "meshes": [{ "primitives": [
            { "attributes": { "POSITION": 0, "NORMAL": 1, "_CUSTOM": 1 }, "indices": 2 },
            { "attributes": { "POSITION": 0 }, "mode": 1 }
        ] }],
        "buffers": [{ "byteLength": 80 }],
        "bufferViews": [
            { "buffer": 0, "byteLength": 72, "byteStride": 24 },
            { "buffer": 0, "byteOffset": 72, "byteLength": 6 }
        ],
        "accessors": [
            { "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3", "min": [-1, 0, 0], "max": [1, 2, 0] },
            { "bufferView": 0, "byteOffset": 12, "componentType": 5126, "count": 2, "type": "VEC3" },
            { "bufferView": 1, "componentType": 5123, "count": 3, "type": "SCALAR" }
        ]
    }"#;

    #[test]
    fn shared_views_upload_once() {
        let (mut ctx, probe) = context();
        let document = Document::parse(SHARED.as_bytes()).unwrap();
        let geometry = Geometry::build(&mut ctx, &document, &[vec![0u8; 80]]).unwrap();

        assert_eq!(geometry.buffer_count(), 2);
        assert_eq!(probe.live_buffers(), 2);
        let first = &geometry.meshes[0].primitives[0].drawcall;
        assert_eq!(first.vertex_count(), 3);
        assert_eq!(first.shader_key().as_str(), "aLocalPosition,aNormal|");
        assert_eq!(first.indices().map(|i| i.index_type), Some(IndexType::U16));
        assert_eq!(first.attributes()["aNormal"].byte_offset, 12);
        assert_eq!(first.attributes()["aNormal"].byte_stride, 24);

        let second = &geometry.meshes[0].primitives[1].drawcall;
        assert_eq!(second.topology(), Topology::Lines);
        assert_eq!(geometry.bounds, Bounds { min: Vec3::new(-1.0, 0.0, 0.0), max: Vec3::new(1.0, 2.0, 0.0) });

        geometry.destroy(&mut ctx);
        assert_eq!(probe.live_buffers(), 0);
    }

    #[test]
    fn vertex_count_is_the_smallest_attribute_count() {
        let (mut ctx, _probe) = context();
        let json = SHARED.replace(r#""indices": 2"#, r#""material": null"#);
        let document = Document::parse(json.as_bytes()).unwrap();
        let geometry = Geometry::build(&mut ctx, &document, &[vec![0u8; 80]]).unwrap();
        assert_eq!(geometry.meshes[0].primitives[0].drawcall.vertex_count(), 2);
    }

    #[test]
    fn view_used_as_vertex_and_index_data_is_rejected() {
        let (mut ctx, probe) = context();
        let json = SHARED.replace(r#""indices": 2"#, r#""indices": 1"#).replace(
            r#"{ "bufferView": 0, "byteOffset": 12, "componentType": 5126, "count": 2, "type": "VEC3" }"#,
            r#"{ "bufferView": 0, "byteOffset": 12, "componentType": 5125, "count": 2, "type": "SCALAR" }"#,
        );
        let document = Document::parse(json.as_bytes()).unwrap();
        let result = Geometry::build(&mut ctx, &document, &[vec![0u8; 80]]);
        assert!(matches!(result, Err(LoadError::BufferKindConflict(0))));
        assert_eq!(probe.live_buffers(), 0);
    }

    #[test]
    fn failing_primitive_releases_earlier_drawcalls() {
        let (mut ctx, probe) = context();
        let json = SHARED.replace(r#""mode": 1"#, r#""indices": 3"#).replace(
            r#"{ "bufferView": 1, "componentType": 5123, "count": 3, "type": "SCALAR" }"#,
            r#"{ "bufferView": 1, "componentType": 5123, "count": 3, "type": "SCALAR" },
            { "bufferView": 0, "componentType": 5125, "count": 3, "type": "SCALAR" }"#,
        );
        let document = Document::parse(json.as_bytes()).unwrap();
        let result = Geometry::build(&mut ctx, &document, &[vec![0u8; 80]]);
        assert!(matches!(result, Err(LoadError::BufferKindConflict(0))));
        assert_eq!(probe.live_vertex_arrays(), 0);
        assert_eq!(probe.live_buffers(), 0);
    }

    #[test]
    fn primitive_without_attributes_is_fatal() {
        let (mut ctx, _probe) = context();
        let json = r#"{ "meshes": [{ "primitives": [{ "attributes": {} }] }], "buffers": [] }"#;
        let document = Document::parse(json.as_bytes()).unwrap();
        assert!(matches!(
            Geometry::build(&mut ctx, &document, &[]),
            Err(LoadError::NoAttributes { mesh: 0, primitive: 0 })
        ));
    }
}
