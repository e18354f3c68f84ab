#![allow(dead_code)]

use glam::{Mat4, Quat, Vec3};
use pbr_viewer::render_context::{
    headless::{HeadlessApi, HeadlessProbe},
    Capabilities, RenderContext,
};

pub fn context() -> (RenderContext, HeadlessProbe) {
    let (api, probe) = HeadlessApi::new(Capabilities::FULL);
    (RenderContext::new(Box::new(api)), probe)
}

/// One node, one mesh, one unindexed triangle without a material.
pub const TRIANGLE_GLTF: &str = r#"{
    "asset": { "version": "2.0" },
    "scenes": [{ "nodes": [0] }],
    "nodes": [{ "name": "triangle", "mesh": 0 }],
    "meshes": [{ "primitives": [{ "attributes": { "POSITION": 0 } }] }],
    "buffers": [{ "byteLength": 36, "uri": "triangle.bin" }],
    "bufferViews": [{ "buffer": 0, "byteLength": 36 }],
    "accessors": [{
        "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
        "min": [-2, -1, 0], "max": [3, 4, 0.25]
    }]
}"#;

pub fn triangle_bin() -> Vec<u8> {
    let positions: [f32; 9] = [-2.0, -1.0, 0.0, 3.0, 0.0, 0.25, 0.0, 4.0, 0.0];
    bytemuck::cast_slice(&positions).to_vec()
}

/// Two-joint chain with a single rotation channel keyed at 0, 1 and 2 seconds.
pub const SKINNED_GLTF: &str = r#"{
    "asset": { "version": "2.0" },
    "scenes": [{ "nodes": [0, 2] }],
    "nodes": [
        { "name": "hip", "children": [1] },
        { "name": "knee", "translation": [0, 1, 0] },
        { "name": "leg", "mesh": 0, "skin": 0 }
    ],
    "meshes": [{ "primitives": [{
        "attributes": { "POSITION": 3, "JOINTS_0": 4, "WEIGHTS_0": 5 }
    }] }],
    "skins": [{ "joints": [0, 1], "inverseBindMatrices": 2 }],
    "animations": [{
        "name": "swing",
        "channels": [{ "sampler": 0, "target": { "node": 0, "path": "rotation" } }],
        "samplers": [{ "input": 0, "output": 1, "interpolation": "LINEAR" }]
    }],
    "buffers": [{ "byteLength": 248, "uri": "skinned.bin" }],
    "bufferViews": [
        { "buffer": 0, "byteLength": 12 },
        { "buffer": 0, "byteOffset": 12, "byteLength": 48 },
        { "buffer": 0, "byteOffset": 60, "byteLength": 128 },
        { "buffer": 0, "byteOffset": 188, "byteLength": 36 },
        { "buffer": 0, "byteOffset": 224, "byteLength": 12 },
        { "buffer": 0, "byteOffset": 236, "byteLength": 12 }
    ],
    "accessors": [
        { "bufferView": 0, "componentType": 5126, "count": 3, "type": "SCALAR", "min": [0], "max": [2] },
        { "bufferView": 1, "componentType": 5126, "count": 3, "type": "VEC4" },
        { "bufferView": 2, "componentType": 5126, "count": 2, "type": "MAT4" },
        { "bufferView": 3, "componentType": 5126, "count": 3, "type": "VEC3", "min": [0, 0, 0], "max": [1, 2, 0] },
        { "bufferView": 4, "componentType": 5121, "count": 3, "type": "VEC4" },
        { "bufferView": 5, "componentType": 5121, "count": 3, "type": "VEC4", "normalized": true }
    ]
}"#;

pub fn skinned_bin() -> Vec<u8> {
    let mut floats: Vec<f32> = vec![0.0, 1.0, 2.0];
    for key in [
        Quat::IDENTITY,
        Quat::from_rotation_x(std::f32::consts::FRAC_PI_2),
        Quat::from_rotation_x(std::f32::consts::PI),
    ] {
        floats.extend_from_slice(&key.to_array());
    }
    floats.extend_from_slice(&Mat4::IDENTITY.to_cols_array());
    floats.extend_from_slice(&Mat4::from_translation(Vec3::new(0.0, -1.0, 0.0)).to_cols_array());
    floats.extend_from_slice(&[0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 2.0, 0.0]);
    let mut bytes: Vec<u8> = bytemuck::cast_slice(&floats).to_vec();
    bytes.extend_from_slice(&[0, 0, 0, 0, 0, 1, 0, 0, 1, 1, 0, 0]);
    bytes.extend_from_slice(&[255, 0, 0, 0, 128, 127, 0, 0, 0, 255, 0, 0]);
    bytes
}
