mod common;

use approx::assert_relative_eq;
use glam::{Mat4, Vec2, Vec3};
use pbr_viewer::{
    assets::MemoryFetcher,
    render_context::{ParamValue, RenderContext},
    scene::{
        animation::{joint_matrices, pack_joint_matrix},
        Bounds, Document, SceneGraph, SceneLoader, SkinJoints,
    },
};

fn load(ctx: &mut RenderContext, fetcher: &MemoryFetcher, url: &str) -> SceneLoader {
    let mut loader = SceneLoader::new();
    loader.load(fetcher, url);
    assert!(loader.update(ctx, fetcher).unwrap());
    loader
}

#[test]
fn single_triangle_scene() {
    let (mut ctx, probe) = common::context();
    let fetcher = MemoryFetcher::new();
    fetcher
        .insert("models/triangle.gltf", common::TRIANGLE_GLTF)
        .insert("models/triangle.bin", common::triangle_bin());

    let loader = load(&mut ctx, &fetcher, "models/triangle.gltf");
    assert_eq!(
        loader.bounds(),
        Some(Bounds { min: Vec3::new(-2.0, -1.0, 0.0), max: Vec3::new(3.0, 4.0, 0.25) })
    );

    let geometry = loader.geometry().unwrap();
    assert_eq!(geometry.drawcall_count(), 1);
    assert_eq!(geometry.meshes[0].primitives[0].drawcall.vertex_count(), 3);

    let mut draws = Vec::new();
    assert!(loader.collect_draws(&mut draws));
    assert_eq!(draws.len(), 1);
    assert_eq!(draws[0].parameters.get("uModel"), Some(&ParamValue::Mat4(Mat4::IDENTITY)));
    assert!(draws[0].parameters.get("uAnimInfo").is_none());

    drop(draws);
    loader.destroy(&mut ctx);
    assert_eq!(probe.live_buffers(), 0);
    assert_eq!(probe.live_vertex_arrays(), 0);
}

#[test]
fn missing_buffer_fails_the_load() {
    let (mut ctx, _probe) = common::context();
    let fetcher = MemoryFetcher::new();
    fetcher.insert("models/triangle.gltf", common::TRIANGLE_GLTF);

    let mut loader = SceneLoader::new();
    loader.load(&fetcher, "models/triangle.gltf");
    assert!(loader.update(&mut ctx, &fetcher).is_err());
    assert!(loader.is_failed());
    assert!(!loader.update(&mut ctx, &fetcher).unwrap());

    let mut draws = Vec::new();
    assert!(!loader.collect_draws(&mut draws));
    assert!(draws.is_empty());
}

#[test]
fn skinned_scene_bakes_every_frame() {
    let (mut ctx, _probe) = common::context();
    let fetcher = MemoryFetcher::new();
    fetcher.insert("rig/skinned.gltf", common::SKINNED_GLTF).insert("rig/skinned.bin", common::skinned_bin());

    let mut loader = load(&mut ctx, &fetcher, "rig/skinned.gltf");
    assert_eq!(loader.clips().len(), 1);
    let clip = &loader.clips()[0];
    assert_relative_eq!(clip.duration, 2.0);
    assert_eq!(clip.frame_count(), 49);

    let baked = loader.baked_skin(0, 0).unwrap();
    assert_eq!(baked.width(), 6);
    assert_eq!(baked.frames(), 49);
    assert_eq!(baked.data().len(), 6 * 49 * 4);
    let row_position = baked.row_position(0.5);

    loader.set_animation(0.5, 0).unwrap();
    let mut draws = Vec::new();
    assert!(loader.collect_draws(&mut draws));
    assert_eq!(draws.len(), 1);
    let Some(ParamValue::Vec2(info)) = draws[0].parameters.get("uAnimInfo") else {
        panic!("skinned draw without animation info");
    };
    assert_relative_eq!(info.x, 6.0);
    assert_relative_eq!(info.y, row_position);
    assert!(draws[0].parameters.get("uAnimTex").is_some());

    drop(draws);
    assert!(loader.set_animation(0.0, 3).is_err());
    loader.stop_animation();
    let mut draws = Vec::new();
    loader.collect_draws(&mut draws);
    assert_eq!(draws[0].parameters.get("uAnimInfo"), Some(&ParamValue::Vec2(Vec2::ZERO)));
}

#[test]
fn baked_rows_match_direct_evaluation() {
    let (mut ctx, _probe) = common::context();
    let fetcher = MemoryFetcher::new();
    fetcher.insert("rig/skinned.gltf", common::SKINNED_GLTF).insert("rig/skinned.bin", common::skinned_bin());
    let loader = load(&mut ctx, &fetcher, "rig/skinned.gltf");

    let document = Document::parse(common::SKINNED_GLTF.as_bytes()).unwrap();
    let buffers = vec![common::skinned_bin()];
    let graph = SceneGraph::from_document(&document);
    let skin = SkinJoints::from_document(&document, &buffers, 0).unwrap();
    let clip = &loader.clips()[0];
    let baked = loader.baked_skin(0, 0).unwrap();
    let frames = baked.frames() as usize;

    for frame in 0..frames {
        let time = clip.frame_time(frame);
        let expected: Vec<f32> =
            joint_matrices(&graph, Some(clip), &skin, time).iter().flat_map(pack_joint_matrix).collect();
        let row = baked.row(frame);
        assert_eq!(row.len(), expected.len());
        for (actual, expected) in row.iter().zip(&expected) {
            assert_relative_eq!(*actual, *expected, epsilon = 1e-5);
        }

        let position = baked.row_position(time);
        assert_eq!((position * frames as f32).floor() as usize, frame, "row position of frame {frame}");
    }
}
