mod common;

use pbr_viewer::{
    assets::MemoryFetcher,
    render_context::{fullscreen::FullscreenTriangle, DrawRequest, RenderPass, RenderPassError},
};

const VS: &str = "#version 450
layout(location = 0) in vec2 aPosition;
void main() {
    gl_Position = vec4(aPosition, 0.0, 1.0);
}
";

const FS: &str = "#version 450
layout(location = 0) out vec4 oColor;
layout(set = 0, binding = 0) uniform Params {
    vec4 uTint;
};
void main() {
    oColor = uTint;
}
";

#[test]
fn pass_without_source_draws_nothing() {
    let (mut ctx, probe) = common::context();
    let triangle = FullscreenTriangle::new(&mut ctx).unwrap();
    let mut pass = RenderPass::new("unready");

    let result = pass.execute(&mut ctx, &[DrawRequest::new(triangle.drawcall())], None);
    assert!(matches!(result, Err(RenderPassError::NotReady(_))));
    assert_eq!(probe.draw_count(), 0);

    pass.set_shader_source(VS, FS);
    assert_eq!(pass.execute(&mut ctx, &[DrawRequest::new(triangle.drawcall())], None).unwrap(), 1);
    assert_eq!(probe.draw_count(), 1);

    pass.destroy(&mut ctx);
    triangle.destroy(&mut ctx);
    assert_eq!(probe.live_programs(), 0);
}

#[test]
fn pass_waits_for_both_sources() {
    let (mut ctx, probe) = common::context();
    let fetcher = MemoryFetcher::deferred();
    fetcher.insert("shaders/fill_vs.glsl", VS).insert("shaders/fill_fs.glsl", FS);
    let triangle = FullscreenTriangle::new(&mut ctx).unwrap();
    let mut pass = RenderPass::from_source_urls("fill", &fetcher, "shaders/fill_vs.glsl", "shaders/fill_fs.glsl");

    assert!(!pass.poll_source().unwrap());
    fetcher.release("shaders/fill_vs.glsl");
    assert!(!pass.poll_source().unwrap());
    assert!(pass.execute(&mut ctx, &[DrawRequest::new(triangle.drawcall())], None).is_err());
    assert_eq!(probe.draw_count(), 0);

    fetcher.release("shaders/fill_fs.glsl");
    assert!(pass.poll_source().unwrap());
    assert_eq!(pass.execute(&mut ctx, &[DrawRequest::new(triangle.drawcall())], None).unwrap(), 1);
    assert_eq!(probe.draw_count(), 1);

    pass.destroy(&mut ctx);
    triangle.destroy(&mut ctx);
}

#[test]
fn missing_source_surfaces_as_fetch_error() {
    let fetcher = MemoryFetcher::new();
    fetcher.insert("shaders/fill_vs.glsl", VS);
    let mut pass = RenderPass::from_source_urls("fill", &fetcher, "shaders/fill_vs.glsl", "shaders/fill_fs.glsl");
    assert!(pass.poll_source().is_err());
    assert!(!pass.is_ready());
}

#[test]
fn flags_are_fixed_after_first_compile() {
    let (mut ctx, _probe) = common::context();
    let triangle = FullscreenTriangle::new(&mut ctx).unwrap();
    let mut pass = RenderPass::new("fill");
    pass.set_shader_source(VS, FS);
    pass.set_shader_flag("USE_TINT", 1).unwrap();
    pass.execute(&mut ctx, &[DrawRequest::new(triangle.drawcall())], None).unwrap();

    assert!(matches!(pass.set_shader_flag("USE_TINT", 0), Err(RenderPassError::FlagsLocked(_))));
    assert!(pass.shader_macros(ctx.capabilities()).contains("#define USE_TINT 1"));

    pass.destroy(&mut ctx);
    triangle.destroy(&mut ctx);
}
