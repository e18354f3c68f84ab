use glam::{Mat4, Vec2};

use crate::{
    assets::{AssetFetcher, FetchError},
    ibl::IblProduct,
    render_context::{
        fullscreen::FullscreenTriangle, render_target::Attachment, DepthFunc, DrawRequest, Filter, PixelFormat,
        RenderContext, RenderPass, RenderPassError, RenderTarget, ResourceError, ShaderParameters, Texture,
        TextureKind, Wrap,
    },
    scene::SceneLoader,
};

#[derive(Debug, thiserror::Error)]
pub enum RendererError {
    #[error("shader source unavailable: {0}")]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Pass(#[from] RenderPassError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Projection {
    pub fovy_degrees: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Projection {
    fn default() -> Self {
        Self { fovy_degrees: 70.0, near: 0.1, far: 10000.0 }
    }
}

#[derive(Clone, Debug)]
pub struct RendererShaders {
    pub std_vertex: String,
    pub std_fragment: String,
    pub post_vertex: String,
    pub post_fragment: String,
}

impl RendererShaders {
    pub fn in_dir(dir: &str) -> Self {
        let dir = dir.trim_end_matches('/');
        Self {
            std_vertex: format!("{dir}/std_vs.glsl"),
            std_fragment: format!("{dir}/std_fs.glsl"),
            post_vertex: format!("{dir}/postprocess/pp_common_vs.glsl"),
            post_fragment: format!("{dir}/postprocess/pp_final_fs.glsl"),
        }
    }
}

/// Off-screen color and depth the scene is shaded into before compositing.
struct SceneTarget {
    color: Texture,
    depth: Texture,
    target: RenderTarget,
}

impl SceneTarget {
    fn new(ctx: &mut RenderContext, width: u32, height: u32) -> Result<Self, ResourceError> {
        let mut color = ctx.create_texture(TextureKind::D2);
        let mut depth = ctx.create_texture(TextureKind::D2);
        let mut target = ctx.create_render_target();
        let built = (|| -> Result<(), ResourceError> {
            color
                .bind(ctx)
                .set_data(ctx, width, height, PixelFormat::Rgba16F, None)?
                .set_sampler(ctx, Filter::Bilinear, Wrap::Clamp)?;
            depth.bind(ctx).set_data(ctx, width, height, PixelFormat::Depth, None)?;
            target
                .bind(ctx)
                .set_color_attachments(ctx, &[Attachment::texture(&color)])?
                .set_depth_attachment(ctx, Some(&depth))?;
            Ok(())
        })();
        let scene_target = Self { color, depth, target };
        match built {
            Ok(()) => Ok(scene_target),
            Err(error) => {
                scene_target.destroy(ctx);
                Err(error)
            }
        }
    }

    fn destroy(self, ctx: &mut RenderContext) {
        self.target.destroy(ctx);
        self.color.destroy(ctx);
        self.depth.destroy(ctx);
    }
}

/// Frame orchestration: shades the loader's drawcalls with image based lighting into an
/// off-screen target, then composites it over the environment onto the surface.
pub struct Renderer {
    projection_settings: Projection,
    view: Mat4,
    projection: Mat4,
    size: (u32, u32),
    projection_updates: usize,
    std_pass: RenderPass,
    post_pass: RenderPass,
    triangle: FullscreenTriangle,
    scene_target: Option<SceneTarget>,
    lighting: bool,
}

impl Renderer {
    pub fn new(
        ctx: &mut RenderContext,
        fetcher: &dyn AssetFetcher,
        shaders: &RendererShaders,
        projection: Projection,
    ) -> Result<Self, RendererError> {
        let mut std_pass = RenderPass::from_source_urls("std", fetcher, &shaders.std_vertex, &shaders.std_fragment);
        std_pass.set_load_action(false, false);

        let mut post_pass = RenderPass::from_source_urls("final", fetcher, &shaders.post_vertex, &shaders.post_fragment);
        post_pass
            .set_load_action(true, true)
            .set_depth_func(DepthFunc::LessEqual)
            .set_depth_write(false)
            .set_shader_flag("USE_CUBEMAP_TEXCOORD", 1)?
            .set_shader_flag("KEEP_INPUT_ASPECT", 1)?;

        Ok(Self {
            projection_settings: projection,
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            size: (0, 0),
            projection_updates: 0,
            std_pass,
            post_pass,
            triangle: FullscreenTriangle::new(ctx)?,
            scene_target: None,
            lighting: false,
        })
    }

    pub fn set_view(&mut self, view: Mat4) {
        self.view = view;
    }

    pub fn view(&self) -> Mat4 {
        self.view
    }

    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    /// How often the projection was rebuilt; only surface size changes trigger it.
    pub fn projection_updates(&self) -> usize {
        self.projection_updates
    }

    pub fn has_lighting(&self) -> bool {
        self.lighting
    }

    /// Binds the lighting textures into both passes. Call once the bake has finished.
    pub fn set_lighting(&mut self, ctx: &mut RenderContext, ibl: &IblProduct) -> Result<(), RendererError> {
        let std_params = ShaderParameters::new()
            .with("uIrradianceMap", &ibl.irradiance)
            .with("uRadianceMap", &ibl.radiance)
            .with("uBRDF", &ibl.brdf_lut)
            .with("uRadianceMaxLod", ibl.radiance_levels.saturating_sub(1) as f32);
        self.std_pass.set_shader_parameters(ctx, &std_params)?;
        let post_params = ShaderParameters::new().with("uBackGround", &ibl.env_cube).with("uBRDF", &ibl.brdf_lut);
        self.post_pass.set_shader_parameters(ctx, &post_params)?;
        self.lighting = true;
        Ok(())
    }

    fn update_projection(&mut self, ctx: &mut RenderContext) -> Result<(), RendererError> {
        let size = ctx.surface_size();
        if size == self.size {
            return Ok(());
        }
        self.size = size;
        let (width, height) = size;
        let aspect = width.max(1) as f32 / height.max(1) as f32;
        let Projection { fovy_degrees, near, far } = self.projection_settings;
        self.projection = if ctx.capabilities().depth_zero_to_one {
            Mat4::perspective_rh(fovy_degrees.to_radians(), aspect, near, far)
        } else {
            Mat4::perspective_rh_gl(fovy_degrees.to_radians(), aspect, near, far)
        };
        self.projection_updates += 1;
        log::debug!("surface {width}x{height}, projection rebuilt");

        if let Some(target) = self.scene_target.take() {
            target.destroy(ctx);
        }
        if width > 0 && height > 0 {
            self.scene_target = Some(SceneTarget::new(ctx, width, height)?);
        }
        Ok(())
    }

    /// Renders one frame and returns the number of scene draws issued. Nothing is drawn while
    /// the scene, the lighting or the pass shaders are still loading.
    pub fn tick(&mut self, ctx: &mut RenderContext, loader: &SceneLoader) -> Result<usize, RendererError> {
        self.std_pass.poll_source()?;
        self.post_pass.poll_source()?;
        self.update_projection(ctx)?;

        if !loader.is_ready() || !self.lighting || !self.std_pass.is_ready() || !self.post_pass.is_ready() {
            return Ok(0);
        }
        let Some(scene_target) = &mut self.scene_target else {
            return Ok(0);
        };

        let mut draws = Vec::new();
        loader.collect_draws(&mut draws);

        let view_params = ShaderParameters::new()
            .with("uView", self.view)
            .with("uProj", self.projection)
            .with("uInvView", self.view.inverse());
        self.std_pass.set_shader_parameters(ctx, &view_params)?;
        let issued = self.std_pass.execute(ctx, &draws, Some(&mut scene_target.target))?;

        let (width, height) = self.size;
        let post_params = ShaderParameters::new()
            .with("uColorBuffer", &scene_target.color)
            .with("uInvViewProj", (self.projection * self.view).inverse())
            .with("uBufferSize", Vec2::new(width as f32, height as f32));
        self.post_pass.set_shader_parameters(ctx, &post_params)?;
        self.post_pass.execute(ctx, &[DrawRequest::new(self.triangle.drawcall())], None)?;
        Ok(issued)
    }

    pub fn destroy(self, ctx: &mut RenderContext) {
        self.std_pass.destroy(ctx);
        self.post_pass.destroy(ctx);
        self.triangle.destroy(ctx);
        if let Some(target) = self.scene_target {
            target.destroy(ctx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assets::MemoryFetcher,
        ibl::{IblBaker, IblSettings, IblShaders},
        render_context::{
            headless::{ApiCall, HeadlessApi, HeadlessProbe},
            Capabilities,
        },
    };

    const STD_VS: &str = "#version 450
layout(location = 0) in vec3 aLocalPosition;
layout(set = 0, binding = 0) uniform Params {
    mat4 uModel;
    mat4 uView;
    mat4 uProj;
};
void main() {
    gl_Position = uProj * uView * uModel * vec4(aLocalPosition, 1.0);
}
";

    const STD_FS: &str = "#version 450
layout(location = 0) out vec4 oColor;
layout(set = 0, binding = 0) uniform Params {
    mat4 uModel;
    mat4 uView;
    mat4 uProj;
};
layout(set = 0, binding = 1) uniform textureCube uIrradianceMap;
layout(set = 0, binding = 2) uniform sampler uIrradianceMapSampler;
void main() {
    oColor = texture(samplerCube(uIrradianceMap, uIrradianceMapSampler), vec3(0.0, 0.0, 1.0));
}
";

    const POST_VS: &str = "#version 450
layout(location = 0) in vec2 aPosition;
layout(location = 0) out vec2 vUV;
void main() {
    vUV = aPosition * 0.5 + 0.5;
    gl_Position = vec4(aPosition, 0.0, 1.0);
}
";

    const POST_FS: &str = "#version 450
layout(location = 0) in vec2 vUV;
layout(location = 0) out vec4 oColor;
layout(set = 0, binding = 1) uniform texture2D uColorBuffer;
layout(set = 0, binding = 2) uniform sampler uColorBufferSampler;
void main() {
    oColor = texture(sampler2D(uColorBuffer, uColorBufferSampler), vUV);
}
";

    const TRIANGLE: &str = r#"{
        "scenes": [{ "nodes": [0] }],
        "nodes": [{ "mesh": 0 }],
        "meshes": [{ "primitives": [{ "attributes": { "POSITION": 0 } }] }],
        "buffers": [{ "byteLength": 36, "uri": "triangle.bin" }],
        "bufferViews": [{ "buffer": 0, "byteLength": 36 }],
        "accessors": [{ "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3" }]
    }"#;

    fn fixture() -> (RenderContext, HeadlessProbe, MemoryFetcher, Renderer) {
        let (api, probe) = HeadlessApi::new(Capabilities::FULL);
        let mut ctx = RenderContext::new(Box::new(api));
        let fetcher = MemoryFetcher::new();
        fetcher
            .insert("shaders/std_vs.glsl", STD_VS)
            .insert("shaders/std_fs.glsl", STD_FS)
            .insert("shaders/postprocess/pp_common_vs.glsl", POST_VS)
            .insert("shaders/postprocess/pp_final_fs.glsl", POST_FS);
        let renderer = Renderer::new(&mut ctx, &fetcher, &RendererShaders::in_dir("shaders"), Projection::default()).unwrap();
        (ctx, probe, fetcher, renderer)
    }

    fn ready_loader(ctx: &mut RenderContext, fetcher: &MemoryFetcher) -> SceneLoader {
        let positions: [f32; 9] = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        fetcher.insert("scene.gltf", TRIANGLE).insert("triangle.bin", bytemuck::cast_slice(&positions).to_vec());
        let mut loader = SceneLoader::new();
        loader.load(fetcher, "scene.gltf");
        for _ in 0..4 {
            if loader.update(ctx, fetcher).unwrap() {
                break;
            }
        }
        assert!(loader.is_ready());
        loader
    }

    #[test]
    fn projection_only_rebuilt_on_resize() {
        let (mut ctx, probe, _fetcher, mut renderer) = fixture();
        let loader = SceneLoader::new();
        renderer.tick(&mut ctx, &loader).unwrap();
        renderer.tick(&mut ctx, &loader).unwrap();
        assert_eq!(renderer.projection_updates(), 1);

        probe.set_surface_size(800, 600);
        renderer.tick(&mut ctx, &loader).unwrap();
        renderer.tick(&mut ctx, &loader).unwrap();
        assert_eq!(renderer.projection_updates(), 2);
        let expected = Mat4::perspective_rh_gl(70f32.to_radians(), 800.0 / 600.0, 0.1, 10000.0);
        assert!(renderer.projection().abs_diff_eq(expected, 1e-6));
    }

    #[test]
    fn nothing_drawn_until_scene_and_lighting_are_ready() {
        let (mut ctx, probe, fetcher, mut renderer) = fixture();
        let empty = SceneLoader::new();
        assert_eq!(renderer.tick(&mut ctx, &empty).unwrap(), 0);

        let loader = ready_loader(&mut ctx, &fetcher);
        assert_eq!(renderer.tick(&mut ctx, &loader).unwrap(), 0);
        assert_eq!(probe.draw_count(), 0);

        let settings = IblSettings { env_size: 8, irradiance_size: 4, radiance_size: 4, radiance_levels: 2, brdf_size: 4, ..IblSettings::default() };
        // never baked: the allocated textures only serve as bindings here
        let baker = IblBaker::new(&mut ctx, &fetcher, settings, &IblShaders::in_dir("missing"), "missing.hdr").unwrap();
        renderer.set_lighting(&mut ctx, baker.product()).unwrap();

        probe.clear_calls();
        let before = probe.draw_count();
        assert_eq!(renderer.tick(&mut ctx, &loader).unwrap(), 1);
        let draws = probe.draws();
        assert_eq!(draws.len() - before, 2);
        let scene_draw = &draws[before];
        let composite = &draws[before + 1];
        assert!(scene_draw.framebuffer.is_some());
        assert_eq!(composite.framebuffer, None);
        assert_eq!(probe.count(|call| matches!(call, ApiCall::Clear { color: true, depth: true })), 1);

        baker.destroy(&mut ctx);
        loader.destroy(&mut ctx);
        renderer.destroy(&mut ctx);
    }
}
