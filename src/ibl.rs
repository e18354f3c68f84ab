//! Image based lighting precompute: panorama to environment cube, diffuse irradiance cube,
//! roughness filtered radiance mip chain and the BRDF integration table, all rendered with
//! full-screen passes.

use glam::{Mat4, Vec3};
use serde::Deserialize;

use crate::{
    assets::{AssetFetcher, FetchError, Panorama, Pending},
    render_context::{
        fullscreen::FullscreenTriangle, render_target::Attachment, Capabilities, DepthFunc, DrawRequest, Filter,
        PixelFormat, RenderContext, RenderPass, RenderPassError, RenderTarget, ResourceError, ShaderParameters,
        Texture, TextureData, TextureKind, Viewport, Wrap,
    },
};

#[derive(Debug, thiserror::Error)]
pub enum IblError {
    #[error("environment source unavailable: {0}")]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Pass(#[from] RenderPassError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct IblSettings {
    pub env_size: u32,
    pub irradiance_size: u32,
    pub radiance_size: u32,
    pub radiance_levels: u32,
    pub brdf_size: u32,
    pub roughness_min: f32,
    pub roughness_max: f32,
}

impl Default for IblSettings {
    fn default() -> Self {
        Self {
            env_size: 2048,
            irradiance_size: 32,
            radiance_size: 256,
            radiance_levels: 7,
            brdf_size: 16,
            roughness_min: 0.01,
            roughness_max: 0.99,
        }
    }
}

impl IblSettings {
    /// Mip levels actually rendered, limited by the radiance cube's chain.
    pub fn level_count(&self) -> u32 {
        let chain = 32 - self.radiance_size.max(1).leading_zeros();
        self.radiance_levels.clamp(1, chain)
    }

    /// Linear sweep from `roughness_min` at level 0 to `roughness_max` at the last level.
    pub fn roughness(&self, level: u32) -> f32 {
        let levels = self.level_count();
        if levels < 2 {
            return self.roughness_min;
        }
        let t = level as f32 / (levels - 1) as f32;
        self.roughness_min + (self.roughness_max - self.roughness_min) * t
    }
}

/// Shader urls of the precompute passes. Every pass uses the common full-screen vertex stage.
#[derive(Clone, Debug)]
pub struct IblShaders {
    pub vertex: String,
    pub env_cubemap: String,
    pub irradiance: String,
    pub radiance: String,
    pub brdf_lut: String,
}

impl IblShaders {
    pub fn in_dir(dir: &str) -> Self {
        let dir = dir.trim_end_matches('/');
        Self {
            vertex: format!("{dir}/postprocess/pp_common_vs.glsl"),
            env_cubemap: format!("{dir}/ibl/env_cubemap_fs.glsl"),
            irradiance: format!("{dir}/ibl/irradiance_fs.glsl"),
            radiance: format!("{dir}/ibl/radiance_fs.glsl"),
            brdf_lut: format!("{dir}/ibl/brdf_lut_fs.glsl"),
        }
    }
}

/// The four lighting textures. Allocated up front, filled as stages complete.
pub struct IblProduct {
    pub env_cube: Texture,
    pub irradiance: Texture,
    pub radiance: Texture,
    pub brdf_lut: Texture,
    /// Filled mip levels of `radiance`, level `i` holding roughness `IblSettings::roughness(i)`.
    pub radiance_levels: u32,
}

fn allocate_texture(ctx: &mut RenderContext, kind: TextureKind, size: u32, format: PixelFormat) -> Result<Texture, ResourceError> {
    let mut texture = ctx.create_texture(kind);
    if let Err(error) = texture.bind(ctx).set_data(ctx, size, size, format, None) {
        texture.destroy(ctx);
        return Err(error);
    }
    Ok(texture)
}

impl IblProduct {
    fn allocate(ctx: &mut RenderContext, settings: &IblSettings) -> Result<Self, ResourceError> {
        let env_cube = allocate_texture(ctx, TextureKind::Cube, settings.env_size, PixelFormat::R11G11B10F)?;
        let irradiance = allocate_texture(ctx, TextureKind::Cube, settings.irradiance_size, PixelFormat::R11G11B10F);
        let radiance = allocate_texture(ctx, TextureKind::Cube, settings.radiance_size, PixelFormat::R11G11B10F);
        let brdf_lut = allocate_texture(ctx, TextureKind::D2, settings.brdf_size, PixelFormat::Rgba16F);
        match (irradiance, radiance, brdf_lut) {
            (Ok(irradiance), Ok(radiance), Ok(brdf_lut)) => {
                Ok(Self { env_cube, irradiance, radiance, brdf_lut, radiance_levels: settings.level_count() })
            }
            (irradiance, radiance, brdf_lut) => {
                let mut first_error = None;
                env_cube.destroy(ctx);
                for result in [irradiance, radiance, brdf_lut] {
                    match result {
                        Ok(texture) => texture.destroy(ctx),
                        Err(error) => {
                            first_error.get_or_insert(error);
                        }
                    }
                }
                Err(first_error.unwrap_or(ResourceError::TextureNotReady))
            }
        }
    }

    pub fn destroy(self, ctx: &mut RenderContext) {
        let Self { env_cube, irradiance, radiance, brdf_lut, .. } = self;
        for texture in [env_cube, irradiance, radiance, brdf_lut] {
            texture.destroy(ctx);
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IblStage {
    EnvCubemap,
    Irradiance,
    Radiance,
    BrdfLut,
}

/// Gate state observed when a stage started drawing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StageEntry {
    pub stage: IblStage,
    pub shader_ready: bool,
    pub input_ready: bool,
}

struct StageSlot {
    stage: IblStage,
    pass: Option<RenderPass>,
    done: bool,
}

/// Inverse view-projection of each cube face (+X, -X, +Y, -Y, +Z, -Z) for a 90 degree
/// camera at the origin.
pub fn face_inverse_view_projections(capabilities: Capabilities) -> [Mat4; 6] {
    let projection = if capabilities.depth_zero_to_one {
        Mat4::perspective_rh(90f32.to_radians(), 1.0, 1.0, 10.0)
    } else {
        Mat4::perspective_rh_gl(90f32.to_radians(), 1.0, 1.0, 10.0)
    };
    let faces = [
        (Vec3::X, Vec3::NEG_Y),
        (Vec3::NEG_X, Vec3::NEG_Y),
        (Vec3::Y, Vec3::Z),
        (Vec3::NEG_Y, Vec3::NEG_Z),
        (Vec3::Z, Vec3::NEG_Y),
        (Vec3::NEG_Z, Vec3::NEG_Y),
    ];
    faces.map(|(direction, up)| (projection * Mat4::look_at_rh(Vec3::ZERO, direction, up)).inverse())
}

/// Drives the precompute from the frame loop. Each stage runs as soon as its shaders have
/// arrived and its input texture exists; the irradiance and radiance stages take the
/// environment cube as input, so they follow the cubemap conversion.
pub struct IblBaker {
    settings: IblSettings,
    product: IblProduct,
    panorama: Option<Pending<Panorama>>,
    source: Option<Texture>,
    stages: Vec<StageSlot>,
    triangle: Option<FullscreenTriangle>,
    target: Option<RenderTarget>,
    faces: [Mat4; 6],
    entries: Vec<StageEntry>,
}

impl IblBaker {
    pub fn new(
        ctx: &mut RenderContext,
        fetcher: &dyn AssetFetcher,
        settings: IblSettings,
        shaders: &IblShaders,
        panorama_url: &str,
    ) -> Result<Self, IblError> {
        let product = IblProduct::allocate(ctx, &settings)?;
        let triangle = match FullscreenTriangle::new(ctx) {
            Ok(triangle) => triangle,
            Err(error) => {
                product.destroy(ctx);
                return Err(error.into());
            }
        };

        let pass = |name: &str, fragment: &str, size: u32, cube: bool| -> Result<RenderPass, RenderPassError> {
            let mut pass = RenderPass::from_source_urls(name, fetcher, &shaders.vertex, fragment);
            pass.set_viewport(Some(Viewport { x: 0, y: 0, width: size, height: size })).set_depth_func(DepthFunc::Always);
            if cube {
                pass.set_shader_flag("USE_CUBEMAP_TEXCOORD", 1)?.set_shader_flag("RENDER_TO_CUBEMAP", 1)?;
            }
            Ok(pass)
        };
        let stages = vec![
            StageSlot {
                stage: IblStage::EnvCubemap,
                pass: Some(pass("env cubemap", &shaders.env_cubemap, settings.env_size, true)?),
                done: false,
            },
            StageSlot {
                stage: IblStage::Irradiance,
                pass: Some(pass("irradiance", &shaders.irradiance, settings.irradiance_size, true)?),
                done: false,
            },
            StageSlot {
                stage: IblStage::Radiance,
                pass: Some(pass("radiance", &shaders.radiance, settings.radiance_size, true)?),
                done: false,
            },
            StageSlot {
                stage: IblStage::BrdfLut,
                pass: Some(pass("brdf lut", &shaders.brdf_lut, settings.brdf_size, false)?),
                done: false,
            },
        ];

        log::info!("baking image based lighting from {panorama_url}");
        Ok(Self {
            faces: face_inverse_view_projections(ctx.capabilities()),
            settings,
            product,
            panorama: Some(fetcher.fetch_panorama(panorama_url)),
            source: None,
            stages,
            triangle: Some(triangle),
            target: Some(ctx.create_render_target()),
            entries: Vec::new(),
        })
    }

    pub fn settings(&self) -> &IblSettings {
        &self.settings
    }

    /// Lighting textures; only complete once [`IblBaker::is_done`].
    pub fn product(&self) -> &IblProduct {
        &self.product
    }

    pub fn is_done(&self) -> bool {
        self.stages.iter().all(|slot| slot.done)
    }

    pub fn stage_entries(&self) -> &[StageEntry] {
        &self.entries
    }

    fn stage_done(&self, stage: IblStage) -> bool {
        self.stages.iter().any(|slot| slot.stage == stage && slot.done)
    }

    fn input_ready(&self, stage: IblStage) -> bool {
        match stage {
            IblStage::EnvCubemap => self.source.is_some(),
            IblStage::Irradiance | IblStage::Radiance => self.stage_done(IblStage::EnvCubemap),
            IblStage::BrdfLut => true,
        }
    }

    fn upload_source(ctx: &mut RenderContext, panorama: &Panorama) -> Result<Texture, ResourceError> {
        let mut texture = ctx.create_texture(TextureKind::D2);
        let uploaded = texture
            .bind(ctx)
            .set_data(ctx, panorama.width, panorama.height, PixelFormat::Rgb16F, Some(TextureData::F32(&panorama.pixels)))
            .and_then(|texture| texture.set_sampler(ctx, Filter::Bilinear, Wrap::Clamp))
            .map(|_| ());
        match uploaded {
            Ok(()) => Ok(texture),
            Err(error) => {
                texture.destroy(ctx);
                Err(error)
            }
        }
    }

    /// Polls the asynchronous inputs and runs every stage whose gate is open.
    /// Returns whether all four textures are complete.
    pub fn update(&mut self, ctx: &mut RenderContext) -> Result<bool, IblError> {
        if let Some(pending) = &mut self.panorama {
            if let Some(result) = pending.take() {
                self.panorama = None;
                let panorama = result?;
                log::debug!("environment panorama {}x{} arrived", panorama.width, panorama.height);
                self.source = Some(Self::upload_source(ctx, &panorama)?);
            }
        }
        for slot in &mut self.stages {
            if let Some(pass) = &mut slot.pass {
                pass.poll_source()?;
            }
        }

        loop {
            let next = self.stages.iter().position(|slot| {
                !slot.done && slot.pass.as_ref().is_some_and(RenderPass::is_ready) && self.input_ready(slot.stage)
            });
            let Some(index) = next else { break };
            let stage = self.stages[index].stage;
            let Some(mut pass) = self.stages[index].pass.take() else { break };

            let entry = StageEntry { stage, shader_ready: pass.is_ready(), input_ready: self.input_ready(stage) };
            debug_assert!(entry.shader_ready && entry.input_ready);
            self.entries.push(entry);

            let result = self.run_stage(ctx, stage, &mut pass);
            pass.destroy(ctx);
            result?;
            self.stages[index].done = true;
            log::debug!("ibl stage {stage:?} finished");

            if stage == IblStage::EnvCubemap {
                if let Some(source) = self.source.take() {
                    source.destroy(ctx);
                }
            }
        }

        if self.is_done() {
            if let Some(triangle) = self.triangle.take() {
                triangle.destroy(ctx);
                log::info!("image based lighting ready");
            }
            if let Some(target) = self.target.take() {
                target.destroy(ctx);
            }
        }
        Ok(self.is_done())
    }

    fn run_stage(&mut self, ctx: &mut RenderContext, stage: IblStage, pass: &mut RenderPass) -> Result<(), IblError> {
        let (Some(triangle), Some(target)) = (&self.triangle, &mut self.target) else {
            return Ok(());
        };
        let product = &mut self.product;
        let env_res_sqr = (self.settings.env_size as f32).powi(2);

        match stage {
            IblStage::EnvCubemap => {
                let Some(source) = &self.source else {
                    return Ok(());
                };
                pass.set_shader_parameters(ctx, &ShaderParameters::new().with("uHDRI", source))?;
                for (face, inverse) in self.faces.iter().enumerate() {
                    target.bind(ctx).set_color_attachments(ctx, &[Attachment::cube_face(&product.env_cube, face as u32)])?;
                    let draw = DrawRequest::new(triangle.drawcall()).with("uInvViewProj", *inverse);
                    pass.execute(ctx, &[draw], Some(&mut *target))?;
                }
                product.env_cube.bind(ctx).set_sampler(ctx, Filter::Trilinear, Wrap::Clamp)?;
            }
            IblStage::Irradiance => {
                let params = ShaderParameters::new().with("uHDRI", &product.env_cube).with("uEnvResSqr", env_res_sqr);
                pass.set_shader_parameters(ctx, &params)?;
                for (face, inverse) in self.faces.iter().enumerate() {
                    target.bind(ctx).set_color_attachments(ctx, &[Attachment::cube_face(&product.irradiance, face as u32)])?;
                    let draw = DrawRequest::new(triangle.drawcall()).with("uInvViewProj", *inverse);
                    pass.execute(ctx, &[draw], Some(&mut *target))?;
                }
                product.irradiance.bind(ctx).set_sampler(ctx, Filter::Trilinear, Wrap::Clamp)?;
            }
            IblStage::Radiance => {
                let params = ShaderParameters::new().with("uHDRI", &product.env_cube).with("uEnvResSqr", env_res_sqr);
                pass.set_shader_parameters(ctx, &params)?;
                // mip generation on sampler change must happen before the levels are rendered
                product.radiance.bind(ctx).set_sampler(ctx, Filter::Trilinear, Wrap::Clamp)?;
                for (face, inverse) in self.faces.iter().enumerate() {
                    for level in 0..self.settings.level_count() {
                        let size = (self.settings.radiance_size >> level).max(1);
                        target
                            .bind(ctx)
                            .set_color_attachments(ctx, &[Attachment::cube_face(&product.radiance, face as u32).level(level)])?;
                        pass.set_viewport(Some(Viewport { x: 0, y: 0, width: size, height: size }));
                        let draw = DrawRequest::new(triangle.drawcall())
                            .with("uInvViewProj", *inverse)
                            .with("uRoughness", self.settings.roughness(level));
                        pass.execute(ctx, &[draw], Some(&mut *target))?;
                    }
                }
            }
            IblStage::BrdfLut => {
                target.bind(ctx).set_color_attachments(ctx, &[Attachment::texture(&product.brdf_lut)])?;
                pass.execute(ctx, &[DrawRequest::new(triangle.drawcall())], Some(&mut *target))?;
                product.brdf_lut.bind(ctx).set_sampler(ctx, Filter::Bilinear, Wrap::Clamp)?;
            }
        }
        Ok(())
    }

    pub fn destroy(self, ctx: &mut RenderContext) {
        for pass in self.stages.into_iter().filter_map(|slot| slot.pass) {
            pass.destroy(ctx);
        }
        if let Some(source) = self.source {
            source.destroy(ctx);
        }
        if let Some(triangle) = self.triangle {
            triangle.destroy(ctx);
        }
        if let Some(target) = self.target {
            target.destroy(ctx);
        }
        self.product.destroy(ctx);
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use glam::Vec4;

    use super::*;

    #[test]
    fn roughness_sweeps_linearly_across_levels() {
        let settings = IblSettings::default();
        assert_eq!(settings.level_count(), 7);
        assert_relative_eq!(settings.roughness(0), 0.01);
        assert_relative_eq!(settings.roughness(6), 0.99);
        assert_relative_eq!(settings.roughness(3), 0.5);

        let tiny = IblSettings { radiance_size: 4, ..IblSettings::default() };
        assert_eq!(tiny.level_count(), 3);
    }

    #[test]
    fn face_matrices_look_down_each_axis() {
        let faces = face_inverse_view_projections(Capabilities::FULL);
        let expected = [Vec3::X, Vec3::NEG_X, Vec3::Y, Vec3::NEG_Y, Vec3::Z, Vec3::NEG_Z];
        for (inverse, axis) in faces.iter().zip(expected) {
            let far = *inverse * Vec4::new(0.0, 0.0, 1.0, 1.0);
            let direction = (far.truncate() / far.w).normalize();
            assert!(direction.abs_diff_eq(axis, 1e-4), "{direction} != {axis}");
        }
    }

    #[test]
    fn shader_urls_share_the_common_vertex_stage() {
        let shaders = IblShaders::in_dir("assets/shaders/");
        assert_eq!(shaders.vertex, "assets/shaders/postprocess/pp_common_vs.glsl");
        assert_eq!(shaders.radiance, "assets/shaders/ibl/radiance_fs.glsl");
    }
}
