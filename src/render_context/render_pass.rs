use std::collections::{BTreeMap, HashMap};

use super::{
    api::{BlendMode, ColorMask, CullFace, DepthFunc, Viewport},
    drawcall::{Drawcall, ShaderKey},
    parameters::{ParamValue, ShaderParameters},
    render_target::RenderTarget,
    shader::{inject_header, Program},
    Capabilities, PipelineState, RenderContext, ResourceError,
};
use crate::assets::{AssetFetcher, FetchError, Join};

#[derive(Debug, thiserror::Error)]
pub enum RenderPassError {
    #[error("render pass {0} has no shader source yet")]
    NotReady(String),
    #[error("render pass {0} executed while another pass is running")]
    NestedExecute(String),
    #[error("shader flags of pass {0} are fixed once a variant is compiled")]
    FlagsLocked(String),
    #[error(transparent)]
    Resource(#[from] ResourceError),
}

/// One entry of a pass's draw list: a drawcall plus parameters for this draw only.
#[derive(Debug)]
pub struct DrawRequest<'a> {
    pub drawcall: &'a Drawcall,
    pub parameters: ShaderParameters,
}

impl<'a> DrawRequest<'a> {
    pub fn new(drawcall: &'a Drawcall) -> Self {
        Self { drawcall, parameters: ShaderParameters::new() }
    }

    pub fn with(mut self, name: &str, value: impl Into<ParamValue>) -> Self {
        self.parameters.set(name, value);
        self
    }
}

impl<'a> From<&'a Drawcall> for DrawRequest<'a> {
    fn from(drawcall: &'a Drawcall) -> Self {
        Self::new(drawcall)
    }
}

/// Shader source pair plus fixed-function state. Program variants are compiled on
/// first use per shader key and kept for the life of the pass; a variant that fails
/// to compile is remembered as unusable and its draws are skipped.
pub struct RenderPass {
    name: String,
    vertex_source: Option<String>,
    fragment_source: Option<String>,
    pending: Option<Join<String>>,
    programs: HashMap<ShaderKey, Option<Program>>,
    retired: Vec<Program>,
    defaults: ShaderParameters,
    flags: BTreeMap<String, i32>,
    viewport: Option<Viewport>,
    state: PipelineState,
    load_color: bool,
    load_depth: bool,
}

impl RenderPass {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            vertex_source: None,
            fragment_source: None,
            pending: None,
            programs: HashMap::new(),
            retired: Vec::new(),
            defaults: ShaderParameters::new(),
            flags: BTreeMap::new(),
            viewport: None,
            state: PipelineState::default(),
            load_color: true,
            load_depth: true,
        }
    }

    /// Starts fetching both stages; the pass becomes ready once [`RenderPass::poll_source`]
    /// has seen both arrive.
    pub fn from_source_urls(name: &str, fetcher: &dyn AssetFetcher, vertex_url: &str, fragment_url: &str) -> Self {
        let mut pass = Self::new(name);
        pass.pending = Some(Join::new(vec![fetcher.fetch_text(vertex_url), fetcher.fetch_text(fragment_url)]));
        pass
    }

    pub fn poll_source(&mut self) -> Result<bool, FetchError> {
        if let Some(join) = &mut self.pending {
            if join.poll()? {
                let mut sources = self.pending.take().map(Join::into_results).unwrap_or_default().into_iter();
                if let (Some(vertex), Some(fragment)) = (sources.next(), sources.next()) {
                    log::debug!("render pass {} shader sources loaded", self.name);
                    self.set_shader_source(&vertex, &fragment);
                }
            }
        }
        Ok(self.is_ready())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_ready(&self) -> bool {
        self.vertex_source.is_some() && self.fragment_source.is_some()
    }

    pub fn set_shader_source(&mut self, vertex: &str, fragment: &str) -> &mut Self {
        self.vertex_source = Some(vertex.to_string());
        self.fragment_source = Some(fragment.to_string());
        self.retired.extend(self.programs.drain().filter_map(|(_, program)| program));
        self
    }

    pub fn set_viewport(&mut self, viewport: Option<Viewport>) -> &mut Self {
        self.viewport = viewport;
        self
    }

    pub fn set_cull_face(&mut self, cull: CullFace) -> &mut Self {
        self.state.cull = cull;
        self
    }

    pub fn set_depth_func(&mut self, func: DepthFunc) -> &mut Self {
        self.state.depth_func = func;
        self
    }

    pub fn set_blend(&mut self, blend: BlendMode) -> &mut Self {
        self.state.blend = blend;
        self
    }

    pub fn set_depth_write(&mut self, enabled: bool) -> &mut Self {
        self.state.depth_write = enabled;
        self
    }

    pub fn set_color_write(&mut self, mask: ColorMask) -> &mut Self {
        self.state.color_write = mask;
        self
    }

    /// `true` keeps the previous contents, `false` clears at the start of the pass.
    pub fn set_load_action(&mut self, load_color: bool, load_depth: bool) -> &mut Self {
        self.load_color = load_color;
        self.load_depth = load_depth;
        self
    }

    pub fn set_shader_flag(&mut self, name: &str, value: i32) -> Result<&mut Self, RenderPassError> {
        if !self.programs.is_empty() {
            return Err(RenderPassError::FlagsLocked(self.name.clone()));
        }
        self.flags.insert(name.to_string(), value);
        Ok(self)
    }

    /// Merges into the pass defaults and pushes them to every compiled variant.
    pub fn set_shader_parameters(&mut self, ctx: &mut RenderContext, params: &ShaderParameters) -> Result<&mut Self, RenderPassError> {
        self.defaults.merge(params);
        for program in self.programs.values_mut().flatten() {
            program.bind(ctx);
            program.set_parameters(ctx, params)?;
        }
        Ok(self)
    }

    pub fn defaults(&self) -> &ShaderParameters {
        &self.defaults
    }

    pub fn shader_macros(&self, capabilities: Capabilities) -> String {
        let mut macros = format!("#define REDUCED_CAPABILITY {}\n", capabilities.is_reduced() as i32);
        if capabilities.texture_origin_top {
            macros.push_str("#define TEXTURE_ORIGIN_TOP 1\n");
        }
        for (name, value) in &self.flags {
            macros.push_str(&format!("#define {name} {value}\n"));
        }
        macros
    }

    pub fn variant_count(&self) -> usize {
        self.programs.len()
    }

    pub fn failed_variant_count(&self) -> usize {
        self.programs.values().filter(|program| program.is_none()).count()
    }

    fn compile_variant(&self, ctx: &mut RenderContext, drawcall: &Drawcall) -> Option<Program> {
        let (Some(vertex), Some(fragment)) = (&self.vertex_source, &self.fragment_source) else {
            return None;
        };
        let header = format!("{}{}", self.shader_macros(ctx.capabilities()), drawcall.shader_macros());
        let label = format!("{}[{}]", self.name, drawcall.shader_key());
        match Program::compile(ctx, &label, &inject_header(vertex, &header), &inject_header(fragment, &header)) {
            Ok(mut program) => {
                program.bind(ctx);
                if let Err(error) = program.set_parameters(ctx, &self.defaults) {
                    log::warn!("{label}: {error}");
                }
                Some(program)
            }
            Err(error) => {
                log::error!("{label}: {error}");
                None
            }
        }
    }

    /// Draws the list into `target` (the default framebuffer when `None`) and
    /// returns how many draws were issued.
    pub fn execute(
        &mut self,
        ctx: &mut RenderContext,
        draws: &[DrawRequest<'_>],
        target: Option<&mut RenderTarget>,
    ) -> Result<usize, RenderPassError> {
        if !self.is_ready() {
            return Err(RenderPassError::NotReady(self.name.clone()));
        }
        if !ctx.begin_pass() {
            return Err(RenderPassError::NestedExecute(self.name.clone()));
        }
        let result = self.run(ctx, draws, target);
        ctx.end_pass();
        result
    }

    fn run(
        &mut self,
        ctx: &mut RenderContext,
        draws: &[DrawRequest<'_>],
        target: Option<&mut RenderTarget>,
    ) -> Result<usize, RenderPassError> {
        for program in self.retired.drain(..) {
            program.destroy(ctx);
        }

        let (clear_color, clear_depth) = (!self.load_color, !self.load_depth);
        match target {
            Some(target) => {
                target.bind(ctx).clear(ctx, clear_color, clear_depth)?;
            }
            None => {
                ctx.bind_framebuffer(None);
                ctx.clear(clear_color, clear_depth);
            }
        }
        ctx.apply_state(&self.state);
        let viewport = self.viewport.unwrap_or_else(|| {
            let (width, height) = ctx.surface_size();
            Viewport { x: 0, y: 0, width, height }
        });
        ctx.set_viewport(viewport);

        let mut issued = 0;
        for request in draws {
            let key = request.drawcall.shader_key();
            if !self.programs.contains_key(key) {
                let program = self.compile_variant(ctx, request.drawcall);
                self.programs.insert(key.clone(), program);
            }
            let Some(Some(program)) = self.programs.get_mut(key) else {
                continue;
            };
            program.bind(ctx);
            program.restore_defaults(ctx, &self.defaults)?;
            program.apply_overrides(ctx, &request.drawcall.parameters)?;
            program.apply_overrides(ctx, &request.parameters)?;
            program.bind_textures(ctx);
            request.drawcall.submit(ctx);
            issued += 1;
        }
        Ok(issued)
    }

    pub fn destroy(mut self, ctx: &mut RenderContext) {
        for program in self.retired.drain(..) {
            program.destroy(ctx);
        }
        for (_, program) in self.programs.drain() {
            if let Some(program) = program {
                program.destroy(ctx);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec4;

    use super::*;
    use crate::render_context::{
        api::{ColorAttachment, Topology},
        headless::{ApiCall, HeadlessApi, HeadlessProbe},
        shader::tests::{TEST_FS, TEST_VS},
    };

    const VARIANT_FS: &str = "#version 450
layout(location = 0) in vec2 vUV;
layout(location = 0) out vec4 oColor;
void main() {
#ifdef USE_BROKEN
    oColor = undefined_symbol;
#else
    oColor = vec4(vUV, 0.0, 1.0);
#endif
}
";

    fn context() -> (RenderContext, HeadlessProbe) {
        let (api, probe) = HeadlessApi::new(Capabilities::FULL);
        (RenderContext::new(Box::new(api)), probe)
    }

    fn uniform_writes(probe: &HeadlessProbe, offset: u32) -> Vec<Vec<u8>> {
        probe
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                ApiCall::Uniform { location, bytes, .. } if location.offset == offset => Some(bytes),
                _ => None,
            })
            .collect()
    }

    fn vec4_bytes(v: Vec4) -> Vec<u8> {
        v.to_array().iter().flat_map(|c| c.to_le_bytes()).collect()
    }

    #[test]
    fn execute_without_source_is_a_failed_no_op() {
        let (mut ctx, probe) = context();
        let drawcall = ctx.create_drawcall(Topology::Triangles, 3);
        let mut pass = RenderPass::new("empty");
        probe.clear_calls();

        let result = pass.execute(&mut ctx, &[DrawRequest::new(&drawcall)], None);
        assert!(matches!(result, Err(RenderPassError::NotReady(_))));
        assert!(probe.calls().is_empty());
    }

    #[test]
    fn variants_are_compiled_once_per_key() {
        let (mut ctx, probe) = context();
        let a = ctx.create_drawcall(Topology::Triangles, 3);
        let b = ctx.create_drawcall(Topology::Triangles, 3);
        let mut c = ctx.create_drawcall(Topology::Triangles, 3);
        c.set_flag("USE_NORMAL_TEX", 1);

        let mut pass = RenderPass::new("std");
        pass.set_shader_source(TEST_VS, TEST_FS);
        let draws = [DrawRequest::new(&a), DrawRequest::new(&b), DrawRequest::new(&c)];
        assert_eq!(pass.execute(&mut ctx, &draws, None).unwrap(), 3);
        assert_eq!(pass.execute(&mut ctx, &draws, None).unwrap(), 3);

        assert_eq!(pass.variant_count(), 2);
        assert_eq!(probe.count(|call| matches!(call, ApiCall::CreateProgram(_))), 2);
        assert_eq!(probe.draw_count(), 6);
    }

    #[test]
    fn failed_variant_does_not_affect_others() {
        let (mut ctx, probe) = context();
        let mut broken = ctx.create_drawcall(Topology::Triangles, 3);
        broken.set_flag("USE_BROKEN", 1);
        let healthy = ctx.create_drawcall(Topology::Triangles, 3);

        let mut pass = RenderPass::new("variants");
        pass.set_shader_source(TEST_VS, VARIANT_FS);
        let draws = [DrawRequest::new(&broken), DrawRequest::new(&healthy)];
        assert_eq!(pass.execute(&mut ctx, &draws, None).unwrap(), 1);
        assert_eq!(pass.execute(&mut ctx, &draws, None).unwrap(), 1);
        assert_eq!(pass.failed_variant_count(), 1);
        assert_eq!(probe.count(|call| matches!(call, ApiCall::CreateProgram(_))), 1);
    }

    #[test]
    fn instance_parameters_override_drawcall_and_defaults() {
        let (mut ctx, probe) = context();
        let default_color = Vec4::new(1.0, 1.0, 1.0, 1.0);
        let drawcall_color = Vec4::new(0.0, 1.0, 0.0, 1.0);
        let instance_color = Vec4::new(1.0, 0.0, 0.0, 1.0);

        let mut tinted = ctx.create_drawcall(Topology::Triangles, 3);
        tinted.parameters.set("uColor", drawcall_color);
        let plain = ctx.create_drawcall(Topology::Triangles, 3);

        let mut pass = RenderPass::new("std");
        pass.set_shader_source(TEST_VS, TEST_FS);
        pass.set_shader_parameters(&mut ctx, &ShaderParameters::new().with("uColor", default_color)).unwrap();
        probe.clear_calls();

        let draws = [DrawRequest::new(&tinted).with("uColor", instance_color), DrawRequest::new(&plain)];
        pass.execute(&mut ctx, &draws, None).unwrap();

        // compile applies the default, then drawcall and instance values, then the
        // second draw restores the default.
        let writes = uniform_writes(&probe, 64);
        assert_eq!(
            writes,
            vec![vec4_bytes(default_color), vec4_bytes(drawcall_color), vec4_bytes(instance_color), vec4_bytes(default_color)]
        );
    }

    #[test]
    fn flags_are_fixed_after_first_compile() {
        let (mut ctx, _probe) = context();
        let drawcall = ctx.create_drawcall(Topology::Triangles, 3);
        let mut pass = RenderPass::new("std");
        pass.set_shader_source(TEST_VS, TEST_FS);
        pass.set_shader_flag("USE_CUBEMAP_TEXCOORD", 1).unwrap();
        pass.execute(&mut ctx, &[DrawRequest::new(&drawcall)], None).unwrap();
        assert!(matches!(pass.set_shader_flag("KEEP_INPUT_ASPECT", 1), Err(RenderPassError::FlagsLocked(_))));
    }

    #[test]
    fn nested_execution_is_refused() {
        let (mut ctx, _probe) = context();
        let drawcall = ctx.create_drawcall(Topology::Triangles, 3);
        let mut pass = RenderPass::new("std");
        pass.set_shader_source(TEST_VS, TEST_FS);
        assert!(ctx.begin_pass());
        assert!(matches!(pass.execute(&mut ctx, &[DrawRequest::new(&drawcall)], None), Err(RenderPassError::NestedExecute(_))));
        ctx.end_pass();
        assert!(pass.execute(&mut ctx, &[DrawRequest::new(&drawcall)], None).is_ok());
    }

    #[test]
    fn clears_follow_load_actions_and_target() {
        let (mut ctx, probe) = context();
        let drawcall = ctx.create_drawcall(Topology::Triangles, 3);
        let mut color = ctx.create_texture(crate::render_context::TextureKind::D2);
        color.bind(&mut ctx).set_data(&mut ctx, 4, 4, crate::render_context::PixelFormat::Rgba8, None).unwrap();
        let mut target = ctx.create_render_target();
        target
            .bind(&mut ctx)
            .set_color_attachments(&mut ctx, &[crate::render_context::render_target::Attachment::texture(&color)])
            .unwrap();

        let mut pass = RenderPass::new("offscreen");
        pass.set_shader_source(TEST_VS, TEST_FS).set_load_action(false, true).set_depth_write(false);
        probe.clear_calls();
        pass.execute(&mut ctx, &[DrawRequest::new(&drawcall)], Some(&mut target)).unwrap();

        assert_eq!(probe.count(|call| *call == ApiCall::Clear { color: true, depth: false }), 1);
        let draws = probe.draws();
        assert_eq!(draws[0].color_attachments, vec![ColorAttachment { texture: color.id(), face: 0, level: 0 }]);
        assert!(!ctx.pipeline_state().depth_write);
    }

    #[test]
    fn destroy_releases_every_variant() {
        let (mut ctx, probe) = context();
        let a = ctx.create_drawcall(Topology::Triangles, 3);
        let mut b = ctx.create_drawcall(Topology::Triangles, 3);
        b.set_flag("X", 2);
        let mut pass = RenderPass::new("std");
        pass.set_shader_source(TEST_VS, TEST_FS);
        pass.execute(&mut ctx, &[DrawRequest::new(&a), DrawRequest::new(&b)], None).unwrap();
        assert_eq!(probe.live_programs(), 2);
        pass.destroy(&mut ctx);
        assert_eq!(probe.live_programs(), 0);
    }
}
