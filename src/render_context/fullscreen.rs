use std::collections::BTreeMap;

use super::{
    api::{AttributeBinding, DataType, Topology},
    buffer::Buffer,
    drawcall::Drawcall,
    RenderContext, ResourceError,
};

/// One triangle covering clip space, fed through `aPosition` as a vec2.
pub struct FullscreenTriangle {
    buffer: Buffer,
    drawcall: Drawcall,
}

const VERTICES: [f32; 6] = [-1.0, -1.0, 3.0, -1.0, -1.0, 3.0];

impl FullscreenTriangle {
    pub fn new(ctx: &mut RenderContext) -> Result<Self, ResourceError> {
        let mut buffer = ctx.create_vertex_buffer();
        buffer.set_data(ctx, bytemuck::cast_slice(&VERTICES))?;

        let mut attributes = BTreeMap::new();
        attributes.insert(
            "aPosition".to_string(),
            AttributeBinding {
                buffer: buffer.id(),
                components: 2,
                data_type: DataType::Float,
                normalized: false,
                byte_stride: 0,
                byte_offset: 0,
            },
        );
        let mut drawcall = ctx.create_drawcall(Topology::Triangles, 3);
        drawcall.bind(ctx).set_attributes(ctx, attributes)?.unbind(ctx);
        Ok(Self { buffer, drawcall })
    }

    pub fn drawcall(&self) -> &Drawcall {
        &self.drawcall
    }

    pub fn destroy(self, ctx: &mut RenderContext) {
        self.drawcall.destroy(ctx);
        self.buffer.destroy(ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_context::{api::Capabilities, headless::HeadlessApi};

    #[test]
    fn fullscreen_triangle_owns_its_resources() {
        let (api, probe) = HeadlessApi::new(Capabilities::FULL);
        let mut ctx = RenderContext::new(Box::new(api));
        let triangle = FullscreenTriangle::new(&mut ctx).unwrap();
        assert_eq!(triangle.drawcall().vertex_count(), 3);
        assert_eq!(triangle.drawcall().shader_key().as_str(), "aPosition|");
        triangle.destroy(&mut ctx);
        assert_eq!(probe.live_buffers(), 0);
        assert_eq!(probe.live_vertex_arrays(), 0);
    }
}
