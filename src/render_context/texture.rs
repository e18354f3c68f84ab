use half::f16;

use super::{
    api::{Filter, PixelFormat, SamplerState, TextureData, TextureId, TextureImage, TextureKind, Wrap},
    RenderContext, ResourceError,
};

/// Texture unit used while editing a texture, out of the way of the low units
/// programs allocate first.
pub const EDIT_UNIT: u32 = 7;

#[derive(Debug)]
pub struct Texture {
    id: TextureId,
    kind: TextureKind,
    width: u32,
    height: u32,
    format: Option<PixelFormat>,
    sampler: Option<SamplerState>,
}

fn is_power_of_two(value: u32) -> bool {
    value != 0 && value & (value - 1) == 0
}

fn encode_half(values: &[f32]) -> Vec<u16> {
    values.iter().map(|value| f16::from_f32(*value).to_bits()).collect()
}

impl Texture {
    pub(crate) fn new(ctx: &mut RenderContext, kind: TextureKind) -> Self {
        let id = ctx.api().create_texture(kind);
        Self { id, kind, width: 0, height: 0, format: None, sampler: None }
    }

    pub fn id(&self) -> TextureId {
        self.id
    }

    pub fn kind(&self) -> TextureKind {
        self.kind
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn format(&self) -> Option<PixelFormat> {
        self.format
    }

    pub fn sampler(&self) -> Option<SamplerState> {
        self.sampler
    }

    /// Data has been specified at least once.
    pub fn is_ready(&self) -> bool {
        self.format.is_some()
    }

    /// Makes this the current texture for subsequent edits.
    pub fn bind(&mut self, ctx: &mut RenderContext) -> &mut Self {
        ctx.bind_texture(EDIT_UNIT, Some(self.id));
        self
    }

    fn check_bound(&self, ctx: &RenderContext) -> Result<(), ResourceError> {
        if ctx.bound_texture() != Some(self.id) {
            return Err(ResourceError::NotBound("texture"));
        }
        Ok(())
    }

    /// (Re)specifies level 0 of every face. Cube data holds the six faces back to back.
    /// `None` allocates storage with undefined content, used for render targets.
    pub fn set_data(
        &mut self,
        ctx: &mut RenderContext,
        width: u32,
        height: u32,
        format: PixelFormat,
        data: Option<TextureData<'_>>,
    ) -> Result<&mut Self, ResourceError> {
        self.check_bound(ctx)?;
        let faces = self.kind.faces() as usize;
        let face_len = width as usize * height as usize * format.channels();

        let mut encoded = None;
        if let Some(data) = data {
            match (data, format.is_float()) {
                (_, _) if format.is_depth() => {
                    return Err(ResourceError::DataType { data: "any", format });
                }
                (TextureData::U8(_), true) => return Err(ResourceError::DataType { data: "u8", format }),
                (TextureData::F16(_), false) => return Err(ResourceError::DataType { data: "f16", format }),
                (TextureData::F32(_), false) => return Err(ResourceError::DataType { data: "f32", format }),
                _ => {}
            }
            if data.len() != face_len * faces {
                return Err(ResourceError::DataSize { expected: face_len * faces, actual: data.len() });
            }
            if let (TextureData::F32(values), false) = (data, ctx.capabilities().float_textures) {
                encoded = Some(encode_half(values));
            }
        }
        let data = match &encoded {
            Some(halves) => Some(TextureData::F16(halves)),
            None => data,
        };

        for face in 0..faces {
            let face_data = data.map(|data| {
                let range = face * face_len..(face + 1) * face_len;
                match data {
                    TextureData::U8(values) => TextureData::U8(&values[range]),
                    TextureData::F16(values) => TextureData::F16(&values[range]),
                    TextureData::F32(values) => TextureData::F32(&values[range]),
                }
            });
            let image = TextureImage { width, height, format, face: face as u32, level: 0, data: face_data };
            ctx.api().texture_image(self.id, &image);
        }

        self.width = width;
        self.height = height;
        self.format = Some(format);
        if let Some(sampler) = self.sampler {
            self.apply_sampler(ctx, sampler);
        }
        Ok(self)
    }

    pub fn set_sampler(&mut self, ctx: &mut RenderContext, filter: Filter, wrap: Wrap) -> Result<&mut Self, ResourceError> {
        self.check_bound(ctx)?;
        if !self.is_ready() {
            return Err(ResourceError::TextureNotReady);
        }
        self.apply_sampler(ctx, SamplerState { filter, wrap });
        Ok(self)
    }

    fn apply_sampler(&mut self, ctx: &mut RenderContext, requested: SamplerState) {
        let mut sampler = requested;
        let npot = !(is_power_of_two(self.width) && is_power_of_two(self.height));
        if npot && self.kind == TextureKind::D2 && !ctx.capabilities().npot_mipmaps {
            if sampler.filter.is_mipmapped() {
                sampler.filter = Filter::Bilinear;
            }
            sampler.wrap = Wrap::Clamp;
        }
        if sampler != requested {
            log::debug!("texture {}x{} sampler forced to {:?}", self.width, self.height, sampler);
        }
        ctx.api().texture_sampler(self.id, &sampler);
        if sampler.filter.is_mipmapped() {
            ctx.api().generate_mipmaps(self.id);
        }
        self.sampler = Some(sampler);
    }

    pub fn generate_mipmaps(&mut self, ctx: &mut RenderContext) -> Result<&mut Self, ResourceError> {
        self.check_bound(ctx)?;
        if !self.is_ready() {
            return Err(ResourceError::TextureNotReady);
        }
        ctx.api().generate_mipmaps(self.id);
        Ok(self)
    }

    pub fn destroy(self, ctx: &mut RenderContext) {
        ctx.forget_texture(self.id);
        ctx.api().delete_texture(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_context::{
        api::Capabilities,
        headless::{ApiCall, HeadlessApi, PayloadKind},
    };

    #[test]
    fn edits_require_binding() {
        let (api, _probe) = HeadlessApi::new(Capabilities::FULL);
        let mut ctx = RenderContext::new(Box::new(api));
        let mut texture = ctx.create_texture(TextureKind::D2);
        let mut other = ctx.create_texture(TextureKind::D2);

        let result = texture.set_data(&mut ctx, 1, 1, PixelFormat::Rgba8, Some(TextureData::U8(&[255; 4])));
        assert!(matches!(result, Err(ResourceError::NotBound("texture"))));

        texture.bind(&mut ctx);
        other.bind(&mut ctx);
        let result = texture.set_data(&mut ctx, 1, 1, PixelFormat::Rgba8, Some(TextureData::U8(&[255; 4])));
        assert!(matches!(result, Err(ResourceError::NotBound(_))));

        texture.bind(&mut ctx).set_data(&mut ctx, 1, 1, PixelFormat::Rgba8, Some(TextureData::U8(&[255; 4]))).unwrap();
        assert!(texture.is_ready());
    }

    #[test]
    fn sampler_before_data_is_rejected() {
        let (api, _probe) = HeadlessApi::new(Capabilities::FULL);
        let mut ctx = RenderContext::new(Box::new(api));
        let mut texture = ctx.create_texture(TextureKind::D2);
        let result = texture.bind(&mut ctx).set_sampler(&mut ctx, Filter::Bilinear, Wrap::Clamp);
        assert!(matches!(result, Err(ResourceError::TextureNotReady)));
    }

    #[test]
    fn reduced_path_encodes_float_payloads_as_half() {
        let (api, probe) = HeadlessApi::new(Capabilities::REDUCED);
        let mut ctx = RenderContext::new(Box::new(api));
        let mut texture = ctx.create_texture(TextureKind::D2);
        let texels = [0.5f32; 2 * 2 * 4];
        texture.bind(&mut ctx).set_data(&mut ctx, 2, 2, PixelFormat::Rgba16F, Some(TextureData::F32(&texels))).unwrap();

        let uploads = probe.count(|call| {
            matches!(call, ApiCall::TextureImage { payload: Some((PayloadKind::F16, 16)), .. })
        });
        assert_eq!(uploads, 1);
    }

    #[test]
    fn full_path_keeps_float_payloads() {
        let (api, probe) = HeadlessApi::new(Capabilities::FULL);
        let mut ctx = RenderContext::new(Box::new(api));
        let mut texture = ctx.create_texture(TextureKind::D2);
        let texels = [0.5f32; 4];
        texture.bind(&mut ctx).set_data(&mut ctx, 1, 1, PixelFormat::Rgba16F, Some(TextureData::F32(&texels))).unwrap();
        assert_eq!(probe.count(|call| matches!(call, ApiCall::TextureImage { payload: Some((PayloadKind::F32, 4)), .. })), 1);
    }

    #[test]
    fn reduced_path_forces_npot_sampler() {
        let (api, probe) = HeadlessApi::new(Capabilities::REDUCED);
        let mut ctx = RenderContext::new(Box::new(api));
        let mut texture = ctx.create_texture(TextureKind::D2);
        texture
            .bind(&mut ctx)
            .set_data(&mut ctx, 3, 5, PixelFormat::Rgba8, Some(TextureData::U8(&[0; 60])))
            .unwrap()
            .set_sampler(&mut ctx, Filter::Anisotropic, Wrap::Repeat)
            .unwrap();

        assert_eq!(texture.sampler(), Some(SamplerState { filter: Filter::Bilinear, wrap: Wrap::Clamp }));
        assert_eq!(probe.count(|call| matches!(call, ApiCall::GenerateMipmaps(_))), 0);
    }

    #[test]
    fn mipmapped_filters_generate_mips() {
        let (api, probe) = HeadlessApi::new(Capabilities::FULL);
        let mut ctx = RenderContext::new(Box::new(api));
        let mut texture = ctx.create_texture(TextureKind::Cube);
        texture
            .bind(&mut ctx)
            .set_data(&mut ctx, 4, 4, PixelFormat::Rgba16F, None)
            .unwrap()
            .set_sampler(&mut ctx, Filter::Trilinear, Wrap::Clamp)
            .unwrap();

        assert_eq!(probe.count(|call| matches!(call, ApiCall::TextureImage { .. })), 6);
        assert_eq!(probe.count(|call| matches!(call, ApiCall::GenerateMipmaps(_))), 1);
    }

    #[test]
    fn wrong_payload_size_is_rejected() {
        let (api, _probe) = HeadlessApi::new(Capabilities::FULL);
        let mut ctx = RenderContext::new(Box::new(api));
        let mut texture = ctx.create_texture(TextureKind::D2);
        let result = texture.bind(&mut ctx).set_data(&mut ctx, 2, 2, PixelFormat::Rgb8, Some(TextureData::U8(&[0; 4])));
        assert!(matches!(result, Err(ResourceError::DataSize { expected: 12, actual: 4 })));
    }
}
