use super::{
    api::{ColorAttachment, FramebufferId, PixelFormat, TextureId, TextureKind},
    texture::Texture,
    RenderContext, ResourceError,
};

/// Color attachment request: a 2D texture, or one face of a cube, at a mip level.
#[derive(Clone, Copy, Debug)]
pub struct Attachment<'a> {
    pub texture: &'a Texture,
    pub face: Option<u32>,
    pub level: u32,
}

impl<'a> Attachment<'a> {
    pub fn texture(texture: &'a Texture) -> Self {
        Self { texture, face: None, level: 0 }
    }

    pub fn cube_face(texture: &'a Texture, face: u32) -> Self {
        Self { texture, face: Some(face), level: 0 }
    }

    pub fn level(mut self, level: u32) -> Self {
        self.level = level;
        self
    }
}

#[derive(Debug)]
pub struct RenderTarget {
    id: FramebufferId,
    colors: Vec<ColorAttachment>,
    depth: Option<TextureId>,
}

impl RenderTarget {
    pub(crate) fn new(ctx: &mut RenderContext) -> Self {
        let id = ctx.api().create_framebuffer();
        Self { id, colors: Vec::new(), depth: None }
    }

    pub fn id(&self) -> FramebufferId {
        self.id
    }

    pub fn color_attachments(&self) -> &[ColorAttachment] {
        &self.colors
    }

    pub fn depth_attachment(&self) -> Option<TextureId> {
        self.depth
    }

    pub fn bind(&mut self, ctx: &mut RenderContext) -> &mut Self {
        ctx.bind_framebuffer(Some(self.id));
        self
    }

    pub fn unbind(&mut self, ctx: &mut RenderContext) -> &mut Self {
        ctx.bind_framebuffer(None);
        self
    }

    fn check_bound(&self, ctx: &RenderContext) -> Result<(), ResourceError> {
        if ctx.bound_framebuffer() != Some(self.id) {
            return Err(ResourceError::NotBound("render target"));
        }
        Ok(())
    }

    pub fn set_color_attachments(
        &mut self,
        ctx: &mut RenderContext,
        attachments: &[Attachment<'_>],
    ) -> Result<&mut Self, ResourceError> {
        self.check_bound(ctx)?;
        if attachments.len() as u32 > ctx.capabilities().max_color_attachments {
            return Err(ResourceError::Unsupported("multiple render targets"));
        }

        let mut colors = Vec::with_capacity(attachments.len());
        for attachment in attachments {
            let texture = attachment.texture;
            match texture.format() {
                None => return Err(ResourceError::InvalidAttachment("texture has no storage".into())),
                Some(PixelFormat::Depth) => {
                    return Err(ResourceError::InvalidAttachment("depth texture used as color".into()))
                }
                Some(_) => {}
            }
            let face = match (texture.kind(), attachment.face) {
                (TextureKind::D2, None) => 0,
                (TextureKind::Cube, Some(face)) if face < 6 => face,
                (kind, face) => {
                    return Err(ResourceError::InvalidAttachment(format!("face {face:?} of {kind:?} texture")))
                }
            };
            colors.push(ColorAttachment { texture: texture.id(), face, level: attachment.level });
        }

        ctx.api().color_attachments(self.id, &colors);
        self.colors = colors;
        Ok(self)
    }

    pub fn set_depth_attachment(&mut self, ctx: &mut RenderContext, texture: Option<&Texture>) -> Result<&mut Self, ResourceError> {
        self.check_bound(ctx)?;
        if let Some(texture) = texture {
            if texture.format() != Some(PixelFormat::Depth) || texture.kind() != TextureKind::D2 {
                return Err(ResourceError::InvalidAttachment("depth attachment needs a 2D depth texture".into()));
            }
        }
        let depth = texture.map(Texture::id);
        ctx.api().depth_attachment(self.id, depth);
        self.depth = depth;
        Ok(self)
    }

    pub fn clear(&mut self, ctx: &mut RenderContext, color: bool, depth: bool) -> Result<&mut Self, ResourceError> {
        self.check_bound(ctx)?;
        ctx.clear(color, depth);
        Ok(self)
    }

    pub fn destroy(self, ctx: &mut RenderContext) {
        if ctx.bound_framebuffer() == Some(self.id) {
            ctx.bind_framebuffer(None);
        }
        ctx.api().delete_framebuffer(self.id);
    }
}
