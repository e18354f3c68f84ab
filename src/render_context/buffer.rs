use super::{
    api::{BufferId, BufferKind},
    RenderContext, ResourceError,
};

/// GPU buffer whose kind (vertex or index data) is fixed at creation.
#[derive(Debug)]
pub struct Buffer {
    id: BufferId,
    kind: BufferKind,
    len: usize,
}

impl Buffer {
    pub(crate) fn new(ctx: &mut RenderContext, kind: BufferKind) -> Self {
        let id = ctx.api().create_buffer(kind);
        Self { id, kind, len: 0 }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Uploads `data`. Index uploads would otherwise be captured by whichever
    /// drawcall is bound, so this refuses while one is.
    pub fn set_data(&mut self, ctx: &mut RenderContext, data: &[u8]) -> Result<&mut Self, ResourceError> {
        if ctx.bound_drawcall().is_some() {
            return Err(ResourceError::DrawcallStillBound);
        }
        ctx.api().buffer_data(self.id, data);
        self.len = data.len();
        Ok(self)
    }

    pub fn destroy(self, ctx: &mut RenderContext) {
        ctx.api().delete_buffer(self.id);
    }
}
