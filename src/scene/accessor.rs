use glam::{Mat4, Quat, Vec3};

use super::{
    document::{ComponentType, Document},
    LoadError,
};

/// Bytes covered by a buffer view.
pub fn view_bytes<'a>(document: &Document, buffers: &'a [Vec<u8>], view: usize) -> Result<&'a [u8], LoadError> {
    let buffer_view = document.buffer_views.get(view).ok_or(LoadError::DanglingReference { what: "buffer view", index: view })?;
    buffers
        .get(buffer_view.buffer)
        .zip(buffer_view.byte_offset.checked_add(buffer_view.byte_length))
        .and_then(|(buffer, end)| buffer.get(buffer_view.byte_offset..end))
        .ok_or(LoadError::DanglingReference { what: "buffer range of view", index: view })
}

/// Byte stride of an accessor inside its view; zero stride means tightly packed.
pub fn stride(document: &Document, accessor: usize) -> usize {
    let data = &document.accessors[accessor];
    data.buffer_view
        .and_then(|view| document.buffer_views[view].byte_stride)
        .filter(|stride| *stride != 0)
        .unwrap_or_else(|| data.element_size())
}

/// The last element of the accessor must end inside its buffer view.
pub fn check_range(document: &Document, accessor: usize) -> Result<(), LoadError> {
    let data = document.accessors.get(accessor).ok_or(LoadError::DanglingReference { what: "accessor", index: accessor })?;
    let Some(view) = data.buffer_view else {
        return Ok(());
    };
    if data.count == 0 {
        return Ok(());
    }
    let past_end = LoadError::InvalidAccessor { accessor, reason: "reads past the end of its buffer view" };
    let end = (data.count - 1)
        .checked_mul(stride(document, accessor))
        .and_then(|last| last.checked_add(data.byte_offset))
        .and_then(|last| last.checked_add(data.element_size()));
    match end {
        Some(end) if end <= document.buffer_views[view].byte_length => Ok(()),
        _ => Err(past_end),
    }
}

/// Reads a float accessor into tightly packed components.
pub fn read_floats(document: &Document, buffers: &[Vec<u8>], accessor: usize) -> Result<Vec<f32>, LoadError> {
    check_range(document, accessor)?;
    let data = &document.accessors[accessor];
    if data.component_type != ComponentType::Float {
        return Err(LoadError::InvalidAccessor { accessor, reason: "must have FLOAT components" });
    }
    let components = data.accessor_type.components();
    let Some(view) = data.buffer_view else {
        return Ok(vec![0.0; data.count * components]);
    };
    let bytes = view_bytes(document, buffers, view)?;
    let stride = stride(document, accessor);

    let mut output = Vec::with_capacity(data.count * components);
    for element in 0..data.count {
        let start = data.byte_offset + element * stride;
        for component in 0..components {
            let idx = start + component * 4;
            let raw: [u8; 4] = bytes
                .get(idx..idx + 4)
                .and_then(|b| b.try_into().ok())
                .ok_or(LoadError::InvalidAccessor { accessor, reason: "reads past the end of its buffer" })?;
            output.push(f32::from_le_bytes(raw));
        }
    }
    Ok(output)
}

pub fn read_vec3s(document: &Document, buffers: &[Vec<u8>], accessor: usize) -> Result<Vec<Vec3>, LoadError> {
    Ok(read_floats(document, buffers, accessor)?.chunks_exact(3).map(Vec3::from_slice).collect())
}

pub fn read_quats(document: &Document, buffers: &[Vec<u8>], accessor: usize) -> Result<Vec<Quat>, LoadError> {
    Ok(read_floats(document, buffers, accessor)?.chunks_exact(4).map(Quat::from_slice).collect())
}

pub fn read_mat4s(document: &Document, buffers: &[Vec<u8>], accessor: usize) -> Result<Vec<Mat4>, LoadError> {
    Ok(read_floats(document, buffers, accessor)?.chunks_exact(16).map(Mat4::from_cols_slice).collect())
}
