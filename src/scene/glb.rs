//! Binary glTF container: a 12 byte header followed by a JSON chunk and an optional BIN chunk.

use super::LoadError;

const MAGIC: &[u8; 4] = b"glTF";
const CHUNK_JSON: u32 = 0x4E4F_534A;
const CHUNK_BIN: u32 = 0x004E_4942;

pub struct Glb<'a> {
    pub json: &'a [u8],
    pub bin: Option<&'a [u8]>,
}

pub fn is_glb(bytes: &[u8]) -> bool {
    bytes.starts_with(MAGIC)
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32, LoadError> {
    bytes
        .get(offset..offset + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or(LoadError::Glb("truncated"))
}

fn read_chunk(bytes: &[u8], offset: usize) -> Result<(u32, &[u8], usize), LoadError> {
    let length = read_u32(bytes, offset)? as usize;
    let kind = read_u32(bytes, offset + 4)?;
    let start = offset + 8;
    let data = bytes.get(start..start + length).ok_or(LoadError::Glb("chunk exceeds container"))?;
    Ok((kind, data, start + length))
}

pub fn parse(bytes: &[u8]) -> Result<Glb<'_>, LoadError> {
    if !is_glb(bytes) {
        return Err(LoadError::Glb("bad magic"));
    }
    if read_u32(bytes, 4)? != 2 {
        return Err(LoadError::Glb("unsupported container version"));
    }
    let length = (read_u32(bytes, 8)? as usize).min(bytes.len());
    let bytes = &bytes[..length];

    let (kind, json, next) = read_chunk(bytes, 12)?;
    if kind != CHUNK_JSON {
        return Err(LoadError::Glb("first chunk is not JSON"));
    }
    let mut bin = None;
    let mut offset = next;
    while offset + 8 <= bytes.len() {
        let (kind, data, next) = read_chunk(bytes, offset)?;
        if kind == CHUNK_BIN && bin.is_none() {
            bin = Some(data);
        }
        offset = next;
    }
    Ok(Glb { json, bin })
}

#[cfg(test)]
pub(crate) fn build(json: &str, bin: &[u8]) -> Vec<u8> {
    let mut json = json.as_bytes().to_vec();
    while json.len() % 4 != 0 {
        json.push(b' ');
    }
    let mut bin = bin.to_vec();
    while bin.len() % 4 != 0 {
        bin.push(0);
    }
    let total = 12 + 8 + json.len() + 8 + bin.len();
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&2u32.to_le_bytes());
    out.extend_from_slice(&(total as u32).to_le_bytes());
    out.extend_from_slice(&(json.len() as u32).to_le_bytes());
    out.extend_from_slice(&CHUNK_JSON.to_le_bytes());
    out.extend_from_slice(&json);
    out.extend_from_slice(&(bin.len() as u32).to_le_bytes());
    out.extend_from_slice(&CHUNK_BIN.to_le_bytes());
    out.extend_from_slice(&bin);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_json_and_bin_chunks() {
        let bytes = build(r#"{"meshes":[]}"#, &[1, 2, 3]);
        let glb = parse(&bytes).unwrap();
        assert_eq!(std::str::from_utf8(glb.json).unwrap().trim_end(), r#"{"meshes":[]}"#);
        assert_eq!(&glb.bin.unwrap()[..3], &[1, 2, 3]);
    }

    #[test]
    fn truncated_container_is_rejected() {
        let bytes = build(r#"{"meshes":[]}"#, &[1, 2, 3]);
        let mut header_only = bytes[..16].to_vec();
        header_only[8..12].copy_from_slice(&100u32.to_le_bytes());
        assert!(matches!(parse(&header_only), Err(LoadError::Glb(_))));
        assert!(matches!(parse(b"nope"), Err(LoadError::Glb("bad magic"))));
    }
}
