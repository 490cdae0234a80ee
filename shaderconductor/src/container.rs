//! DXBC container reading, writing and stripping.
//!
//! A container is a 32-byte header (`DXBC`, a 16-byte digest, version,
//! total size, part count) followed by one offset per part. Each part is a
//! four-character code, a byte size and the part data. The digest covers
//! everything after itself, so any edit must go through [`ContainerBuilder`].

use crate::blob::Blob;
use crate::error::{Error, Result};
use sha1::{Digest, Sha1};

pub const DXBC_MAGIC: [u8; 4] = *b"DXBC";
const HEADER_SIZE: usize = 32;
const CONTAINER_VERSION: u32 = 1;

pub const FOURCC_INPUT_SIGNATURE: [u8; 4] = *b"ISG1";
pub const FOURCC_OUTPUT_SIGNATURE: [u8; 4] = *b"OSG1";
pub const FOURCC_DEBUG_INFO: [u8; 4] = *b"ILDB";
pub const FOURCC_DEBUG_NAME: [u8; 4] = *b"ILDN";
pub const FOURCC_PROGRAM: [u8; 4] = *b"DXIL";
pub const FOURCC_HASH: [u8; 4] = *b"HASH";

/// Removes the input and output signatures.
pub const STRIP_SIGNATURES: u32 = 0x1;
/// Removes `ILDB` and `ILDN`.
pub const STRIP_DEBUG_INFO: u32 = 0x2;

/// Parts that can be pulled out of a container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum BlobPart {
    InputSignature = 0,
    OutputSignature = 1,
    DebugInfo = 5,
    DebugName = 12,
    Program = 13,
    Hash = 14,
}

impl BlobPart {
    pub fn fourcc(self) -> [u8; 4] {
        match self {
            BlobPart::InputSignature => FOURCC_INPUT_SIGNATURE,
            BlobPart::OutputSignature => FOURCC_OUTPUT_SIGNATURE,
            BlobPart::DebugInfo => FOURCC_DEBUG_INFO,
            BlobPart::DebugName => FOURCC_DEBUG_NAME,
            BlobPart::Program => FOURCC_PROGRAM,
            BlobPart::Hash => FOURCC_HASH,
        }
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            0 => BlobPart::InputSignature,
            1 => BlobPart::OutputSignature,
            5 => BlobPart::DebugInfo,
            12 => BlobPart::DebugName,
            13 => BlobPart::Program,
            14 => BlobPart::Hash,
            _ => return None,
        })
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let b = bytes.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn corrupt(message: impl Into<String>) -> Error {
    Error::Container(message.into())
}

/// First 16 bytes of the SHA-1 of `data`.
pub fn digest(data: &[u8]) -> [u8; 16] {
    let hash = Sha1::digest(data);
    let mut out = [0u8; 16];
    out.copy_from_slice(&hash[..16]);
    out
}

/// One part of a parsed container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part<'a> {
    pub fourcc: [u8; 4],
    pub data: &'a [u8],
}

impl Part<'_> {
    pub fn name(&self) -> String {
        String::from_utf8_lossy(&self.fourcc).into_owned()
    }
}

/// A borrowed view of a DXBC container
#[derive(Debug, Clone)]
pub struct Container<'a> {
    pub digest: [u8; 16],
    pub parts: Vec<Part<'a>>,
}

impl<'a> Container<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE || bytes[..4] != DXBC_MAGIC {
            return Err(corrupt("not a DXBC container"));
        }
        let mut stored = [0u8; 16];
        stored.copy_from_slice(&bytes[4..20]);
        let total = read_u32(bytes, 24).unwrap_or(0) as usize;
        if total != bytes.len() {
            return Err(corrupt(format!(
                "container claims {} bytes but holds {}",
                total,
                bytes.len()
            )));
        }
        let count = read_u32(bytes, 28).unwrap_or(0) as usize;
        let mut parts = Vec::with_capacity(count.min(64));
        for i in 0..count {
            let offset = read_u32(bytes, HEADER_SIZE + i * 4)
                .ok_or_else(|| corrupt("part offset table is truncated"))? as usize;
            let size = read_u32(bytes, offset + 4)
                .ok_or_else(|| corrupt(format!("part {} starts outside the container", i)))?
                as usize;
            let start = offset + 8;
            let data = start
                .checked_add(size)
                .and_then(|end| bytes.get(start..end))
                .ok_or_else(|| corrupt(format!("part {} exceeds the container", i)))?;
            let mut fourcc = [0u8; 4];
            fourcc.copy_from_slice(&bytes[offset..offset + 4]);
            parts.push(Part { fourcc, data });
        }
        Ok(Container {
            digest: stored,
            parts,
        })
    }

    pub fn part(&self, fourcc: [u8; 4]) -> Option<&Part<'a>> {
        self.parts.iter().find(|p| p.fourcc == fourcc)
    }

    /// Whether the stored digest matches the contents.
    pub fn verify(bytes: &[u8]) -> bool {
        bytes.len() >= HEADER_SIZE && bytes[4..20] == digest(&bytes[20..])
    }
}

/// Assembles a container from parts, in insertion order.
#[derive(Debug, Default)]
pub struct ContainerBuilder {
    parts: Vec<([u8; 4], Vec<u8>)>,
}

impl ContainerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_part(&mut self, fourcc: [u8; 4], data: Vec<u8>) -> &mut Self {
        self.parts.push((fourcc, data));
        self
    }

    pub fn finish(&self) -> Vec<u8> {
        let table = HEADER_SIZE + self.parts.len() * 4;
        let total = table + self.parts.iter().map(|(_, d)| 8 + d.len()).sum::<usize>();
        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(&DXBC_MAGIC);
        out.extend_from_slice(&[0u8; 16]);
        out.extend_from_slice(&CONTAINER_VERSION.to_le_bytes());
        out.extend_from_slice(&(total as u32).to_le_bytes());
        out.extend_from_slice(&(self.parts.len() as u32).to_le_bytes());
        let mut offset = table;
        for (_, data) in &self.parts {
            out.extend_from_slice(&(offset as u32).to_le_bytes());
            offset += 8 + data.len();
        }
        for (fourcc, data) in &self.parts {
            out.extend_from_slice(fourcc);
            out.extend_from_slice(&(data.len() as u32).to_le_bytes());
            out.extend_from_slice(data);
        }
        let sum = digest(&out[20..]);
        out[4..20].copy_from_slice(&sum);
        out
    }
}

/// Extracts one part of a container.
pub fn get_blob_part(bytes: &[u8], part: BlobPart) -> Result<Blob> {
    let container = Container::parse(bytes)?;
    container
        .part(part.fourcc())
        .map(|p| Blob::new(p.data))
        .ok_or_else(|| {
            corrupt(format!(
                "container has no {} part",
                String::from_utf8_lossy(&part.fourcc())
            ))
        })
}

/// Rebuilds the container without the parts `flags` selects.
pub fn strip(bytes: &[u8], flags: u32) -> Result<Blob> {
    let container = Container::parse(bytes)?;
    let mut builder = ContainerBuilder::new();
    for part in &container.parts {
        let drop = match part.fourcc {
            FOURCC_INPUT_SIGNATURE | FOURCC_OUTPUT_SIGNATURE => flags & STRIP_SIGNATURES != 0,
            FOURCC_DEBUG_INFO | FOURCC_DEBUG_NAME => flags & STRIP_DEBUG_INFO != 0,
            _ => false,
        };
        if !drop {
            builder.add_part(part.fourcc, part.data.to_vec());
        }
    }
    debug_log!(
        "stripped {} of {} parts",
        container.parts.len() - builder.parts.len(),
        container.parts.len()
    );
    Ok(Blob::from(builder.finish()))
}

/// Size of one element record in a signature part
const ELEMENT_SIZE: usize = 32;

/// One row of an `ISG1`/`OSG1` signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureElement {
    pub stream: u32,
    pub semantic_name: String,
    pub semantic_index: u32,
    /// `D3D_NAME` value; `0` for user semantics
    pub system_value: u32,
    /// `D3D_REGISTER_COMPONENT_TYPE` extended with 16 and 64-bit kinds
    pub component_type: u32,
    pub register: u32,
    pub mask: u8,
    pub rw_mask: u8,
    pub min_precision: u32,
}

pub fn write_signature(elements: &[SignatureElement]) -> Vec<u8> {
    let header = 8;
    let strings_start = header + elements.len() * ELEMENT_SIZE;
    let mut strings = Vec::new();
    let mut name_offsets = Vec::with_capacity(elements.len());
    for element in elements {
        name_offsets.push(strings_start + strings.len());
        strings.extend_from_slice(element.semantic_name.as_bytes());
        strings.push(0);
    }
    while strings.len() % 4 != 0 {
        strings.push(0);
    }

    let mut out = Vec::with_capacity(strings_start + strings.len());
    out.extend_from_slice(&(elements.len() as u32).to_le_bytes());
    out.extend_from_slice(&(header as u32).to_le_bytes());
    for (element, name_offset) in elements.iter().zip(name_offsets) {
        for word in [
            element.stream,
            name_offset as u32,
            element.semantic_index,
            element.system_value,
            element.component_type,
            element.register,
        ] {
            out.extend_from_slice(&word.to_le_bytes());
        }
        out.push(element.mask);
        out.push(element.rw_mask);
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&element.min_precision.to_le_bytes());
    }
    out.extend_from_slice(&strings);
    out
}

pub fn parse_signature(data: &[u8]) -> Result<Vec<SignatureElement>> {
    let count = read_u32(data, 0).ok_or_else(|| corrupt("signature part is truncated"))? as usize;
    let start = read_u32(data, 4).ok_or_else(|| corrupt("signature part is truncated"))? as usize;
    let mut elements = Vec::with_capacity(count.min(64));
    for i in 0..count {
        let base = start + i * ELEMENT_SIZE;
        let word = |k: usize| {
            read_u32(data, base + k * 4)
                .ok_or_else(|| corrupt(format!("signature element {} is truncated", i)))
        };
        let name_offset = word(1)? as usize;
        let name = data
            .get(name_offset..)
            .and_then(|tail| tail.iter().position(|&b| b == 0).map(|end| &tail[..end]))
            .ok_or_else(|| corrupt(format!("signature element {} has no name", i)))?;
        let masks = word(6)?;
        elements.push(SignatureElement {
            stream: word(0)?,
            semantic_name: String::from_utf8_lossy(name).into_owned(),
            semantic_index: word(2)?,
            system_value: word(3)?,
            component_type: word(4)?,
            register: word(5)?,
            mask: (masks & 0xFF) as u8,
            rw_mask: ((masks >> 8) & 0xFF) as u8,
            min_precision: word(7)?,
        });
    }
    Ok(elements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> Vec<u8> {
        let mut builder = ContainerBuilder::new();
        builder
            .add_part(FOURCC_INPUT_SIGNATURE, vec![1, 2, 3, 4])
            .add_part(FOURCC_DEBUG_INFO, b"source".to_vec())
            .add_part(FOURCC_PROGRAM, vec![9; 12]);
        builder.finish()
    }

    #[test]
    fn test_parse_built_container() {
        let bytes = sample();
        assert_eq!(&bytes[..4], b"DXBC");
        assert!(Container::verify(&bytes));
        let container = Container::parse(&bytes).unwrap();
        assert_eq!(container.parts.len(), 3);
        assert_eq!(container.parts[1].name(), "ILDB");
        assert_eq!(container.part(FOURCC_PROGRAM).unwrap().data, &[9; 12][..]);
    }

    #[test]
    fn test_rejects_truncated_container() {
        let bytes = sample();
        assert!(matches!(
            Container::parse(&bytes[..bytes.len() - 1]),
            Err(Error::Container(_))
        ));
        assert!(Container::parse(b"DXBX").is_err());
    }

    #[test]
    fn test_get_blob_part() {
        let bytes = sample();
        let part = get_blob_part(&bytes, BlobPart::InputSignature).unwrap();
        assert_eq!(part.data(), &[1, 2, 3, 4]);
        let missing = get_blob_part(&bytes, BlobPart::Hash).unwrap_err();
        assert!(missing.to_string().contains("HASH"));
    }

    #[test]
    fn test_strip_debug_info_rehashes() {
        let bytes = sample();
        let stripped = strip(&bytes, STRIP_DEBUG_INFO).unwrap();
        assert!(stripped.len() < bytes.len());
        assert!(Container::verify(&stripped));
        let container = Container::parse(&stripped).unwrap();
        assert!(container.part(FOURCC_DEBUG_INFO).is_none());
        assert!(container.part(FOURCC_INPUT_SIGNATURE).is_some());

        let both = strip(&bytes, STRIP_DEBUG_INFO | STRIP_SIGNATURES).unwrap();
        assert_eq!(Container::parse(&both).unwrap().parts.len(), 1);
    }

    #[test]
    fn test_signature_table() {
        let elements = vec![
            SignatureElement {
                stream: 0,
                semantic_name: "SV_Position".into(),
                semantic_index: 0,
                system_value: 1,
                component_type: 3,
                register: 0,
                mask: 0xF,
                rw_mask: 0,
                min_precision: 0,
            },
            SignatureElement {
                stream: 0,
                semantic_name: "TEXCOORD".into(),
                semantic_index: 1,
                system_value: 0,
                component_type: 3,
                register: 1,
                mask: 0x3,
                rw_mask: 0x3,
                min_precision: 0,
            },
        ];
        let data = write_signature(&elements);
        assert_eq!(data.len() % 4, 0);
        assert_eq!(parse_signature(&data).unwrap(), elements);
    }
}
