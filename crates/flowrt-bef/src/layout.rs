//! Section-layout reader.
//!
//! Walks the section framing of an emitted BEF image: enough for the
//! `befdump` tool and for tests to locate and probe section bodies. This
//! is not an executor; kernel records are not interpreted here.

use crate::encoding::{SectionId, BEF_MAGIC_1, BEF_MAGIC_2, BEF_VERSION_0};

/// Errors produced while walking a BEF image.
#[derive(Debug, thiserror::Error)]
pub enum LayoutError {
    /// The file does not start with the BEF magic bytes.
    #[error("not a BEF file: bad magic bytes")]
    BadMagic,

    /// The image ends in the middle of a section or integer.
    #[error("truncated BEF image at byte {offset}")]
    Truncated {
        /// Byte offset where the image ended unexpectedly.
        offset: usize,
    },
}

/// One decoded section frame.
#[derive(Clone, Debug)]
pub struct SectionEntry {
    /// Raw section id byte.
    pub id: u8,
    /// Offset of the section body within the image.
    pub body_offset: usize,
    /// Length of the section body in bytes.
    pub len: usize,
    /// Declared alignment, when the frame carried the alignment flag.
    pub alignment: Option<u8>,
}

impl SectionEntry {
    /// The decoded section id, if known.
    pub fn section_id(&self) -> Option<SectionId> {
        SectionId::from_u8(self.id)
    }

    /// Human-readable section name.
    pub fn name(&self) -> &'static str {
        self.section_id().map_or("Unknown", SectionId::name)
    }
}

/// Decodes a variable-byte integer, returning the value and the number of
/// bytes consumed.
pub fn decode_vbr(bytes: &[u8], offset: usize) -> Result<(u64, usize), LayoutError> {
    let mut value = 0u64;
    let mut consumed = 0;
    loop {
        let byte = *bytes
            .get(offset + consumed)
            .ok_or(LayoutError::Truncated { offset: offset + consumed })?;
        consumed += 1;
        value = (value << 7) | u64::from(byte & 0x7F);
        if byte & 0x80 == 0 {
            return Ok((value, consumed));
        }
    }
}

/// Walks all section frames of a BEF image.
pub fn read_sections(bytes: &[u8]) -> Result<Vec<SectionEntry>, LayoutError> {
    if bytes.len() < 3 || bytes[0] != BEF_MAGIC_1 || bytes[1] != BEF_MAGIC_2 {
        return Err(LayoutError::BadMagic);
    }
    if bytes[2] != BEF_VERSION_0 {
        return Err(LayoutError::BadMagic);
    }

    let mut sections = Vec::new();
    let mut cursor = 3usize;
    while cursor < bytes.len() {
        let id = bytes[cursor];
        cursor += 1;

        let (len_and_flag, consumed) = decode_vbr(bytes, cursor)?;
        cursor += consumed;
        let len = (len_and_flag >> 1) as usize;

        let alignment = if len_and_flag & 1 != 0 {
            let align = *bytes
                .get(cursor)
                .ok_or(LayoutError::Truncated { offset: cursor })?;
            cursor += 1;
            while cursor % align as usize != 0 {
                cursor += 1;
            }
            Some(align)
        } else {
            None
        };

        if cursor + len > bytes.len() {
            return Err(LayoutError::Truncated { offset: cursor });
        }
        sections.push(SectionEntry {
            id,
            body_offset: cursor,
            len,
            alignment,
        });
        cursor += len;
    }
    Ok(sections)
}

/// Returns the body bytes of a section entry.
pub fn section_body<'a>(bytes: &'a [u8], entry: &SectionEntry) -> &'a [u8] {
    &bytes[entry.body_offset..entry.body_offset + entry.len]
}

/// Finds the first section with the given id.
pub fn find_section<'a>(
    sections: &'a [SectionEntry],
    id: SectionId,
) -> Option<&'a SectionEntry> {
    sections.iter().find(|s| s.id == id as u8)
}

/// One decoded function-index entry.
#[derive(Clone, Debug)]
pub struct FunctionIndexInfo {
    /// Raw function kind byte.
    pub kind: u8,
    /// Offset of the function body within the Functions section.
    pub function_offset: u64,
    /// Offset of the function name within the Strings section.
    pub name_offset: u64,
    /// Type-table indices of the input types.
    pub input_types: Vec<u64>,
    /// Type-table indices of the result types.
    pub result_types: Vec<u64>,
}

/// Decodes the FunctionIndex section body.
pub fn read_function_index(body: &[u8]) -> Result<Vec<FunctionIndexInfo>, LayoutError> {
    let mut cursor = 0usize;
    let (count, consumed) = decode_vbr(body, cursor)?;
    cursor += consumed;

    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let kind = *body
            .get(cursor)
            .ok_or(LayoutError::Truncated { offset: cursor })?;
        cursor += 1;

        let mut next = |cursor: &mut usize| -> Result<u64, LayoutError> {
            let (value, consumed) = decode_vbr(body, *cursor)?;
            *cursor += consumed;
            Ok(value)
        };

        let function_offset = next(&mut cursor)?;
        let name_offset = next(&mut cursor)?;

        let num_inputs = next(&mut cursor)?;
        let mut input_types = Vec::with_capacity(num_inputs as usize);
        for _ in 0..num_inputs {
            input_types.push(next(&mut cursor)?);
        }
        let num_results = next(&mut cursor)?;
        let mut result_types = Vec::with_capacity(num_results as usize);
        for _ in 0..num_results {
            result_types.push(next(&mut cursor)?);
        }

        entries.push(FunctionIndexInfo {
            kind,
            function_offset,
            name_offset,
            input_types,
            result_types,
        });
    }
    Ok(entries)
}

/// Reads the NUL-terminated string at `offset` within a Strings section
/// body.
pub fn read_nul_string(body: &[u8], offset: usize) -> Option<&str> {
    let rest = body.get(offset..)?;
    let end = rest.iter().position(|&b| b == 0)?;
    std::str::from_utf8(&rest[..end]).ok()
}
