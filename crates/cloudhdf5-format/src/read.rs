//! Little-endian field readers shared by the parsers.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::FormatError;

/// Fail with `UnexpectedEof` unless `data` holds `needed` bytes at `pos`.
pub fn ensure_len(data: &[u8], pos: usize, needed: usize) -> Result<(), FormatError> {
    let end = pos.saturating_add(needed);
    if end > data.len() {
        Err(FormatError::UnexpectedEof {
            expected: end,
            available: data.len(),
        })
    } else {
        Ok(())
    }
}

/// Check that an offset or length width is one the format allows.
pub fn check_width(size: u8) -> Result<(), FormatError> {
    match size {
        2 | 4 | 8 => Ok(()),
        _ => Err(FormatError::InvalidOffsetSize(size)),
    }
}

/// Read an unsigned little-endian integer of `size` bytes (1..=8).
pub fn read_uint(data: &[u8], pos: usize, size: usize) -> Result<u64, FormatError> {
    if size == 0 || size > 8 {
        return Err(FormatError::Malformed(format!("integer width {size}")));
    }
    ensure_len(data, pos, size)?;
    Ok(LittleEndian::read_uint(&data[pos..pos + size], size))
}

/// Whether the `size` bytes at `pos` are all 0xFF (the undefined address).
pub fn is_undefined(data: &[u8], pos: usize, size: usize) -> bool {
    pos + size <= data.len() && data[pos..pos + size].iter().all(|&b| b == 0xFF)
}

/// Sequential reader over a structure's bytes.
///
/// Positions are relative to the start of the slice, so an `UnexpectedEof`
/// reports how many bytes from the structure start are required.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn at(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn skip(&mut self, n: usize) -> Result<(), FormatError> {
        ensure_len(self.data, self.pos, n)?;
        self.pos += n;
        Ok(())
    }

    pub fn u8(&mut self) -> Result<u8, FormatError> {
        ensure_len(self.data, self.pos, 1)?;
        let v = self.data[self.pos];
        self.pos += 1;
        Ok(v)
    }

    pub fn u16(&mut self) -> Result<u16, FormatError> {
        Ok(self.uint(2)? as u16)
    }

    pub fn u32(&mut self) -> Result<u32, FormatError> {
        Ok(self.uint(4)? as u32)
    }

    pub fn u64(&mut self) -> Result<u64, FormatError> {
        self.uint(8)
    }

    /// Read an unsigned integer of `size` bytes.
    pub fn uint(&mut self, size: usize) -> Result<u64, FormatError> {
        let v = read_uint(self.data, self.pos, size)?;
        self.pos += size;
        Ok(v)
    }

    /// Read an address of the superblock's offset width.
    ///
    /// The all-ones pattern decodes to [`crate::UNDEFINED_ADDRESS`] regardless of width.
    pub fn offset(&mut self, size: u8) -> Result<u64, FormatError> {
        check_width(size)?;
        let s = size as usize;
        ensure_len(self.data, self.pos, s)?;
        let undefined = is_undefined(self.data, self.pos, s);
        let v = self.uint(s)?;
        Ok(if undefined { crate::UNDEFINED_ADDRESS } else { v })
    }

    /// Read an address, mapping the undefined pattern to `None`.
    pub fn optional_offset(&mut self, size: u8) -> Result<Option<u64>, FormatError> {
        let addr = self.offset(size)?;
        Ok((addr != crate::UNDEFINED_ADDRESS).then_some(addr))
    }

    /// Read a length of the superblock's length width.
    pub fn length(&mut self, size: u8) -> Result<u64, FormatError> {
        if !matches!(size, 2 | 4 | 8) {
            return Err(FormatError::InvalidLengthSize(size));
        }
        self.uint(size as usize)
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], FormatError> {
        ensure_len(self.data, self.pos, n)?;
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Read a 4-byte signature and compare it against `expected`.
    pub fn signature(&mut self, expected: &[u8; 4], structure: &'static str) -> Result<(), FormatError> {
        let sig = self.bytes(4)?;
        if sig != expected {
            let mut found = [0u8; 4];
            found.copy_from_slice(sig);
            return Err(FormatError::InvalidSignature { structure, found });
        }
        Ok(())
    }
}

/// Decode a NUL-terminated (or unterminated) name into a `String`.
pub fn c_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}
