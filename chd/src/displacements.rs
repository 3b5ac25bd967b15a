use std::io;

use binout::{AsIs, Serializer};
use dyn_size_of::GetSize;

use crate::utils::bits_to_store;

/// Displacement table with entries stored at 8, 16 or 32 bits each.
///
/// Freshly constructed tables use 32-bit entries;
/// [`Function::compact`](crate::Function::compact) narrows them in place
/// to the smallest width that stores the largest committed displacement.
#[derive(Clone)]
pub enum Displacements {
    /// One byte per bucket.
    U8(Box<[u8]>),
    /// Two bytes per bucket.
    U16(Box<[u16]>),
    /// Four bytes per bucket.
    U32(Box<[u32]>),
}

impl Displacements {
    /// Returns the displacement of the bucket with the given `index`.
    #[inline(always)]
    pub fn get(&self, index: usize) -> u32 {
        match self {
            Self::U8(entries) => entries[index] as u32,
            Self::U16(entries) => entries[index] as u32,
            Self::U32(entries) => entries[index],
        }
    }

    /// Returns the number of buckets.
    pub fn len(&self) -> usize {
        match self {
            Self::U8(entries) => entries.len(),
            Self::U16(entries) => entries.len(),
            Self::U32(entries) => entries.len(),
        }
    }

    /// Returns `true` if the table has no buckets.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the width in bits of a single entry of the current representation.
    pub fn entry_bits(&self) -> u8 {
        match self {
            Self::U8(_) => 8,
            Self::U16(_) => 16,
            Self::U32(_) => 32,
        }
    }

    /// Iterates over all entries, widened to `u32`.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.len()).map(move |index| self.get(index))
    }

    /// Narrows the entries to the smallest of 8, 16 or 32 bits that stores `d_max`.
    /// Idempotent.
    pub(crate) fn compact(&mut self, d_max: u32) {
        let required_bits = bits_to_store(d_max);
        if required_bits <= 8 {
            if let Self::U16(_) | Self::U32(_) = self {
                let narrowed: Box<[u8]> = self.iter().map(|d| d as u8).collect();
                *self = Self::U8(narrowed);
            }
        } else if required_bits <= 16 {
            if let Self::U32(_) = self {
                let narrowed: Box<[u16]> = self.iter().map(|d| d as u16).collect();
                *self = Self::U16(narrowed);
            }
        }
    }

    /// Returns the number of bytes which `write` will write.
    pub(crate) fn write_bytes(&self) -> usize {
        1 + match self {
            Self::U8(entries) => AsIs::array_content_size(entries),
            Self::U16(entries) => AsIs::array_content_size(entries),
            Self::U32(entries) => AsIs::array_content_size(entries),
        }
    }

    /// Writes the entry width and the entries to `output`.
    pub(crate) fn write(&self, output: &mut dyn io::Write) -> io::Result<()> {
        AsIs::write(output, self.entry_bits())?;
        match self {
            Self::U8(entries) => AsIs::write_all(output, entries.iter()),
            Self::U16(entries) => AsIs::write_all(output, entries.iter()),
            Self::U32(entries) => AsIs::write_all(output, entries.iter()),
        }
    }

    /// Reads a table of `number_of_buckets` entries from `input`.
    pub(crate) fn read(input: &mut dyn io::Read, number_of_buckets: usize) -> io::Result<Self> {
        let entry_bits: u8 = AsIs::read(input)?;
        match entry_bits {
            8 => Ok(Self::U8(AsIs::read_n(input, number_of_buckets)?)),
            16 => Ok(Self::U16(AsIs::read_n(input, number_of_buckets)?)),
            32 => Ok(Self::U32(AsIs::read_n(input, number_of_buckets)?)),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "invalid displacement entry width",
            )),
        }
    }
}

impl GetSize for Displacements {
    fn size_bytes_dyn(&self) -> usize {
        match self {
            Self::U8(entries) => entries.size_bytes_dyn(),
            Self::U16(entries) => entries.size_bytes_dyn(),
            Self::U32(entries) => entries.size_bytes_dyn(),
        }
    }

    fn size_bytes_content_dyn(&self) -> usize {
        match self {
            Self::U8(entries) => entries.size_bytes_content_dyn(),
            Self::U16(entries) => entries.size_bytes_content_dyn(),
            Self::U32(entries) => entries.size_bytes_content_dyn(),
        }
    }

    const USES_DYN_MEM: bool = true;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrows_to_fitting_width() {
        let mut displacements = Displacements::U32(vec![1, 300, 7].into_boxed_slice());
        displacements.compact(300);
        assert_eq!(displacements.entry_bits(), 16);
        assert_eq!(displacements.get(0), 1);
        assert_eq!(displacements.get(1), 300);
        assert_eq!(displacements.get(2), 7);
        displacements.compact(300);
        assert_eq!(displacements.entry_bits(), 16);
    }

    #[test]
    fn narrows_to_bytes() {
        let mut displacements = Displacements::U32(vec![0, 200].into_boxed_slice());
        displacements.compact(200);
        assert_eq!(displacements.entry_bits(), 8);
        assert_eq!(displacements.iter().collect::<Vec<_>>(), [0, 200]);
    }

    #[test]
    fn wide_entries_stay_wide() {
        let mut displacements = Displacements::U32(vec![1 << 20].into_boxed_slice());
        displacements.compact(1 << 20);
        assert_eq!(displacements.entry_bits(), 32);
    }

    #[test]
    fn compact_on_empty() {
        let mut displacements = Displacements::U32(Box::new([]));
        displacements.compact(0);
        assert_eq!(displacements.entry_bits(), 8);
        assert!(displacements.is_empty());
    }
}
