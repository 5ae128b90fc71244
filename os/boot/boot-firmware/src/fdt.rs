//! # Flattened Device Tree Memory Discovery
//!
//! Reads just enough of a devicetree blob to find memory: the memory
//! reservation block and the `reg` property of the root's `memory` nodes.
//! All multi-byte values in the blob are big-endian.

use boot_mmap::{MemoryRegion, MemoryType, RegionSink};
use log::{debug, info};

pub const FDT_MAGIC: u32 = 0xD00D_FEED;

const FDT_BEGIN_NODE: u32 = 0x1;
const FDT_END_NODE: u32 = 0x2;
const FDT_PROP: u32 = 0x3;
const FDT_NOP: u32 = 0x4;
const FDT_END: u32 = 0x9;

const HEADER_LEN: usize = 40;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FdtError {
    #[error("bad devicetree magic {0:#010x}")]
    BadMagic(u32),
    #[error("devicetree blob is truncated")]
    Truncated,
    #[error("devicetree has no memory node")]
    MissingMemoryNode,
    #[error("unsupported cell sizes: #address-cells = {address}, #size-cells = {size}")]
    UnsupportedCells { address: u32, size: u32 },
    #[error("unexpected structure token {0:#x}")]
    UnexpectedToken(u32),
}

/// A validated view of a devicetree blob.
#[derive(Copy, Clone)]
pub struct Fdt<'a> {
    blob: &'a [u8],
    structure: &'a [u8],
    strings: &'a [u8],
    reservations: &'a [u8],
}

impl<'a> Fdt<'a> {
    /// Checks the header and slices out the blocks it points to.
    ///
    /// # Errors
    /// [`FdtError::BadMagic`] or [`FdtError::Truncated`].
    pub fn new(blob: &'a [u8]) -> Result<Self, FdtError> {
        let magic = be32(blob, 0)?;
        if magic != FDT_MAGIC {
            return Err(FdtError::BadMagic(magic));
        }
        if blob.len() < HEADER_LEN {
            return Err(FdtError::Truncated);
        }
        let total = be32(blob, 4)? as usize;
        let blob = blob.get(..total).ok_or(FdtError::Truncated)?;

        let off_struct = be32(blob, 8)? as usize;
        let off_strings = be32(blob, 12)? as usize;
        let off_rsvmap = be32(blob, 16)? as usize;
        let size_strings = be32(blob, 32)? as usize;
        let size_struct = be32(blob, 36)? as usize;

        Ok(Self {
            blob,
            structure: block(blob, off_struct, size_struct)?,
            strings: block(blob, off_strings, size_strings)?,
            reservations: blob.get(off_rsvmap..).ok_or(FdtError::Truncated)?,
        })
    }

    /// Total size of the blob in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.blob.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.blob.is_empty()
    }

    /// Entries of the memory reservation block, as `(address, size)`.
    pub fn reservations(&self) -> impl Iterator<Item = (u64, u64)> + 'a {
        self.reservations
            .chunks_exact(16)
            .map(|pair| {
                let address = u64::from_be_bytes(pair[..8].try_into().unwrap_or_default());
                let size = u64::from_be_bytes(pair[8..].try_into().unwrap_or_default());
                (address, size)
            })
            .take_while(|&(address, size)| address != 0 || size != 0)
    }

    /// Calls `f` with every `(address, size)` pair of the root's memory nodes.
    ///
    /// Returns the number of memory nodes visited.
    ///
    /// # Errors
    /// Malformed structure blocks and cell sizes other than one or two.
    pub fn memory_ranges(&self, mut f: impl FnMut(u64, u64)) -> Result<usize, FdtError> {
        let mut cursor = Cursor {
            bytes: self.structure,
            offset: 0,
        };
        let mut depth = 0usize;
        let mut address_cells = 2;
        let mut size_cells = 1;
        let mut in_memory = false;
        let mut memory_nodes = 0;

        loop {
            match cursor.u32()? {
                FDT_BEGIN_NODE => {
                    let name = cursor.name()?;
                    depth += 1;
                    in_memory = depth == 2 && is_memory_node(name);
                    if in_memory {
                        memory_nodes += 1;
                    }
                }
                FDT_END_NODE => {
                    depth = depth.checked_sub(1).ok_or(FdtError::UnexpectedToken(FDT_END_NODE))?;
                    in_memory = false;
                }
                FDT_PROP => {
                    let len = cursor.u32()? as usize;
                    let name_offset = cursor.u32()? as usize;
                    let value = cursor.bytes(len)?;
                    let name = self.string(name_offset)?;
                    match (depth, name) {
                        (1, b"#address-cells") => address_cells = cell_value(value)?,
                        (1, b"#size-cells") => size_cells = cell_value(value)?,
                        (2, b"reg") if in_memory => {
                            decode_reg(value, address_cells, size_cells, &mut f)?;
                        }
                        _ => {}
                    }
                }
                FDT_NOP => {}
                FDT_END => break,
                token => return Err(FdtError::UnexpectedToken(token)),
            }
        }

        Ok(memory_nodes)
    }

    fn string(&self, offset: usize) -> Result<&'a [u8], FdtError> {
        let tail = self.strings.get(offset..).ok_or(FdtError::Truncated)?;
        let end = tail.iter().position(|&b| b == 0).ok_or(FdtError::Truncated)?;
        Ok(&tail[..end])
    }
}

/// Records the reservations as reserved memory, then the memory nodes as
/// conventional memory.
///
/// Returns the number of regions inserted.
///
/// # Errors
/// Any [`FdtError`]; nothing is inserted if the blob is malformed.
pub fn collect<S: RegionSink + ?Sized>(fdt: &Fdt<'_>, sink: &mut S) -> Result<usize, FdtError> {
    // Validate the structure block before touching the sink.
    let nodes = fdt.memory_ranges(|_, _| {})?;
    if nodes == 0 {
        return Err(FdtError::MissingMemoryNode);
    }

    let mut inserted = 0;
    for (address, size) in fdt.reservations() {
        debug!("FDT: reserved {address:#x}+{size:#x}");
        sink.insert(MemoryRegion::new(address, size, MemoryType::Reserved));
        inserted += 1;
    }
    fdt.memory_ranges(|address, size| {
        sink.insert(MemoryRegion::new(address, size, MemoryType::Conventional));
        inserted += 1;
    })?;

    info!("FDT: {inserted} regions from {nodes} memory nodes");
    Ok(inserted)
}

fn is_memory_node(name: &[u8]) -> bool {
    name == b"memory" || name.starts_with(b"memory@")
}

fn cell_value(value: &[u8]) -> Result<u32, FdtError> {
    be32(value, 0)
}

fn decode_reg(
    value: &[u8],
    address_cells: u32,
    size_cells: u32,
    f: &mut impl FnMut(u64, u64),
) -> Result<(), FdtError> {
    if !matches!(address_cells, 1 | 2) || !matches!(size_cells, 1 | 2) {
        return Err(FdtError::UnsupportedCells {
            address: address_cells,
            size: size_cells,
        });
    }
    let stride = (address_cells + size_cells) as usize * 4;
    for pair in value.chunks_exact(stride) {
        let (address, size) = pair.split_at(address_cells as usize * 4);
        f(cells(address)?, cells(size)?);
    }
    Ok(())
}

fn cells(bytes: &[u8]) -> Result<u64, FdtError> {
    match bytes.len() {
        4 => be32(bytes, 0).map(u64::from),
        8 => Ok(u64::from_be_bytes(bytes.try_into().map_err(|_| FdtError::Truncated)?)),
        _ => Err(FdtError::Truncated),
    }
}

fn be32(bytes: &[u8], offset: usize) -> Result<u32, FdtError> {
    let raw = bytes.get(offset..offset + 4).ok_or(FdtError::Truncated)?;
    Ok(u32::from_be_bytes(raw.try_into().map_err(|_| FdtError::Truncated)?))
}

fn block(blob: &[u8], offset: usize, len: usize) -> Result<&[u8], FdtError> {
    let end = offset.checked_add(len).ok_or(FdtError::Truncated)?;
    blob.get(offset..end).ok_or(FdtError::Truncated)
}

/// Walks the structure block one aligned token at a time.
struct Cursor<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn u32(&mut self) -> Result<u32, FdtError> {
        let value = be32(self.bytes, self.offset)?;
        self.offset += 4;
        Ok(value)
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], FdtError> {
        let value = block(self.bytes, self.offset, len)?;
        self.offset = (self.offset + len).next_multiple_of(4);
        Ok(value)
    }

    fn name(&mut self) -> Result<&'a [u8], FdtError> {
        let tail = self.bytes.get(self.offset..).ok_or(FdtError::Truncated)?;
        let len = tail.iter().position(|&b| b == 0).ok_or(FdtError::Truncated)?;
        self.offset = (self.offset + len + 1).next_multiple_of(4);
        Ok(&tail[..len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::RecordingSink;

    /// Assembles a devicetree blob.
    #[derive(Default)]
    struct Builder {
        structure: Vec<u8>,
        strings: Vec<u8>,
        reservations: Vec<(u64, u64)>,
    }

    impl Builder {
        fn token(&mut self, token: u32) -> &mut Self {
            self.structure.extend_from_slice(&token.to_be_bytes());
            self
        }

        fn begin(&mut self, name: &str) -> &mut Self {
            self.token(FDT_BEGIN_NODE);
            self.structure.extend_from_slice(name.as_bytes());
            self.structure.push(0);
            self.pad()
        }

        fn end(&mut self) -> &mut Self {
            self.token(FDT_END_NODE)
        }

        fn prop(&mut self, name: &str, value: &[u8]) -> &mut Self {
            let name_offset = u32::try_from(self.strings.len()).unwrap();
            self.strings.extend_from_slice(name.as_bytes());
            self.strings.push(0);
            self.token(FDT_PROP);
            self.token(u32::try_from(value.len()).unwrap());
            self.token(name_offset);
            self.structure.extend_from_slice(value);
            self.pad()
        }

        fn prop_u32(&mut self, name: &str, value: u32) -> &mut Self {
            self.prop(name, &value.to_be_bytes())
        }

        fn pad(&mut self) -> &mut Self {
            while !self.structure.len().is_multiple_of(4) {
                self.structure.push(0);
            }
            self
        }

        fn build(&mut self) -> Vec<u8> {
            self.token(FDT_END);
            let mut rsvmap = Vec::new();
            for &(address, size) in self.reservations.iter().chain(&[(0, 0)]) {
                rsvmap.extend_from_slice(&address.to_be_bytes());
                rsvmap.extend_from_slice(&size.to_be_bytes());
            }
            let off_rsvmap = HEADER_LEN;
            let off_struct = off_rsvmap + rsvmap.len();
            let off_strings = off_struct + self.structure.len();
            let total = off_strings + self.strings.len();

            let mut blob = Vec::with_capacity(total);
            for field in [
                FDT_MAGIC,
                u32::try_from(total).unwrap(),
                u32::try_from(off_struct).unwrap(),
                u32::try_from(off_strings).unwrap(),
                u32::try_from(off_rsvmap).unwrap(),
                17,
                16,
                0,
                u32::try_from(self.strings.len()).unwrap(),
                u32::try_from(self.structure.len()).unwrap(),
            ] {
                blob.extend_from_slice(&field.to_be_bytes());
            }
            blob.extend_from_slice(&rsvmap);
            blob.extend_from_slice(&self.structure);
            blob.extend_from_slice(&self.strings);
            blob
        }
    }

    fn reg64(pairs: &[(u64, u64)]) -> Vec<u8> {
        pairs
            .iter()
            .flat_map(|&(a, s)| a.to_be_bytes().into_iter().chain(s.to_be_bytes()))
            .collect()
    }

    #[test]
    fn reads_memory_and_reservations() {
        let mut b = Builder::default();
        b.reservations.push((0x4000_0000, 0x1_0000));
        let blob = b
            .begin("")
            .prop_u32("#address-cells", 2)
            .prop_u32("#size-cells", 2)
            .begin("chosen")
            .prop("bootargs", b"console=ttyS0\0")
            .end()
            .begin("memory@40000000")
            .prop("device_type", b"memory\0")
            .prop("reg", &reg64(&[(0x4000_0000, 0x800_0000), (0x1_0000_0000, 0x1000_0000)]))
            .end()
            .end()
            .build();

        let fdt = Fdt::new(&blob).unwrap();
        assert_eq!(fdt.reservations().collect::<Vec<_>>(), [(0x4000_0000, 0x1_0000)]);

        let mut sink = RecordingSink::default();
        assert_eq!(collect(&fdt, &mut sink), Ok(3));
        assert_eq!(
            sink.regions,
            [
                MemoryRegion::new(0x4000_0000, 0x1_0000, MemoryType::Reserved),
                MemoryRegion::new(0x4000_0000, 0x800_0000, MemoryType::Conventional),
                MemoryRegion::new(0x1_0000_0000, 0x1000_0000, MemoryType::Conventional),
            ]
        );
    }

    #[test]
    fn single_cells_and_default_sizes() {
        let blob = Builder::default()
            .begin("")
            .prop_u32("#address-cells", 1)
            .begin("memory")
            .prop(
                "reg",
                &[0x8000_0000u32.to_be_bytes(), 0x1000_0000u32.to_be_bytes()].concat(),
            )
            .end()
            .end()
            .build();
        let mut ranges = Vec::new();
        let fdt = Fdt::new(&blob).unwrap();
        assert_eq!(fdt.memory_ranges(|a, s| ranges.push((a, s))), Ok(1));
        assert_eq!(ranges, [(0x8000_0000, 0x1000_0000)]);
    }

    #[test]
    fn nested_memory_nodes_are_ignored() {
        let blob = Builder::default()
            .begin("")
            .begin("soc")
            .begin("memory@0")
            .prop("reg", &[0u8; 12])
            .end()
            .end()
            .end()
            .build();
        let mut sink = RecordingSink::default();
        let fdt = Fdt::new(&blob).unwrap();
        assert_eq!(collect(&fdt, &mut sink), Err(FdtError::MissingMemoryNode));
        assert!(sink.regions.is_empty());
    }

    #[test]
    fn rejects_bad_blobs() {
        assert_eq!(Fdt::new(&[0; 64]).err(), Some(FdtError::BadMagic(0)));
        assert_eq!(
            Fdt::new(&FDT_MAGIC.to_be_bytes()).err(),
            Some(FdtError::Truncated)
        );

        let mut blob = Builder::default().begin("").end().build();
        blob.truncate(blob.len() - 1);
        assert_eq!(Fdt::new(&blob).err(), Some(FdtError::Truncated));
    }

    #[test]
    fn rejects_wide_cells() {
        let blob = Builder::default()
            .begin("")
            .prop_u32("#address-cells", 3)
            .begin("memory")
            .prop("reg", &[0u8; 16])
            .end()
            .end()
            .build();
        let fdt = Fdt::new(&blob).unwrap();
        assert_eq!(
            fdt.memory_ranges(|_, _| {}),
            Err(FdtError::UnsupportedCells {
                address: 3,
                size: 1
            })
        );
    }

    #[test]
    fn unknown_tokens_are_errors() {
        let blob = Builder::default().begin("").token(0x7).end().build();
        let fdt = Fdt::new(&blob).unwrap();
        assert_eq!(fdt.memory_ranges(|_, _| {}), Err(FdtError::UnexpectedToken(0x7)));
    }
}
