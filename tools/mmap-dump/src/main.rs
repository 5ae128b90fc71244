//! Resolves an E820 listing the way the loader would and prints the result.
//!
//! ```text
//! mmap-dump <listing> [out-table]
//! ```
//!
//! Each listing line is `base length type [attributes]`, numbers in decimal
//! or `0x` hex; `#` starts a comment. With `out-table`, the resolved map is
//! also written there as a handoff table.

use boot_addresses::PhysicalAddress;
use boot_firmware::e820::{self, AddressRangeDescriptor, ExtendedAttributes};
use boot_info::memory::MAX_ADDRESSABLE_32;
use boot_log::{BootLogger, LogSink};
use boot_mmap::MemoryMap;
use boot_mmap::host::SparsePhys;
use log::{LevelFilter, info};
use std::io::{self, Write};
use std::{env, fs};

struct Stderr;

impl LogSink for Stderr {
    fn write_str(&self, s: &str) {
        let _ = io::stderr().write_all(s.as_bytes());
    }
}

static LOGGER: BootLogger<Stderr> = BootLogger::new(LevelFilter::Debug, Stderr);

fn main() -> io::Result<()> {
    // args: <listing> [out-table]
    let mut args = env::args().skip(1);
    let listing = args
        .next()
        .ok_or_else(|| invalid_input("usage: mmap-dump <listing> [out-table]"))?;
    let out = args.next();

    LOGGER.install().map_err(io::Error::other)?;

    let text = fs::read_to_string(&listing)?;
    let descriptors = parse_listing(&text)?;
    info!("{listing}: {} descriptors", descriptors.len());

    let mut map = MemoryMap::new(SparsePhys::new(), PhysicalAddress::new(MAX_ADDRESSABLE_32));
    e820::insert_descriptors(&mut map, descriptors);

    print_map(&map, &mut io::stdout().lock())?;

    if let Some(out) = out {
        let mut table = vec![0u8; map.table_len()];
        let written = map
            .write_table(map.key(), &mut table)
            .map_err(io::Error::other)?;
        fs::write(&out, &table[..written])?;
        info!("wrote {written} bytes to {out}");
    }

    Ok(())
}

/// Writes one line per entry followed by a summary line.
fn print_map(map: &MemoryMap<SparsePhys>, out: &mut impl Write) -> io::Result<()> {
    for region in map.regions() {
        writeln!(out, "{region}")?;
    }
    writeln!(
        out,
        "{} entries, {} carved entry pages, key {}",
        map.len(),
        map.carved_pages(),
        map.key()
    )
}

fn parse_listing(text: &str) -> io::Result<Vec<AddressRangeDescriptor>> {
    let mut descriptors = Vec::new();
    for (number, line) in text.lines().enumerate() {
        let line = line.split('#').next().unwrap_or_default().trim();
        if line.is_empty() {
            continue;
        }
        let descriptor = parse_line(line)
            .ok_or_else(|| invalid_input(&format!("line {}: cannot parse {line:?}", number + 1)))?;
        descriptors.push(descriptor);
    }
    Ok(descriptors)
}

fn parse_line(line: &str) -> Option<AddressRangeDescriptor> {
    let mut fields = line.split_whitespace();
    let base = parse_number(fields.next()?)?;
    let length = parse_number(fields.next()?)?;
    let kind = u32::try_from(parse_number(fields.next()?)?).ok()?;
    let attributes = match fields.next() {
        Some(field) => u32::try_from(parse_number(field)?).ok()?,
        None => ExtendedAttributes::new().with_enabled(true).into_bits(),
    };
    if fields.next().is_some() {
        return None;
    }
    Some(AddressRangeDescriptor {
        base,
        length,
        kind,
        attributes,
    })
}

fn parse_number(field: &str) -> Option<u64> {
    match field.strip_prefix("0x").or_else(|| field.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16).ok(),
        None => field.replace('_', "").parse().ok(),
    }
}

fn invalid_input(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, message.to_owned())
}
