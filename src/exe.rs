//! The executable container format, version 0x0.
//!
//! Everything is little-endian and 8-byte aligned. A file is a common
//! header, an executable header, then one or more linking units, each a
//! unit header followed by its sections. Section bodies are padded to a
//! multiple of eight bytes.
//!
//! ```text
//! common header      magic[12]  version:u16  reserved:u16
//! executable header  units_minus_one:u8  active_unit:u8  reserved[6]
//! unit header        sections_minus_one:u8  reserved[7]
//! section header     length:u32  type:u8  reserved[3]
//! ```
//!
//! `length` is a byte count for every section type except TEXT, where it
//! counts 64-bit code blocks. BSS sections have no body at all.

use crate::block::CodeBlock;

/// Magic bytes opening every executable.
pub const MAGIC: [u8; 12] = *b"SecreCexec\0\0";

/// The only container version this library reads.
pub const VERSION: u16 = 0;

pub(crate) const COMMON_HEADER_SIZE: usize = 16;
pub(crate) const EXECUTABLE_HEADER_SIZE: usize = 8;
pub(crate) const UNIT_HEADER_SIZE: usize = 8;
pub(crate) const SECTION_HEADER_SIZE: usize = 8;

/// Pad bytes appended after a body of `len % 8 == i` bytes.
pub(crate) const EXTRA_PADDING: [usize; 8] = [0, 7, 6, 5, 4, 3, 2, 1];

/// Section kinds of the version-0x0 container. Unknown kinds are carried
/// so the loader can skip them silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Text,
    RoData,
    Data,
    Bss,
    Bind,
    PdBind,
    Other(u8),
}

impl SectionKind {
    pub(crate) fn from_u8(v: u8) -> SectionKind {
        match v {
            0 => SectionKind::Text,
            1 => SectionKind::RoData,
            2 => SectionKind::Data,
            3 => SectionKind::Bss,
            4 => SectionKind::Bind,
            5 => SectionKind::PdBind,
            other => SectionKind::Other(other),
        }
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            SectionKind::Text => 0,
            SectionKind::RoData => 1,
            SectionKind::Data => 2,
            SectionKind::Bss => 3,
            SectionKind::Bind => 4,
            SectionKind::PdBind => 5,
            SectionKind::Other(other) => other,
        }
    }
}

/// A byte-oriented cursor over an executable image.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Reader<'a> {
        Reader { buf, pos: 0 }
    }

    pub fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        if end > self.buf.len() {
            return None;
        }
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Some(out)
    }

    pub fn skip(&mut self, n: usize) -> Option<()> {
        self.take(n).map(|_| ())
    }

    pub fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    pub fn u16_le(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32_le(&mut self) -> Option<u32> {
        self.take(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

/// Programmatic construction of version-0x0 executables.
///
/// This is the assembler's output stage; the test suite uses it to build
/// the programs it runs.
#[derive(Default)]
pub struct Builder {
    units: Vec<UnitBuilder>,
    active_unit: u8,
}

/// One linking unit under construction.
#[derive(Default)]
pub struct UnitBuilder {
    sections: Vec<(SectionKind, u32, Vec<u8>)>,
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    /// Select which linking unit a process of this executable runs.
    pub fn active_unit(&mut self, index: u8) -> &mut Builder {
        self.active_unit = index;
        self
    }

    /// Append a new linking unit.
    pub fn unit(&mut self) -> &mut UnitBuilder {
        self.units.push(UnitBuilder::default());
        self.units.last_mut().unwrap()
    }

    pub fn build(&self) -> Vec<u8> {
        assert!(!self.units.is_empty(), "an executable needs a linking unit");
        assert!(self.units.len() <= 256);
        let mut out = Vec::new();
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.extend_from_slice(&[0u8; 2]);
        out.push((self.units.len() - 1) as u8);
        out.push(self.active_unit);
        out.extend_from_slice(&[0u8; 6]);
        for unit in &self.units {
            assert!(!unit.sections.is_empty(), "a linking unit needs sections");
            assert!(unit.sections.len() <= 256);
            out.push((unit.sections.len() - 1) as u8);
            out.extend_from_slice(&[0u8; 7]);
            for (kind, length, body) in &unit.sections {
                out.extend_from_slice(&length.to_le_bytes());
                out.push(kind.to_u8());
                out.extend_from_slice(&[0u8; 3]);
                out.extend_from_slice(body);
                if *kind != SectionKind::Text && *kind != SectionKind::Bss {
                    out.extend(std::iter::repeat(0u8).take(EXTRA_PADDING[body.len() % 8]));
                }
            }
        }
        out
    }
}

impl UnitBuilder {
    /// A TEXT section holding raw instruction blocks.
    pub fn text(&mut self, code: &[CodeBlock]) -> &mut UnitBuilder {
        let mut body = Vec::with_capacity(code.len() * 8);
        for block in code {
            body.extend_from_slice(&block.to_le_bytes());
        }
        self.sections
            .push((SectionKind::Text, code.len() as u32, body));
        self
    }

    pub fn rodata(&mut self, bytes: &[u8]) -> &mut UnitBuilder {
        self.sections
            .push((SectionKind::RoData, bytes.len() as u32, bytes.to_vec()));
        self
    }

    pub fn data(&mut self, bytes: &[u8]) -> &mut UnitBuilder {
        self.sections
            .push((SectionKind::Data, bytes.len() as u32, bytes.to_vec()));
        self
    }

    /// Declare the per-process zero-initialized section size.
    pub fn bss(&mut self, size: u32) -> &mut UnitBuilder {
        self.sections.push((SectionKind::Bss, size, Vec::new()));
        self
    }

    /// Bind the named system calls, in index order.
    pub fn bind(&mut self, names: &[&str]) -> &mut UnitBuilder {
        let body = nul_joined(names);
        self.sections
            .push((SectionKind::Bind, body.len() as u32, body));
        self
    }

    /// Bind the named protection domains, in index order.
    pub fn pd_bind(&mut self, names: &[&str]) -> &mut UnitBuilder {
        let body = nul_joined(names);
        self.sections
            .push((SectionKind::PdBind, body.len() as u32, body));
        self
    }

    /// A section of an unknown kind; loaders skip these.
    pub fn other(&mut self, kind: u8, bytes: &[u8]) -> &mut UnitBuilder {
        self.sections
            .push((SectionKind::Other(kind), bytes.len() as u32, bytes.to_vec()));
        self
    }
}

fn nul_joined(names: &[&str]) -> Vec<u8> {
    let mut body = Vec::new();
    for name in names {
        debug_assert!(!name.contains('\0'));
        body.extend_from_slice(name.as_bytes());
        body.push(0);
    }
    body
}
