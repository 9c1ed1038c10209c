//! Loading, linking and preparing executables.
//!
//! A [`Program`] is the immutable, shared half of an execution: verified
//! code sections with dispatch tokens installed, read-only data, the
//! writable-data templates processes copy from, and the resolved system
//! call and protection domain binding tables. Any number of processes
//! run against one program concurrently.

use std::path::Path;
use std::sync::Arc;

use crate::block::CodeBlock;
use crate::error::LoadError;
use crate::exe::{
    Reader, SectionKind, COMMON_HEADER_SIZE, EXECUTABLE_HEADER_SIZE, EXTRA_PADDING, MAGIC,
    SECTION_HEADER_SIZE, UNIT_HEADER_SIZE, VERSION,
};
use crate::isa::InstrInfo;
use crate::prepare;
use crate::section::CodeSection;
use crate::syscall::{FacilityValue, Pd, Syscall};
use crate::vm::{FacilityFinder, FacilityMap, Vm};

/// One resolved system call binding.
pub(crate) struct SyscallBinding {
    pub name: String,
    pub callable: Arc<dyn Syscall>,
}

/// One linking unit's sections, post-preparation.
pub(crate) struct LinkingUnit {
    pub code: Arc<CodeSection>,
    pub rodata: Arc<[u8]>,
    /// Template for each process's writable data section.
    pub data: Arc<[u8]>,
    pub bss_size: usize,
}

pub(crate) struct ProgramData {
    pub units: Vec<LinkingUnit>,
    pub active_unit: usize,
    pub syscalls: Vec<SyscallBinding>,
    pub pds: Vec<Arc<dyn Pd>>,
    pub facilities: Arc<FacilityMap>,
}

/// A loaded, linked and verified executable.
#[derive(Clone)]
pub struct Program {
    pub(crate) data: Arc<ProgramData>,
}

impl std::fmt::Debug for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Program").finish_non_exhaustive()
    }
}

/// Per-unit staging while sections stream in.
#[derive(Default)]
struct UnitStaging {
    code: Option<CodeSection>,
    rodata: Option<Vec<u8>>,
    data: Option<Vec<u8>>,
    bss_size: Option<usize>,
}

impl Program {
    /// Load an executable image, resolving its bindings against `vm` and
    /// running the verifier. The returned program is ready and immutable.
    pub fn load_from_memory(vm: &Vm, image: &[u8]) -> Result<Program, LoadError> {
        let mut r = Reader::new(image);

        let magic = r.take(MAGIC.len()).ok_or(LoadError::InvalidHeader)?;
        if magic != MAGIC {
            return Err(LoadError::InvalidHeader);
        }
        let version = r.u16_le().ok_or(LoadError::InvalidHeader)?;
        if version != VERSION {
            return Err(LoadError::VersionMismatch);
        }
        r.skip(COMMON_HEADER_SIZE - MAGIC.len() - 2)
            .ok_or(LoadError::InvalidHeader)?;

        let units_minus_one = r.u8().ok_or(LoadError::InvalidHeader)?;
        let active_unit = r.u8().ok_or(LoadError::InvalidHeader)? as usize;
        r.skip(EXECUTABLE_HEADER_SIZE - 2)
            .ok_or(LoadError::InvalidHeader)?;

        let mut staged_units = Vec::new();
        let mut syscalls: Vec<SyscallBinding> = Vec::new();
        let mut pds: Vec<Arc<dyn Pd>> = Vec::new();

        for unit_index in 0..=u32::from(units_minus_one) {
            let sections_minus_one = r.u8().ok_or(LoadError::InvalidHeader)?;
            r.skip(UNIT_HEADER_SIZE - 1).ok_or(LoadError::InvalidHeader)?;

            let mut staging = UnitStaging::default();
            for _ in 0..=u32::from(sections_minus_one) {
                read_section(&mut r, vm, &mut staging, &mut syscalls, &mut pds)?;
            }

            let Some(code) = staging.code else {
                return Err(LoadError::NoCodeSections);
            };
            log::debug!(
                "linking unit {unit_index}: {} code blocks, {} rodata, {} data, {} bss",
                code.len(),
                staging.rodata.as_ref().map_or(0, Vec::len),
                staging.data.as_ref().map_or(0, Vec::len),
                staging.bss_size.unwrap_or(0),
            );
            staged_units.push((code, staging.rodata, staging.data, staging.bss_size));
        }

        if active_unit >= staged_units.len() {
            return Err(LoadError::InvalidHeader);
        }

        let mut units = Vec::with_capacity(staged_units.len());
        for (mut code, rodata, data, bss_size) in staged_units {
            prepare::prepare(&mut code, syscalls.len())?;
            units.push(LinkingUnit {
                code: Arc::new(code),
                rodata: Arc::from(rodata.unwrap_or_default()),
                data: Arc::from(data.unwrap_or_default()),
                bss_size: bss_size.unwrap_or(0),
            });
        }

        Ok(Program {
            data: Arc::new(ProgramData {
                units,
                active_unit,
                syscalls,
                pds,
                facilities: FacilityMap::child(&vm.inner.facilities),
            }),
        })
    }

    pub fn load_from_file(vm: &Vm, path: impl AsRef<Path>) -> Result<Program, LoadError> {
        let image = std::fs::read(path)?;
        Program::load_from_memory(vm, &image)
    }

    /// The descriptor of the instruction starting at block `index` of
    /// code section `section`, as recorded by the verifier.
    pub fn instruction(&self, section: usize, index: usize) -> Option<&'static InstrInfo> {
        self.data.units.get(section)?.code.instruction_at(index)
    }

    /// Number of linking units (each carries one code section).
    pub fn code_section_count(&self) -> usize {
        self.data.units.len()
    }

    /// The linking unit processes of this program execute.
    pub fn active_linking_unit(&self) -> usize {
        self.data.active_unit
    }

    pub fn syscall_count(&self) -> usize {
        self.data.syscalls.len()
    }

    pub fn pd_count(&self) -> usize {
        self.data.pds.len()
    }

    pub fn pd(&self, index: usize) -> Option<Arc<dyn Pd>> {
        self.data.pds.get(index).cloned()
    }

    pub fn set_facility(&self, name: &str, value: FacilityValue) {
        self.data.facilities.set(name, value);
    }

    pub fn unset_facility(&self, name: &str) -> bool {
        self.data.facilities.unset(name)
    }

    pub fn set_facility_finder<F>(&self, finder: F)
    where
        F: Fn(&str) -> Option<FacilityValue> + Send + Sync + 'static,
    {
        self.data
            .facilities
            .set_finder(Some(Arc::new(finder) as Arc<FacilityFinder>));
    }

    pub fn find_facility(&self, name: &str) -> Option<FacilityValue> {
        self.data.facilities.find(name)
    }
}

fn read_section(
    r: &mut Reader<'_>,
    vm: &Vm,
    staging: &mut UnitStaging,
    syscalls: &mut Vec<SyscallBinding>,
    pds: &mut Vec<Arc<dyn Pd>>,
) -> Result<(), LoadError> {
    let length = r.u32_le().ok_or(LoadError::InvalidHeader)? as usize;
    let kind = SectionKind::from_u8(r.u8().ok_or(LoadError::InvalidHeader)?);
    r.skip(SECTION_HEADER_SIZE - 5).ok_or(LoadError::InvalidHeader)?;

    match kind {
        SectionKind::Text => {
            if staging.code.is_some() {
                return Err(LoadError::InvalidInputFile);
            }
            let body = r
                .take(length.checked_mul(8).ok_or(LoadError::ImplementationLimits)?)
                .ok_or(LoadError::InvalidInputFile)?;
            let blocks = body
                .chunks_exact(8)
                .map(|c| CodeBlock::from_le_bytes(c.try_into().unwrap()))
                .collect();
            staging.code = Some(CodeSection::new(blocks));
        }
        SectionKind::RoData | SectionKind::Data => {
            let body = r.take(length).ok_or(LoadError::InvalidInputFile)?.to_vec();
            r.skip(EXTRA_PADDING[length % 8])
                .ok_or(LoadError::InvalidInputFile)?;
            if kind == SectionKind::RoData {
                staging.rodata = Some(body);
            } else {
                staging.data = Some(body);
            }
        }
        SectionKind::Bss => {
            staging.bss_size = Some(length);
        }
        SectionKind::Bind => {
            for name in bind_names(r, length)? {
                let callable = vm
                    .find_syscall(&name)
                    .ok_or_else(|| LoadError::UndefinedSyscallBind(name.clone()))?;
                log::debug!("bound syscall {name:?} at index {}", syscalls.len());
                syscalls.push(SyscallBinding { name, callable });
            }
        }
        SectionKind::PdBind => {
            for name in bind_names(r, length)? {
                if pds.iter().any(|pd| pd.name() == name) {
                    return Err(LoadError::DuplicatePdBind(name));
                }
                let pd = vm
                    .find_pd(&name)
                    .ok_or_else(|| LoadError::UndefinedPdBind(name.clone()))?;
                log::debug!("bound protection domain {name:?} at index {}", pds.len());
                pds.push(pd);
            }
        }
        SectionKind::Other(_) => {
            r.skip(length).ok_or(LoadError::InvalidInputFile)?;
            r.skip(EXTRA_PADDING[length % 8])
                .ok_or(LoadError::InvalidInputFile)?;
        }
    }
    Ok(())
}

/// Split a bind-section body into its NUL-terminated names.
fn bind_names(r: &mut Reader<'_>, length: usize) -> Result<Vec<String>, LoadError> {
    if length == 0 {
        return Ok(Vec::new());
    }
    let body = r.take(length).ok_or(LoadError::InvalidInputFile)?;
    r.skip(EXTRA_PADDING[length % 8])
        .ok_or(LoadError::InvalidInputFile)?;
    if body[length - 1] != 0 {
        return Err(LoadError::InvalidInputFile);
    }
    let mut names = Vec::new();
    for name in body[..length - 1].split(|&b| b == 0) {
        if name.is_empty() {
            return Err(LoadError::InvalidInputFile);
        }
        let name = std::str::from_utf8(name).map_err(|_| LoadError::InvalidInputFile)?;
        names.push(name.to_owned());
    }
    Ok(names)
}
