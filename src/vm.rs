//! The top-level [`Vm`] handle: system call and protection domain
//! finders, plus the root of the facility chain.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::syscall::{FacilityValue, Pd, Syscall};

/// A callback resolving syscall signatures while a program loads.
pub type SyscallFinder = dyn Fn(&str) -> Option<Arc<dyn Syscall>> + Send + Sync;
/// A callback resolving protection domain names while a program loads.
pub type PdFinder = dyn Fn(&str) -> Option<Arc<dyn Pd>> + Send + Sync;
/// A callback consulted by facility lookup before falling through to the
/// stored map and the parent layer.
pub type FacilityFinder = dyn Fn(&str) -> Option<FacilityValue> + Send + Sync;

/// A layered name-to-facility map. Lookup tries the finder, then the
/// stored names, then the parent layer; `Vm`, `Program` and `Process`
/// each own one layer.
pub(crate) struct FacilityMap {
    state: Mutex<FacilityMapState>,
    parent: Option<Arc<FacilityMap>>,
}

#[derive(Default)]
struct FacilityMapState {
    map: HashMap<String, FacilityValue>,
    finder: Option<Arc<FacilityFinder>>,
}

impl FacilityMap {
    pub fn root() -> Arc<FacilityMap> {
        Arc::new(FacilityMap {
            state: Mutex::default(),
            parent: None,
        })
    }

    pub fn child(parent: &Arc<FacilityMap>) -> Arc<FacilityMap> {
        Arc::new(FacilityMap {
            state: Mutex::default(),
            parent: Some(Arc::clone(parent)),
        })
    }

    pub fn set(&self, name: &str, value: FacilityValue) {
        self.state
            .lock()
            .unwrap()
            .map
            .insert(name.to_owned(), value);
    }

    pub fn unset(&self, name: &str) -> bool {
        self.state.lock().unwrap().map.remove(name).is_some()
    }

    pub fn set_finder(&self, finder: Option<Arc<FacilityFinder>>) {
        self.state.lock().unwrap().finder = finder;
    }

    pub fn find(&self, name: &str) -> Option<FacilityValue> {
        {
            let state = self.state.lock().unwrap();
            if let Some(finder) = &state.finder {
                if let Some(found) = finder(name) {
                    return Some(found);
                }
            }
            if let Some(found) = state.map.get(name) {
                return Some(Arc::clone(found));
            }
        }
        self.parent.as_ref()?.find(name)
    }
}

pub(crate) struct VmInner {
    syscall_finder: Mutex<Option<Arc<SyscallFinder>>>,
    pd_finder: Mutex<Option<Arc<PdFinder>>>,
    pub(crate) facilities: Arc<FacilityMap>,
}

/// A virtual machine configuration: where programs loaded against it find
/// their system calls, protection domains and process facilities.
///
/// A `Vm` is cheap to clone and share; programs keep their `Vm` alive
/// through the facility chain.
#[derive(Clone)]
pub struct Vm {
    pub(crate) inner: Arc<VmInner>,
}

impl Default for Vm {
    fn default() -> Vm {
        Vm::new()
    }
}

impl Vm {
    pub fn new() -> Vm {
        Vm {
            inner: Arc::new(VmInner {
                syscall_finder: Mutex::new(None),
                pd_finder: Mutex::new(None),
                facilities: FacilityMap::root(),
            }),
        }
    }

    pub fn set_syscall_finder<F>(&self, finder: F)
    where
        F: Fn(&str) -> Option<Arc<dyn Syscall>> + Send + Sync + 'static,
    {
        *self.inner.syscall_finder.lock().unwrap() = Some(Arc::new(finder));
    }

    pub fn set_pd_finder<F>(&self, finder: F)
    where
        F: Fn(&str) -> Option<Arc<dyn Pd>> + Send + Sync + 'static,
    {
        *self.inner.pd_finder.lock().unwrap() = Some(Arc::new(finder));
    }

    /// Install the finder consulted by process-level facility lookups
    /// that fall through to this `Vm`.
    pub fn set_process_facility_finder<F>(&self, finder: F)
    where
        F: Fn(&str) -> Option<FacilityValue> + Send + Sync + 'static,
    {
        self.inner.facilities.set_finder(Some(Arc::new(finder)));
    }

    pub fn find_syscall(&self, signature: &str) -> Option<Arc<dyn Syscall>> {
        let finder = self.inner.syscall_finder.lock().unwrap().clone();
        finder.and_then(|f| f(signature))
    }

    pub fn find_pd(&self, name: &str) -> Option<Arc<dyn Pd>> {
        let finder = self.inner.pd_finder.lock().unwrap().clone();
        finder.and_then(|f| f(name))
    }

    pub fn set_facility(&self, name: &str, value: FacilityValue) {
        self.inner.facilities.set(name, value);
    }

    pub fn unset_facility(&self, name: &str) -> bool {
        self.inner.facilities.unset(name)
    }

    pub fn find_facility(&self, name: &str) -> Option<FacilityValue> {
        self.inner.facilities.find(name)
    }
}
