//! Native Module Module
//!
//! Owned handles to loaded page modules and the objects constructed from them.
//!
//! A compiled page exports five C symbols:
//! - `hotpage_object_size() -> usize`
//! - `hotpage_create_object(mem) -> object` (placement construction)
//! - `hotpage_create_object_in(arena) -> object` (allocator-aware construction)
//! - `hotpage_init_module(host)` called once per load
//! - `hotpage_deinit_module()` called once before unload

mod arena;
mod loader;

use std::ffi::c_void;
use std::fmt;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::Arc;

use memmap2::Mmap;
use tracing::debug;

use crate::error::{PageError, Result};

pub use arena::{Arena, HeapArena};
pub use loader::{DylibLoader, ModuleLoader};

// == Symbol Names ==
pub const SYM_OBJECT_SIZE: &[u8] = b"hotpage_object_size\0";
pub const SYM_CREATE_OBJECT: &[u8] = b"hotpage_create_object\0";
pub const SYM_CREATE_OBJECT_IN: &[u8] = b"hotpage_create_object_in\0";
pub const SYM_INIT_MODULE: &[u8] = b"hotpage_init_module\0";
pub const SYM_DEINIT_MODULE: &[u8] = b"hotpage_deinit_module\0";

pub type ObjectSizeFn = unsafe extern "C" fn() -> usize;
pub type CreateObjectFn = unsafe extern "C" fn(mem: *mut c_void) -> *mut c_void;
pub type CreateObjectInFn = unsafe extern "C" fn(arena: *mut c_void) -> *mut c_void;
pub type InitModuleFn = unsafe extern "C" fn(host: *mut c_void);
pub type DeinitModuleFn = unsafe extern "C" fn();

// == Entry Points ==
/// Typed table of the functions resolved from a module.
#[derive(Clone, Copy)]
pub struct EntryPoints {
    pub object_size: ObjectSizeFn,
    pub create_object: CreateObjectFn,
    pub create_object_in: CreateObjectInFn,
    pub init_module: InitModuleFn,
    pub deinit_module: DeinitModuleFn,
}

impl fmt::Debug for EntryPoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryPoints").finish_non_exhaustive()
    }
}

// == Native Library ==
/// An opened library and its resolved entry points.
///
/// `library` is `None` when the entry points are linked into the host
/// process instead of coming from a shared object.
pub struct NativeLibrary {
    entry: EntryPoints,
    library: Option<libloading::Library>,
}

impl NativeLibrary {
    /// Opens `path` and resolves the five required symbols.
    ///
    /// # Safety
    /// Runs the library's initialisers; the file must be a trusted page module
    /// exporting the symbols with the documented signatures.
    pub unsafe fn open(path: &Path) -> Result<Self> {
        let library = libloading::Library::new(path)
            .map_err(|e| PageError::load(path, e.to_string()))?;
        let entry = EntryPoints {
            object_size: *resolve::<ObjectSizeFn>(&library, path, SYM_OBJECT_SIZE)?,
            create_object: *resolve::<CreateObjectFn>(&library, path, SYM_CREATE_OBJECT)?,
            create_object_in: *resolve::<CreateObjectInFn>(&library, path, SYM_CREATE_OBJECT_IN)?,
            init_module: *resolve::<InitModuleFn>(&library, path, SYM_INIT_MODULE)?,
            deinit_module: *resolve::<DeinitModuleFn>(&library, path, SYM_DEINIT_MODULE)?,
        };
        Ok(Self {
            entry,
            library: Some(library),
        })
    }

    /// Wraps entry points that live in the current executable.
    pub fn from_entry_points(entry: EntryPoints) -> Self {
        Self {
            entry,
            library: None,
        }
    }

    pub fn entry_points(&self) -> &EntryPoints {
        &self.entry
    }
}

impl fmt::Debug for NativeLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeLibrary")
            .field("shared_object", &self.library.is_some())
            .finish()
    }
}

unsafe fn resolve<'lib, T>(
    library: &'lib libloading::Library,
    path: &Path,
    symbol: &[u8],
) -> Result<libloading::Symbol<'lib, T>> {
    library.get(symbol).map_err(|e| {
        let name = String::from_utf8_lossy(&symbol[..symbol.len() - 1]);
        PageError::load(path, format!("missing symbol {name}: {e}"))
    })
}

// == String Table ==
/// Read-only byte blob shipped next to an artifact.
pub enum StringTable {
    Mapped(Mmap),
    Empty,
}

impl StringTable {
    /// Maps `path`; a missing or empty file yields an empty table.
    pub fn map(path: &Path) -> Result<Self> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(StringTable::Empty),
            Err(e) => return Err(PageError::fs(path, e)),
        };
        let len = file.metadata().map_err(|e| PageError::fs(path, e))?.len();
        if len == 0 {
            return Ok(StringTable::Empty);
        }
        // SAFETY: string tables are replaced by rename, never rewritten in place,
        // so the mapped inode is not truncated while mapped.
        let map = unsafe { Mmap::map(&file) }.map_err(|e| PageError::fs(path, e))?;
        Ok(StringTable::Mapped(map))
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            StringTable::Mapped(map) => &map[..],
            StringTable::Empty => &[],
        }
    }
}

impl fmt::Debug for StringTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StringTable({} bytes)", self.as_bytes().len())
    }
}

// == Host Context ==
/// Opaque pointer handed to every module's init hook.
#[derive(Debug, Clone, Copy)]
pub struct HostContext(*mut c_void);

// SAFETY: the cache never dereferences the pointer; it only forwards it to
// module init hooks, which define its meaning.
unsafe impl Send for HostContext {}
unsafe impl Sync for HostContext {}

impl HostContext {
    pub fn null() -> Self {
        Self(std::ptr::null_mut())
    }

    pub fn from_ptr(ptr: *mut c_void) -> Self {
        Self(ptr)
    }

    pub fn as_ptr(&self) -> *mut c_void {
        self.0
    }
}

impl Default for HostContext {
    fn default() -> Self {
        Self::null()
    }
}

// == Loaded Module ==
/// A module whose init hook has run. Dropping it runs the deinit hook and
/// then closes the library.
pub struct LoadedModule {
    entry: EntryPoints,
    strings: StringTable,
    artifact: PathBuf,
    generation: u64,
    // declared last so the library is closed after deinit ran
    _library: Option<libloading::Library>,
}

impl LoadedModule {
    /// Runs the init hook of `library` and takes ownership of it.
    pub fn activate(
        library: NativeLibrary,
        strings: StringTable,
        artifact: PathBuf,
        generation: u64,
        host: HostContext,
    ) -> Self {
        // SAFETY: entry points come from a library we keep open for as long
        // as this value lives.
        unsafe { (library.entry.init_module)(host.as_ptr()) };
        debug!(artifact = %artifact.display(), generation, "module initialised");
        Self {
            entry: library.entry,
            strings,
            artifact,
            generation,
            _library: library.library,
        }
    }
}

impl Drop for LoadedModule {
    fn drop(&mut self) {
        // SAFETY: the library is still open; it is dropped after this runs.
        unsafe { (self.entry.deinit_module)() };
        debug!(artifact = %self.artifact.display(), generation = self.generation, "module unloaded");
    }
}

impl fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModule")
            .field("artifact", &self.artifact)
            .field("generation", &self.generation)
            .field("strings", &self.strings)
            .finish()
    }
}

// == Module Handle ==
/// Shared reference to a loaded module; the module stays mapped while any
/// handle or constructed object refers to it.
#[derive(Debug, Clone)]
pub struct ModuleHandle(Arc<LoadedModule>);

impl ModuleHandle {
    pub fn new(module: LoadedModule) -> Self {
        Self(Arc::new(module))
    }

    /// Size in bytes of one page object.
    pub fn object_size(&self) -> usize {
        // SAFETY: module is live.
        unsafe { (self.0.entry.object_size)() }
    }

    pub fn string_table(&self) -> &[u8] {
        self.0.strings.as_bytes()
    }

    pub fn artifact(&self) -> &Path {
        &self.0.artifact
    }

    /// Load counter of the owning entry; a new load always has a larger value.
    pub fn generation(&self) -> u64 {
        self.0.generation
    }

    /// True when both handles refer to the same load.
    pub fn same_module(&self, other: &ModuleHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Constructs a page object in caller-owned memory.
    ///
    /// Uses the allocator-aware constructor when the arena exposes a native
    /// handle, otherwise allocates `object_size()` bytes and runs the
    /// placement constructor.
    pub fn construct(&self, arena: &dyn Arena) -> Result<PageObject> {
        let raw = match arena.native_handle() {
            // SAFETY: module is live and the handle belongs to the caller's arena.
            Some(handle) => unsafe { (self.0.entry.create_object_in)(handle.as_ptr()) },
            None => {
                let size = self.object_size();
                let mem = arena.allocate(size).ok_or(PageError::Alloc { size })?;
                // SAFETY: `mem` points to at least `size` writable bytes.
                unsafe { (self.0.entry.create_object)(mem.as_ptr().cast()) }
            }
        };
        let ptr = NonNull::new(raw).ok_or_else(|| {
            PageError::load(&self.0.artifact, "constructor returned a null object")
        })?;
        Ok(PageObject {
            ptr,
            module: self.clone(),
        })
    }
}

// == Page Object ==
/// An object constructed from a module; its memory belongs to the arena it
/// was built in.
#[derive(Debug)]
pub struct PageObject {
    ptr: NonNull<c_void>,
    module: ModuleHandle,
}

// SAFETY: the object is only reachable through this value; page code is
// compiled to be driven from any worker thread.
unsafe impl Send for PageObject {}

impl PageObject {
    pub fn as_ptr(&self) -> *mut c_void {
        self.ptr.as_ptr()
    }

    pub fn module(&self) -> &ModuleHandle {
        &self.module
    }

    /// The string table of the module this object was built from.
    pub fn string_table(&self) -> &[u8] {
        self.module.string_table()
    }
}
