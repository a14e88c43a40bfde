//! Caller-owned memory that page objects are constructed into.

use std::ffi::c_void;
use std::mem::MaybeUninit;
use std::ptr::NonNull;

use parking_lot::Mutex;

/// Allocator a page object is constructed into.
///
/// The cache never tracks the lifetime of constructed objects; whoever owns
/// the arena owns the objects.
pub trait Arena: Send + Sync {
    /// Returns at least `size` writable bytes aligned to 16, or `None` when exhausted.
    fn allocate(&self, size: usize) -> Option<NonNull<u8>>;

    /// Native allocator handle for modules with an allocator-aware constructor.
    fn native_handle(&self) -> Option<NonNull<c_void>> {
        None
    }
}

/// Arena backed by individually boxed blocks, all freed when it is dropped.
#[derive(Debug, Default)]
pub struct HeapArena {
    blocks: Mutex<Vec<Box<[MaybeUninit<u128>]>>>,
}

impl HeapArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blocks handed out so far.
    pub fn allocations(&self) -> usize {
        self.blocks.lock().len()
    }
}

impl Arena for HeapArena {
    fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        let words = size.div_ceil(std::mem::size_of::<u128>()).max(1);
        let mut block = vec![MaybeUninit::<u128>::uninit(); words].into_boxed_slice();
        let ptr = NonNull::new(block.as_mut_ptr().cast::<u8>());
        self.blocks.lock().push(block);
        ptr
    }
}
