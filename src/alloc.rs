//! Raw memory for pooled objects.
//!
//! The pool never calls the global allocator directly, it goes through an
//! [ObjectAlloc]. Two are provided: [Global], the std heap, and [ArenaAlloc],
//! a bump arena that never frees individual objects.
use parking_lot::Mutex;
use std::{
    alloc::{self, Layout},
    fmt,
    mem,
    ptr::{self, NonNull},
};

/// Whether an allocator owns the memory it hands out. This decides what
/// happens to an object that is still sitting in a thread cache when its
/// thread exits and no live pool will take it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocKind {
    /// individual objects can be freed, orphans are destroyed
    Owning,
    /// memory belongs to an arena and is reclaimed in bulk, orphans are
    /// leaked into the arena
    Arena,
}

/// An allocator for pooled objects.
///
/// # Safety
///
/// `allocate` must return memory valid for reads and writes of `layout`,
/// aligned to `layout.align()`, that stays valid until it is passed to
/// `deallocate`. Allocators of the same type must be interchangeable: memory
/// obtained from one value may be returned through any other value of the
/// same type, because pools of one configuration trade objects through the
/// thread caches. Zero sized layouts are never requested.
pub unsafe trait ObjectAlloc: Clone + Send + Sync + 'static {
    const KIND: AllocKind = AllocKind::Owning;

    /// allocate memory for `layout`, or None if there is none
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// # Safety
    ///
    /// `ptr` must have come from `allocate` on an allocator of this type with
    /// the same `layout`, and must not be used afterwards.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

/// The std global heap
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Global;

unsafe impl ObjectAlloc for Global {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        NonNull::new(unsafe { alloc::alloc(layout) })
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { alloc::dealloc(ptr.as_ptr(), layout) }
    }
}

const CHUNK_ALIGN: usize = 64;

struct ArenaState {
    chunks: Vec<(NonNull<u8>, Layout)>,
    offset: usize,
    used: usize,
}

// the chunk pointers are owned by the arena and only touched under the lock
unsafe impl Send for ArenaState {}

impl ArenaState {
    fn fit(&mut self, layout: Layout) -> Option<NonNull<u8>> {
        let (base, chunk) = *self.chunks.last()?;
        let addr = base.addr().get().checked_add(self.offset)?;
        let start = addr.checked_next_multiple_of(layout.align())? - base.addr().get();
        let end = start.checked_add(layout.size())?;
        if end > chunk.size() {
            return None;
        }
        self.offset = end;
        self.used += layout.size();
        NonNull::new(unsafe { base.as_ptr().add(start) })
    }
}

/// A bump arena. Memory is carved out of large chunks and only returned to
/// the system when the arena itself is dropped, which for arenas shared with
/// pools means never (see [Arena::leak]).
pub struct Arena {
    chunk_size: usize,
    state: Mutex<ArenaState>,
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.state.lock();
        f.debug_struct("Arena")
            .field("chunk_size", &self.chunk_size)
            .field("chunks", &st.chunks.len())
            .field("used", &st.used)
            .finish()
    }
}

impl Arena {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(CHUNK_ALIGN),
            state: Mutex::new(ArenaState { chunks: Vec::new(), offset: 0, used: 0 }),
        }
    }

    /// create an arena that lives for the rest of the process
    pub fn leak(chunk_size: usize) -> &'static Arena {
        Box::leak(Box::new(Self::new(chunk_size)))
    }

    fn bump(&self, layout: Layout) -> Option<NonNull<u8>> {
        let mut st = self.state.lock();
        if let Some(p) = st.fit(layout) {
            return Some(p);
        }
        let size = self.chunk_size.max(layout.size().checked_add(layout.align())?);
        let chunk = Layout::from_size_align(size, CHUNK_ALIGN).ok()?;
        let base = NonNull::new(unsafe { alloc::alloc(chunk) })?;
        st.chunks.push((base, chunk));
        st.offset = 0;
        st.fit(layout)
    }

    /// bytes handed out so far, not counting alignment padding
    pub fn used(&self) -> usize {
        self.state.lock().used
    }

    pub fn chunks(&self) -> usize {
        self.state.lock().chunks.len()
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        for (base, layout) in self.state.get_mut().chunks.drain(..) {
            unsafe { alloc::dealloc(base.as_ptr(), layout) }
        }
    }
}

/// An allocator handle onto a process lifetime [Arena]. Frees are no-ops.
#[derive(Debug, Clone, Copy)]
pub struct ArenaAlloc(&'static Arena);

impl ArenaAlloc {
    pub fn new(arena: &'static Arena) -> Self {
        Self(arena)
    }

    pub fn arena(&self) -> &'static Arena {
        self.0
    }
}

unsafe impl ObjectAlloc for ArenaAlloc {
    const KIND: AllocKind = AllocKind::Arena;

    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        self.0.bump(layout)
    }

    unsafe fn deallocate(&self, _ptr: NonNull<u8>, _layout: Layout) {}
}

/// An owning pointer to a live, allocated object. The pool moves these
/// between callers, thread caches and the store. Exactly one party holds a
/// given `Raw` at a time.
pub(crate) struct Raw<T>(NonNull<T>);

unsafe impl<T: Send> Send for Raw<T> {}
unsafe impl<T: Sync> Sync for Raw<T> {}

impl<T> fmt::Debug for Raw<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Raw({:p})", self.0)
    }
}

impl<T> Raw<T> {
    pub(crate) fn as_ptr(&self) -> *mut T {
        self.0.as_ptr()
    }

    pub(crate) fn addr(&self) -> usize {
        self.0.addr().get()
    }
}

/// move `value` into memory from `alloc`. Gives the value back if there is
/// no memory.
pub(crate) fn alloc_object<T, A: ObjectAlloc>(alloc: &A, value: T) -> Result<Raw<T>, T> {
    let layout = Layout::new::<T>();
    let ptr = if layout.size() == 0 {
        NonNull::dangling()
    } else {
        match alloc.allocate(layout) {
            Some(p) => p.cast::<T>(),
            None => return Err(value),
        }
    };
    unsafe { ptr.as_ptr().write(value) };
    Ok(Raw(ptr))
}

/// drop the object and give its memory back to `alloc`
///
/// # Safety
///
/// `raw` must have been allocated by an allocator of type `A`
pub(crate) unsafe fn free_object<T, A: ObjectAlloc>(alloc: &A, raw: Raw<T>) {
    unsafe {
        ptr::drop_in_place(raw.as_ptr());
        free_slot(alloc, raw)
    }
}

/// move the object out and give its memory back to `alloc`
///
/// # Safety
///
/// `raw` must have been allocated by an allocator of type `A`
pub(crate) unsafe fn take_object<T, A: ObjectAlloc>(alloc: &A, raw: Raw<T>) -> T {
    unsafe {
        let value = ptr::read(raw.as_ptr());
        free_slot(alloc, raw);
        value
    }
}

unsafe fn free_slot<T, A: ObjectAlloc>(alloc: &A, raw: Raw<T>) {
    if mem::size_of::<T>() != 0 {
        unsafe { alloc.deallocate(raw.0.cast(), Layout::new::<T>()) }
    }
}
