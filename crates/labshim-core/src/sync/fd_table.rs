use libc::c_int;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};

const TIER1_SIZE: usize = 1024;
const TIER2_SIZE: usize = 1024;
pub const MAX_FDS: usize = TIER1_SIZE * TIER2_SIZE;

/// A tiered atomic bitmap of descriptors currently in scope for mutation.
/// Supports up to 1,048,576 FDs; higher or negative FDs are never tracked.
#[repr(align(64))]
pub struct FdTable {
    // Level 1: Sparse array of chunks
    table: [AtomicPtr<Tier2>; TIER1_SIZE],
    count: AtomicUsize,
}

#[repr(align(64))]
struct Tier2 {
    entries: [AtomicBool; TIER2_SIZE],
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}

fn index(fd: c_int) -> Option<(usize, usize)> {
    let fd = usize::try_from(fd).ok()?;
    if fd >= MAX_FDS {
        return None;
    }
    Some((fd / TIER2_SIZE, fd % TIER2_SIZE))
}

impl FdTable {
    pub const fn new() -> Self {
        Self {
            table: [const { AtomicPtr::new(ptr::null_mut()) }; TIER1_SIZE],
            count: AtomicUsize::new(0),
        }
    }

    fn tier(&self, i1: usize) -> &Tier2 {
        let mut tier2_ptr = self.table[i1].load(Ordering::Acquire);
        if tier2_ptr.is_null() {
            // Lazy allocation of the second tier
            let new_tier = Box::into_raw(Box::new(Tier2 {
                entries: [const { AtomicBool::new(false) }; TIER2_SIZE],
            }));

            match self.table[i1].compare_exchange(
                ptr::null_mut(),
                new_tier,
                Ordering::Release,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    tier2_ptr = new_tier;
                }
                Err(existing) => {
                    // Someone else initialized it
                    unsafe { drop(Box::from_raw(new_tier)) };
                    tier2_ptr = existing;
                }
            }
        }
        unsafe { &*tier2_ptr }
    }

    /// Mark `fd` as tracked. Returns false if it already was (or cannot be).
    pub fn insert(&self, fd: c_int) -> bool {
        let Some((i1, i2)) = index(fd) else {
            return false;
        };
        let was = self.tier(i1).entries[i2].swap(true, Ordering::AcqRel);
        if !was {
            self.count.fetch_add(1, Ordering::AcqRel);
        }
        !was
    }

    /// Stop tracking `fd`. Returns whether it was tracked.
    pub fn remove(&self, fd: c_int) -> bool {
        let Some((i1, i2)) = index(fd) else {
            return false;
        };
        let tier2_ptr = self.table[i1].load(Ordering::Acquire);
        if tier2_ptr.is_null() {
            return false;
        }
        let was = unsafe { (*tier2_ptr).entries[i2].swap(false, Ordering::AcqRel) };
        if was {
            self.count.fetch_sub(1, Ordering::AcqRel);
        }
        was
    }

    pub fn contains(&self, fd: c_int) -> bool {
        let Some((i1, i2)) = index(fd) else {
            return false;
        };
        let tier2_ptr = self.table[i1].load(Ordering::Acquire);
        if tier2_ptr.is_null() {
            return false;
        }
        unsafe { (*tier2_ptr).entries[i2].load(Ordering::Acquire) }
    }

    pub fn len(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for FdTable {
    fn drop(&mut self) {
        for slot in self.table.iter_mut() {
            let p = *slot.get_mut();
            if !p.is_null() {
                unsafe { drop(Box::from_raw(p)) };
            }
        }
    }
}

// Safety: FdTable handles its own synchronization via atomics.
unsafe impl Send for FdTable {}
unsafe impl Sync for FdTable {}
