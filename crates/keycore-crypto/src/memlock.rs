//! Heap buffers for long-lived secrets, pinned in RAM where the OS
//! allows it.
//!
//! `mlock` is best effort: unprivileged processes often hit
//! `RLIMIT_MEMLOCK`. The outcome is recorded on the buffer and exposed
//! through [`LockedBuffer::is_locked`] instead of being swallowed.

use std::fmt;

use zeroize::Zeroize;

/// Attempts to lock `bytes` into physical memory. Returns `true` on
/// success.
#[cfg(unix)]
pub fn lock_memory(bytes: &[u8]) -> bool {
    if bytes.is_empty() {
        return false;
    }
    // SAFETY: the pointer and length describe a live allocation owned by
    // the caller for the duration of the call.
    let rc = unsafe { libc::mlock(bytes.as_ptr() as *const libc::c_void, bytes.len()) };
    if rc != 0 {
        tracing::debug!(len = bytes.len(), "mlock failed, secret memory may be swapped");
        false
    } else {
        true
    }
}

/// Memory locking is not available on this platform.
#[cfg(not(unix))]
pub fn lock_memory(_bytes: &[u8]) -> bool {
    false
}

/// Releases a lock taken by [`lock_memory`].
#[cfg(unix)]
pub fn unlock_memory(bytes: &[u8]) {
    if bytes.is_empty() {
        return;
    }
    // SAFETY: same allocation that was passed to `lock_memory`.
    unsafe {
        libc::munlock(bytes.as_ptr() as *const libc::c_void, bytes.len());
    }
}

/// Memory locking is not available on this platform.
#[cfg(not(unix))]
pub fn unlock_memory(_bytes: &[u8]) {}

// ---------------------------------------------------------------------------
// LockedBuffer
// ---------------------------------------------------------------------------

/// A fixed-size heap buffer that is `mlock`ed on creation and zeroed
/// and unlocked on [`wipe`](Self::wipe) or drop.
pub struct LockedBuffer {
    bytes: Box<[u8]>,
    locked: bool,
}

impl LockedBuffer {
    /// Moves `data` into a locked buffer. The source vector is zeroed.
    pub fn new(mut data: Vec<u8>) -> Self {
        let bytes: Box<[u8]> = data.as_slice().into();
        data.zeroize();
        let locked = lock_memory(&bytes);
        Self { bytes, locked }
    }

    /// Returns the secret bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Whether `mlock` succeeded for this buffer.
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Returns the buffer length.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` if the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Returns `true` once every byte is zero.
    pub fn is_zeroed(&self) -> bool {
        self.bytes.iter().all(|b| *b == 0)
    }

    /// Zeroes the contents and releases the memory lock. Idempotent.
    pub fn wipe(&mut self) {
        self.bytes.zeroize();
        if self.locked {
            unlock_memory(&self.bytes);
            self.locked = false;
        }
    }
}

impl Drop for LockedBuffer {
    fn drop(&mut self) {
        self.wipe();
    }
}

impl fmt::Debug for LockedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockedBuffer")
            .field("len", &self.len())
            .field("locked", &self.locked)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wipe_zeroes_and_unlocks() {
        let mut buf = LockedBuffer::new(vec![0xAB; 32]);
        assert_eq!(buf.as_bytes(), &[0xAB; 32]);
        buf.wipe();
        assert!(buf.is_zeroed());
        assert!(!buf.is_locked());
        assert_eq!(buf.len(), 32);
    }

    #[test]
    fn debug_never_prints_contents() {
        let buf = LockedBuffer::new(b"hunter2hunter2".to_vec());
        let dbg = format!("{buf:?}");
        assert!(!dbg.contains("hunter2"));
        assert!(dbg.contains("locked"));
    }

    #[test]
    fn empty_buffer_is_never_locked() {
        let buf = LockedBuffer::new(Vec::new());
        assert!(!buf.is_locked());
        assert!(buf.is_empty());
    }
}
