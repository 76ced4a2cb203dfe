//! Break-interface substrate.
//!
//! The allocator consumes the OS break primitive as an abstract capability:
//! something that owns a contiguous byte region, can push its upper bound
//! outward, and reports the current bounds. Addresses everywhere in this
//! crate are byte offsets into that region, so the backing storage is free
//! to move when it grows.
//!
//! The substrate does not understand blocks.

/// A contiguous, monotonically growing byte region.
///
/// Implementations must start empty: the first `extend` returns `lo()`,
/// and `lo()` is 0. Offsets handed out by `extend` stay valid for the
/// lifetime of the region.
pub trait BreakRegion {
    /// Grows the region by `bytes` zero-filled bytes.
    ///
    /// Returns the previous upper bound (the offset of the first new byte),
    /// or `None` if the region cannot grow any further.
    fn extend(&mut self, bytes: usize) -> Option<usize>;

    /// Lower bound of the region. Always 0 in this offset-addressed model.
    fn lo(&self) -> usize;

    /// Current upper bound (one past the last valid offset).
    fn hi(&self) -> usize;

    /// Read access to the whole region.
    fn bytes(&self) -> &[u8];

    /// Write access to the whole region.
    fn bytes_mut(&mut self) -> &mut [u8];
}

/// In-memory break region with an optional capacity ceiling.
///
/// The ceiling models break exhaustion: an `extend` that would push `hi`
/// past the ceiling fails without changing the region, which is how the
/// allocator observes out-of-memory.
#[derive(Debug, Clone)]
pub struct MemBreak {
    bytes: Vec<u8>,
    ceiling: usize,
}

impl MemBreak {
    /// A region that never refuses to grow.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::with_ceiling(usize::MAX)
    }

    /// A region that refuses to grow past `ceiling` total bytes.
    #[must_use]
    pub fn with_ceiling(ceiling: usize) -> Self {
        Self {
            bytes: Vec::new(),
            ceiling,
        }
    }
}

impl BreakRegion for MemBreak {
    fn extend(&mut self, bytes: usize) -> Option<usize> {
        let old = self.bytes.len();
        let new = old.checked_add(bytes)?;
        if new > self.ceiling {
            return None;
        }
        self.bytes.resize(new, 0);
        Some(old)
    }

    fn lo(&self) -> usize {
        0
    }

    fn hi(&self) -> usize {
        self.bytes.len()
    }

    fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extend_returns_old_bound() {
        let mut region = MemBreak::unbounded();
        assert_eq!(region.extend(64), Some(0));
        assert_eq!(region.extend(32), Some(64));
        assert_eq!(region.hi(), 96);
        assert_eq!(region.lo(), 0);
    }

    #[test]
    fn test_extend_zero_fills() {
        let mut region = MemBreak::unbounded();
        region.extend(16).unwrap();
        assert!(region.bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_ceiling_refuses_growth() {
        let mut region = MemBreak::with_ceiling(100);
        assert_eq!(region.extend(96), Some(0));
        assert_eq!(region.extend(8), None);
        // A refused extend leaves the region untouched.
        assert_eq!(region.hi(), 96);
        assert_eq!(region.extend(4), Some(96));
    }

    #[test]
    fn test_writes_persist_across_growth() {
        let mut region = MemBreak::unbounded();
        region.extend(8).unwrap();
        region.bytes_mut()[3] = 0xAB;
        region.extend(1024).unwrap();
        assert_eq!(region.bytes()[3], 0xAB);
    }
}
