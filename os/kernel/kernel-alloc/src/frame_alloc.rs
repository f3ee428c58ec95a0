//! # Bitmap Frame Allocator
//!
//! One bit per 4 KiB frame, packed into `u32` words: bit `n % 32` of word
//! `n / 32` is set while frame `n` is owned by somebody.
//!
//! Initialisation order:
//!
//! 1. size the bitmap from the highest end address of any available region,
//! 2. mark every frame used,
//! 3. clear the frames lying entirely inside available regions,
//! 4. re-mark the reserved ranges (kernel image and the bitmap itself),
//! 5. mark frame 0 used; it holds firmware structures.
//!
//! Allocation is a first-fit scan from frame 0, so freed low frames are
//! reused first.

use core::ops::Range;
use kernel_info::boot::MemoryRegion;
use kernel_memory_addresses::{FRAME_SIZE, PhysicalAddress, PhysicalFrame};
use kernel_vmem::FrameAlloc;
use log::{info, warn};

/// Highest frame count representable with 32-bit physical addresses.
const MAX_FRAMES: u64 = 1 << 20;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FrameAllocError {
    #[error("frame bitmap holds {have} words but {need} are needed")]
    BitmapTooSmall { need: usize, have: usize },
    #[error("frame {0} is outside the tracked range")]
    OutOfRange(PhysicalFrame),
    #[error("frame {0} is already free")]
    AlreadyFree(PhysicalFrame),
}

pub struct BitmapFrameAlloc<'b> {
    bitmap: &'b mut [u32],
    total_frames: u32,
    free_frames: u32,
}

impl<'b> BitmapFrameAlloc<'b> {
    /// Number of frames tracked for the given memory map.
    #[must_use]
    pub fn frames_for(regions: &[MemoryRegion]) -> u32 {
        let max_end = regions
            .iter()
            .filter(|r| r.is_available())
            .map(MemoryRegion::end)
            .max()
            .unwrap_or(0);
        #[allow(clippy::cast_possible_truncation)]
        let frames = (max_end / u64::from(FRAME_SIZE)).min(MAX_FRAMES) as u32;
        frames
    }

    /// Bitmap words needed to track `frames` frames.
    #[must_use]
    pub const fn words_for(frames: u32) -> usize {
        frames.div_ceil(32) as usize
    }

    /// Build the allocator over `bitmap`.
    ///
    /// `reserved` lists physical ranges that stay used even if a region
    /// reports them available (kernel image, the bitmap, boot structures).
    ///
    /// # Errors
    /// [`FrameAllocError::BitmapTooSmall`] if `bitmap` cannot track every frame.
    pub fn init(
        bitmap: &'b mut [u32],
        regions: &[MemoryRegion],
        reserved: &[Range<PhysicalAddress>],
    ) -> Result<Self, FrameAllocError> {
        let total_frames = Self::frames_for(regions);
        let need = Self::words_for(total_frames);
        if bitmap.len() < need {
            return Err(FrameAllocError::BitmapTooSmall {
                need,
                have: bitmap.len(),
            });
        }

        let mut this = Self {
            bitmap: &mut bitmap[..need],
            total_frames,
            free_frames: 0,
        };
        this.bitmap.fill(u32::MAX);

        for region in regions.iter().filter(|r| r.is_available()) {
            let first = region.base.div_ceil(u64::from(FRAME_SIZE));
            let last = (region.end() / u64::from(FRAME_SIZE)).min(u64::from(total_frames));
            for frame in first..last {
                #[allow(clippy::cast_possible_truncation)]
                this.clear_bit(frame as u32);
            }
        }

        for range in reserved {
            this.reserve_range(range.clone());
        }
        this.set_bit(0);

        this.free_frames = this.count_free();
        info!(
            "frame allocator: {} frames tracked, {} free ({} KiB)",
            this.total_frames,
            this.free_frames,
            u64::from(this.free_frames) * u64::from(FRAME_SIZE) / 1024
        );
        Ok(this)
    }

    #[inline]
    fn set_bit(&mut self, frame: u32) {
        if frame < self.total_frames {
            self.bitmap[(frame / 32) as usize] |= 1 << (frame % 32);
        }
    }

    #[inline]
    fn clear_bit(&mut self, frame: u32) {
        if frame < self.total_frames {
            self.bitmap[(frame / 32) as usize] &= !(1 << (frame % 32));
        }
    }

    #[inline]
    fn test_bit(&self, frame: u32) -> bool {
        self.bitmap[(frame / 32) as usize] & (1 << (frame % 32)) != 0
    }

    fn count_free(&self) -> u32 {
        (0..self.total_frames).fold(0, |n, f| n + u32::from(!self.test_bit(f)))
    }

    /// Mark every frame overlapping `range` as used.
    ///
    /// Frames beyond the tracked range are ignored. Returns how many frames
    /// changed from free to used.
    pub fn reserve_range(&mut self, range: Range<PhysicalAddress>) -> u32 {
        if range.start >= range.end {
            return 0;
        }
        let first = range.start.frame().number();
        let last = range
            .end
            .align_up()
            .map_or(self.total_frames, |end| end.frame().number())
            .min(self.total_frames);

        let mut taken = 0;
        for frame in first..last {
            if !self.test_bit(frame) {
                self.set_bit(frame);
                taken += 1;
            }
        }
        self.free_frames = self.free_frames.saturating_sub(taken);
        taken
    }

    /// Claim the lowest free frame.
    ///
    /// Returns `None` when every frame is in use.
    pub fn allocate_frame(&mut self) -> Option<PhysicalFrame> {
        let (word_index, word) = self
            .bitmap
            .iter()
            .copied()
            .enumerate()
            .find(|&(_, w)| w != u32::MAX)?;

        #[allow(clippy::cast_possible_truncation)]
        let frame = word_index as u32 * 32 + word.trailing_ones();
        if frame >= self.total_frames {
            return None;
        }
        self.set_bit(frame);
        self.free_frames -= 1;
        Some(PhysicalFrame::from_number(frame))
    }

    /// Return a frame to the pool.
    ///
    /// Freeing an already free frame leaves the bitmap untouched.
    ///
    /// # Errors
    /// - [`FrameAllocError::AlreadyFree`] if the frame was not in use.
    /// - [`FrameAllocError::OutOfRange`] if the frame is not tracked.
    pub fn free_frame(&mut self, frame: PhysicalFrame) -> Result<(), FrameAllocError> {
        let n = frame.number();
        if n >= self.total_frames {
            return Err(FrameAllocError::OutOfRange(frame));
        }
        if !self.test_bit(n) {
            return Err(FrameAllocError::AlreadyFree(frame));
        }
        self.clear_bit(n);
        self.free_frames += 1;
        Ok(())
    }

    /// Whether `frame` is currently owned. Untracked frames count as used.
    #[must_use]
    pub fn is_used(&self, frame: PhysicalFrame) -> bool {
        frame.number() >= self.total_frames || self.test_bit(frame.number())
    }

    #[must_use]
    pub const fn total_frames(&self) -> u32 {
        self.total_frames
    }

    #[must_use]
    pub const fn free_frames(&self) -> u32 {
        self.free_frames
    }

    #[must_use]
    pub const fn used_frames(&self) -> u32 {
        self.total_frames - self.free_frames
    }
}

impl FrameAlloc for BitmapFrameAlloc<'_> {
    #[inline]
    fn alloc_4k(&mut self) -> Option<PhysicalFrame> {
        self.allocate_frame()
    }

    fn free_4k(&mut self, frame: PhysicalFrame) {
        if let Err(e) = self.free_frame(frame) {
            warn!("ignoring frame release: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_info::boot::MemoryRegionKind;

    fn one_mib_at_zero() -> [MemoryRegion; 1] {
        [MemoryRegion::available(0, 0x10_0000)]
    }

    #[test]
    fn frame_zero_is_reserved_and_freed_frames_are_reused() {
        let mut bitmap = [0u32; 8];
        let mut frames = BitmapFrameAlloc::init(&mut bitmap, &one_mib_at_zero(), &[]).unwrap();

        let first = frames.allocate_frame().unwrap();
        assert_eq!(first.base(), PhysicalAddress::new(4096));

        frames.free_frame(first).unwrap();
        assert_eq!(frames.allocate_frame().unwrap().base(), PhysicalAddress::new(4096));
    }

    #[test]
    fn double_free_is_reported_and_harmless() {
        let mut bitmap = [0u32; 8];
        let mut frames = BitmapFrameAlloc::init(&mut bitmap, &one_mib_at_zero(), &[]).unwrap();
        let f = frames.allocate_frame().unwrap();
        let free_before = frames.free_frames();

        frames.free_frame(f).unwrap();
        assert_eq!(frames.free_frame(f), Err(FrameAllocError::AlreadyFree(f)));
        assert_eq!(frames.free_frames(), free_before + 1);
        assert!(!frames.is_used(f));

        // Frame 0 is reserved but tracked: freeing an untracked frame is out of range.
        let far = PhysicalFrame::from_number(10_000);
        assert_eq!(frames.free_frame(far), Err(FrameAllocError::OutOfRange(far)));
    }

    #[test]
    fn reserved_ranges_and_unavailable_regions_stay_used() {
        let regions = [
            MemoryRegion::available(0, 0x9_F000),
            MemoryRegion::new(0x9_F000, 0x6_1000, MemoryRegionKind::Reserved),
            MemoryRegion::available(0x10_0000, 0x70_0000),
        ];
        let total = BitmapFrameAlloc::frames_for(&regions);
        assert_eq!(total, 0x800);

        let mut bitmap = vec![0u32; BitmapFrameAlloc::words_for(total)];
        let kernel = PhysicalAddress::new(0x10_0000)..PhysicalAddress::new(0x12_3456);
        let frames = BitmapFrameAlloc::init(&mut bitmap, &regions, &[kernel]).unwrap();

        assert!(frames.is_used(PhysicalFrame::from_number(0)));
        assert!(!frames.is_used(PhysicalFrame::from_number(1)));
        assert!(frames.is_used(PhysicalFrame::from_number(0xA0)));
        assert!(frames.is_used(PhysicalFrame::from_number(0x100)));
        assert!(frames.is_used(PhysicalFrame::from_number(0x123)));
        assert!(!frames.is_used(PhysicalFrame::from_number(0x124)));

        // 0x9F usable low frames minus frame 0, plus 0x700 high frames minus 0x24 kernel frames.
        assert_eq!(frames.free_frames(), 0x9F - 1 + 0x700 - 0x24);
    }

    #[test]
    fn partial_frames_at_region_edges_are_not_freed() {
        let regions = [MemoryRegion::available(0x1800, 0x3000)];
        let mut bitmap = [0u32; 1];
        let frames = BitmapFrameAlloc::init(&mut bitmap, &regions, &[]).unwrap();
        // Region covers 0x1800..0x4800: only frames 2 and 3 are complete.
        assert_eq!(frames.total_frames(), 4);
        assert_eq!(frames.free_frames(), 2);
        assert!(frames.is_used(PhysicalFrame::from_number(1)));
    }

    #[test]
    fn exhaustion_returns_none() {
        let regions = [MemoryRegion::available(0, 4 * 4096)];
        let mut bitmap = [0u32; 1];
        let mut frames = BitmapFrameAlloc::init(&mut bitmap, &regions, &[]).unwrap();
        assert_eq!(frames.allocate_frame().map(PhysicalFrame::number), Some(1));
        assert_eq!(frames.allocate_frame().map(PhysicalFrame::number), Some(2));
        assert_eq!(frames.allocate_frame().map(PhysicalFrame::number), Some(3));
        assert_eq!(frames.allocate_frame(), None);
        assert_eq!(frames.free_frames(), 0);
    }

    #[test]
    fn bitmap_too_small_is_rejected() {
        let mut bitmap = [0u32; 1];
        let err = BitmapFrameAlloc::init(&mut bitmap, &one_mib_at_zero(), &[]).err();
        assert_eq!(err, Some(FrameAllocError::BitmapTooSmall { need: 8, have: 1 }));
    }
}
