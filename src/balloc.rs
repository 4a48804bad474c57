//! Block allocator (spec.md §3 "Free lists", §4.2: C2).
//!
//! Free blocks form an intrusive singly-linked list: the first 8 bytes of
//! each free block hold the offset of the next free block, 0 terminating
//! the list. `rufs`'s `balloc.rs` walks UFS2 cylinder-group bitmaps under
//! `&mut self`; NVMM has no bitmap at all, so this allocator instead pops
//! and pushes list nodes directly in region memory, serialized by a single
//! spinlock the way a kernel allocator would guard a free-list head.

use spin::Mutex;

use crate::error::bail;
use crate::layout::{BlockOffset, BLOCK_SIZE};
use crate::region::Region;
use crate::superblock::Superblock;
use crate::ErrorKind;

/// Guards the block free list and the superblock's block-count fields
/// together, so a reader never observes one updated without the other.
pub struct BlockAllocator {
	inner: Mutex<()>,
}

impl BlockAllocator {
	pub fn new() -> Self {
		Self { inner: Mutex::new(()) }
	}

	/// Pop one block off the free list (spec.md §4.2 "Allocate"): LIFO,
	/// O(1). Zero-filling is the caller's responsibility (spec.md §4.2):
	/// a block coming off this list has its first 8 bytes still holding
	/// the free-list next-pointer [`free`] wrote there, with the rest
	/// already zero from that same call.
	pub fn alloc(&self, region: &mut Region, sb: &mut Superblock) -> std::io::Result<BlockOffset> {
		let _guard = self.inner.lock();

		let head = sb.free_block_head();
		if head.is_null() {
			log::warn!("balloc: out of space ({} blocks total)", sb.block_count);
			bail!(ErrorKind::NoSpace);
		}

		let next: u64 = region.decode_at(head)?;

		sb.free_block_start = next;
		sb.free_block_count -= 1;
		sb.commit(region)?;

		log::trace!("balloc: allocated block {head}, {} remaining", sb.free_block_count);
		Ok(head)
	}

	/// Push a block back onto the head of the free list (spec.md §4.2
	/// "Free"): zero it, write the current head into its first 8 bytes,
	/// then splice it in as the new head.
	pub fn free(&self, region: &mut Region, sb: &mut Superblock, blk: BlockOffset) -> std::io::Result<()> {
		let _guard = self.inner.lock();

		if blk.is_null() || blk.get() < sb.block_start {
			log::error!("balloc: refusing to free out-of-range block {blk}");
			bail!(ErrorKind::Invalid);
		}

		let prev_head = sb.free_block_head();
		region.fill_at(blk, BLOCK_SIZE as usize)?;
		region.encode_at(blk, &prev_head.get())?;

		sb.free_block_start = blk.get();
		sb.free_block_count += 1;
		sb.commit(region)?;

		log::trace!("balloc: freed block {blk}, {} now free", sb.free_block_count);
		Ok(())
	}
}

impl Default for BlockAllocator {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn fixture() -> (Region, Superblock, BlockAllocator) {
		let mut region = Region::new_anonymous(1 << 20);
		let mut sb = Superblock::format(1 << 20, [0u8; 16]);
		// build a tiny free list by hand: blocks form a chain through the
		// data area, mimicking what `format()` would lay down.
		let mut off = sb.block_start;
		let mut prev = 0u64;
		for _ in 0..sb.block_count {
			region.write_at(BlockOffset(off), &prev.to_le_bytes()).unwrap();
			prev = off;
			off += BLOCK_SIZE;
		}
		sb.free_block_start = prev;
		sb.commit(&mut region).unwrap();
		(region, sb, BlockAllocator::new())
	}

	#[test]
	fn alloc_then_free_roundtrip() {
		let (mut region, mut sb, alloc) = fixture();
		let free_before = sb.free_block_count;

		let blk = alloc.alloc(&mut region, &mut sb).unwrap();
		assert_eq!(sb.free_block_count, free_before - 1);

		alloc.free(&mut region, &mut sb, blk).unwrap();
		assert_eq!(sb.free_block_count, free_before);
	}

	#[test]
	fn alloc_is_lifo() {
		let (mut region, mut sb, alloc) = fixture();
		let a = alloc.alloc(&mut region, &mut sb).unwrap();
		let b = alloc.alloc(&mut region, &mut sb).unwrap();
		assert_ne!(a, b);
		alloc.free(&mut region, &mut sb, a).unwrap();
		alloc.free(&mut region, &mut sb, b).unwrap();
		let c = alloc.alloc(&mut region, &mut sb).unwrap();
		assert_eq!(c, b, "freed block should come back first (LIFO)");
	}

	#[test]
	fn exhaustion_returns_no_space() {
		let (mut region, mut sb, alloc) = fixture();
		let total = sb.free_block_count;
		for _ in 0..total {
			alloc.alloc(&mut region, &mut sb).unwrap();
		}
		let err = alloc.alloc(&mut region, &mut sb).unwrap_err();
		assert_eq!(err.raw_os_error(), Some(libc::ENOSPC));
	}
}
