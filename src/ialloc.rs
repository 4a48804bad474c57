//! Inode allocator (spec.md §3 "Free lists", §4.3: C3).
//!
//! Mirrors [`crate::balloc::BlockAllocator`]'s intrusive-list shape, but
//! walks the inode table instead of the data area, and overloads the
//! `pg_addr` field of a free [`Inode`] slot as the "next free inode" link
//! rather than storing it out of band the way `rufs`'s `ialloc.rs` walks a
//! cylinder group's `iused` bitmap. Generation numbers are bumped on every
//! allocation, the same accounting `inode_setup()` does for UFS2.

use std::sync::atomic::{AtomicU32, Ordering};

use spin::Mutex;

use crate::error::bail;
use crate::inode::{Inode, InodeType};
use crate::layout::InodeNum;
use crate::region::Region;
use crate::superblock::Superblock;
use crate::ErrorKind;

pub struct InodeAllocator {
	inner: Mutex<()>,
	/// Monotonic counter, seeded from the highest generation seen so far,
	/// so a reused inode number never repeats a generation (spec.md §3's
	/// "Free lists" section: "Generation numbers are never reused").
	next_generation: AtomicU32,
}

impl InodeAllocator {
	pub fn new(seed_generation: u32) -> Self {
		Self {
			inner: Mutex::new(()),
			next_generation: AtomicU32::new(seed_generation),
		}
	}

	fn bump_generation(&self) -> u32 {
		self.next_generation.fetch_add(1, Ordering::Relaxed) + 1
	}

	/// Pop an inode off the free list, initialize it as `kind`, and write
	/// it back. LIFO, same shape as [`crate::balloc::BlockAllocator::alloc`].
	pub fn alloc(
		&self,
		region: &mut Region,
		sb: &mut Superblock,
		kind: InodeType,
		mode_perm: u32,
		uid: u32,
		gid: u32,
		now: u32,
	) -> std::io::Result<InodeNum> {
		let _guard = self.inner.lock();

		let head = sb.free_inode_head();
		if head.is_null() {
			log::warn!("ialloc: out of inodes ({} total)", sb.inode_count);
			bail!(ErrorKind::NoSpace);
		}
		let Some(inr) = InodeNum::new(head.get()) else {
			log::error!("ialloc: free list head decoded to inode #0");
			bail!(ErrorKind::Io);
		};

		let slot = inr.slot_offset(sb.inode_start());
		let free_slot: Inode = region.decode_at(slot)?;
		if free_slot.link_counts != 0 {
			log::error!("ialloc: inode {inr} on free list has nonzero link count");
			bail!(ErrorKind::Io);
		}

		let generation = self.bump_generation();
		let fresh = Inode::new(kind, mode_perm, uid, gid, generation, now);
		region.encode_at(slot, &fresh)?;

		sb.free_inode_start = free_slot.pg_addr;
		sb.free_inode_count -= 1;
		sb.commit(region)?;

		log::trace!("ialloc: allocated inode {inr}, generation {generation}");
		Ok(inr)
	}

	/// Splice `inr`'s slot onto the head of the free list. Caller is
	/// responsible for having already driven the inode's link count to 0
	/// and torn down its translation tree.
	pub fn free(&self, region: &mut Region, sb: &mut Superblock, inr: InodeNum, now: u32) -> std::io::Result<()> {
		let _guard = self.inner.lock();

		if inr == InodeNum::ROOT {
			log::error!("ialloc: refusing to free the root inode");
			bail!(ErrorKind::Invalid);
		}

		let slot = inr.slot_offset(sb.inode_start());
		let mut freed: Inode = region.decode_at(slot)?;
		if freed.link_counts != 0 {
			log::error!("ialloc: freeing inode {inr} with nonzero link count");
			bail!(ErrorKind::Io);
		}

		freed.dtime = now;
		freed.pg_addr = sb.free_inode_head().get();
		region.encode_at(slot, &freed)?;

		sb.free_inode_start = inr.get();
		sb.free_inode_count += 1;
		sb.commit(region)?;

		log::trace!("ialloc: freed inode {inr}");
		Ok(())
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::layout::{BlockOffset, INODE_SIZE};

	fn fixture() -> (Region, Superblock, InodeAllocator) {
		let mut region = Region::new_anonymous(1 << 20);
		let mut sb = Superblock::format(1 << 20, [0u8; 16]);

		let mut prev = 0u64;
		for i in 0..sb.inode_count {
			let off = sb.inode_start + i * INODE_SIZE;
			let mut slot = Inode::new(InodeType::RegularFile, 0o644, 0, 0, 0, 0);
			slot.link_counts = 0;
			slot.pg_addr = prev;
			region.encode_at(BlockOffset(off), &slot).unwrap();
			prev = off;
		}
		sb.free_inode_start = prev;
		sb.commit(&mut region).unwrap();
		(region, sb, InodeAllocator::new(0))
	}

	#[test]
	fn alloc_initializes_and_bumps_generation() {
		let (mut region, mut sb, alloc) = fixture();
		let free_before = sb.free_inode_count;
		let inr = alloc
			.alloc(&mut region, &mut sb, InodeType::RegularFile, 0o644, 1000, 1000, 42)
			.unwrap();
		assert_eq!(sb.free_inode_count, free_before - 1);

		let slot: Inode = region.decode_at(inr.slot_offset(sb.inode_start())).unwrap();
		assert_eq!(slot.link_counts, 1);
		assert_eq!(slot.generation, 1);
		assert_eq!(slot.atime, 42);
	}

	#[test]
	fn free_requires_zero_link_count() {
		let (mut region, mut sb, alloc) = fixture();
		let inr = alloc
			.alloc(&mut region, &mut sb, InodeType::RegularFile, 0o644, 0, 0, 0)
			.unwrap();
		let err = alloc.free(&mut region, &mut sb, inr, 1).unwrap_err();
		assert_eq!(err.raw_os_error(), Some(libc::EIO));
	}

	#[test]
	fn generations_never_repeat_after_reuse() {
		let (mut region, mut sb, alloc) = fixture();
		let a = alloc
			.alloc(&mut region, &mut sb, InodeType::RegularFile, 0o644, 0, 0, 0)
			.unwrap();
		let gen_a: Inode = region.decode_at(a.slot_offset(sb.inode_start())).unwrap();

		let mut slot: Inode = region.decode_at(a.slot_offset(sb.inode_start())).unwrap();
		slot.link_counts = 0;
		region.encode_at(a.slot_offset(sb.inode_start()), &slot).unwrap();
		alloc.free(&mut region, &mut sb, a, 5).unwrap();

		let b = alloc
			.alloc(&mut region, &mut sb, InodeType::RegularFile, 0o644, 0, 0, 0)
			.unwrap();
		let gen_b: Inode = region.decode_at(b.slot_offset(sb.inode_start())).unwrap();
		assert_ne!(gen_a.generation, gen_b.generation);
	}
}
