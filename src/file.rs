//! File I/O and the copy-on-write atomic update protocol (spec.md §4.7: C7).
//!
//! `rufs`'s `read`/`write` split across `ufs/inode.rs`'s block-size helpers
//! and `ufs/ialloc.rs`'s indirect-block walk plays an analogous role for
//! UFS2's direct+indirect scheme; there the unit of copy-on-write is a
//! whole new file (UFS2 has none — writes are in place). The swap-at-level
//! protocol here has no UFS2 analogue and is built directly from spec.md
//! §4.7 and the `commit_entry` primitive §9's design notes call for.

use crate::arena::Arena;
use crate::balloc::BlockAllocator;
use crate::error::bail;
use crate::ialloc::InodeAllocator;
use crate::inode::Inode;
use crate::layout::{BlockOffset, InodeNum, Level, BLOCK_SIZE, BYTE_BITS, MAX_FILE_SIZE, STAT_BLKSIZE};
use crate::mapping::{HostMapper, MappingTable};
use crate::region::Region;
use crate::superblock::Superblock;
use crate::tree;
use crate::ErrorKind;

/// Read up to `buf.len()` bytes starting at `offset`. Holes read as zero;
/// a read past EOF is short (possibly empty).
pub fn read(region: &Region, inode: &Inode, offset: u64, buf: &mut [u8]) -> std::io::Result<usize> {
	if offset >= inode.size {
		return Ok(0);
	}
	let want = buf.len().min((inode.size - offset) as usize);
	let root = inode.tree_root();

	let mut done = 0usize;
	while done < want {
		let pos = offset + done as u64;
		let blkidx = pos >> BYTE_BITS;
		let in_page = (pos & (BLOCK_SIZE - 1)) as usize;
		let chunk = (BLOCK_SIZE as usize - in_page).min(want - done);

		let data = match root {
			Some(root) => tree::lookup(region, root, blkidx)?,
			None => None,
		};
		match data {
			Some(off) => {
				let src = region.slice(BlockOffset(off.get() + in_page as u64), chunk)?;
				buf[done..done + chunk].copy_from_slice(src);
			}
			None => buf[done..done + chunk].fill(0),
		}
		done += chunk;
	}

	Ok(want)
}

/// Write `buf` at `offset`, growing the file if needed. Dispatches to the
/// copy-on-write shadow path or, for a write spanning the whole tree, the
/// in-place fallback (spec.md §4.7 step 1, §7 "PGD-level writes").
///
/// Per spec.md:38's control flow, installing `inr`'s mapping (C6) is the
/// first step, ahead of any block allocation.
#[allow(clippy::too_many_arguments)]
pub fn write(
	region: &mut Region,
	sb: &mut Superblock,
	balloc: &BlockAllocator,
	ialloc: &InodeAllocator,
	arena: &Arena,
	mapper: &dyn HostMapper,
	mapping: &MappingTable,
	inr: InodeNum,
	inode: &mut Inode,
	offset: u64,
	buf: &[u8],
	now: u32,
) -> std::io::Result<usize> {
	if buf.is_empty() {
		return Ok(0);
	}
	let end = offset + buf.len() as u64 - 1;
	if end >= MAX_FILE_SIZE {
		bail!(ErrorKind::Invalid);
	}

	mapping.establish(region, arena, mapper, inr, inode)?;

	let level = choose_level(offset, end);
	if level == Level::Pgd {
		write_in_place(region, sb, balloc, inode, offset, buf)?;
	} else {
		write_shadow(region, sb, balloc, ialloc, inode, level, offset, buf, now)?;
	}

	inode.size = inode.size.max(offset + buf.len() as u64);
	inode.mtime = now;
	inode.ctime = now;
	Ok(buf.len())
}

/// spec.md §4.7 step 1: the highest level at which `offset` and `end`
/// fall within the same entry.
fn choose_level(offset: u64, end: u64) -> Level {
	if offset >> 12 == end >> 12 {
		Level::Pte
	} else if offset >> 21 == end >> 21 {
		Level::Pmd
	} else if offset >> 30 == end >> 30 {
		Level::Pud
	} else {
		Level::Pgd
	}
}

/// §7's PGD fallback: the write spans more than one root-level entry, so
/// there is no single parent slot to swap. Bytes are copied directly into
/// the live tree under the per-inode metadata lock the caller holds,
/// sacrificing the atomicity guarantee for this one request.
fn write_in_place(region: &mut Region, sb: &mut Superblock, balloc: &BlockAllocator, inode: &mut Inode, offset: u64, buf: &[u8]) -> std::io::Result<()> {
	log::warn!("file: write at {offset:#x} len {} spans the whole tree root, falling back to non-atomic in-place update", buf.len());

	let mut root = inode.tree_root();
	let mut done = 0usize;
	while done < buf.len() {
		let pos = offset + done as u64;
		let blkidx = pos >> BYTE_BITS;
		let in_page = (pos & (BLOCK_SIZE - 1)) as usize;
		let chunk = (BLOCK_SIZE as usize - in_page).min(buf.len() - done);

		let (pte_page, idx) = tree::ensure_path(region, sb, balloc, &mut root, blkidx)?;
		let data_off = match tree::read_entry(region, pte_page, idx)? {
			Some(off) => off,
			None => {
				let blk = balloc.alloc(region, sb)?;
				// A block fresh off the free list still carries its old
				// next-pointer in its first 8 bytes (balloc.rs's zero-fill
				// is on `free`, not `alloc`); this write may not cover the
				// whole page, so zero it here before splicing in.
				region.fill_at(blk, BLOCK_SIZE as usize)?;
				tree::commit_entry(region, pte_page, idx, Some(blk))?;
				inode.blocks += BLOCK_SIZE / STAT_BLKSIZE;
				blk
			}
		};
		region.write_at(BlockOffset(data_off.get() + in_page as u64), &buf[done..done + chunk])?;
		done += chunk;
	}
	inode.set_tree_root(root);
	Ok(())
}

/// spec.md §4.7 steps 2-6: build a full replacement subtree in a shadow
/// inode, then swap it in with a single aligned store.
#[allow(clippy::too_many_arguments)]
fn write_shadow(
	region: &mut Region,
	sb: &mut Superblock,
	balloc: &BlockAllocator,
	ialloc: &InodeAllocator,
	inode: &mut Inode,
	level: Level,
	offset: u64,
	buf: &[u8],
	now: u32,
) -> std::io::Result<()> {
	let mask = level.span_mask();
	let subtree_start = (offset >> BYTE_BITS) & !mask;
	let page_count = mask + 1;

	let current_size = inode.size;
	let write_end = offset + buf.len() as u64;

	// Step 2: allocate the shadow inode. It is never linked into any
	// directory, so it is parentless from the moment it is created
	// (spec.md §9's open question on the shadow's parent: any parent
	// would do since it is never linked, so this one has none).
	let kind = inode.kind()?;
	let shadow_inr = ialloc.alloc(region, sb, kind, inode.perm(), inode.uid, inode.gid, now)?;
	set_shadow_link_count(region, sb, shadow_inr, 0)?;

	let mut shadow_root: Option<BlockOffset> = None;

	// Steps 3-4: populate every leaf page of the subtree, combining
	// whatever of the live file's bytes fall on that page with the bytes
	// this write supplies.
	for blkidx in subtree_start..subtree_start + page_count {
		let page_start = blkidx * BLOCK_SIZE;
		let page_end = page_start + BLOCK_SIZE;
		let mut page_buf = [0u8; BLOCK_SIZE as usize];

		if page_start < current_size {
			let copy_end = current_size.min(page_end);
			if copy_end > page_start {
				let len = (copy_end - page_start) as usize;
				if let Some(root) = inode.tree_root() {
					if let Some(data) = tree::lookup(region, root, blkidx)? {
						page_buf[..len].copy_from_slice(region.slice(data, len)?);
					}
				}
			}
		}

		let overlap_start = offset.max(page_start);
		let overlap_end = write_end.min(page_end);
		if overlap_end > overlap_start {
			let dst = (overlap_start - page_start) as usize;
			let src = (overlap_start - offset) as usize;
			let len = (overlap_end - overlap_start) as usize;
			page_buf[dst..dst + len].copy_from_slice(&buf[src..src + len]);
		}

		let (pte_page, idx) = tree::ensure_path(region, sb, balloc, &mut shadow_root, blkidx)?;
		let data_blk = balloc.alloc(region, sb)?;
		region.write_at(data_blk, &page_buf)?;
		tree::commit_entry(region, pte_page, idx, Some(data_blk))?;
	}

	// Step 5: locate the parent slot in both trees and perform the single
	// aligned store that makes the write visible.
	let commit_depth = level.depth();
	let mut live_root = inode.tree_root();
	let (live_page, live_idx) = tree::ensure_path_to_depth(region, sb, balloc, &mut live_root, subtree_start, commit_depth)?;
	let (shadow_page, shadow_idx) = tree::ensure_path_to_depth(region, sb, balloc, &mut shadow_root, subtree_start, commit_depth)?;
	debug_assert_eq!(live_idx, shadow_idx);

	let new_subtree = tree::read_entry(region, shadow_page, shadow_idx)?;

	let old_subtree = tree::commit_entry(region, live_page, live_idx, new_subtree)?; // the linearization point
	inode.set_tree_root(live_root);

	if let Some(old) = old_subtree {
		let freed = tree::count_displaced(region, commit_depth, old)?;
		inode.blocks = inode.blocks.saturating_sub(freed * (BLOCK_SIZE / STAT_BLKSIZE));
	}
	inode.blocks += page_count * (BLOCK_SIZE / STAT_BLKSIZE);

	// The shadow's own slot now aliases the displaced subtree, so freeing
	// the shadow (step 6) reclaims it.
	tree::commit_entry(region, shadow_page, shadow_idx, old_subtree)?;

	if let Some(root) = shadow_root {
		tree::teardown(region, sb, balloc, root)?;
	}
	ialloc.free(region, sb, shadow_inr, now)?;

	Ok(())
}

fn set_shadow_link_count(region: &mut Region, sb: &Superblock, inr: InodeNum, count: u32) -> std::io::Result<()> {
	let slot = inr.slot_offset(sb.inode_start());
	let mut shadow: Inode = region.decode_at(slot)?;
	shadow.link_counts = count;
	region.encode_at(slot, &shadow)
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::arena::Arena;
	use crate::inode::InodeType;
	use crate::mapping::{InMemoryMapper, MappingTable};

	fn fixture() -> (Region, Superblock, BlockAllocator, InodeAllocator, Arena, InMemoryMapper, MappingTable) {
		let mut region = Region::new_anonymous(16 << 20);
		let mut sb = Superblock::format(16 << 20, [0u8; 16]);
		let mut prev = 0u64;
		for i in 0..sb.inode_count {
			let off = sb.inode_start + i * crate::layout::INODE_SIZE;
			let mut slot = Inode::new(InodeType::RegularFile, 0o644, 0, 0, 0, 0);
			slot.link_counts = 0;
			slot.pg_addr = prev;
			region.encode_at(BlockOffset(off), &slot).unwrap();
			prev = off;
		}
		sb.free_inode_start = prev;
		let mut pprev = 0u64;
		let mut off = sb.block_start;
		for _ in 0..sb.block_count {
			region.write_at(BlockOffset(off), &pprev.to_le_bytes()).unwrap();
			pprev = off;
			off += BLOCK_SIZE;
		}
		sb.free_block_start = pprev;
		sb.commit(&mut region).unwrap();
		(region, sb, BlockAllocator::new(), InodeAllocator::new(0), Arena::new(0, 1 << 40), InMemoryMapper::new(), MappingTable::new())
	}

	const TEST_INR: InodeNum = InodeNum::ROOT;

	#[test]
	fn write_then_read_small_file_is_pte_level() {
		let (mut region, mut sb, balloc, ialloc, arena, mapper, mapping) = fixture();
		let mut inode = Inode::new(InodeType::RegularFile, 0o644, 0, 0, 1, 0);

		let payload = vec![0x41u8; 4096];
		write(&mut region, &mut sb, &balloc, &ialloc, &arena, &mapper, &mapping, TEST_INR, &mut inode, 0, &payload, 10).unwrap();
		assert_eq!(inode.size, 4096);

		let mut out = vec![0u8; 4096];
		let n = read(&region, &inode, 0, &mut out).unwrap();
		assert_eq!(n, 4096);
		assert_eq!(out, payload);
	}

	#[test]
	fn single_byte_write_in_larger_file_is_pte_level_shadow() {
		let (mut region, mut sb, balloc, ialloc, arena, mapper, mapping) = fixture();
		let mut inode = Inode::new(InodeType::RegularFile, 0o644, 0, 0, 1, 0);

		write(&mut region, &mut sb, &balloc, &ialloc, &arena, &mapper, &mapping, TEST_INR, &mut inode, 0, &vec![0u8; 8192], 1).unwrap();
		write(&mut region, &mut sb, &balloc, &ialloc, &arena, &mapper, &mapping, TEST_INR, &mut inode, 4096, &[0xffu8], 2).unwrap();

		let mut out = vec![0u8; 8192];
		read(&region, &inode, 0, &mut out).unwrap();
		assert_eq!(out[4096], 0xff);
		assert!(out[..4096].iter().all(|&b| b == 0));
		assert!(out[4097..].iter().all(|&b| b == 0));
	}

	#[test]
	fn read_past_eof_is_short() {
		let (mut region, mut sb, balloc, ialloc, arena, mapper, mapping) = fixture();
		let mut inode = Inode::new(InodeType::RegularFile, 0o644, 0, 0, 1, 0);
		write(&mut region, &mut sb, &balloc, &ialloc, &arena, &mapper, &mapping, TEST_INR, &mut inode, 0, b"hello", 1).unwrap();

		let mut out = [0u8; 16];
		let n = read(&region, &inode, 0, &mut out).unwrap();
		assert_eq!(n, 5);
		assert_eq!(&out[..5], b"hello");
	}

	#[test]
	fn read_hole_is_zero_filled() {
		let (region, _sb, _balloc, _ialloc, _arena, _mapper, _mapping) = fixture();
		let mut inode = Inode::new(InodeType::RegularFile, 0o644, 0, 0, 1, 0);
		inode.size = 4096;
		let mut out = [0xffu8; 128];
		let n = read(&region, &inode, 0, &mut out).unwrap();
		assert_eq!(n, 128);
		assert!(out.iter().all(|&b| b == 0));
	}
}
