//! The four-level, 9-bit-per-level block translation tree (spec.md §3, §4.4:
//! C4) every regular file and directory is indexed through.
//!
//! Plays the role `rufs`'s `decode_blkidx`/`inode_set_block`/`inode_free_l1..3`
//! trio plays for UFS2's direct+triple-indirect scheme (`rufs/src/ufs/ialloc.rs`),
//! except every level here has the same shape (512 entries of 8 bytes,
//! filling exactly one [`BLOCK_SIZE`] page) since the format doubles as a
//! hardware page-table layout on compatible hosts (spec.md §4.5).

use crate::balloc::BlockAllocator;
use crate::error::bail;
use crate::layout::{split_index, BlockOffset, Level, BLOCK_SIZE, ENTRIES_PER_LEVEL};
use crate::region::Region;
use crate::superblock::Superblock;
use crate::ErrorKind;

/// One page of the tree: 512 8-byte child pointers, 0 meaning absent.
pub struct TreePage {
	entries: [u64; ENTRIES_PER_LEVEL],
}

impl TreePage {
	pub fn empty() -> Self {
		Self {
			entries: [0u64; ENTRIES_PER_LEVEL],
		}
	}

	pub fn read(region: &Region, at: BlockOffset) -> std::io::Result<Self> {
		let bytes = region.slice(at, BLOCK_SIZE as usize)?;
		let mut entries = [0u64; ENTRIES_PER_LEVEL];
		for (i, chunk) in bytes.chunks_exact(8).enumerate() {
			entries[i] = u64::from_le_bytes(chunk.try_into().unwrap());
		}
		Ok(Self { entries })
	}

	pub fn write(&self, region: &mut Region, at: BlockOffset) -> std::io::Result<()> {
		let bytes = region.slice_mut(at, BLOCK_SIZE as usize)?;
		for (i, entry) in self.entries.iter().enumerate() {
			bytes[i * 8..i * 8 + 8].copy_from_slice(&entry.to_le_bytes());
		}
		Ok(())
	}

	pub fn get(&self, idx: usize) -> Option<BlockOffset> {
		let v = self.entries[idx];
		(v != 0).then_some(BlockOffset(v))
	}

	pub fn set(&mut self, idx: usize, child: Option<BlockOffset>) {
		self.entries[idx] = child.map(BlockOffset::get).unwrap_or(0);
	}

	pub fn is_empty(&self) -> bool {
		self.entries.iter().all(|&e| e == 0)
	}

	/// Allocate a fresh, freshly persisted copy of this page, for the
	/// copy-on-write path (spec.md §4.7): the caller owns splicing the new
	/// offset into the parent.
	pub fn alloc_copy(&self, region: &mut Region, sb: &mut Superblock, balloc: &BlockAllocator) -> std::io::Result<BlockOffset> {
		let off = balloc.alloc(region, sb)?;
		self.write(region, off)?;
		Ok(off)
	}
}

/// Walk from `root` down to the leaf data block for `blkidx`, without
/// allocating anything. Returns `None` as soon as any level along the path
/// is absent.
pub fn lookup(region: &Region, root: BlockOffset, blkidx: u64) -> std::io::Result<Option<BlockOffset>> {
	let idx = split_index(blkidx);
	let mut cur = root;

	for (depth, level) in Level::ALL.iter().enumerate() {
		if *level == Level::Pte {
			break;
		}
		let page = TreePage::read(region, cur)?;
		match page.get(idx[depth]) {
			Some(next) => cur = next,
			None => return Ok(None),
		}
	}

	let page = TreePage::read(region, cur)?;
	Ok(page.get(idx[3]))
}

/// Ensure every intermediate level down to the leaf slot for `blkidx`
/// exists, allocating pages as needed, and return the (possibly just
/// allocated) PTE-level page together with the leaf index into it.
///
/// This never allocates the data block itself or decides update
/// granularity; that is [`crate::file`]'s job, since it is the one that
/// knows the copy-on-write/in-place split of spec.md §4.7.
pub fn ensure_path(
	region: &mut Region,
	sb: &mut Superblock,
	balloc: &BlockAllocator,
	root: &mut Option<BlockOffset>,
	blkidx: u64,
) -> std::io::Result<(BlockOffset, usize)> {
	ensure_path_to_depth(region, sb, balloc, root, blkidx, 3)
}

/// Ensure every level from the root down to `depth` exists (allocating
/// pages as needed), and return the page *at* `depth` together with the
/// index into it that addresses `blkidx`'s entry at that depth.
///
/// `depth == 0` returns the root page itself with `idx[0]`; `depth == 3`
/// returns the PTE-level page with `idx[3]`, i.e. [`ensure_path`]. This is
/// the structural half of spec.md §4.7's update-level selection: the write
/// path picks `depth` from the update level `L`, then uses the returned
/// `(page, index)` pair as the target of [`commit_entry`].
pub fn ensure_path_to_depth(
	region: &mut Region,
	sb: &mut Superblock,
	balloc: &BlockAllocator,
	root: &mut Option<BlockOffset>,
	blkidx: u64,
	depth: usize,
) -> std::io::Result<(BlockOffset, usize)> {
	let idx = split_index(blkidx);

	if root.is_none() {
		let page = TreePage::empty();
		*root = Some(page.alloc_copy(region, sb, balloc)?);
	}
	let mut cur = root.unwrap();

	for d in 0..depth {
		let mut page = TreePage::read(region, cur)?;
		if let Some(next) = page.get(idx[d]) {
			cur = next;
			continue;
		}
		let child = TreePage::empty();
		let child_off = child.alloc_copy(region, sb, balloc)?;
		page.set(idx[d], Some(child_off));
		page.write(region, cur)?;
		cur = child_off;
	}

	Ok((cur, idx[depth]))
}

/// Read a single entry out of a tree page without materializing the whole
/// [`TreePage`], for callers that only need to peek at one slot.
pub fn read_entry(region: &Region, page_off: BlockOffset, index: usize) -> std::io::Result<Option<BlockOffset>> {
	let entry_off = BlockOffset(page_off.get() + (index * 8) as u64);
	let raw: u64 = region.decode_at(entry_off)?;
	Ok((raw != 0).then_some(BlockOffset(raw)))
}

/// The atomic commit primitive spec.md's design notes call for: a single
/// aligned 8-byte store that overwrites one entry of an already-persisted
/// tree page, returning the entry's previous value. This is the
/// linearization point of a copy-on-write write (spec.md §4.7 step 5):
/// everything up to this call only touches freshly allocated, not-yet-
/// reachable pages, so a crash before this store is indistinguishable from
/// the write never having started.
pub fn commit_entry(region: &mut Region, page_off: BlockOffset, index: usize, new_entry: Option<BlockOffset>) -> std::io::Result<Option<BlockOffset>> {
	let entry_off = BlockOffset(page_off.get() + (index * 8) as u64);
	let old: u64 = region.decode_at(entry_off)?;
	let new_raw = new_entry.map(BlockOffset::get).unwrap_or(0);
	region.encode_at(entry_off, &new_raw)?;
	Ok((old != 0).then_some(BlockOffset(old)))
}

/// Recursively free every page and data block reachable from `root`
/// (spec.md §4.8 unlink/truncate teardown).
pub fn teardown(region: &mut Region, sb: &mut Superblock, balloc: &BlockAllocator, root: BlockOffset) -> std::io::Result<()> {
	teardown_level(region, sb, balloc, root, Level::Pgd)
}

/// Count the data blocks reachable from `child`, the other end of an
/// entry found at `commit_depth`: 1 if the commit happened at the PTE
/// level (`child` is itself a data block), otherwise a recursive count
/// over the subtree rooted at `child`. Used to keep an inode's `blocks`
/// stat accurate across a copy-on-write swap that displaces a subtree of
/// unknown size.
pub fn count_displaced(region: &Region, commit_depth: usize, child: BlockOffset) -> std::io::Result<u64> {
	if commit_depth == 3 {
		Ok(1)
	} else {
		count_leaves(region, child, Level::at_depth(commit_depth + 1))
	}
}

fn count_leaves(region: &Region, page_off: BlockOffset, level: Level) -> std::io::Result<u64> {
	let page = TreePage::read(region, page_off)?;
	if level == Level::Pte {
		Ok((0..ENTRIES_PER_LEVEL).filter(|&i| page.get(i).is_some()).count() as u64)
	} else {
		let child_level = match level {
			Level::Pgd => Level::Pud,
			Level::Pud => Level::Pmd,
			Level::Pmd => Level::Pte,
			Level::Pte => unreachable!(),
		};
		let mut total = 0u64;
		for i in 0..ENTRIES_PER_LEVEL {
			if let Some(child) = page.get(i) {
				total += count_leaves(region, child, child_level)?;
			}
		}
		Ok(total)
	}
}

pub(crate) fn teardown_level(
	region: &mut Region,
	sb: &mut Superblock,
	balloc: &BlockAllocator,
	page_off: BlockOffset,
	level: Level,
) -> std::io::Result<()> {
	let page = TreePage::read(region, page_off)?;

	if level == Level::Pte {
		for i in 0..ENTRIES_PER_LEVEL {
			if let Some(data) = page.get(i) {
				balloc.free(region, sb, data)?;
			}
		}
	} else {
		let child_level = match level {
			Level::Pgd => Level::Pud,
			Level::Pud => Level::Pmd,
			Level::Pmd => Level::Pte,
			Level::Pte => unreachable!(),
		};
		for i in 0..ENTRIES_PER_LEVEL {
			if let Some(child) = page.get(i) {
				teardown_level(region, sb, balloc, child, child_level)?;
			}
		}
	}

	balloc.free(region, sb, page_off)
}

/// Validate that `blkidx` names a valid leaf under a 4-level, 9-bit/level
/// tree (spec.md §4.4's domain: `512^4` leaves).
pub fn check_blkidx(blkidx: u64) -> std::io::Result<()> {
	const MAX_BLKIDX: u64 = (ENTRIES_PER_LEVEL as u64).pow(4);
	if blkidx >= MAX_BLKIDX {
		bail!(ErrorKind::Invalid);
	}
	Ok(())
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn lookup_absent_path_returns_none() {
		let mut region = Region::new_anonymous(1 << 20);
		let mut sb = Superblock::format(1 << 20, [0u8; 16]);
		sb.commit(&mut region).unwrap();
		let balloc = BlockAllocator::new();

		let mut root = None;
		let (pte_off, idx) = ensure_path(&mut region, &mut sb, &balloc, &mut root, 5).unwrap();
		let mut page = TreePage::read(&region, pte_off).unwrap();
		assert!(page.get(idx).is_none());

		let data = balloc.alloc(&mut region, &mut sb).unwrap();
		page.set(idx, Some(data));
		page.write(&mut region, pte_off).unwrap();

		let found = lookup(&region, root.unwrap(), 5).unwrap();
		assert_eq!(found, Some(data));

		let missing = lookup(&region, root.unwrap(), 6).unwrap();
		assert_eq!(missing, None);
	}

	#[test]
	fn ensure_path_reuses_existing_levels() {
		let mut region = Region::new_anonymous(1 << 20);
		let mut sb = Superblock::format(1 << 20, [0u8; 16]);
		sb.commit(&mut region).unwrap();
		let balloc = BlockAllocator::new();

		let mut root = None;
		// indices 0 and 1 share the same PGD/PUD/PMD pages, differing only
		// in the PTE index.
		let (pte_a, idx_a) = ensure_path(&mut region, &mut sb, &balloc, &mut root, 0).unwrap();
		let (pte_b, idx_b) = ensure_path(&mut region, &mut sb, &balloc, &mut root, 1).unwrap();
		assert_eq!(pte_a, pte_b);
		assert_ne!(idx_a, idx_b);
	}

	/// §8 property 8 (crash consistency, simulated): `commit_entry` is the
	/// sole linearization point of a shadow swap, so there are only two
	/// reachable prefixes of the "stores" that make it up — before the call,
	/// and after. Before, the entry and every sibling slot on the page
	/// still show the pre-write state; after, only the targeted entry has
	/// moved and every sibling is untouched.
	#[test]
	fn commit_entry_has_no_partial_prefix_between_old_and_new() {
		let mut region = Region::new_anonymous(1 << 20);
		let mut sb = Superblock::format(1 << 20, [0u8; 16]);
		sb.commit(&mut region).unwrap();
		let balloc = BlockAllocator::new();

		let mut root = None;
		let (pte_off, idx) = ensure_path(&mut region, &mut sb, &balloc, &mut root, 0).unwrap();
		let old_data = balloc.alloc(&mut region, &mut sb).unwrap();
		commit_entry(&mut region, pte_off, idx, Some(old_data)).unwrap();
		let before_page = TreePage::read(&region, pte_off).unwrap();

		let new_data = balloc.alloc(&mut region, &mut sb).unwrap();

		// prefix up to (not including) the commit store: unchanged.
		assert_eq!(read_entry(&region, pte_off, idx).unwrap(), Some(old_data));

		let displaced = commit_entry(&mut region, pte_off, idx, Some(new_data)).unwrap();
		assert_eq!(displaced, Some(old_data));

		// prefix including the commit store: fully moved, nothing else touched.
		assert_eq!(read_entry(&region, pte_off, idx).unwrap(), Some(new_data));
		let after_page = TreePage::read(&region, pte_off).unwrap();
		for i in 0..ENTRIES_PER_LEVEL {
			if i != idx {
				assert_eq!(before_page.get(i), after_page.get(i), "commit_entry touched an unrelated slot");
			}
		}
	}

	#[test]
	fn teardown_frees_every_level_and_data_block() {
		let mut region = Region::new_anonymous(4 << 20);
		let mut sb = Superblock::format(4 << 20, [0u8; 16]);
		sb.commit(&mut region).unwrap();
		let balloc = BlockAllocator::new();
		let free_before = sb.free_block_count;

		let mut root = None;
		let (pte_off, idx) = ensure_path(&mut region, &mut sb, &balloc, &mut root, 0).unwrap();
		let data = balloc.alloc(&mut region, &mut sb).unwrap();
		let mut page = TreePage::read(&region, pte_off).unwrap();
		page.set(idx, Some(data));
		page.write(&mut region, pte_off).unwrap();

		teardown(&mut region, &mut sb, &balloc, root.unwrap()).unwrap();
		assert_eq!(sb.free_block_count, free_before);
	}
}
