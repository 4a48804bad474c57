//! Namespace operations (spec.md §4.9: C9): `create`, `mkdir`, `mknod`,
//! `symlink`, `link`, `tmpfile`, `unlink`, `rmdir`, `rename`.
//!
//! Grounded in the inode-number-in, inode-number-out shape `rufs`'s
//! `Ufs::read_inode`/`write_inode` pair gives every mutating operation
//! (`rufs/src/ufs/inode.rs`), composed here with [`crate::dir`]'s record
//! operations and [`crate::ialloc`]'s allocator. `rufs` itself never grew
//! a writable namespace layer (its FUSE frontend is read-mostly), so this
//! module's control flow is built directly from spec.md §4.9 rather than
//! adapted from an existing rufs operation.

use crate::arena::Arena;
use crate::balloc::BlockAllocator;
use crate::dir;
use crate::error::bail;
use crate::file;
use crate::ialloc::InodeAllocator;
use crate::inode::{self, Inode, InodeType};
use crate::layout::InodeNum;
use crate::mapping::{HostMapper, MappingTable};
use crate::region::Region;
use crate::superblock::Superblock;
use crate::tree;
use crate::ErrorKind;

fn read_inode(region: &Region, sb: &Superblock, inr: InodeNum) -> std::io::Result<Inode> {
	region.decode_at(inr.slot_offset(sb.inode_start()))
}

fn write_inode(region: &mut Region, sb: &Superblock, inr: InodeNum, inode: &Inode) -> std::io::Result<()> {
	region.encode_at(inr.slot_offset(sb.inode_start()), inode)
}

fn require_dir(inode: &Inode) -> std::io::Result<()> {
	if inode.kind()? != InodeType::Directory {
		bail!(ErrorKind::NotAllowed);
	}
	Ok(())
}

/// Reclaim an inode whose link count has just dropped to zero: tear down
/// its host mapping (if any), tear down its translation tree, if any, then
/// return its slot to the free list.
#[allow(clippy::too_many_arguments)]
fn reclaim_if_orphaned(
	region: &mut Region,
	sb: &mut Superblock,
	balloc: &BlockAllocator,
	ialloc: &InodeAllocator,
	arena: &Arena,
	mapper: &dyn HostMapper,
	mapping: &MappingTable,
	inr: InodeNum,
	mut inode: Inode,
	now: u32,
) -> std::io::Result<()> {
	if inode.link_counts != 0 {
		write_inode(region, sb, inr, &inode)?;
		return Ok(());
	}
	let kind = inode.kind()?;
	mapping.destroy_force(arena, mapper, inr, kind)?;
	if let Some(root) = inode.tree_root() {
		tree::teardown(region, sb, balloc, root)?;
		inode.set_tree_root(None);
	}
	write_inode(region, sb, inr, &inode)?;
	ialloc.free(region, sb, inr, now)
}

/// Allocate a fresh inode of `kind`, make it inherit the masked subset of
/// `parent`'s flags (spec.md §3's `flags` field; SPEC_FULL.md §2's
/// `NVMM_FL_INHERITED`/`NVMM_REG_FLMASK`/`NVMM_OTHER_FLMASK` mirror), and
/// establish its mapping (spec.md §4.9: "allocate/obtain the target inode,
/// establish its mapping (if needed)").
#[allow(clippy::too_many_arguments)]
fn new_child(
	region: &mut Region,
	sb: &mut Superblock,
	ialloc: &InodeAllocator,
	arena: &Arena,
	mapper: &dyn HostMapper,
	mapping: &MappingTable,
	parent: &Inode,
	kind: InodeType,
	mode_perm: u32,
	uid: u32,
	gid: u32,
	now: u32,
) -> std::io::Result<(InodeNum, Inode)> {
	let inr = ialloc.alloc(region, sb, kind, mode_perm, uid, gid, now)?;
	let mut child = read_inode(region, sb, inr)?;
	child.set_flags(inode::inherit_flags(kind, parent.flags()));
	write_inode(region, sb, inr, &child)?;
	mapping.establish(region, arena, mapper, inr, &child)?;
	Ok((inr, child))
}

/// Create a new regular file in `parent`.
#[allow(clippy::too_many_arguments)]
pub fn create(region: &mut Region, sb: &mut Superblock, balloc: &BlockAllocator, ialloc: &InodeAllocator, arena: &Arena, mapper: &dyn HostMapper, mapping: &MappingTable, parent: InodeNum, name: &[u8], mode_perm: u32, uid: u32, gid: u32, now: u32) -> std::io::Result<InodeNum> {
	let mut parent_inode = read_inode(region, sb, parent)?;
	require_dir(&parent_inode)?;

	let (child_inr, mut child_inode) = new_child(region, sb, ialloc, arena, mapper, mapping, &parent_inode, InodeType::RegularFile, mode_perm, uid, gid, now)?;

	if let Err(e) = dir::add(region, sb, balloc, &mut parent_inode, name, child_inr, InodeType::RegularFile) {
		child_inode.link_counts = 0;
		reclaim_if_orphaned(region, sb, balloc, ialloc, arena, mapper, mapping, child_inr, child_inode, now)?;
		return Err(e);
	}

	parent_inode.mtime = now;
	parent_inode.ctime = now;
	write_inode(region, sb, parent, &parent_inode)?;
	Ok(child_inr)
}

/// Create a new, empty subdirectory in `parent`.
#[allow(clippy::too_many_arguments)]
pub fn mkdir(region: &mut Region, sb: &mut Superblock, balloc: &BlockAllocator, ialloc: &InodeAllocator, arena: &Arena, mapper: &dyn HostMapper, mapping: &MappingTable, parent: InodeNum, name: &[u8], mode_perm: u32, uid: u32, gid: u32, now: u32) -> std::io::Result<InodeNum> {
	let mut parent_inode = read_inode(region, sb, parent)?;
	require_dir(&parent_inode)?;

	let (child_inr, mut child_inode) = new_child(region, sb, ialloc, arena, mapper, mapping, &parent_inode, InodeType::Directory, mode_perm, uid, gid, now)?;

	// pre-increment: rolled back on any failure below.
	parent_inode.link_counts += 1;

	let result = (|| {
		dir::make_empty(region, sb, balloc, &mut child_inode, child_inr, parent)?;
		dir::add(region, sb, balloc, &mut parent_inode, name, child_inr, InodeType::Directory)
	})();

	if let Err(e) = result {
		parent_inode.link_counts -= 1;
		child_inode.link_counts = 0;
		reclaim_if_orphaned(region, sb, balloc, ialloc, arena, mapper, mapping, child_inr, child_inode, now)?;
		write_inode(region, sb, parent, &parent_inode)?;
		return Err(e);
	}

	parent_inode.mtime = now;
	parent_inode.ctime = now;
	write_inode(region, sb, parent, &parent_inode)?;
	write_inode(region, sb, child_inr, &child_inode)?;
	Ok(child_inr)
}

/// Create a device/FIFO/socket node, none of which own a translation tree.
#[allow(clippy::too_many_arguments)]
pub fn mknod(region: &mut Region, sb: &mut Superblock, balloc: &BlockAllocator, ialloc: &InodeAllocator, arena: &Arena, mapper: &dyn HostMapper, mapping: &MappingTable, parent: InodeNum, name: &[u8], kind: InodeType, mode_perm: u32, uid: u32, gid: u32, now: u32) -> std::io::Result<InodeNum> {
	if kind.has_blocks() {
		bail!(ErrorKind::Invalid);
	}

	let mut parent_inode = read_inode(region, sb, parent)?;
	require_dir(&parent_inode)?;

	let (child_inr, mut child_inode) = new_child(region, sb, ialloc, arena, mapper, mapping, &parent_inode, kind, mode_perm, uid, gid, now)?;

	if let Err(e) = dir::add(region, sb, balloc, &mut parent_inode, name, child_inr, kind) {
		child_inode.link_counts = 0;
		reclaim_if_orphaned(region, sb, balloc, ialloc, arena, mapper, mapping, child_inr, child_inode, now)?;
		return Err(e);
	}

	parent_inode.mtime = now;
	parent_inode.ctime = now;
	write_inode(region, sb, parent, &parent_inode)?;
	Ok(child_inr)
}

/// Create a symlink whose target text is stored as ordinary file content
/// (spec.md §4.9: "copy link text into a freshly allocated block"), reusing
/// [`crate::file::write`] rather than a bespoke inline-text path.
#[allow(clippy::too_many_arguments)]
pub fn symlink(region: &mut Region, sb: &mut Superblock, balloc: &BlockAllocator, ialloc: &InodeAllocator, arena: &Arena, mapper: &dyn HostMapper, mapping: &MappingTable, parent: InodeNum, name: &[u8], target: &[u8], uid: u32, gid: u32, now: u32) -> std::io::Result<InodeNum> {
	let mut parent_inode = read_inode(region, sb, parent)?;
	require_dir(&parent_inode)?;

	let (child_inr, mut child_inode) = new_child(region, sb, ialloc, arena, mapper, mapping, &parent_inode, InodeType::Symlink, 0o777, uid, gid, now)?;

	let result = file::write(region, sb, balloc, ialloc, arena, mapper, mapping, child_inr, &mut child_inode, 0, target, now).and_then(|_| dir::add(region, sb, balloc, &mut parent_inode, name, child_inr, InodeType::Symlink));

	if let Err(e) = result {
		child_inode.link_counts = 0;
		reclaim_if_orphaned(region, sb, balloc, ialloc, arena, mapper, mapping, child_inr, child_inode, now)?;
		return Err(e);
	}

	parent_inode.mtime = now;
	parent_inode.ctime = now;
	write_inode(region, sb, parent, &parent_inode)?;
	write_inode(region, sb, child_inr, &child_inode)?;
	Ok(child_inr)
}

/// Hard-link `target` into `parent` under `name`. Refuses directories, the
/// same restriction POSIX `link(2)` enforces.
#[allow(clippy::too_many_arguments)]
pub fn link(region: &mut Region, sb: &mut Superblock, balloc: &BlockAllocator, arena: &Arena, mapper: &dyn HostMapper, mapping: &MappingTable, parent: InodeNum, name: &[u8], target: InodeNum, now: u32) -> std::io::Result<()> {
	let mut parent_inode = read_inode(region, sb, parent)?;
	require_dir(&parent_inode)?;

	let mut target_inode = read_inode(region, sb, target)?;
	if target_inode.kind()? == InodeType::Directory {
		bail!(ErrorKind::NotAllowed);
	}

	dir::add(region, sb, balloc, &mut parent_inode, name, target, target_inode.kind()?)?;

	mapping.establish(region, arena, mapper, target, &target_inode)?;
	target_inode.link_counts += 1;
	target_inode.ctime = now;
	parent_inode.mtime = now;
	parent_inode.ctime = now;
	write_inode(region, sb, parent, &parent_inode)?;
	write_inode(region, sb, target, &target_inode)
}

/// Allocate an inode with no name anywhere in the namespace (`O_TMPFILE`
/// semantics): the caller's open reference is its only link.
pub fn tmpfile(region: &mut Region, sb: &mut Superblock, ialloc: &InodeAllocator, arena: &Arena, mapper: &dyn HostMapper, mapping: &MappingTable, mode_perm: u32, uid: u32, gid: u32, now: u32) -> std::io::Result<InodeNum> {
	let inr = ialloc.alloc(region, sb, InodeType::RegularFile, mode_perm, uid, gid, now)?;
	let inode = read_inode(region, sb, inr)?;
	mapping.establish(region, arena, mapper, inr, &inode)?;
	Ok(inr)
}

/// Remove `name` from `parent`, freeing the target inode once its link
/// count reaches zero. Refuses directories (use [`rmdir`]).
#[allow(clippy::too_many_arguments)]
pub fn unlink(region: &mut Region, sb: &mut Superblock, balloc: &BlockAllocator, ialloc: &InodeAllocator, arena: &Arena, mapper: &dyn HostMapper, mapping: &MappingTable, parent: InodeNum, name: &[u8], now: u32) -> std::io::Result<()> {
	let mut parent_inode = read_inode(region, sb, parent)?;
	require_dir(&parent_inode)?;

	let (loc, prev) = dir::lookup_with_prev(region, &parent_inode, name)?.ok_or_else(|| std::io::Error::from(ErrorKind::NotFound))?;
	let entry = dir::resolve(region, &parent_inode, loc)?;
	let child = entry.inr.ok_or_else(|| std::io::Error::from(ErrorKind::NotFound))?;

	let mut child_inode = read_inode(region, sb, child)?;
	if child_inode.kind()? == InodeType::Directory {
		bail!(ErrorKind::NotAllowed);
	}

	dir::delete(region, &parent_inode, loc, prev)?;
	parent_inode.mtime = now;
	parent_inode.ctime = now;
	write_inode(region, sb, parent, &parent_inode)?;

	child_inode.link_counts = child_inode.link_counts.saturating_sub(1);
	child_inode.ctime = now;
	reclaim_if_orphaned(region, sb, balloc, ialloc, arena, mapper, mapping, child, child_inode, now)
}

/// Remove the empty subdirectory `name` from `parent`.
#[allow(clippy::too_many_arguments)]
pub fn rmdir(region: &mut Region, sb: &mut Superblock, balloc: &BlockAllocator, ialloc: &InodeAllocator, arena: &Arena, mapper: &dyn HostMapper, mapping: &MappingTable, parent: InodeNum, name: &[u8], now: u32) -> std::io::Result<()> {
	let mut parent_inode = read_inode(region, sb, parent)?;
	require_dir(&parent_inode)?;

	let (loc, prev) = dir::lookup_with_prev(region, &parent_inode, name)?.ok_or_else(|| std::io::Error::from(ErrorKind::NotFound))?;
	let entry = dir::resolve(region, &parent_inode, loc)?;
	let child = entry.inr.ok_or_else(|| std::io::Error::from(ErrorKind::NotFound))?;

	let mut child_inode = read_inode(region, sb, child)?;
	require_dir(&child_inode)?;
	if !dir::is_empty(region, &child_inode)? {
		bail!(ErrorKind::NotEmpty);
	}

	dir::delete(region, &parent_inode, loc, prev)?;
	parent_inode.mtime = now;
	parent_inode.ctime = now;
	parent_inode.link_counts = parent_inode.link_counts.saturating_sub(1);
	write_inode(region, sb, parent, &parent_inode)?;

	child_inode.size = 0;
	child_inode.link_counts = 0;
	reclaim_if_orphaned(region, sb, balloc, ialloc, arena, mapper, mapping, child, child_inode, now)
}

/// Move `old` in `old_dir` to `new` in `new_dir`, per spec.md §4.9's
/// five-step protocol. The commit point is the `set_link`/`add` in step 2
/// or 3: once that runs, the entry is reachable from its new location even
/// though the old directory still names it too, until step 4 runs.
#[allow(clippy::too_many_arguments)]
pub fn rename(region: &mut Region, sb: &mut Superblock, balloc: &BlockAllocator, ialloc: &InodeAllocator, arena: &Arena, mapper: &dyn HostMapper, mapping: &MappingTable, old_dir: InodeNum, old_name: &[u8], new_dir: InodeNum, new_name: &[u8], now: u32) -> std::io::Result<()> {
	let mut old_dir_inode = read_inode(region, sb, old_dir)?;
	require_dir(&old_dir_inode)?;

	let (old_loc, old_prev) = dir::lookup_with_prev(region, &old_dir_inode, old_name)?.ok_or_else(|| std::io::Error::from(ErrorKind::NotFound))?;
	let old_entry = dir::resolve(region, &old_dir_inode, old_loc)?;
	let old_inr = old_entry.inr.ok_or_else(|| std::io::Error::from(ErrorKind::NotFound))?;
	let old_kind = InodeType::from_mode(old_entry_mode(region, sb, old_inr)?)?;
	let old_is_dir = old_kind == InodeType::Directory;

	let same_dir = old_dir == new_dir;
	let mut new_dir_inode = if same_dir { old_dir_inode.clone() } else { read_inode(region, sb, new_dir)? };
	require_dir(&new_dir_inode)?;

	let dotdot_loc = if old_is_dir {
		let old_child = read_inode(region, sb, old_inr)?;
		Some(dir::dotdot(region, &old_child)?)
	} else {
		None
	};

	// step 2/3: the commit.
	match dir::lookup_with_prev(region, &new_dir_inode, new_name)? {
		Some((new_loc, _)) => {
			let new_entry = dir::resolve(region, &new_dir_inode, new_loc)?;
			let new_inr = new_entry.inr.ok_or_else(|| std::io::Error::from(ErrorKind::NotFound))?;
			let mut new_inode = read_inode(region, sb, new_inr)?;

			if old_is_dir {
				require_dir(&new_inode)?;
				if !dir::is_empty(region, &new_inode)? {
					bail!(ErrorKind::NotEmpty);
				}
			}

			dir::set_link(region, &mut new_dir_inode, new_loc, old_inr, old_kind, Some(now))?;

			new_inode.link_counts = new_inode.link_counts.saturating_sub(1);
			if old_is_dir {
				new_inode.link_counts = new_inode.link_counts.saturating_sub(1);
			}
			reclaim_if_orphaned(region, sb, balloc, ialloc, arena, mapper, mapping, new_inr, new_inode, now)?;
		}
		None => {
			dir::add(region, sb, balloc, &mut new_dir_inode, new_name, old_inr, old_kind)?;
			if old_is_dir {
				new_dir_inode.link_counts += 1;
			}
		}
	}

	// step 4: unlink the source name. Idempotent in effect since the
	// entry is already reachable from `new_dir` by this point.
	let old_dir_inode_for_delete = if same_dir { &mut new_dir_inode } else { &mut old_dir_inode };
	dir::delete(region, old_dir_inode_for_delete, old_loc, old_prev)?;

	// step 5: re-point the moved directory's `..` if it changed parents.
	if old_is_dir && !same_dir {
		let mut old_child = read_inode(region, sb, old_inr)?;
		let dotdot_loc = dotdot_loc.expect("directory entries always have a `..` record");
		dir::set_link(region, &mut old_child, dotdot_loc, new_dir, InodeType::Directory, Some(now))?;
		write_inode(region, sb, old_inr, &old_child)?;
		old_dir_inode.link_counts = old_dir_inode.link_counts.saturating_sub(1);
	}

	if same_dir {
		// `new_dir_inode` is the clone that received every mutation above
		// (both directories being the same slot); `old_dir_inode` is stale
		// and must not be persisted.
		new_dir_inode.mtime = now;
		new_dir_inode.ctime = now;
		write_inode(region, sb, old_dir, &new_dir_inode)?;
	} else {
		old_dir_inode.mtime = now;
		old_dir_inode.ctime = now;
		write_inode(region, sb, old_dir, &old_dir_inode)?;
		new_dir_inode.mtime = now;
		new_dir_inode.ctime = now;
		write_inode(region, sb, new_dir, &new_dir_inode)?;
	}
	Ok(())
}

fn old_entry_mode(region: &Region, sb: &Superblock, inr: InodeNum) -> std::io::Result<u32> {
	Ok(read_inode(region, sb, inr)?.mode)
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::inode::InodeFlags;
	use crate::layout::{BlockOffset, INODE_SIZE};
	use crate::mapping::InMemoryMapper;

	fn fixture() -> (Region, Superblock, BlockAllocator, InodeAllocator, Arena, InMemoryMapper, MappingTable, InodeNum) {
		let mut region = Region::new_anonymous(16 << 20);
		let mut sb = Superblock::format(16 << 20, [0u8; 16]);

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

		let mut pprev = 0u64;
		let mut off = sb.block_start;
		for _ in 0..sb.block_count {
			region.write_at(BlockOffset(off), &pprev.to_le_bytes()).unwrap();
			pprev = off;
			off += crate::layout::BLOCK_SIZE;
		}
		sb.free_block_start = pprev;
		sb.commit(&mut region).unwrap();

		let balloc = BlockAllocator::new();
		let ialloc = InodeAllocator::new(0);
		let arena = Arena::new(0, 1 << 40);
		let mapper = InMemoryMapper::new();
		let mapping = MappingTable::new();

		let root = InodeNum::ROOT;
		let root_off = root.slot_offset(sb.inode_start());
		let mut root_inode = Inode::new(InodeType::Directory, 0o755, 0, 0, 0, 0);
		root_inode.link_counts = 2;
		region.encode_at(root_off, &root_inode).unwrap();
		dir::make_empty(&mut region, &mut sb, &balloc, &mut root_inode, root, root).unwrap();
		region.encode_at(root_off, &root_inode).unwrap();

		(region, sb, balloc, ialloc, arena, mapper, mapping, root)
	}

	#[test]
	fn create_then_unlink_restores_free_counts() {
		let (mut region, mut sb, balloc, ialloc, arena, mapper, mapping, root) = fixture();
		let free_before = sb.free_inode_count;

		let f = create(&mut region, &mut sb, &balloc, &ialloc, &arena, &mapper, &mapping, root, b"a", 0o644, 0, 0, 1).unwrap();
		assert!(dir::lookup(&region, &read_inode(&region, &sb, root).unwrap(), b"a").unwrap().is_some());

		unlink(&mut region, &mut sb, &balloc, &ialloc, &arena, &mapper, &mapping, root, b"a", 2).unwrap();
		assert_eq!(sb.free_inode_count, free_before);
		assert!(dir::lookup(&region, &read_inode(&region, &sb, root).unwrap(), b"a").unwrap().is_none());
		let _ = f;
	}

	#[test]
	fn mkdir_then_rmdir_restores_parent_link_count() {
		let (mut region, mut sb, balloc, ialloc, arena, mapper, mapping, root) = fixture();
		let before = read_inode(&region, &sb, root).unwrap().link_counts;

		mkdir(&mut region, &mut sb, &balloc, &ialloc, &arena, &mapper, &mapping, root, b"sub", 0o755, 0, 0, 1).unwrap();
		let mid = read_inode(&region, &sb, root).unwrap().link_counts;
		assert_eq!(mid, before + 1);

		rmdir(&mut region, &mut sb, &balloc, &ialloc, &arena, &mapper, &mapping, root, b"sub", 2).unwrap();
		let after = read_inode(&region, &sb, root).unwrap().link_counts;
		assert_eq!(after, before);
	}

	#[test]
	fn rename_across_directories_moves_entry() {
		let (mut region, mut sb, balloc, ialloc, arena, mapper, mapping, root) = fixture();
		mkdir(&mut region, &mut sb, &balloc, &ialloc, &arena, &mapper, &mapping, root, b"d1", 0o755, 0, 0, 1).unwrap();
		mkdir(&mut region, &mut sb, &balloc, &ialloc, &arena, &mapper, &mapping, root, b"d2", 0o755, 0, 0, 1).unwrap();

		let d1 = dir::lookup(&region, &read_inode(&region, &sb, root).unwrap(), b"d1").unwrap().unwrap();
		let d2 = dir::lookup(&region, &read_inode(&region, &sb, root).unwrap(), b"d2").unwrap().unwrap();

		create(&mut region, &mut sb, &balloc, &ialloc, &arena, &mapper, &mapping, d1, b"x", 0o644, 0, 0, 1).unwrap();

		rename(&mut region, &mut sb, &balloc, &ialloc, &arena, &mapper, &mapping, d1, b"x", d2, b"y", 5).unwrap();

		let d1_inode = read_inode(&region, &sb, d1).unwrap();
		let d2_inode = read_inode(&region, &sb, d2).unwrap();
		assert!(dir::lookup(&region, &d1_inode, b"x").unwrap().is_none());
		assert!(dir::lookup(&region, &d2_inode, b"y").unwrap().is_some());
	}

	/// spec.md §3/SPEC_FULL.md §2: a child created under a directory with
	/// inheritable flags set picks up the masked subset, never the bits
	/// `REG_FLMASK`/`OTHER_FLMASK` exclude for its own kind.
	#[test]
	fn create_inherits_masked_flags_from_parent_directory() {
		let (mut region, mut sb, balloc, ialloc, arena, mapper, mapping, root) = fixture();

		let mut root_inode = read_inode(&region, &sb, root).unwrap();
		root_inode.set_flags(InodeFlags::INHERITED | InodeFlags::NOATIME);
		write_inode(&mut region, &sb, root, &root_inode).unwrap();

		let f = create(&mut region, &mut sb, &balloc, &ialloc, &arena, &mapper, &mapping, root, b"a", 0o644, 0, 0, 1).unwrap();
		let file_inode = read_inode(&region, &sb, f).unwrap();
		assert!(file_inode.flags().contains(InodeFlags::NOATIME));
		assert!(!file_inode.flags().contains(InodeFlags::INHERITED));

		let d = mkdir(&mut region, &mut sb, &balloc, &ialloc, &arena, &mapper, &mapping, root, b"sub", 0o755, 0, 0, 1).unwrap();
		let dir_inode = read_inode(&region, &sb, d).unwrap();
		assert!(dir_inode.flags().contains(InodeFlags::NOATIME));
		assert!(dir_inode.flags().contains(InodeFlags::INHERITED));
	}
}
