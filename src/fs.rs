//! `Nvmm<M>`: ties every module together into one mountable filesystem
//! (spec.md §2, §4, §8 scenario S1; supplemented per SPEC_FULL.md §2's
//! format-time superblock construction and mount error policy).
//!
//! Plays the role `rufs::Ufs` plays for UFS2: owns the region, the
//! superblock, and the allocators, and exposes `format`/`mount` the way
//! `rufs::Ufs::open` opens a block device. Unlike `rufs`, there is no
//! `BlockReader` cache to warm — the region is memory, not a device.

use crate::arena::Arena;
use crate::balloc::BlockAllocator;
use crate::dir;
use crate::error::bail;
use crate::file;
use crate::ialloc::InodeAllocator;
use crate::inode::{Inode, InodeType};
use crate::layout::{BlockOffset, InodeNum, BLOCK_SIZE};
use crate::mapping::{HostMapper, MappingTable};
use crate::namei;
use crate::region::Region;
use crate::superblock::Superblock;
use crate::ErrorKind;

/// What the mount does when an operation reports [`ErrorKind::Io`]
/// (spec.md §7: "the filesystem transitions per mount option"), mirroring
/// the original source's `NVMM_MOUNT_ERRORS_*` trio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
	/// Log and keep serving requests.
	Continue,
	/// Remount read-only after the first fatal error.
	RemountReadOnly,
	/// Panic the process.
	Panic,
}

/// Parameters for [`Nvmm::format`].
#[derive(Debug, Clone)]
pub struct FormatOptions {
	/// Total size of the region to format, in bytes.
	pub total_size: u64,
	/// Volume name, truncated to 16 bytes.
	pub volume: String,
	/// Filesystem UUID. Callers that don't care may pass an all-zero one.
	pub uuid: [u8; 16],
}

/// Parameters for [`Nvmm::mount`].
#[derive(Debug, Clone, Copy)]
pub struct MountOptions {
	pub error_policy: ErrorPolicy,
}

impl Default for MountOptions {
	fn default() -> Self {
		Self { error_policy: ErrorPolicy::Continue }
	}
}

/// A mounted filesystem: the region, its superblock, the allocators, and
/// the virtual-address arena a [`HostMapper`] splices pages into.
///
/// One `Nvmm` per mount instance, matching spec.md §5's "no entity is
/// shared across mount instances."
pub struct Nvmm<M: HostMapper> {
	region: Region,
	sb: Superblock,
	balloc: BlockAllocator,
	ialloc: InodeAllocator,
	arena: Arena,
	mapper: M,
	mapping: MappingTable,
	options: MountOptions,
	read_only: bool,
}

impl<M: HostMapper> Nvmm<M> {
	/// Format a fresh region (spec.md §8 S1, SPEC_FULL.md §2's
	/// format-time superblock construction): lay out the superblock, chain
	/// every inode slot but #1 (root, never freed) onto the free-inode
	/// list, chain every data block onto the free-block list, then
	/// initialize the root directory's `.`/`..`.
	pub fn format(opts: &FormatOptions) -> std::io::Result<Region> {
		log::debug!("fs: formatting {} bytes", opts.total_size);
		let mut region = Region::new_anonymous(opts.total_size);
		let mut sb = Superblock::format(opts.total_size, opts.uuid);

		let mut volume = [0u8; 16];
		let bytes = opts.volume.as_bytes();
		let n = bytes.len().min(volume.len());
		volume[..n].copy_from_slice(&bytes[..n]);
		sb.volume = volume;

		Self::format_inode_table(&mut region, &mut sb)?;
		Self::format_block_list(&mut region, &mut sb)?;
		sb.commit(&mut region)?;

		let mut root = Self::claim_root(&mut region, &mut sb)?;
		dir::make_empty(&mut region, &mut sb, &BlockAllocator::new(), &mut root, InodeNum::ROOT, InodeNum::ROOT)?;
		Self::write_root(&mut region, &sb, &root)?;
		sb.commit(&mut region)?;

		log::debug!(
			"fs: formatted {} inodes, {} blocks, root at {}",
			sb.inode_count,
			sb.block_count,
			sb.inode_start()
		);
		Ok(region)
	}

	/// Chain every inode slot but #1 onto the free-inode list, LIFO from
	/// the highest-numbered inode down to #2, so the head ends up at #2
	/// (spec.md §8 S1: "free-inode head at inode #2's offset").
	fn format_inode_table(region: &mut Region, sb: &mut Superblock) -> std::io::Result<()> {
		if sb.inode_count == 0 {
			log::error!("fs: format: region too small to hold even one inode");
			bail!(ErrorKind::Invalid);
		}

		let root_off = InodeNum::ROOT.slot_offset(sb.inode_start());
		let root = Inode::new(InodeType::Directory, 0o755, 0, 0, 0, 0);
		region.encode_at(root_off, &root)?;

		let mut prev = 0u64;
		for raw in (2..=sb.inode_count).rev() {
			let inr = InodeNum::new(raw).expect("raw >= 2");
			let off = inr.slot_offset(sb.inode_start());
			let mut slot = Inode::new(InodeType::RegularFile, 0, 0, 0, 0, 0);
			slot.link_counts = 0;
			slot.pg_addr = prev;
			region.encode_at(off, &slot)?;
			prev = off.get();
		}

		sb.free_inode_start = prev;
		sb.free_inode_count = sb.inode_count - 1;
		Ok(())
	}

	/// Chain every data block onto the free-block list, LIFO from the
	/// last block down to the first, so the head ends up at the lowest
	/// offset (matching [`BlockAllocator`]'s test fixture convention).
	fn format_block_list(region: &mut Region, sb: &mut Superblock) -> std::io::Result<()> {
		let mut prev = 0u64;
		for i in (0..sb.block_count).rev() {
			let off = BlockOffset(sb.block_start + i * BLOCK_SIZE);
			region.encode_at(off, &prev)?;
			prev = off.get();
		}
		sb.free_block_start = prev;
		Ok(())
	}

	fn claim_root(region: &mut Region, sb: &Superblock) -> std::io::Result<Inode> {
		region.decode_at(InodeNum::ROOT.slot_offset(sb.inode_start()))
	}

	fn write_root(region: &mut Region, sb: &Superblock, root: &Inode) -> std::io::Result<()> {
		region.encode_at(InodeNum::ROOT.slot_offset(sb.inode_start()), root)
	}

	/// Mount an already-formatted region: read and validate the
	/// superblock, seed the inode-generation counter past anything
	/// already on disk, and stand up the arena the embedding host will
	/// splice mappings into.
	pub fn mount(mut region: Region, arena_base: u64, arena_limit: u64, mapper: M, options: MountOptions) -> std::io::Result<Self> {
		let sb = Superblock::read(&mut region)?;
		sb.validate()?;
		log::debug!("fs: mounted volume {:?}, {} free blocks, {} free inodes", sb.volume, sb.free_block_count, sb.free_inode_count);

		let seed_generation = Self::scan_max_generation(&region, &sb)?;
		Ok(Self {
			region,
			sb,
			balloc: BlockAllocator::new(),
			ialloc: InodeAllocator::new(seed_generation),
			arena: Arena::new(arena_base, arena_limit),
			mapper,
			mapping: MappingTable::new(),
			options,
			read_only: false,
		})
	}

	/// Seed the generation counter past the highest generation currently
	/// recorded in the inode table, so a fresh mount never repeats a
	/// generation handed out by a prior mount (SPEC_FULL.md §2's
	/// "generation numbers are never reused across mounts").
	fn scan_max_generation(region: &Region, sb: &Superblock) -> std::io::Result<u32> {
		let mut max = 0u32;
		for raw in 1..=sb.inode_count {
			let inr = InodeNum::new(raw).expect("raw >= 1");
			let slot: Inode = region.decode_at(inr.slot_offset(sb.inode_start()))?;
			max = max.max(slot.generation);
		}
		Ok(max)
	}

	pub fn superblock(&self) -> &Superblock {
		&self.sb
	}

	pub fn arena(&self) -> &Arena {
		&self.arena
	}

	pub fn mapper(&self) -> &M {
		&self.mapper
	}

	pub fn mapping(&self) -> &MappingTable {
		&self.mapping
	}

	pub fn is_read_only(&self) -> bool {
		self.read_only
	}

	pub fn read_inode(&self, inr: InodeNum) -> std::io::Result<Inode> {
		self.region.decode_at(inr.slot_offset(self.sb.inode_start()))
	}

	pub fn write_inode(&mut self, inr: InodeNum, inode: &Inode) -> std::io::Result<()> {
		self.guard_read_only()?;
		self.region.encode_at(inr.slot_offset(self.sb.inode_start()), inode)
	}

	fn guard_read_only(&self) -> std::io::Result<()> {
		if self.read_only {
			bail!(ErrorKind::Permission);
		}
		Ok(())
	}

	/// Consult [`MountOptions::error_policy`] after an operation reports
	/// [`ErrorKind::Io`] (spec.md §7's mount-option error transition).
	/// Non-fatal errors pass through unchanged.
	pub fn handle_fatal(&mut self, err: std::io::Error) -> std::io::Error {
		if err.raw_os_error() != Some(ErrorKind::Io.errno()) {
			return err;
		}
		match self.options.error_policy {
			ErrorPolicy::Continue => {
				log::error!("fs: fatal I/O error, continuing per mount policy: {err}");
			}
			ErrorPolicy::RemountReadOnly => {
				log::error!("fs: fatal I/O error, remounting read-only: {err}");
				self.read_only = true;
			}
			ErrorPolicy::Panic => {
				panic!("nvmmfs: fatal I/O error under panic mount policy: {err}");
			}
		}
		err
	}

	pub fn read(&self, inode: &Inode, offset: u64, buf: &mut [u8]) -> std::io::Result<usize> {
		file::read(&self.region, inode, offset, buf)
	}

	pub fn write(&mut self, inr: InodeNum, inode: &mut Inode, offset: u64, buf: &[u8], now: u32) -> std::io::Result<()> {
		self.guard_read_only()?;
		let result = file::write(
			&mut self.region,
			&mut self.sb,
			&self.balloc,
			&self.ialloc,
			&self.arena,
			&self.mapper,
			&self.mapping,
			inr,
			inode,
			offset,
			buf,
			now,
		);
		result.map(|_| ()).map_err(|e| self.handle_fatal(e))
	}

	pub fn lookup(&self, dir: &Inode, name: &[u8]) -> std::io::Result<Option<InodeNum>> {
		dir::lookup(&self.region, dir, name)
	}

	pub fn create(&mut self, parent: InodeNum, name: &[u8], mode_perm: u32, uid: u32, gid: u32, now: u32) -> std::io::Result<InodeNum> {
		self.guard_read_only()?;
		namei::create(&mut self.region, &mut self.sb, &self.balloc, &self.ialloc, &self.arena, &self.mapper, &self.mapping, parent, name, mode_perm, uid, gid, now)
			.map_err(|e| self.handle_fatal(e))
	}

	pub fn mkdir(&mut self, parent: InodeNum, name: &[u8], mode_perm: u32, uid: u32, gid: u32, now: u32) -> std::io::Result<InodeNum> {
		self.guard_read_only()?;
		namei::mkdir(&mut self.region, &mut self.sb, &self.balloc, &self.ialloc, &self.arena, &self.mapper, &self.mapping, parent, name, mode_perm, uid, gid, now)
			.map_err(|e| self.handle_fatal(e))
	}

	pub fn mknod(&mut self, parent: InodeNum, name: &[u8], kind: InodeType, mode_perm: u32, uid: u32, gid: u32, now: u32) -> std::io::Result<InodeNum> {
		self.guard_read_only()?;
		namei::mknod(&mut self.region, &mut self.sb, &self.balloc, &self.ialloc, &self.arena, &self.mapper, &self.mapping, parent, name, kind, mode_perm, uid, gid, now)
			.map_err(|e| self.handle_fatal(e))
	}

	pub fn symlink(&mut self, parent: InodeNum, name: &[u8], target: &[u8], uid: u32, gid: u32, now: u32) -> std::io::Result<InodeNum> {
		self.guard_read_only()?;
		namei::symlink(&mut self.region, &mut self.sb, &self.balloc, &self.ialloc, &self.arena, &self.mapper, &self.mapping, parent, name, target, uid, gid, now)
			.map_err(|e| self.handle_fatal(e))
	}

	pub fn link(&mut self, parent: InodeNum, name: &[u8], target: InodeNum, now: u32) -> std::io::Result<()> {
		self.guard_read_only()?;
		namei::link(&mut self.region, &mut self.sb, &self.balloc, &self.arena, &self.mapper, &self.mapping, parent, name, target, now).map_err(|e| self.handle_fatal(e))
	}

	pub fn tmpfile(&mut self, mode_perm: u32, uid: u32, gid: u32, now: u32) -> std::io::Result<InodeNum> {
		self.guard_read_only()?;
		namei::tmpfile(&mut self.region, &mut self.sb, &self.ialloc, &self.arena, &self.mapper, &self.mapping, mode_perm, uid, gid, now).map_err(|e| self.handle_fatal(e))
	}

	pub fn unlink(&mut self, parent: InodeNum, name: &[u8], now: u32) -> std::io::Result<()> {
		self.guard_read_only()?;
		namei::unlink(&mut self.region, &mut self.sb, &self.balloc, &self.ialloc, &self.arena, &self.mapper, &self.mapping, parent, name, now).map_err(|e| self.handle_fatal(e))
	}

	pub fn rmdir(&mut self, parent: InodeNum, name: &[u8], now: u32) -> std::io::Result<()> {
		self.guard_read_only()?;
		namei::rmdir(&mut self.region, &mut self.sb, &self.balloc, &self.ialloc, &self.arena, &self.mapper, &self.mapping, parent, name, now).map_err(|e| self.handle_fatal(e))
	}

	pub fn rename(&mut self, old_dir: InodeNum, old_name: &[u8], new_dir: InodeNum, new_name: &[u8], now: u32) -> std::io::Result<()> {
		self.guard_read_only()?;
		namei::rename(&mut self.region, &mut self.sb, &self.balloc, &self.ialloc, &self.arena, &self.mapper, &self.mapping, old_dir, old_name, new_dir, new_name, now)
			.map_err(|e| self.handle_fatal(e))
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::mapping::InMemoryMapper;

	fn format_and_mount() -> Nvmm<InMemoryMapper> {
		let opts = FormatOptions { total_size: 64 * 1024 * 1024, volume: "test".to_string(), uuid: [0u8; 16] };
		let region = Nvmm::<InMemoryMapper>::format(&opts).unwrap();
		Nvmm::mount(region, 0, 1 << 40, InMemoryMapper::new(), MountOptions::default()).unwrap()
	}

	#[test]
	fn format_matches_s1_layout() {
		let fs = format_and_mount();
		let sb = fs.superblock();
		assert_eq!(sb.free_inode_count, sb.inode_count - 1, "only root is pre-allocated");
		let expected_blocks = (64 * 1024 * 1024 - sb.block_start) / BLOCK_SIZE;
		assert_eq!(sb.block_count, expected_blocks);
	}

	#[test]
	fn root_has_dot_and_dotdot() {
		let fs = format_and_mount();
		let root = fs.read_inode(InodeNum::ROOT).unwrap();
		assert_eq!(fs.lookup(&root, b".").unwrap(), Some(InodeNum::ROOT));
		assert_eq!(fs.lookup(&root, b"..").unwrap(), Some(InodeNum::ROOT));
	}

	#[test]
	fn create_unlink_round_trip_restores_counts() {
		let mut fs = format_and_mount();
		let free_inodes_before = fs.superblock().free_inode_count;
		let free_blocks_before = fs.superblock().free_block_count;

		let inr = fs.create(InodeNum::ROOT, b"a", 0o644, 0, 0, 1).unwrap();
		let mut file = fs.read_inode(inr).unwrap();
		fs.write(inr, &mut file, 0, &[0x41u8; 4096], 2).unwrap();
		fs.write_inode(inr, &file).unwrap();

		fs.unlink(InodeNum::ROOT, b"a", 3).unwrap();

		assert_eq!(fs.superblock().free_inode_count, free_inodes_before);
		assert_eq!(fs.superblock().free_block_count, free_blocks_before);

		let root = fs.read_inode(InodeNum::ROOT).unwrap();
		assert_eq!(fs.lookup(&root, b"a").unwrap(), None);
	}

	#[test]
	fn remount_read_only_blocks_further_writes() {
		let mut fs = format_and_mount();
		let err = std::io::Error::from(ErrorKind::Io);
		let remapped = fs.handle_fatal(err);
		assert_eq!(remapped.raw_os_error(), Some(ErrorKind::Io.errno()));
		assert!(fs.is_read_only());

		let err = fs.create(InodeNum::ROOT, b"b", 0o644, 0, 0, 1).unwrap_err();
		assert_eq!(err.raw_os_error(), Some(ErrorKind::Permission.errno()));
	}
}
