//! The on-media inode slot (spec.md §3, §6: C1/C3) plus the in-core
//! attribute view callers see, the way `rufs`'s `inode.rs` turns a decoded
//! UFS2 `Inode` into `InodeAttr`/`FileAttr`.

use bincode::{Decode, Encode};

use crate::error::bail;
use crate::layout::{BlockOffset, INODE_SIZE};
use crate::ErrorKind;

/// Size of one on-media inode slot, fields + padding.
pub const INODE_WIRE_SIZE: u64 = INODE_SIZE;

bitflags::bitflags! {
	/// Inode flag bits, mirroring `original_source/nvmm_fs.h`'s `NVMM_*_FL`
	/// constants (themselves the standard ext2-family `FS_*_FL` bits).
	#[derive(Debug, Clone, Copy, PartialEq, Eq)]
	pub struct InodeFlags: u32 {
		const SECRM         = 0x0000_0001;
		const UNRM          = 0x0000_0002;
		const COMPR         = 0x0000_0004;
		const SYNC          = 0x0000_0008;
		const IMMUTABLE     = 0x0000_0010;
		const APPEND        = 0x0000_0020;
		const NODUMP        = 0x0000_0040;
		const NOATIME       = 0x0000_0080;
		const COMPRBLK      = 0x0000_0200;
		const NOCOMP        = 0x0000_0400;
		const JOURNAL_DATA  = 0x0000_4000;
		const NOTAIL        = 0x0000_8000;
		const DIRSYNC       = 0x0001_0000;
		const TOPDIR        = 0x0002_0000;
		/// `NVMM_EOFBLOCKS_FL`: set when a write path pre-allocates blocks
		/// past the current logical end of file.
		const EOF_BLOCKS    = 0x2000_0000;
	}
}

impl InodeFlags {
	/// `NVMM_FL_INHERITED`: the subset of a parent directory's flags a new
	/// child inode picks up at create time.
	pub const INHERITED: Self = Self::SECRM
		.union(Self::UNRM)
		.union(Self::COMPR)
		.union(Self::SYNC)
		.union(Self::NODUMP)
		.union(Self::NOATIME)
		.union(Self::COMPRBLK)
		.union(Self::NOCOMP)
		.union(Self::JOURNAL_DATA)
		.union(Self::NOTAIL)
		.union(Self::DIRSYNC);

	/// `NVMM_REG_FLMASK`: every flag but the directory-only ones.
	pub const REG_FLMASK: Self = Self::all().difference(Self::DIRSYNC.union(Self::TOPDIR));

	/// `NVMM_OTHER_FLMASK`: what a non-directory, non-regular-file inode
	/// (device, FIFO, socket, symlink) may carry.
	pub const OTHER_FLMASK: Self = Self::NODUMP.union(Self::NOATIME);
}

/// `nvmm_mask_flags`: the subset of `parent_flags` a new inode of `kind`
/// actually inherits (`namei.rs`'s `create`/`mkdir`/`mknod`/`symlink`).
pub fn inherit_flags(kind: InodeType, parent_flags: InodeFlags) -> InodeFlags {
	let inherited = parent_flags & InodeFlags::INHERITED;
	match kind {
		InodeType::Directory => inherited,
		InodeType::RegularFile => inherited & InodeFlags::REG_FLMASK,
		_ => inherited & InodeFlags::OTHER_FLMASK,
	}
}

/// A file kind, decoded from the on-media `mode` field's type bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeType {
	RegularFile,
	Directory,
	Symlink,
	CharDevice,
	BlockDevice,
	NamedPipe,
	Socket,
}

pub const S_IFMT: u32 = 0o170000;
pub const S_IFIFO: u32 = 0o010000;
pub const S_IFCHR: u32 = 0o020000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFBLK: u32 = 0o060000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFLNK: u32 = 0o120000;
pub const S_IFSOCK: u32 = 0o140000;

impl InodeType {
	pub fn from_mode(mode: u32) -> std::io::Result<Self> {
		Ok(match mode & S_IFMT {
			S_IFIFO => Self::NamedPipe,
			S_IFCHR => Self::CharDevice,
			S_IFDIR => Self::Directory,
			S_IFBLK => Self::BlockDevice,
			S_IFREG => Self::RegularFile,
			S_IFLNK => Self::Symlink,
			S_IFSOCK => Self::Socket,
			m => {
				log::error!("invalid file mode: {m:o}");
				bail!(ErrorKind::Io);
			}
		})
	}

	pub fn mode_bits(self) -> u32 {
		match self {
			Self::NamedPipe => S_IFIFO,
			Self::CharDevice => S_IFCHR,
			Self::Directory => S_IFDIR,
			Self::BlockDevice => S_IFBLK,
			Self::RegularFile => S_IFREG,
			Self::Symlink => S_IFLNK,
			Self::Socket => S_IFSOCK,
		}
	}

	/// Whether this kind is backed by a translation tree at all (a
	/// symlink with a short target stored inline has none).
	pub fn has_blocks(self) -> bool {
		!matches!(self, Self::CharDevice | Self::BlockDevice | Self::NamedPipe | Self::Socket)
	}
}

/// The on-media inode slot.
///
/// When the slot is free, `pg_addr` is repurposed to hold the offset of
/// the next free inode (spec.md §3's "Free lists" invariant) and `link_counts`
/// is 0; `next_inode_offset` is a distinct on-media field, carried for
/// byte-exact layout parity with `original_source/nvmm_fs.h` but unused by
/// this engine's free-list walk, which goes entirely through `pg_addr`.
#[derive(Debug, Clone, Encode, Decode)]
pub struct Inode {
	pub checksum: u32,
	pub mode: u32,
	pub link_counts: u32,
	pub bytes_in_last_block: u32,
	pub blocks: u64,
	pub flags: u32,
	pub file_acl: u32,
	pub dir_acl: u32,
	pub size: u64,
	pub atime: u32,
	pub ctime: u32,
	pub mtime: u32,
	pub dtime: u32,
	pub uid: u32,
	pub gid: u32,
	pub generation: u32,
	/// Root of this inode's translation tree, or 0 if it has no blocks
	/// yet. Overloaded as the free-list "next" pointer while this slot is
	/// free.
	pub pg_addr: u64,
	pub next_inode_offset: u64,
	pub pad: [u8; 40],
}

impl Inode {
	/// A freshly allocated, otherwise-empty inode of the given kind.
	pub fn new(kind: InodeType, mode_perm: u32, uid: u32, gid: u32, generation: u32, now: u32) -> Self {
		Self {
			checksum: 0,
			mode: kind.mode_bits() | (mode_perm & 0o7777),
			link_counts: 1,
			bytes_in_last_block: 0,
			blocks: 0,
			flags: 0,
			file_acl: 0,
			dir_acl: 0,
			size: 0,
			atime: now,
			ctime: now,
			mtime: now,
			dtime: 0,
			uid,
			gid,
			generation,
			pg_addr: 0,
			next_inode_offset: 0,
			pad: [0u8; 40],
		}
	}

	pub fn kind(&self) -> std::io::Result<InodeType> {
		InodeType::from_mode(self.mode)
	}

	pub fn perm(&self) -> u32 {
		self.mode & 0o7777
	}

	pub fn tree_root(&self) -> Option<BlockOffset> {
		if self.pg_addr == 0 {
			None
		} else {
			Some(BlockOffset(self.pg_addr))
		}
	}

	pub fn set_tree_root(&mut self, off: Option<BlockOffset>) {
		self.pg_addr = off.map(BlockOffset::get).unwrap_or(0);
	}

	pub fn flags(&self) -> InodeFlags {
		InodeFlags::from_bits_retain(self.flags)
	}

	pub fn set_flags(&mut self, flags: InodeFlags) {
		self.flags = flags.bits();
	}
}

/// Cheap read-only attribute view, analogous to `rufs::InodeAttr` /
/// POSIX `struct stat`.
#[derive(Debug, Clone, Copy)]
pub struct InodeAttr {
	pub perm: u32,
	pub kind: InodeType,
	pub size: u64,
	pub blocks: u64,
	pub atime: u32,
	pub mtime: u32,
	pub ctime: u32,
	pub nlink: u32,
	pub uid: u32,
	pub gid: u32,
	pub generation: u32,
	pub flags: InodeFlags,
}

impl Inode {
	pub fn as_attr(&self) -> std::io::Result<InodeAttr> {
		Ok(InodeAttr {
			perm: self.perm(),
			kind: self.kind()?,
			size: self.size,
			blocks: self.blocks,
			atime: self.atime,
			mtime: self.mtime,
			ctime: self.ctime,
			nlink: self.link_counts,
			uid: self.uid,
			gid: self.gid,
			generation: self.generation,
			flags: self.flags(),
		})
	}
}
