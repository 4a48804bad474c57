//! On-media constants, typed addresses, and checksums (spec.md §1, §6: C1).
//!
//! Mirrors the role `rufs`'s `data.rs` plays for UFS2: every byte offset and
//! magic number the on-media format defines lives here, so the rest of the
//! crate never hard-codes a layout constant.

use std::fmt;
use std::num::NonZeroU64;

/// Size of a block/page. Fixed per spec.md §3.
pub const BLOCK_SIZE: u64 = 4096;

/// Unit `Inode::blocks` is reported in, independent of [`BLOCK_SIZE`] —
/// the usual `st_blocks`/512 convention.
pub const STAT_BLKSIZE: u64 = 512;

/// Size of one on-media inode slot.
pub const INODE_SIZE: u64 = 128;

/// `log2(INODE_SIZE)`, used by implementers that shift instead of multiply.
pub const INODE_SIZE_SHIFT: u32 = 7;

/// Number of 8-byte entries in one translation-tree page (512 * 8 = 4096).
pub const ENTRIES_PER_LEVEL: usize = 512;

/// Number of index bits consumed per translation-tree level.
pub const LEVEL_BITS: u32 = 9;

/// Mask for one level's 9-bit index.
pub const LEVEL_MASK: u64 = (1 << LEVEL_BITS) - 1;

/// Number of bits of a file offset that address a byte within a block.
pub const BYTE_BITS: u32 = 12;

/// Inode number of the filesystem root. Reserved, never allocated/freed.
pub const ROOT_INO: u32 = 1;

/// On-media magic number (spec.md §6).
pub const MAGIC: u16 = 0xEFFB;

/// Maximum length of a directory entry name, in bytes.
pub const MAX_NAME_LEN: usize = 255;

/// Header size of one directory record: inode(8) + rec_len(2) + name_len(1)
/// + file_type(1). spec.md §9 resolves the historical 8-vs-12-byte header
/// ambiguity in the original source in favor of 12.
pub const DIR_REC_HEADER_LEN: u16 = 12;

/// Directories are packed into pages of this size.
pub const DIRBLKSIZE: usize = BLOCK_SIZE as usize;

/// Hard cap on a directory's total size (spec.md §4.8).
pub const MAX_DIR_SIZE: u64 = 1 << 21;

/// Hard cap on a regular file's size: one full 4-level translation tree
/// (512^4 * 4096 bytes), matching the 32 GiB file window spec.md §4.5
/// reserves per open regular file.
pub const MAX_FILE_SIZE: u64 = 32 * 1024 * 1024 * 1024;

/// Size of the directory virtual-address window (spec.md §4.5).
pub const DIR_WINDOW_SIZE: u64 = 2 * 1024 * 1024;

/// Size of the regular-file virtual-address window (spec.md §4.5).
pub const FILE_WINDOW_SIZE: u64 = 32u64 * 1024 * 1024 * 1024;

/// Round `len` of 4-aligned directory record length.
pub const fn dir_rec_len(name_len: usize) -> u16 {
	let raw = DIR_REC_HEADER_LEN as usize + name_len;
	((raw + 3) & !3) as u16
}

/// An offset relative to the start of the NVMM region.
///
/// Never let a raw `u64` stand in for a region-relative address: the
/// region-mapping object ([`crate::region::Region`]) is the only thing
/// allowed to turn this into an actual memory access, so a `BlockOffset`
/// can outlive the region it names without becoming a dangling reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockOffset(pub u64);

impl BlockOffset {
	pub const NULL: Self = Self(0);

	pub fn is_null(self) -> bool {
		self.0 == 0
	}

	pub fn get(self) -> u64 {
		self.0
	}

	pub fn checked(self) -> Option<NonZeroU64> {
		NonZeroU64::new(self.0)
	}
}

impl fmt::Display for BlockOffset {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:#x}", self.0)
	}
}

/// An inode number. Inode #0 never exists; #1 (`ROOT_INO`) is the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InodeNum(NonZeroU64);

impl InodeNum {
	pub const ROOT: Self = match NonZeroU64::new(ROOT_INO as u64) {
		Some(n) => Self(n),
		None => unreachable!(),
	};

	/// Construct from a raw inode number. Panics on 0; callers only ever
	/// hand this numbers pulled off the inode table or the free list,
	/// never arbitrary caller-provided values (those go through `new`).
	pub fn new(n: u64) -> Option<Self> {
		NonZeroU64::new(n).map(Self)
	}

	pub fn get(self) -> u64 {
		self.0.get()
	}

	/// Physical offset of this inode's slot within the inode array.
	pub fn slot_offset(self, inode_start: BlockOffset) -> BlockOffset {
		BlockOffset(inode_start.get() + (self.get() - 1) * INODE_SIZE)
	}
}

impl fmt::Display for InodeNum {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

/// The four levels of the per-file translation tree, outermost first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
	/// `PGD`-equivalent: root of the tree, covers the whole 32 GiB file.
	Pgd,
	/// `PUD`-equivalent: covers 256K pages (1 GiB).
	Pud,
	/// `PMD`-equivalent: covers 512 pages (2 MiB).
	Pmd,
	/// `PTE`-equivalent: one data page.
	Pte,
}

impl Level {
	/// All four levels, outermost (root) first.
	pub const ALL: [Level; 4] = [Level::Pgd, Level::Pud, Level::Pmd, Level::Pte];

	/// Number of pages one entry at this level covers.
	pub const fn page_span(self) -> u64 {
		match self {
			Level::Pte => 1,
			Level::Pmd => ENTRIES_PER_LEVEL as u64,
			Level::Pud => (ENTRIES_PER_LEVEL * ENTRIES_PER_LEVEL) as u64,
			Level::Pgd => (ENTRIES_PER_LEVEL * ENTRIES_PER_LEVEL * ENTRIES_PER_LEVEL) as u64,
		}
	}

	/// Index mask used by §4.7 step 1 to decide the update granularity:
	/// PTE=0x1, PMD=0x1FF, PUD=0x3FFFF, PGD=0x7FFFFFF (in page units, not
	/// counting the 12 in-page bits).
	pub const fn span_mask(self) -> u64 {
		self.page_span() - 1
	}

	/// Depth of this level in the tree, root = 0.
	pub const fn depth(self) -> usize {
		match self {
			Level::Pgd => 0,
			Level::Pud => 1,
			Level::Pmd => 2,
			Level::Pte => 3,
		}
	}

	/// Inverse of [`Level::depth`].
	pub const fn at_depth(depth: usize) -> Self {
		match depth {
			0 => Level::Pgd,
			1 => Level::Pud,
			2 => Level::Pmd,
			3 => Level::Pte,
			_ => unreachable!(),
		}
	}
}

/// Split a file-block index into its four 9-bit translation-tree indices,
/// outermost first (spec.md §3: `[level0:9][level1:9][level2:9][level3:9]`).
pub fn split_index(blkidx: u64) -> [usize; 4] {
	[
		((blkidx >> 27) & LEVEL_MASK) as usize,
		((blkidx >> 18) & LEVEL_MASK) as usize,
		((blkidx >> 9) & LEVEL_MASK) as usize,
		(blkidx & LEVEL_MASK) as usize,
	]
}

/// Compute the CRC-32 used to self-checksum a fixed-size on-media record:
/// everything from `size_of::<u32>()` to the end of `bytes`, per spec.md
/// §4.1. The first 4 bytes (where the checksum itself is stored) are never
/// included in the computation.
pub fn crc32(bytes: &[u8]) -> u32 {
	crc32fast::hash(&bytes[4..])
}
