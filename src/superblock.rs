//! The on-media superblock (spec.md §3, §4.1, §6: C1) and its redundant
//! copy, the way `rufs`'s `Superblock`/`check()` validate a UFS2 superblock
//! and its per-cylinder-group copies — except here there is exactly one
//! redundant copy, not one per cylinder group.

use bincode::{Decode, Encode};

use crate::error::bail;
use crate::layout::{crc32, BlockOffset, BLOCK_SIZE, INODE_SIZE, MAGIC};
use crate::region::Region;
use crate::ErrorKind;

/// Wire size of one [`Superblock`] copy: fields sum to 158 bytes per
/// spec.md §6's field-offset table. The table's prose ("first 144 bytes")
/// and its own offsets disagree (the last field, `uuid`, ends at byte
/// 158); DESIGN.md resolves this in favor of the offsets, which are
/// byte-exact by construction here since the struct is declared in the
/// same order.
pub const SUPERBLOCK_WIRE_SIZE: u64 = 158;

/// Offset of the redundant copy within the superblock page, 8-byte aligned
/// just past the primary copy.
pub const REDUNDANT_SB_OFFSET: u64 = 160;

/// The on-media superblock.
#[derive(Debug, Clone, Encode, Decode)]
pub struct Superblock {
	/// CRC-32 of every field below this one.
	pub checksum: u32,
	/// Block size; fixed at [`BLOCK_SIZE`], stored anyway so readers can
	/// detect a region formatted with an incompatible build.
	pub block_size: u32,
	/// Inode slot size; fixed at [`INODE_SIZE`].
	pub inode_size: u32,
	/// Total region size in bytes.
	pub total_size: u64,
	/// Total number of inode slots.
	pub inode_count: u64,
	/// Number of inode slots currently on the free list.
	pub free_inode_count: u64,
	/// Byte offset of the first inode slot.
	pub inode_start: u64,
	/// Total number of data blocks.
	pub block_count: u64,
	/// Number of data blocks currently on the free list.
	pub free_block_count: u64,
	/// Head of the free-inode list, or 0 if empty.
	pub free_inode_start: u64,
	/// Next-free-inode search hint (unused by the LIFO allocator, carried
	/// for on-media compatibility with the layout original_source defines).
	pub free_inode_hint: u64,
	/// Next-free-block search hint (ditto).
	pub free_blocknr_hint: u64,
	/// Byte offset of the start of the data area.
	pub block_start: u64,
	/// Head of the free-block list, or 0 if empty.
	pub free_block_start: u64,
	/// Last mount time (seconds since epoch).
	pub mtime: u32,
	/// Last write time (seconds since epoch).
	pub wtime: u32,
	/// Magic number, must equal [`MAGIC`].
	pub magic: u16,
	/// Volume name, NUL-padded.
	pub volume: [u8; 16],
	/// Filesystem version string, NUL-padded.
	pub fs_version: [u8; 16],
	/// Filesystem UUID.
	pub uuid: [u8; 16],
}

impl Superblock {
	/// Build a fresh superblock for a region of `total_size` bytes,
	/// following the S1 end-to-end scenario's layout formula.
	pub fn format(total_size: u64, uuid: [u8; 16]) -> Self {
		let sb_page = BLOCK_SIZE;
		// num_inodes chosen so that (inode bytes + data bytes) fits, at
		// roughly one inode per 12800 bytes of region, per spec.md §8 S1.
		let inode_count = total_size / 12800;
		let inode_bytes = inode_count * INODE_SIZE;
		let inode_start = sb_page;
		let block_start = inode_start + inode_bytes;
		let block_count = (total_size - block_start) / BLOCK_SIZE;

		Self {
			checksum: 0,
			block_size: BLOCK_SIZE as u32,
			inode_size: INODE_SIZE as u32,
			total_size,
			inode_count,
			free_inode_count: inode_count,
			inode_start,
			block_count,
			free_block_count: block_count,
			free_inode_start: 0,
			free_inode_hint: 0,
			free_blocknr_hint: 0,
			block_start,
			free_block_start: 0,
			mtime: 0,
			wtime: 0,
			magic: MAGIC,
			volume: [0u8; 16],
			fs_version: [0u8; 16],
			uuid,
		}
	}

	pub fn inode_start(&self) -> BlockOffset {
		BlockOffset(self.inode_start)
	}

	pub fn block_start(&self) -> BlockOffset {
		BlockOffset(self.block_start)
	}

	pub fn free_inode_head(&self) -> BlockOffset {
		BlockOffset(self.free_inode_start)
	}

	pub fn free_block_head(&self) -> BlockOffset {
		BlockOffset(self.free_block_start)
	}

	/// Validate the invariants spec.md §3 lists for the superblock.
	pub fn validate(&self) -> std::io::Result<()> {
		if self.magic != MAGIC {
			log::error!("superblock: bad magic {:#x}", self.magic);
			bail!(ErrorKind::Io);
		}
		if self.block_size as u64 != BLOCK_SIZE || self.inode_size as u64 != INODE_SIZE {
			log::error!("superblock: unsupported block/inode size");
			bail!(ErrorKind::Io);
		}
		if self.free_inode_count > self.inode_count || self.free_block_count > self.block_count {
			log::error!("superblock: free count exceeds total count");
			bail!(ErrorKind::Io);
		}
		Ok(())
	}

	/// Write both copies: primary, then checksum, then the redundant
	/// mirror, matching spec.md §4.1's required write sequence.
	pub fn commit(&mut self, region: &mut Region) -> std::io::Result<()> {
		self.checksum = 0;
		region.encode_at(BlockOffset(0), &*self)?;
		let bytes = region.slice(BlockOffset(0), SUPERBLOCK_WIRE_SIZE as usize)?;
		let sum = crc32(bytes);
		self.checksum = sum;
		region.encode_at(BlockOffset(0), &*self)?;

		let primary = region
			.slice(BlockOffset(0), SUPERBLOCK_WIRE_SIZE as usize)?
			.to_vec();
		region.write_at(BlockOffset(REDUNDANT_SB_OFFSET), &primary)?;
		Ok(())
	}

	/// Read the superblock, preferring the first copy whose checksum
	/// verifies; if only the second verifies, restore the first
	/// (spec.md §4.1).
	pub fn read(region: &mut Region) -> std::io::Result<Self> {
		let primary_ok = Self::verify_copy(region, BlockOffset(0))?;
		if primary_ok {
			return region.decode_at(BlockOffset(0));
		}

		let redundant_ok = Self::verify_copy(region, BlockOffset(REDUNDANT_SB_OFFSET))?;
		if !redundant_ok {
			log::error!("superblock: both copies fail checksum");
			bail!(ErrorKind::Io);
		}

		log::warn!("superblock: primary copy corrupt, restoring from redundant copy");
		let bytes = region
			.slice(BlockOffset(REDUNDANT_SB_OFFSET), SUPERBLOCK_WIRE_SIZE as usize)?
			.to_vec();
		region.write_at(BlockOffset(0), &bytes)?;
		region.decode_at(BlockOffset(0))
	}

	fn verify_copy(region: &Region, off: BlockOffset) -> std::io::Result<bool> {
		if off.get() + SUPERBLOCK_WIRE_SIZE > region.len() {
			return Ok(false);
		}
		let bytes = region.slice(off, SUPERBLOCK_WIRE_SIZE as usize)?;
		let sb: Superblock = match bincode::decode_from_slice(bytes, crate::region::config()) {
			Ok((sb, _)) => sb,
			Err(_) => return Ok(false),
		};
		Ok(sb.checksum == crc32(bytes))
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn format_s1_layout() {
		let sb = Superblock::format(64 * 1024 * 1024, [0u8; 16]);
		assert!(sb.inode_count > 0);
		assert_eq!(sb.free_inode_count, sb.inode_count);
		let expected_blocks = (64 * 1024 * 1024 - sb.block_start) / BLOCK_SIZE;
		assert_eq!(sb.block_count, expected_blocks);
		assert_eq!(sb.free_block_count, expected_blocks);
	}

	#[test]
	fn commit_and_read_roundtrip() {
		let mut region = Region::new_anonymous(1 << 20);
		let mut sb = Superblock::format(1 << 20, [7u8; 16]);
		sb.commit(&mut region).unwrap();
		let read = Superblock::read(&mut region).unwrap();
		assert_eq!(read.inode_count, sb.inode_count);
		assert_eq!(read.magic, MAGIC);
	}

	#[test]
	fn corrupt_primary_restores_from_redundant() {
		let mut region = Region::new_anonymous(1 << 20);
		let mut sb = Superblock::format(1 << 20, [1u8; 16]);
		sb.commit(&mut region).unwrap();
		region.fill_at(BlockOffset(4), 4).unwrap(); // clobber block_size field
		let read = Superblock::read(&mut region).unwrap();
		assert_eq!(read.block_size as u64, BLOCK_SIZE);
		// primary should now have been repaired in place
		let primary: Superblock = region.decode_at(BlockOffset(0)).unwrap();
		assert_eq!(primary.block_size as u64, BLOCK_SIZE);
	}
}
