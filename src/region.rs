//! The byte-addressable NVMM region (spec.md §1, §9 "On-media pointers from
//! raw offsets"): the sole owner of the backing memory, and the only thing
//! allowed to turn a [`BlockOffset`] into an actual slice of bytes.
//!
//! `rufs`'s `BlockReader`/`Decoder` pair plays the same role for a
//! block-device-backed UFS2 image: a typed wrapper around raw I/O that the
//! rest of the crate goes through instead of touching the file directly.
//! NVMM has no block device and no page cache in the data path (spec.md
//! §1), so here the wrapper is a direct memory slice rather than a buffered
//! stream — `encode_at`/`decode_at` are array indexing, not syscalls.

use bincode::config::{Configuration, Fixint, LittleEndian, NoLimit};
use bincode::{Decode, Encode};

use crate::error::bail;
use crate::layout::BlockOffset;
use crate::ErrorKind;

/// `bincode` wire format used throughout the crate: little-endian,
/// fixed-width integers, matching spec.md §3's "All integers in persistent
/// structures are little-endian."
pub type Config = Configuration<LittleEndian, Fixint, NoLimit>;

pub const fn config() -> Config {
	bincode::config::standard()
		.with_fixed_int_encoding()
		.with_little_endian()
}

/// A contiguous, byte-addressable region of non-volatile main memory.
///
/// Production builds back this with a `mmap`-ed NVMM range; tests back it
/// with an anonymous heap buffer. Either way `Region` owns the bytes: no
/// reference to NVMM content is allowed to outlive it.
pub struct Region {
	bytes: Box<[u8]>,
}

impl Region {
	/// Create a region backed by a freshly zeroed anonymous buffer, the
	/// way `rufs`'s tests build a scratch disk image in memory before
	/// formatting it.
	pub fn new_anonymous(size: u64) -> Self {
		Self {
			bytes: vec![0u8; size as usize].into_boxed_slice(),
		}
	}

	/// Wrap an already-populated buffer (e.g. one `mmap`-ed from a
	/// pmem-aware block device, or restored from a prior format call).
	pub fn from_bytes(bytes: Vec<u8>) -> Self {
		Self {
			bytes: bytes.into_boxed_slice(),
		}
	}

	pub fn len(&self) -> u64 {
		self.bytes.len() as u64
	}

	pub fn is_empty(&self) -> bool {
		self.bytes.is_empty()
	}

	fn range(&self, off: BlockOffset, len: usize) -> std::io::Result<std::ops::Range<usize>> {
		let start = off.get();
		let end = start + len as u64;
		if end > self.len() {
			bail!(ErrorKind::Invalid);
		}
		Ok((start as usize)..(end as usize))
	}

	/// Raw byte slice at `off`, `len` bytes long.
	pub fn slice(&self, off: BlockOffset, len: usize) -> std::io::Result<&[u8]> {
		let range = self.range(off, len)?;
		Ok(&self.bytes[range])
	}

	/// Raw mutable byte slice at `off`, `len` bytes long.
	pub fn slice_mut(&mut self, off: BlockOffset, len: usize) -> std::io::Result<&mut [u8]> {
		let range = self.range(off, len)?;
		Ok(&mut self.bytes[range])
	}

	/// Copy raw bytes out of the region.
	pub fn read_at(&self, off: BlockOffset, buf: &mut [u8]) -> std::io::Result<()> {
		buf.copy_from_slice(self.slice(off, buf.len())?);
		Ok(())
	}

	/// Copy raw bytes into the region.
	pub fn write_at(&mut self, off: BlockOffset, buf: &[u8]) -> std::io::Result<()> {
		self.slice_mut(off, buf.len())?.copy_from_slice(buf);
		Ok(())
	}

	/// Zero-fill `len` bytes starting at `off`.
	pub fn fill_at(&mut self, off: BlockOffset, len: usize) -> std::io::Result<()> {
		self.slice_mut(off, len)?.fill(0u8);
		Ok(())
	}

	/// Decode a fixed-size on-media record starting at `off`.
	pub fn decode_at<T: Decode>(&self, off: BlockOffset) -> std::io::Result<T> {
		let buf = self.slice(off, self.remaining(off))?;
		bincode::decode_from_slice(buf, config())
			.map(|(v, _)| v)
			.map_err(|_| std::io::Error::from(ErrorKind::Io))
	}

	/// Encode a record in place at `off`.
	pub fn encode_at<T: Encode>(&mut self, off: BlockOffset, value: &T) -> std::io::Result<()> {
		let remaining = self.remaining(off);
		let buf = self.slice_mut(off, remaining)?;
		let n = bincode::encode_into_slice(value, buf, config())
			.map_err(|_| std::io::Error::from(ErrorKind::Io))?;
		let _ = n;
		Ok(())
	}

	fn remaining(&self, off: BlockOffset) -> usize {
		(self.len() - off.get()) as usize
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn roundtrip_u64() {
		let mut r = Region::new_anonymous(4096);
		r.encode_at(BlockOffset(16), &0xdead_beefu64).unwrap();
		let v: u64 = r.decode_at(BlockOffset(16)).unwrap();
		assert_eq!(v, 0xdead_beef);
	}

	#[test]
	fn out_of_bounds_is_invalid() {
		let r = Region::new_anonymous(64);
		let e = r.decode_at::<u64>(BlockOffset(60)).unwrap_err();
		// decode_at() itself never overruns; the slice() bounds check does.
		assert!(e.raw_os_error().is_some());
	}
}
