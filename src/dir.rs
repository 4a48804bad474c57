//! Directory record format and page-level operations (spec.md §4.8: C8).
//!
//! Plays the role `rufs`'s `Header::parse`/`Header::write` and
//! `readdir_block`/`unlink_block` play for UFS2 directory blocks
//! (`rufs/src/ufs/dir.rs`), adapted to this format's 12-byte record header
//! and to a page-locking discipline instead of a whole-block codec pass:
//! directory mutations here write straight into an already-mapped page
//! rather than going through [`crate::file`]'s copy-on-write path, since
//! spec.md §4.8 defines `set_link`/`delete` as single in-place stores under
//! a host page lock, not a shadow-and-swap.

use crate::balloc::BlockAllocator;
use crate::error::bail;
use crate::inode::{Inode, InodeType};
use crate::layout::{dir_rec_len, BlockOffset, InodeNum, BLOCK_SIZE, DIRBLKSIZE, DIR_REC_HEADER_LEN, MAX_DIR_SIZE, MAX_NAME_LEN, STAT_BLKSIZE};
use crate::region::Region;
use crate::superblock::Superblock;
use crate::tree;
use crate::ErrorKind;

/// File-type codes carried in a directory record (spec.md §6).
pub const DT_UNKNOWN: u8 = 0;
pub const DT_REG: u8 = 1;
pub const DT_DIR: u8 = 2;
pub const DT_CHR: u8 = 3;
pub const DT_BLK: u8 = 4;
pub const DT_FIFO: u8 = 5;
pub const DT_SOCK: u8 = 6;
pub const DT_LNK: u8 = 7;

pub fn file_type_of(kind: InodeType) -> u8 {
	match kind {
		InodeType::RegularFile => DT_REG,
		InodeType::Directory => DT_DIR,
		InodeType::CharDevice => DT_CHR,
		InodeType::BlockDevice => DT_BLK,
		InodeType::NamedPipe => DT_FIFO,
		InodeType::Socket => DT_SOCK,
		InodeType::Symlink => DT_LNK,
	}
}

/// Location of one directory record: which page, and the byte offset of
/// its header within that page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLoc {
	pub blkidx: u64,
	pub pos: usize,
}

/// One parsed directory record.
#[derive(Debug, Clone)]
pub struct DirEntry {
	pub inr: Option<InodeNum>,
	pub rec_len: u16,
	pub file_type: u8,
	pub name: Vec<u8>,
}

impl DirEntry {
	fn actual_len(&self) -> u16 {
		dir_rec_len(self.name.len())
	}
}

fn parse_record(page: &[u8], pos: usize) -> std::io::Result<DirEntry> {
	let header = &page[pos..pos + DIR_REC_HEADER_LEN as usize];
	let raw_inr = u64::from_le_bytes(header[0..8].try_into().unwrap());
	let rec_len = u16::from_le_bytes(header[8..10].try_into().unwrap());
	let name_len = header[10] as usize;
	let file_type = header[11];

	if rec_len == 0 {
		log::error!("dir: rec_len == 0 at page offset {pos}, corrupt directory");
		bail!(ErrorKind::Io);
	}
	if name_len > MAX_NAME_LEN {
		log::error!("dir: name_len {name_len} exceeds maximum at page offset {pos}");
		bail!(ErrorKind::Io);
	}

	let name_start = pos + DIR_REC_HEADER_LEN as usize;
	let name = page[name_start..name_start + name_len].to_vec();

	Ok(DirEntry {
		inr: InodeNum::new(raw_inr),
		rec_len,
		file_type,
		name,
	})
}

fn write_record(page: &mut [u8], pos: usize, entry: &DirEntry) {
	let raw_inr = entry.inr.map(InodeNum::get).unwrap_or(0);
	page[pos..pos + 8].copy_from_slice(&raw_inr.to_le_bytes());
	page[pos + 8..pos + 10].copy_from_slice(&entry.rec_len.to_le_bytes());
	page[pos + 10] = entry.name.len() as u8;
	page[pos + 11] = entry.file_type;
	let name_start = pos + DIR_REC_HEADER_LEN as usize;
	page[name_start..name_start + entry.name.len()].copy_from_slice(&entry.name);
}

/// Overwrite just the 8-byte inode field of a record, the single aligned
/// store spec.md §4.8's `set_link` calls for.
fn write_inr(page: &mut [u8], pos: usize, inr: Option<InodeNum>) {
	let raw = inr.map(InodeNum::get).unwrap_or(0);
	page[pos..pos + 8].copy_from_slice(&raw.to_le_bytes());
}

fn page_count(inode: &Inode) -> u64 {
	inode.size / DIRBLKSIZE as u64
}

fn read_page(region: &Region, root: BlockOffset, blkidx: u64) -> std::io::Result<[u8; DIRBLKSIZE]> {
	let data = tree::lookup(region, root, blkidx)?.ok_or_else(|| {
		log::error!("dir: expected page {blkidx} missing from tree");
		std::io::Error::from(ErrorKind::Io)
	})?;
	let mut buf = [0u8; DIRBLKSIZE];
	region.read_at(data, &mut buf)?;
	Ok(buf)
}

fn write_page(region: &mut Region, root: BlockOffset, blkidx: u64, buf: &[u8; DIRBLKSIZE]) -> std::io::Result<()> {
	let data = tree::lookup(region, root, blkidx)?.ok_or_else(|| std::io::Error::from(ErrorKind::Io))?;
	region.write_at(data, buf)
}

/// Find `name` in the directory, without its preceding record.
pub fn lookup(region: &Region, inode: &Inode, name: &[u8]) -> std::io::Result<Option<InodeNum>> {
	match lookup_with_prev(region, inode, name)? {
		Some((loc, _)) => Ok(resolve(region, inode, loc)?.inr),
		None => Ok(None),
	}
}

/// Find `name`, returning its location and the location of the record
/// immediately preceding it in the same page (`None` if it is the first
/// record of its page).
pub fn lookup_with_prev(region: &Region, inode: &Inode, name: &[u8]) -> std::io::Result<Option<(RecordLoc, Option<RecordLoc>)>> {
	let Some(root) = inode.tree_root() else {
		return Ok(None);
	};

	for blkidx in 0..page_count(inode) {
		let page = read_page(region, root, blkidx)?;
		let mut pos = 0usize;
		let mut prev: Option<usize> = None;

		while pos < DIRBLKSIZE {
			let rec = parse_record(&page, pos)?;
			if rec.inr.is_some() && rec.name == name {
				let prev_loc = prev.map(|p| RecordLoc { blkidx, pos: p });
				return Ok(Some((RecordLoc { blkidx, pos }, prev_loc)));
			}
			prev = Some(pos);
			pos += rec.rec_len as usize;
		}
	}

	Ok(None)
}

/// Resolve a [`RecordLoc`] back into the record it names.
pub fn resolve(region: &Region, inode: &Inode, loc: RecordLoc) -> std::io::Result<DirEntry> {
	let root = inode.tree_root().ok_or_else(|| std::io::Error::from(ErrorKind::Io))?;
	let page = read_page(region, root, loc.blkidx)?;
	parse_record(&page, loc.pos)
}

/// Add a new entry, splitting a tombstone or an over-long live record to
/// make room, or allocating a fresh page if nothing fits.
pub fn add(region: &mut Region, sb: &mut Superblock, balloc: &BlockAllocator, inode: &mut Inode, name: &[u8], target: InodeNum, kind: InodeType) -> std::io::Result<()> {
	if name.len() > MAX_NAME_LEN {
		bail!(ErrorKind::NameTooLong);
	}
	if lookup(region, inode, name)?.is_some() {
		bail!(ErrorKind::Exists);
	}
	let needed = dir_rec_len(name.len());
	let new_entry = DirEntry {
		inr: Some(target),
		rec_len: needed,
		file_type: file_type_of(kind),
		name: name.to_vec(),
	};

	let mut root = inode.tree_root();
	if let Some(root_off) = root {
		for blkidx in 0..page_count(inode) {
			let mut page = read_page(region, root_off, blkidx)?;
			if try_fit(&mut page, &new_entry)? {
				write_page(region, root_off, blkidx, &page)?;
				return Ok(());
			}
		}
	}

	if inode.size + DIRBLKSIZE as u64 > MAX_DIR_SIZE {
		log::warn!("dir: directory would exceed the {MAX_DIR_SIZE}-byte size cap");
		bail!(ErrorKind::NoSpace);
	}

	let blkidx = page_count(inode);
	let (pte_page, idx) = tree::ensure_path(region, sb, balloc, &mut root, blkidx)?;
	let data = balloc.alloc(region, sb)?;
	tree::commit_entry(region, pte_page, idx, Some(data))?;
	inode.set_tree_root(root);
	inode.size += DIRBLKSIZE as u64;
	inode.blocks += BLOCK_SIZE / STAT_BLKSIZE;

	let mut page = [0u8; DIRBLKSIZE];
	let placeholder = DirEntry { inr: None, rec_len: DIRBLKSIZE as u16, file_type: DT_UNKNOWN, name: Vec::new() };
	write_record(&mut page, 0, &placeholder);
	let fit = try_fit(&mut page, &new_entry)?;
	debug_assert!(fit, "a fresh empty page must always fit one new record");
	write_page(region, root.unwrap(), blkidx, &page)
}

/// Try to place `new_entry` somewhere in `page`, mutating it in place.
/// Returns whether it fit.
fn try_fit(page: &mut [u8; DIRBLKSIZE], new_entry: &DirEntry) -> std::io::Result<bool> {
	let needed = new_entry.rec_len;
	let mut pos = 0usize;

	while pos < DIRBLKSIZE {
		let rec = parse_record(page, pos)?;

		if rec.inr.is_none() && rec.rec_len >= needed {
			let mut placed = new_entry.clone();
			placed.rec_len = rec.rec_len;
			write_record(page, pos, &placed);
			return Ok(true);
		}

		if rec.inr.is_some() {
			let actual = rec.actual_len();
			if rec.rec_len.saturating_sub(actual) >= needed {
				let mut shrunk = rec.clone();
				shrunk.rec_len = actual;
				write_record(page, pos, &shrunk);

				let mut placed = new_entry.clone();
				placed.rec_len = rec.rec_len - actual;
				write_record(page, pos + actual as usize, &placed);
				return Ok(true);
			}
		}

		pos += rec.rec_len as usize;
	}

	Ok(false)
}

/// Tombstone `loc`, coalescing it into `prev` if given. A record at the
/// start of its page (`prev.is_none()`) stays as a standalone tombstone.
pub fn delete(region: &mut Region, inode: &Inode, loc: RecordLoc, prev: Option<RecordLoc>) -> std::io::Result<()> {
	let root = inode.tree_root().ok_or_else(|| std::io::Error::from(ErrorKind::Io))?;
	let mut page = read_page(region, root, loc.blkidx)?;

	let rec = parse_record(&page, loc.pos)?;
	write_inr(&mut page, loc.pos, None);

	if let Some(prev) = prev {
		debug_assert_eq!(prev.blkidx, loc.blkidx, "prev must be in the same page");
		let mut prev_rec = parse_record(&page, prev.pos)?;
		prev_rec.rec_len += rec.rec_len;
		write_record(&mut page, prev.pos, &prev_rec);
	}

	write_page(region, root, loc.blkidx, &page)
}

/// Overwrite a record's target inode and file-type in place (spec.md
/// §4.8's atomic `set_link`).
pub fn set_link(region: &mut Region, inode: &mut Inode, loc: RecordLoc, new_inode: InodeNum, kind: InodeType, now: Option<u32>) -> std::io::Result<()> {
	let root = inode.tree_root().ok_or_else(|| std::io::Error::from(ErrorKind::Io))?;
	let mut page = read_page(region, root, loc.blkidx)?;
	write_inr(&mut page, loc.pos, Some(new_inode));
	page[loc.pos + 11] = file_type_of(kind);
	write_page(region, root, loc.blkidx, &page)?;

	if let Some(now) = now {
		inode.mtime = now;
		inode.ctime = now;
	}
	Ok(())
}

/// Allocate the first page of a brand-new directory and populate it with
/// `.` and `..` (spec.md §4.8 `make_empty`).
pub fn make_empty(region: &mut Region, sb: &mut Superblock, balloc: &BlockAllocator, inode: &mut Inode, self_inr: InodeNum, parent_inr: InodeNum) -> std::io::Result<()> {
	let mut root = None;
	let (pte_page, idx) = tree::ensure_path(region, sb, balloc, &mut root, 0)?;
	let data = balloc.alloc(region, sb)?;
	tree::commit_entry(region, pte_page, idx, Some(data))?;
	inode.set_tree_root(root);
	inode.size = DIRBLKSIZE as u64;
	inode.blocks = BLOCK_SIZE / STAT_BLKSIZE;

	let mut page = [0u8; DIRBLKSIZE];
	let dot_len = dir_rec_len(1);
	write_record(
		&mut page,
		0,
		&DirEntry { inr: Some(self_inr), rec_len: dot_len, file_type: DT_DIR, name: b".".to_vec() },
	);
	write_record(
		&mut page,
		dot_len as usize,
		&DirEntry {
			inr: Some(parent_inr),
			rec_len: DIRBLKSIZE as u16 - dot_len,
			file_type: DT_DIR,
			name: b"..".to_vec(),
		},
	);
	write_page(region, root.unwrap(), 0, &page)
}

/// Whether the directory contains nothing besides `.` and `..`.
pub fn is_empty(region: &Region, inode: &Inode) -> std::io::Result<bool> {
	let Some(root) = inode.tree_root() else {
		return Ok(true);
	};

	for blkidx in 0..page_count(inode) {
		let page = read_page(region, root, blkidx)?;
		let mut pos = 0usize;
		while pos < DIRBLKSIZE {
			let rec = parse_record(&page, pos)?;
			if rec.inr.is_some() && rec.name != b"." && rec.name != b".." {
				return Ok(false);
			}
			pos += rec.rec_len as usize;
		}
	}
	Ok(true)
}

/// Location of the `..` record: always the second record of the first
/// page, written there by [`make_empty`].
pub fn dotdot(region: &Region, inode: &Inode) -> std::io::Result<RecordLoc> {
	let root = inode.tree_root().ok_or_else(|| std::io::Error::from(ErrorKind::Io))?;
	let page = read_page(region, root, 0)?;
	let dot = parse_record(&page, 0)?;
	let pos = dot.rec_len as usize;
	let _ = parse_record(&page, pos)?;
	Ok(RecordLoc { blkidx: 0, pos })
}
