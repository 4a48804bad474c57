//! Mapping install/teardown (spec.md §3, §4.6: C6): splicing a file's
//! translation-tree pages into a [`crate::arena::Window`] of a host address
//! space, reference-counted per inode.
//!
//! `HostMapper` plays the role `sleiderr-fzkernel`'s `PageTableMapper`
//! trait plays for x86 paging (`x86/paging/page_table/mapper.rs`): a thin
//! boundary between the tree-walking logic above and whatever actually owns
//! the host's page tables. Production code binds this to the kernel's VM
//! subsystem; this crate ships only [`InMemoryMapper`], a test stub that
//! records installed entries in a `HashMap` instead of touching real page
//! tables, since driving an actual kernel VM binding is out of scope here.

use std::collections::HashMap;

use spin::Mutex;

use crate::arena::{Arena, Window};
use crate::inode::{Inode, InodeType};
use crate::layout::{BlockOffset, InodeNum, Level, BLOCK_SIZE, DIR_WINDOW_SIZE, FILE_WINDOW_SIZE};
use crate::region::Region;
use crate::tree::TreePage;

/// Abstract binding to whatever owns the host's page tables (spec.md §9
/// "Host page-table coupling", spec.md:247).
///
/// Implementations must make installs/clears atomic with respect to a
/// concurrent page-table walk by the host (spec.md §4.6's "readers must
/// never observe a half-installed mapping" invariant); `spin`-guarded
/// in-memory bookkeeping is enough to model that here, a real binding would
/// use whatever the host's VM subsystem provides (TLB shootdown, RCU, ...).
pub trait HostMapper {
	/// Install a single host-level entry at `vaddr`, pointing at the
	/// on-media table/page found at `table_phys`.
	fn install_level(&self, level: Level, vaddr: u64, table_phys: BlockOffset) -> std::io::Result<()>;

	/// Clear whatever host-level entry currently covers `vaddr` at `level`.
	fn clear_level(&self, level: Level, vaddr: u64) -> std::io::Result<()>;

	/// Flush the TLB for the `len`-byte range starting at `vaddr`.
	fn flush_tlb(&self, vaddr: u64, len: u64);

	/// Flush the cache for the `len`-byte range starting at `vaddr`.
	fn flush_cache(&self, vaddr: u64, len: u64);
}

/// In-memory stand-in for a real host VM binding: records installed
/// `(level, vaddr) -> table_phys` entries in a plain map instead of
/// touching real page tables.
#[derive(Default)]
pub struct InMemoryMapper {
	table: Mutex<HashMap<(Level, u64), BlockOffset>>,
	flushes: Mutex<u32>,
}

impl InMemoryMapper {
	pub fn new() -> Self {
		Self { table: Mutex::new(HashMap::new()), flushes: Mutex::new(0) }
	}

	/// What `vaddr` is currently mapped to at `level`, for test assertions.
	pub fn translate(&self, level: Level, vaddr: u64) -> Option<BlockOffset> {
		self.table.lock().get(&(level, vaddr)).copied()
	}

	/// Number of `flush_tlb`/`flush_cache` calls observed so far.
	pub fn flush_count(&self) -> u32 {
		*self.flushes.lock()
	}
}

impl HostMapper for InMemoryMapper {
	fn install_level(&self, level: Level, vaddr: u64, table_phys: BlockOffset) -> std::io::Result<()> {
		self.table.lock().insert((level, vaddr), table_phys);
		Ok(())
	}

	fn clear_level(&self, level: Level, vaddr: u64) -> std::io::Result<()> {
		self.table.lock().remove(&(level, vaddr));
		Ok(())
	}

	fn flush_tlb(&self, _vaddr: u64, _len: u64) {
		*self.flushes.lock() += 1;
	}

	fn flush_cache(&self, _vaddr: u64, _len: u64) {
		*self.flushes.lock() += 1;
	}
}

/// Per-inode mapping state (spec.md §4.6): `vaddr` (0 if not installed) and
/// `p_counter`, the number of opens requiring the mapping. Tracked for the
/// lifetime of a mount rather than persisted — a virtual address is only
/// ever meaningful within the process/mount that reserved it.
#[derive(Default, Clone, Copy)]
struct MappingState {
	vaddr: u64,
	p_counter: u32,
}

/// Tracks every inode currently spliced into the host address space.
/// Grounded on spec.md §9's "reference-counted mappings" strategy: an
/// `Arc`-like counted handle with explicit `establish`/`release`, the last
/// `release` tearing down the window and returning it to the arena.
#[derive(Default)]
pub struct MappingTable {
	entries: Mutex<HashMap<InodeNum, MappingState>>,
}

impl MappingTable {
	pub fn new() -> Self {
		Self::default()
	}

	/// Current virtual address an inode is installed at, or `None` if it
	/// has no mapping right now. For tests/diagnostics only.
	pub fn vaddr_of(&self, inr: InodeNum) -> Option<u64> {
		self.entries.lock().get(&inr).map(|s| s.vaddr).filter(|&v| v != 0)
	}

	/// spec.md §4.6 `establish(inode)`: if no window is installed yet,
	/// acquire one sized for `inode`'s kind (spec.md §4.5: directory/symlink
	/// → 2 MiB window, regular file → 32 GiB window) and splice the inode's
	/// current translation tree into it. Bumps `p_counter` for regular
	/// files. A no-op beyond the window reservation when `inode` has no
	/// blocks yet (the first `establish` call on a freshly created inode,
	/// per spec.md:38's control flow, runs before anything is allocated).
	pub fn establish(&self, region: &Region, arena: &Arena, mapper: &dyn HostMapper, inr: InodeNum, inode: &Inode) -> std::io::Result<u64> {
		let kind = inode.kind()?;
		let mut entries = self.entries.lock();
		let state = entries.entry(inr).or_default();

		if state.vaddr == 0 {
			let window = match kind {
				InodeType::Directory | InodeType::Symlink => arena.acquire_dir_window()?,
				_ => arena.acquire_file_window()?,
			};
			state.vaddr = window.base;
		}

		let window = Window { base: state.vaddr, size: window_size(kind) };
		install_tree(region, mapper, window, inode)?;

		if kind == InodeType::RegularFile {
			state.p_counter += 1;
		}
		log::trace!("mapping: established inode {inr} at {:#x}", state.vaddr);
		Ok(state.vaddr)
	}

	/// spec.md §4.6 `destroy(inode)`: for regular files, decrement
	/// `p_counter` and only tear down once it reaches zero; directories and
	/// symlinks tear down immediately. A no-op if `inr` has no mapping.
	pub fn destroy(&self, arena: &Arena, mapper: &dyn HostMapper, inr: InodeNum, kind: InodeType) -> std::io::Result<()> {
		let mut entries = self.entries.lock();
		let Some(state) = entries.get_mut(&inr) else {
			return Ok(());
		};

		if kind == InodeType::RegularFile {
			if state.p_counter == 0 {
				entries.remove(&inr);
				return Ok(());
			}
			state.p_counter -= 1;
			if state.p_counter > 0 {
				return Ok(());
			}
		}

		if state.vaddr != 0 {
			let window = Window { base: state.vaddr, size: window_size(kind) };
			clear_tree(mapper, window, kind);
			mapper.flush_tlb(window.base, window.size);
			mapper.flush_cache(window.base, window.size);
			match kind {
				InodeType::Directory | InodeType::Symlink => arena.release_dir_window(window),
				_ => arena.release_file_window(window),
			}
			log::trace!("mapping: destroyed inode {inr} at {:#x}", window.base);
		}
		entries.remove(&inr);
		Ok(())
	}

	/// Force teardown regardless of `p_counter`: used when an inode is
	/// about to be reclaimed entirely (spec.md §4.9's unlink-to-zero path),
	/// where no further opens can reference it.
	pub fn destroy_force(&self, arena: &Arena, mapper: &dyn HostMapper, inr: InodeNum, kind: InodeType) -> std::io::Result<()> {
		let mut entries = self.entries.lock();
		let Some(state) = entries.remove(&inr) else {
			return Ok(());
		};
		if state.vaddr != 0 {
			let window = Window { base: state.vaddr, size: window_size(kind) };
			clear_tree(mapper, window, kind);
			mapper.flush_tlb(window.base, window.size);
			mapper.flush_cache(window.base, window.size);
			match kind {
				InodeType::Directory | InodeType::Symlink => arena.release_dir_window(window),
				_ => arena.release_file_window(window),
			}
		}
		Ok(())
	}
}

fn window_size(kind: InodeType) -> u64 {
	match kind {
		InodeType::Directory | InodeType::Symlink => DIR_WINDOW_SIZE,
		_ => FILE_WINDOW_SIZE,
	}
}

/// Splice `inode`'s translation tree into `window` (spec.md §4.6: "for 2
/// MiB windows install one PMD-equivalent entry; for 32 GiB windows install
/// one PUD-equivalent entry per 1 GiB covered, iterating until the tree's
/// upper-level entries are exhausted"). A no-op for an inode with no blocks
/// yet.
fn install_tree(region: &Region, mapper: &dyn HostMapper, window: Window, inode: &Inode) -> std::io::Result<()> {
	let Some(root) = inode.tree_root() else {
		return Ok(());
	};

	if window.size == DIR_WINDOW_SIZE {
		mapper.install_level(Level::Pmd, window.base, root)
	} else {
		let pud_span = Level::Pud.page_span() * BLOCK_SIZE;
		let pgd = TreePage::read(region, root)?;
		let Some(pud_table) = pgd.get(0) else {
			return Ok(());
		};
		let pud_page = TreePage::read(region, pud_table)?;
		let slots = (window.size / pud_span) as usize;
		for i in 0..slots {
			if let Some(phys) = pud_page.get(i) {
				mapper.install_level(Level::Pud, window.base + i as u64 * pud_span, phys)?;
			}
		}
		Ok(())
	}
}

/// Clear every host entry [`install_tree`] may have installed for `window`.
fn clear_tree(mapper: &dyn HostMapper, window: Window, kind: InodeType) {
	if matches!(kind, InodeType::Directory | InodeType::Symlink) {
		let _ = mapper.clear_level(Level::Pmd, window.base);
	} else {
		let pud_span = Level::Pud.page_span() * BLOCK_SIZE;
		let slots = window.size / pud_span;
		for i in 0..slots {
			let _ = mapper.clear_level(Level::Pud, window.base + i * pud_span);
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::balloc::BlockAllocator;
	use crate::superblock::Superblock;
	use crate::tree;

	fn fixture() -> (Region, Superblock, BlockAllocator) {
		let mut region = Region::new_anonymous(4 << 20);
		let mut sb = Superblock::format(4 << 20, [0u8; 16]);
		let mut prev = 0u64;
		let mut off = sb.block_start;
		for _ in 0..sb.block_count {
			region.write_at(BlockOffset(off), &prev.to_le_bytes()).unwrap();
			prev = off;
			off += BLOCK_SIZE;
		}
		sb.free_block_start = prev;
		sb.commit(&mut region).unwrap();
		(region, sb, BlockAllocator::new())
	}

	#[test]
	fn establish_on_empty_inode_reserves_window_without_installing() {
		let (region, _sb, _balloc) = fixture();
		let arena = Arena::new(0, 1 << 40);
		let mapper = InMemoryMapper::new();
		let table = MappingTable::new();
		let inr = InodeNum::new(2).unwrap();
		let inode = Inode::new(InodeType::RegularFile, 0o644, 0, 0, 0, 0);

		let vaddr = table.establish(&region, &arena, &mapper, inr, &inode).unwrap();
		assert_ne!(vaddr, 0);
		assert_eq!(mapper.translate(Level::Pud, vaddr), None);
	}

	#[test]
	fn establish_installs_pmd_entry_for_directory_with_blocks() {
		let (mut region, mut sb, balloc) = fixture();
		let mut root = None;
		let (pte, idx) = tree::ensure_path(&mut region, &mut sb, &balloc, &mut root, 0).unwrap();
		let data = balloc.alloc(&mut region, &mut sb).unwrap();
		tree::commit_entry(&mut region, pte, idx, Some(data)).unwrap();

		let arena = Arena::new(0, 1 << 40);
		let mapper = InMemoryMapper::new();
		let table = MappingTable::new();
		let inr = InodeNum::new(2).unwrap();
		let mut inode = Inode::new(InodeType::Directory, 0o755, 0, 0, 0, 0);
		inode.set_tree_root(root);

		let vaddr = table.establish(&region, &arena, &mapper, inr, &inode).unwrap();
		assert_eq!(mapper.translate(Level::Pmd, vaddr), root);
	}

	#[test]
	fn destroy_releases_window_once_refcount_drops_to_zero() {
		let (region, _sb, _balloc) = fixture();
		let arena = Arena::new(0, 1 << 40);
		let mapper = InMemoryMapper::new();
		let table = MappingTable::new();
		let inr = InodeNum::new(2).unwrap();
		let inode = Inode::new(InodeType::RegularFile, 0o644, 0, 0, 0, 0);

		table.establish(&region, &arena, &mapper, inr, &inode).unwrap();
		table.establish(&region, &arena, &mapper, inr, &inode).unwrap();
		assert!(table.vaddr_of(inr).is_some());

		table.destroy(&arena, &mapper, inr, InodeType::RegularFile).unwrap();
		assert!(table.vaddr_of(inr).is_some(), "one reference remains");

		table.destroy(&arena, &mapper, inr, InodeType::RegularFile).unwrap();
		assert!(table.vaddr_of(inr).is_none());
		assert_eq!(mapper.flush_count(), 2);
	}

	#[test]
	fn destroy_on_directory_tears_down_on_first_call() {
		let (region, _sb, _balloc) = fixture();
		let arena = Arena::new(0, 1 << 40);
		let mapper = InMemoryMapper::new();
		let table = MappingTable::new();
		let inr = InodeNum::new(2).unwrap();
		let inode = Inode::new(InodeType::Directory, 0o755, 0, 0, 0, 0);

		table.establish(&region, &arena, &mapper, inr, &inode).unwrap();
		table.destroy(&arena, &mapper, inr, InodeType::Directory).unwrap();
		assert!(table.vaddr_of(inr).is_none());
	}
}
