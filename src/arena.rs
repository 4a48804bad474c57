//! Virtual-address arena (spec.md §3, §4.5: C5).
//!
//! Carves a process/kernel address range into fixed-size windows — one
//! size for directories, a much larger one for regular files — that
//! [`crate::mapping`] splices translation-tree pages into. Grounded in the
//! free-list bookkeeping `sleiderr-fzkernel`'s physical frame allocator uses
//! (`x86/paging/page_alloc/frame_alloc.rs`'s `FreePageBlock` intrusive
//! chain): here the "frames" are virtual windows rather than physical
//! pages, so the free list is an ordinary `Vec` under a `spin::Mutex`
//! rather than one threaded through NVMM itself.

use spin::Mutex;

use crate::error::bail;
use crate::layout::{DIR_WINDOW_SIZE, FILE_WINDOW_SIZE};
use crate::ErrorKind;

/// A reserved, not-yet-populated range of virtual address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
	pub base: u64,
	pub size: u64,
}

struct Pool {
	base: u64,
	window_size: u64,
	next_fresh: u64,
	limit: u64,
	free: Vec<u64>,
}

impl Pool {
	fn new(base: u64, limit: u64, window_size: u64) -> Self {
		Self {
			base,
			window_size,
			next_fresh: base,
			limit,
			free: Vec::new(),
		}
	}

	fn acquire(&mut self) -> std::io::Result<Window> {
		if let Some(base) = self.free.pop() {
			return Ok(Window { base, size: self.window_size });
		}
		if self.next_fresh + self.window_size > self.limit {
			bail!(ErrorKind::NoSpace);
		}
		let base = self.next_fresh;
		self.next_fresh += self.window_size;
		Ok(Window { base, size: self.window_size })
	}

	fn release(&mut self, window: Window) {
		debug_assert_eq!(window.size, self.window_size);
		self.free.push(window.base);
	}
}

/// The arena splits its range into a directory sub-range and a regular-file
/// sub-range, each independently pooled (spec.md §4.5: "2 MiB windows for
/// directories, 32 GiB windows for regular files").
pub struct Arena {
	dirs: Mutex<Pool>,
	files: Mutex<Pool>,
}

impl Arena {
	/// `base`/`limit` bound the whole arena; the first half is reserved for
	/// directory windows, the second for file windows.
	pub fn new(base: u64, limit: u64) -> Self {
		let mid = base + (limit - base) / 2;
		Self {
			dirs: Mutex::new(Pool::new(base, mid, DIR_WINDOW_SIZE)),
			files: Mutex::new(Pool::new(mid, limit, FILE_WINDOW_SIZE)),
		}
	}

	pub fn acquire_dir_window(&self) -> std::io::Result<Window> {
		let w = self.dirs.lock().acquire()?;
		log::trace!("arena: acquired directory window at {:#x}", w.base);
		Ok(w)
	}

	pub fn release_dir_window(&self, window: Window) {
		log::trace!("arena: released directory window at {:#x}", window.base);
		self.dirs.lock().release(window);
	}

	pub fn acquire_file_window(&self) -> std::io::Result<Window> {
		let w = self.files.lock().acquire()?;
		log::trace!("arena: acquired file window at {:#x}", w.base);
		Ok(w)
	}

	pub fn release_file_window(&self, window: Window) {
		log::trace!("arena: released file window at {:#x}", window.base);
		self.files.lock().release(window);
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn dir_windows_are_fixed_size() {
		let arena = Arena::new(0, 1 << 40);
		let w = arena.acquire_dir_window().unwrap();
		assert_eq!(w.size, DIR_WINDOW_SIZE);
	}

	#[test]
	fn release_then_acquire_reuses_window() {
		let arena = Arena::new(0, 1 << 40);
		let w1 = arena.acquire_dir_window().unwrap();
		arena.release_dir_window(w1);
		let w2 = arena.acquire_dir_window().unwrap();
		assert_eq!(w1.base, w2.base);
	}

	#[test]
	fn file_pool_exhaustion_is_no_space() {
		// tiny arena: only room for one 32 GiB file window.
		let arena = Arena::new(0, FILE_WINDOW_SIZE * 2 + DIR_WINDOW_SIZE * 2);
		let _a = arena.acquire_file_window().unwrap();
		let err = arena.acquire_file_window().unwrap_err();
		assert_eq!(err.raw_os_error(), Some(libc::ENOSPC));
	}
}
