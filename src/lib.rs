mod arena;
mod balloc;
mod dir;
mod error;
mod file;
mod fs;
mod ialloc;
mod inode;
mod layout;
mod mapping;
mod namei;
mod region;
mod superblock;
mod tree;

pub use crate::{
	arena::{Arena, Window},
	dir::{DirEntry, RecordLoc},
	error::ErrorKind,
	fs::{ErrorPolicy, FormatOptions, MountOptions, Nvmm},
	inode::{Inode, InodeAttr, InodeFlags, InodeType},
	layout::{BlockOffset, InodeNum, BLOCK_SIZE, MAX_DIR_SIZE, MAX_FILE_SIZE, MAX_NAME_LEN},
	mapping::{HostMapper, InMemoryMapper},
	region::Region,
	superblock::Superblock,
};
