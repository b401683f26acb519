// Copyright 2015-2020 Parity Technologies (UK) Ltd.
// This file is part of Parity.

// Parity is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// Parity is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with Parity.  If not, see <http://www.gnu.org/licenses/>.

//! POSIX advisory byte-range locks (`fcntl(F_SETLK)`/`F_SETLKW`), wrapped
//! in a scoped guard so release on every exit path is guaranteed.
//!
//! Byte-range locking is not expressible through `fs2`/`fs4`-style crates
//! (they only lock whole files via `flock`), so this module talks to
//! `fcntl` directly via `libc` rather than fabricating a dependency that
//! does not fit.

use std::io;
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

use log::warn;

use crate::error::fatal;

/// Lock waits longer than this are logged, on the theory that ordinary
/// contention resolves quickly and anything slower is worth knowing about.
const SLOW_LOCK_WAIT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
	Read,
	Write,
}

impl LockKind {
	fn libc_type(self) -> libc::c_short {
		match self {
			LockKind::Read => libc::F_RDLCK as libc::c_short,
			LockKind::Write => libc::F_WRLCK as libc::c_short,
		}
	}
}

fn lock_reg(fd: RawFd, cmd: libc::c_int, kind: LockKind, offset: i64, len: i64) -> io::Result<bool> {
	let mut fl: libc::flock = unsafe { std::mem::zeroed() };
	fl.l_type = kind.libc_type();
	fl.l_whence = libc::SEEK_SET as libc::c_short;
	fl.l_start = offset as libc::off_t;
	fl.l_len = len as libc::off_t;

	let rc = unsafe { libc::fcntl(fd, cmd, &mut fl) };
	if rc != -1 {
		return Ok(true);
	}
	let err = io::Error::last_os_error();
	match err.raw_os_error() {
		Some(libc::EACCES) | Some(libc::EAGAIN) if cmd == libc::F_SETLK => Ok(false),
		_ => Err(err),
	}
}

/// An advisory lock on `[offset, offset+len)` of `fd`, released on `Drop`.
/// `len == 0` means "to the end of the file", matching `fcntl`'s own
/// convention, used for the data-file whole-file append guard.
pub struct LockGuard {
	fd: RawFd,
	offset: i64,
	len: i64,
}

impl LockGuard {
	/// Blocks until a lock of `kind` is acquired on `[offset, offset+len)`.
	/// Failure to acquire a lock is fatal: it indicates the lock-system
	/// itself is broken, not ordinary contention (ordinary contention is
	/// exactly what the blocking wait absorbs).
	pub fn acquire_blocking(fd: RawFd, kind: LockKind, offset: u64, len: u64) -> LockGuard {
		let started = Instant::now();
		match lock_reg(fd, libc::F_SETLKW, kind, offset as i64, len as i64) {
			Ok(_) => {
				let waited = started.elapsed();
				if waited > SLOW_LOCK_WAIT {
					warn!(target: "chainkv", "waited {:?} for a {:?} lock at offset {}", waited, kind, offset);
				}
				LockGuard { fd, offset: offset as i64, len: len as i64 }
			}
			Err(e) => fatal!("lock acquisition failed at offset {}: {}", offset, e),
		}
	}

	/// Non-blocking variant used where the caller wants to detect
	/// contention rather than wait for it. Returns `None` if the byte
	/// range is already locked by another process.
	pub fn try_acquire(fd: RawFd, kind: LockKind, offset: u64, len: u64) -> Option<LockGuard> {
		match lock_reg(fd, libc::F_SETLK, kind, offset as i64, len as i64) {
			Ok(true) => Some(LockGuard { fd, offset: offset as i64, len: len as i64 }),
			Ok(false) => None,
			Err(e) => fatal!("lock acquisition failed at offset {}: {}", offset, e),
		}
	}
}

impl Drop for LockGuard {
	fn drop(&mut self) {
		let mut fl: libc::flock = unsafe { std::mem::zeroed() };
		fl.l_type = libc::F_UNLCK as libc::c_short;
		fl.l_whence = libc::SEEK_SET as libc::c_short;
		fl.l_start = self.offset as libc::off_t;
		fl.l_len = self.len as libc::off_t;
		let rc = unsafe { libc::fcntl(self.fd, libc::F_SETLK, &mut fl) };
		if rc == -1 {
			log::error!(
				target: "chainkv",
				"failed to release lock at offset {}: {}",
				self.offset,
				io::Error::last_os_error(),
			);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs::OpenOptions;
	use std::os::unix::io::AsRawFd;

	fn scratch_file() -> std::fs::File {
		let mut path = std::env::temp_dir();
		path.push(format!("chainkv-lock-test-{}-{}", std::process::id(), line!()));
		OpenOptions::new().create(true).read(true).write(true).truncate(true).open(path).unwrap()
	}

	#[test]
	fn write_lock_excludes_read_lock_same_process_same_fd() {
		// fcntl locks are per (process, inode): re-locking the *same* fd
		// for an overlapping range is a conversion, not contention, so
		// this only demonstrates the non-blocking API round trip.
		let file = scratch_file();
		let fd = file.as_raw_fd();
		let guard = LockGuard::try_acquire(fd, LockKind::Write, 0, 1);
		assert!(guard.is_some());
		drop(guard);
		let guard2 = LockGuard::try_acquire(fd, LockKind::Read, 0, 1);
		assert!(guard2.is_some());
	}

	#[test]
	fn disjoint_ranges_do_not_conflict() {
		let file = scratch_file();
		let fd = file.as_raw_fd();
		let _g1 = LockGuard::acquire_blocking(fd, LockKind::Write, 0, 1);
		let g2 = LockGuard::try_acquire(fd, LockKind::Write, 1, 1);
		assert!(g2.is_some());
	}
}
