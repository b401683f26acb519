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

//! The public handle: open/close, the four CRUD-ish operations
//! (`fetch`/`store`/`delete`/sequential scan), and the per-handle
//! counters. Everything here is single-threaded-per-handle; concurrency
//! comes entirely from other processes holding handles on the same pair
//! of files, serialized by the byte-range locks in [`crate::lock`].

use std::fs::OpenOptions;
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::os::unix::io::AsRawFd;
use std::path::Path;

use log::{debug, warn};

use crate::codec::encode_ptr;
use crate::cursor::locate_and_lock;
use crate::error::{unwrap_or_fatal, Result};
use crate::layout::{Layout, NHASH_DEFAULT};
use crate::lock::{LockGuard, LockKind};
use crate::raw::{formatted_idx_payload_len, IndexRecord, Placement, RawFiles, DATLEN_MAX, IDXLEN_MAX};

/// Per-database configuration. `nhash` is baked into the files at creation
/// time and is not recorded in the header, so a caller re-opening an
/// existing database must supply the same value it was created with.
#[derive(Debug, Clone, Copy)]
pub struct Options {
	pub nhash: u32,
	pub create_mode: u32,
}

impl Default for Options {
	fn default() -> Options {
		Options { nhash: NHASH_DEFAULT, create_mode: 0o644 }
	}
}

/// Which outcomes `store` is allowed to produce: insert-only, replace-only,
/// or either.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
	Insert,
	Replace,
	Upsert,
}

impl StoreMode {
	fn allows_insert(self) -> bool {
		matches!(self, StoreMode::Insert | StoreMode::Upsert)
	}
	fn allows_replace(self) -> bool {
		matches!(self, StoreMode::Replace | StoreMode::Upsert)
	}
}

/// Result of a `store` call. Recoverable conditions (an insert colliding
/// with an existing key, a replace of a missing key, an oversize key or
/// value) are ordinary variants here, not `Err` — see SPEC_FULL.md's Error
/// handling section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
	/// Store counter variant 1: no free slot, appended.
	Inserted,
	/// Store counter variant 2: reused a same-size tombstone.
	InsertedReusingFreeSlot,
	/// Store counter variant 4: replaced in place, same length.
	ReplacedInPlace,
	/// Store counter variant 3: replaced via delete-then-reinsert.
	ReplacedWithReinsert,
	AlreadyExists,
	NotFound,
	KeyTooLong(usize),
	ValueTooLong(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
	Deleted,
	NotFound,
}

/// Per-handle operation counters. Incremented non-atomically even though
/// other processes may hold the same database concurrently — these are a
/// per-handle bookkeeping aid, not a globally consistent metric.
#[derive(Debug, Default, Clone, Copy)]
pub struct Counters {
	pub fetch_ok: u64,
	pub fetch_err: u64,
	pub delete_ok: u64,
	pub delete_err: u64,
	pub next_record: u64,
	pub store_appended: u64,
	pub store_reused_free_slot: u64,
	pub store_replaced_with_reinsert: u64,
	pub store_replaced_in_place: u64,
	pub store_err: u64,
}

fn sibling_path(base: &Path, ext: &str) -> std::path::PathBuf {
	let mut name = base.file_name().map(|n| n.to_owned()).unwrap_or_default();
	name.push(ext);
	match base.parent() {
		Some(p) if !p.as_os_str().is_empty() => p.join(name),
		_ => name.into(),
	}
}

/// Writes a fresh header: a null free-list pointer, `nhash` null chain
/// pointers, and the terminating newline. Exposed `pub(crate)` so tests
/// across modules (e.g. `cursor`) can stand up a minimal index file
/// without going through `Database::create`.
pub(crate) fn init_header(idx: &std::fs::File, layout: &Layout) -> Result<()> {
	let mut buf = Vec::with_capacity(layout.header_len() as usize);
	for _ in 0..=layout.nhash() {
		buf.extend_from_slice(&encode_ptr(0));
	}
	buf.push(b'\n');
	idx.write_all_at(&buf, 0)?;
	Ok(())
}

/// The embedded key-value store handle: the open index/data files plus
/// their geometry and this handle's own counters.
pub struct Database {
	raw: RawFiles,
	layout: Layout,
	counters: Counters,
}

impl Database {
	/// Opens `path.idx`/`path.dat`, creating them (and writing a fresh
	/// header) if they don't already exist. If they do exist, the header
	/// is left untouched: creation hinges on `O_CREAT` producing an empty
	/// file, not on any truncation flag, so re-running `create` against a
	/// populated database is a safe, ordinary open.
	pub fn create(path: impl AsRef<Path>, options: Options) -> Result<Database> {
		let path = path.as_ref();
		let idx_path = sibling_path(path, ".idx");
		let dat_path = sibling_path(path, ".dat");
		let idx = OpenOptions::new().create(true).read(true).write(true).mode(options.create_mode).open(&idx_path)?;
		let dat = OpenOptions::new().create(true).read(true).write(true).mode(options.create_mode).open(&dat_path)?;

		let layout = Layout::new(options.nhash);
		let created;
		{
			let _guard = LockGuard::acquire_blocking(idx.as_raw_fd(), LockKind::Write, 0, 0);
			created = idx.metadata()?.len() == 0;
			if created {
				init_header(&idx, &layout)?;
			}
		}
		debug!(target: "chainkv", "opened database at {:?} ({})", path, if created { "created" } else { "existing" });

		let mut raw = RawFiles::new(idx, dat);
		raw.seek_idx(layout.record_region_start())?;
		Ok(Database { raw, layout, counters: Counters::default() })
	}

	/// Opens an existing database; fails if either file is missing.
	pub fn open_existing(path: impl AsRef<Path>, options: Options) -> Result<Database> {
		let path = path.as_ref();
		let idx_path = sibling_path(path, ".idx");
		let dat_path = sibling_path(path, ".dat");
		let idx = OpenOptions::new().read(true).write(true).open(&idx_path)?;
		let dat = OpenOptions::new().read(true).write(true).open(&dat_path)?;

		let layout = Layout::new(options.nhash);
		let mut raw = RawFiles::new(idx, dat);
		raw.seek_idx(layout.record_region_start())?;
		debug!(target: "chainkv", "opened existing database at {:?}", path);
		Ok(Database { raw, layout, counters: Counters::default() })
	}

	pub fn counters(&self) -> &Counters {
		&self.counters
	}

	/// Locks the key's chain for reading and, on a hit, reads the data
	/// record back off disk.
	pub fn fetch(&mut self, key: &[u8]) -> Option<Vec<u8>> {
		let (guard, loc) = unwrap_or_fatal(locate_and_lock(&mut self.raw, &self.layout, key, LockKind::Read));
		let result = match &loc.record {
			Some(rec) => {
				self.counters.fetch_ok += 1;
				debug!(target: "chainkv", "fetch hit for {}-byte key", key.len());
				Some(unwrap_or_fatal(self.raw.read_dat(rec.datoff, rec.datlen)))
			}
			None => {
				self.counters.fetch_err += 1;
				debug!(target: "chainkv", "fetch miss for {}-byte key", key.len());
				None
			}
		};
		drop(guard);
		result
	}

	/// Tombstones the victim and splices it onto the free list, preserving
	/// chain-then-free-list lock order.
	pub fn delete(&mut self, key: &[u8]) -> DeleteOutcome {
		let (guard, loc) = unwrap_or_fatal(locate_and_lock(&mut self.raw, &self.layout, key, LockKind::Write));
		let outcome = match loc.record {
			Some(rec) => {
				unwrap_or_fatal(self.do_delete(&rec, loc.ptroff));
				self.counters.delete_ok += 1;
				debug!(target: "chainkv", "deleted {}-byte key", key.len());
				DeleteOutcome::Deleted
			}
			None => {
				self.counters.delete_err += 1;
				debug!(target: "chainkv", "delete miss for {}-byte key", key.len());
				DeleteOutcome::NotFound
			}
		};
		drop(guard);
		outcome
	}

	fn do_delete(&mut self, rec: &IndexRecord, ptroff: u64) -> Result<()> {
		// Free-list lock nests inside the chain write lock the caller
		// already holds; it is dropped before this function returns,
		// well before the chain lock.
		let free_guard = LockGuard::acquire_blocking(self.raw.idx_fd(), LockKind::Write, self.layout.free_list_offset(), 1);

		self.raw.blank_dat(rec.datoff, rec.datlen)?;

		let freeptr = self.raw.read_ptr(self.layout.free_list_offset())?;
		let saveptr = rec.next;

		let blank_key = vec![b' '; rec.key.len()];
		self.raw.write_idx(&self.layout, &blank_key, rec.datoff, rec.datlen, freeptr, Placement::At(rec.idxoff))?;
		self.raw.write_ptr(self.layout.free_list_offset(), rec.idxoff)?;
		self.raw.write_ptr(ptroff, saveptr)?;

		drop(free_guard);
		Ok(())
	}

	/// Inserts, replaces, or does either depending on `mode` and whether the
	/// key is already present.
	pub fn store(&mut self, key: &[u8], value: &[u8], mode: StoreMode) -> StoreOutcome {
		if value.len() + 1 > DATLEN_MAX {
			self.counters.store_err += 1;
			return StoreOutcome::ValueTooLong(value.len());
		}

		let (guard, loc) = unwrap_or_fatal(locate_and_lock(&mut self.raw, &self.layout, key, LockKind::Write));
		let outcome = match loc.record {
			None => {
				if !mode.allows_insert() {
					self.counters.store_err += 1;
					StoreOutcome::NotFound
				} else {
					unwrap_or_fatal(self.insert_not_found(key, value, loc.chainoff))
				}
			}
			Some(rec) => {
				if !mode.allows_replace() {
					self.counters.store_err += 1;
					StoreOutcome::AlreadyExists
				} else {
					unwrap_or_fatal(self.replace_found(key, value, &rec, loc.ptroff, loc.chainoff))
				}
			}
		};
		debug!(target: "chainkv", "store({:?}, {}-byte key) -> {:?}", mode, key.len(), outcome);
		drop(guard);
		outcome
	}

	/// Not-found path of `store`: reuse a same-size tombstone if one
	/// exists on the free list, otherwise append. Inserted at chain head
	/// in both cases. Bumps exactly one counter (variant 1 or 2) — the
	/// reinsert half of a length-changing replace calls
	/// `insert_not_found_inner` directly so it bumps only variant 3.
	fn insert_not_found(&mut self, key: &[u8], value: &[u8], chainoff: u64) -> Result<StoreOutcome> {
		let (outcome, reused) = self.insert_not_found_inner(key, value, chainoff)?;
		if reused {
			self.counters.store_reused_free_slot += 1;
		} else if outcome == StoreOutcome::Inserted {
			self.counters.store_appended += 1;
		} else {
			self.counters.store_err += 1;
		}
		Ok(outcome)
	}

	/// Counter-free core shared by `insert_not_found` and the reinsert half
	/// of `replace_found`, so a replace-with-reinsert bumps only its own
	/// counter (variant 3) instead of also bumping the insert counters
	/// (variant 1/2) a bare call to `insert_not_found` would.
	fn insert_not_found_inner(&mut self, key: &[u8], value: &[u8], chainoff: u64) -> Result<(StoreOutcome, bool)> {
		let chain_head = self.raw.read_ptr(chainoff)?;

		if let Some(reused) = self.find_free(key.len(), value.len() as u64 + 1)? {
			self.raw.write_dat(value, Placement::At(reused.datoff))?;
			self.raw.write_idx(&self.layout, key, reused.datoff, reused.datlen, chain_head, Placement::At(reused.idxoff))?;
			self.raw.write_ptr(chainoff, reused.idxoff)?;
			return Ok((StoreOutcome::InsertedReusingFreeSlot, true));
		}

		let prospective_datoff = self.raw.dat_file().metadata()?.len();
		let payload_len = formatted_idx_payload_len(key, prospective_datoff, value.len() as u64 + 1);
		if payload_len > IDXLEN_MAX {
			return Ok((StoreOutcome::KeyTooLong(key.len()), false));
		}

		let (datoff, datlen) = self.raw.write_dat(value, Placement::Append)?;
		let idxoff = self.raw.write_idx(&self.layout, key, datoff, datlen, chain_head, Placement::Append)?;
		self.raw.write_ptr(chainoff, idxoff)?;
		Ok((StoreOutcome::Inserted, false))
	}

	/// Found path of `store`: same-length overwrite in place, or
	/// delete-then-reinsert when the length changed.
	fn replace_found(&mut self, key: &[u8], value: &[u8], rec: &IndexRecord, ptroff: u64, chainoff: u64) -> Result<StoreOutcome> {
		let new_datlen = value.len() as u64 + 1;
		if new_datlen == rec.datlen {
			self.raw.write_dat(value, Placement::At(rec.datoff))?;
			self.counters.store_replaced_in_place += 1;
			return Ok(StoreOutcome::ReplacedInPlace);
		}

		self.do_delete(rec, ptroff)?;
		let (outcome, _reused) = self.insert_not_found_inner(key, value, chainoff)?;
		match outcome {
			StoreOutcome::KeyTooLong(_) | StoreOutcome::ValueTooLong(_) => {
				self.counters.store_err += 1;
				Ok(outcome)
			}
			_ => {
				self.counters.store_replaced_with_reinsert += 1;
				Ok(StoreOutcome::ReplacedWithReinsert)
			}
		}
	}

	/// Scans the free list for a tombstone whose key length and data
	/// length exactly match, splicing it off for reuse. The free-list lock
	/// is held for the whole scan, nested inside the caller's chain write
	/// lock. A long scan means the free list is carrying many
	/// differently-sized tombstones that never line up with what's being
	/// inserted; that degrades a reuse attempt into a near-full free-list
	/// walk, so it's worth flagging.
	fn find_free(&mut self, keylen: usize, datlen: u64) -> Result<Option<IndexRecord>> {
		const SLOW_SCAN_THRESHOLD: u32 = 64;
		let free_off = self.layout.free_list_offset();
		let _guard = LockGuard::acquire_blocking(self.raw.idx_fd(), LockKind::Write, free_off, 1);

		let mut ptroff = free_off;
		let mut next = self.raw.read_ptr(free_off)?;
		let mut steps = 0u32;
		while next != 0 {
			let rec = self.raw.read_idx_at(next)?;
			steps += 1;
			if rec.key.len() == keylen && rec.datlen == datlen {
				let after = rec.next;
				self.raw.write_ptr(ptroff, after)?;
				return Ok(Some(rec));
			}
			ptroff = rec.idxoff;
			next = rec.next;
		}
		if steps > SLOW_SCAN_THRESHOLD {
			warn!(target: "chainkv", "free-list scan walked {} tombstones without a size match (keylen={}, datlen={})", steps, keylen, datlen);
		}
		Ok(None)
	}

	/// Seeks just past the header. No lock: readers are expected to race
	/// tombstoning benignly (`next_record` takes the free-list read lock
	/// per-record instead).
	pub fn rewind(&mut self) {
		let off = self.layout.record_region_start();
		unwrap_or_fatal(self.raw.seek_idx(off));
	}

	/// The next live record in physical order, skipping tombstones.
	pub fn next_record(&mut self) -> Option<(Vec<u8>, Vec<u8>)> {
		loop {
			let guard = LockGuard::acquire_blocking(self.raw.idx_fd(), LockKind::Read, self.layout.free_list_offset(), 1);
			let rec = match unwrap_or_fatal(self.raw.read_idx_sequential()) {
				Some(rec) => rec,
				None => {
					drop(guard);
					return None;
				}
			};
			if rec.is_tombstone() {
				drop(guard);
				continue;
			}
			let value = unwrap_or_fatal(self.raw.read_dat(rec.datoff, rec.datlen));
			self.counters.next_record += 1;
			drop(guard);
			return Some((rec.key, value));
		}
	}
}

impl Drop for Database {
	fn drop(&mut self) {
		debug!(target: "chainkv", "closing database handle ({} fetch_ok, {} store variants issued)", self.counters.fetch_ok, self.counters.store_appended + self.counters.store_reused_free_slot + self.counters.store_replaced_in_place + self.counters.store_replaced_with_reinsert);
	}
}
