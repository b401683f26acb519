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

//! Locate-and-lock: walks a hash chain under its chain lock and reports
//! where the key was found (or where it would be spliced in). The result
//! is handed back as a plain value rather than stashed in fields on a
//! shared handle, so a caller cannot mutate a chain without first holding
//! the `LockGuard` this module hands it.

use log::trace;

use crate::error::Result;
use crate::layout::Layout;
use crate::lock::{LockGuard, LockKind};
use crate::raw::{IndexRecord, RawFiles};

/// Where a chain walk for `key` ended up.
pub struct LocateResult {
	/// Offset of the chain-head pointer for this key's hash bucket.
	pub chainoff: u64,
	/// Offset of whichever pointer field references the matched record
	/// (the chain head, or the previous record's own next-pointer field —
	/// which lives at that record's `idxoff`). When `record` is `None`,
	/// this is the pointer that a freshly-inserted-at-head record must
	/// overwrite, or (if the chain is empty) simply `chainoff` again.
	pub ptroff: u64,
	pub record: Option<IndexRecord>,
}

impl LocateResult {
	pub fn found(&self) -> bool {
		self.record.is_some()
	}
}

/// Acquires a blocking `kind` lock on the one byte at `key`'s chain-head
/// offset, then walks the chain looking for an exact key match. The lock
/// is returned to the caller, who must hold it for the rest of the
/// operation and is responsible for dropping it (`LockGuard`'s `Drop`
/// handles the actual `fcntl` unlock).
pub fn locate_and_lock(raw: &mut RawFiles, layout: &Layout, key: &[u8], kind: LockKind) -> Result<(LockGuard, LocateResult)> {
	let chainoff = layout.chain_offset(key);
	trace!(target: "chainkv", "locking chain at offset {} ({:?}) for key of {} bytes", chainoff, kind, key.len());
	let guard = LockGuard::acquire_blocking(raw.idx_fd(), kind, chainoff, 1);

	let mut ptroff = chainoff;
	let mut next = raw.read_ptr(chainoff)?;
	let mut found = None;
	let mut steps = 0u32;
	while next != 0 {
		let rec = raw.read_idx_at(next)?;
		steps += 1;
		trace!(target: "chainkv", "chain walk step {} at offset {}", steps, next);
		if rec.key == key {
			found = Some(rec);
			break;
		}
		ptroff = rec.idxoff;
		next = rec.next;
	}

	Ok((guard, LocateResult { chainoff, ptroff, record: found }))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::layout::NHASH_DEFAULT;
	use crate::raw::Placement;
	use std::fs::OpenOptions;

	fn fresh_raw() -> (RawFiles, Layout) {
		let layout = Layout::new(NHASH_DEFAULT);
		let mut path = std::env::temp_dir();
		path.push(format!("chainkv-cursor-test-{}-{}", std::process::id(), rand_suffix()));
		std::fs::create_dir_all(&path).unwrap();
		let idx_path = path.join("db.idx");
		let dat_path = path.join("db.dat");
		let idx = OpenOptions::new().create(true).read(true).write(true).truncate(true).open(&idx_path).unwrap();
		let dat = OpenOptions::new().create(true).read(true).write(true).truncate(true).open(&dat_path).unwrap();
		crate::db::init_header(&idx, &layout).unwrap();
		(RawFiles::new(idx, dat), layout)
	}

	fn rand_suffix() -> u64 {
		rand::random::<u64>()
	}

	#[test]
	fn not_found_on_empty_chain_points_at_chain_head() {
		let (mut raw, layout) = fresh_raw();
		let (guard, loc) = locate_and_lock(&mut raw, &layout, b"missing", LockKind::Write).unwrap();
		assert!(!loc.found());
		assert_eq!(loc.ptroff, loc.chainoff);
		drop(guard);
	}

	#[test]
	fn found_after_insert_at_head() {
		let (mut raw, layout) = fresh_raw();
		let chainoff = layout.chain_offset(b"k1");
		let idxoff = raw.write_idx(&layout, b"k1", 0, 2, 0, Placement::At(layout.record_region_start())).unwrap();
		raw.write_ptr(chainoff, idxoff).unwrap();

		let (guard, loc) = locate_and_lock(&mut raw, &layout, b"k1", LockKind::Read).unwrap();
		assert!(loc.found());
		assert_eq!(loc.record.unwrap().idxoff, idxoff);
		assert_eq!(loc.ptroff, chainoff);
		drop(guard);
	}
}
