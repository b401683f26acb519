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

//! Index-file geometry: where the free-list head, the hash table and the
//! record region begin, and which chain a key hashes to.

use crate::codec::PTR_SZ;

/// Default hash-table width. Baked into the files at creation time rather
/// than stored in the on-disk header, so a caller opening an existing
/// database must supply the `nhash` it was created with.
pub const NHASH_DEFAULT: u32 = 137;

/// Offset of the free-list head pointer: always the first `PTR_SZ` bytes.
pub const FREE_OFF: u64 = 0;

/// Byte offset at which the hash table begins (right after the free-list
/// pointer).
pub const HASH_OFF: u64 = PTR_SZ as u64;

/// Fixed-width geometry of one open index file.
#[derive(Debug, Clone, Copy)]
pub struct Layout {
	nhash: u32,
}

impl Layout {
	pub fn new(nhash: u32) -> Layout {
		Layout { nhash }
	}

	pub fn nhash(&self) -> u32 {
		self.nhash
	}

	/// Length of the header: free pointer + hash table + terminating `\n`.
	pub fn header_len(&self) -> u64 {
		PTR_SZ as u64 * (self.nhash as u64 + 1) + 1
	}

	/// Offset just past the header, where the first index record would
	/// begin in a freshly created database.
	pub fn record_region_start(&self) -> u64 {
		self.header_len()
	}

	/// `hash(key) = (sum_i key[i] * (i+1)) mod nhash`, with `i` zero-based
	/// over the key bytes and a 1-based weight per byte.
	pub fn hash(&self, key: &[u8]) -> u32 {
		let mut hval: u64 = 0;
		for (i, &b) in key.iter().enumerate() {
			hval = hval.wrapping_add(b as u64 * (i as u64 + 1));
		}
		(hval % self.nhash as u64) as u32
	}

	/// Offset of the chain-head pointer for `key` in the hash table.
	pub fn chain_offset(&self, key: &[u8]) -> u64 {
		HASH_OFF + self.hash(key) as u64 * PTR_SZ as u64
	}

	/// Offset of the free-list head pointer.
	pub fn free_list_offset(&self) -> u64 {
		FREE_OFF
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn header_len_matches_spec_example() {
		let layout = Layout::new(NHASH_DEFAULT);
		assert_eq!(layout.header_len(), 7 * 138 + 1);
	}

	#[test]
	fn hash_is_deterministic_and_in_range() {
		let layout = Layout::new(NHASH_DEFAULT);
		let h1 = layout.hash(b"Alpha");
		let h2 = layout.hash(b"Alpha");
		assert_eq!(h1, h2);
		assert!(h1 < NHASH_DEFAULT);
	}

	#[test]
	fn chain_offset_is_within_hash_table_region() {
		let layout = Layout::new(NHASH_DEFAULT);
		let off = layout.chain_offset(b"Beta");
		assert!(off >= HASH_OFF);
		assert!(off < layout.header_len());
	}

	#[test]
	fn empty_key_hashes_to_zero() {
		let layout = Layout::new(NHASH_DEFAULT);
		assert_eq!(layout.hash(b""), 0);
	}
}
