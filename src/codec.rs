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

//! Fixed-width ASCII codec for the on-disk chain pointers and record
//! lengths: the thing that makes the index file readable with a text
//! viewer while still being a manipulable linked structure.

use crate::error::fatal;

/// Width in bytes of an encoded file offset.
pub const PTR_SZ: usize = 7;
/// Width in bytes of an encoded index-record length.
pub const IDXLEN_SIZE: usize = 4;
/// Largest file offset representable in `PTR_SZ` decimal digits.
pub const PTR_MAX: u64 = 9_999_999;
/// Largest value representable in `IDXLEN_SIZE` decimal digits.
pub const IDXLEN_FIELD_MAX: u64 = 9_999;

/// Right-aligned, zero-padded decimal encoding into exactly `width` bytes
/// (so a null pointer is the literal bytes `"0000000"`, not blanks).
fn encode_fixed(value: u64, max: u64, width: usize, out: &mut [u8]) {
	if value > max {
		fatal!("cannot encode {} into {} bytes (max {})", value, width, max);
	}
	debug_assert_eq!(out.len(), width);
	let digits = value.to_string();
	let pad = width - digits.len();
	for b in out.iter_mut().take(pad) {
		*b = b'0';
	}
	out[pad..].copy_from_slice(digits.as_bytes());
}

/// Parses leading whitespace or zeros followed by decimal digits out of
/// `buf`, which must be exactly `width` bytes. Reading is lenient about the
/// padding character even though writing always zero-pads. Any non-digit,
/// non-space byte, or an all-blank field, is a structural integrity
/// violation.
fn decode_fixed(buf: &[u8], width: usize) -> u64 {
	debug_assert_eq!(buf.len(), width);
	let text = std::str::from_utf8(buf).unwrap_or_else(|_| fatal!("non-UTF8 bytes in fixed-width field"));
	let trimmed = text.trim_start();
	if trimmed.is_empty() {
		fatal!("blank fixed-width field");
	}
	trimmed.parse::<u64>().unwrap_or_else(|_| fatal!("non-numeric fixed-width field {:?}", text))
}

/// Encodes a chain/free-list pointer (a file offset, or 0 for "null") into
/// exactly `PTR_SZ` ASCII bytes.
pub fn encode_ptr(offset: u64) -> [u8; PTR_SZ] {
	let mut out = [0u8; PTR_SZ];
	encode_fixed(offset, PTR_MAX, PTR_SZ, &mut out);
	out
}

/// Decodes a `PTR_SZ`-byte pointer field.
pub fn decode_ptr(buf: &[u8]) -> u64 {
	decode_fixed(buf, PTR_SZ)
}

/// Encodes an index-record payload length into exactly `IDXLEN_SIZE` ASCII
/// bytes.
pub fn encode_idxlen(len: u64) -> [u8; IDXLEN_SIZE] {
	let mut out = [0u8; IDXLEN_SIZE];
	encode_fixed(len, IDXLEN_FIELD_MAX, IDXLEN_SIZE, &mut out);
	out
}

/// Decodes an `IDXLEN_SIZE`-byte length field.
pub fn decode_idxlen(buf: &[u8]) -> u64 {
	decode_fixed(buf, IDXLEN_SIZE)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ptr_round_trip_bounds() {
		for n in [0, 1, 137, 9_999_999] {
			let enc = encode_ptr(n);
			assert_eq!(enc.len(), PTR_SZ);
			assert_eq!(decode_ptr(&enc), n);
		}
	}

	#[test]
	fn ptr_round_trip_sampled() {
		let mut n: u64 = 1;
		while n <= PTR_MAX {
			let enc = encode_ptr(n);
			assert_eq!(decode_ptr(&enc), n);
			n = n.saturating_mul(7).saturating_add(13);
		}
	}

	#[test]
	#[should_panic(expected = "cannot encode")]
	fn ptr_overflow_is_fatal() {
		encode_ptr(PTR_MAX + 1);
	}

	#[test]
	fn idxlen_round_trip() {
		for n in [0, 6, 1024, 9999] {
			let enc = encode_idxlen(n);
			assert_eq!(decode_idxlen(&enc), n);
		}
	}

	#[test]
	fn null_pointer_is_zero() {
		assert_eq!(&encode_ptr(0), b"0000000");
	}

	#[test]
	fn decode_accepts_space_padding() {
		assert_eq!(decode_ptr(b"   1024"), 1024);
		assert_eq!(decode_idxlen(b"  12"), 12);
	}
}
