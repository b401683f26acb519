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

//! Pointer I/O and record I/O: the two layers that turn raw file bytes
//! into chain pointers and index/data records. Callers hold whatever lock
//! the operation requires; nothing in this module takes a lock itself,
//! except the two append paths (`write_idx` appending, `write_dat`
//! appending), which must guard the append against a concurrent append
//! from another process.

use std::fs::File;
use std::io::{self, IoSlice, Read, Write};
use std::os::unix::fs::FileExt;
use std::os::unix::io::AsRawFd;

use crate::codec::{decode_idxlen, decode_ptr, encode_idxlen, encode_ptr, IDXLEN_SIZE, PTR_SZ};
use crate::error::{fatal, Result};
use crate::layout::Layout;
use crate::lock::{LockGuard, LockKind};

/// `key, sep, start, sep, length, \n` — the smallest possible payload.
pub const IDXLEN_MIN: usize = 6;
pub const IDXLEN_MAX: usize = 1024;
pub const DATLEN_MAX: usize = 1024;

const SEP: u8 = b':';

/// Where a record I/O write should land.
#[derive(Debug, Clone, Copy)]
pub enum Placement {
	/// Overwrite in place; the caller holds the chain lock already.
	At(u64),
	/// Append past the current end of file; takes the append guard lock.
	Append,
}

/// A decoded index record, positioned at `idxoff`.
#[derive(Debug, Clone)]
pub struct IndexRecord {
	pub idxoff: u64,
	pub next: u64,
	pub key: Vec<u8>,
	pub datoff: u64,
	pub datlen: u64,
}

impl IndexRecord {
	pub fn is_tombstone(&self) -> bool {
		self.key.iter().all(|&b| b == b' ')
	}
}

fn write_vectored_all(mut file: &File, mut bufs: &mut [IoSlice<'_>]) -> io::Result<()> {
	while !bufs.is_empty() {
		let n = file.write_vectored(bufs)?;
		if n == 0 {
			return Err(io::Error::new(io::ErrorKind::WriteZero, "failed to write whole buffer"));
		}
		IoSlice::advance_slices(&mut bufs, n);
	}
	Ok(())
}

/// Inline, fixed-size scratch buffers — sized to the largest possible
/// record up front rather than grown or reallocated per call.
pub struct RawFiles {
	idx: File,
	dat: File,
	idx_buf: Box<[u8; IDXLEN_MAX + 2]>,
	dat_buf: Box<[u8; DATLEN_MAX + 2]>,
}

impl RawFiles {
	pub fn new(idx: File, dat: File) -> RawFiles {
		RawFiles { idx, dat, idx_buf: Box::new([0u8; IDXLEN_MAX + 2]), dat_buf: Box::new([0u8; DATLEN_MAX + 2]) }
	}

	pub fn idx_file(&self) -> &File {
		&self.idx
	}

	pub fn dat_file(&self) -> &File {
		&self.dat
	}

	pub fn idx_fd(&self) -> std::os::unix::io::RawFd {
		self.idx.as_raw_fd()
	}

	pub fn dat_fd(&self) -> std::os::unix::io::RawFd {
		self.dat.as_raw_fd()
	}

	// ---- Pointer I/O ----------------------------------------------------

	/// Reads the `PTR_SZ`-byte pointer at `off`. Neither this nor
	/// `write_ptr` takes a lock: callers hold the chain or free-list lock
	/// already.
	pub fn read_ptr(&self, off: u64) -> Result<u64> {
		let mut buf = [0u8; PTR_SZ];
		self.idx.read_exact_at(&mut buf, off)?;
		Ok(decode_ptr(&buf))
	}

	pub fn write_ptr(&self, off: u64, val: u64) -> Result<()> {
		let buf = encode_ptr(val);
		self.idx.write_all_at(&buf, off)?;
		Ok(())
	}

	// ---- Record I/O -------------------------------------------------------

	/// Reads the index record at `off`. Used for chain/free-list walks,
	/// where the caller always has a concrete, non-zero offset in hand —
	/// the scan-continuation case has its own method so the two never
	/// share a code path that could confuse "offset 0" with "no more
	/// input to scan".
	pub fn read_idx_at(&mut self, off: u64) -> Result<IndexRecord> {
		self.idx.seek_to(off)?;
		let mut header = [0u8; PTR_SZ + IDXLEN_SIZE];
		self.idx.read_exact(&mut header).map_err(crate::error::Error::Io)?;
		self.decode_record_body(off, &header)
	}

	/// Continues a sequential scan from the current file position.
	/// Returns `None` at EOF.
	pub fn read_idx_sequential(&mut self) -> Result<Option<IndexRecord>> {
		let pos = self.idx.stream_position_or_fatal();
		let mut header = [0u8; PTR_SZ + IDXLEN_SIZE];
		let n = read_fully_or_partial(&mut self.idx, &mut header)?;
		if n == 0 {
			return Ok(None);
		}
		if n != header.len() {
			fatal!("truncated index record header at {}", pos);
		}
		Ok(Some(self.decode_record_body(pos, &header)?))
	}

	fn decode_record_body(&mut self, idxoff: u64, header: &[u8]) -> Result<IndexRecord> {
		let next = decode_ptr(&header[0..PTR_SZ]);
		let idxlen = decode_idxlen(&header[PTR_SZ..PTR_SZ + IDXLEN_SIZE]) as usize;
		if idxlen < IDXLEN_MIN || idxlen > IDXLEN_MAX {
			fatal!("index record length {} out of range at {}", idxlen, idxoff);
		}
		let buf = &mut self.idx_buf[0..idxlen];
		self.idx.read_exact(buf).map_err(|e| crate::error::Error::Io(e))?;
		if buf[idxlen - 1] != b'\n' {
			fatal!("index record at {} missing trailing newline", idxoff);
		}
		let payload = &buf[0..idxlen - 1];
		let first = payload.iter().position(|&b| b == SEP);
		let second = first.and_then(|f| payload[f + 1..].iter().position(|&b| b == SEP).map(|p| f + 1 + p));
		let (first, second) = match (first, second) {
			(Some(f), Some(s)) => (f, s),
			_ => fatal!("index record at {} has wrong number of separators", idxoff),
		};
		let key = payload[0..first].to_vec();
		let datoff_text =
			std::str::from_utf8(&payload[first + 1..second]).unwrap_or_else(|_| fatal!("non-UTF8 datoff field at {}", idxoff));
		let datlen_text =
			std::str::from_utf8(&payload[second + 1..]).unwrap_or_else(|_| fatal!("non-UTF8 datlen field at {}", idxoff));
		let datoff: u64 = datoff_text.parse().unwrap_or_else(|_| fatal!("malformed datoff at {}", idxoff));
		let datlen: u64 = datlen_text.parse().unwrap_or_else(|_| fatal!("malformed datlen at {}", idxoff));
		if datoff > crate::codec::PTR_MAX {
			fatal!("datoff {} out of range at {}", datoff, idxoff);
		}
		if datlen == 0 || datlen as usize > DATLEN_MAX {
			fatal!("datlen {} out of range at {}", datlen, idxoff);
		}
		Ok(IndexRecord { idxoff, next, key, datoff, datlen })
	}

	/// Writes an index record. `At(off)` overwrites a same-size record
	/// (tombstone reuse or a same-length replace); `Append` grows the file
	/// and reports the offset it landed at. Returns the `idxoff` the
	/// record now lives at.
	pub fn write_idx(&mut self, layout: &Layout, key: &[u8], datoff: u64, datlen: u64, next: u64, placement: Placement) -> Result<u64> {
		let payload_len = formatted_idx_payload_len(key, datoff, datlen);
		if !(IDXLEN_MIN..=IDXLEN_MAX).contains(&payload_len) {
			fatal!(
				"formatted index record of {} bytes out of [{}, {}] range — caller must validate before writing",
				payload_len,
				IDXLEN_MIN,
				IDXLEN_MAX,
			);
		}
		let idx_fd = self.idx_fd();
		let buf = &mut self.idx_buf[0..payload_len];
		let mut w = 0;
		buf[w..w + key.len()].copy_from_slice(key);
		w += key.len();
		buf[w] = SEP;
		w += 1;
		w += write_digits(&mut buf[w..], datoff);
		buf[w] = SEP;
		w += 1;
		w += write_digits(&mut buf[w..], datlen);
		buf[w] = b'\n';
		w += 1;
		debug_assert_eq!(w, payload_len);

		let header_next = encode_ptr(next);
		let header_len = encode_idxlen(payload_len as u64);

		match placement {
			Placement::At(off) => {
				let mut header = [0u8; PTR_SZ + IDXLEN_SIZE];
				header[0..PTR_SZ].copy_from_slice(&header_next);
				header[PTR_SZ..].copy_from_slice(&header_len);
				self.idx.write_all_at(&header, off)?;
				self.idx.write_all_at(buf, off + (PTR_SZ + IDXLEN_SIZE) as u64)?;
				Ok(off)
			}
			Placement::Append => {
				let _guard = LockGuard::acquire_blocking(idx_fd, LockKind::Write, layout.record_region_start(), 1);
				let off = self.idx.metadata()?.len();
				self.idx.seek_to(off)?;
				let mut slices =
					[IoSlice::new(&header_next), IoSlice::new(&header_len), IoSlice::new(buf)];
				write_vectored_all(&self.idx, &mut slices)?;
				Ok(off)
			}
		}
	}

	/// Reads `datlen` bytes at `datoff`, verifying and stripping the
	/// trailing newline required by invariant 3.
	pub fn read_dat(&mut self, datoff: u64, datlen: u64) -> Result<Vec<u8>> {
		let datlen = datlen as usize;
		if datlen == 0 || datlen > DATLEN_MAX {
			fatal!("datlen {} out of range", datlen);
		}
		let buf = &mut self.dat_buf[0..datlen];
		self.dat.read_exact_at(buf, datoff)?;
		if buf[datlen - 1] != b'\n' {
			fatal!("data record at {} missing trailing newline", datoff);
		}
		Ok(buf[0..datlen - 1].to_vec())
	}

	/// Writes a data record. `At(off)` overwrites in place (no lock: the
	/// caller holds the chain lock); `Append` takes the whole-file write
	/// lock on the data file for the duration of the append, to keep two
	/// concurrent appenders from landing on the same offset.
	/// Returns `(datoff, datlen)` where `datlen` includes the newline.
	pub fn write_dat(&mut self, data: &[u8], placement: Placement) -> Result<(u64, u64)> {
		let datlen = data.len() + 1;
		if datlen > DATLEN_MAX {
			fatal!("data record of {} bytes exceeds DATLEN_MAX", datlen);
		}
		match placement {
			Placement::At(off) => {
				let mut slices = [IoSlice::new(data), IoSlice::new(b"\n")];
				let mut tmp = Vec::with_capacity(datlen);
				for s in &mut slices {
					tmp.extend_from_slice(s);
				}
				self.dat.write_all_at(&tmp, off)?;
				Ok((off, datlen as u64))
			}
			Placement::Append => {
				let _guard = LockGuard::acquire_blocking(self.dat_fd(), LockKind::Write, 0, 0);
				let off = self.dat.metadata()?.len();
				self.dat.seek_to(off)?;
				let mut slices = [IoSlice::new(data), IoSlice::new(b"\n")];
				write_vectored_all(&self.dat, &mut slices)?;
				Ok((off, datlen as u64))
			}
		}
	}

	/// Overwrites `datlen` bytes at `datoff` with ASCII spaces followed by
	/// the newline (tombstoning a data record per invariant 4).
	pub fn blank_dat(&mut self, datoff: u64, datlen: u64) -> Result<()> {
		let datlen = datlen as usize;
		let buf = &mut self.dat_buf[0..datlen];
		for b in buf.iter_mut().take(datlen - 1) {
			*b = b' ';
		}
		buf[datlen - 1] = b'\n';
		self.dat.write_all_at(buf, datoff)?;
		Ok(())
	}

	/// Seeks the index file to just past the header, for `rewind`.
	pub fn seek_idx(&mut self, off: u64) -> Result<()> {
		self.idx.seek_to(off)
	}
}

/// Length of the `<key>:<datoff>:<datlen>\n` payload, used both by
/// `write_idx` and by callers that must validate a record's size against
/// `IDXLEN_MAX` *before* taking any locks (an oversize key/value is a
/// recoverable condition, not a corruption).
pub fn formatted_idx_payload_len(key: &[u8], datoff: u64, datlen: u64) -> usize {
	key.len() + 1 + count_digits(datoff) + 1 + count_digits(datlen) + 1
}

fn count_digits(mut n: u64) -> usize {
	if n == 0 {
		return 1;
	}
	let mut d = 0;
	while n > 0 {
		d += 1;
		n /= 10;
	}
	d
}

fn write_digits(out: &mut [u8], n: u64) -> usize {
	let s = n.to_string();
	out[0..s.len()].copy_from_slice(s.as_bytes());
	s.len()
}

fn read_fully_or_partial(file: &mut File, buf: &mut [u8]) -> Result<usize> {
	let mut total = 0;
	while total < buf.len() {
		let n = file.read(&mut buf[total..])?;
		if n == 0 {
			break;
		}
		total += n;
	}
	Ok(total)
}

trait SeekExt {
	fn stream_position_or_fatal(&mut self) -> u64;
	fn seek_to(&mut self, off: u64) -> Result<()>;
}

impl SeekExt for File {
	fn stream_position_or_fatal(&mut self) -> u64 {
		use std::io::Seek;
		self.stream_position().unwrap_or_else(|e| fatal!("stream_position failed: {}", e))
	}
	fn seek_to(&mut self, off: u64) -> Result<()> {
		use std::io::Seek;
		self.seek(io::SeekFrom::Start(off))?;
		Ok(())
	}
}
