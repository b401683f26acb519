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

//! An embedded key-value store backed by a pair of plain files: an index
//! file holding an external-chaining hash table plus one free list, and a
//! data file holding newline-terminated values. Both files are ordinary
//! POSIX files a text editor can open; concurrency between processes
//! sharing them is serialized with `fcntl` byte-range advisory locks
//! rather than an in-process mutex, since the store has no server and no
//! in-process synchronization is visible across process boundaries.
//!
//! ```no_run
//! use chainkv::{Database, Options, StoreMode};
//!
//! let mut db = Database::create("/tmp/my", Options::default())?;
//! db.store(b"key", b"value", StoreMode::Insert);
//! assert_eq!(db.fetch(b"key"), Some(b"value".to_vec()));
//! # Ok::<(), chainkv::Error>(())
//! ```

pub mod codec;
pub mod error;
pub mod layout;
pub mod lock;

mod cursor;
mod db;
mod raw;

pub use db::{Counters, Database, DeleteOutcome, Options, StoreMode, StoreOutcome};
pub use error::{Error, Result};
