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

use std::fmt;
use std::io;

/// Errors that can arise while opening a database.
///
/// Every other public operation on an open `Database` either succeeds or
/// is fatal (see [`fatal`]): I/O failures, lock-system failures and
/// structural corruption are not represented here because the caller has
/// no useful recovery beyond the diagnostic that `fatal!` already prints.
#[derive(Debug)]
pub enum Error {
	Io(io::Error),
	Lock(io::Error),
	Corruption(String),
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Error::Io(e) => write!(f, "I/O error: {}", e),
			Error::Lock(e) => write!(f, "lock error: {}", e),
			Error::Corruption(msg) => write!(f, "corrupt database: {}", msg),
		}
	}
}

impl std::error::Error for Error {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			Error::Io(e) | Error::Lock(e) => Some(e),
			Error::Corruption(_) => None,
		}
	}
}

impl From<io::Error> for Error {
	fn from(e: io::Error) -> Error {
		Error::Io(e)
	}
}

pub type Result<T> = std::result::Result<T, Error>;

/// The fatal-diagnostic sink: logs at `error!` and then panics.
///
/// Any I/O syscall failure, lock-system failure, or structural integrity
/// violation encountered while reading is fatal: it indicates filesystem
/// corruption or a programming error and cannot be safely continued from.
macro_rules! fatal {
	($($arg:tt)*) => {{
		let msg = format!($($arg)*);
		log::error!(target: "chainkv", "{}", msg);
		panic!("chainkv: fatal: {}", msg);
	}};
}

pub(crate) use fatal;

/// Unwraps a `Result` produced by an internal helper, routing any `Error`
/// into the fatal sink. Used at the boundary between the internal
/// `Result`-based plumbing and the public API, which never returns an
/// `Err` for recoverable conditions like a missing key or an insert
/// collision — those are ordinary enum variants, not errors.
pub(crate) fn unwrap_or_fatal<T>(result: Result<T>) -> T {
	match result {
		Ok(v) => v,
		Err(e) => fatal!("{}", e),
	}
}
