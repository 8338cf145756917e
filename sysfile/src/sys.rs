// PSPP - a program for statistical analysis.
// Copyright (C) 2025 Free Software Foundation, Inc.
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later
// version.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// this program.  If not, see <http://www.gnu.org/licenses/>.

//! SPSS system files.
//!
//! A system file holds a dictionary, which describes variables and the file
//! as a whole, followed by case data, either uncompressed or with one of two
//! kinds of compression.  [ReadOptions] reads a file into a [SystemFile], and
//! [WriteOptions] starts writing one with a [Writer].
//!
//! Reading happens in two layers.  [raw] splits the file into records without
//! interpreting their text, and this module turns those records into a
//! [Dictionary](crate::dictionary::Dictionary), warning about anything odd.

#![cfg_attr(not(test), warn(missing_docs))]

use binrw::{BinRead, BinWrite, Endian};
use serde::{Serialize, Serializer};

mod cooked;
pub use cooked::*;
mod text;
pub mod encoding;
pub mod raw;

#[cfg(test)]
pub mod sack;

mod write;
pub use write::{SystemFileVersion, WriteOptions, Writer};

#[cfg(test)]
mod test;

fn serialize_endian<S>(endian: &Endian, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match endian {
        Endian::Big => serializer.serialize_unit_variant("Endian", 0, "Big"),
        Endian::Little => serializer.serialize_unit_variant("Endian", 1, "Little"),
    }
}

/// A product version number `major.minor.revision`, as stored in the integer
/// info record.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, BinRead, BinWrite, Serialize,
)]
pub struct ProductVersion(
    /// Major version.
    pub i32,
    /// Minor version.
    pub i32,
    /// Revision.
    pub i32,
);

impl ProductVersion {
    /// This crate's version.
    pub const VERSION: Self = {
        const fn parse(s: &str) -> i32 {
            let bytes = s.as_bytes();
            let mut value = 0;
            let mut i = 0;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                value = value * 10 + (bytes[i] - b'0') as i32;
                i += 1;
            }
            value
        }
        Self(
            parse(env!("CARGO_PKG_VERSION_MAJOR")),
            parse(env!("CARGO_PKG_VERSION_MINOR")),
            parse(env!("CARGO_PKG_VERSION_PATCH")),
        )
    };
}

impl std::fmt::Display for ProductVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.0, self.1, self.2)
    }
}
