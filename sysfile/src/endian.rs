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

//! Converting big- and little-endian `[u8]` arrays to and from primitive types.
//!
//! System files record their byte order implicitly, through the `layout_code`
//! field in the file header, so every multibyte value read or written by this
//! crate passes through one of the traits here with the detected [Endian].

pub use binrw::Endian;
use serde::Serialize;

/// Converts a primitive type into a big- or little-endian `[u8]` array.
pub trait ToBytes<T, const N: usize> {
    fn to_bytes(self, value: T) -> [u8; N];
}

/// Parses a `[u8]` array as a big- or little-endian primitive type.
pub trait FromBytes<T, const N: usize> {
    /// Given 'bytes', returns `T`.
    fn parse(self, bytes: [u8; N]) -> T;
}

macro_rules! endian_conversions {
    ($($t:ty => $n:literal),* $(,)?) => {
        $(
            impl ToBytes<$t, $n> for Endian {
                fn to_bytes(self, value: $t) -> [u8; $n] {
                    match self {
                        Endian::Big => <$t>::to_be_bytes(value),
                        Endian::Little => <$t>::to_le_bytes(value),
                    }
                }
            }
            impl FromBytes<$t, $n> for Endian {
                fn parse(self, bytes: [u8; $n]) -> $t {
                    match self {
                        Endian::Big => <$t>::from_be_bytes(bytes),
                        Endian::Little => <$t>::from_le_bytes(bytes),
                    }
                }
            }
        )*
    };
}

endian_conversions! {
    u8 => 1, i8 => 1,
    u16 => 2, i16 => 2,
    u32 => 4, i32 => 4,
    u64 => 8, i64 => 8,
    f64 => 8,
}

/// Parses a system-missing-aware number: the most negative finite `f64` is
/// the system-missing value and yields `None`.
impl FromBytes<Option<f64>, 8> for Endian {
    fn parse(self, bytes: [u8; 8]) -> Option<f64> {
        let number: f64 = self.parse(bytes);
        (number != -f64::MAX).then_some(number)
    }
}

/// The floating-point representation used in a system file.
///
/// Only [FloatFormat::Ieee] files occur in practice.  The others can be
/// identified from the machine integer info record, but this crate refuses to
/// read them.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum FloatFormat {
    /// IEEE 754 binary64, in the file's integer byte order.
    Ieee,

    /// IBM System/360 hexadecimal floating point.
    Ibm,

    /// VAX D or G floating point.
    Vax,
}

impl FloatFormat {
    /// Interprets the `floating_point_rep` field of the machine integer info
    /// record.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::Ieee),
            2 => Some(Self::Ibm),
            3 => Some(Self::Vax),
            _ => None,
        }
    }

    /// Returns the `floating_point_rep` code for this format.
    pub fn code(self) -> i32 {
        match self {
            Self::Ieee => 1,
            Self::Ibm => 2,
            Self::Vax => 3,
        }
    }
}
