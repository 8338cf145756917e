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

//! Print and write formats.
//!
//! A system file packs each variable's print and write format into a 32-bit
//! integer `(type << 16) | (width << 8) | decimals`.  Unknown or mismatched
//! formats are common in real files, so readers fall back to
//! [Format::default_for_width] rather than rejecting the file.

use std::fmt::{Display, Formatter, Result as FmtResult};

use serde::{Serialize, Serializer};
use thiserror::Error as ThisError;

use crate::variable::VarWidth;

/// An invalid format.
#[derive(Clone, ThisError, Debug, PartialEq, Eq)]
pub enum Error {
    /// Unknown format type code.
    #[error("Unknown format type {0}.")]
    UnknownType(u16),

    /// Width out of range.
    #[error("Format {format} specifies width {w}, but {type_} requires a width between {min} and {max}.")]
    BadWidth {
        /// The bad format.
        format: String,
        /// Its type.
        type_: Type,
        /// Its width.
        w: u16,
        /// Minimum width.
        min: u16,
        /// Maximum width.
        max: u16,
    },

    /// Odd width for a format that requires an even one.
    #[error("Format {0} has an odd width, but only even widths are allowed.")]
    OddWidth(String),

    /// Too many decimal places.
    #[error("Format {format} allows at most {max} decimal places.")]
    TooManyDecimals {
        /// The bad format.
        format: String,
        /// Maximum decimal places.
        max: u8,
    },

    /// String format for a numeric variable.
    #[error("Numeric variable is not compatible with string format {0}.")]
    StringFormatForNumeric(String),

    /// Numeric format for a string variable.
    #[error("String variable is not compatible with numeric format {0}.")]
    NumericFormatForString(String),

    /// String format whose width does not match the variable.
    #[error("String variable with width {width} is not compatible with format {format}.")]
    WrongStringWidth {
        /// The bad format.
        format: String,
        /// The variable's width.
        width: u16,
    },
}

/// A format type.
///
/// The variants are in the same order as [TYPES].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[allow(missing_docs)]
pub enum Type {
    F,
    Comma,
    Dot,
    Dollar,
    Pct,
    E,
    CCA,
    CCB,
    CCC,
    CCD,
    CCE,
    N,
    Z,
    P,
    PK,
    IB,
    PIB,
    PIBHex,
    RB,
    RBHex,
    Date,
    ADate,
    EDate,
    JDate,
    SDate,
    QYr,
    MoYr,
    WkYr,
    DateTime,
    YmdHms,
    MTime,
    Time,
    DTime,
    WkDay,
    Month,
    A,
    AHex,
}

/// How a format type treats decimal places.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Decimals {
    None,
    /// Up to `width - reserve` decimals.
    Reserve(u16),
}

struct TypeInfo {
    type_: Type,
    code: u16,
    name: &'static str,
    min_width: u16,
    max_width: u16,
    decimals: Decimals,
}

const fn info(
    type_: Type,
    code: u16,
    name: &'static str,
    min_width: u16,
    max_width: u16,
    decimals: Decimals,
) -> TypeInfo {
    TypeInfo {
        type_,
        code,
        name,
        min_width,
        max_width,
        decimals,
    }
}

use Decimals::{None as NoDec, Reserve};

static TYPES: [TypeInfo; 37] = [
    info(Type::F, 5, "F", 1, 40, Reserve(1)),
    info(Type::Comma, 3, "COMMA", 1, 40, Reserve(1)),
    info(Type::Dot, 32, "DOT", 1, 40, Reserve(1)),
    info(Type::Dollar, 4, "DOLLAR", 2, 40, Reserve(2)),
    info(Type::Pct, 31, "PCT", 2, 40, Reserve(2)),
    info(Type::E, 17, "E", 6, 40, Reserve(7)),
    info(Type::CCA, 33, "CCA", 2, 40, Reserve(1)),
    info(Type::CCB, 34, "CCB", 2, 40, Reserve(1)),
    info(Type::CCC, 35, "CCC", 2, 40, Reserve(1)),
    info(Type::CCD, 36, "CCD", 2, 40, Reserve(1)),
    info(Type::CCE, 37, "CCE", 2, 40, Reserve(1)),
    info(Type::N, 16, "N", 1, 40, Reserve(0)),
    info(Type::Z, 15, "Z", 1, 40, Reserve(0)),
    info(Type::P, 8, "P", 1, 16, Reserve(0)),
    info(Type::PK, 10, "PK", 1, 16, Reserve(0)),
    info(Type::IB, 6, "IB", 1, 8, Reserve(0)),
    info(Type::PIB, 9, "PIB", 1, 8, Reserve(0)),
    info(Type::PIBHex, 7, "PIBHEX", 2, 16, NoDec),
    info(Type::RB, 11, "RB", 2, 8, NoDec),
    info(Type::RBHex, 12, "RBHEX", 4, 16, NoDec),
    info(Type::Date, 20, "DATE", 9, 40, NoDec),
    info(Type::ADate, 23, "ADATE", 8, 40, NoDec),
    info(Type::EDate, 38, "EDATE", 8, 40, NoDec),
    info(Type::JDate, 24, "JDATE", 5, 40, NoDec),
    info(Type::SDate, 39, "SDATE", 8, 40, NoDec),
    info(Type::QYr, 29, "QYR", 6, 40, NoDec),
    info(Type::MoYr, 28, "MOYR", 6, 40, NoDec),
    info(Type::WkYr, 30, "WKYR", 8, 40, NoDec),
    info(Type::DateTime, 22, "DATETIME", 17, 40, Reserve(18)),
    info(Type::YmdHms, 41, "YMDHMS", 16, 40, Reserve(17)),
    info(Type::MTime, 40, "MTIME", 5, 40, Reserve(6)),
    info(Type::Time, 21, "TIME", 5, 40, Reserve(6)),
    info(Type::DTime, 25, "DTIME", 8, 40, Reserve(9)),
    info(Type::WkDay, 26, "WKDAY", 2, 40, NoDec),
    info(Type::Month, 27, "MONTH", 3, 40, NoDec),
    info(Type::A, 1, "A", 1, 32767, NoDec),
    info(Type::AHex, 2, "AHEX", 2, 65534, NoDec),
];

impl Type {
    fn info(self) -> &'static TypeInfo {
        &TYPES[self as usize]
    }

    /// Returns the type for a system file format code.
    pub fn from_code(code: u16) -> Result<Self, Error> {
        TYPES
            .iter()
            .find(|info| info.code == code)
            .map(|info| info.type_)
            .ok_or(Error::UnknownType(code))
    }

    /// Returns this type's system file format code.
    pub fn code(self) -> u16 {
        self.info().code
    }

    /// Returns true for string formats `A` and `AHEX`.
    pub fn is_string(self) -> bool {
        matches!(self, Type::A | Type::AHex)
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.info().name)
    }
}

/// A valid print or write format.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Format {
    type_: Type,
    w: u16,
    d: u8,
}

impl Format {
    /// `F8.2`, the default numeric format.
    pub const F8_2: Format = Format {
        type_: Type::F,
        w: 8,
        d: 2,
    };

    /// Checks and constructs a format.
    pub fn new(type_: Type, w: u16, d: u8) -> Result<Self, Error> {
        let format = Self { type_, w, d };
        let info = type_.info();
        if !(info.min_width..=info.max_width).contains(&w) {
            return Err(Error::BadWidth {
                format: format.to_string(),
                type_,
                w,
                min: info.min_width,
                max: info.max_width,
            });
        }
        if type_ == Type::AHex && w % 2 != 0 {
            return Err(Error::OddWidth(format.to_string()));
        }
        let max = match info.decimals {
            Decimals::None => 0,
            Decimals::Reserve(reserve) => w.saturating_sub(reserve).min(16) as u8,
        };
        if d > max {
            return Err(Error::TooManyDecimals {
                format: format.to_string(),
                max,
            });
        }
        Ok(format)
    }

    /// Returns the default format for a variable of the given `width`.
    pub fn default_for_width(width: VarWidth) -> Self {
        match width {
            VarWidth::Numeric => Self::F8_2,
            VarWidth::String(w) => Self {
                type_: Type::A,
                w,
                d: 0,
            },
        }
    }

    /// Unpacks and checks a format in the system file packed form.
    pub fn from_raw(raw: u32) -> Result<Self, Error> {
        let type_ = Type::from_code((raw >> 16) as u16)?;
        Self::new(type_, ((raw >> 8) & 0xff) as u16, raw as u8)
    }

    /// Packs this format for a system file.  Only formats with widths up to
    /// 255 can be packed, so wider string formats become `A255`.
    pub fn to_raw(self) -> u32 {
        let (type_, w) = match self.w {
            0..=255 => (self.type_, self.w),
            _ => (Type::A, 255),
        };
        ((type_.code() as u32) << 16) | ((w as u32) << 8) | self.d as u32
    }

    /// Returns the format's type.
    pub fn type_(self) -> Type {
        self.type_
    }

    /// Returns the format's width.
    pub fn w(self) -> u16 {
        self.w
    }

    /// Returns the number of decimal places.
    pub fn d(self) -> u8 {
        self.d
    }

    /// Checks that this format can display a variable of the given `width`.
    pub fn check_width(self, width: VarWidth) -> Result<(), Error> {
        match (width, self.type_) {
            (VarWidth::Numeric, type_) if type_.is_string() => {
                Err(Error::StringFormatForNumeric(self.to_string()))
            }
            (VarWidth::Numeric, _) => Ok(()),
            (VarWidth::String(_), type_) if !type_.is_string() => {
                Err(Error::NumericFormatForString(self.to_string()))
            }
            (VarWidth::String(w), _) if self.resized(width) != self => {
                Err(Error::WrongStringWidth {
                    format: self.to_string(),
                    width: w,
                })
            }
            (VarWidth::String(_), _) => Ok(()),
        }
    }

    /// Returns this format adjusted to display a variable of the given
    /// `width`.  Numeric formats are unchanged.
    pub fn resized(self, width: VarWidth) -> Self {
        match (self.type_, width) {
            (Type::A, VarWidth::String(w)) => Self { w, ..self },
            (Type::AHex, VarWidth::String(w)) => Self {
                w: w.saturating_mul(2),
                ..self
            },
            _ => self,
        }
    }

    /// Decodes packed format `raw` for a variable of the given `width`.  On
    /// failure, returns the default format for the width along with the
    /// reason.
    pub fn decode(raw: u32, width: VarWidth) -> (Self, Option<Error>) {
        match Self::from_raw(raw).and_then(|format| format.check_width(width).map(|()| format)) {
            Ok(format) => (format, None),
            Err(error) => (Self::default_for_width(width), Some(error)),
        }
    }
}

impl Display for Format {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}{}", self.type_, self.w)?;
        if self.type_.info().decimals != Decimals::None {
            write!(f, ".{}", self.d)?;
        }
        Ok(())
    }
}

impl Serialize for Format {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}
