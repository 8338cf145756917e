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

//! Reader and writer for SPSS system files.
//!
//! The [sys] module reads and writes `.sav` and `.zsav` files.  A file's
//! metadata becomes a [Dictionary](dictionary::Dictionary) and its data a
//! sequence of [Case](data::Case)s.

pub mod data;
pub mod dictionary;
pub mod endian;
pub mod format;
pub mod identifier;
pub mod sys;
pub mod variable;
