/* PSPP - a program for statistical analysis.
 * Copyright (C) 2025 Free Software Foundation, Inc.
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <http://www.gnu.org/licenses/>. */

//! Command-line access to SPSS system files.

use std::borrow::Cow;

use anyhow::Result;
use clap::Parser;
use encoding_rs::Encoding;
use pspp_sysfile::{data::Datum, sys::raw::Warning};
use thiserror::Error as ThisError;

mod convert;
mod show;

/// Reads, inspects, and rewrites SPSS system files.
#[derive(Parser, Debug)]
#[command(author, version, about)]
enum Cli {
    /// Converts a system file to CSV or to another system file.
    Convert(convert::Convert),

    /// Describes the contents of a system file.
    Show(show::Show),
}

fn main() -> Result<()> {
    match Cli::parse() {
        Cli::Convert(convert) => convert.run(),
        Cli::Show(show) => show.run(),
    }
}

#[derive(ThisError, Debug)]
#[error("{0:?} is not a known character encoding")]
struct UnknownEncoding(String);

/// Parses an `--encoding` argument.
fn encoding_arg(label: &str) -> Result<&'static Encoding, UnknownEncoding> {
    Encoding::for_label_no_replacement(label.as_bytes())
        .ok_or_else(|| UnknownEncoding(label.into()))
}

fn report(warning: Warning) {
    eprintln!("{warning}");
}

/// Renders `datum` as text, decoding strings with `encoding` and dropping
/// their trailing spaces.  System-missing values become `sysmis`.
fn plain_text<'a>(datum: &'a Datum, encoding: &'static Encoding, sysmis: &'a str) -> Cow<'a, str> {
    match datum {
        Datum::Number(Some(number)) => Cow::Owned(number.to_string()),
        Datum::Number(None) => Cow::Borrowed(sysmis),
        Datum::String(string) => match string.decode(encoding) {
            Cow::Borrowed(text) => Cow::Borrowed(text.trim_end()),
            Cow::Owned(text) => Cow::Owned(text.trim_end().into()),
        },
    }
}
