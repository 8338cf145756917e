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

//! Character encodings in system files.
//!
//! A system file can name its character encoding in two places: as a code
//! page number in the machine integer info record and as an IANA name in the
//! character encoding record.  This module maps between code page numbers and
//! [Encoding]s and decides which to use.

use encoding_rs::{Encoding, WINDOWS_1252};
use thiserror::Error as ThisError;

/// Code page numbers and the `encoding_rs` labels they correspond to, sorted
/// by code page number.
static CODEPAGES: &[(i32, &str)] = &[
    // 2 and 3 nominally mean 7-bit and 8-bit ASCII.  Real files that use them
    // often contain Latin-1 text, which windows-1252 decodes as well.
    (2, "windows-1252"),
    (3, "windows-1252"),
    (4, "shift_jis"),
    (866, "ibm866"),
    (874, "windows-874"),
    (932, "shift_jis"),
    (936, "gbk"),
    (949, "euc-kr"),
    (950, "big5"),
    (1250, "windows-1250"),
    (1251, "windows-1251"),
    (1252, "windows-1252"),
    (1253, "windows-1253"),
    (1254, "windows-1254"),
    (1255, "windows-1255"),
    (1256, "windows-1256"),
    (1257, "windows-1257"),
    (1258, "windows-1258"),
    (10000, "macintosh"),
    (10007, "x-mac-cyrillic"),
    (20127, "us-ascii"),
    (20866, "koi8-r"),
    (20932, "euc-jp"),
    (21866, "koi8-u"),
    (28591, "iso-8859-1"),
    (28592, "iso-8859-2"),
    (28593, "iso-8859-3"),
    (28594, "iso-8859-4"),
    (28595, "iso-8859-5"),
    (28596, "iso-8859-6"),
    (28597, "iso-8859-7"),
    (28598, "iso-8859-8"),
    (28599, "iso-8859-9"),
    (28600, "iso-8859-10"),
    (28603, "iso-8859-13"),
    (28604, "iso-8859-14"),
    (28605, "iso-8859-15"),
    (28606, "iso-8859-16"),
    (38598, "iso-8859-8-i"),
    (50220, "iso-2022-jp"),
    (51932, "euc-jp"),
    (51936, "gbk"),
    (51949, "euc-kr"),
    (54936, "gb18030"),
    (65001, "utf-8"),
];

/// Code page numbers that identify EBCDIC.
const EBCDIC_CODEPAGES: [i32; 2] = [1, 37];

/// Returns the code page number to write for `encoding`, if there is one.
pub fn codepage_from_encoding(encoding: &'static Encoding) -> Option<i32> {
    CODEPAGES
        .iter()
        .filter(|(codepage, _)| *codepage > 4)
        .find(|(_, label)| Encoding::for_label(label.as_bytes()) == Some(encoding))
        .map(|(codepage, _)| *codepage)
}

/// Returns the encoding for code page `codepage`.
pub fn codepage_to_encoding(codepage: i32) -> Result<&'static Encoding, Error> {
    if EBCDIC_CODEPAGES.contains(&codepage) {
        return Err(Error::Ebcdic);
    }
    let index = CODEPAGES
        .binary_search_by_key(&codepage, |(codepage, _)| *codepage)
        .map_err(|_| Error::UnknownCodepage(codepage))?;
    let label = CODEPAGES[index].1;
    Encoding::for_label(label.as_bytes()).ok_or_else(|| Error::UnknownEncoding(label.into()))
}

/// Returns the encoding named `name`, as found in a character encoding record.
pub fn name_to_encoding(name: &str) -> Result<&'static Encoding, Error> {
    if name.to_ascii_lowercase().starts_with("ebcdic") || name.eq_ignore_ascii_case("ibm037") {
        return Err(Error::Ebcdic);
    }
    Encoding::for_label_no_replacement(name.trim().as_bytes())
        .ok_or_else(|| Error::UnknownEncoding(name.into()))
}

/// A problem identifying a system file's character encoding.
#[derive(Clone, ThisError, Debug, PartialEq, Eq)]
pub enum Error {
    /// No encoding indicated.
    #[error("This system file does not indicate its own character encoding.  Using default encoding {}.  For best results, specify an encoding explicitly.", default_encoding().name())]
    NoEncoding,

    /// Unknown code page.
    #[error("This system file encodes text strings with unknown code page {0}.")]
    UnknownCodepage(i32),

    /// Unknown encoding name.
    #[error("This system file encodes text strings with unknown encoding {0}.")]
    UnknownEncoding(String),

    /// EBCDIC.
    #[error("This system file is encoded in EBCDIC, which is not supported.")]
    Ebcdic,
}

/// Returns the encoding assumed for a file that does not identify its own.
pub fn default_encoding() -> &'static Encoding {
    WINDOWS_1252
}

/// The encodings chosen for a system file.
///
/// Text in the dictionary (names, labels, string missing values) follows the
/// code page in the machine integer info record when that is usable, because
/// the dictionary precedes the character encoding record.  Text in the case
/// data follows the character encoding record.  Each falls back to the other
/// source and finally to [default_encoding].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Encodings {
    /// Encoding for dictionary strings.
    pub dictionary: &'static Encoding,

    /// Encoding for string data in cases.
    pub data: &'static Encoding,
}

impl Encodings {
    /// Uses `encoding` for everything.
    pub fn uniform(encoding: &'static Encoding) -> Self {
        Self {
            dictionary: encoding,
            data: encoding,
        }
    }

    /// Chooses encodings from the encoding record's `name` and the integer
    /// info record's `character_code`, either of which may be absent.  Returns
    /// the encodings plus any problem to report as a warning.
    ///
    /// Fails only for EBCDIC.
    pub fn resolve(
        name: Option<&str>,
        character_code: Option<i32>,
    ) -> Result<(Self, Option<Error>), Error> {
        let by_name = name.map(name_to_encoding);
        let by_codepage = character_code.map(codepage_to_encoding);
        for result in [&by_name, &by_codepage].into_iter().flatten() {
            if let Err(Error::Ebcdic) = result {
                return Err(Error::Ebcdic);
            }
        }

        let mut problem = None;
        let by_name = match by_name {
            Some(Ok(encoding)) => Some(encoding),
            Some(Err(error)) => {
                problem = Some(error);
                None
            }
            None => None,
        };
        let by_codepage = match by_codepage {
            Some(Ok(encoding)) => Some(encoding),
            Some(Err(error)) => {
                problem.get_or_insert(error);
                None
            }
            None => None,
        };

        let encodings = match (by_codepage, by_name) {
            (Some(dictionary), Some(data)) => Self { dictionary, data },
            (Some(encoding), None) | (None, Some(encoding)) => Self::uniform(encoding),
            (None, None) => {
                problem.get_or_insert(Error::NoEncoding);
                Self::uniform(default_encoding())
            }
        };
        Ok((encodings, problem))
    }
}

#[cfg(test)]
mod tests {
    use encoding_rs::{BIG5, SHIFT_JIS, UTF_8, WINDOWS_1251, WINDOWS_1252};

    use super::{codepage_from_encoding, codepage_to_encoding, Encodings, Error};

    #[test]
    fn codepages() {
        assert_eq!(codepage_to_encoding(65001), Ok(UTF_8));
        assert_eq!(codepage_to_encoding(1251), Ok(WINDOWS_1251));
        assert_eq!(codepage_to_encoding(932), Ok(SHIFT_JIS));
        assert_eq!(codepage_to_encoding(950), Ok(BIG5));
        assert_eq!(codepage_to_encoding(2), Ok(WINDOWS_1252));
        assert_eq!(codepage_to_encoding(1), Err(Error::Ebcdic));
        assert_eq!(codepage_to_encoding(12345), Err(Error::UnknownCodepage(12345)));

        assert_eq!(codepage_from_encoding(UTF_8), Some(65001));
        assert_eq!(codepage_from_encoding(WINDOWS_1252), Some(1252));
        assert_eq!(codepage_from_encoding(SHIFT_JIS), Some(932));
    }

    #[test]
    fn resolve() {
        assert_eq!(
            Encodings::resolve(Some("UTF-8"), Some(65001)),
            Ok((Encodings::uniform(UTF_8), None))
        );
        assert_eq!(
            Encodings::resolve(Some("utf-8"), Some(2)),
            Ok((
                Encodings {
                    dictionary: WINDOWS_1252,
                    data: UTF_8
                },
                None
            ))
        );
        assert_eq!(
            Encodings::resolve(Some("windows-1251"), Some(9999)),
            Ok((
                Encodings::uniform(WINDOWS_1251),
                Some(Error::UnknownCodepage(9999))
            ))
        );
        assert_eq!(
            Encodings::resolve(None, None),
            Ok((Encodings::uniform(WINDOWS_1252), Some(Error::NoEncoding)))
        );
        assert_eq!(Encodings::resolve(None, Some(1)), Err(Error::Ebcdic));
    }
}
