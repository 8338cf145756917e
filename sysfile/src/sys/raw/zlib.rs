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

//! ZLIB-compressed data.
//!
//! In a ZSAV file, the data record begins with a 24-byte [ZHeader] that points
//! to a [ZTrailer] at the end of the file.  The trailer indexes the blocks of
//! data between them.  Each block is an independent ZLIB stream that expands
//! to (usually) [ZBlock::DEFAULT_SIZE] bytes of simple-compressed data.

use std::{
    collections::VecDeque,
    fmt::{Display, Formatter, Result as FmtResult},
    io::{Error as IoError, ErrorKind, Read, Seek, SeekFrom, Take},
};

use binrw::{binrw, BinRead, BinWrite, Endian, Error as BinError};
use flate2::read::ZlibDecoder;
use serde::Serialize;
use thiserror::Error as ThisError;

use crate::sys::raw::{Error, Warning};

/// A ZLIB header in a system file.
#[derive(Clone, Debug, Serialize)]
pub struct ZHeader {
    /// File offset to the start of the record.
    pub offset: u64,

    /// Raw header.
    #[serde(flatten)]
    pub inner: RawZHeader,
}

/// A ZLIB header in a system file.
#[derive(Clone, Debug, BinRead, BinWrite, Serialize)]
pub struct RawZHeader {
    /// File offset to the ZLIB data header.
    pub zheader_offset: u64,

    /// File offset to the ZLIB trailer.
    pub ztrailer_offset: u64,

    /// Length of the ZLIB trailer in bytes.
    pub ztrailer_len: u64,
}

impl ZHeader {
    /// Reads a ZLIB header from `r` using `endian`.
    pub fn read<R>(r: &mut R, endian: Endian, warn: &mut dyn FnMut(Warning)) -> Result<ZHeader, Error>
    where
        R: Read + Seek,
    {
        let offset = r.stream_position()?;
        let inner = RawZHeader::read_options(r, endian, ()).map_err(|e| Error {
            offsets: Some(offset..offset + 24),
            details: ZHeaderError::from(e).into(),
        })?;

        if inner.ztrailer_offset < offset {
            Err(ZHeaderError::ImpossibleZTrailerOffset(inner.ztrailer_offset))
        } else if inner.ztrailer_len < 24 || inner.ztrailer_len % 24 != 0 {
            Err(ZHeaderError::InvalidZTrailerLength(inner.ztrailer_len))
        } else {
            Ok(())
        }
        .map_err(|details| Error::new(Some(offset..offset + 24), details.into()))?;

        if inner.zheader_offset != offset {
            warn(Warning::new(
                Some(offset..offset + 8),
                ZHeaderWarning::UnexpectedZHeaderOffset {
                    actual: inner.zheader_offset,
                    expected: offset,
                },
            ));
        }
        Ok(ZHeader { offset, inner })
    }
}

/// Error reading a [ZHeader].
#[derive(ThisError, Debug)]
pub enum ZHeaderError {
    /// I/O error via [mod@binrw].
    #[error("{}", DisplayBinError(.0, "ZLIB header"))]
    BinError(#[from] BinError),

    /// Impossible ztrailer_offset {0:#x}.
    #[error("Impossible ztrailer_offset {0:#x}.")]
    ImpossibleZTrailerOffset(
        /// `ztrailer_offset`
        u64,
    ),

    /// Invalid ZLIB trailer length {0}.
    #[error("Invalid ZLIB trailer length {0}.")]
    InvalidZTrailerLength(
        /// ZLIB trailer length.
        u64,
    ),
}

/// Warning for a ZLIB header.
#[derive(ThisError, Clone, Debug)]
pub enum ZHeaderWarning {
    /// `zheader_offset` does not point to the header itself.
    #[error("zheader_offset is {actual:#x} instead of expected {expected:#x}.")]
    UnexpectedZHeaderOffset {
        /// Actual `zheader_offset`.
        actual: u64,
        /// Expected `zheader_offset`.
        expected: u64,
    },
}

/// A ZLIB trailer in a system file.
#[derive(Clone, Debug, Serialize)]
pub struct ZTrailer {
    /// File offset to the start of the record.
    pub offset: u64,

    /// The raw trailer.
    #[serde(flatten)]
    pub inner: RawZTrailer,
}

/// A ZLIB trailer in a system file.
#[binrw]
#[derive(Clone, Debug, Serialize)]
pub struct RawZTrailer {
    /// Compression bias as a negative integer, e.g. -100.
    pub int_bias: i64,

    /// Always observed as zero.
    pub zero: u64,

    /// Uncompressed size of each block, except possibly the last.  Only
    /// [ZBlock::DEFAULT_SIZE] has been observed in files written by SPSS.
    pub block_size: u32,

    /// Number of blocks.
    #[bw(calc(blocks.len() as u32))]
    pub n_blocks: u32,

    /// Block descriptors, always `(ztrailer_len - 24) / 24)` of them.
    #[br(count = n_blocks)]
    pub blocks: Vec<ZBlock>,
}

impl RawZTrailer {
    /// Returns the length of the trailer when it is written, in bytes.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        24 + self.blocks.len() * 24
    }
}

/// Warning for a ZLIB trailer record.
#[derive(ThisError, Clone, Debug)]
pub enum ZlibTrailerWarning {
    /// Nonzero `zero` field.
    #[error("Expected zero field has nonzero value {0}.")]
    WrongZlibTrailerZero(
        /// Actual value that should have been zero.
        u64,
    ),

    /// Unusual block size.
    #[error("Unexpected {0:#x}-byte block size (expected 0x3ff000).")]
    UnusualBlockSize(
        /// Block size read from file.
        u32,
    ),

    /// Wrong block size.
    #[error(
        "Block descriptor {index} reported block size {actual:#x}, when {expected:#x} was expected."
    )]
    ZlibTrailerBlockWrongSize {
        /// 0-based block descriptor index.
        index: usize,
        /// Actual block size.
        actual: u32,
        /// Expected block size.
        expected: u32,
    },

    /// Block too big.
    #[error(
        "Block descriptor {index} reported block size {actual:#x}, when at most {max_expected:#x} was expected."
    )]
    ZlibTrailerBlockTooBig {
        /// 0-based block descriptor index.
        index: usize,
        /// Actual block size.
        actual: u32,
        /// Maximum expected block size.
        max_expected: u32,
    },
}

/// A ZLIB block descriptor in a system file.
#[derive(Clone, Debug, BinRead, BinWrite, Serialize)]
pub struct ZBlock {
    /// Offset of block of data if simple compression were used.
    pub uncompressed_ofs: u64,

    /// Actual offset within the file of the compressed data block.
    pub compressed_ofs: u64,

    /// The number of bytes in this data block after decompression.  This is
    /// `block_size` in every data block but the last, which may be smaller.
    pub uncompressed_size: u32,

    /// The number of bytes in this data block, as stored compressed in this
    /// file.
    pub compressed_size: u32,
}

impl ZBlock {
    /// The block size that SPSS writes.
    pub const DEFAULT_SIZE: u32 = 0x3ff000;

    /// Returns true if the uncompressed and compressed sizes are plausible.
    ///
    /// [zlib Technical Details] says that the maximum expansion from
    /// compression, with worst-case parameters, is 13.5% plus 11 bytes.  This
    /// code checks for an expansion of more than 14.3% plus 11 bytes.
    ///
    /// [zlib Technical Details]: http://www.zlib.net/zlib_tech.html
    fn has_plausible_sizes(&self) -> bool {
        self.uncompressed_size
            .checked_add(self.uncompressed_size / 7 + 11)
            .is_some_and(|max| self.compressed_size <= max)
    }
}

struct DisplayBinError<'a>(&'a BinError, &'static str);

impl<'a> Display for DisplayBinError<'a> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        if self.0.is_eof() {
            write!(f, "Unexpected end-of-file reading {}", self.1)
        } else {
            write!(f, "Error reading {}: {}", self.1, self.0.root_cause())
        }
    }
}

/// Error reading a [ZTrailer].
#[derive(ThisError, Debug)]
pub enum ZTrailerError {
    /// I/O error via [mod@binrw].
    #[error("{}", DisplayBinError(.0, "ZLIB trailer"))]
    BinError(#[from] BinError),

    /// ZLIB trailer bias {actual} is not {expected} as expected from file
    /// header bias.
    #[error("Bias {actual} is not {expected} as expected from file header.")]
    WrongZlibTrailerBias {
        /// ZLIB trailer bias read from file.
        actual: i64,
        /// Expected ZLIB trailer bias.
        expected: f64,
    },

    /// Block count differs from expected block count calculated from trailer
    /// length.
    #[error(
        "Block count {n_blocks} differs from expected block count {expected_n_blocks} calculated from trailer length {ztrailer_len}."
    )]
    BadZlibTrailerNBlocks {
        /// Number of blocks.
        n_blocks: usize,
        /// Expected number of blocks.
        expected_n_blocks: u64,
        /// ZLIB trailer length in bytes.
        ztrailer_len: u64,
    },

    /// ZLIB block descriptor reported uncompressed data offset different from
    /// expected.
    #[error(
        "Block descriptor {index} reported uncompressed data offset {actual:#x}, when {expected:#x} was expected."
    )]
    ZlibTrailerBlockWrongUncmpOfs {
        /// Block descriptor index.
        index: usize,
        /// Actual uncompressed data offset.
        actual: u64,
        /// Expected uncompressed data offset.
        expected: u64,
    },

    /// Block descriptor {index} reported compressed data offset
    /// {actual:#x}, when {expected:#x} was expected.
    #[error(
        "Block descriptor {index} reported compressed data offset {actual:#x}, when {expected:#x} was expected."
    )]
    ZlibTrailerBlockWrongCmpOfs {
        /// Block descriptor index.
        index: usize,
        /// Actual compressed data offset.
        actual: u64,
        /// Expected compressed data offset.
        expected: u64,
    },

    /// Block descriptor {index} reports compressed size {compressed_size}
    /// and uncompressed size {uncompressed_size}.
    #[error(
        "Block descriptor {index} reports compressed size {compressed_size} and uncompressed size {uncompressed_size}."
    )]
    ZlibExpansion {
        /// Block descriptor index.
        index: usize,
        /// Compressed size.
        compressed_size: u32,
        /// Uncompressed size.
        uncompressed_size: u32,
    },

    /// ZLIB trailer at unexpected offset.
    #[error(
        "ZLIB trailer is at offset {actual:#x} but {expected:#x} would be expected from block descriptors."
    )]
    ZlibTrailerOffsetInconsistency {
        /// Expected offset.
        expected: u64,
        /// Actual offset.
        actual: u64,
    },
}

impl ZTrailer {
    /// Reads a ZLIB trailer from `reader` using `endian`.  `bias` is the
    /// floating-point bias for confirmation against the trailer, and `zheader`
    /// is the previously read ZLIB header.  Uses `warn` to report warnings.
    ///
    /// On success, `reader` is positioned where it was on entry, at the start
    /// of the compressed data.
    pub fn read<R>(
        reader: &mut R,
        endian: Endian,
        bias: f64,
        zheader: &RawZHeader,
        warn: &mut dyn FnMut(Warning),
    ) -> Result<ZTrailer, Error>
    where
        R: Read + Seek,
    {
        let start_offset = reader.stream_position()?;
        let offset = zheader.ztrailer_offset;
        reader.seek(SeekFrom::Start(offset))?;
        let inner = RawZTrailer::read_options(reader, endian, ()).map_err(|e| Error {
            offsets: Some(offset..offset + zheader.ztrailer_len),
            details: ZTrailerError::from(e).into(),
        })?;
        let expected_n_blocks = (zheader.ztrailer_len - 24) / 24;
        if inner.int_bias as f64 != -bias {
            Err(ZTrailerError::WrongZlibTrailerBias {
                actual: inner.int_bias,
                expected: -bias,
            })
        } else if inner.blocks.len() as u64 != expected_n_blocks {
            Err(ZTrailerError::BadZlibTrailerNBlocks {
                n_blocks: inner.blocks.len(),
                expected_n_blocks,
                ztrailer_len: zheader.ztrailer_len,
            })
        } else {
            Ok(())
        }
        .map_err(|details| Error::new(Some(offset..offset + 24), details.into()))?;

        if inner.zero != 0 {
            warn(Warning::new(
                Some(offset + 8..offset + 16),
                ZlibTrailerWarning::WrongZlibTrailerZero(inner.zero),
            ));
        }
        if inner.block_size != ZBlock::DEFAULT_SIZE {
            warn(Warning::new(
                Some(offset + 16..offset + 20),
                ZlibTrailerWarning::UnusualBlockSize(inner.block_size),
            ));
        }

        let mut expected_uncmp_ofs = zheader.zheader_offset;
        let mut expected_cmp_ofs = zheader.zheader_offset + 24;
        for (index, block) in inner.blocks.iter().enumerate() {
            let block_start = offset + 24 + 24 * index as u64;
            let block_offsets = block_start..block_start + 24;

            if block.uncompressed_ofs != expected_uncmp_ofs {
                Err(ZTrailerError::ZlibTrailerBlockWrongUncmpOfs {
                    index,
                    actual: block.uncompressed_ofs,
                    expected: expected_uncmp_ofs,
                })
            } else if block.compressed_ofs != expected_cmp_ofs {
                Err(ZTrailerError::ZlibTrailerBlockWrongCmpOfs {
                    index,
                    actual: block.compressed_ofs,
                    expected: expected_cmp_ofs,
                })
            } else if !block.has_plausible_sizes() {
                Err(ZTrailerError::ZlibExpansion {
                    index,
                    compressed_size: block.compressed_size,
                    uncompressed_size: block.uncompressed_size,
                })
            } else {
                Ok(())
            }
            .map_err(|details| Error::new(Some(block_offsets.clone()), details.into()))?;

            if index < inner.blocks.len() - 1 {
                if block.uncompressed_size != inner.block_size {
                    warn(Warning::new(
                        Some(block_offsets),
                        ZlibTrailerWarning::ZlibTrailerBlockWrongSize {
                            index,
                            actual: block.uncompressed_size,
                            expected: inner.block_size,
                        },
                    ));
                }
            } else if block.uncompressed_size > inner.block_size {
                warn(Warning::new(
                    Some(block_offsets),
                    ZlibTrailerWarning::ZlibTrailerBlockTooBig {
                        index,
                        actual: block.uncompressed_size,
                        max_expected: inner.block_size,
                    },
                ));
            }

            expected_cmp_ofs += block.compressed_size as u64;
            expected_uncmp_ofs += block.uncompressed_size as u64;
        }

        if expected_cmp_ofs != zheader.ztrailer_offset {
            return Err(Error::new(
                Some(offset..offset + inner.len() as u64),
                ZTrailerError::ZlibTrailerOffsetInconsistency {
                    expected: expected_cmp_ofs,
                    actual: zheader.ztrailer_offset,
                }
                .into(),
            ));
        }

        reader.seek(SeekFrom::Start(start_offset))?;
        Ok(ZTrailer { offset, inner })
    }
}

/// Reads the simple-compressed data inside the blocks of a ZLIB-compressed
/// data record.
///
/// Each block is a separate ZLIB stream, so a fresh decoder starts at each
/// block's `compressed_ofs`.
pub struct ZlibReader<R>
where
    R: Read + Seek,
{
    reader: Option<R>,
    decoder: Option<ZlibDecoder<Take<R>>>,
    blocks: VecDeque<ZBlock>,

    /// Number of bytes still expected from the current block.
    remaining: u64,
}

impl<R> ZlibReader<R>
where
    R: Read + Seek,
{
    /// Constructs a reader for the blocks that `trailer` describes.
    pub fn new(reader: R, trailer: &ZTrailer) -> Self {
        Self {
            reader: Some(reader),
            decoder: None,
            blocks: trailer.inner.blocks.iter().cloned().collect(),
            remaining: 0,
        }
    }

    fn start_block(&mut self, block: ZBlock) -> Result<(), IoError> {
        let Some(mut reader) = self.reader.take() else {
            return Ok(());
        };
        if let Err(error) = reader.seek(SeekFrom::Start(block.compressed_ofs)) {
            self.reader = Some(reader);
            return Err(error);
        }
        self.remaining = block.uncompressed_size as u64;
        self.decoder = Some(ZlibDecoder::new(reader.take(block.compressed_size as u64)));
        Ok(())
    }
}

impl<R> Read for ZlibReader<R>
where
    R: Read + Seek,
{
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, IoError> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            match &mut self.decoder {
                Some(decoder) => {
                    let n = decoder.read(buf)?;
                    if n > 0 {
                        self.remaining = self.remaining.checked_sub(n as u64).ok_or_else(|| {
                            IoError::new(
                                ErrorKind::InvalidData,
                                "ZLIB block expanded to more than its declared size",
                            )
                        })?;
                        return Ok(n);
                    }
                    if self.remaining > 0 {
                        return Err(IoError::new(
                            ErrorKind::InvalidData,
                            format!(
                                "ZLIB block ended {} bytes short of its declared size",
                                self.remaining
                            ),
                        ));
                    }
                    if let Some(decoder) = self.decoder.take() {
                        self.reader = Some(decoder.into_inner().into_inner());
                    }
                }
                None => match self.blocks.pop_front() {
                    Some(block) => self.start_block(block)?,
                    None => return Ok(0),
                },
            }
        }
    }
}
