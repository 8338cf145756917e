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

use std::{
    fs::File,
    io::{stdout, BufReader, Write},
    path::{Path, PathBuf},
};

use anyhow::{bail, Result};
use clap::{Args, ValueEnum};
use encoding_rs::Encoding;
use itertools::Itertools;
use pspp_sysfile::{
    data::{Case, Datum},
    dictionary::{Dictionary, MultipleResponseType},
    sys::{
        raw::{Magic, Reader},
        Metadata, ReadOptions,
    },
    variable::{MissingValueRange, MissingValues, Variable},
};
use serde::Serialize;

use crate::{encoding_arg, plain_text, report};

/// Prints what a system file contains.
#[derive(Args, Clone, Debug)]
pub struct Show {
    /// What to print.
    #[arg(value_enum)]
    mode: Mode,

    /// System file to read.
    input: PathBuf,

    /// File to write.  Output goes to stdout if this is omitted.
    output: Option<PathBuf>,

    /// Character encoding of the input, overriding what the file says.
    #[arg(long, value_parser = encoding_arg, help_heading = "Input")]
    encoding: Option<&'static Encoding>,

    /// Stop at the first warning.
    #[arg(long, help_heading = "Input")]
    strict: bool,

    /// Also print up to this many cases, or all of them if no number is
    /// given.
    #[arg(
        long = "data",
        num_args = 0..=1,
        default_missing_value = "18446744073709551615",
        default_value_t = 0,
        help_heading = "Input"
    )]
    max_cases: u64,

    /// How to print.  By default, this follows the output file's
    /// extension.
    #[arg(long, short = 'f', help_heading = "Output")]
    format: Option<Format>,
}

/// What to print.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// The kind of system file.
    Identity,

    /// Variables and everything else that describes the data.
    #[default]
    #[value(alias = "dict")]
    Dictionary,

    /// Records as they appear in the file, with strings undecoded.
    Raw,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
enum Format {
    /// Human-readable text.
    #[default]
    Text,

    /// Indented JSON.
    Json,

    /// One JSON value per line.
    Ndjson,

    /// Nothing.  Reading still reports warnings.
    Discard,
}

impl Format {
    fn for_path(path: Option<&Path>) -> Self {
        match path.and_then(|path| path.extension()?.to_str()) {
            Some("json") => Format::Json,
            Some("ndjson") => Format::Ndjson,
            _ => Format::Text,
        }
    }
}

struct Output {
    format: Format,
    sink: Box<dyn Write>,
}

impl Output {
    fn json<T>(&mut self, value: &T) -> Result<()>
    where
        T: Serialize,
    {
        match self.format {
            Format::Json => serde_json::to_writer_pretty(&mut self.sink, value)?,
            Format::Ndjson => serde_json::to_writer(&mut self.sink, value)?,
            Format::Text | Format::Discard => return Ok(()),
        }
        writeln!(self.sink)?;
        Ok(())
    }
}

impl Show {
    pub fn run(self) -> Result<()> {
        let sink: Box<dyn Write> = match &self.output {
            Some(path) => Box::new(File::create(path)?),
            None => Box::new(stdout()),
        };
        let mut output = Output {
            format: self
                .format
                .unwrap_or_else(|| Format::for_path(self.output.as_deref())),
            sink,
        };
        match self.mode {
            Mode::Identity => self.identity(&mut output),
            Mode::Raw => self.raw(&mut output),
            Mode::Dictionary => self.dictionary(&mut output),
        }
    }

    fn identity(&self, output: &mut Output) -> Result<()> {
        let reader = Reader::new(BufReader::new(File::open(&self.input)?), report)?;
        let identity = match reader.header().magic {
            Magic::Sav => "SPSS System File",
            Magic::Zsav => "SPSS System File with Zlib compression",
            Magic::Ebcdic => "EBCDIC-encoded SPSS System File",
        };
        match output.format {
            Format::Text => writeln!(output.sink, "{identity}")?,
            _ => output.json(&identity)?,
        }
        Ok(())
    }

    fn raw(&self, output: &mut Output) -> Result<()> {
        if output.format == Format::Text {
            bail!("raw mode can only print JSON");
        }
        let mut reader = Reader::new(BufReader::new(File::open(&self.input)?), report)?;
        output.json(reader.header())?;
        for record in reader.records() {
            output.json(&record?)?;
        }
        for case in reader.cases().take(self.max_cases.try_into().unwrap_or(usize::MAX)) {
            output.json(&case?)?;
        }
        Ok(())
    }

    fn dictionary(&self, output: &mut Output) -> Result<()> {
        let system_file = ReadOptions::new()
            .with_encoding(self.encoding)
            .with_strict(self.strict)
            .open_file(&self.input, report)?;
        let encoding = system_file.encodings.data;
        let (dictionary, metadata, mut cases) = system_file.into_parts();
        let limit = self.max_cases.try_into().unwrap_or(usize::MAX);

        if output.format == Format::Text {
            let sink = &mut output.sink;
            describe_file(sink, &metadata, &dictionary)?;
            describe_variables(sink, &dictionary)?;
            describe_groups(sink, &dictionary)?;
            if limit > 0 {
                writeln!(sink)?;
                let variables = dictionary.variables();
                writeln!(sink, "{}", variables.iter().map(Variable::name).join("\t"))?;
                for case in cases.by_ref().take(limit) {
                    let Case(data) = case?;
                    let row = data.iter().map(|datum| plain_text(datum, encoding, "."));
                    writeln!(sink, "{}", row.format("\t"))?;
                }
            }
        } else {
            output.json(&dictionary)?;
            output.json(&metadata)?;
            for case in cases.by_ref().take(limit) {
                output.json(&case?)?;
            }
        }
        cases.take_warnings().into_iter().for_each(report);
        Ok(())
    }
}

fn describe_file(sink: &mut dyn Write, metadata: &Metadata, dictionary: &Dictionary) -> Result<()> {
    let mut line = |key: &str, value: &dyn std::fmt::Display| writeln!(sink, "{key:<14}{value}");
    line("Created:", &metadata.creation)?;
    line("Product:", &metadata.product)?;
    if let Some(product_ext) = &metadata.product_ext {
        line("", product_ext)?;
    }
    if let Some(version) = &metadata.version {
        line("Version:", version)?;
    }
    line("Byte order:", &format_args!("{:?}", metadata.endian))?;
    match metadata.compression {
        Some(compression) => line("Compression:", &format_args!("{compression:?}"))?,
        None => line("Compression:", &"None")?,
    }
    match metadata.n_cases {
        Some(n_cases) => line("Cases:", &n_cases)?,
        None => line("Cases:", &"Unknown")?,
    }
    line("Encoding:", &dictionary.encoding().name())?;
    if let Some(file_label) = &dictionary.file_label {
        line("Label:", file_label)?;
    }
    if let Some(weight) = dictionary.weight_var() {
        line("Weight:", weight.name())?;
    }
    for (name, values) in &dictionary.attributes.0 {
        line("Attribute:", &format_args!("{name} = {}", values.join(", ")))?;
    }
    if !dictionary.documents.is_empty() {
        line("Documents:", &"")?;
        for document in &dictionary.documents {
            line("", document)?;
        }
    }
    Ok(())
}

fn missing_values_text(missing_values: &MissingValues, encoding: &'static Encoding) -> String {
    let range = missing_values.range().map(|range| match *range {
        MissingValueRange::In { low, high } => format!("{low} THRU {high}"),
        MissingValueRange::From { low } => format!("{low} THRU HIGHEST"),
        MissingValueRange::To { high } => format!("LOWEST THRU {high}"),
    });
    let values = missing_values.values().iter().map(|value| match value {
        Datum::String(_) => format!("\"{}\"", plain_text(value, encoding, "")),
        Datum::Number(_) => plain_text(value, encoding, "SYSMIS").into_owned(),
    });
    range.into_iter().chain(values).join("; ")
}

fn describe_variables(sink: &mut dyn Write, dictionary: &Dictionary) -> Result<()> {
    let encoding = dictionary.encoding();
    writeln!(sink, "\nVariables:")?;
    for (index, variable) in dictionary.variables().iter().enumerate() {
        write!(
            sink,
            "{:>4}. {} ({}, {}, {:?}",
            index + 1,
            variable.name(),
            variable.width,
            variable.print_format,
            variable.alignment,
        )?;
        if let Some(measure) = variable.measure {
            write!(sink, ", {measure:?}")?;
        }
        writeln!(sink, ")")?;
        if let Some(label) = variable.label() {
            writeln!(sink, "      Label: {label}")?;
        }
        if !variable.missing_values.is_empty() {
            writeln!(
                sink,
                "      Missing values: {}",
                missing_values_text(&variable.missing_values, encoding)
            )?;
        }
        for (value, label) in &variable.value_labels.0 {
            writeln!(sink, "      {:>8} = {label}", plain_text(value, encoding, "."))?;
        }
    }
    Ok(())
}

/// Prints multiple-response sets and variable sets.
fn describe_groups(sink: &mut dyn Write, dictionary: &Dictionary) -> Result<()> {
    let names = |indexes: &[usize]| {
        indexes
            .iter()
            .filter_map(|index| dictionary.variables().get(*index))
            .map(Variable::name)
            .join(" ")
    };
    if !dictionary.mrsets.is_empty() {
        writeln!(sink, "\nMultiple response sets:")?;
        for mrset in &dictionary.mrsets {
            let kind = match mrset.mr_type {
                MultipleResponseType::MultipleCategory => "categories",
                MultipleResponseType::MultipleDichotomy { .. } => "dichotomies",
            };
            writeln!(
                sink,
                "    {} ({kind}): {} [{}]",
                mrset.name,
                mrset.label,
                names(&mrset.variables)
            )?;
        }
    }
    if !dictionary.variable_sets.is_empty() {
        writeln!(sink, "\nVariable sets:")?;
        for set in &dictionary.variable_sets {
            writeln!(sink, "    {}: {}", set.name, names(&set.variables))?;
        }
    }
    Ok(())
}
