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

use std::io::{Cursor, ErrorKind, Result as IoResult, Write};

use binrw::Endian;
use chrono::NaiveDate;
use encoding_rs::{UTF_8, WINDOWS_1252};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
    data::{ByteString, Datum},
    dictionary::{
        CategoryLabels, Dictionary, MultipleResponseSet, MultipleResponseType, VariableSet,
    },
    identifier::Identifier,
    sys::{
        raw::{
            records::Compression, zlib::ZlibTrailerWarning, CaseWarning, ErrorDetails, Warning,
            WarningDetails,
        },
        encoding::Error as EncodingError,
        sack::sack,
        DictionaryWarning, ProductVersion, ReadOptions, SystemFile, SystemFileVersion, WriteOptions,
    },
    variable::{
        Alignment, Attributes, Measure, MissingValueRange, MissingValues, Role, VarWidth,
        Variable,
    },
};

const ENDIANS: [Endian; 2] = [Endian::Big, Endian::Little];

/// File header for a synthetic system file.  `n_cases` of -1 means unknown.
fn header(nominal_case_size: usize, compression: u32, weight_index: u32, n_cases: i32) -> String {
    format!(
        r#"
"$FL2"; s60 "@(#) SPSS DATA FILE PSPP synthetic test file";
2; {nominal_case_size}; {compression}; {weight_index}; {n_cases};
100.0; "01 Jan 11"; "20:53:52"; s64 "PSPP synthetic test file"; i8 0 * 3;
"#
    )
}

/// Machine integer and floating-point info records.
fn machine(character_code: i32) -> String {
    format!(
        r#"
7; 3; 4; 8; 1; 2; 3; -1; 1; 1; ENDIAN; {character_code};
7; 4; 8; 3; SYSMIS; HIGHEST; LOWEST;
"#
    )
}

const UTF8_RECORD: &str = r#"7; 20; 1; COUNT("UTF-8");"#;

const END: &str = "999; 0;";

fn read(bytes: Vec<u8>) -> SystemFile {
    ReadOptions::new()
        .open_reader(Cursor::new(bytes), |_| ())
        .unwrap()
}

/// Reads all the cases from `system_file`, returning them along with the
/// warnings issued while reading them.
fn read_cases(system_file: &mut SystemFile) -> (Vec<Vec<Datum>>, Vec<Warning>) {
    let mut cases = std::mem::take(&mut system_file.cases);
    let data = cases.by_ref().map(|case| case.unwrap().0).collect();
    (data, cases.take_warnings())
}

fn names(dictionary: &Dictionary) -> Vec<&str> {
    dictionary
        .variables()
        .iter()
        .map(|variable| variable.name().as_str())
        .collect()
}

fn number(n: f64) -> Datum {
    Datum::Number(Some(n))
}

fn string(s: &str, width: usize) -> Datum {
    let mut s = ByteString::from(s);
    s.resize(width);
    Datum::String(s)
}

#[test]
fn numeric_variables() {
    for endian in ENDIANS {
        let input = format!(
            r#"{header}
2; 0; 0; 0; 0x050802; 0x050802; s8 "NUM1";
2; 0; 0; 0; 0x050802; 0x050802; s8 "NUM2";
{machine}
{UTF8_RECORD}
{END}
1.0; 2.0;
3.0; SYSMIS;
-4.5; 1000000.0;
"#,
            header = header(2, 0, 0, 3),
            machine = machine(65001),
        );
        let mut system_file = read(sack(&input, endian).unwrap());
        assert!(system_file.warnings.is_empty(), "{:?}", system_file.warnings);

        let dictionary = &system_file.dictionary;
        assert_eq!(names(dictionary), ["num1", "num2"]);
        assert_eq!(dictionary.encoding(), UTF_8);
        assert_eq!(
            dictionary.file_label.as_deref(),
            Some("PSPP synthetic test file")
        );
        let variable = &dictionary.variables()[0];
        assert_eq!(variable.width, VarWidth::Numeric);
        assert_eq!(variable.print_format.to_string(), "F8.2");

        let metadata = &system_file.metadata;
        assert_eq!(
            metadata.creation,
            NaiveDate::from_ymd_opt(2011, 1, 1)
                .unwrap()
                .and_hms_opt(20, 53, 52)
                .unwrap()
        );
        assert_eq!(metadata.endian, endian);
        assert_eq!(metadata.compression, None);
        assert_eq!(metadata.n_cases, Some(3));
        assert_eq!(metadata.product, "PSPP synthetic test file");
        assert_eq!(metadata.version, Some(ProductVersion(1, 2, 3)));

        let (cases, warnings) = read_cases(&mut system_file);
        assert!(warnings.is_empty());
        assert_eq!(
            cases,
            vec![
                vec![number(1.0), number(2.0)],
                vec![number(3.0), Datum::Number(None)],
                vec![number(-4.5), number(1000000.0)],
            ]
        );
    }
}

#[test]
fn compressed_strings() {
    for endian in ENDIANS {
        let input = format!(
            r#"{header}
2; 3; 0; 0; 0x010300; 0x010300; s8 "STR1";
2; 12; 0; 0; 0x010c00; 0x010c00; s8 "LONG";
2; -1; 0; 0; 0; 0; s8 "";
2; 0; 0; 0; 0x050802; 0x050802; s8 "NUM";
{machine}
{UTF8_RECORD}
{END}
i8 253 253 253 102 254 254 254 101;
s8 "abc"; s8 "hello wo"; s8 "rld!";
i8 252 0 0 0 0 0 0 0;
"#,
            header = header(4, 1, 0, 2),
            machine = machine(65001),
        );
        let mut system_file = read(sack(&input, endian).unwrap());
        assert!(system_file.warnings.is_empty(), "{:?}", system_file.warnings);
        assert_eq!(names(&system_file.dictionary), ["str1", "long", "num"]);
        assert_eq!(
            system_file.dictionary.variables()[1].width,
            VarWidth::String(12)
        );
        assert_eq!(system_file.metadata.compression, Some(Compression::Simple));

        let (cases, warnings) = read_cases(&mut system_file);
        assert!(warnings.is_empty());
        assert_eq!(
            cases,
            vec![
                vec![string("abc", 3), string("hello world!", 12), number(2.0)],
                vec![string("", 3), string("", 12), number(1.0)],
            ]
        );
    }
}

#[test]
fn labels_and_missing_values() {
    for endian in ENDIANS {
        let input = format!(
            r#"{header}
2; 0; 1; 2; 0x050802; 0x050802; s8 "NUM1"; COUNT("Numeric variable"); 9.0; 99.0;
2; 0; 1; -3; 0x050802; 0x050802; s8 "NUM2"; COUNT("Range"); i8 0 * 3; 1.0; 5.0; 9.0;
2; 4; 0; 1; 0x010400; 0x010400; s8 "STR"; s8 "xy";
3; 2; 1.0; COUNT8("one"); i8 0 * 4; 2.0; COUNT8("two"); i8 0 * 4;
4; 1; 1;
3; 1; s8 "ab"; COUNT8("AB"); i8 0 * 5;
4; 1; 3;
{machine}
7; 11; 4; 9; 1; 10; 1; 3; 8; 1; 1; 4; 2;
{UTF8_RECORD}
{END}
1.0; 2.0; s8 "abcd";
"#,
            header = header(3, 0, 0, 1),
            machine = machine(65001),
        );
        let mut system_file = read(sack(&input, endian).unwrap());
        assert!(system_file.warnings.is_empty(), "{:?}", system_file.warnings);

        let variables = system_file.dictionary.variables();
        assert_eq!(variables[0].label(), Some("Numeric variable"));
        assert_eq!(
            variables[0].missing_values,
            MissingValues::new(vec![number(9.0), number(99.0)], None).unwrap()
        );
        assert_eq!(variables[0].value_labels.len(), 2);
        assert_eq!(variables[0].value_labels.get(&number(1.0)), Some("one"));
        assert_eq!(variables[0].value_labels.get(&number(2.0)), Some("two"));
        assert_eq!(variables[0].measure, Some(Measure::Nominal));
        assert_eq!(variables[0].display_width, 10);

        assert_eq!(variables[1].label(), Some("Range"));
        assert_eq!(
            variables[1].missing_values,
            MissingValues::new(vec![number(9.0)], Some(MissingValueRange::new(1.0, 5.0))).unwrap()
        );
        assert_eq!(variables[1].measure, Some(Measure::Scale));

        assert_eq!(variables[2].label(), None);
        assert_eq!(
            variables[2].missing_values,
            MissingValues::new(vec![string("xy", 4)], None).unwrap()
        );
        assert_eq!(variables[2].value_labels.get(&string("ab", 4)), Some("AB"));
        assert_eq!(variables[2].alignment, Alignment::Center);

        let (cases, _) = read_cases(&mut system_file);
        assert_eq!(
            cases,
            vec![vec![number(1.0), number(2.0), string("abcd", 4)]]
        );
    }
}

#[test]
fn multiple_response_sets() {
    for endian in ENDIANS {
        let input = format!(
            r#"{header}
2; 0; 0; 0; 0x050802; 0x050802; s8 "A";
2; 0; 0; 0; 0x050802; 0x050802; s8 "B";
2; 0; 0; 0; 0x050802; 0x050802; s8 "C";
{machine}
7; 7; 1; COUNT("$a=C 5 label a b c"; i8 10; "$b=D1 1 0  b c"; i8 10);
{UTF8_RECORD}
{END}
"#,
            header = header(3, 0, 0, 0),
            machine = machine(65001),
        );
        let system_file = read(sack(&input, endian).unwrap());
        assert!(system_file.warnings.is_empty(), "{:?}", system_file.warnings);

        let mrsets = &system_file.dictionary.mrsets;
        assert_eq!(mrsets.len(), 2);
        assert_eq!(mrsets[0].name.as_str(), "$a");
        assert_eq!(mrsets[0].label, "label");
        assert_eq!(mrsets[0].mr_type, MultipleResponseType::MultipleCategory);
        assert_eq!(mrsets[0].variables, [0, 1, 2]);
        assert_eq!(mrsets[1].name.as_str(), "$b");
        assert_eq!(
            mrsets[1].mr_type,
            MultipleResponseType::MultipleDichotomy {
                datum: number(1.0),
                labels: CategoryLabels::VarLabels
            }
        );
        assert_eq!(mrsets[1].variables, [1, 2]);
    }
}

/// A file with `n` numeric variables all named `NUM1`.
fn duplicate_names_file(endian: Endian, n: usize) -> Vec<u8> {
    let variables = "2; 0; 0; 0; 0x050802; 0x050802; s8 \"NUM1\";\n".repeat(n);
    let data = (1..=n).map(|i| format!("{i}.0; ")).collect::<String>();
    let input = format!(
        r#"{header}
{variables}
{machine}
{UTF8_RECORD}
{END}
{data}
"#,
        header = header(n, 0, 0, 1),
        machine = machine(65001),
    );
    sack(&input, endian).unwrap()
}

/// Collects the warnings passed to the callback along with the file.
fn read_with_warnings(bytes: Vec<u8>) -> (SystemFile, Vec<Warning>) {
    let mut warnings = Vec::new();
    let system_file = ReadOptions::new()
        .open_reader(Cursor::new(bytes), |warning| warnings.push(warning))
        .unwrap();
    (system_file, warnings)
}

#[test]
fn duplicate_variable_names() {
    for endian in ENDIANS {
        let (mut system_file, warnings) = read_with_warnings(duplicate_names_file(endian, 4));
        assert_eq!(
            names(&system_file.dictionary),
            ["num1", "num1_a", "num1_b", "num1_c"]
        );

        // Each variable record is 32 bytes, starting just after the
        // 176-byte header.
        assert_eq!(warnings.len(), 3);
        let expected = ["NUM1_A", "NUM1_B", "NUM1_C"];
        for (index, (warning, new_name)) in warnings.iter().zip(expected).enumerate() {
            let start = 176 + 32 * (index as u64 + 1);
            assert_eq!(warning.offsets, Some(start..start + 32));
            let WarningDetails::Dictionary(DictionaryWarning::DuplicateVariableName {
                duplicate_name,
                new_name: actual,
            }) = &warning.details
            else {
                panic!("{warning}");
            };
            assert_eq!(duplicate_name.as_str(), "NUM1");
            assert_eq!(actual.as_str(), new_name);
        }
        assert_eq!(system_file.warnings.len(), 3);

        let (cases, _) = read_cases(&mut system_file);
        assert_eq!(
            cases,
            [[number(1.0), number(2.0), number(3.0), number(4.0)]]
        );
    }
}

#[test]
fn duplicate_long_names() {
    for endian in ENDIANS {
        let input = format!(
            r#"{header}
2; 0; 0; 0; 0x050802; 0x050802; s8 "A";
2; 0; 0; 0; 0x050802; 0x050802; s8 "B";
{machine}
7; 13; 1; COUNT("A=Same"; i8 9; "B=Same");
{UTF8_RECORD}
{END}
"#,
            header = header(2, 0, 0, 0),
            machine = machine(65001),
        );
        let (system_file, warnings) = read_with_warnings(sack(&input, endian).unwrap());
        assert_eq!(names(&system_file.dictionary), ["Same", "Same_A"]);
        let short_names = system_file
            .dictionary
            .variables()
            .iter()
            .map(|variable| variable.short_names[0].as_str())
            .collect::<Vec<_>>();
        assert_eq!(short_names, ["A", "B"]);

        // The long names record follows the header (176 bytes), two
        // variable records (32 bytes each), and the machine integer and
        // floating-point info records (48 and 40 bytes).
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].offsets, Some(328..357));
        assert!(matches!(
            &warnings[0].details,
            WarningDetails::Dictionary(DictionaryWarning::DuplicateVariableName {
                duplicate_name,
                new_name,
            }) if duplicate_name.as_str() == "Same" && new_name.as_str() == "Same_A"
        ));
    }
}

/// Dictionary warnings point at the record that provoked them.
#[test]
fn dictionary_warning_offsets() {
    for endian in ENDIANS {
        let input = format!(
            r#"{header}
2; 0; 0; 0; 0x050802; 0x050802; s8 "NUM1";
7; 3; 4; 8; 1; 2; 3; -1; 1; 1; ENDIAN; 9999;
7; 4; 8; 3; SYSMIS; 1.0; LOWEST;
7; 4; 8; 3; SYSMIS; HIGHEST; LOWEST;
{END}
1.0;
"#,
            header = header(1, 0, 0, 1),
        );
        let (system_file, warnings) = read_with_warnings(sack(&input, endian).unwrap());
        assert_eq!(system_file.encodings.dictionary, WINDOWS_1252);
        assert_eq!(warnings.len(), 3, "{warnings:?}");
        let offsets_of = |matches: fn(&WarningDetails) -> bool| {
            warnings
                .iter()
                .find(|warning| matches(&warning.details))
                .and_then(|warning| warning.offsets.clone())
        };
        assert_eq!(
            offsets_of(|details| matches!(
                details,
                WarningDetails::Encoding(EncodingError::UnknownCodepage(9999))
            )),
            Some(208..256)
        );
        assert_eq!(
            offsets_of(|details| matches!(
                details,
                WarningDetails::Dictionary(DictionaryWarning::UnexpectedFloatValue {
                    name: "HIGHEST",
                    ..
                })
            )),
            Some(256..296)
        );
        assert_eq!(
            offsets_of(|details| matches!(
                details,
                WarningDetails::Dictionary(DictionaryWarning::MoreThanOne(_))
            )),
            Some(296..336)
        );
    }
}

#[test]
fn strict_mode() {
    for endian in ENDIANS {
        let error = ReadOptions::new()
            .with_strict(true)
            .open_reader(Cursor::new(duplicate_names_file(endian, 2)), |_| ())
            .unwrap_err();
        assert!(matches!(error.details, ErrorDetails::Strict(_)));
    }
}

#[test]
fn partial_case() {
    for endian in ENDIANS {
        let input = format!(
            r#"{header}
2; 0; 0; 0; 0x050802; 0x050802; s8 "NUM1";
2; 0; 0; 0; 0x050802; 0x050802; s8 "NUM2";
{machine}
{END}
1.0; 2.0;
3.0;
"#,
            header = header(2, 0, 0, -1),
            machine = machine(65001),
        );
        let system_file = read(sack(&input, endian).unwrap());
        assert_eq!(system_file.metadata.n_cases, None);
        let mut cases = system_file.cases;
        assert_eq!(cases.next().unwrap().unwrap().0, [number(1.0), number(2.0)]);
        let error = cases.next().unwrap().unwrap_err();
        assert!(matches!(
            error.details,
            ErrorDetails::EofInCase {
                case_number: 2,
                ..
            }
        ));
        assert!(cases.next().is_none());
    }
}

#[test]
fn wrong_number_of_cases() {
    for endian in ENDIANS {
        let input = format!(
            r#"{header}
2; 0; 0; 0; 0x050802; 0x050802; s8 "NUM1";
{machine}
{UTF8_RECORD}
{END}
1.0; 2.0;
"#,
            header = header(1, 0, 0, 3),
            machine = machine(65001),
        );
        let mut system_file = read(sack(&input, endian).unwrap());
        let (cases, warnings) = read_cases(&mut system_file);
        assert_eq!(cases, [[number(1.0)], [number(2.0)]]);
        assert_eq!(warnings.len(), 1);
        assert!(matches!(
            warnings[0].details,
            WarningDetails::CaseData(CaseWarning::WrongNumberOfCases {
                expected: 3,
                actual: 2
            })
        ));
        assert_eq!(warnings[0].offsets, Some(341..341));
    }
}

/// A file whose dictionary is in windows-1252 but whose data is in UTF-8.
#[test]
fn split_encodings() {
    for endian in ENDIANS {
        let input = format!(
            r#"{header}
2; 8; 1; 0; 0x010800; 0x010800; s8 "STR"; COUNT(hex "e9 74 e9"); i8 0;
{machine}
{UTF8_RECORD}
{END}
hex "c3 a9 20 20 20 20 20 20";
"#,
            header = header(1, 0, 0, 1),
            machine = machine(1252),
        );
        let mut system_file = read(sack(&input, endian).unwrap());
        assert!(system_file.warnings.is_empty(), "{:?}", system_file.warnings);
        assert_eq!(system_file.encodings.dictionary, WINDOWS_1252);
        assert_eq!(system_file.encodings.data, UTF_8);
        assert_eq!(
            system_file.dictionary.variables()[0].label(),
            Some("\u{e9}t\u{e9}")
        );

        let (cases, _) = read_cases(&mut system_file);
        let Datum::String(value) = &cases[0][0] else {
            panic!("expected string datum");
        };
        assert_eq!(system_file.decode_data(value).trim_end(), "\u{e9}");
    }
}

#[test]
fn encoding_override() {
    let input = format!(
        "{header}\n2; 0; 0; 0; 0x050802; 0x050802; s8 \"X\";\n{machine}\n{UTF8_RECORD}\n{END}\n1.0;\n",
        header = header(1, 0, 0, 1),
        machine = machine(65001),
    );
    let system_file = ReadOptions::new()
        .with_encoding(Some(WINDOWS_1252))
        .open_reader(Cursor::new(sack(&input, Endian::Little).unwrap()), |_| ())
        .unwrap();
    assert_eq!(system_file.encodings.dictionary, WINDOWS_1252);
    assert_eq!(system_file.encodings.data, WINDOWS_1252);
}

fn new_var(dictionary: &mut Dictionary, name: &str, width: VarWidth) -> usize {
    dictionary
        .add_var(Variable::new(Identifier::new(name).unwrap(), width))
        .unwrap()
}

/// A dictionary that exercises every kind of record the writer produces.
fn rich_dictionary() -> Dictionary {
    let mut dictionary = Dictionary::new(UTF_8);

    let num = new_var(&mut dictionary, "num", VarWidth::Numeric);
    let variable = dictionary.var_mut(num).unwrap();
    variable.label = Some(String::from("Numeric variable"));
    variable.missing_values =
        MissingValues::new(vec![number(9.0)], Some(MissingValueRange::new(90.0, 99.0))).unwrap();
    variable.value_labels.insert(number(1.0), "one");
    variable.value_labels.insert(number(2.0), "two");
    variable.measure = Some(Measure::Scale);
    variable.role = Role::Target;
    variable.attributes = Attributes::new().with(
        Identifier::new("Note").unwrap(),
        vec![String::from("first"), String::from("second")],
    );

    let short = new_var(&mut dictionary, "str", VarWidth::String(5));
    let variable = dictionary.var_mut(short).unwrap();
    variable.value_labels.insert(string("abc", 5), "ABC");
    variable.missing_values = MissingValues::new(vec![string("abc", 5)], None).unwrap();
    variable.alignment = Alignment::Center;

    let longstr = new_var(&mut dictionary, "longstr", VarWidth::String(40));
    let variable = dictionary.var_mut(longstr).unwrap();
    variable.label = Some(String::from("Long string"));
    variable.value_labels.insert(string("hello", 40), "greeting");
    variable.missing_values = MissingValues::new(vec![string("n/a", 40)], None).unwrap();

    let vls = new_var(&mut dictionary, "vls", VarWidth::String(600));
    let variable = dictionary.var_mut(vls).unwrap();
    variable.label = Some(String::from("Very long string"));
    variable.display_width = 40;

    new_var(&mut dictionary, "AVeryLongVariableName", VarWidth::Numeric);
    let dich1 = new_var(&mut dictionary, "dich1", VarWidth::Numeric);
    let dich2 = new_var(&mut dictionary, "dich2", VarWidth::Numeric);
    for index in [dich1, dich2] {
        let variable = dictionary.var_mut(index).unwrap();
        variable.value_labels.insert(number(1.0), "Yes");
    }

    dictionary.set_weight(Some(num)).unwrap();
    dictionary.file_label = Some(String::from("Round trip"));
    dictionary.documents = vec![String::from("First line"), String::from("Second line")];
    dictionary.attributes = Attributes::new().with(
        Identifier::new("Origin").unwrap(),
        vec![String::from("test")],
    );
    dictionary.mrsets = vec![
        MultipleResponseSet {
            name: Identifier::new("$cat").unwrap(),
            label: String::from("Categories"),
            mr_type: MultipleResponseType::MultipleCategory,
            variables: vec![dich1, dich2],
        },
        MultipleResponseSet {
            name: Identifier::new("$dich").unwrap(),
            label: String::from("Dichotomy"),
            mr_type: MultipleResponseType::MultipleDichotomy {
                datum: number(1.0),
                labels: CategoryLabels::VarLabels,
            },
            variables: vec![dich1, dich2],
        },
        MultipleResponseSet {
            name: Identifier::new("$counted").unwrap(),
            label: String::from("Counted"),
            mr_type: MultipleResponseType::MultipleDichotomy {
                datum: number(1.0),
                labels: CategoryLabels::CountedValues {
                    use_var_label_as_mrset_label: false,
                },
            },
            variables: vec![dich1, dich2],
        },
    ];
    dictionary.variable_sets = vec![VariableSet {
        name: String::from("Set one"),
        variables: vec![num, vls],
    }];
    dictionary
}

/// Random cases for `dictionary`.  Numbers are a mix of system-missing
/// values, small integers that compress to a single byte, and arbitrary
/// values.  Strings are a mix of letters and spaces.
fn random_cases(dictionary: &Dictionary, n: usize, seed: u64) -> Vec<Vec<Datum>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            dictionary
                .variables()
                .iter()
                .map(|variable| match variable.width {
                    VarWidth::Numeric => match rng.random_range(0..3) {
                        0 => Datum::Number(None),
                        1 => number(rng.random_range(-150..200) as f64),
                        _ => number(rng.random::<f64>() * 1e6),
                    },
                    VarWidth::String(width) => {
                        let len = rng.random_range(0..=width as usize);
                        let bytes = (0..len)
                            .map(|_| match rng.random_range(0..8) {
                                0 => b' ',
                                _ => rng.random_range(b'a'..=b'z'),
                            })
                            .collect::<Vec<_>>();
                        let mut value = ByteString::from(bytes);
                        value.resize(width as usize);
                        Datum::String(value)
                    }
                })
                .collect()
        })
        .collect()
}

fn write(dictionary: &Dictionary, cases: &[Vec<Datum>], options: WriteOptions) -> Vec<u8> {
    let mut writer = options
        .write_writer(dictionary, Cursor::new(Vec::new()))
        .unwrap();
    for case in cases {
        writer.write_case(case).unwrap();
    }
    assert_eq!(writer.n_cases(), cases.len() as u64);
    writer.close().unwrap().unwrap().into_inner()
}

/// Returns `original` with its variables' short names taken from `read`,
/// since the writer generates short names that `original` lacks.
fn with_short_names(original: &Dictionary, read: &Dictionary) -> Dictionary {
    let mut expected = original.clone();
    for (index, variable) in read.variables().iter().enumerate() {
        if let Some(expected) = expected.var_mut(index) {
            expected.short_names = variable.short_names.clone();
        }
    }
    expected
}

#[test]
fn round_trip() {
    let dictionary = rich_dictionary();
    let cases = random_cases(&dictionary, 50, 0x5eed);
    for compression in [None, Some(Compression::Simple), Some(Compression::ZLib)] {
        for endian in ENDIANS {
            let options = WriteOptions::reproducible(compression).with_endian(endian);
            let bytes = write(&dictionary, &cases, options.clone());

            let mut system_file = read(bytes.clone());
            assert!(
                system_file.warnings.is_empty(),
                "{compression:?} {endian:?}: {:?}",
                system_file.warnings
            );
            assert_eq!(
                system_file.dictionary,
                with_short_names(&dictionary, &system_file.dictionary)
            );
            assert_eq!(system_file.metadata.compression, compression);
            assert_eq!(system_file.metadata.endian, endian);
            assert_eq!(system_file.metadata.n_cases, Some(cases.len() as u64));
            assert_eq!(system_file.metadata.product, "PSPP TEST DATA FILE");
            assert_eq!(system_file.metadata.version, Some(ProductVersion(1, 2, 3)));
            assert_eq!(
                system_file.dictionary.variables()[3].short_names.len(),
                VarWidth::String(600).segments().len()
            );

            let (read_cases, warnings) = read_cases(&mut system_file);
            assert!(warnings.is_empty(), "{warnings:?}");
            assert_eq!(read_cases, cases);

            // Writing what was read reproduces the file exactly.
            assert_bytes_eq(&write(&system_file.dictionary, &read_cases, options), &bytes);
        }
    }
}

#[test]
fn round_trip_version_2() {
    let dictionary = rich_dictionary();
    let cases = random_cases(&dictionary, 10, 2);
    for endian in ENDIANS {
        let options = WriteOptions::reproducible(Some(Compression::Simple))
            .with_endian(endian)
            .with_version(SystemFileVersion::V2);
        let mut system_file = read(write(&dictionary, &cases, options));
        assert!(system_file.warnings.is_empty(), "{:?}", system_file.warnings);

        let dictionary = &system_file.dictionary;
        for variable in dictionary.variables() {
            assert_eq!(
                variable.name().as_str(),
                variable.short_names[0].as_str().to_lowercase()
            );
            assert_eq!(variable.role, Role::Input);
        }
        assert_eq!(
            names(dictionary),
            ["num", "str", "longstr", "vls", "averylon", "dich1", "dich2"]
        );
        assert!(dictionary.attributes.is_empty());
        assert_eq!(dictionary.mrsets.len(), 3);
        assert_eq!(dictionary.variable_sets[0].variables, [0, 3]);

        let (read_cases, _) = read_cases(&mut system_file);
        assert_eq!(read_cases, cases);
    }
}

#[test]
fn small_zlib_blocks() {
    let dictionary = rich_dictionary();
    let cases = random_cases(&dictionary, 20, 3);
    for endian in ENDIANS {
        let options = WriteOptions::reproducible(Some(Compression::ZLib))
            .with_endian(endian)
            .with_zlib_block_size(64);
        let mut system_file = read(write(&dictionary, &cases, options));
        assert!(!system_file.warnings.is_empty());
        for warning in &system_file.warnings {
            assert!(
                matches!(
                    warning.details,
                    WarningDetails::ZlibTrailer(ZlibTrailerWarning::UnusualBlockSize(64))
                ),
                "{warning}"
            );
        }
        let (read_cases, warnings) = read_cases(&mut system_file);
        assert!(warnings.is_empty(), "{warnings:?}");
        assert_eq!(read_cases, cases);
    }
}

#[test]
fn widest_strings() {
    let mut dictionary = Dictionary::new(UTF_8);
    new_var(&mut dictionary, "n", VarWidth::Numeric);
    let wide = new_var(&mut dictionary, "wide", VarWidth::String(20000));
    new_var(&mut dictionary, "after", VarWidth::String(3));
    let mut cases = random_cases(&dictionary, 4, 20000);
    let mut full = ByteString::from(
        (0..20000)
            .map(|i| b'a' + (i % 26) as u8)
            .collect::<Vec<_>>(),
    );
    cases[0][wide] = Datum::String(full.clone());
    full.0[19999] = b' ';
    cases[1][wide] = Datum::String(full);

    for compression in [None, Some(Compression::Simple), Some(Compression::ZLib)] {
        for endian in ENDIANS {
            let options = WriteOptions::reproducible(compression).with_endian(endian);
            let mut system_file = read(write(&dictionary, &cases, options));
            assert!(
                system_file.warnings.is_empty(),
                "{compression:?} {endian:?}: {:?}",
                system_file.warnings
            );
            assert_eq!(names(&system_file.dictionary), ["n", "wide", "after"]);
            let variable = &system_file.dictionary.variables()[wide];
            assert_eq!(variable.width, VarWidth::String(20000));
            assert_eq!(variable.short_names.len(), 80);

            let (read_cases, warnings) = read_cases(&mut system_file);
            assert!(warnings.is_empty(), "{warnings:?}");
            assert_eq!(read_cases, cases);
        }
    }
}

/// An output that can't seek.
struct Stream(Vec<u8>);

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> IoResult<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> IoResult<()> {
        Ok(())
    }
}

#[test]
fn unseekable_output() {
    let dictionary = rich_dictionary();
    let cases = random_cases(&dictionary, 10, 7);
    for compression in [None, Some(Compression::Simple)] {
        for endian in ENDIANS {
            let options = WriteOptions::reproducible(compression).with_endian(endian);
            let mut writer = options.write_stream(&dictionary, Stream(Vec::new())).unwrap();
            for case in &cases {
                writer.write_case(case).unwrap();
            }
            let Stream(bytes) = writer.close().unwrap().unwrap();

            let mut system_file = read(bytes);
            assert!(system_file.warnings.is_empty(), "{:?}", system_file.warnings);
            assert_eq!(system_file.metadata.n_cases, None);
            assert_eq!(system_file.metadata.compression, compression);
            let (read_cases, warnings) = read_cases(&mut system_file);
            assert!(warnings.is_empty(), "{warnings:?}");
            assert_eq!(read_cases, cases);
        }
    }

    let Err(error) = WriteOptions::reproducible(Some(Compression::ZLib))
        .write_stream(&dictionary, Stream(Vec::new()))
    else {
        panic!("ZLIB output to a stream should fail");
    };
    let binrw::Error::Io(error) = error else {
        panic!("{error:?}");
    };
    assert_eq!(error.kind(), ErrorKind::InvalidInput);
}

/// Formats `bytes` as a hex dump with 16 bytes per line.
fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .chunks(16)
        .enumerate()
        .map(|(index, chunk)| {
            let hex = chunk.iter().map(|b| format!("{b:02x}")).collect::<Vec<_>>();
            format!("{:08x}: {}\n", index * 16, hex.join(" "))
        })
        .collect()
}

/// Asserts that `actual` equals `expected`, printing a diff of their hex
/// dumps if not.
fn assert_bytes_eq(actual: &[u8], expected: &[u8]) {
    if actual != expected {
        let expected = hex_dump(expected);
        let actual = hex_dump(actual);
        eprintln!("Unexpected output:\n--- expected\n+++ actual");
        for result in diff::lines(&expected, &actual) {
            match result {
                diff::Result::Left(line) => eprintln!("-{line}"),
                diff::Result::Both(line, _) => eprintln!(" {line}"),
                diff::Result::Right(line) => eprintln!("+{line}"),
            }
        }
        panic!();
    }
}

fn one_number_dictionary() -> Dictionary {
    let mut dictionary = Dictionary::new(UTF_8);
    new_var(&mut dictionary, "x", VarWidth::Numeric);
    dictionary
}

fn expected_image(compression_code: u32, data: &str) -> String {
    format!(
        r#"
"$FL2"; s60 "@(#) SPSS DATA FILE PSPP TEST DATA FILE";
2; 1; {compression_code}; 0; 1; 100.0; "30 Jul 25"; "15:07:55"; s64 ""; i8 0 * 3;
2; 0; 0; 0; 0x050802; 0x050802; s8 "X";
7; 3; 4; 8; 1; 2; 3; -1; 1; 1; ENDIAN; 65001;
7; 4; 8; 3; SYSMIS; HIGHEST; LOWEST;
7; 11; 4; 3; 0; 8; 1;
7; 13; 1; COUNT("X=x");
7; 16; 8; 2; i64 1 1;
7; 20; 1; COUNT("UTF-8");
999; 0;
{data}
"#
    )
}

#[test]
fn uncompressed_image() {
    for endian in ENDIANS {
        let options = WriteOptions::reproducible(None).with_endian(endian);
        let actual = write(&one_number_dictionary(), &[vec![number(1.5)]], options);
        let expected = sack(&expected_image(0, "1.5;"), endian).unwrap();
        assert_bytes_eq(&actual, &expected);
    }
}

#[test]
fn compressed_image() {
    for endian in ENDIANS {
        let options = WriteOptions::reproducible(Some(Compression::Simple)).with_endian(endian);
        let actual = write(
            &one_number_dictionary(),
            &[vec![number(1.5)], vec![number(2.0)]],
            options,
        );
        let expected = sack(
            &expected_image(1, "i8 253 102 0 0 0 0 0 0; 1.5;")
                .replace("2; 1; 1; 0; 1;", "2; 1; 1; 0; 2;")
                .replace("i64 1 1;", "i64 1 2;"),
            endian,
        )
        .unwrap();
        assert_bytes_eq(&actual, &expected);
    }
}
