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

//! Dictionaries.

use std::{collections::HashMap, ops::Range};

use encoding_rs::Encoding;
use serde::Serialize;
use thiserror::Error as ThisError;

use crate::{
    data::Datum,
    identifier::Identifier,
    variable::{Attributes, VarWidth, Variable},
};

/// A collection of variables, plus the metadata that goes with them.
///
/// Variable names are unique, ignoring case.  Other parts of the dictionary
/// refer to variables by their index in [Dictionary::variables], which
/// [Dictionary::delete_vars] keeps up to date.
#[derive(Clone, Debug, Serialize)]
pub struct Dictionary {
    variables: Vec<Variable>,

    #[serde(skip)]
    index: HashMap<Identifier, usize>,

    weight: Option<usize>,

    encoding: &'static Encoding,

    /// The file label.
    pub file_label: Option<String>,

    /// Lines of free-form documentation.
    pub documents: Vec<String>,

    /// Custom attributes for the whole file.
    pub attributes: Attributes,

    /// Multiple-response sets.
    pub mrsets: Vec<MultipleResponseSet>,

    /// Variable sets.
    pub variable_sets: Vec<VariableSet>,
}

/// A variable with the same name is already in the dictionary.
#[derive(Clone, Debug, ThisError, PartialEq)]
#[error("Duplicate variable name {}.", .0.name())]
pub struct DuplicateVariable(pub Box<Variable>);

/// Only a numeric variable may weight cases.
#[derive(Clone, Debug, ThisError, PartialEq, Eq)]
#[error("Weighting variable must be numeric, not {0}.")]
pub struct InvalidWeight(pub VarWidth);

impl Dictionary {
    /// Constructs an empty dictionary whose strings use `encoding`.
    pub fn new(encoding: &'static Encoding) -> Self {
        Self {
            variables: Vec::new(),
            index: HashMap::new(),
            weight: None,
            encoding,
            file_label: None,
            documents: Vec::new(),
            attributes: Attributes::new(),
            mrsets: Vec::new(),
            variable_sets: Vec::new(),
        }
    }

    /// Returns the encoding.
    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    /// Returns the variables, in order.
    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    /// Returns the variable with index `index` for modification.
    pub fn var_mut(&mut self, index: usize) -> Option<&mut Variable> {
        self.variables.get_mut(index)
    }

    /// Returns the index of the variable named `name`.
    pub fn index_of(&self, name: &Identifier) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Returns the number of 8-byte elements in a case in a system file for
    /// this dictionary.
    pub fn n_elements(&self) -> usize {
        self.variables
            .iter()
            .map(|variable| variable.width.n_case_elements())
            .sum()
    }

    /// Appends `variable` and returns its index.
    pub fn add_var(&mut self, variable: Variable) -> Result<usize, DuplicateVariable> {
        if self.index.contains_key(variable.name()) {
            return Err(DuplicateVariable(Box::new(variable)));
        }
        let index = self.variables.len();
        self.index.insert(variable.name().clone(), index);
        self.variables.push(variable);
        Ok(index)
    }

    /// Returns `name` if no variable has it, otherwise the first of
    /// `name_A`, `name_B`, ... that is free.
    pub fn unique_name(&self, name: &Identifier) -> Identifier {
        if !self.index.contains_key(name) {
            return name.clone();
        }
        (1..)
            .map(|n| name.with_suffix(n, self.encoding))
            .find(|candidate| !self.index.contains_key(candidate))
            .unwrap_or_else(|| name.clone())
    }

    /// Renames the variable with index `index` to `name`.  Fails, returning
    /// `name`, if some other variable already has that name.  Renaming a
    /// variable to a different case of its own name always succeeds.
    pub fn rename_var(&mut self, index: usize, name: Identifier) -> Result<(), Identifier> {
        match self.index.get(&name) {
            Some(other) if *other != index => return Err(name),
            _ => (),
        }
        let variable = &mut self.variables[index];
        self.index.remove(variable.name());
        self.index.insert(name.clone(), index);
        variable.set_name(name);
        Ok(())
    }

    /// Returns the weighting variable's index, if any.
    pub fn weight_index(&self) -> Option<usize> {
        self.weight
    }

    /// Returns the weighting variable, if any.
    pub fn weight_var(&self) -> Option<&Variable> {
        self.weight.map(|index| &self.variables[index])
    }

    /// Sets or clears the weighting variable.
    pub fn set_weight(&mut self, index: Option<usize>) -> Result<(), InvalidWeight> {
        if let Some(index) = index {
            let width = self.variables[index].width;
            if width != VarWidth::Numeric {
                return Err(InvalidWeight(width));
            }
        }
        self.weight = index;
        Ok(())
    }

    /// Deletes the variables in `range`.  The weighting variable is cleared
    /// if it is deleted.  Multiple-response sets and variable sets lose
    /// their references to deleted variables, and those left empty are
    /// dropped.
    pub fn delete_vars(&mut self, range: Range<usize>) {
        if range.is_empty() {
            return;
        }
        let n = range.len();
        let adjust = |index: usize| {
            if index < range.start {
                Some(index)
            } else if index >= range.end {
                Some(index - n)
            } else {
                None
            }
        };
        let adjust_all = |indexes: &mut Vec<usize>| {
            *indexes = indexes.iter().filter_map(|index| adjust(*index)).collect();
        };

        self.weight = self.weight.and_then(adjust);
        for mrset in &mut self.mrsets {
            adjust_all(&mut mrset.variables);
        }
        self.mrsets.retain(|mrset| !mrset.variables.is_empty());
        for set in &mut self.variable_sets {
            adjust_all(&mut set.variables);
        }
        self.variable_sets.retain(|set| !set.variables.is_empty());

        self.variables.drain(range);
        self.index = self
            .variables
            .iter()
            .enumerate()
            .map(|(index, variable)| (variable.name().clone(), index))
            .collect();
    }
}

impl PartialEq for Dictionary {
    fn eq(&self, other: &Self) -> bool {
        self.variables == other.variables
            && self.weight == other.weight
            && self.encoding == other.encoding
            && self.file_label == other.file_label
            && self.documents == other.documents
            && self.attributes == other.attributes
            && self.mrsets == other.mrsets
            && self.variable_sets == other.variable_sets
    }
}

/// A multiple-response set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MultipleResponseSet {
    /// Name, which begins with `$`.
    pub name: Identifier,

    /// Label, possibly empty.
    pub label: String,

    /// Type.
    pub mr_type: MultipleResponseType,

    /// Indexes of the member variables, which all have the same type.
    pub variables: Vec<usize>,
}

/// The type of a [MultipleResponseSet].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum MultipleResponseType {
    /// Multiple dichotomy set, in which each variable is a yes/no question
    /// and `datum` is the value that counts as "yes".
    MultipleDichotomy {
        /// The counted value.
        datum: Datum,

        /// Source of category labels.
        labels: CategoryLabels,
    },

    /// Multiple category set, in which the variables all hold the same kind
    /// of categorical answer.
    MultipleCategory,
}

impl MultipleResponseType {
    /// Returns true if this set can be written to the record that predates
    /// SPSS 14.
    pub fn supported_before_v14(&self) -> bool {
        !matches!(
            self,
            MultipleResponseType::MultipleDichotomy {
                labels: CategoryLabels::CountedValues { .. },
                ..
            }
        )
    }
}

/// Where a multiple dichotomy set gets the labels for its categories.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum CategoryLabels {
    /// Variable labels.
    VarLabels,

    /// Value labels for the counted value.
    CountedValues {
        /// Whether the first variable's label labels the whole set.
        use_var_label_as_mrset_label: bool,
    },
}

/// A named group of variables, for use in a user interface.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VariableSet {
    /// Name.
    pub name: String,

    /// Indexes of the member variables.
    pub variables: Vec<usize>,
}
