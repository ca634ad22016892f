//! Key and attribute-parameter construction patterns.
//!
//! A pattern is a small program of instruction words, each
//! `(type << 16) | value`:
//!
//! - `P_DATA(len)`: copy the `len` literal words that follow
//! - `P_COL(n)`: copy the value of column `n` of the parent row
//! - `P_UNQ_PK(n)`: copy column `n` minus its leading fragment-id word
//! - `P_PARAM(n)`: copy the value of parameter `n`
//!
//! # Design
//!
//! Compilation happens once per tree node while the tree is built.
//! Parameter references are resolved right then and re-encoded as literal
//! data, so a compiled pattern only ever needs the parent row to expand.
//! A pattern without column references is expanded immediately into a
//! fixed buffer and never looked at again.
//!
//! # Invariants
//!
//! - A compiled linked pattern contains no `P_PARAM` instructions.
//! - Expansion is a single left-to-right pass with no backtracking.
//! - A null value contributes zero words; an all-null key is an empty,
//!   not an absent, buffer.

mod row;

pub use row::{Column, MAX_ROW_COLUMNS, RowHeader, RowRef};

use crate::error::SpjError;

/// Instruction encoding.
pub struct QueryPattern;

impl QueryPattern {
    pub const P_DATA: u32 = 1;
    pub const P_COL: u32 = 2;
    pub const P_UNQ_PK: u32 = 3;
    pub const P_PARAM: u32 = 4;

    const fn info(kind: u32, value: u16) -> u32 {
        (kind << 16) | value as u32
    }

    /// Literal data instruction followed by the data.
    ///
    /// # Panics
    ///
    /// Panics if `words` is longer than a 16-bit length.
    #[must_use]
    pub fn data(words: &[u32]) -> Vec<u32> {
        let len = u16::try_from(words.len())
            .unwrap_or_else(|_| panic!("pattern literal of {} words too long", words.len()));
        let mut out = Vec::with_capacity(words.len() + 1);
        out.push(Self::info(Self::P_DATA, len));
        out.extend_from_slice(words);
        out
    }

    #[must_use]
    pub const fn col(no: u16) -> [u32; 1] {
        [Self::info(Self::P_COL, no)]
    }

    #[must_use]
    pub const fn unq_pk(no: u16) -> [u32; 1] {
        [Self::info(Self::P_UNQ_PK, no)]
    }

    #[must_use]
    pub const fn param(no: u16) -> [u32; 1] {
        [Self::info(Self::P_PARAM, no)]
    }

    /// True if the pattern reads parent row columns.
    #[must_use]
    pub fn is_linked(pattern: &[u32]) -> bool {
        instructions(pattern).any(|i| matches!(i, Ok(Instruction::Col(_) | Instruction::UnqPk(_))))
    }

    /// True if the pattern carries literal data.
    #[must_use]
    pub fn has_data(pattern: &[u32]) -> bool {
        instructions(pattern).any(|i| matches!(i, Ok(Instruction::Data(_))))
    }

    /// True if every instruction of the pattern decodes.
    #[must_use]
    pub fn is_well_formed(pattern: &[u32]) -> bool {
        instructions(pattern).all(|i| i.is_ok())
    }
}

/// One decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Instruction<'a> {
    Data(&'a [u32]),
    Col(usize),
    UnqPk(usize),
    Param(usize),
}

/// Decode instructions left to right. A malformed word yields one error
/// and ends the iteration.
fn instructions(pattern: &[u32]) -> impl Iterator<Item = Result<Instruction<'_>, SpjError>> {
    let mut pos = 0;
    let mut failed = false;
    std::iter::from_fn(move || {
        if failed || pos >= pattern.len() {
            return None;
        }
        let info = pattern[pos];
        pos += 1;
        let value = (info & 0xFFFF) as usize;
        let decoded = match info >> 16 {
            QueryPattern::P_DATA => match pattern.get(pos..pos + value) {
                Some(words) => {
                    pos += value;
                    Ok(Instruction::Data(words))
                }
                None => Err(SpjError::InvalidPattern),
            },
            QueryPattern::P_COL => Ok(Instruction::Col(value)),
            QueryPattern::P_UNQ_PK => Ok(Instruction::UnqPk(value)),
            QueryPattern::P_PARAM => Ok(Instruction::Param(value)),
            _ => Err(SpjError::InvalidPattern),
        };
        failed = decoded.is_err();
        Some(decoded)
    })
}

/// Output of compiling a pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompiledPattern {
    /// Fully expanded: no parent row needed.
    Fixed(Expanded),
    /// Instructions still to be expanded against each parent row.
    Linked(Vec<u32>),
}

/// An expanded buffer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Expanded {
    pub words: Vec<u32>,
    /// Some referenced value was null and contributed no words.
    pub has_null: bool,
}

/// Compile `pattern` against the parameter row `params`.
///
/// With `linked` set the result keeps column instructions and turns every
/// parameter reference into literal data. Without it the pattern is
/// expanded immediately and must not reference columns.
///
/// # Errors
///
/// `InvalidPattern` for an unknown instruction, truncated literal data, a
/// missing parameter, or a column reference in a fixed pattern.
pub fn compile(
    pattern: &[u32],
    params: &RowRef<'_>,
    linked: bool,
) -> Result<CompiledPattern, SpjError> {
    if !linked {
        return expand_with(pattern, None, Some(params)).map(CompiledPattern::Fixed);
    }
    let mut out = Vec::with_capacity(pattern.len());
    for instruction in instructions(pattern) {
        match instruction? {
            Instruction::Data(words) => out.extend(QueryPattern::data(words)),
            Instruction::Col(no) => out.push(pattern_word(QueryPattern::P_COL, no)),
            Instruction::UnqPk(no) => out.push(pattern_word(QueryPattern::P_UNQ_PK, no)),
            Instruction::Param(no) => {
                let column = params.column(no).ok_or(SpjError::InvalidPattern)?;
                out.extend(QueryPattern::data(column.data));
            }
        }
    }
    Ok(CompiledPattern::Linked(out))
}

#[allow(clippy::cast_possible_truncation)] // value was decoded from 16 bits
const fn pattern_word(kind: u32, value: usize) -> u32 {
    QueryPattern::info(kind, value as u16)
}

/// Expand a compiled linked pattern against a parent row.
///
/// # Errors
///
/// `InvalidPattern` for an unknown instruction, a parameter reference, or a
/// column the row does not have. A unique-key column shorter than its
/// fragment-id prefix is also invalid.
pub fn expand(pattern: &[u32], row: &RowRef<'_>) -> Result<Expanded, SpjError> {
    expand_with(pattern, Some(row), None)
}

fn expand_with(
    pattern: &[u32],
    row: Option<&RowRef<'_>>,
    params: Option<&RowRef<'_>>,
) -> Result<Expanded, SpjError> {
    let mut out = Expanded::default();
    for instruction in instructions(pattern) {
        let instruction = instruction?;
        let value = match instruction {
            Instruction::Data(words) => {
                out.words.extend_from_slice(words);
                continue;
            }
            Instruction::Col(no) => {
                let column = row.and_then(|r| r.column(no)).ok_or(SpjError::InvalidPattern)?;
                column.data
            }
            Instruction::UnqPk(no) => {
                let column = row.and_then(|r| r.column(no)).ok_or(SpjError::InvalidPattern)?;
                if column.is_null() {
                    column.data
                } else {
                    column.data.get(1..).ok_or(SpjError::InvalidPattern)?
                }
            }
            Instruction::Param(no) => {
                let column = params
                    .and_then(|p| p.column(no))
                    .ok_or(SpjError::InvalidPattern)?;
                column.data
            }
        };
        if value.is_empty() {
            out.has_null = true;
        }
        out.words.extend_from_slice(value);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{AttributeHeader, append_value};

    fn row_data(values: &[&[u32]]) -> Vec<u32> {
        let mut data = Vec::new();
        for (no, value) in values.iter().enumerate() {
            append_value(&mut data, u16::try_from(no).expect("small"), value);
        }
        data
    }

    fn with_row<T>(values: &[&[u32]], f: impl FnOnce(&RowRef<'_>) -> T) -> T {
        let data = row_data(values);
        let header = RowHeader::build(&data).expect("valid row");
        f(&RowRef::new(&header, &data))
    }

    #[test]
    fn test_fixed_pattern_resolves_params() {
        let pattern = [QueryPattern::data(&[1, 2]), QueryPattern::param(1).to_vec()].concat();
        let compiled = with_row(&[&[9], &[7, 8]], |params| compile(&pattern, params, false))
            .expect("compiles");
        assert_eq!(
            compiled,
            CompiledPattern::Fixed(Expanded {
                words: vec![1, 2, 7, 8],
                has_null: false,
            })
        );
    }

    #[test]
    fn test_fixed_pattern_rejects_column() {
        let pattern = QueryPattern::col(0);
        let result = with_row(&[], |params| compile(&pattern, params, false));
        assert_eq!(result, Err(SpjError::InvalidPattern));
    }

    #[test]
    fn test_unknown_instruction_fails_linked_compile() {
        let pattern = [QueryPattern::col(0).to_vec(), vec![9 << 16]].concat();
        assert!(!QueryPattern::is_well_formed(&pattern));
        assert!(QueryPattern::is_well_formed(&QueryPattern::col(0)));
        let result = with_row(&[], |params| compile(&pattern, params, true));
        assert_eq!(result, Err(SpjError::InvalidPattern));
    }

    #[test]
    fn test_linked_pattern_turns_params_into_data() {
        let pattern = [QueryPattern::col(0).to_vec(), QueryPattern::param(0).to_vec()].concat();
        let compiled =
            with_row(&[&[5]], |params| compile(&pattern, params, true)).expect("compiles");
        let CompiledPattern::Linked(words) = compiled else {
            panic!("expected linked pattern");
        };
        assert_eq!(words, [QueryPattern::col(0).to_vec(), QueryPattern::data(&[5])].concat());
        assert!(QueryPattern::is_linked(&words));
        assert!(QueryPattern::has_data(&words));
    }

    #[test]
    fn test_expand_columns_and_unique_key() {
        let pattern = [
            QueryPattern::col(1).to_vec(),
            QueryPattern::data(&[42]),
            QueryPattern::unq_pk(0).to_vec(),
        ]
        .concat();
        let expanded = with_row(&[&[3, 100, 101], &[6]], |row| expand(&pattern, row))
            .expect("expands");
        assert_eq!(expanded.words, vec![6, 42, 100, 101]);
        assert!(!expanded.has_null);
    }

    #[test]
    fn test_null_column_gives_empty_key() {
        let pattern = QueryPattern::col(0);
        let expanded = with_row(&[&[]], |row| expand(&pattern, row)).expect("expands");
        assert_eq!(expanded.words, Vec::<u32>::new());
        assert!(expanded.has_null);
    }

    #[test]
    fn test_unknown_instruction() {
        let pattern = [9 << 16];
        assert_eq!(
            with_row(&[&[1]], |row| expand(&pattern, row)),
            Err(SpjError::InvalidPattern)
        );
    }

    #[test]
    fn test_truncated_literal() {
        let pattern = [QueryPattern::P_DATA << 16 | 3, 1];
        assert_eq!(
            with_row(&[&[1]], |row| expand(&pattern, row)),
            Err(SpjError::InvalidPattern)
        );
    }

    #[test]
    fn test_missing_column() {
        let pattern = QueryPattern::col(2);
        assert_eq!(
            with_row(&[&[1]], |row| expand(&pattern, row)),
            Err(SpjError::InvalidPattern)
        );
    }

    #[test]
    fn test_param_left_in_linked_pattern_is_invalid() {
        let pattern = QueryPattern::param(0);
        assert_eq!(
            with_row(&[&[1]], |row| expand(&pattern, row)),
            Err(SpjError::InvalidPattern)
        );
    }

    #[test]
    fn test_literal_pattern_independent_of_row() {
        let pattern = [
            QueryPattern::data(&[1]),
            QueryPattern::param(0).to_vec(),
            QueryPattern::data(&[]),
            QueryPattern::param(1).to_vec(),
        ]
        .concat();
        let params: [&[u32]; 2] = [&[10, 11], &[]];
        let fixed = with_row(&params, |p| compile(&pattern, p, false)).expect("fixed");
        let CompiledPattern::Linked(linked) =
            with_row(&params, |p| compile(&pattern, p, true)).expect("linked")
        else {
            panic!("expected linked pattern");
        };
        let rows: [&[&[u32]]; 3] = [&[], &[&[5]], &[&[1, 2, 3], &[], &[4]]];
        for values in rows {
            let expanded = with_row(values, |row| expand(&linked, row)).expect("expands");
            let CompiledPattern::Fixed(fixed) = &fixed else {
                panic!("expected fixed pattern");
            };
            assert_eq!(expanded.words, fixed.words);
        }
    }

    #[test]
    fn test_correlation_column_is_not_a_key_column() {
        let mut data = row_data(&[&[4]]);
        append_value(&mut data, AttributeHeader::CORR_FACTOR32, &[99]);
        let header = RowHeader::build(&data).expect("valid row");
        let row = RowRef::new(&header, &data);
        let expanded = expand(&QueryPattern::col(0), &row).expect("expands");
        assert_eq!(expanded.words, vec![4]);
        assert_eq!(row.correlation(), Some(99));
    }
}
