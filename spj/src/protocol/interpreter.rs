//! Interpreted attribute sections.
//!
//! When a request carries a filter program, its attribute section starts
//! with a five-word header giving the length of each part that follows:
//!
//! ```text
//! [initial read][program][final update][final read][subroutine]
//! ```
//!
//! This block only ever fills the program, final read and subroutine
//! parts. The subroutine part holds the parameters the program compares
//! against and is the only part that may be rebuilt per parent row.
//!
//! The filter instruction set is deliberately small: an instruction word is
//! `(attribute_id << 16) | opcode`, optionally followed by one argument word.

/// Number of header words in an interpreted attribute section.
pub const SECTION_HEADER_WORDS: usize = 5;

/// Index of each length word in the section header.
pub struct SectionPart;

impl SectionPart {
    pub const INITIAL_READ: usize = 0;
    pub const PROGRAM: usize = 1;
    pub const FINAL_UPDATE: usize = 2;
    pub const FINAL_READ: usize = 3;
    pub const SUBROUTINE: usize = 4;
}

/// Build an interpreted attribute section.
///
/// # Panics
///
/// Panics if a part is longer than `u32::MAX` words.
#[must_use]
pub fn build_section(program: &[u32], reads: &[u32], subroutine: &[u32]) -> Vec<u32> {
    let len = |part: &[u32]| {
        u32::try_from(part.len()).unwrap_or_else(|_| panic!("section part exceeds u32 words"))
    };
    let mut out = Vec::with_capacity(SECTION_HEADER_WORDS + program.len() + reads.len() + subroutine.len());
    out.extend_from_slice(&[0, len(program), 0, len(reads), len(subroutine)]);
    out.extend_from_slice(program);
    out.extend_from_slice(reads);
    out.extend_from_slice(subroutine);
    out
}

/// Borrowed view of the parts of an interpreted attribute section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionParts<'a> {
    pub program: &'a [u32],
    pub reads: &'a [u32],
    pub subroutine: &'a [u32],
}

/// Split an interpreted attribute section into its parts.
///
/// Returns `None` when the header lengths do not match the section.
#[must_use]
pub fn split_section(section: &[u32]) -> Option<SectionParts<'_>> {
    let header = section.get(..SECTION_HEADER_WORDS)?;
    let mut rest = &section[SECTION_HEADER_WORDS..];
    let mut take = |n: u32| {
        let n = n as usize;
        if n > rest.len() {
            return None;
        }
        let (part, tail) = rest.split_at(n);
        rest = tail;
        Some(part)
    };
    let _initial = take(header[SectionPart::INITIAL_READ])?;
    let program = take(header[SectionPart::PROGRAM])?;
    let _update = take(header[SectionPart::FINAL_UPDATE])?;
    let reads = take(header[SectionPart::FINAL_READ])?;
    let subroutine = take(header[SectionPart::SUBROUTINE])?;
    if !rest.is_empty() {
        return None;
    }
    Some(SectionParts {
        program,
        reads,
        subroutine,
    })
}

/// Filter program instructions.
pub struct Filter;

impl Filter {
    /// Accept the row.
    pub const EXIT_OK: u32 = 1;
    /// Reject the row.
    pub const EXIT_REFUSE: u32 = 2;
    /// Reject unless the column equals a slice of the subroutine part.
    /// Argument word: `(len << 16) | offset`.
    pub const REFUSE_UNLESS_EQ_PARAM: u32 = 3;
    /// Reject if the column is null.
    pub const REFUSE_IF_NULL: u32 = 4;

    #[must_use]
    pub const fn exit_ok() -> u32 {
        Self::EXIT_OK
    }

    #[must_use]
    pub const fn exit_refuse() -> u32 {
        Self::EXIT_REFUSE
    }

    #[must_use]
    pub const fn refuse_if_null(attribute_id: u16) -> u32 {
        ((attribute_id as u32) << 16) | Self::REFUSE_IF_NULL
    }

    #[must_use]
    pub const fn refuse_unless_eq_param(attribute_id: u16, offset: u16, len: u16) -> [u32; 2] {
        [
            ((attribute_id as u32) << 16) | Self::REFUSE_UNLESS_EQ_PARAM,
            ((len as u32) << 16) | offset as u32,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_split_matches_build() {
        let section = build_section(&[Filter::exit_ok()], &[0x0001_0000, 0x0002_0000], &[7, 8]);
        assert_eq!(section[..5], [0, 1, 0, 2, 2]);
        let parts = split_section(&section).expect("well formed");
        assert_eq!(parts.program, &[Filter::EXIT_OK]);
        assert_eq!(parts.reads, &[0x0001_0000, 0x0002_0000]);
        assert_eq!(parts.subroutine, &[7, 8]);
    }

    #[test]
    fn test_split_rejects_bad_lengths() {
        assert_eq!(split_section(&[0, 3, 0, 0, 0, 1]), None);
        assert_eq!(split_section(&[0, 0, 0]), None);
        assert_eq!(split_section(&[0, 0, 0, 0, 0, 9]), None);
    }
}
