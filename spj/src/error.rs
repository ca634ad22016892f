//! Error codes reported by the block.
//!
//! Build-time failures are values of [`SpjError`] propagated with `?` and
//! turned into a single rejection signal for the original caller. Each
//! variant has a stable numeric code that travels on the wire.
//!
//! Invariant violations (duplicate registration, stale handles, impossible
//! state transitions) are not represented here: they panic.

use std::fmt;

/// A block-level error with a stable wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpjError {
    /// The request slab is exhausted.
    OutOfOperations,
    /// The query tree section is empty.
    ZeroLengthQueryTree,
    /// The request signal is malformed or its kind does not match the tree root.
    InvalidRequest,
    /// Unknown operation kind, or node and parameter kinds disagree.
    UnknownQueryOperation,
    /// A tree node block is malformed.
    InvalidTreeNodeSpecification,
    /// A parameter block is malformed.
    InvalidTreeParametersSpecification,
    /// A section could not be assembled.
    OutOfSectionMemory,
    /// A pattern contains an unknown instruction or references a missing column.
    InvalidPattern,
    /// The request arena budget is exhausted.
    OutOfQueryMemory,
    /// A tree node block, or one of its lists, exceeds its scratch limit.
    QueryNodeTooBig,
    /// A parameter block exceeds its scratch limit.
    QueryNodeParametersTooBig,
    /// Both the tree node and its parameters carry an interpreted program.
    BothTreeAndParametersContainInterpretedProgram,
    /// The key-parameter bit differs between tree node and parameters.
    KeyParamBitsMismatch,
    /// The key pattern parameter count disagrees with the key-parameter bit.
    IncorrectKeyParamCount,
    /// Internal inconsistency that can be reported instead of aborting.
    InternalError,
    /// The tree declares zero nodes or more than the supported maximum.
    InvalidTreeNodeCount,
    /// Code reported by the distribution collaborator.
    Distribution(u32),
}

impl SpjError {
    /// Numeric code placed in rejection signals.
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Self::OutOfOperations => 20000,
            Self::ZeroLengthQueryTree => 20001,
            Self::InvalidRequest => 20002,
            Self::UnknownQueryOperation => 20003,
            Self::InvalidTreeNodeSpecification => 20004,
            Self::InvalidTreeParametersSpecification => 20005,
            Self::OutOfSectionMemory => 20006,
            Self::InvalidPattern => 20007,
            Self::OutOfQueryMemory => 20008,
            Self::QueryNodeTooBig => 20009,
            Self::QueryNodeParametersTooBig => 20010,
            Self::BothTreeAndParametersContainInterpretedProgram => 20011,
            Self::KeyParamBitsMismatch => 20012,
            Self::IncorrectKeyParamCount => 20013,
            Self::InternalError => 20014,
            Self::InvalidTreeNodeCount => 20017,
            Self::Distribution(code) => code,
        }
    }

    /// Map a wire code back to an error. Codes outside the block's own
    /// range are attributed to the distribution collaborator.
    #[must_use]
    pub const fn from_code(code: u32) -> Self {
        match code {
            20000 => Self::OutOfOperations,
            20001 => Self::ZeroLengthQueryTree,
            20002 => Self::InvalidRequest,
            20003 => Self::UnknownQueryOperation,
            20004 => Self::InvalidTreeNodeSpecification,
            20005 => Self::InvalidTreeParametersSpecification,
            20006 => Self::OutOfSectionMemory,
            20007 => Self::InvalidPattern,
            20008 => Self::OutOfQueryMemory,
            20009 => Self::QueryNodeTooBig,
            20010 => Self::QueryNodeParametersTooBig,
            20011 => Self::BothTreeAndParametersContainInterpretedProgram,
            20012 => Self::KeyParamBitsMismatch,
            20013 => Self::IncorrectKeyParamCount,
            20014 => Self::InternalError,
            20017 => Self::InvalidTreeNodeCount,
            other => Self::Distribution(other),
        }
    }

    /// True for errors detected while parsing the query tree.
    #[must_use]
    pub const fn is_build_error(self) -> bool {
        !matches!(self, Self::Distribution(_) | Self::OutOfOperations)
    }
}

impl fmt::Display for SpjError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::OutOfOperations => "out of operation records",
            Self::ZeroLengthQueryTree => "zero length query tree",
            Self::InvalidRequest => "invalid request",
            Self::UnknownQueryOperation => "unknown query operation",
            Self::InvalidTreeNodeSpecification => "invalid tree node specification",
            Self::InvalidTreeParametersSpecification => "invalid tree parameters specification",
            Self::OutOfSectionMemory => "out of section memory",
            Self::InvalidPattern => "invalid pattern",
            Self::OutOfQueryMemory => "out of query memory",
            Self::QueryNodeTooBig => "query node too big",
            Self::QueryNodeParametersTooBig => "query node parameters too big",
            Self::BothTreeAndParametersContainInterpretedProgram => {
                "both tree and parameters contain an interpreted program"
            }
            Self::KeyParamBitsMismatch => "key parameter bits mismatch",
            Self::IncorrectKeyParamCount => "incorrect key parameter count",
            Self::InternalError => "internal error",
            Self::InvalidTreeNodeCount => "invalid tree node count",
            Self::Distribution(code) => {
                return write!(f, "distribution error {code}");
            }
        };
        write!(f, "{text} ({})", self.code())
    }
}

impl std::error::Error for SpjError {}
