//! # Atrous (Dilation) Patterns
//!
//! DeepLab-style per-stage dilation plans. Unknown pattern names
//! resolve to [`DilationPattern::Identity`] rather than failing.

use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Optional prefix accepted on pattern names.
pub const DEEPLAB_PREFIX: &str = "DEEPLAB.";

/// A named per-stage dilation plan.
///
/// Serialized as its key; deserialization goes through [`DilationPattern::lookup`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DilationPattern {
    /// No dilation.
    #[default]
    Identity,

    /// ``[1, 1, 2, 1]``; the usual choice.
    Shuttle,

    /// ``[1, 2, 1, 2]``
    Hourglass,

    /// ``[1, 1, 2, 3]``
    Lin,

    /// ``[1, 3, 2, 1]``
    RevLin,

    /// ``[1, 2, 2, 2]``
    Double,

    /// ``[1, 1, 2, 4]``
    Exp,

    /// ``[1, 4, 2, 1]``
    RevExp,
}

impl DilationPattern {
    /// Every pattern, identity first.
    pub const ALL: [DilationPattern; 8] = [
        Self::Identity,
        Self::Shuttle,
        Self::Hourglass,
        Self::Lin,
        Self::RevLin,
        Self::Double,
        Self::Exp,
        Self::RevExp,
    ];

    /// Per-stage dilations.
    pub fn dilations(&self) -> [usize; 4] {
        match self {
            Self::Identity => [1, 1, 1, 1],
            Self::Shuttle => [1, 1, 2, 1],
            Self::Hourglass => [1, 2, 1, 2],
            Self::Lin => [1, 1, 2, 3],
            Self::RevLin => [1, 3, 2, 1],
            Self::Double => [1, 2, 2, 2],
            Self::Exp => [1, 1, 2, 4],
            Self::RevExp => [1, 4, 2, 1],
        }
    }

    /// Pattern key; empty for identity.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Identity => "",
            Self::Shuttle => "SHUTTLE",
            Self::Hourglass => "HOURGLASS",
            Self::Lin => "LIN",
            Self::RevLin => "REVLIN",
            Self::Double => "DOUBLE",
            Self::Exp => "EXP",
            Self::RevExp => "REVEXP",
        }
    }

    /// Resolve a pattern key, with or without the ``DEEPLAB.`` prefix.
    ///
    /// Unknown keys resolve to [`DilationPattern::Identity`].
    pub fn lookup(name: &str) -> Self {
        let key = name.trim();
        let key = key.strip_prefix(DEEPLAB_PREFIX).unwrap_or(key);
        Self::ALL
            .into_iter()
            .find(|pattern| !pattern.name().is_empty() && pattern.name() == key)
            .unwrap_or_else(|| {
                if !key.is_empty() {
                    tracing::debug!(pattern = name, "unknown dilation pattern; using identity");
                }
                Self::Identity
            })
    }
}

impl Display for DilationPattern {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl From<String> for DilationPattern {
    fn from(name: String) -> Self {
        Self::lookup(&name)
    }
}

impl From<DilationPattern> for String {
    fn from(pattern: DilationPattern) -> Self {
        pattern.name().to_string()
    }
}

impl FromStr for DilationPattern {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::lookup(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_table() {
        let table = [
            ("SHUTTLE", [1, 1, 2, 1]),
            ("HOURGLASS", [1, 2, 1, 2]),
            ("LIN", [1, 1, 2, 3]),
            ("REVLIN", [1, 3, 2, 1]),
            ("DOUBLE", [1, 2, 2, 2]),
            ("EXP", [1, 1, 2, 4]),
            ("REVEXP", [1, 4, 2, 1]),
        ];
        for (name, dilations) in table {
            assert_eq!(DilationPattern::lookup(name).dilations(), dilations, "{name}");
            assert_eq!(
                DilationPattern::lookup(&format!("DEEPLAB.{name}")).dilations(),
                dilations
            );
        }
    }

    #[test]
    fn test_unknown_is_identity() {
        for name in ["", "DEEPLAB.", "SPIRAL", "shuttle", "DEEPLAB.BOGUS"] {
            let pattern: DilationPattern = name.parse().unwrap();
            assert_eq!(pattern, DilationPattern::Identity, "{name:?}");
            assert_eq!(pattern.dilations(), [1, 1, 1, 1]);
        }
    }

    #[test]
    fn test_serde_uses_lookup() {
        let table = [
            ("\"DEEPLAB.SHUTTLE\"", DilationPattern::Shuttle),
            ("\"LIN\"", DilationPattern::Lin),
            ("\"\"", DilationPattern::Identity),
            ("\"BOGUS\"", DilationPattern::Identity),
        ];
        for (json, expected) in table {
            let pattern: DilationPattern = serde_json::from_str(json).unwrap();
            assert_eq!(pattern, expected, "{json}");
        }

        assert_eq!(serde_json::to_string(&DilationPattern::Identity).unwrap(), "\"\"");
        assert_eq!(
            serde_json::to_string(&DilationPattern::RevExp).unwrap(),
            "\"REVEXP\""
        );
    }

    #[test]
    fn test_names_round_trip() {
        for pattern in DilationPattern::ALL {
            assert_eq!(DilationPattern::lookup(pattern.name()), pattern);
        }
    }
}
