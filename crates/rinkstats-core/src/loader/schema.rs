// Column mappings: how one source layout's headers map onto normalized
// column names.

/// A reference to a source column, either by header text or by position.
///
/// Positional references exist for exports whose header row is generic or
/// malformed (`Unnamed: 1`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnRef {
    Name(String),
    Index(usize),
}

impl std::fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnRef::Name(name) => write!(f, "`{name}`"),
            ColumnRef::Index(idx) => write!(f, "index {idx}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRule {
    pub source: ColumnRef,
    pub target: String,
}

/// The rename rules for one source format.
///
/// A mapping never guesses: every rule must resolve against the actual table
/// or normalization fails with a schema error.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ColumnMapping {
    rules: Vec<ColumnRule>,
    select_mapped: bool,
}

impl ColumnMapping {
    pub fn new(rules: Vec<ColumnRule>) -> Self {
        Self {
            rules,
            select_mapped: false,
        }
    }

    /// Rename by header text: `(from, to)` pairs.
    pub fn renames(pairs: &[(&str, &str)]) -> Self {
        Self::new(
            pairs
                .iter()
                .map(|(from, to)| ColumnRule {
                    source: ColumnRef::Name((*from).to_string()),
                    target: (*to).to_string(),
                })
                .collect(),
        )
    }

    /// Rename by position: `(index, to)` pairs.
    pub fn positional(pairs: &[(usize, &str)]) -> Self {
        Self::new(
            pairs
                .iter()
                .map(|(idx, to)| ColumnRule {
                    source: ColumnRef::Index(*idx),
                    target: (*to).to_string(),
                })
                .collect(),
        )
    }

    /// When set, normalization keeps only the mapped columns, in rule order.
    pub fn select_mapped(mut self, select: bool) -> Self {
        self.select_mapped = select;
        self
    }

    pub fn rules(&self) -> &[ColumnRule] {
        &self.rules
    }

    pub fn selects_mapped(&self) -> bool {
        self.select_mapped
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
