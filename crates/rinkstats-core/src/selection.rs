// Renderer-facing row selection: player names, positions, a numeric range,
// and the top players per rink position.

use std::fmt;

use serde::Deserialize;

use crate::error::StatsError;
use crate::loader::require_columns;
use crate::table::{columns, Row, Table};

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum Position {
    C,
    LW,
    RW,
    D,
    G,
}

impl Position {
    /// Parse a position code, ignoring case and surrounding whitespace.
    pub fn parse(code: &str) -> Option<Position> {
        match code.trim().to_ascii_uppercase().as_str() {
            "C" => Some(Position::C),
            "LW" => Some(Position::LW),
            "RW" => Some(Position::RW),
            "D" => Some(Position::D),
            "G" => Some(Position::G),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Position::C => "C",
            Position::LW => "LW",
            Position::RW => "RW",
            Position::D => "D",
            Position::G => "G",
        }
    }

    fn of_row(row: &Row<'_>) -> Option<Position> {
        row.text(columns::POS).and_then(Position::parse)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Position {
    type Error = String;

    fn try_from(code: String) -> Result<Self, Self::Error> {
        Position::parse(&code).ok_or_else(|| format!("unknown position code `{code}`"))
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// Inclusive bounds on one numeric column. An open side is unbounded.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RangeFilter {
    pub column: String,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

impl RangeFilter {
    fn contains(&self, value: f64) -> bool {
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value <= max)
    }
}

/// Filter predicates chosen by the renderer. Empty lists mean "no
/// restriction"; rows with a missing value never satisfy an active predicate.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Selection {
    #[serde(default)]
    pub players: Vec<String>,
    #[serde(default)]
    pub positions: Vec<Position>,
    #[serde(default)]
    pub range: Option<RangeFilter>,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.players.is_empty() && self.positions.is_empty() && self.range.is_none()
    }

    /// Keep the rows matching every active predicate. `key` names the player
    /// column. A column needed by an active predicate must exist.
    pub fn apply(&self, table: &Table, key: &str) -> Result<Table, StatsError> {
        let mut needed: Vec<&str> = Vec::new();
        if !self.players.is_empty() {
            needed.push(key);
        }
        if !self.positions.is_empty() {
            needed.push(columns::POS);
        }
        if let Some(range) = &self.range {
            needed.push(&range.column);
        }
        require_columns(table, &needed)?;

        Ok(table.filter_rows(|row| {
            let player_ok = self.players.is_empty()
                || row
                    .get(key)
                    .and_then(|v| v.key_text())
                    .is_some_and(|name| self.players.iter().any(|p| p.trim() == name));
            let position_ok = self.positions.is_empty()
                || Position::of_row(&row).is_some_and(|pos| self.positions.contains(&pos));
            let range_ok = self.range.as_ref().map_or(true, |range| {
                row.number(&range.column).is_some_and(|v| range.contains(v))
            });
            player_ok && position_ok && range_ok
        }))
    }
}

// ---------------------------------------------------------------------------
// Position leaders
// ---------------------------------------------------------------------------

/// How many leaders to pick per position for a rink map: one of each
/// forward slot and a defensive pair. Goalies are left out.
pub const DEFAULT_LEADER_QUOTAS: [(Position, usize); 4] = [
    (Position::LW, 1),
    (Position::C, 1),
    (Position::RW, 1),
    (Position::D, 2),
];

/// The top rows by `stat` for each position, in quota order and then by
/// `stat` descending. Rows with a missing `stat` or an unrecognized position
/// are ignored.
pub fn position_leaders(
    table: &Table,
    stat: &str,
    quotas: &[(Position, usize)],
) -> Result<Table, StatsError> {
    require_columns(table, &[stat, columns::POS])?;

    let mut ranked: Vec<(usize, Position, f64)> = table
        .iter()
        .enumerate()
        .filter_map(|(idx, row)| Some((idx, Position::of_row(&row)?, row.number(stat)?)))
        .collect();
    // Stable sort keeps file order among ties.
    ranked.sort_by(|a, b| b.2.total_cmp(&a.2));

    let mut leaders = Table::new(table.name(), table.columns().to_vec());
    for &(position, count) in quotas {
        for &(idx, _, _) in ranked.iter().filter(|r| r.1 == position).take(count) {
            if let Some(row) = table.row(idx) {
                leaders.push_row(row.values().to_vec())?;
            }
        }
    }
    Ok(leaders)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
