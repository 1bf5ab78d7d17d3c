// =============================================================================
// Evaluation Matrix — latest note of every evaluator for one symbol
// =============================================================================
//
// Layout: kind -> evaluator name -> cell, where a cell is either a single
// note (social, real-time, strategies) or one note per time frame (TA).
// NaN is never stored: it becomes `Pending` and is reported at error level.
// Writes never trigger anything; the task manager pushes snapshots
// downstream after each cycle.
// =============================================================================

use std::collections::BTreeMap;
use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::types::TimeFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EvaluatorKind {
    Ta,
    Social,
    RealTime,
    Strategies,
}

impl fmt::Display for EvaluatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ta => write!(f, "TA"),
            Self::Social => write!(f, "SOCIAL"),
            Self::RealTime => write!(f, "REAL_TIME"),
            Self::Strategies => write!(f, "STRATEGIES"),
        }
    }
}

/// An evaluator verdict, or the absence of one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum EvalNote {
    Value(f64),
    Pending,
}

impl EvalNote {
    pub fn value(self) -> Option<f64> {
        match self {
            Self::Value(v) if !v.is_nan() => Some(v),
            _ => None,
        }
    }

    pub fn is_pending(self) -> bool {
        self.value().is_none()
    }
}

impl From<f64> for EvalNote {
    fn from(v: f64) -> Self {
        Self::Value(v)
    }
}

impl From<Option<f64>> for EvalNote {
    fn from(v: Option<f64>) -> Self {
        v.map_or(Self::Pending, Self::Value)
    }
}

#[derive(Debug, Clone)]
enum Cell {
    Single(EvalNote),
    ByTimeFrame(BTreeMap<TimeFrame, EvalNote>),
}

/// One flattened matrix entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatrixEntry {
    pub kind: EvaluatorKind,
    pub name: String,
    pub time_frame: Option<TimeFrame>,
    pub note: EvalNote,
}

impl MatrixEntry {
    /// `KIND/name` or `KIND/name/tf`.
    pub fn key(&self) -> String {
        match self.time_frame {
            Some(tf) => format!("{}/{}/{}", self.kind, self.name, tf),
            None => format!("{}/{}", self.kind, self.name),
        }
    }
}

/// Ordered, owned copy of a matrix (kind, then name, then time frame).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatrixSnapshot {
    pub entries: Vec<MatrixEntry>,
}

impl MatrixSnapshot {
    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(MatrixEntry::key).collect()
    }

    pub fn of_kind(&self, kind: EvaluatorKind) -> impl Iterator<Item = &MatrixEntry> {
        self.entries.iter().filter(move |e| e.kind == kind)
    }

    pub fn note(&self, kind: EvaluatorKind, name: &str, time_frame: Option<TimeFrame>) -> Option<f64> {
        self.entries
            .iter()
            .find(|e| e.kind == kind && e.name == name && e.time_frame == time_frame)
            .and_then(|e| e.note.value())
    }
}

// -----------------------------------------------------------------------------
// EvaluationMatrix
// -----------------------------------------------------------------------------

pub struct EvaluationMatrix {
    symbol: String,
    exchange: String,
    cells: RwLock<BTreeMap<EvaluatorKind, BTreeMap<String, Cell>>>,
    eval_types: RwLock<BTreeMap<String, String>>,
}

impl EvaluationMatrix {
    pub fn new(symbol: impl Into<String>, exchange: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            exchange: exchange.into(),
            cells: RwLock::new(BTreeMap::new()),
            eval_types: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Store a note. A time frame turns the cell into a per-time-frame cell.
    pub fn set_eval(
        &self,
        kind: EvaluatorKind,
        name: &str,
        note: impl Into<EvalNote>,
        time_frame: Option<TimeFrame>,
    ) {
        let note = self.check_valid_eval_note(kind, name, note.into());
        let mut cells = self.cells.write();
        let by_name = cells.entry(kind).or_default();
        match time_frame {
            None => {
                by_name.insert(name.to_string(), Cell::Single(note));
            }
            Some(tf) => match by_name.get_mut(name) {
                Some(Cell::ByTimeFrame(map)) => {
                    map.insert(tf, note);
                }
                _ => {
                    by_name.insert(name.to_string(), Cell::ByTimeFrame(BTreeMap::from([(tf, note)])));
                }
            },
        }
    }

    /// The stored value, or `None` when missing or pending.
    pub fn get_eval_note(
        &self,
        kind: EvaluatorKind,
        name: &str,
        time_frame: Option<TimeFrame>,
    ) -> Option<f64> {
        let cells = self.cells.read();
        let cell = cells.get(&kind)?.get(name)?;
        match (cell, time_frame) {
            (Cell::Single(note), _) => note.value(),
            (Cell::ByTimeFrame(map), Some(tf)) => map.get(&tf).and_then(|n| n.value()),
            (Cell::ByTimeFrame(_), None) => None,
        }
    }

    pub fn set_evaluator_eval_type(&self, name: &str, eval_type: &str) {
        self.eval_types
            .write()
            .insert(name.to_string(), eval_type.to_string());
    }

    pub fn get_evaluator_eval_type(&self, name: &str) -> Option<String> {
        self.eval_types.read().get(name).cloned()
    }

    /// Every entry of one kind, pending ones included.
    pub fn get_type_evals(&self, kind: EvaluatorKind) -> Vec<MatrixEntry> {
        self.snapshot().entries.into_iter().filter(|e| e.kind == kind).collect()
    }

    /// `(name, time frame, value)` of the non-pending entries of one kind.
    pub fn valid_notes(&self, kind: EvaluatorKind) -> Vec<(String, Option<TimeFrame>, f64)> {
        self.get_type_evals(kind)
            .into_iter()
            .filter_map(|e| e.note.value().map(|v| (e.name, e.time_frame, v)))
            .collect()
    }

    pub fn snapshot(&self) -> MatrixSnapshot {
        let cells = self.cells.read();
        let mut entries = Vec::new();
        for (kind, by_name) in cells.iter() {
            for (name, cell) in by_name {
                match cell {
                    Cell::Single(note) => entries.push(MatrixEntry {
                        kind: *kind,
                        name: name.clone(),
                        time_frame: None,
                        note: *note,
                    }),
                    Cell::ByTimeFrame(map) => {
                        entries.extend(map.iter().map(|(tf, note)| MatrixEntry {
                            kind: *kind,
                            name: name.clone(),
                            time_frame: Some(*tf),
                            note: *note,
                        }));
                    }
                }
            }
        }
        MatrixSnapshot { entries }
    }

    fn check_valid_eval_note(&self, kind: EvaluatorKind, name: &str, note: EvalNote) -> EvalNote {
        match note {
            EvalNote::Value(v) if v.is_nan() => {
                error!(
                    symbol = %self.symbol,
                    exchange = %self.exchange,
                    kind = %kind,
                    evaluator = name,
                    "evaluator produced NaN, storing pending"
                );
                EvalNote::Pending
            }
            other => other,
        }
    }
}
