// =============================================================================
// Matrix Exporter — append one row per completed evaluation cycle
// =============================================================================
//
// One file per symbol under the export directory, `;` separated. The first
// save of a symbol truncates whatever a previous run left and writes the
// header, the matrix keys (`KIND/name[/tf]`). A later change of the key set
// restarts the file under the new header. Pending notes are written as empty
// fields.
// =============================================================================

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tracing::debug;

use crate::evaluation::matrix::MatrixSnapshot;

const SEPARATOR: &str = ";";

pub struct MatrixExporter {
    dir: PathBuf,
    headers: Mutex<HashMap<String, Vec<String>>>,
}

impl MatrixExporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            headers: Mutex::new(HashMap::new()),
        }
    }

    /// `BTC/USDT` -> `<dir>/BTC-USDT_evaluations.csv`
    pub fn file_path(&self, symbol: &str) -> PathBuf {
        self.dir.join(format!("{}_evaluations.csv", symbol.replace('/', "-")))
    }

    pub fn save(&self, symbol: &str, snapshot: &MatrixSnapshot) -> Result<()> {
        let path = self.file_path(symbol);
        let keys = snapshot.keys();

        let mut headers = self.headers.lock();
        let restart = headers.get(symbol) != Some(&keys);

        let mut options = OpenOptions::new();
        if restart {
            options.write(true).create(true).truncate(true);
        } else {
            options.create(true).append(true);
        }
        let mut file = options
            .open(&path)
            .with_context(|| format!("failed to open evaluation export {}", path.display()))?;

        if restart {
            writeln!(file, "{}", keys.join(SEPARATOR))
                .with_context(|| format!("failed to write header to {}", path.display()))?;
        }

        let row: Vec<String> = snapshot
            .entries
            .iter()
            .map(|e| e.note.value().map(|v| v.to_string()).unwrap_or_default())
            .collect();
        writeln!(file, "{}", row.join(SEPARATOR))
            .with_context(|| format!("failed to append row to {}", path.display()))?;

        headers.insert(symbol.to_string(), keys);
        debug!(symbol, path = %path.display(), "evaluation row exported");
        Ok(())
    }
}
