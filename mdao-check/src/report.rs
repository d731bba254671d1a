//! What each rank reports after setup, and its rendering as tables.

use std::fmt::Display;

use comfy_table::{presets::UTF8_FULL, Cell, Table};
use mdao::{problem::SetupSummary, Problem, VectorKind};
use serde::Serialize;

/// Placement of one variable in one local buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayoutRow {
    pub vector: Option<String>,
    pub kind: VectorKind,
    pub variable: String,
    pub offset: usize,
    pub len: usize,
    pub global_offset: usize,
    /// Whether this rank publishes the values in data transfer
    pub owned: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankReport {
    pub rank: usize,
    pub summary: SetupSummary,
    pub layouts: Vec<LayoutRow>,
}

impl RankReport {
    pub fn new(rank: usize, problem: &Problem) -> Result<Self, mdao::Error> {
        let mut layouts = Vec::new();
        for vec_name in problem.vector_names() {
            let vectors = problem.vectors(vec_name)?;
            for kind in VectorKind::ALL {
                let vector = vectors.get(kind);
                layouts.extend(vector.layout().entries().iter().enumerate().map(
                    |(index, entry)| LayoutRow {
                        vector: vec_name.map(str::to_owned),
                        kind,
                        variable: entry.name.clone(),
                        offset: entry.offset,
                        len: entry.len,
                        global_offset: entry.global_offset,
                        owned: vector.owns(index),
                    },
                ));
            }
        }

        Ok(Self {
            rank,
            summary: problem.summary()?,
            layouts,
        })
    }
}

fn table(header: &[&str]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(header.to_vec());
    table
}

/// The schema shared by all ranks, then the layouts of every rank (or only of `rank`).
pub struct Tables<'a> {
    pub reports: &'a [RankReport],
    pub rank: Option<usize>,
}

impl Display for Tables<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Some(first) = self.reports.first() else {
            return Ok(());
        };
        let summary = &first.summary;
        writeln!(f, "{summary:#}")?;

        let mut variables = table(&["Variable", "Role", "Size", "Global offset", "Processes"]);
        for var in &summary.variables {
            variables.add_row(vec![
                Cell::new(&var.name),
                Cell::new(var.role),
                Cell::new(var.size),
                Cell::new(var.global_offset),
                Cell::new(var.proc_range),
            ]);
        }
        writeln!(f, "Variables:\n{variables}")?;

        if !summary.connections.is_empty() {
            let mut connections = table(&["Source", "Target", "Broadcast"]);
            for conn in &summary.connections {
                connections.add_row(vec![
                    Cell::new(&conn.source),
                    Cell::new(&conn.target),
                    Cell::new(if conn.broadcast { "yes" } else { "" }),
                ]);
            }
            writeln!(f, "Connections:\n{connections}")?;
        }

        for report in self
            .reports
            .iter()
            .filter(|report| self.rank.map_or(true, |rank| report.rank == rank))
        {
            let mut layouts = table(&[
                "Vector",
                "Kind",
                "Variable",
                "Offset",
                "Length",
                "Global offset",
                "Owned",
            ]);
            for row in &report.layouts {
                layouts.add_row(vec![
                    Cell::new(row.vector.as_deref().unwrap_or("(default)")),
                    Cell::new(row.kind),
                    Cell::new(&row.variable),
                    Cell::new(row.offset),
                    Cell::new(row.len),
                    Cell::new(row.global_offset),
                    Cell::new(if row.owned { "yes" } else { "no" }),
                ]);
            }
            writeln!(f, "Rank {}:\n{layouts}", report.rank)?;
        }

        Ok(())
    }
}
