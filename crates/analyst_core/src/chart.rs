use serde::Serialize;
use thiserror::Error;

use crate::frame::Cell;

/// A renderable chart description. The core never draws anything; the host
/// decides what to do with the spec (the CLI writes it as a run artifact).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSpec {
    pub kind: ChartKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bins: Option<usize>,
    pub traces: Vec<Trace>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Hist,
    Bar,
    Line,
    Scatter,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trace {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub x: Vec<Cell>,
    pub y: Vec<Cell>,
}

#[derive(Debug, Error, PartialEq)]
pub enum ChartError {
    #[error("no active figure; call plot.figure() first")]
    NotStarted,
    #[error("a {existing:?} chart is already drawn on this figure")]
    KindMismatch { existing: ChartKind },
}

/// Accumulates plot calls made by generated code. A figure must be started
/// explicitly before any mark is drawn; finalizing/displaying is the host's
/// job, so there is no `show`.
#[derive(Debug, Default)]
pub struct ChartBuilder {
    started: bool,
    kind: Option<ChartKind>,
    title: Option<String>,
    x_label: Option<String>,
    y_label: Option<String>,
    bins: Option<usize>,
    traces: Vec<Trace>,
}

impl ChartBuilder {
    pub fn figure(&mut self) {
        *self = ChartBuilder {
            started: true,
            ..ChartBuilder::default()
        };
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    fn ensure_kind(&mut self, kind: ChartKind) -> Result<(), ChartError> {
        if !self.started {
            return Err(ChartError::NotStarted);
        }
        match self.kind {
            None => {
                self.kind = Some(kind);
                Ok(())
            }
            Some(existing) if existing == kind => Ok(()),
            Some(existing) => Err(ChartError::KindMismatch { existing }),
        }
    }

    pub fn add_trace(
        &mut self,
        kind: ChartKind,
        label: Option<String>,
        x: Vec<Cell>,
        y: Vec<Cell>,
    ) -> Result<(), ChartError> {
        self.ensure_kind(kind)?;
        self.traces.push(Trace { label, x, y });
        Ok(())
    }

    pub fn set_bins(&mut self, bins: usize) {
        self.bins = Some(bins);
    }

    pub fn set_title(&mut self, title: String) -> Result<(), ChartError> {
        if !self.started {
            return Err(ChartError::NotStarted);
        }
        self.title = Some(title);
        Ok(())
    }

    pub fn set_x_label(&mut self, label: String) -> Result<(), ChartError> {
        if !self.started {
            return Err(ChartError::NotStarted);
        }
        self.x_label = Some(label);
        Ok(())
    }

    pub fn set_y_label(&mut self, label: String) -> Result<(), ChartError> {
        if !self.started {
            return Err(ChartError::NotStarted);
        }
        self.y_label = Some(label);
        Ok(())
    }

    /// The finished spec, if any mark was actually drawn.
    pub fn finish(self) -> Option<ChartSpec> {
        let kind = self.kind?;
        Some(ChartSpec {
            kind,
            title: self.title,
            x_label: self.x_label,
            y_label: self.y_label,
            bins: self.bins,
            traces: self.traces,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marks_require_an_explicit_figure() {
        let mut builder = ChartBuilder::default();
        let err = builder
            .add_trace(ChartKind::Hist, None, vec![Cell::Int(1)], vec![])
            .unwrap_err();
        assert_eq!(err, ChartError::NotStarted);
    }

    #[test]
    fn figure_then_hist_produces_a_spec() {
        let mut builder = ChartBuilder::default();
        builder.figure();
        builder
            .add_trace(ChartKind::Hist, Some("age".into()), vec![Cell::Int(1)], vec![])
            .unwrap();
        builder.set_bins(10);
        builder.set_title("Ages".into()).unwrap();
        let spec = builder.finish().unwrap();
        assert_eq!(spec.kind, ChartKind::Hist);
        assert_eq!(spec.bins, Some(10));
        assert_eq!(spec.traces.len(), 1);
    }

    #[test]
    fn figure_without_marks_yields_no_spec() {
        let mut builder = ChartBuilder::default();
        builder.figure();
        assert!(builder.finish().is_none());
    }

    #[test]
    fn mixing_kinds_on_one_figure_fails() {
        let mut builder = ChartBuilder::default();
        builder.figure();
        builder
            .add_trace(ChartKind::Bar, None, vec![], vec![])
            .unwrap();
        let err = builder
            .add_trace(ChartKind::Line, None, vec![], vec![])
            .unwrap_err();
        assert!(matches!(err, ChartError::KindMismatch { .. }));
    }
}
