//! The per-turn pipeline: route the question, then profile, generate and
//! execute vetted code, or fall back to conversation. Every failure in the
//! generate -> validate -> check -> execute chain is terminal for the turn
//! and becomes the assistant's visible answer; nothing here retries.

use serde::Serialize;
use serde_json::Value as Json;
use tracing::info;

use crate::chart::ChartSpec;
use crate::codegen::{build_code_request, strip_code_fences};
use crate::error::AnalystError;
use crate::frame::{Cell, Column, Frame};
use crate::llm::{ChatMessage, ModelProvider};
use crate::profile::{profile_frame, FrameProfile};
use crate::prompts::SYSTEM_ANALYST;
use crate::router::{route, RouteDecision, Tool};
use crate::sandbox::{self, ExecutionOutput, Series, Value};
use crate::session::{find_candidate_columns, SessionContext};

/// How many transcript turns feed the conversational fallback.
pub const HISTORY_WINDOW: usize = 10;
const PREVIEW_ROWS: usize = 20;

/// Tabular rendering of a frame/series/mapping result, in the shape the
/// host displays: column schema plus the first rows as JSON objects.
#[derive(Debug, Clone, Serialize)]
pub struct TablePreview {
    pub schema: Vec<(String, String)>,
    pub rows: Vec<Json>,
    pub row_count: usize,
}

/// Everything one turn produced for the rendering boundary.
#[derive(Debug, Default, Serialize)]
pub struct TurnOutcome {
    pub route: Option<RouteDecision>,
    pub code: Option<String>,
    pub profile: Option<FrameProfile>,
    pub table: Option<TablePreview>,
    pub chart: Option<ChartSpec>,
    pub answer: String,
    /// Set when the turn ended in a reported failure.
    pub failure: Option<String>,
}

#[tracing::instrument(skip_all, fields(session_id = %session.id))]
pub async fn run_turn(
    session: &mut SessionContext,
    question: &str,
    model: &dyn ModelProvider,
) -> TurnOutcome {
    session.memory.add_user(question);
    let dataset_loaded = session.dataset_loaded();

    let decision = match route(model, question, dataset_loaded).await {
        Ok(decision) => decision,
        Err(e) => {
            let outcome = TurnOutcome {
                answer: e.to_string(),
                failure: Some(e.to_string()),
                ..TurnOutcome::default()
            };
            return finish(session, outcome);
        }
    };
    info!(tool = decision.tool.name(), "question routed");

    let outcome = match decision.tool {
        Tool::Profile => profile_turn(session, decision),
        tool if tool.is_data_bearing() => data_turn(session, decision, question, model).await,
        _ => converse_turn(session, decision, model).await,
    };
    finish(session, outcome)
}

fn finish(session: &mut SessionContext, outcome: TurnOutcome) -> TurnOutcome {
    session.memory.add_assistant(outcome.answer.clone());
    outcome
}

fn no_dataset(decision: RouteDecision) -> TurnOutcome {
    TurnOutcome {
        route: Some(decision),
        answer: "No dataset is loaded. Load a CSV or Excel file first, then ask again."
            .to_string(),
        ..TurnOutcome::default()
    }
}

fn failed(decision: RouteDecision, code: Option<String>, error: AnalystError) -> TurnOutcome {
    let message = error.to_string();
    TurnOutcome {
        route: Some(decision),
        code,
        answer: message.clone(),
        failure: Some(message),
        ..TurnOutcome::default()
    }
}

fn profile_turn(session: &SessionContext, decision: RouteDecision) -> TurnOutcome {
    let Some(frame) = &session.frame else {
        return no_dataset(decision);
    };
    TurnOutcome {
        route: Some(decision),
        profile: Some(profile_frame(frame)),
        answer: "I profiled your dataset. Tell me what outcome or metric you want to analyze."
            .to_string(),
        ..TurnOutcome::default()
    }
}

async fn data_turn(
    session: &mut SessionContext,
    decision: RouteDecision,
    question: &str,
    model: &dyn ModelProvider,
) -> TurnOutcome {
    let Some(frame) = session.frame.clone() else {
        return no_dataset(decision);
    };
    let columns = frame.column_names();

    let candidates = find_candidate_columns(question, &columns);
    let hint = match candidates.len() {
        1 => {
            session.last_column = Some(candidates[0].clone());
            session.last_column.clone()
        }
        0 => session.last_column.clone(),
        _ => {
            let answer = format!(
                "I found multiple matching columns: [{}]. Which one should I use?",
                candidates.join(", ")
            );
            return TurnOutcome {
                route: Some(decision),
                answer,
                ..TurnOutcome::default()
            };
        }
    };

    let messages = build_code_request(question, &columns, hint.as_deref());
    let raw = match model.generate_code(&messages).await {
        Ok(raw) => raw,
        Err(e) => return failed(decision, None, e.into()),
    };
    let code = strip_code_fences(&raw);

    if let Err(e) = sandbox::validate(&code, &columns) {
        return failed(decision, Some(code), e.into());
    }
    let program = match sandbox::check(&code) {
        Ok(program) => program,
        Err(e) => return failed(decision, Some(code), e.into()),
    };
    let output = match sandbox::execute(&program, &frame) {
        Ok(output) => output,
        Err(e) => return failed(decision, Some(code), e.into()),
    };
    render_result(decision, code, output)
}

async fn converse_turn(
    session: &SessionContext,
    decision: RouteDecision,
    model: &dyn ModelProvider,
) -> TurnOutcome {
    let mut messages = vec![ChatMessage::system(SYSTEM_ANALYST)];
    messages.extend(session.memory.context_messages(HISTORY_WINDOW));
    match model.chat_text(&messages).await {
        Ok(answer) => TurnOutcome {
            route: Some(decision),
            answer,
            ..TurnOutcome::default()
        },
        Err(e) => failed(decision, None, e.into()),
    }
}

fn render_result(decision: RouteDecision, code: String, output: ExecutionOutput) -> TurnOutcome {
    let computed = "Here are the computed results.".to_string();
    let (answer, table) = match &output.result {
        None => {
            let answer = if output.chart.is_some() {
                "I generated the requested chart.".to_string()
            } else {
                "Analysis ran successfully, but no explicit result was returned.".to_string()
            };
            (answer, None)
        }
        Some(Value::Frame(frame)) => (computed, Some(frame_preview(frame))),
        Some(Value::Series(series)) => (computed, Some(series_preview(series))),
        Some(Value::Mapping(pairs)) => (computed, Some(mapping_preview(pairs))),
        Some(Value::List(items)) => (computed, Some(list_preview(items))),
        Some(scalar) => (scalar.render(), None),
    };
    TurnOutcome {
        route: Some(decision),
        code: Some(code),
        table,
        chart: output.chart,
        answer,
        ..TurnOutcome::default()
    }
}

fn cell_json(cell: &Cell) -> Json {
    serde_json::to_value(cell).unwrap_or(Json::Null)
}

fn value_json(value: &Value) -> Json {
    match value {
        Value::None => Json::Null,
        Value::Bool(b) => Json::from(*b),
        Value::Int(i) => Json::from(*i),
        Value::Float(f) => Json::from(*f),
        Value::Str(s) => Json::from(s.clone()),
        other => Json::from(other.render()),
    }
}

fn frame_preview(frame: &Frame) -> TablePreview {
    let schema = frame
        .columns()
        .iter()
        .map(|c| (c.name().to_string(), c.dtype().to_string()))
        .collect();
    let rows = (0..frame.n_rows().min(PREVIEW_ROWS))
        .map(|i| {
            let mut row = serde_json::Map::new();
            for (col, cell) in frame.columns().iter().zip(frame.row(i)) {
                row.insert(col.name().to_string(), cell_json(&cell));
            }
            Json::Object(row)
        })
        .collect();
    TablePreview {
        schema,
        rows,
        row_count: frame.n_rows(),
    }
}

fn series_preview(series: &Series) -> TablePreview {
    let dtype = Column::new(series.name.clone(), series.cells.clone())
        .dtype()
        .to_string();
    let rows = series
        .cells
        .iter()
        .take(PREVIEW_ROWS)
        .map(|cell| {
            let mut row = serde_json::Map::new();
            row.insert(series.name.clone(), cell_json(cell));
            Json::Object(row)
        })
        .collect();
    TablePreview {
        schema: vec![(series.name.clone(), dtype)],
        rows,
        row_count: series.len(),
    }
}

fn mapping_preview(pairs: &[(String, Value)]) -> TablePreview {
    let rows = pairs
        .iter()
        .take(PREVIEW_ROWS)
        .map(|(key, value)| {
            let mut row = serde_json::Map::new();
            row.insert("key".to_string(), Json::from(key.clone()));
            row.insert("value".to_string(), value_json(value));
            Json::Object(row)
        })
        .collect();
    TablePreview {
        schema: vec![
            ("key".to_string(), "str".to_string()),
            ("value".to_string(), "any".to_string()),
        ],
        rows,
        row_count: pairs.len(),
    }
}

fn list_preview(items: &[Value]) -> TablePreview {
    let rows = items
        .iter()
        .take(PREVIEW_ROWS)
        .map(|value| {
            let mut row = serde_json::Map::new();
            row.insert("value".to_string(), value_json(value));
            Json::Object(row)
        })
        .collect();
    TablePreview {
        schema: vec![("value".to_string(), "any".to_string())],
        rows,
        row_count: items.len(),
    }
}
