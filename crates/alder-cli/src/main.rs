use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use analyst_core::analyst::{run_turn, TablePreview, TurnOutcome};
use analyst_core::config::ModelSettings;
use analyst_core::frame::Frame;
use analyst_core::llm::{ModelProvider, OpenAiClient};
use analyst_core::profile::profile_frame;
use analyst_core::runs::{create_new_run, default_runs_root, save_turn_artifacts, RunInfo};
use analyst_core::session::SessionContext;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(version, about = "Alder — AI data analyst with a governed execution core")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override the runs dir (defaults to the platform data dir)
    #[arg(long)]
    runs_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Environment doctor checks
    Doctor,
    /// Profile a dataset offline (no model calls)
    Profile {
        #[arg(long)]
        data: PathBuf,
    },
    /// Ask a single question about a dataset
    Ask {
        #[arg(long)]
        data: PathBuf,
        #[arg(long)]
        question: String,
    },
    /// Interactive chat over a dataset
    Chat {
        #[arg(long)]
        data: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    install_tracing();
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let runs_root = match &cli.runs_dir {
        Some(dir) => dir.clone(),
        None => default_runs_root()?,
    };

    match cli.command {
        Commands::Doctor => cmd_doctor(),
        Commands::Profile { data } => cmd_profile(&data),
        Commands::Ask { data, question } => cmd_ask(&runs_root, &data, &question).await,
        Commands::Chat { data } => cmd_chat(&runs_root, data.as_deref()).await,
    }
}

fn install_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn cmd_doctor() -> Result<()> {
    println!("Alder doctor:");
    match ModelSettings::from_env() {
        Ok(settings) => {
            println!(" - OPENAI_API_KEY: set");
            println!(" - model: {}", settings.model);
            println!(
                " - base: {}",
                settings.base.as_deref().unwrap_or("(provider default)")
            );
            println!(" - timeout: {}s", settings.timeout.as_secs());
        }
        Err(e) => println!(" - model settings: {e} (model-backed commands will be unavailable)"),
    }
    match default_runs_root() {
        Ok(root) => println!(" - runs root: {}", root.display()),
        Err(e) => println!(" - runs root: error: {e}"),
    }
    Ok(())
}

fn cmd_profile(data: &Path) -> Result<()> {
    let frame = Frame::from_path(data).with_context(|| format!("loading {}", data.display()))?;
    println!(
        "Loaded: {} rows x {} cols from {}",
        frame.n_rows(),
        frame.n_cols(),
        data.display()
    );
    let profile = profile_frame(&frame);
    println!("{}", serde_json::to_string_pretty(&profile)?);
    Ok(())
}

async fn cmd_ask(runs_root: &Path, data: &Path, question: &str) -> Result<()> {
    let client = model_client()?;
    let run = create_new_run(Some(runs_root))?;
    let mut session = SessionContext::new();
    let frame = Frame::from_path(data).with_context(|| format!("loading {}", data.display()))?;
    println!("Loaded: {} rows x {} cols", frame.n_rows(), frame.n_cols());
    session.load_frame(frame);

    let outcome = ask(&mut session, question, &client).await;
    render_outcome(&outcome);
    save_turn_artifacts(&run.dir, 0, &outcome)?;
    Ok(())
}

async fn cmd_chat(runs_root: &Path, data: Option<&Path>) -> Result<()> {
    let client = match model_client() {
        Ok(client) => Some(client),
        Err(e) => {
            eprintln!("warning: {e:#}");
            eprintln!("running without a model; only :load and :profile are available");
            None
        }
    };
    let run = create_new_run(Some(runs_root))?;
    let mut session = SessionContext::new();
    if let Some(path) = data {
        load_into(&mut session, path)?;
    }

    println!("Alder chat — ask questions about your data.");
    println!("Commands: :load <path>   :profile   :quit");
    let mut turn_index = 0usize;
    let stdin = std::io::stdin();
    loop {
        print!("you> ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == ":quit" || line == ":q" {
            break;
        }
        if let Some(path) = line.strip_prefix(":load ") {
            match load_into(&mut session, Path::new(path.trim())) {
                Ok(()) => {}
                Err(e) => eprintln!("load failed: {e}"),
            }
            continue;
        }
        if line == ":profile" {
            match &session.frame {
                Some(frame) => {
                    println!("{}", serde_json::to_string_pretty(&profile_frame(frame))?)
                }
                None => println!("No dataset is loaded."),
            }
            continue;
        }

        let Some(client) = client.as_ref() else {
            println!("No model credentials; set OPENAI_API_KEY to ask questions.");
            continue;
        };
        let outcome = ask(&mut session, line, client).await;
        render_outcome(&outcome);
        save_turn_artifacts(&run.dir, turn_index, &outcome)?;
        turn_index += 1;
    }
    farewell(&run);
    Ok(())
}

fn model_client() -> Result<OpenAiClient> {
    let settings = ModelSettings::from_env()
        .context("model settings missing; set OPENAI_API_KEY (see .env support)")?;
    OpenAiClient::new(settings).map_err(|e| anyhow::anyhow!(e))
}

fn load_into(session: &mut SessionContext, path: &Path) -> Result<()> {
    let frame = Frame::from_path(path).with_context(|| format!("loading {}", path.display()))?;
    println!(
        "Loaded: {} rows x {} cols ({})",
        frame.n_rows(),
        frame.n_cols(),
        frame.column_names().join(", ")
    );
    session.load_frame(frame);
    Ok(())
}

async fn ask(
    session: &mut SessionContext,
    question: &str,
    client: &dyn ModelProvider,
) -> TurnOutcome {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg}").unwrap_or(ProgressStyle::default_spinner()),
    );
    spinner.set_message("thinking...");
    spinner.enable_steady_tick(std::time::Duration::from_millis(120));
    let outcome = run_turn(session, question, client).await;
    spinner.finish_and_clear();
    outcome
}

fn render_outcome(outcome: &TurnOutcome) {
    if let Some(route) = &outcome.route {
        println!("[tool: {} — {}]", route.tool.name(), route.reason);
    }
    if let Some(code) = &outcome.code {
        println!("--- generated code ---");
        println!("{code}");
        println!("----------------------");
    }
    if let Some(profile) = &outcome.profile {
        match serde_json::to_string_pretty(profile) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("profile rendering failed: {e}"),
        }
    }
    if let Some(table) = &outcome.table {
        render_table(table);
    }
    if outcome.chart.is_some() {
        println!("(chart spec saved with this turn's artifacts)");
    }
    println!("alder> {}", outcome.answer);
}

fn render_table(table: &TablePreview) {
    let headers: Vec<&str> = table.schema.iter().map(|(name, _)| name.as_str()).collect();
    let mut rows: Vec<Vec<String>> = Vec::with_capacity(table.rows.len());
    for row in &table.rows {
        let cells = headers
            .iter()
            .map(|h| match row.get(*h) {
                Some(serde_json::Value::Null) | None => String::new(),
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            })
            .collect();
        rows.push(cells);
    }

    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let line = |cells: &[String]| {
        let padded: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{c:<width$}", width = *w))
            .collect();
        println!("| {} |", padded.join(" | "));
    };
    line(&headers.iter().map(|h| h.to_string()).collect::<Vec<_>>());
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    println!("|-{}-|", rule.join("-|-"));
    for row in &rows {
        line(row);
    }
    if table.row_count > table.rows.len() {
        println!("({} of {} rows shown)", table.rows.len(), table.row_count);
    }
}

fn farewell(run: &RunInfo) {
    println!("Session artifacts: {}", run.dir.display());
}
