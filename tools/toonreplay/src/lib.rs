pub mod config;
pub mod coordinator;
pub mod dom;
pub mod errors;
pub mod extension;
pub mod log_retention;
pub mod logging;
pub mod notebook;
pub mod replay;
pub mod runtime;
pub mod tags;

use clap::{error::ErrorKind, Parser, Subcommand};
use config::{load_config, ReplayConfig};
use dom::fixture::FixtureDom;
use errors::ReplayError;
use logging::{activity_log_for, structured_fallback_line};
use notebook::{CellHandle, CellId, NotebookDocument};
use replay::scheduler::ReplayScheduler;
use replay::store::TrailStore;
use runtime::Runtime;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Parser)]
#[command(name = "toonreplay")]
#[command(about = "Inspect and replay recorded cell interaction trails")]
pub struct Cli {
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// One line per cell that carries a recorded trail.
    List { notebook: PathBuf },
    /// Print a cell's trail, one JSON object per event.
    Show {
        notebook: PathBuf,
        #[arg(long)]
        cell: String,
    },
    /// Reset a cell's trail and save the notebook.
    Clear {
        notebook: PathBuf,
        #[arg(long)]
        cell: String,
    },
    /// Replay a cell's trail against a fixture layout and print what was dispatched.
    Simulate {
        notebook: PathBuf,
        #[arg(long)]
        cell: String,
        #[arg(long)]
        layout: PathBuf,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

#[derive(Debug, Serialize)]
struct ShownEvent<'a> {
    index: usize,
    kind: &'a str,
    relative_x: f64,
    relative_y: f64,
    child_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    descent_path: Option<&'a [usize]>,
}

pub fn run() -> Result<i32, ReplayError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let runtime = Runtime::production();
    run_with_runtime(&args, &runtime)
}

pub fn run_with_runtime(
    args: &[std::ffi::OsString],
    runtime: &Runtime,
) -> Result<i32, ReplayError> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{error}");
                return Ok(0);
            }
            _ => return Err(ReplayError::Cli(error.to_string())),
        },
    };

    let cfg = load_config(cli.config.as_deref(), runtime.file_system.as_ref())?;

    match &cli.command {
        Command::List { notebook } => list_trails(runtime, &cfg, notebook),
        Command::Show { notebook, cell } => show_trail(runtime, &cfg, notebook, cell),
        Command::Clear { notebook, cell } => clear_trail(runtime, &cfg, notebook, cell),
        Command::Simulate {
            notebook,
            cell,
            layout,
            json,
        } => simulate(runtime, &cfg, notebook, cell, layout, *json),
    }?;
    Ok(0)
}

fn open_notebook(
    runtime: &Runtime,
    cfg: &ReplayConfig,
    path: &Path,
) -> Result<(Arc<NotebookDocument>, TrailStore), ReplayError> {
    let document = Arc::new(NotebookDocument::load(path, runtime.file_system.as_ref())?);
    let store = TrailStore::new(document.clone(), activity_log_for(&cfg.logging));
    Ok((document, store))
}

fn known_cell(document: &NotebookDocument, cell: &str) -> Result<CellId, ReplayError> {
    let id = CellId::new(cell);
    if document.cell_ids().contains(&id) {
        Ok(id)
    } else {
        Err(ReplayError::UnknownCell(cell.to_string()))
    }
}

fn list_trails(runtime: &Runtime, cfg: &ReplayConfig, path: &Path) -> Result<(), ReplayError> {
    let (document, store) = open_notebook(runtime, cfg, path)?;
    for id in document.cell_ids() {
        let trail = store.get(&id);
        if trail.is_empty() {
            continue;
        }
        runtime.terminal.write_line(&format!(
            "{id} events={} clicks={}",
            trail.len(),
            trail.click_count()
        ))?;
    }
    Ok(())
}

fn show_trail(
    runtime: &Runtime,
    cfg: &ReplayConfig,
    path: &Path,
    cell: &str,
) -> Result<(), ReplayError> {
    let (document, store) = open_notebook(runtime, cfg, path)?;
    let id = known_cell(&document, cell)?;
    let trail = store.get(&id);
    let mut click_index = 0;
    for (index, event) in trail.events().enumerate() {
        let descent_path = if event.kind.is_click() {
            click_index += 1;
            trail.click_path(click_index - 1)
        } else {
            None
        };
        let line = json_line(&ShownEvent {
            index,
            kind: event.kind.as_str(),
            relative_x: event.relative_x,
            relative_y: event.relative_y,
            child_index: event.child_index,
            descent_path,
        })?;
        runtime.terminal.write_line(&line)?;
    }
    Ok(())
}

fn json_line<T: Serialize>(value: &T) -> Result<String, ReplayError> {
    serde_json::to_string(value).map_err(|e| ReplayError::Serialization(e.to_string()))
}

fn clear_trail(
    runtime: &Runtime,
    cfg: &ReplayConfig,
    path: &Path,
    cell: &str,
) -> Result<(), ReplayError> {
    let (document, store) = open_notebook(runtime, cfg, path)?;
    let id = known_cell(&document, cell)?;
    store.reset(&id);
    store.persist(&id)?;
    document.save(path, runtime.file_system.as_ref())?;
    runtime
        .terminal
        .write_line(&structured_fallback_line(id.as_str(), "cleared", "trail reset"))
}

fn simulate(
    runtime: &Runtime,
    cfg: &ReplayConfig,
    path: &Path,
    cell: &str,
    layout: &Path,
    json: bool,
) -> Result<(), ReplayError> {
    let (document, store) = open_notebook(runtime, cfg, path)?;
    let id = known_cell(&document, cell)?;
    let (dom, output_area) =
        FixtureDom::parse_layout(&runtime.file_system.read_to_string(layout)?)?;

    let scheduler = Arc::new(ReplayScheduler::new(
        Arc::new(store),
        Arc::new(dom.clone()),
        activity_log_for(&cfg.logging),
        cfg.replay.clone(),
        cfg.dom.output_class.clone(),
    ));
    let executor = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .map_err(|e| ReplayError::Runtime(e.to_string()))?;
    let report = executor
        .block_on(async {
            scheduler
                .enqueue(CellHandle::new(id.clone(), output_area))
                .finished()
                .await
        })
        .ok_or_else(|| ReplayError::Runtime("replay ended without a report".to_string()))?;

    for dispatched in dom.dispatched() {
        let line = if json {
            json_line(&serde_json::json!({
                "node": dispatched.node.0,
                "event": dispatched.event,
            }))?
        } else {
            format!(
                "{} node={} x={:.2} y={:.2}",
                dispatched.event.kind.as_str(),
                dispatched.node.0,
                dispatched.event.client_x,
                dispatched.event.client_y
            )
        };
        runtime.terminal.write_line(&line)?;
    }
    let outcome = serde_json::to_value(report.outcome)
        .ok()
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_default();
    runtime.terminal.write_line(&structured_fallback_line(
        id.as_str(),
        &outcome,
        &format!("dispatched={} skipped={}", report.dispatched, report.skipped),
    ))
}
