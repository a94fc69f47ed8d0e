use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_error::ErrorLayer;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod controller;
mod domain;
mod inputter;
mod model;
mod parsers;
mod table;
mod ui;

use controller::Controller;
use domain::{LVConfig, LVError, Message, UnparsablePlacement};
use model::{Model, Status};
use ui::BoardUI;

#[derive(Parser, Debug)]
#[command(name = "lv", version, about = "A tui based leaderboard viewer.")]
struct Args {
    /// Leaderboard snapshot file (CSV)
    path: String,

    /// CSV field delimiter
    #[arg(long, default_value_t = ',')]
    delimiter: char,

    /// Assign a default parser to a column, e.g. --parser 2:timestamp
    #[arg(long = "parser", value_name = "COL:ID", value_parser = parse_column_parser)]
    parsers: Vec<(usize, String)>,

    /// Where rows land that fail to parse for the active sort keys
    #[arg(long, value_enum, default_value_t = UnparsablePlacement::LAST)]
    sort_unparsable: UnparsablePlacement,

    /// Snapshot reload interval in seconds, 0 disables auto reload
    #[arg(long, default_value_t = 30)]
    reload: u64,

    /// Column counted for the crown badge
    #[arg(long, default_value_t = 0)]
    crown_column: usize,
}

fn parse_column_parser(s: &str) -> Result<(usize, String), String> {
    let (column, id) = s
        .split_once(':')
        .ok_or_else(|| format!("expected COL:ID, got \"{s}\""))?;
    let column: usize = column
        .parse()
        .map_err(|_| format!("\"{column}\" is not a column index"))?;
    if id.is_empty() {
        return Err(format!("empty parser id in \"{s}\""));
    }
    Ok((column, id.to_string()))
}

fn init_tracing() -> Result<(), LVError> {
    let logfile = std::fs::File::create("lv.log")?;
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(ErrorLayer::default())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Arc::new(logfile))
                .with_ansi(false),
        )
        .init();
    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Err(e) => {
            ratatui::restore();
            eprintln!("Error: {:?}", e);
            ExitCode::FAILURE
        }
        Ok(_) => {
            ratatui::restore();
            ExitCode::SUCCESS
        }
    }
}

fn run() -> Result<(), LVError> {
    let args = Args::parse();
    init_tracing()?;

    let path = shellexpand::full(&args.path)
        .map_err(|e| LVError::LoadingFailed(e.to_string()))?
        .into_owned();

    let separator = u8::try_from(args.delimiter)
        .map_err(|_| LVError::LoadingFailed(format!("\"{}\" is not a CSV delimiter", args.delimiter)))?;

    let cfg = LVConfig::default()
        .with_csv_separator(separator)
        .with_reload_interval_secs(args.reload)
        .with_crown_column(args.crown_column)
        .with_unparsable_placement(args.sort_unparsable)
        .with_column_parsers(args.parsers);

    let mut model = Model::init(&cfg, PathBuf::from(path))?;
    let ui = BoardUI::new(&cfg);
    let controller = Controller::new(&cfg);

    let mut terminal = ratatui::init();
    let size = terminal.size()?;
    model.update(Message::Resize(size.width as usize, size.height as usize))?;

    while model.status != Status::QUITTING {
        terminal.draw(|f| ui.draw(model.get_uidata(), f))?;

        // Handle events and map to a Message
        if let Some(message) = controller.handle_event(&model)? {
            model.update(message)?;
        }
    }

    Ok(())
}
