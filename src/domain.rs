use std::io::Error;

use clap::ValueEnum;
use derive_setters::Setters;
use polars::error::PolarsError;
use ratatui::crossterm::event::KeyEvent;

use crate::parsers::ParserError;

// Crate wide error type. Engine errors stay row-local and are folded in
// here only when they have to reach the caller.
#[derive(Debug)]
pub enum LVError {
    IoError(Error),
    PolarsError(PolarsError),
    ParserError(ParserError),
    LoadingFailed(String),
    FileNotFound,
    PermissionDenied,
    EmptySnapshot,
}

impl From<Error> for LVError {
    fn from(err: Error) -> Self {
        LVError::IoError(err)
    }
}

impl From<PolarsError> for LVError {
    fn from(err: PolarsError) -> Self {
        LVError::PolarsError(err)
    }
}

impl From<ParserError> for LVError {
    fn from(err: ParserError) -> Self {
        LVError::ParserError(err)
    }
}

// Where rows land that fail to parse for the active sort keys.
// The original behavior is unspecified, so it is a policy, not a guess.
#[derive(Debug, Clone, Copy, PartialEq, Default, ValueEnum)]
pub enum UnparsablePlacement {
    FIRST,
    #[default]
    LAST,
}

#[derive(Debug, Clone, Setters)]
#[setters(prefix = "with_")]
pub struct LVConfig {
    pub event_poll_time: u64,
    pub max_column_width: usize,
    pub csv_separator: u8,
    // Column whose cells count as crowns when they read "1"
    pub crown_column: usize,
    pub reload_interval_secs: u64,
    pub unparsable_placement: UnparsablePlacement,
    // column index -> parser id, applied as column defaults at load
    pub column_parsers: Vec<(usize, String)>,
}

impl Default for LVConfig {
    fn default() -> Self {
        LVConfig {
            event_poll_time: 100,
            max_column_width: 80,
            csv_separator: b',',
            crown_column: 0,
            reload_interval_secs: 30,
            unparsable_placement: UnparsablePlacement::default(),
            column_parsers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CMDMode {
    FilterRows,
}

#[derive(Debug)]
pub enum Message {
    Quit,
    MoveUp,
    MoveDown,
    MoveLeft,
    MoveRight,
    MoveBeginning,
    MoveEnd,
    SortAscending,
    SortDescending,
    // Append a tie break key instead of replacing the sort
    SortAppendAscending,
    SortAppendDescending,
    Filter,
    ToggleDetail,
    ToggleAutoReload,
    CopyRow,
    Help,
    Exit,
    Resize(usize, usize),
    RawKey(KeyEvent),
    Tick,
}

pub const HELP_TEXT: &str = "lv - leaderboard viewer

Navigation
  j/k, Down/Up    move row cursor
  h/l, Left/Right move column cursor
  g/G             first/last row

Sorting
  s/S             sort by current column asc/desc
  m/M             add current column as tie break key asc/desc

Other
  /               filter rows (Enter apply, Esc cancel)
  Enter           expand/collapse detail row
  r               toggle auto reload
  c               copy row to clipboard
  ?               this help (Esc to close)
  q               quit
";
