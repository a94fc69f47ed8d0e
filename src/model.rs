use arboard::Clipboard;
use polars::prelude::*;
use rayon::prelude::*;
use ratatui::crossterm::event::KeyEvent;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use crate::domain::{CMDMode, HELP_TEXT, LVConfig, LVError, Message};
use crate::inputter::{InputResult, Inputter};
use crate::parsers::ParserRegistry;
use crate::table::{
    ColumnSpec, DetailState, Direction, FilterSpec, Row, RowId, RowKind, SortKey, SortSpec, Table,
    TableEvent,
};
use crate::ui::{CMDLINE_HEIGHT, TABLE_HEADER_HEIGHT};

// Detail row ids derive from their anchor id, keeping them stable
// across expand/collapse cycles
const DETAIL_ID_BASE: RowId = 1 << 32;

#[derive(Debug, PartialEq)]
pub enum Status {
    READY,
    QUITTING,
}

#[derive(Debug, Clone, Copy)]
enum Modus {
    BOARD,
    POPUP,
    CMDINPUT,
}

// The snapshot reload timer. The only cancellable thing around the
// engine: paused around every interaction so a reload can never observe
// a half reordered table.
struct Reloader {
    enabled: bool,
    paused: bool,
    interval: Duration,
    last: Instant,
}

impl Reloader {
    fn new(interval_secs: u64) -> Self {
        Reloader {
            enabled: interval_secs > 0,
            paused: false,
            interval: Duration::from_secs(interval_secs.max(1)),
            last: Instant::now(),
        }
    }

    fn pause(&mut self) {
        self.paused = true;
    }

    fn resume(&mut self) {
        self.paused = false;
    }

    fn due(&self) -> bool {
        self.enabled && !self.paused && self.last.elapsed() >= self.interval
    }

    fn mark(&mut self) {
        self.last = Instant::now();
    }

    fn toggle(&mut self) -> bool {
        self.enabled = !self.enabled;
        self.last = Instant::now();
        self.enabled
    }
}

#[derive(Clone)]
pub struct UIRow {
    pub id: RowId,
    pub detail: bool,
    pub expanded: bool,
    pub cells: Vec<String>,
}

#[derive(Clone)]
pub struct UIData {
    pub name: String,
    pub header: Vec<String>,
    pub widths: Vec<usize>,
    pub rows: Vec<UIRow>,
    pub nrows: usize,
    pub selected_row: usize,
    pub selected_column: usize,
    pub abs_selected_row: usize,
    pub crown_count: usize,
    pub auto_reload: bool,
    pub show_popup: bool,
    pub popup_message: String,
    pub cmdinput: InputResult,
    pub active_cmdinput: bool,
    pub status_message: String,
    pub last_update: Instant,
}

impl UIData {
    pub fn empty() -> Self {
        UIData {
            name: String::new(),
            header: Vec::new(),
            widths: Vec::new(),
            rows: Vec::new(),
            nrows: 0,
            selected_row: 0,
            selected_column: 0,
            abs_selected_row: 0,
            crown_count: 0,
            auto_reload: false,
            show_popup: false,
            popup_message: String::new(),
            cmdinput: InputResult::default(),
            active_cmdinput: false,
            status_message: String::new(),
            last_update: Instant::now(),
        }
    }
}

pub type DetailBuilder = Box<dyn FnMut(&Row) -> Vec<String>>;

pub struct Model {
    config: LVConfig,
    pub status: Status,
    modus: Modus,
    previous_modus: Modus,
    snapshot_path: PathBuf,
    table: Table,
    sort_spec: SortSpec,
    filter_spec: FilterSpec,
    curser_row: usize, // index into the visible row sequence
    curser_column: usize,
    offset_row: usize,
    view_height: usize,
    // Collapsed detail rows keep their built content here so the heavy
    // construction runs exactly once per anchor
    detail_cache: HashMap<RowId, Row>,
    detail_builder: DetailBuilder,
    reloader: Reloader,
    clipboard: Option<Clipboard>,
    input: Inputter,
    last_input: InputResult,
    cmd_mode: Option<CMDMode>,
    active_cmdinput: bool,
    uidata: UIData,
    status_message: String,
    last_status_message_update: Instant,
}

impl Model {
    pub fn init(config: &LVConfig, path: PathBuf) -> Result<Self, LVError> {
        let start_time = Instant::now();
        let (names, records) = Self::load_snapshot(&path, config.csv_separator)?;
        let loading_duration = start_time.elapsed().as_millis();
        info!("Loading snapshot took {loading_duration}ms ...");

        let mut model = Self::from_parts(config, path, names, records)?;
        model.set_status_message(format!(
            "Loaded {} rows in {}ms ...",
            model.table.rows().len(),
            loading_duration
        ));
        Ok(model)
    }

    // Construction from an already loaded snapshot. The detail builder is
    // the collaborator that produces the heavy content of a detail row;
    // the default renders an embed reference from the anchor cells.
    pub fn from_parts(
        config: &LVConfig,
        path: PathBuf,
        names: Vec<String>,
        records: Vec<Vec<String>>,
    ) -> Result<Self, LVError> {
        let table = Self::build_table(config, names, records)?;

        let mut model = Model {
            config: config.clone(),
            status: Status::READY,
            modus: Modus::BOARD,
            previous_modus: Modus::BOARD,
            snapshot_path: path,
            table,
            sort_spec: SortSpec::new(),
            filter_spec: FilterSpec::default(),
            curser_row: 0,
            curser_column: 0,
            offset_row: 0,
            view_height: 20,
            detail_cache: HashMap::new(),
            detail_builder: Box::new(Self::default_detail_content),
            reloader: Reloader::new(config.reload_interval_secs),
            clipboard: Clipboard::new().ok(),
            input: Inputter::default(),
            last_input: InputResult::default(),
            cmd_mode: None,
            active_cmdinput: false,
            uidata: UIData::empty(),
            status_message: "Started lv!".to_string(),
            last_status_message_update: Instant::now(),
        };
        model.table.reconcile();
        model.update_uidata();
        Ok(model)
    }

    fn build_table(
        config: &LVConfig,
        names: Vec<String>,
        records: Vec<Vec<String>>,
    ) -> Result<Table, LVError> {
        if names.is_empty() || records.is_empty() {
            return Err(LVError::EmptySnapshot);
        }
        let columns = names
            .into_iter()
            .enumerate()
            .map(|(idx, name)| ColumnSpec {
                name,
                parser: config
                    .column_parsers
                    .iter()
                    .find(|(c, _)| *c == idx)
                    .map(|(_, id)| id.clone()),
            })
            .collect::<Vec<_>>();

        let registry = ParserRegistry::with_builtins();
        // Validate the column defaults against the registry before the
        // first sort, a bad --parser flag is a configuration fault
        for column in columns.iter() {
            if let Some(id) = column.parser.as_deref() {
                registry.resolve(id)?;
            }
        }

        let mut table = Table::new(columns, registry, config.unparsable_placement);
        table.on_event(Box::new(|event| match event {
            TableEvent::SortEnd(order) => trace!("sortEnd: {} primary rows", order.len()),
            TableEvent::FilterEnd(visible) => trace!("filterEnd: {} rows visible", visible.len()),
            TableEvent::ReconcileEnd(visible) => {
                trace!("reconcileEnd: {} rows visible", visible.len())
            }
        }));
        for (idx, cells) in records.into_iter().enumerate() {
            table.push_row(Row::primary(idx as RowId, cells));
        }
        Ok(table)
    }

    pub fn set_detail_builder(&mut self, builder: DetailBuilder) {
        self.detail_builder = builder;
    }

    fn default_detail_content(anchor: &Row) -> Vec<String> {
        let summary = anchor
            .cells
            .iter()
            .map(|c| c.raw.as_str())
            .collect::<Vec<_>>()
            .join(" | ");
        vec![format!("[x close]  {summary}")]
    }

    // ---------------------------- snapshot loading ----------------------------

    fn load_csv(path: &Path, separator: u8) -> Result<LazyFrame, PolarsError> {
        LazyCsvReader::new(PlPath::Local(path.into()))
            .with_has_header(true)
            .with_separator(separator)
            .finish()
    }

    fn load_column(df: &DataFrame, col_name: &str) -> Result<Vec<String>, PolarsError> {
        let col = df.column(col_name)?.cast(&DataType::String)?;
        let series = col.str()?;
        let mut data = Vec::with_capacity(series.len());
        for value in series.into_iter() {
            let ss = match value {
                Some(s) => s.to_string().replace("\r\n", " ").replace("\n", " "),
                None => String::new(),
            };
            data.push(ss);
        }
        Ok(data)
    }

    pub fn load_snapshot(
        path: &Path,
        separator: u8,
    ) -> Result<(Vec<String>, Vec<Vec<String>>), LVError> {
        let metadata = fs::metadata(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => LVError::FileNotFound,
            ErrorKind::PermissionDenied => LVError::PermissionDenied,
            _ => LVError::IoError(e),
        })?;
        if !metadata.is_file() {
            return Err(LVError::LoadingFailed("Not a file!".into()));
        }

        let df = Arc::new(Self::load_csv(path, separator)?.collect()?);
        let names: Vec<String> = df
            .get_column_names()
            .iter()
            .map(|n| n.to_string())
            .collect();
        // Column parallel preprocessing, everything ends up as strings
        let columns: Result<Vec<Vec<String>>, PolarsError> = names
            .par_iter()
            .map(|name| Self::load_column(&df, name))
            .collect();
        let columns = columns?;

        let nrows = columns.first().map(|c| c.len()).unwrap_or(0);
        let mut records = Vec::with_capacity(nrows);
        for ridx in 0..nrows {
            records.push(columns.iter().map(|c| c[ridx].clone()).collect());
        }
        debug!("Snapshot: {} columns, {} records", names.len(), nrows);
        Ok((names, records))
    }

    // ------------------------------- update loop ------------------------------

    pub fn raw_keyevents(&self) -> bool {
        self.active_cmdinput
    }

    pub fn get_uidata(&self) -> &UIData {
        &self.uidata
    }

    pub fn quit(&mut self) {
        self.status = Status::QUITTING;
    }

    pub fn update(&mut self, message: Message) -> Result<(), LVError> {
        if let Message::Tick = message {
            if self.reloader.due() {
                self.reload();
                self.reloader.mark();
            }
            return Ok(());
        }

        // No external timer may interleave with an interaction
        self.reloader.pause();

        match self.modus {
            Modus::BOARD => match message {
                Message::Quit => self.quit(),
                Message::MoveUp => self.move_selection(-1),
                Message::MoveDown => self.move_selection(1),
                Message::MoveLeft => self.move_column(-1),
                Message::MoveRight => self.move_column(1),
                Message::MoveBeginning => self.move_beginning(),
                Message::MoveEnd => self.move_end(),
                Message::SortAscending => self.sort_replace(Direction::Ascending),
                Message::SortDescending => self.sort_replace(Direction::Descending),
                Message::SortAppendAscending => self.sort_append(Direction::Ascending),
                Message::SortAppendDescending => self.sort_append(Direction::Descending),
                Message::Filter => self.enter_cmd_mode(CMDMode::FilterRows),
                Message::ToggleDetail => self.toggle_detail(),
                Message::ToggleAutoReload => self.toggle_auto_reload(),
                Message::CopyRow => self.copy_row(),
                Message::Help => self.show_help(),
                Message::Exit => self.clear_filter(),
                Message::Resize(width, height) => self.ui_resize(width, height),
                _ => (),
            },
            Modus::POPUP => match message {
                Message::Quit => self.quit(),
                Message::Resize(width, height) => self.ui_resize(width, height),
                Message::Exit | Message::Help => self.close_popup(),
                _ => (),
            },
            Modus::CMDINPUT => {
                if let Message::RawKey(key) = message {
                    self.raw_input(key)
                }
            }
        }

        // Visible detail rows and an open prompt keep the reload off
        if !self.any_detail_expanded() && !self.active_cmdinput {
            self.reloader.resume();
        }
        Ok(())
    }

    fn any_detail_expanded(&self) -> bool {
        self.table
            .rows()
            .iter()
            .any(|r| r.kind == RowKind::DETAIL && !self.table.is_hidden(r.id))
    }

    // ------------------------------ interactions ------------------------------

    fn sort_replace(&mut self, direction: Direction) {
        self.sort_spec = vec![SortKey {
            column: self.curser_column,
            direction,
            parser: None,
        }];
        self.run_sort();
    }

    fn sort_append(&mut self, direction: Direction) {
        let column = self.curser_column;
        match self.sort_spec.iter_mut().find(|k| k.column == column) {
            Some(key) => key.direction = direction,
            None => self.sort_spec.push(SortKey {
                column,
                direction,
                parser: None,
            }),
        }
        self.run_sort();
    }

    fn run_sort(&mut self) {
        match self.table.sort(&self.sort_spec) {
            Ok(order) => {
                self.table.reconcile();
                trace!("Sort order: {order:?}");
            }
            Err(e) => {
                warn!("Sort rejected: {e}");
                self.set_status_message(format!("Sort failed: {e}"));
            }
        }
        self.clamp_cursor();
        self.update_uidata();
    }

    fn apply_filter(&mut self, term: &str) {
        trace!("Starting filter for {term} ...");
        self.filter_spec = FilterSpec {
            column: None,
            pattern: term.to_string(),
        };
        let visible = self.table.filter(&self.filter_spec);
        self.table.reconcile();
        self.curser_row = 0;
        self.offset_row = 0;
        if term.is_empty() {
            self.set_status_message("Filter cleared".to_string());
        } else {
            self.set_status_message(format!("Filter matches {} rows", visible.len()));
        }
        self.update_uidata();
    }

    fn clear_filter(&mut self) {
        if !self.filter_spec.pattern.is_empty() {
            self.apply_filter("");
        }
    }

    fn toggle_detail(&mut self) {
        let Some(selected) = self.selected_row_id() else {
            return;
        };
        // Toggling on the detail row itself acts on its anchor
        let anchor = match self.table.row(selected) {
            Some(row) if row.kind == RowKind::DETAIL => match row.anchor {
                Some(a) => a,
                None => return,
            },
            Some(_) => selected,
            None => return,
        };

        if let Some(detail) = self.table.detail_of(anchor) {
            // Collapse: take the row out but keep its content
            let id = detail.id;
            if let Some(row) = self.table.remove_row(id) {
                self.detail_cache.insert(anchor, row);
            }
            self.table.reconcile();
            self.clamp_cursor();
            self.update_uidata();
            return;
        }

        let row = match self.detail_cache.remove(&anchor) {
            Some(row) => row,
            None => {
                // First expansion: build the heavy content exactly once
                let Some(anchor_row) = self.table.row(anchor).cloned() else {
                    return;
                };
                self.table.set_detail_state(anchor, DetailState::INITIALIZING);
                let content = (self.detail_builder)(&anchor_row);
                self.table.set_detail_state(anchor, DetailState::READY);
                debug!("Materialized detail row for anchor {anchor}");
                Row::detail(DETAIL_ID_BASE + anchor, anchor, content)
            }
        };
        self.table.push_row(row);
        self.table.reconcile();
        self.update_uidata();
    }

    fn toggle_auto_reload(&mut self) {
        let enabled = self.reloader.toggle();
        self.set_status_message(if enabled {
            "Auto reload on".to_string()
        } else {
            "Auto reload off".to_string()
        });
        self.update_uidata();
    }

    // Re-read the snapshot and re-apply the current sort and filter.
    // Never fatal, a broken reload keeps the last good table.
    fn reload(&mut self) {
        info!("Reloading {:?} ...", self.snapshot_path);
        let parts = match Self::load_snapshot(&self.snapshot_path, self.config.csv_separator) {
            Ok(parts) => parts,
            Err(e) => {
                warn!("Reload failed: {e:?}");
                self.set_status_message("Reload failed, keeping current table".to_string());
                return;
            }
        };
        let table = match Self::build_table(&self.config, parts.0, parts.1) {
            Ok(table) => table,
            Err(e) => {
                warn!("Reload failed: {e:?}");
                self.set_status_message("Reload failed, keeping current table".to_string());
                return;
            }
        };
        self.table = table;
        self.detail_cache.clear();
        if !self.sort_spec.is_empty()
            && let Err(e) = self.table.sort(&self.sort_spec)
        {
            warn!("Sort after reload rejected: {e}");
        }
        self.table.filter(&self.filter_spec);
        self.table.reconcile();
        self.clamp_cursor();
        self.set_status_message(format!("Reloaded {} rows", self.table.rows().len()));
        self.update_uidata();
    }

    fn copy_row(&mut self) {
        let Some(id) = self.selected_row_id() else {
            return;
        };
        let Some(row) = self.table.row(id) else {
            return;
        };
        let content = row
            .cells
            .iter()
            .map(|c| Self::wrap_cell_content(&c.raw))
            .collect::<Vec<String>>()
            .join(",");

        match self.clipboard.as_mut().map(|c| c.set_text(content)) {
            Some(Ok(_)) => self.set_status_message("Copied row to clipboard".to_string()),
            Some(Err(e)) => trace!("Error copying to clipboard: {e:?}"),
            None => trace!("No clipboard available"),
        }
        self.update_uidata();
    }

    fn wrap_cell_content(c: &str) -> String {
        let needs_escaping = c.chars().any(|c| c == '"');
        let needs_wrapping = c.chars().any(|c| c == ' ' || c == '\t' || c == ',');
        let mut out = String::from(c);

        if needs_escaping {
            out = out.replace("\"", "\"\"");
        }
        if needs_wrapping {
            out = format!("\"{out}\"");
        }
        out
    }

    fn show_help(&mut self) {
        self.previous_modus = self.modus;
        self.modus = Modus::POPUP;
        self.uidata.popup_message = HELP_TEXT.to_string();
        self.uidata.show_popup = true;
        self.uidata.last_update = Instant::now();
    }

    fn close_popup(&mut self) {
        self.modus = self.previous_modus;
        self.previous_modus = Modus::POPUP;
        self.uidata.show_popup = false;
        self.uidata.last_update = Instant::now();
    }

    // ------------------------------ filter prompt -----------------------------

    fn enter_cmd_mode(&mut self, mode: CMDMode) {
        trace!("Entering command mode ...");
        self.previous_modus = self.modus;
        self.modus = Modus::CMDINPUT;
        self.cmd_mode = Some(mode);
        self.active_cmdinput = true;
        self.input.clear();
        self.last_input = self.input.get();

        self.uidata.cmdinput = self.last_input.clone();
        self.uidata.active_cmdinput = self.active_cmdinput;
        self.uidata.last_update = Instant::now();
    }

    fn raw_input(&mut self, key: KeyEvent) {
        if self.active_cmdinput {
            self.last_input = self.input.read(key);
            if self.last_input.finished {
                self.handle_cmd_input();
            }
            self.uidata.cmdinput = self.last_input.clone();
            self.uidata.last_update = Instant::now();
        }
    }

    fn handle_cmd_input(&mut self) {
        self.active_cmdinput = false;
        self.modus = self.previous_modus;
        self.previous_modus = Modus::CMDINPUT;
        self.uidata.active_cmdinput = self.active_cmdinput;

        let cmd_input = self.last_input.input.clone();
        match self.cmd_mode {
            Some(CMDMode::FilterRows) => {
                if !self.last_input.canceled {
                    self.apply_filter(&cmd_input);
                }
            }
            None => {
                info!("Cmd mode is none!")
            }
        }
        self.cmd_mode = None;
    }

    // -------------------------------- movement --------------------------------

    fn visible_count(&self) -> usize {
        self.table.visible_ids().len()
    }

    fn selected_row_id(&self) -> Option<RowId> {
        self.table.visible_ids().get(self.curser_row).copied()
    }

    fn move_selection(&mut self, step: i64) {
        let total = self.visible_count();
        if total == 0 {
            return;
        }
        let target = if step < 0 {
            self.curser_row.saturating_sub(step.unsigned_abs() as usize)
        } else {
            std::cmp::min(self.curser_row + step as usize, total - 1)
        };
        self.curser_row = target;
        self.scroll_to_cursor();
        self.update_uidata();
    }

    fn move_beginning(&mut self) {
        self.curser_row = 0;
        self.offset_row = 0;
        self.update_uidata();
    }

    fn move_end(&mut self) {
        let total = self.visible_count();
        if total > 0 {
            self.curser_row = total - 1;
        }
        self.scroll_to_cursor();
        self.update_uidata();
    }

    fn move_column(&mut self, step: i64) {
        let ncols = self.table.columns().len();
        if ncols == 0 {
            return;
        }
        if step < 0 {
            self.curser_column = self.curser_column.saturating_sub(1);
        } else {
            self.curser_column = std::cmp::min(self.curser_column + 1, ncols - 1);
        }
        self.update_uidata();
    }

    fn scroll_to_cursor(&mut self) {
        if self.curser_row < self.offset_row {
            self.offset_row = self.curser_row;
        } else if self.curser_row >= self.offset_row + self.view_height {
            self.offset_row = self.curser_row + 1 - self.view_height;
        }
    }

    fn clamp_cursor(&mut self) {
        let total = self.visible_count();
        if total == 0 {
            self.curser_row = 0;
            self.offset_row = 0;
        } else if self.curser_row >= total {
            self.curser_row = total - 1;
        }
        self.scroll_to_cursor();
    }

    fn ui_resize(&mut self, width: usize, height: usize) {
        trace!("UI was resized! w:{width}, h:{height}");
        self.view_height = height
            .saturating_sub(TABLE_HEADER_HEIGHT + CMDLINE_HEIGHT + 2)
            .max(1);
        self.scroll_to_cursor();
        self.update_uidata();
    }

    // --------------------------------- uidata ---------------------------------

    fn set_status_message(&mut self, message: impl Into<String>) {
        self.status_message = message.into();
        self.last_status_message_update = Instant::now();
        self.uidata.status_message = self.status_message.clone();
        self.uidata.last_update = Instant::now();
    }

    // Count of course records: primary rows whose crown column reads "1"
    fn crown_count(&self) -> usize {
        self.table
            .rows()
            .iter()
            .filter(|r| r.kind == RowKind::PRIMARY)
            .filter(|r| r.cell_raw(self.config.crown_column).trim() == "1")
            .count()
    }

    fn header_names(&self) -> Vec<String> {
        self.table
            .columns()
            .iter()
            .enumerate()
            .map(|(idx, column)| {
                let mut name = column.name.clone();
                if let Some(pos) = self.sort_spec.iter().position(|k| k.column == idx) {
                    name.push(match self.sort_spec[pos].direction {
                        Direction::Ascending => '▲',
                        Direction::Descending => '▼',
                    });
                    if self.sort_spec.len() > 1 {
                        name.push_str(&(pos + 1).to_string());
                    }
                }
                name
            })
            .collect()
    }

    fn update_uidata(&mut self) {
        let visible = self.table.visible_ids();
        let header = self.header_names();
        let ncols = header.len();

        let rbegin = std::cmp::min(self.offset_row, visible.len());
        let rend = std::cmp::min(rbegin + self.view_height, visible.len());
        let rows: Vec<UIRow> = visible[rbegin..rend]
            .iter()
            .filter_map(|id| self.table.row(*id))
            .map(|row| UIRow {
                id: row.id,
                detail: row.kind == RowKind::DETAIL,
                expanded: row.kind == RowKind::PRIMARY && self.table.detail_of(row.id).is_some(),
                cells: (0..ncols).map(|c| row.cell_raw(c).to_string()).collect(),
            })
            .collect();

        let mut widths: Vec<usize> = header.iter().map(|h| h.chars().count()).collect();
        for row in rows.iter().filter(|r| !r.detail) {
            for (idx, cell) in row.cells.iter().enumerate() {
                if idx < widths.len() {
                    widths[idx] = std::cmp::max(widths[idx], cell.chars().count());
                }
            }
        }
        for w in widths.iter_mut() {
            *w = std::cmp::min(*w, self.config.max_column_width);
        }

        self.uidata = UIData {
            name: self
                .snapshot_path
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or("???")
                .to_string(),
            header,
            widths,
            rows,
            nrows: visible.len(),
            selected_row: self.curser_row - rbegin.min(self.curser_row),
            selected_column: self.curser_column,
            abs_selected_row: self.curser_row,
            crown_count: self.crown_count(),
            auto_reload: self.reloader.enabled,
            show_popup: self.uidata.show_popup,
            popup_message: self.uidata.popup_message.clone(),
            cmdinput: self.last_input.clone(),
            active_cmdinput: self.active_cmdinput,
            status_message: self.status_message.clone(),
            last_update: Instant::now(),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn test_config() -> LVConfig {
        LVConfig::default()
            .with_reload_interval_secs(0)
            .with_column_parsers(vec![(1, "timestamp".to_string())])
    }

    fn test_model() -> Model {
        let names = vec!["rank".to_string(), "time".to_string(), "name".to_string()];
        let records = vec![
            vec!["1".to_string(), "4:05".to_string(), "alpha".to_string()],
            vec!["2".to_string(), "-2:30".to_string(), "beta".to_string()],
            vec!["1".to_string(), "3:10".to_string(), "gamma".to_string()],
        ];
        Model::from_parts(&test_config(), PathBuf::from("board.csv"), names, records).unwrap()
    }

    #[test]
    fn snapshot_loads_with_custom_delimiter() {
        let path = std::env::temp_dir().join("lv_semicolon_board.csv");
        std::fs::write(&path, "rank;time;name\n1;4:05;alpha\n2;3:10;beta\n").unwrap();

        let (names, records) = Model::load_snapshot(&path, b';').unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(names, vec!["rank", "time", "name"]);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], vec!["1", "4:05", "alpha"]);
        assert_eq!(records[1], vec!["2", "3:10", "beta"]);
    }

    #[test]
    fn crown_count_counts_rank_one_rows() {
        let model = test_model();
        assert_eq!(model.get_uidata().crown_count, 2);
    }

    #[test]
    fn detail_content_is_built_exactly_once() {
        let mut model = test_model();
        let calls = Rc::new(RefCell::new(0usize));
        let counter = Rc::clone(&calls);
        model.set_detail_builder(Box::new(move |anchor| {
            *counter.borrow_mut() += 1;
            vec![format!("embed for {}", anchor.cell_raw(2))]
        }));

        // Expand, collapse, expand again: one build
        model.toggle_detail();
        assert_eq!(*calls.borrow(), 1);
        assert!(model.table.detail_of(0).is_some());

        model.toggle_detail();
        assert!(model.table.detail_of(0).is_none());

        model.toggle_detail();
        assert_eq!(*calls.borrow(), 1);
        let detail = model.table.detail_of(0).unwrap();
        assert_eq!(detail.cell_raw(0), "embed for alpha");
    }

    #[test]
    fn expanded_detail_sits_below_anchor_in_uidata() {
        let mut model = test_model();
        model.toggle_detail();
        let rows = &model.get_uidata().rows;
        assert!(rows[0].expanded);
        assert!(rows[1].detail);
        assert_eq!(rows[1].id, DETAIL_ID_BASE);
    }

    #[test]
    fn sort_interaction_keeps_detail_attached() {
        let mut model = test_model();
        model.toggle_detail(); // detail on row id 0

        model.curser_column = 1;
        model.update(Message::SortAscending).unwrap();

        let order: Vec<RowId> = model.table.rows().iter().map(|r| r.id).collect();
        // beta (-2:30) < gamma (3:10) < alpha (4:05), detail stays glued
        assert_eq!(order, vec![1, 2, 0, DETAIL_ID_BASE]);
    }

    #[test]
    fn filter_interaction_derives_detail_visibility() {
        let mut model = test_model();
        model.toggle_detail();
        model.apply_filter("beta");
        assert!(model.table.is_hidden(0));
        assert!(model.table.is_hidden(DETAIL_ID_BASE));

        model.apply_filter("");
        assert!(!model.table.is_hidden(0));
        assert!(!model.table.is_hidden(DETAIL_ID_BASE));
    }

    #[test]
    fn expanded_detail_keeps_reload_paused() {
        let mut model = test_model();
        model.reloader.enabled = true;

        model.update(Message::ToggleDetail).unwrap();
        assert!(model.reloader.paused);

        model.update(Message::ToggleDetail).unwrap();
        assert!(!model.reloader.paused);
    }

    #[test]
    fn sort_failure_keeps_table_order() {
        let mut model = test_model();
        model.sort_spec = vec![SortKey {
            column: 0,
            direction: Direction::Ascending,
            parser: Some("nope".to_string()),
        }];
        model.run_sort();
        let order: Vec<RowId> = model.table.rows().iter().map(|r| r.id).collect();
        assert_eq!(order, vec![0, 1, 2]);
        assert!(model.get_uidata().status_message.contains("Sort failed"));
    }

    #[test]
    fn append_sort_builds_multi_key_spec() {
        let mut model = test_model();
        model.curser_column = 0;
        model.update(Message::SortAscending).unwrap();
        model.curser_column = 1;
        model.update(Message::SortAppendDescending).unwrap();

        assert_eq!(model.sort_spec.len(), 2);
        // rank asc ties (rows 0 and 2) broken by time desc
        let order: Vec<RowId> = model.table.rows().iter().map(|r| r.id).collect();
        assert_eq!(order, vec![0, 2, 1]);
    }
}
