use std::collections::HashSet;

use rayon::prelude::*;
use tracing::{debug, trace, warn};

use crate::domain::UnparsablePlacement;
use crate::parsers::{Key, Parser, ParserError, ParserRegistry};

pub type RowId = u64;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RowKind {
    PRIMARY,
    DETAIL,
}

// One-shot initialization marker for the heavy detail content of an
// anchor row. Lives on the row itself, not in some side channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DetailState {
    UNINITIALIZED,
    INITIALIZING,
    READY,
}

#[derive(Debug, Clone)]
pub struct Cell {
    pub column: usize,
    pub raw: String,
}

#[derive(Debug, Clone)]
pub struct Row {
    pub id: RowId,
    pub kind: RowKind,
    pub anchor: Option<RowId>,
    pub cells: Vec<Cell>,
    pub detail: DetailState,
}

impl Row {
    pub fn primary(id: RowId, cells: Vec<String>) -> Self {
        Row {
            id,
            kind: RowKind::PRIMARY,
            anchor: None,
            cells: Self::to_cells(cells),
            detail: DetailState::UNINITIALIZED,
        }
    }

    pub fn detail(id: RowId, anchor: RowId, cells: Vec<String>) -> Self {
        Row {
            id,
            kind: RowKind::DETAIL,
            anchor: Some(anchor),
            cells: Self::to_cells(cells),
            detail: DetailState::READY,
        }
    }

    fn to_cells(cells: Vec<String>) -> Vec<Cell> {
        cells
            .into_iter()
            .enumerate()
            .map(|(column, raw)| Cell { column, raw })
            .collect()
    }

    pub fn cell_raw(&self, column: usize) -> &str {
        self.cells
            .iter()
            .find(|c| c.column == column)
            .map(|c| c.raw.as_str())
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone)]
pub struct SortKey {
    pub column: usize,
    pub direction: Direction,
    // Overrides the column default parser for this key only
    pub parser: Option<String>,
}

// Entry order is tie break precedence: first non equal key decides.
pub type SortSpec = Vec<SortKey>;

#[derive(Debug, Clone, Default)]
pub struct FilterSpec {
    // None matches against every cell of the row
    pub column: Option<usize>,
    pub pattern: String,
}

#[derive(Debug, Clone)]
pub struct ColumnSpec {
    pub name: String,
    // Default parser id for sort keys on this column
    pub parser: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableEvent {
    SortEnd(Vec<RowId>),
    FilterEnd(Vec<RowId>),
    ReconcileEnd(Vec<RowId>),
}

// The authoritative display order plus a visibility set. Mutated only
// through whole pass operations (sort/filter/reconcile) so a render in
// between two interactions never sees a half moved table.
pub struct Table {
    rows: Vec<Row>,
    hidden: HashSet<RowId>,
    columns: Vec<ColumnSpec>,
    registry: ParserRegistry,
    unparsable: UnparsablePlacement,
    subscribers: Vec<Box<dyn FnMut(&TableEvent)>>,
}

impl Table {
    pub fn new(
        columns: Vec<ColumnSpec>,
        registry: ParserRegistry,
        unparsable: UnparsablePlacement,
    ) -> Self {
        Table {
            rows: Vec::new(),
            hidden: HashSet::new(),
            columns,
            registry,
            unparsable,
            subscribers: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Row) {
        self.rows.push(row);
    }

    pub fn remove_row(&mut self, id: RowId) -> Option<Row> {
        let pos = self.rows.iter().position(|r| r.id == id)?;
        self.hidden.remove(&id);
        Some(self.rows.remove(pos))
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn row(&self, id: RowId) -> Option<&Row> {
        self.rows.iter().find(|r| r.id == id)
    }

    pub fn is_hidden(&self, id: RowId) -> bool {
        self.hidden.contains(&id)
    }

    pub fn detail_of(&self, anchor: RowId) -> Option<&Row> {
        self.rows
            .iter()
            .find(|r| r.kind == RowKind::DETAIL && r.anchor == Some(anchor))
    }

    pub fn set_detail_state(&mut self, id: RowId, state: DetailState) {
        if let Some(row) = self.rows.iter_mut().find(|r| r.id == id) {
            row.detail = state;
        }
    }

    pub fn visible_ids(&self) -> Vec<RowId> {
        self.rows
            .iter()
            .filter(|r| !self.hidden.contains(&r.id))
            .map(|r| r.id)
            .collect()
    }

    pub fn on_event(&mut self, subscriber: Box<dyn FnMut(&TableEvent)>) {
        self.subscribers.push(subscriber);
    }

    fn emit(&mut self, event: TableEvent) {
        for subscriber in self.subscribers.iter_mut() {
            subscriber(&event);
        }
    }

    // Reorder primary rows by the given keys. Stable: rows with fully
    // equal keys keep their current relative order, so re-sorting with an
    // unchanged spec is a no-op. Rows failing any key's parse are kept out
    // of the key ordering and placed as a block at the configured end.
    // Detail rows are not sort subjects, reconcile() carries them along.
    pub fn sort(&mut self, spec: &SortSpec) -> Result<Vec<RowId>, ParserError> {
        // Resolve every parser up front. A configuration fault must
        // surface before any table state is touched.
        let order = {
            let mut key_parsers: Vec<Option<&dyn Parser>> = Vec::with_capacity(spec.len());
            for key in spec.iter() {
                let id = key
                    .parser
                    .as_deref()
                    .or_else(|| self.columns.get(key.column).and_then(|c| c.parser.as_deref()));
                key_parsers.push(match id {
                    Some(id) => Some(self.registry.resolve(id)?),
                    None => None,
                });
            }

            let (primaries, details): (Vec<&Row>, Vec<&Row>) = self
                .rows
                .iter()
                .partition(|r| r.kind == RowKind::PRIMARY);

            let mut sortable: Vec<(Vec<Key>, RowId)> = Vec::with_capacity(primaries.len());
            let mut unparsable: Vec<RowId> = Vec::new();
            'rows: for row in primaries.iter() {
                let mut keys = Vec::with_capacity(spec.len());
                for (key, parser) in spec.iter().zip(key_parsers.iter()) {
                    let raw = row.cell_raw(key.column);
                    match parser {
                        Some(p) => match p.normalize(raw) {
                            Ok(k) => keys.push(k),
                            Err(e) => {
                                // Row local: exclude from key ordering,
                                // everything else sorts unaffected
                                debug!("Row {} not sortable: {e}", row.id);
                                unparsable.push(row.id);
                                continue 'rows;
                            }
                        },
                        None => keys.push(Key::Text(raw.to_string())),
                    }
                }
                sortable.push((keys, row.id));
            }

            sortable.sort_by(|(a, _), (b, _)| {
                for (idx, key) in spec.iter().enumerate() {
                    let ord = match key.direction {
                        Direction::Ascending => a[idx].compare(&b[idx]),
                        // Direction flips the key comparison only,
                        // never the tie break order
                        Direction::Descending => b[idx].compare(&a[idx]),
                    };
                    if ord != std::cmp::Ordering::Equal {
                        return ord;
                    }
                }
                std::cmp::Ordering::Equal
            });

            let sorted: Vec<RowId> = sortable.into_iter().map(|(_, id)| id).collect();
            let mut order: Vec<RowId> = match self.unparsable {
                UnparsablePlacement::FIRST => {
                    unparsable.into_iter().chain(sorted.into_iter()).collect()
                }
                UnparsablePlacement::LAST => {
                    sorted.into_iter().chain(unparsable.into_iter()).collect()
                }
            };
            // Carry detail rows at the tail, reconcile() re-attaches them
            order.extend(details.iter().map(|r| r.id));
            order
        };

        let mut rows = std::mem::take(&mut self.rows);
        rows.sort_by_key(|r| order.iter().position(|&id| id == r.id).unwrap_or(usize::MAX));
        self.rows = rows;

        let primary_order: Vec<RowId> = self
            .rows
            .iter()
            .filter(|r| r.kind == RowKind::PRIMARY)
            .map(|r| r.id)
            .collect();
        trace!("Sorted {} primary rows", primary_order.len());
        self.emit(TableEvent::SortEnd(primary_order.clone()));
        Ok(primary_order)
    }

    // Evaluate the predicate per primary row. Detail rows are never
    // evaluated, their visibility derives from the anchor in reconcile().
    pub fn filter(&mut self, spec: &FilterSpec) -> Vec<RowId> {
        let pattern = spec.pattern.to_lowercase();
        let column = spec.column;
        let verdicts: Vec<(RowId, bool)> = self
            .rows
            .par_iter()
            .filter(|r| r.kind == RowKind::PRIMARY)
            .map(|row| {
                let hit = pattern.is_empty()
                    || match column {
                        Some(c) => row.cell_raw(c).to_lowercase().contains(&pattern),
                        None => row
                            .cells
                            .iter()
                            .any(|cell| cell.raw.to_lowercase().contains(&pattern)),
                    };
                (row.id, hit)
            })
            .collect();

        for (id, hit) in verdicts {
            if hit {
                self.hidden.remove(&id);
            } else {
                self.hidden.insert(id);
            }
        }

        let visible: Vec<RowId> = self
            .rows
            .iter()
            .filter(|r| r.kind == RowKind::PRIMARY && !self.hidden.contains(&r.id))
            .map(|r| r.id)
            .collect();
        trace!("Filter \"{}\" leaves {} rows", spec.pattern, visible.len());
        self.emit(TableEvent::FilterEnd(visible.clone()));
        visible
    }

    // Repair the grouping invariant: every detail row sits immediately
    // after its anchor and shares its visibility. Idempotent. Detail rows
    // whose anchor is gone are dropped with a diagnostic, the rest of the
    // table is reconciled regardless. Must run after every sort or filter
    // before rendering.
    pub fn reconcile(&mut self) -> Vec<RowId> {
        let detail_ids: Vec<RowId> = self
            .rows
            .iter()
            .filter(|r| r.kind == RowKind::DETAIL)
            .map(|r| r.id)
            .collect();

        for id in detail_ids {
            // Positions shift as rows move, look up fresh every time
            let Some(pos) = self.rows.iter().position(|r| r.id == id) else {
                continue;
            };
            let anchor = self.rows[pos].anchor;
            let anchor_pos = anchor.and_then(|a| {
                self.rows
                    .iter()
                    .position(|r| r.kind == RowKind::PRIMARY && r.id == a)
            });

            match (anchor, anchor_pos) {
                (Some(anchor), Some(_)) => {
                    let row = self.rows.remove(pos);
                    // Anchor index after the removal above
                    let apos = self
                        .rows
                        .iter()
                        .position(|r| r.id == anchor)
                        .expect("anchor located before removal");
                    self.rows.insert(apos + 1, row);
                    if self.hidden.contains(&anchor) {
                        self.hidden.insert(id);
                    } else {
                        self.hidden.remove(&id);
                    }
                }
                _ => {
                    warn!("Dropping detail row {id}, anchor {anchor:?} does not exist");
                    self.rows.remove(pos);
                    self.hidden.remove(&id);
                }
            }
        }

        let visible = self.visible_ids();
        self.emit(TableEvent::ReconcileEnd(visible.clone()));
        visible
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn columns() -> Vec<ColumnSpec> {
        vec![
            ColumnSpec {
                name: "rank".to_string(),
                parser: None,
            },
            ColumnSpec {
                name: "time".to_string(),
                parser: Some("timestamp".to_string()),
            },
            ColumnSpec {
                name: "distance".to_string(),
                parser: Some("substring_before_space".to_string()),
            },
        ]
    }

    fn board(rows: Vec<Vec<&str>>) -> Table {
        board_with_placement(rows, UnparsablePlacement::LAST)
    }

    fn board_with_placement(rows: Vec<Vec<&str>>, placement: UnparsablePlacement) -> Table {
        let mut table = Table::new(columns(), ParserRegistry::with_builtins(), placement);
        for (idx, cells) in rows.into_iter().enumerate() {
            table.push_row(Row::primary(
                idx as RowId,
                cells.into_iter().map(|s| s.to_string()).collect(),
            ));
        }
        table
    }

    fn key(column: usize, direction: Direction) -> SortKey {
        SortKey {
            column,
            direction,
            parser: None,
        }
    }

    fn order(table: &Table) -> Vec<RowId> {
        table.rows().iter().map(|r| r.id).collect()
    }

    #[test]
    fn sort_by_timestamp_column() {
        let mut table = board(vec![
            vec!["1", "4:05", "42 km"],
            vec!["2", "-2:30 foo", "7 km"],
            vec!["3", "0:59", "12 km"],
        ]);
        let result = table.sort(&vec![key(1, Direction::Ascending)]).unwrap();
        assert_eq!(result, vec![1, 2, 0]);
    }

    #[test]
    fn sort_is_stable_on_equal_keys() {
        let mut table = board(vec![
            vec!["1", "4:05", "a"],
            vec!["2", "4:05", "b"],
            vec!["3", "1:00", "c"],
            vec!["4", "4:05", "d"],
        ]);
        let result = table.sort(&vec![key(1, Direction::Ascending)]).unwrap();
        assert_eq!(result, vec![2, 0, 1, 3]);
    }

    #[test]
    fn sort_is_deterministic() {
        let spec = vec![key(1, Direction::Descending)];
        let mut table = board(vec![
            vec!["1", "2:00", "a"],
            vec!["2", "1:00", "b"],
            vec!["3", "3:00", "c"],
        ]);
        let first = table.sort(&spec).unwrap();
        let second = table.sort(&spec).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn multi_key_sort_breaks_ties_with_second_key() {
        // Primary: rank ascending (raw text), ties broken by distance descending
        let mut table = board(vec![
            vec!["2", "1:00", "5 km"],
            vec!["1", "1:00", "3 km"],
            vec!["1", "1:00", "9 km"],
        ]);
        let spec = vec![key(0, Direction::Ascending), key(2, Direction::Descending)];
        assert_eq!(table.sort(&spec).unwrap(), vec![2, 1, 0]);
    }

    #[test]
    fn descending_flips_keys_not_tie_break() {
        let mut table = board(vec![
            vec!["1", "4:05", "a"],
            vec!["2", "4:05", "b"],
            vec!["3", "1:00", "c"],
        ]);
        let result = table.sort(&vec![key(1, Direction::Descending)]).unwrap();
        // Equal keys keep insertion order even under Descending
        assert_eq!(result, vec![0, 1, 2]);
    }

    #[test]
    fn unparsable_row_goes_to_configured_end() {
        let mut table = board(vec![
            vec!["1", "bad", "a"],
            vec!["2", "2:00", "b"],
            vec!["3", "1:00", "c"],
        ]);
        let result = table.sort(&vec![key(1, Direction::Ascending)]).unwrap();
        assert_eq!(result, vec![2, 1, 0]);

        let mut table = board_with_placement(
            vec![
                vec!["1", "bad", "a"],
                vec!["2", "2:00", "b"],
                vec!["3", "1:00", "c"],
            ],
            UnparsablePlacement::FIRST,
        );
        let result = table.sort(&vec![key(1, Direction::Ascending)]).unwrap();
        assert_eq!(result, vec![0, 2, 1]);
    }

    #[test]
    fn unknown_parser_in_spec_leaves_table_untouched() {
        let mut table = board(vec![vec!["1", "2:00", "a"], vec!["2", "1:00", "b"]]);
        let spec = vec![SortKey {
            column: 1,
            direction: Direction::Ascending,
            parser: Some("nope".to_string()),
        }];
        assert!(matches!(table.sort(&spec), Err(ParserError::Unknown(_))));
        assert_eq!(order(&table), vec![0, 1]);
    }

    #[test]
    fn explicit_key_parser_overrides_column_default() {
        // Column 0 has no default parser; force numeric ordering on it
        let mut table = board(vec![
            vec!["10 pts", "1:00", "a"],
            vec!["9 pts", "1:00", "b"],
        ]);
        let spec = vec![SortKey {
            column: 0,
            direction: Direction::Ascending,
            parser: Some("substring_before_space".to_string()),
        }];
        assert_eq!(table.sort(&spec).unwrap(), vec![1, 0]);
    }

    #[test]
    fn detail_rows_follow_anchor_after_sort() {
        let mut table = board(vec![
            vec!["1", "3:00", "a"],
            vec!["2", "1:00", "b"],
            vec!["3", "2:00", "c"],
        ]);
        table.push_row(Row::detail(100, 0, vec!["detail of 0".to_string()]));
        table.push_row(Row::detail(101, 2, vec!["detail of 2".to_string()]));

        table.sort(&vec![key(1, Direction::Ascending)]).unwrap();
        table.reconcile();

        assert_eq!(order(&table), vec![1, 2, 101, 0, 100]);
    }

    #[test]
    fn filter_never_touches_detail_rows() {
        let mut table = board(vec![vec!["1", "1:00", "alpha"], vec!["2", "2:00", "beta"]]);
        table.push_row(Row::detail(100, 0, vec!["beta beta beta".to_string()]));
        table.reconcile();

        // The detail row content matches the pattern, the anchor does not.
        // Its visibility must still follow the anchor.
        table.filter(&FilterSpec {
            column: None,
            pattern: "beta".to_string(),
        });
        table.reconcile();
        assert!(table.is_hidden(0));
        assert!(table.is_hidden(100));
        assert!(!table.is_hidden(1));

        // Clearing the filter restores the detail row with its anchor
        table.filter(&FilterSpec::default());
        table.reconcile();
        assert_eq!(table.visible_ids(), vec![0, 100, 1]);
    }

    #[test]
    fn column_filter_only_inspects_targeted_column() {
        // "beta" appears in column 0 of the first row and column 2 of the
        // second, only the column 2 occurrence may decide visibility
        let mut table = board(vec![
            vec!["beta", "1:00", "x"],
            vec!["alpha", "2:00", "beta run"],
            vec!["gamma", "3:00", "y"],
        ]);
        let visible = table.filter(&FilterSpec {
            column: Some(2),
            pattern: "beta".to_string(),
        });
        assert_eq!(visible, vec![1]);
        assert!(table.is_hidden(0));
        assert!(!table.is_hidden(1));
        assert!(table.is_hidden(2));
    }

    #[test]
    fn reconcile_is_idempotent() {
        let mut table = board(vec![vec!["1", "1:00", "a"], vec!["2", "2:00", "b"]]);
        table.push_row(Row::detail(100, 1, vec!["d".to_string()]));

        let first = table.reconcile();
        let after = order(&table);
        let second = table.reconcile();
        assert_eq!(first, second);
        assert_eq!(order(&table), after);
    }

    #[test]
    fn reconcile_tolerates_missing_details() {
        // Anchors without a materialized detail row are fine
        let mut table = board(vec![vec!["1", "1:00", "a"], vec!["2", "2:00", "b"]]);
        assert_eq!(table.reconcile(), vec![0, 1]);
    }

    #[test]
    fn orphan_detail_row_is_dropped() {
        let mut table = board(vec![vec!["1", "1:00", "a"]]);
        table.push_row(Row::detail(100, 999, vec!["orphan".to_string()]));
        table.push_row(Row::detail(101, 0, vec!["kept".to_string()]));

        assert_eq!(table.reconcile(), vec![0, 101]);
        assert!(table.row(100).is_none());
    }

    #[test]
    fn events_carry_resulting_order() {
        let seen: Rc<RefCell<Vec<TableEvent>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);

        let mut table = board(vec![vec!["1", "2:00", "a"], vec!["2", "1:00", "b"]]);
        table.on_event(Box::new(move |event| sink.borrow_mut().push(event.clone())));

        table.sort(&vec![key(1, Direction::Ascending)]).unwrap();
        table.filter(&FilterSpec {
            column: None,
            pattern: "a".to_string(),
        });
        table.reconcile();

        let seen = seen.borrow();
        assert_eq!(seen[0], TableEvent::SortEnd(vec![1, 0]));
        assert_eq!(seen[1], TableEvent::FilterEnd(vec![0]));
        assert_eq!(seen[2], TableEvent::ReconcileEnd(vec![0]));
    }
}
