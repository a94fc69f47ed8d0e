use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::Stylize,
    symbols::border,
    text::{Line, Span, Text},
    widgets::{Block, Clear, Paragraph},
};

use crate::domain::LVConfig;
use crate::model::UIData;

pub const TABLE_HEADER_HEIGHT: usize = 1;
pub const CMDLINE_HEIGHT: usize = 1;
const COLUMN_SPACER: &str = " ";

pub struct BoardUI {
    config: LVConfig,
}

impl BoardUI {
    pub fn new(config: &LVConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn draw(&self, uidata: &UIData, frame: &mut Frame) {
        let [table_area, status_area] = Layout::vertical([
            Constraint::Min(1),
            Constraint::Length(CMDLINE_HEIGHT as u16),
        ])
        .areas(frame.area());

        self.draw_board(uidata, frame, table_area);
        self.draw_statusline(uidata, frame, status_area);

        if uidata.show_popup {
            self.draw_popup(uidata, frame);
        }
    }

    fn draw_board(&self, uidata: &UIData, frame: &mut Frame, area: Rect) {
        // Terminal rendition of the favicon crown badge
        let title = Line::from(format!(" 👑 {} CRs - {} ", uidata.crown_count, uidata.name).bold());
        let instructions = Line::from(vec![
            " Sort ".into(),
            "<s/S/m/M>".blue().bold(),
            " Filter ".into(),
            "</>".blue().bold(),
            " Expand ".into(),
            "<Enter>".blue().bold(),
            " Help ".into(),
            "<?>".blue().bold(),
            " Quit ".into(),
            "<q> ".blue().bold(),
        ]);
        let block = Block::bordered()
            .title(title.centered())
            .title_bottom(instructions.centered())
            .border_set(border::THICK);

        let mut lines: Vec<Line> = Vec::with_capacity(uidata.rows.len() + TABLE_HEADER_HEIGHT);

        let mut header: Vec<Span> = Vec::new();
        for (idx, name) in uidata.header.iter().enumerate() {
            let cell = Self::pad(name, uidata.widths.get(idx).copied().unwrap_or(0));
            if idx == uidata.selected_column {
                header.push(cell.bold().underlined());
            } else {
                header.push(cell.bold());
            }
            header.push(COLUMN_SPACER.into());
        }
        lines.push(Line::from(header));

        for (ridx, row) in uidata.rows.iter().enumerate() {
            let selected = ridx == uidata.selected_row;
            if row.detail {
                // Detail rows render as one indented line below their anchor
                let content: String = format!("  └ {}", row.cells.first().cloned().unwrap_or_default())
                    .chars()
                    .take(self.config.max_column_width * 2)
                    .collect();
                let line = if selected {
                    Line::from(content.italic().reversed())
                } else {
                    Line::from(content.italic().dim())
                };
                lines.push(line);
                continue;
            }

            let mut spans: Vec<Span> = Vec::new();
            let marker = if row.expanded { "▾" } else { " " };
            spans.push(marker.into());
            for (idx, cell) in row.cells.iter().enumerate() {
                let padded = Self::pad(cell, uidata.widths.get(idx).copied().unwrap_or(0));
                spans.push(padded.into());
                spans.push(COLUMN_SPACER.into());
            }
            let line = Line::from(spans);
            lines.push(if selected { line.reversed() } else { line });
        }

        frame.render_widget(Paragraph::new(Text::from(lines)).block(block), area);
    }

    fn draw_statusline(&self, uidata: &UIData, frame: &mut Frame, area: Rect) {
        let line = if uidata.active_cmdinput {
            let (before, under, after) =
                Self::split_at_cursor(&uidata.cmdinput.input, uidata.cmdinput.cursor_pos);
            Line::from(vec![
                "/".bold(),
                before.into(),
                under.reversed().slow_blink(),
                after.into(),
            ])
        } else {
            let reload = if uidata.auto_reload { " ⟳" } else { "" };
            Line::from(format!(
                "[{}/{}]{} {}",
                uidata.abs_selected_row + 1,
                uidata.nrows,
                reload,
                uidata.status_message
            ))
        };
        frame.render_widget(Paragraph::new(line), area);
    }

    fn draw_popup(&self, uidata: &UIData, frame: &mut Frame) {
        let area = Self::centered(frame.area(), 60, 80);
        let block = Block::bordered().title(Line::from(" Help ".bold()).centered());
        frame.render_widget(Clear, area);
        frame.render_widget(
            Paragraph::new(uidata.popup_message.clone()).block(block),
            area,
        );
    }

    fn centered(area: Rect, percent_x: u16, percent_y: u16) -> Rect {
        let [_, mid, _] = Layout::vertical([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .areas(area);
        let [_, mid, _] = Layout::horizontal([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .areas(mid);
        mid
    }

    fn pad(content: &str, width: usize) -> String {
        let mut out: String = content.chars().take(width).collect();
        while out.chars().count() < width {
            out.push(' ');
        }
        out
    }

    // Split the prompt input around the cursor so the character under it
    // can be highlighted in place
    fn split_at_cursor(input: &str, cursor_pos: usize) -> (String, String, String) {
        let before: String = input.chars().take(cursor_pos).collect();
        let under = input
            .chars()
            .nth(cursor_pos)
            .map(|c| c.to_string())
            .unwrap_or_else(|| " ".to_string());
        let after: String = input.chars().skip(cursor_pos + 1).collect();
        (before, under, after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_splits_input_mid_string() {
        let (before, under, after) = BoardUI::split_at_cursor("alpha", 2);
        assert_eq!(before, "al");
        assert_eq!(under, "p");
        assert_eq!(after, "ha");
    }

    #[test]
    fn cursor_at_end_renders_a_block() {
        let (before, under, after) = BoardUI::split_at_cursor("alpha", 5);
        assert_eq!(before, "alpha");
        assert_eq!(under, " ");
        assert_eq!(after, "");
    }
}
