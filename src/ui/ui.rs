use image::DynamicImage;
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Gauge, List, ListItem, ListState, Paragraph, Wrap},
    Frame,
};
use ratatui_image::{picker::Picker, protocol::StatefulProtocol, Resize, StatefulImage};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

use crate::backend::cache::PageImages;
use crate::backend::history::ActorRecord;

#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub enum View {
    #[default]
    Main,
    History,
    Viewer,
}

#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub enum Focus {
    #[default]
    Input,
    Gallery,
}

pub struct GalleryEntry {
    pub page: u32,
    pub path: PathBuf,
}

#[derive(Default)]
pub struct ViewerState {
    pub page: u32,
    pub images: Option<PageImages>,
    pub index: usize,
    pub loading: bool,
    pub image_state: Option<StatefulProtocol>,
    pub slideshow_since: Option<Instant>,
}

pub struct App {
    pub view: View,
    pub focus: Focus,
    pub input: String,
    pub searching: bool,
    pub search_generation: u64,
    pub pages_detected: u32,
    pub gallery: Vec<GalleryEntry>,
    pub gallery_state: ListState,
    pub picker: Option<Picker>,
    pub previews: HashMap<u32, StatefulProtocol>,
    pub progress: f64,
    pub job_running: bool,
    pub control_label: String,
    pub status: String,
    pub notice: Option<(String, String)>,
    pub range_input: Option<String>,
    pub history: Vec<ActorRecord>,
    pub history_filter: String,
    pub history_state: ListState,
    pub viewer: ViewerState,
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    pub fn new() -> Self {
        Self::with_picker(Picker::from_query_stdio().ok())
    }

    pub fn with_picker(picker: Option<Picker>) -> Self {
        Self {
            view: View::Main,
            focus: Focus::Input,
            input: String::new(),
            searching: false,
            search_generation: 0,
            pages_detected: 0,
            gallery: Vec::new(),
            gallery_state: ListState::default(),
            picker,
            previews: HashMap::new(),
            progress: 0.0,
            job_running: false,
            control_label: String::new(),
            status: "Pages detected: 0".to_string(),
            notice: None,
            range_input: None,
            history: Vec::new(),
            history_filter: String::new(),
            history_state: ListState::default(),
            viewer: ViewerState::default(),
        }
    }

    /// Clears the gallery for a new search and returns its generation.
    pub fn begin_search(&mut self) -> u64 {
        self.search_generation += 1;
        self.searching = true;
        self.pages_detected = 0;
        self.gallery.clear();
        self.previews.clear();
        self.gallery_state.select(None);
        self.status = "Loading...".to_string();
        self.search_generation
    }

    /// Resets the gauge for a new download. A pause left on from an earlier
    /// job still holds the new one, so the label keeps saying so.
    pub fn begin_job(&mut self, paused: bool) {
        self.job_running = true;
        self.progress = 0.0;
        self.control_label = if paused {
            "Paused".to_string()
        } else {
            String::new()
        };
    }

    pub fn add_page(&mut self, page: u32, path: PathBuf) {
        self.pages_detected = self.pages_detected.max(page);
        self.gallery.push(GalleryEntry { page, path });
        if self.gallery_state.selected().is_none() {
            self.gallery_state.select(Some(0));
        }
        self.status = format!("Detecting pages... {}", self.pages_detected);
    }

    pub fn finish_search(&mut self, pages: u32) {
        self.searching = false;
        self.pages_detected = pages;
        self.status = format!("Pages detected: {}", pages);
    }

    pub fn add_preview(&mut self, page: u32, image: DynamicImage) {
        if let Some(ref picker) = self.picker {
            let protocol = picker.new_resize_protocol(image);
            self.previews.insert(page, protocol);
        }
    }

    pub fn selected_page(&self) -> Option<u32> {
        self.gallery_state
            .selected()
            .and_then(|i| self.gallery.get(i))
            .map(|e| e.page)
    }

    pub fn select_next(&mut self) {
        if self.gallery.is_empty() {
            return;
        }
        let next = self
            .gallery_state
            .selected()
            .map_or(0, |i| (i + 1).min(self.gallery.len() - 1));
        self.gallery_state.select(Some(next));
    }

    pub fn select_prev(&mut self) {
        let prev = self.gallery_state.selected().map_or(0, |i| i.saturating_sub(1));
        if !self.gallery.is_empty() {
            self.gallery_state.select(Some(prev));
        }
    }

    pub fn notify(&mut self, title: &str, message: &str) {
        self.notice = Some((title.to_string(), message.to_string()));
    }

    pub fn open_viewer(&mut self, page: u32) {
        self.view = View::Viewer;
        self.viewer.page = page;
        self.viewer.images = None;
        self.viewer.index = 0;
        self.viewer.loading = true;
        self.viewer.image_state = None;
    }

    pub fn set_viewer_images(&mut self, page: u32, images: PageImages) {
        if self.viewer.page != page {
            return;
        }
        self.viewer.loading = false;
        self.viewer.index = 0;
        self.viewer.images = Some(images);
        self.refresh_viewer_image();
    }

    pub fn viewer_step(&mut self, forward: bool) {
        let Some(count) = self.viewer.images.as_ref().map(|i| i.len()) else {
            return;
        };
        if count == 0 {
            return;
        }
        self.viewer.index = if forward {
            (self.viewer.index + 1) % count
        } else {
            (self.viewer.index + count - 1) % count
        };
        self.refresh_viewer_image();
    }

    fn refresh_viewer_image(&mut self) {
        self.viewer.image_state = None;
        let Some(images) = &self.viewer.images else {
            return;
        };
        if let (Some(picker), Some(entry)) = (&self.picker, images.get(self.viewer.index)) {
            self.viewer.image_state = Some(picker.new_resize_protocol(entry.image.clone()));
        }
    }

    pub fn set_history(&mut self, records: Vec<ActorRecord>) {
        self.history = records;
        let selected = if self.history.is_empty() { None } else { Some(0) };
        self.history_state.select(selected);
    }
}

/// Parses `start-end` (or a single page) from the range prompt.
pub fn parse_range(text: &str) -> Option<(u32, u32)> {
    let text = text.trim();
    match text.split_once('-') {
        Some((start, end)) => Some((start.trim().parse().ok()?, end.trim().parse().ok()?)),
        None => {
            let page = text.parse().ok()?;
            Some((page, page))
        }
    }
}

pub fn ui(f: &mut Frame, app: &mut App) {
    match app.view {
        View::Main => draw_main(f, app),
        View::History => draw_history(f, app),
        View::Viewer => draw_viewer(f, app),
    }

    if let Some(prompt) = &app.range_input {
        draw_popup(f, "Download range (start-end)", prompt, Color::Cyan);
    }
    if let Some((title, message)) = &app.notice {
        draw_popup(f, title, message, Color::Yellow);
    }
}

fn draw_main(f: &mut Frame, app: &mut App) {
    let area = f.area();

    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // subject input
            Constraint::Min(10),   // gallery
            Constraint::Length(1), // status
            Constraint::Length(3), // progress
            Constraint::Length(3), // footer
        ])
        .split(area);

    let input_style = focus_style(app.focus == Focus::Input);
    let input = Paragraph::new(app.input.as_str()).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Subject")
            .border_style(input_style),
    );
    f.render_widget(input, root[0]);

    draw_gallery(f, root[1], app);

    let status = Paragraph::new(app.status.as_str()).style(Style::default().fg(Color::DarkGray));
    f.render_widget(status, root[2]);

    draw_progress(f, root[3], app);

    draw_footer(
        f,
        root[4],
        &[
            ("Enter", "search/open"),
            ("Tab", "focus"),
            ("d", "page"),
            ("a", "all"),
            ("r", "range"),
            ("Space", "pause/resume"),
            ("x", "cancel"),
            ("h", "history"),
            ("q", "quit"),
        ],
    );
}

fn draw_gallery(f: &mut Frame, area: Rect, app: &mut App) {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(24), Constraint::Min(10)])
        .split(area);

    let items: Vec<ListItem> = app
        .gallery
        .iter()
        .map(|e| ListItem::new(format!("Page {}", e.page)))
        .collect();

    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Pages")
                .border_style(focus_style(app.focus == Focus::Gallery)),
        )
        .highlight_style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("▶ ");
    f.render_stateful_widget(list, columns[0], &mut app.gallery_state);

    let block = Block::default()
        .borders(Borders::ALL)
        .title("Preview")
        .border_style(Style::default().fg(Color::White));
    let inner = block.inner(columns[1]);
    f.render_widget(block, columns[1]);

    let selected = app
        .gallery_state
        .selected()
        .and_then(|i| app.gallery.get(i))
        .map(|e| (e.page, e.path.clone()));

    match selected {
        Some((page, path)) => match app.previews.get_mut(&page) {
            Some(state) => {
                let image_widget = StatefulImage::new().resize(Resize::Scale(None));
                f.render_stateful_widget(image_widget, inner, state);
            }
            None => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let placeholder = Paragraph::new(truncate_text(&name, inner.width as usize))
                    .alignment(Alignment::Center)
                    .style(Style::default().fg(Color::DarkGray));
                f.render_widget(placeholder, inner);
            }
        },
        None => {
            let text = if app.searching {
                "Searching..."
            } else {
                "No images to display"
            };
            let empty = Paragraph::new(text)
                .alignment(Alignment::Center)
                .style(Style::default().fg(Color::DarkGray));
            f.render_widget(empty, inner);
        }
    }
}

fn draw_progress(f: &mut Frame, area: Rect, app: &App) {
    let label = if app.control_label.is_empty() {
        format!("{:.1}%", app.progress)
    } else {
        format!("{:.1}% {}", app.progress, app.control_label)
    };

    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("Download"))
        .gauge_style(Style::default().fg(Color::Cyan))
        .ratio((app.progress / 100.0).clamp(0.0, 1.0))
        .label(label);
    f.render_widget(gauge, area);
}

fn draw_history(f: &mut Frame, app: &mut App) {
    let area = f.area();

    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(5),
            Constraint::Length(3),
        ])
        .split(area);

    let filter = Paragraph::new(app.history_filter.as_str()).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Search history")
            .border_style(focus_style(true)),
    );
    f.render_widget(filter, root[0]);

    let width = root[1].width.saturating_sub(4) as usize;
    let items: Vec<ListItem> = app
        .history
        .iter()
        .map(|r| ListItem::new(truncate_text(&r.name, width)))
        .collect();
    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title("History"))
        .highlight_style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("▶ ");
    f.render_stateful_widget(list, root[1], &mut app.history_state);

    draw_footer(
        f,
        root[2],
        &[("↑/↓", "select"), ("Enter", "use name"), ("Esc", "back")],
    );
}

fn draw_viewer(f: &mut Frame, app: &mut App) {
    let area = f.area();

    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(10),
            Constraint::Length(3),
        ])
        .split(area);

    let count = app.viewer.images.as_ref().map_or(0, |i| i.len());
    let header = if app.viewer.loading {
        format!("Page {} - loading...", app.viewer.page)
    } else if count == 0 {
        format!("Page {} - no images", app.viewer.page)
    } else {
        let slideshow = if app.viewer.slideshow_since.is_some() {
            " [slideshow]"
        } else {
            ""
        };
        format!(
            "Page {} - image {}/{}{}",
            app.viewer.page,
            app.viewer.index + 1,
            count,
            slideshow
        )
    };
    f.render_widget(
        Paragraph::new(header).style(Style::default().fg(Color::Cyan)),
        root[0],
    );

    let block = Block::default().borders(Borders::ALL);
    let inner = block.inner(root[1]);
    f.render_widget(block, root[1]);
    if let Some(state) = app.viewer.image_state.as_mut() {
        let image_widget = StatefulImage::new().resize(Resize::Scale(None));
        f.render_stateful_widget(image_widget, inner, state);
    }

    draw_footer(
        f,
        root[2],
        &[
            ("←/→", "page"),
            ("n/p", "image"),
            ("s", "slideshow"),
            ("d", "download page"),
            ("Esc", "back"),
        ],
    );
}

fn draw_popup(f: &mut Frame, title: &str, message: &str, color: Color) {
    let area = centered_rect(60, 30, f.area());
    f.render_widget(Clear, area);

    let popup = Paragraph::new(message)
        .wrap(Wrap { trim: true })
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(title)
                .border_style(Style::default().fg(color).add_modifier(Modifier::BOLD)),
        );
    f.render_widget(popup, area);
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1])[1]
}

fn focus_style(focused: bool) -> Style {
    if focused {
        Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::White)
    }
}

fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        text.to_string()
    } else {
        format!(
            "{}...",
            text.chars()
                .take(max_len.saturating_sub(3))
                .collect::<String>()
        )
    }
}

fn draw_footer(f: &mut Frame, area: Rect, keys: &[(&str, &str)]) {
    let mut spans = Vec::new();
    for (key, action) in keys {
        spans.push(Span::styled(*key, Style::default().fg(Color::Yellow)));
        spans.push(Span::raw(format!(": {}  ", action)));
    }

    let p = Paragraph::new(Line::from(spans))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Cyan)),
        )
        .alignment(Alignment::Center);
    f.render_widget(p, area);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_prompt_parsing() {
        assert_eq!(parse_range("2-5"), Some((2, 5)));
        assert_eq!(parse_range(" 3 - 4 "), Some((3, 4)));
        assert_eq!(parse_range("7"), Some((7, 7)));
        assert_eq!(parse_range("a-b"), None);
        assert_eq!(parse_range(""), None);
    }

    #[test]
    fn new_job_keeps_showing_a_pause() {
        let mut app = App::with_picker(None);
        app.progress = 80.0;
        app.control_label = "Cancelled".to_string();

        app.begin_job(true);
        assert!(app.job_running);
        assert_eq!(app.progress, 0.0);
        assert_eq!(app.control_label, "Paused");

        app.begin_job(false);
        assert!(app.control_label.is_empty());
    }

    #[test]
    fn truncation_keeps_short_text() {
        assert_eq!(truncate_text("Aoi", 10), "Aoi");
        assert_eq!(truncate_text("Kaori Yamashita", 8), "Kaori...");
    }
}
