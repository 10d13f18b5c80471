mod backend;
mod ui;

use backend::cache::PageImages;
use backend::config::{self, Config};
use backend::discovery::PageFound;
use backend::engine::DownloadScope;
use backend::error::SubjectError;
use backend::history::{ActorRecord, History};
use backend::imaging;
use backend::session::{Notifier, Session};
use image::DynamicImage;
use ui::ui::{parse_range, ui, App, Focus, View};

use crossterm::{
    event::{Event, EventStream, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures::StreamExt;
use ratatui::{backend::CrosstermBackend, Terminal};
use std::sync::Arc;
use std::time::{Duration, Instant};
use std::{error::Error, fs, io};
use tokio::sync::mpsc;

const SLIDESHOW_INTERVAL: Duration = Duration::from_secs(2);

enum BackgroundTask {
    PageFound { generation: u64, found: PageFound },
    PreviewLoaded { generation: u64, page: u32, image: DynamicImage },
    SearchDone { generation: u64, result: Result<u32, SubjectError> },
    Progress(f64),
    Notice { title: String, message: String },
    JobFinished,
    PageImagesLoaded { page: u32, result: Result<PageImages, SubjectError> },
    HistoryLoaded(Vec<ActorRecord>),
}

struct ChannelNotifier(mpsc::UnboundedSender<BackgroundTask>);

impl Notifier for ChannelNotifier {
    fn notify(&self, title: &str, message: &str) {
        let _ = self.0.send(BackgroundTask::Notice {
            title: title.to_string(),
            message: message.to_string(),
        });
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_logging();

    let config = Config::load();
    let history = match History::open(&config.history_db_path()).await {
        Ok(history) => Some(history),
        Err(e) => {
            log::error!("History unavailable: {}", e);
            None
        }
    };

    let mut session = Session::new(config)?;
    if let Some(history) = history {
        session = session.with_history(history);
    }
    let session = Arc::new(session);
    log::info!("Library at {}", session.config().library_dir.display());

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new();

    // Create channel for background tasks
    let (task_tx, mut task_rx) = mpsc::unbounded_channel::<BackgroundTask>();

    let res = run_app(&mut terminal, &mut app, &session, &mut task_rx, task_tx).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        eprintln!("{err}");
    }
    Ok(())
}

fn init_logging() {
    let dir = config::log_dir();
    if fs::create_dir_all(&dir).is_err() {
        return;
    }
    let Ok(file) = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("gallery-tui.log"))
    else {
        return;
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Pipe(Box::new(file)))
        .init();
}

fn spawn_search(
    session: &Arc<Session>,
    input: String,
    generation: u64,
    tx: mpsc::UnboundedSender<BackgroundTask>,
) {
    let session = Arc::clone(session);
    tokio::spawn(async move {
        let found_tx = tx.clone();
        let result = session
            .search(&input, move |found| {
                let _ = found_tx.send(BackgroundTask::PageFound { generation, found });
            })
            .await;
        let _ = tx.send(BackgroundTask::SearchDone { generation, result });
    });
}

fn spawn_preview_loader(
    generation: u64,
    found: &PageFound,
    tx: mpsc::UnboundedSender<BackgroundTask>,
) {
    let page = found.page;
    let path = found.path.clone();
    tokio::spawn(async move {
        let decoded = tokio::task::spawn_blocking(move || imaging::load_listing_preview(&path)).await;
        match decoded {
            Ok(Ok(image)) => {
                let _ = tx.send(BackgroundTask::PreviewLoaded { generation, page, image });
            }
            Ok(Err(e)) => {
                log::warn!("Cannot display page {}: {}", page, e);
                let _ = tx.send(BackgroundTask::Notice {
                    title: "Error".to_string(),
                    message: format!("Cannot display page {}: {}", page, e),
                });
            }
            Err(e) => log::warn!("Preview task failed: {}", e),
        }
    });
}

fn spawn_download(
    app: &mut App,
    session: &Arc<Session>,
    scope: DownloadScope,
    tx: &mpsc::UnboundedSender<BackgroundTask>,
) {
    if app.job_running {
        app.notify("Notice", "A download is already running");
        return;
    }

    let signals = session.signals();
    if signals.is_cancelled() {
        signals.reset();
    }

    app.begin_job(signals.is_paused());

    let session = Arc::clone(session);
    let input = app.input.clone();
    let tx = tx.clone();
    tokio::spawn(async move {
        let progress_tx = tx.clone();
        let progress = move |percent: f64| {
            let _ = progress_tx.send(BackgroundTask::Progress(percent));
        };
        let notifier = ChannelNotifier(tx.clone());

        if let Some(report) = session
            .download_and_notify(&input, scope, &progress, &notifier)
            .await
        {
            log::info!(
                "{}: {}/{} items, {} skipped, {} errors",
                scope.describe(),
                report.completed,
                report.total,
                report.skipped_existing,
                report.errors.len()
            );
        }
        let _ = tx.send(BackgroundTask::JobFinished);
    });
}

fn spawn_page_images_loader(
    session: &Arc<Session>,
    input: String,
    page: u32,
    tx: mpsc::UnboundedSender<BackgroundTask>,
) {
    let session = Arc::clone(session);
    tokio::spawn(async move {
        let result = session.page_images(&input, page).await;
        let _ = tx.send(BackgroundTask::PageImagesLoaded { page, result });
    });
}

fn spawn_history_loader(
    session: &Arc<Session>,
    filter: String,
    tx: mpsc::UnboundedSender<BackgroundTask>,
) {
    let session = Arc::clone(session);
    tokio::spawn(async move {
        let records = session.history(&filter).await;
        let _ = tx.send(BackgroundTask::HistoryLoaded(records));
    });
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    session: &Arc<Session>,
    task_rx: &mut mpsc::UnboundedReceiver<BackgroundTask>,
    task_tx: mpsc::UnboundedSender<BackgroundTask>,
) -> io::Result<()> {
    let mut event_stream = EventStream::new();

    loop {
        terminal.draw(|f| ui(f, app))?;

        if let Some(since) = app.viewer.slideshow_since {
            if since.elapsed() >= SLIDESHOW_INTERVAL {
                app.viewer_step(true);
                app.viewer.slideshow_since = Some(Instant::now());
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(50)) => {}

            Some(Ok(event)) = event_stream.next() => {
                if let Event::Key(key) = event {
                    if key.kind != KeyEventKind::Press {
                        continue;
                    }
                    if app.notice.is_some() {
                        app.notice = None;
                        continue;
                    }
                    if app.range_input.is_some() {
                        handle_range_input(app, key.code, session, &task_tx);
                        continue;
                    }

                    let quit = match app.view {
                        View::Main => handle_main_input(app, key.code, session, &task_tx),
                        View::History => {
                            handle_history_input(app, key.code, session, &task_tx);
                            false
                        }
                        View::Viewer => {
                            handle_viewer_input(app, key.code, session, &task_tx);
                            false
                        }
                    };
                    if quit {
                        return Ok(());
                    }
                }
            }

            Some(task) = task_rx.recv() => {
                match task {
                    BackgroundTask::PageFound { generation, found } => {
                        if generation == app.search_generation {
                            spawn_preview_loader(generation, &found, task_tx.clone());
                            app.add_page(found.page, found.path);
                        }
                    }
                    BackgroundTask::PreviewLoaded { generation, page, image } => {
                        if generation == app.search_generation {
                            app.add_preview(page, image);
                        }
                    }
                    BackgroundTask::SearchDone { generation, result } => {
                        if generation != app.search_generation {
                            continue;
                        }
                        match result {
                            Ok(0) => {
                                app.finish_search(0);
                                app.notify("Notice", "No pages were found for this name");
                            }
                            Ok(pages) => app.finish_search(pages),
                            Err(e) => {
                                app.finish_search(0);
                                app.notify("Error", &e.to_string());
                            }
                        }
                    }
                    BackgroundTask::Progress(percent) => {
                        app.progress = percent;
                    }
                    BackgroundTask::Notice { title, message } => {
                        app.notify(&title, &message);
                    }
                    BackgroundTask::JobFinished => {
                        app.job_running = false;
                    }
                    BackgroundTask::PageImagesLoaded { page, result } => match result {
                        Ok(images) => app.set_viewer_images(page, images),
                        Err(e) => {
                            app.viewer.loading = false;
                            app.notify("Error", &e.to_string());
                        }
                    },
                    BackgroundTask::HistoryLoaded(records) => {
                        app.set_history(records);
                    }
                }
            }
        }
    }
}

/// Returns true when the app should quit.
fn handle_main_input(
    app: &mut App,
    key: KeyCode,
    session: &Arc<Session>,
    task_tx: &mpsc::UnboundedSender<BackgroundTask>,
) -> bool {
    if key == KeyCode::Tab {
        app.focus = match app.focus {
            Focus::Input => Focus::Gallery,
            Focus::Gallery => Focus::Input,
        };
        return false;
    }

    match app.focus {
        Focus::Input => match key {
            KeyCode::Char(c) => app.input.push(c),
            KeyCode::Backspace => {
                app.input.pop();
            }
            KeyCode::Esc => app.input.clear(),
            KeyCode::Enter => {
                if !app.searching {
                    let generation = app.begin_search();
                    spawn_search(session, app.input.clone(), generation, task_tx.clone());
                    app.focus = Focus::Gallery;
                }
            }
            _ => {}
        },
        Focus::Gallery => match key {
            KeyCode::Char('q') => return true,
            KeyCode::Down => app.select_next(),
            KeyCode::Up => app.select_prev(),
            KeyCode::Enter => {
                if let Some(page) = app.selected_page() {
                    app.open_viewer(page);
                    spawn_page_images_loader(session, app.input.clone(), page, task_tx.clone());
                }
            }
            KeyCode::Char('d') => {
                let page = app.selected_page().unwrap_or(1);
                spawn_download(app, session, DownloadScope::Page(page), task_tx);
            }
            KeyCode::Char('a') => spawn_download(app, session, DownloadScope::All, task_tx),
            KeyCode::Char('r') => app.range_input = Some(String::new()),
            KeyCode::Char(' ') => {
                let signals = session.signals();
                if signals.is_paused() {
                    signals.resume();
                    app.control_label = "Resumed".to_string();
                } else {
                    signals.pause();
                    app.control_label = "Paused".to_string();
                }
            }
            KeyCode::Char('x') => {
                session.signals().cancel();
                app.control_label = "Cancelled".to_string();
            }
            KeyCode::Char('h') => {
                app.view = View::History;
                app.history_filter.clear();
                spawn_history_loader(session, String::new(), task_tx.clone());
            }
            _ => {}
        },
    }
    false
}

fn handle_range_input(
    app: &mut App,
    key: KeyCode,
    session: &Arc<Session>,
    task_tx: &mpsc::UnboundedSender<BackgroundTask>,
) {
    let Some(text) = app.range_input.as_mut() else {
        return;
    };

    match key {
        KeyCode::Char(c) if c.is_ascii_digit() || c == '-' => text.push(c),
        KeyCode::Backspace => {
            text.pop();
        }
        KeyCode::Esc => app.range_input = None,
        KeyCode::Enter => {
            let parsed = parse_range(text);
            app.range_input = None;
            match parsed {
                Some((start, end)) => {
                    spawn_download(app, session, DownloadScope::Range { start, end }, task_tx)
                }
                None => app.notify("Error", "Enter a range such as 2-5"),
            }
        }
        _ => {}
    }
}

fn handle_history_input(
    app: &mut App,
    key: KeyCode,
    session: &Arc<Session>,
    task_tx: &mpsc::UnboundedSender<BackgroundTask>,
) {
    match key {
        KeyCode::Esc => app.view = View::Main,
        KeyCode::Up => {
            let selected = app.history_state.selected().unwrap_or(0);
            if selected > 0 {
                app.history_state.select(Some(selected - 1));
            }
        }
        KeyCode::Down => {
            let selected = app.history_state.selected().unwrap_or(0);
            if selected + 1 < app.history.len() {
                app.history_state.select(Some(selected + 1));
            }
        }
        KeyCode::Enter => {
            let chosen = app
                .history_state
                .selected()
                .and_then(|i| app.history.get(i))
                .map(|r| r.name.clone());
            if let Some(name) = chosen {
                app.input = name;
                app.focus = Focus::Input;
                app.view = View::Main;
            }
        }
        KeyCode::Char(c) => {
            app.history_filter.push(c);
            spawn_history_loader(session, app.history_filter.clone(), task_tx.clone());
        }
        KeyCode::Backspace => {
            app.history_filter.pop();
            spawn_history_loader(session, app.history_filter.clone(), task_tx.clone());
        }
        _ => {}
    }
}

fn handle_viewer_input(
    app: &mut App,
    key: KeyCode,
    session: &Arc<Session>,
    task_tx: &mpsc::UnboundedSender<BackgroundTask>,
) {
    match key {
        KeyCode::Esc => {
            app.viewer.slideshow_since = None;
            app.view = View::Main;
        }
        KeyCode::Left => {
            if app.viewer.page > 1 {
                let page = app.viewer.page - 1;
                app.open_viewer(page);
                spawn_page_images_loader(session, app.input.clone(), page, task_tx.clone());
            }
        }
        KeyCode::Right => {
            if app.viewer.page < app.pages_detected {
                let page = app.viewer.page + 1;
                app.open_viewer(page);
                spawn_page_images_loader(session, app.input.clone(), page, task_tx.clone());
            }
        }
        KeyCode::Char('n') => app.viewer_step(true),
        KeyCode::Char('p') => app.viewer_step(false),
        KeyCode::Char('s') => {
            app.viewer.slideshow_since = match app.viewer.slideshow_since {
                Some(_) => None,
                None => Some(Instant::now()),
            };
        }
        KeyCode::Char('d') => {
            let page = app.viewer.page;
            spawn_download(app, session, DownloadScope::Page(page), task_tx);
        }
        _ => {}
    }
}
