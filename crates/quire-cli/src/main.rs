use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use miette::{IntoDiagnostic, Result};
use quire_editor_core::{
    CaptureSurface, ClipboardSnapshot, Editor, EditorConfig, EditorOptions, Key, KeyEvent,
    MemoryCaptureSurface, PasteOutcome, PasteStrategy, Range, Sanitizer, SimulatedSelection,
};

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(version, about = "Quire - headless rich-text editing and paste sanitizing", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Editor configuration (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sanitize pasted markup and print the result
    Sanitize {
        /// Input file (stdin when omitted)
        file: Option<PathBuf>,

        /// Treat the input as plain text
        #[arg(long)]
        plain: bool,
    },
    /// Replay editing operations against some content and print the result
    Edit {
        /// Initial content markup
        #[arg(long, default_value = "")]
        content: String,

        #[arg(long)]
        placeholder: Option<String>,

        /// How paste content is read
        #[arg(long, value_enum)]
        strategy: Option<StrategyArg>,

        /// Capture surface polls after the first read
        #[arg(long, env = "QUIRE_PASTE_RETRIES")]
        max_retries: Option<u32>,

        /// Delay between capture surface polls
        #[arg(long, env = "QUIRE_PASTE_INTERVAL_MS")]
        retry_interval_ms: Option<u64>,

        /// How long the simulated platform takes to deliver captured pastes
        #[arg(long, default_value_t = 0)]
        deposit_delay_ms: u64,

        /// Print a JSON report instead of bare markup
        #[arg(long)]
        json: bool,

        /// Operations: `type:TEXT`, `enter`, `paste:MARKUP`, `paste-text:TEXT`,
        /// `select-all`, `delete`, `focus`, `image:ID:URL`,
        /// `resolve:ID:URL[:WIDTH[:HEIGHT]]`
        ops: Vec<Op>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum StrategyArg {
    Sync,
    Capture,
    Auto,
}

impl From<StrategyArg> for PasteStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Sync => PasteStrategy::Sync,
            StrategyArg::Capture => PasteStrategy::Capture,
            StrategyArg::Auto => PasteStrategy::Auto,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Op {
    Type(String),
    Enter,
    Paste(String),
    PasteText(String),
    SelectAll,
    Delete,
    Focus,
    Image {
        id: String,
        url: String,
    },
    Resolve {
        id: String,
        url: String,
        width: Option<u32>,
        height: Option<u32>,
    },
}

impl FromStr for Op {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, arg) = s.split_once(':').unwrap_or((s, ""));
        let dimension = |value: Option<&str>| -> Result<Option<u32>, String> {
            value
                .filter(|v| !v.is_empty())
                .map(|v| v.parse().map_err(|e| format!("bad dimension `{v}`: {e}")))
                .transpose()
        };
        match name {
            "type" => Ok(Op::Type(arg.to_string())),
            "enter" => Ok(Op::Enter),
            "paste" => Ok(Op::Paste(arg.to_string())),
            "paste-text" => Ok(Op::PasteText(arg.to_string())),
            "select-all" => Ok(Op::SelectAll),
            "delete" => Ok(Op::Delete),
            "focus" => Ok(Op::Focus),
            "image" => match arg.split_once(':') {
                Some((id, url)) if !id.is_empty() => Ok(Op::Image {
                    id: id.to_string(),
                    url: url.to_string(),
                }),
                _ => Err(format!("expected `image:ID:URL`, got `{s}`")),
            },
            "resolve" => {
                let mut parts = arg.splitn(2, ':');
                let id = parts.next().unwrap_or_default();
                let rest = parts.next().unwrap_or_default();
                if id.is_empty() || rest.is_empty() {
                    return Err(format!("expected `resolve:ID:URL[:WIDTH[:HEIGHT]]`, got `{s}`"));
                }
                // URLs contain colons; dimensions are the trailing numeric parts.
                let mut fields: Vec<&str> = rest.split(':').collect();
                let mut dims = Vec::new();
                while fields.len() > 1
                    && dims.len() < 2
                    && fields.last().is_some_and(|f| f.chars().all(|c| c.is_ascii_digit()))
                {
                    dims.extend(fields.pop());
                }
                dims.reverse();
                Ok(Op::Resolve {
                    id: id.to_string(),
                    url: fields.join(":"),
                    width: dimension(dims.first().copied())?,
                    height: dimension(dims.get(1).copied())?,
                })
            }
            other => Err(format!("unknown operation `{other}`")),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_miette()?;
    init_tracing();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Sanitize { file, plain } => {
            let input = read_input(file.as_deref())?;
            let sanitizer = Sanitizer::new(config.sanitize);
            let output = if plain {
                sanitizer.plain_text(&input)
            } else {
                sanitizer.sanitize_markup(&input)
            };
            println!("{}", output.to_html());
        }
        Commands::Edit {
            content,
            placeholder,
            strategy,
            max_retries,
            retry_interval_ms,
            deposit_delay_ms,
            json,
            ops,
        } => {
            let mut config = config;
            if let Some(strategy) = strategy {
                config.paste.strategy = strategy.into();
            }
            if let Some(max_retries) = max_retries {
                config.paste.max_retries = max_retries;
            }
            if let Some(interval) = retry_interval_ms {
                config.paste.retry_interval_ms = interval;
            }
            let report = replay(
                content,
                placeholder,
                config,
                Duration::from_millis(deposit_delay_ms),
                ops,
            )
            .await;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report).into_diagnostic()?
                );
            } else if let Some(content) = report.get("content").and_then(|c| c.as_str()) {
                println!("{content}");
            }
        }
    }

    Ok(())
}

async fn replay(
    content: String,
    placeholder: Option<String>,
    config: EditorConfig,
    deposit_delay: Duration,
    ops: Vec<Op>,
) -> serde_json::Value {
    let capture = config.paste.strategy == PasteStrategy::Capture;
    let mut editor = Editor::new(
        EditorOptions {
            content: Some(content),
            placeholder,
            on_content_change: Some(Box::new(|| tracing::debug!("content changed"))),
        },
        SimulatedSelection::new(),
        MemoryCaptureSurface::new(),
        config,
    );

    for op in ops {
        tracing::info!(?op, "applying");
        match op {
            Op::Type(text) => {
                editor.type_text(&text);
            }
            Op::Enter => {
                editor.handle_keydown(&KeyEvent::new(Key::Enter));
            }
            Op::Paste(markup) => {
                let pasted = if capture {
                    paste(&mut editor, ClipboardSnapshot::new(), Some((markup, deposit_delay))).await
                } else {
                    paste(&mut editor, ClipboardSnapshot::html(markup), None).await
                };
                if pasted.is_none() {
                    tracing::warn!("paste produced no content");
                }
            }
            Op::PasteText(text) => {
                let pasted = if capture {
                    paste(&mut editor, ClipboardSnapshot::new(), Some((text, deposit_delay))).await
                } else {
                    paste(&mut editor, ClipboardSnapshot::text(text), None).await
                };
                if pasted.is_none() {
                    tracing::warn!("paste produced no content");
                }
            }
            Op::SelectAll => editor.select_all(),
            Op::Delete => {
                editor.delete_selection();
            }
            Op::Focus => editor.focus(),
            Op::Image { id, url } => {
                editor.insert_loading_placeholder(&id, &url);
            }
            Op::Resolve {
                id,
                url,
                width,
                height,
            } => {
                if !editor.resolve_image(&id, &url, width, height) {
                    tracing::warn!(%id, "no loading image with that id");
                }
            }
        }
    }

    let report = serde_json::json!({
        "content": editor.content(),
        "empty": editor.is_empty(),
        "placeholder": editor.placeholder(),
        "surface_attached": editor.paste_sanitizer().surface().is_attached(),
    });
    editor.teardown();
    report
}

/// Run one paste. When it goes through the capture surface, `deposit` plays
/// the platform and drops its payload there once the surface is armed.
async fn paste(
    editor: &mut Editor,
    clipboard: ClipboardSnapshot,
    deposit: Option<(String, Duration)>,
) -> Option<Range> {
    match editor.handle_paste(&clipboard) {
        PasteOutcome::Inserted(caret) => Some(caret),
        PasteOutcome::Ignored => None,
        PasteOutcome::Capturing(task) => {
            if let Some((payload, delay)) = deposit {
                deliver(editor.paste_sanitizer().surface(), payload, delay);
            }
            let outcome = task.wait().await;
            editor.finish_capture(outcome)
        }
    }
}

/// Deposit `payload` on the armed capture surface after `delay`.
fn deliver(surface: &MemoryCaptureSurface, payload: String, delay: Duration) {
    let surface = surface.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if !surface.deposit(&payload) {
            tracing::warn!("capture surface was not attached");
        }
    });
}

fn load_config(path: Option<&Path>) -> Result<EditorConfig> {
    let Some(path) = path else {
        return Ok(EditorConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .into_diagnostic()
        .map_err(|e| e.wrap_err(format!("reading config {}", path.display())))?;
    serde_json::from_str(&raw)
        .into_diagnostic()
        .map_err(|e| e.wrap_err(format!("parsing config {}", path.display())))
}

fn read_input(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) => {
            if !path.exists() {
                return Err(miette::miette!("Input file not found: {}", path.display()));
            }
            std::fs::read_to_string(path).into_diagnostic()
        }
        None => {
            let mut input = String::new();
            std::io::stdin()
                .read_to_string(&mut input)
                .into_diagnostic()?;
            Ok(input)
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();
}

fn init_miette() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .with_cause_chain()
                .color(true)
                .context_lines(5)
                .tab_width(2)
                .break_words(true)
                .build(),
        )
    }))
    .into_diagnostic()?;
    miette::set_panic_hook();
    Ok(())
}
