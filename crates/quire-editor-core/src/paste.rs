//! Paste capture.
//!
//! A paste either carries a readable payload on the event itself, or it has
//! to be redirected into a hidden capture surface and read back once the
//! platform has deposited the content there. The second path is the only
//! asynchronous part of the editor: [`CaptureTask`] polls the surface on a
//! fixed interval, bounded by a retry budget, and can be cancelled by the
//! next paste.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use n0_future::FutureExt;
use smol_str::SmolStr;
use tokio::sync::oneshot;

use crate::config::{PasteConfig, PasteStrategy};
use crate::markup::parse_fragment;
use crate::sanitize::{SanitizedFragment, Sanitizer};

pub const MIME_HTML: &str = "text/html";
pub const MIME_TEXT: &str = "text/plain";

/// Clipboard access exposed by a paste event.
pub trait ClipboardData {
    /// Payload for `mime`, if the platform exposes it.
    fn get_data(&self, mime: &str) -> Option<String>;
}

/// An owned clipboard payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClipboardSnapshot {
    entries: Vec<(SmolStr, String)>,
}

impl ClipboardSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) the payload for `mime`.
    pub fn with(mut self, mime: &str, data: impl Into<String>) -> Self {
        self.set(mime, data);
        self
    }

    pub fn html(markup: impl Into<String>) -> Self {
        Self::new().with(MIME_HTML, markup)
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new().with(MIME_TEXT, text)
    }

    pub fn set(&mut self, mime: &str, data: impl Into<String>) {
        let data = data.into();
        match self.entries.iter_mut().find(|(kind, _)| kind == mime) {
            Some((_, existing)) => *existing = data,
            None => self.entries.push((SmolStr::new(mime), data)),
        }
    }
}

impl ClipboardData for ClipboardSnapshot {
    fn get_data(&self, mime: &str) -> Option<String> {
        self.entries
            .iter()
            .find(|(kind, _)| kind == mime)
            .map(|(_, data)| data.clone())
    }
}

/// A hidden, focusable editable region that receives native paste actions.
///
/// Implementations are handles: clones refer to the same surface.
pub trait CaptureSurface: Clone {
    /// Attach the surface to the document (off-screen, invisible).
    fn attach(&self);

    fn detach(&self);

    fn is_attached(&self) -> bool;

    fn focus(&self);

    /// Drop all content.
    fn clear(&self);

    fn text_content(&self) -> String;

    fn inner_markup(&self) -> String;
}

#[derive(Debug, Default)]
struct SurfaceState {
    markup: String,
    attached: bool,
    focused: bool,
    reads: usize,
    attaches: usize,
}

/// In-memory capture surface. The host (or a test) plays the platform and
/// calls [`deposit`](Self::deposit) when paste content lands.
#[derive(Debug, Clone, Default)]
pub struct MemoryCaptureSurface {
    state: Arc<Mutex<SurfaceState>>,
}

impl MemoryCaptureSurface {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SurfaceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver pasted markup. Ignored unless the surface is attached.
    pub fn deposit(&self, markup: impl AsRef<str>) -> bool {
        let mut state = self.state();
        if !state.attached {
            return false;
        }
        state.markup.push_str(markup.as_ref());
        true
    }

    pub fn is_focused(&self) -> bool {
        self.state().focused
    }

    /// Number of content polls so far.
    pub fn reads(&self) -> usize {
        self.state().reads
    }

    /// Number of times the surface was attached.
    pub fn attach_count(&self) -> usize {
        self.state().attaches
    }
}

impl CaptureSurface for MemoryCaptureSurface {
    fn attach(&self) {
        let mut state = self.state();
        if !state.attached {
            state.attached = true;
            state.attaches += 1;
        }
    }

    fn detach(&self) {
        let mut state = self.state();
        state.attached = false;
        state.focused = false;
    }

    fn is_attached(&self) -> bool {
        self.state().attached
    }

    fn focus(&self) {
        let mut state = self.state();
        state.focused = state.attached;
    }

    fn clear(&self) {
        self.state().markup.clear();
    }

    fn text_content(&self) -> String {
        let mut state = self.state();
        state.reads += 1;
        parse_fragment(&state.markup)
            .iter()
            .map(|node| node.text_content())
            .collect()
    }

    fn inner_markup(&self) -> String {
        self.state().markup.clone()
    }
}

/// Result of handling one paste event.
#[derive(Debug)]
pub enum PasteRead<S: CaptureSurface> {
    /// Content was read synchronously.
    Ready(SanitizedFragment),
    /// Content is being captured; drive the task to completion.
    Capturing(CaptureTask<S>),
    /// Nothing usable.
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Raw markup read off the surface.
    Ready(String),
    /// The retry budget ran out with the surface still empty.
    TimedOut,
    /// A later paste superseded this capture.
    Cancelled,
}

/// Drives paste events to sanitized content.
#[derive(Debug)]
pub struct PasteSanitizer<S> {
    surface: S,
    sanitizer: Sanitizer,
    config: PasteConfig,
    pending: Option<oneshot::Sender<()>>,
}

impl<S: CaptureSurface> PasteSanitizer<S> {
    pub fn new(surface: S, sanitizer: Sanitizer, config: PasteConfig) -> Self {
        Self {
            surface,
            sanitizer,
            config,
            pending: None,
        }
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn sanitizer(&self) -> &Sanitizer {
        &self.sanitizer
    }

    pub fn config(&self) -> &PasteConfig {
        &self.config
    }

    /// Whether a capture started by this sanitizer may still be polling.
    pub fn is_capturing(&self) -> bool {
        self.pending.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Handle one paste event. Any capture still in flight is cancelled
    /// first.
    pub fn on_paste(&mut self, clipboard: &dyn ClipboardData) -> PasteRead<S> {
        self.cancel();
        let strategy = self.config.strategy;
        tracing::debug!(target: "quire::paste", ?strategy, "paste");

        match strategy {
            PasteStrategy::Sync => match self.read_sync(clipboard) {
                Some(fragment) if !fragment.is_empty() => PasteRead::Ready(fragment),
                _ => PasteRead::Empty,
            },
            PasteStrategy::Capture => PasteRead::Capturing(self.start_capture()),
            PasteStrategy::Auto => match self.read_sync(clipboard) {
                Some(fragment) if fragment.is_empty() => PasteRead::Empty,
                Some(fragment) => PasteRead::Ready(fragment),
                None => PasteRead::Capturing(self.start_capture()),
            },
        }
    }

    /// Cancel the in-flight capture, if any, and reset the surface.
    pub fn cancel(&mut self) {
        if let Some(tx) = self.pending.take() {
            if tx.send(()).is_ok() {
                tracing::debug!(target: "quire::paste", "superseding in-flight capture");
            }
        }
        self.surface.detach();
        self.surface.clear();
    }

    /// Sanitized synchronous payload, or `None` when the event exposes no
    /// non-empty payload at all.
    fn read_sync(&self, clipboard: &dyn ClipboardData) -> Option<SanitizedFragment> {
        let payload = |mime| clipboard.get_data(mime).filter(|data| !data.is_empty());
        let html = || payload(MIME_HTML).map(|markup| self.sanitizer.sanitize_markup(&markup));
        let text = || payload(MIME_TEXT).map(|text| self.sanitizer.plain_text(&text));
        if self.config.prefer_html {
            html().or_else(text)
        } else {
            text().or_else(html)
        }
    }

    fn start_capture(&mut self) -> CaptureTask<S> {
        self.surface.clear();
        self.surface.attach();
        self.surface.focus();

        let (tx, rx) = oneshot::channel();
        self.pending = Some(tx);
        tracing::debug!(
            target: "quire::paste",
            interval_ms = self.config.retry_interval_ms,
            max_retries = self.config.max_retries,
            "capture armed"
        );
        CaptureTask {
            surface: self.surface.clone(),
            sanitizer: self.sanitizer.clone(),
            interval: self.config.retry_interval(),
            max_retries: self.config.max_retries,
            cancel: rx,
            finished: false,
        }
    }
}

/// One armed capture. Dropping it unfinished releases the surface, unless
/// a later paste already took the surface over.
#[derive(Debug)]
pub struct CaptureTask<S: CaptureSurface> {
    surface: S,
    sanitizer: Sanitizer,
    interval: Duration,
    max_retries: u32,
    cancel: oneshot::Receiver<()>,
    finished: bool,
}

enum Wake {
    Tick,
    Cancelled,
}

impl<S: CaptureSurface> CaptureTask<S> {
    /// Poll the surface until content shows up, the budget runs out, or the
    /// capture is cancelled. The surface is detached on every outcome but
    /// cancellation, which leaves it to the superseding paste.
    pub async fn wait(mut self) -> CaptureOutcome {
        let outcome = self.poll_surface().await;
        self.finished = true;
        match &outcome {
            CaptureOutcome::Ready(markup) => {
                tracing::debug!(target: "quire::paste", len = markup.len(), "capture read");
                self.surface.detach();
                self.surface.clear();
            }
            CaptureOutcome::TimedOut => {
                tracing::debug!(target: "quire::paste", "capture timed out");
                self.surface.detach();
            }
            CaptureOutcome::Cancelled => {
                tracing::debug!(target: "quire::paste", "capture cancelled");
            }
        }
        outcome
    }

    /// Wait and sanitize. `None` when nothing usable materialized.
    pub async fn run(self) -> Option<SanitizedFragment> {
        let sanitizer = self.sanitizer.clone();
        match self.wait().await {
            CaptureOutcome::Ready(markup) => {
                let fragment = sanitizer.sanitize_markup(&markup);
                (!fragment.is_empty()).then_some(fragment)
            }
            CaptureOutcome::TimedOut | CaptureOutcome::Cancelled => None,
        }
    }

    /// Run and hand usable content to `on_read`. Returns whether it was
    /// called.
    pub async fn run_with(self, on_read: impl FnOnce(SanitizedFragment)) -> bool {
        match self.run().await {
            Some(fragment) => {
                on_read(fragment);
                true
            }
            None => false,
        }
    }

    async fn poll_surface(&mut self) -> CaptureOutcome {
        if self.is_cancelled() {
            return CaptureOutcome::Cancelled;
        }
        if let Some(markup) = self.read() {
            return CaptureOutcome::Ready(markup);
        }
        for attempt in 1..=self.max_retries {
            let interval = self.interval;
            let cancel = &mut self.cancel;
            let cancelled = async move {
                // A dropped sender means the owning editor is gone.
                let _ = cancel.await;
                Wake::Cancelled
            };
            let tick = async move {
                n0_future::time::sleep(interval).await;
                Wake::Tick
            };
            if let Wake::Cancelled = cancelled.race(tick).await {
                return CaptureOutcome::Cancelled;
            }
            tracing::trace!(target: "quire::paste", attempt, "polling capture surface");
            if let Some(markup) = self.read() {
                return CaptureOutcome::Ready(markup);
            }
        }
        CaptureOutcome::TimedOut
    }

    /// A superseded capture must never read content meant for its
    /// successor.
    fn is_cancelled(&mut self) -> bool {
        !matches!(
            self.cancel.try_recv(),
            Err(oneshot::error::TryRecvError::Empty)
        )
    }

    fn read(&self) -> Option<String> {
        if self.surface.text_content().is_empty() {
            None
        } else {
            Some(self.surface.inner_markup())
        }
    }
}

impl<S: CaptureSurface> Drop for CaptureTask<S> {
    fn drop(&mut self) {
        if self.finished || self.is_cancelled() {
            return;
        }
        tracing::debug!(target: "quire::paste", "capture abandoned");
        self.surface.detach();
        self.surface.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sanitizer_with(strategy: PasteStrategy) -> PasteSanitizer<MemoryCaptureSurface> {
        let config = PasteConfig {
            strategy,
            ..PasteConfig::default()
        };
        PasteSanitizer::new(MemoryCaptureSurface::new(), Sanitizer::default(), config)
    }

    fn capturing(read: PasteRead<MemoryCaptureSurface>) -> CaptureTask<MemoryCaptureSurface> {
        match read {
            PasteRead::Capturing(task) => task,
            other => panic!("expected a capture, got {other:?}"),
        }
    }

    #[test]
    fn test_sync_prefers_html() {
        let mut paste = sanitizer_with(PasteStrategy::Sync);
        let clipboard = ClipboardSnapshot::html("<h1>T</h1>").with(MIME_TEXT, "T");
        match paste.on_paste(&clipboard) {
            PasteRead::Ready(fragment) => assert_eq!(fragment.to_html(), "<p>T</p>"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(!paste.surface().is_attached());
    }

    #[test]
    fn test_sync_plain_text_fallback_and_preference() {
        let mut paste = sanitizer_with(PasteStrategy::Sync);
        match paste.on_paste(&ClipboardSnapshot::text("a\nb")) {
            PasteRead::Ready(fragment) => assert_eq!(fragment.to_html(), "a<br>b"),
            other => panic!("unexpected {other:?}"),
        }

        let mut paste = PasteSanitizer::new(
            MemoryCaptureSurface::new(),
            Sanitizer::default(),
            PasteConfig {
                strategy: PasteStrategy::Sync,
                prefer_html: false,
                ..PasteConfig::default()
            },
        );
        let clipboard = ClipboardSnapshot::html("<b>x</b>").with(MIME_TEXT, "plain");
        match paste.on_paste(&clipboard) {
            PasteRead::Ready(fragment) => assert_eq!(fragment.to_html(), "plain"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_sync_without_payload_is_empty() {
        let mut paste = sanitizer_with(PasteStrategy::Sync);
        assert!(matches!(paste.on_paste(&ClipboardSnapshot::new()), PasteRead::Empty));
        assert!(matches!(
            paste.on_paste(&ClipboardSnapshot::html("<script>x()</script>")),
            PasteRead::Empty
        ));
        assert_eq!(paste.surface().attach_count(), 0);
    }

    #[test]
    fn test_auto_falls_back_to_capture() {
        let mut paste = sanitizer_with(PasteStrategy::Auto);
        assert!(matches!(
            paste.on_paste(&ClipboardSnapshot::text("hi")),
            PasteRead::Ready(_)
        ));
        let _task = capturing(paste.on_paste(&ClipboardSnapshot::html("")));
        assert!(paste.surface().is_attached());
        assert!(paste.surface().is_focused());
        assert!(paste.is_capturing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_reads_deposited_content() {
        let mut paste = sanitizer_with(PasteStrategy::Capture);
        let task = capturing(paste.on_paste(&ClipboardSnapshot::new()));

        let surface = paste.surface().clone();
        let platform = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(70)).await;
            surface.deposit(r#"<h2 style="color:red">Hi</h2><script>evil()</script>"#)
        });

        let fragment = task.run().await.unwrap();
        assert!(platform.await.unwrap());
        assert_eq!(fragment.to_html(), "<p>Hi</p>");
        // Immediate read, then polls at 50ms and 100ms.
        assert_eq!(paste.surface().reads(), 3);
        assert!(!paste.surface().is_attached());
        assert_eq!(paste.surface().inner_markup(), "");
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_retry_bound() {
        let mut paste = sanitizer_with(PasteStrategy::Capture);
        let task = capturing(paste.on_paste(&ClipboardSnapshot::new()));

        let started = tokio::time::Instant::now();
        let mut called = false;
        let delivered = task.run_with(|_| called = true).await;

        assert!(!delivered);
        assert!(!called);
        assert_eq!(paste.surface().reads(), 1 + 3);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(150) && elapsed < Duration::from_millis(200));
        assert!(!paste.surface().is_attached());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_reads_once() {
        let mut paste = PasteSanitizer::new(
            MemoryCaptureSurface::new(),
            Sanitizer::default(),
            PasteConfig {
                strategy: PasteStrategy::Capture,
                max_retries: 0,
                ..PasteConfig::default()
            },
        );
        let task = capturing(paste.on_paste(&ClipboardSnapshot::new()));
        assert_eq!(task.wait().await, CaptureOutcome::TimedOut);
        assert_eq!(paste.surface().reads(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_paste_supersedes_pending_capture() {
        let mut paste = sanitizer_with(PasteStrategy::Capture);
        let first = capturing(paste.on_paste(&ClipboardSnapshot::new()));
        let second = capturing(paste.on_paste(&ClipboardSnapshot::new()));
        assert!(paste.surface().deposit("fresh"));

        assert_eq!(first.wait().await, CaptureOutcome::Cancelled);
        assert!(paste.surface().is_attached());
        assert_eq!(paste.surface().attach_count(), 2);

        assert_eq!(second.wait().await, CaptureOutcome::Ready("fresh".into()));
        assert!(!paste.surface().is_attached());
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseding_paste_clears_surface() {
        let mut paste = sanitizer_with(PasteStrategy::Capture);
        let _first = capturing(paste.on_paste(&ClipboardSnapshot::new()));
        paste.surface().deposit("left over");

        let _second = capturing(paste.on_paste(&ClipboardSnapshot::new()));
        assert_eq!(paste.surface().inner_markup(), "");
        assert!(paste.surface().is_attached());
    }

    #[test]
    fn test_abandoned_capture_releases_surface() {
        let mut paste = sanitizer_with(PasteStrategy::Capture);
        let task = capturing(paste.on_paste(&ClipboardSnapshot::new()));
        assert!(paste.surface().deposit("never read"));
        drop(task);
        assert!(!paste.surface().is_attached());
        assert_eq!(paste.surface().inner_markup(), "");

        // A superseded task leaves its successor's surface alone.
        let first = capturing(paste.on_paste(&ClipboardSnapshot::new()));
        let _second = capturing(paste.on_paste(&ClipboardSnapshot::new()));
        drop(first);
        assert!(paste.surface().is_attached());
    }

    #[test]
    fn test_deposit_requires_attached_surface() {
        let surface = MemoryCaptureSurface::new();
        assert!(!surface.deposit("x"));
        surface.attach();
        assert!(surface.deposit("<i>x</i>"));
        assert_eq!(surface.text_content(), "x");
        assert_eq!(surface.reads(), 1);
    }
}
