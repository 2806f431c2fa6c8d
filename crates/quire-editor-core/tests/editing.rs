// End-to-end behaviour of the editing core through its public API.

use std::time::Duration;

use quire_editor_core::{
    CaptureOutcome, CaptureSurface, ClipboardSnapshot, Editor, EditorConfig, EditorOptions, Fragment, Key,
    KeyEvent, MemoryCaptureSurface, PasteConfig, PasteRead, PasteSanitizer, PasteStrategy,
    Position, Range, Sanitizer, SimulatedSelection,
};

fn editor_with(content: &str) -> Editor {
    Editor::simulated(
        EditorOptions {
            content: Some(content.to_string()),
            ..EditorOptions::default()
        },
        EditorConfig::default(),
    )
}

fn collect_tags(nodes: &[Fragment], out: &mut Vec<String>) {
    for node in nodes {
        if let Fragment::Element { tag, children, .. } = node {
            out.push(tag.to_string());
            collect_tags(children, out);
        }
    }
}

#[test]
fn canonical_emptiness_after_removing_everything() {
    let mut editor = editor_with("");
    assert!(editor.is_empty());

    editor.type_text("draft").unwrap();
    editor.handle_keydown(&KeyEvent::new(Key::Enter));
    editor.type_text("more").unwrap();
    assert!(!editor.is_empty());
    assert_eq!(editor.tree().attr(editor.root(), "empty"), Some("0"));

    editor.select_all();
    assert!(editor.delete_selection());
    assert_eq!(editor.content(), "<br>");
    assert_eq!(editor.tree().attr(editor.root(), "empty"), Some("1"));

    let image = editor.tree_mut().create_element("img");
    editor.insert_nodes(&[image]).unwrap();
    assert_eq!(editor.tree().attr(editor.root(), "empty"), Some("0"));
}

#[test]
fn caret_lands_after_inserted_content() {
    // Inside a text run.
    let mut editor = editor_with("hello");
    let text = editor.tree().children(editor.root())[0];
    editor.selection_mut().collapse_to(Position::new(text, 3));
    let node = editor.tree_mut().create_element("b");
    let caret = editor.insert_nodes(&[node]).unwrap();
    assert!(caret.collapsed());
    assert_eq!(editor.tree().prev_sibling(caret.start.node), Some(node));
    assert_eq!(editor.caret(), Some(caret));

    // At an element boundary.
    let mut editor = editor_with("<p>a</p><p>b</p>");
    let root = editor.root();
    editor.selection_mut().collapse_to(Position::new(root, 2));
    let node = editor.tree_mut().create_element("img");
    let caret = editor.insert_nodes(&[node]).unwrap();
    assert!(caret.collapsed());
    assert_eq!(editor.tree().prev_sibling(caret.start.node), Some(node));
    assert_eq!(editor.content(), "<p>a</p><p>b</p><img>");
}

#[test]
fn line_break_splits_running_text() {
    let mut editor = editor_with("<p>before after</p>");
    let p = editor.tree().children(editor.root())[0];
    let text = editor.tree().children(p)[0];
    editor.selection_mut().collapse_to(Position::new(text, 6));

    editor.insert_line_break().unwrap();
    assert_eq!(editor.content(), "<p>before<br> after</p>");
}

#[test]
fn repeated_line_breaks_leave_one_empty_text_node() {
    let mut editor = editor_with("ab");
    let text = editor.tree().children(editor.root())[0];
    editor.selection_mut().collapse_to(Position::new(text, 1));

    editor.insert_line_break().unwrap();
    editor.insert_line_break().unwrap();

    let tree = editor.tree();
    let empty_texts = tree
        .descendants(editor.root())
        .filter(|&node| tree.text(node) == Some(""))
        .count();
    assert!(empty_texts <= 1);
    assert_eq!(editor.content(), "a<br><br>b");
}

#[test]
fn replacing_a_selection_spanning_blocks() {
    let mut editor = editor_with("<p>one</p><p>two</p>");
    let root = editor.root();
    let first = editor.tree().children(editor.tree().children(root)[0])[0];
    let second = editor.tree().children(editor.tree().children(root)[1])[0];
    editor
        .selection_mut()
        .set(Range::new(Position::new(first, 1), Position::new(second, 2)));

    let node = editor.tree_mut().create_text("X");
    editor.insert_nodes(&[node]).unwrap();
    // The range spanned elements, so no extra line break is added.
    assert_eq!(editor.content(), "<p>oX</p><p>o</p>");
}

#[test]
fn sanitized_output_stays_inside_the_vocabulary() {
    let sanitizer = Sanitizer::default();
    let allowed = ["br", "b", "i", "u", "strike", "p"];
    let inputs = [
        r##"<html><body><div id="a"><span>x</span><a href="#">link</a></div></body></html>"##,
        "<table><thead><tr><th>h</th></tr></thead><tbody><tr><td>c</td></tr></tbody></table>",
        "<ul><li><strong>one</strong></li><li><em>two</em></li></ul>",
        "<font color=red><center>old</center></font><marquee>m</marquee>",
        "<p>unclosed <b>bold <i>both</p> trailing</b>",
        "<iframe src=x></iframe><video><source src=y></video><canvas></canvas>",
        "<sup>1</sup><sub>2</sub><code>c</code><kbd>k</kbd><mark>m</mark>",
        "<<<>>> & <b <i>>",
    ];
    for input in inputs {
        let output = sanitizer.sanitize_markup(input);
        let mut tags = Vec::new();
        collect_tags(output.nodes(), &mut tags);
        for tag in &tags {
            assert!(allowed.contains(&tag.as_str()), "{tag} survived {input:?}");
        }
        let again = sanitizer.sanitize_markup(&output.to_html());
        assert_eq!(output, again, "not idempotent for {input:?}");
    }

    let output = sanitizer.sanitize_markup("<span>keep</span> <a>me</a>");
    assert_eq!(output.to_html(), "keep me");
}

#[test]
fn heading_scenario() {
    let output = Sanitizer::default()
        .sanitize_markup(r#"<h2 style="color:red">Hi</h2><script>evil()</script>"#);
    assert_eq!(output.to_html(), "<p>Hi</p>");
}

#[test]
fn image_into_empty_document() {
    let mut editor = editor_with("");
    assert_eq!(editor.content(), "<br>");
    let image = editor.tree_mut().create_element("img");
    editor.tree_mut().set_attr(image, "src", "a.png").unwrap();

    let caret = editor.insert_nodes(&[image]).unwrap();
    assert_eq!(editor.content(), r#"<img src="a.png">"#);
    assert!(!editor.is_empty());
    assert!(caret.collapsed());
    assert_eq!(editor.tree().prev_sibling(caret.start.node), Some(image));
}

#[tokio::test(start_paused = true)]
async fn capture_gives_up_after_retry_budget() {
    let surface = MemoryCaptureSurface::new();
    let config = PasteConfig {
        strategy: PasteStrategy::Capture,
        max_retries: 5,
        retry_interval_ms: 20,
        ..PasteConfig::default()
    };
    let mut paste = PasteSanitizer::new(surface.clone(), Sanitizer::default(), config);

    let PasteRead::Capturing(task) = paste.on_paste(&ClipboardSnapshot::new()) else {
        panic!("capture strategy must capture");
    };
    let mut delivered = None;
    let called = task.run_with(|fragment| delivered = Some(fragment)).await;

    assert!(!called);
    assert!(delivered.is_none());
    // One immediate read plus at most the configured retries.
    assert_eq!(surface.reads(), 1 + 5);
    assert!(!surface.is_attached());
}

#[tokio::test(start_paused = true)]
async fn late_content_is_read_on_a_retry() {
    let surface = MemoryCaptureSurface::new();
    let mut paste = PasteSanitizer::new(
        surface.clone(),
        Sanitizer::default(),
        PasteConfig {
            strategy: PasteStrategy::Capture,
            ..PasteConfig::default()
        },
    );
    let PasteRead::Capturing(task) = paste.on_paste(&ClipboardSnapshot::new()) else {
        panic!("capture strategy must capture");
    };

    let platform = surface.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(120)).await;
        platform.deposit("<em>late</em>");
    });

    assert_eq!(task.wait().await, CaptureOutcome::Ready("<em>late</em>".into()));
    assert_eq!(surface.reads(), 4);
}

#[tokio::test(start_paused = true)]
async fn editor_paste_through_capture_surface() {
    let surface = MemoryCaptureSurface::new();
    let mut config = EditorConfig::default();
    config.paste.strategy = PasteStrategy::Capture;
    let mut editor = Editor::new(
        EditorOptions {
            content: Some("start".into()),
            ..EditorOptions::default()
        },
        SimulatedSelection::new(),
        surface.clone(),
        config,
    );
    let text = editor.tree().children(editor.root())[0];
    editor.selection_mut().collapse_to(Position::new(text, 5));

    let platform = surface.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        platform.deposit(r#"<div style="x"><b>bold</b> text<script>no()</script></div>"#);
    });

    editor.paste(&ClipboardSnapshot::new()).await.unwrap();
    assert_eq!(editor.content(), "start<br><p><b>bold</b> text</p>");
    assert!(!surface.is_attached());
}
