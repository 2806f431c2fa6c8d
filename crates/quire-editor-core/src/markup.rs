//! Lenient markup fragment parsing and serialization.
//!
//! This is deliberately not an HTML5 tree builder. It understands enough of
//! the syntax to take apart clipboard payloads and stored content: tags with
//! quoted, unquoted or bare attributes, self-closing syntax, void elements,
//! raw-text bodies (`<script>`, `<style>`, ...), comments and character
//! references. Malformed input never fails; it degrades to text or to
//! dropped tags.

use smol_str::{SmolStr, StrExt};

/// An owned markup tree, detached from any document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Element {
        tag: SmolStr,
        attrs: Vec<(SmolStr, String)>,
        children: Vec<Fragment>,
    },
    Text(String),
}

impl Fragment {
    /// Create an attribute-less element.
    pub fn element(tag: impl Into<SmolStr>, children: Vec<Fragment>) -> Self {
        Fragment::Element {
            tag: tag.into(),
            attrs: Vec::new(),
            children,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Fragment::Text(text.into())
    }

    /// Tag name for elements, `None` for text.
    pub fn tag(&self) -> Option<&str> {
        match self {
            Fragment::Element { tag, .. } => Some(tag.as_str()),
            Fragment::Text(_) => None,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Fragment::Text(_))
    }

    /// Concatenated text of this node and its descendants.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        match self {
            Fragment::Text(text) => out.push_str(text),
            Fragment::Element { children, .. } => {
                for child in children {
                    child.collect_text(out);
                }
            }
        }
    }
}

/// Elements that never have children or an end tag.
pub fn is_void_element(name: &str) -> bool {
    matches!(
        name,
        "area"
            | "base"
            | "br"
            | "col"
            | "embed"
            | "hr"
            | "img"
            | "input"
            | "link"
            | "meta"
            | "param"
            | "source"
            | "track"
            | "wbr"
    )
}

fn is_raw_text_element(name: &str) -> bool {
    matches!(
        name,
        "script" | "style" | "textarea" | "title" | "noscript" | "xmp"
    )
}

#[derive(Debug, PartialEq)]
enum Token {
    Start {
        name: SmolStr,
        attrs: Vec<(SmolStr, String)>,
        self_closing: bool,
    },
    End(SmolStr),
    Text(String),
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b':' | b'_' | b'-')
}

fn find_from(haystack: &str, from: usize, needle: &str) -> Option<usize> {
    haystack.get(from..)?.find(needle).map(|pos| from + pos)
}

/// Find `</name` followed by whitespace, `/` or `>`, ignoring ASCII case.
/// Returns (start of the close tag, index just past its `>`).
fn find_raw_text_close(input: &str, from: usize, name: &str) -> Option<(usize, usize)> {
    let bytes = input.as_bytes();
    let mut i = from;
    while let Some(lt) = find_from(input, i, "</") {
        let name_start = lt + 2;
        let name_end = name_start + name.len();
        if name_end <= bytes.len() && bytes[name_start..name_end].eq_ignore_ascii_case(name.as_bytes())
        {
            match bytes.get(name_end) {
                Some(b'>') => return Some((lt, name_end + 1)),
                Some(b) if b.is_ascii_whitespace() || *b == b'/' => {
                    let close = find_from(input, name_end, ">").map_or(bytes.len(), |gt| gt + 1);
                    return Some((lt, close));
                }
                None => return Some((lt, bytes.len())),
                _ => {}
            }
        }
        i = lt + 2;
    }
    None
}

fn tokenize(input: &str) -> Vec<Token> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    // Slices are only cut at ASCII structural bytes, so every endpoint is a
    // char boundary.
    while i < bytes.len() {
        if bytes[i] != b'<' {
            let start = i;
            while i < bytes.len() && bytes[i] != b'<' {
                i += 1;
            }
            tokens.push(Token::Text(decode_entities(&input[start..i])));
            continue;
        }

        let rest = &input[i..];
        if rest.starts_with("<!--") {
            i = find_from(input, i + 4, "-->").map_or(bytes.len(), |end| end + 3);
            continue;
        }
        if rest.starts_with("<!") || rest.starts_with("<?") {
            i = find_from(input, i + 2, ">").map_or(bytes.len(), |end| end + 1);
            continue;
        }
        if rest.starts_with("</") {
            let name_start = i + 2;
            if bytes.get(name_start).is_some_and(u8::is_ascii_alphabetic) {
                let mut j = name_start;
                while j < bytes.len() && is_name_byte(bytes[j]) {
                    j += 1;
                }
                let name = input[name_start..j].to_ascii_lowercase_smolstr();
                i = find_from(input, j, ">").map_or(bytes.len(), |end| end + 1);
                tokens.push(Token::End(name));
            } else {
                // `</>` or `</ junk>`: bogus comment.
                i = find_from(input, i + 2, ">").map_or(bytes.len(), |end| end + 1);
            }
            continue;
        }
        if !bytes.get(i + 1).is_some_and(u8::is_ascii_alphabetic) {
            tokens.push(Token::Text("<".to_string()));
            i += 1;
            continue;
        }

        let (token, next) = read_start_tag(input, i + 1);
        i = next;
        if let Token::Start {
            ref name,
            self_closing: false,
            ..
        } = token
        {
            if is_raw_text_element(name) {
                let name = name.clone();
                tokens.push(token);
                match find_raw_text_close(input, i, &name) {
                    Some((body_end, after)) => {
                        if body_end > i {
                            tokens.push(Token::Text(input[i..body_end].to_string()));
                        }
                        i = after;
                    }
                    None => {
                        if i < bytes.len() {
                            tokens.push(Token::Text(input[i..].to_string()));
                        }
                        i = bytes.len();
                    }
                }
                tokens.push(Token::End(name));
                continue;
            }
        }
        tokens.push(token);
    }

    tokens
}

/// Read a start tag whose name begins at `start`. Returns the token and the
/// index just past the closing `>` (or end of input).
fn read_start_tag(input: &str, start: usize) -> (Token, usize) {
    let bytes = input.as_bytes();
    let mut i = start;
    while i < bytes.len() && is_name_byte(bytes[i]) {
        i += 1;
    }
    let name = input[start..i].to_ascii_lowercase_smolstr();
    let mut attrs: Vec<(SmolStr, String)> = Vec::new();
    let mut self_closing = false;

    loop {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        match bytes.get(i) {
            None => break,
            Some(b'>') => {
                i += 1;
                break;
            }
            Some(b'/') => {
                if bytes.get(i + 1) == Some(&b'>') {
                    self_closing = true;
                    i += 2;
                    break;
                }
                i += 1;
                continue;
            }
            Some(_) => {}
        }

        let attr_start = i;
        while i < bytes.len()
            && !bytes[i].is_ascii_whitespace()
            && !matches!(bytes[i], b'=' | b'>' | b'/')
        {
            i += 1;
        }
        if i == attr_start {
            // A stray `=`; skip it.
            i += 1;
            continue;
        }
        let attr_name = input[attr_start..i].to_ascii_lowercase_smolstr();

        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let mut value = String::new();
        if bytes.get(i) == Some(&b'=') {
            i += 1;
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            match bytes.get(i) {
                Some(&quote @ (b'"' | b'\'')) => {
                    let value_start = i + 1;
                    let value_end = input[value_start..]
                        .find(quote as char)
                        .map_or(bytes.len(), |pos| value_start + pos);
                    value = decode_entities(&input[value_start..value_end]);
                    i = (value_end + 1).min(bytes.len());
                }
                Some(_) => {
                    let value_start = i;
                    while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'>' {
                        i += 1;
                    }
                    value = decode_entities(&input[value_start..i]);
                }
                None => {}
            }
        }
        if !attrs.iter().any(|(existing, _)| *existing == attr_name) {
            attrs.push((attr_name, value));
        }
    }

    (
        Token::Start {
            name,
            attrs,
            self_closing,
        },
        i,
    )
}

/// Decode named and numeric character references. Unknown references are
/// kept literally.
pub fn decode_entities(text: &str) -> String {
    html_escape::decode_html_entities(text).into_owned()
}

struct OpenElement {
    tag: SmolStr,
    attrs: Vec<(SmolStr, String)>,
    children: Vec<Fragment>,
}

impl OpenElement {
    fn close(self) -> Fragment {
        Fragment::Element {
            tag: self.tag,
            attrs: self.attrs,
            children: self.children,
        }
    }
}

fn push_node(stack: &mut [OpenElement], top: &mut Vec<Fragment>, node: Fragment) {
    let siblings = match stack.last_mut() {
        Some(open) => &mut open.children,
        None => top,
    };
    if let (Fragment::Text(new), Some(Fragment::Text(prev))) = (&node, siblings.last_mut()) {
        prev.push_str(new);
        return;
    }
    siblings.push(node);
}

/// Parse a markup fragment into an owned tree.
pub fn parse_fragment(input: &str) -> Vec<Fragment> {
    let mut stack: Vec<OpenElement> = Vec::new();
    let mut top: Vec<Fragment> = Vec::new();

    for token in tokenize(input) {
        match token {
            Token::Text(text) => {
                if !text.is_empty() {
                    push_node(&mut stack, &mut top, Fragment::Text(text));
                }
            }
            Token::Start {
                name,
                attrs,
                self_closing,
            } => {
                if self_closing || is_void_element(&name) {
                    push_node(
                        &mut stack,
                        &mut top,
                        Fragment::Element {
                            tag: name,
                            attrs,
                            children: Vec::new(),
                        },
                    );
                } else {
                    stack.push(OpenElement {
                        tag: name,
                        attrs,
                        children: Vec::new(),
                    });
                }
            }
            Token::End(name) => {
                if name == "br" {
                    // `</br>` is treated as `<br>` by browsers.
                    push_node(&mut stack, &mut top, Fragment::element("br", Vec::new()));
                    continue;
                }
                let Some(pos) = stack.iter().rposition(|open| open.tag == name) else {
                    continue;
                };
                while stack.len() > pos {
                    if let Some(open) = stack.pop() {
                        let node = open.close();
                        push_node(&mut stack, &mut top, node);
                    }
                }
            }
        }
    }

    while let Some(open) = stack.pop() {
        let node = open.close();
        push_node(&mut stack, &mut top, node);
    }
    top
}

/// Serialize fragments back to markup.
pub fn serialize(nodes: &[Fragment]) -> String {
    let mut out = String::new();
    for node in nodes {
        write_fragment(&mut out, node);
    }
    out
}

fn write_fragment(out: &mut String, node: &Fragment) {
    match node {
        Fragment::Text(text) => write_text(out, text),
        Fragment::Element {
            tag,
            attrs,
            children,
        } => {
            write_start_tag(out, tag, attrs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
            if !is_void_element(tag) {
                for child in children {
                    write_fragment(out, child);
                }
                write_end_tag(out, tag);
            }
        }
    }
}

pub(crate) fn write_start_tag<'a>(
    out: &mut String,
    tag: &str,
    attrs: impl IntoIterator<Item = (&'a str, &'a str)>,
) {
    out.push('<');
    out.push_str(tag);
    for (name, value) in attrs {
        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        html_escape::encode_double_quoted_attribute_to_string(value, out);
        out.push('"');
    }
    out.push('>');
}

pub(crate) fn write_end_tag(out: &mut String, tag: &str) {
    out.push_str("</");
    out.push_str(tag);
    out.push('>');
}

/// Escape text content. Non-breaking spaces are written as `&nbsp;` so they
/// survive a round trip through markup.
pub(crate) fn write_text(out: &mut String, text: &str) {
    for (i, run) in text.split('\u{a0}').enumerate() {
        if i > 0 {
            out.push_str("&nbsp;");
        }
        html_escape::encode_text_to_string(run, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn el(tag: &str, children: Vec<Fragment>) -> Fragment {
        Fragment::element(tag, children)
    }

    #[test]
    fn test_parse_nested_elements() {
        let nodes = parse_fragment("<p>Hello <b>world</b></p>");
        assert_eq!(
            nodes,
            vec![el(
                "p",
                vec![Fragment::text("Hello "), el("b", vec![Fragment::text("world")])]
            )]
        );
    }

    #[test]
    fn test_parse_attributes_and_case() {
        let nodes = parse_fragment(r#"<DIV Class="a" data-x='1' hidden style=color:red>x</div>"#);
        let Fragment::Element { tag, attrs, .. } = &nodes[0] else {
            panic!("expected element");
        };
        assert_eq!(tag, "div");
        assert_eq!(
            attrs,
            &vec![
                ("class".into(), "a".to_string()),
                ("data-x".into(), "1".to_string()),
                ("hidden".into(), String::new()),
                ("style".into(), "color:red".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_void_and_self_closing() {
        let nodes = parse_fragment("a<br>b<img src=x />c<span/>d");
        let tags: Vec<_> = nodes.iter().map(|n| n.tag().unwrap_or("#text")).collect();
        assert_eq!(
            tags,
            vec!["#text", "br", "#text", "img", "#text", "span", "#text"]
        );
    }

    #[test]
    fn test_parse_raw_text_body_is_not_markup() {
        let nodes = parse_fragment("<script>if (a < b) { x('</p>') }</script>after");
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].tag(), Some("script"));
        assert_eq!(nodes[0].text_content(), "if (a < b) { x('</p>') }");
        assert_eq!(nodes[1], Fragment::text("after"));
    }

    #[test]
    fn test_parse_mismatched_and_stray_end_tags() {
        let nodes = parse_fragment("<b><i>x</b>y</i></u>z");
        assert_eq!(
            nodes,
            vec![
                el("b", vec![el("i", vec![Fragment::text("x")])]),
                Fragment::text("yz"),
            ]
        );
    }

    #[test]
    fn test_parse_unclosed_elements_are_closed_at_end() {
        let nodes = parse_fragment("<p>one<b>two");
        assert_eq!(
            nodes,
            vec![el(
                "p",
                vec![Fragment::text("one"), el("b", vec![Fragment::text("two")])]
            )]
        );
    }

    #[test]
    fn test_parse_comments_and_doctype_dropped() {
        let nodes = parse_fragment("<!DOCTYPE html><!-- hi -->a<!--unterminated");
        assert_eq!(nodes, vec![Fragment::text("a")]);
    }

    #[test]
    fn test_parse_lone_angle_bracket_is_text() {
        let nodes = parse_fragment("1 < 2 <3");
        assert_eq!(nodes, vec![Fragment::text("1 < 2 <3")]);
    }

    #[test]
    fn test_decode_entities() {
        assert_eq!(decode_entities("a &amp; b &lt;c&gt;"), "a & b <c>");
        assert_eq!(decode_entities("&#65;&#x42;&nbsp;"), "AB\u{a0}");
        assert_eq!(decode_entities("&bogus; & x"), "&bogus; & x");
    }

    #[test]
    fn test_word_processor_entities_round_trip() {
        let nodes = parse_fragment("<p>It&rsquo;s &mdash; done&hellip; &copy;</p>");
        assert_eq!(nodes[0].text_content(), "It\u{2019}s \u{2014} done\u{2026} \u{a9}");
        assert_eq!(serialize(&nodes), "<p>It\u{2019}s \u{2014} done\u{2026} \u{a9}</p>");
    }

    #[test]
    fn test_serialize_escapes() {
        let nodes = vec![
            Fragment::Element {
                tag: "img".into(),
                attrs: vec![("alt".into(), "a \"b\" & c".to_string())],
                children: Vec::new(),
            },
            Fragment::text("1 < 2 & 3"),
        ];
        assert_eq!(
            serialize(&nodes),
            r#"<img alt="a &quot;b&quot; &amp; c">1 &lt; 2 &amp; 3"#
        );
    }

    #[test]
    fn test_serialize_parse_is_stable() {
        let source = "<p>a<b>b</b><br>c</p>d";
        assert_eq!(serialize(&parse_fragment(source)), source);
    }
}
