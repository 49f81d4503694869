use once_cell::sync::Lazy;
use regex::Regex;

use crate::markdown;

static DATA_MARKDOWN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"data-markdown\s*=\s*"([^"]*)""#).unwrap());

static CSRF_META_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<meta[^>]*name\s*=\s*["']_csrf["'][^>]*>"#).unwrap());

static CONTENT_ATTR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"content\s*=\s*["']([^"']*)["']"#).unwrap());

/// Inner HTML of the element carrying `id="..."`, or None when the
/// document has no such element. This is a tag-depth scan over elements
/// of the same name, not a full HTML parse; the server emits well-formed
/// fragments so that is all region replacement needs.
pub fn extract_region(html: &str, id: &str) -> Option<String> {
    let pos = find_id_attr(html, id)?;
    let bounds = element_bounds(html, pos)?;
    Some(html[bounds.inner_start..bounds.inner_end].to_string())
}

/// Copy of the fragment with the identified element removed entirely.
/// Used to hide the optional sources sub-section when its toggle is off.
pub fn without_region(html: &str, id: &str) -> String {
    match find_id_attr(html, id).and_then(|pos| element_bounds(html, pos)) {
        Some(bounds) => {
            let mut out = String::with_capacity(html.len());
            out.push_str(&html[..bounds.start]);
            out.push_str(&html[bounds.end..]);
            out
        }
        None => html.to_string(),
    }
}

/// Replace the body of every element carrying a `data-markdown` attribute
/// with the rendered form of that attribute's (entity-escaped) payload.
pub fn expand_markdown(fragment: &str) -> String {
    let mut out = String::with_capacity(fragment.len());
    let mut cursor = 0;
    for captures in DATA_MARKDOWN_RE.captures_iter(fragment) {
        let attr = captures.get(0).unwrap();
        if attr.start() < cursor {
            // attribute sits inside an element we already rewrote
            continue;
        }
        let Some(bounds) = element_bounds(fragment, attr.start()) else {
            continue;
        };
        let source = unescape_html(captures.get(1).unwrap().as_str());
        out.push_str(&fragment[cursor..bounds.inner_start]);
        out.push_str(&markdown::render(&source));
        cursor = bounds.inner_end;
    }
    out.push_str(&fragment[cursor..]);
    out
}

/// CSRF token from a `<meta name="_csrf" content="...">` tag, when present.
pub fn extract_csrf_token(html: &str) -> Option<String> {
    let meta = CSRF_META_RE.find(html)?;
    CONTENT_ATTR_RE
        .captures(meta.as_str())
        .map(|c| unescape_html(&c[1]))
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(ch),
        }
    }
    out
}

pub fn unescape_html(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Flatten an HTML fragment to displayable text: tags stripped, block
/// closers and <br> become newlines, entities decoded.
pub fn html_to_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;
    loop {
        match rest.find('<') {
            Some(lt) => {
                out.push_str(&rest[..lt]);
                match rest[lt..].find('>') {
                    Some(gt) => {
                        let tag = &rest[lt + 1..lt + gt];
                        if breaks_line(tag) {
                            out.push('\n');
                        }
                        rest = &rest[lt + gt + 1..];
                    }
                    // unterminated tag: drop the trailing junk
                    None => break,
                }
            }
            None => {
                out.push_str(rest);
                break;
            }
        }
    }
    collapse_blank_lines(&unescape_html(&out))
}

fn breaks_line(tag: &str) -> bool {
    let closing = tag.starts_with('/');
    let name: String = tag
        .trim_start_matches('/')
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    match name.as_str() {
        "br" => true,
        "p" | "div" | "li" | "tr" | "ul" | "ol" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
            closing
        }
        _ => false,
    }
}

fn collapse_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut newlines = 0;
    for ch in text.chars() {
        if ch == '\n' {
            newlines += 1;
            if newlines <= 2 {
                out.push(ch);
            }
        } else {
            newlines = 0;
            out.push(ch);
        }
    }
    out.trim().to_string()
}

struct ElementBounds {
    /// byte offset of the opening '<'
    start: usize,
    inner_start: usize,
    inner_end: usize,
    /// byte offset one past the closing tag's '>'
    end: usize,
}

fn find_id_attr(html: &str, id: &str) -> Option<usize> {
    let re = Regex::new(&format!(r#"id\s*=\s*["']{}["']"#, regex::escape(id))).ok()?;
    let bytes = html.as_bytes();
    let pos = re
        .find_iter(html)
        .find(|m| {
            // only the bare `id` attribute counts; `data-id`, `aria-id`
            // and friends carry the same suffix but name a different thing
            match m.start().checked_sub(1).map(|i| bytes[i]) {
                Some(b) => !(b.is_ascii_alphanumeric() || b == b'-' || b == b'_'),
                None => true,
            }
        })
        .map(|m| m.start());
    pos
}

/// Bounds of the element whose open tag contains the attribute at
/// `attr_pos`. Tracks nesting depth for tags of the same name so that a
/// <div> region containing further <div>s closes at the right place.
fn element_bounds(html: &str, attr_pos: usize) -> Option<ElementBounds> {
    let start = html[..attr_pos].rfind('<')?;
    let after = &html[start + 1..];
    let name_len = after
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-'))
        .unwrap_or(after.len());
    if name_len == 0 {
        return None;
    }
    let name = &after[..name_len];

    let open_end = start + html[start..].find('>')?;
    if html[..open_end].ends_with('/') {
        // self-closing: empty body
        return Some(ElementBounds {
            start,
            inner_start: open_end + 1,
            inner_end: open_end + 1,
            end: open_end + 1,
        });
    }

    let inner_start = open_end + 1;
    let open_pat = format!("<{name}");
    let close_pat = format!("</{name}");
    let bytes = html.as_bytes();
    let mut depth = 1usize;
    let mut cursor = inner_start;

    while cursor < html.len() {
        let lt = cursor + html[cursor..].find('<')?;
        if html[lt..].starts_with(&close_pat) && tag_boundary(bytes.get(lt + close_pat.len())) {
            let gt = lt + html[lt..].find('>')?;
            depth -= 1;
            if depth == 0 {
                return Some(ElementBounds {
                    start,
                    inner_start,
                    inner_end: lt,
                    end: gt + 1,
                });
            }
            cursor = gt + 1;
        } else if html[lt..].starts_with(&open_pat) && tag_boundary(bytes.get(lt + open_pat.len()))
        {
            let gt = lt + html[lt..].find('>')?;
            if !html[..gt].ends_with('/') {
                depth += 1;
            }
            cursor = gt + 1;
        } else {
            cursor = lt + 1;
        }
    }
    None
}

fn tag_boundary(b: Option<&u8>) -> bool {
    matches!(b, Some(b' ' | b'\t' | b'\n' | b'\r' | b'>' | b'/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_named_region() {
        let html = r#"<html><body><div id="results"><p>answer</p></div></body></html>"#;
        assert_eq!(
            extract_region(html, "results").as_deref(),
            Some("<p>answer</p>")
        );
    }

    #[test]
    fn region_extraction_balances_nested_same_tags() {
        let html = r#"<div id="results"><div class="inner"><div>deep</div></div>tail</div><div>after</div>"#;
        assert_eq!(
            extract_region(html, "results").as_deref(),
            Some(r#"<div class="inner"><div>deep</div></div>tail"#)
        );
    }

    #[test]
    fn missing_region_is_none() {
        assert_eq!(extract_region("<div id=\"other\">x</div>", "results"), None);
    }

    #[test]
    fn id_attribute_match_is_exact() {
        // "resultsContent" must not satisfy a lookup for "results"
        let html = r#"<div id="resultsContent">x</div>"#;
        assert_eq!(extract_region(html, "results"), None);
        // nor must a data attribute that happens to carry the same value
        let html = r#"<div data-id="results">x</div>"#;
        assert_eq!(extract_region(html, "results"), None);
    }

    #[test]
    fn id_lookup_ignores_earlier_data_attributes() {
        let html = concat!(
            r#"<div data-id="results"><p>decoy</p></div>"#,
            r#"<div id="results"><p>answer</p></div>"#,
        );
        assert_eq!(
            extract_region(html, "results").as_deref(),
            Some("<p>answer</p>")
        );
        assert_eq!(
            without_region(html, "results"),
            r#"<div data-id="results"><p>decoy</p></div>"#
        );
    }

    #[test]
    fn without_region_removes_whole_element() {
        let html = r#"<div>keep</div><div id="sourcesSection"><p>refs</p></div><span>tail</span>"#;
        assert_eq!(
            without_region(html, "sourcesSection"),
            "<div>keep</div><span>tail</span>"
        );
    }

    #[test]
    fn without_region_is_identity_when_absent() {
        let html = "<div>keep</div>";
        assert_eq!(without_region(html, "sourcesSection"), html);
    }

    #[test]
    fn escape_round_trip_renders_literal_text() {
        let hostile = r#"<script>alert("x & y")</script>"#;
        let escaped = escape_html(hostile);
        assert!(!escaped.contains('<'));
        assert!(!escaped.contains('>'));
        assert!(!escaped.contains('"'));
        assert_eq!(unescape_html(&escaped), hostile);
    }

    #[test]
    fn expand_markdown_replaces_element_body() {
        let fragment =
            r#"<div class="markdown-content" data-markdown="**bold** &amp; more">old</div>"#;
        let expanded = expand_markdown(fragment);
        assert!(expanded.contains("<strong>bold</strong>"));
        assert!(expanded.contains("&amp; more"));
        assert!(!expanded.contains(">old<"));
    }

    #[test]
    fn expand_markdown_handles_multiple_elements() {
        let fragment = concat!(
            r#"<div data-markdown="one"></div>"#,
            r#"<span>plain</span>"#,
            r#"<div data-markdown="two"></div>"#,
        );
        let expanded = expand_markdown(fragment);
        assert!(expanded.contains("<p>one</p>"));
        assert!(expanded.contains("<span>plain</span>"));
        assert!(expanded.contains("<p>two</p>"));
    }

    #[test]
    fn csrf_token_found_in_meta_tag() {
        let html = r#"<head><meta name="_csrf" content="tok-123"/></head>"#;
        assert_eq!(extract_csrf_token(html).as_deref(), Some("tok-123"));
    }

    #[test]
    fn csrf_token_absent() {
        assert_eq!(extract_csrf_token("<head></head>"), None);
    }

    #[test]
    fn html_to_text_strips_tags_and_breaks_lines() {
        let text = html_to_text("<p>first</p><p>second<br>third</p>");
        assert_eq!(text, "first\nsecond\nthird");
    }

    #[test]
    fn html_to_text_decodes_entities() {
        assert_eq!(html_to_text("a &amp; b &lt;c&gt;"), "a & b <c>");
    }
}
