use pulldown_cmark::{html, Options, Parser};

/// Render markdown to an HTML fragment. Pure; never fails — the parser
/// treats anything it can't make sense of as plain paragraphs.
pub fn render(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);

    let parser = Parser::new_ext(markdown, options);
    let mut out = String::with_capacity(markdown.len() * 2);
    html::push_html(&mut out, parser);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_emphasis() {
        let html = render("some **bold** text");
        assert!(html.contains("<strong>bold</strong>"));
    }

    #[test]
    fn renders_tables() {
        let html = render("| a | b |\n|---|---|\n| 1 | 2 |");
        assert!(html.contains("<table>"));
    }

    #[test]
    fn escapes_raw_angle_brackets_in_code() {
        let html = render("`<script>`");
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn plain_text_becomes_paragraph() {
        assert_eq!(render("hello"), "<p>hello</p>\n");
    }
}
