//! Visible-text extraction from parsed HTML.

use scraper::{ElementRef, Html, Selector};

const HIDDEN_ELEMENTS: [&str; 5] = ["script", "style", "noscript", "template", "head"];

const BLOCK_ELEMENTS: [&str; 22] = [
    "p", "div", "br", "h1", "h2", "h3", "h4", "h5", "h6", "li", "tr", "td", "th", "section",
    "article", "main", "header", "footer", "blockquote", "pre", "ul", "ol",
];

/// Visible text under `element`. Block elements start a new line,
/// script/style content is skipped and runs of whitespace collapse.
pub fn visible_text(element: ElementRef<'_>) -> String {
    let mut out = String::new();
    let mut pending_break = false;
    walk(element, &mut out, &mut pending_break);
    out
}

fn walk(element: ElementRef<'_>, out: &mut String, pending_break: &mut bool) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
            if collapsed.is_empty() {
                continue;
            }
            if !out.is_empty() {
                out.push(if *pending_break { '\n' } else { ' ' });
            }
            out.push_str(&collapsed);
            *pending_break = false;
        } else if let Some(child_el) = ElementRef::wrap(child) {
            let name = child_el.value().name();
            if HIDDEN_ELEMENTS.contains(&name) {
                continue;
            }
            let block = BLOCK_ELEMENTS.contains(&name);
            if block {
                *pending_break = true;
            }
            walk(child_el, out, pending_break);
            if block {
                *pending_break = true;
            }
        }
    }
}

/// Text of `<body>`, or of the whole document when there is no body.
pub fn body_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let body = Selector::parse("body")
        .ok()
        .and_then(|selector| document.select(&selector).next());

    match body {
        Some(body) => visible_text(body),
        None => visible_text(document.root_element()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_text_skips_scripts_and_styles() {
        let html = r#"<html><head><title>T</title><style>p { color: red; }</style></head>
            <body><h1>Influenza</h1><script>var x = 1;</script>
            <p>Flu is a   contagious respiratory illness.</p></body></html>"#;
        let text = body_text(html);
        assert_eq!(text, "Influenza\nFlu is a contagious respiratory illness.");
    }

    #[test]
    fn test_inline_elements_join_with_space() {
        let html = "<body><p>Take <b>two</b> tablets</p></body>";
        assert_eq!(body_text(html), "Take two tablets");
    }
}
