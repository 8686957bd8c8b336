use crate::digest::{Digest, NO_NEWS_PLACEHOLDER};
use crate::feed::UNTITLED;
use crate::util::escape_html;

/// Renders the digest as plain HTML lists of linked headlines under an
/// `<h1>` heading. An empty digest renders nothing.
pub fn render_listing(digest: &Digest, heading: &str) -> String {
    if digest.sections().is_empty() {
        return String::new();
    }

    let mut html = format!("<h1>{}</h1>\n", escape_html(heading));

    for section in digest.sections() {
        html.push_str(&format!("<h2>{}</h2>\n", escape_html(&section.label)));

        if section.is_placeholder() {
            html.push_str(&format!("<p>{}</p>\n", NO_NEWS_PLACEHOLDER));
            continue;
        }

        html.push_str("<ul>\n");
        for entry in &section.entries {
            let title = if entry.title.is_empty() {
                UNTITLED
            } else {
                entry.title.as_str()
            };
            html.push_str(&format!(
                "<li><a href=\"{}\">{}</a>",
                escape_html(&entry.link),
                escape_html(title)
            ));
            if !entry.summary.is_empty() {
                html.push_str(&format!("<br><small>{}</small>", escape_html(&entry.summary)));
            }
            html.push_str("</li>\n");
        }
        html.push_str("</ul>\n");
    }

    html
}
