//! HTML directory listings.

use url::Url;

use super::browser::DirectoryEntry;
use super::resolver::ResolvedPath;
use crate::html::Markup;

/// Renders directory listings for confined directories.
#[derive(Debug, Clone, Copy)]
pub struct ListingRenderer {
    allow_uploads: bool,
}

impl ListingRenderer {
    pub fn new(allow_uploads: bool) -> Self {
        Self { allow_uploads }
    }

    /// Render the listing page for `dir` with the given (already sorted)
    /// entries. Links live in request path space, never filesystem space.
    pub fn render(&self, dir: &ResolvedPath, entries: &[DirectoryEntry]) -> String {
        let request_path = dir.request_path();
        let title = format!("Directory listing for {request_path}");
        let segments: Vec<&str> = dir.segments.iter().map(String::as_str).collect();
        let self_href = href(&segments, true);

        let mut page = Markup::document();
        page.open("html", &[]);

        page.open("head", &[]);
        page.void(
            "meta",
            &[
                ("http-equiv", "Content-Type"),
                ("content", "text/html; charset=utf-8"),
            ],
        );
        page.element("title", &[], &title);
        page.close();

        page.open("body", &[]);
        page.element("h1", &[], &title);

        if self.allow_uploads {
            page.open(
                "form",
                &[
                    ("action", self_href.as_str()),
                    ("method", "post"),
                    ("enctype", "multipart/form-data"),
                ],
            );
            page.element("label", &[("for", "file")], "Upload file: ");
            page.void("input", &[("type", "file"), ("name", "file"), ("id", "file")]);
            page.void("input", &[("type", "submit"), ("value", "Submit")]);
            page.close();
        }

        page.void("hr", &[]);
        page.open("ul", &[]);

        let parent = &segments[..segments.len().saturating_sub(1)];
        let parent_href = href(parent, true);
        page.open("li", &[]);
        page.element("a", &[("href", parent_href.as_str())], "..");
        page.close();

        let mut child = segments.clone();
        for entry in entries {
            child.push(&entry.name);
            let display = if entry.is_dir() {
                format!("{}/", entry.name)
            } else {
                entry.name.clone()
            };
            let child_href = href(&child, entry.is_dir());
            page.open("li", &[]);
            page.element("a", &[("href", child_href.as_str())], &display);
            page.close();
            child.pop();
        }

        page.close();
        page.void("hr", &[]);

        page.finish()
    }
}

/// Absolute request path for `segments`, each segment percent-encoded.
fn href(segments: &[&str], trailing_slash: bool) -> String {
    let Ok(mut url) = Url::parse("http://localhost/") else {
        return "/".to_string();
    };
    if let Ok(mut path) = url.path_segments_mut() {
        path.clear().extend(segments);
        if trailing_slash && !segments.is_empty() {
            path.push("");
        }
    }
    url.path().to_string()
}
