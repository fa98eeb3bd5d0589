//! Minimal structured HTML builder.
//!
//! Tag and attribute names are `&'static str`, so only literals from this
//! crate can become markup. Text content and attribute values are always
//! escaped on the way in; there is no method that appends raw dynamic text.

use std::fmt::Write as _;

/// Escape text for use in element content or a double-quoted attribute.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    escape_into(&mut out, text);
    out
}

fn escape_into(out: &mut String, text: &str) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
}

/// Attribute list for an element: `(name, unescaped value)` pairs.
pub type Attrs<'a> = &'a [(&'static str, &'a str)];

/// An HTML document under construction.
#[derive(Debug, Default)]
pub struct Markup {
    buf: String,
    open: Vec<&'static str>,
}

impl Markup {
    /// Start an HTML5 document.
    pub fn document() -> Self {
        let mut markup = Self::default();
        markup.buf.push_str("<!DOCTYPE html>\n");
        markup
    }

    /// Open an element; it must be closed with [`Markup::close`].
    pub fn open(&mut self, tag: &'static str, attrs: Attrs<'_>) -> &mut Self {
        self.start_tag(tag, attrs);
        self.open.push(tag);
        self
    }

    /// Close the most recently opened element.
    pub fn close(&mut self) -> &mut Self {
        if let Some(tag) = self.open.pop() {
            let _ = writeln!(self.buf, "</{tag}>");
        }
        self
    }

    /// An element with escaped text content.
    pub fn element(&mut self, tag: &'static str, attrs: Attrs<'_>, text: &str) -> &mut Self {
        self.start_tag(tag, attrs);
        escape_into(&mut self.buf, text);
        let _ = writeln!(self.buf, "</{tag}>");
        self
    }

    /// A void element such as `<hr>` or `<input>`.
    pub fn void(&mut self, tag: &'static str, attrs: Attrs<'_>) -> &mut Self {
        self.start_tag(tag, attrs);
        self.buf.push('\n');
        self
    }

    /// Close any elements left open and return the document.
    pub fn finish(mut self) -> String {
        while !self.open.is_empty() {
            self.close();
        }
        self.buf
    }

    fn start_tag(&mut self, tag: &'static str, attrs: Attrs<'_>) {
        self.buf.push('<');
        self.buf.push_str(tag);
        for (name, value) in attrs {
            let _ = write!(self.buf, " {name}=\"");
            escape_into(&mut self.buf, value);
            self.buf.push('"');
        }
        self.buf.push('>');
    }
}
