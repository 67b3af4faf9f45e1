//! Rendering collaborator and annotation formatting.

use std::io::Write;

use crate::annotation::Annotation;

/// Receives each revealed annotation exactly once, in reveal order.
pub trait Renderer {
    fn render(&mut self, annotation: &Annotation);
}

impl<F> Renderer for F
where
    F: FnMut(&Annotation),
{
    fn render(&mut self, annotation: &Annotation) {
        self(annotation)
    }
}

/// Format a timeline offset as `mm:ss`.
///
/// Minutes wrap at the hour, so 1:02:03 renders as `02:03`.
pub fn format_timestamp(at_ms: u64) -> String {
    let total_secs = at_ms / 1000;
    format!("{:02}:{:02}", (total_secs / 60) % 60, total_secs % 60)
}

/// Parse `ss`, `mm:ss` or `h:mm:ss` into milliseconds.
pub fn parse_timestamp(input: &str) -> Result<u64, String> {
    let parts: Vec<&str> = input.trim().split(':').collect();
    if parts.is_empty() || parts.len() > 3 {
        return Err(format!("invalid timestamp: {input}"));
    }

    let mut secs: u64 = 0;
    for (i, part) in parts.iter().enumerate() {
        let value: u64 = part
            .parse()
            .map_err(|_| format!("invalid timestamp: {input}"))?;
        // Everything after the leading field is base 60
        if i > 0 && value >= 60 {
            return Err(format!("invalid timestamp: {input}"));
        }
        secs = secs
            .checked_mul(60)
            .and_then(|s| s.checked_add(value))
            .ok_or_else(|| format!("timestamp out of range: {input}"))?;
    }
    secs.checked_mul(1000)
        .ok_or_else(|| format!("timestamp out of range: {input}"))
}

/// Escape text for inclusion in HTML content or attribute values.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Seek-link markup for an annotation. Clicking it should seek the player
/// to the `data-seek` offset.
pub fn annotation_html(annotation: &Annotation) -> String {
    format!(
        "<a href=\"#\" data-seek=\"{}\">[{}] <b>{}</b>: {}</a>",
        annotation.at,
        format_timestamp(annotation.at),
        escape_html(&annotation.author.username),
        escape_html(&annotation.body),
    )
}

/// One `[mm:ss] username: body` line per annotation.
pub struct LineRenderer<W: Write> {
    out: W,
    rendered: usize,
}

impl<W: Write> LineRenderer<W> {
    pub fn new(out: W) -> Self {
        Self { out, rendered: 0 }
    }

    /// Number of annotations written so far.
    pub fn rendered(&self) -> usize {
        self.rendered
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Renderer for LineRenderer<W> {
    fn render(&mut self, annotation: &Annotation) {
        let line = format!(
            "[{}] {}: {}",
            format_timestamp(annotation.at),
            annotation.author.username,
            annotation.body
        );
        match writeln!(self.out, "{line}").and_then(|_| self.out.flush()) {
            Ok(()) => self.rendered += 1,
            Err(e) => log::warn!("Failed to render annotation {}: {e}", annotation.id),
        }
    }
}
