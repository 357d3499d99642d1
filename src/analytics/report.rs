//! Analysis report rendering: self-contained HTML plus a PDF seam.
//!
//! The HTML document references no external resources, so any
//! HTML-to-PDF engine can render it offline. The engine itself sits
//! behind [`PdfRenderer`]; the built-in [`TextPdfRenderer`] emits a
//! minimal single-page text PDF so the publish endpoint works without
//! an external renderer installed.

use crate::core::error::{CanvassError, Result};
use crate::core::model::Analysis;

/// Escapes text for embedding in HTML.
#[must_use]
pub fn html_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
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

/// Renders the self-contained HTML document for an analysis: title,
/// author, date, description, then one section per saved plot record.
#[must_use]
pub fn render_html(analysis: &Analysis) -> String {
    let mut plots_html = String::new();
    for plot in &analysis.plots {
        let title = plot
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or("Untitled");
        let description = plot
            .get("description")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        plots_html.push_str(&format!(
            "<div><h3>{}</h3><p>{}</p></div>\n",
            html_escape(title),
            html_escape(description)
        ));
    }

    format!(
        "<html>\n<head><title>{title}</title></head>\n<body>\n\
         <h1>{title}</h1>\n\
         <p><strong>Author:</strong> {author}</p>\n\
         <p><strong>Date:</strong> {date}</p>\n\
         <p>{description}</p>\n\
         <h2>Plots</h2>\n\
         {plots_html}</body>\n</html>\n",
        title = html_escape(&analysis.title),
        author = html_escape(&analysis.author_name),
        date = analysis.date.format("%Y-%m-%d"),
        description = html_escape(&analysis.description),
    )
}

/// Converts a self-contained HTML string into PDF bytes.
pub trait PdfRenderer: Send + Sync {
    /// Renders `html` to a PDF document.
    ///
    /// # Errors
    /// Returns a system error when rendering fails.
    fn render(&self, html: &str) -> Result<Vec<u8>>;
}

/// Built-in renderer: strips markup and lays the text out on a single
/// A4 page with a standard base font. Good enough for a text report;
/// swap in a real engine behind the same trait for styled output.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextPdfRenderer;

const PAGE_WIDTH: u32 = 595;
const PAGE_HEIGHT: u32 = 842;
const MARGIN: u32 = 50;
const LEADING: u32 = 14;

impl PdfRenderer for TextPdfRenderer {
    fn render(&self, html: &str) -> Result<Vec<u8>> {
        let lines = text_lines(html);
        let max_lines = ((PAGE_HEIGHT - 2 * MARGIN) / LEADING) as usize;

        let mut content = String::new();
        content.push_str(&format!(
            "BT /F1 11 Tf {MARGIN} {} Td {LEADING} TL\n",
            PAGE_HEIGHT - MARGIN
        ));
        for line in lines.iter().take(max_lines) {
            content.push_str(&format!("({}) Tj T*\n", pdf_escape(line)));
        }
        content.push_str("ET\n");

        Ok(assemble_pdf(&content))
    }
}

/// Strips tags and decodes the entities [`html_escape`] produces,
/// yielding the report's visible text lines.
fn text_lines(html: &str) -> Vec<String> {
    let mut text = String::new();
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => {
                in_tag = true;
                // Block-level boundaries become line breaks.
                if !text.ends_with('\n') {
                    text.push('\n');
                }
            }
            '>' => in_tag = false,
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }

    text = text
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");

    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Escapes a line for a PDF literal string. Characters outside Latin-1
/// are replaced; the base font cannot encode them.
fn pdf_escape(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    for c in line.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '(' => out.push_str("\\("),
            ')' => out.push_str("\\)"),
            c if (c as u32) < 256 => out.push(c),
            _ => out.push('?'),
        }
    }
    out
}

/// Assembles a one-page PDF around the given content stream.
fn assemble_pdf(content: &str) -> Vec<u8> {
    let objects = [
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
        format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {PAGE_WIDTH} {PAGE_HEIGHT}] \
             /Resources << /Font << /F1 4 0 R >> >> /Contents 5 0 R >>"
        ),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string(),
        format!(
            "<< /Length {} >>\nstream\n{content}endstream",
            content.len()
        ),
    ];

    let mut pdf: Vec<u8> = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(pdf.len());
        pdf.extend_from_slice(format!("{} 0 obj\n{body}\nendobj\n", i + 1).as_bytes());
    }

    let xref_offset = pdf.len();
    pdf.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
    pdf.extend_from_slice(b"0000000000 65535 f \n");
    for offset in offsets {
        pdf.extend_from_slice(format!("{offset:010} 00000 n \n").as_bytes());
    }
    pdf.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref_offset}\n%%EOF\n",
            objects.len() + 1
        )
        .as_bytes(),
    );
    pdf
}

/// Renders an analysis straight to PDF bytes with the given renderer.
///
/// # Errors
/// Propagates renderer failures as system errors.
pub fn render_pdf(analysis: &Analysis, renderer: &dyn PdfRenderer) -> Result<Vec<u8>> {
    let html = render_html(analysis);
    renderer.render(&html).map_err(|e| {
        CanvassError::system("pdf_render_failed", e.to_string(), "analytics:report")
    })
}
