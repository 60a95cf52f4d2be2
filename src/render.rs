//! Server-rendered form and results table.

use crate::export::{self, COLUMNS};
use crate::models::{DataSource, ExportFormat, ProductRecord, RunReport};
use base64::{Engine, engine::general_purpose::STANDARD};
use std::fmt::Write as _;
use tracing::warn;

const STYLE: &str = r#"
body { font-family: system-ui, sans-serif; margin: 2rem; color: #222; }
textarea { width: 100%; max-width: 40rem; height: 12rem; font-family: monospace; }
table { border-collapse: collapse; margin-top: 1rem; font-size: 0.9rem; }
th, td { border: 1px solid #ccc; padding: 0.3rem 0.5rem; vertical-align: top; }
th { background: #f3f3f3; }
td.error { color: #a40000; font-style: italic; }
.notice { background: #fdecea; border: 1px solid #f5c2c0; padding: 0.75rem; margin: 1rem 0; }
.info { background: #e8f1fb; border: 1px solid #b9d4f2; padding: 0.75rem; margin: 1rem 0; }
.downloads a { margin-right: 1rem; }
"#;

fn layout(body: &str) -> String {
    format!(
        "<!doctype html>\n<html>\n<head>\n  <meta charset='utf-8'/>\n  <title>Target PDP Scraper</title>\n  <style>{STYLE}</style>\n</head>\n<body>\n<h1>Target PDP Scraper</h1>\n{body}\n</body>\n</html>"
    )
}

pub fn form_page(info: Option<&str>, tcins: &str, source: DataSource, format: ExportFormat) -> String {
    let mut body = String::new();
    if let Some(message) = info {
        let _ = write!(body, "<div class='info'>{}</div>", escape_html(message));
    }
    body.push_str(&form(tcins, source, format));
    layout(&body)
}

fn form(tcins: &str, source: DataSource, format: ExportFormat) -> String {
    let option = |value: &str, label: &str, selected: bool| {
        format!(
            "<option value='{value}'{}>{label}</option>",
            if selected { " selected" } else { "" }
        )
    };
    let sources = [DataSource::Page, DataSource::Aggregation]
        .iter()
        .map(|s| option(s.as_str(), s.label(), *s == source))
        .collect::<String>();
    let formats = [ExportFormat::Csv, ExportFormat::Excel]
        .iter()
        .map(|f| option(f.as_str(), f.label(), *f == format))
        .collect::<String>();
    format!(
        "<form method='post' action='/scrape'>\n\
         <label for='tcins'>Paste TCINs (one per line):</label><br/>\n\
         <textarea id='tcins' name='tcins'>{}</textarea><br/>\n\
         <label>Source <select name='source'>{sources}</select></label>\n\
         <label>Export <select name='format'>{formats}</select></label>\n\
         <button type='submit'>Scrape Target Products</button>\n\
         </form>",
        escape_html(tcins)
    )
}

pub fn results_page(report: &RunReport, tcins: &str, format: ExportFormat) -> String {
    let mut body = String::new();
    if let Some(notice) = &report.notice {
        let _ = write!(body, "<div class='notice'><strong>{}</strong></div>", escape_html(notice));
    }
    let _ = write!(
        body,
        "<p>{} rows from {} ({} ok, {} failed) in {} ms.</p>",
        report.rows.len(),
        report.source.label(),
        report.succeeded,
        report.failed,
        report.elapsed_ms
    );
    body.push_str(&downloads(report, format));
    body.push_str(&table(&report.rows));
    body.push_str("<hr/>");
    body.push_str(&form(tcins, report.source, format));
    layout(&body)
}

/// Page runs offer both formats; aggregation runs offer the selected one.
fn offered_formats(source: DataSource, selected: ExportFormat) -> Vec<ExportFormat> {
    match source {
        DataSource::Page => vec![ExportFormat::Csv, ExportFormat::Excel],
        DataSource::Aggregation => vec![selected],
    }
}

fn downloads(report: &RunReport, selected: ExportFormat) -> String {
    let mut out = String::from("<div class='downloads'>");
    for format in offered_formats(report.source, selected) {
        match export::export(&report.rows, format) {
            Ok(bytes) => {
                let _ = write!(
                    out,
                    "<a download='{name}' href='data:{mime};base64,{data}'>Download {label}</a>",
                    name = format.file_name(),
                    mime = format.content_type().split(';').next().unwrap_or_default(),
                    data = STANDARD.encode(bytes),
                    label = format.label(),
                );
            }
            Err(err) => {
                warn!(target = "tcin.api", error = %err, "export_failed");
                let _ = write!(
                    out,
                    "<span class='notice'>{} export unavailable: {}</span>",
                    format.label(),
                    escape_html(&err.to_string())
                );
            }
        }
    }
    out.push_str("</div>");
    out
}

fn table(rows: &[ProductRecord]) -> String {
    let mut out = String::from("<table>\n<thead><tr>");
    for name in COLUMNS {
        let _ = write!(out, "<th>{name}</th>");
    }
    out.push_str("</tr></thead>\n<tbody>\n");
    for row in rows {
        let _ = write!(out, "<tr><td>{}</td>", escape_html(&row.identifier));
        if let Some(error) = &row.error {
            // Failure rows show the error in place of the data columns.
            let _ = write!(
                out,
                "<td class='error' colspan='{}'>{}</td>",
                COLUMNS.len() - 1,
                escape_html(error)
            );
        } else {
            let text = |v: &Option<String>| v.as_deref().map(escape_html).unwrap_or_default();
            let num = |v: Option<f64>| v.map(|n| n.to_string()).unwrap_or_default();
            let images = row
                .image_urls
                .iter()
                .map(|url| {
                    let url = escape_html(url);
                    format!("<a href='{url}'>{url}</a>")
                })
                .collect::<Vec<_>>()
                .join("<br/>");
            let _ = write!(
                out,
                "<td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td></td>",
                text(&row.title),
                text(&row.brand),
                num(row.regular_price),
                num(row.sale_price),
                row.review_count.map(|c| c.to_string()).unwrap_or_default(),
                num(row.star_rating),
                images,
            );
        }
        out.push_str("</tr>\n");
    }
    out.push_str("</tbody>\n</table>");
    out
}

pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn report(source: DataSource, rows: Vec<ProductRecord>, notice: Option<&str>) -> RunReport {
        let failed = rows.iter().filter(|r| r.is_failure()).count();
        RunReport {
            run_id: "run".into(),
            source,
            generated_at: Utc::now(),
            elapsed_ms: 3,
            succeeded: rows.len() - failed,
            failed,
            notice: notice.map(str::to_string),
            rows,
        }
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(
            escape_html(r#"<a href="x">&'"#),
            "&lt;a href=&quot;x&quot;&gt;&amp;&#39;"
        );
    }

    #[test]
    fn page_results_offer_both_downloads() {
        let html = results_page(
            &report(DataSource::Page, vec![ProductRecord::empty("1")], None),
            "1",
            ExportFormat::Csv,
        );
        assert!(html.contains("download='target_product_data.csv'"));
        assert!(html.contains("download='target_product_data.xlsx'"));
        assert!(html.contains("data:text/csv;base64,"));
    }

    #[test]
    fn aggregation_results_offer_selected_download_only() {
        let html = results_page(
            &report(DataSource::Aggregation, vec![ProductRecord::empty("1")], None),
            "1",
            ExportFormat::Excel,
        );
        assert!(html.contains("target_product_data.xlsx"));
        assert!(!html.contains("target_product_data.csv"));
    }

    #[test]
    fn failure_rows_show_error_in_place_of_data() {
        let rows = vec![ProductRecord::failure("9", "request timed out after 10000ms: <u>")];
        let html = results_page(&report(DataSource::Page, rows, Some("nothing")), "9", ExportFormat::Csv);
        assert!(html.contains("<td class='error' colspan='8'>request timed out after 10000ms: &lt;u&gt;</td>"));
        assert!(html.contains("<div class='notice'><strong>nothing</strong></div>"));
    }

    #[test]
    fn form_keeps_previous_input_and_selection() {
        let html = form_page(
            Some("Please enter TCINs to start scraping."),
            "1\n<2>",
            DataSource::Aggregation,
            ExportFormat::Excel,
        );
        assert!(html.contains("<div class='info'>Please enter TCINs to start scraping.</div>"));
        assert!(html.contains("1\n&lt;2&gt;</textarea>"));
        assert!(html.contains("<option value='aggregation' selected>"));
        assert!(html.contains("<option value='excel' selected>"));
    }
}
