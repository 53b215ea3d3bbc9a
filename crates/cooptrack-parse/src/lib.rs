//! Pure parsing components for the Coop Tracker ingestion pipeline: text
//! normalization, relative-age parsing, heuristic table extraction and
//! record building. Nothing in this crate performs I/O or touches shared
//! state; every function is independently testable.

use std::collections::HashSet;

use cooptrack_core::ParsedJob;
use pulldown_cmark::{html, Options, Parser};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use url::Url;

pub const CRATE_NAME: &str = "cooptrack-parse";

/// Glyph standing in for "same company as previous row" in the source table.
pub const CONTINUATION_MARKER: &str = "↳";

/// Fallback category when no usable section heading precedes a table.
pub const DEFAULT_CATEGORY: &str = "Software Engineering";

/// Boilerplate suffix the source appends to section headings.
const CATEGORY_SUFFIX: &str = "internship roles";

/// Decorative symbols the source sprinkles into cells.
const DECORATIVE_GLYPHS: &[char] = &['🔥', '🔒', '🎓', '🛂'];

fn is_stripped_symbol(c: char) -> bool {
    // Regional indicators cover flag emoji such as 🇺🇸; U+FE0F is the emoji
    // variation selector that often trails them.
    DECORATIVE_GLYPHS.contains(&c) || ('\u{1F1E6}'..='\u{1F1FF}').contains(&c) || c == '\u{FE0F}'
}

/// Strips decorative symbols, collapses whitespace runs to a single space
/// and trims. Never fails; empty input yields an empty string.
pub fn normalize(raw: &str) -> String {
    raw.chars()
        .map(|c| if is_stripped_symbol(c) { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Replaces every tag in an HTML fragment with a space, keeping text content.
fn strip_tags(fragment: &str) -> String {
    let mut out = String::with_capacity(fragment.len());
    let mut in_tag = false;
    for c in fragment.chars() {
        match c {
            '<' => {
                in_tag = true;
                out.push(' ');
            }
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

fn replace_breaks(fragment: &str) -> String {
    let mut out = String::with_capacity(fragment.len());
    let lower = fragment.to_ascii_lowercase();
    let bytes = lower.as_bytes();
    let mut i = 0;
    while i < fragment.len() {
        if lower[i..].starts_with("<br") {
            // Consume through the closing '>' of the br tag.
            let end = bytes[i..]
                .iter()
                .position(|&b| b == b'>')
                .map(|p| i + p + 1)
                .unwrap_or(fragment.len());
            out.push_str("; ");
            i = end;
        } else {
            let c = fragment[i..].chars().next().unwrap_or('\u{FFFD}');
            out.push(c);
            i += c.len_utf8();
        }
    }
    out
}

/// Normalizes a location cell, preserving multi-entry semantics: explicit
/// line breaks in the markup become a `"; "` separator so that
/// "New York; Remote" stays distinguishable from "New York Remote".
pub fn normalize_location(cell_html: &str, cell_text: &str) -> String {
    if cell_html.to_ascii_lowercase().contains("<br") {
        return normalize(&strip_tags(&replace_breaks(cell_html)));
    }

    let mut with_separators = String::with_capacity(cell_text.len());
    let mut prev_was_newline = false;
    for c in cell_text.chars() {
        if c == '\n' {
            if !prev_was_newline {
                with_separators.push_str("; ");
            }
            prev_was_newline = true;
        } else {
            with_separators.push(c);
            prev_was_newline = false;
        }
    }
    normalize(&with_separators)
}

/// Converts a relative-age token like "3d 4h" into minutes.
///
/// Accepts space-separated `<integer><unit>` groups with unit d/h/m
/// (case-insensitive) and an optional trailing `+`. Unrecognized trailing
/// characters within an otherwise-valid group are ignored rather than
/// failing the whole token; upstream formatting is too unreliable for
/// strictness. Returns `None` when no group parses at all, so "unparseable"
/// stays distinct from "zero minutes".
pub fn parse_age(token: &str) -> Option<i64> {
    let token = token.trim().trim_end_matches('+');
    let mut total: i64 = 0;
    let mut matched = false;

    for group in token.split_whitespace() {
        let digits: String = group.chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            continue;
        }
        let Ok(value) = digits.parse::<i64>() else {
            continue;
        };
        let unit = group[digits.len()..].chars().next();
        let per_unit: i64 = match unit.map(|c| c.to_ascii_lowercase()) {
            Some('d') => 1440,
            Some('h') => 60,
            Some('m') => 1,
            _ => continue,
        };
        // An absurdly large value would overflow; treat the group like any
        // other malformed one and skip it.
        let Some(scaled) = value.checked_mul(per_unit) else {
            continue;
        };
        let Some(next) = total.checked_add(scaled) else {
            continue;
        };
        total = next;
        matched = true;
    }

    matched.then_some(total)
}

/// Semantic meaning of a source table column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SemanticColumn {
    Company,
    Role,
    Location,
    Application,
    Age,
}

fn is_company_header(h: &str) -> bool {
    h == "company"
}

fn is_role_header(h: &str) -> bool {
    h == "role"
}

fn is_location_header(h: &str) -> bool {
    h == "location"
}

fn is_application_header(h: &str) -> bool {
    h.contains("application") || h.contains("apply") || h.contains("link")
}

fn is_age_header(h: &str) -> bool {
    h == "age"
}

/// Header classification table. Column detection is keyed on header text,
/// never on position, so upstream column reordering does not break
/// extraction; a new header variant is a one-line change here.
pub const HEADER_PREDICATES: &[(SemanticColumn, fn(&str) -> bool)] = &[
    (SemanticColumn::Company, is_company_header),
    (SemanticColumn::Role, is_role_header),
    (SemanticColumn::Location, is_location_header),
    (SemanticColumn::Application, is_application_header),
    (SemanticColumn::Age, is_age_header),
];

/// Positional indices of the semantic columns within one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnMap {
    pub company: usize,
    pub role: usize,
    pub location: usize,
    pub application: usize,
    pub age: Option<usize>,
}

fn find_column(normalized: &[String], column: SemanticColumn) -> Option<usize> {
    let predicate = HEADER_PREDICATES
        .iter()
        .find(|(c, _)| *c == column)
        .map(|(_, p)| *p)?;
    normalized.iter().position(|h| predicate(h))
}

/// Resolves semantic column indices from header labels. Returns `None`
/// unless company, role, location and application all resolve; such tables
/// are not job tables and are skipped silently.
pub fn resolve_columns(headers: &[String]) -> Option<ColumnMap> {
    let normalized: Vec<String> = headers
        .iter()
        .map(|h| normalize(h).to_lowercase())
        .collect();

    Some(ColumnMap {
        company: find_column(&normalized, SemanticColumn::Company)?,
        role: find_column(&normalized, SemanticColumn::Role)?,
        location: find_column(&normalized, SemanticColumn::Location)?,
        application: find_column(&normalized, SemanticColumn::Application)?,
        age: find_column(&normalized, SemanticColumn::Age),
    })
}

/// One table cell: visible text plus inner markup (needed for line-break
/// detection in location cells and anchor extraction in application cells).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCell {
    pub text: String,
    pub html: String,
}

pub type RawRow = Vec<RawCell>;

/// A classified job table with its header labels, category label derived
/// from the nearest preceding section heading, and raw row data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableContext {
    pub headers: Vec<String>,
    pub category: String,
    pub rows: Vec<RawRow>,
}

fn static_selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector is valid")
}

fn clean_category(heading: &str) -> String {
    let cleaned = normalize(heading).replace(',', "");
    let lowered = cleaned.to_lowercase();
    let trimmed = if let Some(pos) = lowered.rfind(CATEGORY_SUFFIX) {
        if lowered[pos..].trim_end() == CATEGORY_SUFFIX {
            cleaned[..pos].trim_end().to_string()
        } else {
            cleaned
        }
    } else {
        cleaned
    };
    if trimmed.is_empty() {
        DEFAULT_CATEGORY.to_string()
    } else {
        trimmed
    }
}

fn table_headers(table: ElementRef<'_>) -> Vec<String> {
    let thead_th = static_selector("thead tr th");
    let headers: Vec<String> = table
        .select(&thead_th)
        .map(|th| th.text().collect::<String>())
        .collect();
    if !headers.is_empty() {
        return headers;
    }
    // Header-less markup: fall back to any th cells in the first row.
    let any_th = static_selector("tr th");
    table
        .select(&any_th)
        .map(|th| th.text().collect::<String>())
        .collect()
}

fn table_rows(table: ElementRef<'_>) -> Vec<RawRow> {
    let body_tr = static_selector("tbody tr");
    let td = static_selector("td");
    table
        .select(&body_tr)
        .filter_map(|tr| {
            let cells: RawRow = tr
                .select(&td)
                .map(|cell| RawCell {
                    text: cell.text().collect::<String>(),
                    html: cell.inner_html(),
                })
                .collect();
            // Rows with no td cells are header or separator rows.
            if cells.is_empty() {
                None
            } else {
                Some(cells)
            }
        })
        .collect()
}

/// Walks the rendered document in order, classifying each table by its
/// header labels and attaching the nearest preceding h2/h3 heading as the
/// category label. Non-job tables (tables of contents, legend tables) are
/// skipped without error.
pub fn extract_job_tables(html: &str) -> Vec<TableContext> {
    let document = Html::parse_document(html);
    let mut current_category = DEFAULT_CATEGORY.to_string();
    let mut tables = Vec::new();

    for node in document.root_element().descendants() {
        let Some(element) = ElementRef::wrap(node) else {
            continue;
        };
        match element.value().name() {
            "h2" | "h3" => {
                current_category = clean_category(&element.text().collect::<String>());
            }
            "table" => {
                let headers = table_headers(element);
                if headers.is_empty() || resolve_columns(&headers).is_none() {
                    continue;
                }
                tables.push(TableContext {
                    headers,
                    category: current_category.clone(),
                    rows: table_rows(element),
                });
            }
            _ => {}
        }
    }

    tables
}

/// Renders a Markdown payload to HTML with table support.
pub fn render_markdown(text: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    let parser = Parser::new_ext(text, options);
    let mut out = String::with_capacity(text.len() * 2);
    html::push_html(&mut out, parser);
    out
}

/// Accepts either raw HTML or Markdown text and yields HTML. Payloads that
/// do not already look like markup are rendered as Markdown.
pub fn document_to_html(payload: &str) -> String {
    if payload.trim_start().starts_with('<') {
        payload.to_string()
    } else {
        render_markdown(payload)
    }
}

/// Row-level content filters applied while building records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParseOptions {
    /// Rows whose raw full text contains any of these markers are
    /// suppressed, e.g. glyphs the source uses to flag sponsorship or
    /// citizenship requirements. Empty by default.
    pub exclude_markers: Vec<String>,
}

fn first_absolute_link(cell_html: &str) -> Option<String> {
    let fragment = Html::parse_fragment(cell_html);
    let anchor = static_selector("a[href]");
    fragment
        .select(&anchor)
        .filter_map(|a| a.value().attr("href"))
        .map(str::trim)
        .find(|href| {
            if !(href.starts_with("http://") || href.starts_with("https://")) {
                return false;
            }
            Url::parse(href).is_ok()
        })
        .map(ToString::to_string)
}

fn row_matches_exclusion(row: &RawRow, options: &ParseOptions) -> bool {
    if options.exclude_markers.is_empty() {
        return false;
    }
    let full_text: String = row.iter().map(|cell| cell.text.as_str()).collect();
    options
        .exclude_markers
        .iter()
        .any(|marker| !marker.is_empty() && full_text.contains(marker))
}

/// Builds deduplicated [`ParsedJob`] records from extracted job tables.
///
/// Rows missing a mandatory field (company, role, url) are dropped without
/// error; the pipeline degrades by omission and never raises parse errors
/// for individual malformed rows. Deduplication is by posting URL across
/// the whole document, first occurrence wins; the same posting can appear
/// under two section headings.
pub fn build_records(tables: &[TableContext], options: &ParseOptions) -> Vec<ParsedJob> {
    let mut jobs = Vec::new();
    let mut seen_urls: HashSet<String> = HashSet::new();

    for table in tables {
        let Some(columns) = resolve_columns(&table.headers) else {
            continue;
        };
        // Continuation-marker state is scoped to one table and never leaks
        // across tables or pulls.
        let mut last_company = String::new();

        for row in &table.rows {
            if row_matches_exclusion(row, options) {
                continue;
            }

            let Some(company_cell) = row.get(columns.company) else {
                continue;
            };
            let mut company = normalize(&company_cell.text);
            if company == CONTINUATION_MARKER {
                company = last_company.clone();
            }
            if company.is_empty() {
                continue;
            }
            last_company = company.clone();

            let role = row
                .get(columns.role)
                .map(|cell| normalize(&cell.text))
                .unwrap_or_default();
            if role.is_empty() {
                continue;
            }

            let location = row
                .get(columns.location)
                .map(|cell| normalize_location(&cell.html, &cell.text))
                .unwrap_or_default();

            let Some(url) = row
                .get(columns.application)
                .and_then(|cell| first_absolute_link(&cell.html))
            else {
                continue;
            };

            let age = columns
                .age
                .and_then(|idx| row.get(idx))
                .map(|cell| normalize(&cell.text))
                .filter(|token| !token.is_empty());
            let age_minutes = age.as_deref().and_then(parse_age);

            if !seen_urls.insert(url.clone()) {
                continue;
            }

            jobs.push(ParsedJob {
                company,
                role,
                location,
                category: table.category.clone(),
                url,
                age,
                age_minutes,
            });
        }
    }

    jobs
}

/// Convenience wrapper: render, extract and build in one call.
pub fn parse_document(payload: &str, options: &ParseOptions) -> Vec<ParsedJob> {
    let html = document_to_html(payload);
    let tables = extract_job_tables(&html);
    build_records(&tables, options)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_HTML: &str = r##"
<html><body>
<h2>Table of Contents</h2>
<table>
  <thead><tr><th>Section</th><th>Link</th></tr></thead>
  <tbody><tr><td>Roles</td><td><a href="#roles">jump</a></td></tr></tbody>
</table>
<h2>Software Engineering Internship Roles</h2>
<table>
  <thead><tr><th>Company</th><th>Role</th><th>Location</th><th>Age</th><th>Application/Link</th></tr></thead>
  <tbody>
    <tr>
      <td>Acme 🔥</td><td>SWE Intern</td><td>New York<br/>Remote</td><td>3d</td>
      <td><a href="https://jobs.acme.example/1">Apply</a></td>
    </tr>
    <tr>
      <td>↳</td><td>Backend Intern</td><td>San Francisco, CA</td><td>5h</td>
      <td><a href="https://jobs.acme.example/2">Apply</a></td>
    </tr>
    <tr>
      <td>Globex</td><td></td><td>Austin, TX</td><td>1d</td>
      <td><a href="https://jobs.globex.example/3">Apply</a></td>
    </tr>
    <tr>
      <td>Initech</td><td>QA Intern</td><td>Remote</td><td>2d</td>
      <td><a href="/relative/only">Apply</a></td>
    </tr>
  </tbody>
</table>
<h3>Quant, Trading Internship Roles</h3>
<table>
  <thead><tr><th>Location</th><th>Company</th><th>Role</th><th>Apply</th></tr></thead>
  <tbody>
    <tr>
      <td>Chicago, IL</td><td>Hooli</td><td>Quant Intern</td>
      <td><a href="https://jobs.hooli.example/9">Apply</a></td>
    </tr>
    <tr>
      <td>NYC</td><td>Hooli</td><td>Quant Intern (Repost)</td>
      <td><a href="https://jobs.hooli.example/9">Apply</a></td>
    </tr>
  </tbody>
</table>
</body></html>
"##;

    #[test]
    fn normalize_strips_glyphs_and_collapses_whitespace() {
        assert_eq!(normalize("  Acme 🔥   Corp 🇺🇸 "), "Acme Corp");
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("🛂"), "");
    }

    #[test]
    fn location_breaks_become_separators() {
        assert_eq!(
            normalize_location("New York<br/>Remote", "New YorkRemote"),
            "New York; Remote"
        );
        assert_eq!(
            normalize_location("Boston<BR >Seattle", "Boston Seattle"),
            "Boston; Seattle"
        );
        assert_eq!(
            normalize_location("Plain City", "Plain City"),
            "Plain City"
        );
        assert_eq!(
            normalize_location("", "New York\nRemote"),
            "New York; Remote"
        );
    }

    #[test]
    fn age_tokens_convert_to_minutes() {
        assert_eq!(parse_age("3d 4h"), Some(3 * 1440 + 4 * 60));
        assert_eq!(parse_age("5d+"), Some(7200));
        assert_eq!(parse_age("45m"), Some(45));
        assert_eq!(parse_age("2D"), Some(2880));
        assert_eq!(parse_age("garbage"), None);
        assert_eq!(parse_age(""), None);
    }

    #[test]
    fn age_groups_are_lenient_per_group() {
        // A malformed second group is skipped, not fatal.
        assert_eq!(parse_age("3d xyz"), Some(4320));
        // Trailing junk inside a group is ignored once the unit matched.
        assert_eq!(parse_age("3dish"), Some(4320));
    }

    #[test]
    fn age_groups_too_large_to_scale_are_skipped() {
        // 1e16 days in minutes exceeds i64; the group is dropped like any
        // other malformed one instead of panicking or wrapping.
        assert_eq!(parse_age("9999999999999999d"), None);
        assert_eq!(parse_age("9999999999999999d 2h"), Some(120));
    }

    #[test]
    fn non_job_tables_are_skipped() {
        let tables = extract_job_tables(SAMPLE_HTML);
        assert_eq!(tables.len(), 2);
    }

    #[test]
    fn categories_come_from_cleaned_headings() {
        let tables = extract_job_tables(SAMPLE_HTML);
        assert_eq!(tables[0].category, "Software Engineering");
        assert_eq!(tables[1].category, "Quant Trading");
    }

    #[test]
    fn heading_without_suffix_and_missing_heading_fall_back() {
        assert_eq!(clean_category("Internship Roles"), DEFAULT_CATEGORY);
        assert_eq!(clean_category("   "), DEFAULT_CATEGORY);
        assert_eq!(clean_category("Hardware Engineering"), "Hardware Engineering");
    }

    #[test]
    fn columns_resolve_by_header_text_not_position() {
        let headers: Vec<String> = ["Location", "Company", "Role", "Apply"]
            .iter()
            .map(ToString::to_string)
            .collect();
        let columns = resolve_columns(&headers).unwrap();
        assert_eq!(columns.location, 0);
        assert_eq!(columns.company, 1);
        assert_eq!(columns.role, 2);
        assert_eq!(columns.application, 3);
        assert_eq!(columns.age, None);
    }

    #[test]
    fn tables_missing_a_mandatory_column_do_not_classify() {
        let headers: Vec<String> = ["Section", "Link"].iter().map(ToString::to_string).collect();
        assert!(resolve_columns(&headers).is_none());
    }

    #[test]
    fn continuation_marker_inherits_previous_company() {
        let jobs = parse_document(SAMPLE_HTML, &ParseOptions::default());
        let second = jobs.iter().find(|j| j.role == "Backend Intern").unwrap();
        assert_eq!(second.company, "Acme");
    }

    #[test]
    fn rows_missing_mandatory_fields_are_dropped_silently() {
        let jobs = parse_document(SAMPLE_HTML, &ParseOptions::default());
        // Globex row has an empty role; Initech row has no absolute link.
        assert!(!jobs.iter().any(|j| j.company == "Globex"));
        assert!(!jobs.iter().any(|j| j.company == "Initech"));
    }

    #[test]
    fn duplicate_urls_keep_first_occurrence() {
        let jobs = parse_document(SAMPLE_HTML, &ParseOptions::default());
        let hooli: Vec<_> = jobs.iter().filter(|j| j.company == "Hooli").collect();
        assert_eq!(hooli.len(), 1);
        assert_eq!(hooli[0].role, "Quant Intern");
    }

    #[test]
    fn age_cells_populate_both_token_and_minutes() {
        let jobs = parse_document(SAMPLE_HTML, &ParseOptions::default());
        let first = jobs.iter().find(|j| j.role == "SWE Intern").unwrap();
        assert_eq!(first.age.as_deref(), Some("3d"));
        assert_eq!(first.age_minutes, Some(4320));
        // The reordered quant table has no age column.
        let quant = jobs.iter().find(|j| j.company == "Hooli").unwrap();
        assert_eq!(quant.age, None);
        assert_eq!(quant.age_minutes, None);
    }

    #[test]
    fn location_cell_with_breaks_is_multi_entry() {
        let jobs = parse_document(SAMPLE_HTML, &ParseOptions::default());
        let first = jobs.iter().find(|j| j.role == "SWE Intern").unwrap();
        assert_eq!(first.location, "New York; Remote");
    }

    #[test]
    fn exclusion_markers_suppress_flagged_rows() {
        let html = r#"
<table>
  <thead><tr><th>Company</th><th>Role</th><th>Location</th><th>Application</th></tr></thead>
  <tbody>
    <tr><td>Open Co</td><td>Intern</td><td>Remote</td>
        <td><a href="https://jobs.open.example/1">Apply</a></td></tr>
    <tr><td>Visa Co 🛂</td><td>Intern</td><td>Remote</td>
        <td><a href="https://jobs.visa.example/2">Apply</a></td></tr>
  </tbody>
</table>"#;
        let options = ParseOptions {
            exclude_markers: vec!["🛂".to_string()],
        };
        let jobs = parse_document(html, &options);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].company, "Open Co");
    }

    #[test]
    fn markdown_payloads_render_then_extract() {
        let markdown = "\
## Software Engineering Internship Roles

| Company | Role | Location | Application |
| ------- | ---- | -------- | ----------- |
| Acme | SWE Intern | Remote | [Apply](https://jobs.acme.example/md) |
";
        let jobs = parse_document(markdown, &ParseOptions::default());
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].company, "Acme");
        assert_eq!(jobs[0].category, "Software Engineering");
        assert_eq!(jobs[0].url, "https://jobs.acme.example/md");
    }
}
