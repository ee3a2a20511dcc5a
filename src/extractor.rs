//! Page content extraction.
//!
//! Uses reqwest for fetching and scraper for HTML parsing. Extraction itself is
//! synchronous and never fails: every selector lookup degrades to `None` or an
//! empty list.

use crate::content::{
    ActionDescriptor, DocumentContent, EmailContent, ExtractionResult, FieldDescriptor,
    FormDescriptor, HasContent, Heading, LinkDescriptor, ListBlock, ListKind, PageMetadata,
    TableDescriptor,
};
use chrono::{SecondsFormat, Utc};
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// User-Agent string identifying this scraper
const USER_AGENT: &str = concat!("flowcap/", env!("CARGO_PKG_VERSION"), " (https://github.com/cladam/flowcap)");

/// Default timeout for HTTP requests
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_TABLE_SAMPLE_ROWS: usize = 15;
const MAX_PARAGRAPHS: usize = 20;
const MAX_LIST_ITEMS: usize = 20;
const MAX_CODE_BLOCKS: usize = 5;
const MAX_ACTIONS: usize = 30;
const MAX_LINKS: usize = 30;

/// Gmail, then Outlook, then generic class/id heuristics.
const SUBJECT_SELECTORS: &[&str] = &[
    ".hP",
    "[data-legacy-subject-id]",
    "[aria-label*=\"Subject\"]",
    ".allowTextSelection",
    "[class*=\"subject\"], .subject, #subject",
];
const BODY_SELECTORS: &[&str] = &[
    ".a3s.aiL",
    ".ii.gt",
    "[aria-label=\"Message body\"]",
    "[class*=\"email-body\"], .email-content, .message-body",
];

const ACTION_SELECTOR: &str = "button, [role=\"button\"], input[type=\"submit\"], input[type=\"button\"], a.btn, a.button";

const HIDDEN_TEXT_PARENTS: &[&str] = &["script", "style", "noscript", "template"];

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("failed to fetch URL: {0}")]
    FetchError(#[from] reqwest::Error),
    #[error("server responded with status {0}")]
    Status(u16),
    #[error("failed to read page: {0}")]
    ReadError(#[from] std::io::Error),
}

/// A parsed page plus the user's current selection.
///
/// This plays the role of the live document: extraction methods are pure
/// functions of its state.
#[derive(Debug)]
pub struct Page {
    html: Html,
    url: String,
    base: Option<Url>,
    selection: String,
}

/// Create a configured HTTP client for scraping
fn create_client() -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(REQUEST_TIMEOUT)
        .build()
}

/// Fetch a page over HTTP
pub async fn fetch_page(url: &str) -> Result<Page, ExtractError> {
    let client = create_client()?;

    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(ExtractError::Status(status.as_u16()));
    }
    let html = response.text().await?;
    tracing::debug!(url, bytes = html.len(), "fetched page");

    Ok(Page::parse(&html, url))
}

/// Load a page from a URL or a local HTML file
pub async fn load_page(source: &str) -> Result<Page, ExtractError> {
    if source.starts_with("http://") || source.starts_with("https://") {
        return fetch_page(source).await;
    }

    let path = Path::new(source);
    let html = tokio::fs::read_to_string(path).await?;
    let url = std::fs::canonicalize(path)
        .ok()
        .and_then(|abs| Url::from_file_path(abs).ok())
        .map(|u| u.to_string())
        .unwrap_or_else(|| source.to_string());

    Ok(Page::parse(&html, url))
}

impl Page {
    /// Parse an HTML document located at `url`
    pub fn parse(html: &str, url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            html: Html::parse_document(html),
            base: Url::parse(&url).ok(),
            url,
            selection: String::new(),
        }
    }

    pub fn with_selection(mut self, selection: impl Into<String>) -> Self {
        self.set_selection(selection);
        self
    }

    pub fn set_selection(&mut self, selection: impl Into<String>) {
        self.selection = selection.into();
    }

    /// The current selection, trimmed
    pub fn selection(&self) -> String {
        self.selection.trim().to_string()
    }

    /// Extract email content (Gmail, Outlook Web patterns)
    pub fn extract_email(&self) -> EmailContent {
        let subject = self.first_text(SUBJECT_SELECTORS);

        // The Gmail sender carries the address in an attribute
        let from = self
            .select_first(".gD")
            .and_then(|el| non_empty(el.value().attr("email")))
            .or_else(|| self.first_text(&[".go", "[aria-label*=\"From\"]", "[class*=\"from\"], .from, .sender"]));

        let body = BODY_SELECTORS
            .iter()
            .filter_map(|css| self.select_first(css))
            .map(inner_text)
            .find(|text| !text.is_empty());

        EmailContent {
            has_email: subject.is_some(),
            subject,
            from,
            body,
        }
    }

    /// Extract all forms on the page
    pub fn extract_forms(&self) -> Vec<FormDescriptor> {
        let form_selector = selector("form");
        let field_selector = selector("input, select, textarea");

        self.html
            .select(&form_selector)
            .enumerate()
            .map(|(index, form)| {
                let attr = |name| non_empty(form.value().attr(name));
                let fields = form
                    .select(&field_selector)
                    .filter_map(|field| self.describe_field(field))
                    .collect();

                FormDescriptor {
                    form_index: index,
                    name: attr("name")
                        .or_else(|| attr("id"))
                        .unwrap_or_else(|| format!("form-{}", index)),
                    action: attr("action")
                        .map(|action| self.resolve(&action))
                        .unwrap_or_else(|| "none".to_string()),
                    method: form_method(form.value().attr("method")),
                    fields,
                }
            })
            .filter(|form| !form.fields.is_empty())
            .collect()
    }

    /// Extract tables from the page
    pub fn extract_tables(&self) -> Vec<TableDescriptor> {
        let table_selector = selector("table");
        let header_selector = selector("th");
        let row_selector = selector("tbody tr");
        let cell_selector = selector("td");
        let caption_selector = selector("caption");

        self.html
            .select(&table_selector)
            .enumerate()
            .map(|(index, table)| {
                let headers = table
                    .select(&header_selector)
                    .map(trimmed_text)
                    .filter(|h| !h.is_empty())
                    .collect();

                let rows: Vec<ElementRef> = table.select(&row_selector).collect();
                let sample_rows = rows
                    .iter()
                    .take(MAX_TABLE_SAMPLE_ROWS)
                    .map(|row| row.select(&cell_selector).map(trimmed_text).collect::<Vec<_>>())
                    .collect();

                TableDescriptor {
                    table_index: index,
                    headers,
                    row_count: rows.len(),
                    sample_rows,
                    caption: table
                        .select(&caption_selector)
                        .next()
                        .map(trimmed_text)
                        .filter(|c| !c.is_empty()),
                }
            })
            .filter(|t| !t.headers.is_empty() || !t.sample_rows.is_empty())
            .collect()
    }

    /// Extract document structure (headings, paragraphs, lists, code)
    pub fn extract_document(&self) -> DocumentContent {
        let headings = self
            .html
            .select(&selector("h1, h2, h3, h4, h5, h6"))
            .filter_map(|h| {
                let level = h.value().name()[1..].parse().ok()?;
                Some(Heading {
                    level,
                    text: trimmed_text(h),
                })
            })
            .filter(|h| within(&h.text, 0, 200))
            .collect();

        let paragraphs = self
            .html
            .select(&selector("p"))
            .map(trimmed_text)
            .filter(|text| within(text, 30, 2000))
            .take(MAX_PARAGRAPHS)
            .collect();

        let lists = self
            .html
            .select(&selector("ul, ol"))
            .map(|list| {
                let kind = if list.value().name() == "ol" {
                    ListKind::Ol
                } else {
                    ListKind::Ul
                };
                let items = list
                    .children()
                    .filter_map(ElementRef::wrap)
                    .filter(|child| child.value().name() == "li")
                    .map(trimmed_text)
                    .filter(|text| within(text, 0, 500))
                    .take(MAX_LIST_ITEMS)
                    .collect();
                ListBlock { kind, items }
            })
            .filter(|list| !list.items.is_empty())
            .collect();

        let code_blocks = self
            .html
            .select(&selector("pre, code"))
            .map(trimmed_text)
            .filter(|text| within(text, 10, 2000))
            .take(MAX_CODE_BLOCKS)
            .collect();

        DocumentContent {
            headings,
            paragraphs,
            lists,
            code_blocks,
        }
    }

    /// Extract buttons and other clickable affordances
    pub fn extract_actions(&self) -> Vec<ActionDescriptor> {
        self.html
            .select(&selector(ACTION_SELECTOR))
            .filter_map(|el| {
                let attr = |name| non_empty(el.value().attr(name));
                let text = Some(trimmed_text(el))
                    .filter(|t| !t.is_empty())
                    .or_else(|| attr("value"))
                    .or_else(|| attr("aria-label"))?;
                Some(ActionDescriptor {
                    text,
                    action_type: action_type(el),
                })
            })
            .filter(|action| within(&action.text, 0, 100))
            .take(MAX_ACTIONS)
            .collect()
    }

    /// Extract anchors with absolute URLs
    pub fn extract_links(&self) -> Vec<LinkDescriptor> {
        self.html
            .select(&selector("a[href]"))
            .filter_map(|a| {
                let href = a.value().attr("href")?;
                Some(LinkDescriptor {
                    text: trimmed_text(a),
                    url: self.resolve(href),
                })
            })
            .filter(|link| within(&link.text, 0, 100))
            .take(MAX_LINKS)
            .collect()
    }

    /// Get page metadata, stamped with the capture time
    pub fn metadata(&self) -> PageMetadata {
        let title = self
            .select_first("title")
            .map(|el| collapse_whitespace(&el.text().collect::<String>()))
            .unwrap_or_default();
        let description = self
            .select_first("meta[name=\"description\"]")
            .and_then(|el| non_empty(el.value().attr("content")));

        PageMetadata {
            url: self.url.clone(),
            title,
            description,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    /// Visible body text, one entry per non-blank line, for interactive selection
    pub fn text_lines(&self) -> Vec<String> {
        let Some(body) = self.select_first("body") else {
            return Vec::new();
        };

        body.descendants()
            .filter(|node| {
                node.parent()
                    .and_then(ElementRef::wrap)
                    .is_some_and(|parent| !HIDDEN_TEXT_PARENTS.contains(&parent.value().name()))
            })
            .filter_map(|node| node.value().as_text().map(|text| text.to_string()))
            .flat_map(|text| {
                text.lines()
                    .map(collapse_whitespace)
                    .filter(|line| !line.is_empty())
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Full page extraction with all content types
    pub fn extract_all(&self) -> ExtractionResult {
        let selection = self.selection();
        let email = self.extract_email();
        let forms = self.extract_forms();
        let tables = self.extract_tables();
        let document = self.extract_document();
        let actions = self.extract_actions();
        let links = self.extract_links();
        let metadata = self.metadata();

        let has_content = HasContent {
            selection: !selection.is_empty(),
            email: email.has_email,
            forms: !forms.is_empty(),
            tables: !tables.is_empty(),
            document: !document.is_empty(),
        };

        tracing::debug!(
            url = %self.url,
            forms = forms.len(),
            tables = tables.len(),
            paragraphs = document.paragraphs.len(),
            "extracted page"
        );

        ExtractionResult {
            selection,
            email,
            forms,
            tables,
            document,
            actions,
            links,
            metadata,
            has_content,
        }
    }

    fn describe_field(&self, field: ElementRef) -> Option<FieldDescriptor> {
        let attr = |name| non_empty(field.value().attr(name));
        let name = attr("name").or_else(|| attr("id"))?;
        let field_type = field_type(field);
        if field_type == "hidden" {
            return None;
        }

        let options = (field.value().name() == "select").then(|| {
            field
                .select(&selector("option"))
                .map(|o| collapse_whitespace(&o.text().collect::<String>()))
                .collect::<Vec<_>>()
        });

        Some(FieldDescriptor {
            name,
            label: self.resolve_label(field),
            field_type,
            required: field.value().attr("required").is_some(),
            placeholder: attr("placeholder"),
            options,
        })
    }

    /// Explicit `label[for]`, then enclosing label, then placeholder, then name
    fn resolve_label(&self, field: ElementRef) -> Option<String> {
        let attr = |name| non_empty(field.value().attr(name));

        attr("id")
            .and_then(|id| {
                self.html
                    .select(&selector("label[for]"))
                    .find(|label| label.value().attr("for") == Some(id.as_str()))
                    .map(trimmed_text)
            })
            .filter(|l| !l.is_empty())
            .or_else(|| enclosing_label(field))
            .or_else(|| attr("placeholder"))
            .or_else(|| attr("name"))
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
    }

    fn select_first(&self, css: &str) -> Option<ElementRef<'_>> {
        let selector = Selector::parse(css).ok()?;
        self.html.select(&selector).next()
    }

    /// First non-empty trimmed text across the selector tiers
    fn first_text(&self, selectors: &[&str]) -> Option<String> {
        selectors
            .iter()
            .filter_map(|css| self.select_first(css))
            .map(trimmed_text)
            .find(|text| !text.is_empty())
    }

    fn resolve(&self, href: &str) -> String {
        self.base
            .as_ref()
            .and_then(|base| base.join(href).ok())
            .map(|u| u.to_string())
            .unwrap_or_else(|| href.to_string())
    }
}

fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap()
}

fn trimmed_text(el: ElementRef) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// Approximates rendered text: one line per non-blank text node
fn inner_text(el: ElementRef) -> String {
    el.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_string)
}

/// Exclusive bounds on the character count
fn within(text: &str, min: usize, max: usize) -> bool {
    let len = text.chars().count();
    len > min && len < max
}

fn enclosing_label(field: ElementRef) -> Option<String> {
    let label = field
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "label")?;

    // The label's own text, without whatever the field itself renders
    let text: String = label
        .descendants()
        .filter(|node| !node.ancestors().any(|a| a.id() == field.id()))
        .filter_map(|node| node.value().as_text().map(|t| &**t))
        .collect();
    Some(collapse_whitespace(&text)).filter(|t| !t.is_empty())
}

/// Types a browser reports as-is; anything else falls back to "text"
const INPUT_TYPES: &[&str] = &[
    "button",
    "checkbox",
    "color",
    "date",
    "datetime-local",
    "email",
    "file",
    "hidden",
    "image",
    "month",
    "number",
    "password",
    "radio",
    "range",
    "reset",
    "search",
    "submit",
    "tel",
    "text",
    "time",
    "url",
    "week",
];

fn field_type(field: ElementRef) -> String {
    let el = field.value();
    match el.name() {
        "input" => el
            .attr("type")
            .map(|t| t.trim().to_ascii_lowercase())
            .filter(|t| INPUT_TYPES.contains(&t.as_str()))
            .unwrap_or_else(|| "text".to_string()),
        "select" if el.attr("multiple").is_some() => "select-multiple".to_string(),
        "select" => "select-one".to_string(),
        other => other.to_string(),
    }
}

fn form_method(method: Option<&str>) -> String {
    match method.map(str::to_ascii_lowercase).as_deref() {
        Some(m @ ("post" | "dialog")) => m.to_string(),
        _ => "get".to_string(),
    }
}

fn action_type(el: ElementRef) -> String {
    let declared = el
        .value()
        .attr("type")
        .filter(|t| !t.is_empty())
        .map(str::to_ascii_lowercase);
    match el.value().name() {
        "button" => declared.unwrap_or_else(|| "submit".to_string()),
        _ => declared.unwrap_or_else(|| "button".to_string()),
    }
}
