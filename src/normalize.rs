//! Flattens an `ExtractionResult` into the text block submitted for AI conversion.

use crate::content::{ExtractionResult, ListKind};
use serde::{Deserialize, Serialize};

const MAX_RENDERED_PARAGRAPHS: usize = 10;
const MAX_RENDERED_ROWS: usize = 3;

/// Below this many characters a whole page is not worth converting
pub const MIN_CONTENT_CHARS: usize = 50;

/// Section toggles. Every toggle defaults to on; only an explicit `false`
/// suppresses a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TextOptions {
    pub include_selection: bool,
    pub include_email: bool,
    pub include_document: bool,
    pub include_forms: bool,
    pub include_tables: bool,
}

impl Default for TextOptions {
    fn default() -> Self {
        Self {
            include_selection: true,
            include_email: true,
            include_document: true,
            include_forms: true,
            include_tables: true,
        }
    }
}

/// Render the extraction as newline-joined sections.
///
/// Order is fixed: selection, email, document, forms, tables, page info. The
/// page info section is always present.
pub fn to_text(extracted: &ExtractionResult, options: &TextOptions) -> String {
    let mut parts: Vec<String> = Vec::new();

    if !extracted.selection.is_empty() && options.include_selection {
        parts.push("=== SELECTED TEXT ===".into());
        parts.push(extracted.selection.clone());
        parts.push(String::new());
    }

    let email = &extracted.email;
    if email.has_email && options.include_email {
        parts.push("=== EMAIL ===".into());
        if let Some(subject) = &email.subject {
            parts.push(format!("Subject: {}", subject));
        }
        if let Some(from) = &email.from {
            parts.push(format!("From: {}", from));
        }
        if let Some(body) = &email.body {
            parts.push(format!("Body: {}", body));
        }
        parts.push(String::new());
    }

    if options.include_document {
        let doc = &extracted.document;

        if !doc.headings.is_empty() {
            parts.push("=== DOCUMENT STRUCTURE ===".into());
            for heading in &doc.headings {
                let prefix = "#".repeat(heading.level as usize);
                parts.push(format!("{} {}", prefix, heading.text));
            }
            parts.push(String::new());
        }

        if !doc.paragraphs.is_empty() {
            parts.push("=== CONTENT ===".into());
            parts.extend(doc.paragraphs.iter().take(MAX_RENDERED_PARAGRAPHS).cloned());
            parts.push(String::new());
        }

        if !doc.lists.is_empty() {
            parts.push("=== LISTS ===".into());
            for list in &doc.lists {
                for (i, item) in list.items.iter().enumerate() {
                    let bullet = match list.kind {
                        ListKind::Ol => format!("{}.", i + 1),
                        ListKind::Ul => "-".to_string(),
                    };
                    parts.push(format!("{} {}", bullet, item));
                }
            }
            parts.push(String::new());
        }
    }

    if !extracted.forms.is_empty() && options.include_forms {
        parts.push("=== FORMS ===".into());
        for form in &extracted.forms {
            parts.push(format!("Form: {}", form.name));
            for field in &form.fields {
                let required = if field.required { " (required)" } else { "" };
                let label = field.label.as_deref().unwrap_or(&field.name);
                parts.push(format!("  - {}: {}{}", label, field.field_type, required));
            }
        }
        parts.push(String::new());
    }

    if !extracted.tables.is_empty() && options.include_tables {
        parts.push("=== TABLES ===".into());
        for table in &extracted.tables {
            if !table.headers.is_empty() {
                parts.push(format!("Headers: {}", table.headers.join(" | ")));
            }
            if !table.sample_rows.is_empty() {
                parts.push(format!("Sample data ({} rows):", table.row_count));
                for row in table.sample_rows.iter().take(MAX_RENDERED_ROWS) {
                    parts.push(format!("  {}", row.join(" | ")));
                }
            }
        }
        parts.push(String::new());
    }

    parts.push("=== PAGE INFO ===".into());
    parts.push(format!("Title: {}", extracted.metadata.title));
    parts.push(format!("URL: {}", extracted.metadata.url));

    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{
        EmailContent, FieldDescriptor, FormDescriptor, Heading, ListBlock, PageMetadata,
        TableDescriptor,
    };

    fn sample() -> ExtractionResult {
        ExtractionResult {
            metadata: PageMetadata {
                url: "https://example.com/".into(),
                title: "Example".into(),
                description: None,
                timestamp: "2026-01-01T00:00:00.000Z".into(),
            },
            ..Default::default()
        }
    }

    #[test]
    fn page_info_is_always_emitted() {
        let text = to_text(&sample(), &TextOptions::default());
        assert_eq!(text, "=== PAGE INFO ===\nTitle: Example\nURL: https://example.com/");
    }

    #[test]
    fn rendering_is_idempotent() {
        let mut extracted = sample();
        extracted.selection = "picked".into();
        extracted.document.headings.push(Heading { level: 2, text: "Setup".into() });

        let options = TextOptions::default();
        assert_eq!(to_text(&extracted, &options), to_text(&extracted, &options));
    }

    #[test]
    fn missing_options_default_to_included() {
        let options: TextOptions = serde_json::from_str(r#"{"includeForms": false}"#).unwrap();
        assert!(options.include_email);
        assert!(options.include_selection);
        assert!(!options.include_forms);

        let empty: TextOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, TextOptions::default());
    }

    #[test]
    fn email_toggle_suppresses_section() {
        let mut extracted = sample();
        extracted.email = EmailContent {
            subject: Some("Hello".into()),
            from: None,
            body: Some("Body text".into()),
            has_email: true,
        };

        let shown = to_text(&extracted, &TextOptions::default());
        assert!(shown.contains("=== EMAIL ===\nSubject: Hello\nBody: Body text\n"));
        assert!(!shown.contains("From:"));

        let options = TextOptions {
            include_email: false,
            ..Default::default()
        };
        assert!(!to_text(&extracted, &options).contains("=== EMAIL ==="));
    }

    #[test]
    fn empty_forms_omit_section() {
        let text = to_text(&sample(), &TextOptions::default());
        assert!(!text.contains("=== FORMS ==="));
    }

    #[test]
    fn forms_render_label_type_and_required() {
        let mut extracted = sample();
        extracted.forms.push(FormDescriptor {
            form_index: 0,
            name: "signup".into(),
            action: "none".into(),
            method: "get".into(),
            fields: vec![
                FieldDescriptor {
                    name: "email".into(),
                    field_type: "email".into(),
                    label: Some("Email address".into()),
                    required: true,
                    placeholder: None,
                    options: None,
                },
                FieldDescriptor {
                    name: "notes".into(),
                    field_type: "textarea".into(),
                    label: None,
                    required: false,
                    placeholder: None,
                    options: None,
                },
            ],
        });

        let text = to_text(&extracted, &TextOptions::default());
        assert!(text.contains(
            "=== FORMS ===\nForm: signup\n  - Email address: email (required)\n  - notes: textarea\n"
        ));
    }

    #[test]
    fn tables_render_headers_and_three_rows() {
        let mut extracted = sample();
        extracted.tables.push(TableDescriptor {
            table_index: 0,
            headers: vec!["Name".into(), "Age".into()],
            row_count: 5,
            sample_rows: vec![
                vec!["Alice".into(), "30".into()],
                vec!["Bob".into(), "41".into()],
                vec!["Cy".into(), "22".into()],
                vec!["Dee".into(), "19".into()],
            ],
            caption: None,
        });

        let text = to_text(&extracted, &TextOptions::default());
        assert!(text.contains("Headers: Name | Age"));
        assert!(text.contains("Sample data (5 rows):"));
        assert!(text.lines().any(|line| line.contains("Alice | 30")));
        assert!(text.contains("  Cy | 22"));
        assert!(!text.contains("Dee"));
    }

    #[test]
    fn document_sections_and_paragraph_cap() {
        let mut extracted = sample();
        extracted.document.headings = vec![
            Heading { level: 1, text: "Guide".into() },
            Heading { level: 3, text: "Details".into() },
        ];
        extracted.document.paragraphs = (0..20).map(|i| format!("paragraph {}", i)).collect();
        extracted.document.lists = vec![
            ListBlock { kind: ListKind::Ol, items: vec!["first".into(), "second".into()] },
            ListBlock { kind: ListKind::Ul, items: vec!["loose".into()] },
        ];

        let text = to_text(&extracted, &TextOptions::default());
        assert!(text.contains("=== DOCUMENT STRUCTURE ===\n# Guide\n### Details\n"));
        assert!(text.contains("paragraph 9\n"));
        assert!(!text.contains("paragraph 10"));
        assert!(text.contains("=== LISTS ===\n1. first\n2. second\n- loose\n"));

        let options = TextOptions {
            include_document: false,
            ..Default::default()
        };
        assert!(!to_text(&extracted, &options).contains("=== CONTENT ==="));
    }

    #[test]
    fn section_order_is_fixed() {
        let mut extracted = sample();
        extracted.selection = "picked".into();
        extracted.email.has_email = true;
        extracted.email.subject = Some("S".into());
        extracted.document.paragraphs = vec!["a paragraph".into()];
        extracted.tables.push(TableDescriptor {
            table_index: 0,
            headers: vec!["H".into()],
            row_count: 0,
            sample_rows: vec![],
            caption: None,
        });

        let text = to_text(&extracted, &TextOptions::default());
        let positions: Vec<usize> = [
            "=== SELECTED TEXT ===",
            "=== EMAIL ===",
            "=== CONTENT ===",
            "=== TABLES ===",
            "=== PAGE INFO ===",
        ]
        .iter()
        .map(|marker| text.find(marker).unwrap())
        .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }
}
