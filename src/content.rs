//! Extraction result types - the structured snapshot of a page.
//!
//! Every leaf is optional or possibly empty: a page that matches nothing still
//! produces a complete `ExtractionResult`.

use serde::{Deserialize, Serialize};

/// Everything captured from a page in one pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    /// The user's text selection, trimmed; empty when nothing is selected
    pub selection: String,
    pub email: EmailContent,
    pub forms: Vec<FormDescriptor>,
    pub tables: Vec<TableDescriptor>,
    pub document: DocumentContent,
    pub actions: Vec<ActionDescriptor>,
    pub links: Vec<LinkDescriptor>,
    pub metadata: PageMetadata,
    pub has_content: HasContent,
}

/// Best-effort match against known webmail layouts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailContent {
    pub subject: Option<String>,
    pub from: Option<String>,
    pub body: Option<String>,
    /// True iff any subject candidate matched
    pub has_email: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormDescriptor {
    pub form_index: usize,
    /// `name`, then `id`, then `form-<index>`
    pub name: String,
    pub action: String,
    pub method: String,
    pub fields: Vec<FieldDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub label: Option<String>,
    pub required: bool,
    pub placeholder: Option<String>,
    /// Option texts, only for `select` fields
    pub options: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDescriptor {
    pub table_index: usize,
    pub headers: Vec<String>,
    /// Total number of body rows, not just the sampled ones
    pub row_count: usize,
    pub sample_rows: Vec<Vec<String>>,
    pub caption: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentContent {
    pub headings: Vec<Heading>,
    pub paragraphs: Vec<String>,
    pub lists: Vec<ListBlock>,
    pub code_blocks: Vec<String>,
}

impl DocumentContent {
    pub fn is_empty(&self) -> bool {
        self.headings.is_empty() && self.paragraphs.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heading {
    /// 1 through 6
    pub level: u8,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListKind {
    Ul,
    Ol,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListBlock {
    #[serde(rename = "type")]
    pub kind: ListKind,
    pub items: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub text: String,
    #[serde(rename = "type")]
    pub action_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkDescriptor {
    pub text: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageMetadata {
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    /// ISO-8601 capture time
    pub timestamp: String,
}

/// Summary of which sections produced anything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HasContent {
    pub selection: bool,
    pub email: bool,
    pub forms: bool,
    pub tables: bool,
    pub document: bool,
}

impl HasContent {
    /// Human labels for the captured sections, in display order.
    pub fn labels(&self) -> Vec<&'static str> {
        let mut labels = Vec::new();
        if self.email {
            labels.push("Email");
        }
        if self.forms {
            labels.push("Forms");
        }
        if self.tables {
            labels.push("Tables");
        }
        if self.document {
            labels.push("Document");
        }
        labels
    }

    pub fn any(&self) -> bool {
        self.selection || self.email || self.forms || self.tables || self.document
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_message_field_names() {
        let result = ExtractionResult::default();
        let value = serde_json::to_value(&result).unwrap();

        for key in [
            "selection",
            "email",
            "forms",
            "tables",
            "document",
            "actions",
            "links",
            "metadata",
            "hasContent",
        ] {
            assert!(value.get(key).is_some(), "missing key {key}");
        }
        assert_eq!(value["email"]["hasEmail"], false);
        assert!(value["document"]["codeBlocks"].is_array());
    }

    #[test]
    fn labels_follow_display_order() {
        let has = HasContent {
            selection: true,
            email: true,
            forms: false,
            tables: true,
            document: true,
        };
        assert_eq!(has.labels(), vec!["Email", "Tables", "Document"]);
        assert!(has.any());
        assert!(!HasContent::default().any());
    }
}
