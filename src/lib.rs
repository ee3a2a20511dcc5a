//! # Flowcap
//!
//! Capture the useful parts of a web page and turn them into step-by-step
//! workflows.
//!
//! ## Features
//!
//! - **Page extraction**: Selection, email, forms, tables, document structure, actions and links
//! - **Text normalization**: A sectioned plain-text rendering ready for AI conversion
//! - **Selection capture**: An interactive terminal selection mode with live preview
//! - **Message routing**: A JSON action contract between the UI surfaces and the backend
//! - **Local state**: sled-backed tokens, settings and pending workflows

pub mod client;
pub mod config;
pub mod content;
pub mod extractor;
pub mod normalize;
pub mod router;
pub mod selection;
pub mod storage;
pub mod ui;
pub mod workflow;

#[cfg(test)]
mod testing;

pub use client::{ClientError, WorkflowClient};
pub use config::Config;
pub use content::ExtractionResult;
pub use extractor::Page;
pub use normalize::{to_text, TextOptions};
pub use router::{Request, Response, Router};
pub use storage::Store;
pub use workflow::GeneratedWorkflow;
