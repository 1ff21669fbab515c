use std::path::PathBuf;

use super::Result;

/// One plain-text to e-book conversion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EbookRequest {
    pub source: PathBuf,
    pub dest: PathBuf,
    pub title: String,
    pub author: String,
    /// Chapter heading regex overriding the converter's built-in patterns
    pub chapter_pattern: Option<String>,
}

/// Splits a text file into chapters and writes an e-book
pub trait EbookConverter: Send + Sync {
    fn convert(&self, request: &EbookRequest) -> Result<()>;
}
