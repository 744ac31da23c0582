use std::{collections::BTreeMap, sync::Arc};

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::analysis::source_map::LineIndex;

/// Source files of a compilation, keyed by the source id the compiler assigned to them.
pub type SourceFiles = BTreeMap<u32, SourceFile>;

/// A source file taking part in a compilation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    pub id: u32,
    pub path: String,
    pub content: Arc<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ast: Option<Value>,
    /// Whether the file was generated by the compiler (e.g. Yul utility code).
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub generated: bool,
    #[serde(skip)]
    line_index: OnceCell<LineIndex>,
}

impl SourceFile {
    pub fn new(id: u32, path: impl Into<String>, content: impl Into<String>) -> Self {
        let content: String = content.into();
        let line_index = OnceCell::with_value(LineIndex::new(&content));
        Self {
            id,
            path: path.into(),
            content: Arc::new(content),
            ast: None,
            generated: false,
            line_index,
        }
    }

    pub fn with_ast(mut self, ast: Option<Value>) -> Self {
        self.ast = ast;
        self
    }

    pub fn generated(mut self) -> Self {
        self.generated = true;
        self
    }

    /// The newline index of the content, built once.
    pub fn line_index(&self) -> &LineIndex {
        self.line_index.get_or_init(|| LineIndex::new(&self.content))
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

impl PartialEq for SourceFile {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id &&
            self.path == other.path &&
            self.content == other.content &&
            self.ast == other.ast &&
            self.generated == other.generated
    }
}

impl Eq for SourceFile {}
