use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;

use crate::client::CatalogItem;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentHeader {
    pub number: u64,
    pub title: String,
    pub tags: Vec<String>,
    pub category: String,
    pub created_at: String,
    pub updated_at: String,
    pub created_by: String,
    pub updated_by: String,
    pub wip: bool,
}

impl DocumentHeader {
    pub fn from_item(item: &CatalogItem) -> Self {
        Self {
            number: item.number,
            title: item.name.clone(),
            tags: item.tags.clone(),
            category: item.category_path().to_string(),
            created_at: item.created_at.clone(),
            updated_at: item.updated_at.clone(),
            created_by: item.created_by_name().to_string(),
            updated_by: item.updated_by_name().to_string(),
            wip: item.wip,
        }
    }

    /// Front matter block, closing `---` line included.
    pub fn render(&self) -> String {
        let lines = [
            "---".to_string(),
            format!("number: {}", self.number),
            format!("title: {}", self.title),
            format!("tags: {}", render_tags(&self.tags)),
            format!("category: {}", self.category),
            format!("created_at: {}", self.created_at),
            format!("updated_at: {}", self.updated_at),
            format!("created_by: {}", self.created_by),
            format!("updated_by: {}", self.updated_by),
            format!("wip: {}", self.wip),
            "---".to_string(),
        ];
        let mut output = lines.join("\n");
        output.push('\n');
        output
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDocument {
    pub path: PathBuf,
    pub header: DocumentHeader,
    pub body: String,
}

impl LocalDocument {
    pub fn render(&self) -> String {
        format!("{}\n{}", self.header.render(), self.body)
    }

    pub fn write(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(&self.path, self.render())
            .with_context(|| format!("failed to write {}", self.path.display()))
    }
}

/// JSON array with `", "` separators; non-ASCII text stays unescaped.
fn render_tags(tags: &[String]) -> String {
    let items = tags
        .iter()
        .map(|tag| Value::String(tag.clone()).to_string())
        .collect::<Vec<_>>();
    format!("[{}]", items.join(", "))
}
