use std::fs;
use std::ops::Range;
use std::path::Path;

use anyhow::{Context, Result};
use log::debug;
use regex::Regex;

use crate::fetcher::ResourceFetcher;

pub const IMAGES_SUBDIR: &str = "images";

/// One `<img>` tag found in a body, with the byte span it occupies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub src: String,
    pub width: Option<String>,
    pub original_tag: String,
    pub span: Range<usize>,
}

impl ImageReference {
    /// Width hint usable for resizing: ASCII digits only.
    pub fn numeric_width(&self) -> Option<u32> {
        self.width
            .as_deref()
            .filter(|width| !width.is_empty() && width.bytes().all(|byte| byte.is_ascii_digit()))
            .and_then(|width| width.parse::<u32>().ok())
    }
}

#[derive(Debug, Clone)]
pub struct ImagePatterns {
    tag: Regex,
    src: Regex,
    width: Regex,
}

impl ImagePatterns {
    pub fn new() -> Result<Self> {
        Ok(Self {
            tag: Regex::new(r"(?i)<img\b[^>]*>").context("invalid img tag pattern")?,
            src: Regex::new(r#"(?i)\ssrc="([^"]+)""#).context("invalid src pattern")?,
            width: Regex::new(r#"(?i)\swidth="([^"]+)""#).context("invalid width pattern")?,
        })
    }

    /// Tags without a `src` attribute are not references and are skipped.
    pub fn extract(&self, body: &str) -> Vec<ImageReference> {
        self.tag
            .find_iter(body)
            .filter_map(|tag| {
                let text = tag.as_str();
                let src = self.src.captures(text)?.get(1)?.as_str().to_string();
                let width = self
                    .width
                    .captures(text)
                    .and_then(|captures| captures.get(1))
                    .map(|value| value.as_str().to_string());
                Some(ImageReference {
                    src,
                    width,
                    original_tag: text.to_string(),
                    span: tag.range(),
                })
            })
            .collect()
    }
}

pub fn replacement_tag(relative_path: &str, width: Option<&str>) -> String {
    match width {
        Some(width) => format!(r#"<img src="{relative_path}" width="{width}">"#),
        None => format!(r#"<img src="{relative_path}">"#),
    }
}

pub struct ResourceRewriter {
    patterns: ImagePatterns,
    fetcher: ResourceFetcher,
}

impl ResourceRewriter {
    pub fn new(fetcher: ResourceFetcher) -> Result<Self> {
        Ok(Self {
            patterns: ImagePatterns::new()?,
            fetcher,
        })
    }

    pub fn fetcher(&self) -> &ResourceFetcher {
        &self.fetcher
    }

    /// Download every referenced image next to the document (or into
    /// `images/`) and point the tags at the local copies. Images that fail
    /// to download keep their original tag.
    pub fn process(&mut self, body: &str, target_dir: &Path, use_subdirectory: bool) -> Result<String> {
        self.process_reserving(body, target_dir, use_subdirectory, &[])
    }

    /// `process`, keeping images off `reserved` names in `target_dir` (the
    /// document's own filename when images sit next to it).
    pub fn process_reserving(
        &mut self,
        body: &str,
        target_dir: &Path,
        use_subdirectory: bool,
        reserved: &[&str],
    ) -> Result<String> {
        let references = self.patterns.extract(body);
        if references.is_empty() {
            return Ok(body.to_string());
        }

        let (image_dir, prefix) = if use_subdirectory {
            let image_dir = target_dir.join(IMAGES_SUBDIR);
            fs::create_dir_all(&image_dir)
                .with_context(|| format!("failed to create {}", image_dir.display()))?;
            (image_dir, format!("{IMAGES_SUBDIR}/"))
        } else {
            (target_dir.to_path_buf(), String::new())
        };
        let reserved: &[&str] = if use_subdirectory { &[] } else { reserved };

        let mut output = String::with_capacity(body.len());
        let mut cursor = 0usize;
        let mut rewritten = 0usize;
        for reference in &references {
            let Some(filename) = self
                .fetcher
                .download_reserving(&reference.src, &image_dir, reserved)
            else {
                continue;
            };
            if let Some(width) = reference.numeric_width() {
                self.fetcher.resize(&image_dir.join(&filename), width);
            }

            output.push_str(&body[cursor..reference.span.start]);
            output.push_str(&replacement_tag(
                &format!("{prefix}{filename}"),
                reference.width.as_deref(),
            ));
            cursor = reference.span.end;
            rewritten += 1;
        }
        output.push_str(&body[cursor..]);

        debug!(
            "Rewrote {rewritten} of {} image references in {}",
            references.len(),
            target_dir.display()
        );
        Ok(output)
    }
}
