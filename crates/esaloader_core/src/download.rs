use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, error};
use serde::Serialize;

use crate::client::{CatalogApi, CatalogItem};
use crate::config::{EsaConfig, MAX_PER_PAGE};
use crate::document::{DocumentHeader, LocalDocument};
use crate::fetcher::ResourceFetcher;
use crate::http::{Sleeper, ThreadSleeper, is_unauthorized};
use crate::paths::{document_filename, layout};
use crate::progress::{DownloadEvent, ProgressReporter};
use crate::rewrite::ResourceRewriter;

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub query: Option<String>,
    pub limit: Option<usize>,
    pub dry_run: bool,
    pub images_subdir: bool,
    pub per_page: u32,
    pub page_delay: Duration,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            query: None,
            limit: None,
            dry_run: false,
            images_subdir: false,
            per_page: MAX_PER_PAGE,
            page_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ListedItem {
    pub number: u64,
    pub name: String,
    pub category: Option<String>,
    pub tags: Vec<String>,
}

impl From<&CatalogItem> for ListedItem {
    fn from(item: &CatalogItem) -> Self {
        Self {
            number: item.number,
            name: item.name.clone(),
            category: item.category.clone().filter(|category| !category.is_empty()),
            tags: item.tags.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ItemFailure {
    pub number: u64,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DownloadReport {
    pub dry_run: bool,
    pub total_count: u64,
    pub pages_fetched: usize,
    pub processed: usize,
    pub saved_files: Vec<PathBuf>,
    pub listed: Vec<ListedItem>,
    pub failures: Vec<ItemFailure>,
    pub limit_reached: bool,
    pub request_count: usize,
}

/// Mutable run state; owned by one `download_all` call.
struct DownloadSession {
    page: u32,
    processed: usize,
    saved_files: Vec<PathBuf>,
}

impl DownloadSession {
    fn new() -> Self {
        Self {
            page: 1,
            processed: 0,
            saved_files: Vec::new(),
        }
    }

    fn limit_reached(&self, limit: Option<usize>) -> bool {
        limit.is_some_and(|limit| self.processed >= limit)
    }
}

pub struct PostDownloader {
    output_dir: PathBuf,
    rewriter: ResourceRewriter,
    sleeper: Box<dyn Sleeper>,
}

impl PostDownloader {
    pub fn new(output_dir: &Path, rewriter: ResourceRewriter, sleeper: Box<dyn Sleeper>) -> Result<Self> {
        fs::create_dir_all(output_dir)
            .with_context(|| format!("failed to create output directory {}", output_dir.display()))?;
        Ok(Self {
            output_dir: output_dir.to_path_buf(),
            rewriter,
            sleeper,
        })
    }

    /// Fresh fetcher, rewriter and sleeper for one run.
    pub fn from_config(config: &EsaConfig, output_dir: &Path) -> Result<Self> {
        let rewriter = ResourceRewriter::new(ResourceFetcher::from_config(config)?)?;
        Self::new(output_dir, rewriter, Box::new(ThreadSleeper))
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Lay out, rewrite and write one full item. Returns the document path.
    pub fn save_item(&mut self, item: &CatalogItem, images_subdir: bool) -> Result<PathBuf> {
        let directory = layout(&self.output_dir, item);
        fs::create_dir_all(&directory)
            .with_context(|| format!("failed to create {}", directory.display()))?;

        let filename = document_filename(item.number, &item.name);
        let body = self.rewriter.process_reserving(
            &item.body_md,
            &directory,
            images_subdir,
            &[filename.as_str()],
        )?;
        let document = LocalDocument {
            path: directory.join(&filename),
            header: DocumentHeader::from_item(item),
            body,
        };
        if let Err(error) = document.write() {
            error!("Error saving file {}: {error:#}", document.path.display());
            return Err(error);
        }
        debug!("Saved: {}", document.path.display());
        Ok(document.path)
    }

    /// Page through search results. Only saved or listed items count toward
    /// `options.limit`.
    pub fn download_all<A: CatalogApi>(
        &mut self,
        api: &mut A,
        options: &DownloadOptions,
        progress: &mut dyn ProgressReporter,
    ) -> Result<DownloadReport> {
        let mut session = DownloadSession::new();
        let mut report = DownloadReport {
            dry_run: options.dry_run,
            ..DownloadReport::default()
        };

        progress.report(DownloadEvent::Started {
            query: options.query.clone(),
        });

        'pages: loop {
            let page = api
                .search(options.query.as_deref(), session.page, options.per_page)
                .with_context(|| format!("failed to search posts (page {})", session.page))?;
            report.pages_fetched += 1;
            if session.page == 1 {
                report.total_count = page.total_count;
                progress.report(DownloadEvent::Found {
                    total_count: page.total_count,
                    dry_run: options.dry_run,
                });
            }
            if page.posts.is_empty() {
                break;
            }

            for post in &page.posts {
                if session.limit_reached(options.limit) {
                    break 'pages;
                }
                let counted = if options.dry_run {
                    let listed = ListedItem::from(post);
                    progress.report(DownloadEvent::Listed(listed.clone()));
                    report.listed.push(listed);
                    true
                } else {
                    self.download_one(api, post, options, &mut session, &mut report)?
                };
                if counted {
                    session.processed += 1;
                }
            }

            if session.limit_reached(options.limit) || page.next_page.is_none() {
                break;
            }
            session.page += 1;
            if !options.dry_run {
                self.sleeper.sleep(options.page_delay);
            }
        }

        if session.limit_reached(options.limit) {
            report.limit_reached = true;
            if let Some(limit) = options.limit {
                progress.report(DownloadEvent::LimitReached { limit });
            }
        }
        report.processed = session.processed;
        report.saved_files = session.saved_files;
        report.request_count = api.request_count() + self.rewriter.fetcher().request_count();
        Ok(report)
    }

    fn download_one<A: CatalogApi>(
        &mut self,
        api: &mut A,
        post: &CatalogItem,
        options: &DownloadOptions,
        session: &mut DownloadSession,
        report: &mut DownloadReport,
    ) -> Result<bool> {
        debug!("Fetching post {}: {}", post.number, post.name);
        let outcome = api
            .fetch_full(post.number)
            .and_then(|full| self.save_item(&full, options.images_subdir));
        match outcome {
            Ok(path) => {
                session.saved_files.push(path);
                Ok(true)
            }
            Err(error) if is_unauthorized(&error) => Err(error),
            Err(error) => {
                error!("Error processing post {}: {error:#}", post.number);
                report.failures.push(ItemFailure {
                    number: post.number,
                    error: format!("{error:#}"),
                });
                Ok(false)
            }
        }
    }
}
