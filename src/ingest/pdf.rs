use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use tokio::process::Command;

pub const UNKNOWN_AUTHOR: &str = "Autor desconocido";

#[derive(Debug, Clone, PartialEq)]
pub struct PdfPage {
    /// 1-based; `None` when the text came from the whole-document fallback.
    pub page: Option<u32>,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct PdfDocument {
    pub title: String,
    pub authors: String,
    pub page_count: usize,
    pub pages: Vec<PdfPage>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PdfInfo {
    pub title: Option<String>,
    pub author: Option<String>,
    pub pages: Option<usize>,
}

/// Reads metadata and per-page text with poppler when available, falling back
/// to `pdf-extract` for the text of the whole document.
pub async fn extract_pdf(pdf_path: &Path) -> Result<PdfDocument> {
    let info = if has_command("pdfinfo").await {
        match read_pdfinfo(pdf_path).await {
            Ok(info) => info,
            Err(err) => {
                tracing::warn!(path = %pdf_path.display(), "pdfinfo failed: {err:#}");
                PdfInfo::default()
            }
        }
    } else {
        PdfInfo::default()
    };

    let title = info
        .title
        .clone()
        .unwrap_or_else(|| file_stem(pdf_path));
    let authors = info
        .author
        .clone()
        .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string());

    let mut pages = Vec::new();
    let page_count = info.pages.unwrap_or(0);
    if page_count > 0 && has_command("pdftotext").await {
        pages = extract_pages_with_pdftotext(pdf_path, page_count).await?;
    }

    if pages.is_empty() {
        tracing::debug!(path = %pdf_path.display(), "using pdf-extract fallback");
        let path = pdf_path.to_path_buf();
        let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text(&path))
            .await
            .context("pdf-extract task panicked")?
            .with_context(|| format!("failed to extract text from {}", pdf_path.display()))?;

        let content = normalize_text(&text);
        if !content.is_empty() {
            pages.push(PdfPage {
                page: None,
                text: content,
            });
        }
    }

    Ok(PdfDocument {
        title,
        authors,
        page_count,
        pages,
    })
}

async fn extract_pages_with_pdftotext(pdf_path: &Path, page_count: usize) -> Result<Vec<PdfPage>> {
    let mut pages = Vec::new();

    for page in 1..=page_count {
        let output = Command::new("pdftotext")
            .arg("-f")
            .arg(page.to_string())
            .arg("-l")
            .arg(page.to_string())
            .arg("-layout")
            .arg("-nopgbrk")
            .arg(pdf_path)
            .arg("-")
            .output()
            .await
            .with_context(|| format!("failed to run pdftotext for page {}", page))?;

        if !output.status.success() {
            continue;
        }

        let content = normalize_text(&String::from_utf8_lossy(&output.stdout));
        if content.is_empty() {
            continue;
        }

        pages.push(PdfPage {
            page: Some(page as u32),
            text: content,
        });
    }

    Ok(pages)
}

async fn read_pdfinfo(pdf_path: &Path) -> Result<PdfInfo> {
    let output = Command::new("pdfinfo")
        .arg(pdf_path)
        .output()
        .await
        .context("failed to run pdfinfo")?;

    if !output.status.success() {
        return Err(anyhow::anyhow!("pdfinfo exited with non-zero status"));
    }

    parse_pdfinfo(&String::from_utf8_lossy(&output.stdout))
}

pub fn parse_pdfinfo(stdout: &str) -> Result<PdfInfo> {
    let field = |name: &str| -> Result<Option<String>> {
        let regex = Regex::new(&format!(r"(?m)^{name}:[ \t]*(.*?)[ \t]*$"))?;
        Ok(regex
            .captures(stdout)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|value| !value.is_empty()))
    };

    Ok(PdfInfo {
        title: field("Title")?,
        author: field("Author")?,
        pages: field("Pages")?.and_then(|value| value.parse::<usize>().ok()),
    })
}

async fn has_command(binary: &str) -> bool {
    Command::new("which")
        .arg(binary)
        .output()
        .await
        .map(|out| out.status.success() && !out.stdout.is_empty())
        .unwrap_or(false)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "Desconocido".to_string())
}

fn normalize_text(input: &str) -> String {
    input
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace('\u{00A0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
