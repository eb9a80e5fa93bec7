//! Rendering a finished document to a Markdown file.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use color_eyre::eyre::{Result, WrapErr};
use longform_shared::{Document, Source};
use serde::Serialize;

const FRONT_MATTER_FENCE: &str = "+++";

#[derive(Serialize)]
struct FrontMatter<'a> {
    title: &'a str,
    subject: &'a str,
    word_count: usize,
    summary: &'a str,
    keywords: &'a [String],
    sources: &'a [Source],
}

/// Lowercase ASCII slug for file names; never empty.
pub(crate) fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "document".to_string()
    } else {
        slug.to_string()
    }
}

/// `<slug(title)>.md` in the current directory.
pub(crate) fn default_output_path(document: &Document) -> PathBuf {
    PathBuf::from(format!("{}.md", slugify(&document.metadata.title)))
}

/// Front matter, body, then the list of sources that carry a URL.
pub(crate) fn render_document(document: &Document, subject: &str) -> Result<String> {
    let meta = &document.metadata;
    let front = toml::to_string_pretty(&FrontMatter {
        title: &meta.title,
        subject,
        word_count: meta.word_count,
        summary: &document.summary,
        keywords: &meta.keywords,
        sources: &meta.sources,
    })
    .wrap_err("failed to serialize front matter")?;

    let mut out = format!("{FRONT_MATTER_FENCE}\n{}\n{FRONT_MATTER_FENCE}\n\n", front.trim_end());
    out.push_str(document.content.trim_end());

    let linked: Vec<&Source> = meta.sources.iter().filter(|s| !s.url.is_empty()).collect();
    if !linked.is_empty() {
        out.push_str("\n\n---\n\n**Sources**\n\n");
        for source in linked {
            let title = if source.title.is_empty() { &source.url } else { &source.title };
            let _ = writeln!(out, "- [{title}]({})", source.url);
        }
    } else {
        out.push('\n');
    }
    Ok(out)
}

pub(crate) fn write_document_file(path: &Path, rendered: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .wrap_err_with(|| format!("cannot create {}", parent.display()))?;
    }
    std::fs::write(path, rendered).wrap_err_with(|| format!("cannot write {}", path.display()))
}
