//! HTML rendering of folder listings.

use maud::{html, Markup, PreEscaped, DOCTYPE};
use std::path::Path;

use crate::scanner::{AssetGroup, FolderListing, GroupMap, Note};

const TITLE: &str = "Model Shelf";

const STYLE: &str = r#"
body { font-family: "Segoe UI", Arial, sans-serif; margin: 20px; background: #f9f9fb; }
h1 { color: #444; border-bottom: 2px solid #007acc; padding-bottom: 5px; }
nav { margin: 20px 0; padding: 12px; background: #eef3f8; border-radius: 8px; }
nav a { text-decoration: none; color: #555; margin: 0 10px; }
nav a.active { font-weight: bold; color: #007acc; }
.item { display: flex; gap: 15px; border: 1px solid #ddd; padding: 16px; margin-bottom: 20px; border-radius: 8px; background: white; }
.thumb { width: 120px; height: 120px; flex-shrink: 0; display: flex; align-items: center; justify-content: center; background: #f0f0f0; overflow: hidden; position: relative; font-size: 0.8em; color: #555; text-align: center; }
.thumb img { max-width: 100%; max-height: 100%; object-fit: contain; }
.badge { position: absolute; top: 5px; right: 5px; background: rgba(0,0,0,0.7); color: white; padding: 2px 6px; border-radius: 3px; }
.content { flex: 1; }
.header { display: flex; align-items: baseline; gap: 10px; margin-bottom: 8px; }
.header h2 { margin: 0; color: #007acc; font-size: 1.2em; }
.info { font-size: 0.9em; color: #666; }
.info .size { color: #28a745; font-weight: bold; margin-right: 8px; }
.info .ext { color: #007acc; font-weight: bold; }
.note { white-space: pre-wrap; background: #f5f5f5; padding: 10px; margin: 8px 0; border: 1px solid #e0e0e0; border-radius: 4px; font-family: monospace; }
.note.error { color: #b00020; }
.missing { color: #aaa; font-style: italic; }
"#;

/// Everything needed to render one folder.
pub struct ListingPage<'a> {
    pub listing: &'a FolderListing,
    /// Selected folder name; empty when the default root is shown.
    pub selected: &'a str,
    pub directory: &'a Path,
    pub groups: &'a GroupMap,
    pub collapse_lines: usize,
}

pub fn render(page: &ListingPage<'_>) -> Markup {
    layout(html! {
        @if page.listing.is_empty() {
            h2 { "No folders found, or the root directory is not accessible." }
            @if let Some(warning) = &page.listing.warning {
                p.missing { (warning) }
            }
        } @else {
            nav {
                @for name in page.listing.names() {
                    a.active[name == page.selected] href=(folder_href(name)) { (name) }
                }
            }
            p {
                strong { "Current directory: " }
                (page.directory.display().to_string())
                " | "
                strong { (page.groups.len()) }
                " models"
            }
            @if page.groups.is_empty() {
                p.missing { "No models found in this directory." }
            }
            @for group in page.groups.values() {
                (group_card(group, page))
            }
        }
    })
}

/// Minimal page for error statuses.
pub fn error_page(status: &str, message: &str) -> Markup {
    layout(html! {
        h2 { (status) }
        p { (message) }
    })
}

fn layout(body: Markup) -> Markup {
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="utf-8";
                title { (TITLE) }
                style { (PreEscaped(STYLE)) }
            }
            body {
                h1 { (TITLE) }
                (body)
            }
        }
    }
}

fn group_card(group: &AssetGroup, page: &ListingPage<'_>) -> Markup {
    html! {
        div.item data-model-name=(group.stem) {
            div.thumb { (preview(group, page.selected)) }
            div.content {
                div.header {
                    h2 { (group.display_name) }
                    @if let Some(model) = &group.model {
                        span.info {
                            span.size { (model.stat.size_display()) }
                            span.ext { (model.extension.to_uppercase()) }
                            " | created " (model.stat.created_display())
                        }
                    } @else {
                        span.info.missing { "no model file" }
                    }
                }
                @match &group.note {
                    Some(note) => { (note_block(note, page.collapse_lines)) },
                    None => p.missing { "No description (.txt)" },
                }
            }
        }
    }
}

fn preview(group: &AssetGroup, selected: &str) -> Markup {
    let video_href = group
        .video
        .as_ref()
        .map(|video| file_href(&video.file_name, selected));

    html! {
        @if let Some(image) = &group.image {
            a href=(file_href(image, selected)) {
                img src=(file_href(image, selected)) alt="preview";
            }
        } @else if let (Some(thumb), Some(video_href)) = (group.thumbnail(), &video_href) {
            a href=(video_href) {
                img src=(file_href(thumb, selected)) alt="video thumbnail";
                span.badge { "video" }
            }
        } @else if let Some(video_href) = &video_href {
            a href=(video_href) { "▶" br; "generating preview…" }
        } @else {
            span.missing { "no preview" }
        }
    }
}

fn note_block(note: &Note, collapse_lines: usize) -> Markup {
    html! {
        @match &note.body {
            Ok(body) if body.needs_collapse => {
                details title={ (body.line_count) " lines" } {
                    summary.note { (body.head(collapse_lines)) "…" }
                    div.note { (body.text) }
                }
            },
            Ok(body) => div.note { (body.text) },
            Err(_) => div.note.error { (note.display_text()) },
        }
    }
}

fn folder_href(name: &str) -> String {
    format!("/?dir={}", urlencoding::encode(name))
}

/// Link to a file served by `/file/`, one encoded segment per path part.
fn file_href(relative: &str, selected: &str) -> String {
    let encoded: Vec<String> = relative
        .split('/')
        .map(|part| urlencoding::encode(part).into_owned())
        .collect();
    let mut href = format!("/file/{}", encoded.join("/"));
    if !selected.is_empty() {
        href.push_str("?dir=");
        href.push_str(&urlencoding::encode(selected));
    }
    href
}
