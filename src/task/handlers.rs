//! One handler per task mode
//!
//! Handlers validate their parameters, drive the injected engine, and report
//! progress through the throttled reporter. Every per-page and per-file loop
//! starts with a cancellation checkpoint so a cancel request lands at the
//! next safe point.

use std::path::{Path, PathBuf};

use log::warn;

use crate::engine::{
    CompressionLevel, DocMetadata, DocumentEngine, DocumentHandle, EngineError, SaveOptions,
    TextSpec,
};

use super::atomic_write::{atomic_save_doc, atomic_write};
use super::page_range::parse_page_range;
use super::request::{TaskError, TaskMode};
use super::runner::TaskCtx;
use super::{
    DEFAULT_PAGE_SIZE, MAX_PAGE_RANGE_LENGTH, WATERMARK_TILE_SPACING_X, WATERMARK_TILE_SPACING_Y,
};

/// Page margin for positioned text, in points
const TEXT_MARGIN: f32 = 36.0;

pub fn execute(mode: TaskMode, ctx: &mut TaskCtx) -> Result<String, TaskError> {
    match mode {
        TaskMode::Merge => merge(ctx),
        TaskMode::Split => split(ctx),
        TaskMode::SplitByPages => split_by_pages(ctx),
        TaskMode::DeletePages => delete_pages(ctx),
        TaskMode::Rotate => rotate(ctx),
        TaskMode::Reorder => reorder(ctx),
        TaskMode::ReversePages => reverse_pages(ctx),
        TaskMode::DuplicatePage => duplicate_page(ctx),
        TaskMode::InsertBlankPage => insert_blank_page(ctx),
        TaskMode::PageNumbers => page_numbers(ctx),
        TaskMode::Watermark => watermark(ctx),
        TaskMode::Stamp => stamp(ctx),
        TaskMode::MetadataUpdate => metadata_update(ctx),
        TaskMode::Protect => protect(ctx),
        TaskMode::Compress => compress(ctx),
        TaskMode::ExtractText => extract_text(ctx),
    }
}

fn merge(ctx: &mut TaskCtx) -> Result<String, TaskError> {
    let files = ctx.params.path_list("files")?;
    if files.len() < 2 {
        return Err(TaskError::Unexpected(
            "merge needs at least two input files".into(),
        ));
    }
    let output = ctx.params.path("output_path")?;

    let mut doc = ctx.engine.create()?;
    let mut skipped = 0usize;
    for (done, file) in files.iter().enumerate() {
        ctx.cancel.checkpoint()?;
        match doc.append_pages_from(file, None) {
            Ok(()) => {}
            Err(EngineError::Encrypted) => {
                warn!("skipping encrypted input {}", file.display());
                skipped += 1;
            }
            Err(e) => return Err(e.into()),
        }
        ctx.progress.report_span(done + 1, files.len(), 0, 90);
    }
    if doc.page_count() == 0 {
        return Err(TaskError::Unexpected(
            "none of the inputs contributed any pages".into(),
        ));
    }
    atomic_save_doc(&output, ctx.cancel, doc.as_mut(), &SaveOptions::default())?;

    let merged = files.len() - skipped;
    Ok(if skipped > 0 {
        format!(
            "Merged {merged} files into {} ({skipped} encrypted skipped)",
            output.display()
        )
    } else {
        format!("Merged {merged} files into {}", output.display())
    })
}

fn split(ctx: &mut TaskCtx) -> Result<String, TaskError> {
    let source = ctx.params.path("file_path")?;
    let out_dir = ctx.params.path("output_dir")?;
    let total = open_unencrypted(ctx.engine, &source)?.page_count();
    let pages = required_pages(ctx, "page_range", total)?;

    ctx.cancel.checkpoint()?;
    let mut doc = ctx.engine.create()?;
    doc.append_pages_from(&source, Some(&pages))?;
    ctx.progress.report(80);

    let dest = out_dir.join(format!("{}_extracted.pdf", stem(&source)));
    atomic_save_doc(&dest, ctx.cancel, doc.as_mut(), &SaveOptions::default())?;
    Ok(format!(
        "Extracted {} pages to {}",
        pages.len(),
        dest.display()
    ))
}

fn split_by_pages(ctx: &mut TaskCtx) -> Result<String, TaskError> {
    let source = ctx.params.path("file_path")?;
    let out_dir = ctx.params.path("output_dir")?;
    let total = open_unencrypted(ctx.engine, &source)?.page_count();
    if total == 0 {
        return Err(TaskError::Unexpected("document has no pages".into()));
    }

    let base = stem(&source);
    for index in 0..total {
        ctx.cancel.checkpoint()?;
        let mut doc = ctx.engine.create()?;
        doc.append_pages_from(&source, Some(&[index]))?;
        let dest = out_dir.join(format!("{base}_page_{}.pdf", index + 1));
        atomic_save_doc(&dest, ctx.cancel, doc.as_mut(), &SaveOptions::default())?;
        ctx.progress.report_span(index + 1, total, 0, 95);
    }
    Ok(format!("Split into {total} files in {}", out_dir.display()))
}

fn delete_pages(ctx: &mut TaskCtx) -> Result<String, TaskError> {
    let (source, output) = source_and_output(ctx)?;
    let mut doc = open_unencrypted(ctx.engine, &source)?;
    let total = doc.page_count();
    let mut pages = required_pages(ctx, "page_range", total)?;
    if pages.len() >= total {
        return Err(TaskError::Unexpected(
            "cannot delete every page of the document".into(),
        ));
    }

    // Back-to-front so earlier deletions don't shift later indices
    pages.sort_unstable();
    let count = pages.len();
    for (done, &page) in pages.iter().rev().enumerate() {
        ctx.cancel.checkpoint()?;
        doc.delete_page(page)?;
        ctx.progress.report_span(done + 1, count, 0, 90);
    }
    atomic_save_doc(&output, ctx.cancel, doc.as_mut(), &SaveOptions::default())?;
    Ok(format!("Deleted {count} pages"))
}

fn rotate(ctx: &mut TaskCtx) -> Result<String, TaskError> {
    let (source, output) = source_and_output(ctx)?;
    let degrees = ctx.params.i64_or("degrees", 90);
    if degrees % 90 != 0 || !(-360..=360).contains(&degrees) {
        return Err(TaskError::Unexpected(format!(
            "rotation must be a multiple of 90 between -360 and 360, got {degrees}"
        )));
    }

    let mut doc = open_unencrypted(ctx.engine, &source)?;
    let total = doc.page_count();
    let pages = optional_pages(ctx, total)?;
    for (done, &page) in pages.iter().enumerate() {
        ctx.cancel.checkpoint()?;
        doc.rotate_page(page, degrees as i32)?;
        ctx.progress.report_span(done + 1, pages.len(), 0, 90);
    }
    atomic_save_doc(&output, ctx.cancel, doc.as_mut(), &SaveOptions::default())?;
    Ok(format!("Rotated {} pages by {degrees}°", pages.len()))
}

fn reorder(ctx: &mut TaskCtx) -> Result<String, TaskError> {
    let (source, output) = source_and_output(ctx)?;
    let order = ctx.params.usize_list("page_order")?;
    let total = open_unencrypted(ctx.engine, &source)?.page_count();

    let mut seen = vec![false; total];
    let mut valid = order.len() == total;
    for &page in &order {
        if page >= total || std::mem::replace(&mut seen[page], true) {
            valid = false;
            break;
        }
    }
    if !valid {
        return Err(TaskError::Unexpected(format!(
            "page order must be a permutation of 0..{total}"
        )));
    }

    rebuild_in_order(ctx, &source, &output, &order)?;
    Ok(format!("Reordered {total} pages"))
}

fn reverse_pages(ctx: &mut TaskCtx) -> Result<String, TaskError> {
    let (source, output) = source_and_output(ctx)?;
    let total = open_unencrypted(ctx.engine, &source)?.page_count();
    if total < 2 {
        return Err(TaskError::Unexpected(
            "document has fewer than two pages".into(),
        ));
    }
    let order: Vec<usize> = (0..total).rev().collect();
    rebuild_in_order(ctx, &source, &output, &order)?;
    Ok(format!("Reversed {total} pages"))
}

fn duplicate_page(ctx: &mut TaskCtx) -> Result<String, TaskError> {
    let (source, output) = source_and_output(ctx)?;
    let page_number = ctx.params.i64("page_number")?;
    let total = open_unencrypted(ctx.engine, &source)?.page_count();
    if page_number < 1 || page_number > total as i64 {
        return Err(TaskError::Unexpected(format!(
            "page {page_number} out of range 1..={total}"
        )));
    }

    let target = (page_number - 1) as usize;
    let mut order = Vec::with_capacity(total + 1);
    for i in 0..total {
        order.push(i);
        if i == target {
            order.push(i);
        }
    }
    rebuild_in_order(ctx, &source, &output, &order)?;
    Ok(format!("Duplicated page {page_number}"))
}

fn insert_blank_page(ctx: &mut TaskCtx) -> Result<String, TaskError> {
    let (source, output) = source_and_output(ctx)?;
    let mut doc = open_unencrypted(ctx.engine, &source)?;
    let total = doc.page_count();

    // 1-based "insert before page n"; n = total + 1 appends
    let position = ctx.params.i64_or("position", total as i64 + 1);
    if position < 1 || position > total as i64 + 1 {
        return Err(TaskError::Unexpected(format!(
            "insert position {position} out of range 1..={}",
            total + 1
        )));
    }
    let width = ctx.params.f32_or("width", DEFAULT_PAGE_SIZE.0);
    let height = ctx.params.f32_or("height", DEFAULT_PAGE_SIZE.1);

    ctx.cancel.checkpoint()?;
    doc.insert_blank_page((position - 1) as usize, width, height)?;
    ctx.progress.report(80);
    atomic_save_doc(&output, ctx.cancel, doc.as_mut(), &SaveOptions::default())?;
    Ok(format!("Inserted a blank page at position {position}"))
}

fn page_numbers(ctx: &mut TaskCtx) -> Result<String, TaskError> {
    let (source, output) = source_and_output(ctx)?;
    let template = ctx.params.str_or("template", "{page} / {total}").to_string();
    let position = ctx.params.str_or("position", "bottom-center").to_string();
    let font_size = ctx.params.f32_or("font_size", 11.0);
    let start = ctx.params.i64_or("start", 1);
    let skip_first = ctx.params.bool_or("skip_first", false);
    let color = ctx.params.color_or("color", (0.0, 0.0, 0.0));

    let mut doc = open_unencrypted(ctx.engine, &source)?;
    let total = doc.page_count();
    let label_total = total as i64 + start - 1;

    let mut numbered = 0usize;
    for index in 0..total {
        ctx.cancel.checkpoint()?;
        if skip_first && index == 0 {
            continue;
        }
        let text = template
            .replace("{page}", &(start + index as i64).to_string())
            .replace("{total}", &label_total.to_string());
        let page = doc.page_size(index)?;
        let (x, y) = anchor_point(&position, page, font_size, text.chars().count());
        doc.draw_text(
            index,
            &TextSpec {
                text,
                x,
                y,
                font_size,
                color,
                ..TextSpec::default()
            },
        )?;
        numbered += 1;
        ctx.progress.report_span(index + 1, total, 0, 90);
    }
    atomic_save_doc(&output, ctx.cancel, doc.as_mut(), &SaveOptions::default())?;
    Ok(format!("Numbered {numbered} pages"))
}

fn watermark(ctx: &mut TaskCtx) -> Result<String, TaskError> {
    let (source, output) = source_and_output(ctx)?;
    let text = ctx.params.str("text")?.trim().to_string();
    if text.is_empty() {
        return Err(TaskError::Unexpected("watermark text is empty".into()));
    }
    let position = ctx.params.str_or("position", "center").to_string();
    let opacity = ctx.params.f32_or("opacity", 0.3).clamp(0.05, 1.0);
    let font_size = ctx.params.f32_or("font_size", 48.0);
    let color = ctx.params.color_or("color", (0.6, 0.6, 0.6));
    let diagonal = matches!(position.as_str(), "center" | "tile");
    let rotation = ctx
        .params
        .f32_or("rotation", if diagonal { 45.0 } else { 0.0 });

    let spec = |text: String, x: f32, y: f32| TextSpec {
        text,
        x,
        y,
        font_size,
        rotation,
        color,
        opacity,
    };

    let mut doc = open_unencrypted(ctx.engine, &source)?;
    let total = doc.page_count();
    for index in 0..total {
        ctx.cancel.checkpoint()?;
        let (width, height) = doc.page_size(index)?;
        if position == "tile" {
            let mut y = WATERMARK_TILE_SPACING_Y / 2.0;
            while y < height {
                let mut x = WATERMARK_TILE_SPACING_X / 2.0;
                while x < width {
                    doc.draw_text(index, &spec(text.clone(), x, y))?;
                    x += WATERMARK_TILE_SPACING_X;
                }
                y += WATERMARK_TILE_SPACING_Y;
            }
        } else {
            let (x, y) = anchor_point(&position, (width, height), font_size, text.chars().count());
            doc.draw_text(index, &spec(text.clone(), x, y))?;
        }
        ctx.progress.report_span(index + 1, total, 0, 90);
    }
    atomic_save_doc(&output, ctx.cancel, doc.as_mut(), &SaveOptions::default())?;
    Ok(format!("Watermarked {total} pages"))
}

fn stamp(ctx: &mut TaskCtx) -> Result<String, TaskError> {
    let (source, output) = source_and_output(ctx)?;
    let text = ctx.params.str("text")?.trim().to_string();
    if text.is_empty() {
        return Err(TaskError::Unexpected("stamp text is empty".into()));
    }
    let position = ctx.params.str_or("position", "top-right").to_string();
    let font_size = ctx.params.f32_or("font_size", 10.0);
    let color = ctx.params.color_or("color", (0.8, 0.0, 0.0));
    let opacity = ctx.params.f32_or("opacity", 1.0).clamp(0.05, 1.0);

    let mut doc = open_unencrypted(ctx.engine, &source)?;
    let total = doc.page_count();
    for index in 0..total {
        ctx.cancel.checkpoint()?;
        let page = doc.page_size(index)?;
        let (x, y) = anchor_point(&position, page, font_size, text.chars().count());
        doc.draw_text(
            index,
            &TextSpec {
                text: text.clone(),
                x,
                y,
                font_size,
                color,
                opacity,
                ..TextSpec::default()
            },
        )?;
        ctx.progress.report_span(index + 1, total, 0, 90);
    }
    atomic_save_doc(&output, ctx.cancel, doc.as_mut(), &SaveOptions::default())?;
    Ok(format!("Stamped {total} pages"))
}

fn metadata_update(ctx: &mut TaskCtx) -> Result<String, TaskError> {
    let (source, output) = source_and_output(ctx)?;
    let meta = DocMetadata {
        title: non_empty(ctx.params.str_or("title", "")),
        author: non_empty(ctx.params.str_or("author", "")),
        subject: non_empty(ctx.params.str_or("subject", "")),
        keywords: non_empty(ctx.params.str_or("keywords", "")),
    };
    if meta.title.is_none()
        && meta.author.is_none()
        && meta.subject.is_none()
        && meta.keywords.is_none()
    {
        return Err(TaskError::Unexpected("no metadata fields provided".into()));
    }

    let mut doc = open_unencrypted(ctx.engine, &source)?;
    ctx.cancel.checkpoint()?;
    doc.set_metadata(&meta)?;
    ctx.progress.report(80);
    atomic_save_doc(&output, ctx.cancel, doc.as_mut(), &SaveOptions::default())?;
    Ok("Updated document metadata".to_string())
}

fn protect(ctx: &mut TaskCtx) -> Result<String, TaskError> {
    let (source, output) = source_and_output(ctx)?;
    let password = ctx.params.str_or("password", "").to_string();
    if password.is_empty() {
        return Err(TaskError::Unexpected("no password provided".into()));
    }

    let mut doc = open_unencrypted(ctx.engine, &source)?;
    ctx.cancel.checkpoint()?;
    doc.set_protection(&password)?;
    ctx.progress.report(80);
    atomic_save_doc(&output, ctx.cancel, doc.as_mut(), &SaveOptions::default())?;
    Ok("Document encrypted".to_string())
}

fn compress(ctx: &mut TaskCtx) -> Result<String, TaskError> {
    let (source, output) = source_and_output(ctx)?;
    let level = compression_level(ctx.params.str_or("level", "medium"))?;
    let before = std::fs::metadata(&source)
        .map_err(|e| TaskError::from_io(e, &source))?
        .len();

    let mut doc = open_unencrypted(ctx.engine, &source)?;
    let total = doc.page_count();
    // Scan phase, mostly to surface damaged pages before rewriting
    for index in 0..total {
        ctx.cancel.checkpoint()?;
        doc.page_size(index)?;
        ctx.progress.report_span(index + 1, total, 0, 20);
    }

    let options = SaveOptions {
        compression: Some(level),
    };
    atomic_save_doc(&output, ctx.cancel, doc.as_mut(), &options)?;
    ctx.progress.report(95);

    let after = std::fs::metadata(&output)
        .map_err(|e| TaskError::from_io(e, &output))?
        .len();
    Ok(if after < before && before > 0 {
        let pct = (before - after) * 100 / before;
        format!(
            "Compressed {} → {} ({pct}% smaller)",
            format_bytes(before),
            format_bytes(after)
        )
    } else {
        format!("Rewrote document ({}), no further reduction", format_bytes(after))
    })
}

fn extract_text(ctx: &mut TaskCtx) -> Result<String, TaskError> {
    let files = match ctx.params.path_list("file_paths") {
        Ok(paths) if !paths.is_empty() => paths,
        _ => vec![ctx.params.path("file_path")?],
    };
    let out_dir = ctx.params.path("output_dir")?;

    for (done, file) in files.iter().enumerate() {
        ctx.cancel.checkpoint()?;
        let doc = open_unencrypted(ctx.engine, file)?;
        let mut text = String::new();
        for index in 0..doc.page_count() {
            ctx.cancel.checkpoint()?;
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(doc.page_text(index)?.trim_end());
            text.push('\n');
        }
        let dest = out_dir.join(format!("{}.txt", stem(file)));
        atomic_write(&dest, ctx.cancel, |tmp| {
            std::fs::write(tmp, &text).map_err(|e| TaskError::from_io(e, tmp))
        })?;
        ctx.progress.report_span(done + 1, files.len(), 0, 95);
    }
    Ok(format!(
        "Extracted text from {} file(s) into {}",
        files.len(),
        out_dir.display()
    ))
}

/// Open a document, rejecting encrypted ones up front
fn open_unencrypted(
    engine: &dyn DocumentEngine,
    path: &Path,
) -> Result<Box<dyn DocumentHandle>, TaskError> {
    let doc = engine.open(path)?;
    if doc.is_encrypted() {
        return Err(TaskError::CorruptInput(format!(
            "{} is encrypted",
            path.display()
        )));
    }
    Ok(doc)
}

/// `file_path` is the primary input; `output_path` defaults to overwriting it
fn source_and_output(ctx: &TaskCtx) -> Result<(PathBuf, PathBuf), TaskError> {
    let source = ctx.params.path("file_path")?;
    let output = ctx
        .params
        .path("output_path")
        .unwrap_or_else(|_| source.clone());
    Ok((source, output))
}

/// Copy the source's pages into a fresh document in the given order
fn rebuild_in_order(
    ctx: &mut TaskCtx,
    source: &Path,
    output: &Path,
    order: &[usize],
) -> Result<(), TaskError> {
    ctx.cancel.checkpoint()?;
    let mut doc = ctx.engine.create()?;
    doc.append_pages_from(source, Some(order))?;
    ctx.progress.report(80);
    atomic_save_doc(output, ctx.cancel, doc.as_mut(), &SaveOptions::default())
}

/// Parse a required page-range parameter; selecting nothing is an error
fn required_pages(ctx: &TaskCtx, key: &str, total: usize) -> Result<Vec<usize>, TaskError> {
    let range = ctx.params.str(key)?;
    let parsed = parse_page_range(range, total, MAX_PAGE_RANGE_LENGTH);
    if parsed.pages.is_empty() {
        return Err(TaskError::Unexpected(format!(
            "page range {range:?} selects no pages"
        )));
    }
    Ok(parsed.pages)
}

/// Optional `page_range` parameter; absent means every page
fn optional_pages(ctx: &TaskCtx, total: usize) -> Result<Vec<usize>, TaskError> {
    match ctx.params.str("page_range") {
        Ok(_) => required_pages(ctx, "page_range", total),
        Err(_) => Ok((0..total).collect()),
    }
}

/// Lower-left text origin for a named position on the page
fn anchor_point(
    position: &str,
    (width, height): (f32, f32),
    font_size: f32,
    text_len: usize,
) -> (f32, f32) {
    // Rough width for a proportional font; exact centering is not required
    let text_width = 0.5 * font_size * text_len as f32;
    let x = match position {
        "top-left" | "bottom-left" => TEXT_MARGIN,
        "top-right" | "bottom-right" => (width - TEXT_MARGIN - text_width).max(TEXT_MARGIN),
        _ => ((width - text_width) / 2.0).max(TEXT_MARGIN),
    };
    let y = match position {
        "top-left" | "top-center" | "top-right" => height - TEXT_MARGIN - font_size,
        "bottom-left" | "bottom-center" | "bottom-right" => TEXT_MARGIN,
        _ => height / 2.0,
    };
    (x, y)
}

fn compression_level(name: &str) -> Result<CompressionLevel, TaskError> {
    match name {
        "low" => Ok(CompressionLevel::Low),
        "medium" => Ok(CompressionLevel::Medium),
        "high" => Ok(CompressionLevel::High),
        other => Err(TaskError::Unexpected(format!(
            "unknown compression level {other:?}"
        ))),
    }
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    if s.is_empty() { None } else { Some(s.to_string()) }
}

fn stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output")
        .to_string()
}

fn format_bytes(bytes: u64) -> String {
    const MB: f64 = 1024.0 * 1024.0;
    const KB: f64 = 1024.0;
    let b = bytes as f64;
    if b >= MB {
        format!("{:.1} MB", b / MB)
    } else if b >= KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fake::{self, FakeEngine};
    use crate::task::preflight::SizeLimits;
    use crate::task::progress::ProgressThrottle;
    use crate::task::request::{TaskId, TaskParams};
    use crate::task::runner::{CancelFlag, Progress};

    fn exec(mode: TaskMode, params: &TaskParams) -> Result<String, TaskError> {
        exec_with_cancel(mode, params, &CancelFlag::new())
    }

    fn exec_with_cancel(
        mode: TaskMode,
        params: &TaskParams,
        cancel: &CancelFlag,
    ) -> Result<String, TaskError> {
        let engine = FakeEngine::new();
        let (tx, _rx) = flume::unbounded();
        let mut progress = Progress::new(TaskId::new(1), tx, ProgressThrottle::default());
        let limits = SizeLimits::default();
        let mut ctx = TaskCtx {
            engine: &engine,
            params,
            cancel,
            progress: &mut progress,
            limits: &limits,
        };
        execute(mode, &mut ctx)
    }

    fn p(path: &std::path::Path) -> String {
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn merge_concatenates_inputs_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.json");
        let b = dir.path().join("b.json");
        let out = dir.path().join("merged.json");
        fake::write_doc(&a, 2);
        fake::write_doc(&b, 3);

        let params = TaskParams::new()
            .with("files", vec![p(&a), p(&b)])
            .with("output_path", p(&out));
        exec(TaskMode::Merge, &params).unwrap();

        let merged = fake::read_doc(&out);
        assert_eq!(merged.pages.len(), 5);
        assert_eq!(merged.pages[0].text, "page 1");
        assert_eq!(merged.pages[2].text, "page 1"); // first page of b
    }

    #[test]
    fn merge_skips_encrypted_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.json");
        let locked = dir.path().join("locked.json");
        let out = dir.path().join("merged.json");
        fake::write_doc(&a, 2);
        fake::write_encrypted_doc(&locked, 4);

        let params = TaskParams::new()
            .with("files", vec![p(&a), p(&locked)])
            .with("output_path", p(&out));
        let message = exec(TaskMode::Merge, &params).unwrap();

        assert!(message.contains("1 encrypted skipped"), "{message}");
        assert_eq!(fake::read_doc(&out).pages.len(), 2);
    }

    #[test]
    fn merge_requires_two_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.json");
        fake::write_doc(&a, 1);
        let params = TaskParams::new()
            .with("files", vec![p(&a)])
            .with("output_path", p(&dir.path().join("out.json")));
        assert!(exec(TaskMode::Merge, &params).is_err());
    }

    #[test]
    fn split_extracts_range_to_named_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("report.json");
        fake::write_doc(&src, 6);

        let params = TaskParams::new()
            .with("file_path", p(&src))
            .with("page_range", "2-4")
            .with("output_dir", p(dir.path()));
        exec(TaskMode::Split, &params).unwrap();

        let out = fake::read_doc(&dir.path().join("report_extracted.pdf"));
        assert_eq!(out.pages.len(), 3);
        assert_eq!(out.pages[0].text, "page 2");
    }

    #[test]
    fn split_by_pages_writes_one_file_per_page() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("doc.json");
        fake::write_doc(&src, 3);

        let params = TaskParams::new()
            .with("file_path", p(&src))
            .with("output_dir", p(dir.path()));
        exec(TaskMode::SplitByPages, &params).unwrap();

        for n in 1..=3 {
            let part = fake::read_doc(&dir.path().join(format!("doc_page_{n}.pdf")));
            assert_eq!(part.pages.len(), 1);
            assert_eq!(part.pages[0].text, format!("page {n}"));
        }
    }

    #[test]
    fn delete_pages_removes_selected_pages() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("doc.json");
        let out = dir.path().join("out.json");
        fake::write_doc(&src, 5);

        let params = TaskParams::new()
            .with("file_path", p(&src))
            .with("output_path", p(&out))
            .with("page_range", "2,4");
        exec(TaskMode::DeletePages, &params).unwrap();

        let texts: Vec<_> = fake::read_doc(&out)
            .pages
            .iter()
            .map(|pg| pg.text.clone())
            .collect();
        assert_eq!(texts, vec!["page 1", "page 3", "page 5"]);
    }

    #[test]
    fn delete_pages_refuses_to_empty_the_document() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("doc.json");
        fake::write_doc(&src, 2);
        let params = TaskParams::new()
            .with("file_path", p(&src))
            .with("page_range", "1-2");
        let err = exec(TaskMode::DeletePages, &params).unwrap_err();
        assert!(err.to_string().contains("every page"), "{err}");
    }

    #[test]
    fn rotate_defaults_to_all_pages_90_degrees() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("doc.json");
        fake::write_doc(&src, 3);
        let params = TaskParams::new().with("file_path", p(&src));
        exec(TaskMode::Rotate, &params).unwrap();
        assert!(fake::read_doc(&src).pages.iter().all(|pg| pg.rotation == 90));
    }

    #[test]
    fn rotate_rejects_non_right_angles() {
        let params = TaskParams::new()
            .with("file_path", "whatever.json")
            .with("degrees", 45);
        assert!(exec(TaskMode::Rotate, &params).is_err());
    }

    #[test]
    fn rotate_rejects_out_of_range_degrees() {
        // A multiple of 90 far beyond a full turn must not wrap into an
        // arbitrary angle
        let params = TaskParams::new()
            .with("file_path", "whatever.json")
            .with("degrees", 36_000_000_000_i64);
        assert!(exec(TaskMode::Rotate, &params).is_err());
        let params = TaskParams::new()
            .with("file_path", "whatever.json")
            .with("degrees", 450);
        assert!(exec(TaskMode::Rotate, &params).is_err());
    }

    #[test]
    fn reorder_applies_permutation() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("doc.json");
        let out = dir.path().join("out.json");
        fake::write_doc(&src, 3);

        let params = TaskParams::new()
            .with("file_path", p(&src))
            .with("output_path", p(&out))
            .with("page_order", vec![2, 0, 1]);
        exec(TaskMode::Reorder, &params).unwrap();

        let texts: Vec<_> = fake::read_doc(&out)
            .pages
            .iter()
            .map(|pg| pg.text.clone())
            .collect();
        assert_eq!(texts, vec!["page 3", "page 1", "page 2"]);
    }

    #[test]
    fn reorder_rejects_non_permutations() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("doc.json");
        fake::write_doc(&src, 3);
        for bad in [vec![0, 1], vec![0, 1, 1], vec![0, 1, 5]] {
            let params = TaskParams::new()
                .with("file_path", p(&src))
                .with("page_order", bad.clone());
            assert!(exec(TaskMode::Reorder, &params).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn reverse_and_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("doc.json");
        fake::write_doc(&src, 3);

        let params = TaskParams::new().with("file_path", p(&src));
        exec(TaskMode::ReversePages, &params).unwrap();
        let texts: Vec<_> = fake::read_doc(&src)
            .pages
            .iter()
            .map(|pg| pg.text.clone())
            .collect();
        assert_eq!(texts, vec!["page 3", "page 2", "page 1"]);

        let params = params.with("page_number", 2);
        exec(TaskMode::DuplicatePage, &params).unwrap();
        assert_eq!(fake::read_doc(&src).pages.len(), 4);
    }

    #[test]
    fn insert_blank_page_defaults_to_a4_at_end() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("doc.json");
        fake::write_doc(&src, 2);
        let params = TaskParams::new().with("file_path", p(&src));
        exec(TaskMode::InsertBlankPage, &params).unwrap();

        let doc = fake::read_doc(&src);
        assert_eq!(doc.pages.len(), 3);
        let blank = &doc.pages[2];
        assert_eq!((blank.width, blank.height), DEFAULT_PAGE_SIZE);
        assert!(blank.text.is_empty());
    }

    #[test]
    fn page_numbers_skip_first_leaves_first_page_clean() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("doc.json");
        fake::write_doc(&src, 3);
        let params = TaskParams::new()
            .with("file_path", p(&src))
            .with("skip_first", true);
        exec(TaskMode::PageNumbers, &params).unwrap();

        let doc = fake::read_doc(&src);
        assert!(doc.pages[0].overlays.is_empty());
        assert!(doc.pages[1].overlays[0].starts_with("2 / 3"));
        assert!(doc.pages[2].overlays[0].starts_with("3 / 3"));
    }

    #[test]
    fn watermark_requires_text_and_tiles_cover_the_page() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("doc.json");
        fake::write_doc(&src, 1);

        let empty = TaskParams::new().with("file_path", p(&src)).with("text", "  ");
        assert!(exec(TaskMode::Watermark, &empty).is_err());

        let tiled = TaskParams::new()
            .with("file_path", p(&src))
            .with("text", "DRAFT")
            .with("position", "tile");
        exec(TaskMode::Watermark, &tiled).unwrap();
        // 595x842 page with 300x200 spacing yields a 2x4 grid
        assert_eq!(fake::read_doc(&src).pages[0].overlays.len(), 8);
    }

    #[test]
    fn metadata_update_only_touches_non_empty_fields() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("doc.json");
        fake::write_doc(&src, 1);

        let params = TaskParams::new()
            .with("file_path", p(&src))
            .with("title", "Quarterly Report")
            .with("author", "");
        exec(TaskMode::MetadataUpdate, &params).unwrap();

        let doc = fake::read_doc(&src);
        assert_eq!(doc.title.as_deref(), Some("Quarterly Report"));
        assert_eq!(doc.author, None);
    }

    #[test]
    fn protect_encrypts_the_document() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("doc.json");
        fake::write_doc(&src, 2);

        let params = TaskParams::new()
            .with("file_path", p(&src))
            .with("password", "hunter2");
        exec(TaskMode::Protect, &params).unwrap();

        let doc = fake::read_doc(&src);
        assert!(doc.encrypted);
        assert_eq!(doc.password.as_deref(), Some("hunter2"));
    }

    #[test]
    fn protect_requires_a_password() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("doc.json");
        fake::write_doc(&src, 1);

        let params = TaskParams::new().with("file_path", p(&src));
        let err = exec(TaskMode::Protect, &params).unwrap_err();
        assert!(err.to_string().contains("password"), "{err}");
        assert!(!fake::read_doc(&src).encrypted, "input must be untouched");
    }

    #[test]
    fn extract_text_writes_one_txt_per_input() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.json");
        let b = dir.path().join("b.json");
        fake::write_doc(&a, 2);
        fake::write_doc(&b, 1);

        let params = TaskParams::new()
            .with("file_paths", vec![p(&a), p(&b)])
            .with("output_dir", p(dir.path()));
        exec(TaskMode::ExtractText, &params).unwrap();

        let text = std::fs::read_to_string(dir.path().join("a.txt")).unwrap();
        assert!(text.contains("page 1"));
        assert!(text.contains("page 2"));
        assert!(dir.path().join("b.txt").is_file());
    }

    #[test]
    fn pre_cancelled_flag_stops_before_output_exists() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("doc.json");
        let out = dir.path().join("out.json");
        fake::write_doc(&src, 3);

        let cancel = CancelFlag::new();
        cancel.request();
        let params = TaskParams::new()
            .with("file_path", p(&src))
            .with("output_path", p(&out))
            .with("page_range", "1");
        let err = exec_with_cancel(TaskMode::DeletePages, &params, &cancel).unwrap_err();
        assert!(matches!(err, TaskError::Cancelled));
        assert!(!out.exists());
    }

    #[test]
    fn format_bytes_picks_sane_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }
}
