// src/main.rs
//
// closetag-spacing: tidy bare closing tags in markdown
//
// - Single pass over the document, line by line; every line keeps its own terminator
//   (none, LF or CRLF).
// - Fenced code blocks (``` or ~~~, 3+ chars, optionally indented) are copied verbatim,
//   delimiter lines included. A fence closes only on a line holding nothing but a run of the
//   opening char at least as long as the opening run. An unterminated fence runs to EOF.
// - Outside fences, a line whose trimmed content is exactly `</name>` (name: ASCII letters,
//   digits, '_' or '-') is rewritten to start at column 0.
// - If the line emitted right before such a tag is a list item (`-`, `*`, `+`, `1.` or `1)`
//   followed by whitespace and content), a blank line is inserted in front of the tag.
// - A closing tag on the first line of a document is left alone.
// - Files are read as UTF-8 with CRLF/CR normalized to LF, and only written back when a
//   rewrite applies.
//
// Exit status: 1 if any file was rewritten (or a file could not be read/written), 0 otherwise.
// Diagnostics: RUST_LOG=debug

use anyhow::Context;
use clap::Parser;
use log::{debug, info};
use memchr::memchr;
use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// CLI arguments
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Markdown files to fix in place; directories and missing paths are skipped
    files: Vec<PathBuf>,
}

fn main() -> anyhow::Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let changed_any = cli
        .files
        .iter()
        .filter(|path| {
            let keep = path.is_file();
            if !keep {
                debug!("skipping {}: not a regular file", path.display());
            }
            keep
        })
        .try_fold(false, |changed, path| anyhow::Ok(fix_file(path)? | changed))?;

    Ok(if changed_any {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

/* ================================ Lines ================================== */

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Newline {
    None,
    Lf,
    CrLf,
}

impl Newline {
    fn as_str(self) -> &'static str {
        match self {
            Newline::None => "",
            Newline::Lf => "\n",
            Newline::CrLf => "\r\n",
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Line<'a> {
    raw: &'a str,     // including the terminator
    content: &'a str, // without the terminator
    newline: Newline,
}

impl<'a> Line<'a> {
    fn new(raw: &'a str) -> Self {
        let (content, newline) = if let Some(c) = raw.strip_suffix("\r\n") {
            (c, Newline::CrLf)
        } else if let Some(c) = raw.strip_suffix('\n') {
            (c, Newline::Lf)
        } else {
            (raw, Newline::None)
        };
        Line {
            raw,
            content,
            newline,
        }
    }
}

/// Split `src` after every LF. Concatenating the `raw` parts gives back `src`.
fn split_lines(src: &str) -> impl Iterator<Item = Line<'_>> {
    let bytes = src.as_bytes();
    let mut start = 0usize;
    std::iter::from_fn(move || {
        if start >= bytes.len() {
            return None;
        }
        let end = memchr(b'\n', &bytes[start..]).map_or(bytes.len(), |p| start + p + 1);
        let line = Line::new(&src[start..end]);
        start = end;
        Some(line)
    })
}

/* ================================ Fences ================================= */

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Fence {
    ch: u8,     // '`' or '~'
    len: usize, // length of the opening run
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FenceState {
    Outside,
    Inside(Fence),
}

fn fence_open(line: &str) -> Option<Fence> {
    // ^\s*(```+|~~~+)
    let bytes = line.trim_start().as_bytes();
    let ch = *bytes.first()?;
    if ch != b'`' && ch != b'~' {
        return None;
    }
    let len = bytes.iter().take_while(|&&b| b == ch).count();
    (len >= 3).then_some(Fence { ch, len })
}

fn fence_close(line: &str, f: Fence) -> bool {
    // ^\s*<ch>{len,}\s*$
    let t = line.trim();
    t.len() >= f.len && t.bytes().all(|b| b == f.ch)
}

/// Fence state after `line`. Fence-looking lines of the other char, or shorter runs of the
/// same char, are plain fence content.
fn advance(line: &str, state: FenceState) -> FenceState {
    match state {
        FenceState::Outside => fence_open(line).map_or(FenceState::Outside, FenceState::Inside),
        FenceState::Inside(f) if fence_close(line, f) => FenceState::Outside,
        inside => inside,
    }
}

/* ============================== Predicates =============================== */

#[inline]
fn is_name_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_'
}

/// `</name>` if that is all the line holds, surrounding whitespace aside.
fn closing_tag(line: &str) -> Option<&str> {
    let t = line.trim();
    let name = t.strip_prefix("</")?.strip_suffix('>')?;
    (!name.is_empty() && name.bytes().all(is_name_char)).then_some(t)
}

fn strip_list_marker(s: &str) -> Option<&str> {
    if let Some(rest) = s.strip_prefix(['-', '*', '+']) {
        return Some(rest);
    }
    let digits = s.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    s[digits..].strip_prefix(['.', ')'])
}

/// ^\s*([-*+]|\d+[.)])\s+\S
///
/// Task items (`- [x] done`) need no special case, the checkbox is the item's content.
fn is_list_item(line: &str) -> bool {
    let Some(rest) = strip_list_marker(line.trim_start()) else {
        return false;
    };
    let content = rest.trim_start();
    content.len() < rest.len() && !content.is_empty()
}

/* ========================== Blank-line policy ============================ */

/// Whether a blank line has to go in before a closing tag appended to `out`.
fn needs_blank_line(out: &[Cow<'_, str>]) -> bool {
    let Some(prev) = out.last() else {
        return false;
    };
    let prev = Line::new(prev).content;
    // A list item is never empty; kept so a blank line is never doubled.
    is_list_item(prev) && !prev.is_empty()
}

/* ========================== Closing-tag rewrite ========================== */

/// Replacement for a closing-tag `line` outside fences, or `None` when `line` must be copied
/// as is. May push a blank line onto `out` first.
fn rewrite_closing_tag<'a>(line: Line<'a>, out: &mut Vec<Cow<'a, str>>) -> Option<Cow<'a, str>> {
    let tag = closing_tag(line.content)?;
    if out.is_empty() {
        return None;
    }

    if needs_blank_line(out) {
        // a tag on an unterminated last line still gets a real blank line
        let blank = match line.newline {
            Newline::None => Newline::Lf,
            nl => nl,
        };
        out.push(Cow::Borrowed(blank.as_str()));
    }

    let newline = line.newline.as_str();
    if tag.len() + newline.len() == line.raw.len() {
        Some(Cow::Borrowed(line.raw))
    } else {
        Some(Cow::Owned(format!("{tag}{newline}")))
    }
}

/* =============================== Document ================================ */

fn fix_document(src: &str) -> String {
    let mut out: Vec<Cow<'_, str>> = Vec::new();
    let mut state = FenceState::Outside;

    for line in split_lines(src) {
        let next = advance(line.content, state);
        if next != state {
            // fence delimiters are never rewritten
            state = next;
            out.push(Cow::Borrowed(line.raw));
            continue;
        }

        if state == FenceState::Outside {
            if let Some(tag) = rewrite_closing_tag(line, &mut out) {
                out.push(tag);
                continue;
            }
        }

        out.push(Cow::Borrowed(line.raw));
    }

    out.concat()
}

/* ================================ Files ================================== */

/// CRLF and lone CR become LF.
fn normalize_newlines(text: &str) -> Cow<'_, str> {
    if memchr(b'\r', text.as_bytes()).is_none() {
        return Cow::Borrowed(text);
    }
    Cow::Owned(text.replace("\r\n", "\n").replace('\r', "\n"))
}

/// Fix `path` in place. Returns whether the file was rewritten.
fn fix_file(path: &Path) -> anyhow::Result<bool> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let original = normalize_newlines(&raw);
    let updated = fix_document(&original);

    if updated == original {
        debug!("{}: unchanged", path.display());
        return Ok(false);
    }

    fs::write(path, updated).with_context(|| format!("failed to write {}", path.display()))?;
    info!("{}: rewrote closing tags", path.display());
    Ok(true)
}
