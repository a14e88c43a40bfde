//! Path joining
//!
//! Pure helpers combining a base directory with a request-relative path.
//! Nothing here touches the filesystem.

use std::path::{Path, PathBuf};

// == Combine ==
/// Joins `base` and `rel` with exactly one `/` between them.
///
/// `.` and `..` segments are kept as written. When neither side supplies a
/// separator one is inserted, which is the only case where the result is
/// longer than `base.len() + rel.len()`.
pub fn combine(base: &str, rel: &str) -> String {
    if base.is_empty() {
        return rel.to_string();
    }
    let head = base.strip_suffix('/').unwrap_or(base);
    let tail = rel.strip_prefix('/').unwrap_or(rel);

    let mut out = String::with_capacity(head.len() + tail.len() + 1);
    out.push_str(head);
    out.push('/');
    out.push_str(tail);
    out
}

// == Combine Confined ==
/// Joins `base` and `rel` so that the result can never name anything above `base`.
///
/// `..` is resolved against the segments already joined rather than against
/// the filesystem; a `..` with nothing left to pop is dropped. Empty and `.`
/// segments are skipped. The function is total: every input yields a path
/// whose prefix is `base`.
pub fn combine_confined(base: &str, rel: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in rel.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            name => segments.push(name),
        }
    }

    let head = base.strip_suffix('/').unwrap_or(base);
    let mut out = String::with_capacity(base.len() + rel.len());
    out.push_str(head);
    for (i, segment) in segments.iter().enumerate() {
        if i > 0 || !base.is_empty() {
            out.push('/');
        }
        out.push_str(segment);
    }
    if rel.ends_with('/') && !segments.is_empty() {
        out.push('/');
    }
    if out.is_empty() && !base.is_empty() {
        // base was "/" and rel resolved to nothing
        out.push('/');
    }
    out
}

// == Resolve Source ==
/// Canonical registry key for a page: absolute paths as-is, others under `work_dir`.
pub fn resolve_source(work_dir: &Path, path: &str) -> PathBuf {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        PathBuf::from(combine(&work_dir.to_string_lossy(), path))
    }
}
