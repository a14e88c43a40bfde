//! Template translation seam.

use crate::error::{PageError, Result};

/// Output of translating one page template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Translation {
    /// Source text handed to the toolchain
    pub source: String,
    /// Serialized string table shipped next to the artifact
    pub string_table: Vec<u8>,
    /// Extra toolchain flags requested by the page
    pub flags: Vec<String>,
}

/// Converts template text into compilable source.
///
/// Implementations are pure; the only failure is `PageError::Parse`.
pub trait Translator: Send + Sync {
    fn translate(&self, name: &str, text: &str) -> Result<Translation>;
}

/// Directive prefix a page uses to request extra toolchain flags.
const FLAGS_DIRECTIVE: &str = "//@flags:";

/// Translator for pages that already are source code.
///
/// Lines starting with `//@flags:` add whitespace-separated toolchain flags
/// and are kept in the output as ordinary comments. The string table is empty.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughTranslator;

impl Translator for PassthroughTranslator {
    fn translate(&self, name: &str, text: &str) -> Result<Translation> {
        if text.trim().is_empty() {
            return Err(PageError::parse(name, "page is empty", 1));
        }

        let mut flags = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            let Some(rest) = line.trim_start().strip_prefix(FLAGS_DIRECTIVE) else {
                continue;
            };
            let before = flags.len();
            flags.extend(rest.split_whitespace().map(str::to_string));
            if flags.len() == before {
                return Err(PageError::parse(
                    name,
                    format!("line {}: flags directive without flags", line_no + 1),
                    2,
                ));
            }
        }

        Ok(Translation {
            source: text.to_string(),
            string_table: Vec::new(),
            flags,
        })
    }
}
