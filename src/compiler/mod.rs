//! Compiler Module
//!
//! Turns a page source into a native artifact: translation to generated
//! source, then one toolchain subprocess per compile.

mod job;
mod translate;

pub use job::{ArtifactPaths, Compiler};
pub use translate::{PassthroughTranslator, Translation, Translator};

// == Derived File Suffixes ==
/// Generated source handed to the toolchain; removed after every compile
pub const GENERATED_SUFFIX: &str = ".C";
/// String table shipped next to the artifact
pub const STRINGS_SUFFIX: &str = ".txt";
/// Compiled shared artifact
pub const ARTIFACT_SUFFIX: &str = ".so";
/// Appended to the strings and artifact names while a compile is in flight
pub const STAGING_SUFFIX: &str = ".tmp";
