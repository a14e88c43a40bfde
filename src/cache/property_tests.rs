//! Property-Based Tests for Cache Module
//!
//! Uses proptest to check path confinement and the staleness policy over
//! arbitrary inputs.

use proptest::prelude::*;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::cache::{classify, CompileAction, LoadStamp, ModuleEntry};
use crate::compiler::ArtifactPaths;
use crate::path::{combine, combine_confined};

// == Strategies ==
/// Request paths built from hostile and ordinary segments
fn request_path_strategy() -> impl Strategy<Value = String> {
    let segment = prop_oneof![
        Just("..".to_string()),
        Just(".".to_string()),
        Just(String::new()),
        "[a-z]{1,6}",
        "[a-z]{1,3}\\.page",
    ];
    (any::<bool>(), prop::collection::vec(segment, 0..12)).prop_map(|(leading, segments)| {
        let joined = segments.join("/");
        if leading {
            format!("/{joined}")
        } else {
            joined
        }
    })
}

fn base_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("/".to_string()),
        "/[a-z]{1,5}(/[a-z]{1,5}){0,3}",
        "/[a-z]{1,5}(/[a-z]{1,5}){0,3}/",
    ]
}

fn time_strategy() -> impl Strategy<Value = SystemTime> {
    (0u64..1_000).prop_map(|secs| UNIX_EPOCH + Duration::from_secs(secs))
}

fn stamp_strategy() -> impl Strategy<Value = LoadStamp> {
    (time_strategy(), time_strategy()).prop_map(|(source_seen, artifact)| LoadStamp {
        source_seen,
        artifact,
    })
}

/// Resolves `.` and `..` lexically, the way a path walk from `/` would.
fn lexical_resolve(path: &str) -> PathBuf {
    let mut out = PathBuf::from("/");
    for component in Path::new(path).components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(name) => out.push(name),
            _ => {}
        }
    }
    out
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    // Whatever the request, the confined join resolves inside the base.
    #[test]
    fn prop_confined_join_never_escapes(base in base_strategy(), rel in request_path_strategy()) {
        let joined = combine_confined(&base, &rel);
        let root = lexical_resolve(&base);
        let resolved = lexical_resolve(&joined);

        prop_assert!(joined.starts_with(base.trim_end_matches('/')), "{} lost prefix {}", joined, base);
        prop_assert!(resolved.starts_with(&root), "{} escaped {}", joined, base);
        prop_assert!(!joined[base.trim_end_matches('/').len()..].split('/').any(|s| s == ".." || s == "."));
    }

    // The plain join never doubles or drops the separator.
    #[test]
    fn prop_combine_single_separator(base in base_strategy(), rel in "/?[a-z]{1,6}(/[a-z]{1,6}){0,3}") {
        let joined = combine(&base, &rel);
        let head = base.trim_end_matches('/');
        let tail = rel.trim_start_matches('/');
        prop_assert_eq!(joined, format!("{head}/{tail}"));
    }

    // A loaded module whose source has not changed since its cycle began is left alone.
    #[test]
    fn prop_unchanged_source_is_noop(
        source in time_strategy(),
        seen_gap in 0u64..500,
        built_gap in 0u64..500,
    ) {
        let seen = source + Duration::from_secs(seen_gap);
        let built = seen + Duration::from_secs(built_gap);
        let loaded = LoadStamp { source_seen: seen, artifact: built };
        prop_assert_eq!(classify(source, Some(built), Some(loaded)), CompileAction::Noop);
    }

    // A source edited after its artifact was built always recompiles.
    #[test]
    fn prop_edited_source_recompiles(
        built in time_strategy(),
        gap in 1u64..500,
        loaded in prop::option::of(stamp_strategy()),
    ) {
        let source = built + Duration::from_secs(gap);
        prop_assert_eq!(classify(source, Some(built), loaded), CompileAction::Recompile);
    }

    // A source saved after the loaded module's cycle began is never a no-op,
    // even when the artifact that cycle wrote is newer still.
    #[test]
    fn prop_edit_after_cycle_start_never_noop(
        seen in time_strategy(),
        edit_gap in 1u64..500,
        built_gap in 0u64..500,
    ) {
        let source = seen + Duration::from_secs(edit_gap);
        let built = source + Duration::from_secs(built_gap);
        let loaded = LoadStamp { source_seen: seen, artifact: built };
        prop_assert_ne!(classify(source, Some(built), Some(loaded)), CompileAction::Noop);
    }

    // An unloaded entry never gets a no-op verdict.
    #[test]
    fn prop_unloaded_never_noop(
        source in time_strategy(),
        artifact in prop::option::of(time_strategy()),
    ) {
        prop_assert_ne!(classify(source, artifact, None), CompileAction::Noop);
    }

    // Checks inside the interval of a loaded entry never reach the filesystem;
    // the entry's paths do not exist, so any stat would surface an error.
    #[test]
    fn prop_throttled_checks_skip_filesystem(offsets in prop::collection::vec(0u64..999, 1..20)) {
        let mut entry = ModuleEntry::new(ArtifactPaths::derive("/nonexistent/prop/page.page"));
        entry.begin(crate::cache::Waiter::Module(Box::new(|_| {})));
        entry.finish(&Ok(crate::cache::LoadOutcome {
            module: crate::native::test_support::module(1),
            stamp: LoadStamp { source_seen: UNIX_EPOCH, artifact: UNIX_EPOCH },
        }));

        let start = Instant::now();
        prop_assert!(entry.should_compile(start, Duration::from_millis(1000)).is_err());
        for offset in offsets {
            let action = entry
                .should_compile(start + Duration::from_millis(offset), Duration::from_millis(1000))
                .unwrap();
            prop_assert_eq!(action, CompileAction::Noop);
        }
    }
}
