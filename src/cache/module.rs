//! Module Entry Module
//!
//! Compile/load lifecycle of one page module: staleness policy, the waiter
//! queue that batches concurrent requests, and hot replacement of the loaded
//! module.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use tracing::{debug, info, warn};

use crate::compiler::ArtifactPaths;
use crate::error::{PageError, Result, SharedResult};
use crate::native::{
    Arena, HostContext, LoadedModule, ModuleHandle, ModuleLoader, PageObject, StringTable,
};

// == Callbacks ==
/// Receives the raw module of a completed cycle.
pub type ModuleCallback = Box<dyn FnOnce(SharedResult<ModuleHandle>) + Send>;

/// Receives an object constructed from the module of a completed cycle.
pub type PageCallback = Box<dyn FnOnce(SharedResult<PageObject>) + Send>;

// == Waiter ==
/// A queued request, tagged with what it wants back.
pub enum Waiter {
    Module(ModuleCallback),
    Page {
        arena: Arc<dyn Arena>,
        callback: PageCallback,
    },
}

impl Waiter {
    /// Answers the request with `outcome`, constructing an object first if one was asked for.
    pub fn resolve(self, outcome: &SharedResult<ModuleHandle>) {
        match self {
            Waiter::Module(callback) => callback(outcome.clone()),
            Waiter::Page { arena, callback } => {
                let object = match outcome {
                    Ok(module) => module.construct(arena.as_ref()).map_err(Arc::new),
                    Err(e) => Err(e.clone()),
                };
                callback(object)
            }
        }
    }
}

// == Compile Action ==
/// What a staleness check decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileAction {
    /// The loaded module is current
    Noop,
    /// An artifact newer than the loaded module exists; reopen it without compiling
    Reload,
    /// The source changed; translate and compile again
    Recompile,
}

/// When the loaded module's source was last known fresh, and which artifact it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadStamp {
    /// Wall-clock time the cycle began, before the source was read
    pub source_seen: SystemTime,
    /// Modification time of the loaded artifact
    pub artifact: SystemTime,
}

/// Decides between no-op, reload and recompile from modification times.
///
/// Source edits are judged against `source_seen` of the loaded module, so an
/// edit saved while its compile was running still counts as newer. The
/// artifact timestamp only decides whether another build is waiting on disk.
/// Equal timestamps count as fresh.
pub fn classify(
    source: SystemTime,
    artifact: Option<SystemTime>,
    loaded: Option<LoadStamp>,
) -> CompileAction {
    match (artifact, loaded) {
        (Some(built), _) if built < source => CompileAction::Recompile,
        (None, _) => CompileAction::Recompile,
        (Some(_), None) => CompileAction::Reload,
        (Some(built), Some(stamp)) if built > stamp.artifact => CompileAction::Reload,
        (Some(_), Some(stamp)) if source > stamp.source_seen => CompileAction::Recompile,
        (Some(_), Some(_)) => CompileAction::Noop,
    }
}

// == Module State ==
/// Externally visible state of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    /// Nothing loaded, nothing running
    Idle,
    /// First compile or load in flight
    Compiling,
    /// A module is ready
    Loaded,
    /// A module is ready and its replacement is being built
    Reloading,
}

// == Module Entry ==
/// Everything the cache knows about one page source.
pub struct ModuleEntry {
    paths: ArtifactPaths,
    module: Option<ModuleHandle>,
    /// Present exactly when a module is loaded
    last_load: Option<LoadStamp>,
    /// Last staleness check (monotonic)
    last_check: Option<Instant>,
    compiling: bool,
    waiters: Vec<Waiter>,
    generation: u64,
}

impl ModuleEntry {
    pub fn new(paths: ArtifactPaths) -> Self {
        Self {
            paths,
            module: None,
            last_load: None,
            last_check: None,
            compiling: false,
            waiters: Vec::new(),
            generation: 0,
        }
    }

    pub fn paths(&self) -> &ArtifactPaths {
        &self.paths
    }

    pub fn is_loaded(&self) -> bool {
        self.module.is_some()
    }

    pub fn is_compiling(&self) -> bool {
        self.compiling
    }

    pub fn module(&self) -> Option<&ModuleHandle> {
        self.module.as_ref()
    }

    pub fn state(&self) -> ModuleState {
        match (self.is_loaded(), self.compiling) {
            (false, false) => ModuleState::Idle,
            (false, true) => ModuleState::Compiling,
            (true, false) => ModuleState::Loaded,
            (true, true) => ModuleState::Reloading,
        }
    }

    pub fn waiting(&self) -> usize {
        self.waiters.len()
    }

    /// Makes the next check stat the filesystem regardless of the interval.
    pub fn force_check(&mut self) {
        self.last_check = None;
    }

    // == Should Compile ==
    /// Staleness check, throttled for loaded entries.
    ///
    /// A loaded entry checked less than `interval` ago returns `Noop` without
    /// touching the filesystem. Unloaded entries are always evaluated so a
    /// request after a failed first compile retries it.
    pub fn should_compile(&mut self, now: Instant, interval: Duration) -> Result<CompileAction> {
        if self.is_loaded() {
            if let Some(checked) = self.last_check {
                if now.saturating_duration_since(checked) < interval {
                    return Ok(CompileAction::Noop);
                }
            }
        }
        self.last_check = Some(now);

        let source = modified(&self.paths.source)?
            .ok_or_else(|| PageError::fs(&self.paths.source, io::ErrorKind::NotFound.into()))?;
        let artifact = modified(&self.paths.artifact)?;
        Ok(classify(source, artifact, self.last_load))
    }

    // == Cycle Bookkeeping ==
    /// Starts a cycle with `waiter` as its first member.
    ///
    /// Returns the generation number the new module will carry.
    pub fn begin(&mut self, waiter: Waiter) -> u64 {
        debug_assert!(!self.compiling, "cycle already in flight");
        self.compiling = true;
        self.waiters.push(waiter);
        self.generation += 1;
        self.generation
    }

    /// Joins the in-flight cycle.
    pub fn enqueue(&mut self, waiter: Waiter) {
        debug_assert!(self.compiling, "no cycle to join");
        self.waiters.push(waiter);
    }

    /// Ends the in-flight cycle.
    ///
    /// On success the new module replaces the old one; on failure the old
    /// module, if any, stays loaded. Returns the waiters in arrival order and
    /// the replaced module so the caller can drop it outside any lock.
    pub fn finish(
        &mut self,
        outcome: &SharedResult<LoadOutcome>,
    ) -> (Vec<Waiter>, Option<ModuleHandle>) {
        self.compiling = false;
        let replaced = match outcome {
            Ok(load) => {
                self.last_load = Some(load.stamp);
                self.module.replace(load.module.clone())
            }
            Err(_) => None,
        };
        (std::mem::take(&mut self.waiters), replaced)
    }
}

impl Drop for ModuleEntry {
    fn drop(&mut self) {
        for path in self.paths.temporaries() {
            match fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "removed leftover temporary"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove temporary"),
            }
        }
        if let Some(module) = self.module.take() {
            info!(source = %self.paths.source.display(), generation = module.generation(), "releasing module");
        }
    }
}

impl std::fmt::Debug for ModuleEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleEntry")
            .field("source", &self.paths.source)
            .field("state", &self.state())
            .field("waiting", &self.waiters.len())
            .field("generation", &self.generation)
            .finish()
    }
}

// == Loading ==
/// A freshly activated module and the timestamps it was loaded under.
#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub module: ModuleHandle,
    pub stamp: LoadStamp,
}

/// Opens the artifact at `paths`, maps its string table and runs its init hook.
///
/// `source_seen` is when the cycle began; it becomes the freshness mark of the load.
pub fn load_artifact(
    loader: &dyn ModuleLoader,
    paths: &ArtifactPaths,
    generation: u64,
    host: HostContext,
    source_seen: SystemTime,
) -> Result<LoadOutcome> {
    let artifact = modified(&paths.artifact)?
        .ok_or_else(|| PageError::load(&paths.artifact, "artifact does not exist"))?;
    let library = loader.open(&paths.artifact)?;
    let strings = StringTable::map(&paths.strings)?;
    let module = ModuleHandle::new(LoadedModule::activate(
        library,
        strings,
        paths.artifact.clone(),
        generation,
        host,
    ));
    Ok(LoadOutcome {
        module,
        stamp: LoadStamp {
            source_seen,
            artifact,
        },
    })
}

/// Modification time of `path`, `None` if it does not exist.
fn modified(path: &Path) -> Result<Option<SystemTime>> {
    match fs::metadata(path).and_then(|m| m.modified()) {
        Ok(time) => Ok(Some(time)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(PageError::fs(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::test_support;
    use crate::native::HeapArena;
    use parking_lot::Mutex;
    use std::time::UNIX_EPOCH;

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn stamp(source_seen: SystemTime, artifact: SystemTime) -> LoadStamp {
        LoadStamp {
            source_seen,
            artifact,
        }
    }

    fn entry() -> ModuleEntry {
        ModuleEntry::new(ArtifactPaths::derive("/nonexistent/dir/page.page"))
    }

    fn loaded_entry(generation: u64) -> ModuleEntry {
        let mut entry = entry();
        entry.begin(Waiter::Module(Box::new(|_| {})));
        let outcome = Ok(LoadOutcome {
            module: test_support::module(generation),
            stamp: stamp(at(100), at(100)),
        });
        entry.finish(&outcome);
        entry
    }

    #[test]
    fn test_classify_outcomes() {
        let loaded = Some(stamp(at(15), at(20)));
        // loaded, nothing changed
        assert_eq!(classify(at(10), Some(at(20)), loaded), CompileAction::Noop);
        // source edited after the artifact was built
        assert_eq!(classify(at(30), Some(at(20)), loaded), CompileAction::Recompile);
        // another process rebuilt the artifact
        assert_eq!(classify(at(10), Some(at(25)), loaded), CompileAction::Reload);
        // artifact left over from a previous run
        assert_eq!(classify(at(10), Some(at(20)), None), CompileAction::Reload);
        // nothing built yet
        assert_eq!(classify(at(10), None, None), CompileAction::Recompile);
        // equal stamps count as fresh
        assert_eq!(classify(at(15), Some(at(20)), loaded), CompileAction::Noop);
        assert_eq!(classify(at(20), Some(at(20)), Some(stamp(at(20), at(20)))), CompileAction::Noop);
    }

    #[test]
    fn test_edit_during_compile_is_not_lost() {
        // cycle began at 10, source saved at 12, artifact written at 14
        let loaded = Some(stamp(at(10), at(14)));
        assert_eq!(classify(at(12), Some(at(14)), loaded), CompileAction::Recompile);
    }

    #[test]
    fn test_state_transitions() {
        let mut entry = entry();
        assert_eq!(entry.state(), ModuleState::Idle);

        entry.begin(Waiter::Module(Box::new(|_| {})));
        assert_eq!(entry.state(), ModuleState::Compiling);

        let outcome = Ok(LoadOutcome {
            module: test_support::module(1),
            stamp: stamp(at(5), at(5)),
        });
        let (waiters, replaced) = entry.finish(&outcome);
        assert_eq!(waiters.len(), 1);
        assert!(replaced.is_none());
        assert_eq!(entry.state(), ModuleState::Loaded);

        entry.begin(Waiter::Module(Box::new(|_| {})));
        assert_eq!(entry.state(), ModuleState::Reloading);
    }

    #[test]
    fn test_throttled_check_skips_filesystem() {
        let mut entry = loaded_entry(1);
        let now = Instant::now();
        entry.last_check = Some(now);

        // source does not exist; a stat would fail
        let action = entry
            .should_compile(now + Duration::from_millis(50), Duration::from_millis(1000))
            .unwrap();
        assert_eq!(action, CompileAction::Noop);
    }

    #[test]
    fn test_due_check_stats_source() {
        let mut entry = loaded_entry(1);
        let now = Instant::now();
        entry.last_check = Some(now);

        let result = entry.should_compile(now + Duration::from_secs(2), Duration::from_secs(1));
        assert!(matches!(result, Err(PageError::Filesystem { .. })));
    }

    #[test]
    fn test_unloaded_entry_is_never_throttled() {
        let mut entry = entry();
        let now = Instant::now();
        entry.last_check = Some(now);
        assert!(entry.should_compile(now, Duration::from_secs(60)).is_err());
    }

    #[test]
    fn test_force_check_bypasses_interval() {
        let mut entry = loaded_entry(1);
        let now = Instant::now();
        entry.last_check = Some(now);
        entry.force_check();
        assert!(entry.should_compile(now, Duration::from_secs(60)).is_err());
    }

    #[test]
    fn test_failed_cycle_keeps_previous_module() {
        let mut entry = loaded_entry(1);
        entry.begin(Waiter::Module(Box::new(|_| {})));
        entry.enqueue(Waiter::Module(Box::new(|_| {})));

        let failure = Err(Arc::new(PageError::load("/x.so", "bad")));
        let (waiters, replaced) = entry.finish(&failure);

        assert_eq!(waiters.len(), 2);
        assert!(replaced.is_none());
        assert_eq!(entry.state(), ModuleState::Loaded);
        assert_eq!(entry.module().unwrap().generation(), 1);
    }

    #[test]
    fn test_successful_cycle_replaces_module() {
        let mut entry = loaded_entry(1);
        let generation = entry.begin(Waiter::Module(Box::new(|_| {})));
        assert_eq!(generation, 2);

        let outcome = Ok(LoadOutcome {
            module: test_support::module(generation),
            stamp: stamp(at(200), at(200)),
        });
        let (_, replaced) = entry.finish(&outcome);

        assert_eq!(replaced.unwrap().generation(), 1);
        assert_eq!(entry.module().unwrap().generation(), 2);
        assert_eq!(entry.last_load, Some(stamp(at(200), at(200))));
    }

    #[test]
    fn test_waiters_resolve_in_fifo_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut entry = entry();

        let first = order.clone();
        entry.begin(Waiter::Module(Box::new(move |_| first.lock().push(1))));
        let second = order.clone();
        entry.enqueue(Waiter::Page {
            arena: Arc::new(HeapArena::new()),
            callback: Box::new(move |object| {
                assert!(object.is_ok());
                second.lock().push(2);
            }),
        });
        let third = order.clone();
        entry.enqueue(Waiter::Module(Box::new(move |_| third.lock().push(3))));

        let outcome = Ok(LoadOutcome {
            module: test_support::module(1),
            stamp: stamp(at(1), at(1)),
        });
        let (waiters, _) = entry.finish(&outcome);
        let shared = outcome.map(|load| load.module);
        for waiter in waiters {
            waiter.resolve(&shared);
        }

        assert_eq!(*order.lock(), vec![1, 2, 3]);
        assert_eq!(entry.waiting(), 0);
    }

    #[test]
    fn test_failure_reaches_page_waiters() {
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        let waiter = Waiter::Page {
            arena: Arc::new(HeapArena::new()),
            callback: Box::new(move |object| {
                *sink.lock() = Some(object.map(|_| ()).map_err(|e| e.to_string()));
            }),
        };

        waiter.resolve(&Err(Arc::new(PageError::parse("p", "bad", 7))));
        let result = seen.lock().take().unwrap();
        assert!(result.unwrap_err().contains("code 7"));
    }
}
