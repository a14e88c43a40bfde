//! Page Cache Module
//!
//! Registry of module and static entries keyed by interned source path, and
//! the compile/load cycle that drives module entries.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use lasso::{Rodeo, Spur};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::cache::{
    load_artifact, CacheStats, Clock, CompileAction, LoadOutcome, ModuleCallback, ModuleEntry,
    ModuleState, PageCallback, StaticEntry, Waiter,
};
use crate::compiler::{ArtifactPaths, Compiler, PassthroughTranslator, Translator};
use crate::config::Config;
use crate::error::{PageError, Result, SharedResult};
use crate::native::{Arena, DylibLoader, HostContext, ModuleHandle, ModuleLoader, PageObject};
use crate::path::resolve_source;

// == Registry ==
/// Mutable cache state. Locked only for bookkeeping, never across callbacks,
/// compiles, loads or module hooks.
struct Registry {
    paths: Rodeo,
    modules: HashMap<Spur, ModuleEntry>,
    statics: HashMap<Spur, StaticEntry>,
    compiler_flags: Vec<String>,
    clock: Clock,
    stats: CacheStats,
}

struct Shared {
    registry: Mutex<Registry>,
    compiler: Compiler,
    loader: Arc<dyn ModuleLoader>,
    host: HostContext,
    check_interval: Duration,
    static_check_interval: Duration,
}

// == Page Cache ==
/// Compile-and-load cache for page modules plus a whole-file cache for
/// static pages.
///
/// Cloning yields another handle to the same cache. Module requests must be
/// made from within a tokio runtime, which runs the compile cycles.
#[derive(Clone)]
pub struct PageCache {
    shared: Arc<Shared>,
}

/// What a request found once the registry lock was released.
enum Dispatch {
    Ready(Waiter, ModuleHandle),
    Failed(Waiter, PageError),
    Queued,
    Start(Cycle),
}

/// Everything a compile or reload cycle needs once it leaves the lock.
struct Cycle {
    key: Spur,
    action: CompileAction,
    generation: u64,
    /// Wall-clock time the cycle began, before the source is read
    source_seen: SystemTime,
    work_dir: PathBuf,
    paths: ArtifactPaths,
    flags: Vec<String>,
}

impl PageCache {
    // == Constructors ==
    /// Creates a cache that translates pages verbatim and opens artifacts as shared objects.
    pub fn new(config: &Config) -> Self {
        Self::with_collaborators(
            config,
            Arc::new(PassthroughTranslator),
            Arc::new(DylibLoader::new()),
            HostContext::null(),
        )
    }

    /// Creates a cache with an explicit translator, loader and host context
    /// for module init hooks.
    pub fn with_collaborators(
        config: &Config,
        translator: Arc<dyn Translator>,
        loader: Arc<dyn ModuleLoader>,
        host: HostContext,
    ) -> Self {
        let compiler =
            Compiler::new(config.compiler.clone(), translator).with_timeout(config.compile_timeout());
        let registry = Registry {
            paths: Rodeo::new(),
            modules: HashMap::new(),
            statics: HashMap::new(),
            compiler_flags: config.compiler_flags.clone(),
            clock: Clock::now(),
            stats: CacheStats::new(),
        };
        Self {
            shared: Arc::new(Shared {
                registry: Mutex::new(registry),
                compiler,
                loader,
                host,
                check_interval: config.check_interval(),
                static_check_interval: config.static_check_interval(),
            }),
        }
    }

    // == Time ==
    /// Takes a new clock snapshot for every check until the next refresh.
    pub fn refresh_time(&self) {
        self.shared.registry.lock().clock = Clock::now();
    }

    /// The current clock snapshot.
    pub fn time(&self) -> Clock {
        self.shared.registry.lock().clock.clone()
    }

    // == Compiler Flags ==
    /// Replaces the global compiler flags; cycles already running keep theirs.
    pub fn set_compiler_flags(&self, flags: Vec<String>) {
        self.shared.registry.lock().compiler_flags = flags;
    }

    pub fn compiler_flags(&self) -> Vec<String> {
        self.shared.registry.lock().compiler_flags.clone()
    }

    // == Module Requests ==
    /// Requests an object constructed from the page at `path` into `arena`.
    ///
    /// `callback` runs exactly once: immediately when the loaded module is
    /// current, otherwise when the compile or reload cycle it joined ends.
    pub fn request_page(
        &self,
        work_dir: &Path,
        path: &str,
        arena: Arc<dyn Arena>,
        callback: PageCallback,
    ) {
        self.request(work_dir, path, Waiter::Page { arena, callback });
    }

    /// Requests the raw module of the page at `path`; see [`PageCache::request_page`].
    pub fn request_module(&self, work_dir: &Path, path: &str, callback: ModuleCallback) {
        self.request(work_dir, path, Waiter::Module(callback));
    }

    /// Awaitable form of [`PageCache::request_page`].
    pub async fn load_page(
        &self,
        work_dir: &Path,
        path: &str,
        arena: Arc<dyn Arena>,
    ) -> SharedResult<PageObject> {
        let (tx, rx) = oneshot::channel();
        self.request_page(
            work_dir,
            path,
            arena,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        rx.await.unwrap_or_else(|_| Err(abandoned(path)))
    }

    /// Awaitable form of [`PageCache::request_module`].
    pub async fn load_module(&self, work_dir: &Path, path: &str) -> SharedResult<ModuleHandle> {
        let (tx, rx) = oneshot::channel();
        self.request_module(
            work_dir,
            path,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        rx.await.unwrap_or_else(|_| Err(abandoned(path)))
    }

    fn request(&self, work_dir: &Path, path: &str, waiter: Waiter) {
        let dispatch = self.dispatch(work_dir, path, waiter);
        match dispatch {
            Dispatch::Ready(waiter, module) => waiter.resolve(&Ok(module)),
            Dispatch::Failed(waiter, error) => waiter.resolve(&Err(Arc::new(error))),
            Dispatch::Queued => {}
            Dispatch::Start(cycle) => {
                let cache = self.clone();
                tokio::spawn(async move {
                    cache.run_cycle(cycle).await;
                });
            }
        }
    }

    /// Registry half of a request: runs under the lock and decides what to do.
    fn dispatch(&self, work_dir: &Path, path: &str, waiter: Waiter) -> Dispatch {
        let source = resolve_source(work_dir, path);
        let mut guard = self.shared.registry.lock();
        let registry = &mut *guard;

        let key = registry.paths.get_or_intern(source.to_string_lossy());
        let entry = registry.modules.entry(key).or_insert_with(|| {
            debug!(source = %source.display(), "new module entry");
            ModuleEntry::new(ArtifactPaths::derive(&source))
        });

        if entry.is_compiling() {
            entry.enqueue(waiter);
            registry.stats.record_queued();
            return Dispatch::Queued;
        }

        let now = registry.clock.monotonic();
        let action = match entry.should_compile(now, self.shared.check_interval) {
            Ok(action) => action,
            Err(e) => {
                registry.stats.record_failure();
                return Dispatch::Failed(waiter, e);
            }
        };

        if action == CompileAction::Noop {
            if let Some(module) = entry.module().cloned() {
                registry.stats.record_hit();
                return Dispatch::Ready(waiter, module);
            }
        }

        // a no-op verdict without a loaded module cannot serve anything
        let action = match action {
            CompileAction::Noop => CompileAction::Recompile,
            other => other,
        };
        let generation = entry.begin(waiter);
        match action {
            CompileAction::Reload => registry.stats.record_reload(),
            _ => registry.stats.record_compile(),
        }
        info!(source = %source.display(), ?action, generation, "starting cycle");
        Dispatch::Start(Cycle {
            key,
            action,
            generation,
            // taken before the source is read, so edits saved mid-compile stay newer
            source_seen: registry.clock.wall(),
            work_dir: work_dir.to_path_buf(),
            paths: entry.paths().clone(),
            flags: registry.compiler_flags.clone(),
        })
    }

    /// Compiles if asked to, loads the artifact, then answers every waiter
    /// of the cycle in arrival order.
    async fn run_cycle(&self, cycle: Cycle) {
        let outcome = self.build_and_load(&cycle).await.map_err(Arc::new);
        let Cycle {
            key,
            generation,
            paths,
            ..
        } = cycle;

        let (waiters, replaced) = {
            let mut registry = self.shared.registry.lock();
            if outcome.is_err() {
                registry.stats.record_failure();
            }
            match registry.modules.get_mut(&key) {
                Some(entry) => entry.finish(&outcome),
                None => (Vec::new(), None),
            }
        };

        match &outcome {
            Ok(_) => info!(source = %paths.source.display(), generation, waiters = waiters.len(), "module loaded"),
            Err(e) => warn!(source = %paths.source.display(), error = %e, waiters = waiters.len(), "cycle failed"),
        }
        // the previous module is released before anyone is answered
        drop(replaced);

        let shared = outcome.map(|load| load.module);
        for waiter in waiters {
            waiter.resolve(&shared);
        }
    }

    async fn build_and_load(&self, cycle: &Cycle) -> Result<LoadOutcome> {
        let Cycle {
            action,
            generation,
            source_seen,
            ref work_dir,
            ref paths,
            ref flags,
            ..
        } = *cycle;
        let loader = self.shared.loader.as_ref();
        let host = self.shared.host;
        if action == CompileAction::Reload {
            match load_artifact(loader, paths, generation, host, source_seen) {
                Ok(load) => return Ok(load),
                Err(e @ PageError::Filesystem { .. }) => return Err(e),
                Err(e) => {
                    warn!(source = %paths.source.display(), error = %e, "existing artifact unusable, recompiling");
                    self.shared.registry.lock().stats.record_reload_fallback();
                }
            }
        }
        self.shared.compiler.compile(work_dir, paths, flags).await?;
        load_artifact(loader, paths, generation, host, source_seen)
    }

    // == Inspection ==
    /// State of the module entry for `path`, if one was ever requested.
    pub fn module_state(&self, work_dir: &Path, path: &str) -> Option<ModuleState> {
        let source = resolve_source(work_dir, path);
        let registry = self.shared.registry.lock();
        let key = registry.paths.get(source.to_string_lossy())?;
        registry.modules.get(&key).map(ModuleEntry::state)
    }

    /// Makes the next request for `path` re-check its source regardless of
    /// the check interval. Returns false if the path has no entry.
    pub fn force_check(&self, work_dir: &Path, path: &str) -> bool {
        let source = resolve_source(work_dir, path);
        let mut guard = self.shared.registry.lock();
        let registry = &mut *guard;
        let Some(key) = registry.paths.get(source.to_string_lossy()) else {
            return false;
        };
        if let Some(entry) = registry.modules.get_mut(&key) {
            entry.force_check();
        }
        if let Some(entry) = registry.statics.get_mut(&key) {
            entry.force_check();
        }
        true
    }

    // == Static Pages ==
    /// Contents of the static file at `path`, re-read when it changed.
    ///
    /// Reads happen synchronously; static pages are small.
    pub fn load_static_page(&self, path: &Path) -> Result<Arc<[u8]>> {
        let mut guard = self.shared.registry.lock();
        let registry = &mut *guard;
        let now = registry.clock.monotonic();

        let key = registry.paths.get_or_intern(path.to_string_lossy());
        let entry = registry
            .statics
            .entry(key)
            .or_insert_with(|| StaticEntry::new(path));

        if entry.should_reload(now, self.shared.static_check_interval) {
            match entry.load(now) {
                Ok(_) => registry.stats.record_static_load(),
                Err(e) => {
                    registry.stats.record_failure();
                    return Err(e);
                }
            }
        } else {
            registry.stats.record_static_hit();
        }
        entry
            .serve(now)
            .ok_or_else(|| PageError::load(path, "static page not loaded"))
    }

    /// Unloads static pages unused for at least `max_idle`. Returns how many were unloaded.
    pub fn evict_idle_static(&self, max_idle: Duration) -> usize {
        let mut guard = self.shared.registry.lock();
        let registry = &mut *guard;
        let now = registry.clock.monotonic();

        let mut evicted = 0;
        for entry in registry.statics.values_mut() {
            if entry.idle_for(now).is_some_and(|idle| idle >= max_idle) {
                debug!(path = %entry.path().display(), "unloading idle static page");
                entry.unload();
                evicted += 1;
            }
        }
        registry.stats.record_static_evictions(evicted);
        evicted
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        let registry = self.shared.registry.lock();
        let mut stats = registry.stats.clone();
        stats.set_entry_counts(registry.modules.len(), registry.statics.len());
        stats
    }
}

impl std::fmt::Debug for PageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.shared.registry.lock();
        f.debug_struct("PageCache")
            .field("modules", &registry.modules.len())
            .field("static_pages", &registry.statics.len())
            .field("compiler", &self.shared.compiler)
            .finish()
    }
}

fn abandoned(path: &str) -> Arc<PageError> {
    Arc::new(PageError::load(path, "compile cycle ended without answering"))
}
