//! Explicit engine state.
//!
//! No hidden process-wide mutable state: everything the pipeline touches —
//! policy, registry, parser, cache, learner, skiplist, telemetry, clock,
//! cancellation flag — lives in one `EngineContext` value threaded through
//! `run`. Each shared field wraps its own synchronization.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use ace_core::clock::Clock;
use ace_core::error::AceResult;
use ace_core::policy::Policy;
use ace_core::traits::LanguageParser;

use ace_index::DetectorCache;
use ace_lang::PySourceParser;

use crate::learn::Learner;
use crate::rules::RuleRegistry;
use crate::skiplist::Skiplist;
use crate::telemetry::Telemetry;

/// Default cache TTL: one week.
pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 7 * 24 * 3600;

/// Layout of the hidden state directory.
#[derive(Debug, Clone)]
pub struct AcePaths {
    ace_dir: PathBuf,
}

impl AcePaths {
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            ace_dir: root.join(".ace"),
        }
    }

    #[must_use]
    pub fn ace_dir(&self) -> &Path {
        &self.ace_dir
    }

    #[must_use]
    pub fn symbols(&self) -> PathBuf {
        self.ace_dir.join("symbols.json")
    }

    #[must_use]
    pub fn cache_db(&self) -> PathBuf {
        self.ace_dir.join("cache.db")
    }

    #[must_use]
    pub fn index(&self) -> PathBuf {
        self.ace_dir.join("index.json")
    }

    #[must_use]
    pub fn learn(&self) -> PathBuf {
        self.ace_dir.join("learn.json")
    }

    #[must_use]
    pub fn skiplist(&self) -> PathBuf {
        self.ace_dir.join("skiplist.json")
    }

    #[must_use]
    pub fn journals_dir(&self) -> PathBuf {
        self.ace_dir.join("journals")
    }

    #[must_use]
    pub fn receipts_dir(&self) -> PathBuf {
        self.ace_dir.join("receipts")
    }

    #[must_use]
    pub fn baseline(&self) -> PathBuf {
        self.ace_dir.join("baseline.json")
    }

    #[must_use]
    pub fn blobs_dir(&self) -> PathBuf {
        self.ace_dir.join("blobs")
    }

    #[must_use]
    pub fn telemetry(&self) -> PathBuf {
        self.ace_dir.join("telemetry.jsonl")
    }

    #[must_use]
    pub fn policy(&self) -> PathBuf {
        self.ace_dir.join("policy.toml")
    }
}

/// All engine state for one project, threaded explicitly through the run.
pub struct EngineContext {
    pub root: PathBuf,
    pub paths: AcePaths,
    pub policy: Policy,
    pub registry: RuleRegistry,
    pub parser: Box<dyn LanguageParser>,
    pub cache: DetectorCache,
    pub learner: Mutex<Learner>,
    pub skiplist: Mutex<Skiplist>,
    pub telemetry: Telemetry,
    pub clock: Clock,
    pub cancel: Arc<AtomicBool>,
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("root", &self.root)
            .field("policy_hash", &self.policy.policy_hash)
            .finish_non_exhaustive()
    }
}

impl EngineContext {
    /// Open a project with the system clock.
    pub fn open(root: &Path) -> AceResult<Self> {
        Self::open_with_clock(root, Clock::System)
    }

    /// Open a project with an injected clock (the determinism test hook).
    pub fn open_with_clock(root: &Path, clock: Clock) -> AceResult<Self> {
        let paths = AcePaths::new(root);
        let policy = Policy::load(&paths.policy())?;
        let learner = Learner::load(&paths.learn(), clock.clone())?;
        let skiplist = Skiplist::load(&paths.skiplist())?;
        let telemetry = Telemetry::new(paths.telemetry());
        Ok(Self {
            root: root.to_path_buf(),
            paths,
            policy,
            registry: RuleRegistry::builtin(),
            parser: Box::new(PySourceParser),
            cache: DetectorCache::new(Some(DEFAULT_CACHE_TTL_SECONDS)),
            learner: Mutex::new(learner),
            skiplist: Mutex::new(skiplist),
            telemetry,
            clock,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Shared cancellation flag; setting it stops detection between files.
    #[must_use]
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }
}
