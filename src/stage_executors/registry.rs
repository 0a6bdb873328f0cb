//! Profile id to worker constructor mapping with a typed default.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

type Constructor<T> = Arc<dyn Fn() -> T + Send + Sync>;

struct Entry<T> {
    active: bool,
    build: Constructor<T>,
}

/// How a profile lookup was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Profile,
    DefaultRequested,
    FallbackMissing,
    FallbackInactive,
}

impl Resolution {
    #[must_use]
    pub const fn is_fallback(&self) -> bool {
        matches!(self, Self::FallbackMissing | Self::FallbackInactive)
    }
}

pub struct WorkerRegistry<T> {
    entries: HashMap<String, Entry<T>>,
    default: Constructor<T>,
}

impl<T> fmt::Debug for WorkerRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut profiles: Vec<(&String, bool)> = self
            .entries
            .iter()
            .map(|(id, entry)| (id, entry.active))
            .collect();
        profiles.sort();
        f.debug_struct("WorkerRegistry")
            .field("profiles", &profiles)
            .finish_non_exhaustive()
    }
}

impl<T> WorkerRegistry<T> {
    pub fn new(default: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self {
            entries: HashMap::new(),
            default: Arc::new(default),
        }
    }

    /// Registers or replaces a profile. New profiles start active.
    pub fn register(
        &mut self,
        profile_id: impl Into<String>,
        build: impl Fn() -> T + Send + Sync + 'static,
    ) {
        self.entries.insert(
            profile_id.into(),
            Entry {
                active: true,
                build: Arc::new(build),
            },
        );
    }

    /// Returns false when the profile is unknown.
    pub fn set_active(&mut self, profile_id: &str, active: bool) -> bool {
        self.entries
            .get_mut(profile_id)
            .map(|entry| entry.active = active)
            .is_some()
    }

    #[must_use]
    pub fn profiles(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Builds the worker for `profile_id`, or the default when the id is
    /// absent, unknown or inactive.
    pub fn resolve(&self, profile_id: Option<&str>) -> (T, Resolution) {
        let Some(id) = profile_id else {
            return ((self.default)(), Resolution::DefaultRequested);
        };
        match self.entries.get(id) {
            Some(entry) if entry.active => ((entry.build)(), Resolution::Profile),
            Some(_) => {
                debug!(profile_id = id, "profile inactive; using default worker");
                ((self.default)(), Resolution::FallbackInactive)
            }
            None => {
                debug!(profile_id = id, "profile unknown; using default worker");
                ((self.default)(), Resolution::FallbackMissing)
            }
        }
    }
}
