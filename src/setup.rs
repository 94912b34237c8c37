// src/setup.rs
//
// =============================================================================
// SLAWIZARD: RESOURCES & PHYSICAL SETUP (v 0.4 )
// =============================================================================
//
// The Inventory.
//
// Responsibilities:
// 1. Name the exclusive hardware capabilities (Resource).
// 2. Describe the tank/platform setup a group needs (Configuration).
// 3. Hand out per-Resource locks in one global order (ResourceLocks).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

// ============================================================================
// 1. RESOURCES
// ============================================================================

/// Exclusive hardware capability. Declaration order is the global lock order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Resource {
    Uv,
    Tilt,
    Tower,
    TowerDown,
    Fans,
}

impl Resource {
    pub const ALL: [Resource; 5] = [
        Resource::Uv,
        Resource::Tilt,
        Resource::Tower,
        Resource::TowerDown,
        Resource::Fans,
    ];
}

// ============================================================================
// 2. CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TankSetup {
    Absent,
    Print,
    Removed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlatformSetup {
    Absent,
    Print,
    ResinTest,
}

/// Physical setup required by a group. `None` on a field means "don't care".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Configuration {
    pub tank: Option<TankSetup>,
    pub platform: Option<PlatformSetup>,
}

impl Configuration {
    pub const ANY: Configuration = Configuration {
        tank: None,
        platform: None,
    };

    pub const fn new(tank: Option<TankSetup>, platform: Option<PlatformSetup>) -> Self {
        Self { tank, platform }
    }

    pub fn is_any(&self) -> bool {
        self.tank.is_none() && self.platform.is_none()
    }

    /// True when a setup satisfying `self` also satisfies `other`.
    pub fn is_compatible(&self, other: &Configuration) -> bool {
        let tank_ok = match (self.tank, other.tank) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        };
        let platform_ok = match (self.platform, other.platform) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        };
        tank_ok && platform_ok
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tank = self.tank.map(|t| format!("{:?}", t)).unwrap_or_else(|| "*".into());
        let platform = self
            .platform
            .map(|p| format!("{:?}", p))
            .unwrap_or_else(|| "*".into());
        write!(f, "tank={} platform={}", tank, platform)
    }
}

// ============================================================================
// 3. RESOURCE LOCKS
// ============================================================================

/// One mutex per Resource, shared by every check of a wizard run.
///
/// tokio's Mutex is fair, so contending checks run in the order they queued.
#[derive(Clone)]
pub struct ResourceLocks {
    locks: Arc<BTreeMap<Resource, Arc<Mutex<()>>>>,
}

impl Default for ResourceLocks {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceLocks {
    pub fn new() -> Self {
        let locks = Resource::ALL
            .into_iter()
            .map(|r| (r, Arc::new(Mutex::new(()))))
            .collect();
        Self {
            locks: Arc::new(locks),
        }
    }

    /// Acquires every requested lock in global order.
    /// Duplicates are ignored. Dropping the guard releases all of them.
    pub async fn acquire(&self, resources: &[Resource]) -> ResourceGuard {
        let mut wanted = resources.to_vec();
        wanted.sort();
        wanted.dedup();

        let mut held = Vec::with_capacity(wanted.len());
        for resource in wanted {
            if let Some(lock) = self.locks.get(&resource) {
                log::debug!("Locking resource {:?}", resource);
                let guard = lock.clone().lock_owned().await;
                held.push((resource, guard));
            }
        }
        ResourceGuard { held }
    }

    /// Whether `resource` is currently held by someone.
    pub fn is_locked(&self, resource: Resource) -> bool {
        self.locks
            .get(&resource)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }

    pub fn any_locked(&self) -> bool {
        Resource::ALL.into_iter().any(|r| self.is_locked(r))
    }
}

pub struct ResourceGuard {
    held: Vec<(Resource, OwnedMutexGuard<()>)>,
}

impl ResourceGuard {
    pub fn resources(&self) -> Vec<Resource> {
        self.held.iter().map(|(r, _)| *r).collect()
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        if !self.held.is_empty() {
            log::debug!("Releasing resources {:?}", self.resources());
        }
    }
}
