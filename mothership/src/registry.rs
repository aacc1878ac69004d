use model::AgentId;
use rustc_hash::FxHashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

/// The rover-identity -> peer-address mapping, last-writer-wins on each
/// observed open. Copy-on-write: the dispatcher is the single writer, and
/// readers (the observation surface) take a consistent snapshot without
/// locking anything.
pub struct IdentityRegistry {
    map: AtomicPtr<Arc<FxHashMap<AgentId, SocketAddr>>>,
}

impl Default for IdentityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityRegistry {
    pub fn new() -> IdentityRegistry {
        let map = Arc::new(FxHashMap::default());
        let raw = Box::into_raw(Box::new(map));
        IdentityRegistry { map: AtomicPtr::new(raw) }
    }

    /// Records the address observed for an identity. Returns `true` if the
    /// identity was previously unknown.
    pub fn record(&self, id: &AgentId, addr: SocketAddr) -> bool {
        let mut was_new = false;
        self.update(|m| {
            was_new = m.insert(id.clone(), addr).is_none();
        });
        was_new
    }

    pub fn get(&self, id: &AgentId) -> Option<SocketAddr> {
        self.snapshot().get(id).copied()
    }

    /// A consistent view of the whole mapping at one point in time.
    pub fn snapshot(&self) -> Arc<FxHashMap<AgentId, SocketAddr>> {
        unsafe { (*self.map.load(Ordering::Acquire)).clone() }
    }

    fn update(&self, mut f: impl FnMut(&mut FxHashMap<AgentId, SocketAddr>)) {
        loop {
            let old = self.map.load(Ordering::Acquire);

            let mut map: FxHashMap<AgentId, SocketAddr> = unsafe { (**old).clone() };
            f(&mut map);
            let new = Box::into_raw(Box::new(Arc::new(map)));

            match self.map.compare_exchange(old, new, Ordering::AcqRel, Ordering::Acquire) {
                Ok(prev) => {
                    unsafe { drop(Box::from_raw(prev)) };
                    return;
                }
                Err(_) => {
                    unsafe { drop(Box::from_raw(new)) };
                }
            }
        }
    }
}

impl Drop for IdentityRegistry {
    fn drop(&mut self) {
        unsafe {
            let raw = self.map.load(Ordering::Acquire);
            drop(Box::from_raw(raw));
        }
    }
}
