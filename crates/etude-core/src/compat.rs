//! Shared synchronization and collection types.

pub use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};

pub use std::sync::{
    atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering},
    Arc,
};

pub use hashbrown::{HashMap, HashSet};
