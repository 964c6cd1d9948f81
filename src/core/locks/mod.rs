pub mod pool;

pub use pool::{LockPool, PoolGuard};
