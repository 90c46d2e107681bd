// ai
//! 🧵 Workers — the supervisor's private little minions.
//!
//! ⚠️ DO NOT MAKE THIS PUB EVER
//! ⚠️ YOU HAVE BEEN WARNED
//! 🔒 Like Fight Club, but for async tasks. First rule: you don't pub the workers.
//!
//! Two species live here: the ingest worker (source → parser → transforms →
//! WAL tee → ring buffer, one per source) and the drain pool (ring buffer →
//! job function, `worker.count` strong, rescalable at runtime).

pub(crate) mod drain_pool;
pub(crate) mod ingest_worker;

use anyhow::Result;
use tokio::task::JoinHandle;

/// 🧵 A worker owns itself entirely once started — the supervisor keeps only
/// the JoinHandle and its hopes.
pub(crate) trait Worker {
    fn start(self) -> JoinHandle<Result<()>>;
}
