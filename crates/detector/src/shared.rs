//! Process-wide network
//!
//! Loaded lazily on first use and never mutated afterwards. A failed load
//! leaves the cell empty so the next call retries.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use classifier::{ModelError, Network};
use once_cell::sync::OnceCell;
use tracing::{info, warn};

static SHARED_NETWORK: OnceCell<(PathBuf, Arc<Network>)> = OnceCell::new();

/// Get the shared network, loading it from `path` on first use
pub fn shared_network(path: &Path) -> Result<Arc<Network>, ModelError> {
    let (loaded_from, network) = SHARED_NETWORK.get_or_try_init(|| {
        info!("Initializing shared network from {:?}", path);
        Network::load(path).map(|network| (path.to_path_buf(), Arc::new(network)))
    })?;

    if loaded_from != path {
        warn!(
            "Shared network already loaded from {:?}; ignoring {:?}",
            loaded_from, path
        );
    }
    Ok(Arc::clone(network))
}

/// Whether the shared network has been loaded
pub fn is_loaded() -> bool {
    SHARED_NETWORK.get().is_some()
}
