//! Function definitions: the registry of live functions, the autoloader
//! that resolves names to definition files on demand, and the minimal
//! definition-file parser joining the two.

pub mod autoload;
pub mod fishfile;
pub mod registry;

pub use autoload::{Autoload, AutoloadEntry, AutoloadHandler, LoadOutcome};
pub use registry::{FunctionEventHooks, FunctionRecord, FunctionRegistry, RemovalSource};

use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default handler wiring the autoloader to a registry: parsing a file
/// defines its functions (marked autoloaded), unloading removes them.
pub struct RegistryAutoloadHandler {
    registry: Arc<FunctionRegistry>,
}

impl RegistryAutoloadHandler {
    pub fn new(registry: Arc<FunctionRegistry>) -> RegistryAutoloadHandler {
        RegistryAutoloadHandler { registry }
    }
}

impl AutoloadHandler for RegistryAutoloadHandler {
    fn parse_file(&self, _name: &str, path: &Path) {
        for mut record in fishfile::parse_file(path) {
            record.is_autoloaded = true;
            self.registry.add(record);
        }
    }

    fn on_unload(&self, name: &str) {
        // The autoloader already dropped its entry; skip the eviction
        // callback that would loop back into it.
        self.registry.remove(name, RemovalSource::Autoloader);
    }
}

/// Existence check with optional autoload, the combined query the
/// completion engine uses. The highlighter's off-thread pass must use
/// [`FunctionRegistry::exists_no_autoload`] instead.
pub fn function_exists(
    name: &str,
    registry: &FunctionRegistry,
    autoload: &Autoload,
    path_dirs: &[PathBuf],
    handler: &dyn AutoloadHandler,
) -> bool {
    if registry.exists_no_autoload(name) {
        return true;
    }
    matches!(
        autoload.load(name, path_dirs, handler, false),
        LoadOutcome::Loaded | LoadOutcome::AlreadyLoaded
    ) && registry.exists_no_autoload(name)
}
