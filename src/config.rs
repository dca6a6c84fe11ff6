//! Search settings, loadable from a JSON file.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CertError, CertResult};
use crate::event_tree::TreeIo;
use crate::optimizer::SearchMode;
use crate::tree_splitter::TARGET_QUALITY_FACTOR;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub search_mode: SearchMode,
    pub n_threads: usize,
    /// Largest tolerated ratio between the biggest and smallest work group.
    pub quality_factor: f64,
    /// Levels materialised when the tree is built.
    pub eager_depth: usize,
    /// Deepest level whose nodes are memoised during the search.
    pub cache_depth: usize,
    /// `Auto` falls back to brute force up to this many raw events.
    pub brute_force_leaf_limit: u64,
    pub store_bounds: bool,
    pub symtree_io: TreeIo,
    pub symtree_path: Option<PathBuf>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            search_mode: SearchMode::Auto,
            n_threads: rayon::current_num_threads(),
            quality_factor: TARGET_QUALITY_FACTOR,
            eager_depth: 1,
            cache_depth: 3,
            brute_force_leaf_limit: 4096,
            store_bounds: true,
            symtree_io: TreeIo::None,
            symtree_path: None,
        }
    }
}

impl SearchConfig {
    pub fn load(path: &Path) -> CertResult<Self> {
        let reader = BufReader::new(File::open(path)?);
        let config: SearchConfig = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CertResult<()> {
        if self.n_threads == 0 {
            return Err(CertError::InvalidThreadCount);
        }
        if !(self.quality_factor >= 1.0) {
            return Err(CertError::InvalidValue(format!(
                "quality factor must be at least 1, got {}",
                self.quality_factor
            )));
        }
        if self.symtree_io != TreeIo::None && self.symtree_path.is_none() {
            return Err(CertError::InvalidValue(format!(
                "symtree mode '{}' needs a symtree path",
                self.symtree_io.as_str()
            )));
        }
        Ok(())
    }
}
