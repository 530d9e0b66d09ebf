//! Durable synonym cache
//!
//! Brand name → synonym list, stored as versioned JSON. The cache is loaded at the
//! start of synonym generation and persisted after every batch, so an interrupted
//! run resumes without regenerating brands it already paid for. A single writer is
//! assumed; nothing locks the file.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::models::{Catalog, SynonymSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynonymCache {
    /// Format version
    version: u32,
    /// Brand name → synonyms (possibly empty)
    entries: BTreeMap<String, Vec<String>>,
}

impl SynonymCache {
    const CURRENT_VERSION: u32 = 1;

    /// Load the cache; a missing file is an empty cache
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No synonym cache at {:?}", path);
            return Ok(Self::default());
        }

        let reader = BufReader::new(File::open(path)?);
        let cache: SynonymCache = serde_json::from_reader(reader)?;
        if cache.version != Self::CURRENT_VERSION {
            return Err(PipelineError::Config(format!(
                "synonym cache {:?} has version {}, expected {}",
                path,
                cache.version,
                Self::CURRENT_VERSION
            )));
        }

        info!("Loaded synonym cache with {} brands from {:?}", cache.len(), path);
        Ok(cache)
    }

    /// Write the cache through a temporary file so a crash never leaves it half-written
    pub fn persist(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let tmp_path = path.with_extension("json.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            serde_json::to_writer_pretty(&mut writer, self)?;
            writer.flush()?;
        }
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Remove the cache file; returns whether one existed
    pub fn clear(path: &Path) -> Result<bool> {
        if path.exists() {
            std::fs::remove_file(path)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Look up a brand's cached synonyms
    pub fn get(&self, brand: &str) -> Result<&[String]> {
        self.entries
            .get(brand)
            .map(Vec::as_slice)
            .ok_or_else(|| PipelineError::CacheMiss(brand.to_string()))
    }

    pub fn contains(&self, brand: &str) -> bool {
        self.entries.contains_key(brand)
    }

    /// Merge freshly generated synonyms, replacing the brand's previous entry
    pub fn merge(&mut self, brand: &str, synonyms: &[String]) {
        self.entries.insert(brand.to_string(), synonyms.to_vec());
    }

    /// Catalog brands with no cache entry, in catalog order
    pub fn missing<'a>(&self, catalog: &'a Catalog) -> Vec<&'a str> {
        catalog.iter().filter(|b| !self.contains(b)).collect()
    }

    /// Synonym set for exactly the catalog's brands
    pub fn synonym_set(&self, catalog: &Catalog) -> SynonymSet {
        let mut set = SynonymSet::new();
        for brand in catalog.iter() {
            match self.get(brand) {
                Ok(synonyms) => set.insert(brand, synonyms),
                Err(e) => {
                    debug!("{}; matching on the canonical name only", e);
                    set.insert(brand, std::iter::empty::<&str>());
                }
            }
        }
        set
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for SynonymCache {
    fn default() -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            entries: BTreeMap::new(),
        }
    }
}
