// Copyright 2025 PIXNET Project Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Content registry: the name-to-page index backing the server.
//!
//! Pages are loaded from `*.pxnt` files in the content directory and keyed
//! by filename stem. The index page must always resolve (it is the first
//! frame of every session), so initialization seeds an empty directory with
//! sample pages and synthesizes a minimal index as a last resort. Lookups
//! are read-mostly; `reload` swaps the whole map under the write lock.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use log::{error, info, warn};

use crate::error::Result;
use crate::page::Page;
use crate::{pxnt, sample};

/// Page name every session starts on.
pub const INDEX_PAGE: &str = "index";

/// Name-to-page mapping populated from a content directory.
pub struct ContentRegistry {
    dir: PathBuf,
    pages: RwLock<HashMap<String, Arc<Page>>>,
}

impl ContentRegistry {
    /// Creates an empty registry rooted at `dir`. Call [`initialize`] before
    /// serving.
    ///
    /// [`initialize`]: ContentRegistry::initialize
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            pages: RwLock::new(HashMap::new()),
        }
    }

    /// The directory this registry scans.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Prepares the registry for serving: creates and seeds the content
    /// directory when needed, scans it, and guarantees an index page exists.
    pub fn initialize(&self) -> Result<()> {
        if !self.dir.exists() {
            info!("creating content directory {}", self.dir.display());
            std::fs::create_dir_all(&self.dir)?;
            sample::write_sample_pages(&self.dir)?;
        }

        self.reload()?;

        if self.is_empty() {
            warn!("no loadable pages found, writing sample content");
            sample::write_sample_pages(&self.dir)?;
            self.reload()?;
        }

        if self.get(INDEX_PAGE).is_none() {
            warn!("no index page found, synthesizing a minimal one");
            let index = sample::minimal_index();
            if let Err(e) = pxnt::save(&self.dir.join("index.pxnt"), &index) {
                warn!("could not persist synthesized index: {e}");
            }
            self.insert(INDEX_PAGE.to_string(), index);
        }
        Ok(())
    }

    /// Rescans the content directory, replacing the whole index.
    ///
    /// Files that fail to decode are logged and skipped; they do not fail
    /// the reload.
    pub fn reload(&self) -> Result<()> {
        let mut pages = HashMap::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("pxnt") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match pxnt::load(&path) {
                Ok(page) => {
                    info!("loaded page '{name}' ({}x{})", page.width, page.height);
                    pages.insert(name.to_string(), Arc::new(page));
                }
                Err(e) => error!("failed to load {}: {e}", path.display()),
            }
        }
        *self.write_lock() = pages;
        Ok(())
    }

    /// Looks up a page by name.
    pub fn get(&self, name: &str) -> Option<Arc<Page>> {
        self.read_lock().get(name).cloned()
    }

    /// Whether a page with the given name is loaded.
    pub fn contains(&self, name: &str) -> bool {
        self.read_lock().contains_key(name)
    }

    /// Names of all loaded pages, unordered.
    pub fn page_names(&self) -> Vec<String> {
        self.read_lock().keys().cloned().collect()
    }

    /// Number of loaded pages.
    pub fn len(&self) -> usize {
        self.read_lock().len()
    }

    /// Whether no pages are loaded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, name: String, page: Page) {
        self.write_lock().insert(name, Arc::new(page));
    }

    fn read_lock(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<Page>>> {
        self.pages
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write_lock(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<Page>>> {
        self.pages
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_seeds_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let content = dir.path().join("content");
        let registry = ContentRegistry::new(&content);
        registry.initialize().unwrap();

        assert!(content.join("index.pxnt").exists());
        assert!(registry.contains(INDEX_PAGE));
        assert!(registry.contains("about"));
    }

    #[test]
    fn unreadable_page_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.pxnt"), b"not a container").unwrap();
        pxnt::save(&dir.path().join("ok.pxnt"), &sample::about_page()).unwrap();

        let registry = ContentRegistry::new(dir.path());
        registry.reload().unwrap();
        assert!(registry.contains("ok"));
        assert!(!registry.contains("broken"));
    }

    #[test]
    fn index_is_synthesized_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        pxnt::save(&dir.path().join("about.pxnt"), &sample::about_page()).unwrap();

        let registry = ContentRegistry::new(dir.path());
        registry.initialize().unwrap();
        let index = registry.get(INDEX_PAGE).unwrap();
        index.validate().unwrap();
    }

    #[test]
    fn reload_picks_up_new_pages() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ContentRegistry::new(dir.path());
        registry.initialize().unwrap();
        let before = registry.len();

        pxnt::save(&dir.path().join("extra.pxnt"), &sample::about_page()).unwrap();
        registry.reload().unwrap();
        assert_eq!(registry.len(), before + 1);
        assert!(registry.contains("extra"));
    }
}
