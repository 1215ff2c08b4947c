//! One store per level, with a movable "current" index.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{debug, info};

use crate::error::TreeError;
use crate::lock;
use crate::store::Store;

/// Owns a frozen, ordered set of stores built from a JSON source.
///
/// A JSON array gives one store per element; anything else gives a single
/// store. Moving between levels never touches a store's own cursor.
#[derive(Debug)]
pub struct StoreManager {
    source: Value,
    stores: Box<[Store]>,
    index: usize,
}

impl StoreManager {
    /// Build the stores for `source`.
    pub fn new(source: Value) -> Result<Self, TreeError> {
        let stores = Self::build(&source)?;
        Ok(Self {
            source,
            stores,
            index: 0,
        })
    }

    /// Replace the source and rebuild every store.
    pub fn init(&mut self, source: Value) -> Result<(), TreeError> {
        self.stores = Self::build(&source)?;
        self.source = source;
        self.index = 0;
        Ok(())
    }

    /// Rebuild every store from the current source, dropping all history.
    pub fn reset(&mut self) -> Result<(), TreeError> {
        self.stores = Self::build(&self.source)?;
        self.index = 0;
        Ok(())
    }

    fn build(source: &Value) -> Result<Box<[Store]>, TreeError> {
        let stores: Vec<Store> = match source {
            Value::Array(levels) => levels
                .iter()
                .cloned()
                .map(Store::new)
                .collect::<Result<_, _>>()?,
            single => vec![Store::new(single.clone())?],
        };
        info!(levels = stores.len(), "level stores initialised");
        Ok(stores.into_boxed_slice())
    }

    /// The current store.
    ///
    /// An empty level list has no stores; every delegating call is then a
    /// no-op and this returns `None`.
    pub fn store(&self) -> Option<&Store> {
        self.stores.get(self.index)
    }

    pub fn store_mut(&mut self) -> Option<&mut Store> {
        self.stores.get_mut(self.index)
    }

    pub fn stores(&self) -> &[Store] {
        &self.stores
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    /// Snapshot of the current level's tree.
    pub fn level(&self) -> Option<Value> {
        self.store().map(|store| store.tree().snapshot())
    }

    /// Snapshots of every level's tree.
    pub fn levels(&self) -> Vec<Value> {
        self.stores
            .iter()
            .map(|store| store.tree().snapshot())
            .collect()
    }

    pub fn commit(&mut self) {
        if let Some(store) = self.store_mut() {
            store.commit();
        }
    }

    pub fn load_changes(&mut self) -> Result<bool, TreeError> {
        match self.store_mut() {
            Some(store) => store.load_changes(),
            None => Ok(false),
        }
    }

    pub fn unload_changes(&mut self) -> Result<bool, TreeError> {
        match self.store_mut() {
            Some(store) => store.unload_changes(),
            None => Ok(false),
        }
    }

    /// Move to the next level, if there is one.
    pub fn load_next(&mut self) -> bool {
        if self.index + 1 < self.stores.len() {
            self.index += 1;
            debug!(level = self.index, "loaded next level");
            true
        } else {
            false
        }
    }

    /// Move to the prior level, if there is one.
    pub fn load_prior(&mut self) -> bool {
        if self.index > 0 {
            self.index -= 1;
            debug!(level = self.index, "loaded prior level");
            true
        } else {
            false
        }
    }
}

/// Cloneable shared handle to a [`StoreManager`].
///
/// The coordinator and the game share one `Levels`. Access goes through
/// closures so no lock is ever held across an `.await`.
#[derive(Clone, Debug)]
pub struct Levels {
    inner: Arc<Mutex<StoreManager>>,
}

impl Levels {
    pub fn new(source: Value) -> Result<Self, TreeError> {
        Ok(Self {
            inner: Arc::new(Mutex::new(StoreManager::new(source)?)),
        })
    }

    /// Run `f` with exclusive access to the manager.
    pub fn with<R>(&self, f: impl FnOnce(&mut StoreManager) -> R) -> R {
        f(&mut lock(&self.inner))
    }

    /// Run `f` against the current level's store.
    pub fn with_store<R>(&self, f: impl FnOnce(&mut Store) -> R) -> Option<R> {
        self.with(|manager| manager.store_mut().map(f))
    }

    /// Snapshot of the current level's tree.
    pub fn level(&self) -> Option<Value> {
        self.with(|manager| manager.level())
    }

    pub fn index(&self) -> usize {
        self.with(|manager| manager.index())
    }
}
