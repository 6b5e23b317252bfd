//! Threshold configuration file

use std::path::Path;

use super::{FlatFile, StoreError, THRESHOLDS_FILE};
use crate::alerts::ThresholdSet;

/// Field name -> {min, max}, reloaded on every evaluation cycle
pub struct ThresholdStore {
    file: FlatFile<ThresholdSet>,
}

impl ThresholdStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            file: FlatFile::new(data_dir.join(THRESHOLDS_FILE)),
        }
    }

    pub fn load(&self) -> ThresholdSet {
        self.file.load()
    }

    pub fn save(&self, thresholds: &ThresholdSet) -> Result<(), StoreError> {
        self.file.save(thresholds)
    }
}
