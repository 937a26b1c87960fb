//! NVS-backed configuration storage.

use bubblebridge::config::{ConfigStorage, StorageError, ValueString, MAX_VALUE_LEN};
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};
use esp_idf_svc::sys::{esp, nvs_commit, EspError};

pub const NAMESPACE: &str = "bubblebridge";

pub struct NvsStorage {
    nvs: EspNvs<NvsDefault>,
}

impl NvsStorage {
    pub fn new(partition: EspDefaultNvsPartition) -> Result<Self, EspError> {
        Ok(Self {
            nvs: EspNvs::new(partition, NAMESPACE, true)?,
        })
    }
}

fn backend(e: EspError) -> StorageError {
    StorageError::Backend(e.code())
}

impl ConfigStorage for NvsStorage {
    fn get_str(&mut self, name: &str) -> Result<Option<ValueString>, StorageError> {
        // One extra byte for the terminating NUL
        let mut buf = [0u8; MAX_VALUE_LEN + 1];
        match self.nvs.get_str(name, &mut buf) {
            Ok(Some(s)) => Ok(ValueString::try_from(s).ok()),
            Ok(None) => Ok(None),
            Err(e) => Err(backend(e)),
        }
    }

    fn get_i32(&mut self, name: &str) -> Result<Option<i32>, StorageError> {
        self.nvs.get_i32(name).map_err(backend)
    }

    fn set_str(&mut self, name: &str, value: &str) -> Result<(), StorageError> {
        self.nvs.set_str(name, value).map_err(backend)
    }

    fn set_i32(&mut self, name: &str, value: i32) -> Result<(), StorageError> {
        self.nvs.set_i32(name, value).map_err(backend)
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        esp!(unsafe { nvs_commit(self.nvs.handle()) }).map_err(backend)
    }
}
