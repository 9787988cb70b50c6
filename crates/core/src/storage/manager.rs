use log::debug;

use crate::errors::CoreError;
use crate::models::ledger::LedgerData;

use super::format;

/// Save/load the full ledger to/from snapshot bytes or files.
pub struct StorageManager;

impl StorageManager {
    /// Flow: LedgerData → bincode → LLDG header + payload
    pub fn save_to_bytes(data: &LedgerData) -> Result<Vec<u8>, CoreError> {
        let payload = bincode::serialize(data)
            .map_err(|e| CoreError::Serialization(format!("Failed to serialize ledger: {e}")))?;
        debug!(
            "Serialized ledger snapshot: {} accounts, {} lots, {} batches, {} bytes",
            data.accounts.len(),
            data.lots.len(),
            data.batches.len(),
            payload.len()
        );
        Ok(format::write_file(format::CURRENT_VERSION, &payload))
    }

    /// Flow: LLDG bytes → parse header → bincode → LedgerData
    pub fn load_from_bytes(bytes: &[u8]) -> Result<LedgerData, CoreError> {
        let (_header, payload) = format::read_file(bytes)?;
        bincode::deserialize(payload)
            .map_err(|e| CoreError::Deserialization(format!("Failed to deserialize ledger: {e}")))
    }

    #[cfg(not(target_arch = "wasm32"))]
    pub fn save_to_file(data: &LedgerData, path: impl AsRef<std::path::Path>) -> Result<(), CoreError> {
        let bytes = Self::save_to_bytes(data)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    #[cfg(not(target_arch = "wasm32"))]
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<LedgerData, CoreError> {
        let bytes = std::fs::read(path)?;
        Self::load_from_bytes(&bytes)
    }
}
