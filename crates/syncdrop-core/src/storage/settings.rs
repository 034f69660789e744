//! Device-scoped scalar settings: the device id and the guest flag.

use redb::{ReadableTable, TableDefinition};

use super::LocalStore;
use crate::error::SyncResult;

/// Table holding the device id (key: fixed name, value: id string)
pub(crate) const DEVICE_TABLE: TableDefinition<&str, &str> = TableDefinition::new("device");

/// Table holding boolean flags (key: flag name, value: 0 or 1)
pub(crate) const FLAGS_TABLE: TableDefinition<&str, u8> = TableDefinition::new("flags");

const DEVICE_ID_KEY: &str = "device_id";
const GUEST_FLAG_KEY: &str = "guest";

impl LocalStore {
    /// Return the persisted device id, storing `candidate` first if there is
    /// none or the stored value fails `is_valid`.
    ///
    /// Read and write happen in one write transaction, so every context
    /// sharing the database observes the same id.
    pub fn device_id_or_insert<F>(&self, candidate: &str, is_valid: F) -> SyncResult<String>
    where
        F: Fn(&str) -> bool,
    {
        let db = self.db_handle();
        let db_guard = db.read();
        let write_txn = db_guard.begin_write()?;
        let device_id = {
            let mut table = write_txn.open_table(DEVICE_TABLE)?;
            let stored = table.get(DEVICE_ID_KEY)?.map(|v| v.value().to_string());
            match stored {
                Some(id) if is_valid(&id) => id,
                _ => {
                    table.insert(DEVICE_ID_KEY, candidate)?;
                    candidate.to_string()
                }
            }
        };
        write_txn.commit()?;
        Ok(device_id)
    }

    #[cfg(test)]
    pub(crate) fn load_device_id(&self) -> SyncResult<Option<String>> {
        let db = self.db_handle();
        let db_guard = db.read();
        let read_txn = db_guard.begin_read()?;
        let table = read_txn.open_table(DEVICE_TABLE)?;

        Ok(table.get(DEVICE_ID_KEY)?.map(|v| v.value().to_string()))
    }

    #[cfg(test)]
    pub(crate) fn save_device_id(&self, device_id: &str) -> SyncResult<()> {
        let db = self.db_handle();
        let db_guard = db.read();
        let write_txn = db_guard.begin_write()?;
        {
            let mut table = write_txn.open_table(DEVICE_TABLE)?;
            table.insert(DEVICE_ID_KEY, device_id)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Whether the user explicitly chose to continue without an account.
    pub fn is_guest(&self) -> SyncResult<bool> {
        let db = self.db_handle();
        let db_guard = db.read();
        let read_txn = db_guard.begin_read()?;
        let table = read_txn.open_table(FLAGS_TABLE)?;

        Ok(table.get(GUEST_FLAG_KEY)?.is_some_and(|v| v.value() != 0))
    }

    pub fn set_guest(&self, guest: bool) -> SyncResult<()> {
        let db = self.db_handle();
        let db_guard = db.read();
        let write_txn = db_guard.begin_write()?;
        {
            let mut table = write_txn.open_table(FLAGS_TABLE)?;
            if guest {
                table.insert(GUEST_FLAG_KEY, 1u8)?;
            } else {
                table.remove(GUEST_FLAG_KEY)?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }
}
