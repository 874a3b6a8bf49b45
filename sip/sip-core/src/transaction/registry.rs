use super::{TxEvent, TxKey};
use crate::error::{Error, Result};
use crate::Request;
use parking_lot::RwLock;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// The kind of state machine a registered transaction runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TxKind {
    InviteServer,
    Server,
    InviteClient,
    Client,
}

/// A live transaction as seen by the registry
#[derive(Debug, Clone)]
pub(crate) struct TxEntry {
    pub(crate) kind: TxKind,
    pub(crate) origin: Arc<Request>,
    pub(crate) sender: UnboundedSender<TxEvent>,
}

/// Concurrent map owning the lifecycle of all live transactions.
///
/// A transaction is registered before its first external event is
/// delivered and removed when it reaches the Terminated state.
#[derive(Debug, Default)]
pub(crate) struct TxRegistry {
    map: RwLock<HashMap<TxKey, TxEntry>>,
}

impl TxRegistry {
    /// Register a transaction under `key`, failing if a live transaction
    /// already owns it
    pub(crate) fn put_if_absent(&self, key: TxKey, entry: TxEntry) -> Result<()> {
        match self.map.write().entry(key) {
            Entry::Occupied(_) => Err(Error::DuplicateTransaction),
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
                Ok(())
            }
        }
    }

    pub(crate) fn get(&self, key: &TxKey) -> Option<TxEntry> {
        self.map.read().get(key).cloned()
    }

    pub(crate) fn remove(&self, key: &TxKey) {
        self.map.write().remove(key);
    }

    /// Event senders of every live transaction
    pub(crate) fn senders(&self) -> Vec<UnboundedSender<TxEvent>> {
        self.map.read().values().map(|e| e.sender.clone()).collect()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, key: &TxKey) -> bool {
        self.map.read().contains_key(key)
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::msg;
    use tokio::sync::mpsc;

    fn entry() -> TxEntry {
        let (sender, _receiver) = mpsc::unbounded_channel();

        TxEntry {
            kind: TxKind::InviteServer,
            origin: Arc::new(msg::invite("z9hG4bKabc")),
            sender,
        }
    }

    #[test]
    fn put_if_absent_rejects_duplicates() {
        let registry = TxRegistry::default();
        let key = TxKey::server(&msg::invite("z9hG4bKabc").base).unwrap();

        registry.put_if_absent(key.clone(), entry()).unwrap();

        assert!(matches!(
            registry.put_if_absent(key.clone(), entry()),
            Err(Error::DuplicateTransaction)
        ));
        assert!(registry.contains(&key));
    }

    #[test]
    fn removal_frees_the_key() {
        let registry = TxRegistry::default();
        let key = TxKey::server(&msg::invite("z9hG4bKabc").base).unwrap();

        registry.put_if_absent(key.clone(), entry()).unwrap();
        registry.remove(&key);

        assert!(registry.put_if_absent(key, entry()).is_ok());
    }
}
