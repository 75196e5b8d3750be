//! Process-local store
//!
//! All state sits behind one mutex. Batch commits are applied to a staging
//! copy and swapped in only when every record applied.

use super::{new_id, Device, PresenceStore, Registry, StatusCounters, User};
use crate::error::{DomainError, PresenceError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Default)]
struct State {
    users: BTreeMap<String, User>,
    devices: BTreeMap<String, Device>,
    counters: StatusCounters,
}

impl State {
    /// Device as read back, with the owner's current nickname
    fn joined(&self, device: &Device) -> Option<Device> {
        let owner = self.users.get(&device.owner_id)?;
        Some(Device {
            owner: owner.nickname.clone(),
            ..device.clone()
        })
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| PresenceError::Other("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl PresenceStore for MemoryStore {
    async fn all_devices(&self) -> Result<Vec<Device>> {
        let state = self.lock()?;
        Ok(state.devices.values().filter_map(|d| state.joined(d)).collect())
    }

    async fn all_users(&self) -> Result<Vec<User>> {
        Ok(self.lock()?.users.values().cloned().collect())
    }

    async fn commit_all(&self, users: Vec<User>, counters: StatusCounters) -> Result<()> {
        let mut state = self.lock()?;
        let mut staged = state.users.clone();
        for user in users {
            let entry = staged
                .get_mut(&user.id)
                .ok_or_else(|| PresenceError::unknown_user(&user.id))?;
            entry.online = user.online;
        }
        state.users = staged;
        state.counters = counters;
        Ok(())
    }

    async fn status_counters(&self) -> Result<StatusCounters> {
        Ok(self.lock()?.counters.clone())
    }
}

#[async_trait]
impl Registry for MemoryStore {
    async fn add_user(&self, nickname: &str) -> Result<User> {
        let mut state = self.lock()?;
        if state.users.values().any(|u| u.nickname == nickname) {
            return Err(PresenceError::Domain(DomainError::NicknameTaken {
                nickname: nickname.to_string(),
            }));
        }
        let user = User {
            id: new_id(),
            nickname: nickname.to_string(),
            online: false,
        };
        state.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn user(&self, id: &str) -> Result<User> {
        self.lock()?
            .users
            .get(id)
            .cloned()
            .ok_or_else(|| PresenceError::unknown_user(id))
    }

    async fn remove_user(&self, id: &str) -> Result<()> {
        let mut state = self.lock()?;
        state
            .users
            .remove(id)
            .ok_or_else(|| PresenceError::unknown_user(id))?;
        state.devices.retain(|_, d| d.owner_id != id);
        Ok(())
    }

    async fn add_device(&self, owner_id: &str, tag: &str, hashed_address: &str) -> Result<Device> {
        let mut state = self.lock()?;
        if !state.users.contains_key(owner_id) {
            return Err(PresenceError::unknown_user(owner_id));
        }
        let device = Device {
            id: new_id(),
            owner_id: owner_id.to_string(),
            tag: tag.to_string(),
            owner: String::new(),
            hashed_address: hashed_address.to_string(),
        };
        state.devices.insert(device.id.clone(), device.clone());
        state
            .joined(&device)
            .ok_or_else(|| PresenceError::unknown_user(owner_id))
    }

    async fn devices_of(&self, owner_id: &str) -> Result<Vec<Device>> {
        let state = self.lock()?;
        if !state.users.contains_key(owner_id) {
            return Err(PresenceError::unknown_user(owner_id));
        }
        Ok(state
            .devices
            .values()
            .filter(|d| d.owner_id == owner_id)
            .filter_map(|d| state.joined(d))
            .collect())
    }

    async fn remove_device(&self, id: &str) -> Result<()> {
        self.lock()?
            .devices
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| PresenceError::unknown_device(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_commit_with_unknown_user_changes_nothing() {
        let store = MemoryStore::new();
        let mut alice = store.add_user("alice").await.unwrap();
        alice.online = true;
        let ghost = User {
            id: "ghost".to_string(),
            nickname: "ghost".to_string(),
            online: true,
        };
        let counters = StatusCounters {
            online_users: 2,
            ..Default::default()
        };

        let result = store.commit_all(vec![alice.clone(), ghost], counters).await;
        assert!(result.unwrap_err().is_not_found());
        assert!(!store.user(&alice.id).await.unwrap().online);
        assert_eq!(store.status_counters().await.unwrap(), StatusCounters::default());
    }

    #[tokio::test]
    async fn test_nickname_unique() {
        let store = MemoryStore::new();
        store.add_user("alice").await.unwrap();
        assert!(store.add_user("alice").await.is_err());
    }

    #[tokio::test]
    async fn test_remove_user_cascades() {
        let store = MemoryStore::new();
        let alice = store.add_user("alice").await.unwrap();
        store.add_device(&alice.id, "phone", "$hash").await.unwrap();
        store.remove_user(&alice.id).await.unwrap();
        assert!(store.all_devices().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_device_owner_joined_on_read() {
        let store = MemoryStore::new();
        let alice = store.add_user("alice").await.unwrap();
        let added = store.add_device(&alice.id, "phone", "$hash").await.unwrap();
        assert_eq!(added.owner, "alice");

        // Stored record carries no nickname copy
        assert!(store.lock().unwrap().devices[&added.id].owner.is_empty());

        store.lock().unwrap().users.get_mut(&alice.id).unwrap().nickname = "alicia".to_string();
        assert_eq!(store.all_devices().await.unwrap()[0].owner, "alicia");
        assert_eq!(store.devices_of(&alice.id).await.unwrap()[0].owner, "alicia");
    }

    #[tokio::test]
    async fn test_device_requires_owner() {
        let store = MemoryStore::new();
        assert!(store.add_device("nobody", "phone", "$hash").await.is_err());
    }
}
