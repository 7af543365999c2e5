//! Conversation store service

use std::collections::HashMap;
use std::sync::Arc;

use chat_core::{Conversation, Message, DEFAULT_CONVERSATION_TITLE};
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::error::{Result, StoreError};
use crate::storage::{DeletionMode, KeyValueStore};

/// Key under which the whole store is persisted
pub const CONVERSATIONS_KEY: &str = "conversations";

type ConversationSlot = Arc<Mutex<Conversation>>;

/// Conversation Store - owns every conversation and its messages
///
/// Each conversation sits behind its own async mutex, so mutations of one id
/// are serialized while different ids proceed independently. A mutation is
/// applied to a copy, the full document is saved with that copy, and only
/// then does the copy replace the live conversation: a failed save leaves
/// memory untouched.
///
/// Lock order is always conversation slot, then `persisted`.
pub struct ConversationStore<S: KeyValueStore> {
    persistence: Arc<S>,
    conversations: DashMap<String, ConversationSlot>,
    /// Last successfully saved state of every conversation in the document
    persisted: Mutex<HashMap<String, Conversation>>,
}

impl<S: KeyValueStore> ConversationStore<S> {
    /// Create an empty store without reading persisted state
    pub fn new(persistence: S) -> Self {
        Self {
            persistence: Arc::new(persistence),
            conversations: DashMap::new(),
            persisted: Mutex::new(HashMap::new()),
        }
    }

    /// Load the store from persistence; a missing or corrupt document yields
    /// an empty store
    pub async fn load(persistence: S) -> Self {
        let store = Self::new(persistence);

        let conversations = match store.persistence.get(CONVERSATIONS_KEY).await {
            Ok(Some(value)) => match serde_json::from_value::<Vec<Conversation>>(value) {
                Ok(conversations) => conversations,
                Err(e) => {
                    log::warn!("Discarding corrupt conversation data: {}", e);
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                log::warn!("Could not read persisted conversations, starting empty: {}", e);
                Vec::new()
            }
        };

        {
            let mut persisted = store.persisted.lock().await;
            for conversation in conversations {
                if persisted.contains_key(&conversation.id) {
                    log::warn!("Skipping duplicate conversation id {}", conversation.id);
                    continue;
                }
                persisted.insert(conversation.id.clone(), conversation.clone());
                store
                    .conversations
                    .insert(conversation.id.clone(), Arc::new(Mutex::new(conversation)));
            }
        }

        log::debug!("Loaded {} conversations", store.conversations.len());
        store
    }

    fn slot(&self, conversation_id: &str) -> Result<ConversationSlot> {
        self.conversations
            .get(conversation_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::NotFound(conversation_id.to_string()))
    }

    /// Apply `f` to a copy of an active conversation under its lock, save,
    /// then make the copy live.
    ///
    /// Nothing is mutated when the conversation is missing, `f` fails or the
    /// save fails.
    async fn mutate<T, F>(&self, conversation_id: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Conversation) -> Result<T>,
    {
        let slot = self.slot(conversation_id)?;
        let mut conversation = slot.lock().await;
        if conversation.is_deleted() {
            return Err(StoreError::NotFound(conversation_id.to_string()));
        }

        let mut pending = conversation.clone();
        let result = f(&mut pending)?;

        self.persist(conversation_id, Some(pending.clone())).await?;
        *conversation = pending;
        Ok(result)
    }

    /// Write the document with `conversation_id` replaced by `pending`
    /// (or removed when `None`), and record it as saved on success.
    async fn persist(&self, conversation_id: &str, pending: Option<Conversation>) -> Result<()> {
        let mut persisted = self.persisted.lock().await;

        let mut document: Vec<&Conversation> = persisted
            .values()
            .filter(|c| c.id != conversation_id)
            .chain(pending.as_ref())
            .collect();
        sort_for_document(&mut document);

        let value = serde_json::to_value(&document)?;
        self.persistence.set(CONVERSATIONS_KEY, value).await?;

        match pending {
            Some(conversation) => {
                persisted.insert(conversation_id.to_string(), conversation);
            }
            None => {
                persisted.remove(conversation_id);
            }
        }
        Ok(())
    }

    /// Create a conversation and persist it immediately
    pub async fn create(&self, initial_title: impl Into<String>) -> Result<Conversation> {
        let conversation = Conversation::new(initial_title);

        self.persist(&conversation.id, Some(conversation.clone()))
            .await?;
        self.conversations.insert(
            conversation.id.clone(),
            Arc::new(Mutex::new(conversation.clone())),
        );

        log::info!("Created conversation {}", conversation.id);
        Ok(conversation)
    }

    /// Snapshot of an active conversation
    pub async fn get(&self, conversation_id: &str) -> Result<Conversation> {
        let slot = self.slot(conversation_id)?;
        let conversation = slot.lock().await;
        if conversation.is_deleted() {
            return Err(StoreError::NotFound(conversation_id.to_string()));
        }
        Ok(conversation.clone())
    }

    /// Append a message; derives the title from the first user message
    pub async fn append_message(&self, conversation_id: &str, message: Message) -> Result<()> {
        self.mutate(conversation_id, |conversation| {
            if conversation.messages.iter().any(|m| m.id == message.id) {
                return Err(StoreError::DuplicateMessageId(message.id.clone()));
            }
            conversation.push_message(message);
            Ok(())
        })
        .await
    }

    /// Remove a message (used to roll back optimistic inserts)
    pub async fn remove_message(&self, conversation_id: &str, message_id: &str) -> Result<Message> {
        self.mutate(conversation_id, |conversation| {
            conversation
                .remove_message(message_id)
                .ok_or_else(|| StoreError::MessageNotFound(message_id.to_string()))
        })
        .await
    }

    /// Replace a message id, e.g. a temporary id with the server-confirmed one
    pub async fn replace_message_id(
        &self,
        conversation_id: &str,
        old_id: &str,
        new_id: &str,
    ) -> Result<()> {
        self.mutate(conversation_id, |conversation| {
            if old_id != new_id && conversation.messages.iter().any(|m| m.id == new_id) {
                return Err(StoreError::DuplicateMessageId(new_id.to_string()));
            }
            let message = conversation
                .messages
                .iter_mut()
                .find(|m| m.id == old_id)
                .ok_or_else(|| StoreError::MessageNotFound(old_id.to_string()))?;
            message.id = new_id.to_string();
            Ok(())
        })
        .await
    }

    pub async fn update_title(&self, conversation_id: &str, title: &str) -> Result<()> {
        let title = title.trim();
        let title = if title.is_empty() {
            DEFAULT_CONVERSATION_TITLE
        } else {
            title
        };
        self.mutate(conversation_id, |conversation| {
            conversation.set_title(title);
            Ok(())
        })
        .await
    }

    /// Delete a conversation: a tombstone or physical removal, as the
    /// persistence collaborator requires
    pub async fn delete(&self, conversation_id: &str) -> Result<()> {
        let slot = self.slot(conversation_id)?;
        let mut conversation = slot.lock().await;
        if conversation.is_deleted() {
            return Err(StoreError::NotFound(conversation_id.to_string()));
        }

        let mut pending = conversation.clone();
        pending.mark_deleted();

        let physical = self.persistence.deletion_mode() == DeletionMode::Physical;
        let saved = if physical {
            None
        } else {
            Some(pending.clone())
        };
        self.persist(conversation_id, saved).await?;

        // Mutations already waiting on the slot must observe the deletion.
        *conversation = pending;
        if physical {
            self.conversations.remove(conversation_id);
        }

        log::info!("Deleted conversation {}", conversation_id);
        Ok(())
    }

    /// Active conversations, most recently updated first (ties by id)
    pub async fn list(&self, limit: usize, offset: usize) -> Vec<Conversation> {
        let mut conversations: Vec<Conversation> = self
            .snapshot_all()
            .await
            .into_iter()
            .filter(|c| !c.is_deleted())
            .collect();

        conversations.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.id.cmp(&b.id))
        });

        conversations.into_iter().skip(offset).take(limit).collect()
    }

    /// Number of active conversations
    pub async fn len(&self) -> usize {
        self.snapshot_all()
            .await
            .iter()
            .filter(|c| !c.is_deleted())
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn snapshot_all(&self) -> Vec<Conversation> {
        // Collect the slots first; no map guard may be held across an await.
        let slots: Vec<ConversationSlot> = self
            .conversations
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let mut snapshot = Vec::with_capacity(slots.len());
        for slot in slots {
            snapshot.push(slot.lock().await.clone());
        }
        snapshot
    }

    /// Write the last saved state of every conversation again
    pub async fn save(&self) -> Result<()> {
        let persisted = self.persisted.lock().await;

        let mut document: Vec<&Conversation> = persisted.values().collect();
        sort_for_document(&mut document);

        let value = serde_json::to_value(&document)?;
        self.persistence.set(CONVERSATIONS_KEY, value).await
    }
}

fn sort_for_document(document: &mut [&Conversation]) {
    document.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FileKeyValueStore, MemoryKeyValueStore};
    use async_trait::async_trait;
    use chat_core::Role;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::tempdir;

    /// Memory store whose writes fail while `failing` is set
    #[derive(Default)]
    struct FlakyKeyValueStore {
        inner: MemoryKeyValueStore,
        failing: AtomicBool,
    }

    impl FlakyKeyValueStore {
        fn fail_writes(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl KeyValueStore for FlakyKeyValueStore {
        async fn get(&self, key: &str) -> Result<Option<Value>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: Value) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(StoreError::Persistence("disk full".to_string()));
            }
            self.inner.set(key, value).await
        }
    }

    #[tokio::test]
    async fn test_create_and_append() {
        let store = ConversationStore::new(MemoryKeyValueStore::new());
        let conversation = store.create(DEFAULT_CONVERSATION_TITLE).await.unwrap();

        store
            .append_message(&conversation.id, Message::user("hello there"))
            .await
            .unwrap();
        store
            .append_message(&conversation.id, Message::assistant("hi"))
            .await
            .unwrap();

        let loaded = store.get(&conversation.id).await.unwrap();
        assert_eq!(loaded.messages.len(), 2);
        assert_eq!(loaded.messages[0].role, Role::User);
        assert_eq!(loaded.title, "hello there");
        assert!(loaded.updated_at >= loaded.created_at);
    }

    #[tokio::test]
    async fn test_missing_conversation_is_not_found() {
        let store = ConversationStore::new(MemoryKeyValueStore::new());

        let result = store.append_message("nope", Message::user("x")).await;
        assert!(matches!(result, Err(StoreError::NotFound(id)) if id == "nope"));
        assert!(matches!(store.get("nope").await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_duplicate_message_id_is_rejected() {
        let store = ConversationStore::new(MemoryKeyValueStore::new());
        let conversation = store.create("t").await.unwrap();
        let message = Message::user("once");

        store
            .append_message(&conversation.id, message.clone())
            .await
            .unwrap();
        let result = store.append_message(&conversation.id, message).await;

        assert!(matches!(result, Err(StoreError::DuplicateMessageId(_))));
        assert_eq!(store.get(&conversation.id).await.unwrap().messages.len(), 1);
    }

    #[tokio::test]
    async fn test_physical_delete() {
        let persistence = MemoryKeyValueStore::new();
        let store = ConversationStore::new(persistence);
        let conversation = store.create("t").await.unwrap();

        store.delete(&conversation.id).await.unwrap();

        assert!(matches!(
            store.append_message(&conversation.id, Message::user("x")).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(store.delete(&conversation.id).await, Err(StoreError::NotFound(_))));
        assert!(store.is_empty().await);

        let persisted = store.persistence.snapshot(CONVERSATIONS_KEY).unwrap();
        assert_eq!(persisted, json!([]));
    }

    #[tokio::test]
    async fn test_soft_delete_keeps_tombstone() {
        let persistence = MemoryKeyValueStore::new().with_deletion_mode(DeletionMode::Soft);
        let store = ConversationStore::new(persistence);
        let conversation = store.create("t").await.unwrap();

        store.delete(&conversation.id).await.unwrap();

        assert!(store.list(10, 0).await.is_empty());
        assert!(matches!(store.get(&conversation.id).await, Err(StoreError::NotFound(_))));

        let persisted = store.persistence.snapshot(CONVERSATIONS_KEY).unwrap();
        assert_eq!(persisted[0]["id"], conversation.id.as_str());
        assert!(persisted[0]["deletedAt"].is_string());
    }

    #[tokio::test]
    async fn test_list_orders_by_updated_at_then_id() {
        let seed = json!([
            {"id": "b", "title": "B", "messages": [],
             "createdAt": "2024-01-01T00:00:00Z", "updatedAt": "2024-01-02T00:00:00Z"},
            {"id": "a", "title": "A", "messages": [],
             "createdAt": "2024-01-01T00:00:00Z", "updatedAt": "2024-01-02T00:00:00Z"},
            {"id": "c", "title": "C", "messages": [],
             "createdAt": "2024-01-01T00:00:00Z", "updatedAt": "2024-01-03T00:00:00Z"},
            {"id": "d", "title": "D", "messages": [],
             "createdAt": "2024-01-01T00:00:00Z", "updatedAt": "2024-01-01T00:00:00Z"}
        ]);
        let persistence = MemoryKeyValueStore::new();
        persistence.insert(CONVERSATIONS_KEY, seed);
        let store = ConversationStore::load(persistence).await;

        let ids: Vec<String> = store.list(10, 0).await.into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["c", "a", "b", "d"]);

        let page: Vec<String> = store.list(2, 1).await.into_iter().map(|c| c.id).collect();
        assert_eq!(page, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_corrupt_persisted_value_starts_empty() {
        let persistence = MemoryKeyValueStore::new();
        persistence.insert(CONVERSATIONS_KEY, json!({"not": "a list"}));

        let store = ConversationStore::load(persistence).await;
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_corrupt_file_starts_empty() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("conversations.json"), "garbage").unwrap();

        let store = ConversationStore::load(FileKeyValueStore::new(dir.path())).await;
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_persistence_roundtrip_through_files() {
        let dir = tempdir().unwrap();
        let conversation_id = {
            let store = ConversationStore::load(FileKeyValueStore::new(dir.path())).await;
            let conversation = store.create(DEFAULT_CONVERSATION_TITLE).await.unwrap();
            store
                .append_message(&conversation.id, Message::user("persist me"))
                .await
                .unwrap();
            conversation.id
        };

        let store = ConversationStore::load(FileKeyValueStore::new(dir.path())).await;
        let conversation = store.get(&conversation_id).await.unwrap();
        assert_eq!(conversation.messages[0].content, "persist me");
        assert_eq!(conversation.title, "persist me");
    }

    #[tokio::test]
    async fn test_remove_and_replace_message_ids() {
        let store = ConversationStore::new(MemoryKeyValueStore::new());
        let conversation = store.create("t").await.unwrap();
        let temp = Message::user("hi").with_temporary_id();
        let temp_id = temp.id.clone();
        store.append_message(&conversation.id, temp).await.unwrap();

        store
            .replace_message_id(&conversation.id, &temp_id, "srv-1")
            .await
            .unwrap();
        assert_eq!(store.get(&conversation.id).await.unwrap().messages[0].id, "srv-1");

        let removed = store.remove_message(&conversation.id, "srv-1").await.unwrap();
        assert_eq!(removed.content, "hi");
        assert!(matches!(
            store.remove_message(&conversation.id, "srv-1").await,
            Err(StoreError::MessageNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_title() {
        let store = ConversationStore::new(MemoryKeyValueStore::new());
        let conversation = store.create("t").await.unwrap();

        store.update_title(&conversation.id, "  Renamed ").await.unwrap();
        assert_eq!(store.get(&conversation.id).await.unwrap().title, "Renamed");

        store.update_title(&conversation.id, "").await.unwrap();
        assert_eq!(
            store.get(&conversation.id).await.unwrap().title,
            DEFAULT_CONVERSATION_TITLE
        );
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_all_kept() {
        let store = Arc::new(ConversationStore::new(MemoryKeyValueStore::new()));
        let first = store.create("one").await.unwrap();
        let second = store.create("two").await.unwrap();

        let mut handles = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            let id = if i % 2 == 0 {
                first.id.clone()
            } else {
                second.id.clone()
            };
            handles.push(tokio::spawn(async move {
                store
                    .append_message(&id, Message::user(format!("m{i}")))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.get(&first.id).await.unwrap().messages.len(), 10);
        assert_eq!(store.get(&second.id).await.unwrap().messages.len(), 10);

        let persisted = store.persistence.snapshot(CONVERSATIONS_KEY).unwrap();
        let total: usize = persisted
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["messages"].as_array().unwrap().len())
            .sum();
        assert_eq!(total, 20);
    }

    #[tokio::test]
    async fn test_failed_save_leaves_memory_untouched() {
        let store = ConversationStore::new(FlakyKeyValueStore::default());
        let conversation = store.create(DEFAULT_CONVERSATION_TITLE).await.unwrap();

        store.persistence.fail_writes(true);
        let result = store
            .append_message(&conversation.id, Message::user("never saved"))
            .await;
        assert!(matches!(result, Err(StoreError::Persistence(_))));

        let current = store.get(&conversation.id).await.unwrap();
        assert!(current.messages.is_empty());
        assert_eq!(current.title, DEFAULT_CONVERSATION_TITLE);

        assert!(store.update_title(&conversation.id, "Renamed").await.is_err());
        assert!(store.delete(&conversation.id).await.is_err());
        assert!(store.create("other").await.is_err());
        assert_eq!(store.len().await, 1);
        assert_eq!(
            store.get(&conversation.id).await.unwrap().title,
            DEFAULT_CONVERSATION_TITLE
        );

        store.persistence.fail_writes(false);
        store
            .append_message(&conversation.id, Message::user("saved"))
            .await
            .unwrap();

        let persisted = store.persistence.inner.snapshot(CONVERSATIONS_KEY).unwrap();
        assert_eq!(persisted.as_array().unwrap().len(), 1);
        assert_eq!(persisted[0]["messages"].as_array().unwrap().len(), 1);
        assert_eq!(persisted[0]["messages"][0]["content"], "saved");
    }
}
