use crate::MailId;
use anyhow::{bail, Context as _, Result};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    io,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::sync::RwLock;

/// the durable flat key-value store of a node
///
/// the whole state is held in memory as typed records and serialized at the
/// boundary to a single flat JSON document with dotted keys:
///
/// ```text
/// user.<name>.passwd   user.<name>.enc   user.<name>.sign
/// tokens.<token>       inbox.<user>      outbox.<host>      ring
/// ```
///
/// Every mutation rewrites the document wholesale. Mutations are funneled
/// through one write lock and the document is replaced on disk *before* the
/// in-memory state is committed, so concurrent commands serialize instead of
/// racing on the whole-file replace, and a failed write leaves the visible
/// state untouched.
#[derive(Clone)]
pub struct Store {
    path: Arc<PathBuf>,
    state: Arc<RwLock<State>>,
}

/// everything known about one local user
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserRecord {
    pub password_hash: Option<String>,
    pub encryption_key: Option<String>,
    pub signing_key: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct State {
    users: BTreeMap<String, UserRecord>,
    tokens: BTreeMap<String, String>,
    inboxes: BTreeMap<String, Vec<MailId>>,
    outboxes: BTreeMap<String, Vec<MailId>>,
    ring: Vec<String>,
}

/// one value of the flat document: a bare string or an ordered list
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum Slot {
    Text(String),
    List(Vec<String>),
}

impl State {
    fn to_document(&self) -> BTreeMap<String, Slot> {
        let mut document = BTreeMap::new();

        for (name, record) in &self.users {
            if let Some(hash) = &record.password_hash {
                document.insert(format!("user.{}.passwd", name), Slot::Text(hash.clone()));
            }
            if let Some(key) = &record.encryption_key {
                document.insert(format!("user.{}.enc", name), Slot::Text(key.clone()));
            }
            if let Some(key) = &record.signing_key {
                document.insert(format!("user.{}.sign", name), Slot::Text(key.clone()));
            }
        }
        for (token, username) in &self.tokens {
            document.insert(format!("tokens.{}", token), Slot::Text(username.clone()));
        }
        for (username, ids) in &self.inboxes {
            if !ids.is_empty() {
                document.insert(format!("inbox.{}", username), Slot::ids(ids));
            }
        }
        for (host, ids) in &self.outboxes {
            if !ids.is_empty() {
                document.insert(format!("outbox.{}", host), Slot::ids(ids));
            }
        }
        if !self.ring.is_empty() {
            document.insert("ring".to_owned(), Slot::List(self.ring.clone()));
        }

        document
    }

    fn from_document(document: BTreeMap<String, Slot>) -> Result<Self> {
        let mut state = State::default();

        for (key, slot) in document {
            if key == "ring" {
                state.ring = slot.into_list(&key)?;
            } else if let Some(rest) = key.strip_prefix("user.") {
                let (name, field) = rest
                    .rsplit_once('.')
                    .with_context(|| format!("store key `{}` is missing its field suffix", key))?;
                let record = state.users.entry(name.to_owned()).or_default();
                let value = Some(slot.into_text(&key)?);
                match field {
                    "passwd" => record.password_hash = value,
                    "enc" => record.encryption_key = value,
                    "sign" => record.signing_key = value,
                    _ => bail!("unknown user field in store key `{}`", key),
                }
            } else if let Some(token) = key.strip_prefix("tokens.") {
                let username = slot.into_text(&key)?;
                state.tokens.insert(token.to_owned(), username);
            } else if let Some(username) = key.strip_prefix("inbox.") {
                let ids = Slot::parse_ids(slot.into_list(&key)?, &key)?;
                state.inboxes.insert(username.to_owned(), ids);
            } else if let Some(host) = key.strip_prefix("outbox.") {
                let ids = Slot::parse_ids(slot.into_list(&key)?, &key)?;
                state.outboxes.insert(host.to_owned(), ids);
            } else {
                bail!("unknown store key `{}`", key);
            }
        }

        Ok(state)
    }
}

impl Slot {
    fn ids(ids: &[MailId]) -> Self {
        Slot::List(ids.iter().map(MailId::to_string).collect())
    }

    fn parse_ids(list: Vec<String>, key: &str) -> Result<Vec<MailId>> {
        list.into_iter()
            .map(|id| {
                id.parse()
                    .with_context(|| format!("invalid mail id `{}` under store key `{}`", id, key))
            })
            .collect()
    }

    fn into_text(self, key: &str) -> Result<String> {
        match self {
            Slot::Text(text) => Ok(text),
            Slot::List(_) => bail!("store key `{}` must hold a string, found a list", key),
        }
    }

    fn into_list(self, key: &str) -> Result<Vec<String>> {
        match self {
            Slot::List(list) => Ok(list),
            Slot::Text(_) => bail!("store key `{}` must hold a list, found a string", key),
        }
    }
}

impl Store {
    /// open the store document, creating an empty one if the file is absent
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_owned();

        let state = match tokio::fs::read(&path).await {
            Ok(raw) => {
                let document: BTreeMap<String, Slot> = serde_json::from_slice(&raw)
                    .with_context(|| format!("cannot parse store document: {}", path.display()))?;
                State::from_document(document)
                    .with_context(|| format!("invalid store document: {}", path.display()))?
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                tokio::fs::write(&path, b"{}").await.with_context(|| {
                    format!("cannot create the store document: {}", path.display())
                })?;
                State::default()
            }
            Err(error) => {
                return Err(error)
                    .with_context(|| format!("cannot open the store document: {}", path.display()))
            }
        };

        Ok(Self {
            path: Arc::new(path),
            state: Arc::new(RwLock::new(state)),
        })
    }

    /// single serialization point for every mutation: replace the document
    /// on disk first, commit the in-memory state only once the write went
    /// through
    async fn mutate<F, T>(&self, mutation: F) -> Result<T>
    where
        F: FnOnce(&mut State) -> T,
    {
        let mut guard = self.state.write().await;

        let mut next = guard.clone();
        let output = mutation(&mut next);

        let document =
            serde_json::to_vec(&next.to_document()).context("cannot serialize the store document")?;
        tokio::fs::write(self.path.as_ref(), document)
            .await
            .with_context(|| format!("cannot replace the store document: {}", self.path.display()))?;

        *guard = next;
        Ok(output)
    }

    // ------------------------------------------------------------------ users

    /// create the user, or reset the password of an existing one
    pub async fn create_user(&self, username: &str, password_hash: &str) -> Result<()> {
        let username = username.to_owned();
        let hash = password_hash.to_owned();
        self.mutate(move |state| {
            state.users.entry(username).or_default().password_hash = Some(hash);
        })
        .await
    }

    /// delete the user and purge their tokens and inbox references
    ///
    /// archived bodies of mail already forwarded elsewhere are deliberately
    /// left in place
    pub async fn delete_user(&self, username: &str) -> Result<bool> {
        let username = username.to_owned();
        self.mutate(move |state| {
            let removed = state.users.remove(&username).is_some();
            state.inboxes.remove(&username);
            state.tokens.retain(|_, owner| *owner != username);
            removed
        })
        .await
    }

    pub async fn password_hash(&self, username: &str) -> Option<String> {
        let guard = self.state.read().await;
        guard.users.get(username)?.password_hash.clone()
    }

    /// both stored keys of the user, only if both have been set
    pub async fn user_keys(&self, username: &str) -> Option<(String, String)> {
        let guard = self.state.read().await;
        let record = guard.users.get(username)?;
        let enc = record.encryption_key.clone()?;
        let sign = record.signing_key.clone()?;
        Some((enc, sign))
    }

    pub async fn set_user_keys(&self, username: &str, enc: &str, sign: &str) -> Result<()> {
        let username = username.to_owned();
        let enc = enc.to_owned();
        let sign = sign.to_owned();
        self.mutate(move |state| {
            let record = state.users.entry(username).or_default();
            record.encryption_key = Some(enc);
            record.signing_key = Some(sign);
        })
        .await
    }

    // ----------------------------------------------------------------- tokens

    pub async fn insert_token(&self, token: &str, username: &str) -> Result<()> {
        let token = token.to_owned();
        let username = username.to_owned();
        self.mutate(move |state| {
            state.tokens.insert(token, username);
        })
        .await
    }

    pub async fn resolve_token(&self, token: &str) -> Option<String> {
        let guard = self.state.read().await;
        guard.tokens.get(token).cloned()
    }

    /// true if the token existed; revoking an unknown token is not an error
    pub async fn revoke_token(&self, token: &str) -> Result<bool> {
        let token = token.to_owned();
        self.mutate(move |state| state.tokens.remove(&token).is_some())
            .await
    }

    // ---------------------------------------------------------------- inboxes

    /// the ordered inbox of the user; an unknown user simply has an empty one
    pub async fn inbox(&self, username: &str) -> Vec<MailId> {
        let guard = self.state.read().await;
        guard.inboxes.get(username).cloned().unwrap_or_default()
    }

    pub async fn inbox_contains(&self, username: &str, id: MailId) -> bool {
        let guard = self.state.read().await;
        guard
            .inboxes
            .get(username)
            .map(|ids| ids.contains(&id))
            .unwrap_or(false)
    }

    pub async fn inbox_push(&self, username: &str, id: MailId) -> Result<()> {
        let username = username.to_owned();
        self.mutate(move |state| {
            state.inboxes.entry(username).or_default().push(id);
        })
        .await
    }

    /// remove one id from the user's inbox; false if it was not referenced
    pub async fn inbox_remove(&self, username: &str, id: MailId) -> Result<bool> {
        let username = username.to_owned();
        self.mutate(move |state| {
            let ids = match state.inboxes.get_mut(&username) {
                Some(ids) => ids,
                None => return false,
            };
            match ids.iter().position(|entry| *entry == id) {
                Some(position) => {
                    ids.remove(position);
                    true
                }
                None => false,
            }
        })
        .await
    }

    // --------------------------------------------------------------- outboxes

    /// the ordered queue of mail pending for the given remote host
    pub async fn outbox(&self, host: &str) -> Vec<MailId> {
        let guard = self.state.read().await;
        guard.outboxes.get(host).cloned().unwrap_or_default()
    }

    /// queue one id for the host; returns the queue length after the push
    pub async fn outbox_push(&self, host: &str, id: MailId) -> Result<usize> {
        let host = host.to_owned();
        self.mutate(move |state| {
            let queue = state.outboxes.entry(host).or_default();
            queue.push(id);
            queue.len()
        })
        .await
    }

    // ------------------------------------------------------------------- ring

    /// the peer hostnames this node polls for pending mail
    pub async fn ring(&self) -> Vec<String> {
        let guard = self.state.read().await;
        guard.ring.clone()
    }

    /// false if the host was already part of the ring
    pub async fn ring_add(&self, host: &str) -> Result<bool> {
        let host = host.to_owned();
        self.mutate(move |state| {
            if state.ring.contains(&host) {
                false
            } else {
                state.ring.push(host);
                true
            }
        })
        .await
    }

    pub async fn ring_remove(&self, host: &str) -> Result<bool> {
        let host = host.to_owned();
        self.mutate(move |state| match state.ring.iter().position(|entry| *entry == host) {
            Some(position) => {
                state.ring.remove(position);
                true
            }
            None => false,
        })
        .await
    }
}
