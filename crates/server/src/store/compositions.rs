// In-memory composition store.
//
// The single writer for all composition state. Guest-list appends and
// element mutations take the store's write lock, so two simultaneous
// first-time joiners cannot race the membership check, and access
// predicates are evaluated against a consistent snapshot.

use std::{collections::HashMap, sync::Arc};

use ensemble_common::types::{
    Composition, CompositionElement, CompositionSummary, Member, MemberCompositionSummaries,
};
use tokio::sync::RwLock;
use uuid::Uuid;

/// What a given member may do with a given composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositionAccess {
    /// No composition with that id.
    Missing,
    /// The member owns the composition.
    Owner,
    /// The member is already on the guest list.
    Guest,
    /// Not a member yet, but the composition accepts collaborators.
    Joinable,
    /// Not a member, and the composition is private.
    Forbidden,
}

#[derive(Debug, Clone)]
struct CompositionRecord {
    id: Uuid,
    title: String,
    collaborative: bool,
    owner: Member,
    guests: Vec<Member>,
    elements: Vec<CompositionElement>,
}

impl CompositionRecord {
    fn to_composition(&self) -> Composition {
        Composition {
            id: self.id,
            title: self.title.clone(),
            collaborative: self.collaborative,
            owner: self.owner.clone(),
            elements: self.elements.clone(),
            guests: self.guests.clone(),
        }
    }

    fn summary(&self) -> CompositionSummary {
        CompositionSummary {
            id: self.id,
            title: self.title.clone(),
            collaborative: self.collaborative,
        }
    }
}

#[derive(Clone, Default)]
pub struct CompositionStore {
    inner: Arc<RwLock<HashMap<Uuid, CompositionRecord>>>,
}

impl CompositionStore {
    pub async fn create(&self, owner: Member, title: String, collaborative: bool) -> Composition {
        let record = CompositionRecord {
            id: Uuid::new_v4(),
            title,
            collaborative,
            owner,
            guests: Vec::new(),
            elements: Vec::new(),
        };
        let composition = record.to_composition();
        self.inner.write().await.insert(record.id, record);
        composition
    }

    pub async fn get(&self, id: Uuid) -> Option<Composition> {
        self.inner.read().await.get(&id).map(CompositionRecord::to_composition)
    }

    pub async fn summaries_for(&self, member_id: Uuid) -> MemberCompositionSummaries {
        let guard = self.inner.read().await;
        let mut owned = Vec::new();
        let mut guest = Vec::new();
        for record in guard.values() {
            if record.owner.id == member_id {
                owned.push(record.summary());
            } else if record.guests.iter().any(|g| g.id == member_id) {
                guest.push(record.summary());
            }
        }
        owned.sort_by(|a, b| a.title.cmp(&b.title));
        guest.sort_by(|a, b| a.title.cmp(&b.title));
        MemberCompositionSummaries { owned_compositions: owned, guest_compositions: guest }
    }

    pub async fn access_for(&self, id: Uuid, member_id: Uuid) -> CompositionAccess {
        let guard = self.inner.read().await;
        let Some(record) = guard.get(&id) else {
            return CompositionAccess::Missing;
        };
        if record.owner.id == member_id {
            CompositionAccess::Owner
        } else if record.guests.iter().any(|g| g.id == member_id) {
            CompositionAccess::Guest
        } else if record.collaborative {
            CompositionAccess::Joinable
        } else {
            CompositionAccess::Forbidden
        }
    }

    pub async fn is_owner(&self, id: Uuid, member_id: Uuid) -> bool {
        matches!(self.access_for(id, member_id).await, CompositionAccess::Owner)
    }

    /// Owner, or guest of a currently-collaborative composition.
    pub async fn can_edit_collaboratively(&self, id: Uuid, member_id: Uuid) -> bool {
        let guard = self.inner.read().await;
        let Some(record) = guard.get(&id) else {
            return false;
        };
        record.owner.id == member_id
            || (record.collaborative && record.guests.iter().any(|g| g.id == member_id))
    }

    /// Compare-and-append a guest under the write lock.
    ///
    /// Returns `None` when the composition is missing, `Some(true)` when
    /// the member was appended, `Some(false)` when they were already a
    /// guest (or are the owner; owners are never listed as guests).
    pub async fn add_guest_if_absent(&self, id: Uuid, member: Member) -> Option<bool> {
        let mut guard = self.inner.write().await;
        let record = guard.get_mut(&id)?;
        if record.owner.id == member.id || record.guests.iter().any(|g| g.id == member.id) {
            return Some(false);
        }
        record.guests.push(member);
        Some(true)
    }

    pub async fn guests(&self, id: Uuid) -> Option<Vec<Member>> {
        self.inner.read().await.get(&id).map(|record| record.guests.clone())
    }

    pub async fn set_title(&self, id: Uuid, title: String) -> bool {
        let mut guard = self.inner.write().await;
        match guard.get_mut(&id) {
            Some(record) => {
                record.title = title;
                true
            }
            None => false,
        }
    }

    pub async fn set_collaborative(&self, id: Uuid, collaborative: bool) -> bool {
        let mut guard = self.inner.write().await;
        match guard.get_mut(&id) {
            Some(record) => {
                record.collaborative = collaborative;
                true
            }
            None => false,
        }
    }

    pub async fn push_element(&self, id: Uuid, element: CompositionElement) -> bool {
        let mut guard = self.inner.write().await;
        match guard.get_mut(&id) {
            Some(record) => {
                record.elements.push(element);
                true
            }
            None => false,
        }
    }

    pub async fn set_element(&self, id: Uuid, element: CompositionElement) -> bool {
        let mut guard = self.inner.write().await;
        let Some(record) = guard.get_mut(&id) else {
            return false;
        };
        match record.elements.iter_mut().find(|e| e.id == element.id) {
            Some(existing) => {
                *existing = element;
                true
            }
            None => false,
        }
    }

    pub async fn set_element_position(&self, id: Uuid, element_id: Uuid, x: f64, y: f64) -> bool {
        let mut guard = self.inner.write().await;
        let Some(record) = guard.get_mut(&id) else {
            return false;
        };
        match record.elements.iter_mut().find(|e| e.id == element_id) {
            Some(element) => {
                element.x = x;
                element.y = y;
                true
            }
            None => false,
        }
    }

    pub async fn pull_element(&self, id: Uuid, element_id: Uuid) -> bool {
        let mut guard = self.inner.write().await;
        let Some(record) = guard.get_mut(&id) else {
            return false;
        };
        let before = record.elements.len();
        record.elements.retain(|e| e.id != element_id);
        record.elements.len() != before
    }

    pub async fn remove(&self, id: Uuid) -> Option<Composition> {
        self.inner.write().await.remove(&id).map(|record| record.to_composition())
    }
}
