// In-memory member directory.
//
// Registration and deletion are outside this core; the directory exists so
// login can resolve credentials and so events can carry author identities.

use std::{collections::HashMap, sync::Arc};

use anyhow::bail;
use ensemble_common::types::Member;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::auth::password;

#[derive(Clone)]
struct MemberRecord {
    member: Member,
    password_hash: String,
}

#[derive(Default)]
struct DirectoryInner {
    members: HashMap<Uuid, MemberRecord>,
    by_email: HashMap<String, Uuid>,
}

#[derive(Clone, Default)]
pub struct MemberDirectory {
    inner: Arc<RwLock<DirectoryInner>>,
}

impl MemberDirectory {
    pub async fn insert(&self, member: Member, password: &str) -> anyhow::Result<()> {
        let password_hash = password::hash_password(password)?;
        let mut guard = self.inner.write().await;
        if guard.by_email.contains_key(&member.email) {
            bail!("a member with email {} already exists", member.email);
        }
        guard.by_email.insert(member.email.clone(), member.id);
        guard.members.insert(member.id, MemberRecord { member, password_hash });
        Ok(())
    }

    pub async fn find(&self, id: Uuid) -> Option<Member> {
        self.inner.read().await.members.get(&id).map(|record| record.member.clone())
    }

    pub async fn find_by_email(&self, email: &str) -> Option<Member> {
        let guard = self.inner.read().await;
        let id = guard.by_email.get(email)?;
        guard.members.get(id).map(|record| record.member.clone())
    }

    /// Verify credentials. Unknown emails and wrong passwords are the same
    /// `None` to the caller.
    pub async fn authenticate(&self, email: &str, password: &str) -> Option<Member> {
        let record = {
            let guard = self.inner.read().await;
            let id = guard.by_email.get(email)?;
            guard.members.get(id)?.clone()
        };
        if password::verify_password(password, &record.password_hash) {
            Some(record.member)
        } else {
            None
        }
    }
}
