// Demo dataset for local development.
//
// Enabled with `ENSEMBLE_SERVER_SEED_DEMO_DATA=1`. Mirrors the fixture
// accounts the web integration harness logs in with.

use ensemble_common::types::Member;
use tracing::info;
use uuid::Uuid;

use super::{CompositionStore, MemberDirectory};

pub async fn seed_demo_data(
    members: &MemberDirectory,
    compositions: &CompositionStore,
) -> anyhow::Result<()> {
    let mem1 = Member {
        id: Uuid::new_v4(),
        email: "mem1@collamap.com".to_string(),
        firstname: "Member".to_string(),
        lastname: "One".to_string(),
    };
    let mem2 = Member {
        id: Uuid::new_v4(),
        email: "mem2@collamap.com".to_string(),
        firstname: "Member".to_string(),
        lastname: "Two".to_string(),
    };

    members.insert(mem1.clone(), "pwd-mem1").await?;
    members.insert(mem2.clone(), "pwd-mem2").await?;

    compositions.create(mem1.clone(), "Compo Member 1 - 1".to_string(), false).await;
    let shared = compositions.create(mem1.clone(), "Compo Member 1 - 2".to_string(), true).await;
    compositions.create(mem2.clone(), "Compo Member 2 - 1".to_string(), false).await;

    info!(
        demo_members = 2,
        shared_composition = %shared.id,
        "seeded demo dataset"
    );
    Ok(())
}
