//! Published record reads.

use anyhow::Result;
use clap::Subcommand;
use fieldrec_ids::EntityId;

use super::context::{runtime, AppContext, GlobalArgs};
use super::output::print_json;

#[derive(Subcommand, Debug, Clone)]
pub enum PublishedAction {
    /// The highest published version of an entity
    Latest { entity_id: EntityId },
    /// The published record of one version
    Show { entity_id: EntityId, version_no: u32 },
}

pub fn run(action: PublishedAction, globals: &GlobalArgs) -> Result<()> {
    runtime()?.block_on(async {
        let ctx = AppContext::open(globals).await?;
        let result = match action {
            PublishedAction::Latest { entity_id } => {
                ctx.service.get_latest_published(&entity_id).await
            }
            PublishedAction::Show {
                entity_id,
                version_no,
            } => ctx.service.get_published(&entity_id, version_no).await,
        };
        ctx.close().await;
        print_json(&result?)
    })
}
