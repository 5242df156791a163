//! Entity commands.

use anyhow::Result;
use clap::Subcommand;
use fieldrec_ids::{EntityId, ProjectId};
use fieldrec_workflow::EntityKind;

use super::context::{runtime, AppContext, GlobalArgs};
use super::output::print_json;

/// Subcommands for entity management
#[derive(Subcommand, Debug, Clone)]
pub enum EntityAction {
    /// Register a new entity ID under a project
    Register {
        entity_id: EntityId,
        /// borehole_log or lab_test
        #[arg(long, value_parser = parse_kind)]
        kind: EntityKind,
        #[arg(long)]
        project: ProjectId,
    },
    /// Show an entity's registration
    Find { entity_id: EntityId },
}

pub fn parse_kind(raw: &str) -> Result<EntityKind, String> {
    EntityKind::parse(raw).ok_or_else(|| {
        let known: Vec<&str> = EntityKind::ALL.iter().map(|k| k.as_str()).collect();
        format!("unknown entity kind '{}' (expected one of: {})", raw, known.join(", "))
    })
}

pub fn run(action: EntityAction, globals: &GlobalArgs) -> Result<()> {
    runtime()?.block_on(async {
        let ctx = AppContext::open(globals).await?;
        let result = run_async(action, &ctx).await;
        ctx.close().await;
        result
    })
}

async fn run_async(action: EntityAction, ctx: &AppContext) -> Result<()> {
    match action {
        EntityAction::Register {
            entity_id,
            kind,
            project,
        } => {
            let registration = ctx
                .service
                .register_entity(&ctx.credential, entity_id, kind, project)
                .await?;
            print_json(&registration)
        }
        EntityAction::Find { entity_id } => {
            let registration = ctx.service.find_entity(&entity_id).await?;
            print_json(&registration)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kind() {
        assert_eq!(parse_kind("lab_test").unwrap(), EntityKind::LabTest);
        let err = parse_kind("core_photo").unwrap_err();
        assert!(err.contains("borehole_log"));
    }
}
