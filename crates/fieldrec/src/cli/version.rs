//! Version commands: create, edit, revise, inspect.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use fieldrec_ids::EntityId;
use fieldrec_workflow::EntityKind;
use serde_json::Value;
use std::path::PathBuf;

use super::context::{runtime, AppContext, GlobalArgs};
use super::entity::parse_kind;
use super::output::print_json;

/// Payload source: inline JSON or a file.
#[derive(Args, Debug, Clone)]
#[group(multiple = false)]
pub struct PayloadArgs {
    /// Payload as a JSON string
    #[arg(long)]
    payload: Option<String>,
    /// Read the payload from a JSON file
    #[arg(long)]
    payload_file: Option<PathBuf>,
}

impl PayloadArgs {
    fn read(&self) -> Result<Option<Value>> {
        if let Some(raw) = &self.payload {
            let value = serde_json::from_str(raw).context("--payload is not valid JSON")?;
            return Ok(Some(value));
        }
        if let Some(path) = &self.payload_file {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let value = serde_json::from_str(&raw)
                .with_context(|| format!("{} is not valid JSON", path.display()))?;
            return Ok(Some(value));
        }
        Ok(None)
    }

    fn require(&self) -> Result<Value> {
        self.read()?
            .context("a payload is required (--payload or --payload-file)")
    }
}

/// Subcommands for version management
#[derive(Subcommand, Debug, Clone)]
pub enum VersionAction {
    /// Create a new draft version
    Create {
        entity_id: EntityId,
        /// Defaults to the registered kind
        #[arg(long, value_parser = parse_kind)]
        kind: Option<EntityKind>,
        #[command(flatten)]
        payload: PayloadArgs,
    },
    /// Replace the payload of a draft
    Update {
        entity_id: EntityId,
        version_no: u32,
        #[command(flatten)]
        payload: PayloadArgs,
    },
    /// Start a new draft from a returned or rejected version
    Revise {
        entity_id: EntityId,
        /// Version the revision is based on
        from_version: u32,
        #[command(flatten)]
        payload: PayloadArgs,
    },
    /// Show one version
    Show { entity_id: EntityId, version_no: u32 },
    /// List all versions, newest first
    List { entity_id: EntityId },
    /// Show the highest-numbered version
    Latest { entity_id: EntityId },
}

pub fn run(action: VersionAction, globals: &GlobalArgs) -> Result<()> {
    runtime()?.block_on(async {
        let ctx = AppContext::open(globals).await?;
        let result = run_async(action, &ctx).await;
        ctx.close().await;
        result
    })
}

async fn run_async(action: VersionAction, ctx: &AppContext) -> Result<()> {
    let service = &ctx.service;
    match action {
        VersionAction::Create {
            entity_id,
            kind,
            payload,
        } => {
            let payload = payload.require()?;
            let kind = match kind {
                Some(kind) => kind,
                None => service.find_entity(&entity_id).await?.entity_kind,
            };
            let record = service
                .create_version(&ctx.credential, &entity_id, kind, payload)
                .await?;
            print_json(&record)
        }
        VersionAction::Update {
            entity_id,
            version_no,
            payload,
        } => {
            let payload = payload.require()?;
            let record = service
                .update_draft(&ctx.credential, &entity_id, version_no, payload)
                .await?;
            print_json(&record)
        }
        VersionAction::Revise {
            entity_id,
            from_version,
            payload,
        } => {
            let payload = payload.read()?;
            let record = service
                .create_revision(&ctx.credential, &entity_id, from_version, payload)
                .await?;
            print_json(&record)
        }
        VersionAction::Show {
            entity_id,
            version_no,
        } => print_json(&service.get_version(&entity_id, version_no).await?),
        VersionAction::List { entity_id } => {
            print_json(&service.list_versions(&entity_id).await?)
        }
        VersionAction::Latest { entity_id } => {
            print_json(&service.latest_version(&entity_id).await?)
        }
    }
}
