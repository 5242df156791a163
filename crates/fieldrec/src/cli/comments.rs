//! Comment commands.

use anyhow::Result;
use clap::Subcommand;
use fieldrec_ids::EntityId;
use fieldrec_workflow::CommentType;

use super::context::{runtime, AppContext, GlobalArgs};
use super::output::print_json;

#[derive(Subcommand, Debug, Clone)]
pub enum CommentsAction {
    /// Comments on one version, or the whole history grouped by version
    List {
        entity_id: EntityId,
        #[arg(long)]
        version: Option<u32>,
    },
    /// Add a review comment to a version
    Add {
        entity_id: EntityId,
        version_no: u32,
        /// submission, approval, rejection or correction_required
        #[arg(long = "type", value_parser = parse_comment_type)]
        comment_type: CommentType,
        #[arg(long)]
        text: String,
    },
}

fn parse_comment_type(raw: &str) -> Result<CommentType, String> {
    CommentType::parse(raw).ok_or_else(|| format!("unknown comment type '{}'", raw))
}

pub fn run(action: CommentsAction, globals: &GlobalArgs) -> Result<()> {
    runtime()?.block_on(async {
        let ctx = AppContext::open(globals).await?;
        let result = run_async(action, &ctx).await;
        ctx.close().await;
        result
    })
}

async fn run_async(action: CommentsAction, ctx: &AppContext) -> Result<()> {
    match action {
        CommentsAction::List {
            entity_id,
            version: Some(version_no),
        } => print_json(&ctx.service.list_comments(&entity_id, version_no).await?),
        CommentsAction::List {
            entity_id,
            version: None,
        } => print_json(&ctx.service.history(&entity_id).await?),
        CommentsAction::Add {
            entity_id,
            version_no,
            comment_type,
            text,
        } => {
            let comment = ctx
                .service
                .add_comment(&ctx.credential, &entity_id, version_no, comment_type, &text)
                .await?;
            print_json(&comment)
        }
    }
}
