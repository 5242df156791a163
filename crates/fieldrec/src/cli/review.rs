//! Review transitions: submit, approve, reject, return.

use anyhow::Result;
use fieldrec_ids::EntityId;
use fieldrec_workflow::TransitionOutcome;

use super::context::{runtime, AppContext, GlobalArgs};
use super::output::print_json;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewAction {
    Submit,
    Approve,
    Reject,
    Return,
}

#[derive(Debug, Clone)]
pub struct ReviewArgs {
    pub action: ReviewAction,
    pub entity_id: EntityId,
    pub version_no: u32,
    /// Note, comments or rejection reason, depending on the action.
    pub text: Option<String>,
}

pub fn run(args: ReviewArgs, globals: &GlobalArgs) -> Result<()> {
    runtime()?.block_on(async {
        let ctx = AppContext::open(globals).await?;
        let result = transition(&args, &ctx).await;
        ctx.close().await;
        print_json(&result?)
    })
}

async fn transition(args: &ReviewArgs, ctx: &AppContext) -> Result<TransitionOutcome> {
    let service = &ctx.service;
    let credential = &ctx.credential;
    let entity_id = &args.entity_id;
    let text = args.text.as_deref();
    let outcome = match args.action {
        ReviewAction::Submit => {
            service
                .submit(credential, entity_id, args.version_no, text)
                .await?
        }
        ReviewAction::Approve => {
            service
                .approve(credential, entity_id, args.version_no, text)
                .await?
        }
        ReviewAction::Reject => {
            service
                .reject(credential, entity_id, args.version_no, text)
                .await?
        }
        ReviewAction::Return => {
            service
                .return_for_revision(credential, entity_id, args.version_no, text)
                .await?
        }
    };
    Ok(outcome)
}
