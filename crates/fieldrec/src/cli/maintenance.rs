//! Reconcile and reindex.

use anyhow::{anyhow, Result};
use fieldrec_workflow::Role;
use tracing::info;

use super::context::{runtime, AppContext, GlobalArgs};
use super::output::print_json;

pub fn run_reconcile(globals: &GlobalArgs) -> Result<()> {
    runtime()?.block_on(async {
        let ctx = AppContext::open(globals).await?;
        let result = ctx.service.reconcile(&ctx.credential).await;
        ctx.close().await;
        let report = result?;
        info!(repaired = report.repaired.len(), "reconcile finished");
        print_json(&report)
    })
}

pub fn run_reindex(globals: &GlobalArgs) -> Result<()> {
    runtime()?.block_on(async {
        let ctx = AppContext::open(globals).await?;
        let result = reindex(&ctx).await;
        ctx.close().await;
        print_json(&result?)
    })
}

async fn reindex(ctx: &AppContext) -> Result<fieldrec_workflow::IndexRebuildReport> {
    ctx.service.authorize(&ctx.credential, Role::Admin).await?;
    let store = ctx
        .object_store()
        .ok_or_else(|| anyhow!("reindex only applies to the object store backend"))?;
    Ok(store.discovery().rebuild_index().await?)
}
