//! Finds a company's LinkedIn page and reads it with a containerized agent.
//!
//! The search runs as a packaged agent: through `TASUKI_AGENT_REGISTRY_URL`
//! when set, otherwise locally against ValueSERP (`VALUESERP_API_KEY`). The
//! reader image comes from `LINKEDIN_READER_IMAGE` and receives
//! `OPENAI_MODEL` and `OPENAI_API_KEY`. Ctrl+C stops the running agent.
//!
//! ```text
//! cargo run --example linkedin_reader -- "Acme"
//! ```

use std::sync::Arc;
use tasuki::flows::linkedin::{
    linkedin_reader_workflow, LinkedInCompany, UrlSearchActivity, ValueSerpSearch,
    WebReaderActivity, COMPANY_KEY, PROFILE_KEY, SEARCH_AGENT,
};
use tasuki::prelude::*;
use tasuki::LocalAgentRegistry;
use tracing_subscriber::EnvFilter;

const READER_IMAGE: &str = "LINKEDIN_READER_IMAGE";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let company = std::env::args()
        .nth(1)
        .ok_or("usage: linkedin_reader <company name>")?;

    let config = Config::from_env()?;
    let mut runtime = AgentRuntime::from_config(&config);
    if config.agent_registry_url.is_none() {
        let search = ValueSerpSearch::from_env()?;
        runtime = runtime.with_registry(Arc::new(
            LocalAgentRegistry::new().with_agent(SEARCH_AGENT, Arc::new(search)),
        ));
    }

    let image = tasuki::config::require_env(READER_IMAGE)?;
    let workflow = linkedin_reader_workflow(
        UrlSearchActivity::new(&runtime, SEARCH_AGENT),
        WebReaderActivity::from_env(&runtime, image)?,
    )?;

    let cancel = CancellationSignal::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("Shutdown requested, stopping agents...");
            on_ctrl_c.cancel();
        }
    });

    let mut ctx = Context::with_cancellation(cancel);
    ctx.insert(COMPANY_KEY, company);

    match workflow.execute(&mut ctx).await {
        Ok(()) => {
            if let Some(profile) = ctx.get::<LinkedInCompany>(PROFILE_KEY) {
                println!("{:#?}", profile);
            }
        }
        Err(errors) => {
            for error in errors {
                eprintln!("Workflow failed: {}", error);
            }
        }
    }

    Ok(())
}
