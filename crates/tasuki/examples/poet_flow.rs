//! Composes a poem with Gemini, guided by the "How to Generate a Poem" instruction.
//!
//! Needs `TASUKI_INSTRUCTION_STORE_URL` and `GEMINI_API_KEY`; a `.env` file works.
//!
//! ```text
//! cargo run --example poet_flow -- "autumn, rain"
//! ```

use std::sync::Arc;
use tasuki::flows::poet::{
    poet_workflow, ComposerActivity, GeminiComposer, Poem, KEYWORDS_KEY, POEM_KEY,
};
use tasuki::prelude::*;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let keywords = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "autumn, rain".to_string());

    let config = Config::from_env()?;
    let runtime = AgentRuntime::from_config(&config)
        .with_handler("gemini", Arc::new(GeminiComposer::from_env()?));
    let workflow = poet_workflow(ComposerActivity::new(
        &runtime,
        "gemini",
        ExecutionMode::InProcess,
    ))?;

    let cancel = CancellationSignal::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let mut ctx = Context::with_cancellation(cancel);
    ctx.insert(KEYWORDS_KEY, keywords);

    match workflow.execute(&mut ctx).await {
        Ok(()) => {
            if let Some(poem) = ctx.get::<Poem>(POEM_KEY) {
                println!("{}", poem.text);
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
