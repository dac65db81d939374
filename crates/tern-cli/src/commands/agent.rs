//! `tern agent`

use anyhow::bail;
use tern_client::{ClientConfig, HttpTransport};

pub async fn run(config: &ClientConfig) -> anyhow::Result<()> {
    let Some(token) = config.resolve_token() else {
        bail!("no relay token configured (set TERN_TOKEN or [client].token)");
    };
    let transport = HttpTransport::new(&config.relay_url);
    let agent = transport.agent_metadata(&token).await?;

    println!("{} ({})", agent.name, agent.model);
    if let Some(instructions) = agent.instructions.as_deref().filter(|i| !i.is_empty()) {
        println!("\n{}", instructions);
    }
    if !agent.starter_prompts.is_empty() {
        println!("\nTry asking:");
        for prompt in &agent.starter_prompts {
            println!("  - {}", prompt);
        }
    }
    Ok(())
}
