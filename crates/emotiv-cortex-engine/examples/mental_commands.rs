//! Stream mental commands from the first headset (requires a trained profile).
//!
//! ```bash
//! EMOTIV_CLIENT_ID=xxx EMOTIV_CLIENT_SECRET=yyy cargo run --example mental_commands
//! ```

use futures_util::StreamExt;

use emotiv_cortex_engine::{ConnectionState, CortexConfig, CortexEngine, MentalCommand};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let engine = CortexEngine::new(CortexConfig::discover(None)?)?;
    let mut states = engine.events().subscribe_connection_state();
    let mut headsets = engine.events().subscribe_headsets();
    engine.start()?;

    while let Some(state) = states.recv().await {
        if state == ConnectionState::Authorized {
            break;
        }
    }

    let headset = loop {
        let list = headsets.recv().await.ok_or("engine stopped")?;
        if let Some(first) = list.into_iter().next() {
            break first;
        }
    };
    println!("Using headset: {} ({})", headset.id, headset.model);

    let profiles = engine.profiles().query().await?;
    let Some(profile) = profiles.first() else {
        println!("No profiles found. Create one in the EMOTIV app first.");
        engine.stop().await;
        return Ok(());
    };
    println!("Loading profile: {}", profile.name);
    engine.profiles().load(&headset.id, &profile.name).await?;

    let start = engine.start_session(&headset.id).await?;
    for failure in &start.failures {
        println!("  (subscribe warning: {failure})");
    }
    let mut commands = engine.subscribe::<MentalCommand>(&headset.id)?;

    println!("Streaming mental commands. Press Ctrl+C to stop.\n");
    loop {
        tokio::select! {
            command = commands.next() => {
                let Some(command) = command else { break };
                if command.power > 0.0 {
                    println!("Action: {:<15} Power: {:.3}", command.action, command.power);
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    engine.close_session(&start.session_id).await?;
    engine.stop().await;
    Ok(())
}
