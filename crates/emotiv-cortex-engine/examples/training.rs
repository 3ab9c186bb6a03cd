//! Train one round of `neutral` plus `push`, driven from a polling host loop.
//!
//! Every succeeded sample is accepted. Rounds completed so far are printed
//! after each decision.
//!
//! ```bash
//! EMOTIV_CLIENT_ID=xxx EMOTIV_CLIENT_SECRET=yyy cargo run --example training -- <profile>
//! ```

use std::time::Duration;

use emotiv_cortex_engine::{
    ConnectionState, CortexConfig, CortexEngine, EngineEvent, TrainingStage,
};

const ACTIONS: [&str; 2] = ["neutral", "push"];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let profile = std::env::args().nth(1).ok_or("usage: training <profile>")?;

    let engine = CortexEngine::new(CortexConfig::discover(None)?)?;
    let mut pump = engine.event_pump();
    engine.start()?;

    let mut headset = None;
    let mut pending = ACTIONS.iter();
    let mut ticker = tokio::time::interval(Duration::from_millis(50));

    loop {
        ticker.tick().await;
        for event in pump.poll() {
            match event {
                EngineEvent::ConnectionStateChanged(state) => {
                    println!("Connection: {state}");
                    if state == ConnectionState::EmotivAppNotFound {
                        println!("Is the EMOTIV Launcher running?");
                    }
                }
                EngineEvent::HeadsetsChanged(list) if headset.is_none() => {
                    let Some(first) = list.into_iter().next() else {
                        continue;
                    };
                    engine.profiles().load(&first.id, &profile).await?;
                    engine.start_session(&first.id).await?;
                    println!("Session open on {}. Think 'neutral' after the cue.", first.id);
                    headset = Some(first.id);
                }
                EngineEvent::StreamStarted(id) => {
                    if let Some(action) = pending.next() {
                        println!("Cue: {action}");
                        engine.training().start(&id, action).await?;
                    }
                }
                EngineEvent::Training(event) => match event.stage {
                    TrainingStage::Succeeded => {
                        engine
                            .training()
                            .accept(&event.headset_id, &event.action)
                            .await?;
                    }
                    TrainingStage::Failed => {
                        println!("Sample of '{}' failed, retrying", event.action);
                        engine
                            .training()
                            .start(&event.headset_id, &event.action)
                            .await?;
                    }
                    TrainingStage::Completed => {
                        println!("Rounds trained: {}", event.rounds_trained);
                        match pending.next() {
                            Some(action) => {
                                println!("Cue: {action}");
                                engine.training().start(&event.headset_id, action).await?;
                            }
                            None => {
                                engine.profiles().save(&event.headset_id, &profile).await?;
                                engine.close_session_by_headset(&event.headset_id).await?;
                                engine.stop().await;
                                return Ok(());
                            }
                        }
                    }
                    _ => {}
                },
                EngineEvent::Error(error) => println!("Error in {}: {}", error.method, error.message),
                _ => {}
            }
        }
    }
}
