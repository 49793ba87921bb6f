use std::time::Duration;

use async_trait::async_trait;
use talkmee_audio::Microphone;
use talkmee_playback::AudioOutput;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::conversation::ConversationController;
use crate::drill::DrillController;
use crate::engine::EngineInput;
use crate::error::Result;

/// User actions delivered to the host loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start or stop, depending on the current state.
    Toggle,
    Stop,
    Next,
    Custom(String),
    /// Generate vocabulary for a category.
    Generate(String),
    /// Generate practice sentences for a topic.
    GenerateSentences(String),
    Quit,
}

/// A controller the host loop can drive.
#[async_trait]
pub trait SessionDriver: Send {
    async fn next_input(&mut self) -> EngineInput;

    async fn handle_input(&mut self, input: EngineInput);

    async fn tick(&mut self);

    async fn command(&mut self, command: Command) -> Result<()>;

    fn shutdown(&mut self);
}

#[async_trait]
impl<M: Microphone, O: AudioOutput> SessionDriver for ConversationController<M, O> {
    async fn next_input(&mut self) -> EngineInput {
        self.engine_mut().next_input().await
    }

    async fn handle_input(&mut self, input: EngineInput) {
        ConversationController::handle_input(self, input);
    }

    async fn tick(&mut self) {
        ConversationController::tick(self);
    }

    async fn command(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Toggle => self.toggle().await,
            Command::Stop => {
                self.stop();
                Ok(())
            }
            other => {
                tracing::debug!(command = ?other, "Not available in conversation mode");
                Ok(())
            }
        }
    }

    fn shutdown(&mut self) {
        ConversationController::shutdown(self);
    }
}

#[async_trait]
impl<M: Microphone, O: AudioOutput> SessionDriver for DrillController<M, O> {
    async fn next_input(&mut self) -> EngineInput {
        self.engine_mut().next_input().await
    }

    async fn handle_input(&mut self, input: EngineInput) {
        DrillController::handle_input(self, input).await;
    }

    async fn tick(&mut self) {
        DrillController::tick(self).await;
    }

    async fn command(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Toggle => self.toggle().await,
            Command::Stop => self.stop_and_analyze().await.map(|_| ()),
            Command::Next => self.next_random(),
            Command::Custom(text) => self.submit_custom(&text).map(|_| ()),
            Command::Generate(category) => self.generate_vocabulary(&category).await.map(|_| ()),
            Command::GenerateSentences(topic) => self.generate_sentences(&topic).await.map(|_| ()),
            Command::Quit => Ok(()),
        }
    }

    fn shutdown(&mut self) {
        DrillController::shutdown(self);
    }
}

/// Single-task event loop around one controller.
///
/// Captured frames, server events, timer ticks and user commands are all
/// handled on this one task, one at a time, in arrival order per source.
pub struct SessionHost<D> {
    driver: D,
    commands: mpsc::Receiver<Command>,
    tick_interval: Duration,
}

impl<D: SessionDriver> SessionHost<D> {
    /// Returns the host and the sender for its commands.
    pub fn new(driver: D, tick_interval: Duration) -> (Self, mpsc::Sender<Command>) {
        let (tx, rx) = mpsc::channel(32);
        let host = Self {
            driver,
            commands: rx,
            tick_interval,
        };
        (host, tx)
    }

    /// Run until `Quit` or until every command sender is dropped. Returns
    /// the driver after shutting it down.
    pub async fn run(mut self) -> D {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(tick_ms = self.tick_interval.as_millis() as u64, "Session host running");

        loop {
            tokio::select! {
                input = self.driver.next_input() => self.driver.handle_input(input).await,
                _ = ticker.tick() => self.driver.tick().await,
                command = self.commands.recv() => match command {
                    None | Some(Command::Quit) => break,
                    Some(command) => {
                        tracing::debug!(?command, "Command");
                        if let Err(e) = self.driver.command(command).await {
                            tracing::warn!(error = %e, "Command failed");
                        }
                    }
                },
            }
        }

        self.driver.shutdown();
        tracing::info!("Session host stopped");
        self.driver
    }
}
