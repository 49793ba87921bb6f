use talkmee_audio::Microphone;
use talkmee_bus::AudioFrame;
use talkmee_live::{LiveConfig, TransportEvent};
use talkmee_playback::AudioOutput;
use talkmee_transcript::Turn;

use crate::engine::{AudioEngine, EngineInput};
use crate::error::Result;
use crate::settings::SessionSettings;

/// Free conversation with the tutor.
///
/// The learner toggles the session on and off; every completed exchange is
/// appended to the transcript for as long as the controller lives.
pub struct ConversationController<M, O> {
    engine: AudioEngine<M, O>,
    config: LiveConfig,
}

impl<M: Microphone, O: AudioOutput> ConversationController<M, O> {
    pub fn new(engine: AudioEngine<M, O>, settings: &SessionSettings) -> Self {
        let config = LiveConfig {
            model: settings.live_model.clone(),
            ..LiveConfig::default()
        }
        .with_voice(settings.conversation_voice.as_str())
        .with_system_instruction(settings.tutor_instruction.as_str())
        .with_transcription(true, true);

        Self {
            engine: engine.with_turn_commits(true),
            config,
        }
    }

    pub fn config(&self) -> &LiveConfig {
        &self.config
    }

    pub fn engine(&self) -> &AudioEngine<M, O> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut AudioEngine<M, O> {
        &mut self.engine
    }

    /// Capturing and connected.
    pub fn is_active(&self) -> bool {
        self.engine.is_capturing() && self.engine.session().is_open()
    }

    pub fn turns(&self) -> &[Turn] {
        self.engine.transcript().turns()
    }

    pub async fn start(&mut self) -> Result<()> {
        if self.is_active() {
            return Ok(());
        }
        tracing::info!("Starting conversation");
        self.engine.open(&self.config).await
    }

    /// End the conversation. Audio already scheduled keeps playing.
    pub fn stop(&mut self) {
        if self.engine.is_capturing() || self.engine.session().is_open() {
            tracing::info!(turns = self.turns().len(), "Stopping conversation");
        }
        self.engine.close();
    }

    pub async fn toggle(&mut self) -> Result<()> {
        if self.is_active() {
            self.stop();
            Ok(())
        } else {
            self.start().await
        }
    }

    pub fn handle_frame(&mut self, frame: &AudioFrame) {
        self.engine.handle_frame(frame);
    }

    pub fn handle_transport(&mut self, event: TransportEvent) {
        self.engine.handle_transport(event);
    }

    pub fn handle_input(&mut self, input: EngineInput) {
        match input {
            EngineInput::Frame(frame) => self.handle_frame(&frame),
            EngineInput::Transport(event) => self.handle_transport(event),
        }
    }

    /// Retire finished playback. Conversations never auto-stop on silence,
    /// only when the microphone goes away.
    pub fn tick(&mut self) {
        if let Err(e) = self.engine.poll() {
            tracing::info!(error = %e, "Conversation ended");
        }
    }

    /// Process everything already queued, then tick once.
    pub fn pump(&mut self) {
        while let Some(input) = self.engine.try_next_input() {
            self.handle_input(input);
        }
        self.tick();
    }

    pub fn shutdown(&mut self) {
        self.engine.shutdown();
    }
}
