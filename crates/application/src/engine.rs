//! Capture, live session, and playback plumbing shared by both modes.
//!
//! Every inbound server event goes through [`AudioEngine::handle_transport`]
//! and every captured frame through [`AudioEngine::handle_frame`]; the
//! controllers layer their mode-specific state on top of the outcomes.

use std::sync::Arc;

use talkmee_audio::Microphone;
use talkmee_bus::{AudioBusConfig, AudioBusReceiver, AudioBusSender, AudioFrame};
use talkmee_events::{
    emit_event, event_names, EventBusRef, NullEventBus, PlaybackEvent, SessionErrorEvent,
    SessionMode, SessionStateEvent, TranscriptEvent, TurnEvent,
};
use talkmee_live::{
    InboundEvent, LiveConfig, LiveConnector, LiveSession, SessionState, TransportEvent,
};
use talkmee_playback::{AudioOutput, PlayableBuffer, PlaybackScheduler};
use talkmee_transcript::TranscriptAccumulator;
use talkmee_vad::{SilenceDetector, VadEvent, VadSettings};

use crate::clock::{Clock, SystemClock};
use crate::error::{Result, SessionError};
use crate::settings::SessionSettings;

/// Something the host loop woke up for.
#[derive(Debug)]
pub enum EngineInput {
    Frame(AudioFrame),
    Transport(TransportEvent),
}

/// How a live session ended on the remote side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    Closed,
    Failed(String),
}

pub struct AudioEngine<M, O> {
    mode: SessionMode,
    microphone: M,
    frame_tx: AudioBusSender,
    frames: AudioBusReceiver,
    connector: Arc<dyn LiveConnector>,
    session: LiveSession,
    playback: PlaybackScheduler<O>,
    vad: SilenceDetector,
    transcript: TranscriptAccumulator,
    commit_turns: bool,
    clock: Arc<dyn Clock>,
    events: EventBusRef,
    playing: bool,
}

impl<M: Microphone, O: AudioOutput> AudioEngine<M, O> {
    pub fn new(mode: SessionMode, microphone: M, output: O, connector: Arc<dyn LiveConnector>) -> Self {
        let (frame_tx, frames) = talkmee_bus::channel(AudioBusConfig::default());
        Self {
            mode,
            microphone,
            frame_tx,
            frames,
            connector,
            session: LiveSession::new(),
            playback: PlaybackScheduler::new(output),
            vad: SilenceDetector::new(VadSettings::default()),
            transcript: TranscriptAccumulator::new(),
            commit_turns: mode == SessionMode::Conversation,
            clock: Arc::new(SystemClock),
            events: Arc::new(NullEventBus),
            playing: false,
        }
    }

    /// Engine with the VAD and frame-bus settings applied.
    pub fn from_settings(
        mode: SessionMode,
        microphone: M,
        output: O,
        connector: Arc<dyn LiveConnector>,
        settings: &SessionSettings,
    ) -> Self {
        Self::new(mode, microphone, output, connector)
            .with_vad_settings(settings.vad)
            .with_bus_config(settings.frame_bus.clone())
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_events(mut self, events: EventBusRef) -> Self {
        self.events = events;
        self
    }

    pub fn with_vad_settings(mut self, settings: VadSettings) -> Self {
        self.vad.set_settings(settings);
        self
    }

    pub fn with_bus_config(mut self, config: AudioBusConfig) -> Self {
        let (frame_tx, frames) = talkmee_bus::channel(config);
        self.frame_tx = frame_tx;
        self.frames = frames;
        self
    }

    /// Whether `TurnComplete` flushes the transcript into the log. A drill
    /// keeps accumulating the learner's words across model turns instead.
    pub fn with_turn_commits(mut self, commit: bool) -> Self {
        self.commit_turns = commit;
        self
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn microphone(&self) -> &M {
        &self.microphone
    }

    pub fn is_capturing(&self) -> bool {
        self.microphone.is_active()
    }

    pub fn session(&self) -> &LiveSession {
        &self.session
    }

    pub fn session_state(&self) -> &SessionState {
        self.session.state()
    }

    pub fn playback(&self) -> &PlaybackScheduler<O> {
        &self.playback
    }

    pub fn playback_mut(&mut self) -> &mut PlaybackScheduler<O> {
        &mut self.playback
    }

    pub fn vad(&self) -> &SilenceDetector {
        &self.vad
    }

    pub fn transcript(&self) -> &TranscriptAccumulator {
        &self.transcript
    }

    pub fn transcript_mut(&mut self) -> &mut TranscriptAccumulator {
        &mut self.transcript
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn events(&self) -> &EventBusRef {
        &self.events
    }

    /// Acquire the microphone, then connect. Both are released again if
    /// either step fails.
    #[tracing::instrument(level = "debug", skip(self, config), fields(mode = ?self.mode, model = %config.model))]
    pub async fn open(&mut self, config: &LiveConfig) -> Result<()> {
        if self.session.is_open() && self.microphone.is_active() {
            return Ok(());
        }
        self.frames.drain();
        // A fresh handle per recording; the old one closes on drop.
        self.session = LiveSession::new();
        // Turns never span connections.
        let stale = self.transcript.pending_user().len() + self.transcript.pending_model().len();
        if stale > 0 {
            tracing::debug!(stale_bytes = stale, "Dropping transcript left from previous connection");
            self.transcript.discard_pending();
        }

        if let Err(e) = self.microphone.start(self.frame_tx.clone()) {
            let err = SessionError::from(e);
            self.report_error(&err);
            return Err(err);
        }
        self.emit_state();

        if let Err(e) = self.session.connect(self.connector.as_ref(), config).await {
            self.microphone.stop();
            self.frames.drain();
            let err = SessionError::Connection(e.to_string());
            self.report_error(&err);
            return Err(err);
        }

        tracing::info!(session_id = %self.session.id(), "Streaming microphone to live session");
        self.emit_state();
        Ok(())
    }

    /// Stop capture and close the session. Playback keeps draining.
    pub fn close(&mut self) {
        self.microphone.stop();
        self.vad.disarm();
        self.session.close();
        let stale = self.frames.drain();
        if stale > 0 {
            tracing::debug!(stale, "Discarded frames captured after stop");
        }
        self.emit_state();
    }

    /// Close everything, including audio still playing.
    pub fn shutdown(&mut self) {
        self.close();
        self.stop_playback();
    }

    pub fn arm_vad(&mut self) {
        let now = self.clock.now();
        self.vad.arm(now);
    }

    /// Wait for the next frame or transport event.
    pub async fn next_input(&mut self) -> EngineInput {
        loop {
            tokio::select! {
                frame = self.frames.recv() => {
                    if let Some(frame) = frame {
                        return EngineInput::Frame(frame);
                    }
                }
                event = self.session.recv() => return EngineInput::Transport(event),
            }
        }
    }

    /// Next queued input without waiting. Frames come before server events.
    pub fn try_next_input(&mut self) -> Option<EngineInput> {
        if let Some(frame) = self.frames.try_recv() {
            return Some(EngineInput::Frame(frame));
        }
        self.session.try_recv().map(EngineInput::Transport)
    }

    /// Feed one captured frame to the detector and the session.
    pub fn handle_frame(&mut self, frame: &AudioFrame) -> Option<VadEvent> {
        if !self.microphone.is_active() {
            tracing::trace!(seq = frame.seq, "Dropping frame captured after stop");
            return None;
        }
        let now = self.clock.now();
        let vad_event = self.vad.observe_energy(frame.energy_rms, now);

        let encoded = talkmee_codec::encode(&frame.samples, frame.sample_rate);
        self.session.send(&encoded);
        vad_event
    }

    /// Apply one transport event. Returns how the session ended, if it did.
    pub fn handle_transport(&mut self, event: TransportEvent) -> Option<SessionEnd> {
        let was_open = self.session.is_open();
        for inbound in self.session.handle(event) {
            self.dispatch(inbound);
        }
        if !was_open || self.session.is_open() {
            return None;
        }

        self.microphone.stop();
        self.vad.disarm();
        self.frames.drain();
        let end = match self.session.state() {
            SessionState::Error(reason) => SessionEnd::Failed(reason.clone()),
            _ => SessionEnd::Closed,
        };
        match &end {
            SessionEnd::Failed(reason) => {
                tracing::warn!(%reason, "Live session ended with an error");
                self.report_error(&SessionError::Connection(reason.clone()));
            }
            SessionEnd::Closed => {
                tracing::info!("Live session closed by server");
                self.emit_state();
            }
        }
        Some(end)
    }

    fn dispatch(&mut self, event: InboundEvent) {
        tracing::trace!(kind = event.kind(), "Inbound event");
        match event {
            InboundEvent::InputTranscriptDelta(text) => {
                self.transcript.push_input(&text);
                self.emit_transcript();
            }
            InboundEvent::OutputTranscriptDelta(text) => {
                self.transcript.push_output(&text);
                self.emit_transcript();
            }
            InboundEvent::AudioChunk {
                samples,
                sample_rate,
            } => {
                let buffer = match PlayableBuffer::from_pcm16(&samples, sample_rate, 1) {
                    Ok(buffer) => buffer,
                    Err(e) => {
                        tracing::warn!(error = %e, "Skipping undecodable audio chunk");
                        return;
                    }
                };
                if self.playback.schedule(buffer).is_some() {
                    // The coach talking counts as activity for the silence timer.
                    let now = self.clock.now();
                    self.vad.observe_playback(now);
                    self.set_playing(true);
                }
            }
            InboundEvent::Interrupted => {
                tracing::debug!("Model interrupted, flushing playback");
                self.stop_playback();
            }
            InboundEvent::TurnComplete => {
                if !self.commit_turns {
                    return;
                }
                if let Some((user, model)) = self.transcript.commit_turn() {
                    for turn in [user, model] {
                        emit_event(
                            self.events.as_ref(),
                            event_names::SESSION_TURN,
                            &TurnEvent {
                                role: turn.role,
                                text: turn.text,
                            },
                        );
                    }
                    self.emit_transcript();
                }
            }
        }
    }

    /// Halt every buffer and restart the output timeline at now.
    pub fn stop_playback(&mut self) {
        self.playback.stop_all();
        self.set_playing(false);
    }

    /// Retire finished buffers and check the silence timer.
    ///
    /// Fails when capture ended on its own while the session was open; the
    /// session is closed and the error already reported by then.
    pub fn poll(&mut self) -> Result<Option<VadEvent>> {
        self.playback.poll_completions();
        let playing = self.playback.is_playing();
        self.set_playing(playing);

        if self.session.is_open() && !self.microphone.is_active() {
            return Err(self.microphone_lost());
        }

        let now = self.clock.now();
        Ok(self.vad.poll(now, playing))
    }

    fn microphone_lost(&mut self) -> SessionError {
        tracing::warn!(session_id = %self.session.id(), "Microphone stopped delivering audio");
        self.microphone.stop();
        self.vad.disarm();
        self.session.close();
        self.frames.drain();
        let err = SessionError::Microphone("input stream ended".to_string());
        self.report_error(&err);
        err
    }

    fn set_playing(&mut self, playing: bool) {
        if self.playing == playing {
            return;
        }
        self.playing = playing;
        emit_event(
            self.events.as_ref(),
            event_names::SESSION_PLAYBACK,
            &PlaybackEvent { playing },
        );
    }

    pub fn emit_state(&self) {
        let state = self.session.state();
        emit_event(
            self.events.as_ref(),
            event_names::SESSION_STATE,
            &SessionStateEvent {
                mode: self.mode,
                state: state.label().to_string(),
                reason: state.error_reason().map(str::to_string),
                active: self.microphone.is_active(),
            },
        );
    }

    fn emit_transcript(&self) {
        emit_event(
            self.events.as_ref(),
            event_names::SESSION_TRANSCRIPT,
            &TranscriptEvent {
                user: self.transcript.pending_user().to_string(),
                model: self.transcript.pending_model().to_string(),
            },
        );
    }

    /// Publish an error for the learner along with the resulting state.
    pub fn report_error(&self, err: &SessionError) {
        tracing::warn!(error = %err, "Session error");
        emit_event(
            self.events.as_ref(),
            event_names::SESSION_ERROR,
            &SessionErrorEvent {
                message: err.user_message(),
            },
        );
        self.emit_state();
    }
}
