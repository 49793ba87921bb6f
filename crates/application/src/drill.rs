//! Pronunciation drill: one target at a time, auto-stop on silence,
//! scoring, and auto-advance to the next target.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::seq::IteratorRandom;
use rand::SeedableRng;
use talkmee_audio::Microphone;
use talkmee_bus::AudioFrame;
use talkmee_coach::{Accent, ContentGenerator, Evaluation, FeedbackLanguage, PronunciationEvaluator};
use talkmee_events::{
    emit_event, event_names, CountdownEvent, DrillResultEvent, DrillState, DrillStateEvent,
    PracticeKind, TargetChangedEvent,
};
use talkmee_live::{LiveConfig, TransportEvent};
use talkmee_playback::AudioOutput;
use talkmee_vad::VadEvent;

use crate::engine::{AudioEngine, EngineInput, SessionEnd};
use crate::error::{Result, SessionError};
use crate::settings::SessionSettings;

/// Live session instruction for one target.
fn coach_instruction(target: &str, language: FeedbackLanguage) -> String {
    format!(
        "STRICT RULE: Transcribe ONLY English. Ignore other languages.\n\
         Target: \"{target}\".\n\
         Coach Mode: Give brief feedback in {}.",
        language.name()
    )
}

/// Whole seconds left, rounded up.
fn seconds_remaining(remaining: Duration) -> u64 {
    remaining.as_millis().div_ceil(1000) as u64
}

#[derive(Debug, Clone, Copy)]
struct Countdown {
    deadline: Instant,
    announced: u64,
}

pub struct DrillController<M, O> {
    engine: AudioEngine<M, O>,
    evaluator: Arc<dyn PronunciationEvaluator>,
    generator: Arc<dyn ContentGenerator>,
    settings: SessionSettings,
    state: DrillState,
    kind: PracticeKind,
    accent: Accent,
    language: FeedbackLanguage,
    target: String,
    spoken: String,
    result: Option<Evaluation>,
    countdown: Option<Countdown>,
    rng: StdRng,
}

impl<M: Microphone, O: AudioOutput> DrillController<M, O> {
    pub fn new(
        engine: AudioEngine<M, O>,
        evaluator: Arc<dyn PronunciationEvaluator>,
        generator: Arc<dyn ContentGenerator>,
        settings: SessionSettings,
    ) -> Self {
        let mut drill = Self {
            engine: engine.with_turn_commits(false),
            evaluator,
            generator,
            kind: settings.practice_kind,
            accent: settings.accent,
            language: settings.feedback_language,
            settings,
            state: DrillState::Idle,
            target: String::new(),
            spoken: String::new(),
            result: None,
            countdown: None,
            rng: StdRng::from_entropy(),
        };
        drill.pick_target();
        drill
    }

    /// Deterministic target selection.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self.pick_target();
        self
    }

    pub fn state(&self) -> DrillState {
        self.state
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn kind(&self) -> PracticeKind {
        self.kind
    }

    pub fn accent(&self) -> Accent {
        self.accent
    }

    pub fn feedback_language(&self) -> FeedbackLanguage {
        self.language
    }

    pub fn result(&self) -> Option<&Evaluation> {
        self.result.as_ref()
    }

    /// What the learner said, live while recording and frozen once analyzed.
    pub fn spoken(&self) -> &str {
        match self.state {
            DrillState::Recording => self.engine.transcript().pending_user(),
            _ => &self.spoken,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.state == DrillState::Recording && self.engine.is_capturing()
    }

    /// Seconds until auto-advance, if a countdown is running.
    pub fn countdown_remaining(&self) -> Option<u64> {
        self.countdown.map(|c| c.announced)
    }

    pub fn engine(&self) -> &AudioEngine<M, O> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut AudioEngine<M, O> {
        &mut self.engine
    }

    pub fn live_config(&self) -> LiveConfig {
        LiveConfig {
            model: self.settings.live_model.clone(),
            ..LiveConfig::default()
        }
        .with_voice(self.accent.voice())
        .with_system_instruction(coach_instruction(&self.target, self.language))
        .with_transcription(true, false)
    }

    pub fn set_accent(&mut self, accent: Accent) {
        self.accent = accent;
    }

    pub fn set_feedback_language(&mut self, language: FeedbackLanguage) {
        self.language = language;
    }

    fn ensure_idle(&self) -> Result<()> {
        match self.state {
            DrillState::Recording => Err(SessionError::Busy("recording")),
            DrillState::Analyzing => Err(SessionError::Busy("analysis")),
            _ => Ok(()),
        }
    }

    /// Switch between sentences and single words. Picks a new target.
    pub fn set_practice_kind(&mut self, kind: PracticeKind) -> Result<()> {
        self.ensure_idle()?;
        if self.kind == kind {
            return Ok(());
        }
        self.kind = kind;
        self.pick_target();
        Ok(())
    }

    /// Begin capture and streaming for the current target.
    pub async fn start_recording(&mut self) -> Result<()> {
        self.ensure_idle()?;
        self.reset_attempt();

        let config = self.live_config();
        if let Err(e) = self.engine.open(&config).await {
            self.set_state(DrillState::Idle);
            return Err(e);
        }

        self.engine.arm_vad();
        self.set_state(DrillState::Recording);
        tracing::info!(target = %self.target, accent = ?self.accent, "Recording attempt");
        Ok(())
    }

    /// Stop capture, score the attempt, and show the result.
    pub async fn stop_and_analyze(&mut self) -> Result<Evaluation> {
        if self.state != DrillState::Recording {
            return Err(SessionError::NotRecording);
        }
        self.engine.close();
        self.engine.stop_playback();
        self.set_state(DrillState::Analyzing);

        self.spoken = self.engine.transcript().pending_user().trim().to_string();
        tracing::debug!(spoken = %self.spoken, "Evaluating attempt");
        let evaluation = self
            .evaluator
            .evaluate(&self.target, &self.spoken, self.accent, self.language)
            .await;
        tracing::info!(score = evaluation.score, "Attempt evaluated");

        emit_event(
            self.engine.events().as_ref(),
            event_names::DRILL_RESULT,
            &DrillResultEvent {
                target: self.target.clone(),
                spoken: self.spoken.clone(),
                score: evaluation.score,
                feedback: evaluation.feedback.clone(),
                highlighted: evaluation.highlighted.clone(),
            },
        );
        self.result = Some(evaluation.clone());
        self.set_state(DrillState::ShowingResult);
        if self.settings.auto_advance {
            self.start_countdown();
        }
        Ok(evaluation)
    }

    /// Record when idle, analyze when recording.
    pub async fn toggle(&mut self) -> Result<()> {
        match self.state {
            DrillState::Recording => self.stop_and_analyze().await.map(|_| ()),
            _ => self.start_recording().await,
        }
    }

    /// Move to another random target from the pool.
    pub fn next_random(&mut self) -> Result<()> {
        self.ensure_idle()?;
        self.pick_target();
        Ok(())
    }

    /// Practice text typed by the learner. Blank input changes nothing.
    pub fn submit_custom(&mut self, text: &str) -> Result<bool> {
        self.ensure_idle()?;
        let text = text.trim();
        if text.is_empty() {
            return Ok(false);
        }
        self.set_target(text.to_string());
        Ok(true)
    }

    /// Ask the generator for words in `category` and practice the first one.
    /// Returns false when nothing was generated.
    pub async fn generate_vocabulary(&mut self, category: &str) -> Result<bool> {
        self.ensure_idle()?;
        let items = self.generator.vocabulary(category).await;
        let Some(first) = items.into_iter().next() else {
            tracing::info!(category, "No vocabulary generated");
            return Ok(false);
        };
        self.kind = PracticeKind::Vocabulary;
        self.set_target(first.word);
        Ok(true)
    }

    /// Ask the generator for sentences about `topic` and practice the first
    /// one. Returns false when nothing was generated.
    pub async fn generate_sentences(&mut self, topic: &str) -> Result<bool> {
        self.ensure_idle()?;
        let sentences = self.generator.sentences(topic).await;
        let Some(first) = sentences.into_iter().find(|s| !s.english.trim().is_empty()) else {
            tracing::info!(topic, "No sentences generated");
            return Ok(false);
        };
        self.kind = PracticeKind::Sentence;
        self.set_target(first.english.trim().to_string());
        Ok(true)
    }

    pub async fn handle_frame(&mut self, frame: &AudioFrame) {
        if self.state != DrillState::Recording {
            return;
        }
        if let Some(VadEvent::SpeechStarted) = self.engine.handle_frame(frame) {
            tracing::debug!("Learner started speaking");
        }
    }

    pub async fn handle_transport(&mut self, event: TransportEvent) {
        let Some(end) = self.engine.handle_transport(event) else {
            return;
        };
        if self.state != DrillState::Recording {
            return;
        }
        match end {
            // The server hung up mid-attempt: score what was heard.
            SessionEnd::Closed => {
                if let Err(e) = self.stop_and_analyze().await {
                    tracing::warn!(error = %e, "Could not analyze after close");
                }
            }
            SessionEnd::Failed(_) => self.set_state(DrillState::Idle),
        }
    }

    pub async fn handle_input(&mut self, input: EngineInput) {
        match input {
            EngineInput::Frame(frame) => self.handle_frame(&frame).await,
            EngineInput::Transport(event) => self.handle_transport(event).await,
        }
    }

    /// Timer tick: silence detection while recording, countdown afterwards.
    pub async fn tick(&mut self) {
        let vad_event = match self.engine.poll() {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "Recording lost its microphone");
                if self.state == DrillState::Recording {
                    self.set_state(DrillState::Idle);
                }
                return;
            }
        };
        if self.state == DrillState::Recording && vad_event == Some(VadEvent::EndOfUtterance) {
            tracing::info!("Silence after speech, stopping");
            if let Err(e) = self.stop_and_analyze().await {
                tracing::warn!(error = %e, "Auto-stop failed");
            }
            return;
        }

        let Some(countdown) = self.countdown else {
            return;
        };
        let now = self.engine.clock().now();
        let remaining = countdown.deadline.saturating_duration_since(now);
        let seconds = seconds_remaining(remaining);
        if seconds != countdown.announced {
            self.announce_countdown(seconds);
        }
        if remaining.is_zero() {
            tracing::debug!("Auto-advancing to next target");
            self.pick_target();
        }
    }

    /// Process everything already queued, then tick once.
    pub async fn pump(&mut self) {
        while let Some(input) = self.engine.try_next_input() {
            self.handle_input(input).await;
        }
        self.tick().await;
    }

    pub fn shutdown(&mut self) {
        self.countdown = None;
        self.engine.shutdown();
        if self.state == DrillState::Recording {
            self.set_state(DrillState::Idle);
        }
    }

    fn start_countdown(&mut self) {
        let delay = self.settings.auto_advance_delay();
        self.countdown = Some(Countdown {
            deadline: self.engine.clock().now() + delay,
            announced: seconds_remaining(delay),
        });
        self.set_state(DrillState::AutoAdvanceCountdown);
        self.announce_countdown(seconds_remaining(delay));
    }

    fn announce_countdown(&mut self, seconds: u64) {
        if let Some(countdown) = self.countdown.as_mut() {
            countdown.announced = seconds;
        }
        emit_event(
            self.engine.events().as_ref(),
            event_names::DRILL_COUNTDOWN,
            &CountdownEvent {
                seconds_remaining: seconds,
            },
        );
    }

    /// Forget the previous attempt's result and transcript.
    fn reset_attempt(&mut self) {
        self.countdown = None;
        self.result = None;
        self.spoken.clear();
        self.engine.transcript_mut().discard_pending();
    }

    fn pick_target(&mut self) {
        let current = self.target.as_str();
        let pool = self.settings.pool(self.kind);
        let candidates = pool.iter().filter(|item| pool.len() <= 1 || item.as_str() != current);
        let Some(next) = candidates.choose(&mut self.rng).cloned() else {
            tracing::warn!(kind = ?self.kind, "Practice pool is empty");
            return;
        };
        self.set_target(next);
    }

    fn set_target(&mut self, target: String) {
        self.reset_attempt();
        self.target = target;
        tracing::debug!(target = %self.target, kind = ?self.kind, "Target changed");
        emit_event(
            self.engine.events().as_ref(),
            event_names::DRILL_TARGET,
            &TargetChangedEvent {
                target: self.target.clone(),
                kind: self.kind,
            },
        );
        self.set_state(DrillState::Idle);
    }

    fn set_state(&mut self, state: DrillState) {
        if self.state != state {
            tracing::debug!(from = ?self.state, to = ?state, "Drill state");
        }
        self.state = state;
        emit_event(
            self.engine.events().as_ref(),
            event_names::DRILL_STATE,
            &DrillStateEvent {
                state,
                is_recording: state == DrillState::Recording && self.engine.is_capturing(),
            },
        );
    }
}
