//! # Call Bridge
//!
//! Per-call conversation state machine that sits between the carrier media
//! stream and the AI session.
//!
//! ## Responsibilities:
//! - **Turn taking**: tracks whose turn it is (AI greeting, AI speaking, caller)
//! - **Barge-in**: a run of loud caller frames interrupts the AI and drops its queued audio
//! - **Workflow**: asks the configured questions in order, then closes the conversation
//! - **Timers**: no-input re-engagement, no-response nudge, end-of-speech, drain
//! - **Pacing**: hands out at most one outbound frame per tick
//!
//! ## Execution model:
//! The bridge is synchronous and owns no tasks or clocks. Every operation
//! mutates state and may queue [`BridgeEffect`]s; the owner drains them with
//! [`CallBridge::take_effects`] and carries them out (scheduling timers,
//! sending `clear` frames, closing the socket). Timer firings come back through
//! [`CallBridge::on_timer`] tagged with the generation they were armed with.

pub mod timers;
pub mod types;

pub use timers::{TimerKind, TimerTable};
pub use types::{BridgeCounters, BridgeEffect, BridgeError, BridgeStatus, CallState, EndReason};

use crate::audio::transcoder;
use crate::audio::vad::{FrameEnergy, LoudFrameCounter};
use crate::config::BridgeConfig;
use crate::session::{SessionError, SessionEvent, SessionHandle};
use crate::workflow::{WorkflowCursor, WorkflowStep};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub struct CallBridge {
    call_sid: String,
    stream_sid: String,
    state: CallState,
    settings: BridgeConfig,

    session: Option<SessionHandle>,
    session_started_at: Option<Instant>,

    cursor: WorkflowCursor,
    outgoing: VecDeque<Vec<u8>>,
    loud_frames: LoudFrameCounter,
    timers: TimerTable,

    /// Caller produced speech since the bridge last started listening
    heard_caller: bool,
    /// An instruction was sent and the AI has not produced audio for it yet
    awaiting_response: bool,
    /// Turn-complete arrived while audio was still queued
    awaiting_drain: bool,
    /// The closing instruction has gone out
    closing_sent: bool,
    /// Caller interrupted the AI; audio from that turn may still be in flight
    barge_in_pending: bool,

    end_reason: Option<EndReason>,
    effects: Vec<BridgeEffect>,
    counters: BridgeCounters,
}

impl CallBridge {
    pub fn new(
        call_sid: impl Into<String>,
        stream_sid: impl Into<String>,
        steps: Vec<WorkflowStep>,
        settings: BridgeConfig,
    ) -> Self {
        let loud_frames = LoudFrameCounter::new(settings.consecutive_loud_chunks_for_barge_in);
        Self {
            call_sid: call_sid.into(),
            stream_sid: stream_sid.into(),
            state: CallState::Created,
            settings,
            session: None,
            session_started_at: None,
            cursor: WorkflowCursor::new(steps),
            outgoing: VecDeque::new(),
            loud_frames,
            timers: TimerTable::new(),
            heard_caller: false,
            awaiting_response: false,
            awaiting_drain: false,
            closing_sent: false,
            barge_in_pending: false,
            end_reason: None,
            effects: Vec::new(),
            counters: BridgeCounters::default(),
        }
    }

    pub fn call_sid(&self) -> &str {
        &self.call_sid
    }

    pub fn stream_sid(&self) -> &str {
        &self.stream_sid
    }

    #[cfg(test)]
    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn end_reason(&self) -> Option<&EndReason> {
        self.end_reason.as_ref()
    }

    pub fn counters(&self) -> BridgeCounters {
        self.counters
    }

    #[cfg(test)]
    pub fn outgoing_len(&self) -> usize {
        self.outgoing.len()
    }

    #[cfg(test)]
    pub fn workflow_position(&self) -> usize {
        self.cursor.position()
    }

    pub fn pacing_interval(&self) -> Duration {
        self.settings.pacing_interval()
    }

    /// System instruction for the AI session: the base persona plus the
    /// ordered list of questions this call will ask.
    pub fn system_prompt(&self, base: &str) -> String {
        if self.cursor.is_empty() {
            return base.to_string();
        }

        let mut prompt = String::from(base);
        prompt.push_str("\n\nThe conversation covers these questions, in this order:");
        for (index, step) in self.cursor.steps().iter().enumerate() {
            prompt.push_str(&format!("\n{}. {}", index + 1, step.prompt_text));
        }
        prompt
    }

    /// Attach the outcome of connecting the AI session.
    ///
    /// On success the greeting (first workflow question, or the fallback
    /// greeting for an empty workflow) is sent and the bridge enters
    /// `AiGreeting`. On failure the call is ended.
    pub fn start_call(
        &mut self,
        started: Result<SessionHandle, SessionError>,
    ) -> Result<(), BridgeError> {
        let handle = match started {
            Ok(handle) => handle,
            Err(err) => {
                error!(call_sid = %self.call_sid, "AI session failed to start: {}", err);
                self.end_call(EndReason::SessionStartFailed(err.to_string()));
                return Err(BridgeError::SessionStart(err));
            }
        };

        if self.state != CallState::Created {
            // Call went away while the session was connecting
            warn!(call_sid = %self.call_sid, state = %self.state, "Discarding AI session for inactive call");
            handle.end_session();
            return Err(BridgeError::InvalidState(self.state));
        }

        info!(
            call_sid = %self.call_sid,
            session_id = %handle.session_id(),
            steps = self.cursor.len(),
            "AI session started"
        );
        self.session = Some(handle);
        self.session_started_at = Some(Instant::now());

        let greeting = match self.cursor.next_prompt() {
            Some(step) => self.settings.prompts.greeting(&step.prompt_text),
            None => {
                warn!(call_sid = %self.call_sid, "No workflow steps, using fallback greeting");
                self.settings.prompts.fallback_greeting.clone()
            }
        };

        self.transition(CallState::AiGreeting);
        self.instruct(greeting);
        Ok(())
    }

    /// Handle one inbound caller frame (16-bit PCM at 16kHz).
    pub fn handle_inbound_audio(&mut self, pcm: &[u8]) {
        self.counters.inbound_frames += 1;

        match self.state {
            CallState::Created | CallState::AiGreeting | CallState::Ended => {}
            CallState::AiSpeaking => {
                let energy = self.measure(pcm);
                if self.loud_frames.observe(energy.is_loud) {
                    self.barge_in(energy.rms);
                    self.process_caller_frame(pcm, energy);
                }
            }
            CallState::Listening => {
                let energy = self.measure(pcm);
                self.process_caller_frame(pcm, energy);
            }
        }
    }

    pub fn on_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Audio(pcm) => self.on_ai_audio(pcm),
            SessionEvent::Interrupted => {
                if self.barge_in_pending {
                    debug!(call_sid = %self.call_sid, "AI acknowledged the interruption");
                }
                self.barge_in_pending = false;
            }
            SessionEvent::TurnComplete => self.on_turn_complete(),
            SessionEvent::Error(message) => {
                error!(call_sid = %self.call_sid, "AI session error: {}", message);
                self.end_call(EndReason::SessionError(message));
            }
            SessionEvent::Closed => {
                self.end_call(EndReason::SessionClosed);
            }
        }
    }

    /// Pacing tick: drain and transcode everything queued into one frame.
    ///
    /// Returns `None` when nothing is queued or the queued bytes could not be
    /// transcoded, so silence never produces a frame.
    pub fn on_pacing_tick(&mut self) -> Option<Vec<u8>> {
        if self.state == CallState::Ended {
            return None;
        }

        let frame = if self.outgoing.is_empty() {
            None
        } else {
            let pcm: Vec<u8> = self.outgoing.drain(..).flatten().collect();
            let mulaw = transcoder::convert_down(&pcm);
            if mulaw.is_empty() {
                warn!(call_sid = %self.call_sid, bytes = pcm.len(), "Dropping untranscodable AI audio");
                None
            } else {
                self.counters.outbound_frames += 1;
                Some(mulaw)
            }
        };

        if self.awaiting_drain && self.outgoing.is_empty() {
            self.finish_ai_turn();
        }

        frame
    }

    /// A timer armed through [`BridgeEffect::ArmTimer`] elapsed.
    pub fn on_timer(&mut self, kind: TimerKind, generation: u64) {
        if self.state == CallState::Ended {
            return;
        }
        if !self.timers.fire(kind, generation) {
            debug!(call_sid = %self.call_sid, ?kind, generation, "Ignoring stale timer");
            return;
        }

        match kind {
            TimerKind::NoInput => {
                if self.state == CallState::Listening && !self.heard_caller {
                    info!(call_sid = %self.call_sid, "No caller input, re-engaging");
                    self.counters.reengagements += 1;
                    let text = self.settings.prompts.reengagement_text.clone();
                    self.send_text(text);
                    self.arm_timer(TimerKind::NoInput);
                }
            }
            TimerKind::NoResponse => {
                info!(call_sid = %self.call_sid, "AI has not responded, nudging");
                self.counters.nudges += 1;
                self.awaiting_response = false;
                let text = self.settings.prompts.no_response_nudge.clone();
                self.send_text(text);
                if self.state == CallState::Listening && !self.heard_caller {
                    self.arm_timer(TimerKind::NoInput);
                }
            }
            TimerKind::EndOfSpeech => {
                if self.state == CallState::Listening {
                    self.advance_workflow();
                }
            }
            TimerKind::Drain => {
                if self.state == CallState::AiSpeaking && self.awaiting_drain {
                    warn!(
                        call_sid = %self.call_sid,
                        queued = self.outgoing.len(),
                        "Outgoing audio did not drain in time, discarding"
                    );
                    self.outgoing.clear();
                    self.finish_ai_turn();
                }
            }
        }
    }

    /// End the call. Idempotent: only the first call has any effect.
    ///
    /// Cancels all timers, drops queued audio, ends the AI session exactly
    /// once and emits [`BridgeEffect::Ended`]. Returns false if the call had
    /// already ended.
    pub fn end_call(&mut self, reason: EndReason) -> bool {
        if self.state == CallState::Ended {
            debug!(call_sid = %self.call_sid, %reason, "Call already ended");
            return false;
        }

        self.transition(CallState::Ended);
        self.outgoing.clear();
        self.awaiting_drain = false;
        self.awaiting_response = false;
        self.barge_in_pending = false;

        if let Some(session) = self.session.take() {
            session.end_session();
        }

        if reason.is_failure() {
            warn!(call_sid = %self.call_sid, %reason, "Call ended");
        } else {
            info!(call_sid = %self.call_sid, %reason, "Call ended");
        }
        self.end_reason = Some(reason.clone());
        self.effects.push(BridgeEffect::Ended(reason));
        true
    }

    /// Drain the effects queued since the last call.
    pub fn take_effects(&mut self) -> Vec<BridgeEffect> {
        std::mem::take(&mut self.effects)
    }

    pub fn status(&self) -> BridgeStatus {
        let session_duration_ms = self
            .session_started_at
            .map(|started| started.elapsed().as_millis() as u64)
            .unwrap_or(0);

        BridgeStatus {
            call_sid: self.call_sid.clone(),
            stream_sid: self.stream_sid.clone(),
            state: self.state,
            session_active: self.session.is_some(),
            session_duration_ms,
            outgoing_buffer_chunk_count: self.outgoing.len(),
            workflow_position: self.cursor.position(),
            workflow_len: self.cursor.len(),
            counters: self.counters,
        }
    }

    fn measure(&self, pcm: &[u8]) -> FrameEnergy {
        FrameEnergy::measure(
            pcm,
            self.settings.speaking_threshold,
            self.settings.barge_in_energy_threshold,
        )
    }

    fn process_caller_frame(&mut self, pcm: &[u8], energy: FrameEnergy) {
        if let Some(session) = &self.session {
            if session.send_audio_chunk(pcm.to_vec()) {
                self.counters.forwarded_frames += 1;
            }
        }

        if !energy.is_speaking {
            return;
        }

        self.heard_caller = true;
        self.cancel_timer(TimerKind::NoInput);
        // Speech while the AI is still preparing its reply does not start a new answer
        if !self.awaiting_response {
            self.arm_timer(TimerKind::EndOfSpeech);
        }
    }

    fn on_ai_audio(&mut self, pcm: Vec<u8>) {
        if matches!(self.state, CallState::Created | CallState::Ended) {
            return;
        }
        if self.barge_in_pending {
            // Tail of the interrupted turn
            return;
        }
        if pcm.len() % 2 != 0 {
            warn!(call_sid = %self.call_sid, bytes = pcm.len(), "Dropping AI audio chunk with a partial sample");
            return;
        }

        self.counters.ai_chunks += 1;
        self.awaiting_response = false;
        self.cancel_timer(TimerKind::NoResponse);

        if matches!(self.state, CallState::AiGreeting | CallState::Listening) {
            self.transition(CallState::AiSpeaking);
        }
        if !pcm.is_empty() {
            self.outgoing.push_back(pcm);
        }
    }

    fn on_turn_complete(&mut self) {
        self.barge_in_pending = false;

        match self.state {
            CallState::AiSpeaking if self.outgoing.is_empty() => self.finish_ai_turn(),
            CallState::AiSpeaking => {
                if !self.awaiting_drain {
                    debug!(call_sid = %self.call_sid, queued = self.outgoing.len(), "Turn complete, draining");
                    self.awaiting_drain = true;
                    self.arm_timer(TimerKind::Drain);
                }
            }
            CallState::AiGreeting => self.finish_ai_turn(),
            _ => {}
        }
    }

    fn finish_ai_turn(&mut self) {
        self.awaiting_drain = false;
        self.cancel_timer(TimerKind::Drain);
        self.transition(CallState::Listening);

        if self.closing_sent && !self.awaiting_response {
            self.end_call(EndReason::ConversationComplete);
        }
    }

    fn barge_in(&mut self, rms: f64) {
        info!(
            call_sid = %self.call_sid,
            rms = rms as u64,
            dropped_chunks = self.outgoing.len(),
            "Caller barged in"
        );
        self.counters.barge_ins += 1;
        self.outgoing.clear();
        self.awaiting_drain = false;
        self.barge_in_pending = true;
        self.effects.push(BridgeEffect::ClearLine);
        self.transition(CallState::Listening);
    }

    fn advance_workflow(&mut self) {
        self.cancel_timer(TimerKind::NoInput);
        self.cursor.advance();

        let instruction = match self.cursor.next_prompt() {
            Some(step) => {
                debug!(call_sid = %self.call_sid, step_id = step.id, "Asking next workflow step");
                self.settings.prompts.next_step(&step.prompt_text)
            }
            None if self.closing_sent => {
                debug!(call_sid = %self.call_sid, "Workflow exhausted, closing already sent");
                return;
            }
            None => {
                info!(call_sid = %self.call_sid, "Workflow exhausted, closing conversation");
                self.closing_sent = true;
                self.settings.prompts.closing_instruction.clone()
            }
        };

        self.instruct(instruction);
    }

    /// Send an instruction that expects the AI to speak.
    fn instruct(&mut self, text: String) {
        self.counters.instructions += 1;
        self.awaiting_response = true;
        self.send_text(text);
        self.arm_timer(TimerKind::NoResponse);
    }

    fn send_text(&mut self, text: String) {
        if let Some(session) = &self.session {
            if !session.send_text(text) {
                warn!(call_sid = %self.call_sid, "AI session no longer accepting commands");
            }
        }
    }

    fn transition(&mut self, next: CallState) {
        let previous = self.state;
        if previous == next || previous == CallState::Ended {
            return;
        }

        match previous {
            CallState::Listening => {
                self.cancel_timer(TimerKind::NoInput);
                self.cancel_timer(TimerKind::EndOfSpeech);
            }
            CallState::AiSpeaking => {
                self.cancel_timer(TimerKind::Drain);
            }
            _ => {}
        }

        self.state = next;
        debug!(call_sid = %self.call_sid, from = %previous, to = %next, "Call state changed");

        match next {
            CallState::Listening => {
                self.heard_caller = false;
                self.loud_frames.reset();
                if !self.awaiting_response {
                    self.arm_timer(TimerKind::NoInput);
                }
            }
            CallState::AiSpeaking => {
                self.loud_frames.reset();
            }
            CallState::Ended => {
                for kind in TimerKind::ALL {
                    self.cancel_timer(kind);
                }
            }
            _ => {}
        }
    }

    fn arm_timer(&mut self, kind: TimerKind) {
        let after = match kind {
            TimerKind::NoInput => self.settings.no_input_timeout(),
            TimerKind::NoResponse => self.settings.no_response_timeout(),
            TimerKind::EndOfSpeech => self.settings.end_of_speech_timeout(),
            TimerKind::Drain => self.settings.drain_timeout(),
        };
        let generation = self.timers.arm(kind);
        self.effects.push(BridgeEffect::ArmTimer {
            kind,
            generation,
            after,
        });
    }

    fn cancel_timer(&mut self, kind: TimerKind) {
        if self.timers.cancel(kind) {
            self.effects.push(BridgeEffect::CancelTimer(kind));
        }
    }

    #[cfg(test)]
    fn pending_timer(&self, kind: TimerKind) -> Option<u64> {
        self.timers.pending(kind)
    }
}
