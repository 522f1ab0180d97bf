//! # Media Stream Gateway
//!
//! Terminates the carrier's media-stream WebSocket (`/ws/media`). Each
//! connection is one call and one actor, which owns that call's
//! [`CallBridge`].
//!
//! ## Connection lifecycle:
//! 1. **connected**: logged, nothing else to do
//! 2. **start**: look up the workflow, build and register the bridge, connect
//!    the AI session, then start the 20ms pacing ticker and attach the
//!    session's event stream to this actor
//! 3. **media**: base64 µ-law → PCM16 16kHz → bridge
//! 4. **stop** / close / protocol error / heartbeat timeout: end the call and deregister
//!
//! ## Execution model:
//! Socket frames, AI session events, bridge timers and the pacing tick are all
//! delivered to this actor, so everything touching one bridge runs on a single
//! context and never concurrently. The bridge asks for timers and socket
//! actions through [`BridgeEffect`]s, which [`MediaStreamSocket::apply_effects`]
//! carries out after every event.

pub mod frames;

use crate::audio::transcoder;
use crate::bridge::{BridgeEffect, BridgeStatus, CallBridge, EndReason, TimerKind};
use crate::config::AppConfig;
use crate::registry::{CallEntry, CallHandle, GetCallStatus, HangUp};
use crate::session::{SessionError, SessionEvent, SessionEvents, SessionHandle};
use crate::state::AppState;
use crate::workflow::WorkflowStep;
use frames::{parse_frame, InboundFrame, OutboundFrame, StartPayload};

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// WebSocket actor for one carrier media stream.
pub struct MediaStreamSocket {
    /// Unique id for this connection (registry key)
    connection_id: String,

    state: AppState,

    /// Configuration snapshot taken when the connection opened
    config: AppConfig,

    /// Present once the `start` frame has been accepted
    bridge: Option<CallBridge>,

    /// A `start` frame is being processed
    starting: bool,

    /// Whether this call holds a slot in the call registry
    registered: bool,

    timers: HashMap<TimerKind, SpawnHandle>,
    pacing: Option<SpawnHandle>,

    /// Last time anything arrived from the carrier
    last_heartbeat: Instant,
}

impl MediaStreamSocket {
    pub fn new(state: AppState) -> Self {
        let config = state.get_config();
        Self {
            connection_id: Uuid::new_v4().to_string(),
            state,
            config,
            bridge: None,
            starting: false,
            registered: false,
            timers: HashMap::new(),
            pacing: None,
            last_heartbeat: Instant::now(),
        }
    }

    fn handle_frame(&mut self, frame: InboundFrame, ctx: &mut ws::WebsocketContext<Self>) {
        match frame {
            InboundFrame::Connected { protocol, version } => {
                debug!(
                    connection_id = %self.connection_id,
                    ?protocol,
                    ?version,
                    "Carrier connected"
                );
            }
            InboundFrame::Start { stream_sid, start } => self.handle_start(stream_sid, start, ctx),
            InboundFrame::Media { media } => self.handle_media(&media.payload, ctx),
            InboundFrame::Stop { stream_sid } => {
                info!(connection_id = %self.connection_id, ?stream_sid, "Carrier sent stop");
                self.end_call(EndReason::StopFrame, ctx);
                ctx.stop();
            }
            InboundFrame::Other => {
                debug!(connection_id = %self.connection_id, "Ignoring unsupported media stream event");
            }
        }
    }

    /// First phase of call setup: resolve the workflow.
    fn handle_start(&mut self, stream_sid: String, start: StartPayload, ctx: &mut ws::WebsocketContext<Self>) {
        if self.starting || self.bridge.is_some() {
            warn!(connection_id = %self.connection_id, "Duplicate start frame ignored");
            return;
        }
        self.starting = true;

        let selector = start.workflow_selector(&self.config.workflows.default_selector);
        let call_sid = start.call_sid;
        info!(
            connection_id = %self.connection_id,
            call_sid = %call_sid,
            stream_sid = %stream_sid,
            workflow = %selector,
            "Media stream started"
        );

        let provider = self.state.workflows.clone();
        let lookup = async move {
            let result = provider.get_steps(&selector).await;
            result.map_err(|err| (selector, err))
        };

        ctx.spawn(lookup.into_actor(self).map(move |result, act, ctx| {
            let steps = match result {
                Ok(steps) => steps,
                Err((selector, err)) => {
                    warn!(call_sid = %call_sid, workflow = %selector, "Workflow lookup failed, using fallback prompts: {}", err);
                    Vec::new()
                }
            };
            act.begin_call(call_sid, stream_sid, steps, ctx);
        }));
    }

    /// Second phase: build and register the bridge, then connect the AI session.
    fn begin_call(
        &mut self,
        call_sid: String,
        stream_sid: String,
        steps: Vec<WorkflowStep>,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        let mut bridge = CallBridge::new(call_sid.clone(), stream_sid.clone(), steps, self.config.bridge.clone());

        let addr = ctx.address();
        let entry = CallEntry {
            connection_id: self.connection_id.clone(),
            call_sid: call_sid.clone(),
            stream_sid,
            started_at: Utc::now(),
            handle: CallHandle {
                status: addr.clone().recipient(),
                hang_up: addr.recipient(),
            },
        };

        if let Err(err) = self.state.calls.register(entry, self.config.gateway.max_concurrent_calls) {
            error!(call_sid = %call_sid, "Rejecting call: {}", err);
            self.state.record_call_rejected();
            bridge.end_call(EndReason::CapacityExceeded);
            self.bridge = Some(bridge);
            self.apply_effects(ctx);
            return;
        }
        self.registered = true;
        self.state.record_call_started();

        let system_prompt = bridge.system_prompt(&self.config.session.system_prompt);
        self.bridge = Some(bridge);

        let connector = self.state.connector.clone();
        let connect = async move { connector.connect(&call_sid, &system_prompt).await };
        ctx.spawn(connect.into_actor(self).map(|result, act, ctx| {
            act.attach_session(result, ctx);
        }));
    }

    /// Final phase: hand the session to the bridge and start pacing.
    fn attach_session(
        &mut self,
        result: Result<(SessionHandle, SessionEvents), SessionError>,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        let (started, events) = match result {
            Ok((handle, events)) => (Ok(handle), Some(events)),
            Err(err) => (Err(err), None),
        };

        let Some(bridge) = self.bridge.as_mut() else {
            if let Ok(handle) = started {
                handle.end_session();
            }
            return;
        };

        if bridge.start_call(started).is_ok() {
            if let Some(events) = events {
                ctx.add_stream(UnboundedReceiverStream::new(events));
            }
            let interval = bridge.pacing_interval();
            self.pacing = Some(ctx.run_interval(interval, |act, ctx| act.pace(ctx)));
        }

        self.apply_effects(ctx);
    }

    fn handle_media(&mut self, payload: &str, ctx: &mut ws::WebsocketContext<Self>) {
        let Some(bridge) = self.bridge.as_mut() else {
            // Media can race ahead of call setup; there is nobody to hear it yet
            return;
        };

        match BASE64.decode(payload.as_bytes()) {
            Ok(mulaw) => {
                let pcm = transcoder::convert_up(&mulaw);
                bridge.handle_inbound_audio(&pcm);
            }
            Err(err) => {
                warn!(call_sid = %bridge.call_sid(), "Dropping undecodable media payload: {}", err);
                self.state.record_malformed_frame();
            }
        }

        self.apply_effects(ctx);
    }

    /// Pacing tick: at most one outbound media frame.
    fn pace(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        let Some(bridge) = self.bridge.as_mut() else {
            return;
        };

        if let Some(mulaw) = bridge.on_pacing_tick() {
            let frame = OutboundFrame::media(bridge.stream_sid(), BASE64.encode(mulaw));
            Self::send_frame(ctx, &frame);
        }

        self.apply_effects(ctx);
    }

    fn end_call(&mut self, reason: EndReason, ctx: &mut ws::WebsocketContext<Self>) {
        if let Some(bridge) = self.bridge.as_mut() {
            bridge.end_call(reason);
            self.apply_effects(ctx);
        }
    }

    /// Carry out everything the bridge asked for since the last event.
    fn apply_effects(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        let Some(bridge) = self.bridge.as_mut() else {
            return;
        };
        let effects = bridge.take_effects();
        let stream_sid = bridge.stream_sid().to_string();

        for effect in effects {
            match effect {
                BridgeEffect::ArmTimer { kind, generation, after } => {
                    self.arm_timer(kind, generation, after, ctx);
                }
                BridgeEffect::CancelTimer(kind) => {
                    if let Some(handle) = self.timers.remove(&kind) {
                        ctx.cancel_future(handle);
                    }
                }
                BridgeEffect::ClearLine => {
                    Self::send_frame(ctx, &OutboundFrame::clear(&stream_sid));
                }
                BridgeEffect::Ended(reason) => self.finish(reason, ctx),
            }
        }
    }

    fn arm_timer(&mut self, kind: TimerKind, generation: u64, after: Duration, ctx: &mut ws::WebsocketContext<Self>) {
        if let Some(previous) = self.timers.remove(&kind) {
            ctx.cancel_future(previous);
        }

        let handle = ctx.run_later(after, move |act, ctx| {
            act.timers.remove(&kind);
            if let Some(bridge) = act.bridge.as_mut() {
                bridge.on_timer(kind, generation);
            }
            act.apply_effects(ctx);
        });
        self.timers.insert(kind, handle);
    }

    /// The bridge reached Ended: stop scheduling, deregister and close the socket.
    fn finish(&mut self, reason: EndReason, ctx: &mut ws::WebsocketContext<Self>) {
        if let Some(pacing) = self.pacing.take() {
            ctx.cancel_future(pacing);
        }
        for (_, handle) in self.timers.drain() {
            ctx.cancel_future(handle);
        }
        self.deregister(&reason);

        let code = if reason.is_failure() {
            ws::CloseCode::Error
        } else {
            ws::CloseCode::Normal
        };
        ctx.close(Some(ws::CloseReason {
            code,
            description: Some(reason.to_string()),
        }));
        ctx.stop();
    }

    fn deregister(&mut self, reason: &EndReason) {
        if !self.registered {
            return;
        }
        self.registered = false;
        self.state.calls.remove(&self.connection_id);

        let counters = self.bridge.as_ref().map(|bridge| bridge.counters()).unwrap_or_default();
        self.state.record_call_finished(reason, &counters);
    }

    fn send_frame(ctx: &mut ws::WebsocketContext<Self>, frame: &OutboundFrame<'_>) {
        match serde_json::to_string(frame) {
            Ok(json) => ctx.text(json),
            Err(err) => error!("Failed to serialize outbound frame: {}", err),
        }
    }
}

impl Actor for MediaStreamSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(connection_id = %self.connection_id, "Media stream connection opened");

        let interval = Duration::from_secs(self.config.gateway.keepalive_interval_secs);
        let timeout = Duration::from_secs(self.config.gateway.client_timeout_secs);
        ctx.run_interval(interval, move |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > timeout {
                warn!(connection_id = %act.connection_id, "Media stream heartbeat timeout, closing connection");
                act.end_call(EndReason::HeartbeatTimeout, ctx);
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if let Some(bridge) = self.bridge.as_mut() {
            bridge.end_call(EndReason::SocketClosed);
            bridge.take_effects();
        }

        let reason = self
            .bridge
            .as_ref()
            .and_then(|bridge| bridge.end_reason().cloned())
            .unwrap_or(EndReason::SocketClosed);
        self.deregister(&reason);

        info!(connection_id = %self.connection_id, %reason, "Media stream connection closed");
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for MediaStreamSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        self.last_heartbeat = Instant::now();

        match msg {
            Ok(ws::Message::Text(text)) => match parse_frame(&text) {
                Ok(frame) => self.handle_frame(frame, ctx),
                Err(err) => {
                    warn!(connection_id = %self.connection_id, "Dropping malformed media stream frame: {}", err);
                    self.state.record_malformed_frame();
                }
            },
            Ok(ws::Message::Binary(data)) => {
                warn!(connection_id = %self.connection_id, bytes = data.len(), "Unexpected binary frame ignored");
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {}
            Ok(ws::Message::Close(reason)) => {
                info!(connection_id = %self.connection_id, "Media stream closed by carrier: {:?}", reason);
                self.end_call(EndReason::SocketClosed, ctx);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(connection_id = %self.connection_id, "Unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(connection_id = %self.connection_id, "Media stream protocol error: {}", err);
                self.end_call(EndReason::SocketError(err.to_string()), ctx);
                ctx.stop();
            }
        }
    }
}

/// Events from the AI session, attached with `add_stream` once it connects.
impl StreamHandler<SessionEvent> for MediaStreamSocket {
    fn handle(&mut self, event: SessionEvent, ctx: &mut Self::Context) {
        if let Some(bridge) = self.bridge.as_mut() {
            bridge.on_session_event(event);
        }
        self.apply_effects(ctx);
    }

    /// The session's event channel closed. Unlike the default this must not
    /// stop the actor directly; the bridge decides.
    fn finished(&mut self, ctx: &mut Self::Context) {
        if let Some(bridge) = self.bridge.as_mut() {
            bridge.on_session_event(SessionEvent::Closed);
        }
        self.apply_effects(ctx);
    }
}

impl Handler<GetCallStatus> for MediaStreamSocket {
    type Result = Option<BridgeStatus>;

    fn handle(&mut self, _: GetCallStatus, _: &mut Self::Context) -> Self::Result {
        self.bridge.as_ref().map(|bridge| bridge.status())
    }
}

impl Handler<HangUp> for MediaStreamSocket {
    type Result = bool;

    fn handle(&mut self, _: HangUp, ctx: &mut Self::Context) -> Self::Result {
        let ended = match self.bridge.as_mut() {
            Some(bridge) => bridge.end_call(EndReason::Operator),
            None => false,
        };
        self.apply_effects(ctx);
        ctx.stop();
        ended
    }
}

/// WebSocket endpoint handler.
///
/// Upgrades the carrier's HTTP request and hands the connection to a new
/// [`MediaStreamSocket`] actor.
pub async fn media_stream(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!("New media stream connection request from: {:?}", req.connection_info().peer_addr());

    let socket = MediaStreamSocket::new(app_state.get_ref().clone());
    ws::start(socket, &req, stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::CallState;
    use crate::session::SessionCommand;
    use crate::state::test_support::{test_state, ChannelConnector, FakeSession};
    use crate::workflow::{WorkflowCatalog, WorkflowStep};
    use actix_web::body::MessageBody;
    use actix_web::error::PayloadError;
    use actix_web::web::Bytes;
    use actix_web::{http::StatusCode, test, App};
    use serde_json::{json, Value};
    use std::future::poll_fn;
    use std::pin::Pin;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    const WAIT: Duration = Duration::from_secs(2);

    /// Masked client text frame. The all-zero key leaves the payload unchanged.
    fn client_text(text: &str) -> Bytes {
        let payload = text.as_bytes();
        let mut frame = vec![0x81];
        if payload.len() < 126 {
            frame.push(0x80 | payload.len() as u8);
        } else {
            frame.push(0x80 | 126);
            frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        }
        frame.extend_from_slice(&[0, 0, 0, 0]);
        frame.extend_from_slice(payload);
        Bytes::from(frame)
    }

    /// Frames written by the server, read back from the upgrade response body.
    struct ServerFrames {
        chunks: mpsc::UnboundedReceiver<Bytes>,
        buffer: Vec<u8>,
    }

    impl ServerFrames {
        fn parse(&mut self) -> Option<(u8, Vec<u8>)> {
            if self.buffer.len() < 2 {
                return None;
            }
            let opcode = self.buffer[0] & 0x0F;
            let (len, header) = match self.buffer[1] & 0x7F {
                126 => {
                    if self.buffer.len() < 4 {
                        return None;
                    }
                    (u16::from_be_bytes([self.buffer[2], self.buffer[3]]) as usize, 4)
                }
                127 => {
                    if self.buffer.len() < 10 {
                        return None;
                    }
                    let mut raw = [0u8; 8];
                    raw.copy_from_slice(&self.buffer[2..10]);
                    (u64::from_be_bytes(raw) as usize, 10)
                }
                len => (len as usize, 2),
            };
            if self.buffer.len() < header + len {
                return None;
            }

            let payload = self.buffer[header..header + len].to_vec();
            self.buffer.drain(..header + len);
            Some((opcode, payload))
        }

        /// Next (opcode, payload), or None once the connection is gone.
        async fn next(&mut self) -> Option<(u8, Vec<u8>)> {
            loop {
                if let Some(frame) = self.parse() {
                    return Some(frame);
                }
                let chunk = tokio::time::timeout(WAIT, self.chunks.recv()).await.ok()??;
                self.buffer.extend_from_slice(&chunk);
            }
        }

        async fn next_json(&mut self) -> Value {
            loop {
                let (opcode, payload) = self.next().await.expect("connection closed early");
                if opcode == 0x1 {
                    return serde_json::from_slice(&payload).expect("text frames carry JSON");
                }
            }
        }
    }

    struct Connection {
        client: mpsc::UnboundedSender<Result<Bytes, PayloadError>>,
        server: ServerFrames,
    }

    impl Connection {
        fn send(&self, frame: Value) {
            self.send_text(&frame.to_string());
        }

        fn send_text(&self, text: &str) {
            self.client.send(Ok(client_text(text))).expect("socket open");
        }
    }

    fn upgrade_request() -> test::TestRequest {
        test::TestRequest::get()
            .uri("/ws/media")
            .insert_header(("upgrade", "websocket"))
            .insert_header(("connection", "upgrade"))
            .insert_header(("sec-websocket-version", "13"))
            .insert_header(("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ=="))
    }

    /// Start a socket actor fed from a channel, with its output pumped into `ServerFrames`.
    fn open(state: &AppState) -> Connection {
        let req = upgrade_request().to_http_request();
        let (client, payload) = mpsc::unbounded_channel();
        let resp = ws::start(
            MediaStreamSocket::new(state.clone()),
            &req,
            UnboundedReceiverStream::new(payload),
        )
        .expect("handshake accepted");
        assert_eq!(resp.status(), StatusCode::SWITCHING_PROTOCOLS);

        let mut body = resp.into_body();
        let (chunk_tx, chunks) = mpsc::unbounded_channel();
        actix_web::rt::spawn(async move {
            while let Some(Ok(chunk)) = poll_fn(|cx| Pin::new(&mut body).poll_next(cx)).await {
                if chunk_tx.send(chunk).is_err() {
                    break;
                }
            }
        });

        Connection {
            client,
            server: ServerFrames {
                chunks,
                buffer: Vec::new(),
            },
        }
    }

    fn gateway_state() -> (AppState, mpsc::UnboundedReceiver<FakeSession>) {
        let mut catalog = WorkflowCatalog::new();
        catalog.insert("intake", vec![WorkflowStep::new(1, "Q1"), WorkflowStep::new(2, "Q2")]);
        let (connector, sessions) = ChannelConnector::new();
        let state = AppState::new(AppConfig::default(), Arc::new(catalog), Arc::new(connector));
        (state, sessions)
    }

    async fn next_command(session: &mut FakeSession) -> SessionCommand {
        tokio::time::timeout(WAIT, session.commands.recv())
            .await
            .expect("session command in time")
            .expect("session still open")
    }

    async fn wait_until_listening(handle: &CallHandle) {
        for _ in 0..100 {
            let status = handle.status.send(GetCallStatus).await.expect("call actor alive");
            if status.is_some_and(|status| status.state == CallState::Listening) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("call never started listening");
    }

    #[actix_web::test]
    async fn test_call_flows_through_gateway() {
        let (state, mut sessions) = gateway_state();
        let mut conn = open(&state);

        conn.send(json!({"event": "connected", "protocol": "Call", "version": "1.0.0"}));
        conn.send(json!({
            "event": "start",
            "streamSid": "MZ1",
            "start": {"callSid": "CA1", "customParameters": {"groupId": "intake"}}
        }));

        let mut session = tokio::time::timeout(WAIT, sessions.recv())
            .await
            .expect("session opened in time")
            .expect("connector alive");
        assert_eq!(session.call_sid, "CA1");
        assert!(session.system_prompt.contains("1. Q1"));
        match next_command(&mut session).await {
            SessionCommand::Text(greeting) => assert!(greeting.contains("Q1")),
            other => panic!("expected the greeting, got {:?}", other),
        }

        let entries = state.calls.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].call_sid, "CA1");
        assert_eq!(entries[0].stream_sid, "MZ1");

        // dropped, the connection stays up
        conn.send_text("not json");

        let speech: Vec<u8> = std::iter::repeat(1000i16.to_le_bytes()).take(320).flatten().collect();
        session.events.send(SessionEvent::Audio(speech)).expect("bridge attached");
        session.events.send(SessionEvent::TurnComplete).expect("bridge attached");

        let frame = conn.server.next_json().await;
        assert_eq!(frame["event"], "media");
        assert_eq!(frame["streamSid"], "MZ1");
        assert_eq!(frame["track"], "outbound");
        let payload = BASE64
            .decode(frame["media"]["payload"].as_str().expect("payload is a string"))
            .expect("payload is base64");
        assert_eq!(payload, vec![0xCE; 160]);

        wait_until_listening(&entries[0].handle).await;

        let caller = BASE64.encode([0xCEu8; 160]);
        conn.send(json!({
            "event": "media",
            "streamSid": "MZ1",
            "media": {"track": "inbound", "chunk": "1", "payload": caller}
        }));
        loop {
            if let SessionCommand::Audio(pcm) = next_command(&mut session).await {
                assert_eq!(pcm.len(), 640);
                break;
            }
        }

        conn.send(json!({"event": "stop", "streamSid": "MZ1"}));
        loop {
            match conn.server.next().await {
                Some((0x8, _)) | None => break,
                Some(_) => {}
            }
        }
        loop {
            if next_command(&mut session).await == SessionCommand::End {
                break;
            }
        }

        assert!(state.calls.is_empty());
        let calls = state.get_metrics_snapshot().calls;
        assert_eq!(calls.started, 1);
        assert_eq!(calls.completed, 1);
        assert_eq!(calls.failed, 0);
        assert_eq!(calls.malformed_frames, 1);
    }

    #[actix_web::test]
    async fn test_unknown_workflow_falls_back_to_generic_greeting() {
        let (state, mut sessions) = gateway_state();
        let conn = open(&state);

        conn.send(json!({
            "event": "start",
            "streamSid": "MZ2",
            "start": {"callSid": "CA2", "customParameters": {"groupId": "missing"}}
        }));

        let mut session = tokio::time::timeout(WAIT, sessions.recv())
            .await
            .expect("session opened in time")
            .expect("connector alive");
        assert_eq!(
            next_command(&mut session).await,
            SessionCommand::Text(AppConfig::default().bridge.prompts.fallback_greeting)
        );
    }

    #[actix_web::test]
    async fn test_media_stream_upgrade() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(test_state()))
                .route("/ws/media", web::get().to(media_stream)),
        )
        .await;

        let req = upgrade_request().to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SWITCHING_PROTOCOLS);
    }

    #[actix_web::test]
    async fn test_plain_request_is_refused() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(test_state()))
                .route("/ws/media", web::get().to(media_stream)),
        )
        .await;

        let req = test::TestRequest::get().uri("/ws/media").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_client_error());
    }
}
