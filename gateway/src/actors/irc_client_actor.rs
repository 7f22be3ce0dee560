// gateway/src/actors/irc_client_actor.rs
use std::io;

use actix::prelude::*;
use bytes::BytesMut;
use futures::SinkExt;
use tokio::io::WriteHalf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};

use common::{encoding, timestamp_millis};

use crate::error::UpstreamError;
use crate::irc::codec::{IrcLineCodec, LineCodecError};
use crate::irc::transport::{self, BoxedStream};
use crate::irc::{protocol, ConnectOptions, UpstreamTimeouts};

/// What happened on an upstream connection, tagged with the generation of the
/// client that produced it so the owner can drop events from replaced sockets
#[derive(Message, Debug, Clone, PartialEq, Eq)]
#[rtype(result = "()")]
pub struct IrcEvent {
    pub generation: u64,
    pub kind: IrcEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IrcEventKind {
    SocketConnected,
    /// Registration accepted (RPL_WELCOME seen)
    Connected,
    Close,
    Error(String),
    /// One line in either direction; `from_server` is false for lines we sent
    Raw { line: String, from_server: bool },
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Connect(pub ConnectOptions);

#[derive(Message)]
#[rtype(result = "()")]
pub struct SendLine(pub String);

/// Graceful close: QUIT, half-close, then close after the linger period
#[derive(Message)]
#[rtype(result = "()")]
pub struct Quit(pub String);

/// Immediate teardown without notifying the owner
#[derive(Message)]
#[rtype(result = "()")]
pub struct Destroy;

#[derive(Message)]
#[rtype(result = "()")]
pub struct SetEncoding(pub String);

#[derive(Message)]
#[rtype(result = "ConnectionState")]
pub struct GetState;

#[derive(Message)]
#[rtype(result = "()")]
struct WriterFailed(io::Error);

#[derive(Debug, Clone, Copy, PartialEq, Eq, MessageResponse)]
pub enum ConnectionState {
    Idle,
    Connecting,
    /// Socket is up and the handshake has been sent
    Registering,
    Registered,
    Closed,
}

enum WriterCommand {
    Line(Vec<u8>),
    Close,
}

type LineWriter = FramedWrite<WriteHalf<BoxedStream>, IrcLineCodec>;

/// Owns one upstream socket: connect, register, keepalive, line I/O
pub struct IrcClientActor {
    generation: u64,
    events: Recipient<IrcEvent>,
    timeouts: UpstreamTimeouts,
    state: ConnectionState,
    encoding: String,
    writer: Option<mpsc::UnboundedSender<WriterCommand>>,
    writer_task: Option<JoinHandle<()>>,
    connecting: Option<SpawnHandle>,
    reader: Option<SpawnHandle>,
    connect_timer: Option<SpawnHandle>,
    ping_timer: Option<SpawnHandle>,
    pong_timer: Option<SpawnHandle>,
    linger_timer: Option<SpawnHandle>,
}

impl IrcClientActor {
    pub fn new(generation: u64, events: Recipient<IrcEvent>, timeouts: UpstreamTimeouts) -> Self {
        Self {
            generation,
            events,
            timeouts,
            state: ConnectionState::Idle,
            encoding: "utf8".to_string(),
            writer: None,
            writer_task: None,
            connecting: None,
            reader: None,
            connect_timer: None,
            ping_timer: None,
            pong_timer: None,
            linger_timer: None,
        }
    }

    fn emit(&self, kind: IrcEventKind) {
        self.events.do_send(IrcEvent { generation: self.generation, kind });
    }

    fn connect(&mut self, options: ConnectOptions, ctx: &mut Context<Self>) {
        // A second connect replaces whatever socket exists
        self.release_socket(ctx);
        self.encoding = options.target.encoding.clone();
        self.state = ConnectionState::Connecting;

        tracing::info!("[gen {}] Connecting to {}", self.generation, options.target);

        let fut = transport::establish(options.target.clone(), options.block_private_hosts)
            .into_actor(self)
            .map(move |result, act, ctx| {
                act.connecting = None;
                match result {
                    Ok(stream) => act.on_socket_connected(stream, &options, ctx),
                    Err(e) => act.fail(e, ctx),
                }
            });
        self.connecting = Some(ctx.spawn(fut));

        self.connect_timer = Some(ctx.run_later(self.timeouts.connect, |act, ctx| {
            act.connect_timer = None;
            act.fail(UpstreamError::ConnectTimeout, ctx);
        }));
    }

    fn on_socket_connected(&mut self, stream: BoxedStream, options: &ConnectOptions, ctx: &mut Context<Self>) {
        if let Some(timer) = self.connect_timer.take() {
            ctx.cancel_future(timer);
        }
        self.state = ConnectionState::Registering;
        tracing::info!("[gen {}] Socket connected to {}", self.generation, options.target);
        self.emit(IrcEventKind::SocketConnected);

        let (read_half, write_half) = tokio::io::split(stream);
        self.reader = Some(ctx.add_stream(FramedRead::new(read_half, IrcLineCodec::default())));

        let (tx, rx) = mpsc::unbounded_channel();
        let sink = FramedWrite::new(write_half, IrcLineCodec::default());
        self.writer_task = Some(actix::spawn(write_loop(sink, rx, ctx.address())));
        self.writer = Some(tx);

        for line in protocol::registration_lines(options) {
            self.send_line(line);
        }
        self.start_keepalive(ctx);
    }

    /// Encode and queue one line. Silently ignored when not writable.
    fn send_line(&mut self, line: String) {
        let Some(writer) = &self.writer else {
            tracing::debug!("[gen {}] Dropping line, upstream not writable", self.generation);
            return;
        };

        let bytes = encoding::encode(&line, &self.encoding);
        if writer.send(WriterCommand::Line(bytes)).is_err() {
            return;
        }
        tracing::trace!("[gen {}] >> {}", self.generation, line);
        self.emit(IrcEventKind::Raw { line, from_server: false });
    }

    fn start_keepalive(&mut self, ctx: &mut Context<Self>) {
        self.ping_timer = Some(ctx.run_interval(self.timeouts.ping_interval, |act, ctx| {
            act.send_line(format!("PING {}", timestamp_millis()));
            if act.pong_timer.is_none() {
                act.pong_timer = Some(ctx.run_later(act.timeouts.ping_timeout, |act, ctx| {
                    act.pong_timer = None;
                    act.fail(UpstreamError::PeerUnresponsive, ctx);
                }));
            }
        }));
    }

    fn on_line(&mut self, bytes: BytesMut, ctx: &mut Context<Self>) {
        let line = encoding::decode(&bytes, &self.encoding);
        tracing::trace!("[gen {}] << {}", self.generation, line);

        // Any inbound traffic proves the peer is alive
        if let Some(timer) = self.pong_timer.take() {
            ctx.cancel_future(timer);
        }

        let reply = protocol::ping_reply(&line);
        let welcome = self.state == ConnectionState::Registering && protocol::is_welcome(&line);
        self.emit(IrcEventKind::Raw { line, from_server: true });

        if let Some(reply) = reply {
            self.send_line(reply);
        } else if welcome {
            self.state = ConnectionState::Registered;
            tracing::info!("[gen {}] Registered with upstream", self.generation);
            self.emit(IrcEventKind::Connected);
        }
    }

    fn quit(&mut self, reason: String, ctx: &mut Context<Self>) {
        self.stop_timers(ctx);

        if self.writer.is_none() {
            // Nothing writable: abandon any pending connect outright
            if self.state == ConnectionState::Connecting {
                self.close(ctx);
            } else {
                self.destroy(ctx);
            }
            return;
        }

        self.send_line(protocol::quit_line(&reason));
        if let Some(writer) = self.writer.take() {
            let _ = writer.send(WriterCommand::Close);
        }

        self.linger_timer = Some(ctx.run_later(self.timeouts.quit_linger, |act, ctx| {
            act.linger_timer = None;
            tracing::debug!("[gen {}] Quit linger elapsed, closing", act.generation);
            act.close(ctx);
        }));
    }

    /// Report the failure and close
    fn fail(&mut self, err: UpstreamError, ctx: &mut Context<Self>) {
        if self.state == ConnectionState::Closed {
            return;
        }
        tracing::warn!("[gen {}] Upstream error: {}", self.generation, err);
        self.emit(IrcEventKind::Error(err.to_string()));
        self.close(ctx);
    }

    /// Peer closed or failed: tell the owner, then stop
    fn close(&mut self, ctx: &mut Context<Self>) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.release_socket(ctx);
        self.state = ConnectionState::Closed;
        tracing::info!("[gen {}] Upstream closed", self.generation);
        self.emit(IrcEventKind::Close);
        ctx.stop();
    }

    /// Idempotent hard teardown without events
    fn destroy(&mut self, ctx: &mut Context<Self>) {
        self.release_socket(ctx);
        self.state = ConnectionState::Closed;
        ctx.stop();
    }

    fn stop_timers(&mut self, ctx: &mut Context<Self>) {
        for timer in [
            self.connect_timer.take(),
            self.ping_timer.take(),
            self.pong_timer.take(),
            self.linger_timer.take(),
        ]
        .into_iter()
        .flatten()
        {
            ctx.cancel_future(timer);
        }
    }

    fn release_socket(&mut self, ctx: &mut Context<Self>) {
        self.stop_timers(ctx);
        if let Some(handle) = self.connecting.take() {
            ctx.cancel_future(handle);
        }
        if let Some(handle) = self.reader.take() {
            ctx.cancel_future(handle);
        }
        self.writer = None;
        if let Some(task) = self.writer_task.take() {
            task.abort();
        }
    }
}

async fn write_loop(
    mut sink: LineWriter,
    mut commands: mpsc::UnboundedReceiver<WriterCommand>,
    owner: Addr<IrcClientActor>,
) {
    while let Some(command) = commands.recv().await {
        match command {
            WriterCommand::Line(bytes) => {
                if let Err(e) = sink.send(bytes).await {
                    let err = match e {
                        LineCodecError::Io(e) => e,
                        other => io::Error::new(io::ErrorKind::Other, other),
                    };
                    owner.do_send(WriterFailed(err));
                    return;
                }
            },
            WriterCommand::Close => {
                // Flushes pending lines, then shuts down the write side
                if let Err(e) = sink.close().await {
                    tracing::debug!("Upstream shutdown failed: {}", e);
                }
                return;
            },
        }
    }
}

impl Actor for IrcClientActor {
    type Context = Context<Self>;

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::debug!("[gen {}] Upstream client stopped", self.generation);
        if let Some(task) = self.writer_task.take() {
            task.abort();
        }
    }
}

impl StreamHandler<Result<BytesMut, LineCodecError>> for IrcClientActor {
    fn handle(&mut self, item: Result<BytesMut, LineCodecError>, ctx: &mut Self::Context) {
        match item {
            Ok(line) => self.on_line(line, ctx),
            Err(e) => self.fail(e.into(), ctx),
        }
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        self.reader = None;
        self.close(ctx);
    }
}

impl Handler<Connect> for IrcClientActor {
    type Result = ();

    fn handle(&mut self, msg: Connect, ctx: &mut Self::Context) -> Self::Result {
        self.connect(msg.0, ctx);
    }
}

impl Handler<SendLine> for IrcClientActor {
    type Result = ();

    fn handle(&mut self, msg: SendLine, _ctx: &mut Self::Context) -> Self::Result {
        self.send_line(msg.0);
    }
}

impl Handler<Quit> for IrcClientActor {
    type Result = ();

    fn handle(&mut self, msg: Quit, ctx: &mut Self::Context) -> Self::Result {
        self.quit(msg.0, ctx);
    }
}

impl Handler<Destroy> for IrcClientActor {
    type Result = ();

    fn handle(&mut self, _msg: Destroy, ctx: &mut Self::Context) -> Self::Result {
        self.destroy(ctx);
    }
}

impl Handler<SetEncoding> for IrcClientActor {
    type Result = ();

    fn handle(&mut self, msg: SetEncoding, _ctx: &mut Self::Context) -> Self::Result {
        self.encoding = msg.0;
    }
}

impl Handler<GetState> for IrcClientActor {
    type Result = ConnectionState;

    fn handle(&mut self, _msg: GetState, _ctx: &mut Self::Context) -> Self::Result {
        self.state
    }
}

impl Handler<WriterFailed> for IrcClientActor {
    type Result = ();

    fn handle(&mut self, msg: WriterFailed, ctx: &mut Self::Context) -> Self::Result {
        self.fail(UpstreamError::Io(msg.0), ctx);
    }
}
