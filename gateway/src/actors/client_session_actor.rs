// gateway/src/actors/client_session_actor.rs
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use actix::prelude::*;
use actix_web_actors::ws;

use common::webirc::resolve_client_hostname;
use common::{
    encoding, ClientCommand, ConnectRequest, GatewayConfig, PayloadCipher, ServerEvent, SessionId,
    UpstreamTarget,
};

use super::irc_client_actor::{
    Connect, Destroy, IrcClientActor, IrcEvent, IrcEventKind, Quit, SendLine, SetEncoding,
};
use super::session_registry::AdmissionTicket;
use crate::admission::AdmissionPolicy;
use crate::error::AdmissionError;
use crate::irc::{ConnectOptions, UpstreamTimeouts, WebircParams};
use crate::rate_limiter::MessageRateLimiter;

/// Close the browser socket and release the session
#[derive(Message)]
#[rtype(result = "()")]
pub struct Shutdown;

/// Why a `connect` command was refused; sent back as a gateway error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectRefused {
    #[error("no server given and none configured for this connection")]
    NoServer,
    #[error(transparent)]
    Target(#[from] AdmissionError),
    #[error("WEBIRC is enabled; refusing to send the gateway password over a plaintext connection")]
    WebircOverPlaintext,
}

/// Turn a browser `connect` into upstream options, filling defaults and
/// enforcing the target rules
pub fn plan_connect(
    request: ConnectRequest,
    preset: Option<&UpstreamTarget>,
    client_ip: IpAddr,
    config: &GatewayConfig,
    policy: &AdmissionPolicy,
) -> Result<ConnectOptions, ConnectRefused> {
    let (target, password) = match (request.server, preset) {
        (Some(server), _) => (
            UpstreamTarget {
                host: server.host.trim().to_string(),
                port: server.port,
                tls: server.tls,
                encoding: server.encoding.unwrap_or_else(|| config.irc.default_encoding.clone()),
            },
            server.password,
        ),
        (None, Some(preset)) => (preset.clone(), None),
        (None, None) => match &config.upstream.default_host {
            Some(host) => (
                UpstreamTarget {
                    host: host.clone(),
                    port: config.upstream.port_for(config.upstream.default_tls),
                    tls: config.upstream.default_tls,
                    encoding: config.irc.default_encoding.clone(),
                },
                None,
            ),
            None => return Err(ConnectRefused::NoServer),
        },
    };

    policy.check_target(&target.host, target.port)?;

    let webirc = if config.webirc.enabled {
        if !target.tls && !config.webirc.allow_plaintext {
            return Err(ConnectRefused::WebircOverPlaintext);
        }
        Some(WebircParams {
            password: config.webirc.password.clone(),
            gateway_name: config.webirc.gateway_name.clone(),
            hostname: resolve_client_hostname(client_ip, &config.webirc.hostname_suffix),
            ip: client_ip.to_string(),
        })
    } else {
        None
    };

    Ok(ConnectOptions {
        target,
        nick: request.nick,
        username: request
            .username
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| config.irc.default_username.clone()),
        realname: request
            .realname
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| config.irc.default_realname.clone()),
        password,
        webirc,
        block_private_hosts: config.upstream.block_private_hosts,
    })
}

struct UpstreamLink {
    addr: Addr<IrcClientActor>,
    connected: bool,
}

/// One browser connection and the IRC connection it drives
pub struct ClientSessionActor {
    ticket: AdmissionTicket,
    client_ip: IpAddr,
    config: Arc<GatewayConfig>,
    policy: Arc<AdmissionPolicy>,
    cipher: PayloadCipher,
    rate_limiter: MessageRateLimiter,
    preset_target: Option<UpstreamTarget>,
    target: Option<UpstreamTarget>,
    upstream: Option<UpstreamLink>,
    generation: u64,
    last_heartbeat: Instant,
    closed: bool,
}

impl ClientSessionActor {
    pub fn new(
        ticket: AdmissionTicket,
        client_ip: IpAddr,
        preset_target: Option<UpstreamTarget>,
        config: Arc<GatewayConfig>,
        policy: Arc<AdmissionPolicy>,
        cipher: PayloadCipher,
    ) -> Self {
        let rate_limiter = MessageRateLimiter::new(
            config.limits.rate_limit_window(),
            config.limits.rate_limit_max_messages,
        );
        Self {
            ticket,
            client_ip,
            config,
            policy,
            cipher,
            rate_limiter,
            preset_target,
            target: None,
            upstream: None,
            generation: 0,
            last_heartbeat: Instant::now(),
            closed: false,
        }
    }

    pub fn id(&self) -> SessionId {
        self.ticket.id()
    }

    fn heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let timeout = self.config.server.client_timeout();
        ctx.run_interval(self.config.server.heartbeat_interval(), move |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > timeout {
                tracing::warn!("{} heartbeat timeout", act.id());
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn send_event(&self, event: ServerEvent, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.text(self.cipher.encrypt(&event.to_json()));
    }

    fn on_text(&mut self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        if !self.rate_limiter.check() {
            tracing::debug!("{} over message budget, dropping message", self.id());
            return;
        }

        let json = match self.cipher.decrypt(text) {
            Ok(json) => json,
            Err(e) => {
                tracing::debug!("{} sent an undecryptable frame: {}", self.id(), e);
                return;
            },
        };

        let command = match ClientCommand::decode(&json) {
            Ok(command) => command,
            Err(e) => {
                tracing::debug!("{} sent a malformed message: {}", self.id(), e);
                return;
            },
        };

        match command {
            ClientCommand::Connect(request) => self.connect_upstream(request, ctx),
            ClientCommand::Disconnect(request) => {
                let reason = request
                    .reason
                    .unwrap_or_else(|| self.config.irc.default_quit_message.clone());
                // The quitting client keeps its generation, so its close still reaches the browser
                if let Some(upstream) = self.upstream.take() {
                    upstream.addr.do_send(Quit(reason));
                }
            },
            ClientCommand::Raw(request) => match &self.upstream {
                Some(upstream) if upstream.connected => upstream.addr.do_send(SendLine(request.line)),
                _ => tracing::debug!("{} raw line without a connected upstream", self.id()),
            },
            ClientCommand::Encoding(request) => self.set_encoding(request.name, ctx),
            ClientCommand::Unrecognized(kind) => {
                tracing::debug!("{} sent unknown message type {:?}", self.id(), kind);
            },
        }
    }

    fn connect_upstream(&mut self, request: ConnectRequest, ctx: &mut ws::WebsocketContext<Self>) {
        let options = match plan_connect(
            request,
            self.preset_target.as_ref(),
            self.client_ip,
            &self.config,
            &self.policy,
        ) {
            Ok(options) => options,
            Err(refused) => {
                tracing::warn!("{} connect refused: {}", self.id(), refused);
                self.send_event(ServerEvent::gateway_error(refused.to_string()), ctx);
                return;
            },
        };

        if let Some(previous) = self.upstream.take() {
            previous.addr.do_send(Destroy);
        }

        self.generation += 1;
        self.target = Some(options.target.clone());
        tracing::info!("{} connecting to {} as {}", self.id(), options.target, options.nick);

        let client = IrcClientActor::new(
            self.generation,
            ctx.address().recipient(),
            UpstreamTimeouts::from(&self.config.upstream),
        )
        .start();
        client.do_send(Connect(options));

        self.upstream = Some(UpstreamLink { addr: client, connected: false });
    }

    fn set_encoding(&mut self, name: String, ctx: &mut ws::WebsocketContext<Self>) {
        if !encoding::is_supported(&name) {
            self.send_event(ServerEvent::gateway_error(format!("unsupported encoding: {}", name)), ctx);
            return;
        }
        if let Some(target) = self.target.as_mut() {
            target.encoding = name.clone();
        }
        if let Some(upstream) = &self.upstream {
            upstream.addr.do_send(SetEncoding(name));
        }
    }

    /// Quit the upstream and release the registry slot, once
    fn teardown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Some(upstream) = self.upstream.take() {
            upstream.addr.do_send(Quit(self.config.irc.default_quit_message.clone()));
        }
        self.ticket.release();
    }
}

impl Actor for ClientSessionActor {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!("{} connected from {}", self.id(), self.client_ip);
        self.last_heartbeat = Instant::now();
        self.heartbeat(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!("{} disconnected", self.id());
        self.teardown();
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for ClientSessionActor {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        self.last_heartbeat = Instant::now();

        match msg {
            Ok(ws::Message::Ping(msg)) => ctx.pong(&msg),
            Ok(ws::Message::Pong(_)) => {},
            Ok(ws::Message::Text(text)) => self.on_text(&text, ctx),
            Ok(ws::Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                Ok(text) => self.on_text(text, ctx),
                Err(_) => tracing::debug!("{} sent a non UTF-8 binary frame", self.id()),
            },
            Ok(ws::Message::Close(reason)) => {
                tracing::info!("{} closing: {:?}", self.id(), reason);
                ctx.close(reason);
                ctx.stop();
            },
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {},
            Err(e) => {
                tracing::warn!("{} protocol error: {}", self.id(), e);
                ctx.stop();
            },
        }
    }
}

impl Handler<IrcEvent> for ClientSessionActor {
    type Result = ();

    fn handle(&mut self, event: IrcEvent, ctx: &mut Self::Context) -> Self::Result {
        if event.generation != self.generation {
            tracing::trace!("{} ignoring event from replaced upstream", self.id());
            return;
        }

        let outbound = match event.kind {
            IrcEventKind::SocketConnected => {
                if let Some(upstream) = self.upstream.as_mut() {
                    upstream.connected = true;
                }
                ServerEvent::SocketConnected
            },
            IrcEventKind::Connected => ServerEvent::Connected,
            IrcEventKind::Error(message) => {
                if let Some(upstream) = self.upstream.as_mut() {
                    upstream.connected = false;
                }
                ServerEvent::Error { message }
            },
            IrcEventKind::Close => {
                self.upstream = None;
                if let Some(target) = self.target.take() {
                    tracing::info!(
                        "{} upstream {} closed (encoding {})",
                        self.id(),
                        target.authority(),
                        target.encoding
                    );
                }
                ServerEvent::Close
            },
            IrcEventKind::Raw { line, from_server: true } => ServerEvent::Irc { line },
            IrcEventKind::Raw { line, from_server: false } => ServerEvent::Echo { line },
        };
        self.send_event(outbound, ctx);
    }
}

impl Handler<Shutdown> for ClientSessionActor {
    type Result = ();

    fn handle(&mut self, _msg: Shutdown, ctx: &mut Self::Context) -> Self::Result {
        tracing::info!("{} shutting down", self.id());
        self.teardown();
        ctx.close(Some(ws::CloseReason {
            code: ws::CloseCode::Away,
            description: Some("gateway shutting down".to_string()),
        }));
        ctx.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ServerSpec;

    fn request(server: Option<ServerSpec>) -> ConnectRequest {
        ConnectRequest { nick: "alice".into(), username: None, realname: None, server }
    }

    fn server(host: &str, tls: bool) -> ServerSpec {
        ServerSpec { host: host.into(), port: 6697, tls, encoding: None, password: None }
    }

    fn ip() -> IpAddr {
        "192.168.1.10".parse().unwrap()
    }

    #[test]
    fn test_plan_fills_defaults() {
        let config = GatewayConfig::default();
        let policy = AdmissionPolicy::from_config(&config);

        let options = plan_connect(request(Some(server("irc.example.org", true))), None, ip(), &config, &policy).unwrap();
        assert_eq!(options.username, "webchat");
        assert_eq!(options.realname, "Web IRC user");
        assert_eq!(options.target.encoding, "utf8");
        assert_eq!(options.webirc, None);
    }

    #[test]
    fn test_plan_uses_preset_target() {
        let config = GatewayConfig::default();
        let policy = AdmissionPolicy::from_config(&config);
        let preset = UpstreamTarget { host: "irc.example.org".into(), port: 6667, tls: false, encoding: "latin1".into() };

        let options = plan_connect(request(None), Some(&preset), ip(), &config, &policy).unwrap();
        assert_eq!(options.target, preset);

        assert_eq!(
            plan_connect(request(None), None, ip(), &config, &policy),
            Err(ConnectRefused::NoServer)
        );
    }

    #[test]
    fn test_plan_falls_back_to_default_host() {
        let mut config = GatewayConfig::default();
        config.upstream.default_host = Some("irc.example.org".into());
        config.upstream.default_tls = true;
        let policy = AdmissionPolicy::from_config(&config);

        let options = plan_connect(request(None), None, ip(), &config, &policy).unwrap();
        assert_eq!(options.target.host, "irc.example.org");
        assert_eq!(options.target.port, 6697);
        assert!(options.target.tls);
    }

    #[test]
    fn test_plan_enforces_target_rules() {
        let mut config = GatewayConfig::default();
        config.upstream.allowed_servers = vec!["irc.example.org:6697".into()];
        let policy = AdmissionPolicy::from_config(&config);

        let refused = plan_connect(request(Some(server("irc.other.org", true))), None, ip(), &config, &policy);
        assert_eq!(refused, Err(ConnectRefused::Target(AdmissionError::TargetNotAllowed)));

        let config = GatewayConfig::default();
        let policy = AdmissionPolicy::from_config(&config);
        let refused = plan_connect(request(Some(server("127.0.0.1", true))), None, ip(), &config, &policy);
        assert_eq!(refused, Err(ConnectRefused::Target(AdmissionError::PrivateTarget)));

        let refused = plan_connect(request(Some(server("0x7f000001", true))), None, ip(), &config, &policy);
        assert_eq!(refused, Err(ConnectRefused::Target(AdmissionError::PrivateTarget)));

        let options = plan_connect(request(Some(server("irc.example.org", true))), None, ip(), &config, &policy).unwrap();
        assert!(options.block_private_hosts);
    }

    #[test]
    fn test_plan_webirc_requires_tls() {
        let mut config = GatewayConfig::default();
        config.webirc.enabled = true;
        config.webirc.password = "gwpass".into();
        let policy = AdmissionPolicy::from_config(&config);

        let refused = plan_connect(request(Some(server("irc.example.org", false))), None, ip(), &config, &policy);
        assert_eq!(refused, Err(ConnectRefused::WebircOverPlaintext));

        let options = plan_connect(request(Some(server("irc.example.org", true))), None, ip(), &config, &policy).unwrap();
        let webirc = options.webirc.unwrap();
        assert_eq!(webirc.hostname, "c0a8010a.web");
        assert_eq!(webirc.ip, "192.168.1.10");
        assert_eq!(webirc.gateway_name, "webgateway");

        config.webirc.allow_plaintext = true;
        let options = plan_connect(request(Some(server("irc.example.org", false))), None, ip(), &config, &policy).unwrap();
        assert!(options.webirc.is_some());
    }
}
