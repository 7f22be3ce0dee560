// gateway/src/actors/session_registry.rs
use std::net::IpAddr;
use std::time::Duration;

use actix::prelude::*;
use chrono::Utc;
use dashmap::DashMap;

use common::{GatewayStats, LimitsConfig, SessionId};

use super::client_session_actor::{ClientSessionActor, Shutdown};
use crate::error::AdmissionError;

const STATS_INTERVAL: Duration = Duration::from_secs(60);

/// Reserve a slot for a new connection from `ip`
#[derive(Message)]
#[rtype(result = "Result<AdmissionTicket, AdmissionError>")]
pub struct AdmitSession {
    pub ip: IpAddr,
}

/// Attach the running session actor to a reserved slot
#[derive(Message)]
#[rtype(result = "()")]
pub struct RegisterSession {
    pub id: SessionId,
    pub addr: Addr<ClientSessionActor>,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct RemoveSession {
    pub id: SessionId,
}

/// Close every session and refuse new ones. Returns how many were closed.
#[derive(Message)]
#[rtype(result = "usize")]
pub struct StopGateway;

#[derive(Message)]
#[rtype(result = "GatewayStats")]
pub struct GetStats;

/// Proof of admission held by a session. Releasing it, explicitly or by
/// dropping, frees the slot exactly once.
pub struct AdmissionTicket {
    id: SessionId,
    registry: Option<Addr<SessionRegistryActor>>,
}

impl AdmissionTicket {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn release(&mut self) {
        if let Some(registry) = self.registry.take() {
            registry.do_send(RemoveSession { id: self.id });
        }
    }
}

impl std::fmt::Debug for AdmissionTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionTicket")
            .field("id", &self.id)
            .field("released", &self.registry.is_none())
            .finish()
    }
}

impl Drop for AdmissionTicket {
    fn drop(&mut self) {
        self.release();
    }
}

struct SessionEntry {
    ip: IpAddr,
    addr: Option<Addr<ClientSessionActor>>,
}

/// Owns the set of live sessions and the per-IP connection counts
pub struct SessionRegistryActor {
    limits: LimitsConfig,
    sessions: DashMap<SessionId, SessionEntry>,
    ip_counts: DashMap<IpAddr, usize>,
    next_id: u64,
    stopping: bool,
}

impl SessionRegistryActor {
    pub fn new(limits: LimitsConfig) -> Self {
        Self {
            limits,
            sessions: DashMap::new(),
            ip_counts: DashMap::new(),
            next_id: 1,
            stopping: false,
        }
    }

    fn admit(&mut self, ip: IpAddr, ctx: &mut Context<Self>) -> Result<AdmissionTicket, AdmissionError> {
        if self.stopping {
            return Err(AdmissionError::ServerFull);
        }

        let per_ip = self.ip_counts.get(&ip).map(|count| *count).unwrap_or(0);
        if per_ip >= self.limits.max_connections_per_ip {
            tracing::warn!("Rejecting {}: {} connections already open", ip, per_ip);
            return Err(AdmissionError::TooManyPerIp);
        }
        if self.sessions.len() >= self.limits.max_clients {
            tracing::warn!("Rejecting {}: gateway full ({} sessions)", ip, self.sessions.len());
            return Err(AdmissionError::ServerFull);
        }

        let id = SessionId(self.next_id);
        self.next_id += 1;
        self.sessions.insert(id, SessionEntry { ip, addr: None });
        *self.ip_counts.entry(ip).or_insert(0) += 1;

        tracing::info!("Admitted {} from {} ({} sessions)", id, ip, self.sessions.len());
        Ok(AdmissionTicket { id, registry: Some(ctx.address()) })
    }

    /// Idempotent: only the first removal of an id touches the counts
    fn remove(&mut self, id: SessionId) -> Option<SessionEntry> {
        let (_, entry) = self.sessions.remove(&id)?;

        let emptied = match self.ip_counts.get_mut(&entry.ip) {
            Some(mut count) => {
                *count = count.saturating_sub(1);
                *count == 0
            },
            None => false,
        };
        if emptied {
            self.ip_counts.remove(&entry.ip);
        }

        tracing::info!("Removed {} ({} sessions)", id, self.sessions.len());
        Some(entry)
    }

    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            sessions: self.sessions.len(),
            distinct_ips: self.ip_counts.len(),
            taken_at: Utc::now(),
        }
    }

    fn start_stats_task(&self, ctx: &mut Context<Self>) {
        ctx.run_interval(STATS_INTERVAL, |act, _ctx| {
            let stats = act.stats();
            tracing::info!(
                "Gateway stats: {} sessions from {} addresses",
                stats.sessions,
                stats.distinct_ips
            );
        });
    }
}

impl Actor for SessionRegistryActor {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!("Session registry started");
        self.start_stats_task(ctx);
    }
}

impl Handler<AdmitSession> for SessionRegistryActor {
    type Result = Result<AdmissionTicket, AdmissionError>;

    fn handle(&mut self, msg: AdmitSession, ctx: &mut Self::Context) -> Self::Result {
        self.admit(msg.ip, ctx)
    }
}

impl Handler<RegisterSession> for SessionRegistryActor {
    type Result = ();

    fn handle(&mut self, msg: RegisterSession, _ctx: &mut Self::Context) -> Self::Result {
        match self.sessions.get_mut(&msg.id) {
            Some(mut entry) => entry.addr = Some(msg.addr),
            None => {
                // Released before the actor was attached (stop or early close)
                tracing::debug!("{} no longer registered, shutting it down", msg.id);
                msg.addr.do_send(Shutdown);
            },
        }
    }
}

impl Handler<RemoveSession> for SessionRegistryActor {
    type Result = ();

    fn handle(&mut self, msg: RemoveSession, _ctx: &mut Self::Context) -> Self::Result {
        self.remove(msg.id);
    }
}

impl Handler<StopGateway> for SessionRegistryActor {
    type Result = usize;

    fn handle(&mut self, _msg: StopGateway, _ctx: &mut Self::Context) -> Self::Result {
        self.stopping = true;

        let ids: Vec<SessionId> = self.sessions.iter().map(|entry| *entry.key()).collect();
        let mut closed = 0;
        for id in ids {
            if let Some(entry) = self.remove(id) {
                if let Some(addr) = entry.addr {
                    addr.do_send(Shutdown);
                }
                closed += 1;
            }
        }

        tracing::info!("Gateway stopping, closed {} sessions", closed);
        closed
    }
}

impl Handler<GetStats> for SessionRegistryActor {
    type Result = MessageResult<GetStats>;

    fn handle(&mut self, _msg: GetStats, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.stats())
    }
}
