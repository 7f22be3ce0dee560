// gateway/src/routing.rs
use actix::Addr;
use actix_web::http::header;
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;

use common::{CipherError, GatewayConfig, PayloadCipher};

use crate::actors::client_session_actor::ClientSessionActor;
use crate::actors::session_registry::{AdmitSession, RegisterSession, SessionRegistryActor};
use crate::admission::AdmissionPolicy;
use crate::error::AdmissionError;

/// Shared handles every worker's `App` is built from
#[derive(Clone)]
pub struct GatewayState {
    config: web::Data<GatewayConfig>,
    policy: web::Data<AdmissionPolicy>,
    cipher: web::Data<PayloadCipher>,
    registry: web::Data<Addr<SessionRegistryActor>>,
}

impl GatewayState {
    pub fn new(config: GatewayConfig, registry: Addr<SessionRegistryActor>) -> Result<Self, CipherError> {
        let cipher = PayloadCipher::from_config(&config.encryption)?;
        let policy = AdmissionPolicy::from_config(&config);
        Ok(Self {
            config: web::Data::new(config),
            policy: web::Data::new(policy),
            cipher: web::Data::new(cipher),
            registry: web::Data::new(registry),
        })
    }

    /// Register the upgrade route on its configured path; anything else is 404
    pub fn configure(&self, cfg: &mut web::ServiceConfig) {
        cfg.app_data(self.config.clone())
            .app_data(self.policy.clone())
            .app_data(self.cipher.clone())
            .app_data(self.registry.clone())
            .service(
                web::resource(self.config.server.path.as_str())
                    .route(web::get().to(upgrade_route)),
            )
            .default_service(web::route().to(not_found));
    }
}

async fn not_found(req: HttpRequest) -> HttpResponse {
    tracing::debug!("No route for {} {}", req.method(), req.path());
    HttpResponse::NotFound().finish()
}

/// WebSocket upgrade: address, origin, target, then capacity
async fn upgrade_route(
    req: HttpRequest,
    stream: web::Payload,
    config: web::Data<GatewayConfig>,
    policy: web::Data<AdmissionPolicy>,
    cipher: web::Data<PayloadCipher>,
    registry: web::Data<Addr<SessionRegistryActor>>,
) -> Result<HttpResponse, Error> {
    let forwarded_for = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok());
    let client_ip = policy
        .client_ip(forwarded_for, req.peer_addr().map(|addr| addr.ip()))
        .ok_or_else(|| AdmissionError::BadRequest("unable to determine client address".into()))?;

    let origin = req.headers().get(header::ORIGIN).and_then(|value| value.to_str().ok());
    if let Err(e) = policy.check_origin(origin) {
        tracing::warn!("Rejecting upgrade from {}: origin {:?} not allowed", client_ip, origin);
        return Err(e.into());
    }

    let preset_target = policy.target_from_query(req.query_string()).map_err(|e| {
        tracing::warn!("Rejecting upgrade from {}: {}", client_ip, e);
        e
    })?;

    let ticket = registry
        .send(AdmitSession { ip: client_ip })
        .await
        .map_err(actix_web::error::ErrorInternalServerError)??;
    let session_id = ticket.id();

    let session = ClientSessionActor::new(
        ticket,
        client_ip,
        preset_target,
        config.into_inner(),
        policy.into_inner(),
        cipher.get_ref().clone(),
    );

    // A failed handshake drops the session, and with it the ticket
    ws::start_with_addr(session, &req, stream).map(|(addr, resp)| {
        registry.do_send(RegisterSession { id: session_id, addr });
        resp
    })
}

