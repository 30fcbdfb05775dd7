//! Newline-delimited JSON protocol.
//!
//! The first line of a connection is a `hello`; it fixes the device id and the
//! administrator capability for the rest of the connection. Every following line is
//! one [`Command`](crate::command::Command) and gets exactly one [`Reply`] line back, in order.

use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, warn};

use crate::auth::{AdminCheck, AdminGate, AuthContext, generate_device_id};
use crate::command::{self, Moment, Reply};
use crate::devices::DeviceRegistry;
use crate::engine::Engine;
use crate::limits::*;
use crate::observability as obs;
use crate::session::Session;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("framing: {0}")]
    Codec(#[from] LinesCodecError),
    #[error("encode: {0}")]
    Json(#[from] serde_json::Error),
    #[error("handshake failed: {0}")]
    Handshake(String),
}

/// Shared by every connection.
pub struct ServerContext {
    pub engine: Arc<Engine>,
    pub devices: Arc<DeviceRegistry>,
    pub admin: AdminGate,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Hello {
    Hello {
        #[serde(default)]
        device_id: Option<String>,
        #[serde(default)]
        admin_password: Option<String>,
    },
}

type Lines<S> = Framed<S, LinesCodec>;

async fn send<S>(framed: &mut Lines<S>, reply: &Reply) -> Result<(), WireError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    framed.send(serde_json::to_string(reply)?).await?;
    Ok(())
}

async fn refuse<S>(framed: &mut Lines<S>, kind: &str, message: String) -> Result<Session, WireError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    metrics::counter!(obs::HANDSHAKE_FAILURES_TOTAL).increment(1);
    warn!("handshake refused: {message}");
    send(framed, &Reply::error(kind, message.clone())).await?;
    Err(WireError::Handshake(message))
}

/// Read the hello line and build the connection's session. `Ok(None)` when the peer
/// hung up before saying hello.
async fn handshake<S>(framed: &mut Lines<S>, ctx: &ServerContext) -> Result<Option<Session>, WireError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let line = match framed.next().await {
        None => return Ok(None),
        Some(Ok(line)) => line,
        Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
            return refuse(framed, "limit_exceeded", "hello line too long".into())
                .await
                .map(Some);
        }
        Some(Err(e)) => return Err(e.into()),
    };

    let (device_id, admin_password) = match serde_json::from_str::<Hello>(&line) {
        Ok(Hello::Hello {
            device_id,
            admin_password,
        }) => (device_id, admin_password),
        Err(e) => {
            return refuse(framed, "bad_request", format!("expected hello: {e}"))
                .await
                .map(Some);
        }
    };

    let administrator = match ctx.admin.verify(admin_password.as_deref()) {
        AdminCheck::Granted => true,
        AdminCheck::NotRequested => false,
        AdminCheck::Rejected => {
            return refuse(
                framed,
                "permission_denied",
                "invalid administrator password".into(),
            )
            .await
            .map(Some);
        }
    };

    let device_id = device_id
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .unwrap_or_else(generate_device_id);
    let limiter = match ctx.devices.get_or_load(&device_id) {
        Ok(limiter) => limiter,
        Err(e) => {
            return refuse(framed, "bad_request", format!("device {device_id:?}: {e}"))
                .await
                .map(Some);
        }
    };
    metrics::gauge!(obs::DEVICES_ACTIVE).set(ctx.devices.len() as f64);

    send(
        framed,
        &Reply::Ok {
            data: json!({ "device_id": device_id, "administrator": administrator }),
        },
    )
    .await?;
    debug!("hello from {device_id} (administrator: {administrator})");
    Ok(Some(Session::shared(
        AuthContext::new(device_id, administrator),
        limiter,
    )))
}

async fn handle_line(engine: &Engine, session: &Session, line: &str) -> Reply {
    let start = Instant::now();
    let (label, result) = match command::parse_command(line) {
        Ok(cmd) => {
            let label = cmd.label();
            (label, command::execute_command(engine, session, cmd, Moment::current()).await)
        }
        Err(e) => ("invalid", Err(e)),
    };
    let status = if result.is_ok() { "ok" } else { "error" };
    metrics::counter!(obs::COMMANDS_TOTAL, "command" => label, "status" => status).increment(1);
    metrics::histogram!(obs::COMMAND_DURATION_SECONDS, "command" => label)
        .record(start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        debug!("{} {label}: {e}", session.auth.device_id());
    }
    Reply::from_result(result)
}

pub async fn process_connection<S>(socket: S, ctx: Arc<ServerContext>) -> Result<(), WireError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    let Some(session) = handshake(&mut framed, &ctx).await? else {
        return Ok(());
    };

    while let Some(next) = framed.next().await {
        let line = match next {
            Ok(line) => line,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                warn!("{}: request line over {MAX_LINE_LEN} bytes, closing", session.auth.device_id());
                let reply = Reply::error(
                    "limit_exceeded",
                    format!("request line exceeds {MAX_LINE_LEN} bytes"),
                );
                send(&mut framed, &reply).await?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        if line.trim().is_empty() {
            continue;
        }
        let reply = handle_line(&ctx.engine, &session, &line).await;
        send(&mut framed, &reply).await?;
    }
    Ok(())
}
