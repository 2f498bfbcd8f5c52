//! Loopback IPC for the renderer and for second-instance hand-off.
//!
//! One JSON object per line in each direction, e.g.
//! `{"call":"check-for-updates"}` answered by `{"ok":true,"value":true}`.

use crate::coordinator::CoordinatorHandle;
use crate::model::{CheckOrigin, HostEvent};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "kebab-case")]
pub enum IpcRequest {
    GetAppVersion,
    CheckForUpdates,
    InstallUpdate,
    GetUpdateStatus,
    Focus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpcResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IpcResponse {
    fn value(value: impl Into<serde_json::Value>) -> Self {
        Self {
            ok: true,
            value: Some(value.into()),
            error: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            value: None,
            error: Some(message.into()),
        }
    }
}

#[derive(Clone)]
pub struct IpcContext {
    pub app_version: String,
    pub coordinator: CoordinatorHandle,
    pub host_events: UnboundedSender<HostEvent>,
}

/// Bind an ephemeral loopback port and serve connections until the runtime stops.
pub async fn serve(ctx: IpcContext) -> Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .await
        .context("bind ipc listener")?;
    let addr = listener.local_addr()?;
    tracing::debug!(%addr, "ipc listening");

    let handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let ctx = ctx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(stream, ctx).await {
                            tracing::debug!(%peer, error = %e, "ipc connection ended");
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "ipc accept failed");
                }
            }
        }
    });
    Ok((addr, handle))
}

async fn serve_connection(stream: TcpStream, ctx: IpcContext) -> Result<()> {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<IpcRequest>(&line) {
            Ok(req) => {
                tracing::debug!(?req, "ipc request");
                handle_request(&ctx, req).await
            }
            Err(e) => IpcResponse::error(format!("bad request: {e}")),
        };
        let mut out = serde_json::to_string(&response)?;
        out.push('\n');
        write.write_all(out.as_bytes()).await?;
    }
    Ok(())
}

pub async fn handle_request(ctx: &IpcContext, req: IpcRequest) -> IpcResponse {
    match req {
        IpcRequest::GetAppVersion => IpcResponse::value(ctx.app_version.clone()),
        IpcRequest::CheckForUpdates => {
            if ctx.coordinator.check_for_updates(CheckOrigin::Ipc) {
                IpcResponse::value(true)
            } else {
                IpcResponse::error("update coordinator is not running")
            }
        }
        IpcRequest::InstallUpdate => match ctx.coordinator.status().await {
            // Without a completed download the request does nothing.
            Some(status) if status.downloaded.is_some() => {
                ctx.coordinator.install_update();
                IpcResponse::value(true)
            }
            Some(_) => IpcResponse::value(false),
            None => IpcResponse::error("update coordinator is not running"),
        },
        IpcRequest::GetUpdateStatus => match ctx.coordinator.status().await {
            Some(status) => match serde_json::to_value(status) {
                Ok(v) => IpcResponse::value(v),
                Err(e) => IpcResponse::error(e.to_string()),
            },
            None => IpcResponse::error("update coordinator is not running"),
        },
        IpcRequest::Focus => {
            let _ = ctx.host_events.send(HostEvent::SecondInstance);
            IpcResponse::value(true)
        }
    }
}

/// Send one request to a running instance and read its answer.
pub async fn call(port: u16, req: &IpcRequest) -> Result<IpcResponse> {
    let stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port))
        .await
        .with_context(|| format!("connect to 127.0.0.1:{port}"))?;
    let (read, mut write) = stream.into_split();
    let mut out = serde_json::to_string(req)?;
    out.push('\n');
    write.write_all(out.as_bytes()).await?;

    let mut lines = BufReader::new(read).lines();
    let line = lines
        .next_line()
        .await?
        .context("connection closed before a response")?;
    Ok(serde_json::from_str(&line)?)
}
