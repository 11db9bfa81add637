//! The node plugin's gRPC server over a unix domain socket.

use csi_driver::csi::{
    controller_server::ControllerServer, identity_server::IdentityServer, node_server::NodeServer,
};
use futures::TryFutureExt;
use std::{fs, io::ErrorKind, pin::Pin, sync::Arc, task::Context, task::Poll};
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::UnixListener,
};
use tonic::transport::{server::Connected, Server};
use tracing::{debug, error, info};

use crate::{controller_stub::ControllerModeGuard, identity::CsiIdentitySvc, node::NodeSvc};

#[derive(Debug)]
struct UnixStream(tokio::net::UnixStream);

impl Connected for UnixStream {
    type ConnectInfo = UdsConnectInfo;

    fn connect_info(&self) -> Self::ConnectInfo {
        UdsConnectInfo {
            peer_addr: self.0.peer_addr().ok().map(Arc::new),
            peer_cred: self.0.peer_cred().ok(),
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct UdsConnectInfo {
    pub peer_addr: Option<Arc<tokio::net::unix::SocketAddr>>,
    pub peer_cred: Option<tokio::net::unix::UCred>,
}

impl AsyncRead for UnixStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.0).poll_read(cx, buf)
    }
}

impl AsyncWrite for UnixStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.0).poll_write(cx, buf)
    }
    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.0).poll_flush(cx)
    }
    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.0).poll_shutdown(cx)
    }
}

pub(crate) struct CsiServer {}

impl CsiServer {
    pub(crate) async fn run(csi_socket: &str, node: NodeSvc) -> anyhow::Result<()> {
        match fs::remove_file(csi_socket) {
            Ok(_) => info!(socket = csi_socket, "removed stale CSI socket"),
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(error) => {
                anyhow::bail!("Error removing stale CSI socket {csi_socket}: {error}");
            }
        }

        let incoming = {
            let uds = UnixListener::bind(csi_socket)?;
            debug!(socket = csi_socket, "CSI RPC server is listening");

            if let Err(error) = fs::set_permissions(
                csi_socket,
                std::os::unix::fs::PermissionsExt::from_mode(0o777),
            ) {
                error!(%error, "failed to change permissions of CSI socket");
            }

            async_stream::stream! {
                loop {
                    let item = uds.accept().map_ok(|(stream, _)| UnixStream(stream)).await;
                    yield item;
                }
            }
        };

        Server::builder()
            .add_service(IdentityServer::new(CsiIdentitySvc::default()))
            .add_service(NodeServer::new(node))
            .add_service(ControllerServer::new(ControllerModeGuard::default()))
            .serve_with_incoming(incoming)
            .await?;
        Ok(())
    }
}
