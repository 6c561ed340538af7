//! Byte tunnel for requests the backend switched to another protocol.

use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;

/// Wait for both sides to finish the `101` exchange, then copy bytes in
/// both directions until either side closes.
pub fn spawn_tunnel(client: OnUpgrade, backend: OnUpgrade, request_id: String) {
    tokio::spawn(async move {
        let (client, backend) = match tokio::try_join!(client, backend) {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(request_id = %request_id, error = %e, "protocol upgrade failed");
                return;
            }
        };
        tracing::debug!(request_id = %request_id, "upgrade tunnel open");

        let mut client = TokioIo::new(client);
        let mut backend = TokioIo::new(backend);
        match tokio::io::copy_bidirectional(&mut client, &mut backend).await {
            Ok((from_client, from_backend)) => tracing::debug!(
                request_id = %request_id,
                from_client,
                from_backend,
                "upgrade tunnel closed"
            ),
            Err(e) => tracing::debug!(
                request_id = %request_id,
                error = %e,
                "upgrade tunnel closed with error"
            ),
        }
    });
}
