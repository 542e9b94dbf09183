//! Loopback HTTP stubs for exercising the real clients.

use axum::Router;
use tokio::net::TcpListener;

/// Serves `router` on an ephemeral 127.0.0.1 port and returns its base URL.
pub async fn spawn_stub(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}
