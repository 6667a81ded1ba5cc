//! Local upstream fakes for client tests

use axum::Router;
use rqs_common::receipts::{DomainCode, ReceiptRef};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::CorrectnessSink;

/// Serves `router` on an ephemeral localhost port, returns `http://127.0.0.1:<port>`
pub(crate) async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Sink counting correctness signals
#[derive(Default, Clone)]
pub(crate) struct CountingSink {
    pub calls: Arc<AtomicUsize>,
}

impl CountingSink {
    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl CorrectnessSink for CountingSink {
    async fn mark_likely_correct(&self) -> rqs_common::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub(crate) fn kz_ref(domain: DomainCode) -> ReceiptRef {
    let host = match domain {
        DomainCode::KzKtc => "consumer.oofd.kz",
        DomainCode::KzJus => "consumer.kofd.kz",
        _ => "ofd1.kz/t/",
    };
    ReceiptRef::parse(
        domain,
        &format!(
            "http://{}?i=123456789012&f=010101234567&s=1230.00&t=20240309T123456",
            host
        ),
    )
    .unwrap()
}
