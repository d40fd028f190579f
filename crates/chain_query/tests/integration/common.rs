use std::sync::Arc;

use chain_query::{time::MockTime, QueryClient, QueryClientConfig};
use chain_query_test_utils::MockProvider;
use tokio::runtime;

pub type TestClient = QueryClient<Arc<MockProvider>, Arc<MockTime>>;

/// Constructs a client on the current runtime with a mock clock that starts
/// at zero.
pub fn test_client(
    provider: MockProvider,
    config: QueryClientConfig,
) -> (TestClient, Arc<MockProvider>, Arc<MockTime>) {
    let provider = Arc::new(provider);
    let time = Arc::new(MockTime::from_millis(0));

    let client = QueryClient::with_timer(
        runtime::Handle::current(),
        Arc::clone(&provider),
        config,
        Arc::clone(&time),
    );

    (client, provider, time)
}
