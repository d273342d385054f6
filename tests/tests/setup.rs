use std::sync::LazyLock;

use tokio::runtime::Runtime;
use tracing_subscriber::EnvFilter;

/// Runtime hosting the fixture servers.
///
/// Sessions under test bring their own runtime, so they must be opened
/// outside of `SERVER_RT.block_on`.
pub static SERVER_RT: LazyLock<Runtime> = LazyLock::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("hls_stream_filter=info".parse().unwrap()),
        )
        .with_test_writer()
        .try_init();

    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build fixture runtime")
});
