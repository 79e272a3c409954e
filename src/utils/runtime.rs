use anyhow::Result;

/// Runtime for the daemon. Client delivery tasks, the scheduler and the server share it.
pub fn multi_thread_runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("punchclock-worker")
        .build()?)
}
