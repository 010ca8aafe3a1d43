use anyhow::Result;

/// The whole application is one sequential flow, so a current thread runtime is enough. Blocking
/// work (the overlay window loop) goes through `spawn_blocking`.
pub fn single_thread_runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?)
}
