#[tokio::main]
async fn main() -> playback_dl::Result<()> {
    #[cfg(feature = "cli")]
    {
        playback_dl::cli::run().await
    }
    #[cfg(not(feature = "cli"))]
    {
        eprintln!("CLI support not compiled in");
        std::process::exit(1);
    }
}
