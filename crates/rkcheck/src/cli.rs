use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "rkcheck", version, about = "Smoke-test client for the rockchip inference backend")]
pub struct Cli {
    /// Inference server URL
    #[arg(short = 'u', long, default_value = "localhost:8000")]
    pub url: String,

    /// Log level (RUST_LOG)
    #[arg(long, default_value = "info")]
    pub log: String,
}
