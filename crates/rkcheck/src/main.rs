mod cli;

use std::io::Write;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use rkcheck_client::{random_i8_image, DType, InferInput, InferenceClient, PendingInference, Shape};
use tracing_subscriber::EnvFilter;

const MODEL: &str = "rockchip";
const INPUT_NAME: &str = "images";
const INPUT_SHAPE: [i64; 4] = [1, 3, 384, 640];
const OUTPUT_NAMES: [&str; 3] = ["output", "376", "377"];

// The server's dynamic batcher delays briefly when forming a batch, so two
// requests in flight at once should reach the backend as a single batch.
const CONCURRENT_REQUESTS: usize = 2;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    std::env::set_var("RUST_LOG", &cli.log);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let client = match InferenceClient::connect(&cli.url, CONCURRENT_REQUESTS) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("channel creation failed: {e:#}");
            std::process::exit(1);
        }
    };

    tracing::info!(url = %cli.url, model = MODEL, "dispatching smoke requests");

    let shape = Shape::from_slice(&INPUT_SHAPE);
    let input = InferInput::new(INPUT_NAME, DType::I8, shape.clone(), random_i8_image(&shape, 128))?;

    let mut pending: Vec<PendingInference> = Vec::new();
    for _ in 0..1 {
        print!(".");
        std::io::stdout().flush()?;
        pending.push(client.async_infer(MODEL, vec![input.clone()])?);
    }

    // Re-send the same input so the batcher sees two concurrent requests.
    pending.push(client.async_infer(MODEL, vec![input])?);

    for request in pending {
        // Blocks until the server responds to this request.
        let result = request.get_result().await?;
        println!("Response: {:?}", result.response());
        for name in OUTPUT_NAMES {
            let out = result.output(name)?;
            println!("{name} = {}", out.shape);
        }
    }

    Ok(())
}
