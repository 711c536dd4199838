use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::time::Duration;
use test_server::logging::{init_logging, LogConfig};
use test_server::{Response, ServerConfig, TestServer, TestServerError};

/// Serve one canned response forever, for poking at a client by hand.
#[derive(Parser, Debug)]
#[command(name = "test-server", version, about, long_about = None)]
struct Args {
    /// Interface to bind
    #[arg(long, env = "TEST_SERVER_ADDRESS", default_value = "127.0.0.1")]
    address: String,

    /// Port to bind (0 picks a free port)
    #[arg(short, long, env = "TEST_SERVER_PORT", default_value_t = 0)]
    port: u16,

    /// Status code of the canned response
    #[arg(short, long, default_value_t = 200)]
    status: u16,

    /// Body of the canned response
    #[arg(short, long, default_value = "")]
    body: String,

    /// Response header as `Name: value` (repeatable)
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// Only answer this method (get, post, put, delete, options, patch)
    #[arg(short, long)]
    method: Option<String>,

    /// Print every captured request as a JSON line on stdout
    #[arg(long, default_value_t = false)]
    dump: bool,
}

fn parse_header(raw: &str) -> Result<(String, String)> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| anyhow!("header must look like `Name: value`, got {raw:?}"))?;
    Ok((name.trim().to_string(), value.trim().to_string()))
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&LogConfig::from_env())?;

    let config = ServerConfig::from_env()
        .with_address(&args.address)
        .with_port(args.port);
    let server = TestServer::with_config(config);
    server
        .add_response(
            Response::from_data(args.body.clone())
                .with_status(args.status)
                .with_headers(args.headers.clone()),
            -1,
            args.method.as_deref(),
        )
        .context("Invalid canned response")?;
    server
        .start()
        .with_context(|| format!("Failed to start on {}:{}", args.address, args.port))?;
    println!("{}", server.get_url("", None)?);

    let mut seen = 0;
    loop {
        match server.wait_request(Duration::from_secs(1)) {
            Ok(()) | Err(TestServerError::WaitTimeout { .. }) => {}
            Err(e) => return Err(e.into()),
        }
        if !args.dump {
            continue;
        }
        let requests = server.requests();
        for request in requests.iter().skip(seen) {
            println!(
                "{}",
                serde_json::to_string(request.as_ref()).context("Failed to encode request")?
            );
        }
        seen = requests.len();
    }
}
