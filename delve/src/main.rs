//! Dungeon crawler client.
//!
//! A line-oriented interface for playing solo or in a shared room, suitable
//! for terminals, scripts and automated testing:
//!
//! ```bash
//! cargo run -p delve -- --solo
//! cargo run -p delve -- --room ABC123 --creator
//! ```

mod headless;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Logs go to stderr so narrative output on stdout stays clean.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "delve=info,delve_core=info,roomapi=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    let options = match headless::parse_options(&args) {
        Ok(options) => options,
        Err(message) => {
            eprintln!("Error: {message}");
            print_help();
            std::process::exit(2);
        }
    };

    headless::run(options).await.map_err(|e| e.into())
}

fn print_help() {
    println!("delve - narrative dungeon crawler");
    println!();
    println!("USAGE:");
    println!("  delve [--solo]");
    println!("  delve --room <CODE> [--creator]");
    println!();
    println!("OPTIONS:");
    println!("  --solo          Play alone against the chat endpoint (default)");
    println!("  --room <CODE>   Join the shared room with this code");
    println!("  --creator       You created the room and may start and resolve turns");
    println!("  --server <URL>  Room server (default: $DELVE_SERVER_URL or http://127.0.0.1:5000)");
    println!("  -h, --help      Show this help");
    println!();
    println!("ENVIRONMENT:");
    println!("  DELVE_SERVER_URL            Room server base URL");
    println!("  DELVE_SESSION_COOKIE        Session cookie from the login flow");
    println!("  DELVE_REQUEST_TIMEOUT_SECS  Request timeout (default 120)");
    println!("  RUST_LOG                    Log filter (logs go to stderr)");
}
