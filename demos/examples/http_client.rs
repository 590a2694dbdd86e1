use clap::Parser;
use log::info;
use std::time::Duration;

use chanio_demos::init_logger;
use chanio_http::{GetUrl, HttpClient, HttpClientConfig, ResponseBody, Scheme};

#[derive(Parser)]
#[command(name = "HTTP Client")]
#[command(version = "0.1.0")]
#[command(about = "Sends one GET request and prints the response", long_about = None)]
struct Cli {
    #[arg(short, long)]
    debug: bool,
    #[arg(long, default_value_t = format!("INFO"))]
    log_level: String,
    /// Full URL; overrides --host, --port, --path, --query and --https.
    #[arg(long)]
    url: Option<String>,
    #[arg(long, default_value_t = format!("localhost"))]
    host: String,
    #[arg(long)]
    port: Option<u16>,
    /// Path segments, e.g. `--path api --path time`.
    #[arg(long)]
    path: Vec<String>,
    #[arg(long)]
    query: Option<String>,
    #[arg(long)]
    https: bool,
    /// Seconds to wait for a complete response.
    #[arg(long, default_value_t = 30)]
    timeout: u64,
}

impl Cli {
    fn get_url(&self) -> anyhow::Result<GetUrl> {
        if let Some(url) = &self.url {
            return Ok(url.parse()?);
        }
        let scheme = if self.https {
            Scheme::Https
        } else {
            Scheme::Http
        };
        let mut url = GetUrl::new(scheme, self.host.clone()).with_path(self.path.iter());
        if let Some(port) = self.port {
            url = url.with_port(port);
        }
        if let Some(query) = &self.query {
            url = url.with_query(query.clone());
        }
        Ok(url)
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if cli.debug {
        init_logger(&cli.log_level)?;
    }

    let url = cli.get_url()?;
    let config = HttpClientConfig::default()
        .response_timeout(Some(Duration::from_secs(cli.timeout)))
        .debug_handlers(cli.debug);
    let client = HttpClient::new(config)?;

    info!("GET {}", url);
    let response = client.get(&url)?;
    match &response.body {
        ResponseBody::NonText(bytes) => {
            println!("{:?} {}", response.version, response.status);
            for (name, value) in response.headers.iter() {
                println!("{}: {:?}", name, value);
            }
            println!("\n<{} bytes of binary body>", bytes.len());
        }
        _ => println!("{}", response),
    }

    client.shutdown()?;
    Ok(())
}
