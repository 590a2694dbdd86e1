use clap::Parser;
use log::{debug, info};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chanio::{Context, Handler};
use chanio_bootstrap::ClientBootstrap;
use chanio_codec::StringCodec;
use chanio_demos::init_logger;
use chanio_executor::{sync_gate, EventLoop, GateSignal};
use chanio_transport::SocketOptions;

////////////////////////////////////////////////////////////////////////////////////////////////////
struct EchoClientHandler {
    expected: usize,
    received: String,
    signal: Option<GateSignal<String>>,
}

impl EchoClientHandler {
    fn release(&mut self) {
        if let Some(signal) = self.signal.take() {
            signal.release(Ok(std::mem::take(&mut self.received)));
        }
    }
}

impl Handler for EchoClientHandler {
    type Rin = String;
    type Rout = Self::Rin;
    type Win = String;
    type Wout = Self::Win;

    fn name(&self) -> &str {
        "EchoClientHandler"
    }

    fn handle_read(
        &mut self,
        ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>,
        msg: Self::Rin,
    ) {
        debug!("read {} bytes", msg.len());
        self.received.push_str(&msg);
        if self.received.len() >= self.expected {
            self.release();
            ctx.request_close();
        }
    }

    fn handle_eof(&mut self, ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>) {
        // the server may close after echoing only part of the message
        self.release();
        ctx.fire_handle_eof();
    }

    fn poll_write(
        &mut self,
        ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>,
    ) -> Option<Self::Wout> {
        ctx.fire_poll_write()
    }
}

#[derive(Parser)]
#[command(name = "Echo Client")]
#[command(version = "0.1.0")]
#[command(about = "Sends one message to an echo server and prints the reply", long_about = None)]
struct Cli {
    #[arg(short, long)]
    debug: bool,
    #[arg(long, default_value_t = format!("127.0.0.1"))]
    host: String,
    #[arg(long, default_value_t = 9999)]
    port: u16,
    #[arg(long, default_value_t = format!("INFO"))]
    log_level: String,
    #[arg(short, long, default_value_t = format!("Hello"))]
    message: String,
    /// Seconds to wait for the echo.
    #[arg(long, default_value_t = 5)]
    timeout: u64,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if cli.debug {
        init_logger(&cli.log_level)?;
    }

    let event_loop = EventLoop::new("echo-client")?;

    let (signal, gate) = sync_gate::<String>();
    let signal = Arc::new(Mutex::new(Some(signal)));
    let expected = cli.message.len();

    let connection = ClientBootstrap::<String>::new(event_loop.clone())
        .option(
            SocketOptions::new()
                .no_delay(true)
                .connect_timeout(Duration::from_secs(cli.timeout)),
        )
        .pipeline(move |pipeline| {
            pipeline.add_last(StringCodec::new())?;
            pipeline.add_last(EchoClientHandler {
                expected,
                received: String::new(),
                signal: signal
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .take(),
            })?;
            Ok(())
        })
        .connect(&cli.host, cli.port)
        .wait()?;
    info!("connected {} -> {}", connection.local_addr(), connection.peer_addr());

    connection.write(cli.message.clone()).wait()?;
    let echoed = gate.wait_timeout(Duration::from_secs(cli.timeout))?;
    println!("{}", echoed);

    connection.closed().wait()?;
    event_loop.shutdown_gracefully()?;

    Ok(())
}
