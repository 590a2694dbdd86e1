use clap::Parser;
use log::info;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;

use chanio::{Context, Handler};
use chanio_bootstrap::ServerBootstrap;
use chanio_codec::{LoggingHandler, StringCodec};
use chanio_demos::init_logger;
use chanio_executor::{EventLoop, EventLoopGroup};
use chanio_transport::{ByteBuffer, SocketOptions};

////////////////////////////////////////////////////////////////////////////////////////////////////
struct EchoHandler {
    outbound: VecDeque<String>,
    close_after_read: bool,
}

impl EchoHandler {
    fn new(close_after_read: bool) -> Self {
        EchoHandler {
            outbound: VecDeque::new(),
            close_after_read,
        }
    }
}

impl Handler for EchoHandler {
    type Rin = String;
    type Rout = Self::Rin;
    type Win = String;
    type Wout = Self::Win;

    fn name(&self) -> &str {
        "EchoHandler"
    }

    fn transport_active(&mut self, ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>) {
        info!("client connected");
        ctx.fire_transport_active();
    }

    fn handle_read(
        &mut self,
        _ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>,
        msg: Self::Rin,
    ) {
        info!("echoing {:?}", msg);
        self.outbound.push_back(msg);
    }

    fn handle_read_complete(&mut self, ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>) {
        if self.close_after_read {
            ctx.request_close();
        }
    }

    fn handle_eof(&mut self, ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>) {
        info!("client went away");
        ctx.fire_handle_eof();
    }

    fn poll_write(
        &mut self,
        _ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>,
    ) -> Option<Self::Wout> {
        self.outbound.pop_front()
    }

    fn has_pending_write(&self) -> bool {
        !self.outbound.is_empty()
    }
}

#[derive(Parser)]
#[command(name = "Echo Server")]
#[command(version = "0.1.0")]
#[command(about = "Echoes every read back to the client", long_about = None)]
struct Cli {
    #[arg(short, long)]
    debug: bool,
    #[arg(long, default_value_t = format!("127.0.0.1"))]
    host: String,
    #[arg(long, default_value_t = 9999)]
    port: u16,
    #[arg(long, default_value_t = format!("INFO"))]
    log_level: String,
    /// Close each connection once a burst of reads has been echoed.
    #[arg(long)]
    close_after_read: bool,
    #[arg(long, default_value_t = 2)]
    workers: usize,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if cli.debug {
        init_logger(&cli.log_level)?;
    }

    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port).parse()?;
    let close_after_read = cli.close_after_read;
    let debug = cli.debug;

    let parent = EventLoop::new("echo-acceptor")?;
    let children = Arc::new(EventLoopGroup::new(cli.workers, "echo-worker")?);

    let channel = ServerBootstrap::<String>::new(parent.clone(), Arc::clone(&children))
        .child_option(SocketOptions::new().reuse_addr(true).no_delay(true))
        .child_pipeline(move |pipeline| {
            if debug {
                pipeline.add_last(LoggingHandler::<ByteBuffer, ByteBuffer>::new("wire"))?;
            }
            pipeline.add_last(StringCodec::new())?;
            pipeline.add_last(EchoHandler::new(close_after_read))?;
            Ok(())
        })
        .bind(addr)
        .wait()?;

    info!("listening {}...", channel.local_addr());
    println!("Press ctrl-c to stop");
    println!("try `nc {} {}` in another shell", cli.host, channel.local_addr().port());

    let (tx, rx) = futures::channel::oneshot::channel();
    let mut tx = Some(tx);
    ctrlc::set_handler(move || {
        if let Some(tx) = tx.take() {
            let _ = tx.send(());
        }
    })?;
    let _ = futures::executor::block_on(rx);

    channel.close().wait()?;
    parent.shutdown_gracefully()?;
    children.shutdown_gracefully()?;
    info!("echo server stopped");

    Ok(())
}
