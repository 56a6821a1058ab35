//! Arith demo: serves an `Arith` service over TCP, calls it once, and exits.

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use serde::Deserialize;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tracing::info;
use tracing_subscriber::EnvFilter;

use muxrpc::CallContext;
use muxrpc::Client;
use muxrpc::Server;
use muxrpc::ServiceMap;

#[derive(Parser, Debug)]
#[command(name = "arith")]
#[command(about = "Multiplies two numbers over a muxrpc connection")]
struct Args {
    /// Address to listen on (port 0 picks a free one)
    #[arg(long, default_value = "127.0.0.1:0")]
    addr: String,

    #[arg(long, default_value_t = 3)]
    a: i64,

    #[arg(long, default_value_t = 4)]
    b: i64,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Operands {
    a: i64,
    b: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Product {
    c: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Quotient {
    quo: i64,
    rem: i64,
}

fn arith() -> Result<ServiceMap> {
    let services = ServiceMap::new();
    services.register_fn("Arith.Multiply", |_ctx, args: Operands| async move {
        let c = args.a.checked_mul(args.b).ok_or("integer overflow")?;
        Ok(Product { c })
    })?;
    services.register_fn("Arith.Add", |_ctx, args: Operands| async move {
        let c = args.a.checked_add(args.b).ok_or("integer overflow")?;
        Ok(Product { c })
    })?;
    services.register_fn("Arith.Divide", |_ctx, args: Operands| async move {
        if args.b == 0 {
            return Err("divide by zero".to_string());
        }
        let quo = args.a.checked_div(args.b).ok_or("integer overflow")?;
        let rem = args.a.checked_rem(args.b).ok_or("integer overflow")?;
        Ok(Quotient { quo, rem })
    })?;
    Ok(services)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_target(false)
        .compact()
        .init();

    let services = arith()?;
    info!(methods = ?services.methods(), "registered");

    let listener = TcpListener::bind(&args.addr)
        .await
        .with_context(|| format!("binding {}", args.addr))?;
    let addr = listener.local_addr()?;
    info!(%addr, "listening");

    let server = Server::new(services).with_name("arith");
    let shutdown = server.shutdown_token().clone();
    let accepting = tokio::spawn(async move { server.accept(listener).await });

    let client = Client::from_stream(TcpStream::connect(addr).await?);
    let ctx = CallContext::background();
    let operands = Operands { a: args.a, b: args.b };

    let product: Product = client.call(&ctx, "Arith.Multiply", &operands).await?;
    println!("{} * {} = {}", args.a, args.b, product.c);

    match client.call::<_, Quotient>(&ctx, "Arith.Divide", &operands).await {
        Ok(q) => println!("{} / {} = {} remainder {}", args.a, args.b, q.quo, q.rem),
        Err(e) => println!("{} / {} failed: {e}", args.a, args.b),
    }

    client.close().await?;
    shutdown.cancel();
    accepting.await??;
    info!("done");
    Ok(())
}
