use std::env;
use std::error::Error;
use std::io::Write;

use env_logger::Builder;
use log::{info, LevelFilter};

use spikewatch::{AlertSink, Monitor, Timeframe};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    // Configure logger
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter_module("spikewatch", LevelFilter::Debug)
        .format(|buf, record| {
            let ts = chrono::Local::now().format("%H:%M:%S%.3f");
            writeln!(
                buf,
                "[{} {:<5} {}] {}",
                ts,
                record.level(),
                record.target(),
                record.args()
            )
        })
        .target(env_logger::Target::Stderr)
        .init();

    let mut args = env::args().skip(1);
    let threshold: f64 = args.next().as_deref().unwrap_or("5").parse()?;
    let timeframe: Timeframe = args.next().as_deref().unwrap_or("1m").parse()?;

    info!("starting spikewatch ({}% over {})", threshold, timeframe);

    let (sink, mut lines) = AlertSink::channel();
    let mut monitor = Monitor::new(sink);
    monitor.start(threshold, timeframe).await?;

    let printer = tokio::spawn(async move {
        while let Some(line) = lines.recv().await {
            println!("{}", line);
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    monitor.stop().await;
    drop(monitor);
    let _ = printer.await;
    Ok(())
}
