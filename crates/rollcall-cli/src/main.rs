use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;

#[zbus::proxy(
    interface = "org.rollcall.Attendance1",
    default_service = "org.rollcall.Attendance1",
    default_path = "/org/rollcall/Attendance1"
)]
trait Attendance {
    async fn start(&self) -> zbus::Result<()>;
    async fn stop(&self) -> zbus::Result<()>;
    async fn finalize(&self) -> zbus::Result<String>;
    async fn records(&self) -> zbus::Result<String>;
    async fn records_by_date(&self, date: &str) -> zbus::Result<String>;
    async fn dates(&self) -> zbus::Result<Vec<String>>;
    async fn stats(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
    async fn snapshot(&self) -> zbus::Result<Vec<u8>>;
}

#[derive(Parser, Debug)]
#[command(name = "rollcall", about = "Rollcall face-recognition attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start recognizing faces
    Start,
    /// Stop recognition and release the camera
    Stop,
    /// Mark everyone not seen today absent and print the final records
    Finalize,
    /// List attendance records
    Records {
        /// Only show this day (YYYY-MM-DD)
        #[arg(short, long)]
        date: Option<String>,
    },
    /// List days with attendance records
    Dates,
    /// Show present/late/absent totals
    Stats,
    /// Show daemon status
    Status,
    /// Save the latest annotated frame as JPEG
    Snapshot {
        /// Output file
        path: PathBuf,
    },
    /// List V4L2 capture devices
    Devices,
    /// Capture one frame directly from a camera (bypasses the daemon)
    Test {
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,
        /// Save the captured frame to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    tracing::debug!(command = ?cli.command, "running command");

    match cli.command {
        Commands::Devices => list_devices(),
        Commands::Test { device, output } => camera_test(&device, output),
        command => run_remote(command).await,
    }
}

async fn run_remote(command: Commands) -> Result<()> {
    let conn = zbus::Connection::session()
        .await
        .context("failed to connect to the session bus")?;
    let proxy = AttendanceProxy::new(&conn).await?;
    tracing::debug!(
        service = "org.rollcall.Attendance1",
        unique_name = ?conn.unique_name(),
        "connected to session bus"
    );

    match command {
        Commands::Start => {
            proxy.start().await.context("is rollcalld running?")?;
            println!("Recognition started");
        }
        Commands::Stop => {
            proxy.stop().await?;
            println!("Recognition stopped");
        }
        Commands::Finalize => {
            let json = proxy.finalize().await?;
            print_records(&json)?;
        }
        Commands::Records { date } => {
            let json = match date {
                Some(date) => proxy.records_by_date(&date).await?,
                None => proxy.records().await?,
            };
            print_records(&json)?;
        }
        Commands::Dates => {
            for date in proxy.dates().await? {
                println!("{date}");
            }
        }
        Commands::Stats => {
            let stats: Value = serde_json::from_str(&proxy.stats().await?)?;
            println!("Total:   {}", stats["total"]);
            println!("Present: {}", stats["presents"]);
            println!("Late:    {}", stats["retards"]);
            println!("Absent:  {}", stats["absents"]);
        }
        Commands::Status => {
            let status: Value = serde_json::from_str(&proxy.status().await?)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Snapshot { path } => {
            let jpeg = proxy.snapshot().await?;
            std::fs::write(&path, &jpeg)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Saved {} bytes to {}", jpeg.len(), path.display());
        }
        Commands::Devices | Commands::Test { .. } => {
            anyhow::bail!("camera diagnostics do not go through the daemon")
        }
    }

    Ok(())
}

fn print_records(json: &str) -> Result<()> {
    let records: Vec<Value> = serde_json::from_str(json)?;
    if records.is_empty() {
        println!("No records");
        return Ok(());
    }
    println!("{:<12} {:<24} {:<8} {:>5}", "DATE", "NAME", "STATUS", "LATE");
    for r in &records {
        let name = format!(
            "{} {}",
            r["first_name"].as_str().unwrap_or_default(),
            r["last_name"].as_str().unwrap_or_default()
        );
        println!(
            "{:<12} {:<24} {:<8} {:>5}",
            r["date"].as_str().unwrap_or_default(),
            name,
            r["status"].as_str().unwrap_or_default(),
            r["lateness_minutes"]
        );
    }
    Ok(())
}

fn list_devices() -> Result<()> {
    let devices = rollcall_hw::Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
    }
    for d in devices {
        println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
    }
    Ok(())
}

fn camera_test(device: &str, output: Option<PathBuf>) -> Result<()> {
    println!("Running camera diagnostics on {device}...");
    let mut camera = rollcall_hw::Camera::open(device)?;
    println!(
        "Opened {}: {}x{} {:?}",
        camera.device_path, camera.width, camera.height, camera.format
    );
    let frame = camera.next_frame()?;
    println!("Captured frame #{} ({}x{})", frame.sequence, frame.width(), frame.height());
    if let Some(path) = output {
        frame
            .image
            .save(&path)
            .with_context(|| format!("failed to save {}", path.display()))?;
        println!("Saved frame to {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_date_filter() {
        let cli = Cli::try_parse_from(["rollcall", "records", "--date", "2024-01-01"]).unwrap();
        assert!(matches!(cli.command, Commands::Records { date: Some(ref d) } if d == "2024-01-01"));
    }

    #[test]
    fn test_snapshot_requires_path() {
        assert!(Cli::try_parse_from(["rollcall", "snapshot"]).is_err());
        let cli = Cli::try_parse_from(["rollcall", "test", "-d", "/dev/video2"]).unwrap();
        assert!(matches!(cli.command, Commands::Test { ref device, output: None } if device == "/dev/video2"));
    }
}
