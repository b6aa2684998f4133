use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[zbus::proxy(
    interface = "org.outreach.Gallery1",
    default_service = "org.outreach.Gallery1",
    default_path = "/org/outreach/Gallery1"
)]
trait Gallery {
    fn identify(&self, descriptor: Vec<f64>) -> zbus::Result<String>;
    fn identify_image(&self, image: Vec<u8>) -> zbus::Result<String>;
    fn enroll(&self, identity: &str, image: Vec<u8>) -> zbus::Result<String>;
    fn enroll_batch(&self, identity: &str, images: Vec<Vec<u8>>) -> zbus::Result<String>;
    fn list_gallery(&self) -> zbus::Result<String>;
    fn list_descriptors(&self, identity: &str) -> zbus::Result<String>;
    fn create_identity(&self, label: &str, external_ref: &str) -> zbus::Result<String>;
    fn remove_descriptor(&self, descriptor_id: &str) -> zbus::Result<bool>;
    fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "outreach", about = "Outreach face gallery CLI")]
struct Cli {
    /// Talk to the daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Identify a descriptor stored as a JSON array of 128 numbers
    Identify {
        /// Path to the JSON file ("-" for stdin)
        descriptor: PathBuf,
    },
    /// Identify the face in an image
    IdentifyImage { image: PathBuf },
    /// Enroll one or more images for an identity
    Enroll {
        /// Identity id or external reference (case / personal id)
        #[arg(short, long)]
        identity: String,
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// List enrolled identities
    List,
    /// Show descriptor samples for one identity
    Samples { identity: String },
    /// Remove an enrolled descriptor
    Remove {
        /// Descriptor ID to remove
        id: String,
    },
    /// Manage identities
    Identity {
        #[command(subcommand)]
        command: IdentityCommands,
    },
    /// Show daemon status
    Status,
}

#[derive(Subcommand)]
enum IdentityCommands {
    /// Register a new identity
    Add {
        label: String,
        /// External reference such as a case or personal id
        #[arg(long)]
        external_ref: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = if cli.system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .context("connecting to D-Bus")?;
    let proxy = GalleryProxy::new(&conn)
        .await
        .context("outreachd not reachable")?;

    match cli.command {
        Commands::Identify { descriptor } => {
            let values = read_descriptor(&descriptor)?;
            print_json(&proxy.identify(values).await?)?;
        }
        Commands::IdentifyImage { image } => {
            let bytes = read_file(&image)?;
            print_json(&proxy.identify_image(bytes).await?)?;
        }
        Commands::Enroll { identity, images } => {
            let mut uploads = Vec::new();
            let mut sent = Vec::new();
            let mut unreadable = 0usize;
            for path in &images {
                match read_file(path) {
                    Ok(bytes) => {
                        uploads.push(bytes);
                        sent.push(path.as_path());
                    }
                    Err(e) => {
                        unreadable += 1;
                        println!("{}: rejected ({e:#})", path.display());
                    }
                }
            }
            if uploads.is_empty() {
                bail!("none of the {} images could be read", images.len());
            }

            let reply: serde_json::Value = serde_json::from_str(&proxy.enroll_batch(&identity, uploads).await?)?;
            let (lines, accepted, rejected) = describe_batch(&sent, &reply)?;
            for line in lines {
                println!("{line}");
            }
            println!("accepted: {accepted}, rejected: {}", rejected + unreadable);
        }
        Commands::List => print_json(&proxy.list_gallery().await?)?,
        Commands::Samples { identity } => print_json(&proxy.list_descriptors(&identity).await?)?,
        Commands::Remove { id } => {
            if proxy.remove_descriptor(&id).await? {
                println!("Removed descriptor {id}");
            } else {
                println!("No descriptor {id}; nothing to remove");
            }
        }
        Commands::Identity {
            command: IdentityCommands::Add { label, external_ref },
        } => {
            let reply = proxy
                .create_identity(&label, external_ref.as_deref().unwrap_or(""))
                .await?;
            print_json(&reply)?;
        }
        Commands::Status => print_json(&proxy.status().await?)?,
    }

    Ok(())
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}

fn read_descriptor(path: &Path) -> Result<Vec<f64>> {
    let text = if path.as_os_str() == "-" {
        std::io::read_to_string(std::io::stdin())?
    } else {
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?
    };
    parse_descriptor(&text)
}

/// Accepts a bare array or an object with a `descriptor` field.
fn parse_descriptor(text: &str) -> Result<Vec<f64>> {
    let value: serde_json::Value = serde_json::from_str(text).context("descriptor is not valid JSON")?;
    let array = match &value {
        serde_json::Value::Array(_) => &value,
        serde_json::Value::Object(map) => map
            .get("descriptor")
            .context("JSON object has no \"descriptor\" field")?,
        _ => bail!("descriptor must be a JSON array of numbers"),
    };
    let values: Vec<f64> = serde_json::from_value(array.clone()).context("descriptor must contain only numbers")?;
    Ok(values)
}

/// Per-image lines for an EnrollBatch reply, plus its accepted/rejected totals.
fn describe_batch(paths: &[&Path], reply: &serde_json::Value) -> Result<(Vec<String>, usize, usize)> {
    if reply["ok"] != true {
        bail!("enrollment refused: {}", reply["message"].as_str().unwrap_or("unknown error"));
    }
    let samples = reply["samples"].as_array().context("reply has no samples")?;
    let lines = paths
        .iter()
        .zip(samples)
        .map(|(path, sample)| match sample["status"].as_str() {
            Some("accepted") => format!("{}: enrolled as {}", path.display(), sample["descriptor_id"]),
            _ => match sample["detail"].as_str() {
                Some(detail) => format!("{}: rejected ({}: {detail})", path.display(), sample["reason"]),
                None => format!("{}: rejected ({})", path.display(), sample["reason"]),
            },
        })
        .collect();
    let count = |key: &str| reply[key].as_u64().unwrap_or(0) as usize;
    Ok((lines, count("accepted"), count("rejected")))
}

fn print_json(reply: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(reply)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
