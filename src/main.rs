//! Obscura - CLI
//!
//! Command-line interface over the photo repository.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use chrono::{NaiveDate, TimeZone, Utc};

use obscura::{ConfigStore, ExportFormat, FaceRegion, MaskMode, PhotoQuery, PhotoRepository};

#[derive(Parser)]
#[command(name = "obscura")]
#[command(version = obscura::VERSION)]
#[command(about = "Obscura - encrypted photo vault with face masking")]
struct Cli {
    /// Vault path
    #[arg(short, long, default_value = "./vault")]
    vault: PathBuf,

    /// App-lock PIN, required once one has been set
    #[arg(short, long)]
    pin: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum MaskModeArg {
    Blackout,
    Pixelate,
    Blur,
    Noise,
}

impl From<MaskModeArg> for MaskMode {
    fn from(arg: MaskModeArg) -> Self {
        match arg {
            MaskModeArg::Blackout => MaskMode::Blackout,
            MaskModeArg::Pixelate => MaskMode::Pixelate,
            MaskModeArg::Blur => MaskMode::Blur,
            MaskModeArg::Noise => MaskMode::Noise,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Jpeg,
    Png,
    Heic,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new vault
    Init,

    /// Set the app-lock PIN
    SetPin {
        /// New PIN
        new_pin: String,
    },

    /// Import a photo
    Import {
        /// Photo path
        path: PathBuf,
    },

    /// List all photos
    List,

    /// Search photos by metadata
    Search {
        /// Creation date lower bound (YYYY-MM-DD, inclusive)
        #[arg(long)]
        from: Option<String>,

        /// Creation date upper bound (YYYY-MM-DD, inclusive)
        #[arg(long)]
        to: Option<String>,

        /// Only photos with at least one face
        #[arg(long)]
        faces: bool,

        /// Exact mask mode
        #[arg(long)]
        mode: Option<MaskModeArg>,
    },

    /// Export a photo re-encoded as JPEG or PNG
    Export {
        /// Photo ID
        id: String,

        /// Output path
        output: PathBuf,

        #[arg(long, value_enum, default_value_t = FormatArg::Jpeg)]
        format: FormatArg,

        /// JPEG quality (1-100)
        #[arg(long, default_value_t = 90)]
        quality: u8,
    },

    /// Write a plaintext copy to a temp file for sharing
    Share {
        /// Photo ID
        id: String,
    },

    /// Run face detection and store the boxes
    Detect {
        /// Photo ID
        id: String,
    },

    /// Mask the selected face regions, replacing the photo content
    Mask {
        /// Photo ID
        id: String,

        #[arg(value_enum)]
        mode: MaskModeArg,

        /// Extra user-drawn region "x,y,w,h" in source pixels
        #[arg(long)]
        region: Option<String>,
    },

    /// Delete a photo
    Delete {
        /// Photo ID
        id: String,
    },

    /// Show vault statistics
    Stats,
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = ConfigStore::open(cli.vault.join("settings.json"))?;

    // The PIN gates UI access only; it is independent of the content key
    if config.is_pin_set() && !matches!(cli.command, Commands::SetPin { .. }) {
        match &cli.pin {
            Some(pin) if config.verify_pin(pin) => {}
            Some(_) => bail!("wrong PIN"),
            None => bail!("this vault has a PIN, pass it with --pin"),
        }
    }

    let repo = PhotoRepository::open(&cli.vault)?.with_thumbnail_edge(config.thumbnail_edge());

    match cli.command {
        Commands::Init => {
            // Touching the repository created the directory and key
            println!("🔐 Vault ready at: {}", cli.vault.display());
            println!("   Content blobs:    <id>.enc (AES-256-GCM)");
            println!("   Metadata records: <id>.json");
        }

        Commands::SetPin { new_pin } => {
            if config.is_pin_set() {
                match &cli.pin {
                    Some(pin) if config.verify_pin(pin) => {}
                    _ => bail!("changing the PIN requires the current one via --pin"),
                }
            }
            config.set_pin(&new_pin)?;
            println!("✅ PIN updated");
        }

        Commands::Import { path } => {
            let plaintext = std::fs::read(&path)
                .with_context(|| format!("cannot read {}", path.display()))?;
            let photo = repo.import_from_library(plaintext).await?;
            println!("✅ Imported as: {}", photo.id);
        }

        Commands::List => {
            let photos = repo.load_all_photos().await?;
            if photos.is_empty() {
                println!("📭 No photos in vault");
            } else {
                println!("📷 Photos in vault ({}):", photos.len());
                println!("{:-<72}", "");
                for photo in photos {
                    let rec = &photo.record;
                    println!(
                        "{}  {}  {:>9} bytes  faces:{}  mask:{:?}",
                        rec.id,
                        rec.created_at.format("%Y-%m-%d %H:%M"),
                        rec.file_size_bytes,
                        rec.faces.len(),
                        rec.mask_mode,
                    );
                }
            }
        }

        Commands::Search { from, to, faces, mode } => {
            let date_range = match (from, to) {
                (Some(from), Some(to)) => Some((parse_day_start(&from)?, parse_day_end(&to)?)),
                (Some(from), None) => Some((parse_day_start(&from)?, Utc::now())),
                (None, Some(to)) => Some((Utc.timestamp_opt(0, 0).unwrap(), parse_day_end(&to)?)),
                (None, None) => None,
            };

            let query = PhotoQuery {
                date_range,
                has_faces: faces.then_some(true),
                mask_mode: mode.map(MaskMode::from),
            };

            let photos = repo.load_photos_matching(&query).await?;
            println!("🔎 {} match(es)", photos.len());
            for photo in photos {
                println!("   {}", photo.id);
            }
        }

        Commands::Export { id, output, format, quality } => {
            let format = match format {
                FormatArg::Jpeg => ExportFormat::Jpeg { quality },
                FormatArg::Png => ExportFormat::Png,
                FormatArg::Heic => ExportFormat::Heic,
            };
            let bytes = repo.export_photo(&id, format).await?;
            std::fs::write(&output, &bytes)?;
            println!("📤 Exported to: {}", output.display());
        }

        Commands::Share { id } => {
            let path = repo.export_for_sharing(&id).await?;
            println!("⚠️  Plaintext share copy (remove when done):");
            println!("{}", path.display());
        }

        Commands::Detect { id } => {
            let photo = repo.detect_faces(&id).await?;
            println!("🙂 {} face(s) on record", photo.record.faces.len());
        }

        Commands::Mask { id, mode, region } => {
            if let Some(spec) = region {
                let rect = parse_region(&spec)?;
                let mut faces = repo.load_photo(&id).await?.record.faces;
                faces.push(rect);
                repo.update_face_detection_results(&id, faces).await?;
            }

            let photo = repo.apply_mask(&id, &[mode.into()]).await?;
            println!("🎭 Masked with {:?}; content replaced", photo.record.mask_mode);
        }

        Commands::Delete { id } => {
            repo.delete_photo(&id).await?;
            println!("🗑️  Deleted: {}", id);
        }

        Commands::Stats => {
            let photos = repo.load_all_photos().await?;
            let total_bytes: u64 = photos.iter().map(|p| p.record.file_size_bytes).sum();
            let with_faces = photos.iter().filter(|p| p.record.has_faces()).count();
            let masked = photos
                .iter()
                .filter(|p| p.record.mask_mode != MaskMode::None)
                .count();

            println!("📊 Obscura Vault Statistics");
            println!("{:-<40}", "");
            println!("Photos:        {}", photos.len());
            println!("With faces:    {}", with_faces);
            println!("Masked:        {}", masked);
            println!("Content bytes: {}", total_bytes);
        }
    }

    Ok(())
}

fn parse_day_start(day: &str) -> anyhow::Result<chrono::DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .with_context(|| format!("bad date: {}", day))?;
    Ok(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap()))
}

fn parse_day_end(day: &str) -> anyhow::Result<chrono::DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .with_context(|| format!("bad date: {}", day))?;
    Ok(Utc.from_utc_datetime(&date.and_hms_opt(23, 59, 59).unwrap()))
}

/// Parse "x,y,w,h" into a user-drawn face region
fn parse_region(spec: &str) -> anyhow::Result<FaceRegion> {
    let parts: Vec<f32> = spec
        .split(',')
        .map(|p| p.trim().parse::<f32>())
        .collect::<Result<_, _>>()
        .with_context(|| format!("bad region: {}", spec))?;
    if parts.len() != 4 {
        bail!("region must be x,y,w,h");
    }
    Ok(FaceRegion::user_drawn(parts[0], parts[1], parts[2], parts[3]))
}
