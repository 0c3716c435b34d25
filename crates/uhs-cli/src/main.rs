//! uhs: UHS hint container tool
//!
//! Commands:
//!   decode <file> [--json]          - print a container's hint tree
//!   encode <tree.json> -o <out>     - build a container from a JSON document
//!   verify <file>                   - decode, re-encode, and compare bytes
//!   config show                     - display current configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use uhs_core::config::UhsConfig;
use uhs_core::{Document, NodeKind};
use uhs_format::{Reader, Writer};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "uhs",
    version,
    about = "UHS hint container tool",
    long_about = "uhs: decode, encode, and verify UHS hint containers"
)]
struct Cli {
    /// Path to uhs.toml configuration file
    #[arg(long, short = 'c', env = "UHS_CONFIG", default_value = "uhs.toml")]
    config: PathBuf,

    /// Log level or filter directive (overrides config log.level)
    #[arg(long, env = "UHS_LOG")]
    log: Option<String>,

    /// Log format (overrides config log.format)
    #[arg(long, env = "UHS_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the hint tree stored in a container
    Decode {
        /// Container file
        file: PathBuf,
        /// Emit the whole document as JSON (attachments base64-encoded)
        #[arg(long)]
        json: bool,
    },

    /// Build a container from a JSON document
    ///
    /// The JSON shape is the one `uhs decode --json` prints. Node ids only
    /// need to be unique; references may point forward.
    Encode {
        /// JSON document
        tree: PathBuf,
        /// Output container path
        #[arg(long, short = 'o')]
        output: PathBuf,
    },

    /// Check that a container re-encodes to identical bytes
    Verify {
        /// Container file
        file: PathBuf,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = UhsConfig::load(&cli.config)
        .with_context(|| format!("loading config: {}", cli.config.display()))?;

    let level = cli.log.as_deref().unwrap_or(&config.log.level);
    let format = match cli.log_format {
        Some(format) => format,
        None if config.log.format == "json" => LogFormat::Json,
        None => LogFormat::Text,
    };
    init_logging(level, &format);
    debug!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "uhs starting"
    );

    match cli.command {
        Commands::Decode { file, json } => cmd_decode(&config, &file, json),
        Commands::Encode { tree, output } => cmd_encode(&config, &tree, &output),
        Commands::Verify { file } => cmd_verify(&config, &file),
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &cli.config),
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn read_container(config: &UhsConfig, path: &Path) -> Result<(Vec<u8>, Document)> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let doc = Reader::with_config(config.codec.clone())
        .decode(&bytes)
        .with_context(|| format!("decoding {}", path.display()))?;
    Ok((bytes, doc))
}

// ── `uhs decode` ──────────────────────────────────────────────────────────────

fn cmd_decode(config: &UhsConfig, path: &Path, json: bool) -> Result<()> {
    let (_, doc) = read_container(config, path)?;
    if json {
        let rendered = serde_json::to_string_pretty(&doc).context("serializing document to JSON")?;
        println!("{rendered}");
    } else {
        print!("{}", outline(&doc));
    }
    Ok(())
}

/// Indented one-line-per-node listing of a document
fn outline(doc: &Document) -> String {
    let mut out = String::new();
    for (depth, node) in doc.root.preorder() {
        out.push_str(&"  ".repeat(depth));
        out.push_str(&format!("{} {}", node.id, node.kind.name()));
        if let Some(title) = node.kind.title() {
            out.push_str(&format!(" {title:?}"));
        }
        if let Some(detail) = detail(&node.kind) {
            out.push(' ');
            out.push_str(&detail);
        }
        out.push('\n');
    }
    out
}

/// Kind-specific suffix for an outline line
fn detail(kind: &NodeKind) -> Option<String> {
    match kind {
        NodeKind::TextHint { text, link, .. } => {
            let mut parts = vec![format!("{} lines", text.line_count())];
            if text.encrypted {
                parts.push("encrypted".into());
            }
            if let Some(link) = link {
                parts.push(format!("see {link}"));
            }
            Some(format!("({})", parts.join(", ")))
        }
        NodeKind::NestedHint { text } if text.encrypted => {
            Some(format!("({} lines, encrypted)", text.line_count()))
        }
        NodeKind::NestedHint { text } => Some(format!("({} lines)", text.line_count())),
        NodeKind::BinaryAttachment { format, data, .. } => {
            Some(format!("({format:?}, {} bytes)", data.len()))
        }
        NodeKind::Link { target, .. } => Some(format!("-> {target}")),
        _ => None,
    }
}

// ── `uhs encode` ──────────────────────────────────────────────────────────────

fn cmd_encode(config: &UhsConfig, tree: &Path, output: &Path) -> Result<()> {
    let json = std::fs::read_to_string(tree).with_context(|| format!("reading {}", tree.display()))?;
    let doc: Document =
        serde_json::from_str(&json).with_context(|| format!("parsing {}", tree.display()))?;

    let encoded = Writer::new()
        .encode_with_layout(&doc)
        .with_context(|| format!("encoding {}", tree.display()))?;

    if config.codec.verify_roundtrip {
        let decoded = Reader::with_config(config.codec.clone())
            .decode(&encoded.bytes)
            .context("decoding freshly encoded container")?;
        if decoded.canonical_outline() != doc.canonical_outline() {
            anyhow::bail!(
                "round-trip check failed: decoded tree differs from {}",
                tree.display()
            );
        }
        debug!("round-trip check passed");
    }

    std::fs::write(output, &encoded.bytes)
        .with_context(|| format!("writing {}", output.display()))?;
    info!(
        output = %output.display(),
        bytes = encoded.bytes.len(),
        binary_base = encoded.layout.binary_base,
        "container written"
    );
    println!(
        "wrote {} ({} bytes, text segment {} bytes)",
        output.display(),
        encoded.bytes.len(),
        encoded.layout.binary_base
    );
    Ok(())
}

// ── `uhs verify` ──────────────────────────────────────────────────────────────

fn cmd_verify(config: &UhsConfig, path: &Path) -> Result<()> {
    let (original, doc) = read_container(config, path)?;
    let reencoded = Writer::new()
        .encode(&doc)
        .with_context(|| format!("re-encoding {}", path.display()))?;

    println!("original   {}  {} bytes", blake3::hash(&original).to_hex(), original.len());
    println!("re-encoded {}  {} bytes", blake3::hash(&reencoded).to_hex(), reencoded.len());

    if original == reencoded {
        println!("identical");
        return Ok(());
    }

    let first_diff = original
        .iter()
        .zip(&reencoded)
        .position(|(a, b)| a != b)
        .unwrap_or(original.len().min(reencoded.len()));
    anyhow::bail!(
        "{} does not re-encode identically (first difference at byte {first_diff})",
        path.display()
    )
}

// ── `uhs config show` ─────────────────────────────────────────────────────────

fn cmd_config_show(config: &UhsConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    print!("{}", config.to_toml()?);
    Ok(())
}
