//! pgpb: pgpbridge command-line interface
//!
//! Commands:
//!   keygen              - create a key-ring pair in a directory
//!   import              - add another party's public key to the public ring
//!   encrypt             - encrypt to every key whose user id matches
//!   decrypt             - decrypt with the private ring
//!   config show         - display current configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use secrecy::SecretString;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use pgpb_core::config::{BridgeConfig, PROPERTY_KEYS};
use pgpb_core::PropertySource;
use pgpb_crypto::{KeyGenOptions, KeyRingLayout, PgpBridge};
use pgpb_log::DebugLogger;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "pgpb",
    version,
    about = "pgpbridge encrypt/decrypt client",
    long_about = "pgpb: encrypt and decrypt files against a key-ring directory"
)]
struct Cli {
    /// Path to pgpbridge.toml configuration file
    #[arg(long, short = 'c', env = "PGPB_CONFIG", default_value = "/etc/pgpb/pgpbridge.toml")]
    config: PathBuf,

    /// Console log filter (overridden by RUST_LOG)
    #[arg(long, default_value = "warn")]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new key-ring pair
    ///
    /// The passphrase is read from PGPB_PASSPHRASE or prompted for.
    Keygen {
        /// Key-ring directory (default: [pgp] key_ring_dir)
        #[arg(long, short = 'd', env = "RING_DIR_PATH")]
        dir: Option<PathBuf>,
        /// User id stored next to the public key
        #[arg(long, short = 'u')]
        user_id: String,
        /// Replace an existing pair
        #[arg(long)]
        force: bool,
        #[arg(long, env = "PGPB_PASSPHRASE", hide_env_values = true, hide = true)]
        passphrase: Option<String>,
    },

    /// Add a public key to the public ring
    Import {
        #[arg(long, short = 'd', env = "RING_DIR_PATH")]
        dir: Option<PathBuf>,
        /// Recipient public key (age1…)
        #[arg(long, short = 'k')]
        key: String,
        #[arg(long, short = 'u')]
        user_id: String,
    },

    /// Encrypt to all keys whose user id contains RECIPIENT
    Encrypt {
        #[arg(long, short = 'd', env = "RING_DIR_PATH")]
        dir: Option<PathBuf>,
        #[arg(long, short = 'r')]
        recipient: String,
        /// Input file (default: stdin)
        #[arg(long, short = 'i')]
        input: Option<PathBuf>,
        /// Output file (default: stdout)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Decrypt with the private ring
    ///
    /// The passphrase is read from PRIVATE_KEY_PASSCODE or prompted for.
    Decrypt {
        #[arg(long, short = 'd', env = "RING_DIR_PATH")]
        dir: Option<PathBuf>,
        #[arg(long, short = 'i')]
        input: Option<PathBuf>,
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
        #[arg(long, env = "PRIVATE_KEY_PASSCODE", hide_env_values = true, hide = true)]
        passphrase: Option<String>,
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

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = BridgeConfig::load(&cli.config)
        .with_context(|| format!("loading config: {}", cli.config.display()))?;

    let props = config.properties();
    let debug_logger = pgpb_log::init_global(&props);
    pgpb_crypto::init_global_pool(&props);
    init_logging(&cli.log, debug_logger);

    if !cli.config.exists() {
        tracing::warn!("config file not found: {}  (using defaults)", cli.config.display());
    }

    match cli.command {
        Commands::Keygen {
            dir,
            user_id,
            force,
            passphrase,
        } => cmd_keygen(&config, dir, &user_id, force, passphrase),
        Commands::Import { dir, key, user_id } => cmd_import(&config, dir, &key, &user_id),
        Commands::Encrypt {
            dir,
            recipient,
            input,
            output,
        } => cmd_encrypt(&config, dir, &recipient, input.as_deref(), output.as_deref()),
        Commands::Decrypt {
            dir,
            input,
            output,
            passphrase,
        } => cmd_decrypt(&config, dir, input.as_deref(), output.as_deref(), passphrase),
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &cli.config, &props),
    }
}

/// Console output plus the bridge's debug files.
fn init_logging(level: &str, debug_logger: &'static DebugLogger) {
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    logging_subscriber(filter, debug_logger).init();
}

/// The console layer is filtered by `filter`; the debug layer applies the
/// logger's own level masks and sees every event.
fn logging_subscriber(
    filter: EnvFilter,
    debug_logger: &'static DebugLogger,
) -> impl tracing::Subscriber + Send + Sync + 'static {
    use tracing_subscriber::{fmt, layer::SubscriberExt, Layer};

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_filter(filter))
        .with(pgpb_log::DebugLogLayer::new(debug_logger))
}

fn ring_dir(config: &BridgeConfig, dir: Option<PathBuf>) -> Result<PathBuf> {
    dir.or_else(|| config.pgp.key_ring_dir.clone()).context(
        "no key-ring directory: pass --dir, set RING_DIR_PATH, or set [pgp] key_ring_dir",
    )
}

fn passphrase(
    given: Option<String>,
    prompt: &str,
    confirm: bool,
) -> Result<SecretString> {
    if let Some(p) = given {
        return Ok(SecretString::from(p));
    }
    let first = rpassword::prompt_password(prompt).context("reading passphrase")?;
    if confirm {
        let second = rpassword::prompt_password("Repeat passphrase: ")
            .context("reading passphrase")?;
        if first != second {
            anyhow::bail!("passphrases do not match");
        }
    }
    Ok(SecretString::from(first))
}

fn read_input(path: Option<&Path>) -> Result<Vec<u8>> {
    match path {
        Some(p) => std::fs::read(p).with_context(|| format!("reading {}", p.display())),
        None => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .context("reading stdin")?;
            Ok(buf)
        }
    }
}

fn write_output(path: Option<&Path>, data: &[u8]) -> Result<()> {
    match path {
        Some(p) => std::fs::write(p, data).with_context(|| format!("writing {}", p.display())),
        None => {
            let mut out = std::io::stdout().lock();
            out.write_all(data).context("writing stdout")?;
            out.flush().context("flushing stdout")
        }
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

fn cmd_keygen(
    config: &BridgeConfig,
    dir: Option<PathBuf>,
    user_id: &str,
    force: bool,
    given: Option<String>,
) -> Result<()> {
    let dir = ring_dir(config, dir)?;
    let pass = passphrase(given, "New passphrase: ", true)?;
    let layout = KeyRingLayout::from(&config.pgp);

    let public = pgpb_crypto::generate_key_ring_pair(
        &dir,
        &layout,
        user_id,
        &pass,
        &KeyGenOptions {
            work_factor: None,
            overwrite: force,
        },
    )
    .with_context(|| format!("creating key ring in {}", dir.display()))?;

    tracing::info!(dir = %dir.display(), "key ring pair created");
    println!("public key: {public}");
    println!("  public ring: {}", layout.public_path(&dir).display());
    println!("  private ring: {}", layout.secret_path(&dir).display());
    Ok(())
}

fn cmd_import(config: &BridgeConfig, dir: Option<PathBuf>, key: &str, user_id: &str) -> Result<()> {
    let dir = ring_dir(config, dir)?;
    let layout = KeyRingLayout::from(&config.pgp);
    pgpb_crypto::add_public_key(&dir, &layout, key, user_id)
        .with_context(|| format!("importing key into {}", dir.display()))?;
    println!("added {user_id} to {}", layout.public_path(&dir).display());
    Ok(())
}

fn cmd_encrypt(
    config: &BridgeConfig,
    dir: Option<PathBuf>,
    recipient: &str,
    input: Option<&Path>,
    output: Option<&Path>,
) -> Result<()> {
    let dir = ring_dir(config, dir)?;
    let plaintext = read_input(input)?;

    let bridge = PgpBridge::with_layout(pgpb_crypto::global_pool(), KeyRingLayout::from(&config.pgp));
    let ciphertext = bridge.encrypt(&plaintext, recipient, &dir)?;

    tracing::debug!(bytes = ciphertext.len(), "encrypted");
    write_output(output, &ciphertext)
}

fn cmd_decrypt(
    config: &BridgeConfig,
    dir: Option<PathBuf>,
    input: Option<&Path>,
    output: Option<&Path>,
    given: Option<String>,
) -> Result<()> {
    let dir = ring_dir(config, dir)?;
    let ciphertext = read_input(input)?;
    let pass = passphrase(given, "Passphrase: ", false)?;

    let bridge = PgpBridge::with_layout(pgpb_crypto::global_pool(), KeyRingLayout::from(&config.pgp));
    let plaintext = bridge.decrypt(&ciphertext, &pass, &dir)?;

    tracing::debug!(bytes = plaintext.len(), "decrypted");
    write_output(output, &plaintext)
}

fn cmd_config_show(
    config: &BridgeConfig,
    config_path: &Path,
    props: &dyn PropertySource,
) -> Result<()> {
    let origin = if config_path.exists() {
        format!("from {}", config_path.display())
    } else {
        format!("defaults, no file at {}", config_path.display())
    };
    println!("# pgpbridge configuration ({origin})");
    println!();
    print!(
        "{}",
        toml::to_string_pretty(config).context("rendering config as TOML")?
    );
    println!();
    println!("# Effective properties (environment over file)");
    print!("{}", render_properties(props));
    Ok(())
}

/// One `KEY = value` line per bridge property, `(unset)` when absent.
fn render_properties(props: &dyn PropertySource) -> String {
    PROPERTY_KEYS
        .iter()
        .map(|key| match props.get(key) {
            Some(value) => format!("# {key} = {value}\n"),
            None => format!("# {key} = (unset)\n"),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgpb_core::config::{DEBUG_LOG_LEVELS_PROP, FREE_LIST_CAPACITY_PROP, LOG_FILE_PROP};
    use pgpb_core::MapSource;

    #[test]
    fn cli_parses_encrypt() {
        let cli = Cli::try_parse_from([
            "pgpb", "encrypt", "--dir", "/rings", "-r", "ops", "-i", "in.csv",
        ])
        .unwrap();
        match cli.command {
            Commands::Encrypt {
                dir,
                recipient,
                input,
                output,
            } => {
                assert_eq!(dir, Some(PathBuf::from("/rings")));
                assert_eq!(recipient, "ops");
                assert_eq!(input, Some(PathBuf::from("in.csv")));
                assert!(output.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn ring_dir_falls_back_to_config() {
        let mut config = BridgeConfig::default();
        assert!(ring_dir(&config, None).is_err());

        config.pgp.key_ring_dir = Some(PathBuf::from("/etc/pgpb/rings"));
        assert_eq!(ring_dir(&config, None).unwrap(), PathBuf::from("/etc/pgpb/rings"));
        assert_eq!(
            ring_dir(&config, Some(PathBuf::from("/tmp/r"))).unwrap(),
            PathBuf::from("/tmp/r")
        );
    }

    #[test]
    fn render_properties_lists_every_key() {
        let props = MapSource::default()
            .with(DEBUG_LOG_LEVELS_PROP, "0 62")
            .with(FREE_LIST_CAPACITY_PROP, "4");
        let rendered = render_properties(&props);

        assert_eq!(rendered.lines().count(), PROPERTY_KEYS.len());
        assert!(rendered.contains("# DEBUG_LOG_LEVELS = 0 62\n"));
        assert!(rendered.contains("# LOG_FILE = (unset)\n"));
        assert!(rendered.contains("# PGP_FREE_LIST_CAPACITY = 4\n"));
    }

    #[test]
    fn debug_files_receive_events_below_console_level() {
        let tmp = tempfile::TempDir::new().unwrap();
        let props = MapSource::default()
            .with(DEBUG_LOG_LEVELS_PROP, "2")
            .with(LOG_FILE_PROP, tmp.path().join("cli").display().to_string());
        let logger: &'static DebugLogger = Box::leak(Box::new(DebugLogger::from_properties(&props)));

        let subscriber = logging_subscriber(EnvFilter::new("warn"), logger);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(dir = "/rings", "key ring pair created");
        });

        let content = std::fs::read_to_string(tmp.path().join("cli.native")).unwrap();
        assert!(content.contains("] [002] ["), "{content}");
        assert!(content.ends_with("key ring pair created dir=/rings\n"), "{content}");
    }

    #[test]
    fn given_passphrase_skips_prompt() {
        use secrecy::ExposeSecret;
        let pass = passphrase(Some("pw".into()), "unused: ", true).unwrap();
        assert_eq!(pass.expose_secret(), "pw");
    }
}
