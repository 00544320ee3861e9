mod console;
mod gateway;
mod node;
mod store;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use kenet_protocol::{GeoPoint, NodeId, RuntimeConfig, StaticConnectivity};
use kenet_transport::LinkConfig;

use crate::node::{Node, Role};
use crate::store::{parse_key, SqliteStore};

#[derive(Parser)]
#[command(name = "kenet-node", about = "Kenet geographic store-and-forward relay node")]
struct Cli {
    /// SQLite store holding identity, contacts and messages.
    #[arg(long, default_value = "kenet.db")]
    db: PathBuf,

    /// Latitude of this device (or of the contact, for add-contact).
    #[arg(long, allow_negative_numbers = true)]
    lat: Option<f32>,

    /// Longitude of this device (or of the contact, for add-contact).
    #[arg(long, allow_negative_numbers = true)]
    lng: Option<f32>,

    /// This device has internet access and bridges gateway packets.
    #[arg(long)]
    internet: bool,

    /// Link port (default: KENET_LINK_PORT or 8888).
    #[arg(long)]
    port: Option<u16>,

    /// Public key of the SMS gateway server (hex), needed for /sms.
    #[arg(long)]
    gateway_key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create this device's identity and keypair.
    Init {
        /// Node id (the account's user id).
        id: String,
    },

    /// Print this device's id and public key.
    Identity,

    /// Register a contact's public key, and optionally its last known position.
    AddContact {
        id: String,
        /// X25519 public key (hex).
        public_key: String,
    },

    /// Act as group owner: accept links on the configured port.
    Listen,

    /// Dial the group owner.
    Connect {
        /// Host or IP of the group owner.
        host: String,
    },
}

impl Cli {
    fn position(&self) -> anyhow::Result<Option<GeoPoint>> {
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => {
                anyhow::ensure!(
                    (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lng),
                    "position ({lat}, {lng}) out of range"
                );
                Ok(Some(GeoPoint::new(lat, lng)))
            }
            (None, None) => Ok(None),
            _ => anyhow::bail!("--lat and --lng must be given together"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let position = cli.position()?;
    let store = SqliteStore::open(&cli.db)
        .with_context(|| format!("opening store {}", cli.db.display()))?;

    match &cli.command {
        Command::Init { id } => {
            let identity = store.init_identity(NodeId::new(id), position.unwrap_or_default())?;
            println!("id:         {}", identity.id);
            println!("public key: {}", hex::encode(identity.keys.public_key()));
            Ok(())
        }
        Command::Identity => {
            let identity = store.identity()?.context("no identity; run `kenet-node init` first")?;
            println!("id:         {}", identity.id);
            println!("position:   {}", identity.position);
            println!("public key: {}", hex::encode(identity.keys.public_key()));
            Ok(())
        }
        Command::AddContact { id, public_key } => {
            let id = NodeId::new(id);
            let key = parse_key(public_key).context("contact public key")?;
            store.add_contact(&id, key)?;
            if let Some(position) = position {
                store.set_location(&id, position)?;
            }
            eprintln!("contact {id} saved");
            Ok(())
        }
        Command::Listen => run(&cli, store, position, Role::Listen).await,
        Command::Connect { host } => run(&cli, store, position, Role::Connect(host.clone())).await,
    }
}

async fn run(
    cli: &Cli,
    store: SqliteStore,
    position: Option<GeoPoint>,
    role: Role,
) -> anyhow::Result<()> {
    if let Some(position) = position {
        store.set_position(position)?;
    }
    let identity = store
        .identity()?
        .context("no identity; run `kenet-node init` first")?;

    let mut link = LinkConfig::new();
    if let Some(port) = cli.port {
        link = link.port(port);
    }
    let runtime = RuntimeConfig {
        gateway_public_key: cli
            .gateway_key
            .as_deref()
            .map(parse_key)
            .transpose()
            .context("gateway public key")?,
        max_frame_len: link.get_max_frame_size(),
        ..RuntimeConfig::default()
    };

    eprintln!("kenet-node v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("id: {}  position: {}", identity.id, identity.position);
    eprintln!("public key: {}", hex::encode(identity.keys.public_key()));
    match &role {
        Role::Listen => eprintln!("listening on port {}", link.get_port()),
        Role::Connect(host) => eprintln!("connecting to {host}:{}", link.get_port()),
    }
    eprintln!("type /msg <id> <text>, /find <id>, /neighbors, /stats or /quit\n");

    let node = Node {
        role,
        link,
        runtime,
        store: Arc::new(store),
        connectivity: Arc::new(StaticConnectivity::new(cli.internet)),
    };
    node.run(console::spawn_stdin_reader()).await
}
