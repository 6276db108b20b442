use anyhow::{bail, Context as _, Result};
use std::path::PathBuf;
use structopt::StructOpt;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use twinmail_proto as proto;
use twinmail_storage::Store;
use twinmaild::{auth, Config};

#[derive(StructOpt, Debug)]
struct Args {
    /// set log levels
    ///
    /// useful for trying to debug some operations happening
    /// while executing some of the commands
    #[structopt(long = "log-level", default_value = "warn", global = true)]
    log_level: Level,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// print the default configuration to the standard output
    DefaultConfig,

    /// register a new user in the node's store
    NewUser {
        /// path of the configuration file of the node
        #[structopt(long = "config")]
        config: PathBuf,

        /// name of the user to register
        username: String,

        /// set the password instead of having it prompted for
        #[structopt(long = "password", env = "TWINMAILD_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// remove a user along with their tokens and inbox
    DeleteUser {
        /// path of the configuration file of the node
        #[structopt(long = "config")]
        config: PathBuf,

        /// name of the user to remove
        username: String,
    },

    /// add a host to the ring of peers synced on every tick
    AddPeer {
        /// path of the configuration file of the node
        #[structopt(long = "config")]
        config: PathBuf,

        /// hostname (or host:port) of the peer
        host: String,
    },

    /// remove a host from the ring of peers
    RemovePeer {
        /// path of the configuration file of the node
        #[structopt(long = "config")]
        config: PathBuf,

        /// hostname (or host:port) of the peer
        host: String,
    },

    /// introduce this node to a remote peer so it starts pulling from us
    Announce {
        /// path of the configuration file of the node
        #[structopt(long = "config")]
        config: PathBuf,

        /// hostname (or host:port) of the peer to greet
        host: String,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::from_args();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let result = match args.cmd {
        Command::DefaultConfig => default_config().await,
        Command::NewUser {
            config,
            username,
            password,
        } => new_user(config, username, password)
            .await
            .context("Cannot register the new user"),
        Command::DeleteUser { config, username } => delete_user(config, username)
            .await
            .context("Cannot delete the user"),
        Command::AddPeer { config, host } => {
            add_peer(config, host).await.context("Cannot add the peer")
        }
        Command::RemovePeer { config, host } => remove_peer(config, host)
            .await
            .context("Cannot remove the peer"),
        Command::Announce { config, host } => announce(config, host)
            .await
            .context("Cannot announce the node to the peer"),
    };

    if let Err(error) = result {
        eprintln!("{:#?}", error);
        std::process::exit(1);
    }
}

async fn default_config() -> Result<()> {
    println!("{}", Config::EXAMPLE);
    Ok(())
}

async fn open_store(config: PathBuf) -> Result<(Config, Store)> {
    let config = Config::from_file(config)?;
    let store = Store::open(&config.storage.store_path)
        .await
        .context("Cannot open the store")?;
    Ok((config, store))
}

async fn new_user(config: PathBuf, username: String, password: Option<String>) -> Result<()> {
    let (_, store) = open_store(config).await?;

    let password = if let Some(password) = password {
        tracing::info!("using password from environment or command line parameter");
        password
    } else {
        dialoguer::Password::new()
            .allow_empty_password(false)
            .with_prompt("Enter password")
            .with_confirmation("Confirm password", "Passwords do not match")
            .interact()
            .context("Failed gather password")?
    };

    let hash = auth::hash_password(&password)?;
    store.create_user(&username, &hash).await?;

    println!("created user {}", username);
    Ok(())
}

async fn delete_user(config: PathBuf, username: String) -> Result<()> {
    let (_, store) = open_store(config).await?;

    if store.delete_user(&username).await? {
        println!("deleted user {}", username);
    } else {
        println!("no such user {}", username);
    }
    Ok(())
}

async fn add_peer(config: PathBuf, host: String) -> Result<()> {
    let (_, store) = open_store(config).await?;

    if store.ring_add(&host).await? {
        println!("added peer {}", host);
    } else {
        println!("peer {} already in the ring", host);
    }
    Ok(())
}

async fn remove_peer(config: PathBuf, host: String) -> Result<()> {
    let (_, store) = open_store(config).await?;

    if store.ring_remove(&host).await? {
        println!("removed peer {}", host);
    } else {
        println!("peer {} not in the ring", host);
    }
    Ok(())
}

async fn announce(config: PathBuf, host: String) -> Result<()> {
    let config = Config::from_file(config)?;

    let client = proto::Client::new(&host, config.federation.peer_port);
    let mut body = proto::TextBlock::new();
    body.set("host", config.server.hostname.clone());

    let response = client.send(proto::Command::CallMe, &body).await?;
    if !response.status.is_success() {
        bail!("peer {} answered with status {}", host, response.status);
    }

    println!("announced {} to {}", config.server.hostname, host);
    Ok(())
}
