use anyhow::Context as _;
use std::path::PathBuf;
use structopt::StructOpt;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use twinmaild::{
    auth::Auth,
    federation::Federation,
    server::{Node, Server},
    storage::Storage,
    Config,
};

#[derive(StructOpt, Debug)]
struct Args {
    /// set log levels
    ///
    /// useful for trying to debug some operations happening
    /// while executing some of the commands
    #[structopt(long = "log-level", default_value = "info", global = true)]
    log_level: Level,

    /// path of the configuration file of the node
    #[structopt(long = "config")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    if let Err(error) = main_run().await {
        eprintln!("{:?}", error);
        std::process::exit(1);
    }
}

async fn main_run() -> anyhow::Result<()> {
    let args = Args::from_args();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    let config = Config::from_file(args.config).context("cannot load initial settings")?;

    let storage = Storage::new(&config.storage)
        .await
        .context("Cannot load storage")?;
    let auth = Auth::new(storage.store().clone());
    let (federation, federation_handle) = Federation::new(
        storage.clone(),
        config.server.hostname.clone(),
        config.federation.clone(),
    );
    let server = Server::new(Node {
        config: config.server,
        storage,
        auth,
        federation: federation_handle,
    })
    .await
    .context("Cannot start the server task")?;

    println!("ctrl-c to stop the node...");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shuting down via CTRL-C instruction")
        }
    }

    server
        .shutdown()
        .await
        .context("Cannot shutdown the server task")?;
    federation
        .shutdown()
        .await
        .context("Cannot shutdown the federation task")?;

    // give an extra 200ms for the system to stop the associated tasks properly
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    Ok(())
}
