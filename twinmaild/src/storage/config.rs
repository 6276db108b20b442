use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use structopt::StructOpt;

#[derive(Debug, PartialEq, Eq, Hash, Clone, StructOpt, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// path to the flat store document
    ///
    /// if no existing file is found, an empty store will be created
    #[structopt(long = "store-path", default_value = "store.json")]
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// directory holding the archived mail bodies, one file per mail
    #[structopt(long = "archive-dir", default_value = "mail")]
    #[serde(default = "default_archive_dir")]
    pub archive_dir: PathBuf,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("store.json")
}

fn default_archive_dir() -> PathBuf {
    PathBuf::from("mail")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            archive_dir: default_archive_dir(),
        }
    }
}
