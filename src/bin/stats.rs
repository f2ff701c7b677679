//! Per-key revision/byte-count summary over a storage directory,
//! printed as tab-separated rows: revisions, revisions-with-diff, total
//! bytes, total bytes belonging to a diffed revision, key hash, key.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use datawatch::datadiff::{Collection, LoadMode};
use datawatch::methods::Codecs;
use datawatch::storage::LocalFileStorage;

/// Print a tab-separated revision/byte-count summary for every key.
#[derive(Debug, Parser)]
#[command(name = "stats", version, about)]
struct Args {
    /// Input directory containing datawatch data.
    #[arg(long = "data-dir", default_value = "./datawatch-storage")]
    data_dir: PathBuf,

    /// Select only a specific set of keys; if empty, every key is
    /// summarized.
    #[arg(long = "select-key")]
    select_key: Vec<String>,
}

#[derive(Default)]
struct Totals {
    num_revisions: u64,
    num_revisions_with_diff: u64,
    total_bytes: u64,
    total_bytes_with_diff: u64,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let storage = Arc::new(LocalFileStorage::new(&args.data_dir)?);
    let keyhash_codecs = Codecs::new();
    let mut collection = Collection::new(storage, Codecs::new(), LoadMode::FullHistory);

    let keys = if args.select_key.is_empty() {
        collection.discover_keys()?
    } else {
        args.select_key.clone()
    };

    for key in keys {
        let Some(entry) = collection.entry(&key)? else {
            log::warn!("no data found for selected key {key:?}");
            continue;
        };
        let mut totals = Totals::default();
        let mut previous: Option<&datawatch::Incarnation> = None;
        for incarnation in entry.incarnations() {
            let diff = match previous {
                Some(prev) => !incarnation.same_data_as(prev),
                None => true,
            };
            totals.num_revisions += 1;
            totals.total_bytes += incarnation.data().len() as u64;
            if diff {
                totals.num_revisions_with_diff += 1;
                totals.total_bytes_with_diff += incarnation.data().len() as u64;
            }
            previous = Some(incarnation);
        }
        let keyhash = keyhash_codecs.key_hash(&key).digest;
        println!(
            "{}\t{}\t{}\t{}\t{}\t{}",
            totals.num_revisions,
            totals.num_revisions_with_diff,
            totals.total_bytes,
            totals.total_bytes_with_diff,
            keyhash,
            key,
        );
    }

    Ok(())
}
