//! Dump every revision of every selected key as a stream of YAML
//! documents, one per revision.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use serde_yaml::Value;

use datawatch::datadiff::{Collection, LoadMode};
use datawatch::storage::LocalFileStorage;

/// Dump every revision of every selected key as YAML.
#[derive(Debug, Parser)]
#[command(name = "yamlcat", version, about)]
struct Args {
    /// Input directory containing datawatch data.
    #[arg(long = "data-dir", default_value = "./datawatch-storage")]
    data_dir: PathBuf,

    /// Emit a revision even when it is identical to the one before it.
    #[arg(long = "include-unchanged")]
    include_unchanged: bool,

    /// Omit the revision's data from the output.
    #[arg(long = "omit-data")]
    omit_data: bool,

    /// Add keyhash/length/content-hash metadata to each document.
    #[arg(long = "extra-info")]
    extra_info: bool,

    /// Select only a specific set of keys; if empty, every key is dumped.
    #[arg(long = "select-key")]
    select_key: Vec<String>,

    /// How to render the `value` field: `auto` (UTF-8 if valid, else
    /// raw bytes), `raw` (always bytes), or `string` (force UTF-8,
    /// lossily).
    #[arg(long = "value-type", default_value = "auto")]
    value_type: String,
}

#[derive(Serialize)]
struct ExtraInfo {
    keyhash: String,
    data_length: usize,
    data_hash: String,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    if !["auto", "raw", "string"].contains(&args.value_type.as_str()) {
        anyhow::bail!("unknown or unhandled --value-type: {:?}", args.value_type);
    }

    let storage = Arc::new(LocalFileStorage::new(&args.data_dir)?);
    let keyhash_codecs = datawatch::methods::Codecs::new();
    let mut collection = Collection::new(storage, datawatch::methods::Codecs::new(), LoadMode::FullHistory);

    let key_filter = if args.select_key.is_empty() { None } else { Some(args.select_key.as_slice()) };

    let mut stdout = std::io::stdout();
    for revision in collection.read_streaming(key_filter, args.include_unchanged)? {
        let mut record: BTreeMap<String, Value> = BTreeMap::new();
        record.insert("key".to_string(), Value::String(revision.key.clone()));
        record.insert("data_version".to_string(), Value::String(revision.version));
        if args.extra_info {
            let info = ExtraInfo {
                keyhash: keyhash_codecs.key_hash(&revision.key).digest,
                data_length: revision.data.len(),
                data_hash: keyhash_codecs.content_hash(&revision.data).digest,
            };
            record.insert("info".to_string(), serde_yaml::to_value(&info)?);
        }
        if !args.omit_data {
            record.insert("value".to_string(), value_for(&revision.data, &args.value_type));
        }
        // `to_writer` already emits a leading `---`; append the matching
        // `...` so each revision is a self-delimited document in the
        // stream.
        serde_yaml::to_writer(&mut stdout, &record)?;
        use std::io::Write;
        writeln!(stdout, "...")?;
    }
    Ok(())
}

fn value_for(data: &[u8], value_type: &str) -> Value {
    match value_type {
        "raw" => Value::Sequence(data.iter().map(|b| Value::Number((*b as u64).into())).collect()),
        "string" => Value::String(String::from_utf8_lossy(data).into_owned()),
        _ => match std::str::from_utf8(data) {
            Ok(s) => Value::String(s.to_string()),
            Err(_) => Value::Sequence(data.iter().map(|b| Value::Number((*b as u64).into())).collect()),
        },
    }
}
