//! Pipe every selected revision's bytes into a script's stdin, one
//! invocation per revision, copying each invocation's stdout to a
//! shared output sink.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;

use clap::Parser;

use datawatch::datadiff::{Collection, LoadMode};
use datawatch::methods::Codecs;
use datawatch::storage::LocalFileStorage;

/// Reduce every selected revision by piping it through an external
/// script.
#[derive(Debug, Parser)]
#[command(name = "reducer", version, about)]
struct Args {
    /// Script binary to invoke once per revision, as `script key
    /// version` with the revision's bytes on stdin.
    #[arg(long)]
    script: PathBuf,

    /// Input directory containing datawatch data.
    #[arg(long = "data-dir", default_value = "./datawatch-storage")]
    data_dir: PathBuf,

    /// Invoke the script even for revisions identical to the one
    /// before them.
    #[arg(long = "include-unchanged")]
    include_unchanged: bool,

    /// Allow overwriting an existing output file.
    #[arg(long = "allow-overwrite")]
    allow_overwrite: bool,

    /// Output file, or `-` for stdout.
    #[arg(long, default_value = "-")]
    output: String,

    /// Select only a specific set of keys; if empty, every key is
    /// reduced.
    #[arg(long = "select-key")]
    select_key: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let storage = Arc::new(LocalFileStorage::new(&args.data_dir)?);
    let mut collection = Collection::new(storage, Codecs::new(), LoadMode::FullHistory);

    let key_filter = if args.select_key.is_empty() { None } else { Some(args.select_key.as_slice()) };

    let mut sink: Box<dyn Write> = if args.output == "-" {
        Box::new(std::io::stdout())
    } else {
        let mut open_options = OpenOptions::new();
        open_options.write(true).create(true);
        if args.allow_overwrite {
            open_options.truncate(true);
        } else {
            open_options.create_new(true);
        }
        Box::new(open_options.open(&args.output)?)
    };

    for revision in collection.read_streaming(key_filter, args.include_unchanged)? {
        run_script(&args.script, &revision.key, &revision.version, &revision.data, &mut sink)?;
    }
    Ok(())
}

fn run_script(
    script: &PathBuf,
    key: &str,
    version: &str,
    data: &[u8],
    sink: &mut dyn Write,
) -> anyhow::Result<()> {
    let mut child = Command::new(script)
        .arg(key)
        .arg(version)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()?;
    child.stdin.take().expect("stdin was requested as piped").write_all(data)?;
    let output = child.wait_with_output()?;
    if !output.status.success() {
        anyhow::bail!("script {} exited with {}", script.display(), output.status);
    }
    sink.write_all(&output.stdout)?;
    Ok(())
}
