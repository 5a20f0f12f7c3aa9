use std::{fs::OpenOptions, io, path::Path};

use env_logger::{Builder, Env, Target};

fn builder() -> Builder {
    Builder::from_env(Env::default().default_filter_or("info"))
}

/// Logs to stderr, filtered through `RUST_LOG`.
pub fn init_stderr() {
    builder().init();
}

/// Logs into `path`, appending so restarted processes keep the previous output.
///
/// # Errors
/// Failing to create the file or its directory.
pub fn init_file(path: &Path) -> io::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }

    let file = OpenOptions::new().create(true).append(true).open(path)?;
    builder().target(Target::Pipe(Box::new(file))).init();
    Ok(())
}
