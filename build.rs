//! Renders the `ingestor(1)` manual page from the clap definition in
//! `src/cli.rs`, so the page and `--help` never drift apart.

use std::{env, fs, path::PathBuf};

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli.rs"]
mod cli;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=src/cli.rs");
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR")?);
    let man_dir = manifest_dir.join("target").join("man");
    fs::create_dir_all(&man_dir)?;

    let cmd = cli::Cli::command();
    let page = format!("{}.1", cmd.get_name());
    let version = env::var("CARGO_PKG_VERSION")?;
    let man = Man::new(cmd)
        .section("1")
        .manual("Ingestor Manual")
        .source(format!("ingestor {version}"));

    let mut rendered = Vec::new();
    man.render(&mut rendered)?;
    fs::write(man_dir.join(page), rendered)?;
    Ok(())
}
