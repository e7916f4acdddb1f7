//! Command line interface for the `ingestor` binary.
//!
//! Every flag overrides the matching field of the JSON configuration file.

use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;

/// Command line arguments for the `ingestor` binary.
#[derive(Debug, Parser)]
#[command(
    name = "ingestor",
    version,
    about = "Reassemble fragmented device images and persist each exactly once",
    long_about = "Reads bus messages as newline-delimited JSON objects of the form \
                  {\"topic\": ..., \"payload\": {...}} from standard input, reassembles \
                  fragmented images, and stores each completed image once."
)]
pub struct Cli {
    /// JSON configuration file; flags below override its values.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Bucket receiving finished images.
    #[arg(long)]
    pub bucket: Option<String>,

    /// Root directory for stored objects; objects stay in memory when unset.
    #[arg(long, value_name = "DIR")]
    pub object_dir: Option<PathBuf>,

    /// SQLite catalog file; the catalog stays in memory when unset.
    #[arg(long, value_name = "FILE")]
    pub catalog: Option<PathBuf>,

    /// Redis URL for shared fragment state; state stays in-process when unset.
    #[arg(long, value_name = "URL")]
    pub kv_url: Option<String>,

    /// Topic filter for inbound messages.
    #[arg(long, value_name = "FILTER")]
    pub topic_filter: Option<String>,

    /// Seconds of inactivity before partial fragments are discarded.
    #[arg(long, value_name = "SECS")]
    pub fragment_ttl: Option<u64>,

    /// Seconds a completion marker suppresses duplicates.
    #[arg(long, value_name = "SECS")]
    pub completion_ttl: Option<u64>,

    /// Seconds a source keeps its session item id.
    #[arg(long, value_name = "SECS")]
    pub session_ttl: Option<u64>,

    /// Seconds an assembly lock is held before it expires.
    #[arg(long, value_name = "SECS")]
    pub lock_ttl: Option<u64>,

    /// Seconds between garbage-collection sweeps.
    #[arg(long, value_name = "SECS")]
    pub gc_interval: Option<u64>,

    /// Address for the Prometheus metrics endpoint.
    #[arg(long, value_name = "ADDR")]
    pub metrics_addr: Option<SocketAddr>,
}
