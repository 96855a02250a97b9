//! 命令行界面定义
//!
//! 定义了主程序的命令行参数和选项
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "relaycast")]
#[command(version)]
#[command(about = "WebSocket signaling relay with an H.264-over-DataChannel demo peer")]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Option<Commands>,

    /// Configuration file path (defaults to searching standard locations)
    #[arg(short, long, default_value = "config.toml", global = true)]
    pub(crate) config: PathBuf,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Commands {
    /// Test configuration file
    Test {
        /// Configuration file path (optional, defaults to config.toml)
        #[arg(index = 1)]
        config_file: Option<PathBuf>,
    },
    /// Run a demo peer that streams H.264 over a DataChannel
    Peer(PeerArgs),
}

#[derive(Args, Debug, Clone)]
pub(crate) struct PeerArgs {
    /// Signaling server WebSocket URL
    #[arg(long, default_value = "ws://127.0.0.1:8080/ws")]
    pub(crate) server: String,

    /// Call this peer id after registering
    #[arg(long, conflicts_with = "call_first")]
    pub(crate) call: Option<String>,

    /// Call the first peer in the roster, or the first one that joins
    #[arg(long)]
    pub(crate) call_first: bool,

    /// Annex-B H.264 file to stream once the channel opens
    #[arg(long)]
    pub(crate) input: Option<PathBuf>,

    /// Frames per second used to pace `--input`
    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u32).range(1..=240))]
    pub(crate) fps: u32,

    /// Write received NAL units to this file as Annex-B
    #[arg(long)]
    pub(crate) output: Option<PathBuf>,
}
