use std::path::PathBuf;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about = "Announces detected objects on a BLE wearable")]
pub struct Cli {
    /// Config file to use instead of the portable or per-user one
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// File remembering the paired peripheral
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Look for the peripheral and keep it connected until interrupted
    Scan,

    /// Connect and write a single line
    Send {
        text: String,

        /// Connect to this address (and remember it) instead of the remembered one
        #[arg(long)]
        address: Option<String>,

        /// Seconds to wait for the connection
        #[arg(long, default_value_t = 30)]
        wait: u64,
    },

    /// Forget the remembered peripheral
    Forget,

    /// Feed the images in a directory through the detection pipeline
    Watch {
        dir: PathBuf,

        /// Clockwise rotation that makes the images upright
        #[arg(long, default_value_t = 0)]
        rotation: u32,

        /// Rate at which images are offered to the pipeline
        #[arg(long, default_value_t = 30)]
        fps: u32,

        /// Class index the stub detector reports
        #[arg(long, default_value_t = 0)]
        class: usize,

        /// Score the stub detector reports
        #[arg(long, default_value_t = 0.9)]
        score: f32,
    },
}
