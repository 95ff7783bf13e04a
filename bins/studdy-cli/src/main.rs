mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "studdy-cli")]
#[command(about = "StuddyBuddy CLI - Run code through the judge and inspect scheduling and XP rules", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a source file once through the remote judge (reads JUDGE0_* env)
    Run {
        /// Language name (python, javascript, java, cpp, go, rust)
        #[arg(short, long)]
        language: String,

        /// Path to the source file
        #[arg(short, long)]
        file: String,

        /// Standard input passed to the program
        #[arg(short, long)]
        stdin: Option<String>,
    },

    /// Compute the next SM-2 review interval
    Schedule {
        /// Current ease factor
        #[arg(short, long, default_value = "2.5")]
        ease: f64,

        /// Successful repetitions so far
        #[arg(short, long, default_value = "0")]
        repetitions: u32,

        /// Recall quality, 0 to 5
        #[arg(short, long)]
        quality: u8,
    },

    /// Show the level and badges for an XP total
    Level {
        /// Total XP
        #[arg(short, long)]
        xp: u64,

        /// Current streak in days
        #[arg(short, long, default_value = "0")]
        streak: u32,
    },

    /// List supported judge languages
    Languages,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            language,
            file,
            stdin,
        } => {
            commands::run_file(&language, &file, stdin.as_deref()).await?;
        }
        Commands::Schedule {
            ease,
            repetitions,
            quality,
        } => {
            commands::schedule(ease, repetitions, quality)?;
        }
        Commands::Level { xp, streak } => {
            commands::level(xp, streak);
        }
        Commands::Languages => {
            commands::list_languages();
        }
    }

    Ok(())
}
