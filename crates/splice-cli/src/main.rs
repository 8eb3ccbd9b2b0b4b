//! Splice command-line tool
//!
//! Publisher-side tooling for patch bundles: key generation, packing and
//! signing, inspection, signature verification and cache fingerprints.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use splice_engine::{init_logging, LogLevel};

#[derive(Parser)]
#[command(name = "splice")]
#[command(about = "Patch bundle tooling for the splice hot-patch engine", long_about = None)]
#[command(version)]
struct Cli {
    /// Log engine activity at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a publisher key pair
    Keygen {
        /// Secret key output; the public key is written next to it with `.pub`
        #[arg(short, long, default_value = "publisher.key")]
        out: PathBuf,
        /// Overwrite existing key files
        #[arg(short, long)]
        force: bool,
    },

    /// Pack a directory of class files into a signed bundle
    Pack {
        /// Directory whose files become `classes/` entries
        classes: PathBuf,
        /// Patch-Name attribute
        #[arg(short, long)]
        name: String,
        /// Secret key file produced by `keygen`
        #[arg(short, long)]
        key: PathBuf,
        /// Output bundle
        #[arg(short, long, default_value = "out.apatch")]
        out: PathBuf,
    },

    /// Print a bundle's manifest, entries and signers
    Inspect {
        /// Bundle file
        bundle: PathBuf,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check a bundle's signatures against a publisher key
    Verify {
        /// Bundle file
        bundle: PathBuf,
        /// Publisher public key, as hex or a `.pub` file
        #[arg(short, long)]
        key: String,
    },

    /// Compute the fingerprint the engine records for an optimized cache
    Fingerprint {
        /// Optimized cache file
        file: PathBuf,
        /// Publisher public key, as hex or a `.pub` file
        #[arg(short, long)]
        key: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Warn
    });

    match cli.command {
        Commands::Keygen { out, force } => {
            let public = commands::keygen::execute(&out, force)?;
            println!("Secret key: {}", out.display());
            println!("Public key: {}", public);
        }

        Commands::Pack {
            classes,
            name,
            key,
            out,
        } => {
            let patch = commands::pack::execute(&classes, &name, &key, &out)?;
            println!(
                "Packed {} ({} classes) into {}",
                patch.name(),
                patch.classes(patch.name()).map_or(0, |c| c.len()),
                out.display()
            );
        }

        Commands::Inspect { bundle, json } => {
            let report = commands::inspect::execute(&bundle)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report.to_json())?);
            } else {
                report.print();
            }
        }

        Commands::Verify { bundle, key } => {
            if commands::verify::execute(&bundle, &key)? {
                println!("{}: signed by the publisher", bundle.display());
            } else {
                eprintln!("{}: not signed by the publisher", bundle.display());
                std::process::exit(1);
            }
        }

        Commands::Fingerprint { file, key } => {
            println!("{}", commands::fingerprint::execute(&file, &key)?);
        }
    }

    Ok(())
}
