extern crate log;
extern crate pretty_env_logger;

use std::path::PathBuf;
use std::process::exit;

use clap::{arg, command, Command};
use rayon::prelude::*;

use crate::config::ScanConfig;
use crate::interpret::{scan_image_file, OfflineNameReader};

mod align;
mod bubbles;
mod circles;
mod classify;
mod config;
mod debug;
mod geometry;
mod grade;
mod image_utils;
mod interpret;
mod roster;
mod types;

fn main() {
    pretty_env_logger::init_custom_env("LOG");

    let matches = cli().get_matches();
    let debug = matches.get_flag("debug");
    let config_path = matches
        .get_one::<String>("config")
        .expect("config path is required");
    let image_paths: Vec<PathBuf> = matches
        .get_many::<String>("images")
        .expect("at least one image path is required")
        .map(PathBuf::from)
        .collect();

    let config_json = match std::fs::read_to_string(config_path) {
        Ok(json) => json,
        Err(e) => {
            eprintln!("Error reading scan configuration: {}", e);
            exit(1);
        }
    };

    // parse contents of config_path with serde_json
    let config: ScanConfig = match serde_json::from_str(&config_json) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error parsing scan configuration: {}", e);
            exit(1);
        }
    };

    let name_reader = OfflineNameReader;

    // Sheets are independent of each other; scan the batch in parallel.
    let reports: Vec<_> = image_paths
        .par_iter()
        .map(|path| scan_image_file(path, &config, &name_reader, debug))
        .collect();

    let mut any_failed = false;
    for (path, report) in image_paths.iter().zip(&reports) {
        any_failed |= !report.success;
        match serde_json::to_string_pretty(report) {
            Ok(json) => println!("{}\n{}", path.display(), json),
            Err(e) => {
                eprintln!("Error serializing report for {}: {}", path.display(), e);
                exit(1);
            }
        }
    }

    if any_failed {
        exit(1);
    }
}

fn cli() -> Command {
    command!()
        .arg(arg!(-c --config <PATH> "Path to scan configuration JSON file").required(true))
        .arg(arg!(-d --debug "Write debug images next to each input image"))
        .arg(arg!(images: <IMAGE> ... "Sheet photographs to scan").required(true))
}
