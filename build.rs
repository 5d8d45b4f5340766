// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: keep the scratch workspace
fn keep_workspace_arg() -> Arg {
    Arg::new("keep_workspace")
        .long("keep-workspace")
        .action(ArgAction::SetTrue)
        .help("Leave the scratch workspace in place after the run")
}

/// Common argument: scratch workspace parent
fn scratch_dir_arg() -> Arg {
    Arg::new("scratch_dir")
        .long("scratch-dir")
        .value_name("DIR")
        .help("Directory in which to create the scratch workspace")
}

fn build_cli() -> Command {
    Command::new("swu-recompress")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Recompress and re-sign SWUpdate .swu images")
        .subcommand_required(true)
        .subcommand(
            Command::new("recompress")
                .about("Recompress every image with zstd and rewrite sw-description")
                .arg(Arg::new("input").required(true).help("Input .swu container"))
                .arg(Arg::new("output").required(true).help("Output .swu container"))
                .arg(
                    Arg::new("compressor")
                        .required(true)
                        .help("Path to the zstd compression helper"),
                )
                .arg(
                    Arg::new("signing_command")
                        .help("Command used to sign sw-description, e.g. \"gpg --detach-sign\""),
                )
                .arg(keep_workspace_arg())
                .arg(scratch_dir_arg()),
        )
        .subcommand(
            Command::new("sign")
                .about("Sign the sw-description of an already recompressed container")
                .arg(Arg::new("input").required(true).help("Input .swu container"))
                .arg(Arg::new("output").required(true).help("Output .swu container"))
                .arg(
                    Arg::new("signing_command")
                        .required(true)
                        .help("Command used to sign sw-description"),
                )
                .arg(keep_workspace_arg())
                .arg(scratch_dir_arg()),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();

    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("swu-recompress.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
