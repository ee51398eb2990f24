//! # `monit-hash`: prints the SHA1 and MD5 digest of a file or stdin.
//!
//! The same check monitd's `-H` flag runs inline, split out as its own
//! binary for scripting use — e.g. computing a checksum to paste into a
//! `checksum` rule's `expected` field.

#![forbid(unsafe_code)]

use std::io::{self, Read};
use std::path::PathBuf;

use clap::Parser;
use md5::Md5;
use sha1::{Digest, Sha1};

#[derive(Parser, Debug)]
#[command(name = "monit-hash", version, about = "Prints the SHA1 and MD5 digest of a file (or stdin)")]
struct Args {
    /// File to hash; omit or pass `-` to read from stdin.
    file: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let bytes = match args.file.as_deref() {
        None => read_stdin()?,
        Some(path) if path.as_os_str() == "-" => read_stdin()?,
        Some(path) => std::fs::read(path)?,
    };

    let sha1_digest = {
        let mut hasher = Sha1::new();
        hasher.update(&bytes);
        hasher.finalize()
    };
    let md5_digest = {
        let mut hasher = Md5::new();
        hasher.update(&bytes);
        hasher.finalize()
    };

    println!("SHA1:  {}", hex::encode(sha1_digest));
    println!("MD5:   {}", hex::encode(md5_digest));
    Ok(())
}

fn read_stdin() -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    io::stdin().read_to_end(&mut buf)?;
    Ok(buf)
}
