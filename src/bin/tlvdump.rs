//! Pretty-prints BER-TLV blobs: hex in, an indented tree out.

use std::io::Read;

use anyhow::{Context, Result};
use clap::Parser;
use owo_colors::OwoColorize;

use entryway::tlv::{Class, Tlv};

/// Dump a BER-TLV blob as an indented tree.
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// Hex-encoded TLV data; read from stdin when omitted.
    hex: Option<String>,

    /// Treat constructed tags as primitive.
    #[arg(long)]
    shallow: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let hex_input = match args.hex {
        Some(hex) => hex,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("couldn't read stdin")?;
            buf
        }
    };

    let cleaned: String = hex_input.chars().filter(|c| !c.is_whitespace()).collect();
    let data = hex::decode(&cleaned).context("input is not valid hex")?;

    let tree = if args.shallow {
        Tlv::shallow_parse(&data)
    } else {
        Tlv::parse(&data)
    }
    .context("couldn't parse TLV data")?;

    for id in tree.nodes() {
        let indent = "  ".repeat(tree.depth(id));
        let tag = tree.tag(id);
        let class = match tag.class() {
            Class::Universal => "univ",
            Class::Application => "appl",
            Class::ContextSpecific => "ctxt",
            Class::Private => "priv",
        };

        if tree.is_constructed(id) {
            println!("{}{} [{}]", indent, tag.green().bold(), class);
        } else {
            let value = tree.value(id);
            println!(
                "{}{} [{}] {:3}: {} {}",
                indent,
                tag.green(),
                class,
                value.len(),
                hex::encode_upper(value),
                printable(value).dimmed(),
            );
        }
    }

    Ok(())
}

/// ASCII rendition of a value, dots for anything unprintable.
fn printable(value: &[u8]) -> String {
    value
        .iter()
        .map(|&b| {
            if (0x20..0x7F).contains(&b) {
                b as char
            } else {
                '.'
            }
        })
        .collect()
}
