//! `lp-in-release` CLI: `list` / `select` / `inject`, sharing one
//! [`crate::index::Index`] and [`crate::cache::LpInReleaseCache`].

use std::io::Write;

use anyhow::{Context, Result};
use argh::FromArgs;
use log::info;
use time::OffsetDateTime;

use crate::auth::AuthStore;
use crate::cache::LpInReleaseCache;
use crate::http_client::AuthenticatingHttpClient;
use crate::index::Index;
use crate::inrelease::InRelease;
use crate::sources_list::{parse_source_line, render_source_line, with_by_hash_options};

const SOURCES_LIST_PATH: &str = "/etc/apt/sources.list";

fn default_mirror() -> String {
    "http://archive.ubuntu.com/ubuntu".to_string()
}

#[derive(FromArgs, PartialEq, Debug)]
/// list every known InRelease for (mirror, suite), newest first
#[argh(subcommand, name = "list")]
pub struct ListCmd {
    /// archive mirror URL
    #[argh(option, short = 'm', default = "default_mirror()")]
    pub mirror: String,
    /// suite name
    #[argh(option, short = 's')]
    pub suite: String,
    /// only list InRelease objects published at or before this POSIX timestamp
    #[argh(option, short = 't')]
    pub cutoff_time: Option<i64>,
    /// path to the shared JSON cache file
    #[argh(option)]
    pub cache_file: Option<String>,
}

#[derive(FromArgs, PartialEq, Debug)]
/// print the InRelease selected for a cutoff timestamp
#[argh(subcommand, name = "select")]
pub struct SelectCmd {
    /// archive mirror URL
    #[argh(option, short = 'm', default = "default_mirror()")]
    pub mirror: String,
    /// suite name
    #[argh(option, short = 's')]
    pub suite: String,
    /// select the InRelease published at or before this POSIX timestamp
    #[argh(option, short = 't')]
    pub cutoff_time: i64,
    /// path to the shared JSON cache file
    #[argh(option)]
    pub cache_file: Option<String>,
}

#[derive(FromArgs, PartialEq, Debug)]
/// rewrite a sources.list to pin by-hash/inrelease-path options
#[argh(subcommand, name = "inject")]
pub struct InjectCmd {
    /// select InRelease objects published at or before this POSIX timestamp
    #[argh(option, short = 't')]
    pub cutoff_time: i64,
    /// output path, or "-" for stdout
    #[argh(option, short = 'o', default = "String::from(\"-\")")]
    pub output_file: String,
    /// path to the shared JSON cache file
    #[argh(option)]
    pub cache_file: Option<String>,
    #[argh(positional)]
    pub infile: String,
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand)]
pub enum LpInReleaseCommand {
    List(ListCmd),
    Select(SelectCmd),
    Inject(InjectCmd),
}

#[derive(FromArgs, PartialEq, Debug)]
/// lp-in-release: point-in-time by-hash snapshot index for APT archives
pub struct LpInRelease {
    #[argh(subcommand)]
    pub command: LpInReleaseCommand,
}

fn open_cache(cache_file: &Option<String>) -> Result<LpInReleaseCache> {
    let cache = match cache_file {
        Some(path) => LpInReleaseCache::new(path),
        None => LpInReleaseCache::in_memory(),
    };
    cache.load().context("loading cache")?;
    Ok(cache)
}

fn format_list_line(ir: &InRelease) -> String {
    let formatted = OffsetDateTime::from_unix_timestamp(ir.published)
        .ok()
        .map(|dt| {
            format!(
                "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                dt.year(),
                dt.month() as u8,
                dt.day(),
                dt.hour(),
                dt.minute(),
                dt.second()
            )
        })
        .unwrap_or_else(|| "????-??-?? ??:??:??".to_string());
    format!("{} {} ({})", ir.hash, formatted, ir.published)
}

/// `lp-in-release list`: every candidate for (mirror, suite), newest first.
pub fn run_list(args: ListCmd) -> Result<()> {
    let auth = AuthStore::bootstrap_from_sources_list(SOURCES_LIST_PATH);
    let client = AuthenticatingHttpClient::new(auth)?;
    let cache = open_cache(&args.cache_file)?;

    let index = Index::new(&args.mirror, &args.suite, &client, &cache);
    let mut candidates = index.inrelease_files()?;
    candidates.sort_by(|a, b| b.published.cmp(&a.published));

    for ir in &candidates {
        if let Some(cutoff) = args.cutoff_time {
            if ir.published > cutoff {
                continue;
            }
        }
        println!("{}", format_list_line(ir));
    }

    cache.save().context("saving cache")?;
    Ok(())
}

/// `lp-in-release select`: the single InRelease chosen for `cutoff_time`.
pub fn run_select(args: SelectCmd) -> Result<()> {
    let auth = AuthStore::bootstrap_from_sources_list(SOURCES_LIST_PATH);
    let client = AuthenticatingHttpClient::new(auth)?;
    let cache = open_cache(&args.cache_file)?;

    let index = Index::new(&args.mirror, &args.suite, &client, &cache);
    if let Some(ir) = index.get_inrelease_for_timestamp(args.cutoff_time)? {
        println!("{}", format_list_line(&ir));
    }

    cache.save().context("saving cache")?;
    Ok(())
}

/// `lp-in-release inject`: rewrite a sources.list, pinning by-hash options on
/// every matched line, leaving everything else byte-for-byte untouched.
pub fn run_inject(args: InjectCmd) -> Result<()> {
    let auth = AuthStore::bootstrap_from_sources_list(SOURCES_LIST_PATH);
    let client = AuthenticatingHttpClient::new(auth)?;
    let cache = open_cache(&args.cache_file)?;

    let input = std::fs::read_to_string(&args.infile)
        .with_context(|| format!("reading {}", args.infile))?;

    let mut out = String::new();
    for line in input.lines() {
        match parse_source_line(line) {
            Some(parsed) => {
                let index = Index::new(&parsed.mirror, &parsed.suite, &client, &cache);
                match index.get_inrelease_for_timestamp(args.cutoff_time)? {
                    Some(ir) => {
                        let rewritten = with_by_hash_options(&parsed, &ir.hash);
                        out.push_str(&render_source_line(&rewritten));
                    }
                    None => {
                        info!(
                            "no InRelease found for {}/{} at or before {}, leaving line unchanged",
                            parsed.mirror, parsed.suite, args.cutoff_time
                        );
                        out.push_str(line);
                    }
                }
            }
            None => out.push_str(line),
        }
        out.push('\n');
    }

    if args.output_file == "-" {
        print!("{out}");
    } else {
        std::fs::write(&args.output_file, out)
            .with_context(|| format!("writing {}", args.output_file))?;
    }
    std::io::stdout().flush().ok();

    cache.save().context("saving cache")?;
    Ok(())
}
