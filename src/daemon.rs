//! `magic-proxy` CLI/daemon lifecycle: argument parsing plus the
//! fork/redirect/setsid/pidfile/setuid sequence that turns the proxy into a
//! background sidecar.

use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::io::AsRawFd;

use anyhow::{Context, Result};
use argh::FromArgs;
use log::info;
use nix::unistd::{ForkResult, User};

use crate::auth::AuthStore;
use crate::cache::LpInReleaseCache;
use crate::http_client::AuthenticatingHttpClient;
use crate::proxy::Proxy;

const SOURCES_LIST_PATH: &str = "/etc/apt/sources.list";

fn default_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

#[derive(FromArgs, PartialEq, Debug)]
/// magic-proxy: transparent by-hash snapshot proxy for APT archives
pub struct MagicProxyArgs {
    /// bind address
    #[argh(option, default = "default_address()")]
    pub address: String,
    /// bind port
    #[argh(option, default = "default_port()")]
    pub port: u16,
    /// select InRelease objects published at or before this POSIX timestamp
    #[argh(option, short = 't')]
    pub cutoff_time: i64,
    /// drop privileges to this user after binding (fatal on failure)
    #[argh(option)]
    pub run_as: Option<String>,
    /// write the process id to this file after binding
    #[argh(option)]
    pub pid_file: Option<String>,
    /// redirect stdout/stderr to this file instead of the null device
    #[argh(option)]
    pub log_file: Option<String>,
    /// fork and have the parent exit immediately
    #[argh(switch)]
    pub background: bool,
    /// detach from the controlling terminal via setsid
    #[argh(switch)]
    pub setsid: bool,
    /// path to the shared JSON cache file
    #[argh(option)]
    pub cache_file: Option<String>,
}

/// Redirect fd 0/1/2 to `/dev/null`, or fds 1/2 to `file` when given.
fn redirect_stdio(log_file: &Option<String>) -> Result<()> {
    use nix::fcntl::OpenFlags;
    use nix::sys::stat::Mode;
    use nix::unistd::dup2;

    let devnull = nix::fcntl::open("/dev/null", OpenFlags::O_RDWR, Mode::empty())
        .context("opening /dev/null")?;
    dup2(devnull, 0).context("redirecting stdin")?;

    let log_file_handle = log_file
        .as_ref()
        .map(|path| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {path}"))
        })
        .transpose()?;
    let out_fd = log_file_handle
        .as_ref()
        .map(|f| f.as_raw_fd())
        .unwrap_or(devnull);
    dup2(out_fd, 1).context("redirecting stdout")?;
    dup2(out_fd, 2).context("redirecting stderr")?;
    Ok(())
}

fn write_pid_file(path: &str) -> Result<()> {
    let mut f = std::fs::File::create(path).with_context(|| format!("creating pid file {path}"))?;
    writeln!(f, "{}", std::process::id()).with_context(|| format!("writing pid file {path}"))?;
    Ok(())
}

/// Irreversibly drop to `username`'s uid/gid. Fatal on lookup or permission
/// failure, matching the one-way privilege drop the daemon requires (unlike
/// the reversible escalate/drop guard used elsewhere in the corpus).
fn drop_privileges(username: &str) -> Result<()> {
    let user = User::from_name(username)
        .with_context(|| format!("looking up user {username}"))?
        .with_context(|| format!("no such user {username}"))?;
    nix::unistd::setgid(user.gid).with_context(|| format!("setgid to {}", user.gid))?;
    nix::unistd::setuid(user.uid).with_context(|| format!("setuid to {}", user.uid))?;
    Ok(())
}

/// Run the full daemon lifecycle: bind, optionally fork/detach, write the pid
/// file, optionally drop privileges, then serve forever. Matches the order
/// mandated for the sidecar: binding happens before any daemonisation step so
/// bind failures surface immediately rather than after the process detaches.
pub fn run(args: MagicProxyArgs) -> Result<()> {
    let auth = AuthStore::bootstrap_from_sources_list(SOURCES_LIST_PATH);
    let client = AuthenticatingHttpClient::new(auth)?;
    let cache = match &args.cache_file {
        Some(path) => LpInReleaseCache::new(path),
        None => LpInReleaseCache::in_memory(),
    };
    cache.load().context("loading cache")?;

    let proxy = Proxy::bind(&args.address, args.port, args.cutoff_time, cache, client)
        .context("binding proxy socket")?;

    if args.background {
        // SAFETY: fork() is called before any additional threads exist in
        // this process; the child immediately either continues single-
        // threaded or execs nothing else.
        match unsafe { nix::unistd::fork() }.context("forking")? {
            ForkResult::Parent { .. } => std::process::exit(0),
            ForkResult::Child => {}
        }
    }

    if args.log_file.is_some() || args.background {
        redirect_stdio(&args.log_file)?;
    }

    if args.setsid {
        nix::unistd::setsid().context("setsid")?;
    }

    if let Some(pid_file) = &args.pid_file {
        write_pid_file(pid_file)?;
    }

    if let Some(user) = &args.run_as {
        drop_privileges(user)?;
        info!("dropped privileges to {user}");
    }

    #[cfg(feature = "systemd")]
    {
        sd_notify::notify(true, &[sd_notify::NotifyState::Ready]).ok();
    }

    proxy.serve_forever();
    Ok(())
}
