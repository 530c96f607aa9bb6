use lp_in_release::daemon::{self, MagicProxyArgs};

fn main() {
    env_logger::init();
    let args: MagicProxyArgs = argh::from_env();

    if let Err(err) = daemon::run(args) {
        eprintln!("magic-proxy: {err:#}");
        std::process::exit(1);
    }
}
